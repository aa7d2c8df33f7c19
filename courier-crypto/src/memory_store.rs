// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence for sessions, pinned identities and our own pre-keys.
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::address::{DeviceId, PRIMARY_DEVICE_ID, SessionAddress};
use crate::curve::PublicKey;
use crate::keys::{
    IdentityKeyPair, PreKeyId, PreKeyRecord, RegistrationId, SignedPreKeyId, SignedPreKeyRecord,
};
use crate::session::SessionRecord;
use crate::traits::{IdentityKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore};

#[derive(Clone, Debug)]
pub struct InnerMemoryProtocolStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: RegistrationId,
    sessions: HashMap<SessionAddress, SessionRecord>,
    identities: HashMap<String, PublicKey>,
    prekeys: HashMap<PreKeyId, PreKeyRecord>,
    signed_prekeys: HashMap<SignedPreKeyId, SignedPreKeyRecord>,
}

/// In-memory protocol store.
///
/// `MemoryProtocolStore` can be cloned and shared across tasks and threads, all clones point at
/// the same `RwLock` protected state. Every trait method acquires the lock exactly once, which
/// makes each single store operation atomic.
#[derive(Clone, Debug)]
pub struct MemoryProtocolStore {
    inner: Arc<RwLock<InnerMemoryProtocolStore>>,
}

impl MemoryProtocolStore {
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: RegistrationId) -> Self {
        let inner = InnerMemoryProtocolStore {
            identity_key_pair,
            registration_id,
            sessions: HashMap::new(),
            identities: HashMap::new(),
            prekeys: HashMap::new(),
            signed_prekeys: HashMap::new(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Obtain a read-lock on the store.
    pub fn read_store(&self) -> RwLockReadGuard<'_, InnerMemoryProtocolStore> {
        self.inner
            .read()
            .expect("acquire shared read access on store")
    }

    /// Obtain a write-lock on the store.
    pub fn write_store(&self) -> RwLockWriteGuard<'_, InnerMemoryProtocolStore> {
        self.inner
            .write()
            .expect("acquire exclusive write access on store")
    }
}

impl SessionStore for MemoryProtocolStore {
    type Error = Infallible;

    fn load_session(&self, address: &SessionAddress) -> Result<Option<SessionRecord>, Self::Error> {
        Ok(self.read_store().sessions.get(address).cloned())
    }

    fn store_session(
        &self,
        address: &SessionAddress,
        record: SessionRecord,
    ) -> Result<(), Self::Error> {
        self.write_store().sessions.insert(address.clone(), record);
        Ok(())
    }

    fn contains_session(&self, address: &SessionAddress) -> Result<bool, Self::Error> {
        Ok(self.read_store().sessions.contains_key(address))
    }

    fn sub_device_sessions(&self, recipient_id: &str) -> Result<Vec<DeviceId>, Self::Error> {
        let mut device_ids: Vec<DeviceId> = self
            .read_store()
            .sessions
            .keys()
            .filter(|address| {
                address.recipient_id() == recipient_id && address.device_id() != PRIMARY_DEVICE_ID
            })
            .map(|address| address.device_id())
            .collect();
        device_ids.sort_unstable();
        Ok(device_ids)
    }

    fn delete_session(&self, address: &SessionAddress) -> Result<(), Self::Error> {
        self.write_store().sessions.remove(address);
        Ok(())
    }

    fn delete_all_sessions(&self, recipient_id: &str) -> Result<(), Self::Error> {
        self.write_store()
            .sessions
            .retain(|address, _| address.recipient_id() != recipient_id);
        Ok(())
    }
}

impl IdentityKeyStore for MemoryProtocolStore {
    type Error = Infallible;

    fn identity_key_pair(&self) -> Result<IdentityKeyPair, Self::Error> {
        Ok(self.read_store().identity_key_pair.clone())
    }

    fn local_registration_id(&self) -> Result<RegistrationId, Self::Error> {
        Ok(self.read_store().registration_id)
    }

    fn save_identity(
        &self,
        recipient_id: &str,
        identity_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let replaced = self
            .write_store()
            .identities
            .insert(recipient_id.to_owned(), *identity_key);
        Ok(replaced.is_some_and(|existing| &existing != identity_key))
    }

    fn is_trusted_identity(
        &self,
        recipient_id: &str,
        identity_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self
            .read_store()
            .identities
            .get(recipient_id)
            .is_none_or(|pinned| pinned == identity_key))
    }

    fn identity(&self, recipient_id: &str) -> Result<Option<PublicKey>, Self::Error> {
        Ok(self.read_store().identities.get(recipient_id).copied())
    }
}

impl PreKeyStore for MemoryProtocolStore {
    type Error = Infallible;

    fn load_prekey(&self, id: PreKeyId) -> Result<Option<PreKeyRecord>, Self::Error> {
        Ok(self.read_store().prekeys.get(&id).cloned())
    }

    fn store_prekey(&self, record: PreKeyRecord) -> Result<(), Self::Error> {
        self.write_store().prekeys.insert(record.id(), record);
        Ok(())
    }

    fn remove_prekey(&self, id: PreKeyId) -> Result<(), Self::Error> {
        self.write_store().prekeys.remove(&id);
        Ok(())
    }
}

impl SignedPreKeyStore for MemoryProtocolStore {
    type Error = Infallible;

    fn load_signed_prekey(
        &self,
        id: SignedPreKeyId,
    ) -> Result<Option<SignedPreKeyRecord>, Self::Error> {
        Ok(self.read_store().signed_prekeys.get(&id).cloned())
    }

    fn store_signed_prekey(&self, record: SignedPreKeyRecord) -> Result<(), Self::Error> {
        self.write_store().signed_prekeys.insert(record.id(), record);
        Ok(())
    }
}
