// SPDX-License-Identifier: MIT OR Apache-2.0

//! Devices with populated key stores for tests.
use crate::address::{DeviceId, SessionAddress};
use crate::crypto::Rng;
use crate::keys::{
    IdentityKeyPair, KeyHelper, PreKeyBundle, PreKeyId, RegistrationId, SignedPreKeyRecord,
};
use crate::memory_store::MemoryProtocolStore;
use crate::session::{SessionBuilder, SessionRecord};
use crate::traits::{PreKeyStore, SessionStore, SignedPreKeyStore};

const SIGNED_PREKEY_ID: u32 = 1;

/// One device of an account with its own protocol store and published key material.
#[derive(Clone, Debug)]
pub struct TestDevice {
    pub device_id: DeviceId,
    pub registration_id: RegistrationId,
    pub identity: IdentityKeyPair,
    pub store: MemoryProtocolStore,
    signed_prekey: SignedPreKeyRecord,
}

impl TestDevice {
    /// Device with a fresh identity.
    pub fn generate(device_id: DeviceId, rng: &Rng) -> Self {
        let identity = KeyHelper::generate_identity_key_pair(rng).unwrap();
        Self::with_identity(identity, device_id, rng)
    }

    /// Further device of an account which shares the given identity.
    pub fn with_identity(identity: IdentityKeyPair, device_id: DeviceId, rng: &Rng) -> Self {
        let registration_id = KeyHelper::generate_registration_id(rng).unwrap();
        let store = MemoryProtocolStore::new(identity.clone(), registration_id);
        let signed_prekey =
            KeyHelper::generate_signed_prekey(&identity, SIGNED_PREKEY_ID, rng).unwrap();
        store.store_signed_prekey(signed_prekey.clone()).unwrap();
        Self {
            device_id,
            registration_id,
            identity,
            store,
            signed_prekey,
        }
    }

    /// Publishes a bundle with a newly generated one-time pre-key.
    pub fn prekey_bundle(&self, rng: &Rng) -> PreKeyBundle {
        let id: PreKeyId = rng.random_below(0xFFFFFF).unwrap() + 1;
        let prekey = KeyHelper::generate_prekeys(id, 1, rng).unwrap().remove(0);
        self.store.store_prekey(prekey.clone()).unwrap();
        KeyHelper::prekey_bundle(
            self.registration_id,
            self.device_id,
            &self.identity,
            &self.signed_prekey,
            Some(&prekey),
        )
    }

    /// Publishes a bundle without one-time pre-key.
    pub fn signed_only_bundle(&self) -> PreKeyBundle {
        KeyHelper::prekey_bundle(
            self.registration_id,
            self.device_id,
            &self.identity,
            &self.signed_prekey,
            None,
        )
    }
}

/// Session record of a freshly established session between two generated devices.
pub fn established_session(rng: &Rng) -> SessionRecord {
    let alice = TestDevice::generate(1, rng);
    let bob = TestDevice::generate(1, rng);
    let address = SessionAddress::new("bob", bob.device_id);

    SessionBuilder::new(&alice.store, rng)
        .process_bundle(&address, &bob.prekey_bundle(rng))
        .unwrap();
    alice.store.load_session(&address).unwrap().unwrap()
}
