// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use thiserror::Error;

use crate::address::{DeviceId, SessionAddress};
use crate::curve::PublicKey;
use crate::keys::{
    IdentityKeyPair, PreKeyId, PreKeyRecord, RegistrationId, SignedPreKeyId, SignedPreKeyRecord,
};
use crate::session::SessionRecord;

/// Durable per-device session state.
pub trait SessionStore {
    type Error: Error + Send + Sync + 'static;

    fn load_session(&self, address: &SessionAddress) -> Result<Option<SessionRecord>, Self::Error>;

    fn store_session(
        &self,
        address: &SessionAddress,
        record: SessionRecord,
    ) -> Result<(), Self::Error>;

    fn contains_session(&self, address: &SessionAddress) -> Result<bool, Self::Error>;

    /// Device ids other than the primary device we hold sessions with for this recipient.
    fn sub_device_sessions(&self, recipient_id: &str) -> Result<Vec<DeviceId>, Self::Error>;

    fn delete_session(&self, address: &SessionAddress) -> Result<(), Self::Error>;

    fn delete_all_sessions(&self, recipient_id: &str) -> Result<(), Self::Error>;
}

/// Our own identity and the identity keys we pinned for others.
pub trait IdentityKeyStore {
    type Error: Error + Send + Sync + 'static;

    fn identity_key_pair(&self) -> Result<IdentityKeyPair, Self::Error>;

    fn local_registration_id(&self) -> Result<RegistrationId, Self::Error>;

    /// Pins the identity key of a recipient. Returns `true` if a different key was replaced.
    fn save_identity(&self, recipient_id: &str, identity_key: &PublicKey)
    -> Result<bool, Self::Error>;

    /// An identity is trusted when nothing is pinned yet or the pinned key matches.
    fn is_trusted_identity(
        &self,
        recipient_id: &str,
        identity_key: &PublicKey,
    ) -> Result<bool, Self::Error>;

    fn identity(&self, recipient_id: &str) -> Result<Option<PublicKey>, Self::Error>;
}

/// Our one-time pre-key secrets.
pub trait PreKeyStore {
    type Error: Error + Send + Sync + 'static;

    fn load_prekey(&self, id: PreKeyId) -> Result<Option<PreKeyRecord>, Self::Error>;

    fn store_prekey(&self, record: PreKeyRecord) -> Result<(), Self::Error>;

    fn remove_prekey(&self, id: PreKeyId) -> Result<(), Self::Error>;
}

/// Our signed pre-key secrets.
pub trait SignedPreKeyStore {
    type Error: Error + Send + Sync + 'static;

    fn load_signed_prekey(
        &self,
        id: SignedPreKeyId,
    ) -> Result<Option<SignedPreKeyRecord>, Self::Error>;

    fn store_signed_prekey(&self, record: SignedPreKeyRecord) -> Result<(), Self::Error>;
}

/// Everything session establishment and the per-device cipher need.
pub trait ProtocolStore: SessionStore + IdentityKeyStore + PreKeyStore + SignedPreKeyStore {}

impl<T> ProtocolStore for T where T: SessionStore + IdentityKeyStore + PreKeyStore + SignedPreKeyStore {}

/// Error of an underlying store implementation.
#[derive(Debug, Error)]
#[error("store error: {0}")]
pub struct StoreError(Box<dyn Error + Send + Sync>);

impl StoreError {
    pub fn new<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self(Box::new(err))
    }
}
