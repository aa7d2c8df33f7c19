// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::trace;

use crate::address::SessionAddress;
use crate::crypto::xchacha20::{x_aead_decrypt, x_aead_encrypt};
use crate::curve::PublicKey;
use crate::keys::RegistrationId;
use crate::session::builder::accept_prekey_message;
use crate::session::message::{
    CiphertextMessage, MESSAGE_VERSION, MessageType, OrdinaryMessage, PreKeyMessage,
};
use crate::session::record::SessionRecord;
use crate::session::{SessionError, SessionResult};
use crate::traits::{ProtocolStore, StoreError};

/// Largest plaintext accepted for a single envelope (256 KiB).
pub const MAX_PLAINTEXT_SIZE: usize = 256 * 1024;

/// Output of [`SessionCipher::encrypt`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub message_type: MessageType,
    pub body: Vec<u8>,
    pub remote_registration_id: RegistrationId,
}

/// Encrypts and decrypts messages with the session of one remote device.
///
/// The cipher never creates sessions from bundles, this is the job of
/// [`SessionBuilder`](crate::session::SessionBuilder). Encrypting without a stored session fails
/// with [`SessionError::NoSession`].
pub struct SessionCipher<'a, S> {
    store: &'a S,
    address: SessionAddress,
}

impl<'a, S> SessionCipher<'a, S>
where
    S: ProtocolStore,
{
    pub fn new(store: &'a S, address: SessionAddress) -> Self {
        Self { store, address }
    }

    pub fn address(&self) -> &SessionAddress {
        &self.address
    }

    /// Seals `plaintext` for the remote device and advances the sending chain.
    ///
    /// The message is of type [`MessageType::PreKeyBundle`] as long as the session has not seen
    /// any message from the remote device yet.
    pub fn encrypt(&self, plaintext: &[u8]) -> SessionResult<EncryptedMessage> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(SessionError::MessageTooLarge(plaintext.len()));
        }

        let mut record = self.load_session()?;

        let keys = record.next_sending_keys()?;
        let aad = associated_data(
            record.local_identity_key(),
            record.remote_identity_key(),
            keys.counter(),
        );
        let ciphertext = x_aead_encrypt(keys.key(), plaintext, keys.nonce(), Some(&aad))?;

        let message = OrdinaryMessage {
            version: MESSAGE_VERSION,
            counter: keys.counter(),
            ciphertext,
        };

        let message = match record.pending_prekey() {
            Some(pending) => CiphertextMessage::PreKey(PreKeyMessage {
                version: MESSAGE_VERSION,
                registration_id: self
                    .store
                    .local_registration_id()
                    .map_err(StoreError::new)?,
                signed_prekey_id: pending.signed_prekey_id,
                onetime_prekey_id: pending.onetime_prekey_id,
                base_key: pending.base_key,
                identity_key: *record.local_identity_key(),
                message,
            }),
            None => CiphertextMessage::Ordinary(message),
        };

        let encrypted = EncryptedMessage {
            message_type: message.message_type(),
            body: message.to_bytes()?,
            remote_registration_id: record.remote_registration_id(),
        };

        self.store
            .store_session(&self.address, record)
            .map_err(StoreError::new)?;

        trace!(
            address = %self.address,
            message_type = %encrypted.message_type,
            counter = keys.counter(),
            "encrypted message"
        );
        Ok(encrypted)
    }

    /// Opens a message received from the remote device.
    ///
    /// Pre-key messages establish the session if we do not have it yet. Stored state is only
    /// updated when the message authenticated, failed attempts leave the session as it was.
    pub fn decrypt(&self, message_type: MessageType, body: &[u8]) -> SessionResult<Vec<u8>> {
        match CiphertextMessage::from_bytes(message_type, body)? {
            CiphertextMessage::Ordinary(message) => {
                let record = self.load_session()?;
                let (record, plaintext) = decrypt_with_session(record, &message)?;
                self.store
                    .store_session(&self.address, record)
                    .map_err(StoreError::new)?;
                Ok(plaintext)
            }
            CiphertextMessage::PreKey(message) => {
                let record = accept_prekey_message(self.store, &self.address, &message)?;
                let (record, plaintext) = decrypt_with_session(record, &message.message)?;

                self.store
                    .save_identity(self.address.recipient_id(), &message.identity_key)
                    .map_err(StoreError::new)?;
                self.store
                    .store_session(&self.address, record)
                    .map_err(StoreError::new)?;
                if let Some(onetime_prekey_id) = message.onetime_prekey_id {
                    self.store
                        .remove_prekey(onetime_prekey_id)
                        .map_err(StoreError::new)?;
                }
                Ok(plaintext)
            }
        }
    }

    fn load_session(&self) -> SessionResult<SessionRecord> {
        self.store
            .load_session(&self.address)
            .map_err(StoreError::new)?
            .ok_or_else(|| SessionError::NoSession(self.address.clone()))
    }
}

fn decrypt_with_session(
    mut record: SessionRecord,
    message: &OrdinaryMessage,
) -> SessionResult<(SessionRecord, Vec<u8>)> {
    if message.version != MESSAGE_VERSION {
        return Err(SessionError::InvalidMessage("unsupported message version"));
    }

    let keys = record.receiving_keys(message.counter)?;
    let aad = associated_data(
        record.remote_identity_key(),
        record.local_identity_key(),
        message.counter,
    );
    let plaintext = x_aead_decrypt(keys.key(), &message.ciphertext, keys.nonce(), Some(&aad))?;

    // The remote side answered, it knows the session now.
    record.clear_pending_prekey();

    Ok((record, plaintext))
}

/// Binds a ciphertext to both identities and its position in the chain.
fn associated_data(sender: &PublicKey, receiver: &PublicKey, counter: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(33 * 2 + 4);
    buf.extend_from_slice(&sender.serialize());
    buf.extend_from_slice(&receiver.serialize());
    buf.extend_from_slice(&counter.to_be_bytes());
    buf
}
