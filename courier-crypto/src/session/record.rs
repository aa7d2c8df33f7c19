// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::Secret;
use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::xchacha20::{XAeadKey, XAeadNonce};
use crate::curve::PublicKey;
use crate::keys::{PreKeyId, RegistrationId, SignedPreKeyId};
use crate::session::{SessionError, SessionResult};

/// Maximum number of message keys we keep for messages which have not arrived yet.
///
/// This is also the furthest a received counter may lie ahead of the receiving chain.
pub const MAX_SKIPPED_MESSAGES: u32 = 2000;

const CHAIN_KEY_INFO: &[u8] = b"courier-chain-key";

const MESSAGE_KEY_INFO: &[u8] = b"courier-message-key";

/// Symmetric KDF chain of one direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ChainKey {
    key: Secret<32>,
    index: u32,
}

impl ChainKey {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self {
            key: Secret::from_bytes(key),
            index: 0,
        }
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    fn message_keys(&self) -> Result<MessageKeys, HkdfError> {
        let okm: [u8; 56] = hkdf(b"", self.key.as_bytes(), Some(MESSAGE_KEY_INFO))?;
        let mut key = [0u8; 32];
        let mut nonce = [0u8; 24];
        key.copy_from_slice(&okm[..32]);
        nonce.copy_from_slice(&okm[32..]);
        Ok(MessageKeys {
            key: Secret::from_bytes(key),
            nonce,
            counter: self.index,
        })
    }

    fn next(&self) -> Result<ChainKey, HkdfError> {
        let key: [u8; 32] = hkdf(b"", self.key.as_bytes(), Some(CHAIN_KEY_INFO))?;
        Ok(ChainKey {
            key: Secret::from_bytes(key),
            index: self.index + 1,
        })
    }
}

/// Key and nonce sealing exactly one message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MessageKeys {
    key: Secret<32>,
    nonce: XAeadNonce,
    counter: u32,
}

impl MessageKeys {
    pub(crate) fn key(&self) -> &XAeadKey {
        self.key.as_bytes()
    }

    pub(crate) fn nonce(&self) -> XAeadNonce {
        self.nonce
    }

    pub(crate) fn counter(&self) -> u32 {
        self.counter
    }
}

/// Key material a session was derived from.
///
/// Processing the same input again must not replace an already advanced session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum SessionOrigin {
    /// We initiated the session from a fetched bundle.
    Bundle {
        identity_key: PublicKey,
        signed_prekey: Option<(SignedPreKeyId, PublicKey)>,
        onetime_prekey: Option<(PreKeyId, PublicKey)>,
    },

    /// The remote device initiated the session with this base key.
    PreKeyMessage { base_key: PublicKey },
}

/// Handshake details attached to outgoing messages until the remote side answered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PendingPreKey {
    pub(crate) signed_prekey_id: Option<SignedPreKeyId>,
    pub(crate) onetime_prekey_id: Option<PreKeyId>,
    pub(crate) base_key: PublicKey,
}

/// Persisted state of a session with one remote device.
///
/// Records are plain values. Encryption and decryption operate on a copy and the caller writes it
/// back only after the operation succeeded, so a failed decryption never advances the chains.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    local_identity_key: PublicKey,
    remote_identity_key: PublicKey,
    remote_registration_id: RegistrationId,
    origin: SessionOrigin,
    sending_chain: ChainKey,
    receiving_chain: ChainKey,
    skipped_message_keys: BTreeMap<u32, MessageKeys>,
    pending_prekey: Option<PendingPreKey>,
}

impl SessionRecord {
    pub(crate) fn new(
        local_identity_key: PublicKey,
        remote_identity_key: PublicKey,
        remote_registration_id: RegistrationId,
        origin: SessionOrigin,
        sending_chain: ChainKey,
        receiving_chain: ChainKey,
        pending_prekey: Option<PendingPreKey>,
    ) -> Self {
        Self {
            local_identity_key,
            remote_identity_key,
            remote_registration_id,
            origin,
            sending_chain,
            receiving_chain,
            skipped_message_keys: BTreeMap::new(),
            pending_prekey,
        }
    }

    pub fn local_identity_key(&self) -> &PublicKey {
        &self.local_identity_key
    }

    pub fn remote_identity_key(&self) -> &PublicKey {
        &self.remote_identity_key
    }

    pub fn remote_registration_id(&self) -> RegistrationId {
        self.remote_registration_id
    }

    /// Returns `true` while outgoing messages still carry the pre-key handshake.
    pub fn has_pending_prekey(&self) -> bool {
        self.pending_prekey.is_some()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(&self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }

    pub(crate) fn origin(&self) -> &SessionOrigin {
        &self.origin
    }

    pub(crate) fn pending_prekey(&self) -> Option<&PendingPreKey> {
        self.pending_prekey.as_ref()
    }

    pub(crate) fn clear_pending_prekey(&mut self) {
        self.pending_prekey = None;
    }

    /// Keys for the next outgoing message, advancing the sending chain.
    pub(crate) fn next_sending_keys(&mut self) -> Result<MessageKeys, HkdfError> {
        let keys = self.sending_chain.message_keys()?;
        self.sending_chain = self.sending_chain.next()?;
        Ok(keys)
    }

    /// Keys for a received message with the given counter.
    ///
    /// Keys of messages we skip over on the way are kept so they can still be opened when they
    /// arrive out of order. Every key is handed out at most once.
    pub(crate) fn receiving_keys(&mut self, counter: u32) -> SessionResult<MessageKeys> {
        if counter < self.receiving_chain.index() {
            return self
                .skipped_message_keys
                .remove(&counter)
                .ok_or(SessionError::DuplicateMessage(counter));
        }

        if counter - self.receiving_chain.index() > MAX_SKIPPED_MESSAGES {
            return Err(SessionError::MessageTooFarInFuture(counter));
        }

        while self.receiving_chain.index() < counter {
            let skipped = self.receiving_chain.message_keys()?;
            self.skipped_message_keys
                .insert(skipped.counter(), skipped);
            self.receiving_chain = self.receiving_chain.next()?;
        }

        while self.skipped_message_keys.len() > MAX_SKIPPED_MESSAGES as usize {
            self.skipped_message_keys.pop_first();
        }

        let keys = self.receiving_chain.message_keys()?;
        self.receiving_chain = self.receiving_chain.next()?;
        Ok(keys)
    }
}
