// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::curve::PublicKey;
use crate::keys::{PreKeyId, RegistrationId, SignedPreKeyId};

/// Version of the ciphertext message format.
pub const MESSAGE_VERSION: u8 = 1;

/// Kind of ciphertext in an envelope.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Message sealed with an already established session.
    Ordinary,

    /// Message which additionally carries the pre-key handshake, so the receiver can establish
    /// the session on first receipt.
    #[serde(rename = "bundle")]
    PreKeyBundle,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            MessageType::Ordinary => "ordinary",
            MessageType::PreKeyBundle => "bundle",
        };
        write!(f, "{value}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinaryMessage {
    pub(crate) version: u8,
    pub(crate) counter: u32,
    #[serde(with = "serde_bytes")]
    pub(crate) ciphertext: Vec<u8>,
}

impl OrdinaryMessage {
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(&self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyMessage {
    pub(crate) version: u8,
    pub(crate) registration_id: RegistrationId,
    pub(crate) signed_prekey_id: Option<SignedPreKeyId>,
    pub(crate) onetime_prekey_id: Option<PreKeyId>,
    pub(crate) base_key: PublicKey,
    pub(crate) identity_key: PublicKey,
    pub(crate) message: OrdinaryMessage,
}

impl PreKeyMessage {
    /// Registration id of the sending device.
    pub fn registration_id(&self) -> RegistrationId {
        self.registration_id
    }

    pub fn signed_prekey_id(&self) -> Option<SignedPreKeyId> {
        self.signed_prekey_id
    }

    pub fn onetime_prekey_id(&self) -> Option<PreKeyId> {
        self.onetime_prekey_id
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn identity_key(&self) -> &PublicKey {
        &self.identity_key
    }

    pub fn message(&self) -> &OrdinaryMessage {
        &self.message
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(&self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

/// Typed ciphertext produced by a session cipher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CiphertextMessage {
    Ordinary(OrdinaryMessage),
    PreKey(PreKeyMessage),
}

impl CiphertextMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            CiphertextMessage::Ordinary(_) => MessageType::Ordinary,
            CiphertextMessage::PreKey(_) => MessageType::PreKeyBundle,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            CiphertextMessage::Ordinary(message) => message.to_bytes(),
            CiphertextMessage::PreKey(message) => message.to_bytes(),
        }
    }

    /// Decodes a body whose type travelled next to it, like in an envelope.
    pub fn from_bytes(message_type: MessageType, bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(match message_type {
            MessageType::Ordinary => CiphertextMessage::Ordinary(OrdinaryMessage::from_bytes(bytes)?),
            MessageType::PreKeyBundle => {
                CiphertextMessage::PreKey(PreKeyMessage::from_bytes(bytes)?)
            }
        })
    }
}
