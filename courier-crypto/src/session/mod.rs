// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-device sessions: bootstrap from pre-key bundles and message encryption.
//!
//! A session between our device and one remote device is created by [`SessionBuilder`] from a
//! fetched [`PreKeyBundle`](crate::keys::PreKeyBundle), using an X3DH key agreement over the
//! bundle's identity, signed and one-time pre-keys and a freshly generated ephemeral ("base") key.
//! The agreed secret seeds two symmetric chains, one per direction. Every message advances the
//! sending chain and is sealed with its own XChaCha20-Poly1305 key.
//!
//! Until the remote side answered for the first time, [`SessionCipher`] wraps every outgoing
//! message in a [`PreKeyMessage`] which carries enough of the handshake for the receiver to derive
//! the same session on first receipt.
//!
//! <https://signal.org/docs/specifications/x3dh/>
mod builder;
mod cipher;
mod message;
mod record;

use thiserror::Error;

pub use builder::{BundleOutcome, SessionBuilder};
pub use cipher::{EncryptedMessage, MAX_PLAINTEXT_SIZE, SessionCipher};
pub use message::{CiphertextMessage, MessageType, OrdinaryMessage, PreKeyMessage};
pub use record::{MAX_SKIPPED_MESSAGES, SessionRecord};

use crate::address::SessionAddress;
use crate::cbor::{DecodeError, EncodeError};
use crate::crypto::hkdf::HkdfError;
use crate::crypto::xchacha20::XAeadError;
use crate::curve::{CurveError, PublicKey};
use crate::keys::KeyBundleError;
use crate::traits::StoreError;

/// Identity key offered for a recipient conflicts with the key we pinned for them.
///
/// Carries everything needed to ask the user for a trust decision; no store is modified.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("untrusted identity key for {recipient_id}")]
pub struct UntrustedIdentity {
    pub recipient_id: String,
    pub identity_key: PublicKey,
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    UntrustedIdentity(#[from] UntrustedIdentity),

    #[error("no session established with {0}")]
    NoSession(SessionAddress),

    #[error(transparent)]
    KeyBundle(#[from] KeyBundleError),

    #[error(transparent)]
    Curve(#[from] CurveError),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    Aead(#[from] XAeadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("message with counter {0} was already received")]
    DuplicateMessage(u32),

    #[error("message counter {0} is too far ahead of the receiving chain")]
    MessageTooFarInFuture(u32),

    #[error("no local pre-key with id {0}")]
    InvalidKeyId(u32),

    #[error("plaintext of {0} bytes exceeds the maximum envelope size")]
    MessageTooLarge(usize),
}
