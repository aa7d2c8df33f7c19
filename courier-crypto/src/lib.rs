// SPDX-License-Identifier: MIT OR Apache-2.0

//! `courier-crypto` holds the cryptographic core of end-to-end encrypted messaging between
//! accounts which own multiple devices.
//!
//! ## Sessions
//!
//! Every pair of devices talks through its own session. A sender without a session fetches a
//! [`PreKeyBundle`](keys::PreKeyBundle) of the remote device from the server and hands it to
//! [`SessionBuilder`](session::SessionBuilder), which verifies the bundle, checks the remote
//! identity key against the one we pinned for this account and runs an X3DH key agreement. The
//! resulting [`SessionRecord`](session::SessionRecord) is persisted through the
//! [`SessionStore`](traits::SessionStore) trait.
//!
//! [`SessionCipher`](session::SessionCipher) turns plaintext into typed ciphertext messages
//! with an existing session and back. The first messages of a fresh session carry the pre-key
//! handshake, so the receiver can derive the session on first receipt while the sender stays
//! offline.
//!
//! ## Identity trust
//!
//! Identity keys are pinned on first use. A bundle or message with a different identity key for
//! an already known account fails with [`UntrustedIdentity`](session::UntrustedIdentity) and
//! leaves every store untouched; the application decides whether to accept the new key.
//!
//! ## Attachments
//!
//! Large payloads are not sent through sessions. They are encrypted as a stream with a random key
//! (see [`attachment`]) and uploaded separately, the key then travels inside a session message.
//!
//! ## Storage
//!
//! All state lives behind the store traits in [`traits`]. [`MemoryProtocolStore`] keeps
//! everything in memory and is useful for tests and short-lived clients.
//!
//! The key agreement follows Signal's [X3DH](https://signal.org/docs/specifications/x3dh)
//! specification and uses [XEdDSA](https://signal.org/docs/specifications/xeddsa) signatures, so
//! one Curve25519 key pair serves both agreement and signing.
pub mod address;
pub mod attachment;
mod cbor;
mod crypto;
pub mod curve;
pub mod keys;
mod memory_store;
pub mod session;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;

pub use cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
pub use crypto::xeddsa::XSignature;
pub use crypto::{Rng, RngError};
pub use memory_store::MemoryProtocolStore;
