// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to persistence owned by the application.
//!
//! The cryptographic core never keeps state on its own: sessions, pinned identities and our own
//! pre-keys are read and written through these traits. Implementations need to make each single
//! call atomic, deleting and creating a session for the same address must never interleave.
mod store;

pub use store::{
    IdentityKeyStore, PreKeyStore, ProtocolStore, SessionStore, SignedPreKeyStore, StoreError,
};
