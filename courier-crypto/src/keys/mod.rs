// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity keys, pre-keys and the bundles other devices fetch to bootstrap a session with us.
mod bundle;
mod helper;
mod prekey;

pub use bundle::{KeyBundleError, PreKeyBundle};
pub use helper::KeyHelper;
pub use prekey::{IdentityKeyPair, PreKeyId, PreKeyRecord, SignedPreKeyId, SignedPreKeyRecord};

/// Random identifier a device picks at registration; echoed in every envelope addressed to it.
pub type RegistrationId = u32;
