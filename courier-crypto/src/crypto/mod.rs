// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic building blocks used by curve keys, sessions and attachment streams.
pub mod hkdf;
mod rng;
mod secret;
pub mod sha2;
pub mod x25519;
pub mod xchacha20;
pub mod xeddsa;

pub use rng::{Rng, RngError};
pub use secret::Secret;
