// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::crypto::Rng;
use crate::crypto::xeddsa::XSignature;
use crate::curve::{CurveError, KeyPair, PrivateKey, PublicKey, generate_key_pair};

/// Identifier of a one-time pre-key.
pub type PreKeyId = u32;

/// Identifier of a signed pre-key.
pub type SignedPreKeyId = u32;

/// Long-lived identity of an account. The private half never leaves the local store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKeyPair(KeyPair);

impl IdentityKeyPair {
    pub fn generate(rng: &Rng) -> Result<Self, CurveError> {
        Ok(Self(generate_key_pair(rng)?))
    }

    pub fn from_key_pair(key_pair: KeyPair) -> Self {
        Self(key_pair)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.0.public_key
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.0.private_key
    }
}

/// One-time pre-key, consumed by at most one session bootstrap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyRecord {
    id: PreKeyId,
    key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn new(id: PreKeyId, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }

    pub fn id(&self) -> PreKeyId {
        self.id
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}

/// Medium-lived pre-key whose public half is signed by the identity key. Rotated periodically,
/// not single-use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    id: SignedPreKeyId,
    key_pair: KeyPair,
    signature: XSignature,
    timestamp: u64,
}

impl SignedPreKeyRecord {
    pub fn new(id: SignedPreKeyId, key_pair: KeyPair, signature: XSignature, timestamp: u64) -> Self {
        Self {
            id,
            key_pair,
            signature,
            timestamp,
        }
    }

    pub fn id(&self) -> SignedPreKeyId {
        self.id
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn signature(&self) -> &XSignature {
        &self.signature
    }

    /// UNIX timestamp in milliseconds of when this key was generated.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}
