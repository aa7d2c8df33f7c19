// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed curve keys for identities and pre-keys.
//!
//! Every serialized public key starts with a one-byte type tag, followed by the raw key. Only
//! Curve25519 keys (`0x05`) are supported today, but keys restored from storage keep whatever tag
//! they were written with. Agreement and signing check the tags before running any algorithm, so
//! incompatible keys fail with a typed error instead of producing output.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::x25519::{self, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SHARED_SECRET_SIZE};
use crate::crypto::xeddsa::{XEdDSAError, XSignature, xeddsa_sign, xeddsa_verify};
use crate::crypto::{Rng, RngError};

/// Type tag of Curve25519 keys.
pub const DJB_TYPE: u8 = 0x05;

/// Length of a serialized public key including its type tag.
pub const SERIALIZED_PUBLIC_KEY_SIZE: usize = PUBLIC_KEY_SIZE + 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Curve25519 key usable for X25519 agreement and XEdDSA signatures.
    Djb,

    /// Tag of a key type this implementation can not operate on.
    Unsupported(u8),
}

impl KeyType {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            DJB_TYPE => KeyType::Djb,
            tag => KeyType::Unsupported(tag),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            KeyType::Djb => DJB_TYPE,
            KeyType::Unsupported(tag) => *tag,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    key_type: KeyType,
    key: x25519::PublicKey,
}

impl PublicKey {
    pub(crate) fn djb(key: x25519::PublicKey) -> Self {
        Self {
            key_type: KeyType::Djb,
            key,
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Tagged encoding, used as signature payload for signed pre-keys and on the wire.
    pub fn serialize(&self) -> [u8; SERIALIZED_PUBLIC_KEY_SIZE] {
        let mut bytes = [0u8; SERIALIZED_PUBLIC_KEY_SIZE];
        bytes[0] = self.key_type.tag();
        bytes[1..].copy_from_slice(self.key.as_bytes());
        bytes
    }

    pub(crate) fn x25519(&self) -> Result<&x25519::PublicKey, CurveError> {
        match self.key_type {
            KeyType::Djb => Ok(&self.key),
            KeyType::Unsupported(tag) => Err(CurveError::UnknownKeyType(tag)),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.serialize()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    key_type: KeyType,
    key: x25519::SecretKey,
}

impl PrivateKey {
    /// Restores a private key from storage, keeping the type tag it was stored with.
    pub fn from_stored(tag: u8, bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self {
            key_type: KeyType::from_tag(tag),
            key: x25519::SecretKey::from_bytes(bytes),
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Derives the public counterpart.
    pub fn public_key(&self) -> Result<PublicKey, CurveError> {
        match self.key_type {
            KeyType::Djb => Ok(PublicKey::djb(self.key.public_key())),
            KeyType::Unsupported(tag) => Err(CurveError::UnknownKeyType(tag)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Generates a fresh Curve25519 key pair.
pub fn generate_key_pair(rng: &Rng) -> Result<KeyPair, CurveError> {
    let private_key = PrivateKey {
        key_type: KeyType::Djb,
        key: x25519::SecretKey::from_bytes(rng.random_array()?),
    };
    let public_key = private_key.public_key()?;
    Ok(KeyPair {
        public_key,
        private_key,
    })
}

/// Decodes a tagged public key.
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey, CurveError> {
    let (tag, key) = bytes.split_first().ok_or(CurveError::InvalidKeyLength(0))?;
    match KeyType::from_tag(*tag) {
        KeyType::Djb => {
            let key: [u8; PUBLIC_KEY_SIZE] = key
                .try_into()
                .map_err(|_| CurveError::InvalidKeyLength(bytes.len()))?;
            Ok(PublicKey::djb(x25519::PublicKey::from_bytes(key)))
        }
        KeyType::Unsupported(tag) => Err(CurveError::UnknownKeyType(tag)),
    }
}

/// Diffie-Hellman agreement between our private and their public key.
pub fn calculate_agreement(
    public_key: &PublicKey,
    private_key: &PrivateKey,
) -> Result<[u8; SHARED_SECRET_SIZE], CurveError> {
    if public_key.key_type != private_key.key_type {
        return Err(CurveError::KeyTypeMismatch(
            public_key.key_type,
            private_key.key_type,
        ));
    }
    let their_key = public_key.x25519()?;
    Ok(private_key.key.calculate_agreement(their_key)?)
}

/// Returns `Ok(false)` for any signature which does not verify, including malformed ones.
pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, CurveError> {
    let their_key = public_key.x25519()?;
    let Ok(signature) = XSignature::try_from(signature) else {
        return Ok(false);
    };
    match xeddsa_verify(message, their_key, &signature) {
        Ok(()) => Ok(true),
        Err(XEdDSAError::VerificationFailed | XEdDSAError::InvalidArgument) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub fn calculate_signature(
    rng: &Rng,
    private_key: &PrivateKey,
    message: &[u8],
) -> Result<XSignature, CurveError> {
    if let KeyType::Unsupported(tag) = private_key.key_type {
        return Err(CurveError::UnknownKeyType(tag));
    }
    Ok(xeddsa_sign(message, &private_key.key, rng)?)
}

#[derive(Debug, Error)]
pub enum CurveError {
    #[error("unknown key type {0:#04x}")]
    UnknownKeyType(u8),

    #[error("public key type {0:?} does not match private key type {1:?}")]
    KeyTypeMismatch(KeyType, KeyType),

    #[error("invalid serialized public key length {0}")]
    InvalidKeyLength(usize),

    #[error(transparent)]
    X25519(#[from] x25519::X25519Error),

    #[error(transparent)]
    XEdDSA(#[from] XEdDSAError),

    #[error(transparent)]
    Rng(#[from] RngError),
}
