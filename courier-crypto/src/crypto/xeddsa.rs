// SPDX-License-Identifier: MIT OR Apache-2.0

//! XEdDSA signatures computed with X25519 key pairs, so identity keys can both agree on secrets
//! and sign pre-keys.
//!
//! <https://signal.org/docs/specifications/xeddsa/>
use std::fmt;

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::{EdwardsPoint, MontgomeryPoint, Scalar};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::crypto::sha2::sha2_512;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError};

/// 512-bit signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Domain separation prefix for hash1: 0xFE followed by 31 bytes of 0xFF.
const HASH_1_PREFIX: [u8; 32] = {
    let mut prefix = [0xFFu8; 32];
    prefix[0] = 0xFE;
    prefix
};

/// XEdDSA signature (`R || s`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XSignature(#[serde(with = "serde_bytes")] [u8; SIGNATURE_SIZE]);

impl XSignature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }
}

impl TryFrom<&[u8]> for XSignature {
    type Error = XEdDSAError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SIGNATURE_SIZE] = value
            .try_into()
            .map_err(|_| XEdDSAError::InvalidArgument)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for XSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Signs `bytes` with the X25519 secret key converted to its twisted Edwards form.
pub fn xeddsa_sign(
    bytes: &[u8],
    secret_key: &SecretKey,
    rng: &Rng,
) -> Result<XSignature, XEdDSAError> {
    let nonce: [u8; SIGNATURE_SIZE] = rng.random_array()?;

    // calculate_key_pair(k): A = kB with the sign bit forced to zero, negating a if needed.
    let k = Scalar::from_bytes_mod_order(*secret_key.as_bytes());
    let mut cap_a = (&k * ED25519_BASEPOINT_TABLE).compress();
    let sign_bit = cap_a.0[31] >> 7;
    cap_a.0[31] &= 0b0111_1111_u8;
    let a = if sign_bit == 1 { -k } else { k };

    // r = hash1(a || M || Z) (mod q)
    let r = Scalar::from_bytes_mod_order_wide(&sha2_512(&[
        &HASH_1_PREFIX,
        a.as_bytes(),
        bytes,
        &nonce,
    ]));

    // R = rB
    let cap_r = (&r * ED25519_BASEPOINT_TABLE).compress();

    // h = hash(R || A || M) (mod q)
    let h = Scalar::from_bytes_mod_order_wide(&sha2_512(&[
        cap_r.as_bytes(),
        cap_a.as_bytes(),
        bytes,
    ]));

    // s = r + ha (mod q)
    let s = r + (h * a);

    let mut signature = [0u8; SIGNATURE_SIZE];
    signature[..32].copy_from_slice(cap_r.as_bytes());
    signature[32..].copy_from_slice(s.as_bytes());
    Ok(XSignature::from_bytes(signature))
}

/// Verifies an XEdDSA signature against the Montgomery form public key.
pub fn xeddsa_verify(
    bytes: &[u8],
    their_public_key: &PublicKey,
    signature: &XSignature,
) -> Result<(), XEdDSAError> {
    let mut cap_r = [0u8; 32];
    cap_r.copy_from_slice(&signature.as_bytes()[..32]);
    let mut s = [0u8; 32];
    s.copy_from_slice(&signature.as_bytes()[32..]);
    s[31] &= 0b0111_1111_u8;

    // Reject s if it has excess bits.
    if (s[31] & 0b1110_0000_u8) != 0 {
        return Err(XEdDSAError::InvalidArgument);
    }

    // convert_mont(u) with sign bit zero; points off the curve are rejected.
    let a = MontgomeryPoint(their_public_key.to_bytes())
        .to_edwards(0)
        .ok_or(XEdDSAError::InvalidArgument)?;
    let cap_a = a.compress();

    // h = hash(R || A || M) (mod q)
    let h = Scalar::from_bytes_mod_order_wide(&sha2_512(&[&cap_r, cap_a.as_bytes(), bytes]));

    // Rcheck = sB - hA
    let cap_r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(
        &h,
        &(-a),
        &Scalar::from_bytes_mod_order(s),
    )
    .compress();

    if bool::from(cap_r_check.as_bytes().ct_eq(&cap_r)) {
        Ok(())
    } else {
        Err(XEdDSAError::VerificationFailed)
    }
}

#[derive(Debug, Error)]
pub enum XEdDSAError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("invalid xeddsa public key or signature")]
    InvalidArgument,

    #[error("signature does not match public key and bytes")]
    VerificationFailed,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::SecretKey;

    use super::{XEdDSAError, XSignature, xeddsa_sign, xeddsa_verify};

    #[test]
    fn sign_and_verify() {
        let rng = Rng::from_seed([1; 32]);

        let secret_key = SecretKey::from_bytes(rng.random_array().unwrap());
        let public_key = secret_key.public_key();

        let signature = xeddsa_sign(b"signed pre-key", &secret_key, &rng).unwrap();
        assert!(xeddsa_verify(b"signed pre-key", &public_key, &signature).is_ok());
    }

    #[test]
    fn failed_verify() {
        let rng = Rng::from_seed([1; 32]);

        let secret_key = SecretKey::from_bytes(rng.random_array().unwrap());
        let public_key = secret_key.public_key();
        let signature = xeddsa_sign(b"signed pre-key", &secret_key, &rng).unwrap();

        let other_secret_key = SecretKey::from_bytes(rng.random_array().unwrap());
        let other_public_key = other_secret_key.public_key();
        let other_signature = xeddsa_sign(b"signed pre-key", &other_secret_key, &rng).unwrap();

        assert!(matches!(
            xeddsa_verify(b"another pre-key", &public_key, &signature),
            Err(XEdDSAError::VerificationFailed)
        ));
        assert!(matches!(
            xeddsa_verify(b"signed pre-key", &other_public_key, &signature),
            Err(XEdDSAError::VerificationFailed)
        ));
        assert!(matches!(
            xeddsa_verify(b"signed pre-key", &public_key, &other_signature),
            Err(XEdDSAError::VerificationFailed)
        ));
    }

    #[test]
    fn signature_from_slice() {
        assert!(XSignature::try_from(&[0u8; 63][..]).is_err());
        assert!(XSignature::try_from(&[0u8; 64][..]).is_ok());
    }
}
