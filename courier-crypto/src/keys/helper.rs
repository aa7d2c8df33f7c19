// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generation of our own key material.
//!
//! Signed pre-keys should be rotated in good time and one-time pre-keys replenished before the
//! server runs out of them, otherwise senders fall back to bundles without one-time pre-keys.
use std::time::{SystemTime, UNIX_EPOCH};

use crate::address::DeviceId;
use crate::crypto::Rng;
use crate::curve::{CurveError, calculate_signature, generate_key_pair};
use crate::keys::{
    IdentityKeyPair, PreKeyBundle, PreKeyId, PreKeyRecord, RegistrationId, SignedPreKeyId,
    SignedPreKeyRecord,
};

/// Pre-key ids live in a 24-bit space and wrap around.
pub const MEDIUM_MAX_VALUE: u32 = 0xFFFFFF;

/// Registration ids are non-zero 14-bit values.
const REGISTRATION_ID_RANGE: u32 = 16380;

pub struct KeyHelper;

impl KeyHelper {
    pub fn generate_identity_key_pair(rng: &Rng) -> Result<IdentityKeyPair, CurveError> {
        IdentityKeyPair::generate(rng)
    }

    pub fn generate_registration_id(rng: &Rng) -> Result<RegistrationId, CurveError> {
        Ok(rng.random_below(REGISTRATION_ID_RANGE)? + 1)
    }

    /// Generates `count` one-time pre-keys with consecutive ids starting at `start`.
    pub fn generate_prekeys(
        start: PreKeyId,
        count: u32,
        rng: &Rng,
    ) -> Result<Vec<PreKeyRecord>, CurveError> {
        (0..count)
            .map(|offset| {
                let id = ((start.wrapping_sub(1).wrapping_add(offset)) % (MEDIUM_MAX_VALUE - 1)) + 1;
                Ok(PreKeyRecord::new(id, generate_key_pair(rng)?))
            })
            .collect()
    }

    pub fn generate_signed_prekey(
        identity: &IdentityKeyPair,
        id: SignedPreKeyId,
        rng: &Rng,
    ) -> Result<SignedPreKeyRecord, CurveError> {
        let key_pair = generate_key_pair(rng)?;
        let signature = calculate_signature(
            rng,
            identity.private_key(),
            &key_pair.public_key.serialize(),
        )?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or_default();
        Ok(SignedPreKeyRecord::new(id, key_pair, signature, timestamp))
    }

    /// Assembles the public bundle for one of our devices from local records.
    pub fn prekey_bundle(
        registration_id: RegistrationId,
        device_id: DeviceId,
        identity: &IdentityKeyPair,
        signed_prekey: &SignedPreKeyRecord,
        onetime_prekey: Option<&PreKeyRecord>,
    ) -> PreKeyBundle {
        PreKeyBundle::new(
            registration_id,
            device_id,
            *identity.public_key(),
            Some((signed_prekey.id(), signed_prekey.key_pair().public_key)),
            Some(*signed_prekey.signature()),
            onetime_prekey.map(|record| (record.id(), record.key_pair().public_key)),
        )
    }
}
