// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::DeviceId;
use crate::crypto::xeddsa::XSignature;
use crate::curve::{CurveError, PublicKey, verify_signature};
use crate::keys::{PreKeyId, RegistrationId, SignedPreKeyId};

/// Public key material a device published, fetched by senders who have no session with it yet.
///
/// A signed pre-key is only trusted after its signature verified against the bundle's identity
/// key, see [`PreKeyBundle::verify`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    registration_id: RegistrationId,
    device_id: DeviceId,
    identity_key: PublicKey,
    signed_prekey: Option<(SignedPreKeyId, PublicKey)>,
    signature: Option<XSignature>,
    onetime_prekey: Option<(PreKeyId, PublicKey)>,
}

impl PreKeyBundle {
    pub fn new(
        registration_id: RegistrationId,
        device_id: DeviceId,
        identity_key: PublicKey,
        signed_prekey: Option<(SignedPreKeyId, PublicKey)>,
        signature: Option<XSignature>,
        onetime_prekey: Option<(PreKeyId, PublicKey)>,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            identity_key,
            signed_prekey,
            signature,
            onetime_prekey,
        }
    }

    pub fn registration_id(&self) -> RegistrationId {
        self.registration_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn identity_key(&self) -> &PublicKey {
        &self.identity_key
    }

    pub fn signed_prekey(&self) -> Option<&PublicKey> {
        self.signed_prekey.as_ref().map(|(_, key)| key)
    }

    pub fn signed_prekey_id(&self) -> Option<SignedPreKeyId> {
        self.signed_prekey.as_ref().map(|(id, _)| *id)
    }

    pub fn signature(&self) -> Option<&XSignature> {
        self.signature.as_ref()
    }

    pub fn onetime_prekey(&self) -> Option<&PublicKey> {
        self.onetime_prekey.as_ref().map(|(_, key)| key)
    }

    pub fn onetime_prekey_id(&self) -> Option<PreKeyId> {
        self.onetime_prekey.as_ref().map(|(id, _)| *id)
    }

    /// Checks the bundle can be used for a session bootstrap.
    ///
    /// A present signed pre-key needs a signature by the identity key over its serialized form.
    /// Bundles without any pre-key are rejected.
    pub fn verify(&self) -> Result<(), KeyBundleError> {
        if let Some((_, signed_prekey)) = &self.signed_prekey {
            let signature = self
                .signature
                .as_ref()
                .ok_or(KeyBundleError::MissingSignature)?;
            let valid = verify_signature(
                &self.identity_key,
                &signed_prekey.serialize(),
                signature.as_bytes(),
            )?;
            if !valid {
                return Err(KeyBundleError::InvalidSignature);
            }
        }

        if self.signed_prekey.is_none() && self.onetime_prekey.is_none() {
            return Err(KeyBundleError::NoPreKey);
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum KeyBundleError {
    #[error(transparent)]
    Curve(#[from] CurveError),

    #[error("signed pre-key comes without a signature")]
    MissingSignature,

    #[error("signature of signed pre-key does not match identity key")]
    InvalidSignature,

    #[error("bundle contains neither a signed nor a one-time pre-key")]
    NoPreKey,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::crypto::Rng;
    use crate::curve::calculate_signature;
    use crate::keys::{IdentityKeyPair, KeyHelper};

    use super::{KeyBundleError, PreKeyBundle};

    #[test]
    fn verify() {
        let rng = Rng::from_seed([1; 32]);
        let identity = IdentityKeyPair::generate(&rng).unwrap();
        let signed_prekey = KeyHelper::generate_signed_prekey(&identity, 7, &rng).unwrap();
        let prekeys = KeyHelper::generate_prekeys(1, 1, &rng).unwrap();

        let bundle =
            KeyHelper::prekey_bundle(42, 1, &identity, &signed_prekey, Some(&prekeys[0]));
        assert!(bundle.verify().is_ok());
        assert_eq!(bundle.signed_prekey_id(), Some(7));
        assert_eq!(bundle.onetime_prekey_id(), Some(1));

        // Signed by someone else.
        let other = IdentityKeyPair::generate(&rng).unwrap();
        let forged = calculate_signature(
            &rng,
            other.private_key(),
            &signed_prekey.key_pair().public_key.serialize(),
        )
        .unwrap();
        let bundle = PreKeyBundle::new(
            42,
            1,
            *identity.public_key(),
            Some((7, signed_prekey.key_pair().public_key)),
            Some(forged),
            None,
        );
        assert_matches!(bundle.verify(), Err(KeyBundleError::InvalidSignature));

        // Signed pre-key without signature.
        let bundle = PreKeyBundle::new(
            42,
            1,
            *identity.public_key(),
            Some((7, signed_prekey.key_pair().public_key)),
            None,
            None,
        );
        assert_matches!(bundle.verify(), Err(KeyBundleError::MissingSignature));

        // Nothing to agree on.
        let bundle = PreKeyBundle::new(42, 1, *identity.public_key(), None, None, None);
        assert_matches!(bundle.verify(), Err(KeyBundleError::NoPreKey));

        // One-time pre-key only.
        let bundle = PreKeyBundle::new(
            42,
            1,
            *identity.public_key(),
            None,
            None,
            Some((1, prekeys[0].key_pair().public_key)),
        );
        assert!(bundle.verify().is_ok());
    }
}
