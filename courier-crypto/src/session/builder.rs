// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::debug;

use crate::address::SessionAddress;
use crate::crypto::Rng;
use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::curve::{KeyPair, PublicKey, calculate_agreement, generate_key_pair};
use crate::keys::{KeyBundleError, PreKeyBundle, PreKeyId};
use crate::session::message::{MESSAGE_VERSION, PreKeyMessage};
use crate::session::record::{ChainKey, PendingPreKey, SessionOrigin, SessionRecord};
use crate::session::{SessionError, SessionResult, UntrustedIdentity};
use crate::traits::{ProtocolStore, StoreError};

/// ASCII string identifying the application, used as KDF info for the key agreement.
const KDF_INFO: &[u8] = b"courier-x3dh";

/// Result of processing a pre-key bundle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BundleOutcome {
    /// A new session was created and stored.
    Established,

    /// The stored session was already built from this exact bundle and was left untouched.
    Unchanged,
}

/// Creates sessions with remote devices.
pub struct SessionBuilder<'a, S> {
    store: &'a S,
    rng: &'a Rng,
}

impl<'a, S> SessionBuilder<'a, S>
where
    S: ProtocolStore,
{
    pub fn new(store: &'a S, rng: &'a Rng) -> Self {
        Self { store, rng }
    }

    /// Establishes a session as initiator from a fetched bundle of the device at `address`.
    ///
    /// Bundles with an invalid signature are rejected. If we pinned a different identity key for
    /// the recipient, [`UntrustedIdentity`] is returned and nothing is stored. On success the
    /// identity key is pinned and the session replaces any previous one for this device.
    pub fn process_bundle(
        &self,
        address: &SessionAddress,
        bundle: &PreKeyBundle,
    ) -> SessionResult<BundleOutcome> {
        bundle.verify()?;

        let their_identity_key = bundle.identity_key();
        check_trust(self.store, address, their_identity_key)?;

        let origin = SessionOrigin::Bundle {
            identity_key: *their_identity_key,
            signed_prekey: bundle.signed_prekey_id().zip(bundle.signed_prekey().copied()),
            onetime_prekey: bundle.onetime_prekey_id().zip(bundle.onetime_prekey().copied()),
        };
        if let Some(existing) = self.store.load_session(address).map_err(StoreError::new)? {
            if existing.origin() == &origin {
                debug!(%address, "session already built from this bundle");
                return Ok(BundleOutcome::Unchanged);
            }
        }

        // Without a signed pre-key the one-time pre-key takes its place.
        let (their_signed_prekey, their_onetime_prekey) =
            match (bundle.signed_prekey(), bundle.onetime_prekey()) {
                (Some(signed_prekey), onetime_prekey) => (signed_prekey, onetime_prekey),
                (None, Some(onetime_prekey)) => (onetime_prekey, None),
                (None, None) => return Err(KeyBundleError::NoPreKey.into()),
            };

        let our_identity = self.store.identity_key_pair().map_err(StoreError::new)?;
        let our_base_key = generate_key_pair(self.rng)?;

        let mut ikm = Vec::with_capacity(32 * 5);
        ikm.extend_from_slice(&[0xFFu8; 32]); // "discontinuity bytes"

        // DH1 = DH(IKA, SPKB)
        ikm.extend_from_slice(&calculate_agreement(
            their_signed_prekey,
            our_identity.private_key(),
        )?);

        // DH2 = DH(EKA, IKB)
        ikm.extend_from_slice(&calculate_agreement(
            their_identity_key,
            &our_base_key.private_key,
        )?);

        // DH3 = DH(EKA, SPKB)
        ikm.extend_from_slice(&calculate_agreement(
            their_signed_prekey,
            &our_base_key.private_key,
        )?);

        // DH4 = DH(EKA, OPKB)
        if let Some(onetime_prekey) = their_onetime_prekey {
            ikm.extend_from_slice(&calculate_agreement(
                onetime_prekey,
                &our_base_key.private_key,
            )?);
        }

        let (sending_chain, receiving_chain) = derive_chains(&ikm)?;
        drop(ikm);

        let record = SessionRecord::new(
            *our_identity.public_key(),
            *their_identity_key,
            bundle.registration_id(),
            origin,
            sending_chain,
            receiving_chain,
            Some(PendingPreKey {
                signed_prekey_id: bundle.signed_prekey_id(),
                onetime_prekey_id: bundle.onetime_prekey_id(),
                base_key: our_base_key.public_key,
            }),
        );

        self.store
            .save_identity(address.recipient_id(), their_identity_key)
            .map_err(StoreError::new)?;
        self.store
            .store_session(address, record)
            .map_err(StoreError::new)?;

        debug!(%address, "established session from pre-key bundle");
        Ok(BundleOutcome::Established)
    }

    /// Derives the responder session for a received pre-key message.
    ///
    /// Nothing is written to the store. The caller persists the record, pins the identity and
    /// removes the consumed one-time pre-key only after the enclosed message decrypted, see
    /// [`SessionCipher::decrypt`](crate::session::SessionCipher::decrypt).
    pub fn process_prekey_message(
        &self,
        address: &SessionAddress,
        message: &PreKeyMessage,
    ) -> SessionResult<SessionRecord> {
        accept_prekey_message(self.store, address, message)
    }
}

pub(crate) fn accept_prekey_message<S: ProtocolStore>(
    store: &S,
    address: &SessionAddress,
    message: &PreKeyMessage,
) -> SessionResult<SessionRecord> {
    if message.version != MESSAGE_VERSION {
        return Err(SessionError::InvalidMessage("unsupported message version"));
    }

    check_trust(store, address, &message.identity_key)?;

    let origin = SessionOrigin::PreKeyMessage {
        base_key: message.base_key,
    };
    if let Some(existing) = store.load_session(address).map_err(StoreError::new)? {
        if existing.origin() == &origin {
            return Ok(existing);
        }
    }

    let (our_signed_prekey, our_onetime_prekey) =
        match (message.signed_prekey_id, message.onetime_prekey_id) {
            (Some(signed_prekey_id), onetime_prekey_id) => {
                let signed_prekey = store
                    .load_signed_prekey(signed_prekey_id)
                    .map_err(StoreError::new)?
                    .ok_or(SessionError::InvalidKeyId(signed_prekey_id))?;
                let onetime_prekey = onetime_prekey_id
                    .map(|id| load_onetime_prekey(store, id))
                    .transpose()?;
                (signed_prekey.key_pair().clone(), onetime_prekey)
            }
            (None, Some(onetime_prekey_id)) => {
                (load_onetime_prekey(store, onetime_prekey_id)?, None)
            }
            (None, None) => {
                return Err(SessionError::InvalidMessage(
                    "pre-key message refers to no pre-key",
                ));
            }
        };

    let our_identity = store.identity_key_pair().map_err(StoreError::new)?;

    let mut ikm = Vec::with_capacity(32 * 5);
    ikm.extend_from_slice(&[0xFFu8; 32]); // "discontinuity bytes"

    // DH1 = DH(IKA, SPKB)
    ikm.extend_from_slice(&calculate_agreement(
        &message.identity_key,
        &our_signed_prekey.private_key,
    )?);

    // DH2 = DH(EKA, IKB)
    ikm.extend_from_slice(&calculate_agreement(
        &message.base_key,
        our_identity.private_key(),
    )?);

    // DH3 = DH(EKA, SPKB)
    ikm.extend_from_slice(&calculate_agreement(
        &message.base_key,
        &our_signed_prekey.private_key,
    )?);

    // DH4 = DH(EKA, OPKB)
    if let Some(onetime_prekey) = &our_onetime_prekey {
        ikm.extend_from_slice(&calculate_agreement(
            &message.base_key,
            &onetime_prekey.private_key,
        )?);
    }

    let (initiator_chain, responder_chain) = derive_chains(&ikm)?;
    drop(ikm);

    debug!(%address, "derived session from pre-key message");
    Ok(SessionRecord::new(
        *our_identity.public_key(),
        message.identity_key,
        message.registration_id,
        origin,
        responder_chain,
        initiator_chain,
        None,
    ))
}

fn check_trust<S: ProtocolStore>(
    store: &S,
    address: &SessionAddress,
    identity_key: &PublicKey,
) -> SessionResult<()> {
    let trusted = store
        .is_trusted_identity(address.recipient_id(), identity_key)
        .map_err(StoreError::new)?;
    if !trusted {
        return Err(UntrustedIdentity {
            recipient_id: address.recipient_id().to_owned(),
            identity_key: *identity_key,
        }
        .into());
    }
    Ok(())
}

fn load_onetime_prekey<S: ProtocolStore>(store: &S, id: PreKeyId) -> SessionResult<KeyPair> {
    let record = store
        .load_prekey(id)
        .map_err(StoreError::new)?
        .ok_or(SessionError::InvalidKeyId(id))?;
    Ok(record.key_pair().clone())
}

/// Splits the agreed secret into the initiator's and the responder's sending chain.
fn derive_chains(ikm: &[u8]) -> Result<(ChainKey, ChainKey), HkdfError> {
    let okm: [u8; 64] = {
        let salt = [0u8; 32];
        hkdf(&salt, ikm, Some(KDF_INFO))?
    };
    let mut initiator = [0u8; 32];
    let mut responder = [0u8; 32];
    initiator.copy_from_slice(&okm[..32]);
    responder.copy_from_slice(&okm[32..]);
    Ok((ChainKey::new(initiator), ChainKey::new(responder)))
}
