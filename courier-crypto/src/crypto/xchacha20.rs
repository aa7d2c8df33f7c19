// SPDX-License-Identifier: MIT OR Apache-2.0

//! XChaCha20-Poly1305 AEAD with a 192-bit nonce, used to seal every per-device message.
use chacha20poly1305::{AeadInPlace, Key, KeyInit, XChaCha20Poly1305, XNonce};
use thiserror::Error;

pub type XAeadNonce = [u8; 24];

pub type XAeadKey = [u8; 32];

/// Size of the authentication tag appended to each ciphertext.
pub const TAG_SIZE: usize = 16;

pub fn x_aead_encrypt(
    key: &XAeadKey,
    plaintext: &[u8],
    nonce: XAeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, XAeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut ciphertext = Vec::with_capacity(plaintext.len() + TAG_SIZE);
    ciphertext.extend_from_slice(plaintext);
    cipher
        .encrypt_in_place(XNonce::from_slice(&nonce), aad.unwrap_or_default(), &mut ciphertext)
        .map_err(XAeadError::Encrypt)?;
    Ok(ciphertext)
}

pub fn x_aead_decrypt(
    key: &XAeadKey,
    ciphertext_tag: &[u8],
    nonce: XAeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, XAeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut plaintext = Vec::from(ciphertext_tag);
    cipher
        .decrypt_in_place(XNonce::from_slice(&nonce), aad.unwrap_or_default(), &mut plaintext)
        .map_err(XAeadError::Decrypt)?;
    Ok(plaintext)
}

#[derive(Debug, Error)]
pub enum XAeadError {
    #[error("could not encrypt with xchacha20poly1305 aead: {0}")]
    Encrypt(chacha20poly1305::Error),

    #[error("could not decrypt with xchacha20poly1305 aead: {0}")]
    Decrypt(chacha20poly1305::Error),
}
