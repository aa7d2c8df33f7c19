// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming authenticated encryption for attachments.
//!
//! Attachments are encrypted with a random 64-byte key which is independent of any session. The
//! key only travels to recipients inside an encrypted message, never next to the ciphertext.
//!
//! The plaintext is cut into blocks of [`BLOCK_SIZE`] bytes followed by one final, possibly empty
//! block. Every block is sealed with XChaCha20-Poly1305 in the STREAM construction (big-endian
//! 32-bit block counter and a "last block" flag in the nonce), so reordered, truncated or extended
//! ciphertexts fail to authenticate. Since every block grows by exactly one tag the ciphertext
//! length follows from the plaintext length alone, see [`ciphertext_len`].
//!
//! Both [`AttachmentEncryptor`] and [`AttachmentDecryptor`] implement [`std::io::Read`] and hold at
//! most one block in memory. [`AttachmentOpener`] decrypts ciphertext pushed to it in arbitrary
//! chunks, for downloads arriving as a byte stream.
use std::io::{self, Read};

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::stream::{DecryptorBE32, EncryptorBE32};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::xchacha20::TAG_SIZE;
use crate::crypto::{Rng, RngError, Secret};

/// Plaintext bytes per block.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Size of the random attachment key.
pub const ATTACHMENT_KEY_SIZE: usize = 64;

/// Size of the STREAM nonce prefix for XChaCha20-Poly1305 (24 bytes minus 5 bytes counter and
/// flag).
const NONCE_PREFIX_SIZE: usize = 19;

const KDF_INFO: &[u8] = b"courier-attachment";

/// Random key of one attachment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentKey(Secret<ATTACHMENT_KEY_SIZE>);

impl AttachmentKey {
    pub fn generate(rng: &Rng) -> Result<Self, AttachmentError> {
        Ok(Self(Secret::from_bytes(rng.random_array()?)))
    }

    pub fn from_bytes(bytes: [u8; ATTACHMENT_KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ATTACHMENT_KEY_SIZE] {
        self.0.as_bytes()
    }

    fn derive(&self) -> Result<(XChaCha20Poly1305, [u8; NONCE_PREFIX_SIZE]), AttachmentError> {
        let okm: [u8; 32 + NONCE_PREFIX_SIZE] = hkdf(b"", self.0.as_bytes(), Some(KDF_INFO))?;
        let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(&okm[..32]));
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&okm[32..]);
        Ok((cipher, nonce_prefix))
    }
}

/// Length of the ciphertext for a plaintext of `plaintext_len` bytes.
pub fn ciphertext_len(plaintext_len: u64) -> u64 {
    let blocks = plaintext_len / BLOCK_SIZE as u64 + 1;
    plaintext_len + blocks * TAG_SIZE as u64
}

/// Prepares an upload: generates a fresh key and wraps `reader` into an encrypting stream.
///
/// Returns the key, the exact length of the ciphertext the stream will yield and the stream.
pub fn start_upload<R: Read>(
    reader: R,
    plaintext_len: u64,
    rng: &Rng,
) -> Result<(AttachmentKey, u64, AttachmentEncryptor<R>), AttachmentError> {
    let key = AttachmentKey::generate(rng)?;
    let encryptor = AttachmentEncryptor::new(reader, plaintext_len, &key)?;
    Ok((key, ciphertext_len(plaintext_len), encryptor))
}

/// Encrypts the plaintext of `reader` while it is read.
///
/// Reading fails when `reader` yields fewer or more bytes than declared.
pub struct AttachmentEncryptor<R> {
    reader: R,
    encryptor: Option<EncryptorBE32<XChaCha20Poly1305>>,
    remaining: u64,
    block: Vec<u8>,
    position: usize,
}

impl<R: Read> AttachmentEncryptor<R> {
    pub fn new(reader: R, plaintext_len: u64, key: &AttachmentKey) -> Result<Self, AttachmentError> {
        let (cipher, nonce_prefix) = key.derive()?;
        Ok(Self {
            reader,
            encryptor: Some(EncryptorBE32::from_aead(
                cipher,
                GenericArray::from_slice(&nonce_prefix),
            )),
            remaining: plaintext_len,
            block: Vec::with_capacity(BLOCK_SIZE + TAG_SIZE),
            position: 0,
        })
    }

    fn next_block(&mut self) -> Result<(), AttachmentError> {
        if self.encryptor.is_none() {
            return Ok(());
        }

        let is_last = self.remaining < BLOCK_SIZE as u64;
        let len = if is_last {
            self.remaining as usize
        } else {
            BLOCK_SIZE
        };

        let mut plaintext = vec![0u8; len];
        read_exact(&mut self.reader, &mut plaintext)?;
        self.remaining -= len as u64;

        self.block = if is_last {
            ensure_exhausted(&mut self.reader)?;
            let encryptor = self
                .encryptor
                .take()
                .ok_or(AttachmentError::StreamFinished)?;
            encryptor
                .encrypt_last(plaintext.as_slice())
                .map_err(|_| AttachmentError::Encrypt)?
        } else {
            let encryptor = self
                .encryptor
                .as_mut()
                .ok_or(AttachmentError::StreamFinished)?;
            encryptor
                .encrypt_next(plaintext.as_slice())
                .map_err(|_| AttachmentError::Encrypt)?
        };
        self.position = 0;
        Ok(())
    }
}

impl<R: Read> Read for AttachmentEncryptor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position == self.block.len() {
            if self.encryptor.is_none() {
                return Ok(0);
            }
            self.next_block()?;
        }
        Ok(copy_out(&self.block, &mut self.position, buf))
    }
}

/// Decrypts an attachment ciphertext which arrives in chunks of arbitrary size.
///
/// Incoming bytes are buffered until a block is complete, so at most one block of ciphertext is
/// held at a time. Only authenticated plaintext is handed out.
pub struct AttachmentOpener {
    decryptor: Option<DecryptorBE32<XChaCha20Poly1305>>,
    remaining: u64,
    buffer: Vec<u8>,
}

impl AttachmentOpener {
    /// `plaintext_len` is the size announced in the attachment pointer.
    pub fn new(plaintext_len: u64, key: &AttachmentKey) -> Result<Self, AttachmentError> {
        let (cipher, nonce_prefix) = key.derive()?;
        Ok(Self {
            decryptor: Some(DecryptorBE32::from_aead(
                cipher,
                GenericArray::from_slice(&nonce_prefix),
            )),
            remaining: plaintext_len,
            buffer: Vec::with_capacity(BLOCK_SIZE + TAG_SIZE),
        })
    }

    /// Returns `true` once the final block authenticated.
    pub fn is_finished(&self) -> bool {
        self.decryptor.is_none()
    }

    /// Ciphertext bytes still missing to complete the current block.
    pub fn pending(&self) -> usize {
        if self.is_finished() {
            return 0;
        }
        self.block_len() + TAG_SIZE - self.buffer.len()
    }

    /// Feeds ciphertext and returns the plaintext of every block it completed.
    pub fn update(&mut self, mut chunk: &[u8]) -> Result<Vec<u8>, AttachmentError> {
        let mut plaintext = Vec::new();
        while !chunk.is_empty() {
            if self.is_finished() {
                return Err(AttachmentError::TrailingData);
            }
            let take = self.pending().min(chunk.len());
            self.buffer.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];
            if self.pending() == 0 {
                plaintext.extend(self.open_block()?);
            }
        }

        Ok(plaintext)
    }

    /// Ends the ciphertext. Fails when the final block is still missing.
    pub fn finish(self) -> Result<(), AttachmentError> {
        if self.is_finished() {
            Ok(())
        } else {
            Err(AttachmentError::Truncated)
        }
    }

    fn block_len(&self) -> usize {
        if self.remaining < BLOCK_SIZE as u64 {
            self.remaining as usize
        } else {
            BLOCK_SIZE
        }
    }

    fn open_block(&mut self) -> Result<Vec<u8>, AttachmentError> {
        let is_last = self.remaining < BLOCK_SIZE as u64;
        let len = self.block_len();
        let ciphertext = std::mem::take(&mut self.buffer);

        let plaintext = if is_last {
            let decryptor = self
                .decryptor
                .take()
                .ok_or(AttachmentError::StreamFinished)?;
            decryptor
                .decrypt_last(ciphertext.as_slice())
                .map_err(|_| AttachmentError::Authentication)?
        } else {
            let decryptor = self
                .decryptor
                .as_mut()
                .ok_or(AttachmentError::StreamFinished)?;
            decryptor
                .decrypt_next(ciphertext.as_slice())
                .map_err(|_| AttachmentError::Authentication)?
        };
        self.remaining -= len as u64;
        self.buffer = Vec::with_capacity(BLOCK_SIZE + TAG_SIZE);
        Ok(plaintext)
    }
}

/// Decrypts and authenticates an attachment ciphertext while it is read.
///
/// Plaintext of a block is only handed out after the block authenticated. A tampered, truncated or
/// extended ciphertext fails with an error instead of yielding corrupted data.
pub struct AttachmentDecryptor<R> {
    reader: R,
    opener: AttachmentOpener,
    block: Vec<u8>,
    position: usize,
}

impl<R: Read> AttachmentDecryptor<R> {
    /// `plaintext_len` is the size announced in the attachment pointer.
    pub fn new(reader: R, plaintext_len: u64, key: &AttachmentKey) -> Result<Self, AttachmentError> {
        Ok(Self {
            reader,
            opener: AttachmentOpener::new(plaintext_len, key)?,
            block: Vec::with_capacity(BLOCK_SIZE),
            position: 0,
        })
    }

    fn next_block(&mut self) -> Result<(), AttachmentError> {
        let mut ciphertext = vec![0u8; self.opener.pending()];
        read_exact(&mut self.reader, &mut ciphertext)?;
        self.block = self.opener.update(&ciphertext)?;
        self.position = 0;

        if self.opener.is_finished() {
            ensure_exhausted(&mut self.reader)?;
        }
        Ok(())
    }
}

impl<R: Read> Read for AttachmentDecryptor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Loop since the final block may be empty.
        while self.position == self.block.len() {
            if self.opener.is_finished() {
                return Ok(0);
            }
            self.next_block()?;
        }
        Ok(copy_out(&self.block, &mut self.position, buf))
    }
}

fn copy_out(block: &[u8], position: &mut usize, buf: &mut [u8]) -> usize {
    let len = buf.len().min(block.len() - *position);
    buf[..len].copy_from_slice(&block[*position..*position + len]);
    *position += len;
    len
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), AttachmentError> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => AttachmentError::Truncated,
        _ => AttachmentError::Io(err),
    })
}

fn ensure_exhausted<R: Read>(reader: &mut R) -> Result<(), AttachmentError> {
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(0) => return Ok(()),
            Ok(_) => return Err(AttachmentError::TrailingData),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(AttachmentError::Io(err)),
        }
    }
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error("could not encrypt attachment block")]
    Encrypt,

    #[error("attachment block failed to authenticate")]
    Authentication,

    #[error("attachment stream ended before its declared length")]
    Truncated,

    #[error("attachment stream is longer than its declared length")]
    TrailingData,

    #[error("attachment stream already finished")]
    StreamFinished,

    #[error(transparent)]
    Io(io::Error),
}

impl From<AttachmentError> for io::Error {
    fn from(err: AttachmentError) -> Self {
        match err {
            AttachmentError::Io(err) => err,
            AttachmentError::Truncated => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            err => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read};

    use assert_matches::assert_matches;

    use crate::crypto::Rng;

    use super::{
        AttachmentDecryptor, AttachmentEncryptor, AttachmentError, AttachmentKey,
        AttachmentOpener, BLOCK_SIZE, ciphertext_len, start_upload,
    };

    fn encrypt(plaintext: &[u8], rng: &Rng) -> (AttachmentKey, Vec<u8>) {
        let (key, len, mut encryptor) =
            start_upload(plaintext, plaintext.len() as u64, rng).unwrap();
        let mut ciphertext = Vec::new();
        encryptor.read_to_end(&mut ciphertext).unwrap();
        assert_eq!(ciphertext.len() as u64, len);
        (key, ciphertext)
    }

    fn decrypt(ciphertext: &[u8], plaintext_len: u64, key: &AttachmentKey) -> io::Result<Vec<u8>> {
        let mut decryptor = AttachmentDecryptor::new(ciphertext, plaintext_len, key).unwrap();
        let mut plaintext = Vec::new();
        decryptor.read_to_end(&mut plaintext)?;
        Ok(plaintext)
    }

    fn inner(err: io::Error) -> AttachmentError {
        *err.into_inner()
            .expect("wrapped attachment error")
            .downcast::<AttachmentError>()
            .expect("attachment error")
    }

    #[test]
    fn expansion() {
        assert_eq!(ciphertext_len(0), 16);
        assert_eq!(ciphertext_len(1), 17);
        assert_eq!(ciphertext_len(BLOCK_SIZE as u64 - 1), BLOCK_SIZE as u64 + 15);
        assert_eq!(ciphertext_len(BLOCK_SIZE as u64), BLOCK_SIZE as u64 + 32);
        assert_eq!(
            ciphertext_len(3 * BLOCK_SIZE as u64 + 5),
            3 * BLOCK_SIZE as u64 + 5 + 4 * 16
        );
    }

    #[test]
    fn encrypt_decrypt() {
        let rng = Rng::from_seed([1; 32]);

        for len in [0, 1, 100, BLOCK_SIZE - 1, BLOCK_SIZE, BLOCK_SIZE + 1, 3 * BLOCK_SIZE + 7] {
            let plaintext = rng.random_vec(len).unwrap();
            let (key, ciphertext) = encrypt(&plaintext, &rng);
            assert_eq!(ciphertext.len() as u64, ciphertext_len(len as u64));
            assert_eq!(decrypt(&ciphertext, len as u64, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn small_reads() {
        let rng = Rng::from_seed([2; 32]);
        let plaintext = rng.random_vec(BLOCK_SIZE + 10).unwrap();
        let (key, ciphertext) = encrypt(&plaintext, &rng);

        let mut decryptor =
            AttachmentDecryptor::new(ciphertext.as_slice(), plaintext.len() as u64, &key).unwrap();
        let mut result = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let read = decryptor.read(&mut buf).unwrap();
            if read == 0 {
                break;
            }
            result.extend_from_slice(&buf[..read]);
        }
        assert_eq!(result, plaintext);
    }

    #[test]
    fn tampered_ciphertext() {
        let rng = Rng::from_seed([3; 32]);
        let plaintext = rng.random_vec(2 * BLOCK_SIZE + 3).unwrap();
        let (key, ciphertext) = encrypt(&plaintext, &rng);

        for position in [0, BLOCK_SIZE + 20, ciphertext.len() - 1] {
            let mut tampered = ciphertext.clone();
            tampered[position] ^= 0x01;
            let err = decrypt(&tampered, plaintext.len() as u64, &key).unwrap_err();
            assert_matches!(inner(err), AttachmentError::Authentication);
        }

        // Wrong key.
        let other = AttachmentKey::generate(&rng).unwrap();
        let err = decrypt(&ciphertext, plaintext.len() as u64, &other).unwrap_err();
        assert_matches!(inner(err), AttachmentError::Authentication);
    }

    #[test]
    fn truncated_and_extended_ciphertext() {
        let rng = Rng::from_seed([4; 32]);
        let plaintext = rng.random_vec(BLOCK_SIZE + 3).unwrap();
        let (key, ciphertext) = encrypt(&plaintext, &rng);

        let err = decrypt(&ciphertext[..ciphertext.len() - 1], plaintext.len() as u64, &key)
            .unwrap_err();
        assert_matches!(inner(err), AttachmentError::Truncated);

        let mut extended = ciphertext.clone();
        extended.push(0);
        let err = decrypt(&extended, plaintext.len() as u64, &key).unwrap_err();
        assert_matches!(inner(err), AttachmentError::TrailingData);

        // Claiming the first block was the whole attachment.
        let err = decrypt(&ciphertext[..BLOCK_SIZE + 16], BLOCK_SIZE as u64, &key).unwrap_err();
        assert_matches!(inner(err), AttachmentError::Truncated);
    }

    #[test]
    fn declared_length_is_enforced() {
        let rng = Rng::from_seed([5; 32]);
        let key = AttachmentKey::generate(&rng).unwrap();
        let plaintext = vec![7u8; 100];

        let mut encryptor = AttachmentEncryptor::new(plaintext.as_slice(), 101, &key).unwrap();
        let err = encryptor.read_to_end(&mut Vec::new()).unwrap_err();
        assert_matches!(inner(err), AttachmentError::Truncated);

        let mut encryptor = AttachmentEncryptor::new(plaintext.as_slice(), 99, &key).unwrap();
        let err = encryptor.read_to_end(&mut Vec::new()).unwrap_err();
        assert_matches!(inner(err), AttachmentError::TrailingData);
    }

    #[test]
    fn open_in_chunks() {
        let rng = Rng::from_seed([6; 32]);

        for len in [0, 10, BLOCK_SIZE, 2 * BLOCK_SIZE + 1000] {
            let plaintext = rng.random_vec(len).unwrap();
            let (key, ciphertext) = encrypt(&plaintext, &rng);

            // Chunk boundaries never line up with block boundaries.
            let mut opener = AttachmentOpener::new(len as u64, &key).unwrap();
            let mut result = Vec::new();
            for chunk in ciphertext.chunks(9_999) {
                result.extend(opener.update(chunk).unwrap());
            }
            assert!(opener.is_finished());
            opener.finish().unwrap();
            assert_eq!(result, plaintext);
        }
    }

    #[test]
    fn open_rejects_broken_streams() {
        let rng = Rng::from_seed([7; 32]);
        let plaintext = rng.random_vec(BLOCK_SIZE + 3).unwrap();
        let (key, ciphertext) = encrypt(&plaintext, &rng);
        let len = plaintext.len() as u64;

        // The first block authenticates before the stream breaks off.
        let mut opener = AttachmentOpener::new(len, &key).unwrap();
        let first = opener.update(&ciphertext[..ciphertext.len() - 1]).unwrap();
        assert_eq!(first, &plaintext[..BLOCK_SIZE]);
        assert_matches!(opener.finish(), Err(AttachmentError::Truncated));

        let mut opener = AttachmentOpener::new(len, &key).unwrap();
        let mut extended = ciphertext.clone();
        extended.push(0);
        assert_matches!(opener.update(&extended), Err(AttachmentError::TrailingData));

        let mut opener = AttachmentOpener::new(len, &key).unwrap();
        let mut tampered = ciphertext.clone();
        tampered[BLOCK_SIZE + 20] ^= 0x01;
        assert_matches!(opener.update(&tampered), Err(AttachmentError::Authentication));
    }
}
