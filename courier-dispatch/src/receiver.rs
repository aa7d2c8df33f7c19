// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opening envelopes delivered to this device.
use courier_crypto::DecodeError;
use courier_crypto::attachment::{AttachmentError, AttachmentOpener};
use courier_crypto::session::{SessionCipher, SessionError};
use courier_crypto::traits::{ProtocolStore, StoreError};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use thiserror::Error;
use tracing::debug;

use crate::content::{AttachmentPointer, Content};
use crate::envelope::IncomingEnvelope;
use crate::transport::{AttachmentChunks, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),
}

/// Decrypts incoming envelopes with the sessions of a protocol store.
pub struct EnvelopeCipher<'a, S> {
    store: &'a S,
}

impl<'a, S> EnvelopeCipher<'a, S>
where
    S: ProtocolStore,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Decrypts the envelope and decodes its content.
    ///
    /// An end-of-session message from the sender drops all sessions with them once it was
    /// decrypted. The next message to the sender establishes a fresh session.
    pub fn decrypt(&self, envelope: &IncomingEnvelope) -> Result<Content, ReceiveError> {
        let address = envelope.source_address().session_address();
        let plaintext = SessionCipher::new(self.store, address)
            .decrypt(envelope.message_type, &envelope.content)?;
        let content = Content::from_bytes(&plaintext)?;

        if content.is_end_session() {
            self.store
                .delete_all_sessions(&envelope.source)
                .map_err(StoreError::new)?;
            debug!(source = %envelope.source, "sender ended all sessions");
        }

        Ok(content)
    }
}

/// Authenticated plaintext of a downloading attachment.
pub type AttachmentPlaintext = BoxStream<'static, Result<Vec<u8>, ReceiveError>>;

/// Downloads an attachment and decrypts it while it arrives.
///
/// The returned stream yields authenticated plaintext block by block, at most one block of
/// ciphertext is buffered. It fails when the downloaded ciphertext does not match the size
/// announced in the pointer.
pub async fn retrieve_attachment<T>(
    transport: &T,
    pointer: &AttachmentPointer,
    relay: Option<&str>,
) -> Result<AttachmentPlaintext, ReceiveError>
where
    T: Transport,
{
    let location = transport.attachment_location(pointer.id, relay).await?;
    let chunks = transport.download_attachment(&location).await?;
    let opener = AttachmentOpener::new(pointer.size, &pointer.key)?;
    debug!(id = pointer.id, size = pointer.size, "downloading attachment");
    Ok(stream::try_unfold((chunks, Some(opener)), next_plaintext).boxed())
}

async fn next_plaintext(
    (mut chunks, opener): (AttachmentChunks, Option<AttachmentOpener>),
) -> Result<Option<(Vec<u8>, (AttachmentChunks, Option<AttachmentOpener>))>, ReceiveError> {
    let Some(mut opener) = opener else {
        return Ok(None);
    };

    loop {
        match chunks.next().await {
            Some(chunk) => {
                let plaintext = opener.update(&chunk?)?;
                if !plaintext.is_empty() {
                    return Ok(Some((plaintext, (chunks, Some(opener)))));
                }
            }
            None => {
                opener.finish()?;
                return Ok(None);
            }
        }
    }
}
