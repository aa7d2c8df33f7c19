// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interface to the store-and-forward server.
//!
//! Server answers are mapped onto [`TransportError`], including the structured device lists of
//! mismatched and stale device responses which drive the reconciliation in
//! [`MessageSender`](crate::MessageSender).
mod error;
pub mod http;

use std::io::Read;

use courier_crypto::keys::PreKeyBundle;
use futures_util::stream::BoxStream;

pub use error::{
    MismatchedDevices, StaleDevices, TransportError, error_for_status, status_error,
};

use crate::address::DeviceAddress;
use crate::envelope::{OutgoingMessageList, SendMessageResponse};

/// Ciphertext of a downloaded attachment, arriving in chunks of arbitrary size.
pub type AttachmentChunks = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Slot for an attachment upload, handed out by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentSlot {
    pub id: u64,
    pub location: String,
}

pub trait Transport {
    /// Bundles of every registered device of the address' recipient.
    ///
    /// An unknown recipient fails with [`TransportError::UnregisteredUser`].
    fn fetch_prekey_bundles(
        &self,
        address: &DeviceAddress,
    ) -> impl Future<Output = Result<Vec<PreKeyBundle>, TransportError>> + Send;

    /// Bundle of exactly the addressed device.
    fn fetch_prekey_bundle(
        &self,
        address: &DeviceAddress,
    ) -> impl Future<Output = Result<PreKeyBundle, TransportError>> + Send;

    /// Submits all envelopes for one recipient.
    ///
    /// A recipient unknown to the server fails with [`TransportError::UnregisteredUser`].
    fn submit(
        &self,
        messages: &OutgoingMessageList,
    ) -> impl Future<Output = Result<SendMessageResponse, TransportError>> + Send;

    fn allocate_attachment(
        &self,
    ) -> impl Future<Output = Result<AttachmentSlot, TransportError>> + Send;

    /// Uploads exactly `length` bytes of ciphertext read from `body`.
    ///
    /// `body` is a blocking reader and must not be read on an async worker thread.
    fn upload_attachment<R>(
        &self,
        location: &str,
        length: u64,
        body: R,
    ) -> impl Future<Output = Result<(), TransportError>> + Send
    where
        R: Read + Send + Sync + 'static;

    /// Resolves where an attachment can be downloaded from.
    fn attachment_location(
        &self,
        id: u64,
        relay: Option<&str>,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Starts downloading the ciphertext stored at `location`.
    fn download_attachment(
        &self,
        location: &str,
    ) -> impl Future<Output = Result<AttachmentChunks, TransportError>> + Send;
}
