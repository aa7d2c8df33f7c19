// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plaintext content sealed into every device envelope.
use courier_crypto::attachment::AttachmentKey;
use courier_crypto::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use serde::{Deserialize, Serialize};

/// Milliseconds since the UNIX epoch, chosen by the sender. Identifies a message together with its
/// sender.
pub type Timestamp = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Content {
    Data(DataMessage),
    Sync(SyncMessage),
    Receipt(ReceiptMessage),
}

impl Content {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(&self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }

    /// Returns `true` if the content asks to tear down all sessions with its recipient.
    pub fn is_end_session(&self) -> bool {
        matches!(self, Content::Data(message) if message.end_session)
    }
}

/// Message authored by a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    pub timestamp: Timestamp,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentPointer>,
    pub group: Option<GroupContext>,
    pub end_session: bool,
    /// Seconds after which the message disappears once read.
    pub expire_timer: Option<u32>,
}

impl DataMessage {
    pub fn new(timestamp: Timestamp, body: impl Into<String>) -> Self {
        Self {
            timestamp,
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// Signals the recipient to drop all sessions with us.
    pub fn end_session(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            end_session: true,
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentPointer) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_group(mut self, group: GroupContext) -> Self {
        self.group = Some(group);
        self
    }
}

/// Opaque identifier of the group a message belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupContext {
    pub id: Vec<u8>,
}

/// Reference to an uploaded, encrypted attachment.
///
/// The key is only ever sent inside an encrypted envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPointer {
    pub id: u64,
    pub key: AttachmentKey,
    /// Plaintext size in bytes.
    pub size: u64,
    pub content_type: String,
}

/// Messages between devices of the same account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Transcript of a message this account sent from another device.
    Sent {
        destination: String,
        timestamp: Timestamp,
        message: DataMessage,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    Delivery,
    Read,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptMessage {
    pub kind: ReceiptKind,
    pub timestamps: Vec<Timestamp>,
}

impl ReceiptMessage {
    pub fn delivery(timestamp: Timestamp) -> Self {
        Self {
            kind: ReceiptKind::Delivery,
            timestamps: vec![timestamp],
        }
    }
}
