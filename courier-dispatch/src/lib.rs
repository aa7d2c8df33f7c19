// SPDX-License-Identifier: MIT OR Apache-2.0

//! `courier-dispatch` delivers end-to-end encrypted messages to every device of a recipient
//! through a store-and-forward server.
//!
//! ## Sending
//!
//! [`MessageSender`] encrypts one copy of a message per device with the per-device sessions of
//! [`courier_crypto`] and submits all copies for a recipient at once. Sessions are bootstrapped
//! from pre-key bundles fetched through the [`Transport`](transport::Transport) whenever a device
//! has none yet.
//!
//! The server knows which devices a recipient currently has, we only know the devices we hold
//! sessions with. When both views diverge the server rejects the submission with the devices
//! which are missing, extra or stale. The sender corrects its sessions accordingly and tries
//! again, up to [`SenderConfig::max_attempts`](config::SenderConfig::max_attempts) times.
//!
//! Messages to several recipients are sent one recipient after another. Recipients with an
//! untrusted identity, unknown to the server or unreachable due to network failures are
//! collected into an [`AggregateError`] instead of aborting the whole send.
//!
//! ## Receiving
//!
//! [`EnvelopeCipher`](receiver::EnvelopeCipher) opens envelopes delivered to this device and
//! [`retrieve_attachment`](receiver::retrieve_attachment) downloads and decrypts attachments
//! referenced by received messages.
//!
//! ## Security events
//!
//! Established and reset sessions are announced on a broadcast channel, see
//! [`MessageSender::subscribe`].
pub mod address;
pub mod config;
pub mod content;
pub mod envelope;
pub mod events;
pub mod receiver;
mod sender;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod transport;

pub use address::DeviceAddress;
pub use sender::{AggregateError, MessageSender, NetworkFailure, RecipientError, SendError};
