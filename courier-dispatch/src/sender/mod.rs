// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fan-out of messages to every device of a recipient.
//!
//! The server holds the authoritative list of a recipient's devices, we only hold sessions. For
//! every attempt [`MessageSender`] targets the primary device plus every device we have a session
//! with, establishing missing sessions from fetched pre-key bundles on the way, and submits all
//! envelopes for the recipient in one call.
//!
//! When our view diverges from the server's, the submission fails with a device list which we use
//! to correct our sessions before the next attempt:
//!
//! - Mismatched devices: sessions with extra devices are deleted, sessions with missing devices
//!   are established from a freshly fetched bundle for exactly that device.
//! - Stale devices: sessions with these devices are deleted. No bundle is fetched, the next
//!   attempt discovers them again if they are still registered.
//!
//! After [`SenderConfig::max_attempts`] corrections the send fails with
//! [`SendError::RetriesExhausted`].
mod error;
#[cfg(test)]
mod tests;

use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use courier_crypto::Rng;
use courier_crypto::address::PRIMARY_DEVICE_ID;
use courier_crypto::attachment::start_upload;
use courier_crypto::keys::PreKeyBundle;
use courier_crypto::session::{BundleOutcome, SessionBuilder, SessionCipher};
use courier_crypto::traits::{ProtocolStore, StoreError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub use error::{AggregateError, NetworkFailure, RecipientError, SendError};

use crate::address::DeviceAddress;
use crate::config::SenderConfig;
use crate::content::{
    AttachmentPointer, Content, DataMessage, ReceiptMessage, SyncMessage, Timestamp,
};
use crate::envelope::{OutgoingEnvelope, OutgoingMessageList, SendMessageResponse};
use crate::events::SecurityEvent;
use crate::sender::error::RecipientFailure;
use crate::transport::{MismatchedDevices, StaleDevices, Transport, TransportError};

/// Capacity of the security events channel.
const EVENTS_CHANNEL_CAPACITY: usize = 64;

/// Devices addressed by one send.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Targets {
    /// Primary device and every device we hold a session with.
    AllDevices,

    /// Exactly the given device.
    SingleDevice,
}

/// Encrypts and submits messages for recipients with multiple devices.
pub struct MessageSender<T, S> {
    transport: T,
    store: S,
    rng: Rng,
    config: SenderConfig,
    events_tx: broadcast::Sender<SecurityEvent>,
}

impl<T, S> MessageSender<T, S>
where
    T: Transport,
    S: ProtocolStore,
{
    pub fn new(transport: T, store: S, rng: Rng, config: SenderConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);
        Self {
            transport,
            store,
            rng,
            config,
            events_tx,
        }
    }

    /// Subscribes to security events.
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.events_tx.subscribe()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Sends a message to every device of the recipient.
    ///
    /// The message is an end-of-session message when [`DataMessage::end_session`] is set. After
    /// it was delivered, all sessions with the recipient are deleted.
    pub async fn send_message(
        &self,
        recipient: &DeviceAddress,
        message: DataMessage,
    ) -> Result<(), SendError> {
        let content = Content::Data(message.clone());
        let response = self
            .send_content(recipient, message.timestamp, &content, Targets::AllDevices)
            .await?;

        if content.is_end_session() {
            self.store
                .delete_all_sessions(recipient.recipient_id())
                .map_err(StoreError::new)?;
            debug!(recipient = %recipient.recipient_id(), "reset all sessions");
            self.publish(SecurityEvent::SessionReset {
                recipient_id: recipient.recipient_id().to_owned(),
            });
        }

        // The recipient already has the message, a failed transcript only affects our own
        // devices.
        if response.needs_sync
            && let Err(err) = self.send_sync_transcript(recipient, &message).await
        {
            warn!(recipient = %recipient.recipient_id(), %err, "failed sending sync transcript");
        }

        Ok(())
    }

    /// Sends a message to several recipients, one after another.
    ///
    /// A failure for one recipient does not stop the send. All failures are returned together as
    /// [`SendError::Aggregate`] once every recipient was attempted.
    pub async fn send_to_recipients(
        &self,
        recipients: &[DeviceAddress],
        message: DataMessage,
    ) -> Result<(), SendError> {
        let mut failures = Vec::new();
        for recipient in recipients {
            if let Err(err) = self.send_message(recipient, message.clone()).await {
                warn!(recipient = %recipient.recipient_id(), %err, "failed sending message");
                failures.push(RecipientFailure::classify(recipient.recipient_id(), err));
            }
        }

        let aggregate: AggregateError = failures.into_iter().collect();
        if aggregate.is_empty() {
            Ok(())
        } else {
            Err(aggregate.into())
        }
    }

    /// Sends a delivery receipt for the message with `timestamp` to exactly the given device.
    pub async fn send_receipt(
        &self,
        address: &DeviceAddress,
        timestamp: Timestamp,
    ) -> Result<(), SendError> {
        let content = Content::Receipt(ReceiptMessage::delivery(timestamp));
        self.send_content(address, now(), &content, Targets::SingleDevice)
            .await?;
        Ok(())
    }

    /// Asks the recipient to drop all sessions with us and drops ours afterwards.
    pub async fn send_end_session(
        &self,
        recipient: &DeviceAddress,
        timestamp: Timestamp,
    ) -> Result<(), SendError> {
        self.send_message(recipient, DataMessage::end_session(timestamp))
            .await
    }

    /// Encrypts and uploads an attachment of `size` bytes read from `reader`.
    ///
    /// The returned pointer carries the attachment key and belongs into a [`DataMessage`].
    pub async fn upload_attachment<R>(
        &self,
        reader: R,
        size: u64,
        content_type: impl Into<String>,
    ) -> Result<AttachmentPointer, SendError>
    where
        R: Read + Send + Sync + 'static,
    {
        let (key, ciphertext_len, encryptor) = start_upload(reader, size, &self.rng)?;
        let slot = self.transport.allocate_attachment().await?;
        self.transport
            .upload_attachment(&slot.location, ciphertext_len, encryptor)
            .await?;
        debug!(id = slot.id, size, "uploaded attachment");
        Ok(AttachmentPointer {
            id: slot.id,
            key,
            size,
            content_type: content_type.into(),
        })
    }

    async fn send_sync_transcript(
        &self,
        recipient: &DeviceAddress,
        message: &DataMessage,
    ) -> Result<(), SendError> {
        let Some(local_address) = &self.config.local_address else {
            return Ok(());
        };
        if local_address.recipient_id() == recipient.recipient_id() {
            return Ok(());
        }

        let content = Content::Sync(SyncMessage::Sent {
            destination: recipient.recipient_id().to_owned(),
            timestamp: message.timestamp,
            message: message.clone(),
        });
        let own_account = DeviceAddress::primary(local_address.recipient_id());
        self.send_content(&own_account, message.timestamp, &content, Targets::AllDevices)
            .await?;
        Ok(())
    }

    /// Runs the attempt loop for one recipient.
    async fn send_content(
        &self,
        recipient: &DeviceAddress,
        timestamp: Timestamp,
        content: &Content,
        targets: Targets,
    ) -> Result<SendMessageResponse, SendError> {
        let plaintext = content.to_bytes()?;

        for attempt in 1..=self.config.max_attempts {
            let messages = self
                .message_list(recipient, timestamp, &plaintext, targets)
                .await?;
            debug!(
                recipient = %recipient.recipient_id(),
                devices = ?messages.device_ids(),
                attempt,
                "submitting messages"
            );

            match self.transport.submit(&messages).await {
                Ok(response) => return Ok(response),
                Err(TransportError::MismatchedDevices(mismatched)) => {
                    warn!(
                        recipient = %recipient.recipient_id(),
                        missing = ?mismatched.missing_devices,
                        extra = ?mismatched.extra_devices,
                        attempt,
                        "mismatched devices"
                    );
                    self.handle_mismatched_devices(recipient, &mismatched)
                        .await?;
                }
                Err(TransportError::StaleDevices(stale)) => {
                    warn!(
                        recipient = %recipient.recipient_id(),
                        stale = ?stale.stale_devices,
                        attempt,
                        "stale devices"
                    );
                    self.handle_stale_devices(recipient, &stale)?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(SendError::RetriesExhausted {
            recipient: recipient.recipient_id().to_owned(),
            attempts: self.config.max_attempts,
        })
    }

    async fn message_list(
        &self,
        recipient: &DeviceAddress,
        timestamp: Timestamp,
        plaintext: &[u8],
        targets: Targets,
    ) -> Result<OutgoingMessageList, SendError> {
        let mut messages = Vec::new();

        match targets {
            Targets::SingleDevice => {
                messages.push(self.envelope(recipient, plaintext, targets).await?);
            }
            Targets::AllDevices => {
                let primary = recipient.with_device(PRIMARY_DEVICE_ID);
                if !self.is_local_device(&primary) {
                    messages.push(self.envelope(&primary, plaintext, targets).await?);
                }

                // Read after the primary envelope, bundles fetched for it may have created
                // sessions with further devices.
                let device_ids = self
                    .store
                    .sub_device_sessions(recipient.recipient_id())
                    .map_err(StoreError::new)?;
                for device_id in device_ids {
                    let address = recipient.with_device(device_id);
                    if self.is_local_device(&address) {
                        continue;
                    }
                    messages.push(self.envelope(&address, plaintext, targets).await?);
                }
            }
        }

        Ok(OutgoingMessageList {
            destination: recipient.recipient_id().to_owned(),
            timestamp,
            relay: recipient.relay().map(str::to_owned),
            messages,
        })
    }

    /// Encrypts the plaintext for one device, establishing the session first if needed.
    ///
    /// A missing primary session of an all-devices send fetches the bundles of every device, a
    /// single-device send only fetches the bundle of its target.
    async fn envelope(
        &self,
        address: &DeviceAddress,
        plaintext: &[u8],
        targets: Targets,
    ) -> Result<OutgoingEnvelope, SendError> {
        let session_address = address.session_address();
        let has_session = self
            .store
            .contains_session(&session_address)
            .map_err(StoreError::new)?;

        if !has_session {
            if targets == Targets::AllDevices && address.device_id() == PRIMARY_DEVICE_ID {
                let bundles = self.transport.fetch_prekey_bundles(address).await?;
                for bundle in bundles {
                    let device_address = address.with_device(bundle.device_id());
                    if self.is_local_device(&device_address) {
                        continue;
                    }
                    self.process_bundle(&device_address, &bundle)?;
                }
            } else {
                let bundle = self.transport.fetch_prekey_bundle(address).await?;
                self.process_bundle(address, &bundle)?;
            }
        }

        let encrypted = SessionCipher::new(&self.store, session_address).encrypt(plaintext)?;
        Ok(OutgoingEnvelope {
            message_type: encrypted.message_type,
            destination_device_id: address.device_id(),
            destination_registration_id: encrypted.remote_registration_id,
            body: encrypted.body,
        })
    }

    fn process_bundle(
        &self,
        address: &DeviceAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), SendError> {
        let outcome = SessionBuilder::new(&self.store, &self.rng)
            .process_bundle(&address.session_address(), bundle)?;
        if outcome == BundleOutcome::Established {
            self.publish(SecurityEvent::SessionEstablished {
                recipient_id: address.recipient_id().to_owned(),
                device_id: address.device_id(),
            });
        }
        Ok(())
    }

    async fn handle_mismatched_devices(
        &self,
        recipient: &DeviceAddress,
        mismatched: &MismatchedDevices,
    ) -> Result<(), SendError> {
        for device_id in &mismatched.extra_devices {
            self.store
                .delete_session(&recipient.with_device(*device_id).session_address())
                .map_err(StoreError::new)?;
        }

        for device_id in &mismatched.missing_devices {
            let address = recipient.with_device(*device_id);
            let bundle = self.transport.fetch_prekey_bundle(&address).await?;
            self.process_bundle(&address, &bundle)?;
        }

        Ok(())
    }

    fn handle_stale_devices(
        &self,
        recipient: &DeviceAddress,
        stale: &StaleDevices,
    ) -> Result<(), SendError> {
        for device_id in &stale.stale_devices {
            self.store
                .delete_session(&recipient.with_device(*device_id).session_address())
                .map_err(StoreError::new)?;
        }
        Ok(())
    }

    fn is_local_device(&self, address: &DeviceAddress) -> bool {
        self.config.local_address.as_ref().is_some_and(|local| {
            local.recipient_id() == address.recipient_id()
                && local.device_id() == address.device_id()
        })
    }

    fn publish(&self, event: SecurityEvent) {
        // Sending only fails when nobody is subscribed.
        let _ = self.events_tx.send(event);
    }
}

fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as Timestamp)
        .unwrap_or_default()
}
