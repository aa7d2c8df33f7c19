// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory message server and helpers for tests.
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use courier_crypto::Rng;
use courier_crypto::address::DeviceId;
use courier_crypto::keys::PreKeyBundle;
use courier_crypto::test_utils::TestDevice;
use futures_util::{StreamExt, stream};

use crate::address::DeviceAddress;
use crate::content::Content;
use crate::envelope::{IncomingEnvelope, OutgoingMessageList, SendMessageResponse};
use crate::receiver::EnvelopeCipher;
use crate::transport::{
    AttachmentChunks, AttachmentSlot, MismatchedDevices, StaleDevices, Transport, TransportError, error_for_status,
};

/// Downloads are served in chunks which do not line up with attachment blocks.
const DOWNLOAD_CHUNK_SIZE: usize = 10_000;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Answer the server gives to the next submission instead of processing it.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Status(u16, Vec<u8>),
    NetworkFailure,
}

/// Request received by the [`MockServer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    FetchBundles(String),
    FetchBundle(String, DeviceId),
    Submit(String, Vec<DeviceId>),
    AllocateAttachment,
    UploadAttachment(String),
    AttachmentLocation(u64),
    DownloadAttachment(String),
}

/// Message a device of a recipient received and decrypted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub destination: String,
    pub device_id: DeviceId,
    pub relay: Option<String>,
    pub content: Content,
}

#[derive(Debug)]
struct MockState {
    sender: DeviceAddress,
    accounts: HashMap<String, BTreeMap<DeviceId, TestDevice>>,
    responses: VecDeque<ScriptedResponse>,
    calls: Vec<Call>,
    deliveries: Vec<Delivery>,
    attachments: BTreeMap<u64, Option<Vec<u8>>>,
    rng: Rng,
}

/// Message server holding registered devices with real key material.
///
/// Submissions are checked against the registered devices like the real server does: missing or
/// extra devices fail with 409, envelopes for re-registered devices with 410. Accepted envelopes
/// are decrypted by the receiving device and recorded as [`Delivery`].
///
/// All messages are expected to come from `sender`.
#[derive(Clone, Debug)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub fn new(sender: DeviceAddress, rng: Rng) -> Self {
        let state = MockState {
            sender,
            accounts: HashMap::new(),
            responses: VecDeque::new(),
            calls: Vec::new(),
            deliveries: Vec::new(),
            attachments: BTreeMap::new(),
            rng,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("acquire mock server state")
    }

    /// Registers a device. Further devices of an account share the identity of the first one.
    pub fn register(&self, recipient_id: &str, device_id: DeviceId) -> TestDevice {
        let mut state = self.state();
        let identity = state
            .accounts
            .get(recipient_id)
            .and_then(|devices| devices.values().next())
            .map(|device| device.identity.clone());
        let device = match identity {
            Some(identity) => TestDevice::with_identity(identity, device_id, &state.rng),
            None => TestDevice::generate(device_id, &state.rng),
        };
        state
            .accounts
            .entry(recipient_id.to_owned())
            .or_default()
            .insert(device_id, device.clone());
        device
    }

    /// Registers the device again, it loses all sessions and gets a new registration id.
    pub fn reregister(&self, recipient_id: &str, device_id: DeviceId) -> TestDevice {
        self.remove_device(recipient_id, device_id);
        self.register(recipient_id, device_id)
    }

    pub fn remove_device(&self, recipient_id: &str, device_id: DeviceId) {
        let mut state = self.state();
        if let Some(devices) = state.accounts.get_mut(recipient_id) {
            devices.remove(&device_id);
        }
    }

    pub fn device(&self, recipient_id: &str, device_id: DeviceId) -> Option<TestDevice> {
        self.state()
            .accounts
            .get(recipient_id)
            .and_then(|devices| devices.get(&device_id))
            .cloned()
    }

    pub fn push_response(&self, response: ScriptedResponse) {
        self.state().responses.push_back(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state().deliveries.clone()
    }

    pub fn clear_deliveries(&self) {
        self.state().deliveries.clear();
    }

    /// Stored ciphertext of an uploaded attachment.
    pub fn attachment(&self, id: u64) -> Option<Vec<u8>> {
        self.state().attachments.get(&id).cloned().flatten()
    }
}

impl MockState {
    fn devices(&self, recipient_id: &str) -> Result<&BTreeMap<DeviceId, TestDevice>, TransportError> {
        self.accounts
            .get(recipient_id)
            .filter(|devices| !devices.is_empty())
            .ok_or_else(|| TransportError::UnregisteredUser(recipient_id.to_owned()))
    }

    fn bundle(&self, device: &TestDevice) -> PreKeyBundle {
        device.prekey_bundle(&self.rng)
    }

    fn check_devices(&self, messages: &OutgoingMessageList) -> Result<(), TransportError> {
        let devices = self.devices(&messages.destination)?;

        let expected: BTreeSet<DeviceId> = devices
            .keys()
            .copied()
            .filter(|device_id| {
                messages.destination != self.sender.recipient_id()
                    || *device_id != self.sender.device_id()
            })
            .collect();
        let submitted: BTreeSet<DeviceId> = messages.device_ids().into_iter().collect();

        let mismatched = MismatchedDevices {
            missing_devices: expected.difference(&submitted).copied().collect(),
            extra_devices: submitted.difference(&expected).copied().collect(),
        };
        if !mismatched.missing_devices.is_empty() || !mismatched.extra_devices.is_empty() {
            let body = serde_json::to_vec(&mismatched).expect("encode mismatched devices");
            return error_for_status(409, &body);
        }

        let stale = StaleDevices {
            stale_devices: messages
                .messages
                .iter()
                .filter(|envelope| {
                    devices[&envelope.destination_device_id].registration_id
                        != envelope.destination_registration_id
                })
                .map(|envelope| envelope.destination_device_id)
                .collect(),
        };
        if !stale.stale_devices.is_empty() {
            let body = serde_json::to_vec(&stale).expect("encode stale devices");
            return error_for_status(410, &body);
        }

        Ok(())
    }

    fn deliver(&mut self, messages: &OutgoingMessageList) -> Result<(), TransportError> {
        let mut deliveries = Vec::with_capacity(messages.messages.len());
        let devices = self.devices(&messages.destination)?;
        for envelope in &messages.messages {
            let device = &devices[&envelope.destination_device_id];
            let incoming = IncomingEnvelope {
                message_type: envelope.message_type,
                source: self.sender.recipient_id().to_owned(),
                source_device: self.sender.device_id(),
                relay: None,
                timestamp: messages.timestamp,
                content: envelope.body.clone(),
            };
            let content = EnvelopeCipher::new(&device.store)
                .decrypt(&incoming)
                .map_err(|err| TransportError::NonSuccessfulResponse {
                    status: 400,
                    message: err.to_string(),
                })?;
            deliveries.push(Delivery {
                destination: messages.destination.clone(),
                device_id: envelope.destination_device_id,
                relay: messages.relay.clone(),
                content,
            });
        }
        self.deliveries.extend(deliveries);
        Ok(())
    }

    fn needs_sync(&self, destination: &str) -> bool {
        if destination == self.sender.recipient_id() {
            return false;
        }
        self.accounts
            .get(self.sender.recipient_id())
            .is_some_and(|devices| {
                devices
                    .keys()
                    .any(|device_id| *device_id != self.sender.device_id())
            })
    }
}

fn attachment_url(id: u64) -> String {
    format!("https://cdn.example.org/attachments/{id}")
}

impl Transport for MockServer {
    async fn fetch_prekey_bundles(
        &self,
        address: &DeviceAddress,
    ) -> Result<Vec<PreKeyBundle>, TransportError> {
        let mut state = self.state();
        state
            .calls
            .push(Call::FetchBundles(address.recipient_id().to_owned()));
        let state = &*state;
        let devices = state.devices(address.recipient_id())?;
        Ok(devices.values().map(|device| state.bundle(device)).collect())
    }

    async fn fetch_prekey_bundle(
        &self,
        address: &DeviceAddress,
    ) -> Result<PreKeyBundle, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::FetchBundle(
            address.recipient_id().to_owned(),
            address.device_id(),
        ));
        let state = &*state;
        let device = state
            .devices(address.recipient_id())?
            .get(&address.device_id())
            .ok_or_else(|| TransportError::UnregisteredUser(address.recipient_id().to_owned()))?;
        Ok(state.bundle(device))
    }

    async fn submit(
        &self,
        messages: &OutgoingMessageList,
    ) -> Result<SendMessageResponse, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::Submit(
            messages.destination.clone(),
            messages.device_ids(),
        ));

        match state.responses.pop_front() {
            Some(ScriptedResponse::Status(status, body)) => {
                error_for_status(status, &body)
                    .map_err(|err| err.for_destination(&messages.destination))?;
            }
            Some(ScriptedResponse::NetworkFailure) => {
                return Err(TransportError::Network(io::Error::other("connection reset")));
            }
            None => (),
        }

        state.check_devices(messages)?;
        state.deliver(messages)?;
        Ok(SendMessageResponse {
            needs_sync: state.needs_sync(&messages.destination),
        })
    }

    async fn allocate_attachment(&self) -> Result<AttachmentSlot, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::AllocateAttachment);
        let id = state.attachments.len() as u64 + 1;
        state.attachments.insert(id, None);
        Ok(AttachmentSlot {
            id,
            location: attachment_url(id),
        })
    }

    async fn upload_attachment<R>(
        &self,
        location: &str,
        length: u64,
        mut body: R,
    ) -> Result<(), TransportError>
    where
        R: Read + Send + Sync + 'static,
    {
        let mut ciphertext = Vec::new();
        body.read_to_end(&mut ciphertext)?;
        if ciphertext.len() as u64 != length {
            return Err(TransportError::NonSuccessfulResponse {
                status: 400,
                message: format!("expected {length} bytes, got {}", ciphertext.len()),
            });
        }

        let mut state = self.state();
        state
            .calls
            .push(Call::UploadAttachment(location.to_owned()));
        let id = state
            .attachments
            .keys()
            .copied()
            .find(|id| attachment_url(*id) == location)
            .ok_or(TransportError::NotFound)?;
        state.attachments.insert(id, Some(ciphertext));
        Ok(())
    }

    async fn attachment_location(
        &self,
        id: u64,
        _relay: Option<&str>,
    ) -> Result<String, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::AttachmentLocation(id));
        match state.attachments.get(&id) {
            Some(Some(_)) => Ok(attachment_url(id)),
            _ => Err(TransportError::NotFound),
        }
    }

    async fn download_attachment(
        &self,
        location: &str,
    ) -> Result<AttachmentChunks, TransportError> {
        let mut state = self.state();
        state
            .calls
            .push(Call::DownloadAttachment(location.to_owned()));
        let ciphertext = state
            .attachments
            .iter()
            .find(|(id, _)| attachment_url(**id) == location)
            .and_then(|(_, ciphertext)| ciphertext.clone())
            .ok_or(TransportError::NotFound)?;

        let chunks: Vec<Result<Vec<u8>, TransportError>> = ciphertext
            .chunks(DOWNLOAD_CHUNK_SIZE)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
