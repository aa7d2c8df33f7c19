// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport speaking JSON over HTTPS to the message server.
use std::io::{self, Read};
use std::time::Duration;

use courier_crypto::XSignature;
use courier_crypto::address::DeviceId;
use courier_crypto::curve::decode_public_key;
use courier_crypto::keys::{PreKeyBundle, PreKeyId, RegistrationId, SignedPreKeyId};
use futures_util::{Stream, StreamExt, stream};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task;
use tracing::{debug, trace};

use crate::address::DeviceAddress;
use crate::config::HttpTransportConfig;
use crate::envelope::{OutgoingMessageList, SendMessageResponse, base64_bytes};
use crate::transport::{AttachmentChunks, AttachmentSlot, Transport, TransportError, status_error};

/// Chunk size when streaming attachment uploads.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks read ahead of the upload.
const UPLOAD_QUEUE_DEPTH: usize = 2;

pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().map_err(network_error)?;
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str, relay: Option<&str>) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.config.server_url, path))
            .basic_auth(&self.config.username, Some(&self.config.password));
        if let Some(relay) = relay {
            request = request.query(&[("relay", relay)]);
        }
        request
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        trace!(%status, url = %response.url(), "server response");
        if !status.is_success() {
            let body = response.bytes().await.map_err(network_error)?;
            return Err(status_error(status.as_u16(), &body));
        }
        Ok(response)
    }

    async fn fetch_keys(
        &self,
        address: &DeviceAddress,
        device: &str,
    ) -> Result<Vec<PreKeyBundle>, TransportError> {
        let path = format!("/v2/keys/{}/{}", address.recipient_id(), device);
        let response = self
            .execute(self.request(Method::GET, &path, address.relay()))
            .await
            .map_err(|err| err.for_destination(address.recipient_id()))?;
        let keys: PreKeyResponse = read_json(response).await?;
        keys.into_bundles()
    }
}

impl Transport for HttpTransport {
    async fn fetch_prekey_bundles(
        &self,
        address: &DeviceAddress,
    ) -> Result<Vec<PreKeyBundle>, TransportError> {
        self.fetch_keys(address, "*").await
    }

    async fn fetch_prekey_bundle(
        &self,
        address: &DeviceAddress,
    ) -> Result<PreKeyBundle, TransportError> {
        self.fetch_keys(address, &address.device_id().to_string())
            .await?
            .into_iter()
            .find(|bundle| bundle.device_id() == address.device_id())
            .ok_or_else(|| {
                TransportError::MalformedResponse(format!("no bundle for device {address}"))
            })
    }

    async fn submit(
        &self,
        messages: &OutgoingMessageList,
    ) -> Result<SendMessageResponse, TransportError> {
        let path = format!("/v1/messages/{}", messages.destination);
        let request = self
            .request(Method::PUT, &path, messages.relay.as_deref())
            .json(messages);
        let response = self
            .execute(request)
            .await
            .map_err(|err| err.for_destination(&messages.destination))?;

        let body = response.bytes().await.map_err(network_error)?;
        if body.is_empty() {
            return Ok(SendMessageResponse::default());
        }
        serde_json::from_slice(&body).map_err(|err| TransportError::MalformedResponse(err.to_string()))
    }

    async fn allocate_attachment(&self) -> Result<AttachmentSlot, TransportError> {
        let response = self
            .execute(self.request(Method::GET, "/v1/attachments/", None))
            .await?;
        let slot: AttachmentSlotResponse = read_json(response).await?;
        debug!(id = slot.id, "allocated attachment slot");
        Ok(AttachmentSlot {
            id: slot.id,
            location: slot.location,
        })
    }

    async fn upload_attachment<R>(
        &self,
        location: &str,
        length: u64,
        body: R,
    ) -> Result<(), TransportError>
    where
        R: Read + Send + Sync + 'static,
    {
        let request = self
            .client
            .put(location)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(read_in_background(body)));
        self.execute(request).await?;
        Ok(())
    }

    async fn attachment_location(
        &self,
        id: u64,
        relay: Option<&str>,
    ) -> Result<String, TransportError> {
        let path = format!("/v1/attachments/{id}");
        let response = self.execute(self.request(Method::GET, &path, relay)).await?;
        let location: AttachmentLocationResponse = read_json(response).await?;
        Ok(location.location)
    }

    async fn download_attachment(
        &self,
        location: &str,
    ) -> Result<AttachmentChunks, TransportError> {
        let response = self.execute(self.client.get(location)).await?;
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(network_error));
        Ok(chunks.boxed())
    }
}

fn network_error(err: reqwest::Error) -> TransportError {
    TransportError::Network(io::Error::other(err))
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, TransportError> {
    let body = response.bytes().await.map_err(network_error)?;
    serde_json::from_slice(&body).map_err(|err| TransportError::MalformedResponse(err.to_string()))
}

/// Reads `reader` on the blocking thread pool and yields its chunks.
///
/// At most [`UPLOAD_QUEUE_DEPTH`] chunks wait for the network at a time.
fn read_in_background<R>(reader: R) -> impl Stream<Item = Result<Vec<u8>, io::Error>> + Send
where
    R: Read + Send + 'static,
{
    let (chunks_tx, chunks_rx) = mpsc::channel(UPLOAD_QUEUE_DEPTH);
    task::spawn_blocking(move || {
        let chunks = ReadChunks {
            reader,
            done: false,
        };
        for chunk in chunks {
            // The upload was dropped.
            if chunks_tx.blocking_send(chunk).is_err() {
                break;
            }
        }
    });

    stream::unfold(chunks_rx, |mut chunks_rx| async move {
        let chunk = chunks_rx.recv().await?;
        Some((chunk, chunks_rx))
    })
}

/// Reads the upload body in fixed chunks so only one chunk is buffered at a time.
struct ReadChunks<R> {
    reader: R,
    done: bool,
}

impl<R: Read> Iterator for ReadChunks<R> {
    type Item = Result<Vec<u8>, io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut filled = 0;
        while filled < chunk.len() {
            match self.reader.read(&mut chunk[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(read) => filled += read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        if filled == 0 {
            return None;
        }
        chunk.truncate(filled);
        Some(Ok(chunk))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentSlotResponse {
    id: u64,
    location: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentLocationResponse {
    location: String,
}

/// Keys of one recipient as served by `GET /v2/keys/{number}/{device}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreKeyResponse {
    #[serde(with = "base64_bytes")]
    identity_key: Vec<u8>,
    devices: Vec<PreKeyResponseItem>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreKeyResponseItem {
    device_id: DeviceId,
    registration_id: RegistrationId,
    #[serde(default)]
    signed_pre_key: Option<SignedPreKeyEntity>,
    #[serde(default)]
    pre_key: Option<PreKeyEntity>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedPreKeyEntity {
    key_id: SignedPreKeyId,
    #[serde(with = "base64_bytes")]
    public_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    signature: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreKeyEntity {
    key_id: PreKeyId,
    #[serde(with = "base64_bytes")]
    public_key: Vec<u8>,
}

impl PreKeyResponse {
    fn into_bundles(self) -> Result<Vec<PreKeyBundle>, TransportError> {
        let malformed = |err: &dyn std::fmt::Display| TransportError::MalformedResponse(err.to_string());
        let identity_key = decode_public_key(&self.identity_key).map_err(|err| malformed(&err))?;

        self.devices
            .into_iter()
            .map(|device| {
                let (signed_prekey, signature) = match device.signed_pre_key {
                    Some(entity) => {
                        let public_key =
                            decode_public_key(&entity.public_key).map_err(|err| malformed(&err))?;
                        let signature = XSignature::try_from(entity.signature.as_slice())
                            .map_err(|err| malformed(&err))?;
                        (Some((entity.key_id, public_key)), Some(signature))
                    }
                    None => (None, None),
                };
                let onetime_prekey = device
                    .pre_key
                    .map(|entity| {
                        decode_public_key(&entity.public_key)
                            .map(|public_key| (entity.key_id, public_key))
                            .map_err(|err| malformed(&err))
                    })
                    .transpose()?;

                Ok(PreKeyBundle::new(
                    device.registration_id,
                    device.device_id,
                    identity_key,
                    signed_prekey,
                    signature,
                    onetime_prekey,
                ))
            })
            .collect()
    }
}
