// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire shapes of per-device envelopes.
use courier_crypto::address::DeviceId;
use courier_crypto::keys::RegistrationId;
use courier_crypto::session::MessageType;
use serde::{Deserialize, Serialize};

use crate::address::DeviceAddress;
use crate::content::Timestamp;

/// Ciphertext for exactly one device of the recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingEnvelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub destination_device_id: DeviceId,
    pub destination_registration_id: RegistrationId,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

/// All envelopes for one recipient, submitted in a single call.
///
/// Mismatched and stale device responses of the server refer to exactly this list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessageList {
    pub destination: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
    pub messages: Vec<OutgoingEnvelope>,
}

impl OutgoingMessageList {
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.messages
            .iter()
            .map(|envelope| envelope.destination_device_id)
            .collect()
    }
}

/// Server answer to an accepted submission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    /// Our account has other devices which should receive a transcript of the message.
    #[serde(default)]
    pub needs_sync: bool,
}

/// Envelope delivered to one of our devices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEnvelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub source: String,
    pub source_device: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
    pub timestamp: Timestamp,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl IncomingEnvelope {
    pub fn source_address(&self) -> DeviceAddress {
        DeviceAddress::new(self.source.clone(), self.source_device, self.relay.clone())
    }
}

/// Standard base64 for binary fields in JSON.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
