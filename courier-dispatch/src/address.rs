// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

use courier_crypto::address::{DeviceId, PRIMARY_DEVICE_ID, SessionAddress};
use serde::{Deserialize, Serialize};

/// Device of a recipient as seen by the server, optionally hosted on a federated relay.
///
/// Without a relay the recipient lives on our own server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    recipient_id: String,
    device_id: DeviceId,
    relay: Option<String>,
}

impl DeviceAddress {
    pub fn new(recipient_id: impl Into<String>, device_id: DeviceId, relay: Option<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            device_id,
            relay,
        }
    }

    /// Primary device of a recipient on our own server.
    pub fn primary(recipient_id: impl Into<String>) -> Self {
        Self::new(recipient_id, PRIMARY_DEVICE_ID, None)
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn relay(&self) -> Option<&str> {
        self.relay.as_deref()
    }

    /// Same recipient and relay, another device.
    pub fn with_device(&self, device_id: DeviceId) -> Self {
        Self {
            recipient_id: self.recipient_id.clone(),
            device_id,
            relay: self.relay.clone(),
        }
    }

    /// Key of the session with this device. Sessions are independent of the relay.
    pub fn session_address(&self) -> SessionAddress {
        SessionAddress::new(self.recipient_id.clone(), self.device_id)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relay {
            Some(relay) => write!(f, "{}.{}@{}", self.recipient_id, self.device_id, relay),
            None => write!(f, "{}.{}", self.recipient_id, self.device_id),
        }
    }
}
