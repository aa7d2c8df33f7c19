// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one registered device of a recipient.
pub type DeviceId = u32;

/// Device id of the primary device of every recipient. Linked devices use higher ids.
pub const PRIMARY_DEVICE_ID: DeviceId = 1;

/// Key under which per-device session state is stored: one recipient and one of their devices.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionAddress {
    recipient_id: String,
    device_id: DeviceId,
}

impl SessionAddress {
    pub fn new(recipient_id: impl Into<String>, device_id: DeviceId) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            device_id,
        }
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn is_primary(&self) -> bool {
        self.device_id == PRIMARY_DEVICE_ID
    }
}

impl fmt::Display for SessionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.recipient_id, self.device_id)
    }
}
