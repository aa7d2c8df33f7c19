// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration of the message sender and the HTTP transport.
use serde::{Deserialize, Serialize};

use crate::address::DeviceAddress;

/// Default number of submission attempts per recipient.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default timeout of a single HTTP request in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration parameters for [`MessageSender`](crate::MessageSender).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Submission attempts per recipient. Every mismatched or stale devices answer of the server
    /// consumes one attempt.
    pub max_attempts: usize,

    /// Address of this device. When set, messages to our own account skip this device and
    /// transcripts are sent to our other devices when the server asks for it.
    pub local_address: Option<DeviceAddress>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            local_address: None,
        }
    }
}

/// Configuration parameters for [`HttpTransport`](crate::transport::http::HttpTransport).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// Base URL of the server, without trailing slash.
    pub server_url: String,

    /// Basic auth user, usually the account's number followed by our device id.
    pub username: String,

    pub password: String,

    pub user_agent: Option<String>,

    pub timeout_secs: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".into(),
            username: String::new(),
            password: String::new(),
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}
