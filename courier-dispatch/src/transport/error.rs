// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;

use courier_crypto::address::DeviceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server view on a submission whose device list did not match the recipient's devices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchedDevices {
    /// Registered devices the submission did not address.
    #[serde(default)]
    pub missing_devices: Vec<DeviceId>,

    /// Addressed devices which are not registered (anymore).
    #[serde(default)]
    pub extra_devices: Vec<DeviceId>,
}

/// Devices whose sessions the server rejected since they were re-registered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleDevices {
    #[serde(default)]
    pub stale_devices: Vec<DeviceId>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("authorization failed")]
    AuthorizationFailed,

    #[error("resource not found")]
    NotFound,

    #[error("recipient {0} is not registered")]
    UnregisteredUser(String),

    #[error(
        "mismatched devices, missing: {:?}, extra: {:?}",
        .0.missing_devices,
        .0.extra_devices
    )]
    MismatchedDevices(MismatchedDevices),

    #[error("stale devices: {:?}", .0.stale_devices)]
    StaleDevices(StaleDevices),

    #[error("expectation failed")]
    ExpectationFailed,

    #[error("non-successful response {status}: {message}")]
    NonSuccessfulResponse { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Network(#[from] io::Error),
}

impl TransportError {
    /// Returns `true` if repeating the same request later may succeed.
    ///
    /// Only network failures and rate limiting are transient. Topology errors are handled by the
    /// sender itself and every other error needs a change on our side first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::RateLimited)
    }

    /// Key lookups and submissions address a recipient, a missing resource means the recipient
    /// is unknown.
    pub(crate) fn for_destination(self, destination: &str) -> Self {
        match self {
            TransportError::NotFound => TransportError::UnregisteredUser(destination.to_owned()),
            err => err,
        }
    }
}

/// Maps a server response status to the transport error taxonomy.
///
/// `body` is only inspected for non-successful responses, see [`status_error`].
pub fn error_for_status(status: u16, body: &[u8]) -> Result<(), TransportError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(status_error(status, body))
    }
}

/// Error of a non-successful response.
///
/// Mismatched (409) and stale (410) device bodies are parsed, every other unknown status keeps the
/// body as message.
pub fn status_error(status: u16, body: &[u8]) -> TransportError {
    match status {
        401 | 403 => TransportError::AuthorizationFailed,
        404 => TransportError::NotFound,
        409 => match serde_json::from_slice(body) {
            Ok(devices) => TransportError::MismatchedDevices(devices),
            Err(err) => TransportError::MalformedResponse(err.to_string()),
        },
        410 => match serde_json::from_slice(body) {
            Ok(devices) => TransportError::StaleDevices(devices),
            Err(err) => TransportError::MalformedResponse(err.to_string()),
        },
        413 => TransportError::RateLimited,
        417 => TransportError::ExpectationFailed,
        status => TransportError::NonSuccessfulResponse {
            status,
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use assert_matches::assert_matches;

    use super::{
        MismatchedDevices, StaleDevices, TransportError, error_for_status, status_error,
    };

    #[test]
    fn status_mapping() {
        assert!(error_for_status(200, b"").is_ok());
        assert!(error_for_status(204, b"").is_ok());
        assert_matches!(error_for_status(413, b""), Err(TransportError::RateLimited));
        assert_matches!(error_for_status(401, b""), Err(TransportError::AuthorizationFailed));
        assert_matches!(error_for_status(403, b""), Err(TransportError::AuthorizationFailed));
        assert_matches!(error_for_status(404, b""), Err(TransportError::NotFound));
        assert_matches!(error_for_status(417, b""), Err(TransportError::ExpectationFailed));
        assert_matches!(status_error(404, b"not found"), TransportError::NotFound);
        assert_matches!(
            status_error(503, b""),
            TransportError::NonSuccessfulResponse { status: 503, .. }
        );
        assert_matches!(
            error_for_status(500, b"Internal Server Error"),
            Err(TransportError::NonSuccessfulResponse { status: 500, message })
                if message == "Internal Server Error"
        );
    }

    #[test]
    fn device_payloads() {
        assert_matches!(
            error_for_status(409, br#"{"missingDevices":[7],"extraDevices":[5]}"#),
            Err(TransportError::MismatchedDevices(MismatchedDevices {
                missing_devices,
                extra_devices,
            })) if missing_devices == vec![7] && extra_devices == vec![5]
        );
        assert_matches!(
            error_for_status(409, br#"{"extraDevices":[2]}"#),
            Err(TransportError::MismatchedDevices(devices))
                if devices.missing_devices.is_empty() && devices.extra_devices == vec![2]
        );
        assert_matches!(
            error_for_status(410, br#"{"staleDevices":[3]}"#),
            Err(TransportError::StaleDevices(StaleDevices { stale_devices }))
                if stale_devices == vec![3]
        );
        assert_matches!(
            error_for_status(410, b"<html>"),
            Err(TransportError::MalformedResponse(_))
        );
    }

    #[test]
    fn unregistered_destination() {
        assert_matches!(
            TransportError::NotFound.for_destination("+14152222222"),
            TransportError::UnregisteredUser(destination) if destination == "+14152222222"
        );
        assert_matches!(
            TransportError::RateLimited.for_destination("+14152222222"),
            TransportError::RateLimited
        );
    }

    #[test]
    fn retryable() {
        assert!(TransportError::Network(io::Error::other("connection reset")).is_retryable());
        assert!(TransportError::RateLimited.is_retryable());
        assert!(!TransportError::UnregisteredUser("+14152222222".into()).is_retryable());
        assert!(!TransportError::AuthorizationFailed.is_retryable());
        assert!(!TransportError::StaleDevices(StaleDevices::default()).is_retryable());
    }
}
