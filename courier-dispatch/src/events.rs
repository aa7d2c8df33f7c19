// SPDX-License-Identifier: MIT OR Apache-2.0

//! Security events API.
use courier_crypto::address::DeviceId;

/// Changes to the sessions with a recipient which presentation layers may want to surface, for
/// example as a "safety number changed" notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A session with a device of the recipient was (re-)established from a pre-key bundle.
    SessionEstablished {
        recipient_id: String,
        device_id: DeviceId,
    },

    /// All sessions with the recipient were torn down after an end-of-session message.
    SessionReset { recipient_id: String },
}
