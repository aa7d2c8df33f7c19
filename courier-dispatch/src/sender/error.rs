// SPDX-License-Identifier: MIT OR Apache-2.0

use courier_crypto::EncodeError;
use courier_crypto::attachment::AttachmentError;
use courier_crypto::session::{SessionError, UntrustedIdentity};
use courier_crypto::traits::StoreError;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    UntrustedIdentity(UntrustedIdentity),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    /// The recipient's device list kept changing for every attempt.
    #[error("could not reconcile devices of {recipient} within {attempts} attempts")]
    RetriesExhausted { recipient: String, attempts: usize },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl SendError {
    /// Returns `true` if sending the same message again later may succeed.
    ///
    /// Network failures, rate limiting and a device list which did not settle within the attempt
    /// budget are transient. Untrusted identities, unregistered users and cryptographic failures
    /// are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SendError::Transport(err) => err.is_retryable(),
            SendError::RetriesExhausted { .. } => true,
            _ => false,
        }
    }
}

impl From<SessionError> for SendError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UntrustedIdentity(err) => SendError::UntrustedIdentity(err),
            err => SendError::Session(err),
        }
    }
}

/// Network failure while sending to one recipient.
#[derive(Debug)]
pub struct NetworkFailure {
    pub recipient_id: String,
    pub error: TransportError,
}

/// Any other failure while sending to one recipient.
#[derive(Debug)]
pub struct RecipientError {
    pub recipient_id: String,
    pub error: SendError,
}

/// Recipients of a multi-recipient send which did not receive the message.
///
/// Recipients missing from every list received the message.
#[derive(Debug, Default, Error)]
#[error(
    "message was not delivered to every recipient: {} untrusted identities, {} unregistered users, {} network failures, {} unsettled device lists, {} other failures",
    .untrusted_identities.len(),
    .unregistered_users.len(),
    .network_failures.len(),
    .retries_exhausted.len(),
    .other_failures.len()
)]
pub struct AggregateError {
    pub untrusted_identities: Vec<UntrustedIdentity>,
    pub unregistered_users: Vec<String>,
    pub network_failures: Vec<NetworkFailure>,
    /// Recipients whose device list did not settle within the attempt budget.
    pub retries_exhausted: Vec<String>,
    pub other_failures: Vec<RecipientError>,
}

impl AggregateError {
    pub fn is_empty(&self) -> bool {
        self.untrusted_identities.is_empty()
            && self.unregistered_users.is_empty()
            && self.network_failures.is_empty()
            && self.retries_exhausted.is_empty()
            && self.other_failures.is_empty()
    }
}

/// Failed send to a single recipient of a multi-recipient send.
#[derive(Debug)]
pub(crate) enum RecipientFailure {
    UntrustedIdentity(UntrustedIdentity),
    UnregisteredUser(String),
    Network(NetworkFailure),
    RetriesExhausted(String),
    Other(RecipientError),
}

impl RecipientFailure {
    /// Sorts a failed send into its place in the aggregate.
    pub(crate) fn classify(recipient_id: &str, err: SendError) -> Self {
        match err {
            SendError::UntrustedIdentity(err) => RecipientFailure::UntrustedIdentity(err),
            SendError::Transport(TransportError::UnregisteredUser(user)) => {
                RecipientFailure::UnregisteredUser(user)
            }
            SendError::Transport(error @ TransportError::Network(_)) => {
                RecipientFailure::Network(NetworkFailure {
                    recipient_id: recipient_id.to_owned(),
                    error,
                })
            }
            SendError::RetriesExhausted { recipient, .. } => {
                RecipientFailure::RetriesExhausted(recipient)
            }
            error => RecipientFailure::Other(RecipientError {
                recipient_id: recipient_id.to_owned(),
                error,
            }),
        }
    }
}

impl FromIterator<RecipientFailure> for AggregateError {
    fn from_iter<I: IntoIterator<Item = RecipientFailure>>(iter: I) -> Self {
        iter.into_iter()
            .fold(AggregateError::default(), |mut aggregate, failure| {
                match failure {
                    RecipientFailure::UntrustedIdentity(err) => {
                        aggregate.untrusted_identities.push(err)
                    }
                    RecipientFailure::UnregisteredUser(recipient_id) => {
                        aggregate.unregistered_users.push(recipient_id)
                    }
                    RecipientFailure::Network(failure) => aggregate.network_failures.push(failure),
                    RecipientFailure::RetriesExhausted(recipient_id) => {
                        aggregate.retries_exhausted.push(recipient_id)
                    }
                    RecipientFailure::Other(failure) => aggregate.other_failures.push(failure),
                }
                aggregate
            })
    }
}
