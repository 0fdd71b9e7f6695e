use serde::{Deserialize, Serialize};
use snafu::Snafu;
use sluice_resources::{ChannelName, PipeName};

use crate::error_kind::ErrorKind;

/// Errors returned by an ingestion service.
///
/// The error is serialized as-is over the wire, so that remote callers can
/// make the same retry decisions as local ones.
#[derive(Debug, Clone, PartialEq, Eq, Snafu, Serialize, Deserialize)]
#[snafu(visibility(pub))]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ServiceError {
    #[snafu(display("pipe not found: {pipe}"))]
    PipeNotFound { pipe: PipeName },
    #[snafu(display("channel not found: {channel}"))]
    ChannelNotFound { channel: ChannelName },
    #[snafu(display(
        "channel {channel} was reopened: client sequencer {client_sequencer} is older than {current_sequencer}"
    ))]
    StaleChannel {
        channel: ChannelName,
        client_sequencer: u64,
        current_sequencer: u64,
    },
    #[snafu(display("invalid request: {message}"))]
    InvalidRequest { message: String },
    #[snafu(display("unauthorized: {message}"))]
    Unauthorized { message: String },
    #[snafu(display("service unavailable: {message}"))]
    Unavailable { message: String },
    #[snafu(display("internal service error: {message}"))]
    Internal { message: String },
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PipeNotFound { .. } | Self::ChannelNotFound { .. } => ErrorKind::NotFound,
            Self::StaleChannel { .. } => ErrorKind::Conflict,
            Self::InvalidRequest { .. } => ErrorKind::Validation,
            Self::Unauthorized { .. } => ErrorKind::Configuration,
            Self::Unavailable { .. } => ErrorKind::Temporary,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
