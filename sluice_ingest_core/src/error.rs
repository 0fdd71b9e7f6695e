use std::{fmt, time::Duration};

use snafu::Snafu;
use sluice_resources::{ChannelName, OffsetToken, ProfileError, ResourceError, RowError};
use sluice_service::{ErrorKind, ServiceError};

/// Client error types.
///
/// Errors are cloneable because the same failure is often reported to
/// several waiters, for example every flush pending on a channel.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    #[snafu(display("invalid {resource} name"))]
    InvalidName {
        resource: &'static str,
        source: ResourceError,
    },
    /// The row does not match the schema of the channel's pipe.
    #[snafu(display("invalid row {index} for channel {channel}"))]
    InvalidRow {
        channel: ChannelName,
        index: usize,
        source: RowError,
    },
    #[snafu(display("channel {channel} is already open in this client"))]
    DuplicateChannel { channel: ChannelName },
    #[snafu(display("channel {channel} is closed"))]
    ChannelClosed { channel: ChannelName },
    /// The channel can no longer ingest data, for example because a batch
    /// was rejected or the channel was reopened elsewhere.
    #[snafu(display("channel {channel} is invalid: {message}"))]
    ChannelInvalidated {
        channel: ChannelName,
        message: String,
    },
    /// Closing a channel could not confirm that every row was committed.
    #[snafu(display(
        "channel {channel} closed with {pending_rows} rows not committed: {reason}"
    ))]
    IncompleteFlush {
        channel: ChannelName,
        pending_rows: u64,
        reason: String,
    },
    #[snafu(display(
        "offset token {expected} not committed on channel {channel} after {attempts} attempts, latest committed is {}",
        DisplayToken(latest)
    ))]
    CommitTimeout {
        channel: ChannelName,
        expected: OffsetToken,
        latest: Option<OffsetToken>,
        attempts: u32,
    },
    #[snafu(display(
        "commit condition not met on channel {channel} after {timeout:?}, latest committed is {}",
        DisplayToken(latest)
    ))]
    CommitWaitTimeout {
        channel: ChannelName,
        timeout: Duration,
        latest: Option<OffsetToken>,
    },
    #[snafu(display("client is closed"))]
    ClientClosed,
    #[snafu(display("failed to close {} channels: {}", failures.len(), DisplayFailures(failures)))]
    CloseChannels { failures: Vec<ChannelCloseFailure> },
    #[snafu(display("ingestion service error during {operation}"))]
    Service {
        operation: &'static str,
        source: ServiceError,
    },
    #[snafu(display("failed to load profile"))]
    Profile { source: ProfileError },
    #[snafu(display("invalid configuration: {message}"))]
    Configuration { message: String },
    #[snafu(display("internal error: {message}"))]
    Internal { message: String },
}

/// A channel that failed to close while closing its client.
#[derive(Debug, Clone)]
pub struct ChannelCloseFailure {
    pub channel: ChannelName,
    pub error: IngestError,
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName { .. } | Self::InvalidRow { .. } => ErrorKind::Validation,
            Self::DuplicateChannel { .. }
            | Self::ChannelClosed { .. }
            | Self::ChannelInvalidated { .. }
            | Self::ClientClosed => ErrorKind::Conflict,
            Self::IncompleteFlush { .. }
            | Self::CommitTimeout { .. }
            | Self::CommitWaitTimeout { .. } => ErrorKind::Temporary,
            Self::CloseChannels { failures } => failures
                .first()
                .map(|failure| failure.error.kind())
                .unwrap_or(ErrorKind::Internal),
            Self::Service { source, .. } => source.kind(),
            Self::Profile { .. } | Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

struct DisplayToken<'a>(&'a Option<OffsetToken>);

impl fmt::Display for DisplayToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(token) => write!(f, "{token}"),
            None => write!(f, "<none>"),
        }
    }
}

struct DisplayFailures<'a>(&'a [ChannelCloseFailure]);

impl fmt::Display for DisplayFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.channel, failure.error)?;
        }
        Ok(())
    }
}
