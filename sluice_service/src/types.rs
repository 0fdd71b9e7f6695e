//! Requests and responses exchanged with an ingestion service.
//!
//! ## Sequencers
//!
//! - `client_sequencer`: incremented by the service every time a channel is
//!   opened. Appends carrying an older value are rejected, which fences off
//!   handles to a channel that was reopened elsewhere.
//! - `batch_sequencer`: assigned by the client, increasing per channel handle.
//!   The service ignores batches it has already accepted, so uploads can be
//!   retried safely.
//! - `row_sequencer`: the number of rows accepted (or committed) for the
//!   channel over its lifetime. Commit progress is compared by row sequencer,
//!   never by offset token.
use serde::{Deserialize, Serialize};
use sluice_resources::{ChannelName, ClientName, OffsetToken, PipeSchema, Row};

use crate::error::ServiceError;

/// Whether opening a channel created it or took over an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenChannelStatus {
    Opened,
    Reopened,
}

/// Durably committed progress of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitState {
    /// Offset token of the last committed row.
    pub offset_token: Option<OffsetToken>,
    /// Number of rows committed.
    pub row_sequencer: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChannelRequest {
    pub client: ClientName,
    pub channel: ChannelName,
    /// Committed offset token to start from when the channel is new.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_token: Option<OffsetToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenChannelResponse {
    pub channel: ChannelName,
    pub status: OpenChannelStatus,
    pub client_sequencer: u64,
    /// Rows accepted for the channel so far, committed or not.
    pub accepted_row_sequencer: u64,
    pub committed: CommitState,
    pub schema: PipeSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendRowsRequest {
    pub channel: ChannelName,
    pub client_sequencer: u64,
    pub batch_sequencer: u64,
    /// Offset token of the last row in the batch.
    pub offset_token: OffsetToken,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRowsResponse {
    pub accepted_row_sequencer: u64,
    /// The batch had already been accepted and was ignored.
    #[serde(default)]
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatusRequest {
    pub channels: Vec<ChannelName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: ChannelName,
    pub client_sequencer: u64,
    pub accepted_row_sequencer: u64,
    pub committed: CommitState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatusResponse {
    pub channels: Vec<ChannelStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropChannelRequest {
    pub channel: ChannelName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropChannelResponse {
    pub channel: ChannelName,
}

/// Body of an unsuccessful HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ServiceError,
}

impl CommitState {
    /// Returns true if this state is strictly ahead of `other`.
    pub fn is_ahead_of(&self, other: &CommitState) -> bool {
        if self.row_sequencer != other.row_sequencer {
            return self.row_sequencer > other.row_sequencer;
        }

        self.offset_token.is_some() && other.offset_token.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_state_ordering() {
        let empty = CommitState::default();
        let initial = CommitState {
            offset_token: Some(OffsetToken::from(0)),
            row_sequencer: 0,
        };
        let later = CommitState {
            offset_token: Some(OffsetToken::from(9)),
            row_sequencer: 10,
        };

        assert!(initial.is_ahead_of(&empty));
        assert!(later.is_ahead_of(&initial));
        assert!(!initial.is_ahead_of(&later));
        assert!(!later.is_ahead_of(&later));
    }
}
