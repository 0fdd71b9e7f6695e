//! Channels: ordered append streams into a pipe.
use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use sluice_resources::{ChannelName, OffsetToken, PipeSchema, Row};
use sluice_service::{OpenChannelResponse, OpenChannelStatus};
use tracing::{debug, info, warn};

use crate::{
    client::ClientInner,
    error::{ChannelClosedSnafu, CommitTimeoutSnafu, CommitWaitTimeoutSnafu, IngestError, Result},
    options::PollPolicy,
    tracker::OffsetTracker,
};

/// Identifies a channel handle within a client.
///
/// Reopening a channel creates a new handle with a new id, so state kept for
/// a released handle never mixes with its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// State of a channel handle shared by the [`Channel`], the client registry
/// and the background flusher.
pub struct ChannelInner {
    pub id: ChannelId,
    pub name: ChannelName,
    pub status: OpenChannelStatus,
    pub client_sequencer: u64,
    pub schema: PipeSchema,
    pub tracker: OffsetTracker,
    state: AtomicU8,
    invalidated: OnceLock<String>,
}

/// A handle to an open channel.
///
/// Rows appended to a channel are uploaded in order. Use
/// [`Channel::close`] to wait until they are committed; dropping the handle
/// releases the channel without waiting.
pub struct Channel {
    inner: Arc<ChannelInner>,
    client: Arc<ClientInner>,
}

impl ChannelInner {
    pub fn new(id: ChannelId, response: OpenChannelResponse) -> Self {
        Self {
            id,
            name: response.channel,
            status: response.status,
            client_sequencer: response.client_sequencer,
            schema: response.schema,
            tracker: OffsetTracker::new(response.accepted_row_sequencer, response.committed),
            state: AtomicU8::new(OPEN),
            invalidated: OnceLock::new(),
        }
    }

    /// Returns an error if rows can't be appended to the channel.
    pub fn ensure_open(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) != OPEN {
            return ChannelClosedSnafu {
                channel: self.name.clone(),
            }
            .fail();
        }

        match self.invalidation() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Marks the channel as invalid and returns the corresponding error.
    ///
    /// Only the first reason is kept.
    pub fn invalidate(&self, message: impl Into<String>) -> IngestError {
        let message = self.invalidated.get_or_init(|| message.into());
        IngestError::ChannelInvalidated {
            channel: self.name.clone(),
            message: message.clone(),
        }
    }

    pub fn invalidation(&self) -> Option<IngestError> {
        self.invalidated
            .get()
            .map(|message| IngestError::ChannelInvalidated {
                channel: self.name.clone(),
                message: message.clone(),
            })
    }

    /// Starts closing the channel. Returns false if it is already closing or closed.
    pub fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_close(&self) {
        self.state.store(CLOSED, Ordering::Release);
    }

    /// Closes the channel without draining it. Returns false if it was not open.
    pub fn close_now(&self) -> bool {
        self.state
            .compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) != OPEN
    }
}

impl fmt::Debug for ChannelInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelInner")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("client_sequencer", &self.client_sequencer)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(inner: Arc<ChannelInner>, client: Arc<ClientInner>) -> Self {
        Self { inner, client }
    }

    pub fn name(&self) -> &ChannelName {
        &self.inner.name
    }

    /// Whether opening the channel created it or took it over.
    pub fn status(&self) -> OpenChannelStatus {
        self.inner.status
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Schema of the pipe the channel ingests into.
    pub fn schema(&self) -> &PipeSchema {
        &self.inner.schema
    }

    /// Offset token of the last row appended through this handle, or the
    /// committed token the channel was opened with.
    pub fn latest_appended_offset_token(&self) -> Option<OffsetToken> {
        self.inner.tracker.latest_appended_offset_token()
    }

    /// Appends a row tagged with `offset_token`.
    ///
    /// The row is validated against the pipe schema and queued for upload.
    /// This only waits for queue capacity, not for the row to be committed.
    pub async fn append_row(&self, row: Row, offset_token: OffsetToken) -> Result<()> {
        self.client
            .append(&self.inner, vec![row], offset_token)
            .await
    }

    /// Appends rows, tagging the last one with `end_offset_token`.
    ///
    /// If any row is invalid none is appended.
    pub async fn append_rows(&self, rows: Vec<Row>, end_offset_token: OffsetToken) -> Result<()> {
        self.client
            .append(&self.inner, rows, end_offset_token)
            .await
    }

    /// Returns the latest offset token committed by the service.
    ///
    /// The returned token never goes backwards, even if the service reports
    /// an older commit state.
    pub async fn latest_committed_offset_token(&self) -> Result<Option<OffsetToken>> {
        if self.inner.state.load(Ordering::Acquire) == CLOSED {
            return ChannelClosedSnafu {
                channel: self.inner.name.clone(),
            }
            .fail();
        }

        self.client.refresh_commit_state(&self.inner).await
    }

    /// Uploads every row appended so far and waits until the service accepted them.
    pub async fn flush(&self) -> Result<()> {
        self.client.ensure_open()?;
        self.inner.ensure_open()?;
        self.client.flush_channel(&self.inner).await
    }

    /// Polls the service until `expected` is the latest committed offset token.
    ///
    /// Gives up with [`IngestError::CommitTimeout`] after `policy.attempts` polls.
    pub async fn wait_for_offset_token(
        &self,
        expected: &OffsetToken,
        policy: PollPolicy,
    ) -> Result<OffsetToken> {
        let mut latest = None;

        for attempt in 1..=policy.attempts {
            latest = self.latest_committed_offset_token().await?;
            info!(
                channel = %self.inner.name,
                attempt,
                latest = ?latest.as_ref().map(OffsetToken::as_str),
                expected = %expected,
                "polled latest committed offset token"
            );

            if let Some(token) = latest.as_ref().filter(|token| *token == expected) {
                return Ok(token.clone());
            }

            if attempt < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        CommitTimeoutSnafu {
            channel: self.inner.name.clone(),
            expected: expected.clone(),
            latest,
            attempts: policy.attempts,
        }
        .fail()
    }

    /// Polls the service until `predicate` holds for the latest committed
    /// offset token, or `timeout` elapses.
    pub async fn wait_for_commit<F>(
        &self,
        mut predicate: F,
        timeout: Duration,
    ) -> Result<Option<OffsetToken>>
    where
        F: FnMut(Option<&OffsetToken>) -> bool,
    {
        let interval = self.client.options.commit_poll_interval;
        let wait = async {
            loop {
                let latest = self.latest_committed_offset_token().await?;
                if predicate(latest.as_ref()) {
                    return Ok(latest);
                }

                tokio::time::sleep(interval).await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => CommitWaitTimeoutSnafu {
                channel: self.inner.name.clone(),
                timeout,
                latest: self.inner.tracker.committed_offset_token(),
            }
            .fail(),
        }
    }

    /// Uploads pending rows and waits until all of them are committed.
    ///
    /// The channel is closed and released even if this fails. Closing a
    /// closed channel does nothing.
    pub async fn close(&self) -> Result<()> {
        self.client.close_channel(&self.inner).await
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("status", &self.inner.status)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.inner.close_now() {
            return;
        }

        let pending_rows = self.inner.tracker.uncommitted_rows();
        if pending_rows > 0 {
            warn!(
                channel = %self.inner.name,
                pending_rows,
                "channel dropped without closing, rows may not be committed"
            );
        } else {
            debug!(channel = %self.inner.name, "channel dropped");
        }

        self.client.release_channel(&self.inner);
    }
}

#[cfg(test)]
mod tests {
    use crate::{error::IngestError, test_utils::channel_inner};

    #[test]
    fn test_invalidation_keeps_first_reason() {
        let channel = channel_inner(0, "c1");
        assert!(channel.ensure_open().is_ok());
        assert!(channel.invalidation().is_none());

        channel.invalidate("batch rejected");
        channel.invalidate("reopened");

        let err = channel.ensure_open().unwrap_err();
        let IngestError::ChannelInvalidated { message, .. } = err else {
            panic!("expected invalidated channel, got {err:?}");
        };
        assert_eq!(message, "batch rejected");
    }

    #[test]
    fn test_close_transitions() {
        let channel = channel_inner(0, "c1");
        assert!(channel.begin_close());
        assert!(!channel.begin_close());
        assert!(!channel.close_now());
        assert!(channel.is_closed());
        assert!(matches!(
            channel.ensure_open(),
            Err(IngestError::ChannelClosed { .. })
        ));

        channel.finish_close();
        assert!(channel.is_closed());

        let other = channel_inner(1, "c2");
        assert!(other.close_now());
        assert!(!other.begin_close());
    }
}
