//! In-memory implementation of the ingestion service.
//!
//! This implementation stores all data in memory and is suitable for testing
//! and development. Accepted batches become committed after a configurable
//! delay, which mimics the asynchronous commit of the real service.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use sluice_resources::{ChannelName, OffsetToken, PipeName, PipeSchema, Row};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{
    AppendRowsRequest, AppendRowsResponse, ChannelStatus, ChannelStatusRequest,
    ChannelStatusResponse, CommitState, DropChannelRequest, DropChannelResponse, IngestService,
    OpenChannelRequest, OpenChannelResponse, OpenChannelStatus,
    error::{Result, ServiceError},
};

/// In-memory ingestion service.
#[derive(Debug, Default)]
pub struct InMemoryIngestService {
    /// Map of pipe name to the pipe's schema.
    pipes: DashMap<PipeName, PipeSchema>,
    /// Map of channel name to its log.
    channels: DashMap<ChannelName, ChannelLog>,
    /// Delay between accepting a batch and committing it.
    commit_delay: Duration,
    /// Number of upcoming appends to reject as unavailable.
    append_failures: AtomicUsize,
}

#[derive(Debug)]
struct ChannelLog {
    client_sequencer: u64,
    last_batch_sequencer: Option<u64>,
    accepted_row_sequencer: u64,
    committed: CommitState,
    pending: VecDeque<PendingCommit>,
    committed_rows: Vec<Row>,
}

#[derive(Debug)]
struct PendingCommit {
    ready_at: Instant,
    row_sequencer: u64,
    offset_token: OffsetToken,
    rows: Vec<Row>,
}

impl InMemoryIngestService {
    /// Create a new in-memory service that commits batches immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit accepted batches only after `delay` has elapsed.
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = delay;
        self
    }

    /// Registers a pipe and the schema its rows must follow.
    pub fn create_pipe(&self, pipe: PipeName, schema: PipeSchema) -> Result<()> {
        match self.pipes.entry(pipe) {
            dashmap::Entry::Occupied(entry) => Err(ServiceError::InvalidRequest {
                message: format!("pipe {} already exists", entry.key()),
            }),
            dashmap::Entry::Vacant(entry) => {
                debug!(pipe = %entry.key(), "created pipe");
                entry.insert(schema);
                Ok(())
            }
        }
    }

    /// Rejects the next `count` appends with [`ServiceError::Unavailable`].
    pub fn fail_next_appends(&self, count: usize) {
        self.append_failures.store(count, Ordering::SeqCst);
    }

    /// Returns the rows committed to the channel, in order.
    pub fn committed_rows(&self, channel: &ChannelName) -> Vec<Row> {
        let now = Instant::now();
        self.channels
            .get_mut(channel)
            .map(|mut log| {
                log.promote(now);
                log.committed_rows.clone()
            })
            .unwrap_or_default()
    }

    fn take_injected_failure(&self) -> bool {
        self.append_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ChannelLog {
    fn new(offset_token: Option<OffsetToken>) -> Self {
        Self {
            client_sequencer: 0,
            last_batch_sequencer: None,
            accepted_row_sequencer: 0,
            committed: CommitState {
                offset_token,
                row_sequencer: 0,
            },
            pending: VecDeque::new(),
            committed_rows: Vec::new(),
        }
    }

    /// Commits all pending batches that are due.
    fn promote(&mut self, now: Instant) {
        while self
            .pending
            .front()
            .is_some_and(|pending| pending.ready_at <= now)
        {
            let Some(pending) = self.pending.pop_front() else {
                break;
            };

            self.committed = CommitState {
                offset_token: Some(pending.offset_token),
                row_sequencer: pending.row_sequencer,
            };
            self.committed_rows.extend(pending.rows);
        }
    }

    fn status(&self, channel: ChannelName) -> ChannelStatus {
        ChannelStatus {
            channel,
            client_sequencer: self.client_sequencer,
            accepted_row_sequencer: self.accepted_row_sequencer,
            committed: self.committed.clone(),
        }
    }
}

#[async_trait]
impl IngestService for InMemoryIngestService {
    async fn open_channel(&self, request: OpenChannelRequest) -> Result<OpenChannelResponse> {
        trace!(?request, "InMemoryIngestService::open_channel");

        let schema = self
            .pipes
            .get(request.channel.pipe())
            .map(|schema| schema.clone())
            .ok_or_else(|| ServiceError::PipeNotFound {
                pipe: request.channel.pipe().clone(),
            })?;

        let now = Instant::now();
        let (status, mut log) = match self.channels.entry(request.channel.clone()) {
            dashmap::Entry::Occupied(entry) => {
                let mut log = entry.into_ref();
                log.client_sequencer += 1;
                log.last_batch_sequencer = None;
                (OpenChannelStatus::Reopened, log)
            }
            dashmap::Entry::Vacant(entry) => {
                let log = entry.insert(ChannelLog::new(request.offset_token));
                (OpenChannelStatus::Opened, log)
            }
        };

        log.promote(now);

        debug!(
            channel = %request.channel,
            client = %request.client,
            ?status,
            client_sequencer = log.client_sequencer,
            "opened channel"
        );

        Ok(OpenChannelResponse {
            channel: request.channel,
            status,
            client_sequencer: log.client_sequencer,
            accepted_row_sequencer: log.accepted_row_sequencer,
            committed: log.committed.clone(),
            schema,
        })
    }

    async fn append_rows(&self, request: AppendRowsRequest) -> Result<AppendRowsResponse> {
        trace!(
            channel = %request.channel,
            batch_sequencer = request.batch_sequencer,
            num_rows = request.rows.len(),
            "InMemoryIngestService::append_rows"
        );

        if self.take_injected_failure() {
            return Err(ServiceError::Unavailable {
                message: "injected failure".to_string(),
            });
        }

        if request.rows.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "batch contains no rows".to_string(),
            });
        }

        let schema = self
            .pipes
            .get(request.channel.pipe())
            .map(|schema| schema.clone())
            .ok_or_else(|| ServiceError::PipeNotFound {
                pipe: request.channel.pipe().clone(),
            })?;

        let mut log =
            self.channels
                .get_mut(&request.channel)
                .ok_or_else(|| ServiceError::ChannelNotFound {
                    channel: request.channel.clone(),
                })?;

        if request.client_sequencer < log.client_sequencer {
            return Err(ServiceError::StaleChannel {
                channel: request.channel.clone(),
                client_sequencer: request.client_sequencer,
                current_sequencer: log.client_sequencer,
            });
        }

        if request.client_sequencer > log.client_sequencer {
            return Err(ServiceError::InvalidRequest {
                message: format!(
                    "unknown client sequencer {} for channel {}",
                    request.client_sequencer, request.channel
                ),
            });
        }

        if log
            .last_batch_sequencer
            .is_some_and(|last| request.batch_sequencer <= last)
        {
            debug!(
                channel = %request.channel,
                batch_sequencer = request.batch_sequencer,
                "ignoring duplicate batch"
            );
            return Ok(AppendRowsResponse {
                accepted_row_sequencer: log.accepted_row_sequencer,
                duplicate: true,
            });
        }

        for (index, row) in request.rows.iter().enumerate() {
            if let Err(err) = schema.validate_row(row) {
                return Err(ServiceError::InvalidRequest {
                    message: format!("row {index} is invalid: {err}"),
                });
            }
        }

        let now = Instant::now();
        log.last_batch_sequencer = Some(request.batch_sequencer);
        log.accepted_row_sequencer += request.rows.len() as u64;
        let accepted_row_sequencer = log.accepted_row_sequencer;

        log.pending.push_back(PendingCommit {
            ready_at: now + self.commit_delay,
            row_sequencer: accepted_row_sequencer,
            offset_token: request.offset_token,
            rows: request.rows,
        });
        log.promote(now);

        Ok(AppendRowsResponse {
            accepted_row_sequencer,
            duplicate: false,
        })
    }

    async fn channel_status(
        &self,
        request: ChannelStatusRequest,
    ) -> Result<ChannelStatusResponse> {
        let now = Instant::now();
        let mut channels = Vec::with_capacity(request.channels.len());

        for channel in request.channels {
            let Some(mut log) = self.channels.get_mut(&channel) else {
                return Err(ServiceError::ChannelNotFound { channel });
            };

            log.promote(now);
            channels.push(log.status(channel));
        }

        Ok(ChannelStatusResponse { channels })
    }

    async fn drop_channel(&self, request: DropChannelRequest) -> Result<DropChannelResponse> {
        match self.channels.remove(&request.channel) {
            Some((channel, _)) => {
                debug!(%channel, "dropped channel");
                Ok(DropChannelResponse { channel })
            }
            None => Err(ServiceError::ChannelNotFound {
                channel: request.channel,
            }),
        }
    }
}
