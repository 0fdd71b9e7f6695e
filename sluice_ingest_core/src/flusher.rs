//! Background task uploading the rows of every channel of a client.
//!
//! The flusher owns all row buffers. Channels send it commands through a
//! bounded queue, which is where `append_row` applies backpressure. Batches
//! of a channel are uploaded one at a time and in order, so the service
//! always receives increasing batch sequencers.
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use futures::{
    FutureExt, StreamExt,
    future::{BoxFuture, Shared},
    stream::FuturesUnordered,
};
use sluice_resources::{OffsetToken, Row};
use sluice_service::{AppendRowsResponse, ServiceError};
use tokio::sync::{mpsc, oneshot};
use tokio_util::{sync::CancellationToken, time::DelayQueue};
use tracing::{debug, info, warn};

use crate::{
    batch::{FlushReplySender, RowBatch},
    batcher::{ChannelBatcher, metrics::IngestionMetrics},
    channel::{ChannelId, ChannelInner},
    error::{ClientClosedSnafu, IngestError, Result},
    options::ClientOptions,
    uploader::BatchUploader,
};

pub struct Flusher {
    tx: mpsc::Sender<FlusherCommand>,
    rx: mpsc::Receiver<FlusherCommand>,
    uploader: BatchUploader,
    batcher: ChannelBatcher,
    metrics: Arc<IngestionMetrics>,
}

#[derive(Clone)]
pub struct FlusherClient {
    tx: mpsc::Sender<FlusherCommand>,
}

/// Resolves once a released channel has no batch left to upload, or the
/// flusher stopped.
pub type ReleaseBarrier = Shared<BoxFuture<'static, ()>>;

pub enum FlusherCommand {
    Append {
        channel: Arc<ChannelInner>,
        rows: Vec<Row>,
        offset_token: OffsetToken,
        size_bytes: u64,
    },
    /// Cut the channel's buffer and reply once everything sent so far is uploaded.
    Flush {
        channel: Arc<ChannelInner>,
        reply: FlushReplySender,
    },
    /// Upload what is buffered, then forget the channel and notify `done`.
    Release {
        channel: Arc<ChannelInner>,
        done: oneshot::Sender<()>,
    },
}

pub async fn run_background_flusher(flusher: Flusher, ct: CancellationToken) {
    flusher.run(ct).await
}

/// Upload progress of a channel handle.
struct ChannelUploads {
    channel: Arc<ChannelInner>,
    next_batch_sequencer: u64,
    queue: VecDeque<(u64, RowBatch)>,
    in_flight: bool,
    last_enqueued: Option<u64>,
    last_uploaded: Option<u64>,
    /// Flush replies, with the batch sequencer they wait for.
    waiters: Vec<(u64, FlushReplySender)>,
    failure: Option<IngestError>,
    /// Set once the handle is released, notified when the channel is idle.
    released: Option<oneshot::Sender<()>>,
}

struct UploadOutcome {
    id: ChannelId,
    batch_sequencer: u64,
    size_bytes: u64,
    result: std::result::Result<AppendRowsResponse, ServiceError>,
}

struct FlusherState {
    batcher: ChannelBatcher,
    timers: DelayQueue<ChannelId>,
    channels: HashMap<ChannelId, ChannelUploads>,
    uploads: FuturesUnordered<BoxFuture<'static, UploadOutcome>>,
    uploader: BatchUploader,
    metrics: Arc<IngestionMetrics>,
}

impl Flusher {
    pub fn new(
        uploader: BatchUploader,
        options: &ClientOptions,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity);
        Self {
            tx,
            rx,
            uploader,
            batcher: ChannelBatcher::new(options),
            metrics,
        }
    }

    pub fn client(&self) -> FlusherClient {
        FlusherClient {
            tx: self.tx.clone(),
        }
    }

    async fn run(self, ct: CancellationToken) {
        let _ct_guard = ct.child_token().drop_guard();
        let Flusher {
            tx,
            mut rx,
            uploader,
            batcher,
            metrics,
        } = self;
        // only clients keep the queue open
        drop(tx);

        let mut state = FlusherState::new(batcher, uploader, metrics);

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    break;
                }
                expired = state.timers.next(), if !state.timers.is_empty() => {
                    let Some(entry) = expired else {
                        continue;
                    };

                    let Some(batch) = state.batcher.take(entry.into_inner()) else {
                        continue;
                    };

                    state.enqueue(batch);
                }
                command = rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };

                    state.handle_command(command);
                }
                outcome = state.uploads.next(), if !state.uploads.is_empty() => {
                    let Some(outcome) = outcome else {
                        continue;
                    };

                    state.complete_upload(outcome);
                }
            }
        }

        state.shutdown();
    }
}

impl FlusherClient {
    pub async fn append(
        &self,
        channel: Arc<ChannelInner>,
        rows: Vec<Row>,
        offset_token: OffsetToken,
        size_bytes: u64,
    ) -> Result<()> {
        self.send(FlusherCommand::Append {
            channel,
            rows,
            offset_token,
            size_bytes,
        })
        .await
    }

    pub async fn flush(&self, channel: Arc<ChannelInner>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(FlusherCommand::Flush { channel, reply: tx })
            .await?;

        rx.await.or_else(|_| ClientClosedSnafu {}.fail())?
    }

    /// Asks the flusher to upload what the channel buffered and forget it.
    ///
    /// Does not wait. The returned barrier resolves once the last batch of
    /// the channel is uploaded or rejected.
    pub fn release(&self, channel: Arc<ChannelInner>) -> ReleaseBarrier {
        let (done, released) = oneshot::channel::<()>();
        let barrier = released.map(|_| ()).boxed().shared();

        match self.tx.try_send(FlusherCommand::Release { channel, done }) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                // Queue full: deliver the release in the background.
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        let tx = self.tx.clone();
                        runtime.spawn(async move {
                            let _ = tx.send(command).await;
                        });
                    }
                    Err(_) => debug!("no runtime to queue channel release"),
                }
            }
        }

        barrier
    }

    async fn send(&self, command: FlusherCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .or_else(|_| ClientClosedSnafu {}.fail())
    }
}

impl FlusherState {
    fn new(batcher: ChannelBatcher, uploader: BatchUploader, metrics: Arc<IngestionMetrics>) -> Self {
        Self {
            batcher,
            timers: DelayQueue::new(),
            channels: HashMap::new(),
            uploads: FuturesUnordered::new(),
            uploader,
            metrics,
        }
    }

    fn handle_command(&mut self, command: FlusherCommand) {
        match command {
            FlusherCommand::Append {
                channel,
                rows,
                offset_token,
                size_bytes,
            } => {
                if self.channel_uploads(&channel).failure.is_some() {
                    warn!(
                        channel = %channel.name,
                        num_rows = rows.len(),
                        "discarding rows of invalid channel"
                    );
                    return;
                }

                if let Some(batch) =
                    self.batcher
                        .write(&channel, rows, offset_token, size_bytes, &mut self.timers)
                {
                    self.enqueue(batch);
                }
            }
            FlusherCommand::Flush { channel, reply } => {
                if let Some(batch) = self.batcher.take(channel.id) {
                    self.enqueue(batch);
                }

                let uploads = self.channel_uploads(&channel);
                if let Some(failure) = &uploads.failure {
                    let _ = reply.send(Err(failure.clone()));
                    return;
                }

                match uploads.last_enqueued {
                    Some(target) if uploads.last_uploaded < Some(target) => {
                        uploads.waiters.push((target, reply));
                    }
                    _ => {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            FlusherCommand::Release { channel, done } => {
                if let Some(batch) = self.batcher.take(channel.id) {
                    self.enqueue(batch);
                }

                self.channel_uploads(&channel).released = Some(done);
                self.remove_if_idle(channel.id);
            }
        }
    }

    fn channel_uploads(&mut self, channel: &Arc<ChannelInner>) -> &mut ChannelUploads {
        self.channels
            .entry(channel.id)
            .or_insert_with(|| ChannelUploads::new(channel.clone()))
    }

    fn enqueue(&mut self, batch: RowBatch) {
        // Try to remove the lag timer, it may have already fired.
        self.timers.try_remove(&batch.timer_key);

        let id = batch.channel.id;
        let uploads = self.channel_uploads(&batch.channel);
        if uploads.failure.is_some() {
            warn!(
                channel = %batch.channel.name,
                num_rows = batch.num_rows(),
                "discarding batch of invalid channel"
            );
            return;
        }

        let batch_sequencer = uploads.next_batch_sequencer;
        uploads.next_batch_sequencer += 1;
        uploads.last_enqueued = Some(batch_sequencer);

        debug!(
            channel = %batch.channel.name,
            batch_sequencer,
            num_rows = batch.num_rows(),
            size_bytes = batch.size_bytes,
            offset_token = %batch.offset_token,
            "batch cut"
        );

        uploads.queue.push_back((batch_sequencer, batch));
        self.start_next_upload(id);
    }

    fn start_next_upload(&mut self, id: ChannelId) {
        let Some(uploads) = self.channels.get_mut(&id) else {
            return;
        };

        if uploads.in_flight {
            return;
        }

        let Some((batch_sequencer, batch)) = uploads.queue.pop_front() else {
            return;
        };

        uploads.in_flight = true;
        let uploader = self.uploader.clone();
        let size_bytes = batch.size_bytes;
        let request = batch.into_request(batch_sequencer);

        self.uploads.push(
            async move {
                let result = uploader.upload(request).await;
                UploadOutcome {
                    id,
                    batch_sequencer,
                    size_bytes,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn complete_upload(&mut self, outcome: UploadOutcome) {
        let id = outcome.id;
        let Some(uploads) = self.channels.get_mut(&id) else {
            return;
        };

        uploads.in_flight = false;

        match outcome.result {
            Ok(response) => {
                uploads
                    .channel
                    .tracker
                    .record_accepted(response.accepted_row_sequencer);
                uploads.last_uploaded = Some(outcome.batch_sequencer);

                if !response.duplicate {
                    self.metrics.uploaded_batches.add(1, &[]);
                    self.metrics.uploaded_bytes.add(outcome.size_bytes, &[]);
                }

                let (done, pending) = std::mem::take(&mut uploads.waiters)
                    .into_iter()
                    .partition::<Vec<_>, _>(|(target, _)| *target <= outcome.batch_sequencer);
                uploads.waiters = pending;
                for (_, reply) in done {
                    let _ = reply.send(Ok(()));
                }

                self.start_next_upload(id);
            }
            Err(error) => {
                self.fail_channel(id, error);
            }
        }

        self.remove_if_idle(id);
    }

    /// Invalidates the channel after an upload failed for good.
    fn fail_channel(&mut self, id: ChannelId, error: ServiceError) {
        let Some(uploads) = self.channels.get_mut(&id) else {
            return;
        };

        let channel = uploads.channel.clone();
        let message = match &error {
            ServiceError::StaleChannel { .. } => {
                format!("channel was reopened by another client: {error}")
            }
            _ => format!("batch upload failed: {error}"),
        };

        let mut dropped_rows = uploads
            .queue
            .drain(..)
            .map(|(_, batch)| batch.num_rows())
            .sum::<usize>();

        let failure = channel.invalidate(message);
        for (_, reply) in uploads.waiters.drain(..) {
            let _ = reply.send(Err(failure.clone()));
        }
        uploads.failure = Some(failure);

        if let Some(batch) = self.batcher.take(id) {
            self.timers.try_remove(&batch.timer_key);
            dropped_rows += batch.num_rows();
        }

        warn!(
            channel = %channel.name,
            %error,
            dropped_rows,
            "batch upload failed, channel invalidated"
        );
    }

    fn remove_if_idle(&mut self, id: ChannelId) {
        let Some(uploads) = self.channels.get(&id) else {
            return;
        };

        if uploads.released.is_none() || uploads.in_flight || !uploads.queue.is_empty() {
            return;
        }

        debug!(channel = %uploads.channel.name, "channel released");
        if let Some(done) = self.channels.remove(&id).and_then(|uploads| uploads.released) {
            let _ = done.send(());
        }
    }

    fn shutdown(&mut self) {
        let buffered_rows = self.batcher.buffered_rows();
        let queued_rows = self
            .channels
            .values()
            .flat_map(|uploads| uploads.queue.iter())
            .map(|(_, batch)| batch.num_rows())
            .sum::<usize>();
        let in_flight_batches = self.uploads.len();

        for uploads in self.channels.values_mut() {
            for (_, reply) in uploads.waiters.drain(..) {
                let _ = reply.send(ClientClosedSnafu {}.fail());
            }
        }

        if buffered_rows + queued_rows + in_flight_batches > 0 {
            warn!(
                buffered_rows,
                queued_rows, in_flight_batches, "flusher stopped before uploading all rows"
            );
        } else {
            info!("flusher stopped");
        }
    }
}

impl ChannelUploads {
    fn new(channel: Arc<ChannelInner>) -> Self {
        Self {
            channel,
            next_batch_sequencer: 0,
            queue: VecDeque::new(),
            in_flight: false,
            last_enqueued: None,
            last_uploaded: None,
            waiters: Vec::new(),
            failure: None,
            released: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sluice_resources::{ChannelName, ClientName};
    use sluice_service::{InMemoryIngestService, IngestService, OpenChannelRequest};
    use tokio::time::Instant;

    use super::*;
    use crate::{
        options::RetryPolicy,
        test_utils::{LogBuffer, channel_inner, example_row, pipe, schema},
    };

    fn uploader(service: Arc<InMemoryIngestService>) -> BatchUploader {
        BatchUploader::new(
            service,
            RetryPolicy::none(),
            Arc::new(IngestionMetrics::default()),
        )
    }

    async fn open_channel(service: &InMemoryIngestService, id: u64) -> Arc<ChannelInner> {
        let response = service
            .open_channel(OpenChannelRequest {
                client: ClientName::new("MY_CLIENT").unwrap(),
                channel: ChannelName::new("MY_CHANNEL", pipe()).unwrap(),
                offset_token: None,
            })
            .await
            .unwrap();
        Arc::new(ChannelInner::new(ChannelId(id), response))
    }

    #[tokio::test]
    async fn test_release_barrier_waits_for_buffered_rows() {
        tokio::time::pause();

        let service = Arc::new(InMemoryIngestService::new());
        service.create_pipe(pipe(), schema()).unwrap();
        let channel = open_channel(&service, 0).await;

        let options = ClientOptions::default().with_max_client_lag(Duration::from_secs(10));
        let flusher = Flusher::new(
            uploader(service.clone()),
            &options,
            Arc::new(IngestionMetrics::default()),
        );
        let client = flusher.client();
        let ct = CancellationToken::new();
        let task = tokio::spawn(run_background_flusher(flusher, ct.clone()));

        let start = Instant::now();
        let rows = (0..3).map(example_row).collect::<Vec<_>>();
        client
            .append(channel.clone(), rows, OffsetToken::from(2), 30)
            .await
            .unwrap();

        client.release(channel.clone()).await;

        assert!(start.elapsed() < options.max_client_lag);
        assert_eq!(service.committed_rows(&channel.name).len(), 3);

        ct.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_release_barrier_resolves_when_flusher_stops() {
        tokio::time::pause();

        let service = Arc::new(InMemoryIngestService::new());
        let flusher = Flusher::new(
            uploader(service),
            &ClientOptions::default(),
            Arc::new(IngestionMetrics::default()),
        );
        let client = flusher.client();

        let released = client.release(channel_inner(0, "MY_CHANNEL"));
        drop(flusher);

        let result = tokio::time::timeout(Duration::from_secs(1), released).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rows_of_invalid_channel_are_discarded_with_warning() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let options = ClientOptions::default();
        let mut state = FlusherState::new(
            ChannelBatcher::new(&options),
            uploader(Arc::new(InMemoryIngestService::new())),
            Arc::new(IngestionMetrics::default()),
        );

        let channel = channel_inner(0, "MY_CHANNEL");
        let failure = channel.invalidate("batch rejected");
        state.channel_uploads(&channel).failure = Some(failure);

        state.handle_command(FlusherCommand::Append {
            channel: channel.clone(),
            rows: vec![example_row(0)],
            offset_token: OffsetToken::from(0),
            size_bytes: 10,
        });

        assert_eq!(state.batcher.buffered_rows(), 0);
        let output = logs.contents();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("discarding rows of invalid channel"), "{output}");
    }
}
