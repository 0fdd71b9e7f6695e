//! The ingestion client: owns the service connection, the background
//! flusher and the registry of open channels.
use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, Entry};
use futures::{StreamExt, stream::FuturesUnordered};
use snafu::{OptionExt, ResultExt};
use sluice_push_client::HttpIngestService;
use sluice_resources::{ChannelName, ClientName, OffsetToken, PipeName, Profile, Row};
use sluice_service::{
    ChannelStatus, ChannelStatusRequest, DropChannelRequest, IngestService, OpenChannelRequest,
    OpenChannelStatus,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    batcher::metrics::IngestionMetrics,
    channel::{Channel, ChannelId, ChannelInner},
    error::{
        ChannelCloseFailure, ClientClosedSnafu, CloseChannelsSnafu, ConfigurationSnafu,
        DuplicateChannelSnafu, IncompleteFlushSnafu, IngestError, InternalSnafu,
        InvalidNameSnafu, InvalidRowSnafu, ProfileSnafu, Result, ServiceSnafu,
    },
    flusher::{Flusher, FlusherClient, ReleaseBarrier, run_background_flusher},
    options::ClientOptions,
    uploader::BatchUploader,
};

/// A client ingesting rows into one pipe through any number of channels.
///
/// Dropping the client stops its background flusher: rows that were not
/// uploaded yet are lost. Call [`IngestClient::close`] to drain channels first.
pub struct IngestClient {
    inner: Arc<ClientInner>,
    ct: CancellationToken,
    flusher_task: Mutex<Option<JoinHandle<()>>>,
}

/// Configures and builds an [`IngestClient`].
pub struct IngestClientBuilder {
    client: String,
    database: String,
    schema: String,
    pipe: String,
    profile: Option<Profile>,
    profile_path: Option<PathBuf>,
    options: Option<ClientOptions>,
    service: Option<Arc<dyn IngestService>>,
}

pub(crate) struct ClientInner {
    pub name: ClientName,
    pub pipe: PipeName,
    pub options: ClientOptions,
    service: Arc<dyn IngestService>,
    flusher: FlusherClient,
    metrics: Arc<IngestionMetrics>,
    channels: DashMap<ChannelName, ChannelEntry>,
    next_channel_id: AtomicU64,
    closed: AtomicBool,
}

/// State of a channel name in the client registry.
#[derive(Clone)]
enum ChannelEntry {
    /// The channel is being opened.
    Opening,
    Open(Arc<ChannelInner>),
    /// A released handle still has batches to upload. The name can be
    /// reopened once the barrier resolves.
    Releasing {
        id: ChannelId,
        released: ReleaseBarrier,
    },
}

/// Removes a channel reservation unless the channel was opened.
struct ChannelSlot<'a> {
    channels: &'a DashMap<ChannelName, ChannelEntry>,
    name: ChannelName,
    filled: bool,
}

impl IngestClient {
    pub fn builder(
        client: impl Into<String>,
        database: impl Into<String>,
        schema: impl Into<String>,
        pipe: impl Into<String>,
    ) -> IngestClientBuilder {
        IngestClientBuilder {
            client: client.into(),
            database: database.into(),
            schema: schema.into(),
            pipe: pipe.into(),
            profile: None,
            profile_path: None,
            options: None,
            service: None,
        }
    }

    pub fn name(&self) -> &ClientName {
        &self.inner.name
    }

    pub fn pipe(&self) -> &PipeName {
        &self.inner.pipe
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Opens the channel, creating it on the service if needed.
    ///
    /// Fails with [`IngestError::DuplicateChannel`] if this client already
    /// has a handle to the channel.
    pub async fn open_channel(&self, name: &str) -> Result<(Channel, OpenChannelStatus)> {
        self.open(name, None).await
    }

    /// Opens the channel, starting from `offset_token` if the channel is new.
    pub async fn open_channel_with_offset_token(
        &self,
        name: &str,
        offset_token: OffsetToken,
    ) -> Result<(Channel, OpenChannelStatus)> {
        self.open(name, Some(offset_token)).await
    }

    async fn open(
        &self,
        name: &str,
        offset_token: Option<OffsetToken>,
    ) -> Result<(Channel, OpenChannelStatus)> {
        self.inner.ensure_open()?;

        let name = ChannelName::new(name, self.inner.pipe.clone())
            .context(InvalidNameSnafu { resource: "channel" })?;
        let mut slot = self.inner.reserve_channel(&name).await?;

        let response = self
            .inner
            .service
            .open_channel(OpenChannelRequest {
                client: self.inner.name.clone(),
                channel: name.clone(),
                offset_token,
            })
            .await
            .context(ServiceSnafu {
                operation: "open_channel",
            })?;

        // The client may have been closed while the channel was opening.
        self.inner.ensure_open()?;

        let status = response.status;
        let id = ChannelId(self.inner.next_channel_id.fetch_add(1, Ordering::Relaxed));
        let channel = Arc::new(ChannelInner::new(id, response));
        slot.fill(channel.clone());

        info!(
            client = %self.inner.name,
            channel = %channel.name,
            ?status,
            client_sequencer = channel.client_sequencer,
            committed_offset_token = ?channel.tracker.committed_offset_token().map(|token| token.to_string()),
            "channel opened"
        );

        Ok((Channel::new(channel, self.inner.clone()), status))
    }

    /// Releases the local handle of the channel, if any, without draining it
    /// and deletes the channel on the service.
    pub async fn drop_channel(&self, name: &str) -> Result<()> {
        self.inner.ensure_open()?;

        let name = ChannelName::new(name, self.inner.pipe.clone())
            .context(InvalidNameSnafu { resource: "channel" })?;

        if let Some(channel) = self.inner.registered_channel(&name) {
            if channel.close_now() {
                self.inner.release_channel(&channel);
            }
        }

        self.inner
            .service
            .drop_channel(DropChannelRequest {
                channel: name.clone(),
            })
            .await
            .context(ServiceSnafu {
                operation: "drop_channel",
            })?;

        info!(client = %self.inner.name, channel = %name, "channel dropped");

        Ok(())
    }

    /// Returns the latest committed offset token of each channel.
    pub async fn latest_committed_offset_tokens(
        &self,
        names: &[&str],
    ) -> Result<HashMap<ChannelName, Option<OffsetToken>>> {
        self.inner.ensure_open()?;

        let channels = names
            .iter()
            .map(|name| {
                ChannelName::new(*name, self.inner.pipe.clone())
                    .context(InvalidNameSnafu { resource: "channel" })
            })
            .collect::<Result<Vec<_>>>()?;

        let response = self
            .inner
            .service
            .channel_status(ChannelStatusRequest { channels })
            .await
            .context(ServiceSnafu {
                operation: "channel_status",
            })?;

        let tokens = response
            .channels
            .into_iter()
            .map(|status| {
                let token = match self.inner.registered_channel(&status.channel) {
                    Some(channel) => {
                        self.inner.observe_status(&channel, status.clone());
                        channel.tracker.committed_offset_token()
                    }
                    None => status.committed.offset_token,
                };
                (status.channel, token)
            })
            .collect();

        Ok(tokens)
    }

    /// Closes every open channel, then stops the background flusher.
    ///
    /// All channels are closed even if some fail; failures are reported
    /// together. Closing a closed client does nothing.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let channels = self
            .inner
            .channels
            .iter()
            .filter_map(|entry| match entry.value() {
                ChannelEntry::Open(channel) => Some(channel.clone()),
                ChannelEntry::Opening | ChannelEntry::Releasing { .. } => None,
            })
            .collect::<Vec<_>>();

        info!(client = %self.inner.name, num_channels = channels.len(), "closing client");

        let mut closing = channels
            .iter()
            .map(|channel| async move { (channel, self.inner.close_channel(channel).await) })
            .collect::<FuturesUnordered<_>>();

        let mut failures = Vec::new();
        while let Some((channel, result)) = closing.next().await {
            if let Err(error) = result {
                failures.push(ChannelCloseFailure {
                    channel: channel.name.clone(),
                    error,
                });
            }
        }

        self.ct.cancel();
        if let Some(task) = self.flusher_task.lock().await.take() {
            if let Err(error) = task.await {
                warn!(client = %self.inner.name, %error, "flusher task failed");
            }
        }

        if !failures.is_empty() {
            failures.sort_by(|a, b| a.channel.name().cmp(&b.channel.name()));
            return CloseChannelsSnafu { failures }.fail();
        }

        info!(client = %self.inner.name, "client closed");

        Ok(())
    }
}

impl fmt::Debug for IngestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestClient")
            .field("name", &self.inner.name)
            .field("pipe", &self.inner.pipe)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for IngestClient {
    fn drop(&mut self) {
        if !self.ct.is_cancelled() {
            debug!(client = %self.inner.name, "client dropped, stopping flusher");
        }
        self.inner.closed.store(true, Ordering::Release);
        self.ct.cancel();
    }
}

impl IngestClientBuilder {
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Reads the profile from a JSON file when the client is built.
    pub fn with_profile_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_path = Some(path.into());
        self
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Uses this service instead of the HTTP service described by the profile.
    pub fn with_service(mut self, service: Arc<dyn IngestService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Builds the client and spawns its background flusher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<IngestClient> {
        let name =
            ClientName::new(self.client).context(InvalidNameSnafu { resource: "client" })?;
        let pipe = PipeName::from_parts(self.database, self.schema, self.pipe)
            .context(InvalidNameSnafu { resource: "pipe" })?;

        let profile = match (self.profile, self.profile_path) {
            (Some(profile), _) => Some(profile),
            (None, Some(path)) => Some(Profile::from_file(path).context(ProfileSnafu {})?),
            (None, None) => None,
        };

        let mut options = self.options.unwrap_or_default();
        if let Some(profile) = &profile {
            options = options.with_profile_overrides(profile);
        }
        options.validate()?;

        let service: Arc<dyn IngestService> = match (self.service, &profile) {
            (Some(service), _) => service,
            (None, Some(profile)) => {
                let service = HttpIngestService::from_profile(profile).map_err(|error| {
                    IngestError::Configuration {
                        message: snafu::Report::from_error(error).to_string(),
                    }
                })?;
                Arc::new(service)
            }
            (None, None) => {
                return ConfigurationSnafu {
                    message: "either a profile or an ingestion service is required",
                }
                .fail();
            }
        };

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            IngestError::Configuration {
                message: "the client must be built within a tokio runtime".to_string(),
            }
        })?;

        let metrics = Arc::new(IngestionMetrics::default());
        let uploader = BatchUploader::new(service.clone(), options.retry.clone(), metrics.clone());
        let flusher = Flusher::new(uploader, &options, metrics.clone());
        let flusher_client = flusher.client();

        let ct = CancellationToken::new();
        let flusher_task = runtime.spawn(run_background_flusher(flusher, ct.clone()));

        info!(client = %name, %pipe, "client created");

        let inner = ClientInner {
            name,
            pipe,
            options,
            service,
            flusher: flusher_client,
            metrics,
            channels: DashMap::new(),
            next_channel_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };

        Ok(IngestClient {
            inner: Arc::new(inner),
            ct,
            flusher_task: Mutex::new(Some(flusher_task)),
        })
    }
}

impl ClientInner {
    pub fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return ClientClosedSnafu {}.fail();
        }

        Ok(())
    }

    /// Reserves the name for a channel being opened.
    ///
    /// Waits while a released handle of the same channel is still uploading,
    /// so that its rows are accepted before the channel is reopened.
    async fn reserve_channel(&self, name: &ChannelName) -> Result<ChannelSlot<'_>> {
        loop {
            let (id, released) = match self.channels.entry(name.clone()) {
                Entry::Occupied(entry) => match entry.get() {
                    ChannelEntry::Releasing { id, released } => (*id, released.clone()),
                    ChannelEntry::Opening | ChannelEntry::Open(_) => {
                        return DuplicateChannelSnafu {
                            channel: name.clone(),
                        }
                        .fail();
                    }
                },
                Entry::Vacant(entry) => {
                    entry.insert(ChannelEntry::Opening);
                    return Ok(ChannelSlot {
                        channels: &self.channels,
                        name: name.clone(),
                        filled: false,
                    });
                }
            };

            debug!(channel = %name, "waiting for released channel to finish uploading");
            released.await;
            self.forget_released(name, id);
        }
    }

    fn registered_channel(&self, name: &ChannelName) -> Option<Arc<ChannelInner>> {
        self.channels
            .get(name)
            .and_then(|entry| match entry.value() {
                ChannelEntry::Open(channel) => Some(channel.clone()),
                ChannelEntry::Opening | ChannelEntry::Releasing { .. } => None,
            })
    }

    /// Removes the name of a released handle from the registry.
    fn forget_released(&self, name: &ChannelName, id: ChannelId) {
        self.channels.remove_if(name, |_, entry| {
            matches!(entry, ChannelEntry::Releasing { id: released, .. } if *released == id)
        });
    }

    pub async fn append(
        &self,
        channel: &Arc<ChannelInner>,
        rows: Vec<Row>,
        offset_token: OffsetToken,
    ) -> Result<()> {
        self.ensure_open()?;
        channel.ensure_open()?;

        if rows.is_empty() {
            return Ok(());
        }

        for (index, row) in rows.iter().enumerate() {
            if let Err(error) = channel.schema.validate_row(row) {
                self.metrics.rejected_rows.add(rows.len() as u64, &[]);
                return Err(error).context(InvalidRowSnafu {
                    channel: channel.name.clone(),
                    index,
                });
            }
        }

        let num_rows = rows.len() as u64;
        let size_bytes = rows.iter().map(|row| row.encoded_size() as u64).sum();

        self.flusher
            .append(channel.clone(), rows, offset_token.clone(), size_bytes)
            .await?;

        channel.tracker.record_appended(num_rows, offset_token);
        self.metrics.appended_rows.add(num_rows, &[]);

        Ok(())
    }

    pub async fn flush_channel(&self, channel: &Arc<ChannelInner>) -> Result<()> {
        if let Some(error) = channel.invalidation() {
            return Err(error);
        }

        self.flusher.flush(channel.clone()).await
    }

    /// Fetches the commit state of the channel and returns its latest
    /// committed offset token.
    pub async fn refresh_commit_state(
        &self,
        channel: &Arc<ChannelInner>,
    ) -> Result<Option<OffsetToken>> {
        let response = self
            .service
            .channel_status(ChannelStatusRequest {
                channels: vec![channel.name.clone()],
            })
            .await
            .context(ServiceSnafu {
                operation: "channel_status",
            })?;

        let status = response
            .channels
            .into_iter()
            .find(|status| status.channel == channel.name)
            .with_context(|| InternalSnafu {
                message: format!("status of channel {} missing from response", channel.name),
            })?;

        self.observe_status(channel, status);

        Ok(channel.tracker.committed_offset_token())
    }

    fn observe_status(&self, channel: &ChannelInner, status: ChannelStatus) {
        if status.client_sequencer != channel.client_sequencer {
            channel.invalidate(format!(
                "channel was reopened by another client (client sequencer {} > {})",
                status.client_sequencer, channel.client_sequencer
            ));
            return;
        }

        if channel.tracker.observe_commit(status.committed) {
            debug!(
                channel = %channel.name,
                committed_row_sequencer = channel.tracker.committed_row_sequencer(),
                "commit state advanced"
            );
        }
    }

    /// Closes the channel after waiting for its rows to be committed.
    pub async fn close_channel(self: &Arc<Self>, channel: &Arc<ChannelInner>) -> Result<()> {
        if !channel.begin_close() {
            return Ok(());
        }

        let result = self.drain_channel(channel).await;
        channel.finish_close();
        self.release_channel(channel);

        match &result {
            Ok(()) => info!(
                channel = %channel.name,
                committed_offset_token = ?channel.tracker.committed_offset_token().map(|token| token.to_string()),
                "channel closed"
            ),
            Err(error) => warn!(channel = %channel.name, %error, "channel closed with uncommitted rows"),
        }

        result
    }

    async fn drain_channel(&self, channel: &Arc<ChannelInner>) -> Result<()> {
        if let Err(error) = self.flush_channel(channel).await {
            return IncompleteFlushSnafu {
                channel: channel.name.clone(),
                pending_rows: channel.tracker.uncommitted_rows(),
                reason: snafu::Report::from_error(error).to_string(),
            }
            .fail();
        }

        let drain_timeout = self.options.drain_timeout;
        let poll_interval = self.options.commit_poll_interval;
        let wait_committed = async {
            loop {
                if let Some(error) = channel.invalidation() {
                    return Err(error);
                }

                self.refresh_commit_state(channel).await?;
                if channel.tracker.is_fully_committed() {
                    return Ok(());
                }

                tokio::time::sleep(poll_interval).await;
            }
        };

        let reason = match tokio::time::timeout(drain_timeout, wait_committed).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(error)) => snafu::Report::from_error(error).to_string(),
            Err(_) => format!("rows not committed after {drain_timeout:?}"),
        };

        IncompleteFlushSnafu {
            channel: channel.name.clone(),
            pending_rows: channel.tracker.uncommitted_rows(),
            reason,
        }
        .fail()
    }

    /// Unregisters the channel and lets the flusher upload what it buffered.
    ///
    /// The name stays reserved until those uploads are done, so a reopened
    /// handle never fences them out.
    pub fn release_channel(self: &Arc<Self>, channel: &Arc<ChannelInner>) {
        let released = self.flusher.release(channel.clone());

        let Some(mut entry) = self.channels.get_mut(&channel.name) else {
            return;
        };
        if !matches!(entry.value(), ChannelEntry::Open(registered) if registered.id == channel.id)
        {
            return;
        }
        *entry = ChannelEntry::Releasing {
            id: channel.id,
            released: released.clone(),
        };
        drop(entry);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = Arc::downgrade(self);
        let name = channel.name.clone();
        let id = channel.id;
        runtime.spawn(async move {
            released.await;
            if let Some(client) = client.upgrade() {
                client.forget_released(&name, id);
            }
        });
    }
}

impl ChannelSlot<'_> {
    fn fill(&mut self, channel: Arc<ChannelInner>) {
        self.channels
            .insert(self.name.clone(), ChannelEntry::Open(channel));
        self.filled = true;
    }
}

impl Drop for ChannelSlot<'_> {
    fn drop(&mut self) {
        if !self.filled {
            self.channels
                .remove_if(&self.name, |_, entry| matches!(entry, ChannelEntry::Opening));
        }
    }
}
