#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use sluice_ingest_core::{ClientOptions, IngestClient};
use sluice_resources::{ColumnSchema, ColumnType, PipeName, PipeSchema, Row};
use sluice_service::{
    AppendRowsRequest, AppendRowsResponse, ChannelStatusRequest, ChannelStatusResponse,
    CommitState, DropChannelRequest, DropChannelResponse, InMemoryIngestService, IngestService,
    OpenChannelRequest, OpenChannelResponse, ServiceError,
};

pub const DATABASE: &str = "MY_DATABASE";
pub const SCHEMA: &str = "MY_SCHEMA";
pub const PIPE: &str = "MY_PIPE";

pub fn pipe() -> PipeName {
    PipeName::from_parts(DATABASE, SCHEMA, PIPE).expect("pipe name")
}

pub fn schema() -> PipeSchema {
    PipeSchema::new(vec![
        ColumnSchema::new("c1", ColumnType::Integer).not_null(),
        ColumnSchema::new("c2", ColumnType::Text),
    ])
}

/// The row ingested by the example flow: `c1` is the row number, `c2` its text.
pub fn example_row(i: u64) -> Row {
    Row::new().with("c1", i).with("c2", i.to_string())
}

pub fn create_service(commit_delay: Duration) -> Arc<InMemoryIngestService> {
    let service = InMemoryIngestService::new().with_commit_delay(commit_delay);
    service.create_pipe(pipe(), schema()).expect("create_pipe");
    Arc::new(service)
}

pub fn create_client(service: Arc<dyn IngestService>, options: ClientOptions) -> IngestClient {
    create_named_client("MY_CLIENT", service, options)
}

pub fn create_named_client(
    name: &str,
    service: Arc<dyn IngestService>,
    options: ClientOptions,
) -> IngestClient {
    IngestClient::builder(name, DATABASE, SCHEMA, PIPE)
        .with_service(service)
        .with_options(options)
        .build()
        .expect("build client")
}

/// A service that reports scripted commit states and records uploaded batches.
///
/// Every status request pops the next scripted state; once the script is
/// exhausted the last state is repeated. Everything else is delegated to an
/// in-memory service.
pub struct ScriptedService {
    inner: Arc<InMemoryIngestService>,
    script: Mutex<VecDeque<CommitState>>,
    last_state: Mutex<Option<CommitState>>,
    status_calls: AtomicUsize,
    batches: Mutex<Vec<usize>>,
    append_error: Mutex<Option<ServiceError>>,
}

impl ScriptedService {
    pub fn new(inner: Arc<InMemoryIngestService>) -> Self {
        Self {
            inner,
            script: Mutex::default(),
            last_state: Mutex::default(),
            status_calls: AtomicUsize::new(0),
            batches: Mutex::default(),
            append_error: Mutex::default(),
        }
    }

    pub fn with_script(self, states: impl IntoIterator<Item = CommitState>) -> Self {
        self.script.lock().unwrap().extend(states);
        self
    }

    /// Rejects every append with `error`.
    pub fn reject_appends(&self, error: ServiceError) {
        *self.append_error.lock().unwrap() = Some(error);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of rows of each accepted batch, in upload order.
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestService for ScriptedService {
    async fn open_channel(
        &self,
        request: OpenChannelRequest,
    ) -> sluice_service::Result<OpenChannelResponse> {
        self.inner.open_channel(request).await
    }

    async fn append_rows(
        &self,
        request: AppendRowsRequest,
    ) -> sluice_service::Result<AppendRowsResponse> {
        if let Some(error) = self.append_error.lock().unwrap().clone() {
            return Err(error);
        }

        let num_rows = request.rows.len();
        let response = self.inner.append_rows(request).await?;
        if !response.duplicate {
            self.batches.lock().unwrap().push(num_rows);
        }
        Ok(response)
    }

    async fn channel_status(
        &self,
        request: ChannelStatusRequest,
    ) -> sluice_service::Result<ChannelStatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut response = self.inner.channel_status(request).await?;

        let next = self.script.lock().unwrap().pop_front();
        let mut last_state = self.last_state.lock().unwrap();
        if let Some(state) = next {
            *last_state = Some(state);
        }

        if let Some(state) = last_state.as_ref() {
            for status in response.channels.iter_mut() {
                status.committed = state.clone();
            }
        }

        Ok(response)
    }

    async fn drop_channel(
        &self,
        request: DropChannelRequest,
    ) -> sluice_service::Result<DropChannelResponse> {
        self.inner.drop_channel(request).await
    }
}
