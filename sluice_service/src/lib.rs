//! The ingestion service interface.
//!
//! The client talks to the service exclusively through [`IngestService`]. The
//! HTTP implementation lives in `sluice_push_client`; [`InMemoryIngestService`]
//! is used for tests and local development.
pub mod error;
pub mod error_kind;
pub mod memory;
pub mod types;

use async_trait::async_trait;

pub use self::error::{Result, ServiceError};
pub use self::error_kind::ErrorKind;
pub use self::memory::InMemoryIngestService;
pub use self::types::*;

/// Operations offered by the ingestion service.
#[async_trait]
pub trait IngestService: Send + Sync + 'static {
    /// Opens a channel, creating it if it doesn't exist.
    ///
    /// Opening an existing channel bumps its client sequencer, invalidating
    /// previous handles.
    async fn open_channel(&self, request: OpenChannelRequest) -> Result<OpenChannelResponse>;

    /// Appends a batch of rows to the channel.
    ///
    /// Rows are committed asynchronously: the response only means the batch
    /// was accepted.
    async fn append_rows(&self, request: AppendRowsRequest) -> Result<AppendRowsResponse>;

    /// Returns the commit state of the requested channels.
    async fn channel_status(&self, request: ChannelStatusRequest)
    -> Result<ChannelStatusResponse>;

    /// Deletes the channel and its commit state.
    async fn drop_channel(&self, request: DropChannelRequest) -> Result<DropChannelResponse>;
}
