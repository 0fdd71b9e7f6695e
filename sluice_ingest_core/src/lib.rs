//! Streaming ingestion client.
//!
//! An [`IngestClient`] ingests rows into a pipe through named [`Channel`]s.
//! Rows appended to a channel are validated, buffered and uploaded in order
//! by a background task. The service commits them asynchronously; callers
//! discover commit progress by polling the latest committed offset token.
//!
//! ```no_run
//! # use sluice_ingest_core::{IngestClient, PollPolicy, Result};
//! # use sluice_resources::{OffsetToken, Row};
//! # async fn example() -> Result<()> {
//! let client = IngestClient::builder("MY_CLIENT", "MY_DATABASE", "MY_SCHEMA", "MY_PIPE")
//!     .with_profile_file("profile.json")
//!     .build()?;
//! let (channel, _status) = client.open_channel("MY_CHANNEL").await?;
//!
//! for i in 0..10u64 {
//!     let row = Row::new().with("c1", i).with("c2", i.to_string());
//!     channel.append_row(row, OffsetToken::from(i)).await?;
//! }
//!
//! channel
//!     .wait_for_offset_token(&OffsetToken::from(9), PollPolicy::default())
//!     .await?;
//! channel.close().await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
pub mod channel;
pub mod client;
pub mod error;
pub mod options;
pub mod tracker;

pub(crate) mod batch;
pub(crate) mod batcher;
pub(crate) mod flusher;
pub(crate) mod uploader;

#[cfg(test)]
pub mod test_utils;

pub use channel::Channel;
pub use client::{IngestClient, IngestClientBuilder};
pub use error::{ChannelCloseFailure, IngestError, Result};
pub use options::{ClientOptions, PollPolicy, RetryPolicy};
pub use tracker::OffsetTracker;

pub use sluice_service::OpenChannelStatus;
