use std::time::Duration;

use bytesize::ByteSize;
use clap::Args;
use snafu::ResultExt;
use sluice_ingest_core::{ClientOptions, PollPolicy};
use sluice_resources::{OffsetToken, Row};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use ulid::Ulid;

use crate::{
    client_args::ClientArgs,
    error::{CliError, IngestSnafu, Result},
};

/// Ingest generated rows into a channel and wait until they are committed.
///
/// Row `i` has `c1 = i`, `c2 = "i"`, `ts` set to the current time and
/// offset token `"i"`.
#[derive(Args, Debug)]
pub struct IngestArgs {
    #[clap(flatten)]
    client: ClientArgs,
    /// Name of the channel to ingest into. Defaults to a generated unique name.
    #[arg(long)]
    channel: Option<String>,
    /// Number of rows to ingest.
    #[arg(long, default_value = "100000")]
    rows: u64,
    /// Print progress every this many rows.
    #[arg(long, default_value = "10000")]
    progress_every: u64,
    /// How many times to poll for the final offset token.
    #[arg(long, default_value = "30")]
    poll_attempts: u32,
    /// Delay between polls, in milliseconds.
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,
    /// Maximum time rows stay buffered before upload, in milliseconds.
    #[arg(long)]
    max_client_lag_ms: Option<u64>,
    /// Buffered size that triggers an upload, in MiB.
    #[arg(long)]
    flush_size_mib: Option<u64>,
}

/// The row ingested for offset `i`.
pub fn example_row(i: u64) -> Row {
    Row::new()
        .with("c1", i)
        .with("c2", i.to_string())
        .with("ts", chrono::Utc::now().to_rfc3339())
}

impl IngestArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        self.validate()?;

        let client = self.client.build_client(self.client_options())?;
        println!("Client created: {}", client.name());

        let (channel, _status) = client
            .open_channel(&self.channel_name())
            .await
            .context(IngestSnafu {
                operation: "open channel",
            })?;
        println!("Channel opened: {}", channel.name());

        println!("Ingesting {} rows...", self.rows);
        let mut last_token = None;

        for i in 0..self.rows {
            if ct.is_cancelled() {
                warn!(appended = i, "interrupted, waiting for appended rows only");
                break;
            }

            let token = OffsetToken::from(i);
            channel
                .append_row(example_row(i), token.clone())
                .await
                .context(IngestSnafu {
                    operation: "append row",
                })?;
            last_token = Some(token);

            let appended = i + 1;
            if appended % self.progress_every == 0 {
                println!("Ingested {appended} rows...");
            }
        }

        if let Some(expected) = last_token {
            println!("All rows submitted. Waiting for ingestion to complete...");

            let policy = PollPolicy::new(
                self.poll_attempts,
                Duration::from_millis(self.poll_interval_ms),
            );
            channel
                .wait_for_offset_token(&expected, policy)
                .await
                .context(IngestSnafu {
                    operation: "wait for commit",
                })?;

            println!("All data committed successfully, latest offset token: {expected}");
        }

        channel.close().await.context(IngestSnafu {
            operation: "close channel",
        })?;
        client.close().await.context(IngestSnafu {
            operation: "close client",
        })?;

        println!("Data ingestion completed");

        Ok(())
    }

    /// Unless given, every run ingests into a new channel.
    fn channel_name(&self) -> String {
        self.channel
            .clone()
            .unwrap_or_else(|| format!("MY_CHANNEL_{}", Ulid::new()))
    }

    fn validate(&self) -> Result<()> {
        if self.progress_every == 0 {
            return Err(CliError::InvalidArgument {
                name: "progress-every",
                message: "must be greater than zero".to_string(),
            });
        }

        if self.poll_attempts == 0 {
            return Err(CliError::InvalidArgument {
                name: "poll-attempts",
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::default()
            .with_commit_poll_interval(Duration::from_millis(self.poll_interval_ms));

        if let Some(lag) = self.max_client_lag_ms {
            options = options.with_max_client_lag(Duration::from_millis(lag));
        }

        if let Some(mib) = self.flush_size_mib {
            options = options.with_flush_size(ByteSize::mib(mib));
        }

        options
    }
}
