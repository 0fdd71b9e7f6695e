use std::process::ExitCode;

use clap::{Parser, Subcommand};
use snafu::{Report, ResultExt};
use tokio_util::sync::CancellationToken;

use crate::{
    dev::DevArgs,
    error::{ObservabilitySnafu, Result},
    ingest::IngestArgs,
    status::StatusArgs,
};

mod client_args;
mod dev;
mod error;
mod ingest;
mod status;

/// Client logs are opt-in detail: set `SS_LOG_LEVEL=info` to see them.
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Sluice streaming ingestion CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest rows into a channel and wait for them to be committed
    Ingest {
        #[clap(flatten)]
        inner: IngestArgs,
    },
    /// Start an in-memory ingestion service in development mode
    Dev {
        #[clap(flatten)]
        inner: DevArgs,
    },
    /// Show the latest committed offset token of channels
    Status {
        #[clap(flatten)]
        inner: StatusArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let code = error.exit_code();
            eprintln!("{}", Report::from_error(error));
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    sluice_observability::init_observability_with_default(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        DEFAULT_LOG_LEVEL,
    )
    .context(ObservabilitySnafu {})?;

    let ct = CancellationToken::new();

    tokio::spawn({
        let ct = ct.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            ct.cancel();
        }
    });

    match cli.command {
        Commands::Ingest { inner } => inner.run(ct).await,
        Commands::Dev { inner } => inner.run(ct).await,
        Commands::Status { inner } => inner.run(ct).await,
    }
}
