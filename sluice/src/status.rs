use clap::Args;
use snafu::ResultExt;
use sluice_ingest_core::ClientOptions;
use tokio_util::sync::CancellationToken;

use crate::{
    client_args::ClientArgs,
    error::{IngestSnafu, Result},
};

/// Show the latest committed offset token of channels.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[clap(flatten)]
    client: ClientArgs,
    /// Channel names to query.
    #[arg(required = true)]
    channels: Vec<String>,
}

impl StatusArgs {
    pub async fn run(self, _ct: CancellationToken) -> Result<()> {
        let client = self.client.build_client(ClientOptions::default())?;

        let names = self.channels.iter().map(String::as_str).collect::<Vec<_>>();
        let tokens = client
            .latest_committed_offset_tokens(&names)
            .await
            .context(IngestSnafu {
                operation: "get channel status",
            })?;

        for name in &self.channels {
            let token = tokens
                .iter()
                .find(|(channel, _)| channel.id() == name)
                .and_then(|(_, token)| token.as_ref());

            match token {
                Some(token) => println!("{name}: {token}"),
                None => println!("{name}: <no committed offset token>"),
            }
        }

        client.close().await.context(IngestSnafu {
            operation: "close client",
        })
    }
}
