use std::path::PathBuf;

use clap::Args;
use snafu::ResultExt;
use sluice_ingest_core::{ClientOptions, IngestClient};
use ulid::Ulid;

use crate::error::{IngestSnafu, Result};

/// Arguments identifying the pipe to ingest into and how to reach it.
#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name of the client. Defaults to a generated unique name.
    #[arg(long)]
    pub client: Option<String>,
    #[arg(long, default_value = "MY_DATABASE")]
    pub database: String,
    #[arg(long, default_value = "MY_SCHEMA")]
    pub schema: String,
    #[arg(long, default_value = "MY_PIPE")]
    pub pipe: String,
    /// Path to the connection profile.
    #[arg(long, env = "SS_PROFILE", default_value = "profile.json")]
    pub profile: PathBuf,
}

impl ClientArgs {
    pub fn client_name(&self) -> String {
        self.client
            .clone()
            .unwrap_or_else(|| format!("MY_CLIENT_{}", Ulid::new()))
    }

    pub fn build_client(&self, options: ClientOptions) -> Result<IngestClient> {
        IngestClient::builder(
            self.client_name(),
            &self.database,
            &self.schema,
            &self.pipe,
        )
        .with_profile_file(self.profile.clone())
        .with_options(options)
        .build()
        .context(IngestSnafu {
            operation: "build client",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_client_name_is_unique() {
        let args = ClientArgs {
            client: None,
            database: "MY_DATABASE".to_string(),
            schema: "MY_SCHEMA".to_string(),
            pipe: "MY_PIPE".to_string(),
            profile: PathBuf::from("profile.json"),
        };

        let first = args.client_name();
        let second = args.client_name();

        assert!(first.starts_with("MY_CLIENT_"));
        assert_ne!(first, second);
        assert!(sluice_resources::ClientName::new(first).is_ok());
    }
}
