use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Args;
use snafu::ResultExt;
use sluice_ingest_http::HttpIngestServer;
use sluice_resources::{ColumnSchema, ColumnType, PipeName, PipeSchema, Profile};
use sluice_service::InMemoryIngestService;
use tokio_util::sync::CancellationToken;

use crate::error::{
    HttpServerSnafu, InvalidResourceNameSnafu, JsonSnafu, Result, ServiceSnafu,
    WriteProfileSnafu,
};

/// Run an in-memory ingestion service for local development.
#[derive(Args, Debug)]
pub struct DevArgs {
    /// The address of the HTTP ingestion server.
    #[arg(long, default_value = "127.0.0.1:7780")]
    http_address: String,
    #[arg(long, default_value = "MY_DATABASE")]
    database: String,
    #[arg(long, default_value = "MY_SCHEMA")]
    schema: String,
    #[arg(long, default_value = "MY_PIPE")]
    pipe: String,
    /// Delay between accepting rows and committing them, in milliseconds.
    #[arg(long, default_value = "500")]
    commit_delay_ms: u64,
    /// Require this bearer token on every request.
    #[arg(long, env = "SS_DEV_TOKEN")]
    token: Option<String>,
    /// Write a profile pointing at this server to the given path.
    #[arg(long)]
    write_profile: Option<PathBuf>,
}

impl DevArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let pipe = PipeName::from_parts(&self.database, &self.schema, &self.pipe)
            .context(InvalidResourceNameSnafu { resource: "pipe" })?;

        let service = InMemoryIngestService::new()
            .with_commit_delay(Duration::from_millis(self.commit_delay_ms));
        service
            .create_pipe(pipe.clone(), example_schema())
            .context(ServiceSnafu {
                operation: "create pipe",
            })?;

        let listener = sluice_ingest_http::bind(&self.http_address)
            .await
            .context(HttpServerSnafu {})?;

        if let Some(path) = &self.write_profile {
            let mut profile = Profile::new(format!("http://{}", self.http_address));
            profile.token = self.token.clone();
            write_profile(path, &profile)?;
            println!("Profile written to {}", path.display());
        }

        println!("Starting Sluice in development mode");
        println!("Pipe: {pipe}");
        println!("HTTP ingestion server listening on {}", self.http_address);

        let mut server = HttpIngestServer::new(Arc::new(service));
        if let Some(token) = self.token {
            server = server.with_token(token);
        }

        sluice_ingest_http::serve(listener, server.into_router(), ct)
            .await
            .context(HttpServerSnafu {})
    }
}

/// `c1 INTEGER, c2 TEXT, ts TIMESTAMP`, the schema used by `sluice ingest`.
fn example_schema() -> PipeSchema {
    PipeSchema::new(vec![
        ColumnSchema::new("c1", ColumnType::Integer),
        ColumnSchema::new("c2", ColumnType::Text),
        ColumnSchema::new("ts", ColumnType::Timestamp),
    ])
}

fn write_profile(path: &PathBuf, profile: &Profile) -> Result<()> {
    let content = serde_json::to_string_pretty(profile).context(JsonSnafu {})?;
    std::fs::write(path, content).context(WriteProfileSnafu { path: path.clone() })
}

#[cfg(test)]
mod tests {
    use sluice_resources::Row;

    use super::*;
    use crate::ingest::example_row;

    #[test]
    fn test_example_schema_accepts_generated_rows() {
        let schema = example_schema();
        for i in [0, 42, 99_999] {
            assert!(schema.validate_row(&example_row(i)).is_ok());
        }

        let epoch_seconds = Row::new()
            .with("c1", 1u64)
            .with("c2", "1")
            .with("ts", chrono::Utc::now().timestamp());
        assert!(schema.validate_row(&epoch_seconds).is_ok());

        let bad_ts = Row::new().with("c1", 1u64).with("ts", "yesterday");
        assert!(schema.validate_row(&bad_ts).is_err());
    }

    #[test]
    fn test_write_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        let profile = Profile::new("http://127.0.0.1:7780").with_token("secret");

        write_profile(&path, &profile).unwrap();

        let loaded = Profile::from_file(&path).unwrap();
        assert_eq!(loaded, profile);
    }
}
