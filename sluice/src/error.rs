use std::path::PathBuf;

use snafu::Snafu;
use sluice_ingest_core::IngestError;
use sluice_ingest_http::HttpServerError;
use sluice_observability::ObservabilityError;
use sluice_resources::ResourceError;
use sluice_service::{ErrorKind, ServiceError};

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Invalid {resource} name"))]
    InvalidResourceName {
        resource: &'static str,
        source: ResourceError,
    },
    #[snafu(display("Invalid {name} argument: {message}"))]
    InvalidArgument { name: &'static str, message: String },
    #[snafu(display("Failed ingestion operation {operation}"))]
    Ingest {
        operation: &'static str,
        source: IngestError,
    },
    #[snafu(display("Failed service operation {operation}"))]
    Service {
        operation: &'static str,
        source: ServiceError,
    },
    #[snafu(display("HTTP server error"))]
    HttpServer { source: HttpServerError },
    #[snafu(display("Failed to write profile {}", path.display()))]
    WriteProfile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("JSON serialization error"))]
    Json { source: serde_json::Error },
    #[snafu(display("Failed to initialize observability"))]
    Observability { source: ObservabilityError },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

impl CliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidResourceName { .. } | Self::InvalidArgument { .. } => {
                ErrorKind::Validation
            }
            Self::Ingest { source, .. } => source.kind(),
            Self::Service { source, .. } => source.kind(),
            Self::HttpServer { .. } | Self::WriteProfile { .. } => ErrorKind::Temporary,
            Self::Json { .. } | Self::Observability { .. } => ErrorKind::Internal,
        }
    }

    /// Process exit code, following the BSD `sysexits` convention.
    pub fn exit_code(&self) -> u8 {
        u8::try_from(self.kind().exit_code()).unwrap_or(1)
    }
}
