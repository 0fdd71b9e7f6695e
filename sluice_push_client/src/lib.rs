//! HTTP client for the Sluice ingestion service.
mod http;

pub use self::http::{HttpClientError, HttpIngestService, Result};
