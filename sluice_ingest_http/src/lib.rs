//! HTTP ingestion server.
//!
//! Exposes any [`IngestService`] over HTTP so that remote clients can use it
//! through `sluice_push_client`. All endpoints take and return JSON:
//!
//! - `POST /v1/channels/open`
//! - `POST /v1/channels/rows`
//! - `POST /v1/channels/status`
//! - `POST /v1/channels/drop`
//!
//! Failed requests return an [`ErrorResponse`](sluice_service::ErrorResponse)
//! with a status code derived from the error kind.

pub mod channels;
pub mod error;

use std::sync::Arc;

use axum::{Router, middleware, routing::post};
use snafu::ResultExt;
use sluice_service::IngestService;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::{HttpServerError, Result};

use crate::{
    channels::{
        append_rows_handler, channel_status_handler, drop_channel_handler, open_channel_handler,
        require_token,
    },
    error::{BindSnafu, ServeSnafu},
};

/// HTTP server forwarding requests to an ingestion service.
pub struct HttpIngestServer {
    state: HttpIngestState,
}

#[derive(Clone)]
pub struct HttpIngestState {
    service: Arc<dyn IngestService>,
    token: Option<Arc<str>>,
}

impl HttpIngestServer {
    pub fn new(service: Arc<dyn IngestService>) -> Self {
        let state = HttpIngestState {
            service,
            token: None,
        };

        Self { state }
    }

    /// Require requests to carry this bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.state.token = Some(token.into().into());
        self
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route("/v1/channels/open", post(open_channel_handler))
            .route("/v1/channels/rows", post(append_rows_handler))
            .route("/v1/channels/status", post(channel_status_handler))
            .route("/v1/channels/drop", post(drop_channel_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_token,
            ))
            .with_state(self.state)
    }
}

/// Serves the router until the token is cancelled.
pub async fn serve(listener: TcpListener, router: Router, ct: CancellationToken) -> Result<()> {
    let address = listener.local_addr().ok();
    info!(?address, "HTTP ingestion server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .context(ServeSnafu {})
}

/// Binds a TCP listener to the address.
pub async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .context(BindSnafu { address })
}
