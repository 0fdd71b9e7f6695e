use axum::{
    Json,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use sluice_service::{
    AppendRowsRequest, ChannelStatusRequest, DropChannelRequest, ErrorKind, ErrorResponse,
    OpenChannelRequest, ServiceError,
};
use tracing::{debug, error};

use crate::{HttpIngestState, error::status_code};

/// Handler for the /v1/channels/open endpoint.
pub async fn open_channel_handler(
    State(state): State<HttpIngestState>,
    Json(request): Json<OpenChannelRequest>,
) -> Response {
    debug!(channel = %request.channel, client = %request.client, "open channel");
    into_response(state.service.open_channel(request).await)
}

/// Handler for the /v1/channels/rows endpoint.
pub async fn append_rows_handler(
    State(state): State<HttpIngestState>,
    Json(request): Json<AppendRowsRequest>,
) -> Response {
    debug!(
        channel = %request.channel,
        batch_sequencer = request.batch_sequencer,
        num_rows = request.rows.len(),
        "append rows"
    );
    into_response(state.service.append_rows(request).await)
}

/// Handler for the /v1/channels/status endpoint.
pub async fn channel_status_handler(
    State(state): State<HttpIngestState>,
    Json(request): Json<ChannelStatusRequest>,
) -> Response {
    into_response(state.service.channel_status(request).await)
}

/// Handler for the /v1/channels/drop endpoint.
pub async fn drop_channel_handler(
    State(state): State<HttpIngestState>,
    Json(request): Json<DropChannelRequest>,
) -> Response {
    debug!(channel = %request.channel, "drop channel");
    into_response(state.service.drop_channel(request).await)
}

/// Rejects requests without the expected bearer token, if one is configured.
pub async fn require_token(
    State(state): State<HttpIngestState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if provided != Some(expected) {
        return map_error_to_response(ServiceError::Unauthorized {
            message: "missing or invalid bearer token".to_string(),
        });
    }

    next.run(request).await
}

fn into_response<T: Serialize>(result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(response) => Json(response).into_response(),
        Err(err) => map_error_to_response(err),
    }
}

fn map_error_to_response(error: ServiceError) -> Response {
    let kind = error.kind();
    if kind == ErrorKind::Internal {
        error!(%error, "request failed");
    }

    (status_code(kind), Json(ErrorResponse { error })).into_response()
}
