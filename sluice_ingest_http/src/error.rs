use axum::http::StatusCode;
use snafu::Snafu;
use sluice_service::ErrorKind;

/// Errors that can occur in the HTTP server.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HttpServerError {
    #[snafu(display("failed to bind to address {address}"))]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[snafu(display("server error"))]
    Serve { source: std::io::Error },
}

pub type Result<T, E = HttpServerError> = std::result::Result<T, E>;

/// Returns the HTTP status used to report errors of this kind.
pub fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Configuration => StatusCode::UNAUTHORIZED,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Temporary => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
