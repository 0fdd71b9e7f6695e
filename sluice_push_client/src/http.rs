//! [`IngestService`] implementation talking JSON over HTTP.

use async_trait::async_trait;
use reqwest::{
    StatusCode,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};
use sluice_resources::{Profile, ProfileError};
use sluice_service::{
    AppendRowsRequest, AppendRowsResponse, ChannelStatusRequest, ChannelStatusResponse,
    DropChannelRequest, DropChannelResponse, ErrorResponse, IngestService, OpenChannelRequest,
    OpenChannelResponse, ServiceError,
};
use tracing::trace;

/// A client for an ingestion service exposed over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIngestService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Snafu)]
pub enum HttpClientError {
    #[snafu(display("Invalid profile"))]
    Profile { source: ProfileError },
    #[snafu(display("Invalid bearer token"))]
    Token {
        source: reqwest::header::InvalidHeaderValue,
    },
    #[snafu(display("Failed to build HTTP client"))]
    Build { source: reqwest::Error },
}

pub type Result<T, E = HttpClientError> = std::result::Result<T, E>;

impl HttpIngestService {
    /// Create a new client without credentials.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: normalize_base_url(base_url.into()),
        }
    }

    /// Create a client for the service described by the profile.
    ///
    /// The profile token, if any, is sent as a bearer token with every request.
    pub fn from_profile(profile: &Profile) -> Result<Self> {
        profile.validate().context(ProfileSnafu {})?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &profile.token {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {token}")).context(TokenSnafu {})?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("sluice/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .context(BuildSnafu {})?;

        Ok(Self {
            client,
            base_url: normalize_base_url(profile.url.clone()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, path: &str, request: &Req) -> sluice_service::Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        trace!(%url, "sending request");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|err| ServiceError::Unavailable {
                message: format!("request to {url} failed: {err}"),
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|err| ServiceError::Internal {
                    message: format!("invalid response from {url}: {err}"),
                });
        }

        match response.json::<ErrorResponse>().await {
            Ok(body) => Err(body.error),
            Err(_) => Err(status_error(status, &url)),
        }
    }
}

#[async_trait]
impl IngestService for HttpIngestService {
    async fn open_channel(
        &self,
        request: OpenChannelRequest,
    ) -> sluice_service::Result<OpenChannelResponse> {
        self.post("/v1/channels/open", &request).await
    }

    async fn append_rows(
        &self,
        request: AppendRowsRequest,
    ) -> sluice_service::Result<AppendRowsResponse> {
        self.post("/v1/channels/rows", &request).await
    }

    async fn channel_status(
        &self,
        request: ChannelStatusRequest,
    ) -> sluice_service::Result<ChannelStatusResponse> {
        self.post("/v1/channels/status", &request).await
    }

    async fn drop_channel(
        &self,
        request: DropChannelRequest,
    ) -> sluice_service::Result<DropChannelResponse> {
        self.post("/v1/channels/drop", &request).await
    }
}

fn normalize_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Maps a response without an error body to a service error.
fn status_error(status: StatusCode, url: &str) -> ServiceError {
    let message = format!("{url} returned {status}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Unauthorized { message },
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ServiceError::Unavailable { message },
        status if status.is_client_error() => ServiceError::InvalidRequest { message },
        _ => ServiceError::Internal { message },
    }
}
