//! Connection profile, usually read from a `profile.json` file.

use std::{collections::BTreeMap, fmt, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ProfileError {
    #[snafu(display("failed to read profile {path}"))]
    Read {
        path: String,
        #[snafu(source(from(std::io::Error, Arc::new)))]
        source: Arc<std::io::Error>,
    },
    #[snafu(display("failed to parse profile"))]
    Parse {
        #[snafu(source(from(serde_json::Error, Arc::new)))]
        source: Arc<serde_json::Error>,
    },
    #[snafu(display("invalid profile: {message}"))]
    Invalid { message: String },
}

pub type Result<T, E = ProfileError> = std::result::Result<T, E>;

/// Connection settings and credentials for the ingestion service.
///
/// Unknown keys are kept in `properties` so that callers can forward
/// service-specific settings untouched.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Base URL of the ingestion service.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Bearer token sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_client_lag_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_rows: Option<usize>,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl Profile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(ReadSnafu {
            path: path.display().to_string(),
        })?;

        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let profile: Profile = serde_json::from_str(content).context(ParseSnafu {})?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return InvalidSnafu {
                message: "url must not be empty",
            }
            .fail();
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return InvalidSnafu {
                message: format!("url must start with http:// or https://, got {url}"),
            }
            .fail();
        }

        if self.max_batch_rows == Some(0) {
            return InvalidSnafu {
                message: "max_batch_rows must be greater than zero",
            }
            .fail();
        }

        Ok(())
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("url", &self.url)
            .field("account", &self.account)
            .field("user", &self.user)
            .field("role", &self.role)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("max_client_lag_ms", &self.max_client_lag_ms)
            .field("flush_size_bytes", &self.flush_size_bytes)
            .field("max_batch_rows", &self.max_batch_rows)
            .field("properties", &format!("<{} entries>", self.properties.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_profile_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "url": "https://ingest.example.com",
                "account": "acme",
                "user": "loader",
                "token": "secret",
                "max_client_lag_ms": 250,
                "warehouse": "COMPUTE_WH"
            }}"#
        )
        .unwrap();

        let profile = Profile::from_file(file.path()).unwrap();
        assert_eq!(profile.url, "https://ingest.example.com");
        assert_eq!(profile.account.as_deref(), Some("acme"));
        assert_eq!(profile.max_client_lag_ms, Some(250));
        assert_eq!(
            profile.properties.get("warehouse"),
            Some(&Value::String("COMPUTE_WH".to_string()))
        );

        let debug = format!("{profile:?}");
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_profile_errors() {
        let err = Profile::from_file("/definitely/not/here/profile.json").unwrap_err();
        assert!(matches!(err, ProfileError::Read { .. }));

        let err = Profile::from_json_str("{").unwrap_err();
        assert!(matches!(err, ProfileError::Parse { .. }));

        let err = Profile::from_json_str(r#"{"url": "ftp://host"}"#).unwrap_err();
        assert!(matches!(err, ProfileError::Invalid { .. }));

        let err = Profile::from_json_str(r#"{"url": "http://host", "max_batch_rows": 0}"#)
            .unwrap_err();
        assert!(matches!(err, ProfileError::Invalid { .. }));
    }
}
