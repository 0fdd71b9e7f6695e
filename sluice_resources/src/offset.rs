//! Caller-supplied offset tokens.

use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Maximum size of an offset token, in bytes.
pub const MAX_OFFSET_TOKEN_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum OffsetTokenError {
    #[snafu(display("offset token must not be empty"))]
    Empty,
    #[snafu(display("offset token is {len} bytes long, the maximum is {MAX_OFFSET_TOKEN_LEN}"))]
    TooLong { len: usize },
}

/// An opaque marker of ingestion progress supplied by the caller.
///
/// Tokens are never interpreted by the client: ordering between them comes
/// from the order in which rows were appended to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OffsetToken(String);

impl OffsetToken {
    pub fn new(token: impl Into<String>) -> Result<Self, OffsetTokenError> {
        let token = token.into();

        if token.is_empty() {
            return Err(OffsetTokenError::Empty);
        }

        if token.len() > MAX_OFFSET_TOKEN_LEN {
            return Err(OffsetTokenError::TooLong { len: token.len() });
        }

        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OffsetToken {
    type Error = OffsetTokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for OffsetToken {
    type Error = OffsetTokenError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OffsetToken> for String {
    fn from(value: OffsetToken) -> Self {
        value.0
    }
}

impl From<u64> for OffsetToken {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl PartialEq<str> for OffsetToken {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for OffsetToken {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl AsRef<str> for OffsetToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OffsetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_token_validation() {
        assert_eq!(OffsetToken::new("0").unwrap().as_str(), "0");
        assert_eq!(OffsetToken::from(42).as_str(), "42");
        assert_eq!(OffsetToken::new(""), Err(OffsetTokenError::Empty));

        let long = "x".repeat(MAX_OFFSET_TOKEN_LEN + 1);
        assert!(matches!(
            OffsetToken::new(long),
            Err(OffsetTokenError::TooLong { .. })
        ));
    }

    #[test]
    fn test_offset_token_serde() {
        let token: OffsetToken = serde_json::from_str("\"99\"").unwrap();
        assert_eq!(token, "99");
        assert!(serde_json::from_str::<OffsetToken>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"99\"");
    }
}
