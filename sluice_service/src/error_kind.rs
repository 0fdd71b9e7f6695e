use std::fmt;

use serde::{Deserialize, Serialize};

/// Classifies service and client errors.
///
/// The kind decides whether an upload is retried, which HTTP status reports
/// the error and which exit code the CLI uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or rejected profile settings and credentials.
    Configuration,
    /// Malformed names, rows or requests.
    Validation,
    NotFound,
    /// The channel was reopened or closed by someone else.
    Conflict,
    /// The service is unreachable or overloaded.
    Temporary,
    Internal,
}

impl ErrorKind {
    /// Only temporary failures are worth retrying; the rest fail the same way again.
    pub fn is_retryable(self) -> bool {
        self == Self::Temporary
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Temporary => "temporary",
            Self::Internal => "internal",
        }
    }

    /// Exit code following `sysexits.h`.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Configuration => 78, // EX_CONFIG
            Self::Validation => 65,    // EX_DATAERR
            Self::NotFound => 66,      // EX_NOINPUT
            Self::Temporary => 75,     // EX_TEMPFAIL
            Self::Conflict | Self::Internal => 70, // EX_SOFTWARE
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_temporary_is_retryable() {
        let retryable = [
            ErrorKind::Configuration,
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::Temporary,
            ErrorKind::Internal,
        ]
        .into_iter()
        .filter(|kind| kind.is_retryable())
        .collect::<Vec<_>>();

        assert_eq!(retryable, vec![ErrorKind::Temporary]);
    }

    #[test]
    fn test_display_matches_serde_name() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, format!("\"{}\"", ErrorKind::NotFound));
    }
}
