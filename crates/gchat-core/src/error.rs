//! Error types for the core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::chat::api_error::{ApiError, ApiErrorKind};
use crate::chat::auth::LoginError;

/// Core library error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration-related error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A path resolution or validation error.
    #[error("path error: {0}")]
    Path(String),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A caller supplied an argument the API cannot accept (e.g. an empty name).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The OAuth2 client ID or secret resolved to an empty value.
    #[error("invalid OAuth2 client credentials: {0}")]
    InvalidCredentials(String),

    /// No usable token: missing, expired without a refresh token, or rejected.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// The token file exists but does not contain a valid token record.
    #[error("token file {} is corrupt: {reason}", path.display())]
    CorruptToken {
        /// Location of the unreadable token file.
        path: PathBuf,
        /// Parser diagnostic.
        reason: String,
    },

    /// The interactive login flow failed.
    #[error("login failed: {0}")]
    Login(#[from] LoginError),

    /// The remote service answered with a non-2xx status.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The request never reached the service (DNS, connect, TLS, body I/O).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Coarse failure classes exposed to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing, corrupt, expired-and-unrefreshable, or rejected credentials.
    NotAuthenticated,
    /// The caller lacks permission or scopes for the operation.
    PermissionDenied,
    /// The addressed resource does not exist.
    NotFound,
    /// Quota or rate limit exhausted.
    RateLimited,
    /// Anything else.
    General,
}

impl ErrorKind {
    /// Process exit code for this class. `2` is left to argument parsing.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::General => 1,
            Self::NotAuthenticated => 3,
            Self::PermissionDenied => 4,
            Self::NotFound => 5,
            Self::RateLimited => 6,
        }
    }
}

impl CoreError {
    /// Classify this error into the exit-signal taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthenticated(_) | Self::CorruptToken { .. } => ErrorKind::NotAuthenticated,
            Self::Api(api) => match api.kind() {
                ApiErrorKind::NotAuthenticated => ErrorKind::NotAuthenticated,
                ApiErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                ApiErrorKind::NotFound => ErrorKind::NotFound,
                ApiErrorKind::RateLimited => ErrorKind::RateLimited,
                ApiErrorKind::Other => ErrorKind::General,
            },
            _ => ErrorKind::General,
        }
    }

    /// The structured API error, if this failure came from the service.
    #[must_use]
    pub const fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::General,
            ErrorKind::NotAuthenticated,
            ErrorKind::PermissionDenied,
            ErrorKind::NotFound,
            ErrorKind::RateLimited,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&2));
    }

    #[test]
    fn corrupt_token_counts_as_not_authenticated() {
        let err = CoreError::CorruptToken {
            path: PathBuf::from("/tmp/token.json"),
            reason: "expected value".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NotAuthenticated);
        assert!(err.to_string().contains("/tmp/token.json"));
    }
}
