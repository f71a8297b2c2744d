//! Structured errors returned by the Chat API.
//!
//! Every non-2xx response is parsed into an [`ApiError`], whatever verb
//! produced it. Google APIs answer failures with an envelope of the form
//!
//! ```json
//! {"error": {"code": 403, "status": "PERMISSION_DENIED", "message": "...",
//!            "details": [{"@type": "...ErrorInfo", "reason": "...", "metadata": {}},
//!                        {"@type": "...Help", "links": [{"description": "", "url": ""}]}]}}
//! ```
//!
//! Bodies that do not match the envelope still produce an `ApiError` carrying
//! the HTTP status and the raw body text.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Symbolic status of a failed call (`google.rpc.Code` names).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiStatus {
    /// `INVALID_ARGUMENT`
    InvalidArgument,
    /// `FAILED_PRECONDITION`
    FailedPrecondition,
    /// `OUT_OF_RANGE`
    OutOfRange,
    /// `UNAUTHENTICATED`
    Unauthenticated,
    /// `PERMISSION_DENIED`
    PermissionDenied,
    /// `NOT_FOUND`
    NotFound,
    /// `ABORTED`
    Aborted,
    /// `ALREADY_EXISTS`
    AlreadyExists,
    /// `RESOURCE_EXHAUSTED`
    ResourceExhausted,
    /// `CANCELLED`
    Cancelled,
    /// `DATA_LOSS`
    DataLoss,
    /// `UNKNOWN`
    Unknown,
    /// `INTERNAL`
    Internal,
    /// `UNIMPLEMENTED`
    Unimplemented,
    /// `UNAVAILABLE`
    Unavailable,
    /// `DEADLINE_EXCEEDED`
    DeadlineExceeded,
    /// A status string this client does not know about.
    Other(String),
}

impl ApiStatus {
    /// Parse a symbolic status string. Empty input maps to [`ApiStatus::Unknown`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "INVALID_ARGUMENT" => Self::InvalidArgument,
            "FAILED_PRECONDITION" => Self::FailedPrecondition,
            "OUT_OF_RANGE" => Self::OutOfRange,
            "UNAUTHENTICATED" => Self::Unauthenticated,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "NOT_FOUND" => Self::NotFound,
            "ABORTED" => Self::Aborted,
            "ALREADY_EXISTS" => Self::AlreadyExists,
            "RESOURCE_EXHAUSTED" => Self::ResourceExhausted,
            "CANCELLED" => Self::Cancelled,
            "DATA_LOSS" => Self::DataLoss,
            "" | "UNKNOWN" => Self::Unknown,
            "INTERNAL" => Self::Internal,
            "UNIMPLEMENTED" => Self::Unimplemented,
            "UNAVAILABLE" => Self::Unavailable,
            "DEADLINE_EXCEEDED" => Self::DeadlineExceeded,
            other => Self::Other(other.to_string()),
        }
    }

    /// Best symbolic status for a bare HTTP status code.
    #[must_use]
    pub fn from_http(code: u16) -> Self {
        match code {
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::Aborted,
            429 => Self::ResourceExhausted,
            499 => Self::Cancelled,
            500 => Self::Internal,
            501 => Self::Unimplemented,
            503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            _ => Self::Unknown,
        }
    }

    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Aborted => "ABORTED",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Cancelled => "CANCELLED",
            Self::DataLoss => "DATA_LOSS",
            Self::Unknown => "UNKNOWN",
            Self::Internal => "INTERNAL",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Unavailable => "UNAVAILABLE",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A help link attached to an error detail.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelpLink {
    /// Human description of the link.
    #[serde(default)]
    pub description: String,
    /// Target URL.
    #[serde(default)]
    pub url: String,
}

/// One typed detail block of the error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    /// Fully-qualified detail type, e.g. `type.googleapis.com/google.rpc.ErrorInfo`.
    #[serde(rename = "@type", default)]
    pub type_url: String,
    /// Machine reason code (`ErrorInfo` details).
    #[serde(default)]
    pub reason: Option<String>,
    /// Error domain (`ErrorInfo` details).
    #[serde(default)]
    pub domain: Option<String>,
    /// Free-form key/value metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Help links (`Help` details).
    #[serde(default, rename = "links")]
    pub help_links: Vec<HelpLink>,
}

/// Coarse classification used for exit codes and hinting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// 401 / `UNAUTHENTICATED`.
    NotAuthenticated,
    /// 403 / `PERMISSION_DENIED`.
    PermissionDenied,
    /// 404 / `NOT_FOUND`.
    NotFound,
    /// 429 / `RESOURCE_EXHAUSTED`.
    RateLimited,
    /// Everything else.
    Other,
}

/// A failed API call. Created once per response and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("API error {code} ({status}): {message}")]
pub struct ApiError {
    /// Numeric code (the HTTP status when the envelope omits it).
    pub code: u16,
    /// Symbolic status.
    pub status: ApiStatus,
    /// Human-readable message.
    pub message: String,
    /// Typed detail blocks, in response order.
    pub details: Vec<ErrorDetail>,
    /// Response body exactly as received.
    pub raw_body: String,
}

#[derive(Deserialize)]
struct Envelope {
    error: EnvelopeError,
}

#[derive(Deserialize)]
struct EnvelopeError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

impl ApiError {
    /// Classify a non-2xx response from its HTTP status and body bytes.
    #[must_use]
    pub fn classify(http_status: u16, body: &[u8]) -> Self {
        let raw_body = String::from_utf8_lossy(body).into_owned();

        match serde_json::from_slice::<Envelope>(body) {
            Ok(Envelope { error }) => Self {
                code: error.code.unwrap_or(http_status),
                status: if error.status.is_empty() {
                    ApiStatus::from_http(http_status)
                } else {
                    ApiStatus::parse(&error.status)
                },
                message: error.message,
                details: error.details,
                raw_body,
            },
            Err(e) => {
                log::debug!("error body is not a Google error envelope: {e}");
                let trimmed = raw_body.trim();
                let message = if trimmed.is_empty() {
                    reqwest::StatusCode::from_u16(http_status)
                        .ok()
                        .and_then(|s| s.canonical_reason())
                        .unwrap_or("unexpected response")
                        .to_string()
                } else {
                    trimmed.to_string()
                };
                Self {
                    code: http_status,
                    status: ApiStatus::from_http(http_status),
                    message,
                    details: Vec::new(),
                    raw_body,
                }
            }
        }
    }

    /// Read the body of a failed response and classify it.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.bytes().await.unwrap_or_default();
        Self::classify(status, &body)
    }

    /// Coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ApiErrorKind {
        match (self.code, &self.status) {
            (401, _) | (_, ApiStatus::Unauthenticated) => ApiErrorKind::NotAuthenticated,
            (429, _) | (_, ApiStatus::ResourceExhausted) => ApiErrorKind::RateLimited,
            (403, _) | (_, ApiStatus::PermissionDenied) => ApiErrorKind::PermissionDenied,
            (404, _) | (_, ApiStatus::NotFound) => ApiErrorKind::NotFound,
            _ => ApiErrorKind::Other,
        }
    }

    /// All help links across the detail blocks.
    pub fn help_links(&self) -> impl Iterator<Item = &HelpLink> {
        self.details.iter().flat_map(|d| d.help_links.iter())
    }

    /// The first machine reason code found in the details.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.details
            .iter()
            .filter_map(|d| d.reason.as_deref())
            .find(|r| !r.is_empty())
    }

    /// Remediation hint for well-known failure signatures.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        let message = self.message.to_lowercase();
        KNOWN_ERRORS
            .iter()
            .find(|known| {
                (known.code == 0 || known.code == self.code)
                    && (known.status.is_empty() || known.status == self.status.as_str())
                    && (known.message_contains.is_empty()
                        || message.contains(&known.message_contains.to_lowercase()))
            })
            .map(|known| known.hint)
    }
}

struct KnownError {
    code: u16,
    status: &'static str,
    message_contains: &'static str,
    hint: &'static str,
}

/// Signatures are checked in order; the first match wins.
const KNOWN_ERRORS: &[KnownError] = &[
    KnownError {
        code: 404,
        status: "NOT_FOUND",
        message_contains: "Google Chat app not found",
        hint: "Your Google Cloud project has the Chat API enabled, but the Chat app\n\
               is not configured. Google requires this even for user-authenticated CLI tools.\n\
               \n\
               To fix this:\n  \
               1. Open: https://console.cloud.google.com/apis/api/chat.googleapis.com/hangouts-chat\n  \
               2. Fill in the required fields (App name, Avatar URL, Description)\n  \
               3. You can disable Interactive Features if you don't need bot functionality\n  \
               4. Click Save\n  \
               5. Re-run your command",
    },
    KnownError {
        code: 403,
        status: "PERMISSION_DENIED",
        message_contains: "insufficient authentication scopes",
        hint: "Your access token is missing the required scopes for this operation.\n\
               \n\
               To fix this:\n  \
               1. Run: gchat auth logout\n  \
               2. Run: gchat auth login\n  \
               3. Re-authorize when prompted in your browser",
    },
    KnownError {
        code: 403,
        status: "PERMISSION_DENIED",
        message_contains: "Chat API has not been used",
        hint: "The Google Chat API is not enabled in your Google Cloud project.\n\
               \n\
               To fix this:\n  \
               1. Open: https://console.cloud.google.com/apis/library/chat.googleapis.com\n  \
               2. Click \"Enable\"\n  \
               3. Wait a few minutes for the change to propagate\n  \
               4. Re-run your command",
    },
    KnownError {
        code: 401,
        status: "UNAUTHENTICATED",
        message_contains: "",
        hint: "Your authentication token is invalid or expired.\n\
               \n\
               To fix this:\n  \
               1. Run: gchat auth logout\n  \
               2. Run: gchat auth login",
    },
    KnownError {
        code: 429,
        status: "RESOURCE_EXHAUSTED",
        message_contains: "",
        hint: "You've exceeded the API rate limit. Wait a moment and try again.\n\
               If this persists, check your quota at:\n  \
               https://console.cloud.google.com/apis/api/chat.googleapis.com/quotas",
    },
    KnownError {
        code: 403,
        status: "PERMISSION_DENIED",
        message_contains: "not allowed to manage this resource",
        hint: "You don't have permission to perform this operation.\n\
               If this is a Workspace admin operation, try adding the --admin flag.\n\
               Make sure you have the required role in the Google Workspace admin console.",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(code: u16, status: &str, message: &str) -> Vec<u8> {
        serde_json::json!({
            "error": { "code": code, "status": status, "message": message }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn rate_limit_is_classified() {
        let err = ApiError::classify(429, &envelope(429, "RESOURCE_EXHAUSTED", "Quota exceeded"));
        assert_eq!(err.kind(), ApiErrorKind::RateLimited);
        assert_eq!(err.status, ApiStatus::ResourceExhausted);
        assert!(err.hint().is_some_and(|h| h.contains("rate limit")));
    }

    #[test]
    fn unauthorized_is_not_authenticated() {
        let err = ApiError::classify(
            401,
            &envelope(401, "UNAUTHENTICATED", "Request had invalid authentication credentials."),
        );
        assert_eq!(err.kind(), ApiErrorKind::NotAuthenticated);
        assert!(err.hint().is_some_and(|h| h.contains("gchat auth login")));
    }

    #[test]
    fn insufficient_scopes_get_reauth_hint() {
        let err = ApiError::classify(
            403,
            &envelope(403, "PERMISSION_DENIED", "Request had insufficient authentication scopes."),
        );
        assert_eq!(err.kind(), ApiErrorKind::PermissionDenied);
        let hint = err.hint().expect("scope hint");
        assert!(hint.contains("missing the required scopes"));
        assert!(hint.contains("gchat auth logout"));
    }

    #[test]
    fn admin_hint_only_for_matching_message() {
        let err = ApiError::classify(
            403,
            &envelope(403, "PERMISSION_DENIED", "The caller is not allowed to manage this resource"),
        );
        assert!(err.hint().is_some_and(|h| h.contains("--admin")));

        let other = ApiError::classify(403, &envelope(403, "PERMISSION_DENIED", "nope"));
        assert_eq!(other.kind(), ApiErrorKind::PermissionDenied);
        assert!(other.hint().is_none());
    }

    #[test]
    fn details_reason_and_links_are_parsed() {
        let body = br#"{"error":{"code":403,"status":"PERMISSION_DENIED","message":"Google Chat API has not been used in project 42",
            "details":[
              {"@type":"type.googleapis.com/google.rpc.ErrorInfo","reason":"SERVICE_DISABLED","domain":"googleapis.com",
               "metadata":{"service":"chat.googleapis.com","consumer":"projects/42"}},
              {"@type":"type.googleapis.com/google.rpc.Help","links":[{"description":"Google developers console API activation","url":"https://console.developers.google.com/apis/api/chat.googleapis.com/overview?project=42"}]}
            ]}}"#;
        let err = ApiError::classify(403, body);
        assert_eq!(err.reason(), Some("SERVICE_DISABLED"));
        assert_eq!(err.details.len(), 2);
        assert_eq!(
            err.details[0].metadata.get("service").map(String::as_str),
            Some("chat.googleapis.com")
        );
        let links: Vec<_> = err.help_links().collect();
        assert_eq!(links.len(), 1);
        assert!(links[0].url.starts_with("https://console.developers.google.com/"));
        assert!(err.hint().is_some_and(|h| h.contains("not enabled")));
    }

    #[test]
    fn unparsable_body_is_kept_verbatim() {
        let body = b"<html>Bad Gateway</html>\n";
        let err = ApiError::classify(502, body);
        assert_eq!(err.code, 502);
        assert_eq!(err.status, ApiStatus::Unknown);
        assert_eq!(err.message, "<html>Bad Gateway</html>");
        assert_eq!(err.raw_body, "<html>Bad Gateway</html>\n");
        assert_eq!(err.kind(), ApiErrorKind::Other);
        assert!(err.hint().is_none());
    }

    #[test]
    fn empty_body_uses_reason_phrase() {
        let err = ApiError::classify(404, b"");
        assert_eq!(err.message, "Not Found");
        assert_eq!(err.kind(), ApiErrorKind::NotFound);
    }

    #[test]
    fn unknown_status_strings_survive() {
        assert_eq!(ApiStatus::parse("SOMETHING_NEW").as_str(), "SOMETHING_NEW");
        assert_eq!(ApiStatus::parse("NOT_FOUND"), ApiStatus::NotFound);
    }
}
