//! OAuth2 token record persisted between runs.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are treated as expired this long before their stated expiry.
const EXPIRY_SKEW_SECS: i64 = 10;

/// An OAuth2 access/refresh token pair plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Short-lived bearer credential.
    pub access_token: String,
    /// Token type reported by the provider (normally `Bearer`).
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Long-lived credential used to mint new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry instant. `None` means the token does not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token endpoint response for both the authorization-code and refresh grants.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Token {
    /// Build a token with only an access token set.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: None,
            expiry: None,
            scopes: BTreeSet::new(),
        }
    }

    /// Whether the token is expired (or about to be) at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| {
            expiry
                .checked_sub_signed(Duration::seconds(EXPIRY_SKEW_SECS))
                .is_none_or(|deadline| deadline <= now)
        })
    }

    /// Whether the token is expired right now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether a refresh token is available.
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Build a token from a token-endpoint response.
    ///
    /// `previous` supplies the refresh token and scopes when the response
    /// omits them (providers do not always rotate refresh tokens).
    pub(crate) fn from_response(
        response: TokenResponse,
        previous: Option<&Self>,
        requested_scopes: &[String],
    ) -> Self {
        let scopes = response.scope.as_deref().map_or_else(
            || {
                previous.map_or_else(
                    || requested_scopes.iter().cloned().collect(),
                    |p| p.scopes.clone(),
                )
            },
            |s| s.split_whitespace().map(str::to_string).collect(),
        );

        Self {
            access_token: response.access_token,
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            expiry: response.expires_in.and_then(expiry_after),
            scopes,
        }
    }
}

/// Expiry `secs` from now. Lifetimes too large to represent are treated as
/// non-expiring; the server's 401 still triggers a refresh.
fn expiry_after(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    let expiry = Duration::try_seconds(secs).and_then(|d| Utc::now().checked_add_signed(d));
    if expiry.is_none() {
        log::warn!("ignoring out-of-range token lifetime of {secs}s");
    }
    expiry
}
