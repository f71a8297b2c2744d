//! Bearer-token transport with single-flight refresh.
//!
//! Every request carries the current access token. An expired token is
//! refreshed before sending; a 401 triggers at most one refresh and one retry.
//! The token lives behind an async mutex so that "check expiry, refresh,
//! persist" runs as one unit: concurrent callers that all see an expired
//! token wait for a single refresh and then reuse its result.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::Mutex;
use url::Url;

use crate::CoreError;
use crate::chat::api_error::ApiError;
use crate::chat::auth;
use crate::chat::credentials::Credentials;
use crate::chat::storage::TokenStore;
use crate::chat::token::Token;

/// HTTP client that injects and refreshes OAuth2 credentials.
#[derive(Debug)]
pub struct AuthenticatedTransport {
    http: Client,
    credentials: Credentials,
    token_url: Url,
    store: TokenStore,
    token: Mutex<Token>,
}

impl AuthenticatedTransport {
    /// Create a transport around an already loaded token.
    #[must_use]
    pub fn new(
        http: Client,
        credentials: Credentials,
        token_url: Url,
        store: TokenStore,
        token: Token,
    ) -> Self {
        Self {
            http,
            credentials,
            token_url,
            store,
            token: Mutex::new(token),
        }
    }

    /// Create a transport using the token currently in `store`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAuthenticated`] or [`CoreError::CorruptToken`]
    /// if no usable token is stored.
    pub fn from_store(
        http: Client,
        credentials: Credentials,
        token_url: Url,
        store: TokenStore,
    ) -> Result<Self, CoreError> {
        let token = store.load()?;
        Ok(Self::new(http, credentials, token_url, store, token))
    }

    /// Underlying HTTP client.
    #[must_use]
    pub const fn http(&self) -> &Client {
        &self.http
    }

    /// Token store refreshed tokens are written to.
    #[must_use]
    pub const fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Snapshot of the token in use.
    pub async fn token(&self) -> Token {
        self.token.lock().await.clone()
    }

    /// A usable access token, refreshing first if the current one has expired.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAuthenticated`] if the token has expired and
    /// cannot be refreshed.
    pub async fn access_token(&self) -> Result<String, CoreError> {
        let mut token = self.token.lock().await;
        if !token.is_expired() {
            return Ok(token.access_token.clone());
        }

        if !token.can_refresh() {
            return Err(CoreError::NotAuthenticated(
                "access token expired and no refresh token is stored - run 'gchat auth login'"
                    .to_string(),
            ));
        }

        log::debug!("access token expired, refreshing");
        let refreshed = self.refresh_and_persist(&token).await.map_err(|e| {
            CoreError::NotAuthenticated(format!(
                "access token expired and refresh failed ({e}) - run 'gchat auth login'"
            ))
        })?;
        *token = refreshed;
        Ok(token.access_token.clone())
    }

    /// Replacement for an access token the server rejected.
    ///
    /// If another caller already replaced `rejected`, its successor is
    /// returned without a second exchange. `None` means no refresh was
    /// possible.
    async fn refresh_after_rejection(&self, rejected: &str) -> Option<String> {
        let mut token = self.token.lock().await;
        if token.access_token != rejected {
            return Some(token.access_token.clone());
        }
        if !token.can_refresh() {
            log::debug!("access token rejected and no refresh token is stored");
            return None;
        }

        match self.refresh_and_persist(&token).await {
            Ok(refreshed) => {
                *token = refreshed;
                Some(token.access_token.clone())
            }
            Err(e) => {
                log::warn!("token refresh failed: {e}");
                None
            }
        }
    }

    async fn refresh_and_persist(&self, current: &Token) -> Result<Token, CoreError> {
        let refreshed =
            auth::refresh_token(&self.http, &self.token_url, &self.credentials, current).await?;
        self.store.save(&refreshed)?;
        Ok(refreshed)
    }

    /// Send a request built by `build`, authenticated with the current token.
    ///
    /// `build` may run twice: once for the first attempt and once more after
    /// a 401 has been answered with a successful refresh.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Api`] for any non-2xx response (a 401 that could
    /// not be recovered classifies as not authenticated) and
    /// [`CoreError::Transport`] if the request could not be sent.
    pub async fn send<F>(&self, build: F) -> Result<Response, CoreError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let access = self.access_token().await?;
        let response = build(&self.http).bearer_auth(&access).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return ensure_success(response).await;
        }

        let Some(fresh) = self.refresh_after_rejection(&access).await else {
            return Err(ApiError::from_response(response).await.into());
        };

        log::debug!("retrying request after token refresh");
        let retried = build(&self.http).bearer_auth(&fresh).send().await?;
        ensure_success(retried).await
    }
}

async fn ensure_success(response: Response) -> Result<Response, CoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ApiError::from_response(response).await.into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use httpmock::prelude::*;

    use super::*;

    fn expired_token() -> Token {
        let mut token = Token::new("ya29.expired");
        token.refresh_token = Some("1//r".to_string());
        token.expiry = Some(Utc::now() - Duration::minutes(5));
        token
    }

    #[tokio::test]
    async fn concurrent_refresh_writes_token_file_once() {
        let server = MockServer::start_async().await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"access_token":"ya29.fresh","expires_in":3599}"#);
            })
            .await;
        let api = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/spaces")
                    .header("authorization", "Bearer ya29.fresh");
                then.status(200).body("{}");
            })
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path().join("token.json"));
        let transport = Arc::new(AuthenticatedTransport::new(
            Client::new(),
            Credentials::new("client-id", "client-secret").expect("credentials"),
            Url::parse(&server.url("/token")).expect("token url"),
            store.clone(),
            expired_token(),
        ));

        let url = server.url("/v1/spaces");
        let mut handles = Vec::new();
        for _ in 0..8 {
            let transport = Arc::clone(&transport);
            let url = url.clone();
            handles.push(tokio::spawn(async move {
                transport.send(|http| http.get(&url)).await.map(|r| r.status())
            }));
        }
        for handle in handles {
            let status = handle.await.expect("join").expect("request succeeds");
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().expect("stored").access_token, "ya29.fresh");
        assert_eq!(transport.token().await.access_token, "ya29.fresh");
        refresh.assert_calls_async(1).await;
        api.assert_calls_async(8).await;
    }

    #[tokio::test]
    async fn failed_refresh_leaves_token_file_untouched() {
        let server = MockServer::start_async().await;
        let _refresh = server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400)
                    .header("content-type", "application/json")
                    .body(r#"{"error":"invalid_grant"}"#);
            })
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path().join("token.json"));
        let transport = AuthenticatedTransport::new(
            Client::new(),
            Credentials::new("client-id", "client-secret").expect("credentials"),
            Url::parse(&server.url("/token")).expect("token url"),
            store.clone(),
            expired_token(),
        );

        let err = transport.access_token().await.expect_err("refresh fails");

        assert!(matches!(err, CoreError::NotAuthenticated(_)));
        assert_eq!(store.save_count(), 0);
        assert!(!store.exists());
    }
}
