//! Browser-based OAuth2 authorization-code login.
//!
//! The flow:
//! 1. Generate a random `state` value and bind a loopback listener on an
//!    ephemeral port
//! 2. Hand the consent URL to the caller, who prints it and opens a browser
//! 3. Wait for the redirect to `/oauth2callback` carrying `code` and `state`
//! 4. Exchange the code at the token endpoint
//!
//! The listener lives only inside [`AuthorizationFlow::run`] and is dropped
//! on every exit path, including timeout and cancellation of the future.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::CoreError;
use crate::chat::credentials::Credentials;
use crate::chat::token::{Token, TokenResponse};
use crate::config::AuthConfig;

/// Path the provider redirects to on the loopback listener.
pub const CALLBACK_PATH: &str = "/oauth2callback";

/// Default time to wait for the browser redirect.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on a single callback request head.
const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Connections that send nothing (browser preconnects) are dropped after this.
const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = "<html><body><h1>Authorization Successful</h1><p>You can close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Authorization Failed</h1><p>Return to the terminal for details.</p></body></html>";

/// Errors from the interactive login flow.
#[derive(Debug, Error)]
pub enum LoginError {
    /// No loopback port could be bound.
    #[error("could not bind a loopback listener: {0}")]
    ListenerBindFailed(#[source] std::io::Error),

    /// No redirect arrived in time.
    #[error("timed out after {}s waiting for the browser redirect", .0.as_secs())]
    Timeout(Duration),

    /// The redirect carried a `state` other than the one generated for this attempt.
    #[error("state parameter mismatch; the authorization code was discarded")]
    StateMismatch,

    /// The user or provider refused consent.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The redirect carried neither `code` nor `error`.
    #[error("redirect did not include an authorization code")]
    MissingCode,

    /// Accepting on the loopback listener failed.
    #[error("callback listener failed: {0}")]
    Callback(#[source] std::io::Error),

    /// The token endpoint rejected the exchange or could not be reached.
    #[error("token exchange failed{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    TokenExchangeFailed {
        /// HTTP status, absent when the request never completed.
        status: Option<u16>,
        /// Provider diagnostic or transport error text.
        message: String,
    },
}

/// Progress of an [`AuthorizationFlow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Not started.
    Idle,
    /// Listener bound, waiting for the browser redirect.
    AwaitingRedirect,
    /// Redirect validated, exchanging the code.
    Exchanging,
    /// Token obtained.
    Complete,
    /// Terminal failure.
    Failed,
}

/// Provider authorization and token endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    /// Consent page the browser is sent to.
    pub auth_url: Url,
    /// Token endpoint for the code and refresh grants.
    pub token_url: Url,
}

impl OAuthEndpoints {
    /// Parse endpoint URLs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if either URL is malformed.
    pub fn new(auth_url: &str, token_url: &str) -> Result<Self, CoreError> {
        Ok(Self {
            auth_url: parse_url("auth_url", auth_url)?,
            token_url: parse_url("token_url", token_url)?,
        })
    }

    /// Endpoints from the `[auth]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if either URL is malformed.
    pub fn from_config(auth: &AuthConfig) -> Result<Self, CoreError> {
        Self::new(&auth.auth_url, &auth.token_url)
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url, CoreError> {
    Url::parse(value).map_err(|e| CoreError::Config(format!("auth.{field} '{value}': {e}")))
}

/// One interactive authorization-code login attempt.
#[derive(Debug)]
pub struct AuthorizationFlow {
    http: reqwest::Client,
    endpoints: OAuthEndpoints,
    credentials: Credentials,
    scopes: Vec<String>,
    timeout: Duration,
    state: FlowState,
}

impl AuthorizationFlow {
    /// Create a flow for the given client and scopes.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        endpoints: OAuthEndpoints,
        credentials: Credentials,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            http,
            endpoints,
            credentials,
            scopes,
            timeout: DEFAULT_LOGIN_TIMEOUT,
            state: FlowState::Idle,
        }
    }

    /// Override how long to wait for the redirect.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> FlowState {
        self.state
    }

    /// Run the flow to completion.
    ///
    /// `present` receives the consent URL once the listener is ready; it is
    /// expected to print it and open the browser. Failures to open a browser
    /// are the caller's to ignore.
    ///
    /// # Errors
    ///
    /// Returns a [`LoginError`] describing the failed step. The flow is then
    /// in [`FlowState::Failed`].
    pub async fn run(&mut self, present: impl FnOnce(&Url)) -> Result<Token, LoginError> {
        let result = self.drive(present).await;
        self.state = if result.is_ok() {
            FlowState::Complete
        } else {
            FlowState::Failed
        };
        result
    }

    async fn drive(&mut self, present: impl FnOnce(&Url)) -> Result<Token, LoginError> {
        let state = random_state();
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(LoginError::ListenerBindFailed)?;
        let port = listener
            .local_addr()
            .map_err(LoginError::ListenerBindFailed)?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");

        self.state = FlowState::AwaitingRedirect;
        log::debug!("login listener bound on 127.0.0.1:{port}");
        present(&self.authorization_url(&redirect_uri, &state));

        let code = tokio::time::timeout(self.timeout, await_redirect(&listener, &state))
            .await
            .map_err(|_| LoginError::Timeout(self.timeout))??;
        drop(listener);

        self.state = FlowState::Exchanging;
        log::debug!("authorization code received, exchanging");
        self.exchange_code(&code, &redirect_uri).await
    }

    /// Consent URL for the given redirect and state.
    fn authorization_url(&self, redirect_uri: &str, state: &str) -> Url {
        let mut url = self.endpoints.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", self.credentials.client_id())
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        url
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Token, LoginError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.credentials.client_id()),
            ("client_secret", self.credentials.client_secret()),
        ];
        let response = post_token_form(&self.http, &self.endpoints.token_url, &form).await?;
        Ok(Token::from_response(response, None, &self.scopes))
    }
}

/// Exchange a refresh token for a new access token.
///
/// The previous refresh token and scopes are kept when the provider omits them.
///
/// # Errors
///
/// Returns [`LoginError::TokenExchangeFailed`] if the token has no refresh
/// token or the endpoint rejects the request.
pub async fn refresh_token(
    http: &reqwest::Client,
    token_url: &Url,
    credentials: &Credentials,
    token: &Token,
) -> Result<Token, LoginError> {
    let refresh = token
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| LoginError::TokenExchangeFailed {
            status: None,
            message: "no refresh token available".to_string(),
        })?;
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", credentials.client_id()),
        ("client_secret", credentials.client_secret()),
    ];
    let response = post_token_form(http, token_url, &form).await?;
    log::debug!("access token refreshed");
    Ok(Token::from_response(response, Some(token), &[]))
}

#[derive(Deserialize)]
struct TokenEndpointError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

async fn post_token_form(
    http: &reqwest::Client,
    token_url: &Url,
    form: &[(&str, &str)],
) -> Result<TokenResponse, LoginError> {
    let transport = |e: reqwest::Error| LoginError::TokenExchangeFailed {
        status: None,
        message: e.to_string(),
    };

    let response = http
        .post(token_url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(transport)?;

    let status = response.status();
    let body = response.text().await.map_err(transport)?;

    if !status.is_success() {
        let message = serde_json::from_str::<TokenEndpointError>(&body).map_or_else(
            |_| body.trim().to_string(),
            |e| match e.error_description {
                Some(description) => format!("{}: {description}", e.error),
                None => e.error,
            },
        );
        return Err(LoginError::TokenExchangeFailed {
            status: Some(status.as_u16()),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| LoginError::TokenExchangeFailed {
        status: Some(status.as_u16()),
        message: format!("unreadable token response: {e}"),
    })
}

fn random_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl CallbackParams {
    fn parse(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// Serve the loopback listener until a callback arrives. Other paths get a 404.
async fn await_redirect(listener: &TcpListener, expected_state: &str) -> Result<String, LoginError> {
    loop {
        let (mut stream, peer) = listener.accept().await.map_err(LoginError::Callback)?;

        let target = match read_request_target(&mut stream).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                let _ = respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
                continue;
            }
            Err(e) => {
                log::debug!("dropping callback connection from {peer}: {e}");
                continue;
            }
        };

        let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
        if path != CALLBACK_PATH {
            log::debug!("ignoring request for {path} on login listener");
            let _ = respond(&mut stream, "404 Not Found", "").await;
            continue;
        }

        let params = CallbackParams::parse(query);
        let outcome = check_callback(params, expected_state);
        let page = if outcome.is_ok() {
            SUCCESS_PAGE
        } else {
            FAILURE_PAGE
        };
        let _ = respond(&mut stream, "200 OK", page).await;
        return outcome;
    }
}

/// State is checked before anything else: a redirect with a foreign state
/// is rejected even when it carries an `error`.
fn check_callback(params: CallbackParams, expected_state: &str) -> Result<String, LoginError> {
    if params.state.as_deref() != Some(expected_state) {
        return Err(LoginError::StateMismatch);
    }
    if let Some(error) = params.error {
        return Err(LoginError::AuthorizationDenied(error));
    }
    params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(LoginError::MissingCode)
}

/// Read the request head and return the request target of a `GET`.
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let read = tokio::time::timeout(CONNECTION_READ_TIMEOUT, stream.read(&mut chunk))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "idle connection"))??;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buffer);
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(Some(target.to_string())),
        _ => Ok(None),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> AuthorizationFlow {
        AuthorizationFlow::new(
            reqwest::Client::new(),
            OAuthEndpoints::new("https://accounts.example.com/o/oauth2/auth", "https://oauth2.example.com/token")
                .expect("endpoints"),
            Credentials::new("client-123", "secret-456").expect("credentials"),
            vec!["scope.a".to_string(), "scope.b".to_string()],
        )
    }

    #[test]
    fn authorization_url_carries_required_params() {
        let url = flow().authorization_url("http://127.0.0.1:4000/oauth2callback", "xyz");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:4000/oauth2callback");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "scope.a scope.b");
        assert_eq!(pairs["state"], "xyz");
        assert_eq!(pairs["access_type"], "offline");
        assert!(!pairs.contains_key("client_secret"));
    }

    #[test]
    fn new_flow_is_idle() {
        assert_eq!(flow().state(), FlowState::Idle);
    }

    #[test]
    fn state_values_are_unique_and_url_safe() {
        let a = random_state();
        let b = random_state();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn callback_query_is_decoded() {
        let params = CallbackParams::parse("state=a%2Fb&code=4%2F0Ab&scope=x+y");
        assert_eq!(params.state.as_deref(), Some("a/b"));
        assert_eq!(params.code.as_deref(), Some("4/0Ab"));
        assert!(params.error.is_none());
    }

    #[test]
    fn callback_checks() {
        let ok = CallbackParams {
            code: Some("c".to_string()),
            state: Some("s".to_string()),
            error: None,
        };
        assert_eq!(check_callback(ok, "s").expect("valid"), "c");

        let wrong_state = CallbackParams {
            code: Some("c".to_string()),
            state: Some("other".to_string()),
            error: None,
        };
        assert!(matches!(check_callback(wrong_state, "s"), Err(LoginError::StateMismatch)));

        let denied = CallbackParams {
            state: Some("s".to_string()),
            error: Some("access_denied".to_string()),
            ..CallbackParams::default()
        };
        assert!(matches!(
            check_callback(denied, "s"),
            Err(LoginError::AuthorizationDenied(e)) if e == "access_denied"
        ));

        let no_code = CallbackParams {
            state: Some("s".to_string()),
            ..CallbackParams::default()
        };
        assert!(matches!(check_callback(no_code, "s"), Err(LoginError::MissingCode)));
    }

    #[test]
    fn foreign_state_wins_over_error_parameter() {
        let forged = CallbackParams {
            state: Some("forged".to_string()),
            error: Some("access_denied".to_string()),
            code: None,
        };
        assert!(matches!(
            check_callback(forged, "real-state"),
            Err(LoginError::StateMismatch)
        ));

        let stateless = CallbackParams {
            error: Some("access_denied".to_string()),
            ..CallbackParams::default()
        };
        assert!(matches!(
            check_callback(stateless, "real-state"),
            Err(LoginError::StateMismatch)
        ));
    }
}
