//! End-to-end tests for the loopback authorization-code login.

use std::collections::HashMap;
use std::time::Duration;

use gchat_core::chat::{AuthorizationFlow, Credentials, FlowState, LoginError, OAuthEndpoints};
use httpmock::prelude::*;
use tokio::sync::oneshot;
use url::Url;

const TOKEN_BODY: &str = r#"{"access_token":"ya29.login","refresh_token":"1//login-refresh","token_type":"Bearer","expires_in":3599,"scope":"scope.a scope.b"}"#;

fn flow(server: &MockServer, timeout: Duration) -> AuthorizationFlow {
    let endpoints = OAuthEndpoints::new(&server.url("/o/oauth2/auth"), &server.url("/token"))
        .expect("endpoints");
    let credentials = Credentials::new("client-id", "client-secret").expect("credentials");
    AuthorizationFlow::new(
        reqwest::Client::new(),
        endpoints,
        credentials,
        vec!["scope.a".to_string(), "scope.b".to_string()],
    )
    .with_timeout(timeout)
}

/// Redirect URI and state embedded in a consent URL.
fn redirect_target(url: &Url) -> (String, String) {
    let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
    (pairs["redirect_uri"].clone(), pairs["state"].clone())
}

async fn token_mock<'a>(server: &'a MockServer, status: u16, body: &str) -> httpmock::Mock<'a> {
    let body = body.to_string();
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(status)
                .header("content-type", "application/json")
                .body(body);
        })
        .await
}

#[tokio::test]
async fn successful_login_exchanges_code() {
    let server = MockServer::start_async().await;
    let exchange = token_mock(&server, 200, TOKEN_BODY).await;
    let mut flow = flow(&server, Duration::from_secs(10));

    let (tx, rx) = oneshot::channel::<Url>();
    let login = flow.run(move |url| {
        let _ = tx.send(url.clone());
    });
    let browser = async move {
        let consent = rx.await.expect("consent url");
        let (redirect_uri, state) = redirect_target(&consent);
        assert!(redirect_uri.starts_with("http://127.0.0.1:"));
        assert!(redirect_uri.ends_with("/oauth2callback"));

        let callback = format!("{redirect_uri}?code=4%2Fauth-code&state={state}");
        reqwest::get(callback).await.expect("callback").status()
    };

    let (result, callback_status) = tokio::join!(login, browser);
    let token = result.expect("login succeeds");

    assert_eq!(callback_status, reqwest::StatusCode::OK);
    assert_eq!(token.access_token, "ya29.login");
    assert_eq!(token.refresh_token.as_deref(), Some("1//login-refresh"));
    assert!(token.scopes.contains("scope.b"));
    assert!(token.expiry.is_some());
    assert_eq!(flow.state(), FlowState::Complete);
    exchange.assert_calls_async(1).await;
}

#[tokio::test]
async fn state_mismatch_never_exchanges_code() {
    let server = MockServer::start_async().await;
    let exchange = token_mock(&server, 200, TOKEN_BODY).await;
    let mut flow = flow(&server, Duration::from_secs(10));

    let (tx, rx) = oneshot::channel::<Url>();
    let login = flow.run(move |url| {
        let _ = tx.send(url.clone());
    });
    let browser = async move {
        let consent = rx.await.expect("consent url");
        let (redirect_uri, _) = redirect_target(&consent);
        let callback = format!("{redirect_uri}?code=stolen&state=forged");
        let _ = reqwest::get(callback).await;
    };

    let (result, ()) = tokio::join!(login, browser);

    assert!(matches!(result, Err(LoginError::StateMismatch)));
    assert_eq!(flow.state(), FlowState::Failed);
    exchange.assert_calls_async(0).await;
}

#[tokio::test]
async fn other_paths_get_404_and_login_continues() {
    let server = MockServer::start_async().await;
    let _exchange = token_mock(&server, 200, TOKEN_BODY).await;
    let mut flow = flow(&server, Duration::from_secs(10));

    let (tx, rx) = oneshot::channel::<Url>();
    let login = flow.run(move |url| {
        let _ = tx.send(url.clone());
    });
    let browser = async move {
        let consent = rx.await.expect("consent url");
        let (redirect_uri, state) = redirect_target(&consent);
        let base = redirect_uri.trim_end_matches("/oauth2callback").to_string();

        let favicon = reqwest::get(format!("{base}/favicon.ico"))
            .await
            .expect("favicon")
            .status();
        let callback = reqwest::get(format!("{redirect_uri}?code=abc&state={state}"))
            .await
            .expect("callback")
            .status();
        (favicon, callback)
    };

    let (result, (favicon, callback)) = tokio::join!(login, browser);

    assert_eq!(favicon, reqwest::StatusCode::NOT_FOUND);
    assert_eq!(callback, reqwest::StatusCode::OK);
    assert_eq!(result.expect("login succeeds").access_token, "ya29.login");
}

#[tokio::test]
async fn timeout_releases_the_listener() {
    let server = MockServer::start_async().await;
    let exchange = token_mock(&server, 200, TOKEN_BODY).await;
    let mut flow = flow(&server, Duration::from_millis(200));

    let mut port = None;
    let result = flow
        .run(|url| {
            let (redirect_uri, _) = redirect_target(url);
            port = Url::parse(&redirect_uri).ok().and_then(|u| u.port());
        })
        .await;

    assert!(matches!(result, Err(LoginError::Timeout(_))));
    assert_eq!(flow.state(), FlowState::Failed);
    exchange.assert_calls_async(0).await;

    let port = port.expect("listener port");
    std::net::TcpListener::bind(("127.0.0.1", port)).expect("port is free again");
}

#[tokio::test]
async fn denied_consent_is_reported() {
    let server = MockServer::start_async().await;
    let exchange = token_mock(&server, 200, TOKEN_BODY).await;
    let mut flow = flow(&server, Duration::from_secs(10));

    let (tx, rx) = oneshot::channel::<Url>();
    let login = flow.run(move |url| {
        let _ = tx.send(url.clone());
    });
    let browser = async move {
        let consent = rx.await.expect("consent url");
        let (redirect_uri, state) = redirect_target(&consent);
        let _ = reqwest::get(format!("{redirect_uri}?error=access_denied&state={state}")).await;
    };

    let (result, ()) = tokio::join!(login, browser);

    assert!(matches!(result, Err(LoginError::AuthorizationDenied(ref e)) if e == "access_denied"));
    exchange.assert_calls_async(0).await;
}

#[tokio::test]
async fn forged_error_redirect_is_a_state_mismatch() {
    let server = MockServer::start_async().await;
    let exchange = token_mock(&server, 200, TOKEN_BODY).await;
    let mut flow = flow(&server, Duration::from_secs(10));

    let (tx, rx) = oneshot::channel::<Url>();
    let login = flow.run(move |url| {
        let _ = tx.send(url.clone());
    });
    let browser = async move {
        let consent = rx.await.expect("consent url");
        let (redirect_uri, _) = redirect_target(&consent);
        let _ = reqwest::get(format!("{redirect_uri}?error=access_denied&state=forged")).await;
    };

    let (result, ()) = tokio::join!(login, browser);

    assert!(matches!(result, Err(LoginError::StateMismatch)));
    assert_eq!(flow.state(), FlowState::Failed);
    exchange.assert_calls_async(0).await;
}

#[tokio::test]
async fn rejected_exchange_carries_provider_error() {
    let server = MockServer::start_async().await;
    let _exchange = token_mock(
        &server,
        400,
        r#"{"error":"invalid_grant","error_description":"Malformed auth code."}"#,
    )
    .await;
    let mut flow = flow(&server, Duration::from_secs(10));

    let (tx, rx) = oneshot::channel::<Url>();
    let login = flow.run(move |url| {
        let _ = tx.send(url.clone());
    });
    let browser = async move {
        let consent = rx.await.expect("consent url");
        let (redirect_uri, state) = redirect_target(&consent);
        let _ = reqwest::get(format!("{redirect_uri}?code=bad&state={state}")).await;
    };

    let (result, ()) = tokio::join!(login, browser);

    match result {
        Err(LoginError::TokenExchangeFailed { status, message }) => {
            assert_eq!(status, Some(400));
            assert!(message.contains("invalid_grant"));
        }
        other => panic!("expected TokenExchangeFailed, got {other:?}"),
    }
    assert_eq!(flow.state(), FlowState::Failed);
}
