//! Token injection, refresh-on-401, and single-flight refresh.

use std::sync::Arc;

use chrono::{Duration, Utc};
use gchat_core::chat::{
    AuthenticatedTransport, ChatClient, Credentials, PageRequest, Token, TokenStore,
};
use gchat_core::{CoreError, ErrorKind};
use httpmock::prelude::*;
use tempfile::TempDir;
use url::Url;

const UNAUTHENTICATED: &str = r#"{"error":{"code":401,"status":"UNAUTHENTICATED","message":"Request had invalid authentication credentials."}}"#;

struct Harness {
    _dir: TempDir,
    store: TokenStore,
    client: ChatClient,
}

fn token(access: &str, refresh: Option<&str>, expires_in: Duration) -> Token {
    let mut token = Token::new(access);
    token.refresh_token = refresh.map(str::to_string);
    token.expiry = Some(Utc::now() + expires_in);
    token.scopes.insert("scope.a".to_string());
    token
}

fn harness(server: &MockServer, initial: Token) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TokenStore::new(dir.path().join("token.json"));
    store.save(&initial).expect("seed token");

    let transport = AuthenticatedTransport::from_store(
        reqwest::Client::new(),
        Credentials::new("client-id", "client-secret").expect("credentials"),
        Url::parse(&server.url("/token")).expect("token url"),
        store.clone(),
    )
    .expect("transport");
    let client = ChatClient::new(Arc::new(transport), &server.url("/v1"));

    Harness {
        _dir: dir,
        store,
        client,
    }
}

async fn token_endpoint<'a>(server: &'a MockServer, status: u16, body: &str) -> httpmock::Mock<'a> {
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

async fn spaces_for<'a>(server: &'a MockServer, access: &str, status: u16, body: &str) -> httpmock::Mock<'a> {
    let auth = format!("Bearer {access}");
    let body = body.to_string();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/spaces").header("authorization", auth);
            then.status(status)
                .header("content-type", "application/json")
                .body(body);
        })
        .await
}

#[tokio::test]
async fn bearer_token_is_attached() {
    let server = MockServer::start_async().await;
    let api = spaces_for(&server, "ya29.valid", 200, r#"{"spaces":[]}"#).await;
    let h = harness(&server, token("ya29.valid", Some("1//r"), Duration::hours(1)));

    let value = h
        .client
        .spaces()
        .list("", &PageRequest::default())
        .await
        .expect("list");

    assert_eq!(value["spaces"], serde_json::json!([]));
    api.assert_calls_async(1).await;
}

#[tokio::test]
async fn unauthorized_triggers_one_refresh_and_retry() {
    let server = MockServer::start_async().await;
    let stale = spaces_for(&server, "ya29.stale", 401, UNAUTHENTICATED).await;
    let fresh = spaces_for(&server, "ya29.fresh", 200, r#"{"spaces":[{"name":"spaces/A"}]}"#).await;
    let refresh = token_endpoint(
        &server,
        200,
        r#"{"access_token":"ya29.fresh","expires_in":3599,"token_type":"Bearer"}"#,
    )
    .await;
    let h = harness(&server, token("ya29.stale", Some("1//keep"), Duration::hours(1)));

    let value = h
        .client
        .spaces()
        .list("", &PageRequest::default())
        .await
        .expect("retried request succeeds");

    assert_eq!(value["spaces"][0]["name"], "spaces/A");
    stale.assert_calls_async(1).await;
    fresh.assert_calls_async(1).await;
    refresh.assert_calls_async(1).await;

    let stored = h.store.load().expect("stored token");
    assert_eq!(stored.access_token, "ya29.fresh");
    assert_eq!(stored.refresh_token.as_deref(), Some("1//keep"));
    assert!(stored.scopes.contains("scope.a"));
}

#[tokio::test]
async fn concurrent_expired_requests_refresh_once() {
    let server = MockServer::start_async().await;
    let api = spaces_for(&server, "ya29.fresh", 200, r#"{"spaces":[]}"#).await;
    let refresh = token_endpoint(
        &server,
        200,
        r#"{"access_token":"ya29.fresh","refresh_token":"1//rotated","expires_in":3599}"#,
    )
    .await;
    let h = harness(&server, token("ya29.expired", Some("1//r"), Duration::minutes(-5)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = h.client.clone();
        handles.push(tokio::spawn(async move {
            client.spaces().list("", &PageRequest::default()).await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("request succeeds");
    }

    refresh.assert_calls_async(1).await;
    api.assert_calls_async(8).await;

    let stored = h.store.load().expect("stored token");
    assert_eq!(stored.access_token, "ya29.fresh");
    assert_eq!(stored.refresh_token.as_deref(), Some("1//rotated"));
}

#[tokio::test]
async fn failed_refresh_surfaces_unauthenticated_without_looping() {
    let server = MockServer::start_async().await;
    let api = spaces_for(&server, "ya29.stale", 401, UNAUTHENTICATED).await;
    let refresh = token_endpoint(&server, 400, r#"{"error":"invalid_grant"}"#).await;
    let h = harness(&server, token("ya29.stale", Some("1//revoked"), Duration::hours(1)));

    let err = h
        .client
        .spaces()
        .list("", &PageRequest::default())
        .await
        .expect_err("should fail");

    assert_eq!(err.kind(), ErrorKind::NotAuthenticated);
    let api_error = err.api_error().expect("classified API error");
    assert_eq!(api_error.code, 401);
    api.assert_calls_async(1).await;
    refresh.assert_calls_async(1).await;
    assert_eq!(h.store.load().expect("token kept").access_token, "ya29.stale");
}

#[tokio::test]
async fn unauthorized_without_refresh_token_is_not_retried() {
    let server = MockServer::start_async().await;
    let api = spaces_for(&server, "ya29.only", 401, UNAUTHENTICATED).await;
    let refresh = token_endpoint(&server, 200, r#"{"access_token":"never"}"#).await;
    let h = harness(&server, token("ya29.only", None, Duration::hours(1)));

    let err = h
        .client
        .spaces()
        .list("", &PageRequest::default())
        .await
        .expect_err("should fail");

    assert_eq!(err.kind(), ErrorKind::NotAuthenticated);
    api.assert_calls_async(1).await;
    refresh.assert_calls_async(0).await;
}

#[tokio::test]
async fn expired_token_without_refresh_fails_before_sending() {
    let server = MockServer::start_async().await;
    let api = spaces_for(&server, "ya29.old", 200, r#"{"spaces":[]}"#).await;
    let h = harness(&server, token("ya29.old", None, Duration::minutes(-1)));

    let err = h
        .client
        .spaces()
        .list("", &PageRequest::default())
        .await
        .expect_err("should fail");

    assert!(matches!(err, CoreError::NotAuthenticated(_)));
    api.assert_calls_async(0).await;
}
