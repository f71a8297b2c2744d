//! Generic invoker behavior against a mock Chat API.

use std::sync::Arc;

use chrono::{Duration, Utc};
use gchat_core::ErrorKind;
use gchat_core::chat::{
    ApiStatus, AuthenticatedTransport, ChatClient, CreateMessage, Credentials, ListMessages,
    PageRequest, Token, TokenStore,
};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use url::Url;

const ACCESS: &str = "ya29.client-test";

fn client(base_url: &str, token_url: &str) -> (TempDir, ChatClient) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut token = Token::new(ACCESS);
    token.expiry = Some(Utc::now() + Duration::hours(1));
    let transport = AuthenticatedTransport::new(
        reqwest::Client::new(),
        Credentials::new("client-id", "client-secret").expect("credentials"),
        Url::parse(token_url).expect("token url"),
        TokenStore::new(dir.path().join("token.json")),
        token,
    );
    (dir, ChatClient::new(Arc::new(transport), base_url))
}

fn mock_client(server: &MockServer) -> (TempDir, ChatClient) {
    client(&server.url("/v1"), &server.url("/token"))
}

#[tokio::test]
async fn list_messages_sends_only_set_params() {
    let server = MockServer::start_async().await;
    let api = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/spaces/AAAA/messages")
                .query_param("pageSize", "25")
                .query_param("filter", "createTime>\"2024-01-01T00:00:00Z\"")
                .query_param("showDeleted", "true")
                .header("authorization", format!("Bearer {ACCESS}"));
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"messages":[{"name":"spaces/AAAA/messages/1"}],"nextPageToken":"p2"}"#);
        })
        .await;
    let (_dir, client) = mock_client(&server);

    let options = ListMessages {
        filter: "createTime>\"2024-01-01T00:00:00Z\"".to_string(),
        order_by: String::new(),
        show_deleted: true,
    };
    let value = client
        .messages()
        .list("AAAA", &options, &PageRequest::sized(25))
        .await
        .expect("list");

    assert_eq!(value["nextPageToken"], "p2");
    api.assert_calls_async(1).await;
}

#[tokio::test]
async fn create_message_posts_json_body() {
    let server = MockServer::start_async().await;
    let api = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/spaces/AAAA/messages")
                .query_param("threadKey", "standup")
                .query_param("messageReplyOption", "REPLY_MESSAGE_FALLBACK_TO_NEW_THREAD")
                .json_body(json!({"text": "hello"}));
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"name":"spaces/AAAA/messages/XYZ","text":"hello"}"#);
        })
        .await;
    let (_dir, client) = mock_client(&server);

    let options = CreateMessage {
        thread_key: "standup".to_string(),
        reply_option: "REPLY_MESSAGE_FALLBACK_TO_NEW_THREAD".to_string(),
        ..CreateMessage::default()
    };
    let value = client
        .messages()
        .create("spaces/AAAA", &json!({"text": "hello"}), &options)
        .await
        .expect("create");

    assert_eq!(value["name"], "spaces/AAAA/messages/XYZ");
    api.assert_calls_async(1).await;
}

#[tokio::test]
async fn empty_success_body_is_empty_object() {
    let server = MockServer::start_async().await;
    let api = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/v1/spaces/AAAA/messages/XYZ")
                .query_param("force", "true");
            then.status(200);
        })
        .await;
    let (_dir, client) = mock_client(&server);

    let value = client
        .messages()
        .delete("spaces/AAAA/messages/XYZ", true)
        .await
        .expect("delete");

    assert_eq!(value, json!({}));
    api.assert_calls_async(1).await;
}

#[tokio::test]
async fn rate_limit_is_classified_for_any_verb() {
    let server = MockServer::start_async().await;
    let _api = server
        .mock_async(|when, then| {
            when.method(PATCH).path("/v1/spaces/AAAA");
            then.status(429)
                .header("content-type", "application/json")
                .body(r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded for quota metric 'Read requests'."}}"#);
        })
        .await;
    let (_dir, client) = mock_client(&server);

    let err = client
        .spaces()
        .patch("AAAA", &json!({"displayName": "x"}), "displayName", false)
        .await
        .expect_err("should fail");

    assert_eq!(err.kind(), ErrorKind::RateLimited);
    let api = err.api_error().expect("api error");
    assert_eq!(api.status, ApiStatus::ResourceExhausted);
    assert!(api.hint().is_some());
}

#[tokio::test]
async fn insufficient_scopes_is_permission_denied_with_hint() {
    let server = MockServer::start_async().await;
    let _api = server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/customEmojis");
            then.status(403)
                .header("content-type", "application/json")
                .body(r#"{"error":{"code":403,"status":"PERMISSION_DENIED","message":"Request had insufficient authentication scopes.","details":[{"@type":"type.googleapis.com/google.rpc.ErrorInfo","reason":"ACCESS_TOKEN_SCOPE_INSUFFICIENT","domain":"googleapis.com","metadata":{"service":"chat.googleapis.com"}}]}}"#);
        })
        .await;
    let (_dir, client) = mock_client(&server);

    let err = client
        .emoji()
        .list("", &PageRequest::default())
        .await
        .expect_err("should fail");

    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let api = err.api_error().expect("api error");
    assert_eq!(api.reason(), Some("ACCESS_TOKEN_SCOPE_INSUFFICIENT"));
    assert_eq!(api.details[0].metadata["service"], "chat.googleapis.com");
    assert!(api.hint().is_some_and(|h| h.contains("gchat auth login")));
}

#[tokio::test]
async fn non_json_error_keeps_raw_body() {
    let server = MockServer::start_async().await;
    let _api = server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/spaces/GONE");
            then.status(404).body("<html>Not Found</html>");
        })
        .await;
    let (_dir, client) = mock_client(&server);

    let err = client.spaces().get("GONE", false).await.expect_err("should fail");

    assert_eq!(err.kind(), ErrorKind::NotFound);
    let api = err.api_error().expect("api error");
    assert_eq!(api.code, 404);
    assert_eq!(api.raw_body, "<html>Not Found</html>");
}

#[tokio::test]
async fn download_streams_body_with_content_type() {
    let server = MockServer::start_async().await;
    let payload: Vec<u8> = (0..=255_u8).cycle().take(64 * 1024).collect();
    let body = payload.clone();
    let api = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/media/spaces/AAAA/attachments/BBBB")
                .query_param("alt", "media");
            then.status(200).header("content-type", "image/png").body(body);
        })
        .await;
    let (_dir, client) = mock_client(&server);

    let download = client
        .media()
        .download("spaces/AAAA/attachments/BBBB")
        .await
        .expect("download");
    assert_eq!(download.content_type.as_deref(), Some("image/png"));

    let mut sink: Vec<u8> = Vec::new();
    let written = download.copy_to(&mut sink).await.expect("copy");

    assert_eq!(written, payload.len() as u64);
    assert_eq!(sink, payload);
    api.assert_calls_async(1).await;
}

/// Accept one HTTP request, capture it verbatim, answer with `response_body`.
async fn capture_one_request(listener: TcpListener, response_body: &'static str) -> Vec<u8> {
    let (mut stream, _) = listener.accept().await.expect("accept");
    let mut request = Vec::new();
    let mut chunk = [0_u8; 8192];

    loop {
        let read = stream.read(&mut chunk).await.expect("read");
        if read == 0 {
            break;
        }
        request.extend_from_slice(&chunk[..read]);
        if request_complete(&request) {
            break;
        }
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{response_body}",
        response_body.len()
    );
    stream.write_all(response.as_bytes()).await.expect("write");
    let _ = stream.shutdown().await;
    request
}

fn request_complete(request: &[u8]) -> bool {
    let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&request[..head_end]).to_ascii_lowercase();
    let body_len = request.len() - head_end - 4;
    head.lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map_or_else(|| request.ends_with(b"0\r\n\r\n"), |len| body_len >= len)
}

#[tokio::test]
async fn upload_builds_multipart_with_inferred_type() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let captured = capture_one_request(
            listener,
            r#"{"attachmentDataRef":{"resourceName":"ref-123"}}"#,
        )
        .await;
        let _ = tx.send(captured);
    });

    let base = format!("http://127.0.0.1:{port}/v1");
    let (_dir, client) = client(&base, &format!("http://127.0.0.1:{port}/token"));

    let value = client
        .media()
        .upload_bytes("AAAA", b"%PDF-1.7 fake".to_vec(), "report.pdf")
        .await
        .expect("upload");
    assert_eq!(value["attachmentDataRef"]["resourceName"], "ref-123");

    let raw = rx.await.expect("captured request");
    let text = String::from_utf8_lossy(&raw).into_owned();
    let lower = text.to_ascii_lowercase();

    assert!(text.starts_with("POST /v1/spaces/AAAA/attachments:upload "));
    assert!(lower.contains("content-type: multipart/form-data; boundary="));
    assert!(lower.contains(&format!("authorization: bearer {}", ACCESS.to_ascii_lowercase())));
    assert!(text.contains("name=\"file\"; filename=\"report.pdf\""));
    assert!(lower.contains("content-type: application/pdf"));
    assert!(text.contains("%PDF-1.7 fake"));

    let field = text
        .split("name=\"filename\"\r\n\r\n")
        .nth(1)
        .expect("filename field");
    assert!(field.starts_with("report.pdf\r\n"));
}
