//! Generic REST invoker for the Chat API.
//!
//! Paths are relative to the configured base URL (`spaces`, `spaces/AAA/messages`,
//! `spaces:search`). Bodies are passed through as JSON; typed views live in
//! [`crate::chat::models`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Response};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt as _};

use crate::CoreError;
use crate::chat::transport::AuthenticatedTransport;
use crate::config::ApiConfig;

/// Fallback content type for uploads with an unknown extension.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Build the HTTP client shared by the login flow and the API transport.
///
/// No overall request timeout is set so that downloads are bounded by the
/// caller's command timeout rather than by a fixed limit.
///
/// # Errors
///
/// Returns [`CoreError::Config`] if the client cannot be constructed.
pub fn build_http_client(api: &ApiConfig) -> Result<Client, CoreError> {
    let user_agent = api
        .user_agent
        .clone()
        .unwrap_or_else(|| format!("{}/{}", crate::APP_NAME, env!("CARGO_PKG_VERSION")));

    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| CoreError::Config(format!("creating HTTP client: {e}")))
}

/// Prefix `name` with `collection/` unless it already starts with it.
///
/// Idempotent: `normalize_name(&normalize_name(x, c), c) == normalize_name(x, c)`.
#[must_use]
pub fn normalize_name(name: &str, collection: &str) -> String {
    let name = name.trim().trim_start_matches('/');
    let collection = collection.trim_end_matches('/');
    if name
        .strip_prefix(collection)
        .is_some_and(|rest| rest.starts_with('/'))
    {
        name.to_string()
    } else {
        format!("{collection}/{name}")
    }
}

/// Require a non-empty resource argument.
pub(crate) fn require<'a>(value: &'a str, what: &str) -> Result<&'a str, CoreError> {
    let value = value.trim();
    if value.is_empty() {
        Err(CoreError::InvalidInput(format!("{what} must not be empty")))
    } else {
        Ok(value)
    }
}

/// Page size and continuation token for list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum items per page; `0` leaves the server default.
    pub page_size: u32,
    /// Token from a previous page's `nextPageToken`.
    pub page_token: Option<String>,
}

impl PageRequest {
    /// First page with the given size.
    #[must_use]
    pub const fn sized(page_size: u32) -> Self {
        Self {
            page_size,
            page_token: None,
        }
    }

    /// Same size, continuing at `token`.
    #[must_use]
    pub fn next(&self, token: impl Into<String>) -> Self {
        Self {
            page_size: self.page_size,
            page_token: Some(token.into()),
        }
    }
}

/// Query parameters for a single request.
///
/// Keys are unique (setting a key twice keeps the last value) and zero
/// values are never added, so server-side defaults stay in effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    /// Empty query.
    #[must_use]
    pub const fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Add a string value, skipped when empty.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.set(key, value.to_string());
        }
        self
    }

    /// Add an optional string value, skipped when `None` or empty.
    #[must_use]
    pub fn with_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    /// Add an integer value, skipped when zero.
    #[must_use]
    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        if value != 0 {
            self.set(key, value.to_string());
        }
        self
    }

    /// Add a boolean flag, skipped when false.
    #[must_use]
    pub fn with_flag(mut self, key: &str, value: bool) -> Self {
        if value {
            self.set(key, "true".to_string());
        }
        self
    }

    /// Add `pageSize` and `pageToken`.
    #[must_use]
    pub fn with_page(self, page: &PageRequest) -> Self {
        self.with_int("pageSize", i64::from(page.page_size))
            .with_opt("pageToken", page.page_token.as_deref())
    }

    /// Value for `key`, if set.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether no parameters are set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Parameters in insertion order.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    fn set(&mut self, key: &str, value: String) {
        if let Some(slot) = self.pairs.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.pairs.push((key.to_string(), value));
        }
    }
}

/// A successful media download. The body has not been read yet.
#[derive(Debug)]
pub struct Download {
    /// Declared `Content-Type`, if any.
    pub content_type: Option<String>,
    /// Declared `Content-Length`, if any.
    pub content_length: Option<u64>,
    response: Response,
}

impl Download {
    /// Stream the body into `writer` chunk by chunk. Returns bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the body or writing to `writer` fails.
    pub async fn copy_to<W>(mut self, writer: &mut W) -> Result<u64, CoreError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0_u64;
        while let Some(chunk) = self.response.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Unread response, for callers that want to drive the body themselves.
    #[must_use]
    pub fn into_response(self) -> Response {
        self.response
    }
}

/// Chat API client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    transport: Arc<AuthenticatedTransport>,
    base_url: String,
}

impl ChatClient {
    /// Create a client against `base_url` (e.g. `https://chat.googleapis.com/v1`).
    #[must_use]
    pub fn new(transport: Arc<AuthenticatedTransport>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The transport requests go through.
    #[must_use]
    pub fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `GET {path}`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Api`] on a non-2xx response.
    pub async fn get(&self, path: &str, query: &Query) -> Result<Value, CoreError> {
        self.request::<Value>(Method::GET, path, query, None).await
    }

    /// `POST {path}` with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Api`] on a non-2xx response.
    pub async fn post<B>(&self, path: &str, query: &Query, body: &B) -> Result<Value, CoreError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, query, Some(body)).await
    }

    /// `PATCH {path}` with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Api`] on a non-2xx response.
    pub async fn patch<B>(&self, path: &str, query: &Query, body: &B) -> Result<Value, CoreError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, query, Some(body)).await
    }

    /// `PUT {path}` with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Api`] on a non-2xx response.
    pub async fn put<B>(&self, path: &str, query: &Query, body: &B) -> Result<Value, CoreError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, query, Some(body)).await
    }

    /// `DELETE {path}`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Api`] on a non-2xx response.
    pub async fn delete(&self, path: &str, query: &Query) -> Result<Value, CoreError> {
        self.request::<Value>(Method::DELETE, path, query, None).await
    }

    async fn request<B>(
        &self,
        method: Method,
        path: &str,
        query: &Query,
        body: Option<&B>,
    ) -> Result<Value, CoreError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        log::debug!("{method} {url}");

        let response = self
            .transport
            .send(|http| {
                let mut request = http.request(method.clone(), &url).query(query.pairs());
                if let Some(body) = body {
                    request = request.json(body);
                }
                request
            })
            .await?;

        decode_json(response).await
    }

    /// Multipart `POST {path}` with a `file` part and a `filename` field.
    ///
    /// The part's content type is inferred from the file extension.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Api`] on a non-2xx response.
    pub async fn upload(
        &self,
        path: &str,
        query: &Query,
        content: Vec<u8>,
        filename: &str,
    ) -> Result<Value, CoreError> {
        let url = self.url(path);
        let mime = mime_for_path(filename);
        log::debug!("POST {url} ({} bytes, {mime})", content.len());

        let response = self
            .transport
            .send(|http| {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(mime));
                let part = Part::bytes(content.clone())
                    .file_name(filename.to_string())
                    .headers(headers);
                let form = Form::new()
                    .part("file", part)
                    .text("filename", filename.to_string());
                http.post(&url).query(query.pairs()).multipart(form)
            })
            .await?;

        decode_json(response).await
    }

    /// `GET media/{resource_name}?alt=media`, returned unbuffered.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Api`] on a non-2xx response.
    pub async fn download(&self, resource_name: &str) -> Result<Download, CoreError> {
        let resource_name = require(resource_name, "resource name")?;
        let url = self.url(&format!("media/{}", resource_name.trim_start_matches('/')));
        log::debug!("GET {url} (media)");

        let response = self
            .transport
            .send(|http| http.get(&url).query(&[("alt", "media")]))
            .await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        Ok(Download {
            content_type,
            content_length,
            response,
        })
    }
}

async fn decode_json(response: Response) -> Result<Value, CoreError> {
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| CoreError::Serialization(format!("decoding API response: {e}")))
}

/// Content type for a file name, by extension.
#[must_use]
pub fn mime_for_path(filename: &str) -> &'static str {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map_or(OCTET_STREAM, |ext| mime_for_ext(&ext.to_ascii_lowercase()))
}

fn mime_for_ext(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "csv" => "text/csv",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => OCTET_STREAM,
    }
}
