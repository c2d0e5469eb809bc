//! HTTP implementation of the transfer session protocol
//!
//! # Example
//!
//! ```no_run
//! use chunked_uploadr::client::{HttpTransferClient, InitRequest, TransferClient};
//! use chunked_uploadr::config::ServerConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig {
//!     base_url: "https://files.example.com/api".into(),
//!     token: Some("secret".into()),
//!     ..Default::default()
//! };
//! let client = HttpTransferClient::new(&config)?;
//! let session = client
//!     .init(&InitRequest {
//!         name: "hello.txt".into(),
//!         size: 5,
//!         mime_type: "text/plain".into(),
//!         parent_id: None,
//!         total_chunks: 1,
//!     })
//!     .await?;
//! client.upload_chunk(&session, 0, "hello".into()).await?;
//! let file = client.finalize(&session.session_id).await?;
//! println!("stored as {}", file.id);
//! # Ok(())
//! # }
//! ```

use super::{ChunkAck, ClientError, FinalizedFile, InitRequest, TransferClient, UploadSession};
use crate::config::{has_unexpanded_env_var, ServerConfig};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeRequest<'a> {
    session_id: &'a str,
}

/// Transfer client speaking JSON + multipart over HTTP
pub struct HttpTransferClient {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    init_path: String,
    finalize_path: String,
}

impl HttpTransferClient {
    /// Create a new client from server configuration
    pub fn new(config: &ServerConfig) -> Result<Self, ClientError> {
        if config.base_url.is_empty() {
            return Err(ClientError::Config("base_url is not configured".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config
                .token
                .clone()
                .filter(|t| !t.is_empty() && !has_unexpanded_env_var(t)),
            init_path: config.init_path.clone(),
            finalize_path: config.finalize_path.clone(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a path or absolute URL against the base URL
    pub fn resolve(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let request = self.http_client.post(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and turn non-2xx statuses into `ClientError::Status`
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Request(e.to_string())
    }
}

/// Pick the human-readable message out of an error response.
///
/// Prefers a JSON `error` or `message` field, then the raw body, then the
/// status reason phrase.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }

    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }

    format!(
        "HTTP {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("error")
    )
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    #[tracing::instrument(
        name = "transfer.init",
        skip(self, request),
        fields(
            upload.name = %request.name,
            upload.size = request.size,
            upload.total_chunks = request.total_chunks,
            session.id = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn init(&self, request: &InitRequest) -> Result<UploadSession, ClientError> {
        let url = self.resolve(&self.init_path);
        let response = self.send(self.post(url).json(request)).await?;

        let session: UploadSession = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        if session.session_id.is_empty() {
            return Err(ClientError::InvalidResponse("empty sessionId".into()));
        }

        tracing::Span::current().record("session.id", session.session_id.as_str());
        Ok(session)
    }

    #[tracing::instrument(
        name = "transfer.upload_chunk",
        skip(self, session, body),
        fields(
            session.id = %session.session_id,
            chunk.index = index,
            upload.bytes = body.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload_chunk(
        &self,
        session: &UploadSession,
        index: u64,
        body: Bytes,
    ) -> Result<ChunkAck, ClientError> {
        let url = self.resolve(&session.upload_endpoint);
        let chunk = Part::stream(body)
            .file_name(format!("chunk-{}", index))
            .mime_str("application/octet-stream")
            .map_err(map_reqwest_error)?;
        let form = Form::new()
            .text("sessionId", session.session_id.clone())
            .text("chunkIndex", index.to_string())
            .part("chunk", chunk);

        self.send(self.post(url).multipart(form)).await?;

        Ok(ChunkAck {
            session_id: session.session_id.clone(),
            index,
        })
    }

    #[tracing::instrument(
        name = "transfer.finalize",
        skip(self),
        fields(
            session.id = %session_id,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn finalize(&self, session_id: &str) -> Result<FinalizedFile, ClientError> {
        let url = self.resolve(&self.finalize_path);
        let response = self
            .send(self.post(url).json(&FinalizeRequest { session_id }))
            .await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}
