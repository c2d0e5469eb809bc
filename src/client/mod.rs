//! Transfer Session Client
//!
//! The three remote operations an upload attempt goes through:
//!
//! | Step | Operation | Wire call |
//! |------|-----------|-----------|
//! | 1 | [`TransferClient::init`] | `POST {base}/uploads/init` (JSON) |
//! | 2..n | [`TransferClient::upload_chunk`] | `POST {uploadEndpoint}` (multipart) |
//! | n+1 | [`TransferClient::finalize`] | `POST {base}/uploads/finalize` (JSON) |
//!
//! Chunk identity on the server is `(session_id, index)`, so re-sending a
//! chunk after a timeout is safe.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;

pub use http::HttpTransferClient;

/// Transfer client errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Request timed out")]
    Timeout,

    /// Non-success HTTP status. `message` is what the server said.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Body of the session-init call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub parent_id: Option<String>,
    pub total_chunks: u64,
}

/// Session handed out by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub session_id: String,
    pub upload_endpoint: String,
}

/// Server acknowledgement of one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkAck {
    pub session_id: String,
    pub index: u64,
}

/// Descriptor of the assembled file returned by finalize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Remote side of an upload session.
///
/// Implementations must be cheap to share across tasks; the manager holds a
/// single `Arc<dyn TransferClient>` for all uploads.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Open a session for one upload attempt
    async fn init(&self, request: &InitRequest) -> Result<UploadSession, ClientError>;

    /// Send chunk `index` of `session`
    async fn upload_chunk(
        &self,
        session: &UploadSession,
        index: u64,
        body: Bytes,
    ) -> Result<ChunkAck, ClientError>;

    /// Ask the server to assemble all chunks of `session_id`
    async fn finalize(&self, session_id: &str) -> Result<FinalizedFile, ClientError>;
}
