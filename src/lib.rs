//! Chunked Uploadr Library
//!
//! Client-side engine for moving large files to a remote store over HTTP in
//! fixed-size chunks.
//!
//! # Features
//!
//! - **Bounded Concurrency**: at most `max_concurrent_uploads` files in flight, FIFO admission
//! - **Resumable**: pause/resume continues in the same server session
//! - **Retry**: per-chunk linear backoff, operator-driven whole-task retry
//! - **Live Progress**: per-task bytes, percent, speed and ETA, plus aggregate stats
//!
//! # Example
//!
//! ```no_run
//! use chunked_uploadr::client::HttpTransferClient;
//! use chunked_uploadr::config::Config;
//! use chunked_uploadr::upload::{UploadFile, UploadManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("uploadr.yaml")?;
//!     let client = Arc::new(HttpTransferClient::new(&config.server)?);
//!     let manager = UploadManager::new(&config.upload, client)?;
//!
//!     manager.add_files(vec![UploadFile::from_path("backup.tar").await?]);
//!     manager.settled().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod metrics;
pub mod telemetry;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use upload::{UploadFile, UploadManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
