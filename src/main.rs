//! Chunked Uploadr - resumable chunked uploads from the command line
//!
//! Uploads the given files to a chunked-upload service, a few at a time.

use chunked_uploadr::client::HttpTransferClient;
use chunked_uploadr::config::Config;
use chunked_uploadr::upload::{TaskEvent, TaskStatus, UploadFile, UploadManager};
use chunked_uploadr::{metrics, telemetry};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Chunked Uploadr - resumable chunked uploads with bounded concurrency
#[derive(Parser, Debug)]
#[command(name = "chunked-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the upload service
    #[arg(short, long)]
    server: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, env = "UPLOADR_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Destination folder id on the remote store
    #[arg(long)]
    parent_id: Option<String>,

    /// Chunk size in bytes
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Maximum number of files uploading at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Write Prometheus metrics to this file when done
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(server) = &self.server {
            config.server.base_url = server.clone();
        }
        if let Some(token) = &self.token {
            config.server.token = Some(token.clone());
        }
        if let Some(chunk_size) = self.chunk_size {
            config.upload.chunk_size = chunk_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.upload.max_concurrent_uploads = concurrency;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    telemetry::init_subscriber(&config.logging)?;
    info!("Starting Chunked Uploadr v{}", chunked_uploadr::VERSION);

    let client = Arc::new(HttpTransferClient::new(&config.server)?);
    let manager = UploadManager::new(&config.upload, client)?;

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let file = match UploadFile::from_path(path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read file");
                UploadFile::unreadable(path, &e)
            }
        };
        files.push(match &args.parent_id {
            Some(parent_id) => file.with_parent_id(parent_id.clone()),
            None => file,
        });
    }

    let mut events = manager.subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let TaskEvent::Updated(task) = event {
                info!(
                    file = %task.name,
                    status = %task.status,
                    chunks = %format!("{}/{}", task.uploaded_chunks, task.total_chunks),
                    progress = %format!("{:.1}%", task.progress_percent),
                    speed_bps = task.speed_bytes_per_sec as u64,
                    eta_secs = task.eta_seconds.map(|s| s.round() as u64),
                    "Progress"
                );
            }
        }
    });

    info!(
        files = files.len(),
        max_concurrent = manager.max_concurrent(),
        "Queueing uploads"
    );
    manager.add_files(files);

    tokio::select! {
        _ = manager.settled() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling uploads");
            manager.cancel_all();
            manager.settled().await;
        }
    }
    reporter.abort();

    let stats = manager.stats();
    for task in manager.tasks() {
        match task.status {
            TaskStatus::Complete => info!(
                file = %task.name,
                remote_id = task.file.as_ref().map(|f| f.id.as_str()).unwrap_or(""),
                "Uploaded"
            ),
            TaskStatus::Error => error!(
                file = %task.name,
                error = task.error.as_deref().unwrap_or("unknown error"),
                "Failed"
            ),
            status => warn!(file = %task.name, status = %status, "Not uploaded"),
        }
    }
    info!(
        complete = stats.complete,
        error = stats.error,
        cancelled = stats.cancelled,
        uploaded_bytes = stats.uploaded_bytes,
        total_bytes = stats.total_bytes,
        "Done"
    );

    if let Some(path) = &args.metrics_out {
        std::fs::write(path, metrics::encode_text()?)?;
    }

    if stats.error > 0 {
        std::process::exit(1);
    }
    Ok(())
}
