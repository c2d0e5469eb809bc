//! Metrics module
//!
//! Prometheus counters and histograms for task outcomes, chunk transfers and
//! retries, registered in the default global registry.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    // Task metrics
    pub static ref TASKS_TOTAL: CounterVec = register_counter_vec!(
        "uploadr_tasks_total",
        "Tasks that reached a terminal status",
        &["status"]
    ).unwrap();

    pub static ref TASK_DURATION: Histogram = register_histogram!(
        "uploadr_task_duration_seconds",
        "Duration of completed uploads in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
    ).unwrap();

    // Chunk metrics
    pub static ref BYTES_UPLOADED: Counter = register_counter!(
        "uploadr_bytes_uploaded_total",
        "Bytes confirmed by the server"
    ).unwrap();

    pub static ref CHUNKS_TOTAL: CounterVec = register_counter_vec!(
        "uploadr_chunks_total",
        "Chunk upload attempts by result",
        &["result"]
    ).unwrap();

    pub static ref CHUNK_RETRIES: Counter = register_counter!(
        "uploadr_chunk_retries_total",
        "Chunk attempts scheduled after a failure"
    ).unwrap();

    pub static ref CHUNK_DURATION: Histogram = register_histogram!(
        "uploadr_chunk_duration_seconds",
        "Duration of successful chunk uploads in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();
}

/// Record a task reaching a terminal status (`complete`, `error`, `cancelled`)
pub fn record_task_finished(status: &str) {
    TASKS_TOTAL.with_label_values(&[status]).inc();
}

/// Record the wall-clock duration of a completed task
pub fn record_task_duration(duration_secs: f64) {
    TASK_DURATION.observe(duration_secs);
}

/// Record a chunk confirmed by the server
pub fn record_chunk_success(bytes: u64, duration_secs: f64) {
    CHUNKS_TOTAL.with_label_values(&["success"]).inc();
    BYTES_UPLOADED.inc_by(bytes as f64);
    CHUNK_DURATION.observe(duration_secs);
}

/// Record a failed chunk attempt
pub fn record_chunk_failure() {
    CHUNKS_TOTAL.with_label_values(&["failure"]).inc();
}

/// Record a retry being scheduled
pub fn record_chunk_retry() {
    CHUNK_RETRIES.inc();
}

/// Render all registered metrics in the Prometheus text exposition format
pub fn encode_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
