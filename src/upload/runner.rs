//! Chunk loop for one admitted task
//!
//! A run drives the task for as long as its epoch is current (status
//! `uploading`, no newer admission). It checks that before every network
//! call, so pause and cancel take effect at the next check point. A response
//! already in flight when the task is paused still lands: the session, chunk
//! or finalized file it confirms is recorded and the loop stops afterwards.
//! Responses arriving after a cancel, a retry or a newer admission are
//! dropped.
//!
//! Per run:
//! 1. open a session unless the task already has one (resume reuses it)
//! 2. upload chunks `uploaded_chunks..total_chunks` in order, each with
//!    linear-backoff retries and a per-attempt timeout
//! 3. finalize

use super::manager::Shared;
use super::planner;
use super::task::{TaskId, TaskStatus};
use super::FileSource;
use crate::client::{ClientError, InitRequest, UploadSession};
use crate::metrics;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a run stopped before completing
enum Stop {
    /// The task was paused, cancelled or re-admitted under us
    Superseded,
    /// Unrecoverable failure for this attempt
    Failed(String),
}

/// Task data a run needs, copied out under the lock
struct RunPlan {
    name: String,
    size: u64,
    chunk_size: u64,
    total_chunks: u64,
    next_chunk: u64,
    session: Option<UploadSession>,
    source: Arc<dyn FileSource>,
    init: InitRequest,
}

pub(crate) async fn run(shared: Arc<Shared>, id: TaskId, epoch: u64) {
    match drive(&shared, id, epoch).await {
        Ok(()) => {}
        Err(Stop::Superseded) => {
            tracing::debug!(task.id = %id, epoch = epoch, "Run superseded");
        }
        Err(Stop::Failed(message)) => {
            let failed = shared.update_from_run(id, epoch, |task| task.fail(message.clone()));
            if failed.is_some() {
                tracing::error!(task.id = %id, error = %message, "Upload failed");
                metrics::record_task_finished(TaskStatus::Error.as_str());
            }
        }
    }

    // This run no longer holds a slot
    shared.pump();
}

async fn drive(shared: &Arc<Shared>, id: TaskId, epoch: u64) -> Result<(), Stop> {
    let plan = shared
        .read(id, |task| {
            task.is_current(epoch).then(|| RunPlan {
                name: task.file.name.clone(),
                size: task.file.size,
                chunk_size: task.chunk_size,
                total_chunks: task.total_chunks,
                next_chunk: task.uploaded_chunks,
                session: task.session.clone(),
                source: Arc::clone(&task.file.source),
                init: InitRequest {
                    name: task.file.name.clone(),
                    size: task.file.size,
                    mime_type: task.file.mime_type_or_default().to_string(),
                    parent_id: task.file.parent_id.clone(),
                    total_chunks: task.total_chunks,
                },
            })
        })
        .flatten()
        .ok_or(Stop::Superseded)?;

    let session = match plan.session.clone() {
        Some(session) => session,
        None => open_session(shared, id, epoch, &plan.init).await?,
    };

    for index in plan.next_chunk..plan.total_chunks {
        checkpoint(shared, id, epoch)?;

        let Some(chunk) = planner::chunk_at(plan.size, plan.chunk_size, index) else {
            break;
        };
        let body = plan
            .source
            .read_range(chunk.offset, chunk.len)
            .await
            .map_err(|e| Stop::Failed(format!("Failed to read '{}': {}", plan.name, e)))?;

        let elapsed = send_chunk(shared, id, epoch, &session, index, body).await?;

        shared
            .update_from_run(id, epoch, |task| task.record_chunk(index, elapsed))
            .ok_or(Stop::Superseded)?;
        metrics::record_chunk_success(chunk.len, elapsed.as_secs_f64());
        tracing::debug!(
            task.id = %id,
            chunk.index = index,
            chunk.bytes = chunk.len,
            elapsed_ms = elapsed.as_millis() as u64,
            "Chunk confirmed"
        );
    }

    checkpoint(shared, id, epoch)?;
    let file = shared
        .client
        .finalize(&session.session_id)
        .await
        .map_err(|e| Stop::Failed(e.to_string()))?;

    let duration = shared
        .update_from_run(id, epoch, |task| {
            task.complete(file)?;
            Ok(task
                .started_at
                .zip(task.ended_at)
                .map(|(start, end)| (end - start).num_milliseconds() as f64 / 1000.0))
        })
        .ok_or(Stop::Superseded)?;

    tracing::info!(task.id = %id, file.name = %plan.name, "Upload complete");
    metrics::record_task_finished(TaskStatus::Complete.as_str());
    if let Some(secs) = duration {
        metrics::record_task_duration(secs);
    }
    Ok(())
}

fn checkpoint(shared: &Shared, id: TaskId, epoch: u64) -> Result<(), Stop> {
    if shared.is_current(id, epoch) {
        Ok(())
    } else {
        Err(Stop::Superseded)
    }
}

async fn open_session(
    shared: &Shared,
    id: TaskId,
    epoch: u64,
    request: &InitRequest,
) -> Result<UploadSession, Stop> {
    checkpoint(shared, id, epoch)?;
    let session = shared
        .client
        .init(request)
        .await
        .map_err(|e| Stop::Failed(e.to_string()))?;

    let recorded = session.clone();
    shared
        .update_from_run(id, epoch, |task| task.assign_session(recorded))
        .ok_or(Stop::Superseded)?;

    tracing::info!(task.id = %id, session.id = %session.session_id, "Session opened");
    Ok(session)
}

/// Upload one chunk, retrying per the policy. Returns the duration of the successful attempt.
async fn send_chunk(
    shared: &Shared,
    id: TaskId,
    epoch: u64,
    session: &UploadSession,
    index: u64,
    body: Bytes,
) -> Result<Duration, Stop> {
    let mut failures = 0u32;

    loop {
        let started = Instant::now();
        let attempt = tokio::time::timeout(
            shared.chunk_timeout,
            shared.client.upload_chunk(session, index, body.clone()),
        )
        .await
        .unwrap_or(Err(ClientError::Timeout));

        let error = match attempt {
            Ok(_) => return Ok(started.elapsed()),
            Err(e) => e,
        };

        metrics::record_chunk_failure();
        failures += 1;
        if !shared.retry.should_retry(failures) {
            return Err(Stop::Failed(format!(
                "Chunk {} failed after {} attempts: {}",
                index, failures, error
            )));
        }

        let delay = shared.retry.delay(failures);
        tracing::warn!(
            task.id = %id,
            chunk.index = index,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Chunk upload failed, retrying"
        );
        metrics::record_chunk_retry();
        tokio::time::sleep(delay).await;

        checkpoint(shared, id, epoch)?;
    }
}
