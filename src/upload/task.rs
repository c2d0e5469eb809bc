//! Upload task state machine and progress accounting
//!
//! ```text
//!             admit              finalize ok
//!  pending ──────────► uploading ──────────► complete
//!     ▲                 │     │
//!     │ resume    pause │     │ init / chunk / finalize failure
//!     └──── paused ◄────┘     ▼
//!                           error ──retry──► pending
//!
//!  pending | uploading | paused ──cancel──► cancelled
//! ```
//!
//! `complete`, `error` and `cancelled` are terminal and may be removed.
//! A result the server confirmed for a run that was paused meanwhile is
//! still applied, so a finalize landing after a pause completes the task.

use super::planner;
use super::UploadFile;
use crate::client::{FinalizedFile, UploadSession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Opaque task identifier assigned at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Uploading,
    Paused,
    Error,
    Complete,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Paused => "paused",
            TaskStatus::Error => "error",
            TaskStatus::Complete => "complete",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// No further automatic progress happens from here
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Error | TaskStatus::Complete | TaskStatus::Cancelled
        )
    }

    /// Counted against the concurrency budget
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Uploading)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("cannot {action} a task that is {from}")]
    InvalidTransition {
        from: TaskStatus,
        action: &'static str,
    },

    #[error("task already has session {0}")]
    SessionAlreadyAssigned(String),

    #[error("{uploaded} of {total} chunks confirmed")]
    Incomplete { uploaded: u64, total: u64 },
}

/// Read-only view of a task handed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub status: TaskStatus,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub uploaded_chunks: u64,
    pub uploaded_bytes: u64,
    pub progress_percent: f64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
    pub retry_count: u32,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub file: Option<FinalizedFile>,
}

impl TaskSnapshot {
    /// Wall-clock time between start and end, once both are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }
}

/// One file's end-to-end transfer
pub(crate) struct UploadTask {
    pub(crate) id: TaskId,
    pub(crate) file: UploadFile,
    pub(crate) status: TaskStatus,
    pub(crate) chunk_size: u64,
    pub(crate) total_chunks: u64,
    pub(crate) uploaded_chunks: u64,
    pub(crate) uploaded_bytes: u64,
    pub(crate) speed_bytes_per_sec: f64,
    pub(crate) eta_seconds: Option<f64>,
    pub(crate) retry_count: u32,
    pub(crate) session: Option<UploadSession>,
    pub(crate) error: Option<String>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    pub(crate) result: Option<FinalizedFile>,
    /// Bumped on every admission and retry; a chunk loop only acts while its epoch is current
    pub(crate) epoch: u64,
}

impl UploadTask {
    /// A task waiting for the scheduler
    pub(crate) fn new(file: UploadFile, chunk_size: u64) -> Self {
        Self {
            id: TaskId::new(),
            total_chunks: planner::total_chunks(file.size, chunk_size),
            file,
            status: TaskStatus::Pending,
            chunk_size,
            uploaded_chunks: 0,
            uploaded_bytes: 0,
            speed_bytes_per_sec: 0.0,
            eta_seconds: None,
            retry_count: 0,
            session: None,
            error: None,
            started_at: None,
            ended_at: None,
            result: None,
            epoch: 0,
        }
    }

    /// A task that failed admission; it never touches the network
    pub(crate) fn rejected(file: UploadFile, chunk_size: u64, reason: String) -> Self {
        let mut task = Self::new(file, chunk_size);
        task.status = TaskStatus::Error;
        task.error = Some(reason);
        task.ended_at = Some(Utc::now());
        task
    }

    fn invalid(&self, action: &'static str) -> TransitionError {
        TransitionError::InvalidTransition {
            from: self.status,
            action,
        }
    }

    /// Whether a chunk loop started at `epoch` may keep going
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.status == TaskStatus::Uploading && self.epoch == epoch
    }

    /// Whether results of the chunk loop started at `epoch` may still be applied.
    ///
    /// A pause stops that loop at its next check point, but whatever the
    /// server confirmed before then (a session, a chunk, the finalized file)
    /// still belongs to the task. Cancel, retry and a newer admission all end
    /// this.
    pub(crate) fn accepts_results_from(&self, epoch: u64) -> bool {
        self.epoch == epoch && !self.status.is_terminal()
    }

    /// pending → uploading. Returns the new run epoch.
    pub(crate) fn start(&mut self) -> Result<u64, TransitionError> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid("start"));
        }
        self.status = TaskStatus::Uploading;
        self.epoch += 1;
        self.started_at.get_or_insert_with(Utc::now);
        Ok(self.epoch)
    }

    /// uploading → paused
    pub(crate) fn pause(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Uploading {
            return Err(self.invalid("pause"));
        }
        self.status = TaskStatus::Paused;
        self.speed_bytes_per_sec = 0.0;
        self.eta_seconds = None;
        Ok(())
    }

    /// paused → pending
    pub(crate) fn resume(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Paused {
            return Err(self.invalid("resume"));
        }
        self.status = TaskStatus::Pending;
        Ok(())
    }

    /// pending | uploading | paused → cancelled
    pub(crate) fn cancel(&mut self) -> Result<(), TransitionError> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Uploading | TaskStatus::Paused => {
                self.status = TaskStatus::Cancelled;
                self.speed_bytes_per_sec = 0.0;
                self.eta_seconds = None;
                self.ended_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.invalid("cancel")),
        }
    }

    /// uploading → error
    pub(crate) fn fail(&mut self, message: String) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Uploading {
            return Err(self.invalid("fail"));
        }
        self.status = TaskStatus::Error;
        self.error = Some(message);
        self.speed_bytes_per_sec = 0.0;
        self.eta_seconds = None;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// uploading | paused | pending → complete, once every chunk is confirmed
    pub(crate) fn complete(&mut self, file: FinalizedFile) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.invalid("complete"));
        }
        if self.uploaded_chunks != self.total_chunks {
            return Err(TransitionError::Incomplete {
                uploaded: self.uploaded_chunks,
                total: self.total_chunks,
            });
        }
        self.status = TaskStatus::Complete;
        self.uploaded_bytes = self.file.size;
        self.eta_seconds = Some(0.0);
        self.result = Some(file);
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// error → pending, discarding all progress and the session
    pub(crate) fn retry(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Error {
            return Err(self.invalid("retry"));
        }
        self.status = TaskStatus::Pending;
        self.epoch += 1;
        self.retry_count += 1;
        self.uploaded_chunks = 0;
        self.uploaded_bytes = 0;
        self.speed_bytes_per_sec = 0.0;
        self.eta_seconds = None;
        self.session = None;
        self.error = None;
        self.result = None;
        self.started_at = None;
        self.ended_at = None;
        Ok(())
    }

    /// Record the session opened for this attempt. Set at most once between retries.
    pub(crate) fn assign_session(&mut self, session: UploadSession) -> Result<(), TransitionError> {
        if let Some(existing) = &self.session {
            return Err(TransitionError::SessionAlreadyAssigned(
                existing.session_id.clone(),
            ));
        }
        self.session = Some(session);
        Ok(())
    }

    /// Account for chunk `index` confirmed by the server after `elapsed`.
    ///
    /// Speed and ETA come from this chunk alone.
    pub(crate) fn record_chunk(&mut self, index: u64, elapsed: Duration) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.invalid("record progress on"));
        }
        let Some(chunk) = planner::chunk_at(self.file.size, self.chunk_size, index) else {
            return Err(TransitionError::Incomplete {
                uploaded: index,
                total: self.total_chunks,
            });
        };

        if index + 1 > self.uploaded_chunks {
            self.uploaded_chunks = index + 1;
            self.uploaded_bytes = chunk.end();
        }

        let secs = elapsed.as_secs_f64();
        if secs > 0.0 && self.status == TaskStatus::Uploading {
            self.speed_bytes_per_sec = chunk.len as f64 / secs;
            let remaining = self.file.size.saturating_sub(self.uploaded_bytes);
            self.eta_seconds = Some(remaining as f64 / self.speed_bytes_per_sec);
        }
        Ok(())
    }

    pub(crate) fn progress_percent(&self) -> f64 {
        if self.status == TaskStatus::Complete {
            return 100.0;
        }
        if self.file.size == 0 {
            return 0.0;
        }
        (self.uploaded_bytes as f64 / self.file.size as f64 * 100.0).min(100.0)
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            name: self.file.name.clone(),
            size: self.file.size,
            mime_type: self.file.mime_type_or_default().to_string(),
            status: self.status,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
            uploaded_chunks: self.uploaded_chunks,
            uploaded_bytes: self.uploaded_bytes,
            progress_percent: self.progress_percent(),
            speed_bytes_per_sec: self.speed_bytes_per_sec,
            eta_seconds: self.eta_seconds,
            retry_count: self.retry_count,
            session_id: self.session.as_ref().map(|s| s.session_id.clone()),
            error: self.error.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            file: self.result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(size: usize, chunk_size: u64) -> UploadTask {
        UploadTask::new(UploadFile::from_bytes("a.bin", vec![7u8; size]), chunk_size)
    }

    fn session(id: &str) -> UploadSession {
        UploadSession {
            session_id: id.into(),
            upload_endpoint: "/uploads/chunk".into(),
        }
    }

    fn finalized() -> FinalizedFile {
        FinalizedFile {
            id: "file-1".into(),
            name: None,
            size: None,
            checksum: None,
            url: None,
        }
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = task(12, 5);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.total_chunks, 3);
        assert!(task.session.is_none());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut task = task(12, 5);
        let epoch = task.start().unwrap();
        assert!(task.is_current(epoch));

        task.assign_session(session("s-1")).unwrap();
        for index in 0..3 {
            task.record_chunk(index, Duration::from_millis(10)).unwrap();
        }
        assert_eq!(task.uploaded_bytes, 12);

        task.complete(finalized()).unwrap();
        let snapshot = task.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Complete);
        assert_eq!(snapshot.uploaded_chunks, 3);
        assert_eq!(snapshot.progress_percent, 100.0);
        assert!(snapshot.duration().is_some());
    }

    #[test]
    fn test_complete_requires_all_chunks() {
        let mut task = task(12, 5);
        task.start().unwrap();
        task.record_chunk(0, Duration::from_millis(1)).unwrap();
        assert_eq!(
            task.complete(finalized()),
            Err(TransitionError::Incomplete {
                uploaded: 1,
                total: 3
            })
        );
    }

    #[test]
    fn test_pause_resume_keeps_progress_and_session() {
        let mut task = task(12, 5);
        let first = task.start().unwrap();
        task.assign_session(session("s-1")).unwrap();
        task.record_chunk(0, Duration::from_millis(1)).unwrap();

        task.pause().unwrap();
        assert!(!task.is_current(first));
        task.resume().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let second = task.start().unwrap();
        assert_ne!(first, second);
        assert!(!task.is_current(first));
        assert_eq!(task.uploaded_chunks, 1);
        assert_eq!(task.session.as_ref().unwrap().session_id, "s-1");
    }

    #[test]
    fn test_paused_task_keeps_results_of_its_run() {
        let mut task = task(12, 5);
        let epoch = task.start().unwrap();
        task.pause().unwrap();

        // The loop has stopped, but what the server already confirmed counts
        assert!(!task.is_current(epoch));
        assert!(task.accepts_results_from(epoch));
        task.assign_session(session("s-1")).unwrap();
        task.record_chunk(0, Duration::from_millis(1)).unwrap();
        assert_eq!(task.uploaded_chunks, 1);
        assert_eq!(task.status, TaskStatus::Paused);
        assert_eq!(task.speed_bytes_per_sec, 0.0);

        task.resume().unwrap();
        assert!(task.accepts_results_from(epoch));
        let next = task.start().unwrap();
        assert!(!task.accepts_results_from(epoch));
        assert!(task.accepts_results_from(next));
    }

    #[test]
    fn test_cancel_and_retry_end_a_run() {
        let mut cancelled = task(12, 5);
        let epoch = cancelled.start().unwrap();
        cancelled.cancel().unwrap();
        assert!(!cancelled.accepts_results_from(epoch));
        assert!(cancelled.record_chunk(0, Duration::from_millis(1)).is_err());

        let mut retried = task(12, 5);
        let epoch = retried.start().unwrap();
        retried.fail("boom".into()).unwrap();
        retried.retry().unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert!(!retried.accepts_results_from(epoch));
    }

    #[test]
    fn test_paused_task_completes_when_finalize_lands() {
        let mut task = task(5, 5);
        let epoch = task.start().unwrap();
        task.record_chunk(0, Duration::from_millis(1)).unwrap();
        task.pause().unwrap();

        assert!(task.accepts_results_from(epoch));
        task.complete(finalized()).unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
    }

    #[test]
    fn test_session_assigned_once() {
        let mut task = task(12, 5);
        task.start().unwrap();
        task.assign_session(session("s-1")).unwrap();
        assert_eq!(
            task.assign_session(session("s-2")),
            Err(TransitionError::SessionAlreadyAssigned("s-1".into()))
        );
    }

    #[test]
    fn test_retry_resets_progress_and_session() {
        let mut task = task(12, 5);
        task.start().unwrap();
        task.assign_session(session("s-1")).unwrap();
        task.record_chunk(0, Duration::from_millis(1)).unwrap();
        task.fail("boom".into()).unwrap();
        assert_eq!(task.error.as_deref(), Some("boom"));

        task.retry().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.uploaded_chunks, 0);
        assert_eq!(task.uploaded_bytes, 0);
        assert!(task.session.is_none());
        assert!(task.error.is_none());

        task.start().unwrap();
        task.assign_session(session("s-2")).unwrap();
    }

    #[test]
    fn test_invalid_transitions() {
        let mut task = task(12, 5);
        assert!(task.pause().is_err());
        assert!(task.resume().is_err());
        assert!(task.retry().is_err());
        assert!(task.fail("x".into()).is_err());

        task.cancel().unwrap();
        assert!(task.cancel().is_err());
        assert!(task.start().is_err());
        assert!(task.status.is_terminal());
    }

    #[test]
    fn test_rejected_task_starts_in_error() {
        let task = UploadTask::rejected(
            UploadFile::from_bytes("a.exe", vec![0u8; 3]),
            5,
            "not allowed".into(),
        );
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.as_deref(), Some("not allowed"));
        assert!(task.session.is_none());
    }

    #[test]
    fn test_record_chunk_is_monotonic_and_idempotent() {
        let mut task = task(12, 5);
        task.start().unwrap();
        task.record_chunk(1, Duration::from_millis(1)).unwrap();
        task.record_chunk(1, Duration::from_millis(1)).unwrap();
        assert_eq!(task.uploaded_chunks, 2);
        task.record_chunk(0, Duration::from_millis(1)).unwrap();
        assert_eq!(task.uploaded_chunks, 2);
        assert_eq!(task.uploaded_bytes, 10);
    }

    #[test]
    fn test_speed_and_eta_from_last_chunk() {
        let mut task = task(12, 5);
        task.start().unwrap();
        task.record_chunk(0, Duration::from_secs(1)).unwrap();
        assert_eq!(task.speed_bytes_per_sec, 5.0);
        assert_eq!(task.eta_seconds, Some(7.0 / 5.0));

        task.record_chunk(1, Duration::from_millis(500)).unwrap();
        assert_eq!(task.speed_bytes_per_sec, 10.0);
        assert_eq!(task.eta_seconds, Some(0.2));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
