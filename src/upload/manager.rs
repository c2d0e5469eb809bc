//! Upload Manager
//!
//! Public facade over the task collection. All mutations, whether they come
//! from the operator (pause, cancel, ...) or from a running chunk loop, go
//! through one mutex-guarded `Vec<UploadTask>` kept in admission order. The
//! lock is never held across an `.await`.
//!
//! # Example
//!
//! ```no_run
//! use chunked_uploadr::client::HttpTransferClient;
//! use chunked_uploadr::config::Config;
//! use chunked_uploadr::upload::{UploadFile, UploadManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("uploadr.yaml")?;
//! let client = Arc::new(HttpTransferClient::new(&config.server)?);
//! let manager = UploadManager::new(&config.upload, client)?;
//!
//! manager.add_files(vec![UploadFile::from_path("video.mp4").await?]);
//! manager.settled().await;
//! println!("{:?}", manager.stats());
//! # Ok(())
//! # }
//! ```

use super::retry::RetryPolicy;
use super::runner;
use super::scheduler::Scheduler;
use super::task::{TaskId, TaskSnapshot, TaskStatus, TransitionError, UploadTask};
use super::validator::Validator;
use super::UploadFile;
use crate::client::TransferClient;
use crate::config::{ConfigError, UploadConfig};
use crate::metrics;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

const EVENT_CAPACITY: usize = 1024;

/// Change notification for observers of the task list
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Updated(TaskSnapshot),
    Removed(TaskId),
}

/// Aggregate view over all tasks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStats {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub paused: usize,
    pub error: usize,
    pub complete: usize,
    pub cancelled: usize,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
}

impl UploadStats {
    pub fn overall_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.uploaded_bytes as f64 / self.total_bytes as f64 * 100.0
    }

    /// Nothing is waiting for or holding the concurrency budget
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.uploading == 0
    }

    fn count(&mut self, status: TaskStatus) {
        let slot = match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Uploading => &mut self.uploading,
            TaskStatus::Paused => &mut self.paused,
            TaskStatus::Error => &mut self.error,
            TaskStatus::Complete => &mut self.complete,
            TaskStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }
}

/// State shared between the facade and the chunk loops
pub(crate) struct Shared {
    pub(crate) client: Arc<dyn TransferClient>,
    pub(crate) retry: RetryPolicy,
    pub(crate) chunk_timeout: Duration,
    validator: Validator,
    scheduler: Scheduler,
    chunk_size: u64,
    tasks: Mutex<Vec<UploadTask>>,
    events: broadcast::Sender<TaskEvent>,
    changed: Notify,
}

impl Shared {
    /// Apply `f` to task `id` under the lock, publishing the new snapshot on success
    pub(crate) fn update<R>(
        &self,
        id: TaskId,
        f: impl FnOnce(&mut UploadTask) -> Result<R, TransitionError>,
    ) -> Option<R> {
        let result = {
            let mut tasks = self.tasks.lock();
            let task = tasks.iter_mut().find(|t| t.id == id)?;
            match f(task) {
                Ok(value) => {
                    let _ = self.events.send(TaskEvent::Updated(task.snapshot()));
                    Some(value)
                }
                Err(e) => {
                    tracing::debug!(task.id = %id, error = %e, "Transition rejected");
                    None
                }
            }
        };
        if result.is_some() {
            self.changed.notify_waiters();
        }
        result
    }

    /// Like [`update`](Self::update), but only while the task still accepts
    /// results from the chunk loop of `epoch` (see [`UploadTask::accepts_results_from`])
    pub(crate) fn update_from_run<R>(
        &self,
        id: TaskId,
        epoch: u64,
        f: impl FnOnce(&mut UploadTask) -> Result<R, TransitionError>,
    ) -> Option<R> {
        self.update(id, |task| {
            if !task.accepts_results_from(epoch) {
                return Err(TransitionError::InvalidTransition {
                    from: task.status,
                    action: "continue a superseded run of",
                });
            }
            f(task)
        })
    }

    /// Read from task `id` without mutating it
    pub(crate) fn read<R>(&self, id: TaskId, f: impl FnOnce(&UploadTask) -> R) -> Option<R> {
        let tasks = self.tasks.lock();
        tasks.iter().find(|t| t.id == id).map(f)
    }

    pub(crate) fn is_current(&self, id: TaskId, epoch: u64) -> bool {
        self.read(id, |task| task.is_current(epoch)).unwrap_or(false)
    }

    /// Start pending tasks until the budget is full, then spawn their chunk loops
    pub(crate) fn pump(self: &Arc<Self>) {
        let started = {
            let mut tasks = self.tasks.lock();
            let mut started = Vec::new();

            while let Some(id) = self
                .scheduler
                .admit_next(tasks.iter().map(|t| (t.id, t.status)))
            {
                let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
                    break;
                };
                let Ok(epoch) = task.start() else {
                    break;
                };
                tracing::info!(
                    task.id = %id,
                    file.name = %task.file.name,
                    epoch = epoch,
                    resumed_at_chunk = task.uploaded_chunks,
                    "Upload started"
                );
                let _ = self.events.send(TaskEvent::Updated(task.snapshot()));
                started.push((id, epoch));
            }

            started
        };

        if started.is_empty() {
            return;
        }
        self.changed.notify_waiters();

        for (id, epoch) in started {
            tokio::spawn(runner::run(Arc::clone(self), id, epoch));
        }
    }

    fn stats(&self) -> UploadStats {
        let tasks = self.tasks.lock();
        let mut stats = UploadStats::default();
        for task in tasks.iter() {
            stats.total += 1;
            stats.count(task.status);
            stats.total_bytes += task.file.size;
            stats.uploaded_bytes += task.uploaded_bytes;
        }
        stats
    }
}

/// Facade over the upload engine. Cheap to clone.
///
/// Operations never fail loudly: they return whether the request was applied,
/// and anything that goes wrong during a transfer shows up as the task's
/// `error` status and message.
///
/// Must be used from within a Tokio runtime; chunk loops are spawned onto it.
#[derive(Clone)]
pub struct UploadManager {
    inner: Arc<Shared>,
}

impl UploadManager {
    pub fn new(config: &UploadConfig, client: Arc<dyn TransferClient>) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let retry = RetryPolicy::from_config(config);

        tracing::info!(
            max_concurrent = config.max_concurrent_uploads,
            chunk_size = config.chunk_size,
            max_retries = retry.max_retries,
            worst_case_retry_delay_ms = retry.worst_case_delay().as_millis() as u64,
            "Upload manager ready"
        );

        Ok(Self {
            inner: Arc::new(Shared {
                client,
                retry,
                chunk_timeout: config.chunk_timeout(),
                validator: Validator::from_config(config),
                scheduler: Scheduler::new(config.max_concurrent_uploads),
                chunk_size: config.chunk_size,
                tasks: Mutex::new(Vec::new()),
                events,
                changed: Notify::new(),
            }),
        })
    }

    /// Admit files. Each file becomes a task, rejected ones directly in `error`.
    pub fn add_files<I>(&self, files: I) -> Vec<TaskId>
    where
        I: IntoIterator<Item = UploadFile>,
    {
        let shared = &self.inner;
        let mut ids = Vec::new();
        {
            let mut tasks = shared.tasks.lock();
            for file in files {
                let task = match shared.validator.validate(&file) {
                    Ok(()) => {
                        tracing::info!(file.name = %file.name, file.size = file.size, "File admitted");
                        UploadTask::new(file, shared.chunk_size)
                    }
                    Err(rejection) => {
                        tracing::warn!(file.name = %file.name, reason = %rejection, "File rejected");
                        metrics::record_task_finished(TaskStatus::Error.as_str());
                        UploadTask::rejected(file, shared.chunk_size, rejection.to_string())
                    }
                };
                ids.push(task.id);
                let _ = shared.events.send(TaskEvent::Updated(task.snapshot()));
                tasks.push(task);
            }
        }
        shared.changed.notify_waiters();
        shared.pump();
        ids
    }

    /// uploading → paused. The in-flight chunk, if any, is discarded.
    pub fn pause(&self, id: TaskId) -> bool {
        let applied = self.inner.update(id, |task| task.pause()).is_some();
        if applied {
            tracing::info!(task.id = %id, "Upload paused");
            self.inner.pump();
        }
        applied
    }

    /// paused → pending; continues from the last confirmed chunk in the same session
    pub fn resume(&self, id: TaskId) -> bool {
        let applied = self.inner.update(id, |task| task.resume()).is_some();
        if applied {
            tracing::info!(task.id = %id, "Upload resumed");
            self.inner.pump();
        }
        applied
    }

    pub fn cancel(&self, id: TaskId) -> bool {
        let applied = self.inner.update(id, |task| task.cancel()).is_some();
        if applied {
            tracing::info!(task.id = %id, "Upload cancelled");
            metrics::record_task_finished(TaskStatus::Cancelled.as_str());
            self.inner.pump();
        }
        applied
    }

    /// Cancel every task that has not finished. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<TaskId> = self
            .tasks()
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id)
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// error → pending with a fresh session. The file is validated again first.
    pub fn retry(&self, id: TaskId) -> bool {
        let validator = &self.inner.validator;
        let applied = self
            .inner
            .update(id, |task| {
                if task.status != TaskStatus::Error {
                    return Err(TransitionError::InvalidTransition {
                        from: task.status,
                        action: "retry",
                    });
                }
                match validator.validate(&task.file) {
                    Ok(()) => task.retry().map(|_| true),
                    Err(rejection) => {
                        task.error = Some(rejection.to_string());
                        Ok(false)
                    }
                }
            })
            .unwrap_or(false);

        if applied {
            tracing::info!(task.id = %id, "Upload retried");
            self.inner.pump();
        }
        applied
    }

    /// Delete a task in a terminal status
    pub fn remove(&self, id: TaskId) -> bool {
        let removed = {
            let mut tasks = self.inner.tasks.lock();
            match tasks.iter().position(|t| t.id == id && t.status.is_terminal()) {
                Some(pos) => {
                    tasks.remove(pos);
                    let _ = self.inner.events.send(TaskEvent::Removed(id));
                    true
                }
                None => false,
            }
        };
        if removed {
            self.inner.changed.notify_waiters();
        }
        removed
    }

    /// Remove every completed task. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed: Vec<TaskId> = {
            let mut tasks = self.inner.tasks.lock();
            let removed = tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Complete)
                .map(|t| t.id)
                .collect();
            tasks.retain(|t| t.status != TaskStatus::Complete);
            removed
        };
        for id in &removed {
            let _ = self.inner.events.send(TaskEvent::Removed(*id));
        }
        if !removed.is_empty() {
            self.inner.changed.notify_waiters();
        }
        removed.len()
    }

    /// All tasks, in admission order
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        let tasks = self.inner.tasks.lock();
        tasks.iter().map(|t| t.snapshot()).collect()
    }

    pub fn task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.inner.read(id, |t| t.snapshot())
    }

    pub fn stats(&self) -> UploadStats {
        self.inner.stats()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.scheduler.max_concurrent()
    }

    /// Receive a [`TaskEvent`] for every change to the task list
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve once no task is pending or uploading
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.stats().is_settled() {
                return;
            }
            notified.await;
        }
    }
}
