//! Common test infrastructure
//!
//! Provides a scripted in-process `TransferClient` and polling helpers for
//! driving the upload manager without a server.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chunked_uploadr::client::{
    ChunkAck, ClientError, FinalizedFile, InitRequest, TransferClient, UploadSession,
};
use chunked_uploadr::config::UploadConfig;
use chunked_uploadr::upload::{TaskId, TaskSnapshot, UploadManager};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// One `upload_chunk` call as seen by the fake server
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCall {
    pub session_id: String,
    pub index: u64,
    pub len: usize,
}

#[derive(Default)]
struct Script {
    init_failures: u32,
    chunk_failures: HashMap<u64, u32>,
    chunk_hangs: HashMap<u64, u32>,
    finalize_error: Option<String>,
}

#[derive(Default)]
struct Log {
    inits: Vec<InitRequest>,
    sessions: Vec<String>,
    chunks: Vec<ChunkCall>,
    finalized: Vec<String>,
}

/// Fake upload server with scriptable failures
pub struct ScriptedClient {
    script: Mutex<Script>,
    log: Mutex<Log>,
    gate: Option<Arc<Semaphore>>,
    init_gate: Option<Arc<Semaphore>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            log: Mutex::new(Log::default()),
            gate: None,
            init_gate: None,
        }
    }

    /// Every chunk upload waits for a permit on the returned semaphore
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let client = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new()
        };
        (client, gate)
    }

    /// Every init call waits for a permit on the returned semaphore
    pub fn gated_init() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let client = Self {
            init_gate: Some(Arc::clone(&gate)),
            ..Self::new()
        };
        (client, gate)
    }

    /// Fail the next `times` init calls
    pub fn fail_init(self, times: u32) -> Self {
        self.script.lock().init_failures = times;
        self
    }

    /// Fail the next `times` attempts at chunk `index`
    pub fn fail_chunk(self, index: u64, times: u32) -> Self {
        self.script.lock().chunk_failures.insert(index, times);
        self
    }

    /// Never answer the next `times` attempts at chunk `index`
    pub fn hang_chunk(self, index: u64, times: u32) -> Self {
        self.script.lock().chunk_hangs.insert(index, times);
        self
    }

    pub fn fail_finalize(self, message: &str) -> Self {
        self.script.lock().finalize_error = Some(message.to_string());
        self
    }

    pub fn init_calls(&self) -> usize {
        self.log.lock().inits.len()
    }

    pub fn init_requests(&self) -> Vec<InitRequest> {
        self.log.lock().inits.clone()
    }

    pub fn sessions(&self) -> Vec<String> {
        self.log.lock().sessions.clone()
    }

    pub fn chunk_calls(&self) -> Vec<ChunkCall> {
        self.log.lock().chunks.clone()
    }

    pub fn calls_for_chunk(&self, index: u64) -> usize {
        self.log
            .lock()
            .chunks
            .iter()
            .filter(|c| c.index == index)
            .count()
    }

    pub fn finalized(&self) -> Vec<String> {
        self.log.lock().finalized.clone()
    }
}

fn take_one(counter: Option<&mut u32>) -> bool {
    match counter {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl TransferClient for ScriptedClient {
    async fn init(&self, request: &InitRequest) -> Result<UploadSession, ClientError> {
        let fail = {
            let mut script = self.script.lock();
            take_one(Some(&mut script.init_failures))
        };

        if let Some(gate) = &self.init_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut log = self.log.lock();
        log.inits.push(request.clone());
        if fail {
            return Err(ClientError::Status {
                status: 503,
                message: "storage unavailable".into(),
            });
        }

        let session_id = format!("session-{}", log.sessions.len() + 1);
        log.sessions.push(session_id.clone());
        Ok(UploadSession {
            session_id,
            upload_endpoint: "/uploads/chunk".into(),
        })
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        index: u64,
        body: Bytes,
    ) -> Result<ChunkAck, ClientError> {
        self.log.lock().chunks.push(ChunkCall {
            session_id: session.session_id.clone(),
            index,
            len: body.len(),
        });

        let (hang, fail) = {
            let mut script = self.script.lock();
            let hang = take_one(script.chunk_hangs.get_mut(&index));
            let fail = !hang && take_one(script.chunk_failures.get_mut(&index));
            (hang, fail)
        };

        if hang {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if fail {
            return Err(ClientError::Status {
                status: 500,
                message: format!("chunk {} rejected", index),
            });
        }

        Ok(ChunkAck {
            session_id: session.session_id.clone(),
            index,
        })
    }

    async fn finalize(&self, session_id: &str) -> Result<FinalizedFile, ClientError> {
        let error = self.script.lock().finalize_error.clone();
        self.log.lock().finalized.push(session_id.to_string());

        if let Some(message) = error {
            return Err(ClientError::Status {
                status: 500,
                message,
            });
        }

        Ok(FinalizedFile {
            id: format!("file-{}", session_id),
            name: None,
            size: None,
            checksum: Some("abc123".into()),
            url: None,
        })
    }
}

/// Upload config with tiny chunks and near-instant retries
pub fn test_config(chunk_size: u64, max_concurrent: usize) -> UploadConfig {
    UploadConfig {
        chunk_size,
        max_concurrent_uploads: max_concurrent,
        max_retries: 3,
        retry_base_delay_ms: 1,
        chunk_timeout_ms: 5_000,
        ..Default::default()
    }
}

/// Poll until `pred` holds for task `id`
pub async fn wait_for<F>(manager: &UploadManager, id: TaskId, pred: F) -> TaskSnapshot
where
    F: Fn(&TaskSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(task) = manager.task(id) {
                if pred(&task) {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("task did not reach the expected state in time")
}

/// Wait for the manager to settle, with a timeout
pub async fn settle(manager: &UploadManager) {
    tokio::time::timeout(Duration::from_secs(10), manager.settled())
        .await
        .expect("manager did not settle in time");
}
