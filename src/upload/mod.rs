//! Upload module
//!
//! The chunked upload engine: admission, planning, per-task state machine,
//! the scheduler holding the global concurrency budget, and the manager
//! facade tying them together.
//!
//! ```text
//! files ──► Validator ──► UploadTask (pending) ──► Scheduler ──► chunk loop
//!                   └──► UploadTask (error)                        │
//!                                                                  ▼
//!                         observers ◄── TaskEvent ◄── UploadManager task list
//! ```

pub mod manager;
pub mod planner;
pub mod retry;
mod runner;
pub mod scheduler;
pub mod source;
pub mod task;
pub mod validator;

pub use manager::{TaskEvent, UploadManager, UploadStats};
pub use planner::{plan, total_chunks, ChunkSpec};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use source::{FileSource, LocalFile, MemoryFile, UploadFile};
pub use task::{TaskId, TaskSnapshot, TaskStatus, TransitionError};
pub use validator::{Rejection, Validator};
