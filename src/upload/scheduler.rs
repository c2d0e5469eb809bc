//! Global concurrency budget
//!
//! The scheduler keeps no state of its own: it looks at the task collection
//! (in admission order) and answers which pending task, if any, may start
//! next. The manager calls it after every mutation and keeps calling it
//! until it answers `None`.

use super::task::{TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self { max_concurrent }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of tasks counted against the budget
    pub fn active_count<I>(&self, tasks: I) -> usize
    where
        I: IntoIterator<Item = (TaskId, TaskStatus)>,
    {
        tasks
            .into_iter()
            .filter(|(_, status)| status.is_active())
            .count()
    }

    /// The first pending task in admission order, if the budget has room
    pub fn admit_next<I>(&self, tasks: I) -> Option<TaskId>
    where
        I: IntoIterator<Item = (TaskId, TaskStatus)>,
        I::IntoIter: Clone,
    {
        let mut tasks = tasks.into_iter();
        if self.active_count(tasks.clone()) >= self.max_concurrent {
            return None;
        }

        tasks.find_map(|(id, status)| (status == TaskStatus::Pending).then_some(id))
    }
}
