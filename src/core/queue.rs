//! Ordered holding area for tasks eligible to run.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::TaskError;
use crate::core::task::Task;

/// FIFO queue of tasks awaiting execution.
///
/// Insertion enforces the queue invariants: only queueable tasks
/// (`New`/`Retry`) are accepted, and no task id appears twice. Head
/// insertion exists solely for retries, which jump the line ahead of fresh
/// submissions.
pub struct TaskQueue<R, U> {
    tasks: Mutex<VecDeque<Arc<Task<R, U>>>>,
}

impl<R, U> TaskQueue<R, U>
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a task at the tail.
    pub fn add_to_end(&self, task: Arc<Task<R, U>>) -> Result<(), TaskError> {
        self.insert(task, false)
    }

    /// Insert a task at the head; used exclusively for retries.
    pub fn add_to_begin(&self, task: Arc<Task<R, U>>) -> Result<(), TaskError> {
        self.insert(task, true)
    }

    fn insert(&self, task: Arc<Task<R, U>>, at_head: bool) -> Result<(), TaskError> {
        if !task.is_queueable() {
            return Err(TaskError::Internal(format!(
                "task {} is not queueable in state {:?}",
                task.id(),
                task.state()
            )));
        }
        let mut tasks = self.tasks.lock();
        if tasks.iter().any(|t| t.id() == task.id()) {
            return Err(TaskError::Internal(format!(
                "task {} is already queued",
                task.id()
            )));
        }
        if at_head {
            tasks.push_front(task);
        } else {
            tasks.push_back(task);
        }
        Ok(())
    }

    /// Remove and return the task at the front; `None` when empty.
    pub fn get(&self) -> Option<Arc<Task<R, U>>> {
        self.tasks.lock().pop_front()
    }

    /// Number of queued tasks.
    pub fn size(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Whether a task with this id is currently queued.
    pub fn has(&self, task: &Task<R, U>) -> bool {
        self.tasks.lock().iter().any(|t| t.id() == task.id())
    }
}

impl<R, U> Default for TaskQueue<R, U>
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
