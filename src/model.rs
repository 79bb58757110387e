//! Task Model
//!
//! Work items, the `Task` wrapper, and per-task completion/failure state.
//!
//! A [`WorkItem`] is the smallest scheduling unit: a consuming, run-once
//! body. A [`Task`] wraps exactly one work item and carries the state the
//! pool tracks for it: whether the body has returned, and the error it
//! produced if it did not return cleanly. Ordering relations between tasks
//! live in the dependency graph, not here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{BodyError, TaskError};
use crate::pool::TaskContext;

/// Task identifier
pub type TaskId = Uuid;

/// Outcome of a work item body.
pub type WorkResult = std::result::Result<(), BodyError>;

/// A unit of work executable by the pool.
///
/// The body consumes the item, so it can run at most once. It receives a
/// [`TaskContext`] through which it may register continuations,
/// post-processors, and independent parallel tasks against the owning pool.
pub trait WorkItem: Send + 'static {
    /// Execute the body.
    fn run(self: Box<Self>, ctx: &TaskContext) -> WorkResult;
}

impl<F> WorkItem for F
where
    F: FnOnce(&TaskContext) -> WorkResult + Send + 'static,
{
    fn run(self: Box<Self>, ctx: &TaskContext) -> WorkResult {
        (*self)(ctx)
    }
}

/// A registered, trackable unit of work.
///
/// Identity is by `Arc` pointer and [`TaskId`]; tasks are never reused.
/// `is_completed` reports whether the body has returned (successfully or
/// with an error), regardless of descendants still outstanding in the graph.
pub struct Task {
    id: TaskId,
    /// Taken exactly once when a worker picks the task up.
    body: Mutex<Option<Box<dyn WorkItem>>>,
    completed: AtomicBool,
    failure: Mutex<Option<TaskError>>,
}

impl Task {
    /// Wrap a work item into a submittable task.
    pub fn new(item: impl WorkItem) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            body: Mutex::new(Some(Box::new(item))),
            completed: AtomicBool::new(false),
            failure: Mutex::new(None),
        })
    }

    /// Unique identifier of this task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True once the body has returned, even if it returned an error or
    /// panicked. Descendants may still be running.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// True if the body returned an error or panicked.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        lock_ignore_poison(&self.failure).is_some()
    }

    /// Drain the recorded body failure, if any.
    pub fn take_failure(&self) -> Option<TaskError> {
        lock_ignore_poison(&self.failure).take()
    }

    pub(crate) fn take_body(&self) -> Option<Box<dyn WorkItem>> {
        lock_ignore_poison(&self.body).take()
    }

    pub(crate) fn mark_completed(&self) {
        let already = self.completed.swap(true, Ordering::AcqRel);
        debug_assert!(!already, "task completed twice");
    }

    pub(crate) fn record_failure(&self, err: TaskError) {
        *lock_ignore_poison(&self.failure) = Some(err);
    }
}

/// Poisoning only occurs if a panic escapes while the lock is held; the
/// critical sections here are plain stores, so the data is always valid.
fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("completed", &self.is_completed())
            .field("failed", &self.has_failed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_task() -> Arc<Task> {
        Task::new(|_: &TaskContext| Ok(()))
    }

    #[test]
    fn test_new_task_is_not_completed() {
        let task = noop_task();
        assert!(!task.is_completed());
        assert!(!task.has_failed());
    }

    #[test]
    fn test_body_is_taken_exactly_once() {
        let task = noop_task();
        assert!(task.take_body().is_some());
        assert!(task.take_body().is_none());
    }

    #[test]
    fn test_completion_is_tracked() {
        let task = noop_task();
        task.mark_completed();
        assert!(task.is_completed());
    }

    #[test]
    fn test_failure_is_recorded_and_drained() {
        let task = noop_task();
        task.record_failure(TaskError::Panicked {
            message: "boom".to_string(),
        });
        assert!(task.has_failed());
        assert!(matches!(
            task.take_failure(),
            Some(TaskError::Panicked { .. })
        ));
        assert!(task.take_failure().is_none());
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = noop_task();
        let b = noop_task();
        assert_ne!(a.id(), b.id());
    }
}
