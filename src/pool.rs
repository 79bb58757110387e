//! Worker Pool
//!
//! The public-facing scheduler: a fixed set of workers executing task
//! bodies over a dedicated tokio runtime, with all dependency decisions
//! delegated to the graph under one coarse mutex. Bodies are ordinary
//! blocking code; each is dispatched through `spawn_blocking`, and the
//! runtime's blocking pool is capped at the configured worker count.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, trace, warn};

use crate::error::{
    ConfigError, ConfigResult, PoolError, PoolResult, SchedResult, SchedulerError, TaskError,
};
use crate::graph::{Parent, TaskGraph};
use crate::model::{Task, WorkItem};

/// Pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of workers executing task bodies.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Name given to worker threads.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_thread_name() -> String {
    "taskpool-worker".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            thread_name: default_thread_name(),
        }
    }
}

impl PoolConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }
}

/// State shared between the pool handle, its workers, and task contexts.
#[derive(Debug)]
struct PoolShared {
    graph: Mutex<TaskGraph>,
    /// Signaled, under the graph mutex, whenever the graph becomes empty.
    drained: Condvar,
    accepting: AtomicBool,
    handle: tokio::runtime::Handle,
}

/// A fixed-capacity worker pool over a dynamic dependency graph.
///
/// Tasks submitted here run in parallel, limited by the worker count. A
/// running body may register further work through its [`TaskContext`]:
/// independent parallel tasks, continuations that run strictly after the
/// body, and post-processors that run only once the task's entire spawned
/// subtree has resolved. [`TaskPool::join`] blocks until nothing remains.
#[derive(Debug)]
pub struct TaskPool {
    shared: Arc<PoolShared>,
    runtime: Runtime,
    workers: usize,
}

impl TaskPool {
    /// Create a pool with a fixed number of workers.
    pub fn new(workers: usize) -> PoolResult<Self> {
        Self::with_config(PoolConfig {
            workers,
            ..PoolConfig::default()
        })
    }

    /// Create a pool sized to the number of available CPUs.
    pub fn with_defaults() -> PoolResult<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool from a full configuration.
    pub fn with_config(config: PoolConfig) -> PoolResult<Self> {
        if config.workers == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        // Bodies are blocking, so they run on the blocking pool; capping it
        // at the configured count gives a fixed set of worker threads
        // pulling from one shared queue. The single async worker only keeps
        // the runtime itself alive.
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.workers)
            .thread_name(config.thread_name.clone())
            .build()?;
        let shared = Arc::new(PoolShared {
            graph: Mutex::new(TaskGraph::new()),
            drained: Condvar::new(),
            accepting: AtomicBool::new(true),
            handle: runtime.handle().clone(),
        });
        debug!(workers = config.workers, "task pool started");
        Ok(Self {
            shared,
            runtime,
            workers: config.workers,
        })
    }

    /// Number of workers executing task bodies.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Wrap a work item into a task, register it at the root of the graph
    /// and hand it to a worker. Non-blocking; returns the task handle.
    pub fn submit(&self, item: impl WorkItem) -> SchedResult<Arc<Task>> {
        let task = Task::new(item);
        self.submit_task(Arc::clone(&task))?;
        Ok(task)
    }

    /// Register a caller-constructed task at the root of the graph and hand
    /// it to a worker. Re-submitting an already registered task is a no-op.
    pub fn submit_task(&self, task: Arc<Task>) -> SchedResult<()> {
        submit_root(&self.shared, task)
    }

    /// Block until the dependency graph is empty, meaning no submitted or
    /// nested work remains anywhere, then shut the workers down.
    ///
    /// Returns immediately if nothing is outstanding. Must not be called
    /// from inside a task body.
    pub fn join(self) {
        {
            let mut graph = lock_graph(&self.shared);
            while !graph.is_empty() {
                graph = self
                    .shared
                    .drained
                    .wait(graph)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        self.shared.accepting.store(false, Ordering::SeqCst);
        debug!("graph drained, shutting down workers");
        drop(self.runtime);
    }

    /// Stop accepting new work and wait only for bodies already picked up
    /// by a worker. Queued and nested work that has not started is
    /// abandoned; use this when giving up on the graph, not for a normal
    /// drain.
    pub fn shutdown(self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        let abandoned = lock_graph(&self.shared).len();
        debug!(abandoned, "shutdown requested, abandoning outstanding work");
        drop(self.runtime);
    }
}

/// Handle a running body uses to register further work against its pool.
///
/// Holds a non-owning back-reference: a task never keeps its pool alive,
/// and registration fails fast once the pool is gone or shutting down.
#[derive(Debug)]
pub struct TaskContext {
    shared: Weak<PoolShared>,
    task: Arc<Task>,
}

impl TaskContext {
    /// The task this body belongs to.
    #[must_use]
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Register an independent top-level task. It has no ordering relation
    /// to the current task and starts as soon as a worker is free.
    pub fn submit_parallel(&self, item: impl WorkItem) -> SchedResult<Arc<Task>> {
        let shared = self.shared()?;
        let task = Task::new(item);
        submit_root(&shared, Arc::clone(&task))?;
        Ok(task)
    }

    /// Register a continuation of the current task. It becomes eligible
    /// only once the current body has returned, and the current task's
    /// subtree is not resolved until the continuation (and, transitively,
    /// anything it registers) completes.
    pub fn submit_after_self(&self, item: impl WorkItem) -> SchedResult<Arc<Task>> {
        let shared = self.shared()?;
        if !shared.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }
        let task = Task::new(item);
        lock_graph(&shared).register(&task, Parent::Task(self.task.id()))?;
        trace!(task = %task.id(), after = %self.task.id(), "continuation queued");
        Ok(task)
    }

    /// Register a post-processor: it runs only after the current task's
    /// entire subtree, body plus continuations recursively, has resolved.
    /// Post-processors of one task are independent of each other.
    pub fn submit_post_processor(&self, item: impl WorkItem) -> SchedResult<Arc<Task>> {
        let shared = self.shared()?;
        if !shared.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }
        let task = Task::new(item);
        lock_graph(&shared).register_post_processor(&task, self.task.id())?;
        Ok(task)
    }

    fn shared(&self) -> SchedResult<Arc<PoolShared>> {
        self.shared.upgrade().ok_or(SchedulerError::PoolGone)
    }
}

fn lock_graph(shared: &PoolShared) -> MutexGuard<'_, TaskGraph> {
    shared.graph.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register a task at the graph root and dispatch it unless it was already
/// registered.
fn submit_root(shared: &Arc<PoolShared>, task: Arc<Task>) -> SchedResult<()> {
    if !shared.accepting.load(Ordering::SeqCst) {
        return Err(SchedulerError::ShuttingDown);
    }
    let newly_added = {
        let mut graph = lock_graph(shared);
        let newly_added = graph.register(&task, Parent::Root)?;
        if newly_added {
            graph.mark_started(task.id());
        }
        newly_added
    };
    if newly_added {
        dispatch(shared, task);
    }
    Ok(())
}

fn dispatch(shared: &Arc<PoolShared>, task: Arc<Task>) {
    trace!(task = %task.id(), "dispatching task");
    let shared = Arc::clone(shared);
    let handle = shared.handle.clone();
    let _ = handle.spawn_blocking(move || run_task(shared, task));
}

/// Worker entry point: run the body once, record its outcome, then let the
/// graph decide what becomes runnable.
fn run_task(shared: Arc<PoolShared>, task: Arc<Task>) {
    match task.take_body() {
        Some(body) => {
            let ctx = TaskContext {
                shared: Arc::downgrade(&shared),
                task: Arc::clone(&task),
            };
            // Completion marking is unconditional: a failing or panicking
            // body must never leave its subtree stuck in the graph.
            match catch_unwind(AssertUnwindSafe(|| body.run(&ctx))) {
                Ok(Ok(())) => trace!(task = %task.id(), "task body finished"),
                Ok(Err(err)) => {
                    warn!(task = %task.id(), error = %err, "task body failed");
                    task.record_failure(TaskError::Body(err));
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(task = %task.id(), panic = %message, "task body panicked");
                    task.record_failure(TaskError::Panicked { message });
                }
            }
            task.mark_completed();
        }
        None => warn!(task = %task.id(), "dispatched task had no body to run"),
    }
    complete(&shared, &task);
}

/// Feed a completion into the graph, wake joiners if it drained, and
/// dispatch whatever became runnable.
fn complete(shared: &Arc<PoolShared>, task: &Arc<Task>) {
    let ready = {
        let mut graph = lock_graph(shared);
        let ready = graph.on_completed(task.id());
        if graph.is_empty() {
            shared.drained.notify_all();
        }
        ready
    };
    for next in ready {
        dispatch(shared, next);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_worker_count_is_at_least_one() {
        let config = PoolConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.workers, num_cpus::get().max(1));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        assert!(matches!(TaskPool::new(0), Err(PoolError::ZeroWorkers)));
    }

    #[test]
    fn test_worker_count_is_the_configured_value() {
        let pool = TaskPool::new(3).unwrap();
        assert_eq!(pool.worker_count(), 3);
        pool.shutdown();
    }

    #[test]
    fn test_config_loads_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.toml");
        std::fs::write(&path, "workers = 3\nthread_name = \"diff-worker\"\n").unwrap();

        let config = PoolConfig::load(&path).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.thread_name, "diff-worker");
    }

    #[test]
    fn test_config_load_applies_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.toml");
        std::fs::write(&path, "workers = 2\n").unwrap();

        let config = PoolConfig::load(&path).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.thread_name, "taskpool-worker");
    }

    #[test]
    fn test_config_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            PoolConfig::load(&path),
            Err(ConfigError::FileNotFound { .. })
        ));
    }
}
