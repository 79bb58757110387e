//! Taskpool Library
//!
//! A dependency-aware worker pool: a fixed set of workers executing units
//! of work while tracking a dynamic, runtime-discovered dependency graph
//! between them. A running task may register continuations that run
//! strictly after its own body, post-processors that run only once its
//! entire spawned subtree has resolved, and independent tasks that simply
//! run in parallel. Joining the pool blocks until no work remains anywhere.
//!
//! ```
//! use taskpool::{TaskContext, TaskPool};
//!
//! let pool = TaskPool::new(2).unwrap();
//! let task = pool
//!     .submit(|ctx: &TaskContext| {
//!         ctx.submit_after_self(|_: &TaskContext| Ok(()))?;
//!         Ok(())
//!     })
//!     .unwrap();
//! pool.join();
//! assert!(task.is_completed());
//! ```

pub mod error;
mod graph;
pub mod logging;
pub mod model;
pub mod pool;

pub use error::{
    BodyError, ConfigError, ConfigResult, PoolError, PoolResult, Result, SchedResult,
    SchedulerError, TaskError, TaskPoolError,
};
pub use model::{Task, TaskId, WorkItem, WorkResult};
pub use pool::{PoolConfig, TaskContext, TaskPool};
