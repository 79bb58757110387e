//! Dependency Graph Bookkeeping
//!
//! A forest of in-flight tasks and their parent/child and post-processor
//! relations. On every completion the graph decides what becomes runnable
//! and which subtrees can be discarded. The structure is purely synchronous;
//! the pool drives every call under a single mutex, so logically conflicting
//! completions are totally ordered.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::error::{SchedResult, SchedulerError};
use crate::model::{Task, TaskId};

/// Parent link of a graph node. `Root` marks top-level submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parent {
    Root,
    Task(TaskId),
}

/// Per-task bookkeeping. One node per live task.
#[derive(Debug)]
struct Node {
    task: Arc<Task>,
    parent: Parent,
    /// Live continuations: registered, possibly not yet started. A node
    /// stays in the graph until this set is empty.
    children: HashSet<TaskId>,
    /// Pending post-processors. Not yet runnable and not yet nodes; promoted
    /// to started children once the node's own subtree has resolved.
    post_processors: Vec<Arc<Task>>,
    started: bool,
    completed: bool,
}

impl Node {
    fn new(task: Arc<Task>, parent: Parent) -> Self {
        Self {
            task,
            parent,
            children: HashSet::new(),
            post_processors: Vec::new(),
            started: false,
            completed: false,
        }
    }
}

/// The dependency graph manager.
///
/// The graph is empty exactly when no work remains outstanding anywhere;
/// that is the sole termination condition for the pool's join operation.
#[derive(Debug, Default)]
pub(crate) struct TaskGraph {
    nodes: HashMap<TaskId, Node>,
}

impl TaskGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Add a node for `task` under `parent`.
    ///
    /// Idempotent: returns `Ok(false)` without touching the graph when the
    /// task is already registered. Registering under a parent that has no
    /// live node is rejected.
    pub(crate) fn register(&mut self, task: &Arc<Task>, parent: Parent) -> SchedResult<bool> {
        let id = task.id();
        if self.nodes.contains_key(&id) {
            trace!(task = %id, "task already registered");
            return Ok(false);
        }
        if let Parent::Task(pid) = parent {
            let Some(owner) = self.nodes.get_mut(&pid) else {
                return Err(SchedulerError::UnknownOwner { id: pid });
            };
            owner.children.insert(id);
        }
        self.nodes.insert(id, Node::new(Arc::clone(task), parent));
        trace!(task = %id, ?parent, live = self.nodes.len(), "task registered");
        Ok(true)
    }

    /// Append `task` to `owner`'s pending post-processor set without making
    /// it runnable.
    pub(crate) fn register_post_processor(
        &mut self,
        task: &Arc<Task>,
        owner: TaskId,
    ) -> SchedResult<()> {
        let Some(node) = self.nodes.get_mut(&owner) else {
            return Err(SchedulerError::UnknownOwner { id: owner });
        };
        node.post_processors.push(Arc::clone(task));
        trace!(task = %task.id(), owner = %owner, "post-processor registered");
        Ok(())
    }

    pub(crate) fn mark_started(&mut self, id: TaskId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.started = true;
        }
    }

    /// Core completion step, invoked once per task when its body returns.
    ///
    /// Returns the tasks that became eligible to run: first any
    /// continuations registered during the body, else the task's own
    /// post-processors, else post-processors of ancestors reached by the
    /// upward reclamation walk.
    pub(crate) fn on_completed(&mut self, id: TaskId) -> Vec<Arc<Task>> {
        let mut ready = Vec::new();
        let child_ids: Vec<TaskId>;
        let has_pending;
        {
            let Some(node) = self.nodes.get_mut(&id) else {
                error!(task = %id, "completion reported for a task with no node");
                debug_assert!(false, "completion reported for a task with no node");
                return ready;
            };
            node.completed = true;
            child_ids = node.children.iter().copied().collect();
            has_pending = !node.post_processors.is_empty();
        }

        if !child_ids.is_empty() {
            // Release the continuations the body registered. The node stays
            // live until every child has resolved.
            for cid in child_ids {
                let Some(child) = self.nodes.get_mut(&cid) else {
                    error!(task = %id, child = %cid, "child vanished before release");
                    debug_assert!(false, "child vanished before release");
                    continue;
                };
                if !child.started {
                    child.started = true;
                    ready.push(Arc::clone(&child.task));
                }
            }
            debug!(task = %id, released = ready.len(), "continuations released");
            return ready;
        }

        if has_pending {
            ready.extend(self.promote_post_processors(id));
            return ready;
        }

        // Nothing left under this task: prune it and walk upward.
        ready.extend(self.resolve(id));
        ready
    }

    /// Reclaim a fully resolved node and walk up the ancestor chain.
    ///
    /// Iterative on purpose: the walk depth equals the dependency depth,
    /// which is unbounded.
    fn resolve(&mut self, id: TaskId) -> Vec<Arc<Task>> {
        let mut ready = Vec::new();
        let mut current = id;
        loop {
            let Some(node) = self.nodes.remove(&current) else {
                error!(task = %current, "resolve reached a task with no node");
                debug_assert!(false, "resolve reached a task with no node");
                break;
            };
            debug_assert!(node.completed, "reclaimed an incomplete node");
            debug_assert!(node.children.is_empty(), "reclaimed a node with live children");
            debug_assert!(
                node.post_processors.is_empty(),
                "reclaimed a node with pending post-processors"
            );
            trace!(task = %current, live = self.nodes.len(), "node reclaimed");

            let pid = match node.parent {
                Parent::Root => break,
                Parent::Task(pid) => pid,
            };
            let has_live_children;
            let has_pending;
            let parent_completed;
            {
                let Some(parent) = self.nodes.get_mut(&pid) else {
                    error!(task = %current, parent = %pid, "parent vanished before child");
                    debug_assert!(false, "parent vanished before child");
                    break;
                };
                parent.children.remove(&current);
                has_live_children = !parent.children.is_empty();
                has_pending = !parent.post_processors.is_empty();
                parent_completed = parent.completed;
            }
            if has_live_children {
                // Other branches of the parent are still outstanding.
                break;
            }
            if has_pending {
                ready.extend(self.promote_post_processors(pid));
                break;
            }
            if !parent_completed {
                // The parent's own completion will continue from here.
                break;
            }
            current = pid;
        }
        ready
    }

    /// Start every pending post-processor of `owner`, reparenting each as a
    /// live child. The owner cannot be reclaimed until they resolve.
    fn promote_post_processors(&mut self, owner: TaskId) -> Vec<Arc<Task>> {
        let pending = match self.nodes.get_mut(&owner) {
            Some(node) => std::mem::take(&mut node.post_processors),
            None => return Vec::new(),
        };
        debug!(owner = %owner, count = pending.len(), "promoting post-processors");
        let mut ready = Vec::with_capacity(pending.len());
        for task in pending {
            if matches!(self.register(&task, Parent::Task(owner)), Ok(true)) {
                self.mark_started(task.id());
                ready.push(task);
            }
        }
        ready
    }
}
