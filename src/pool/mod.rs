//! Bounded worker pool.
//!
//! A fixed set of worker threads consumes a strict FIFO queue of tasks. Each
//! task is one accepted client connection run through the proxy pipeline.
//!
//! # Lifecycle
//!
//! ```text
//! new(size) ──▶ accepting ──shutdown()──▶ draining ──queue empty──▶ stopping ──join──▶ done
//!                  │                         │
//!              dispatch: queued          dispatch: dropped
//! ```
//!
//! All shared state lives behind one mutex paired with two condition
//! variables: `not_empty` wakes idle workers and `empty` wakes a pending
//! [`WorkerPool::shutdown`] once the drain finishes. Task bodies always run
//! outside the lock.

mod worker;

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::PoolError;

/// Smallest accepted pool size
pub const MIN_POOL_SIZE: usize = 1;
/// Largest accepted pool size
pub const MAX_POOL_SIZE: usize = 200;

/// One unit of work. Owned by the queue until exactly one worker takes it.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of [`WorkerPool::dispatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The task is queued and will run exactly once
    Queued,
    /// The pool is shutting down; the task was discarded without running
    Dropped,
}

/// State guarded by the pool mutex
pub(crate) struct PoolState {
    pub(crate) queue: VecDeque<Task>,
    /// Flips true → false once, when shutdown starts
    pub(crate) accepting: bool,
    /// Flips false → true once, after the queue has drained
    pub(crate) shutting_down: bool,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<PoolState>,
    pub(crate) not_empty: Condvar,
    pub(crate) empty: Condvar,
}

/// Fixed-size pool of worker threads with drain-then-stop shutdown
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers.
    ///
    /// Fails if `size` is outside `[MIN_POOL_SIZE, MAX_POOL_SIZE]` or a worker
    /// thread cannot be spawned. On a spawn failure the workers already
    /// started are stopped and joined before the error is returned.
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if !(MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&size) {
            return Err(PoolError::InvalidSize(size));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                accepting: true,
                shutting_down: false,
            }),
            not_empty: Condvar::new(),
            empty: Condvar::new(),
        });

        let mut pool = WorkerPool {
            shared,
            workers: Vec::with_capacity(size),
            size,
        };

        for id in 0..size {
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("proxy-worker-{}", id))
                .spawn(move || worker::run(id, shared));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    warn!(worker = id, error = %e, "Failed to spawn worker, releasing pool");
                    pool.shutdown();
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        info!(workers = size, "Worker pool started");
        Ok(pool)
    }

    /// Queue a task at the tail and wake one idle worker.
    ///
    /// Never blocks on task execution. Once shutdown has begun the task is
    /// discarded and [`Dispatch::Dropped`] is returned.
    pub fn dispatch<F>(&self, task: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            drop(state);
            warn!("Pool is shutting down, task dropped");
            return Dispatch::Dropped;
        }

        state.queue.push_back(Box::new(task));
        let queued = state.queue.len();
        self.shared.not_empty.notify_one();
        drop(state);

        debug!(queued, "Task dispatched");
        Dispatch::Queued
    }

    /// Stop accepting work, wait for the queue to drain, then stop and join
    /// every worker.
    ///
    /// Blocks for the whole drain and join, with no timeout. Calling it again
    /// afterwards is a no-op.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            info!(queued = state.queue.len(), "Draining worker pool");

            while !state.queue.is_empty() {
                self.shared.empty.wait(&mut state);
            }

            state.shutting_down = true;
            self.shared.not_empty.notify_all();
        }

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread exited abnormally");
            }
        }

        info!(workers = self.size, "Worker pool stopped");
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Whether new tasks are still accepted
    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
