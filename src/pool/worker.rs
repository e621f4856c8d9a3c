//! Worker thread loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

use super::{Shared, Task};

/// Body of one worker thread. Returns once the pool has drained and
/// signalled shutdown.
pub(super) fn run(id: usize, shared: Arc<Shared>) {
    debug!(worker = id, "Worker started");

    while let Some(task) = next_task(&shared) {
        // A panicking task must not take the worker down with it
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(worker = id, "Task panicked");
        }
    }

    debug!(worker = id, "Worker stopped");
}

/// Block until a task is available or shutdown is signalled.
fn next_task(shared: &Shared) -> Option<Task> {
    let mut state = shared.state.lock();
    loop {
        if state.shutting_down {
            return None;
        }

        if let Some(task) = state.queue.pop_front() {
            if state.queue.is_empty() && !state.accepting {
                shared.empty.notify_all();
            }
            return Some(task);
        }

        shared.not_empty.wait(&mut state);
    }
}
