use std::sync::Arc;

use crate::runtime::task::Task;
use crate::synca::SpinLock;

/// The unordered pool a worker parks tasks in while their dependencies
/// are unmet. Drained by the owning worker whenever its deque runs dry.
///
/// The scan is linear, which is fine: ready tasks migrate to the deque
/// quickly, so the pool stays small.
pub(crate) struct BlockedTaskPool {
    pool: SpinLock<Vec<Arc<Task>>>,
}

impl BlockedTaskPool {
    pub(crate) fn new() -> Self {
        Self {
            pool: SpinLock::new(Vec::new()),
        }
    }

    pub(crate) fn add_task(&self, task: Arc<Task>) {
        self.pool.lock().push(task);
    }

    /// Removes and returns the first task whose dependencies have all
    /// completed, if any.
    pub(crate) fn get_ready_task(&self) -> Option<Arc<Task>> {
        let mut pool = self.pool.lock();
        let position = pool.iter().position(|task| task.is_ready())?;
        Some(pool.swap_remove(position))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }
}
