//! The work-stealing runtime: task objects, per-worker queues, the
//! worker pool and the split-decision machinery.

mod blocked;
mod constants;
mod predictor;
mod queue;
pub(crate) mod task;
mod task_id;
pub(crate) mod worker;

pub use constants::*;
pub use predictor::{RuntimePredictor, MAX_PREDICTOR_LEVELS};
pub use queue::{BoundedWorkQueue, QueueFull};
pub use task::TaskState;
pub use task_id::TaskId;
pub use worker::WorkerPool;
