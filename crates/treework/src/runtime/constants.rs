// --- Constants

use core::time;

/// Capacity of each worker's bounded work deque. Small on purpose: a
/// full deque pushes back on producers, which then execute inline.
pub const WORK_QUEUE_CAPACITY: usize = 8;

/// A worker only splits a popped task while its own deque sits at or
/// below this fill level, leaving room for the children.
pub const SPLIT_QUEUE_THRESHOLD: usize = (WORK_QUEUE_CAPACITY * 3) / 4;

/// Queue length past which newly enqueued work wakes sleeping workers.
pub const WAKE_QUEUE_THRESHOLD: usize = WORK_QUEUE_CAPACITY / 2;

/// Number of consecutive empty scheduling rounds before a worker goes
/// to sleep on the pool condition variable.
pub const MAX_IDLE_ROUNDS: u32 = 100_000;

/// `SLEEP_RECHECK_TIME` bounds how long a sleeping worker waits before
/// re-probing its blocked pool and the shutdown signal.
pub const SLEEP_RECHECK_TIME: time::Duration = time::Duration::from_millis(100);

/// Tasks whose predicted duration falls below this are not worth the
/// overhead of splitting.
pub const SPLIT_TIME_THRESHOLD: time::Duration = time::Duration::from_micros(10);

/// Environment variable naming the total pool size, calling thread
/// included.
pub const NUM_WORKERS_ENV: &str = "NUM_WORKERS";
