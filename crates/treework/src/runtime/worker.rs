use std::cell::RefCell;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::runtime::blocked::BlockedTaskPool;
use crate::runtime::constants::{
    MAX_IDLE_ROUNDS, NUM_WORKERS_ENV, SLEEP_RECHECK_TIME, SPLIT_QUEUE_THRESHOLD,
    SPLIT_TIME_THRESHOLD, WAKE_QUEUE_THRESHOLD, WORK_QUEUE_CAPACITY,
};
use crate::runtime::predictor::RuntimePredictor;
use crate::runtime::queue::BoundedWorkQueue;
use crate::runtime::task::Task;

/// [`default_num_workers`] reports the pool size used when nothing is
/// configured, which is the hardware concurrency of the machine.
pub(crate) fn default_num_workers() -> usize {
    let system_value = thread::available_parallelism().map_or(1, std::num::NonZero::get);
    tracing::debug!("thread::available_parallelism() reported: {}", system_value);
    system_value
}

/// [`get_num_workers`] fetches the desired total pool size (calling
/// thread included) from the `NUM_WORKERS` environment variable,
/// falling back to [`default_num_workers`] when the variable is unset,
/// malformed, zero or negative.
pub(crate) fn get_num_workers() -> usize {
    let workers = match env::var(NUM_WORKERS_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
    {
        Some(value) if value > 0 => {
            tracing::debug!("retrieved worker count {value} from {NUM_WORKERS_ENV}");
            value as usize
        }
        Some(value) => {
            tracing::debug!("ignoring non-positive {NUM_WORKERS_ENV}={value}");
            default_num_workers()
        }
        None => default_num_workers(),
    };

    tracing::debug!("reporting workers available for use: {}", workers);
    workers
}

/// Pins the calling thread to the given CPU index, wrapping around the
/// number of available cores.
#[cfg(target_os = "linux")]
fn pin_to_cpu(cpu: usize) {
    let cores = default_num_workers();
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu % cores, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_cpu: usize) {}

/// The per-worker queues shared between the owning worker, thieves and
/// threads scheduling work onto it.
pub(crate) struct WorkerSlot {
    pub(crate) queue: BoundedWorkQueue<Arc<Task>>,
    pub(crate) blocked: BlockedTaskPool,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            queue: BoundedWorkQueue::new(WORK_QUEUE_CAPACITY),
            blocked: BlockedTaskPool::new(),
        }
    }
}

/// State shared by every worker of a pool.
pub(crate) struct PoolCore {
    slots: Vec<Arc<WorkerSlot>>,
    seed: u64,
    total_workers: usize,
    /// Raised exactly once; workers probe it every scheduling round
    /// and wind down when it is up.
    winding_down: AtomicBool,
    sleep_lock: Mutex<()>,
    sleep_signal: Condvar,
    sleeping: AtomicUsize,
}

impl PoolCore {
    /// Starts the pool's shutdown. Returns false when another caller
    /// already did, making shutdown idempotent.
    fn initiate_shutdown(&self) -> bool {
        !self.winding_down.swap(true, Ordering::AcqRel)
    }

    fn is_winding_down(&self) -> bool {
        self.winding_down.load(Ordering::Acquire)
    }

    /// Wakes every sleeping worker; called whenever a deque grows past
    /// the wake threshold and on shutdown.
    pub(crate) fn work_available(&self) {
        if self.sleeping.load(Ordering::Acquire) > 0 {
            self.sleep_signal.notify_all();
        }
    }

    fn wait_for_work(&self) {
        let guard = self.sleep_lock.lock().expect("pool sleep lock poisoned");
        self.sleeping.fetch_add(1, Ordering::AcqRel);
        // bounded wait: a worker re-probes its blocked pool and the
        // shutdown signal even if no wake-up arrives
        let _unused = self
            .sleep_signal
            .wait_timeout(guard, SLEEP_RECHECK_TIME)
            .expect("pool sleep lock poisoned");
        self.sleeping.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A worker execution context. Worker threads own one each; the
/// calling thread gets one lazily, bound to slot 0, when it first
/// touches the runtime.
pub(crate) struct Worker {
    core: Arc<PoolCore>,
    slot: usize,
    rng: Mutex<ChaCha8Rng>,
    predictor: Mutex<RuntimePredictor>,
}

impl Worker {
    fn new(core: Arc<PoolCore>, slot: usize, seed: u64) -> Self {
        let total = core.total_workers;
        Self {
            core,
            slot,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            predictor: Mutex::new(RuntimePredictor::new(total)),
        }
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    fn slot_ref(&self) -> &WorkerSlot {
        &self.core.slots[self.slot]
    }

    /// Feeds an observed execution time into this worker's predictor.
    pub(crate) fn register_time(&self, level: usize, time: Duration) {
        self.predictor
            .lock()
            .expect("worker predictor lock poisoned")
            .register_time(level, time);
    }

    /// Submits a task for execution. Tasks with unmet dependencies go
    /// to the blocked pool; ready tasks are enqueued, or run inline as
    /// back-pressure when the deque is full.
    pub(crate) fn schedule(&self, task: Arc<Task>) {
        if !task.is_ready() {
            tracing::trace!("parking blocked {:?} on worker {}", task, self.slot);
            self.slot_ref().blocked.add_task(task);
            return;
        }

        let slot = self.slot_ref();
        match slot.queue.push_back(task) {
            Ok(()) => {
                if slot.queue.len() > WAKE_QUEUE_THRESHOLD {
                    self.core.work_available();
                }
            }
            Err(rejected) => {
                // queue full: process the task right here
                let task = rejected.into_inner();
                tracing::trace!("queue full, running {:?} inline", task);
                Task::run(&task, self);
            }
        }
    }

    /// Performs one scheduling step: local work first, then the
    /// blocked pool, then an attempted steal. Returns false when no
    /// work was found.
    pub(crate) fn schedule_step(&self) -> bool {
        // newest local work first, for cache locality
        if let Some(task) = self.slot_ref().queue.pop_back() {
            self.split_and_run(&task);
            return true;
        }

        if let Some(task) = self.slot_ref().blocked.get_ready_task() {
            self.split_and_run(&task);
            return true;
        }

        // try to steal the oldest work of a random victim
        let slots = &self.core.slots;
        if slots.len() <= 1 {
            return false;
        }

        let victim = {
            let mut rng = self.rng.lock().expect("worker rng lock poisoned");
            (rng.next_u64() as usize) % slots.len()
        };
        if victim == self.slot {
            return false;
        }

        if let Some(task) = slots[victim].queue.try_pop_front() {
            tracing::trace!("worker {} stole {:?} from worker {}", self.slot, task, victim);
            self.split_and_run(&task);
            return true;
        }

        false
    }

    /// Decides whether to decompose the task before running it: only
    /// while the local deque has room for the children, and only when
    /// the predictor considers the task heavy enough to be worth it.
    fn split_and_run(&self, task: &Arc<Task>) {
        let mut was_split = false;
        if self.slot_ref().queue.len() <= SPLIT_QUEUE_THRESHOLD && task.is_splittable() {
            let predicted = self
                .predictor
                .lock()
                .expect("worker predictor lock poisoned")
                .predict_time(task.depth());
            if predicted >= SPLIT_TIME_THRESHOLD {
                was_split = Task::split(task, self);
            }
        }

        // sample sequential executions for the predictor
        let timed = !was_split && task.has_sequential_body();
        let started = Instant::now();
        Task::run(task, self);
        if timed {
            self.register_time(task.depth(), started.elapsed());
        }
    }
}

fn worker_loop(worker: &Arc<Worker>) {
    let mut idle_rounds: u32 = 0;

    while !worker.core.is_winding_down() {
        if worker.schedule_step() {
            idle_rounds = 0;
            continue;
        }

        idle_rounds += 1;
        std::hint::spin_loop();

        if idle_rounds > MAX_IDLE_ROUNDS {
            tracing::trace!("worker {} going to sleep", worker.slot());
            worker.core.wait_for_work();
            idle_rounds = 0;
        }
    }

    tracing::debug!("worker {} exiting", worker.slot());
}

/// The work-stealing worker pool.
///
/// The process-wide instance is created lazily by [`WorkerPool::global`]
/// and lives for the rest of the process; pools built directly with
/// [`WorkerPool::with_workers`] are joined on [`WorkerPool::shutdown`]
/// or drop.
pub struct WorkerPool {
    core: Arc<PoolCore>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// The process-wide pool, configured from the environment on first
    /// use.
    pub fn global() -> &'static WorkerPool {
        static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();
        GLOBAL.get_or_init(|| WorkerPool::with_workers(get_num_workers()))
    }

    /// Builds a pool for the given total size, the calling thread
    /// counting as one member. At least one worker thread is always
    /// spawned.
    #[must_use]
    pub fn with_workers(total_workers: usize) -> WorkerPool {
        Self::with_seed_and_workers(rand::rng().next_u64(), total_workers)
    }

    /// Builds a pool with a fixed seed for the steal-victim RNGs.
    #[must_use]
    pub fn with_seed_and_workers(seed: u64, total_workers: usize) -> WorkerPool {
        let total_workers = total_workers.max(1);

        // the calling thread participates, so one thread less is
        // spawned; a lone configured worker still gets a companion
        let spawned = (total_workers - 1).max(1);

        tracing::debug!(
            "starting pool: {} total, {} spawned worker threads",
            total_workers,
            spawned
        );

        let core = Arc::new(PoolCore {
            slots: (0..spawned).map(|_| Arc::new(WorkerSlot::new())).collect(),
            seed,
            total_workers,
            winding_down: AtomicBool::new(false),
            sleep_lock: Mutex::new(()),
            sleep_signal: Condvar::new(),
            sleeping: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(spawned);
        for index in 0..spawned {
            let core = core.clone();
            let handle = thread::Builder::new()
                .name(format!("treework-worker-{index}"))
                .spawn(move || {
                    pin_to_cpu(index + 1);
                    let worker = Arc::new(Worker::new(core, index, seed ^ (index as u64 + 1)));
                    register_current_worker(&worker);
                    worker_loop(&worker);
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        // the calling thread takes CPU 0
        pin_to_cpu(0);

        WorkerPool {
            core,
            handles: Mutex::new(handles),
        }
    }

    /// Number of worker threads backing this pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.core.slots.len()
    }

    /// Stops all workers and joins their threads. Idempotent.
    pub fn shutdown(&self) {
        if !self.core.initiate_shutdown() {
            return;
        }
        self.core.sleep_signal.notify_all();

        let handles: Vec<_> = {
            let mut guard = self.handles.lock().expect("pool handle lock poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }
        tracing::debug!("pool shut down");
    }

    pub(crate) fn core(&self) -> &Arc<PoolCore> {
        &self.core
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<Arc<Worker>>> = const { RefCell::new(None) };
}

fn register_current_worker(worker: &Arc<Worker>) {
    CURRENT_WORKER.with(|current| {
        *current.borrow_mut() = Some(worker.clone());
    });
}

/// The worker context of the calling thread. Worker threads carry
/// their own; any other thread is lazily attached to slot 0 of the
/// global pool, sharing that slot's queues under their locks.
pub(crate) fn current_worker() -> Arc<Worker> {
    CURRENT_WORKER.with(|current| {
        let mut current = current.borrow_mut();
        if let Some(worker) = current.as_ref() {
            return worker.clone();
        }

        let core = WorkerPool::global().core().clone();
        let seed = core.seed;
        let worker = Arc::new(Worker::new(core, 0, seed.wrapping_mul(0x9e37_79b9_7f4a_7c15)));
        *current = Some(worker.clone());
        worker
    })
}
