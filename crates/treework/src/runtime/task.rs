use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use derive_more::Display;

use crate::deps::Dependencies;
use crate::runtime::task_id::TaskId;
use crate::runtime::worker::Worker;

/// Type-erased task result, moved between tasks during aggregation and
/// cloned out by value handles.
pub(crate) type AnyValue = Box<dyn Any + Send>;

/// A sequential task body.
pub(crate) type BodyFn = Box<dyn FnOnce() -> AnyValue + Send>;

/// Combines the results of two completed children.
pub(crate) type MergeFn = Box<dyn FnOnce(AnyValue, AnyValue) -> AnyValue + Send>;

/// Produces the finer decomposition a splittable task mutates into.
pub(crate) type SplitterFn = Box<dyn FnOnce() -> Arc<Task> + Send>;

/// The lifecycle states of a task. Observations of a task's state are
/// monotone: a task only ever moves towards `Done`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskState {
    /// created, not yet processed by a worker
    New = 0,
    /// has unfinished dependencies
    Blocked = 1,
    /// may be processed (sits in a work queue)
    Ready = 2,
    /// currently executing, or waiting for split children
    Running = 3,
    /// a split task combining its child results
    Aggregating = 4,
    /// completed
    Done = 5,
}

impl TaskState {
    fn from_u8(raw: u8) -> TaskState {
        match raw {
            0 => TaskState::New,
            1 => TaskState::Blocked,
            2 => TaskState::Ready,
            3 => TaskState::Running,
            4 => TaskState::Aggregating,
            5 => TaskState::Done,
            _ => unreachable!("invalid task state {raw}"),
        }
    }
}

/// What a task does once it runs. Exactly one variant is in effect for
/// the whole lifetime; it is consumed when the decision falls.
pub(crate) enum TaskBody {
    /// a plain sequential computation
    Leaf(BodyFn),

    /// a sequential computation that may alternatively be decomposed
    Splittable { body: BodyFn, splitter: SplitterFn },

    /// a combining node over the two child tasks; `merge` of `None`
    /// discards the child values and produces the unit value
    Split {
        merge: Option<MergeFn>,
        parallel: bool,
    },

    /// the body has been taken by `run` or `split`
    Consumed,
}

/// The runtime's task object.
///
/// Ownership: a task is held jointly by its parent (via the child and
/// substitute links) and by external treeture handles; both are `Arc`
/// counts. The parent link in the other direction is weak, valid while
/// the child is alive because a split parent always outlives the
/// children it waits for.
pub struct Task {
    id: Mutex<TaskId>,
    state: AtomicU8,
    dependencies: Mutex<Dependencies>,
    body: Mutex<TaskBody>,
    children: Mutex<Option<(Arc<Task>, Arc<Task>)>>,
    substitute: Mutex<Option<Arc<Task>>>,
    parent: Mutex<Option<Weak<Task>>>,
    alive_children: AtomicU32,
    value: Mutex<Option<AnyValue>>,
}

impl Task {
    // -- constructors --

    pub(crate) fn new_leaf(deps: Dependencies, body: BodyFn) -> Arc<Task> {
        Self::build(deps, TaskBody::Leaf(body), None, None)
    }

    pub(crate) fn new_splittable(
        deps: Dependencies,
        body: BodyFn,
        splitter: SplitterFn,
    ) -> Arc<Task> {
        Self::build(deps, TaskBody::Splittable { body, splitter }, None, None)
    }

    pub(crate) fn new_split(
        deps: Dependencies,
        left: Arc<Task>,
        right: Arc<Task>,
        merge: Option<MergeFn>,
        parallel: bool,
    ) -> Arc<Task> {
        Self::build(deps, TaskBody::Split { merge, parallel }, Some((left, right)), None)
    }

    pub(crate) fn new_done(value: AnyValue) -> Arc<Task> {
        Self::build(Dependencies::none(), TaskBody::Consumed, None, Some(value))
    }

    fn build(
        deps: Dependencies,
        body: TaskBody,
        children: Option<(Arc<Task>, Arc<Task>)>,
        value: Option<AnyValue>,
    ) -> Arc<Task> {
        let state = if value.is_some() {
            TaskState::Done
        } else {
            TaskState::New
        };
        let task = Arc::new(Task {
            id: Mutex::new(TaskId::fresh_root()),
            state: AtomicU8::new(state as u8),
            dependencies: Mutex::new(deps),
            body: Mutex::new(body),
            children: Mutex::new(children),
            substitute: Mutex::new(None),
            parent: Mutex::new(None),
            alive_children: AtomicU32::new(0),
            value: Mutex::new(value),
        });
        tracing::trace!("created {:?}", task);
        task
    }

    // -- observers --

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    pub(crate) fn id(&self) -> TaskId {
        *self.id.lock().expect("task id lock poisoned")
    }

    pub(crate) fn depth(&self) -> usize {
        self.id().depth()
    }

    /// The left child of this task's decomposition, looking through an
    /// installed substitute.
    pub(crate) fn left_child(&self) -> Option<Arc<Task>> {
        if let Some(substitute) = self.substitute_handle() {
            return substitute.left_child();
        }
        self.children
            .lock()
            .expect("task children lock poisoned")
            .as_ref()
            .map(|(left, _)| left.clone())
    }

    /// The right child of this task's decomposition, looking through an
    /// installed substitute.
    pub(crate) fn right_child(&self) -> Option<Arc<Task>> {
        if let Some(substitute) = self.substitute_handle() {
            return substitute.right_child();
        }
        self.children
            .lock()
            .expect("task children lock poisoned")
            .as_ref()
            .map(|(_, right)| right.clone())
    }

    fn substitute_handle(&self) -> Option<Arc<Task>> {
        self.substitute
            .lock()
            .expect("task substitute lock poisoned")
            .clone()
    }

    /// True once every dependency has completed. The first observation
    /// of readiness flips the task to `Ready` and releases the
    /// dependency list.
    pub(crate) fn is_ready(&self) -> bool {
        loop {
            match self.state() {
                TaskState::New => {
                    // bind the dependencies: New -> Blocked
                    self.switch_state(TaskState::New, TaskState::Blocked);
                }
                TaskState::Blocked => {
                    {
                        let deps = self.dependencies.lock().expect("task deps lock poisoned");
                        if !deps.all_done() {
                            return false;
                        }
                    }

                    tracing::trace!("preconditions satisfied, task ready: {:?}", self);

                    if self.switch_state(TaskState::Blocked, TaskState::Ready) {
                        // release the dependency handles
                        self.dependencies
                            .lock()
                            .expect("task deps lock poisoned")
                            .clear();
                    }
                    return true;
                }
                // Ready and beyond: the dependencies were honored
                _ => return true,
            }
        }
    }

    // -- state handling --

    fn set_state(&self, next: TaskState) {
        let current = self.state();
        assert!(
            matches!(
                (current, next),
                (TaskState::New, TaskState::Blocked)
                    | (TaskState::New, TaskState::Ready)
                    | (TaskState::Blocked, TaskState::Ready)
                    | (TaskState::Ready, TaskState::Running)
                    | (TaskState::Running, TaskState::Aggregating)
                    | (TaskState::Running, TaskState::Done)
                    | (TaskState::Aggregating, TaskState::Done)
            ),
            "illegal state transition from {current} to {next}"
        );
        self.state.store(next as u8, Ordering::Release);
        tracing::trace!("updated state: {:?}", self);
    }

    fn switch_state(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    // -- execution --

    /// Executes a task on the given worker. Invoked exactly once, in
    /// state `Ready`.
    pub(crate) fn run(this: &Arc<Task>, worker: &Worker) {
        tracing::trace!("running {:?}", this);
        assert_eq!(TaskState::Ready, this.state(), "run on a task that is not ready");
        this.set_state(TaskState::Running);

        // forward to the substitute if the task has been split
        if let Some(substitute) = this.substitute_handle() {
            if substitute.is_done() {
                // a splitter may hand back an already completed tree
                this.adopt_value_of(&substitute);
                this.finish(worker);
            } else {
                Task::run(&substitute, worker);
            }
            return;
        }

        let action = {
            let mut body = this.body.lock().expect("task body lock poisoned");
            match &*body {
                TaskBody::Leaf(_) | TaskBody::Splittable { .. } => {
                    match std::mem::replace(&mut *body, TaskBody::Consumed) {
                        TaskBody::Leaf(f) | TaskBody::Splittable { body: f, .. } => Some(f),
                        _ => unreachable!(),
                    }
                }
                TaskBody::Split { .. } => None,
                TaskBody::Consumed => unreachable!("task body consumed before run"),
            }
        };

        match action {
            Some(body) => {
                let value = body();
                *this.value.lock().expect("task value lock poisoned") = Some(value);
                this.finish(worker);
            }
            None => Task::run_split(this, worker),
        }
    }

    fn run_split(this: &Arc<Task>, worker: &Worker) {
        let (left, right) = this
            .children
            .lock()
            .expect("task children lock poisoned")
            .clone()
            .expect("split task without children");

        let parallel = match &*this.body.lock().expect("task body lock poisoned") {
            TaskBody::Split { parallel, .. } => *parallel,
            _ => unreachable!("split task without a split body"),
        };

        // run sequentially if requested
        if !parallel {
            Task::run_inline(&left, worker);
            Task::run_inline(&right, worker);
            this.finish(worker);
            return;
        }

        // count the children that still have to complete
        let mut pending = 0;
        if !left.is_done() {
            pending += 1;
        }
        if !right.is_done() {
            pending += 1;
        }

        if pending == 0 {
            // both children already finished, reduce immediately
            this.finish(worker);
            return;
        }

        this.alive_children.store(pending, Ordering::Release);

        // connect and schedule the unfinished children
        if !left.is_done() {
            tracing::trace!("starting child {:?} of {:?}", left, this);
            left.set_parent(this);
            worker.schedule(left);
        }
        if !right.is_done() {
            tracing::trace!("starting child {:?} of {:?}", right, this);
            right.set_parent(this);
            worker.schedule(right);
        }
    }

    /// Runs a task to completion on the current thread, bypassing the
    /// work queues. Used for the sequential arm of split tasks.
    pub(crate) fn run_inline(this: &Arc<Task>, worker: &Worker) {
        if this.is_done() {
            return;
        }

        debug_assert!(
            this.substitute_handle().is_none(),
            "inline execution of a split task"
        );

        // wait for any dependencies, helping the scheduler meanwhile
        while !this.is_ready() {
            if !worker.schedule_step() {
                std::hint::spin_loop();
            }
        }

        Task::run(this, worker);

        // a sequential child may itself have spawned parallel children;
        // see it through to completion before the successor starts
        while !this.is_done() {
            if !worker.schedule_step() {
                std::hint::spin_loop();
            }
        }
    }

    /// Elects to decompose a task instead of running its sequential
    /// body. Permitted only while `Ready`; a task without a splitter is
    /// left untouched.
    pub(crate) fn split(this: &Arc<Task>, worker: &Worker) -> bool {
        if this.state() != TaskState::Ready {
            return false;
        }

        let splitter = {
            let mut body = this.body.lock().expect("task body lock poisoned");
            match &*body {
                TaskBody::Splittable { .. } => {
                    match std::mem::replace(&mut *body, TaskBody::Consumed) {
                        TaskBody::Splittable { splitter, .. } => splitter,
                        _ => unreachable!(),
                    }
                }
                // only splittable tasks can be decomposed
                _ => return false,
            }
        };

        tracing::debug!("splitting {:?} on worker {}", this, worker.slot());

        // decompose and install the substitute
        let substitute = splitter();
        substitute.reassign_id(this.id());

        let substitute_state = substitute.state();
        assert!(
            matches!(substitute_state, TaskState::New | TaskState::Done),
            "freshly decomposed task in state {substitute_state}"
        );

        // enable the substitute without scheduling it
        if substitute_state == TaskState::New {
            substitute.switch_state(TaskState::New, TaskState::Ready);
        }
        substitute.set_parent(this);

        *this
            .substitute
            .lock()
            .expect("task substitute lock poisoned") = Some(substitute);
        true
    }

    /// True while the task still carries a splitter that `split` could
    /// act upon.
    pub(crate) fn is_splittable(&self) -> bool {
        matches!(
            &*self.body.lock().expect("task body lock poisoned"),
            TaskBody::Splittable { .. }
        )
    }

    /// True while running this task would execute a sequential body,
    /// which is what the runtime predictor samples.
    pub(crate) fn has_sequential_body(&self) -> bool {
        matches!(
            &*self.body.lock().expect("task body lock poisoned"),
            TaskBody::Leaf(_) | TaskBody::Splittable { .. }
        )
    }

    // -- completion --

    fn set_parent(&self, parent: &Arc<Task>) {
        *self.parent.lock().expect("task parent lock poisoned") = Some(Arc::downgrade(parent));
    }

    /// Signals that a direct child (or the substitute) of this task has
    /// completed. The caller that observes the last child completion
    /// performs the aggregation.
    fn child_done(&self, child: &Task, worker: &Worker) {
        // substitute completion stands for this task's own completion
        let is_substitute = self
            .substitute_handle()
            .is_some_and(|substitute| std::ptr::eq::<Task>(substitute.as_ref(), child));
        if is_substitute {
            tracing::trace!("substitute of {:?} done", self);
            self.adopt_value_of(child);
            self.finish(worker);
            return;
        }

        tracing::trace!("child {:?} of {:?} done", child, self);

        let alive_before = self.alive_children.fetch_sub(1, Ordering::AcqRel);
        assert!(alive_before > 0, "child completion without alive children");

        // only the last child triggers the aggregation
        if alive_before != 1 {
            return;
        }

        self.finish(worker);
    }

    /// Moves the task to `Done`, aggregating child results first where
    /// present, and notifies the parent.
    fn finish(&self, worker: &Worker) {
        tracing::trace!("finishing {:?}", self);
        assert_eq!(TaskState::Running, self.state(), "finish on a task that is not running");

        let children = self
            .children
            .lock()
            .expect("task children lock poisoned")
            .take();

        if let Some((left, right)) = children {
            // a split task: combine the child results
            self.set_state(TaskState::Aggregating);

            let merge = {
                let mut body = self.body.lock().expect("task body lock poisoned");
                match std::mem::replace(&mut *body, TaskBody::Consumed) {
                    TaskBody::Split { merge, .. } => merge,
                    _ => unreachable!("aggregating a task without a split body"),
                }
            };

            let value = match merge {
                Some(merge) => {
                    let left_value = left.take_value().expect("left child finished without value");
                    let right_value =
                        right.take_value().expect("right child finished without value");
                    merge(left_value, right_value)
                }
                None => Box::new(()),
            };
            *self.value.lock().expect("task value lock poisoned") = Some(value);

            // child ownership is released here
            drop(left);
            drop(right);
        }

        self.set_state(TaskState::Done);

        // the substitute sub-tree is no longer needed
        self.substitute
            .lock()
            .expect("task substitute lock poisoned")
            .take();

        let parent = self.parent.lock().expect("task parent lock poisoned").take();
        if let Some(parent) = parent {
            let parent = parent
                .upgrade()
                .expect("parent released before child completion");
            parent.child_done(self, worker);
        }
    }

    // -- values --

    fn adopt_value_of(&self, other: &Task) {
        *self.value.lock().expect("task value lock poisoned") = other.take_value();
    }

    pub(crate) fn take_value(&self) -> Option<AnyValue> {
        self.value.lock().expect("task value lock poisoned").take()
    }

    /// Clones the completed task's value out of its slot.
    pub(crate) fn clone_value<T: Clone + 'static>(&self) -> T {
        let value = self.value.lock().expect("task value lock poisoned");
        value
            .as_ref()
            .expect("task completed without a value")
            .downcast_ref::<T>()
            .expect("task value of unexpected type")
            .clone()
    }

    // -- identity --

    /// Re-derives the ids of this sub-tree below the given id. Used
    /// when a freshly decomposed tree is installed under a task, so
    /// recursion depths stay meaningful for the predictor.
    pub(crate) fn reassign_id(&self, id: TaskId) {
        *self.id.lock().expect("task id lock poisoned") = id;
        if let Some((left, right)) = self
            .children
            .lock()
            .expect("task children lock poisoned")
            .as_ref()
        {
            left.reassign_id(id.left_child());
            right.reassign_id(id.right_child());
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({}, {})", self.id(), self.state())
    }
}
