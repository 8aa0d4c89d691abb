use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::runtime::task::Task;
use crate::runtime::worker::current_worker;

/// The navigation path of a treeture: a FIFO of direction bits, packed
/// into a single word. A `0` bit descends to the left child, a `1` bit
/// to the right. Sixty-four levels are plenty: narrowing consumes bits
/// long before a realistic recursion reaches that depth.
#[derive(Clone, Copy, Default)]
pub(crate) struct NavPath {
    bits: u64,
    len: u8,
}

impl NavPath {
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn push(&mut self, bit: bool) {
        assert!(
            (self.len as u32) < u64::BITS,
            "treeture navigation path exhausted"
        );
        self.bits = (self.bits << 1) | u64::from(bit);
        self.len += 1;
    }

    /// The oldest direction bit, without removing it.
    pub(crate) fn front(&self) -> bool {
        assert!(self.len > 0, "front of an empty navigation path");
        (self.bits >> (self.len - 1)) & 1 != 0
    }

    pub(crate) fn pop(&mut self) -> bool {
        assert!(self.len > 0, "pop of an empty navigation path");
        self.len -= 1;
        (self.bits >> self.len) & 1 != 0
    }
}

impl fmt::Debug for NavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path[")?;
        for position in (0..self.len).rev() {
            write!(f, "{}", (self.bits >> position) & 1)?;
        }
        write!(f, "]")
    }
}

#[derive(Clone)]
struct RefState {
    task: Option<Arc<Task>>,
    path: NavPath,
}

impl RefState {
    /// Re-targets the handle at the narrowest materialized sub-task
    /// the path leads to. Stops early at completed tasks and at
    /// children that do not exist yet.
    fn narrow(&mut self) {
        loop {
            let Some(task) = &self.task else { return };
            if task.is_done() || self.path.is_empty() {
                return;
            }

            let child = if self.path.front() {
                task.right_child()
            } else {
                task.left_child()
            };

            match child {
                // not materialized yet, this is as close as we get
                None => return,
                Some(child) => {
                    self.path.pop();
                    self.task = Some(child);
                }
            }
        }
    }
}

/// A type-erased, navigable handle on a (possibly future) task.
///
/// This doubles as the void treeture: it can be narrowed towards
/// sub-tasks of the underlying recursion tree before those sub-tasks
/// exist, waited on, and used as a predecessor in dependency sets.
pub struct TaskReference {
    state: Mutex<RefState>,
}

impl TaskReference {
    pub(crate) fn from_task(task: Arc<Task>) -> Self {
        Self {
            state: Mutex::new(RefState {
                task: Some(task),
                path: NavPath::default(),
            }),
        }
    }

    /// A reference that is already complete, without an underlying
    /// task.
    #[must_use]
    pub fn completed() -> Self {
        Self {
            state: Mutex::new(RefState {
                task: None,
                path: NavPath::default(),
            }),
        }
    }

    /// False for the empty reference produced by [`TaskReference::completed`].
    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.lock().expect("task reference lock poisoned").task.is_some()
    }

    /// True once the referenced sub-task has completed. Narrows as a
    /// side effect, so later checks get cheaper.
    #[must_use]
    pub fn is_done(&self) -> bool {
        let mut state = self.state.lock().expect("task reference lock poisoned");
        state.narrow();
        match &state.task {
            None => true,
            Some(task) => task.is_done(),
        }
    }

    /// Waits for the referenced sub-task, helping the scheduler along
    /// instead of blocking the thread.
    pub fn wait(&self) {
        let worker = current_worker();
        loop {
            if self.is_done() {
                return;
            }
            if !worker.schedule_step() {
                std::hint::spin_loop();
            }
        }
    }

    /// A reference to the left sub-task, which may not exist yet.
    #[must_use]
    pub fn get_left(&self) -> TaskReference {
        self.descend(false)
    }

    /// A reference to the right sub-task, which may not exist yet.
    #[must_use]
    pub fn get_right(&self) -> TaskReference {
        self.descend(true)
    }

    fn descend(&self, bit: bool) -> TaskReference {
        let mut state = self.state.lock().expect("task reference lock poisoned").clone();
        if state.task.is_some() {
            state.path.push(bit);
        }
        TaskReference {
            state: Mutex::new(state),
        }
    }

    pub(crate) fn task_handle(&self) -> Option<Arc<Task>> {
        self.state
            .lock()
            .expect("task reference lock poisoned")
            .task
            .clone()
    }
}

impl Clone for TaskReference {
    fn clone(&self) -> Self {
        Self {
            state: Mutex::new(self.state.lock().expect("task reference lock poisoned").clone()),
        }
    }
}

impl fmt::Debug for TaskReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().expect("task reference lock poisoned");
        match &state.task {
            None => write!(f, "TaskReference(completed)"),
            Some(task) => write!(f, "TaskReference({:?}, {:?})", task, state.path),
        }
    }
}

/// A handle on the (possibly future) result of a task tree that has
/// been released to the scheduler.
pub struct Treeture<T> {
    reference: TaskReference,
    _value: PhantomData<fn() -> T>,
}

impl<T: 'static> Treeture<T> {
    pub(crate) fn from_task(task: Arc<Task>) -> Self {
        Self {
            reference: TaskReference::from_task(task),
            _value: PhantomData,
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.reference.is_done()
    }

    /// Waits for the task to complete; the calling thread keeps
    /// executing scheduler work meanwhile. Idempotent.
    pub fn wait(&self) {
        self.reference.wait();
    }

    /// Waits for the task and clones its result out.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.wait();
        let task = self
            .reference
            .task_handle()
            .expect("value treeture without an underlying task");
        task.clone_value::<T>()
    }

    /// A navigable reference on this task, e.g. for dependency sets.
    #[must_use]
    pub fn task_ref(&self) -> TaskReference {
        self.reference.clone()
    }

    /// A reference to the left sub-task of this computation.
    #[must_use]
    pub fn get_left(&self) -> TaskReference {
        self.reference.get_left()
    }

    /// A reference to the right sub-task of this computation.
    #[must_use]
    pub fn get_right(&self) -> TaskReference {
        self.reference.get_right()
    }
}

impl<T> fmt::Debug for Treeture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Treeture({:?})", self.reference)
    }
}

/// A task tree that has been constructed but not yet handed to the
/// scheduler. Dependencies may still refer to it being combined into
/// larger trees; consuming it releases it.
pub struct UnreleasedTreeture<T> {
    task: Arc<Task>,
    _value: PhantomData<fn() -> T>,
}

impl<T: 'static> UnreleasedTreeture<T> {
    pub(crate) fn from_task(task: Arc<Task>) -> Self {
        Self {
            task,
            _value: PhantomData,
        }
    }

    /// Releases the tree to the scheduler: the root task is submitted
    /// to the calling worker and a live handle is returned.
    pub fn release(self) -> Treeture<T> {
        let worker = current_worker();
        worker.schedule(self.task.clone());
        Treeture::from_task(self.task)
    }

    /// Releases and waits.
    pub fn wait(self) -> Treeture<T> {
        let released = self.release();
        released.wait();
        released
    }

    /// Releases, waits and clones the result out.
    pub fn get(self) -> T
    where
        T: Clone,
    {
        self.release().get()
    }

    pub(crate) fn into_task(self) -> Arc<Task> {
        self.task
    }
}

impl<T> fmt::Debug for UnreleasedTreeture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnreleasedTreeture({:?})", self.task)
    }
}

#[cfg(test)]
mod test_nav_path {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut path = NavPath::default();
        assert!(path.is_empty());

        path.push(false);
        path.push(true);
        path.push(true);

        assert!(!path.is_empty());
        assert!(!path.front());
        assert!(!path.pop());
        assert!(path.front());
        assert!(path.pop());
        assert!(path.pop());
        assert!(path.is_empty());
    }

    #[test]
    fn interleaved_push_pop() {
        let mut path = NavPath::default();
        path.push(true);
        assert!(path.pop());
        path.push(false);
        path.push(true);
        assert!(!path.pop());
        assert!(path.pop());
        assert!(path.is_empty());
    }
}
