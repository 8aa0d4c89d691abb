//! Task factories and composition operators.
//!
//! All factories hand back [`UnreleasedTreeture`] values: the task
//! graph is assembled first and only released to the scheduler when a
//! handle is consumed. This keeps graph construction free of
//! scheduling side effects and lets combining operators take over
//! child trees wholesale.

use std::ops::Add;

use crate::deps::Dependencies;
use crate::runtime::task::{AnyValue, BodyFn, MergeFn, Task};
use crate::treeture::{Treeture, UnreleasedTreeture};

/// An already completed computation carrying the given value.
pub fn done<T: Send + 'static>(value: T) -> UnreleasedTreeture<T> {
    UnreleasedTreeture::from_task(Task::new_done(Box::new(value)))
}

/// A new task executing the given body.
pub fn spawn<T, F>(body: F) -> UnreleasedTreeture<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    spawn_after(Dependencies::none(), body)
}

/// A new task executing the given body once all predecessors are done.
pub fn spawn_after<T, F>(deps: Dependencies, body: F) -> UnreleasedTreeture<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let body: BodyFn = Box::new(move || Box::new(body()) as AnyValue);
    UnreleasedTreeture::from_task(Task::new_leaf(deps, body))
}

/// A new task carrying both a sequential body and a splitter; the
/// scheduler picks one at run time depending on load.
pub fn spawn_splittable<T, F, S>(body: F, splitter: S) -> UnreleasedTreeture<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
    S: FnOnce() -> UnreleasedTreeture<T> + Send + 'static,
{
    spawn_splittable_after(Dependencies::none(), body, splitter)
}

/// Like [`spawn_splittable`], gated on the given predecessors.
pub fn spawn_splittable_after<T, F, S>(
    deps: Dependencies,
    body: F,
    splitter: S,
) -> UnreleasedTreeture<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
    S: FnOnce() -> UnreleasedTreeture<T> + Send + 'static,
{
    let body: BodyFn = Box::new(move || Box::new(body()) as AnyValue);
    let splitter = Box::new(move || splitter().into_task());
    UnreleasedTreeture::from_task(Task::new_splittable(deps, body, splitter))
}

/// Combines two computations into one whose result is obtained by
/// merging the child results. With `parallel` set the children may run
/// concurrently, otherwise left runs to completion before right.
pub fn combine<A, B, R, M>(
    a: UnreleasedTreeture<A>,
    b: UnreleasedTreeture<B>,
    merge: M,
    parallel: bool,
) -> UnreleasedTreeture<R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
    M: FnOnce(A, B) -> R + Send + 'static,
{
    combine_after(Dependencies::none(), a, b, merge, parallel)
}

/// Like [`combine`], gated on the given predecessors.
pub fn combine_after<A, B, R, M>(
    deps: Dependencies,
    a: UnreleasedTreeture<A>,
    b: UnreleasedTreeture<B>,
    merge: M,
    parallel: bool,
) -> UnreleasedTreeture<R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
    M: FnOnce(A, B) -> R + Send + 'static,
{
    let merge: MergeFn = Box::new(move |left, right| {
        let left = *left
            .downcast::<A>()
            .expect("left child produced a value of unexpected type");
        let right = *right
            .downcast::<B>()
            .expect("right child produced a value of unexpected type");
        Box::new(merge(left, right)) as AnyValue
    });
    UnreleasedTreeture::from_task(Task::new_split(
        deps,
        a.into_task(),
        b.into_task(),
        Some(merge),
        parallel,
    ))
}

/// Runs two computations concurrently, discarding their results.
pub fn parallel<A, B>(a: UnreleasedTreeture<A>, b: UnreleasedTreeture<B>) -> UnreleasedTreeture<()>
where
    A: 'static,
    B: 'static,
{
    UnreleasedTreeture::from_task(Task::new_split(
        Dependencies::none(),
        a.into_task(),
        b.into_task(),
        None,
        true,
    ))
}

/// Runs two computations one after the other, discarding their
/// results.
pub fn sequence<A, B>(a: UnreleasedTreeture<A>, b: UnreleasedTreeture<B>) -> UnreleasedTreeture<()>
where
    A: 'static,
    B: 'static,
{
    UnreleasedTreeture::from_task(Task::new_split(
        Dependencies::none(),
        a.into_task(),
        b.into_task(),
        None,
        false,
    ))
}

/// Folds any number of computations into one concurrent group.
pub fn parallel_all<I>(items: I) -> UnreleasedTreeture<()>
where
    I: IntoIterator<Item = UnreleasedTreeture<()>>,
{
    let mut iter = items.into_iter();
    let Some(first) = iter.next() else {
        return done(());
    };
    iter.fold(first, parallel)
}

/// Folds any number of computations into one left-to-right sequence.
pub fn sequence_all<I>(items: I) -> UnreleasedTreeture<()>
where
    I: IntoIterator<Item = UnreleasedTreeture<()>>,
{
    let mut iter = items.into_iter();
    let Some(first) = iter.next() else {
        return done(());
    };
    iter.fold(first, sequence)
}

/// Combines two computations by adding their results.
pub fn add<T>(a: UnreleasedTreeture<T>, b: UnreleasedTreeture<T>) -> UnreleasedTreeture<T>
where
    T: Add<Output = T> + Send + 'static,
{
    combine(a, b, |x, y| x + y, true)
}

/// Releases a constructed task tree to the scheduler.
pub fn run<T: 'static>(tree: UnreleasedTreeture<T>) -> Treeture<T> {
    tree.release()
}
