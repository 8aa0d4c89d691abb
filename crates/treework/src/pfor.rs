//! Parallel loops over index ranges, and the adaptive synchronization
//! between successive loops.
//!
//! A loop is driven through the recursive-task combinator, so two
//! loops over the same range decompose along the same recursion tree.
//! Loop dependencies exploit this: when a successor loop splits, its
//! dependency set splits in lock-step and each half points at the
//! matching sub-task of the predecessor loop.

use std::fmt;
use std::sync::Arc;

use crate::deps::{after, Dependencies};
use crate::ops::{done, parallel};
use crate::prec::{fun, prec_fun, PrecFun};
use crate::treeture::TaskReference;

/// Index types parallel loops can iterate over.
pub trait LoopIndex: Copy + Ord + Send + Sync + 'static {
    /// The split point of the range `[a, b)`.
    fn midpoint(a: Self, b: Self) -> Self;

    /// Number of iterations in `[a, b)`; zero for reversed bounds.
    fn distance(a: Self, b: Self) -> usize;

    fn forward(self) -> Self;

    fn backward(self) -> Self;
}

macro_rules! impl_loop_index {
    ($($index:ty),* $(,)?) => {$(
        impl LoopIndex for $index {
            fn midpoint(a: Self, b: Self) -> Self {
                a + (b - a) / 2
            }

            fn distance(a: Self, b: Self) -> usize {
                if a < b { (b - a) as usize } else { 0 }
            }

            fn forward(self) -> Self {
                self + 1
            }

            fn backward(self) -> Self {
                self - 1
            }
        }
    )*};
}

impl_loop_index!(i32, i64, isize, u32, u64, usize);

/// A half-open iteration range `[begin, end)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Range<I> {
    begin: I,
    end: I,
}

impl<I: LoopIndex> Range<I> {
    pub fn new(begin: I, end: I) -> Self {
        // normalize reversed bounds to an empty range
        let end = end.max(begin);
        Self { begin, end }
    }

    pub fn begin(&self) -> I {
        self.begin
    }

    pub fn end(&self) -> I {
        self.end
    }

    pub fn size(&self) -> usize {
        I::distance(self.begin, self.end)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// True when the other range lies within this one; empty ranges
    /// are covered by anything.
    pub fn covers(&self, other: &Range<I>) -> bool {
        other.is_empty() || (self.begin <= other.begin && other.end <= self.end)
    }

    pub fn covers_point(&self, point: I) -> bool {
        self.begin <= point && point < self.end
    }

    /// Splits the range at its midpoint.
    pub fn split(&self) -> (Range<I>, Range<I>) {
        let mid = I::midpoint(self.begin, self.end);
        (Range::new(self.begin, mid), Range::new(mid, self.end))
    }

    /// Extends the range by one step on both sides, clamped to the
    /// given limit.
    pub fn grow(&self, limit: &Range<I>) -> Range<I> {
        let begin = if self.begin > limit.begin {
            self.begin.backward()
        } else {
            limit.begin
        };
        let end = if self.end < limit.end {
            self.end.forward()
        } else {
            limit.end
        };
        Range::new(begin, end)
    }

    pub fn for_each<F: FnMut(I)>(&self, mut op: F) {
        let mut current = self.begin;
        while current < self.end {
            op(current);
            current = current.forward();
        }
    }
}

impl<I: fmt::Debug> fmt::Debug for Range<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?},{:?})", self.begin, self.end)
    }
}

/// A reference onto a range of iterations of a loop, navigable in
/// lock-step with the loop's recursive decomposition.
#[derive(Clone)]
pub struct IterationReference<I> {
    range: Range<I>,
    handle: TaskReference,
}

impl<I: LoopIndex> IterationReference<I> {
    pub(crate) fn new(range: Range<I>, handle: TaskReference) -> Self {
        Self { range, handle }
    }

    /// A completed reference covering no iterations at all.
    fn empty_at(point: I) -> Self {
        Self {
            range: Range::new(point, point),
            handle: TaskReference::completed(),
        }
    }

    pub fn range(&self) -> &Range<I> {
        &self.range
    }

    pub fn handle(&self) -> &TaskReference {
        &self.handle
    }

    pub fn wait(&self) {
        self.handle.wait();
    }

    /// The left half of the covered iterations, referencing the
    /// predecessor's left sub-task.
    #[must_use]
    pub fn left(&self) -> IterationReference<I> {
        IterationReference {
            range: self.range.split().0,
            handle: self.handle.get_left(),
        }
    }

    /// The right half of the covered iterations, referencing the
    /// predecessor's right sub-task.
    #[must_use]
    pub fn right(&self) -> IterationReference<I> {
        IterationReference {
            range: self.range.split().1,
            handle: self.handle.get_right(),
        }
    }
}

/// The token returned by [`pfor`], referencing the whole loop. Waits
/// for the loop's completion when dropped.
pub struct LoopReference<I: LoopIndex> {
    inner: IterationReference<I>,
}

impl<I: LoopIndex> LoopReference<I> {
    pub fn range(&self) -> &Range<I> {
        self.inner.range()
    }

    pub fn wait(&self) {
        self.inner.wait();
    }

    #[must_use]
    pub fn task_ref(&self) -> TaskReference {
        self.inner.handle().clone()
    }

    /// The loop as a plain iteration reference, e.g. for building
    /// dependencies.
    #[must_use]
    pub fn iteration_ref(&self) -> IterationReference<I> {
        self.inner.clone()
    }
}

impl<I: LoopIndex> Drop for LoopReference<I> {
    fn drop(&mut self) {
        self.wait();
    }
}

/// The synchronization requirements a loop imposes on its iterations,
/// split alongside the loop's recursive decomposition.
pub trait LoopDependency<I: LoopIndex>: Clone + Send + Sync + 'static {
    /// The dependency set gating the loop fragment carrying this
    /// dependency.
    fn to_dependencies(&self) -> Dependencies;

    /// Splits this dependency for the two halves of a fragment.
    fn split(&self, left: &Range<I>, right: &Range<I>) -> (Self, Self);
}

/// The dependency of loops that impose no ordering at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDependencies;

impl<I: LoopIndex> LoopDependency<I> for NoDependencies {
    fn to_dependencies(&self) -> Dependencies {
        Dependencies::none()
    }

    fn split(&self, _left: &Range<I>, _right: &Range<I>) -> (Self, Self) {
        (NoDependencies, NoDependencies)
    }
}

/// Iteration `i` of the successor loop waits for iteration `i` of the
/// predecessor loop.
#[derive(Clone)]
pub struct OneOnOneDependency<I> {
    predecessor: IterationReference<I>,
}

/// Builds a one-on-one dependency on the given loop.
pub fn one_on_one<I: LoopIndex>(predecessor: &LoopReference<I>) -> OneOnOneDependency<I> {
    OneOnOneDependency {
        predecessor: predecessor.iteration_ref(),
    }
}

impl<I: LoopIndex> LoopDependency<I> for OneOnOneDependency<I> {
    fn to_dependencies(&self) -> Dependencies {
        after([self.predecessor.handle().clone()])
    }

    fn split(&self, left: &Range<I>, right: &Range<I>) -> (Self, Self) {
        let pred_left = self.predecessor.left();
        let pred_right = self.predecessor.right();

        // take the sub-task only if it covers the targeted range;
        // otherwise stick to the current, coarser dependency
        (
            if pred_left.range().covers(left) {
                Self {
                    predecessor: pred_left,
                }
            } else {
                self.clone()
            },
            if pred_right.range().covers(right) {
                Self {
                    predecessor: pred_right,
                }
            } else {
                self.clone()
            },
        )
    }
}

/// Iteration `i` of the successor loop waits for iterations `i-1`,
/// `i` and `i+1` of the predecessor loop, clipped to its range.
#[derive(Clone)]
pub struct NeighborhoodSyncDependency<I> {
    deps: [IterationReference<I>; 3],
    width: usize,
}

/// Builds a neighborhood dependency on the given loop.
pub fn neighborhood_sync<I: LoopIndex>(
    predecessor: &LoopReference<I>,
) -> NeighborhoodSyncDependency<I> {
    let reference = predecessor.iteration_ref();
    let boundary = reference.range().end();
    NeighborhoodSyncDependency {
        deps: [
            reference,
            IterationReference::empty_at(boundary),
            IterationReference::empty_at(boundary),
        ],
        width: 1,
    }
}

impl<I: LoopIndex> LoopDependency<I> for NeighborhoodSyncDependency<I> {
    fn to_dependencies(&self) -> Dependencies {
        after(self.deps.iter().map(|dep| dep.handle().clone()))
    }

    fn split(&self, left: &Range<I>, right: &Range<I>) -> (Self, Self) {
        // the root holds a single reference onto the whole predecessor
        if self.width == 1 {
            let dependency = &self.deps[0];

            let pred_left = dependency.left();
            let pred_right = dependency.right();

            // sentinels representing "no iterations on that side"
            let start = IterationReference::empty_at(pred_left.range().begin());
            let finish = IterationReference::empty_at(pred_right.range().end());

            return (
                NeighborhoodSyncDependency {
                    deps: [start, pred_left.clone(), pred_right.clone()],
                    width: 3,
                },
                NeighborhoodSyncDependency {
                    deps: [pred_left, pred_right, finish],
                    width: 3,
                },
            );
        }

        assert_eq!(3, self.width, "unexpected neighborhood dependency width");

        // split the three carried references and regroup them
        let a = self.deps[0].right();
        let b = self.deps[1].left();
        let c = self.deps[1].right();
        let d = self.deps[2].left();

        let full = Range::new(self.deps[0].range().begin(), self.deps[2].range().end());
        let left_part = Range::new(a.range().begin(), c.range().end());
        let right_part = Range::new(b.range().begin(), d.range().end());

        (
            if left_part.covers(&left.grow(&full)) {
                NeighborhoodSyncDependency {
                    deps: [a.clone(), b.clone(), c.clone()],
                    width: 3,
                }
            } else {
                self.clone()
            },
            if right_part.covers(&right.grow(&full)) {
                NeighborhoodSyncDependency {
                    deps: [b, c, d],
                    width: 3,
                }
            } else {
                self.clone()
            },
        )
    }
}

/// One fragment of a decomposing loop: the remaining range and the
/// dependency it carries.
struct LoopFragment<I, D> {
    range: Range<I>,
    deps: D,
}

impl<I: LoopIndex, D: Clone> Clone for LoopFragment<I, D> {
    fn clone(&self) -> Self {
        Self {
            range: self.range,
            deps: self.deps.clone(),
        }
    }
}

/// A parallel loop over `[begin, end)` without ordering constraints.
pub fn pfor<I, B>(begin: I, end: I, body: B) -> LoopReference<I>
where
    I: LoopIndex,
    B: Fn(I) + Send + Sync + 'static,
{
    pfor_with(begin, end, body, NoDependencies)
}

/// A parallel loop over `[begin, end)` honoring the given loop
/// dependency.
pub fn pfor_with<I, B, D>(begin: I, end: I, body: B, dependency: D) -> LoopReference<I>
where
    I: LoopIndex,
    B: Fn(I) + Send + Sync + 'static,
    D: LoopDependency<I>,
{
    let full = Range::new(begin, end);
    let body = Arc::new(body);

    let base_body = body.clone();
    let seq_body = body.clone();

    let loop_fn = prec_fun(
        fun(
            |fragment: &LoopFragment<I, D>| fragment.range.size() <= 1,
            move |fragment: LoopFragment<I, D>| {
                fragment.range.for_each(|index| base_body(index));
            },
            |fragment: LoopFragment<I, D>, nested: PrecFun<LoopFragment<I, D>, ()>| {
                // split the range and the dependency in lock-step
                let (left, right) = fragment.range.split();
                let (dep_left, dep_right) = fragment.deps.split(&left, &right);
                parallel(
                    nested.call_after(
                        dep_left.to_dependencies(),
                        LoopFragment {
                            range: left,
                            deps: dep_left,
                        },
                    ),
                    nested.call_after(
                        dep_right.to_dependencies(),
                        LoopFragment {
                            range: right,
                            deps: dep_right,
                        },
                    ),
                )
            },
        )
        .or_step(move |fragment: LoopFragment<I, D>, _nested: PrecFun<LoopFragment<I, D>, ()>| {
            // processing the whole fragment sequentially is always an
            // alternative
            fragment.range.for_each(|index| seq_body(index));
            done(())
        }),
    );

    let gate = dependency.to_dependencies();
    let tree = loop_fn.call_after(
        gate,
        LoopFragment {
            range: full,
            deps: dependency,
        },
    );

    let released = tree.release();
    LoopReference {
        inner: IterationReference::new(full, released.task_ref()),
    }
}

#[cfg(test)]
mod test_range {
    use super::*;

    #[test]
    fn bounds_and_size() {
        let range = Range::new(2, 10);
        assert_eq!(2, range.begin());
        assert_eq!(10, range.end());
        assert_eq!(8, range.size());
        assert!(!range.is_empty());

        // reversed bounds collapse to an empty range
        let empty = Range::new(5, 3);
        assert!(empty.is_empty());
        assert_eq!(0, empty.size());
    }

    #[test]
    fn splitting_preserves_all_points() {
        let range = Range::new(0, 9);
        let (left, right) = range.split();
        assert_eq!(left.end(), right.begin());
        assert_eq!(range.size(), left.size() + right.size());
        assert!(range.covers(&left));
        assert!(range.covers(&right));
    }

    #[test]
    fn coverage() {
        let range = Range::new(0, 10);
        assert!(range.covers(&Range::new(0, 10)));
        assert!(range.covers(&Range::new(3, 7)));
        assert!(!range.covers(&Range::new(3, 11)));

        // empty ranges are covered by anything
        assert!(Range::new(4, 4).is_empty());
        assert!(range.covers(&Range::new(20, 20)));

        assert!(range.covers_point(0));
        assert!(range.covers_point(9));
        assert!(!range.covers_point(10));
    }

    #[test]
    fn growing_clamps_to_the_limit() {
        let full = Range::new(0, 10);
        let grown = Range::new(4, 6).grow(&full);
        assert_eq!(Range::new(3, 7), grown);

        let at_border = Range::new(0, 10).grow(&full);
        assert_eq!(full, at_border);
    }

    #[test]
    fn for_each_visits_in_order() {
        let mut seen = Vec::new();
        Range::new(3, 7).for_each(|i| seen.push(i));
        assert_eq!(vec![3, 4, 5, 6], seen);

        Range::new(7i64, 7).for_each(|_| panic!("empty range must not iterate"));
    }
}
