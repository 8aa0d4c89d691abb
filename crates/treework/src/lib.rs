//! treework — a work-stealing runtime for recursively decomposable
//! task trees.
//!
//! Computations are assembled as trees of tasks. A task either runs a
//! sequential body or, when the scheduler decides the work is worth
//! distributing, splits into a finer decomposition whose sub-results
//! are aggregated back up. Handles on (possibly future) results are
//! *treetures*: they can be narrowed towards sub-computations before
//! those sub-computations even exist, which is what the adaptive
//! loop-to-loop synchronization of [`pfor`] is built from.
//!
//! ```
//! use treework::{add, prec, PrecFun, UnreleasedTreeture};
//!
//! let fib = prec(
//!     |&n: &u64| n < 2,
//!     |n: u64| n,
//!     |n: u64, f: PrecFun<u64, u64>| -> UnreleasedTreeture<u64> {
//!         add(f.call(n - 1), f.call(n - 2))
//!     },
//! );
//!
//! assert_eq!(55, fib.call(10).get());
//! ```
//!
//! The worker pool is created lazily on first use; its size is taken
//! from the `NUM_WORKERS` environment variable and defaults to the
//! hardware concurrency.

pub mod deps;
pub mod ops;
pub mod pfor;
pub mod prec;
pub mod runtime;
pub mod synca;
pub mod treeture;

pub use deps::{after, Dependencies};
pub use ops::{
    add, combine, combine_after, done, parallel, parallel_all, run, sequence, sequence_all,
    spawn, spawn_after, spawn_splittable, spawn_splittable_after,
};
pub use pfor::{
    neighborhood_sync, one_on_one, pfor, pfor_with, IterationReference, LoopDependency,
    LoopIndex, LoopReference, NeighborhoodSyncDependency, NoDependencies, OneOnOneDependency,
    Range,
};
pub use prec::{fun, group, mutual_fun, prec, prec_fun, FunDef, MutualFunDef, PrecFun, RecGroup};
pub use runtime::{TaskId, TaskState, WorkerPool};
pub use treeture::{TaskReference, Treeture, UnreleasedTreeture};
