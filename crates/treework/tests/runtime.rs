//! End-to-end scenarios driving the runtime through its public API.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use treework::{
    add, done, neighborhood_sync, one_on_one, parallel, parallel_all, pfor, pfor_with, prec,
    sequence_all, spawn, spawn_after, spawn_splittable, after, PrecFun, UnreleasedTreeture,
};

#[test]
fn done_carries_its_value() {
    assert_eq!(12, done(12).get());
}

#[test]
fn simple_task_produces_its_result() {
    assert_eq!(12, spawn(|| 12).get());
}

#[test]
fn composed_spawns_and_combines() {
    assert_eq!(10, done(10).get());
    assert_eq!(5, add(done(2), done(3)).get());

    let f = spawn(|| 12);
    let g = spawn_splittable(|| 6 + 8, || add(spawn(|| 8), done(6)));

    assert_eq!(26, add(f, g).get());
}

#[test]
fn unreleased_tasks_do_not_execute() {
    let touched = Arc::new(AtomicUsize::new(0));

    let tree = spawn({
        let touched = touched.clone();
        move || {
            touched.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert_eq!(0, touched.load(Ordering::SeqCst));

    tree.wait();
    assert_eq!(1, touched.load(Ordering::SeqCst));
}

#[test]
fn wait_and_get_are_idempotent() {
    let tree = spawn(|| 21).release();
    tree.wait();
    assert_eq!(21, tree.get());
    assert_eq!(21, tree.get());
    tree.wait();
    assert!(tree.is_done());
}

#[test]
fn navigation_references_complete_with_the_root() {
    let tree = parallel(spawn(|| ()), spawn(|| ())).release();
    tree.wait();

    // every reachable sub-task of a completed tree is completed
    assert!(tree.task_ref().is_done());
    assert!(tree.get_left().is_done());
    assert!(tree.get_right().is_done());
    tree.get_left().wait();
}

// --- sequential and parallel composition (side effects) ---

#[test]
fn sequence_orders_side_effects() {
    let values: Arc<[AtomicI32; 3]> = Arc::new([const { AtomicI32::new(0) }; 3]);
    let violations = Arc::new(AtomicUsize::new(0));

    let first = spawn({
        let values = values.clone();
        move || {
            values[0].store(1, Ordering::SeqCst);
        }
    });
    let second = spawn({
        let values = values.clone();
        let violations = violations.clone();
        move || {
            if values[0].load(Ordering::SeqCst) != 1 {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            values[1].store(2, Ordering::SeqCst);
        }
    });
    let third = spawn({
        let values = values.clone();
        let violations = violations.clone();
        move || {
            if values[1].load(Ordering::SeqCst) != 2 {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            values[2].store(3, Ordering::SeqCst);
        }
    });

    sequence_all([first, second, third]).wait();

    assert_eq!(0, violations.load(Ordering::SeqCst));
    assert_eq!(1, values[0].load(Ordering::SeqCst));
    assert_eq!(2, values[1].load(Ordering::SeqCst));
    assert_eq!(3, values[2].load(Ordering::SeqCst));
}

#[test]
fn parallel_writes_all_land() {
    let values: Arc<[AtomicI32; 3]> = Arc::new([const { AtomicI32::new(0) }; 3]);

    let tasks = (0..3).map(|index| {
        let values = values.clone();
        spawn(move || {
            values[index].store(index as i32 + 1, Ordering::SeqCst);
        })
    });

    parallel_all(tasks).wait();

    assert_eq!(1, values[0].load(Ordering::SeqCst));
    assert_eq!(2, values[1].load(Ordering::SeqCst));
    assert_eq!(3, values[2].load(Ordering::SeqCst));
}

// --- explicit dependencies ---

#[test]
fn after_chains_order_execution() {
    let state = Arc::new(AtomicI32::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    let a = spawn({
        let state = state.clone();
        let violations = violations.clone();
        move || {
            if state.load(Ordering::SeqCst) != 0 {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            state.store(1, Ordering::SeqCst);
        }
    })
    .release();

    let b = spawn_after(after([a.task_ref()]), {
        let state = state.clone();
        let violations = violations.clone();
        move || {
            if state.load(Ordering::SeqCst) != 1 {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            state.store(2, Ordering::SeqCst);
        }
    })
    .release();

    let c = spawn_after(after([a.task_ref(), b.task_ref()]), {
        let state = state.clone();
        let violations = violations.clone();
        move || {
            if state.load(Ordering::SeqCst) != 2 {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            state.store(3, Ordering::SeqCst);
        }
    })
    .release();

    c.wait();

    assert_eq!(0, violations.load(Ordering::SeqCst));
    assert_eq!(3, state.load(Ordering::SeqCst));
}

// --- recursive decomposition ---

fn for_each_task(
    begin: usize,
    end: usize,
    body: Arc<dyn Fn(usize) + Send + Sync>,
) -> UnreleasedTreeture<()> {
    if begin >= end {
        return done(());
    }
    if begin + 1 == end {
        return spawn(move || body(begin));
    }

    let mid = begin + (end - begin) / 2;
    spawn_splittable(
        {
            let body = body.clone();
            move || {
                for index in begin..end {
                    body(index);
                }
            }
        },
        move || {
            parallel(
                for_each_task(begin, mid, body.clone()),
                for_each_task(mid, end, body),
            )
        },
    )
}

#[test]
fn recursive_for_each_covers_the_whole_range() {
    const N: usize = 2000;
    let data: Arc<Vec<AtomicI32>> = Arc::new((0..N).map(|_| AtomicI32::new(10)).collect());

    for_each_task(0, N, {
        let data = data.clone();
        Arc::new(move |index| {
            data[index].fetch_add(1, Ordering::SeqCst);
        })
    })
    .wait();

    for entry in data.iter() {
        assert_eq!(11, entry.load(Ordering::SeqCst));
    }
}

fn fib_seq(n: u64) -> u64 {
    if n <= 1 {
        return n;
    }
    fib_seq(n - 1) + fib_seq(n - 2)
}

fn fib_naive(n: u64) -> UnreleasedTreeture<u64> {
    if n <= 1 {
        return done(n);
    }
    add(fib_naive(n - 1), fib_naive(n - 2))
}

#[test]
fn fibonacci_by_eager_tree_construction() {
    assert_eq!(0, fib_naive(0).get());
    assert_eq!(1, fib_naive(1).get());
    assert_eq!(8, fib_naive(6).get());
    assert_eq!(144, fib_naive(12).get());
}

fn fib_split(n: u64) -> UnreleasedTreeture<u64> {
    if n <= 1 {
        return done(n);
    }
    spawn_splittable(
        move || fib_seq(n),
        move || add(fib_split(n - 1), fib_split(n - 2)),
    )
}

#[test]
fn fibonacci_by_lazy_decomposition() {
    assert_eq!(13, fib_split(7).get());
    assert_eq!(144, fib_split(12).get());
    assert_eq!(6765, fib_split(20).get());
}

#[test]
fn fibonacci_by_prec() {
    let fib = prec(
        |&n: &u64| n < 2,
        |n: u64| n,
        |n: u64, f: PrecFun<u64, u64>| add(f.call(n - 1), f.call(n - 2)),
    );

    let expected: [u64; 21] = [
        0, 1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233, 377, 610, 987, 1597, 2584, 4181, 6765,
    ];
    for (input, expected) in expected.iter().enumerate() {
        assert_eq!(*expected, fib.call(input as u64).get(), "fib({input})");
    }
}

#[test]
fn mutual_recursion_even_odd() {
    let definitions = treework::group(
        treework::mutual_fun(
            |&n: &i64| n == 0,
            |_n: i64| true,
            |n: i64, _even: PrecFun<i64, bool>, odd: PrecFun<i64, bool>| odd.call(n - 1),
        ),
        treework::mutual_fun(
            |&n: &i64| n == 0,
            |_n: i64| false,
            |n: i64, _odd: PrecFun<i64, bool>, even: PrecFun<i64, bool>| even.call(n - 1),
        ),
    );

    let even = definitions.first();
    let odd = definitions.second();

    for n in [0i64, 2, 4, 6, 8] {
        assert!(even.call(n).get(), "even({n})");
        assert!(!odd.call(n).get(), "odd({n})");
    }
    for n in [1i64, 3, 5, 7, 9] {
        assert!(!even.call(n).get(), "even({n})");
        assert!(odd.call(n).get(), "odd({n})");
    }
}

// --- parallel loops ---

#[test]
fn pfor_visits_every_index() {
    const N: i64 = 5000;
    let data: Arc<Vec<AtomicI32>> = Arc::new((0..N).map(|_| AtomicI32::new(0)).collect());

    let iterations = pfor(0i64, N, {
        let data = data.clone();
        move |index| {
            data[index as usize].fetch_add(1, Ordering::SeqCst);
        }
    });
    iterations.wait();

    for entry in data.iter() {
        assert_eq!(1, entry.load(Ordering::SeqCst));
    }
}

#[test]
fn pfor_one_on_one_staging() {
    const N: i64 = 10;
    let data: Arc<Vec<AtomicI32>> = Arc::new((0..N).map(|_| AtomicI32::new(0)).collect());
    let violations = Arc::new(AtomicUsize::new(0));

    let stage_a = pfor(0i64, N, {
        let data = data.clone();
        move |index| {
            data[index as usize].store(1, Ordering::SeqCst);
        }
    });

    let stage_b = pfor_with(
        0i64,
        N,
        {
            let data = data.clone();
            let violations = violations.clone();
            move |index| {
                if data[index as usize].load(Ordering::SeqCst) != 1 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                data[index as usize].store(2, Ordering::SeqCst);
            }
        },
        one_on_one(&stage_a),
    );

    let stage_c = pfor_with(
        0i64,
        N,
        {
            let data = data.clone();
            let violations = violations.clone();
            move |index| {
                if data[index as usize].load(Ordering::SeqCst) != 2 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                data[index as usize].store(3, Ordering::SeqCst);
            }
        },
        one_on_one(&stage_b),
    );

    stage_c.wait();

    assert_eq!(0, violations.load(Ordering::SeqCst));
    for entry in data.iter() {
        assert_eq!(3, entry.load(Ordering::SeqCst));
    }
}

#[test]
fn pfor_neighborhood_staging() {
    const N: i64 = 200;
    let data_a: Arc<Vec<AtomicI32>> = Arc::new((0..N).map(|_| AtomicI32::new(0)).collect());
    let data_b: Arc<Vec<AtomicI32>> = Arc::new((0..N).map(|_| AtomicI32::new(0)).collect());
    let violations = Arc::new(AtomicUsize::new(0));

    let stage_a = pfor(0i64, N, {
        let data_a = data_a.clone();
        move |index| {
            data_a[index as usize].store(1, Ordering::SeqCst);
        }
    });

    let stage_b = pfor_with(
        0i64,
        N,
        {
            let data_a = data_a.clone();
            let data_b = data_b.clone();
            let violations = violations.clone();
            move |index| {
                // the whole neighborhood of this index must be done in A
                let from = (index - 1).max(0);
                let to = (index + 1).min(N - 1);
                for neighbor in from..=to {
                    if data_a[neighbor as usize].load(Ordering::SeqCst) != 1 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                }
                data_b[index as usize].store(2, Ordering::SeqCst);
            }
        },
        neighborhood_sync(&stage_a),
    );

    let stage_c = pfor_with(
        0i64,
        N,
        {
            let data_a = data_a.clone();
            let data_b = data_b.clone();
            let violations = violations.clone();
            move |index| {
                let from = (index - 1).max(0);
                let to = (index + 1).min(N - 1);
                for neighbor in from..=to {
                    if data_b[neighbor as usize].load(Ordering::SeqCst) != 2 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                }
                data_a[index as usize].store(3, Ordering::SeqCst);
            }
        },
        neighborhood_sync(&stage_b),
    );

    stage_c.wait();

    assert_eq!(0, violations.load(Ordering::SeqCst));
    for entry in data_a.iter() {
        assert_eq!(3, entry.load(Ordering::SeqCst));
    }
    for entry in data_b.iter() {
        assert_eq!(2, entry.load(Ordering::SeqCst));
    }
}

// --- N-Queens ---

#[derive(Clone)]
struct Assignment {
    column: i32,
    row: i32,
    rest: Option<Arc<Assignment>>,
}

impl Assignment {
    fn empty() -> Self {
        Assignment {
            column: -1,
            row: 0,
            rest: None,
        }
    }

    fn extend(&self, row: i32) -> Self {
        Assignment {
            column: self.column + 1,
            row,
            rest: Some(Arc::new(self.clone())),
        }
    }

    fn len(&self) -> i32 {
        self.column + 1
    }

    /// True when a queen in the next column may be placed in the given
    /// row.
    fn valid(&self, row: i32) -> bool {
        let column = self.column + 1;
        let mut current = Some(self);
        while let Some(assignment) = current {
            if assignment.column < 0 {
                return true;
            }
            if assignment.row == row {
                return false;
            }
            let distance = column - assignment.column;
            if assignment.row + distance == row || assignment.row - distance == row {
                return false;
            }
            current = assignment.rest.as_deref();
        }
        true
    }
}

fn nqueens(size: i32) -> u64 {
    let compute = prec(
        move |assignment: &Assignment| assignment.len() >= size,
        |_assignment: Assignment| 1u64,
        move |assignment: Assignment, rec: PrecFun<Assignment, u64>| {
            // sum the solution counts over all valid placements
            let mut sum: Option<UnreleasedTreeture<u64>> = None;
            for row in 0..size {
                if !assignment.valid(row) {
                    continue;
                }
                let sub = rec.call(assignment.extend(row));
                sum = Some(match sum {
                    None => sub,
                    Some(accumulated) => add(accumulated, sub),
                });
            }
            sum.unwrap_or_else(|| done(0))
        },
    );

    compute.call(Assignment::empty()).get()
}

#[test]
fn nqueens_counts_match_the_classics() {
    let expected: [u64; 8] = [1, 0, 0, 2, 10, 4, 40, 92];
    for (board, expected) in expected.iter().enumerate() {
        let size = board as i32 + 1;
        assert_eq!(*expected, nqueens(size), "n = {size}");
    }
}
