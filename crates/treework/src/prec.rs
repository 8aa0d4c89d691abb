//! The recursive-task combinator.
//!
//! A recursive computation is described by a base-case predicate, one
//! or more base-case implementations and one or more step
//! implementations. Invoking the combined function spawns a task that
//! carries the base case as its sequential body and the step as its
//! splitter, so the scheduler decides dynamically between sequential
//! execution and decomposition. Step implementations receive a
//! recursion handle whose invocations become sub-tasks.

use std::sync::Arc;

use crate::deps::Dependencies;
use crate::ops::{spawn_after, spawn_splittable_after};
use crate::runtime::task::Task;
use crate::runtime::worker::current_worker;
use crate::treeture::UnreleasedTreeture;

/// Evaluates a freshly built task tree on the current thread and
/// extracts its result. This is the sequential arm of a recursion
/// step: the decomposition is still applied, just without handing the
/// children to other workers up front.
fn evaluate_inline<O: Send + 'static>(tree: UnreleasedTreeture<O>) -> O {
    let task = tree.into_task();
    let worker = current_worker();
    Task::run_inline(&task, &worker);
    let value = task
        .take_value()
        .expect("inline-evaluated task finished without a value");
    *value
        .downcast::<O>()
        .expect("inline-evaluated task produced a value of unexpected type")
}

type TestFn<I> = Box<dyn Fn(&I) -> bool + Send + Sync>;
type BaseVariant<I, O> = Arc<dyn Fn(I) -> O + Send + Sync>;
type StepVariant<I, O> = Arc<dyn Fn(I, PrecFun<I, O>) -> UnreleasedTreeture<O> + Send + Sync>;
type MutualStepVariant<I, O, J, P> =
    Arc<dyn Fn(I, PrecFun<I, O>, PrecFun<J, P>) -> UnreleasedTreeture<O> + Send + Sync>;

/// Picks one implementation out of a set of interchangeable variants.
fn choose<T>(variants: &[T]) -> &T {
    if variants.len() == 1 {
        &variants[0]
    } else {
        &variants[fastrand::usize(..variants.len())]
    }
}

/// A self-recursive function definition: base-case test, base-case
/// implementations and step implementations.
///
/// Alternative implementations added through [`FunDef::or_base`] and
/// [`FunDef::or_step`] are considered interchangeable; one is chosen
/// at random per invocation.
pub struct FunDef<I, O> {
    test: TestFn<I>,
    base: Vec<BaseVariant<I, O>>,
    step: Vec<StepVariant<I, O>>,
}

/// Builds a self-recursive function definition from a base-case test,
/// a base case and a step.
pub fn fun<I, O, T, B, S>(test: T, base: B, step: S) -> FunDef<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
    T: Fn(&I) -> bool + Send + Sync + 'static,
    B: Fn(I) -> O + Send + Sync + 'static,
    S: Fn(I, PrecFun<I, O>) -> UnreleasedTreeture<O> + Send + Sync + 'static,
{
    FunDef {
        test: Box::new(test),
        base: vec![Arc::new(base)],
        step: vec![Arc::new(step)],
    }
}

impl<I, O> FunDef<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    /// Registers an alternative base-case implementation.
    #[must_use]
    pub fn or_base<B>(mut self, base: B) -> Self
    where
        B: Fn(I) -> O + Send + Sync + 'static,
    {
        self.base.push(Arc::new(base));
        self
    }

    /// Registers an alternative step implementation.
    #[must_use]
    pub fn or_step<S>(mut self, step: S) -> Self
    where
        S: Fn(I, PrecFun<I, O>) -> UnreleasedTreeture<O> + Send + Sync + 'static,
    {
        self.step.push(Arc::new(step));
        self
    }
}

/// The callable produced by [`prec`]: applying it spawns the recursive
/// computation and yields a treeture of the result.
pub struct PrecFun<I, O> {
    target: Arc<dyn PrecTarget<I, O>>,
}

impl<I, O> Clone for PrecFun<I, O> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<I, O> PrecFun<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    /// Invokes the recursive function on the given input.
    pub fn call(&self, input: I) -> UnreleasedTreeture<O> {
        self.call_after(Dependencies::none(), input)
    }

    /// Invokes the recursive function, gated on the given
    /// predecessors.
    pub fn call_after(&self, deps: Dependencies, input: I) -> UnreleasedTreeture<O> {
        self.target.apply(deps, input)
    }
}

trait PrecTarget<I, O>: Send + Sync {
    fn apply(&self, deps: Dependencies, input: I) -> UnreleasedTreeture<O>;
}

/// Turns a base-case test, base case and step into a recursive
/// function.
pub fn prec<I, O, T, B, S>(test: T, base: B, step: S) -> PrecFun<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
    T: Fn(&I) -> bool + Send + Sync + 'static,
    B: Fn(I) -> O + Send + Sync + 'static,
    S: Fn(I, PrecFun<I, O>) -> UnreleasedTreeture<O> + Send + Sync + 'static,
{
    prec_fun(fun(test, base, step))
}

/// Turns a function definition into a recursive function.
pub fn prec_fun<I, O>(def: FunDef<I, O>) -> PrecFun<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    PrecFun {
        target: Arc::new(SelfRecursion { def: Arc::new(def) }),
    }
}

struct SelfRecursion<I, O> {
    def: Arc<FunDef<I, O>>,
}

impl<I, O> PrecTarget<I, O> for SelfRecursion<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    fn apply(&self, deps: Dependencies, input: I) -> UnreleasedTreeture<O> {
        let def = &self.def;

        if (def.test)(&input) {
            let base = choose(&def.base).clone();
            return spawn_after(deps, move || base(input));
        }

        // not a base case: the step applies either way, the scheduler
        // only chooses between decomposing eagerly and evaluating the
        // decomposition in place
        let recurse = PrecFun {
            target: Arc::new(SelfRecursion {
                def: self.def.clone(),
            }),
        };
        let sequential_def = self.def.clone();
        let sequential_recurse = recurse.clone();
        let body_input = input.clone();
        let split_def = self.def.clone();

        spawn_splittable_after(
            deps,
            move || {
                let step = choose(&sequential_def.step).clone();
                evaluate_inline(step(body_input, sequential_recurse))
            },
            move || {
                let step = choose(&split_def.step).clone();
                step(input, recurse)
            },
        )
    }
}

// --- mutually recursive definitions ---

/// One member of a mutually recursive pair: its step receives the
/// recursion handles of itself and of the other member.
pub struct MutualFunDef<I, O, J, P> {
    test: TestFn<I>,
    base: Vec<BaseVariant<I, O>>,
    step: Vec<MutualStepVariant<I, O, J, P>>,
}

/// Builds one member of a mutually recursive group.
pub fn mutual_fun<I, O, J, P, T, B, S>(test: T, base: B, step: S) -> MutualFunDef<I, O, J, P>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
    J: Clone + Send + 'static,
    P: Send + 'static,
    T: Fn(&I) -> bool + Send + Sync + 'static,
    B: Fn(I) -> O + Send + Sync + 'static,
    S: Fn(I, PrecFun<I, O>, PrecFun<J, P>) -> UnreleasedTreeture<O> + Send + Sync + 'static,
{
    MutualFunDef {
        test: Box::new(test),
        base: vec![Arc::new(base)],
        step: vec![Arc::new(step)],
    }
}

impl<I, O, J, P> MutualFunDef<I, O, J, P>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
    J: Clone + Send + 'static,
    P: Send + 'static,
{
    /// Registers an alternative base-case implementation.
    #[must_use]
    pub fn or_base<B>(mut self, base: B) -> Self
    where
        B: Fn(I) -> O + Send + Sync + 'static,
    {
        self.base.push(Arc::new(base));
        self
    }

    /// Registers an alternative step implementation.
    #[must_use]
    pub fn or_step<S>(mut self, step: S) -> Self
    where
        S: Fn(I, PrecFun<I, O>, PrecFun<J, P>) -> UnreleasedTreeture<O> + Send + Sync + 'static,
    {
        self.step.push(Arc::new(step));
        self
    }
}

struct GroupCore<I1, O1, I2, O2> {
    first: MutualFunDef<I1, O1, I2, O2>,
    second: MutualFunDef<I2, O2, I1, O1>,
}

/// A group of two mutually recursive function definitions.
///
/// [`RecGroup::first`] and [`RecGroup::second`] select the entry
/// point.
pub struct RecGroup<I1, O1, I2, O2> {
    core: Arc<GroupCore<I1, O1, I2, O2>>,
}

impl<I1, O1, I2, O2> Clone for RecGroup<I1, O1, I2, O2> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

/// Groups two mutually recursive definitions.
pub fn group<I1, O1, I2, O2>(
    first: MutualFunDef<I1, O1, I2, O2>,
    second: MutualFunDef<I2, O2, I1, O1>,
) -> RecGroup<I1, O1, I2, O2>
where
    I1: Clone + Send + 'static,
    O1: Send + 'static,
    I2: Clone + Send + 'static,
    O2: Send + 'static,
{
    RecGroup {
        core: Arc::new(GroupCore { first, second }),
    }
}

impl<I1, O1, I2, O2> RecGroup<I1, O1, I2, O2>
where
    I1: Clone + Send + 'static,
    O1: Send + 'static,
    I2: Clone + Send + 'static,
    O2: Send + 'static,
{
    /// The group's first member as a callable recursive function.
    #[must_use]
    pub fn first(&self) -> PrecFun<I1, O1> {
        PrecFun {
            target: Arc::new(GroupFirst {
                core: self.core.clone(),
            }),
        }
    }

    /// The group's second member as a callable recursive function.
    #[must_use]
    pub fn second(&self) -> PrecFun<I2, O2> {
        PrecFun {
            target: Arc::new(GroupSecond {
                core: self.core.clone(),
            }),
        }
    }
}

struct GroupFirst<I1, O1, I2, O2> {
    core: Arc<GroupCore<I1, O1, I2, O2>>,
}

impl<I1, O1, I2, O2> PrecTarget<I1, O1> for GroupFirst<I1, O1, I2, O2>
where
    I1: Clone + Send + 'static,
    O1: Send + 'static,
    I2: Clone + Send + 'static,
    O2: Send + 'static,
{
    fn apply(&self, deps: Dependencies, input: I1) -> UnreleasedTreeture<O1> {
        let def = &self.core.first;

        if (def.test)(&input) {
            let base = choose(&def.base).clone();
            return spawn_after(deps, move || base(input));
        }

        let group = RecGroup {
            core: self.core.clone(),
        };
        let sequential_core = self.core.clone();
        let sequential_group = group.clone();
        let body_input = input.clone();
        let split_core = self.core.clone();

        spawn_splittable_after(
            deps,
            move || {
                let step = choose(&sequential_core.first.step).clone();
                evaluate_inline(step(
                    body_input,
                    sequential_group.first(),
                    sequential_group.second(),
                ))
            },
            move || {
                let step = choose(&split_core.first.step).clone();
                step(input, group.first(), group.second())
            },
        )
    }
}

struct GroupSecond<I1, O1, I2, O2> {
    core: Arc<GroupCore<I1, O1, I2, O2>>,
}

impl<I1, O1, I2, O2> PrecTarget<I2, O2> for GroupSecond<I1, O1, I2, O2>
where
    I1: Clone + Send + 'static,
    O1: Send + 'static,
    I2: Clone + Send + 'static,
    O2: Send + 'static,
{
    fn apply(&self, deps: Dependencies, input: I2) -> UnreleasedTreeture<O2> {
        let def = &self.core.second;

        if (def.test)(&input) {
            let base = choose(&def.base).clone();
            return spawn_after(deps, move || base(input));
        }

        let group = RecGroup {
            core: self.core.clone(),
        };
        let sequential_core = self.core.clone();
        let sequential_group = group.clone();
        let body_input = input.clone();
        let split_core = self.core.clone();

        spawn_splittable_after(
            deps,
            move || {
                let step = choose(&sequential_core.second.step).clone();
                evaluate_inline(step(
                    body_input,
                    sequential_group.second(),
                    sequential_group.first(),
                ))
            },
            move || {
                let step = choose(&split_core.second.step).clone();
                step(input, group.second(), group.first())
            },
        )
    }
}
