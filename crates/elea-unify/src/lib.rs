//! Higher-order unification for the elea kernel
//!
//! Given a set of constraints over terms and universe levels, [`unify`]
//! produces a lazy sequence of substitutions that simultaneously solve them.
//! The engine combines first-order pattern unification, Huet-style
//! projection/imitation branching for flex-rigid equations, user-pluggable
//! hints ([`UnifierPlugin`]), choice constraints that enumerate candidate
//! values for a metavariable, and backtracking search directed by
//! justifications.
//!
//! Higher-order unification is undecidable in general; the engine is bounded
//! by a step budget and deliberately skips flex-flex equations.

mod engine;
pub mod simple;

pub use simple::{
    is_simple_meta, occurs_context_check, unify_simple, unify_simple_constraint,
    unify_simple_levels, UnifyStatus,
};

use elea_kernel::{
    Constraint, Environment, Expr, Justification, NameGenerator, Substitution, TypeChecker,
    TypeError,
};
use engine::Unifier;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;

/// Lazy sequence of constraint lists, as produced by a plugin
pub type ConstraintSeq = Box<dyn Iterator<Item = Vec<Constraint>>>;

/// User-supplied unification hints. Invoked on constraints the engine cannot
/// solve itself; each element of the returned sequence is the constraint list
/// to install for one alternative. An empty sequence refutes the constraint.
pub type UnifierPlugin = Arc<dyn Fn(&Constraint, &mut NameGenerator) -> ConstraintSeq>;

/// A plugin with no hints: refutes every constraint that reaches it.
pub fn null_plugin() -> UnifierPlugin {
    Arc::new(|_, _| Box::new(std::iter::empty()))
}

/// Default for `unifier.max_steps`
pub const DEFAULT_MAX_STEPS: u32 = 20_000;

/// Engine configuration, read once at construction
#[derive(Clone)]
pub struct UnifierConfig {
    /// `unifier.max_steps`: bound on the number of processed constraints
    pub max_steps: u32,
    /// `unifier.use_exceptions`: whether exhausting the search space is
    /// reported as an error or just ends the solution sequence
    pub use_exceptions: bool,
    /// Cooperative cancellation flag, polled once per processed constraint
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for UnifierConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            use_exceptions: true,
            interrupt: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum UnifyError {
    #[error(
        "unifier maximum number of steps ({0}) exceeded; the limit can be raised with the \
         unifier.max_steps option (the unifier performs higher-order unification and may not \
         terminate)"
    )]
    MaxSteps(u32),
    #[error("unifier interrupted")]
    Interrupted,
    #[error("no solution for the given constraints: {0}")]
    NoSolution(Justification),
    #[error(transparent)]
    Type(#[from] TypeError),
}

enum State<'e> {
    Empty,
    Single(Substitution),
    Engine(Box<Unifier<'e>>),
    Done,
}

/// Lazy sequence of solutions. Each pull runs the engine until the next
/// solution is found or the alternatives are exhausted; the sequence fuses
/// after the first error.
pub struct Solutions<'e> {
    state: State<'e>,
}

impl<'e> Solutions<'e> {
    fn empty() -> Self {
        Solutions {
            state: State::Empty,
        }
    }
}

impl<'e> Iterator for Solutions<'e> {
    type Item = Result<Substitution, UnifyError>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Empty | State::Done => None,
            State::Single(s) => Some(Ok(s)),
            State::Engine(mut u) => match u.next_solution() {
                Ok(Some(s)) => {
                    self.state = State::Engine(u);
                    Some(Ok(s))
                }
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            },
        }
    }
}

/// Solve a set of constraints, producing a lazy sequence of substitutions.
pub fn unify<'e>(
    env: &'e Environment,
    constraints: Vec<Constraint>,
    ngen: NameGenerator,
    plugin: UnifierPlugin,
    config: &UnifierConfig,
) -> Solutions<'e> {
    Solutions {
        state: State::Engine(Box::new(Unifier::new(
            env,
            constraints,
            ngen,
            Substitution::new(),
            plugin,
            config,
        ))),
    }
}

/// Convenience entry for a single pair of terms: run the type checker's
/// definitional equality first, fold the residual constraints through the
/// simple unifier, and only fall back to the full engine for what is left.
/// The engine runs without exceptions: exhaustion ends the sequence.
pub fn unify_pair<'e>(
    env: &'e Environment,
    lhs: &Expr,
    rhs: &Expr,
    mut ngen: NameGenerator,
    plugin: UnifierPlugin,
    config: &UnifierConfig,
) -> Result<Solutions<'e>, UnifyError> {
    let mut tc = TypeChecker::new(env, ngen.child(), Vec::new());
    if !tc.is_def_eq(lhs, rhs, &Justification::none())? {
        return Ok(Solutions::empty());
    }
    let mut subst = Substitution::new();
    let mut leftover = Vec::new();
    for c in tc.drain_constraints() {
        match unify_simple_constraint(&subst, &c) {
            (UnifyStatus::Solved, s) => subst = s,
            (UnifyStatus::Failed, _) => return Ok(Solutions::empty()),
            (UnifyStatus::Unsupported, _) => leftover.push(c),
        }
    }
    if leftover.is_empty() {
        return Ok(Solutions {
            state: State::Single(subst),
        });
    }
    let config = UnifierConfig {
        use_exceptions: false,
        ..config.clone()
    };
    Ok(Solutions {
        state: State::Engine(Box::new(Unifier::new(
            env, leftover, ngen, subst, plugin, &config,
        ))),
    })
}
