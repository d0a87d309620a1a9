//! Elea kernel
//!
//! The kernel language of the elea prover: expressions with de Bruijn
//! binders, universe levels, hierarchical names, unification constraints with
//! their justifications, persistent metavariable substitutions, the global
//! environment, and a type checker that reports residual equations through a
//! constraint sink instead of deciding metavariable problems itself.
//!
//! The higher-order unification engine that consumes these types lives in the
//! `elea-unify` crate.

pub mod constraint;
pub mod env;
pub mod expr;
pub mod justification;
pub mod level;
pub mod name;
pub mod subst;
pub mod tc;

pub use constraint::{AlternativeSeq, ChoiceAlternative, ChoiceFn, Constraint};
pub use env::{ConstantInfo, Declaration, EnvError, Environment};
pub use expr::{BinderInfo, Expr, MacroDef};
pub use justification::Justification;
pub use level::Level;
pub use name::{Name, NameGenerator};
pub use subst::{Substitution, UnassignedMetas};
pub use tc::{ConstraintSink, TypeChecker, TypeError};
