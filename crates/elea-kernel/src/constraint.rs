//! Unification constraints
//!
//! Constraints are what the type checker and elaboration layers hand to the
//! unifier: equalities between terms, equalities between universe levels, and
//! choice constraints that enumerate candidate values for a metavariable.

use crate::expr::Expr;
use crate::justification::Justification;
use crate::level::Level;
use crate::name::NameGenerator;
use crate::subst::Substitution;
use std::fmt;
use std::sync::Arc;

/// One candidate produced by a choice generator
#[derive(Clone)]
pub struct ChoiceAlternative {
    /// Value for the metavariable
    pub value: Expr,
    /// Justification for picking this candidate
    pub justification: Justification,
    /// Extra constraints this candidate requires
    pub constraints: Vec<Constraint>,
}

/// Lazy sequence of choice candidates
pub type AlternativeSeq = Box<dyn Iterator<Item = ChoiceAlternative>>;

/// Generator invoked with the (instantiated) type of the metavariable, the
/// current substitution, and a fresh name generator.
pub type ChoiceFn = Arc<dyn Fn(&Expr, &Substitution, &mut NameGenerator) -> AlternativeSeq>;

/// Unification constraint
#[derive(Clone)]
pub enum Constraint {
    /// Definitional equality between two terms
    Eq(Expr, Expr, Justification),
    /// Equality between two universe levels
    LevelEq(Level, Level, Justification),
    /// Enumerate candidate values for `mvar` via a generator
    Choice {
        mvar: Expr,
        alternatives: ChoiceFn,
        /// Delayed choice constraints are processed after everything else
        delayed: bool,
        justification: Justification,
    },
}

impl Constraint {
    pub fn eq(lhs: Expr, rhs: Expr, justification: Justification) -> Self {
        Constraint::Eq(lhs, rhs, justification)
    }

    pub fn level_eq(lhs: Level, rhs: Level, justification: Justification) -> Self {
        Constraint::LevelEq(lhs, rhs, justification)
    }

    pub fn choice(
        mvar: Expr,
        alternatives: ChoiceFn,
        delayed: bool,
        justification: Justification,
    ) -> Self {
        Constraint::Choice {
            mvar,
            alternatives,
            delayed,
            justification,
        }
    }

    pub fn justification(&self) -> &Justification {
        match self {
            Constraint::Eq(_, _, j) | Constraint::LevelEq(_, _, j) => j,
            Constraint::Choice { justification, .. } => justification,
        }
    }

    /// Replace the stored justification
    #[must_use]
    pub fn with_justification(self, j: Justification) -> Constraint {
        match self {
            Constraint::Eq(lhs, rhs, _) => Constraint::Eq(lhs, rhs, j),
            Constraint::LevelEq(lhs, rhs, _) => Constraint::LevelEq(lhs, rhs, j),
            Constraint::Choice {
                mvar,
                alternatives,
                delayed,
                ..
            } => Constraint::Choice {
                mvar,
                alternatives,
                delayed,
                justification: j,
            },
        }
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Eq(lhs, rhs, _) => write!(f, "Eq({lhs:?} =?= {rhs:?})"),
            Constraint::LevelEq(lhs, rhs, _) => write!(f, "LevelEq({lhs} =?= {rhs})"),
            Constraint::Choice { mvar, delayed, .. } => {
                write!(f, "Choice({mvar:?}, delayed: {delayed})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;

    #[test]
    fn test_with_justification_replaces() {
        let c = Constraint::eq(
            Expr::prop(),
            Expr::prop(),
            Justification::asserted("old"),
        );
        let c = c.with_justification(Justification::asserted("new"));
        assert_eq!(c.justification().to_string(), "new");
    }

    #[test]
    fn test_choice_is_cloneable() {
        let f: ChoiceFn = Arc::new(|_, _, _| Box::new(std::iter::empty()));
        let m = Expr::meta(Name::from_string("m"), Expr::prop());
        let c = Constraint::choice(m, f, false, Justification::none());
        let c2 = c.clone();
        assert!(matches!(c2, Constraint::Choice { delayed: false, .. }));
    }
}
