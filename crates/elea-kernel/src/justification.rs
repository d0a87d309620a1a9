//! Justifications
//!
//! A justification records why an assignment or a conflict holds. Leaves are
//! either user-supplied (`asserted`) or assumption markers minted when the
//! unifier opens a case split; `depends_on` asks whether a given assumption
//! index is in the support of a justification, which is what directs
//! non-chronological backtracking.

use std::fmt;
use std::sync::Arc;

/// Dependency proof attached to constraints, assignments and conflicts
#[derive(Clone, Default)]
pub struct Justification(Option<Arc<Node>>);

enum Node {
    Asserted(String),
    Assumption(u64),
    Composite(Justification, Justification),
}

impl Justification {
    /// The empty justification
    pub fn none() -> Self {
        Justification(None)
    }

    /// A user-supplied leaf with a label used in error reports
    pub fn asserted(label: impl Into<String>) -> Self {
        Justification(Some(Arc::new(Node::Asserted(label.into()))))
    }

    /// A case-split assumption leaf
    pub fn assumption(idx: u64) -> Self {
        Justification(Some(Arc::new(Node::Assumption(idx))))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Combine two justifications; the empty justification is the identity.
    pub fn compose(a: &Justification, b: &Justification) -> Justification {
        if a.is_none() {
            b.clone()
        } else if b.is_none() {
            a.clone()
        } else {
            Justification(Some(Arc::new(Node::Composite(a.clone(), b.clone()))))
        }
    }

    /// Check whether the assumption `idx` occurs in this justification
    pub fn depends_on(&self, idx: u64) -> bool {
        match self.0.as_deref() {
            None | Some(Node::Asserted(_)) => false,
            Some(Node::Assumption(i)) => *i == idx,
            Some(Node::Composite(a, b)) => a.depends_on(idx) || b.depends_on(idx),
        }
    }

    fn collect_leaves<'a>(&'a self, asserted: &mut Vec<&'a str>, assumptions: &mut Vec<u64>) {
        match self.0.as_deref() {
            None => {}
            Some(Node::Asserted(s)) => asserted.push(s),
            Some(Node::Assumption(i)) => {
                if !assumptions.contains(i) {
                    assumptions.push(*i);
                }
            }
            Some(Node::Composite(a, b)) => {
                a.collect_leaves(asserted, assumptions);
                b.collect_leaves(asserted, assumptions);
            }
        }
    }
}

impl fmt::Display for Justification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut asserted = Vec::new();
        let mut assumptions = Vec::new();
        self.collect_leaves(&mut asserted, &mut assumptions);
        if asserted.is_empty() && assumptions.is_empty() {
            return write!(f, "<none>");
        }
        let mut first = true;
        for s in asserted {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{s}")?;
        }
        for i in assumptions {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "assumption #{i}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Justification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Justification({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_identity() {
        let a = Justification::asserted("input");
        let c = Justification::compose(&Justification::none(), &a);
        assert!(!c.is_none());
        assert_eq!(c.to_string(), "input");
        let c = Justification::compose(&a, &Justification::none());
        assert_eq!(c.to_string(), "input");
        assert!(Justification::compose(&Justification::none(), &Justification::none()).is_none());
    }

    #[test]
    fn test_depends_on_walks_composites() {
        let a = Justification::assumption(3);
        let b = Justification::asserted("input");
        let c = Justification::compose(&b, &Justification::compose(&a, &b));
        assert!(c.depends_on(3));
        assert!(!c.depends_on(4));
        assert!(!b.depends_on(3));
    }

    #[test]
    fn test_display_collects_leaves() {
        let j = Justification::compose(
            &Justification::asserted("constraint"),
            &Justification::assumption(1),
        );
        let s = j.to_string();
        assert!(s.contains("constraint"));
        assert!(s.contains("assumption #1"));
    }
}
