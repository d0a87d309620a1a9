//! Universe levels
//!
//! Levels stratify the sort hierarchy. Besides the usual constructors
//! (`zero`, `succ`, `max`, `imax`, parameters) there are level
//! metavariables, placeholders the unifier solves for.
//!
//! Key property: `imax(l1, l2) = 0` if `l2 = 0`, otherwise `max(l1, l2)`.

use crate::name::Name;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Universe level
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    /// Zero (the lowest level)
    Zero,
    /// Successor: l + 1
    Succ(Arc<Level>),
    /// Maximum: max(l1, l2)
    Max(Arc<Level>, Arc<Level>),
    /// Impredicative maximum: imax(l1, l2) = 0 if l2 = 0, else max(l1, l2)
    IMax(Arc<Level>, Arc<Level>),
    /// Universe parameter (polymorphism)
    Param(Name),
    /// Universe metavariable, solved by unification
    Meta(Name),
}

impl Level {
    /// Create zero level
    pub fn zero() -> Self {
        Level::Zero
    }

    /// Create successor level
    pub fn succ(l: Level) -> Self {
        Level::Succ(Arc::new(l))
    }

    /// Create max level, simplifying if possible
    pub fn max(l1: Level, l2: Level) -> Self {
        // max(l, l) = l, max(0, l) = l, max(l, 0) = l
        if l1 == l2 {
            return l1;
        }
        if l1.is_zero() {
            return l2;
        }
        if l2.is_zero() {
            return l1;
        }
        if Level::is_geq(&l1, &l2) {
            return l1;
        }
        if Level::is_geq(&l2, &l1) {
            return l2;
        }
        Level::Max(Arc::new(l1), Arc::new(l2))
    }

    /// Create imax level, simplifying if possible
    pub fn imax(l1: Level, l2: Level) -> Self {
        // imax(l, 0) = 0
        if l2.is_zero() {
            return Level::Zero;
        }
        // imax(l, l2) = max(l, l2) once l2 is known nonzero
        if l2.is_nonzero() {
            return Level::max(l1, l2);
        }
        if l1.is_zero() {
            return l2;
        }
        if l1 == l2 {
            return l1;
        }
        Level::IMax(Arc::new(l1), Arc::new(l2))
    }

    /// Create parameter level
    pub fn param(name: Name) -> Self {
        Level::Param(name)
    }

    /// Create a level metavariable
    pub fn meta(name: Name) -> Self {
        Level::Meta(name)
    }

    /// Check if this is definitely zero
    pub fn is_zero(&self) -> bool {
        match self {
            Level::Zero => true,
            // Succ is always > 0; params and metas might be anything
            Level::Succ(_) | Level::Param(_) | Level::Meta(_) => false,
            Level::Max(l1, l2) => l1.is_zero() && l2.is_zero(),
            Level::IMax(_, l2) => l2.is_zero(),
        }
    }

    /// Check if this is definitely nonzero
    pub fn is_nonzero(&self) -> bool {
        match self {
            Level::Zero | Level::Param(_) | Level::Meta(_) => false,
            Level::Succ(_) => true,
            Level::Max(l1, l2) => l1.is_nonzero() || l2.is_nonzero(),
            Level::IMax(_, l2) => l2.is_nonzero(),
        }
    }

    /// Check if the outermost constructor is `Succ`
    pub fn is_succ(&self) -> bool {
        matches!(self, Level::Succ(_))
    }

    /// Strip one outer `Succ`
    pub fn succ_of(&self) -> Option<&Level> {
        match self {
            Level::Succ(inner) => Some(inner),
            _ => None,
        }
    }

    /// Check if this is a level metavariable
    pub fn is_meta(&self) -> bool {
        matches!(self, Level::Meta(_))
    }

    /// Check if this level contains any metavariable
    pub fn has_metas(&self) -> bool {
        match self {
            Level::Zero | Level::Param(_) => false,
            Level::Meta(_) => true,
            Level::Succ(l) => l.has_metas(),
            Level::Max(l1, l2) | Level::IMax(l1, l2) => l1.has_metas() || l2.has_metas(),
        }
    }

    /// Check if the metavariable `m` occurs in this level
    pub fn occurs_meta(&self, m: &Name) -> bool {
        match self {
            Level::Zero | Level::Param(_) => false,
            Level::Meta(n) => n == m,
            Level::Succ(l) => l.occurs_meta(m),
            Level::Max(l1, l2) | Level::IMax(l1, l2) => l1.occurs_meta(m) || l2.occurs_meta(m),
        }
    }

    /// Get the base level and offset (number of Succ applications)
    pub fn get_offset(&self) -> (&Level, u32) {
        match self {
            Level::Succ(inner) => {
                let (base, offset) = inner.get_offset();
                (base, offset + 1)
            }
            _ => (self, 0),
        }
    }

    /// Add an offset to a level
    #[must_use]
    pub fn add_offset(&self, n: u32) -> Level {
        if n == 0 {
            self.clone()
        } else {
            Level::succ(self.add_offset(n - 1))
        }
    }

    /// Normalize the level to a canonical form
    #[must_use]
    pub fn normalize(&self) -> Level {
        match self {
            Level::Zero | Level::Param(_) | Level::Meta(_) => self.clone(),
            Level::Succ(l) => Level::succ(l.normalize()),
            Level::Max(l1, l2) => Level::max(l1.normalize(), l2.normalize()),
            Level::IMax(l1, l2) => Level::imax(l1.normalize(), l2.normalize()),
        }
    }

    /// Check if l1 ≥ l2. Conservative: returns true only if definitely ≥.
    pub fn is_geq(l1: &Level, l2: &Level) -> bool {
        if l1 == l2 {
            return true;
        }
        if l2.is_zero() {
            return true;
        }

        let (base1, offset1) = l1.get_offset();
        let (base2, offset2) = l2.get_offset();
        if base1 == base2 {
            return offset1 >= offset2;
        }
        // succ^k(X) >= succ^k(0) for any X, since X >= 0
        if base2.is_zero() && offset1 >= offset2 {
            return true;
        }
        // succ(l1') >= l2 if l1' >= l2
        if offset1 > 0 {
            if let Level::Succ(inner) = l1 {
                if Level::is_geq(inner, l2) {
                    return true;
                }
            }
        }
        // max(a, b) >= l if a >= l or b >= l
        if let Level::Max(a, b) = l1 {
            if Level::is_geq(a, l2) || Level::is_geq(b, l2) {
                return true;
            }
        }
        // l >= max(a, b) if l >= a and l >= b
        if let Level::Max(a, b) = l2 {
            if Level::is_geq(l1, a) && Level::is_geq(l1, b) {
                return true;
            }
        }
        // imax(a, b) reduces to max(a, b) if b is nonzero
        if let Level::IMax(a, b) = l1 {
            if b.is_nonzero() {
                return Level::is_geq(&Level::max(a.as_ref().clone(), b.as_ref().clone()), l2);
            }
        }
        if let Level::IMax(a, b) = l2 {
            if b.is_nonzero() {
                return Level::is_geq(l1, &Level::max(a.as_ref().clone(), b.as_ref().clone()));
            }
        }
        false
    }

    /// Check if two levels are definitionally equal
    pub fn is_def_eq(l1: &Level, l2: &Level) -> bool {
        l1.normalize() == l2.normalize()
    }

    /// Substitute universe parameters
    #[must_use]
    pub fn substitute_params(&self, subst: &[(Name, Level)]) -> Level {
        match self {
            Level::Zero | Level::Meta(_) => self.clone(),
            Level::Succ(l) => Level::succ(l.substitute_params(subst)),
            Level::Max(l1, l2) => {
                Level::max(l1.substitute_params(subst), l2.substitute_params(subst))
            }
            Level::IMax(l1, l2) => {
                Level::imax(l1.substitute_params(subst), l2.substitute_params(subst))
            }
            Level::Param(name) => {
                for (n, level) in subst {
                    if n == name {
                        return level.clone();
                    }
                }
                self.clone()
            }
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Zero => write!(f, "0"),
            Level::Succ(_) => {
                let (base, offset) = self.get_offset();
                if base.is_zero() {
                    write!(f, "{offset}")
                } else {
                    write!(f, "{base} + {offset}")
                }
            }
            Level::Max(l1, l2) => write!(f, "max({l1}, {l2})"),
            Level::IMax(l1, l2) => write!(f, "imax({l1}, {l2})"),
            Level::Param(name) => write!(f, "{name}"),
            Level::Meta(name) => write!(f, "?{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u() -> Level {
        Level::param(Name::from_string("u"))
    }

    fn m() -> Level {
        Level::meta(Name::from_string("m"))
    }

    #[test]
    fn test_is_zero() {
        assert!(Level::zero().is_zero());
        assert!(!Level::succ(Level::zero()).is_zero());
        assert!(!m().is_zero());
        // imax(u, 0) = 0
        assert!(Level::imax(u(), Level::zero()).is_zero());
    }

    #[test]
    fn test_is_nonzero() {
        assert!(Level::succ(m()).is_nonzero());
        assert!(!m().is_nonzero());
        assert!(!u().is_nonzero());
    }

    #[test]
    fn test_max_simplification() {
        assert_eq!(Level::max(u(), u()), u());
        assert_eq!(Level::max(Level::zero(), m()), m());
        assert_eq!(Level::max(m(), Level::zero()), m());
        // incomparable sides stay a Max node
        assert!(matches!(Level::max(u(), m()), Level::Max(_, _)));
    }

    #[test]
    fn test_imax_simplification() {
        assert!(Level::imax(u(), Level::zero()).is_zero());
        // imax(u, succ(m)) = max(u, succ(m)) since succ is nonzero
        let i = Level::imax(u(), Level::succ(m()));
        assert!(!matches!(i, Level::IMax(_, _)));
        // imax over an unknown meta cannot be reduced
        assert!(matches!(Level::imax(u(), m()), Level::IMax(_, _)));
    }

    #[test]
    fn test_normalize() {
        let i = Level::IMax(Arc::new(u()), Arc::new(Level::Zero));
        assert!(i.normalize().is_zero());

        let mx = Level::Max(Arc::new(Level::Zero), Arc::new(m()));
        assert_eq!(mx.normalize(), m());

        // metas are opaque to normalization
        assert_eq!(m().normalize(), m());
    }

    #[test]
    fn test_succ_peeling() {
        let two_u = u().add_offset(2);
        assert!(two_u.is_succ());
        let one_u = two_u.succ_of().unwrap();
        assert_eq!(one_u, &u().add_offset(1));
        assert!(u().succ_of().is_none());
    }

    #[test]
    fn test_occurs_meta() {
        let name = Name::from_string("m");
        assert!(m().occurs_meta(&name));
        assert!(Level::succ(m()).occurs_meta(&name));
        assert!(Level::max(u(), Level::succ(m())).occurs_meta(&name));
        assert!(!u().occurs_meta(&name));
        assert!(!Level::meta(Name::from_string("k")).occurs_meta(&name));
    }

    #[test]
    fn test_is_geq_with_metas() {
        // nothing definite is known about a bare meta except m >= 0 and m >= m
        assert!(Level::is_geq(&m(), &Level::zero()));
        assert!(Level::is_geq(&m(), &m()));
        assert!(!Level::is_geq(&m(), &u()));
        assert!(Level::is_geq(&Level::succ(m()), &m()));
    }

    #[test]
    fn test_substitute_params_skips_metas() {
        let subst = vec![(Name::from_string("u"), Level::zero())];
        assert_eq!(u().substitute_params(&subst), Level::zero());
        assert_eq!(m().substitute_params(&subst), m());
    }
}
