//! Hierarchical names
//!
//! Names are chains of string and numeric components rooted at the anonymous
//! name. Numeric components are what `NameGenerator` appends, so generated
//! names can never collide with user-written dotted identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Hierarchical name
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Name {
    /// The anonymous root
    Anon,
    /// String component appended to a prefix
    Str(Arc<Name>, String),
    /// Numeric component appended to a prefix
    Num(Arc<Name>, u64),
}

impl Name {
    /// The anonymous name
    pub fn anon() -> Self {
        Name::Anon
    }

    /// Append a string component
    pub fn str(prefix: Name, s: impl Into<String>) -> Self {
        Name::Str(Arc::new(prefix), s.into())
    }

    /// Append a numeric component
    pub fn num(prefix: Name, n: u64) -> Self {
        Name::Num(Arc::new(prefix), n)
    }

    /// Parse a dotted identifier, e.g. `"Nat.succ"`
    pub fn from_string(s: &str) -> Self {
        s.split('.')
            .fold(Name::Anon, |prefix, part| Name::str(prefix, part))
    }

    /// Check if this is the anonymous name
    pub fn is_anon(&self) -> bool {
        matches!(self, Name::Anon)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Anon => write!(f, "[anon]"),
            Name::Str(prefix, s) => {
                if !prefix.is_anon() {
                    write!(f, "{prefix}.")?;
                }
                write!(f, "{s}")
            }
            Name::Num(prefix, n) => {
                if !prefix.is_anon() {
                    write!(f, "{prefix}.")?;
                }
                write!(f, "{n}")
            }
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Mints globally unique names below a given prefix.
///
/// `child` splits off an independent generator whose names cannot collide
/// with names produced by the parent afterwards.
#[derive(Clone, Debug)]
pub struct NameGenerator {
    prefix: Name,
    next_idx: u64,
}

impl NameGenerator {
    pub fn new(prefix: Name) -> Self {
        Self {
            prefix,
            next_idx: 0,
        }
    }

    /// Produce the next fresh name
    pub fn next(&mut self) -> Name {
        let n = Name::num(self.prefix.clone(), self.next_idx);
        self.next_idx += 1;
        n
    }

    /// Derive an independent child generator
    pub fn child(&mut self) -> NameGenerator {
        NameGenerator::new(self.next())
    }
}
