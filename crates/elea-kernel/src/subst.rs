//! Metavariable substitutions
//!
//! A substitution maps term and level metavariables to values, each paired
//! with the justification of the assignment. The maps are persistent
//! (`im::OrdMap`), so the unifier can snapshot a substitution into a
//! backtracking frame in O(1).

use crate::expr::Expr;
use crate::justification::Justification;
use crate::level::Level;
use crate::name::Name;
use im::OrdMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Accumulator for the unassigned metavariables encountered while
/// instantiating. Ordered sets keep downstream iteration deterministic.
#[derive(Debug, Default, Clone)]
pub struct UnassignedMetas {
    /// Term metavariables
    pub exprs: BTreeSet<Name>,
    /// Level metavariables
    pub levels: BTreeSet<Name>,
}

/// Persistent mapping from metavariable names to assigned values
#[derive(Clone, Default)]
pub struct Substitution {
    exprs: OrdMap<Name, (Expr, Justification)>,
    levels: OrdMap<Name, (Level, Justification)>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend with a term metavariable assignment
    #[must_use]
    pub fn assign_expr(&self, m: Name, v: Expr, j: Justification) -> Substitution {
        let mut s = self.clone();
        s.exprs.insert(m, (v, j));
        s
    }

    /// Extend with a level metavariable assignment
    #[must_use]
    pub fn assign_level(&self, m: Name, v: Level, j: Justification) -> Substitution {
        let mut s = self.clone();
        s.levels.insert(m, (v, j));
        s
    }

    pub fn is_expr_assigned(&self, m: &Name) -> bool {
        self.exprs.contains_key(m)
    }

    pub fn is_level_assigned(&self, m: &Name) -> bool {
        self.levels.contains_key(m)
    }

    pub fn get_expr(&self, m: &Name) -> Option<&(Expr, Justification)> {
        self.exprs.get(m)
    }

    pub fn get_level(&self, m: &Name) -> Option<&(Level, Justification)> {
        self.levels.get(m)
    }

    pub fn expr_assignments(&self) -> impl Iterator<Item = (&Name, &(Expr, Justification))> {
        self.exprs.iter()
    }

    pub fn level_assignments(&self) -> impl Iterator<Item = (&Name, &(Level, Justification))> {
        self.levels.iter()
    }

    /// Replace every assigned metavariable in `e` by its value, β-reducing
    /// when an applied metavariable head becomes a lambda. Returns the
    /// composed justification of all assignments used; unassigned
    /// metavariables encountered are recorded into `unassigned`.
    pub fn instantiate_metavars(
        &self,
        e: &Expr,
        unassigned: &mut UnassignedMetas,
    ) -> (Expr, Justification) {
        let mut j = Justification::none();
        let r = self.inst_expr(e, &mut j, unassigned);
        (r, j)
    }

    /// Level counterpart of [`Substitution::instantiate_metavars`]
    pub fn instantiate_level_metavars(
        &self,
        l: &Level,
        unassigned: &mut UnassignedMetas,
    ) -> (Level, Justification) {
        let mut j = Justification::none();
        let r = self.inst_level(l, &mut j, unassigned);
        (r, j)
    }

    fn inst_expr(&self, e: &Expr, j: &mut Justification, un: &mut UnassignedMetas) -> Expr {
        match e {
            Expr::BVar(_) => e.clone(),
            Expr::Local(id, pp, ty) => Expr::Local(
                id.clone(),
                pp.clone(),
                Arc::new(self.inst_expr(ty, j, un)),
            ),
            Expr::Const(n, ls) => Expr::Const(
                n.clone(),
                ls.iter().map(|l| self.inst_level(l, j, un)).collect(),
            ),
            Expr::Sort(l) => Expr::Sort(self.inst_level(l, j, un)),
            Expr::Meta(n, ty) => {
                if let Some((v, vj)) = self.exprs.get(n) {
                    *j = Justification::compose(j, vj);
                    self.inst_expr(v, j, un)
                } else {
                    un.exprs.insert(n.clone());
                    Expr::Meta(n.clone(), Arc::new(self.inst_expr(ty, j, un)))
                }
            }
            Expr::App(_, _) => {
                let (head, args) = e.app_args();
                let args: Vec<Expr> =
                    args.iter().map(|a| self.inst_expr(a, j, un)).collect();
                match &head {
                    Expr::Meta(n, _) if self.exprs.contains_key(n) => {
                        let inst_head = self.inst_expr(&head, j, un);
                        Expr::beta_app(inst_head, &args)
                    }
                    _ => Expr::mk_app(self.inst_expr(&head, j, un), &args),
                }
            }
            Expr::Lam(n, bi, d, b) => Expr::lam(
                n.clone(),
                *bi,
                self.inst_expr(d, j, un),
                self.inst_expr(b, j, un),
            ),
            Expr::Pi(n, bi, d, b) => Expr::pi(
                n.clone(),
                *bi,
                self.inst_expr(d, j, un),
                self.inst_expr(b, j, un),
            ),
            Expr::Macro(def, cs) => Expr::Macro(
                def.clone(),
                cs.iter().map(|c| self.inst_expr(c, j, un)).collect(),
            ),
        }
    }

    fn inst_level(&self, l: &Level, j: &mut Justification, un: &mut UnassignedMetas) -> Level {
        match l {
            Level::Zero | Level::Param(_) => l.clone(),
            Level::Succ(x) => Level::succ(self.inst_level(x, j, un)),
            Level::Max(a, b) => {
                Level::max(self.inst_level(a, j, un), self.inst_level(b, j, un))
            }
            Level::IMax(a, b) => {
                Level::imax(self.inst_level(a, j, un), self.inst_level(b, j, un))
            }
            Level::Meta(n) => {
                if let Some((v, vj)) = self.levels.get(n) {
                    *j = Justification::compose(j, vj);
                    self.inst_level(v, j, un)
                } else {
                    un.levels.insert(n.clone());
                    l.clone()
                }
            }
        }
    }
}

impl std::fmt::Debug for Substitution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (n, (v, _)) in self.exprs.iter() {
            map.entry(&format_args!("?{n}"), v);
        }
        for (n, (v, _)) in self.levels.iter() {
            map.entry(&format_args!("?{n}"), &format_args!("{v}"));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinderInfo;

    fn nm(s: &str) -> Name {
        Name::from_string(s)
    }

    fn a_const() -> Expr {
        Expr::const_(nm("A"), vec![])
    }

    #[test]
    fn test_assignment_is_persistent() {
        let s0 = Substitution::new();
        let s1 = s0.assign_expr(nm("m"), a_const(), Justification::none());
        assert!(!s0.is_expr_assigned(&nm("m")));
        assert!(s1.is_expr_assigned(&nm("m")));
    }

    #[test]
    fn test_instantiate_beta_reduces_applied_meta() {
        // ?m := fun (x : A) => x, then ?m a reduces to a
        let id = Expr::lam(nm("x"), BinderInfo::Default, a_const(), Expr::bvar(0));
        let s = Substitution::new().assign_expr(nm("m"), id, Justification::none());
        let a = Expr::const_(nm("a"), vec![]);
        let e = Expr::app(Expr::meta(nm("m"), a_const()), a.clone());

        let mut un = UnassignedMetas::default();
        let (r, _) = s.instantiate_metavars(&e, &mut un);
        assert_eq!(r, a);
        assert!(un.exprs.is_empty());
    }

    #[test]
    fn test_instantiate_is_recursive() {
        // ?m := ?k, ?k := a
        let a = Expr::const_(nm("a"), vec![]);
        let s = Substitution::new()
            .assign_expr(nm("m"), Expr::meta(nm("k"), a_const()), Justification::none())
            .assign_expr(nm("k"), a.clone(), Justification::none());
        let mut un = UnassignedMetas::default();
        let (r, _) = s.instantiate_metavars(&Expr::meta(nm("m"), a_const()), &mut un);
        assert_eq!(r, a);
    }

    #[test]
    fn test_unassigned_collection() {
        let s = Substitution::new();
        let e = Expr::app(
            Expr::meta(nm("m"), a_const()),
            Expr::sort(Level::meta(nm("u"))),
        );
        let mut un = UnassignedMetas::default();
        s.instantiate_metavars(&e, &mut un);
        assert!(un.exprs.contains(&nm("m")));
        assert!(un.levels.contains(&nm("u")));
    }

    #[test]
    fn test_justifications_compose() {
        let a = Expr::const_(nm("a"), vec![]);
        let s = Substitution::new().assign_expr(nm("m"), a, Justification::assumption(7));
        let mut un = UnassignedMetas::default();
        let (_, j) = s.instantiate_metavars(&Expr::meta(nm("m"), a_const()), &mut un);
        assert!(j.depends_on(7));
    }

    #[test]
    fn test_level_instantiation() {
        let s = Substitution::new().assign_level(
            nm("u"),
            Level::succ(Level::zero()),
            Justification::none(),
        );
        let mut un = UnassignedMetas::default();
        let (r, _) =
            s.instantiate_level_metavars(&Level::succ(Level::meta(nm("u"))), &mut un);
        assert_eq!(r, Level::succ(Level::succ(Level::zero())));
        assert!(un.levels.is_empty());
    }
}
