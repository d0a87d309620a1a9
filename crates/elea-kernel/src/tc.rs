//! Type checker
//!
//! Type inference, weak-head normalization and definitional equality for the
//! kernel term language. The checker does not decide metavariable-headed
//! subproblems itself: it pushes them into a [`ConstraintSink`] and reports
//! success, leaving them to the unifier. `push`/`pop` checkpoint the
//! checker's internal state and are paired with the unifier's case-split
//! install/restore.

use crate::constraint::Constraint;
use crate::env::Environment;
use crate::expr::Expr;
use crate::justification::Justification;
use crate::level::Level;
use crate::name::{Name, NameGenerator};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Minimum stack space to reserve before recursive calls (32 KB).
const MIN_STACK_RED_ZONE: usize = 32 * 1024;

/// Stack size to grow to when running low (1 MB).
const STACK_GROWTH_SIZE: usize = 1024 * 1024;

/// Receiver for the residual constraints emitted during `infer`/`is_def_eq`
pub trait ConstraintSink {
    fn push_constraint(&mut self, c: Constraint);
}

impl ConstraintSink for Vec<Constraint> {
    fn push_constraint(&mut self, c: Constraint) {
        self.push(c);
    }
}

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("unbound variable #{0}")]
    UnboundVariable(u32),
    #[error("unknown constant: {0}")]
    UnknownConst(Name),
    #[error("expected a function type, got: {0:?}")]
    NotAFunction(Box<Expr>),
    #[error("type mismatch: expected {expected:?}, inferred {inferred:?}")]
    TypeMismatch {
        expected: Box<Expr>,
        inferred: Box<Expr>,
    },
    #[error("expected a sort, got: {0:?}")]
    ExpectedSort(Box<Expr>),
}

/// Type checker
pub struct TypeChecker<'e, S: ConstraintSink = Vec<Constraint>> {
    env: &'e Environment,
    ngen: NameGenerator,
    sink: S,
    whnf_cache: FxHashMap<Expr, Expr>,
    trail: Vec<FxHashMap<Expr, Expr>>,
}

impl<'e, S: ConstraintSink> TypeChecker<'e, S> {
    pub fn new(env: &'e Environment, ngen: NameGenerator, sink: S) -> Self {
        Self {
            env,
            ngen,
            sink,
            whnf_cache: FxHashMap::default(),
            trail: Vec::new(),
        }
    }

    /// Checkpoint the checker's state
    pub fn push(&mut self) {
        self.trail.push(self.whnf_cache.clone());
    }

    /// Restore the most recent checkpoint
    pub fn pop(&mut self) {
        if let Some(cache) = self.trail.pop() {
            self.whnf_cache = cache;
        }
    }

    /// Reduce to weak-head normal form: β-reduction plus unfolding of
    /// reducible definitions. Metavariable-headed terms are stuck.
    pub fn whnf(&mut self, e: &Expr) -> Expr {
        if let Some(r) = self.whnf_cache.get(e) {
            return r.clone();
        }
        let r = stacker::maybe_grow(MIN_STACK_RED_ZONE, STACK_GROWTH_SIZE, || self.whnf_core(e));
        self.whnf_cache.insert(e.clone(), r.clone());
        r
    }

    fn whnf_core(&mut self, e: &Expr) -> Expr {
        let (head, args) = e.app_args();
        match &head {
            Expr::Lam(_, _, _, _) if !args.is_empty() => {
                self.whnf(&Expr::beta_app(head.clone(), &args))
            }
            Expr::Const(n, ls) => match self.env.unfold(n, ls) {
                Some(v) => self.whnf(&Expr::mk_app(v, &args)),
                None => e.clone(),
            },
            _ => e.clone(),
        }
    }

    /// Infer the type of an expression.
    ///
    /// Locals and metavariables carry their types inline, so open terms are
    /// checked by replacing binders with fresh locals rather than through a
    /// separate context.
    pub fn infer(&mut self, e: &Expr) -> Result<Expr, TypeError> {
        stacker::maybe_grow(MIN_STACK_RED_ZONE, STACK_GROWTH_SIZE, || self.infer_core(e))
    }

    fn infer_core(&mut self, e: &Expr) -> Result<Expr, TypeError> {
        match e {
            Expr::BVar(i) => Err(TypeError::UnboundVariable(*i)),
            Expr::Local(_, _, ty) | Expr::Meta(_, ty) => Ok((**ty).clone()),
            Expr::Sort(l) => Ok(Expr::Sort(Level::succ(l.clone()))),
            Expr::Const(n, ls) => self
                .env
                .instantiate_type(n, ls)
                .ok_or_else(|| TypeError::UnknownConst(n.clone())),
            Expr::App(f, a) => {
                let f_ty = self.infer(f)?;
                match self.whnf(&f_ty) {
                    Expr::Pi(_, _, dom, body) => {
                        let a_ty = self.infer(a)?;
                        if !self.is_def_eq(&a_ty, &dom, &Justification::none())? {
                            return Err(TypeError::TypeMismatch {
                                expected: Box::new((*dom).clone()),
                                inferred: Box::new(a_ty),
                            });
                        }
                        Ok(body.instantiate(a))
                    }
                    other => Err(TypeError::NotAFunction(Box::new(other))),
                }
            }
            Expr::Lam(n, bi, dom, body) => {
                self.ensure_sort_of(dom)?;
                let local = Expr::local(self.ngen.next(), n.clone(), (**dom).clone());
                let body_ty = self.infer(&body.instantiate(&local))?;
                let body_ty = body_ty.abstract_locals(std::slice::from_ref(&local));
                Ok(Expr::pi(n.clone(), *bi, (**dom).clone(), body_ty))
            }
            Expr::Pi(n, _, dom, body) => {
                let l1 = self.ensure_sort_of(dom)?;
                let local = Expr::local(self.ngen.next(), n.clone(), (**dom).clone());
                let l2 = self.ensure_sort_of(&body.instantiate(&local))?;
                Ok(Expr::Sort(Level::imax(l1, l2)))
            }
            Expr::Macro(def, _) => Ok((*def.type_).clone()),
        }
    }

    /// Infer the type of `e` and require it to be a sort, minting a fresh
    /// level metavariable when the sort is hidden behind a metavariable.
    fn ensure_sort_of(&mut self, e: &Expr) -> Result<Level, TypeError> {
        let ty = self.infer(e)?;
        let ty = self.whnf(&ty);
        match ty {
            Expr::Sort(l) => Ok(l),
            ty if ty.is_meta_app() => {
                let u = Level::meta(self.ngen.next());
                self.sink.push_constraint(Constraint::eq(
                    ty,
                    Expr::sort(u.clone()),
                    Justification::none(),
                ));
                Ok(u)
            }
            ty => Err(TypeError::ExpectedSort(Box::new(ty))),
        }
    }

    /// Definitional equality. Metavariable-headed subproblems are pushed
    /// into the sink and assumed to hold; the unifier revisits them.
    pub fn is_def_eq(
        &mut self,
        a: &Expr,
        b: &Expr,
        j: &Justification,
    ) -> Result<bool, TypeError> {
        stacker::maybe_grow(MIN_STACK_RED_ZONE, STACK_GROWTH_SIZE, || {
            self.is_def_eq_core(a, b, j)
        })
    }

    fn is_def_eq_core(&mut self, a: &Expr, b: &Expr, j: &Justification) -> Result<bool, TypeError> {
        if a == b {
            return Ok(true);
        }
        if a.is_meta_app() || b.is_meta_app() {
            self.sink
                .push_constraint(Constraint::eq(a.clone(), b.clone(), j.clone()));
            return Ok(true);
        }
        let a = self.whnf(a);
        let b = self.whnf(b);
        if a == b {
            return Ok(true);
        }
        match (&a, &b) {
            (Expr::Sort(l1), Expr::Sort(l2)) => Ok(self.level_def_eq(l1, l2, j)),
            (Expr::Const(n1, ls1), Expr::Const(n2, ls2)) => {
                if n1 != n2 || ls1.len() != ls2.len() {
                    return Ok(false);
                }
                for (l1, l2) in ls1.iter().zip(ls2.iter()) {
                    if !self.level_def_eq(l1, l2, j) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Expr::App(f1, a1), Expr::App(f2, a2)) => {
                Ok(self.is_def_eq_core(f1, f2, j)? && self.is_def_eq_core(a1, a2, j)?)
            }
            (Expr::Lam(_, _, d1, b1), Expr::Lam(_, _, d2, b2))
            | (Expr::Pi(_, _, d1, b1), Expr::Pi(_, _, d2, b2)) => {
                Ok(self.is_def_eq_core(d1, d2, j)? && self.is_def_eq_core(b1, b2, j)?)
            }
            (Expr::Macro(m1, cs1), Expr::Macro(m2, cs2)) => {
                if m1 != m2 || cs1.len() != cs2.len() {
                    return Ok(false);
                }
                for (c1, c2) in cs1.iter().zip(cs2.iter()) {
                    if !self.is_def_eq_core(c1, c2, j)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn level_def_eq(&mut self, l1: &Level, l2: &Level, j: &Justification) -> bool {
        if l1 == l2 {
            return true;
        }
        if l1.has_metas() || l2.has_metas() {
            self.sink.push_constraint(Constraint::level_eq(
                l1.clone(),
                l2.clone(),
                j.clone(),
            ));
            return true;
        }
        Level::is_def_eq(l1, l2)
    }
}

impl<'e> TypeChecker<'e, Vec<Constraint>> {
    /// Take the constraints emitted since the last drain
    pub fn drain_constraints(&mut self) -> Vec<Constraint> {
        std::mem::take(&mut self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Declaration;
    use crate::expr::BinderInfo;

    fn nm(s: &str) -> Name {
        Name::from_string(s)
    }

    fn a_const() -> Expr {
        Expr::const_(nm("A"), vec![])
    }

    fn test_env() -> Environment {
        let mut env = Environment::new();
        env.add_decl(Declaration::Axiom {
            name: nm("A"),
            level_params: vec![],
            type_: Expr::type_(),
        })
        .unwrap();
        env.add_decl(Declaration::Axiom {
            name: nm("a"),
            level_params: vec![],
            type_: a_const(),
        })
        .unwrap();
        env.add_decl(Declaration::Axiom {
            name: nm("f"),
            level_params: vec![],
            type_: Expr::arrow(a_const(), a_const()),
        })
        .unwrap();
        // idA : A -> A := fun x => x, reducible
        env.add_decl(Declaration::Definition {
            name: nm("idA"),
            level_params: vec![],
            type_: Expr::arrow(a_const(), a_const()),
            value: Expr::lam(nm("x"), BinderInfo::Default, a_const(), Expr::bvar(0)),
            is_reducible: true,
        })
        .unwrap();
        env
    }

    fn checker(env: &Environment) -> TypeChecker<'_> {
        TypeChecker::new(env, NameGenerator::new(nm("_tc")), Vec::new())
    }

    #[test]
    fn test_whnf_beta() {
        let env = test_env();
        let mut tc = checker(&env);
        let id = Expr::lam(nm("x"), BinderInfo::Default, a_const(), Expr::bvar(0));
        let a = Expr::const_(nm("a"), vec![]);
        assert_eq!(tc.whnf(&Expr::app(id, a.clone())), a);
    }

    #[test]
    fn test_whnf_delta() {
        let env = test_env();
        let mut tc = checker(&env);
        let a = Expr::const_(nm("a"), vec![]);
        let e = Expr::app(Expr::const_(nm("idA"), vec![]), a.clone());
        assert_eq!(tc.whnf(&e), a);
    }

    #[test]
    fn test_whnf_stuck_on_meta() {
        let env = test_env();
        let mut tc = checker(&env);
        let m = Expr::meta(nm("m"), Expr::arrow(a_const(), a_const()));
        let e = Expr::app(m, Expr::const_(nm("a"), vec![]));
        assert_eq!(tc.whnf(&e), e);
    }

    #[test]
    fn test_infer_lambda() {
        let env = test_env();
        let mut tc = checker(&env);
        let id = Expr::lam(nm("x"), BinderInfo::Default, a_const(), Expr::bvar(0));
        let ty = tc.infer(&id).unwrap();
        assert_eq!(ty, Expr::arrow(a_const(), a_const()));
    }

    #[test]
    fn test_infer_app() {
        let env = test_env();
        let mut tc = checker(&env);
        let e = Expr::app(
            Expr::const_(nm("f"), vec![]),
            Expr::const_(nm("a"), vec![]),
        );
        assert_eq!(tc.infer(&e).unwrap(), a_const());
    }

    #[test]
    fn test_infer_app_mismatch() {
        let env = test_env();
        let mut tc = checker(&env);
        // f A is ill-typed: A : Type, f expects A
        let e = Expr::app(Expr::const_(nm("f"), vec![]), a_const());
        assert!(matches!(
            tc.infer(&e),
            Err(TypeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_infer_pi_universe() {
        let env = test_env();
        let mut tc = checker(&env);
        // (x : A) -> A : Sort (imax ...)
        let t = Expr::pi(nm("x"), BinderInfo::Default, a_const(), a_const());
        let ty = tc.infer(&t).unwrap();
        assert!(matches!(ty, Expr::Sort(_)));
    }

    #[test]
    fn test_is_def_eq_emits_constraint_for_meta() {
        let env = test_env();
        let mut tc = checker(&env);
        let m = Expr::meta(nm("m"), a_const());
        let a = Expr::const_(nm("a"), vec![]);
        assert!(tc.is_def_eq(&m, &a, &Justification::none()).unwrap());
        let cs = tc.drain_constraints();
        assert_eq!(cs.len(), 1);
        assert!(matches!(&cs[0], Constraint::Eq(lhs, rhs, _) if *lhs == m && *rhs == a));
    }

    #[test]
    fn test_is_def_eq_decomposes_applications() {
        let env = test_env();
        let mut tc = checker(&env);
        let m = Expr::meta(nm("m"), a_const());
        let lhs = Expr::app(Expr::const_(nm("f"), vec![]), m.clone());
        let rhs = Expr::app(
            Expr::const_(nm("f"), vec![]),
            Expr::const_(nm("a"), vec![]),
        );
        assert!(tc.is_def_eq(&lhs, &rhs, &Justification::none()).unwrap());
        let cs = tc.drain_constraints();
        assert_eq!(cs.len(), 1);
        assert!(matches!(&cs[0], Constraint::Eq(l, _, _) if *l == m));
    }

    #[test]
    fn test_is_def_eq_rigid_mismatch() {
        let env = test_env();
        let mut tc = checker(&env);
        let a = Expr::const_(nm("a"), vec![]);
        let f = Expr::const_(nm("f"), vec![]);
        assert!(!tc.is_def_eq(&a, &f, &Justification::none()).unwrap());
        assert!(tc.drain_constraints().is_empty());
    }

    #[test]
    fn test_is_def_eq_unfolds() {
        let env = test_env();
        let mut tc = checker(&env);
        let a = Expr::const_(nm("a"), vec![]);
        let e = Expr::app(Expr::const_(nm("idA"), vec![]), a.clone());
        assert!(tc.is_def_eq(&e, &a, &Justification::none()).unwrap());
    }

    #[test]
    fn test_push_pop_restores_cache() {
        let env = test_env();
        let mut tc = checker(&env);
        tc.push();
        let a = Expr::const_(nm("a"), vec![]);
        let e = Expr::app(Expr::const_(nm("idA"), vec![]), a.clone());
        assert_eq!(tc.whnf(&e), a);
        tc.pop();
        // still correct after restore
        assert_eq!(tc.whnf(&e), a);
    }
}
