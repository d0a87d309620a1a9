//! Expressions
//!
//! The term language of the kernel: de Bruijn bound variables, typed local
//! constants, universe-polymorphic constants, sorts, lambda/Pi binders,
//! applications, metavariables and opaque macro nodes.
//!
//! Structural equality is α-aware: binder pretty-names and binder annotations
//! are ignored, locals compare by their unique id and metavariables by name
//! (the types they cache are not part of their identity). `Hash` agrees.

use crate::level::Level;
use crate::name::Name;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Binder annotation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinderInfo {
    #[default]
    Default,
    Implicit,
    StrictImplicit,
    InstImplicit,
}

/// Tag of an opaque macro node: an identity plus the result type, so macro
/// applications can be typed without consulting the environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MacroDef {
    pub name: Name,
    pub type_: Arc<Expr>,
}

impl MacroDef {
    pub fn new(name: Name, type_: Expr) -> Self {
        Self {
            name,
            type_: Arc::new(type_),
        }
    }
}

impl PartialEq for MacroDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for MacroDef {}

/// Expression
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Expr {
    /// Bound variable (de Bruijn index)
    BVar(u32),
    /// Local constant: unique id, pretty name, type
    Local(Name, Name, Arc<Expr>),
    /// Global constant with universe level arguments
    Const(Name, Vec<Level>),
    /// Sort (universe)
    Sort(Level),
    /// Metavariable with its declared type
    Meta(Name, Arc<Expr>),
    /// Application
    App(Arc<Expr>, Arc<Expr>),
    /// Lambda: pretty name, binder info, domain, body
    Lam(Name, BinderInfo, Arc<Expr>, Arc<Expr>),
    /// Pi: pretty name, binder info, domain, body
    Pi(Name, BinderInfo, Arc<Expr>, Arc<Expr>),
    /// Opaque macro node with children
    Macro(MacroDef, Vec<Expr>),
}

impl PartialEq for Expr {
    fn eq(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::BVar(a), Expr::BVar(b)) => a == b,
            (Expr::Local(a, _, _), Expr::Local(b, _, _)) => a == b,
            (Expr::Const(n1, ls1), Expr::Const(n2, ls2)) => n1 == n2 && ls1 == ls2,
            (Expr::Sort(l1), Expr::Sort(l2)) => l1 == l2,
            (Expr::Meta(a, _), Expr::Meta(b, _)) => a == b,
            (Expr::App(f1, a1), Expr::App(f2, a2)) => f1 == f2 && a1 == a2,
            (Expr::Lam(_, _, d1, b1), Expr::Lam(_, _, d2, b2))
            | (Expr::Pi(_, _, d1, b1), Expr::Pi(_, _, d2, b2)) => d1 == d2 && b1 == b2,
            (Expr::Macro(m1, cs1), Expr::Macro(m2, cs2)) => m1 == m2 && cs1 == cs2,
            _ => false,
        }
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Expr::BVar(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            Expr::Local(id, _, _) => {
                1u8.hash(state);
                id.hash(state);
            }
            Expr::Const(n, ls) => {
                2u8.hash(state);
                n.hash(state);
                ls.hash(state);
            }
            Expr::Sort(l) => {
                3u8.hash(state);
                l.hash(state);
            }
            Expr::Meta(n, _) => {
                4u8.hash(state);
                n.hash(state);
            }
            Expr::App(f, a) => {
                5u8.hash(state);
                f.hash(state);
                a.hash(state);
            }
            Expr::Lam(_, _, d, b) => {
                6u8.hash(state);
                d.hash(state);
                b.hash(state);
            }
            Expr::Pi(_, _, d, b) => {
                7u8.hash(state);
                d.hash(state);
                b.hash(state);
            }
            Expr::Macro(m, cs) => {
                8u8.hash(state);
                m.name.hash(state);
                cs.hash(state);
            }
        }
    }
}

impl Expr {
    pub fn bvar(i: u32) -> Self {
        Expr::BVar(i)
    }

    pub fn local(id: Name, pp_name: Name, type_: Expr) -> Self {
        Expr::Local(id, pp_name, Arc::new(type_))
    }

    pub fn const_(name: Name, levels: Vec<Level>) -> Self {
        Expr::Const(name, levels)
    }

    pub fn sort(l: Level) -> Self {
        Expr::Sort(l)
    }

    /// Sort 0
    pub fn prop() -> Self {
        Expr::Sort(Level::zero())
    }

    /// Sort 1
    pub fn type_() -> Self {
        Expr::Sort(Level::succ(Level::zero()))
    }

    pub fn meta(name: Name, type_: Expr) -> Self {
        Expr::Meta(name, Arc::new(type_))
    }

    pub fn app(f: Expr, a: Expr) -> Self {
        Expr::App(Arc::new(f), Arc::new(a))
    }

    pub fn lam(name: Name, bi: BinderInfo, domain: Expr, body: Expr) -> Self {
        Expr::Lam(name, bi, Arc::new(domain), Arc::new(body))
    }

    pub fn pi(name: Name, bi: BinderInfo, domain: Expr, body: Expr) -> Self {
        Expr::Pi(name, bi, Arc::new(domain), Arc::new(body))
    }

    /// Non-dependent function type `a -> b`
    pub fn arrow(a: Expr, b: Expr) -> Self {
        let body = b.lift_loose_bvars(0, 1);
        Expr::pi(Name::anon(), BinderInfo::Default, a, body)
    }

    pub fn macro_(def: MacroDef, children: Vec<Expr>) -> Self {
        Expr::Macro(def, children)
    }

    /// The head of the application spine
    pub fn app_fn(&self) -> &Expr {
        let mut e = self;
        while let Expr::App(f, _) = e {
            e = f;
        }
        e
    }

    /// Unfold the application spine into head and arguments (outermost last)
    pub fn app_args(&self) -> (Expr, Vec<Expr>) {
        let mut args = Vec::new();
        let mut e = self;
        while let Expr::App(f, a) = e {
            args.push((**a).clone());
            e = f;
        }
        args.reverse();
        (e.clone(), args)
    }

    /// Apply `f` to `args` left to right
    pub fn mk_app(f: Expr, args: &[Expr]) -> Expr {
        args.iter().fold(f, |acc, a| Expr::app(acc, a.clone()))
    }

    /// The term `f #(n-1) ... #0`
    pub fn mk_app_bvars(f: Expr, n: u32) -> Expr {
        let mut r = f;
        for i in (0..n).rev() {
            r = Expr::app(r, Expr::bvar(i));
        }
        r
    }

    /// Check if the head of the application spine is a metavariable
    pub fn is_meta_app(&self) -> bool {
        matches!(self.app_fn(), Expr::Meta(_, _))
    }

    /// Check if the expression contains any metavariable node or any level
    /// metavariable inside a sort or constant
    pub fn has_metas(&self) -> bool {
        match self {
            Expr::BVar(_) | Expr::Local(_, _, _) => false,
            Expr::Meta(_, _) => true,
            Expr::Sort(l) => l.has_metas(),
            Expr::Const(_, ls) => ls.iter().any(Level::has_metas),
            Expr::App(f, a) => f.has_metas() || a.has_metas(),
            Expr::Lam(_, _, d, b) | Expr::Pi(_, _, d, b) => d.has_metas() || b.has_metas(),
            Expr::Macro(_, cs) => cs.iter().any(Expr::has_metas),
        }
    }

    /// Check if the expression contains any local constant
    pub fn has_locals(&self) -> bool {
        match self {
            Expr::Local(_, _, _) => true,
            Expr::BVar(_) | Expr::Const(_, _) | Expr::Sort(_) | Expr::Meta(_, _) => false,
            Expr::App(f, a) => f.has_locals() || a.has_locals(),
            Expr::Lam(_, _, d, b) | Expr::Pi(_, _, d, b) => d.has_locals() || b.has_locals(),
            Expr::Macro(_, cs) => cs.iter().any(Expr::has_locals),
        }
    }

    /// Lift loose bound variables >= `start` by `amount`
    #[must_use]
    pub fn lift_loose_bvars(&self, start: u32, amount: u32) -> Expr {
        if amount == 0 {
            return self.clone();
        }
        match self {
            Expr::BVar(i) if *i >= start => Expr::BVar(i + amount),
            Expr::BVar(_)
            | Expr::Local(_, _, _)
            | Expr::Const(_, _)
            | Expr::Sort(_)
            | Expr::Meta(_, _) => self.clone(),
            Expr::App(f, a) => Expr::app(
                f.lift_loose_bvars(start, amount),
                a.lift_loose_bvars(start, amount),
            ),
            Expr::Lam(n, bi, d, b) => Expr::lam(
                n.clone(),
                *bi,
                d.lift_loose_bvars(start, amount),
                b.lift_loose_bvars(start + 1, amount),
            ),
            Expr::Pi(n, bi, d, b) => Expr::pi(
                n.clone(),
                *bi,
                d.lift_loose_bvars(start, amount),
                b.lift_loose_bvars(start + 1, amount),
            ),
            Expr::Macro(def, cs) => Expr::Macro(
                def.clone(),
                cs.iter()
                    .map(|c| c.lift_loose_bvars(start, amount))
                    .collect(),
            ),
        }
    }

    /// Substitute the outermost bound variable by `v` (β-step body)
    #[must_use]
    pub fn instantiate(&self, v: &Expr) -> Expr {
        self.instantiate_core(v, 0)
    }

    fn instantiate_core(&self, v: &Expr, depth: u32) -> Expr {
        match self {
            Expr::BVar(i) => {
                if *i == depth {
                    v.lift_loose_bvars(0, depth)
                } else if *i > depth {
                    Expr::BVar(i - 1)
                } else {
                    self.clone()
                }
            }
            Expr::Local(_, _, _) | Expr::Const(_, _) | Expr::Sort(_) | Expr::Meta(_, _) => {
                self.clone()
            }
            Expr::App(f, a) => {
                Expr::app(f.instantiate_core(v, depth), a.instantiate_core(v, depth))
            }
            Expr::Lam(n, bi, d, b) => Expr::lam(
                n.clone(),
                *bi,
                d.instantiate_core(v, depth),
                b.instantiate_core(v, depth + 1),
            ),
            Expr::Pi(n, bi, d, b) => Expr::pi(
                n.clone(),
                *bi,
                d.instantiate_core(v, depth),
                b.instantiate_core(v, depth + 1),
            ),
            Expr::Macro(def, cs) => Expr::Macro(
                def.clone(),
                cs.iter().map(|c| c.instantiate_core(v, depth)).collect(),
            ),
        }
    }

    /// Replace the locals in `locals` by bound variables: the last local in
    /// the list becomes `#0` at the top level.
    #[must_use]
    pub fn abstract_locals(&self, locals: &[Expr]) -> Expr {
        self.abstract_locals_core(locals, 0)
    }

    fn abstract_locals_core(&self, locals: &[Expr], depth: u32) -> Expr {
        match self {
            Expr::Local(_, _, _) => {
                if let Some(i) = locals.iter().position(|l| l == self) {
                    Expr::BVar(depth + (locals.len() - 1 - i) as u32)
                } else {
                    self.clone()
                }
            }
            Expr::BVar(_) | Expr::Const(_, _) | Expr::Sort(_) | Expr::Meta(_, _) => self.clone(),
            Expr::App(f, a) => Expr::app(
                f.abstract_locals_core(locals, depth),
                a.abstract_locals_core(locals, depth),
            ),
            Expr::Lam(n, bi, d, b) => Expr::lam(
                n.clone(),
                *bi,
                d.abstract_locals_core(locals, depth),
                b.abstract_locals_core(locals, depth + 1),
            ),
            Expr::Pi(n, bi, d, b) => Expr::pi(
                n.clone(),
                *bi,
                d.abstract_locals_core(locals, depth),
                b.abstract_locals_core(locals, depth + 1),
            ),
            Expr::Macro(def, cs) => Expr::Macro(
                def.clone(),
                cs.iter()
                    .map(|c| c.abstract_locals_core(locals, depth))
                    .collect(),
            ),
        }
    }

    /// Apply `f` to `args`, β-reducing as long as the head is a lambda
    pub fn beta_app(f: Expr, args: &[Expr]) -> Expr {
        let mut f = f;
        let mut i = 0;
        while i < args.len() {
            match &f {
                Expr::Lam(_, _, _, body) => {
                    f = body.instantiate(&args[i]);
                    i += 1;
                }
                _ => break,
            }
        }
        Expr::mk_app(f, &args[i..])
    }

    /// Number of nested Pi binders
    pub fn pi_arity(&self) -> u32 {
        let mut r = 0;
        let mut e = self;
        while let Expr::Pi(_, _, _, b) = e {
            e = b;
            r += 1;
        }
        r
    }

    /// Given `Pi ctx, r`, return `Pi ctx, new_range`
    #[must_use]
    pub fn replace_pi_range(&self, new_range: &Expr) -> Expr {
        match self {
            Expr::Pi(n, bi, d, b) => Expr::pi(
                n.clone(),
                *bi,
                (**d).clone(),
                b.replace_pi_range(new_range),
            ),
            _ => new_range.clone(),
        }
    }

    /// Given `Pi (x_1 : A_1) ... (x_n : A_n), B`, return
    /// `fun (x_1 : A_1) ... (x_n : A_n), v`
    #[must_use]
    pub fn lambda_for_telescope(&self, v: &Expr) -> Expr {
        match self {
            Expr::Pi(n, bi, d, b) => Expr::lam(
                n.clone(),
                *bi,
                (**d).clone(),
                b.lambda_for_telescope(v),
            ),
            _ => v.clone(),
        }
    }

    /// Substitute universe parameters throughout the expression
    #[must_use]
    pub fn instantiate_level_params(&self, subst: &[(Name, Level)]) -> Expr {
        match self {
            Expr::BVar(_) => self.clone(),
            Expr::Local(id, pp, ty) => Expr::Local(
                id.clone(),
                pp.clone(),
                Arc::new(ty.instantiate_level_params(subst)),
            ),
            Expr::Const(n, ls) => Expr::Const(
                n.clone(),
                ls.iter().map(|l| l.substitute_params(subst)).collect(),
            ),
            Expr::Sort(l) => Expr::Sort(l.substitute_params(subst)),
            Expr::Meta(n, ty) => {
                Expr::Meta(n.clone(), Arc::new(ty.instantiate_level_params(subst)))
            }
            Expr::App(f, a) => Expr::app(
                f.instantiate_level_params(subst),
                a.instantiate_level_params(subst),
            ),
            Expr::Lam(n, bi, d, b) => Expr::lam(
                n.clone(),
                *bi,
                d.instantiate_level_params(subst),
                b.instantiate_level_params(subst),
            ),
            Expr::Pi(n, bi, d, b) => Expr::pi(
                n.clone(),
                *bi,
                d.instantiate_level_params(subst),
                b.instantiate_level_params(subst),
            ),
            Expr::Macro(def, cs) => Expr::Macro(
                def.clone(),
                cs.iter()
                    .map(|c| c.instantiate_level_params(subst))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nm(s: &str) -> Name {
        Name::from_string(s)
    }

    fn a_const() -> Expr {
        Expr::const_(nm("A"), vec![])
    }

    #[test]
    fn test_alpha_equality_ignores_binder_names() {
        let id_x = Expr::lam(nm("x"), BinderInfo::Default, a_const(), Expr::bvar(0));
        let id_y = Expr::lam(nm("y"), BinderInfo::Implicit, a_const(), Expr::bvar(0));
        assert_eq!(id_x, id_y);
    }

    #[test]
    fn test_locals_compare_by_id() {
        let x1 = Expr::local(nm("x.1"), nm("x"), a_const());
        let x2 = Expr::local(nm("x.2"), nm("x"), a_const());
        assert_ne!(x1, x2);
        let x1_again = Expr::local(nm("x.1"), nm("x"), Expr::type_());
        assert_eq!(x1, x1_again);
    }

    #[test]
    fn test_app_spine() {
        let f = Expr::const_(nm("f"), vec![]);
        let x = Expr::local(nm("x.0"), nm("x"), a_const());
        let y = Expr::local(nm("y.0"), nm("y"), a_const());
        let e = Expr::mk_app(f.clone(), &[x.clone(), y.clone()]);
        let (head, args) = e.app_args();
        assert_eq!(head, f);
        assert_eq!(args, vec![x, y]);
        assert_eq!(*e.app_fn(), f);
    }

    #[test]
    fn test_abstract_then_instantiate() {
        let x = Expr::local(nm("x.0"), nm("x"), a_const());
        let y = Expr::local(nm("y.0"), nm("y"), a_const());
        let f = Expr::const_(nm("f"), vec![]);
        let e = Expr::mk_app(f.clone(), &[x.clone(), y.clone()]);

        // abstract [x, y]: x -> #1, y -> #0
        let abstracted = e.abstract_locals(&[x.clone(), y.clone()]);
        assert_eq!(
            abstracted,
            Expr::mk_app(f, &[Expr::bvar(1), Expr::bvar(0)])
        );

        // instantiate #0 with y, then #0 (previously #1) with x
        let restored = abstracted.instantiate(&y).instantiate(&x);
        assert_eq!(restored, e);
    }

    #[test]
    fn test_abstract_under_binder_shifts() {
        let x = Expr::local(nm("x.0"), nm("x"), a_const());
        // fun (z : A) => x
        let e = Expr::lam(nm("z"), BinderInfo::Default, a_const(), x.clone());
        let abstracted = e.abstract_locals(&[x]);
        // x under one binder becomes #1
        assert_eq!(
            abstracted,
            Expr::lam(nm("z"), BinderInfo::Default, a_const(), Expr::bvar(1))
        );
    }

    #[test]
    fn test_beta_app() {
        // (fun x y => x) a b = a
        let two_arg = Expr::lam(
            nm("x"),
            BinderInfo::Default,
            a_const(),
            Expr::lam(nm("y"), BinderInfo::Default, a_const(), Expr::bvar(1)),
        );
        let a = Expr::const_(nm("a"), vec![]);
        let b = Expr::const_(nm("b"), vec![]);
        assert_eq!(Expr::beta_app(two_arg.clone(), &[a.clone(), b]), a);

        // under-application leaves a lambda
        let partial = Expr::beta_app(two_arg, &[a.clone()]);
        assert!(matches!(partial, Expr::Lam(_, _, _, _)));
    }

    #[test]
    fn test_telescope_helpers() {
        // Pi (x : A) (y : A), A
        let t = Expr::pi(
            nm("x"),
            BinderInfo::Default,
            a_const(),
            Expr::pi(nm("y"), BinderInfo::Default, a_const(), a_const()),
        );
        assert_eq!(t.pi_arity(), 2);

        let replaced = t.replace_pi_range(&Expr::prop());
        assert_eq!(replaced.pi_arity(), 2);
        assert_eq!(
            replaced,
            Expr::pi(
                nm("x"),
                BinderInfo::Default,
                a_const(),
                Expr::pi(nm("y"), BinderInfo::Default, a_const(), Expr::prop()),
            )
        );

        // fun (x : A) (y : A), #1
        let lam = t.lambda_for_telescope(&Expr::bvar(1));
        assert_eq!(
            lam,
            Expr::lam(
                nm("x"),
                BinderInfo::Default,
                a_const(),
                Expr::lam(nm("y"), BinderInfo::Default, a_const(), Expr::bvar(1)),
            )
        );
    }

    #[test]
    fn test_mk_app_bvars() {
        let f = Expr::const_(nm("f"), vec![]);
        let e = Expr::mk_app_bvars(f.clone(), 2);
        assert_eq!(e, Expr::mk_app(f, &[Expr::bvar(1), Expr::bvar(0)]));
    }

    #[test]
    fn test_has_metas() {
        let m = Expr::meta(nm("m"), a_const());
        assert!(m.has_metas());
        assert!(Expr::app(Expr::const_(nm("f"), vec![]), m).has_metas());
        assert!(!a_const().has_metas());
        assert!(Expr::sort(Level::meta(nm("u"))).has_metas());
    }

    #[test]
    fn test_instantiate_level_params() {
        let u = nm("u");
        let c = Expr::const_(nm("List"), vec![Level::param(u.clone())]);
        let inst = c.instantiate_level_params(&[(u, Level::succ(Level::zero()))]);
        assert_eq!(
            inst,
            Expr::const_(nm("List"), vec![Level::succ(Level::zero())])
        );
    }
}
