//! Simple unifier
//!
//! Side-effect-free first-order pattern unification over terms and levels.
//! It either solves a constraint outright, refutes it, or reports that the
//! full engine is needed.

use elea_kernel::{BinderInfo, Constraint, Expr, Justification, Level, Substitution};

/// Outcome of a simple unification attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnifyStatus {
    /// The constraint was solved and the substitution extended
    Solved,
    /// No extension of the substitution can solve the constraint
    Failed,
    /// Too complex for the simple unifier
    Unsupported,
}

/// If `e` is `?m` or `?m l_1 ... l_n` with `l_i` pairwise-distinct locals,
/// return the metavariable and its arguments.
pub fn is_simple_meta(e: &Expr) -> Option<(Expr, Vec<Expr>)> {
    let (head, args) = e.app_args();
    if !matches!(head, Expr::Meta(_, _)) {
        return None;
    }
    for (i, arg) in args.iter().enumerate() {
        if !matches!(arg, Expr::Local(_, _, _)) || args[..i].contains(arg) {
            return None;
        }
    }
    Some((head, args))
}

/// Check that `e` does not contain the metavariable `m` and that every local
/// constant in `e` is among `locals`.
pub fn occurs_context_check(e: &Expr, m: &Expr, locals: &[Expr]) -> bool {
    match e {
        Expr::BVar(_) | Expr::Const(_, _) | Expr::Sort(_) => true,
        Expr::Local(_, _, _) => locals.contains(e),
        Expr::Meta(_, ty) => e != m && occurs_context_check(ty, m, locals),
        Expr::App(f, a) => {
            occurs_context_check(f, m, locals) && occurs_context_check(a, m, locals)
        }
        Expr::Lam(_, _, d, b) | Expr::Pi(_, _, d, b) => {
            occurs_context_check(d, m, locals) && occurs_context_check(b, m, locals)
        }
        Expr::Macro(_, cs) => cs.iter().all(|c| occurs_context_check(c, m, locals)),
    }
}

/// Abstract the locals in `e` and wrap the result in lambdas carrying the
/// locals' pretty names and types.
pub(crate) fn lambda_abstract_locals(e: &Expr, locals: &[Expr]) -> Expr {
    let mut v = e.abstract_locals(locals);
    for l in locals.iter().rev() {
        match l {
            Expr::Local(_, pp, ty) => {
                v = Expr::lam(pp.clone(), BinderInfo::Default, (**ty).clone(), v);
            }
            _ => unreachable!("lambda_abstract_locals: argument is not a local"),
        }
    }
    v
}

fn unify_simple_core(
    s: &Substitution,
    lhs: &Expr,
    rhs: &Expr,
    j: &Justification,
) -> (UnifyStatus, Substitution) {
    let Some((m, locals)) = is_simple_meta(lhs) else {
        return (UnifyStatus::Unsupported, s.clone());
    };
    if rhs.is_meta_app() && *rhs.app_fn() == m {
        return (UnifyStatus::Unsupported, s.clone());
    }
    if !occurs_context_check(rhs, &m, &locals) {
        return (UnifyStatus::Failed, s.clone());
    }
    let v = lambda_abstract_locals(rhs, &locals);
    let Expr::Meta(name, _) = &m else {
        unreachable!("is_simple_meta returned a non-metavariable head");
    };
    (
        UnifyStatus::Solved,
        s.assign_expr(name.clone(), v, j.clone()),
    )
}

/// Try to solve `lhs =?= rhs` without search.
pub fn unify_simple(
    s: &Substitution,
    lhs: &Expr,
    rhs: &Expr,
    j: &Justification,
) -> (UnifyStatus, Substitution) {
    if lhs == rhs {
        (UnifyStatus::Solved, s.clone())
    } else if !lhs.has_metas() && !rhs.has_metas() {
        (UnifyStatus::Failed, s.clone())
    } else if lhs.is_meta_app() {
        unify_simple_core(s, lhs, rhs, j)
    } else if rhs.is_meta_app() {
        unify_simple_core(s, rhs, lhs, j)
    } else {
        (UnifyStatus::Unsupported, s.clone())
    }
}

fn unify_simple_levels_core(
    s: &Substitution,
    lhs: &Level,
    rhs: &Level,
    j: &Justification,
) -> (UnifyStatus, Substitution) {
    let Level::Meta(name) = lhs else {
        unreachable!("unify_simple_levels_core: lhs is not a level metavariable");
    };
    if rhs.occurs_meta(name) {
        // a strict occurrence (under an outer succ) can never be repaired
        if rhs.is_succ() {
            return (UnifyStatus::Failed, s.clone());
        }
        return (UnifyStatus::Unsupported, s.clone());
    }
    (
        UnifyStatus::Solved,
        s.assign_level(name.clone(), rhs.clone(), j.clone()),
    )
}

/// Try to solve `lhs =?= rhs` over universe levels without search.
pub fn unify_simple_levels(
    s: &Substitution,
    lhs: &Level,
    rhs: &Level,
    j: &Justification,
) -> (UnifyStatus, Substitution) {
    if lhs == rhs {
        (UnifyStatus::Solved, s.clone())
    } else if !lhs.has_metas() && !rhs.has_metas() {
        (UnifyStatus::Failed, s.clone())
    } else if lhs.is_meta() {
        unify_simple_levels_core(s, lhs, rhs, j)
    } else if rhs.is_meta() {
        unify_simple_levels_core(s, rhs, lhs, j)
    } else if let (Some(a), Some(b)) = (lhs.succ_of(), rhs.succ_of()) {
        unify_simple_levels(s, a, b, j)
    } else {
        (UnifyStatus::Unsupported, s.clone())
    }
}

/// Dispatch a constraint to the appropriate simple unifier.
pub fn unify_simple_constraint(s: &Substitution, c: &Constraint) -> (UnifyStatus, Substitution) {
    match c {
        Constraint::Eq(lhs, rhs, j) => unify_simple(s, lhs, rhs, j),
        Constraint::LevelEq(lhs, rhs, j) => unify_simple_levels(s, lhs, rhs, j),
        Constraint::Choice { .. } => (UnifyStatus::Unsupported, s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elea_kernel::{Name, UnassignedMetas};

    fn nm(s: &str) -> Name {
        Name::from_string(s)
    }

    fn a_ty() -> Expr {
        Expr::const_(nm("A"), vec![])
    }

    fn local(id: &str) -> Expr {
        Expr::local(nm(id), nm(id), a_ty())
    }

    fn meta(id: &str) -> Expr {
        Expr::meta(nm(id), a_ty())
    }

    #[test]
    fn test_equal_sides_solved() {
        let s = Substitution::new();
        let a = Expr::const_(nm("a"), vec![]);
        let (st, _) = unify_simple(&s, &a, &a, &Justification::none());
        assert_eq!(st, UnifyStatus::Solved);
    }

    #[test]
    fn test_concrete_mismatch_failed() {
        let s = Substitution::new();
        let a = Expr::const_(nm("a"), vec![]);
        let b = Expr::const_(nm("b"), vec![]);
        let (st, _) = unify_simple(&s, &a, &b, &Justification::none());
        assert_eq!(st, UnifyStatus::Failed);
    }

    #[test]
    fn test_pattern_assignment() {
        let s = Substitution::new();
        let x = local("x.0");
        let y = local("y.0");
        let lhs = Expr::mk_app(meta("m"), &[x.clone(), y.clone()]);
        let (st, s2) = unify_simple(&s, &lhs, &x, &Justification::none());
        assert_eq!(st, UnifyStatus::Solved);

        // ?m := fun x y => x
        let mut un = UnassignedMetas::default();
        let (v, _) = s2.instantiate_metavars(&meta("m"), &mut un);
        let expected = Expr::lam(
            nm("x"),
            BinderInfo::Default,
            a_ty(),
            Expr::lam(nm("y"), BinderInfo::Default, a_ty(), Expr::bvar(1)),
        );
        assert_eq!(v, expected);
    }

    #[test]
    fn test_repeated_locals_unsupported() {
        let s = Substitution::new();
        let x = local("x.0");
        let lhs = Expr::mk_app(meta("m"), &[x.clone(), x.clone()]);
        let (st, _) = unify_simple(&s, &lhs, &x, &Justification::none());
        assert_eq!(st, UnifyStatus::Unsupported);
    }

    #[test]
    fn test_occurs_check_fails() {
        let s = Substitution::new();
        let m = meta("m");
        let rhs = Expr::app(Expr::const_(nm("g"), vec![]), m.clone());
        let (st, _) = unify_simple(&s, &m, &rhs, &Justification::none());
        assert_eq!(st, UnifyStatus::Failed);
    }

    #[test]
    fn test_context_check_fails() {
        let s = Substitution::new();
        let x = local("x.0");
        let y = local("y.0");
        // ?m x =?= y: y escapes the argument list
        let lhs = Expr::app(meta("m"), x);
        let (st, _) = unify_simple(&s, &lhs, &y, &Justification::none());
        assert_eq!(st, UnifyStatus::Failed);
    }

    #[test]
    fn test_same_head_flex_flex_unsupported() {
        let s = Substitution::new();
        let x = local("x.0");
        let y = local("y.0");
        let lhs = Expr::app(meta("m"), x);
        let rhs = Expr::app(meta("m"), y);
        let (st, _) = unify_simple(&s, &lhs, &rhs, &Justification::none());
        assert_eq!(st, UnifyStatus::Unsupported);
    }

    #[test]
    fn test_rigid_rigid_unsupported() {
        let s = Substitution::new();
        let f = Expr::const_(nm("f"), vec![]);
        let lhs = Expr::app(f.clone(), meta("m"));
        let rhs = Expr::app(f, Expr::const_(nm("a"), vec![]));
        let (st, _) = unify_simple(&s, &lhs, &rhs, &Justification::none());
        assert_eq!(st, UnifyStatus::Unsupported);
    }

    #[test]
    fn test_levels_succ_peeling() {
        let s = Substitution::new();
        let u = Level::meta(nm("u"));
        let v = Level::param(nm("v"));
        let lhs = Level::succ(u.clone());
        let rhs = Level::succ(Level::succ(v.clone()));
        let (st, s2) = unify_simple_levels(&s, &lhs, &rhs, &Justification::none());
        assert_eq!(st, UnifyStatus::Solved);
        assert_eq!(s2.get_level(&nm("u")).unwrap().0, Level::succ(v));
    }

    #[test]
    fn test_levels_occurs_under_succ_fails() {
        let s = Substitution::new();
        let u = Level::meta(nm("u"));
        let rhs = Level::succ(u.clone());
        let (st, _) = unify_simple_levels(&s, &u, &rhs, &Justification::none());
        assert_eq!(st, UnifyStatus::Failed);
    }

    #[test]
    fn test_levels_occurs_in_max_unsupported() {
        let s = Substitution::new();
        let u = Level::meta(nm("u"));
        let v = Level::param(nm("v"));
        let rhs = Level::Max(u.clone().into(), v.into());
        let (st, _) = unify_simple_levels(&s, &u, &rhs, &Justification::none());
        assert_eq!(st, UnifyStatus::Unsupported);
    }

    #[test]
    fn test_levels_concrete_mismatch() {
        let s = Substitution::new();
        let one = Level::succ(Level::zero());
        let (st, _) = unify_simple_levels(&s, &Level::zero(), &one, &Justification::none());
        assert_eq!(st, UnifyStatus::Failed);
    }
}
