//! Unification engine
//!
//! Simultaneous higher-order unification: a priority queue of constraints,
//! occurrence indices that re-awaken constraints when a metavariable they
//! mention is assigned, a stack of snapshotting case-split frames (plugin,
//! choice, higher-order), and justification-directed conflict resolution.
//!
//! The queue, the indices and the substitution are persistent structures, so
//! a case-split frame captures the whole search state in O(1).

use crate::simple::{is_simple_meta, lambda_abstract_locals, occurs_context_check};
use crate::{UnifierConfig, UnifierPlugin, UnifyError};
use elea_kernel::{
    AlternativeSeq, ChoiceAlternative, Constraint, Environment, Expr, Justification, Level, Name,
    NameGenerator, Substitution, TypeChecker, UnassignedMetas,
};
use im::{OrdMap, OrdSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// First constraint index of the delayed priority class
const FIRST_DELAYED: u64 = 1 << 28;
/// First constraint index of the very-delayed priority class
const FIRST_VERY_DELAYED: u64 = 1 << 30;

/// Outcome of trying the pattern rule on one orientation of an equation
enum MetaEqStatus {
    Assigned,
    Failed,
    Continue,
}

/// Snapshot of the searchable state, captured when a case split is opened
#[derive(Clone)]
struct Snapshot {
    subst: Substitution,
    cnstrs: OrdMap<u64, Constraint>,
    mvar_occs: OrdMap<Name, OrdSet<u64>>,
    mlvl_occs: OrdMap<Name, OrdSet<u64>>,
}

enum CaseSplitKind {
    /// Remaining alternatives produced by the plugin
    Plugin { tail: crate::ConstraintSeq },
    /// Remaining candidates of a choice constraint
    Choice {
        mvar: Expr,
        jst: Justification,
        tail: AlternativeSeq,
    },
    /// Remaining branch sets of a flex-rigid split
    HigherOrder {
        remaining: std::vec::IntoIter<Vec<Constraint>>,
    },
}

struct CaseSplit {
    /// Assumption tagging the branch currently being explored
    assumption_idx: u64,
    /// Accumulated justifications of the branches that failed
    failed: Justification,
    snapshot: Snapshot,
    kind: CaseSplitKind,
}

enum NextAlt {
    Constraints(Vec<Constraint>),
    Choice(ChoiceAlternative),
    Exhausted,
}

pub(crate) struct Unifier<'e> {
    ngen: NameGenerator,
    subst: Substitution,
    plugin: UnifierPlugin,
    tc: TypeChecker<'e, Vec<Constraint>>,
    use_exceptions: bool,
    max_steps: u32,
    num_steps: u32,
    interrupt: Option<Arc<AtomicBool>>,
    /// True until the first solution has been produced
    first: bool,
    /// Initial constraints, processed on the first pull
    pending: Vec<Constraint>,
    bootstrapped: bool,
    next_assumption_idx: u64,
    next_cidx: u64,
    cnstrs: OrdMap<u64, Constraint>,
    mvar_occs: OrdMap<Name, OrdSet<u64>>,
    mlvl_occs: OrdMap<Name, OrdSet<u64>>,
    case_splits: Vec<CaseSplit>,
    conflict: Option<Justification>,
}

impl<'e> Unifier<'e> {
    pub fn new(
        env: &'e Environment,
        constraints: Vec<Constraint>,
        mut ngen: NameGenerator,
        subst: Substitution,
        plugin: UnifierPlugin,
        config: &UnifierConfig,
    ) -> Self {
        let tc = TypeChecker::new(env, ngen.child(), Vec::new());
        Unifier {
            ngen,
            subst,
            plugin,
            tc,
            use_exceptions: config.use_exceptions,
            max_steps: config.max_steps,
            num_steps: 0,
            interrupt: config.interrupt.clone(),
            first: true,
            pending: constraints,
            bootstrapped: false,
            next_assumption_idx: 0,
            next_cidx: 0,
            cnstrs: OrdMap::new(),
            mvar_occs: OrdMap::new(),
            mlvl_occs: OrdMap::new(),
            case_splits: Vec::new(),
            conflict: None,
        }
    }

    fn check_system(&mut self) -> Result<(), UnifyError> {
        if let Some(flag) = &self.interrupt {
            if flag.load(Ordering::Relaxed) {
                return Err(UnifyError::Interrupted);
            }
        }
        if self.num_steps > self.max_steps {
            return Err(UnifyError::MaxSteps(self.max_steps));
        }
        self.num_steps += 1;
        Ok(())
    }

    fn in_conflict(&self) -> bool {
        self.conflict.is_some()
    }

    fn set_conflict(&mut self, j: Justification) {
        trace!(conflict = %j, "conflict");
        self.conflict = Some(j);
    }

    fn update_conflict(&mut self, j: Justification) {
        let cur = self.conflict.take().unwrap_or_default();
        self.conflict = Some(Justification::compose(&cur, &j));
    }

    // ------------------------------------------------------------------
    // Auxiliary metavariables for imitation
    // ------------------------------------------------------------------

    /// For `t = Pi (x_1 : A_1) ... (x_n : A_n), B`, a fresh metavariable of
    /// type `Pi (x_1 : A_1) ... (x_n : A_n), Sort ?u` with `?u` fresh.
    fn mk_aux_type_meta_for(&mut self, t: &Expr) -> Expr {
        let u = Level::meta(self.ngen.next());
        let ty = t.replace_pi_range(&Expr::sort(u));
        Expr::meta(self.ngen.next(), ty)
    }

    /// For `t = Pi (x_1 : A_1) ... (x_n : A_n), B`, a fresh metavariable of
    /// type `Pi (x_1 : A_1) ... (x_n : A_n), ?m2 x_1 ... x_n` where `?m2` is
    /// a fresh type metavariable over the same telescope.
    fn mk_aux_meta_for(&mut self, t: &Expr) -> Expr {
        let arity = t.pi_arity();
        let range = Expr::mk_app_bvars(self.mk_aux_type_meta_for(t), arity);
        let ty = t.replace_pi_range(&range);
        Expr::meta(self.ngen.next(), ty)
    }

    // ------------------------------------------------------------------
    // Constraint queue and occurrence indices
    // ------------------------------------------------------------------

    fn add_occ(map: &mut OrdMap<Name, OrdSet<u64>>, m: &Name, cidx: u64) {
        let mut s = map.get(m).cloned().unwrap_or_default();
        if !s.contains(&cidx) {
            s.insert(cidx);
            map.insert(m.clone(), s);
        }
    }

    /// Enqueue `c` at the priority class starting at `offset`, indexing the
    /// unassigned metavariables recorded in `un`.
    fn add_cnstr(&mut self, c: Constraint, un: Option<&UnassignedMetas>, offset: u64) {
        let cidx = self.next_cidx + offset;
        self.next_cidx += 1;
        self.cnstrs.insert(cidx, c);
        if let Some(un) = un {
            for m in &un.levels {
                Self::add_occ(&mut self.mlvl_occs, m, cidx);
            }
            for m in &un.exprs {
                Self::add_occ(&mut self.mvar_occs, m, cidx);
            }
        }
    }

    /// Process the constraints the type checker emitted since the last call.
    fn drain_tc(&mut self) -> Result<bool, UnifyError> {
        loop {
            let cs = self.tc.drain_constraints();
            if cs.is_empty() {
                break;
            }
            for c in cs {
                self.process_constraint(c)?;
            }
        }
        Ok(!self.in_conflict())
    }

    // ------------------------------------------------------------------
    // Assignment and re-awakening
    // ------------------------------------------------------------------

    /// Assign `v` to the term metavariable `m`. The type of `v` is inferred
    /// and checked against `m`'s declared type, and every queued constraint
    /// mentioning `m` is removed and reprocessed.
    fn assign_expr_meta(
        &mut self,
        m: &Expr,
        v: Expr,
        j: &Justification,
    ) -> Result<bool, UnifyError> {
        let Expr::Meta(name, m_ty) = m else {
            unreachable!("assign_expr_meta: not a metavariable");
        };
        trace!(meta = %name, value = ?v, "assign");
        let m_ty = (**m_ty).clone();
        self.subst = self.subst.assign_expr(name.clone(), v.clone(), j.clone());
        let v_ty = self.tc.infer(&v)?;
        if !self.drain_tc()? {
            return Ok(false);
        }
        let ok = self.tc.is_def_eq(&m_ty, &v_ty, j)?;
        if !self.drain_tc()? {
            return Ok(false);
        }
        if !ok {
            self.set_conflict(j.clone());
            return Ok(false);
        }
        if let Some(occs) = self.mvar_occs.get(name).cloned() {
            self.mvar_occs.remove(name);
            for cidx in occs {
                self.process_constraint_cidx(cidx)?;
            }
            return Ok(!self.in_conflict());
        }
        Ok(true)
    }

    /// Assign `v` to the level metavariable `m` and reprocess every queued
    /// constraint mentioning it.
    fn assign_level_meta(
        &mut self,
        name: &Name,
        v: Level,
        j: &Justification,
    ) -> Result<bool, UnifyError> {
        trace!(meta = %name, value = %v, "assign level");
        self.subst = self.subst.assign_level(name.clone(), v, j.clone());
        if let Some(occs) = self.mlvl_occs.get(name).cloned() {
            self.mlvl_occs.remove(name);
            for cidx in occs {
                self.process_constraint_cidx(cidx)?;
            }
            return Ok(!self.in_conflict());
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Constraint processing
    // ------------------------------------------------------------------

    /// Pattern rule: `?m l_1 ... l_n =?= rhs` with pairwise-distinct locals
    /// solves to `?m := fun l_1 ... l_n => rhs`, provided `rhs` passes the
    /// occurs and context checks.
    fn process_metavar_eq(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        j: &Justification,
    ) -> Result<MetaEqStatus, UnifyError> {
        if !lhs.is_meta_app() {
            return Ok(MetaEqStatus::Continue);
        }
        let Some((m, locals)) = is_simple_meta(lhs) else {
            return Ok(MetaEqStatus::Continue);
        };
        if rhs.is_meta_app() && *rhs.app_fn() == m {
            return Ok(MetaEqStatus::Continue);
        }
        if !occurs_context_check(rhs, &m, &locals) {
            self.set_conflict(j.clone());
            return Ok(MetaEqStatus::Failed);
        }
        let v = lambda_abstract_locals(rhs, &locals);
        if self.assign_expr_meta(&m, v, j)? {
            Ok(MetaEqStatus::Assigned)
        } else {
            Ok(MetaEqStatus::Failed)
        }
    }

    fn process_eq_constraint(&mut self, c: &Constraint) -> Result<bool, UnifyError> {
        let Constraint::Eq(c_lhs, c_rhs, c_j) = c else {
            unreachable!("process_eq_constraint: not an Eq constraint");
        };
        // instantiate assigned metavariables
        let mut un = UnassignedMetas::default();
        let (lhs, lhs_j) = self.subst.instantiate_metavars(c_lhs, &mut un);
        let (rhs, rhs_j) = self.subst.instantiate_metavars(c_rhs, &mut un);

        if lhs == rhs {
            return Ok(true);
        }

        let j = Justification::compose(&Justification::compose(c_j, &lhs_j), &rhs_j);
        if !lhs.has_metas() && !rhs.has_metas() {
            self.set_conflict(j);
            return Ok(false);
        }

        // higher-order pattern rule, both orientations
        match self.process_metavar_eq(&lhs, &rhs, &j)? {
            MetaEqStatus::Assigned => return Ok(true),
            MetaEqStatus::Failed => return Ok(false),
            MetaEqStatus::Continue => {}
        }
        match self.process_metavar_eq(&rhs, &lhs, &j)? {
            MetaEqStatus::Assigned => return Ok(true),
            MetaEqStatus::Failed => return Ok(false),
            MetaEqStatus::Continue => {}
        }

        let rhs = self.tc.whnf(&rhs);
        let lhs = self.tc.whnf(&lhs);

        // if something was instantiated or reduced, go through the type
        // checker again; its sink feeds residual constraints back to us
        if lhs != *c_lhs || rhs != *c_rhs {
            let ok = self.tc.is_def_eq(&lhs, &rhs, &j)?;
            if !self.drain_tc()? {
                return Ok(false);
            }
            if ok {
                return Ok(true);
            }
            self.set_conflict(j);
            return Ok(false);
        }

        if lhs.is_meta_app() && rhs.is_meta_app() {
            // flex-flex constraints are delayed the most
            self.add_cnstr(c.clone(), Some(&un), FIRST_VERY_DELAYED);
        } else if lhs.is_meta_app() || rhs.is_meta_app() {
            // flex-rigid constraints are delayed
            self.add_cnstr(c.clone(), Some(&un), FIRST_DELAYED);
        } else {
            // rigid-rigid: needs the plugin
            self.add_cnstr(c.clone(), Some(&un), 0);
        }
        Ok(true)
    }

    fn process_level_metavar_eq(
        &mut self,
        lhs: &Level,
        rhs: &Level,
        j: &Justification,
    ) -> Result<MetaEqStatus, UnifyError> {
        let Level::Meta(name) = lhs else {
            return Ok(MetaEqStatus::Continue);
        };
        if rhs.occurs_meta(name) {
            if rhs.is_succ() {
                self.set_conflict(j.clone());
                return Ok(MetaEqStatus::Failed);
            }
            // occurrence inside max/imax: leave for delayed reprocessing
            return Ok(MetaEqStatus::Continue);
        }
        if self.assign_level_meta(name, rhs.clone(), j)? {
            Ok(MetaEqStatus::Assigned)
        } else {
            Ok(MetaEqStatus::Failed)
        }
    }

    fn process_level_eq_constraint(&mut self, c: &Constraint) -> Result<bool, UnifyError> {
        let Constraint::LevelEq(c_lhs, c_rhs, c_j) = c else {
            unreachable!("process_level_eq_constraint: not a LevelEq constraint");
        };
        let mut un = UnassignedMetas::default();
        let (lhs, lhs_j) = self.subst.instantiate_level_metavars(c_lhs, &mut un);
        let (rhs, rhs_j) = self.subst.instantiate_level_metavars(c_rhs, &mut un);

        let mut lhs = lhs.normalize();
        let mut rhs = rhs.normalize();
        // eliminate outermost succs in lockstep
        loop {
            match (lhs.succ_of(), rhs.succ_of()) {
                (Some(a), Some(b)) => {
                    let (a, b) = (a.clone(), b.clone());
                    lhs = a;
                    rhs = b;
                }
                _ => break,
            }
        }

        if lhs == rhs {
            return Ok(true);
        }

        let j = Justification::compose(&Justification::compose(c_j, &lhs_j), &rhs_j);
        if !lhs.has_metas() && !rhs.has_metas() {
            self.set_conflict(j);
            return Ok(false);
        }

        match self.process_level_metavar_eq(&lhs, &rhs, &j)? {
            MetaEqStatus::Assigned => return Ok(true),
            MetaEqStatus::Failed => return Ok(false),
            MetaEqStatus::Continue => {}
        }
        match self.process_level_metavar_eq(&rhs, &lhs, &j)? {
            MetaEqStatus::Assigned => return Ok(true),
            MetaEqStatus::Failed => return Ok(false),
            MetaEqStatus::Continue => {}
        }

        if lhs != *c_lhs || rhs != *c_rhs {
            self.add_cnstr(Constraint::level_eq(lhs, rhs, j), Some(&un), FIRST_DELAYED);
        } else {
            self.add_cnstr(c.clone(), Some(&un), FIRST_DELAYED);
        }
        Ok(true)
    }

    /// Process one constraint: solve it, refute it, or queue it.
    fn process_constraint(&mut self, c: Constraint) -> Result<bool, UnifyError> {
        if self.in_conflict() {
            return Ok(false);
        }
        self.check_system()?;
        trace!(constraint = ?c, "process");
        match &c {
            Constraint::Choice { delayed, .. } => {
                // choice constraints are never considered easy, and they are
                // not tracked by the occurrence indices
                if *delayed {
                    self.add_cnstr(c, None, FIRST_VERY_DELAYED);
                } else {
                    self.add_cnstr(c, None, 0);
                }
                Ok(true)
            }
            Constraint::Eq(_, _, _) => self.process_eq_constraint(&c),
            Constraint::LevelEq(_, _, _) => self.process_level_eq_constraint(&c),
        }
    }

    /// Remove the constraint with index `cidx` from the queue (if still
    /// present) and reprocess it.
    fn process_constraint_cidx(&mut self, cidx: u64) -> Result<bool, UnifyError> {
        if self.in_conflict() {
            return Ok(false);
        }
        if let Some(c) = self.cnstrs.get(&cidx).cloned() {
            self.cnstrs.remove(&cidx);
            return self.process_constraint(c);
        }
        Ok(true)
    }

    /// Process each constraint with its justification composed with `j`.
    fn process_constraints(
        &mut self,
        cs: Vec<Constraint>,
        j: &Justification,
    ) -> Result<bool, UnifyError> {
        for c in cs {
            let jc = Justification::compose(c.justification(), j);
            self.process_constraint(c.with_justification(jc))?;
        }
        Ok(!self.in_conflict())
    }

    // ------------------------------------------------------------------
    // Case splits
    // ------------------------------------------------------------------

    /// Open a case split: snapshot the state, checkpoint the type checker,
    /// and mint the assumption for the first branch.
    fn push_case_split(&mut self, kind: CaseSplitKind) -> u64 {
        let assumption_idx = self.next_assumption_idx;
        self.next_assumption_idx += 1;
        self.tc.push();
        self.case_splits.push(CaseSplit {
            assumption_idx,
            failed: Justification::none(),
            snapshot: Snapshot {
                subst: self.subst.clone(),
                cnstrs: self.cnstrs.clone(),
                mvar_occs: self.mvar_occs.clone(),
                mlvl_occs: self.mlvl_occs.clone(),
            },
            kind,
        });
        assumption_idx
    }

    /// Restore the engine from the snapshot of the frame at `idx`, clear the
    /// conflict, and mint a fresh assumption for the next branch.
    fn restore_frame(&mut self, idx: usize) -> u64 {
        self.tc.pop();
        self.tc.push();
        let snapshot = self.case_splits[idx].snapshot.clone();
        self.subst = snapshot.subst;
        self.cnstrs = snapshot.cnstrs;
        self.mvar_occs = snapshot.mvar_occs;
        self.mlvl_occs = snapshot.mlvl_occs;
        let a = self.next_assumption_idx;
        self.next_assumption_idx += 1;
        self.case_splits[idx].assumption_idx = a;
        self.conflict = None;
        a
    }

    /// Advance the frame at `idx` to its next alternative. Returns true if
    /// the alternative was installed without conflict.
    fn advance_frame(&mut self, idx: usize) -> Result<bool, UnifyError> {
        let next = match &mut self.case_splits[idx].kind {
            CaseSplitKind::Plugin { tail } => {
                tail.next().map(NextAlt::Constraints).unwrap_or(NextAlt::Exhausted)
            }
            CaseSplitKind::HigherOrder { remaining } => remaining
                .next()
                .map(NextAlt::Constraints)
                .unwrap_or(NextAlt::Exhausted),
            CaseSplitKind::Choice { tail, .. } => {
                tail.next().map(NextAlt::Choice).unwrap_or(NextAlt::Exhausted)
            }
        };
        match next {
            NextAlt::Exhausted => {
                let failed = self.case_splits[idx].failed.clone();
                self.update_conflict(failed);
                Ok(false)
            }
            NextAlt::Constraints(cs) => {
                let a = self.restore_frame(idx);
                self.process_constraints(cs, &Justification::assumption(a))
            }
            NextAlt::Choice(alt) => {
                let a = self.restore_frame(idx);
                let (mvar, jst) = match &self.case_splits[idx].kind {
                    CaseSplitKind::Choice { mvar, jst, .. } => (mvar.clone(), jst.clone()),
                    _ => unreachable!("advance_frame: frame kind changed"),
                };
                let j = Justification::compose(&jst, &Justification::assumption(a));
                self.process_choice_result(&mvar, alt, j)
            }
        }
    }

    // ------------------------------------------------------------------
    // Choice and plugin drivers
    // ------------------------------------------------------------------

    fn process_choice_result(
        &mut self,
        mvar: &Expr,
        alt: ChoiceAlternative,
        j: Justification,
    ) -> Result<bool, UnifyError> {
        let j = Justification::compose(&j, &alt.justification);
        if !self.process_constraint(Constraint::eq(mvar.clone(), alt.value, j.clone()))? {
            return Ok(false);
        }
        self.process_constraints(alt.constraints, &j)
    }

    fn process_choice_constraint(&mut self, c: Constraint) -> Result<bool, UnifyError> {
        let Constraint::Choice {
            mvar,
            alternatives,
            delayed: _,
            justification,
        } = c
        else {
            unreachable!("process_choice_constraint: not a Choice constraint");
        };
        let m_ty = self.tc.infer(&mvar)?;
        if !self.drain_tc()? {
            return Ok(false);
        }
        let mut un = UnassignedMetas::default();
        let (m_ty, ty_j) = self.subst.instantiate_metavars(&m_ty, &mut un);
        let j = Justification::compose(&justification, &ty_j);

        let mut child = self.ngen.child();
        let mut seq = (alternatives)(&m_ty, &self.subst, &mut child);
        match seq.next() {
            Some(alt) => {
                let idx = self.push_case_split(CaseSplitKind::Choice {
                    mvar: mvar.clone(),
                    jst: j.clone(),
                    tail: seq,
                });
                let j = Justification::compose(&j, &Justification::assumption(idx));
                self.process_choice_result(&mvar, alt, j)
            }
            None => {
                self.set_conflict(j);
                Ok(false)
            }
        }
    }

    fn process_plugin_constraint(&mut self, c: Constraint) -> Result<bool, UnifyError> {
        let mut child = self.ngen.child();
        let mut alts = (self.plugin)(&c, &mut child);
        match alts.next() {
            None => {
                self.set_conflict(c.justification().clone());
                Ok(false)
            }
            Some(cs) => {
                let idx = self.push_case_split(CaseSplitKind::Plugin { tail: alts });
                self.process_constraints(cs, &Justification::assumption(idx))
            }
        }
    }

    // ------------------------------------------------------------------
    // Flex-rigid
    // ------------------------------------------------------------------

    fn is_flex_rigid(c: &Constraint) -> bool {
        match c {
            Constraint::Eq(lhs, rhs, _) => lhs.is_meta_app() != rhs.is_meta_app(),
            _ => false,
        }
    }

    fn is_flex_flex(c: &Constraint) -> bool {
        match c {
            Constraint::Eq(lhs, rhs, _) => lhs.is_meta_app() && rhs.is_meta_app(),
            _ => false,
        }
    }

    /// Huet-style branching for `?m a_1 ... a_n =?= rhs` with `rhs` rigid:
    /// projection branches in argument order, then an imitation branch
    /// mirroring the rigid head. The first branch is installed eagerly; any
    /// remaining branches go behind a fresh case split.
    fn process_flex_rigid(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        j: &Justification,
    ) -> Result<bool, UnifyError> {
        let (m, margs) = lhs.app_args();
        let Expr::Meta(_, m_ty) = &m else {
            unreachable!("process_flex_rigid: lhs head is not a metavariable");
        };
        let mtype = (**m_ty).clone();
        let n = margs.len() as u32;
        let mut alts: Vec<Vec<Constraint>> = Vec::new();

        // projections
        let rhs_is_local = matches!(rhs, Expr::Local(_, _, _));
        for (k, marg) in margs.iter().enumerate() {
            let vidx = n - 1 - k as u32;
            let marg_is_local = matches!(marg, Expr::Local(_, _, _));
            if !marg_is_local && !rhs_is_local {
                // if rhs is not local, only project on the nonlocal arguments
                let c1 = Constraint::eq(marg.clone(), rhs.clone(), j.clone());
                let c2 = Constraint::eq(
                    m.clone(),
                    mtype.lambda_for_telescope(&Expr::bvar(vidx)),
                    j.clone(),
                );
                alts.push(vec![c1, c2]);
            } else if marg_is_local && marg == rhs {
                let c = Constraint::eq(
                    m.clone(),
                    mtype.lambda_for_telescope(&Expr::bvar(vidx)),
                    j.clone(),
                );
                alts.push(vec![c]);
            }
        }

        // imitation
        let mut cs: Vec<Constraint> = Vec::new();
        let mut imitate = true;
        match rhs {
            Expr::App(_, _) => {
                let (f, rargs) = rhs.app_args();
                let mut sargs = Vec::new();
                for rarg in &rargs {
                    let maux = self.mk_aux_meta_for(&mtype);
                    cs.push(Constraint::eq(
                        Expr::mk_app(maux.clone(), &margs),
                        rarg.clone(),
                        j.clone(),
                    ));
                    sargs.push(Expr::mk_app_bvars(maux, n));
                }
                let v = mtype.lambda_for_telescope(&Expr::mk_app(f, &sargs));
                cs.push(Constraint::eq(m.clone(), v, j.clone()));
            }
            Expr::Lam(bn, bi, dom, body) | Expr::Pi(bn, bi, dom, body) => {
                let maux1 = self.mk_aux_meta_for(&mtype);
                cs.push(Constraint::eq(
                    Expr::mk_app(maux1.clone(), &margs),
                    (**dom).clone(),
                    j.clone(),
                ));
                // extend the telescope with the binder to type the body meta
                let pi = Expr::pi(bn.clone(), *bi, (**dom).clone(), (**body).clone());
                let mtype2 = mtype.replace_pi_range(&pi);
                let maux2 = self.mk_aux_meta_for(&mtype2);
                let new_local = Expr::local(self.ngen.next(), bn.clone(), (**dom).clone());
                cs.push(Constraint::eq(
                    Expr::app(Expr::mk_app(maux2.clone(), &margs), new_local.clone()),
                    body.instantiate(&new_local),
                    j.clone(),
                ));
                let new_dom = Expr::mk_app_bvars(maux1, n);
                let new_body = Expr::mk_app_bvars(maux2, n + 1);
                let v0 = if matches!(rhs, Expr::Pi(_, _, _, _)) {
                    Expr::pi(bn.clone(), *bi, new_dom, new_body)
                } else {
                    Expr::lam(bn.clone(), *bi, new_dom, new_body)
                };
                cs.push(Constraint::eq(
                    m.clone(),
                    mtype.lambda_for_telescope(&v0),
                    j.clone(),
                ));
            }
            Expr::Sort(_) | Expr::Const(_, _) => {
                cs.push(Constraint::eq(
                    m.clone(),
                    mtype.lambda_for_telescope(rhs),
                    j.clone(),
                ));
            }
            Expr::Local(_, _, _) => {
                // (fun ctx => local) would let the local escape its scope
                imitate = false;
            }
            Expr::Macro(def, children) => {
                let mut sargs = Vec::new();
                for child in children {
                    let maux = self.mk_aux_meta_for(&mtype);
                    cs.push(Constraint::eq(
                        Expr::mk_app(maux.clone(), &margs),
                        child.clone(),
                        j.clone(),
                    ));
                    sargs.push(Expr::mk_app_bvars(maux, n));
                }
                let v = mtype.lambda_for_telescope(&Expr::macro_(def.clone(), sargs));
                cs.push(Constraint::eq(m.clone(), v, j.clone()));
            }
            Expr::BVar(_) | Expr::Meta(_, _) => {
                unreachable!("process_flex_rigid: rhs is not rigid")
            }
        }
        if imitate {
            alts.push(cs);
        }

        trace!(branches = alts.len(), "flex-rigid");
        if alts.is_empty() {
            self.set_conflict(j.clone());
            return Ok(false);
        }
        let mut iter = alts.into_iter();
        let Some(first) = iter.next() else {
            unreachable!("flex-rigid: empty branch list");
        };
        if iter.len() == 0 {
            // single branch: no backtracking point needed
            return self.process_constraints(first, &Justification::none());
        }
        let idx = self.push_case_split(CaseSplitKind::HigherOrder { remaining: iter });
        self.process_constraints(first, &Justification::assumption(idx))
    }

    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    /// Process the next constraint from the queue.
    fn process_next(&mut self) -> Result<bool, UnifyError> {
        let Some(entry) = self.cnstrs.get_min().map(|(k, v)| (*k, v.clone())) else {
            return Ok(true);
        };
        let (cidx, c) = entry;
        self.cnstrs.remove(&cidx);
        if matches!(c, Constraint::Choice { .. }) {
            self.process_choice_constraint(c)
        } else if Self::is_flex_rigid(&c) {
            let Constraint::Eq(lhs, rhs, j) = &c else {
                unreachable!("flex-rigid constraint is not an Eq");
            };
            if lhs.is_meta_app() {
                self.process_flex_rigid(lhs, rhs, j)
            } else {
                self.process_flex_rigid(rhs, lhs, j)
            }
        } else if Self::is_flex_flex(&c) {
            // flex-flex constraints are ignored; solutions do not constrain
            // them
            Ok(true)
        } else {
            self.process_plugin_constraint(c)
        }
    }

    /// Walk the case-split stack looking for the innermost frame whose
    /// assumption the conflict depends on, and advance it to its next
    /// alternative. Frames whose assumption is not in the conflict's support
    /// cannot rescue us and are discarded.
    fn resolve_conflict(&mut self) -> Result<bool, UnifyError> {
        debug_assert!(self.in_conflict());
        while !self.case_splits.is_empty() {
            let top = self.case_splits.len() - 1;
            let assumption_idx = self.case_splits[top].assumption_idx;
            let depends = self
                .conflict
                .as_ref()
                .is_some_and(|j| j.depends_on(assumption_idx));
            if depends {
                let conflict_j = self.conflict.clone().unwrap_or_default();
                let frame = &mut self.case_splits[top];
                frame.failed = Justification::compose(&frame.failed, &conflict_j);
                trace!(assumption = assumption_idx, "backtrack");
                if self.advance_frame(top)? {
                    self.conflict = None;
                    return Ok(true);
                }
            }
            self.tc.pop();
            self.case_splits.pop();
        }
        Ok(false)
    }

    fn failure(&mut self) -> Result<Option<Substitution>, UnifyError> {
        if self.use_exceptions {
            Err(UnifyError::NoSolution(
                self.conflict.clone().unwrap_or_default(),
            ))
        } else {
            Ok(None)
        }
    }

    /// Produce the next solution, or `None` when the search space is
    /// exhausted (with `use_exceptions` off).
    pub fn next_solution(&mut self) -> Result<Option<Substitution>, UnifyError> {
        if !self.bootstrapped {
            self.bootstrapped = true;
            let pending = std::mem::take(&mut self.pending);
            for c in pending {
                self.process_constraint(c)?;
            }
        }
        if self.in_conflict() {
            return self.failure();
        }
        if !self.case_splits.is_empty() {
            // the caller wants another solution: manufacture a conflict over
            // every live assumption to force the next branch
            let mut all = Justification::none();
            for frame in &self.case_splits {
                all = Justification::compose(
                    &all,
                    &Justification::assumption(frame.assumption_idx),
                );
            }
            self.set_conflict(all);
            if !self.resolve_conflict()? {
                return self.failure();
            }
        } else if self.first {
            self.first = false;
        } else {
            // no case splits left to explore after a produced solution
            return Ok(None);
        }
        while !self.cnstrs.is_empty() {
            self.check_system()?;
            if !self.process_next()? && !self.resolve_conflict()? {
                return self.failure();
            }
        }
        trace!(steps = self.num_steps, "solution");
        Ok(Some(self.subst.clone()))
    }
}
