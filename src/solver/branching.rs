//! A single monolithic constraint set with branchable sub-states. The
//! backing SMT solver is built lazily and shared across branches by handle;
//! the first mutation on either side after a branch detaches it and replays
//! its own constraints into a fresh solver.

use crate::ast::{self, Arg, AstData, AstRef, Op, Value};
use crate::error::ChimeError;
use crate::solver::{SolverResult, partition, split_and};
use crate::{BackendZ3, bvv};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, instrument};
use z3::Solver;

pub struct BranchingSolver {
    backend: Rc<BackendZ3>,
    constraints: Vec<AstRef>,
    variables: BTreeSet<Arc<str>>,
    symbols: HashMap<String, u32>,
    state: RefCell<Option<Rc<Solver>>>,
    asserted: Cell<usize>,
    result: RefCell<Option<SolverResult>>,
    finalized: Cell<bool>,
}

impl BranchingSolver {
    pub fn new(backend: Rc<BackendZ3>) -> Self {
        Self {
            backend,
            constraints: Vec::new(),
            variables: BTreeSet::new(),
            symbols: HashMap::new(),
            state: RefCell::new(None),
            asserted: Cell::new(0),
            result: RefCell::new(None),
            finalized: Cell::new(false),
        }
    }

    pub fn constraints(&self) -> &[AstRef] {
        &self.constraints
    }

    pub fn variables(&self) -> &BTreeSet<Arc<str>> {
        &self.variables
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    /// Whether a backing solver is currently materialized.
    pub fn has_state(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn shares_state_with(&self, other: &Self) -> bool {
        match (self.state.borrow().as_ref(), other.state.borrow().as_ref()) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Drop the cached result so the next query re-checks the backend.
    pub fn reset_result(&self) {
        *self.result.borrow_mut() = None;
    }

    pub fn add(&mut self, constraints: &[AstRef]) -> Result<(), ChimeError> {
        if constraints.is_empty() {
            return Ok(());
        }
        self.reset_result();
        for c in constraints {
            self.variables.extend(c.variables().iter().cloned());
            ast::collect_symbols(c, &mut self.symbols);
            self.constraints.push(c.clone());
        }
        let mut slot = self.state.borrow_mut();
        if let Some(rc) = slot.as_ref() {
            if Rc::strong_count(rc) == 1 {
                self.backend.add(rc, constraints)?;
                self.asserted.set(self.constraints.len());
            } else {
                // shared with a branch: detach and rebuild lazily
                debug!("detaching branched solver state");
                *slot = None;
                self.asserted.set(0);
            }
        }
        Ok(())
    }

    fn ensure_state(&self) -> Result<Rc<Solver>, ChimeError> {
        let mut slot = self.state.borrow_mut();
        if slot.is_none() {
            let s = self.backend.solver();
            self.backend.add(&s, &self.constraints)?;
            self.asserted.set(self.constraints.len());
            *slot = Some(Rc::new(s));
        }
        Ok(slot.as_ref().map(Rc::clone).unwrap())
    }

    /// Freeze-and-precompute: materialize the backing solver now.
    pub fn finalize(&self) -> Result<(), ChimeError> {
        self.ensure_state()?;
        self.finalized.set(true);
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn satisfiable(&self, extra: &[AstRef]) -> Result<bool, ChimeError> {
        if extra.is_empty() {
            if let Some(r) = self.result.borrow().as_ref() {
                return Ok(r.sat);
            }
        }
        let s = self.ensure_state()?;
        let r = self.backend.results(&s, extra, &self.symbols)?;
        let sat = r.sat;
        if extra.is_empty() {
            *self.result.borrow_mut() = Some(r);
        }
        Ok(sat)
    }

    /// Up to `n` distinct values of `e` under the current constraints.
    #[instrument(skip_all)]
    pub fn eval(&self, e: &AstRef, n: usize, extra: &[AstRef]) -> Result<Vec<Value>, ChimeError> {
        let s = self.ensure_state()?;
        let cached = self.result.borrow().clone();
        self.backend.eval(&s, e, n, extra, cached.as_ref())
    }

    pub fn min(&self, e: &AstRef, extra: &[AstRef]) -> Result<u64, ChimeError> {
        let s = self.ensure_state()?;
        self.backend.min(&s, e, extra)
    }

    pub fn max(&self, e: &AstRef, extra: &[AstRef]) -> Result<u64, ChimeError> {
        let s = self.ensure_state()?;
        self.backend.max(&s, e, extra)
    }

    /// Is `value` a possible concretization of `e`?
    pub fn solution(&self, e: &AstRef, value: &AstRef) -> Result<bool, ChimeError> {
        self.satisfiable(&[e.eq_(value)?])
    }

    /// Simplify the constraint conjunction through the solver backend and
    /// re-split it into individual conjuncts.
    pub fn simplify(&mut self) -> Result<(), ChimeError> {
        if self.constraints.is_empty() {
            return Ok(());
        }
        let conj = if self.constraints.len() == 1 {
            self.constraints[0].clone()
        } else {
            ast::make(
                Op::BoolAnd,
                self.constraints.iter().cloned().map(Arg::Node).collect(),
            )?
        };
        let simplified = self.backend.simplify(&conj);
        let mut out = Vec::new();
        split_and(&simplified, &mut out);
        out.retain(|c| c.value().and_then(Value::as_bool) != Some(true));
        self.constraints = out;
        self.variables.clear();
        self.symbols.clear();
        for c in &self.constraints {
            self.variables.extend(c.variables().iter().cloned());
            ast::collect_symbols(c, &mut self.symbols);
        }
        *self.state.borrow_mut() = None;
        self.asserted.set(0);
        self.reset_result();
        Ok(())
    }

    /// Fork. The constraint list is copied; the backing solver is shared by
    /// handle until either side mutates.
    pub fn branch(&self) -> Result<Self, ChimeError> {
        self.finalize()?;
        Ok(Self {
            backend: Rc::clone(&self.backend),
            constraints: self.constraints.clone(),
            variables: self.variables.clone(),
            symbols: self.symbols.clone(),
            state: RefCell::new(self.state.borrow().clone()),
            asserted: Cell::new(self.asserted.get()),
            result: RefCell::new(self.result.borrow().clone()),
            finalized: Cell::new(true),
        })
    }

    /// A new solver holding the union of all constraint lists.
    pub fn combine(&self, others: &[&Self]) -> Result<Self, ChimeError> {
        let mut merged = Self::new(Rc::clone(&self.backend));
        merged.add(&self.constraints)?;
        for o in others {
            merged.add(&o.constraints)?;
        }
        Ok(merged)
    }

    /// Merge sibling solvers under a selector: each solver's conjunction is
    /// implied by `selector == value`, and the selector ranges over the
    /// given values.
    pub fn merge(
        &self,
        others: &[&Self],
        selector: &AstRef,
        values: &[u64],
    ) -> Result<(bool, Self), ChimeError> {
        let sets: Vec<&[AstRef]> = std::iter::once(self.constraints())
            .chain(others.iter().map(|o| o.constraints()))
            .collect();
        let merged_constraints = merge_constraints(&sets, selector, values)?;
        let mut merged = Self::new(Rc::clone(&self.backend));
        merged.add(&merged_constraints)?;
        Ok((false, merged))
    }

    /// Break the constraint set into independent solvers, one per connected
    /// group of variables (plus one for ground constraints, if any).
    pub fn split(&self) -> Result<Vec<Self>, ChimeError> {
        let (groups, constant) = partition(&self.constraints);
        let mut out = Vec::new();
        for group in groups {
            let mut s = Self::new(Rc::clone(&self.backend));
            s.add(&group)?;
            out.push(s);
        }
        if !constant.is_empty() {
            let mut s = Self::new(Rc::clone(&self.backend));
            s.add(&constant)?;
            out.push(s);
        }
        Ok(out)
    }

    /// Portable snapshot: the constraint trees by identity key.
    pub fn snapshot(&self) -> SolverData {
        let mut nodes = Vec::new();
        let mut roots = Vec::new();
        for c in &self.constraints {
            ast::to_table(c, &mut nodes);
            roots.push(c.structural_hash());
        }
        SolverData { roots, nodes }
    }

    /// Rehydrate a snapshot by replaying its constraints.
    pub fn restore(backend: Rc<BackendZ3>, data: &SolverData) -> Result<Self, ChimeError> {
        let mut s = Self::new(backend);
        let constraints: Vec<AstRef> = data
            .roots
            .iter()
            .map(|k| ast::from_table(*k, &data.nodes))
            .collect::<Result<_, _>>()?;
        s.add(&constraints)?;
        Ok(s)
    }
}

/// The merge formula shared by both solver kinds: each constraint set is
/// implied by its selector value, and the selector ranges over the values.
pub(crate) fn merge_constraints(
    sets: &[&[AstRef]],
    selector: &AstRef,
    values: &[u64],
) -> Result<Vec<AstRef>, ChimeError> {
    let bits = selector
        .length()
        .ok_or_else(|| ChimeError::op("merge selector is not a bit-vector"))?;
    let mut out = Vec::new();
    let mut domain = Vec::new();
    for (cs, v) in sets.iter().zip(values) {
        let sel = selector.eq_(&bvv(*v, bits))?;
        domain.push(Arg::Node(sel.clone()));
        let conj = and_all(cs)?;
        out.push(ast::make(Op::Implies, vec![Arg::Node(sel), Arg::Node(conj)])?);
    }
    out.push(ast::make(Op::BoolOr, domain)?);
    Ok(out)
}

pub(crate) fn and_all(constraints: &[AstRef]) -> Result<AstRef, ChimeError> {
    match constraints {
        [] => Ok(ast::bool_val(true)),
        [one] => Ok(one.clone()),
        many => ast::make(Op::BoolAnd, many.iter().cloned().map(Arg::Node).collect()),
    }
}

/// Serialized solver state: constraint root keys plus the node table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverData {
    pub roots: Vec<u64>,
    pub nodes: Vec<(u64, AstData)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{bv_sym, bvv};

    fn solver() -> BranchingSolver {
        crate::solver::init_test_logging();
        BranchingSolver::new(Rc::new(BackendZ3::new()))
    }

    fn eval_u64(s: &BranchingSolver, e: &AstRef, n: usize) -> Vec<u64> {
        s.eval(e, n, &[])
            .unwrap()
            .iter()
            .map(|v| v.as_bvv().unwrap().value())
            .collect()
    }

    #[test]
    fn basic_queries() {
        let mut s = solver();
        s.simplify().unwrap();
        let x = bv_sym("x", 32);
        let y = bv_sym("y", 32);
        s.add(&[x.eq_(&bvv(10, 32)).unwrap(), y.eq_(&bvv(15, 32)).unwrap()])
            .unwrap();
        assert!(s.satisfiable(&[]).unwrap());
        assert!(!s.satisfiable(&[x.eq_(&bvv(5, 32)).unwrap()]).unwrap());
        assert_eq!(eval_u64(&s, &(&x + &bvv(5, 32)), 1), [15]);
        assert!(s.solution(&(&x + &bvv(5, 32)), &bvv(15, 32)).unwrap());
        assert!(s.solution(&x, &bvv(10, 32)).unwrap());
        assert!(s.solution(&y, &bvv(15, 32)).unwrap());
        assert!(!s.solution(&y, &bvv(13, 32)).unwrap());

        let shards = s.split().unwrap();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].variables().len(), 1);
        assert_eq!(shards[1].variables().len(), 1);
    }

    #[test]
    fn simplify_collapses_redundant_bounds() {
        let mut s = solver();
        let x = bv_sym("x", 32);
        let y = bv_sym("y", 32);
        let z = bv_sym("z", 32);
        s.add(&[x.ugt(&bvv(10, 32)).unwrap(), x.ugt(&bvv(20, 32)).unwrap()])
            .unwrap();
        s.simplify().unwrap();
        assert_eq!(s.constraints().len(), 1);

        s.add(&[y.ugt(&x).unwrap(), z.ult(&bvv(5, 32)).unwrap()])
            .unwrap();
        assert_eq!(s.max(&z, &[]).unwrap(), 4);
        assert_eq!(s.min(&z, &[]).unwrap(), 0);
        assert_eq!(s.min(&y, &[]).unwrap(), 22);
        assert_eq!(s.max(&y, &[]).unwrap(), u32::MAX as u64);

        let shards = s.split().unwrap();
        assert_eq!(shards.len(), 2);
    }

    #[test]
    fn concrete_false_makes_unsat() {
        let mut s = solver();
        s.add(&[bvv(1, 1).eq_(&bvv(1, 1)).unwrap()]).unwrap();
        assert!(s.satisfiable(&[]).unwrap());
        s.add(&[bvv(1, 1).eq_(&bvv(0, 1)).unwrap()]).unwrap();
        assert!(!s.satisfiable(&[]).unwrap());
        // clearing the cached result forces a fresh check with the same verdict
        s.reset_result();
        assert!(!s.satisfiable(&[]).unwrap());
    }

    #[test]
    fn extra_constraints_do_not_stick() {
        let mut s = solver();
        let x = bv_sym("x", 32);
        let vals = s.eval(&x, 2, &[x.eq_(&bvv(10, 32)).unwrap()]).unwrap();
        assert_eq!(vals.len(), 1);
        assert_eq!(vals[0].as_bvv().unwrap().value(), 10);
        s.add(&[x.eq_(&bvv(10, 32)).unwrap()]).unwrap();
        assert!(!s.solution(&x, &bvv(2, 32)).unwrap());
        assert!(s.solution(&x, &bvv(10, 32)).unwrap());
    }

    #[test]
    fn branching_is_copy_on_write() {
        let mut s = solver();
        let x = bv_sym("x", 32);
        let y = bv_sym("y", 32);
        s.add(&[x.ugt(&y).unwrap(), x.ult(&bvv(10, 32)).unwrap()])
            .unwrap();
        let first = eval_u64(&s, &x, 1)[0];
        assert!(first > 0 && first < 10);

        let mut t = s.branch().unwrap();
        assert!(s.is_finalized() && t.is_finalized());
        assert!(s.shares_state_with(&t));
        t.add(&[x.ugt(&bvv(5, 32)).unwrap()]).unwrap();
        assert!(!t.has_state());

        s.add(&[x.eq_(&bvv(3, 32)).unwrap()]).unwrap();
        assert!(s.satisfiable(&[]).unwrap());
        t.add(&[x.eq_(&bvv(3, 32)).unwrap()]).unwrap();
        assert!(!t.satisfiable(&[]).unwrap());

        s.add(&[y.eq_(&bvv(2, 32)).unwrap()]).unwrap();
        assert!(s.satisfiable(&[]).unwrap());
        assert_eq!(eval_u64(&s, &x, 1), [3]);
        assert_eq!(eval_u64(&s, &y, 1), [2]);
        assert!(!t.satisfiable(&[]).unwrap());
    }

    #[test]
    fn combine_intersects_constraint_sets() {
        let mut s10 = solver();
        let mut s20 = solver();
        let mut s30 = solver();
        let x = bv_sym("x", 32);
        s10.add(&[x.uge(&bvv(10, 32)).unwrap()]).unwrap();
        s20.add(&[x.ule(&bvv(20, 32)).unwrap()]).unwrap();
        s30.add(&[x.eq_(&bvv(30, 32)).unwrap()]).unwrap();

        assert!(s10.satisfiable(&[]).unwrap());
        assert!(s20.satisfiable(&[]).unwrap());
        assert!(s30.satisfiable(&[]).unwrap());
        assert!(s10.combine(&[&s20]).unwrap().satisfiable(&[]).unwrap());
        assert!(s20.combine(&[&s10]).unwrap().satisfiable(&[]).unwrap());
        assert!(s30.combine(&[&s10]).unwrap().satisfiable(&[]).unwrap());
        assert!(!s30.combine(&[&s20]).unwrap().satisfiable(&[]).unwrap());
        let c = s30.combine(&[&s10]).unwrap();
        assert_eq!(eval_u64(&c, &x, 1), [30]);
        assert_eq!(c.constraints().len(), 2);
    }

    #[test]
    fn merging_selects_between_states() {
        let mut s1 = solver();
        let mut s2 = solver();
        let w = bv_sym("w", 8);
        let x = bv_sym("x", 8);
        let y = bv_sym("y", 8);
        let z = bv_sym("z", 8);
        let m = bv_sym("m", 8);
        s1.add(&[x.eq_(&bvv(1, 8)).unwrap(), y.eq_(&bvv(10, 8)).unwrap()])
            .unwrap();
        s2.add(&[
            x.eq_(&bvv(2, 8)).unwrap(),
            z.eq_(&bvv(20, 8)).unwrap(),
            w.eq_(&bvv(5, 8)).unwrap(),
        ])
        .unwrap();
        let (flag, sm) = s1.merge(&[&s2], &m, &[0, 1]).unwrap();
        assert!(!flag);

        assert_eq!(eval_u64(&s1, &x, 1), [1]);
        assert_eq!(eval_u64(&s2, &x, 1), [2]);

        let mut sm1 = sm.branch().unwrap();
        sm1.add(&[x.eq_(&bvv(1, 8)).unwrap()]).unwrap();
        assert_eq!(eval_u64(&sm1, &x, 1), [1]);
        assert_eq!(eval_u64(&sm1, &y, 1), [10]);
        assert_eq!(eval_u64(&sm1, &z, 1), [0]);
        assert_eq!(eval_u64(&sm1, &w, 1), [0]);

        let mut sm2 = sm.branch().unwrap();
        sm2.add(&[x.eq_(&bvv(2, 8)).unwrap()]).unwrap();
        assert_eq!(eval_u64(&sm2, &x, 1), [2]);
        assert_eq!(eval_u64(&sm2, &y, 1), [0]);
        assert_eq!(eval_u64(&sm2, &z, 1), [20]);
        assert_eq!(eval_u64(&sm2, &w, 1), [5]);

        let mut sm3 = sm.branch().unwrap();
        sm3.add(&[m.eq_(&bvv(0, 8)).unwrap()]).unwrap();
        assert_eq!(eval_u64(&sm3, &y, 1), [10]);
        let mut sm4 = sm.branch().unwrap();
        sm4.add(&[m.eq_(&bvv(1, 8)).unwrap()]).unwrap();
        assert_eq!(eval_u64(&sm4, &z, 1), [20]);
    }

    #[test]
    fn merged_merges_cover_all_combinations() {
        let mut so = solver();
        let w = bv_sym("w", 8);
        let x = bv_sym("x", 8);
        let y = bv_sym("y", 8);
        let m = bv_sym("m", 8);
        let m2 = bv_sym("m2", 8);
        so.add(&[w.eq_(&bvv(0, 8)).unwrap()]).unwrap();

        let mut sa = so.branch().unwrap();
        let mut sb = so.branch().unwrap();
        sa.add(&[x.eq_(&bvv(1, 8)).unwrap()]).unwrap();
        sb.add(&[x.eq_(&bvv(2, 8)).unwrap()]).unwrap();
        let (_, sm) = sa.merge(&[&sb], &m, &[0, 1]).unwrap();

        let mut smc = sm.branch().unwrap();
        let mut smd = sm.branch().unwrap();
        smc.add(&[y.eq_(&bvv(3, 8)).unwrap()]).unwrap();
        smd.add(&[y.eq_(&bvv(4, 8)).unwrap()]).unwrap();
        let (_, smm) = smc.merge(&[&smd], &m2, &[0, 1]).unwrap();

        let wxy = w.concat(&x).unwrap().concat(&y).unwrap();
        for val in [0x000103u64, 0x000104, 0x000203, 0x000204] {
            let mut b = smm.branch().unwrap();
            b.add(&[wxy.eq_(&bvv(val, 24)).unwrap()]).unwrap();
            assert!(b.satisfiable(&[]).unwrap(), "{val:#x} should be reachable");
        }
        let mut none = smm.branch().unwrap();
        none.add(&[
            wxy.ne_(&bvv(0x000103, 24)).unwrap(),
            wxy.ne_(&bvv(0x000104, 24)).unwrap(),
            wxy.ne_(&bvv(0x000203, 24)).unwrap(),
            wxy.ne_(&bvv(0x000204, 24)).unwrap(),
        ])
        .unwrap();
        assert!(!none.satisfiable(&[]).unwrap());
    }

    #[test]
    fn ite_trees_enumerate_fully() {
        let s = solver();
        let x = bv_sym("x", 32);
        let mut ite = bvv(0, 32);
        for (k, v) in [(1u64, 11u64), (2, 22), (3, 33), (4, 44), (5, 55)] {
            ite = x.eq_(&bvv(k, 32)).unwrap().ite(&bvv(v, 32), &ite).unwrap();
        }
        let mut vals = eval_u64(&s, &ite, 100);
        vals.sort_unstable();
        assert_eq!(vals, [0, 11, 22, 33, 44, 55]);

        let mut ss = s.branch().unwrap();
        ss.add(&[ite.eq_(&bvv(44, 32)).unwrap()]).unwrap();
        assert_eq!(eval_u64(&ss, &ite, 100), [44]);
        assert_eq!(eval_u64(&ss, &x, 100), [4]);
    }

    #[test]
    fn snapshots_round_trip() {
        let mut s = solver();
        let x = bv_sym("x", 32);
        s.add(&[x.eq_(&bvv(3, 32)).unwrap()]).unwrap();
        s.finalize().unwrap();
        let data = s.snapshot();
        let restored =
            BranchingSolver::restore(Rc::new(BackendZ3::new()), &data).unwrap();
        assert_eq!(restored.constraints(), s.constraints());
        assert_eq!(restored.variables(), s.variables());
    }
}
