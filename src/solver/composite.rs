//! A constraint-set partitioner: one child solver per connected group of
//! variables, plus a dedicated child for ground constraints. Queries route
//! to the child owning the relevant variables, so unrelated constraint
//! groups never share a solver call.

use crate::BackendZ3;
use crate::ast::{self, AstRef, Value};
use crate::error::ChimeError;
use crate::solver::branching::{BranchingSolver, merge_constraints};
use crate::solver::{SolverResult, partition, split_and};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct CompositeSolver {
    backend: Rc<BackendZ3>,
    children: Vec<Rc<BranchingSolver>>,
    constant: Rc<BranchingSolver>,
    result: RefCell<Option<SolverResult>>,
}

impl CompositeSolver {
    pub fn new(backend: Rc<BackendZ3>) -> Self {
        let constant = Rc::new(BranchingSolver::new(Rc::clone(&backend)));
        Self {
            backend,
            children: Vec::new(),
            constant,
            result: RefCell::new(None),
        }
    }

    /// Number of child solvers, the ground child included.
    pub fn solver_count(&self) -> usize {
        self.children.len() + 1
    }

    pub fn constraints(&self) -> Vec<AstRef> {
        let mut out: Vec<AstRef> = self
            .children
            .iter()
            .flat_map(|c| c.constraints().iter().cloned())
            .collect();
        out.extend(self.constant.constraints().iter().cloned());
        out
    }

    pub fn variables(&self) -> BTreeSet<Arc<str>> {
        self.children
            .iter()
            .flat_map(|c| c.variables().iter().cloned())
            .collect()
    }

    pub fn reset_result(&self) {
        *self.result.borrow_mut() = None;
    }

    /// Add constraints, merging every child whose variables they touch.
    /// Top-level conjunctions split first, so independent conjuncts land in
    /// independent children.
    #[instrument(skip_all)]
    pub fn add(&mut self, constraints: &[AstRef]) -> Result<(), ChimeError> {
        self.reset_result();
        let mut pending = Vec::new();
        for c in constraints {
            split_and(c, &mut pending);
        }
        for c in pending {
            if c.variables().is_empty() {
                let mut merged = BranchingSolver::new(Rc::clone(&self.backend));
                merged.add(self.constant.constraints())?;
                merged.add(std::slice::from_ref(&c))?;
                self.constant = Rc::new(merged);
                continue;
            }
            let (affected, kept): (Vec<_>, Vec<_>) = self
                .children
                .drain(..)
                .partition(|child| !child.variables().is_disjoint(c.variables()));
            let mut merged = BranchingSolver::new(Rc::clone(&self.backend));
            for a in &affected {
                merged.add(a.constraints())?;
            }
            merged.add(std::slice::from_ref(&c))?;
            debug!(
                merged = affected.len(),
                variables = merged.variables().len(),
                "re-grouped constraint set"
            );
            self.children = kept;
            self.children.push(Rc::new(merged));
        }
        Ok(())
    }

    /// Satisfiable iff every child is; the first unsat child ends the query.
    #[instrument(skip_all)]
    pub fn satisfiable(&self, extra: &[AstRef]) -> Result<bool, ChimeError> {
        if !extra.is_empty() {
            let mut probe = self.branch();
            probe.add(extra)?;
            return probe.satisfiable(&[]);
        }
        if let Some(r) = self.result.borrow().as_ref() {
            return Ok(r.sat);
        }
        let mut sat = self.constant.satisfiable(&[])?;
        if sat {
            for child in &self.children {
                if !child.satisfiable(&[])? {
                    sat = false;
                    break;
                }
            }
        }
        *self.result.borrow_mut() = Some(SolverResult {
            sat,
            ..Default::default()
        });
        Ok(sat)
    }

    /// The child responsible for an expression's variables. Constraint
    /// groups are disjoint, so more than one intersecting child means the
    /// expression spans groups and cannot be routed.
    fn route(&self, vars: &BTreeSet<Arc<str>>) -> Result<Option<&Rc<BranchingSolver>>, ChimeError> {
        let mut hits = self
            .children
            .iter()
            .filter(|c| !c.variables().is_disjoint(vars));
        match (hits.next(), hits.next()) {
            (None, _) => Ok(None),
            (Some(one), None) => Ok(Some(one)),
            (Some(_), Some(_)) => Err(ChimeError::MixedVariables),
        }
    }

    fn query_vars(e: &AstRef, extra: &[AstRef]) -> BTreeSet<Arc<str>> {
        let mut vars = e.variables().clone();
        for c in extra {
            vars.extend(c.variables().iter().cloned());
        }
        vars
    }

    pub fn eval(&self, e: &AstRef, n: usize, extra: &[AstRef]) -> Result<Vec<Value>, ChimeError> {
        let vars = Self::query_vars(e, extra);
        if vars.is_empty() {
            return self.constant.eval(e, n, extra);
        }
        match self.route(&vars)? {
            Some(child) => child.eval(e, n, extra),
            None => BranchingSolver::new(Rc::clone(&self.backend)).eval(e, n, extra),
        }
    }

    pub fn min(&self, e: &AstRef, extra: &[AstRef]) -> Result<u64, ChimeError> {
        let vars = Self::query_vars(e, extra);
        match self.route(&vars)? {
            Some(child) => child.min(e, extra),
            None => BranchingSolver::new(Rc::clone(&self.backend)).min(e, extra),
        }
    }

    pub fn max(&self, e: &AstRef, extra: &[AstRef]) -> Result<u64, ChimeError> {
        let vars = Self::query_vars(e, extra);
        match self.route(&vars)? {
            Some(child) => child.max(e, extra),
            None => BranchingSolver::new(Rc::clone(&self.backend)).max(e, extra),
        }
    }

    pub fn solution(&self, e: &AstRef, value: &AstRef) -> Result<bool, ChimeError> {
        self.satisfiable(&[e.eq_(value)?])
    }

    /// Simplify every child's conjunction and rebuild the partition; ground
    /// conjuncts factored out by simplification migrate to the ground child.
    pub fn simplify(&mut self) -> Result<(), ChimeError> {
        let mut all = Vec::new();
        for child in &self.children {
            let mut tmp = BranchingSolver::new(Rc::clone(&self.backend));
            tmp.add(child.constraints())?;
            tmp.simplify()?;
            all.extend(tmp.constraints().iter().cloned());
        }
        all.extend(self.constant.constraints().iter().cloned());
        self.rebuild(&all)?;
        self.reset_result();
        Ok(())
    }

    fn rebuild(&mut self, constraints: &[AstRef]) -> Result<(), ChimeError> {
        let (groups, constant) = partition(constraints);
        self.children.clear();
        for group in groups {
            let mut s = BranchingSolver::new(Rc::clone(&self.backend));
            s.add(&group)?;
            self.children.push(Rc::new(s));
        }
        let mut ground = BranchingSolver::new(Rc::clone(&self.backend));
        ground.add(&constant)?;
        self.constant = Rc::new(ground);
        Ok(())
    }

    /// Cheap fork: children are shared by handle and replaced, never
    /// mutated, so both sides keep their view.
    pub fn branch(&self) -> Self {
        Self {
            backend: Rc::clone(&self.backend),
            children: self.children.clone(),
            constant: Rc::clone(&self.constant),
            result: RefCell::new(self.result.borrow().clone()),
        }
    }

    /// The children as independent solvers.
    pub fn split(&self) -> Result<Vec<BranchingSolver>, ChimeError> {
        let mut out = Vec::new();
        for child in &self.children {
            out.push(child.branch()?);
        }
        if !self.constant.constraints().is_empty() {
            out.push(self.constant.branch()?);
        }
        Ok(out)
    }

    pub fn combine(&self, others: &[&Self]) -> Result<Self, ChimeError> {
        let mut merged = Self::new(Rc::clone(&self.backend));
        merged.add(&self.constraints())?;
        for o in others {
            merged.add(&o.constraints())?;
        }
        Ok(merged)
    }

    pub fn merge(
        &self,
        others: &[&Self],
        selector: &AstRef,
        values: &[u64],
    ) -> Result<(bool, Self), ChimeError> {
        let own: Vec<Vec<AstRef>> = std::iter::once(self.constraints())
            .chain(others.iter().map(|o| o.constraints()))
            .collect();
        let sets: Vec<&[AstRef]> = own.iter().map(Vec::as_slice).collect();
        let merged_constraints = merge_constraints(&sets, selector, values)?;
        let mut merged = Self::new(Rc::clone(&self.backend));
        merged.add(&merged_constraints)?;
        Ok((false, merged))
    }

    pub fn finalize(&self) -> Result<(), ChimeError> {
        self.constant.finalize()?;
        for child in &self.children {
            child.finalize()?;
        }
        Ok(())
    }
}

impl CompositeSolver {
    /// Portable snapshot of the full constraint list.
    pub fn snapshot(&self) -> crate::solver::branching::SolverData {
        let mut nodes = Vec::new();
        let mut roots = Vec::new();
        for c in self.constraints() {
            ast::to_table(&c, &mut nodes);
            roots.push(c.structural_hash());
        }
        crate::solver::branching::SolverData { roots, nodes }
    }

    pub fn restore(
        backend: Rc<BackendZ3>,
        data: &crate::solver::branching::SolverData,
    ) -> Result<Self, ChimeError> {
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
