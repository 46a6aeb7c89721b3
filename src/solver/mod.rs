//! Constraint solvers over the IR: a monolithic solver with cheap branching
//! and a composite solver that keeps one child per connected group of
//! variables. Both share the cached-result discipline: every successful
//! query stores its result, every mutation clears it.

pub mod branching;
pub mod composite;

pub use branching::BranchingSolver;
pub use composite::CompositeSolver;

use crate::ast::{AstRef, Op};
use crate::backend::ModelMap;
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use z3::Model;

/// The outcome of a satisfiability query: the verdict, a generic model
/// (variable name to concrete value), and the backend's own model object
/// for cheap re-evaluation.
#[derive(Debug, Clone, Default)]
pub struct SolverResult {
    pub sat: bool,
    pub model: ModelMap,
    pub backend_model: Option<Rc<Model>>,
}

/// Logging bootstrap shared by the solver test suites: per-test capture,
/// level picked up from the environment. Safe to call from every test.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Flatten nested conjunctions into their conjuncts.
pub(crate) fn split_and(e: &AstRef, out: &mut Vec<AstRef>) {
    if e.op() == Op::BoolAnd {
        for c in e.operands() {
            split_and(c, out);
        }
    } else {
        out.push(e.clone());
    }
}

/// Group constraints into connected components over shared variables. The
/// second list holds the ground constraints, which touch no variable at all.
pub(crate) fn partition(constraints: &[AstRef]) -> (Vec<Vec<AstRef>>, Vec<AstRef>) {
    let mut uf = UnionFind::<usize>::new(constraints.len());
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut constant = Vec::new();
    for (i, c) in constraints.iter().enumerate() {
        if c.variables().is_empty() {
            constant.push(c.clone());
            continue;
        }
        for v in c.variables() {
            match seen.get(v.as_ref()) {
                Some(&j) => {
                    uf.union(i, j);
                }
                None => {
                    seen.insert(v.as_ref(), i);
                }
            }
        }
    }
    let mut groups: BTreeMap<usize, Vec<AstRef>> = BTreeMap::new();
    for (i, c) in constraints.iter().enumerate() {
        if !c.variables().is_empty() {
            groups.entry(uf.find(i)).or_default().push(c.clone());
        }
    }
    (groups.into_values().collect(), constant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{bv_sym, bvv};

    #[test]
    fn partition_by_shared_variables() {
        let x = bv_sym("x", 32);
        let y = bv_sym("y", 32);
        let z = bv_sym("z", 32);
        let cs = vec![
            x.eq_(&bvv(1, 32)).unwrap(),
            y.eq_(&bvv(2, 32)).unwrap(),
            z.eq_(&bvv(3, 32)).unwrap(),
        ];
        let (groups, constant) = partition(&cs);
        assert_eq!(groups.len(), 3);
        assert!(constant.is_empty());

        let mut with_link = cs.clone();
        with_link.push(x.ult(&y).unwrap());
        let (groups, _) = partition(&with_link);
        assert_eq!(groups.len(), 2);
        // no two groups share a variable
        for (i, a) in groups.iter().enumerate() {
            for b in groups.iter().skip(i + 1) {
                let va: std::collections::BTreeSet<_> =
                    a.iter().flat_map(|c| c.variables().clone()).collect();
                let vb: std::collections::BTreeSet<_> =
                    b.iter().flat_map(|c| c.variables().clone()).collect();
                assert!(va.is_disjoint(&vb));
            }
        }
    }

    #[test]
    fn ground_constraints_partition_separately() {
        let x = bv_sym("x", 32);
        let cs = vec![
            bvv(1, 1).eq_(&bvv(1, 1)).unwrap(),
            x.eq_(&bvv(3, 32)).unwrap(),
        ];
        let (groups, constant) = partition(&cs);
        assert_eq!(groups.len(), 1);
        assert_eq!(constant.len(), 1);
    }
}
