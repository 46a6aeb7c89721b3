//! chime — hash-consed bit-vector and boolean expressions with pluggable
//! backends: concrete evaluation, an SMT solver, and a value-set-analysis
//! abstract domain. Expressions are built through the [`Chime`] façade or
//! the [`ast`] constructors, accumulated into solvers, and queried for
//! satisfiability, models, and bounds.

pub mod ast;
pub mod backend;
pub mod bv;
mod context;
mod error;
pub mod solver;
pub mod vsa;

pub use ast::{AstRef, Op, Value, bool_val, bv_sym, bvv, si_val, vs_val};
pub use backend::concrete::BackendConcrete;
pub use backend::z3::BackendZ3;
pub use backend::{Backend, ModelMap};
pub use bv::BVV;
pub use context::Chime;
pub use error::{BackendError, ChimeError};
pub use solver::{BranchingSolver, CompositeSolver, SolverResult};
pub use vsa::{
    BackendVSA, BoolResult, DiscreteStridedIntervalSet, IfProxy, StridedInterval, ValueSet,
    VsaValue,
};
