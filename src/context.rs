//! The front-end façade: a bundle of backends with fixed precedence, the
//! expression constructors, and the solver factories.

use crate::ast::{self, Arg, AstRef, Op, Value};
use crate::backend::Backend;
use crate::backend::concrete::BackendConcrete;
use crate::backend::z3::BackendZ3;
use crate::bv::BVV;
use crate::error::ChimeError;
use crate::solver::{BranchingSolver, CompositeSolver};
use crate::vsa::{BackendVSA, StridedInterval, ValueSet, VsaValue};
use std::rc::Rc;

/// A configured engine: model backends resolve expressions to values, the
/// solver backend answers constraint queries. Solvers capture the backend
/// handles at construction.
pub struct Chime {
    concrete: Rc<BackendConcrete>,
    vsa: Option<Rc<BackendVSA>>,
    z3: Option<Rc<BackendZ3>>,
}

impl Chime {
    /// The default bundle: concrete evaluation plus the SMT solver.
    pub fn serial_z3() -> Self {
        Self {
            concrete: Rc::new(BackendConcrete::new()),
            vsa: None,
            z3: Some(Rc::new(BackendZ3::new())),
        }
    }

    /// The abstract-interpretation bundle: concrete evaluation plus the
    /// value-set domain, no solver backend.
    pub fn vsa() -> Self {
        Self {
            concrete: Rc::new(BackendConcrete::new()),
            vsa: Some(Rc::new(BackendVSA::new())),
            z3: None,
        }
    }

    /// Everything at once, model precedence concrete then VSA.
    pub fn full() -> Self {
        Self {
            concrete: Rc::new(BackendConcrete::new()),
            vsa: Some(Rc::new(BackendVSA::new())),
            z3: Some(Rc::new(BackendZ3::new())),
        }
    }

    pub fn concrete_backend(&self) -> &BackendConcrete {
        &self.concrete
    }

    pub fn vsa_backend(&self) -> Option<&BackendVSA> {
        self.vsa.as_deref()
    }

    pub fn smt_backend(&self) -> Option<&BackendZ3> {
        self.z3.as_deref()
    }

    /// Milliseconds granted to each subsequent solver query.
    pub fn set_solver_timeout(&self, ms: Option<u32>) {
        if let Some(z3) = &self.z3 {
            z3.set_timeout(ms);
        }
    }

    fn solver_backend(&self) -> Result<Rc<BackendZ3>, ChimeError> {
        self.z3
            .clone()
            .ok_or_else(|| ChimeError::Smt("no solver backend configured".to_string()))
    }

    pub fn solver(&self) -> Result<BranchingSolver, ChimeError> {
        Ok(BranchingSolver::new(self.solver_backend()?))
    }

    pub fn composite_solver(&self) -> Result<CompositeSolver, ChimeError> {
        Ok(CompositeSolver::new(self.solver_backend()?))
    }

    // expression constructors

    pub fn bv_sym(&self, name: impl Into<String>, bits: u32) -> AstRef {
        ast::bv_sym(name, bits)
    }

    pub fn bv_val(&self, value: u64, bits: u32) -> AstRef {
        ast::bvv(value, bits)
    }

    pub fn bvv(&self, value: u64, bits: u32) -> BVV {
        BVV::new(value, bits)
    }

    pub fn bool_val(&self, b: bool) -> AstRef {
        ast::bool_val(b)
    }

    pub fn si(&self, bits: u32, stride: u64, lower: i128, upper: i128) -> AstRef {
        ast::si_val(StridedInterval::new(bits, stride, lower, upper))
    }

    pub fn value_set(&self, bits: u32, region: impl Into<String>, value: u64) -> AstRef {
        ast::vs_val(ValueSet::with_value(bits, region, value))
    }

    pub fn empty_value_set(&self, bits: u32) -> AstRef {
        ast::vs_val(ValueSet::new(bits))
    }

    pub fn and(&self, operands: &[AstRef]) -> Result<AstRef, ChimeError> {
        ast::make(
            Op::BoolAnd,
            operands.iter().cloned().map(Arg::Node).collect(),
        )
    }

    pub fn or(&self, operands: &[AstRef]) -> Result<AstRef, ChimeError> {
        ast::make(Op::BoolOr, operands.iter().cloned().map(Arg::Node).collect())
    }

    pub fn not(&self, operand: &AstRef) -> Result<AstRef, ChimeError> {
        ast::make(Op::BoolNot, vec![Arg::Node(operand.clone())])
    }

    pub fn implies(&self, a: &AstRef, b: &AstRef) -> Result<AstRef, ChimeError> {
        ast::make(Op::Implies, vec![Arg::Node(a.clone()), Arg::Node(b.clone())])
    }

    pub fn if_(&self, cond: &AstRef, t: &AstRef, f: &AstRef) -> Result<AstRef, ChimeError> {
        cond.ite(t, f)
    }

    /// A case tree keyed by equality on `e`: the first matching key wins.
    pub fn ite_dict(
        &self,
        e: &AstRef,
        cases: &[(AstRef, AstRef)],
        default: &AstRef,
    ) -> Result<AstRef, ChimeError> {
        let mut acc = default.clone();
        for (key, value) in cases.iter().rev() {
            acc = e.eq_(key)?.ite(value, &acc)?;
        }
        Ok(acc)
    }

    /// A case tree over arbitrary conditions, first match wins.
    pub fn ite_cases(
        &self,
        cases: &[(AstRef, AstRef)],
        default: &AstRef,
    ) -> Result<AstRef, ChimeError> {
        let mut acc = default.clone();
        for (cond, value) in cases.iter().rev() {
            acc = cond.ite(value, &acc)?;
        }
        Ok(acc)
    }

    /// Resolve to a concrete value through the concrete backend.
    pub fn concrete_value(&self, e: &AstRef) -> Result<Value, ChimeError> {
        Ok(self.concrete.resolve(e, None)?)
    }

    /// Resolve through the model backends in precedence order.
    pub fn abstract_value(&self, e: &AstRef) -> Result<VsaValue, ChimeError> {
        if let Ok(v) = self.concrete.resolve(e, None) {
            return Ok(VsaValue::from_value(&v)?);
        }
        match &self.vsa {
            Some(vsa) => Ok(vsa.resolve(e, None)?),
            None => Err(ChimeError::Backend(
                crate::error::BackendError::SymbolicLeaf,
            )),
        }
    }

    pub fn is_true(&self, e: &AstRef) -> bool {
        if let Some(Value::Bool(b)) = e.value() {
            return *b;
        }
        match &self.vsa {
            Some(vsa) => vsa.is_true(e),
            None => false,
        }
    }

    pub fn is_false(&self, e: &AstRef) -> bool {
        if let Some(Value::Bool(b)) = e.value() {
            return !*b;
        }
        match &self.vsa {
            Some(vsa) => vsa.is_false(e),
            None => false,
        }
    }

    /// Simplify through the solver backend; without one, or on any backend
    /// trouble, the expression comes back unchanged.
    pub fn simplify(&self, e: &AstRef) -> AstRef {
        match &self.z3 {
            Some(z3) => z3.simplify(e),
            None => e.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_fold_concretely() {
        let chime = Chime::serial_z3();
        let e = chime.bv_val(0x01020304, 32);
        assert_eq!(e.length(), Some(32));
        let r = e.reversed().unwrap();
        assert_eq!(
            chime.concrete_value(&r).unwrap().as_bvv().unwrap().value(),
            0x04030201
        );
        assert_eq!(r.length(), Some(32));
    }

    #[test]
    fn model_backend_precedence() {
        let chime = Chime::full();
        let a = chime.bv_val(10, 32);
        let b = chime.bool_val(true);
        let x = chime.bv_sym("x", 32);
        assert!(matches!(
            chime.concrete_value(&a),
            Ok(Value::Bvv(v)) if v.value() == 10
        ));
        assert!(matches!(chime.concrete_value(&b), Ok(Value::Bool(true))));
        // symbolic leaves fall through every model backend
        assert!(chime.concrete_value(&x).is_err());
        assert!(chime.abstract_value(&x).is_err());
        // intervals are refused by the concrete backend and caught by VSA
        let si = chime.si(32, 2, 10, 20);
        assert!(chime.concrete_value(&si).is_err());
        assert!(matches!(
            chime.abstract_value(&si),
            Ok(VsaValue::Si(s)) if s.stride() == 2
        ));
    }

    #[test]
    fn truth_queries() {
        let chime = Chime::vsa();
        assert!(chime.is_true(&chime.bool_val(true)));
        assert!(chime.is_false(&chime.bool_val(false)));
        let s = chime.si(32, 0, 7, 7);
        let eq = s.eq_(&chime.bv_val(7, 32)).unwrap();
        assert!(chime.is_true(&eq));
        let wide = chime.si(32, 1, 0, 10);
        let maybe = wide.eq_(&chime.bv_val(7, 32)).unwrap();
        assert!(!chime.is_true(&maybe));
        assert!(!chime.is_false(&maybe));
    }

    #[test]
    fn ite_helpers_build_nested_conditionals() {
        let chime = Chime::serial_z3();
        let x = chime.bv_sym("x", 32);
        let cases: Vec<(AstRef, AstRef)> = [(1u64, 11u64), (2, 22), (3, 33)]
            .iter()
            .map(|(k, v)| (chime.bv_val(*k, 32), chime.bv_val(*v, 32)))
            .collect();
        let tree = chime
            .ite_dict(&x, &cases, &chime.bv_val(0, 32))
            .unwrap();
        assert_eq!(tree.op(), Op::If);
        assert!(tree.variables().contains("x"));
        let s = chime.solver().unwrap();
        let mut vals: Vec<u64> = s
            .eval(&tree, 100, &[])
            .unwrap()
            .iter()
            .map(|v| v.as_bvv().unwrap().value())
            .collect();
        vals.sort_unstable();
        assert_eq!(vals, [0, 11, 22, 33]);
    }

    #[test]
    fn no_solver_backend_is_an_error() {
        let chime = Chime::vsa();
        assert!(chime.solver().is_err());
        assert!(chime.composite_solver().is_err());
    }
}
