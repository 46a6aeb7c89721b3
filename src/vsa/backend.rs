//! The VSA backend: translates IR trees into abstract values, answers
//! min/max/eval queries off interval bounds, and extracts interval
//! refinements from branch-condition constraints.

use crate::ast::{AstRef, Op, Value};
use crate::backend::{Backend, ModelMap};
use crate::bv::BVV;
use crate::error::BackendError;
use crate::vsa::{self, BoolResult, StridedInterval, VsaValue};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct BackendVSA {
    cache: RefCell<HashMap<u64, VsaValue>>,
}

impl BackendVSA {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(&self, e: &AstRef) -> Result<VsaValue, BackendError> {
        self.resolve(e, None)
    }

    /// Up to `n` concrete members of the expression's value set.
    pub fn eval(&self, e: &AstRef, n: usize) -> Result<Vec<u64>, BackendError> {
        Ok(self.resolve(e, None)?.values(n))
    }

    pub fn min(&self, e: &AstRef) -> Result<i128, BackendError> {
        Ok(self.resolve(e, None)?.min_value())
    }

    pub fn max(&self, e: &AstRef) -> Result<u64, BackendError> {
        Ok(self.resolve(e, None)?.max_value())
    }

    pub fn is_true(&self, e: &AstRef) -> bool {
        matches!(self.resolve(e, None), Ok(VsaValue::Bool(BoolResult::True)))
    }

    pub fn is_false(&self, e: &AstRef) -> bool {
        matches!(self.resolve(e, None), Ok(VsaValue::Bool(BoolResult::False)))
    }

    /// Read an interval refinement out of a branch condition. The result is
    /// `(satisfiable, [(interval leaf, refined interval)])`; shapes the
    /// matcher does not know return `(true, [])`, meaning "no refinement".
    pub fn constraint_to_si(&self, ast: &AstRef) -> (bool, Vec<(AstRef, StridedInterval)>) {
        match self.refine(ast) {
            Some((sat, list)) => (sat, list),
            None => {
                debug!(constraint = %ast, "no refinement pattern matched");
                (true, vec![])
            }
        }
    }

    fn refine(&self, ast: &AstRef) -> Option<(bool, Vec<(AstRef, StridedInterval)>)> {
        let op = ast.op();
        if !matches!(op, Op::Eq | Op::Ne) {
            return None;
        }
        let (expr, c) = const_side(ast)?;
        let ifnode = peel_to_if(expr)?;
        let tv = leaf_bvv(ifnode.operand(1)?)?;
        let fv = leaf_bvv(ifnode.operand(2)?)?;
        // which branch does `expr == c` select?
        let selects_true = if c.value() == tv.value() {
            true
        } else if c.value() == fv.value() {
            false
        } else {
            // equal to neither branch: the comparison can never hold
            return Some((op == Op::Ne, vec![]));
        };
        let want_true = selects_true ^ (op == Op::Ne);
        let cond = ifnode.operand(0)?;
        let (var, refined) = refine_from_cond(cond, want_true)?;
        Some((!refined.is_empty(), vec![(var, refined)]))
    }
}

/// `(expr, constant)` out of a binary comparison, whichever side the
/// constant is on. Flipping sides inverts the relation for ordered ops, so
/// only commutative comparisons accept a left-hand constant here.
fn const_side(node: &AstRef) -> Option<(&AstRef, BVV)> {
    let lhs = node.operand(0)?;
    let rhs = node.operand(1)?;
    if let Some(c) = leaf_bvv(rhs) {
        return Some((lhs, c));
    }
    if node.op().commutative() {
        if let Some(c) = leaf_bvv(lhs) {
            return Some((rhs, c));
        }
    }
    None
}

fn leaf_bvv(node: &AstRef) -> Option<BVV> {
    match node.value() {
        Some(Value::Bvv(b)) => Some(*b),
        _ => None,
    }
}

fn leaf_si(node: &AstRef) -> Option<StridedInterval> {
    match node.value() {
        Some(Value::Si(si)) => Some(*si),
        _ => None,
    }
}

/// Walk through the wrappers the lifting pipelines put around a boolean:
/// `Extract(0, 0, ...)`, `ZeroExt(k, ...)`, and `Concat(0..., x)` padding.
fn peel_to_if(node: &AstRef) -> Option<&AstRef> {
    match node.op() {
        Op::If => Some(node),
        Op::Extract if node.uint_param(0) == Some(0) && node.uint_param(1) == Some(0) => {
            peel_to_if(node.operand(0)?)
        }
        Op::ZeroExt => peel_to_if(node.operand(0)?),
        Op::Concat => {
            let n = node.operands().count();
            for pad in node.operands().take(n - 1) {
                match leaf_bvv(pad) {
                    Some(b) if b.value() == 0 => {}
                    _ => return None,
                }
            }
            peel_to_if(node.operands().last()?)
        }
        _ => None,
    }
}

/// The interval variable a condition constrains: a strided-interval leaf,
/// possibly behind a low-bits extract of a self-mask (`Extract(hi, 0,
/// x & x)`).
fn peel_var(node: &AstRef) -> Option<&AstRef> {
    if leaf_si(node).is_some() {
        return Some(node);
    }
    match node.op() {
        Op::And if node.operand(0) == node.operand(1) => peel_var(node.operand(0)?),
        Op::Extract if node.uint_param(1) == Some(0) => peel_var(node.operand(0)?),
        _ => None,
    }
}

fn negate_rel(op: Op) -> Op {
    match op {
        Op::Eq => Op::Ne,
        Op::Ne => Op::Eq,
        Op::ULt => Op::UGe,
        Op::UGe => Op::ULt,
        Op::ULe => Op::UGt,
        Op::UGt => Op::ULe,
        Op::SLt => Op::SGe,
        Op::SGe => Op::SLt,
        Op::SLe => Op::SGt,
        Op::SGt => Op::SLe,
        other => other,
    }
}

/// The set of values of width `w` satisfying `x rel c`.
fn implied_range(op: Op, c: &BVV, w: u32) -> Option<StridedInterval> {
    let cv = c.value() as i128;
    let cs = c.as_i64() as i128;
    let smin = -(1i128 << (w - 1));
    let smax = (1i128 << (w - 1)) - 1;
    let umax = if w >= 64 {
        u64::MAX as i128
    } else {
        (1i128 << w) - 1
    };
    let range = |lo: i128, hi: i128| {
        if lo > hi {
            StridedInterval::empty(w)
        } else {
            StridedInterval::new(w, 1, lo, hi)
        }
    };
    Some(match op {
        Op::Eq => StridedInterval::singleton(w, cv),
        // everything but c, as a circular interval
        Op::Ne => StridedInterval::new(w, 1, cv + 1, cv - 1),
        Op::SLt => range(smin, cs - 1),
        Op::SLe => range(smin, cs),
        Op::SGt => range(cs + 1, smax),
        Op::SGe => range(cs, smax),
        Op::ULt => range(0, cv - 1),
        Op::ULe => range(0, cv),
        Op::UGt => range(cv + 1, umax),
        Op::UGe => range(cv, umax),
        _ => return None,
    })
}

fn refine_from_cond(cond: &AstRef, polarity: bool) -> Option<(AstRef, StridedInterval)> {
    let mut op = cond.op();
    if !matches!(
        op,
        Op::Eq
            | Op::Ne
            | Op::ULt
            | Op::ULe
            | Op::UGt
            | Op::UGe
            | Op::SLt
            | Op::SLe
            | Op::SGt
            | Op::SGe
    ) {
        return None;
    }
    let (lhs, c) = const_side(cond)?;
    let var = peel_var(lhs)?;
    let domain = leaf_si(var)?;
    if !polarity {
        op = negate_rel(op);
    }
    let range = implied_range(op, &c, domain.bits())?;
    Some((var.clone(), domain.intersection(&range)))
}

impl Backend for BackendVSA {
    type Native = VsaValue;

    fn convert_value(&self, v: &Value) -> Result<VsaValue, BackendError> {
        VsaValue::from_value(v)
    }

    fn convert_symbol(
        &self,
        name: &str,
        bits: u32,
        model: Option<&ModelMap>,
    ) -> Result<VsaValue, BackendError> {
        match model.and_then(|m| m.get(name)) {
            Some(v) => VsaValue::from_value(v),
            None if model.is_some() => Ok(VsaValue::Si(StridedInterval::singleton(bits, 0))),
            None => Err(BackendError::SymbolicLeaf),
        }
    }

    fn apply(&self, node: &AstRef, operands: Vec<VsaValue>) -> Result<VsaValue, BackendError> {
        let params: Vec<u64> = (0..node.op().parameter_count())
            .filter_map(|i| node.uint_param(i))
            .collect();
        vsa::apply_op(node.op(), &params, &operands, Some(node))
    }

    fn size_of(&self, native: &VsaValue) -> Result<u32, BackendError> {
        native.bits().ok_or(BackendError::UnknownSize)
    }

    fn cache(&self) -> &RefCell<HashMap<u64, VsaValue>> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{bvv, si_val, vs_val};
    use crate::vsa::ValueSet;

    fn si(bits: u32, stride: u64, lower: i128, upper: i128) -> StridedInterval {
        StridedInterval::new(bits, stride, lower, upper)
    }

    #[test]
    fn expressions_resolve_to_intervals() {
        let b = BackendVSA::new();
        let si1 = si_val(si(32, 0, 10, 10));
        let si_a = si_val(si(32, 2, 10, 20));
        let sum = &si1 + &si_a;
        assert_eq!(b.convert(&sum).unwrap(), VsaValue::Si(si(32, 2, 20, 30)));
        // a strided interval leaf is its own symbolic entity
        assert!(sum.symbolic());
        let masked = &si_val(si(32, 1, 0, 0xffff_ffff)) & &bvv(0x8000_0000, 32);
        assert_eq!(
            b.convert(&masked).unwrap(),
            VsaValue::Si(si(32, 0x8000_0000, 0, 0x8000_0000))
        );
    }

    #[test]
    fn if_proxy_stays_lazy() {
        let b = BackendVSA::new();
        let full = si_val(si(32, 1, 0, 0xffff_ffff));
        let cond = full.eq_(&bvv(0, 32)).unwrap();
        let if0 = cond.ite(&full, &(&full - &bvv(1, 32))).unwrap();
        assert_eq!(b.max(&if0).unwrap(), 0xffff_ffff);
        assert_eq!(b.min(&if0).unwrap(), -0x8000_0000);
    }

    #[test]
    fn if_proxy_distributes_through_masks() {
        let b = BackendVSA::new();
        let vs_2 = vs_val(ValueSet::with_value(32, "global", 0x0fa7_b00b));
        let s = si_val(si(32, 1, 0, 1));
        let zero = si_val(si(32, 0, 0, 0));
        let ones = si_val(si(32, 0, 0xffff_ffff, 0xffff_ffff));
        let if_1 = &vs_2 & &s.eq_(&bvv(0, 32)).unwrap().ite(&zero, &ones).unwrap();

        let v = b.convert(&if_1).unwrap();
        let VsaValue::If(p) = v else {
            panic!("expected a lazy conditional, got {v}")
        };
        assert_eq!(
            p.iftrue(),
            &VsaValue::Vs(ValueSet::with_value(32, "global", 0))
        );
        assert_eq!(
            p.iffalse(),
            &VsaValue::Vs(ValueSet::with_value(32, "global", 0x0fa7_b00b))
        );
    }

    #[test]
    fn complementary_proxies_pair_crosswise() {
        let b = BackendVSA::new();
        let s = si_val(si(32, 1, 0, 1));
        let zero = si_val(si(32, 0, 0, 0));
        let ones = si_val(si(32, 0, 0xffff_ffff, 0xffff_ffff));
        let vs_2 = vs_val(ValueSet::with_value(32, "global", 0x0fa7_b00b));
        let vs_3 = vs_val(ValueSet::with_value(32, "global", 0x0dea_dca7));

        let if_1 = &vs_2 & &s.eq_(&bvv(0, 32)).unwrap().ite(&zero, &ones).unwrap();
        let if_2 = &vs_3 & &s.ne_(&bvv(0, 32)).unwrap().ite(&zero, &ones).unwrap();
        let if_3 = &if_1 + &if_2;

        let v = b.convert(&if_3).unwrap();
        let VsaValue::If(p) = v else {
            panic!("expected a lazy conditional, got {v}")
        };
        assert_eq!(
            p.iftrue(),
            &VsaValue::Vs(ValueSet::with_value(32, "global", 0x0dea_dca7))
        );
        assert_eq!(
            p.iffalse(),
            &VsaValue::Vs(ValueSet::with_value(32, "global", 0x0fa7_b00b))
        );
    }

    #[test]
    fn refine_direct_if() {
        let b = BackendVSA::new();
        let s1 = si_val(si(32, 1, 0, 2));
        let ite = s1
            .eq_(&bvv(0, 32))
            .unwrap()
            .ite(&bvv(1, 1), &bvv(0, 1))
            .unwrap();
        let ast_true = ite.eq_(&bvv(1, 1)).unwrap();
        let ast_false = ite.ne_(&bvv(1, 1)).unwrap();

        let (sat, repl) = b.constraint_to_si(&ast_true);
        assert!(sat);
        assert_eq!(repl.len(), 1);
        assert_eq!(repl[0].0, s1);
        assert_eq!(repl[0].1, si(32, 0, 0, 0));

        let (sat, repl) = b.constraint_to_si(&ast_false);
        assert!(sat);
        assert_eq!(repl.len(), 1);
        assert_eq!(repl[0].0, s1);
        assert_eq!(repl[0].1, si(32, 1, 1, 2));
    }

    #[test]
    fn refine_through_concat_padding() {
        let b = BackendVSA::new();
        let s2 = si_val(si(32, 1, 0, 2));
        let ite = s2
            .eq_(&bvv(0, 32))
            .unwrap()
            .ite(&bvv(1, 1), &bvv(0, 1))
            .unwrap();
        let wrapped = bvv(0, 63).concat(&ite).unwrap().extract(0, 0).unwrap();
        let ast_true = wrapped.eq_(&bvv(1, 1)).unwrap();
        let ast_false = wrapped.ne_(&bvv(1, 1)).unwrap();

        let (sat, repl) = b.constraint_to_si(&ast_true);
        assert!(sat);
        assert_eq!(repl[0].1, si(32, 0, 0, 0));
        let (sat, repl) = b.constraint_to_si(&ast_false);
        assert!(sat);
        assert_eq!(repl[0].1, si(32, 1, 1, 2));
    }

    #[test]
    fn refine_through_zero_extension() {
        let b = BackendVSA::new();
        let s3 = si_val(si(32, 1, 0, 2));
        let ite = s3
            .eq_(&bvv(0, 32))
            .unwrap()
            .ite(&bvv(1, 32), &bvv(0, 32))
            .unwrap();
        let wrapped = ite.zero_extend(32).unwrap().extract(0, 0).unwrap();

        let (sat, repl) = b.constraint_to_si(&wrapped.eq_(&bvv(1, 1)).unwrap());
        assert!(sat);
        assert_eq!(repl[0].1, si(32, 0, 0, 0));
        let (sat, repl) = b.constraint_to_si(&wrapped.ne_(&bvv(1, 1)).unwrap());
        assert!(sat);
        assert_eq!(repl[0].1, si(32, 1, 1, 2));
    }

    #[test]
    fn refine_sign_test_through_self_mask() {
        let b = BackendVSA::new();
        let s4 = si_val(si(64, 1, 0, u64::MAX as i128));
        let low = (&s4 & &s4).extract(31, 0).unwrap();
        let ite = low
            .slt(&bvv(0, 32))
            .unwrap()
            .ite(&bvv(1, 32), &bvv(0, 32))
            .unwrap();
        let wrapped = ite.zero_extend(32).unwrap().extract(0, 0).unwrap();

        let (sat, repl) = b.constraint_to_si(&wrapped.eq_(&bvv(1, 1)).unwrap());
        assert!(sat);
        assert_eq!(repl[0].0, s4);
        assert_eq!(repl[0].1, si(64, 1, i64::MIN as i128, -1));

        let (sat, repl) = b.constraint_to_si(&wrapped.ne_(&bvv(1, 1)).unwrap());
        assert!(sat);
        assert_eq!(repl[0].1, si(64, 1, 0, i64::MAX as i128));
    }

    #[test]
    fn unknown_shapes_refine_nothing() {
        let b = BackendVSA::new();
        let s = si_val(si(32, 1, 0, 2));
        let odd = (&s + &bvv(1, 32)).eq_(&bvv(3, 32)).unwrap();
        assert_eq!(b.constraint_to_si(&odd), (true, vec![]));
    }

    #[test]
    fn discrete_sets_evaluate() {
        let v0 = VsaValue::Si(si(32, 0, 0, 0));
        let v1 = VsaValue::Si(si(32, 0, 1, 1));
        let u = v0.union(&v1).unwrap();
        assert!(matches!(u, VsaValue::Dsis(_)));
        let u = u.union(&VsaValue::Si(si(32, 0, 3, 3))).unwrap();
        assert_eq!(u.values(4), [0, 1, 3]);

        let empty = VsaValue::Si(si(32, 0, 0, 0))
            .intersection(&VsaValue::Si(si(32, 0, 1, 1)))
            .unwrap();
        assert_eq!(empty, VsaValue::Si(StridedInterval::empty(32)));
    }
}
