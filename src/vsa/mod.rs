//! The value-set-analysis abstract domain: strided intervals, discrete
//! interval sets, region-partitioned value sets, lazy conditionals, and the
//! operator dispatch that lifts the IR operator set over all of them.

pub mod backend;
mod bool_result;
mod discrete_set;
mod if_proxy;
mod strided_interval;
mod value_set;

pub use backend::BackendVSA;
pub use bool_result::BoolResult;
pub use discrete_set::DiscreteStridedIntervalSet;
pub use if_proxy::IfProxy;
pub use strided_interval::StridedInterval;
pub use value_set::ValueSet;

use crate::ast::{AstRef, Op, Value};
use crate::bv::BVV;
use crate::error::BackendError;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide switch for discrete strided-interval sets. When off, unions
/// of intervals immediately collapse to their hull.
static ALLOW_DSIS: AtomicBool = AtomicBool::new(true);

pub fn set_allow_dsis(allow: bool) {
    ALLOW_DSIS.store(allow, Ordering::Relaxed);
}

pub fn allow_dsis() -> bool {
    ALLOW_DSIS.load(Ordering::Relaxed)
}

/// What the VSA backend computes for an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum VsaValue {
    Si(StridedInterval),
    Dsis(DiscreteStridedIntervalSet),
    Vs(ValueSet),
    If(IfProxy),
    Bool(BoolResult),
}

impl VsaValue {
    pub fn bits(&self) -> Option<u32> {
        match self {
            VsaValue::Si(si) => Some(si.bits()),
            VsaValue::Dsis(d) => Some(d.bits()),
            VsaValue::Vs(vs) => Some(vs.bits()),
            VsaValue::If(p) => p.bits(),
            VsaValue::Bool(_) => None,
        }
    }

    pub fn from_value(v: &Value) -> Result<Self, BackendError> {
        match v {
            Value::Bvv(b) => Ok(VsaValue::Si(StridedInterval::singleton(
                b.bits(),
                b.value() as i128,
            ))),
            Value::Bool(b) => Ok(VsaValue::Bool(BoolResult::from(*b))),
            Value::Si(si) => Ok(VsaValue::Si(*si)),
            Value::Dsis(d) => Ok(VsaValue::Dsis(d.clone())),
            Value::Vs(vs) => Ok(VsaValue::Vs(vs.clone())),
            Value::UInt(_) | Value::Str(_) => Err(BackendError::WrongKind),
        }
    }

    pub fn as_si(&self) -> Option<&StridedInterval> {
        match self {
            VsaValue::Si(si) => Some(si),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<BoolResult> {
        match self {
            VsaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Smallest value the set can take, read off the stored lower bounds on
    /// the signed line.
    pub fn min_value(&self) -> i128 {
        match self {
            VsaValue::Si(si) => si.lower_signed(),
            VsaValue::Dsis(d) => d
                .members()
                .iter()
                .map(StridedInterval::lower_signed)
                .min()
                .unwrap_or(0),
            VsaValue::Vs(vs) => vs.signed_min(),
            VsaValue::If(p) => p.iftrue().min_value().min(p.iffalse().min_value()),
            VsaValue::Bool(_) => 0,
        }
    }

    /// Largest value, read off the stored upper bounds unsigned.
    pub fn max_value(&self) -> u64 {
        match self {
            VsaValue::Si(si) => si.upper_bound(),
            VsaValue::Dsis(d) => d
                .members()
                .iter()
                .map(StridedInterval::upper_bound)
                .max()
                .unwrap_or(0),
            VsaValue::Vs(vs) => vs.unsigned_max(),
            VsaValue::If(p) => p.iftrue().max_value().max(p.iffalse().max_value()),
            VsaValue::Bool(_) => 0,
        }
    }

    /// Up to `n` concrete members, ascending.
    pub fn values(&self, n: usize) -> Vec<u64> {
        match self {
            VsaValue::Si(si) => si.values(n),
            VsaValue::Dsis(d) => d.values(n),
            VsaValue::Vs(vs) => vs.values(n),
            VsaValue::If(p) => {
                let mut out = p.iftrue().values(n);
                out.extend(p.iffalse().values(n));
                out.sort_unstable();
                out.dedup();
                out.truncate(n);
                out
            }
            VsaValue::Bool(BoolResult::True) => vec![1],
            VsaValue::Bool(BoolResult::False) => vec![0],
            VsaValue::Bool(BoolResult::Maybe) => vec![0, 1],
        }
    }

    /// Join two abstract values. Interval joins promote to a discrete set
    /// while the switch allows it.
    pub fn union(&self, other: &Self) -> Result<Self, BackendError> {
        match (self, other) {
            (VsaValue::If(p), o) => p.collapse()?.union(o),
            (s, VsaValue::If(p)) => s.union(&p.collapse()?),
            (VsaValue::Si(a), VsaValue::Si(b)) => {
                if allow_dsis() {
                    Ok(VsaValue::Dsis(DiscreteStridedIntervalSet::from_members(
                        a.bits(),
                        [*a, *b],
                    )))
                } else {
                    Ok(VsaValue::Si(a.union(b)))
                }
            }
            (VsaValue::Dsis(a), VsaValue::Dsis(b)) => Ok(VsaValue::Dsis(a.union(b))),
            (VsaValue::Dsis(a), VsaValue::Si(b)) => {
                Ok(VsaValue::Dsis(a.union(&DiscreteStridedIntervalSet::from_si(*b))))
            }
            (VsaValue::Si(a), VsaValue::Dsis(b)) => {
                Ok(VsaValue::Dsis(DiscreteStridedIntervalSet::from_si(*a).union(b)))
            }
            (VsaValue::Vs(a), VsaValue::Vs(b)) => Ok(VsaValue::Vs(a.union(b))),
            (VsaValue::Bool(a), VsaValue::Bool(b)) => Ok(VsaValue::Bool(a.union(b))),
            _ => Err(BackendError::WrongKind),
        }
    }

    pub fn intersection(&self, other: &Self) -> Result<Self, BackendError> {
        match (self, other) {
            (VsaValue::If(p), o) => p.collapse()?.intersection(o),
            (s, VsaValue::If(p)) => s.intersection(&p.collapse()?),
            (VsaValue::Si(a), VsaValue::Si(b)) => Ok(VsaValue::Si(a.intersection(b))),
            (VsaValue::Dsis(a), VsaValue::Dsis(b)) => {
                let i = a.intersection(b);
                if i.members().len() == 1 {
                    Ok(VsaValue::Si(i.members()[0]))
                } else {
                    Ok(VsaValue::Dsis(i))
                }
            }
            (VsaValue::Dsis(a), VsaValue::Si(b)) => {
                VsaValue::Dsis(a.clone()).intersection(&VsaValue::Dsis(
                    DiscreteStridedIntervalSet::from_si(*b),
                ))
            }
            (VsaValue::Si(a), VsaValue::Dsis(b)) => {
                VsaValue::Dsis(DiscreteStridedIntervalSet::from_si(*a))
                    .intersection(&VsaValue::Dsis(b.clone()))
            }
            _ => Err(BackendError::WrongKind),
        }
    }
}

impl IfProxy {
    /// Join of the two branches, for callers that need one value.
    pub fn collapse(&self) -> Result<VsaValue, BackendError> {
        self.iftrue().union(self.iffalse())
    }
}

impl Display for VsaValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VsaValue::Si(si) => write!(f, "{si}"),
            VsaValue::Dsis(d) => write!(f, "{d}"),
            VsaValue::Vs(vs) => write!(f, "{vs}"),
            VsaValue::If(p) => write!(f, "{p}"),
            VsaValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

fn si_unop(op: Op, params: &[u64], a: &StridedInterval) -> Result<StridedInterval, BackendError> {
    match op {
        Op::Neg => Ok(a.neg()),
        Op::Invert => Ok(a.invert()),
        Op::Reverse => Ok(reverse_si(a)),
        Op::Extract => Ok(a.extract(params[0] as u32, params[1] as u32)),
        Op::SignExt => Ok(a.sign_extend(params[0] as u32)),
        Op::ZeroExt => Ok(a.zero_extend(params[0] as u32)),
        Op::Repeat => {
            let mut out = *a;
            for _ in 1..params[0] {
                out = out.concat(a);
            }
            Ok(out)
        }
        _ => Err(BackendError::UnsupportedOp(op.name())),
    }
}

fn reverse_si(a: &StridedInterval) -> StridedInterval {
    let bytes = a.bits() / 8;
    if bytes <= 1 {
        return *a;
    }
    if let Some(v) = a.as_singleton() {
        let r = BVV::new(v, a.bits()).reverse();
        return StridedInterval::singleton(a.bits(), r.value() as i128);
    }
    let mut out = a.extract(7, 0);
    for i in 1..bytes {
        out = out.concat(&a.extract(i * 8 + 7, i * 8));
    }
    out
}

fn si_binop(op: Op, a: &StridedInterval, b: &StridedInterval) -> Result<StridedInterval, BackendError> {
    match op {
        Op::Add => Ok(a.add(b)),
        Op::Sub => Ok(a.sub(b)),
        Op::Mul => Ok(a.mul(b)),
        Op::Div => Ok(a.sdiv(b)),
        Op::Mod => Ok(a.srem(b)),
        Op::And => Ok(a.and(b)),
        Op::Or => Ok(a.or(b)),
        Op::Xor => Ok(a.xor(b)),
        Op::Shl => Ok(a.shl(b)),
        Op::Shr => Ok(a.ashr(b)),
        Op::LShR => Ok(a.lshr(b)),
        Op::RotateLeft => Ok(a.rotate_left(b)),
        Op::RotateRight => Ok(a.rotate_right(b)),
        Op::Concat => Ok(a.concat(b)),
        Op::Pow => match (a.as_singleton(), b.as_singleton()) {
            (Some(x), Some(y)) => {
                let r = BVV::new(x, a.bits()).pow(&BVV::new(y, b.bits()));
                Ok(StridedInterval::singleton(a.bits(), r.value() as i128))
            }
            _ => Ok(StridedInterval::top(a.bits())),
        },
        _ => Err(BackendError::UnsupportedOp(op.name())),
    }
}

fn compare(op: Op, a: &VsaValue, b: &VsaValue) -> Result<BoolResult, BackendError> {
    if let VsaValue::If(p) = a {
        let t = compare(op, p.iftrue(), b)?;
        let f = compare(op, p.iffalse(), b)?;
        return Ok(t.union(&f));
    }
    if let VsaValue::If(p) = b {
        let t = compare(op, a, p.iftrue())?;
        let f = compare(op, a, p.iffalse())?;
        return Ok(t.union(&f));
    }
    let si_cmp = |x: &StridedInterval, y: &StridedInterval| -> Result<BoolResult, BackendError> {
        Ok(match op {
            Op::Eq => x.eq_(y),
            Op::Ne => x.ne_(y),
            Op::ULt => x.ult(y),
            Op::ULe => x.ule(y),
            Op::UGt => x.ugt(y),
            Op::UGe => x.uge(y),
            Op::SLt => x.slt(y),
            Op::SLe => x.sle(y),
            Op::SGt => x.sgt(y),
            Op::SGe => x.sge(y),
            _ => return Err(BackendError::UnsupportedOp(op.name())),
        })
    };
    match (a, b) {
        (VsaValue::Si(x), VsaValue::Si(y)) => si_cmp(x, y),
        (VsaValue::Dsis(x), VsaValue::Dsis(y)) => si_cmp(&x.collapse(), &y.collapse()),
        (VsaValue::Dsis(x), VsaValue::Si(y)) => si_cmp(&x.collapse(), y),
        (VsaValue::Si(x), VsaValue::Dsis(y)) => si_cmp(x, &y.collapse()),
        (VsaValue::Vs(x), VsaValue::Vs(y)) => match op {
            Op::Eq => Ok(x.eq_(y)),
            Op::Ne => Ok(x.eq_(y).not()),
            _ => Err(BackendError::UnsupportedOp(op.name())),
        },
        (VsaValue::Bool(x), VsaValue::Bool(y)) => match op {
            Op::Eq => Ok(x.xor(y).not()),
            Op::Ne => Ok(x.xor(y)),
            _ => Err(BackendError::UnsupportedOp(op.name())),
        },
        _ => Ok(BoolResult::Maybe),
    }
}

fn apply1(
    op: Op,
    params: &[u64],
    a: &VsaValue,
) -> Result<VsaValue, BackendError> {
    match a {
        VsaValue::If(p) => Ok(VsaValue::If(IfProxy::new(
            p.cond().clone(),
            apply1(op, params, p.iftrue())?,
            apply1(op, params, p.iffalse())?,
        ))),
        VsaValue::Si(si) => Ok(VsaValue::Si(si_unop(op, params, si)?)),
        VsaValue::Dsis(d) => {
            // widths may change (extract, extension), so rebuild the set
            let mut results = Vec::new();
            for m in d.members() {
                results.push(si_unop(op, params, m)?);
            }
            let bits = results.first().map_or(d.bits(), StridedInterval::bits);
            Ok(VsaValue::Dsis(DiscreteStridedIntervalSet::from_members(
                bits, results,
            )))
        }
        VsaValue::Vs(vs) => {
            let mut results = Vec::new();
            for (region, si) in vs.regions() {
                results.push((region.to_string(), si_unop(op, params, si)?));
            }
            let bits = results.first().map_or(vs.bits(), |(_, s)| s.bits());
            let mut out = ValueSet::new(bits);
            for (region, si) in results {
                out.merge_si(region, si);
            }
            Ok(VsaValue::Vs(out))
        }
        VsaValue::Bool(b) => match op {
            Op::BoolNot => Ok(VsaValue::Bool(b.not())),
            _ => Err(BackendError::WrongKind),
        },
    }
}

fn apply2(op: Op, a: &VsaValue, b: &VsaValue) -> Result<VsaValue, BackendError> {
    match (a, b) {
        (VsaValue::If(p), VsaValue::If(q)) => {
            if p.cond() == q.cond() {
                Ok(VsaValue::If(IfProxy::new(
                    p.cond().clone(),
                    apply2(op, p.iftrue(), q.iftrue())?,
                    apply2(op, p.iffalse(), q.iffalse())?,
                )))
            } else if IfProxy::complementary(p.cond(), q.cond()) {
                Ok(VsaValue::If(IfProxy::new(
                    p.cond().clone(),
                    apply2(op, p.iftrue(), q.iffalse())?,
                    apply2(op, p.iffalse(), q.iftrue())?,
                )))
            } else {
                apply2(op, &p.collapse()?, &q.collapse()?)
            }
        }
        (VsaValue::If(p), o) => Ok(VsaValue::If(IfProxy::new(
            p.cond().clone(),
            apply2(op, p.iftrue(), o)?,
            apply2(op, p.iffalse(), o)?,
        ))),
        (s, VsaValue::If(p)) => Ok(VsaValue::If(IfProxy::new(
            p.cond().clone(),
            apply2(op, s, p.iftrue())?,
            apply2(op, s, p.iffalse())?,
        ))),
        (VsaValue::Vs(x), VsaValue::Vs(y)) => {
            for (region, p) in x.regions() {
                if let Some(q) = y.get_si(region) {
                    si_binop(op, p, q)?;
                }
            }
            Ok(VsaValue::Vs(x.map_vs(y, |p, q| {
                si_binop(op, p, q).unwrap_or_else(|_| StridedInterval::top(p.bits()))
            })))
        }
        (VsaValue::Vs(x), VsaValue::Si(y)) => {
            for (_, p) in x.regions() {
                si_binop(op, p, y)?;
            }
            Ok(VsaValue::Vs(x.map_si(y, |p, q| {
                si_binop(op, p, q).unwrap_or_else(|_| StridedInterval::top(p.bits()))
            })))
        }
        (VsaValue::Si(x), VsaValue::Vs(y)) => {
            for (_, q) in y.regions() {
                si_binop(op, x, q)?;
            }
            Ok(VsaValue::Vs(y.map_si(x, |cur, s| {
                si_binop(op, s, cur).unwrap_or_else(|_| StridedInterval::top(cur.bits()))
            })))
        }
        (VsaValue::Dsis(x), VsaValue::Dsis(y)) => {
            lift_dsis(op, x, y)
        }
        (VsaValue::Dsis(x), VsaValue::Si(y)) => {
            lift_dsis(op, x, &DiscreteStridedIntervalSet::from_si(*y))
        }
        (VsaValue::Si(x), VsaValue::Dsis(y)) => {
            lift_dsis(op, &DiscreteStridedIntervalSet::from_si(*x), y)
        }
        (VsaValue::Si(x), VsaValue::Si(y)) => Ok(VsaValue::Si(si_binop(op, x, y)?)),
        _ => Err(BackendError::WrongKind),
    }
}

fn lift_dsis(
    op: Op,
    x: &DiscreteStridedIntervalSet,
    y: &DiscreteStridedIntervalSet,
) -> Result<VsaValue, BackendError> {
    let mut results = Vec::new();
    for a in x.members() {
        for b in y.members() {
            results.push(si_binop(op, a, b)?);
        }
    }
    let bits = results.first().map_or(x.bits(), StridedInterval::bits);
    Ok(VsaValue::Dsis(DiscreteStridedIntervalSet::from_members(
        bits, results,
    )))
}

/// Apply an operator to translated abstract operands. `params` are the
/// leading `UInt` parameters of the node; `node` supplies the original
/// condition expression for lazy `If` results.
pub(crate) fn apply_op(
    op: Op,
    params: &[u64],
    vals: &[VsaValue],
    node: Option<&AstRef>,
) -> Result<VsaValue, BackendError> {
    match op {
        Op::BoolAnd | Op::BoolOr => {
            let mut acc = vals
                .first()
                .and_then(VsaValue::as_bool)
                .ok_or(BackendError::WrongKind)?;
            for v in &vals[1..] {
                let b = v.as_bool().ok_or(BackendError::WrongKind)?;
                acc = if op == Op::BoolAnd { acc.and(&b) } else { acc.or(&b) };
            }
            Ok(VsaValue::Bool(acc))
        }
        Op::BoolNot => apply1(op, params, &vals[0]),
        Op::BoolXor => {
            let a = vals[0].as_bool().ok_or(BackendError::WrongKind)?;
            let b = vals[1].as_bool().ok_or(BackendError::WrongKind)?;
            Ok(VsaValue::Bool(a.xor(&b)))
        }
        Op::Implies => {
            let a = vals[0].as_bool().ok_or(BackendError::WrongKind)?;
            let b = vals[1].as_bool().ok_or(BackendError::WrongKind)?;
            Ok(VsaValue::Bool(a.not().or(&b)))
        }
        Op::If => {
            let cond = vals[0].as_bool().ok_or(BackendError::WrongKind)?;
            match cond {
                BoolResult::True => Ok(vals[1].clone()),
                BoolResult::False => Ok(vals[2].clone()),
                BoolResult::Maybe => {
                    let cond_node = node
                        .and_then(|n| n.operand(0))
                        .ok_or(BackendError::UnsupportedOp("If"))?;
                    Ok(VsaValue::If(IfProxy::new(
                        cond_node.clone(),
                        vals[1].clone(),
                        vals[2].clone(),
                    )))
                }
            }
        }
        Op::Eq | Op::Ne | Op::ULt | Op::ULe | Op::UGt | Op::UGe | Op::SLt | Op::SLe
        | Op::SGt | Op::SGe => Ok(VsaValue::Bool(compare(op, &vals[0], &vals[1])?)),
        Op::Concat => {
            let mut acc = vals[0].clone();
            for v in &vals[1..] {
                acc = apply2(Op::Concat, &acc, v)?;
            }
            Ok(acc)
        }
        Op::Neg | Op::Invert | Op::Reverse | Op::Extract | Op::SignExt | Op::ZeroExt
        | Op::Repeat => apply1(op, params, &vals[0]),
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Pow | Op::And | Op::Or
        | Op::Xor | Op::Shl | Op::Shr | Op::LShR | Op::RotateLeft | Op::RotateRight => {
            apply2(op, &vals[0], &vals[1])
        }
        Op::BitVec | Op::Val => Err(BackendError::UnsupportedOp(op.name())),
    }
}
