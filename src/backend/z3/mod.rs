//! The SMT backend: operator-table translation into z3 terms, satisfiability
//! and model queries, binary-search min/max, tactic-based simplification,
//! and abstraction back into IR.

mod abstraction;
mod tactics;

use crate::ast::{self, Arg, AstRef, Op, Value};
use crate::backend::{Backend, ModelMap};
use crate::bv::BVV;
use crate::error::{BackendError, ChimeError};
use crate::solver::SolverResult;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, instrument};
use z3::ast::{Ast, BV, Bool, Dynamic};
use z3::{Model, Params, SatResult, Solver};

/// A translated expression: z3 keeps bit-vector and boolean sorts apart, so
/// the native value carries the distinction.
#[derive(Debug, Clone)]
pub enum SmtAst {
    BitVec(BV),
    Boolean(Bool),
}

impl SmtAst {
    fn as_bv(&self) -> Result<&BV, BackendError> {
        match self {
            SmtAst::BitVec(bv) => Ok(bv),
            SmtAst::Boolean(_) => Err(BackendError::WrongKind),
        }
    }

    fn as_bool(&self) -> Result<&Bool, BackendError> {
        match self {
            SmtAst::Boolean(b) => Ok(b),
            SmtAst::BitVec(_) => Err(BackendError::WrongKind),
        }
    }
}

#[derive(Debug, Default)]
pub struct BackendZ3 {
    cache: RefCell<HashMap<u64, SmtAst>>,
    abstraction_cache: RefCell<HashMap<u64, AstRef>>,
    timeout_ms: Cell<Option<u32>>,
}

impl BackendZ3 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout applied to solvers created after the call, in milliseconds.
    pub fn set_timeout(&self, ms: Option<u32>) {
        self.timeout_ms.set(ms);
    }

    pub fn solver(&self) -> Solver {
        let s = Solver::new();
        if let Some(ms) = self.timeout_ms.get() {
            let mut p = Params::new();
            p.set_u32("timeout", ms);
            s.set_params(&p);
        }
        s
    }

    fn unknown_err(&self) -> ChimeError {
        if self.timeout_ms.get().is_some() {
            ChimeError::SolverTimeout
        } else {
            ChimeError::Smt("solver returned unknown".to_string())
        }
    }

    fn resolve_bool(&self, e: &AstRef) -> Result<Bool, ChimeError> {
        Ok(self.resolve(e, None)?.as_bool()?.clone())
    }

    pub fn add(&self, s: &Solver, constraints: &[AstRef]) -> Result<(), ChimeError> {
        for c in constraints {
            s.assert(&self.resolve_bool(c)?);
        }
        Ok(())
    }

    /// One satisfiability verdict, with optional extra constraints applied
    /// inside their own frame.
    #[instrument(skip_all)]
    pub fn check(&self, s: &Solver, extra: &[AstRef]) -> Result<bool, ChimeError> {
        let extras: Vec<Bool> = extra
            .iter()
            .map(|c| self.resolve_bool(c))
            .collect::<Result<_, _>>()?;
        if !extras.is_empty() {
            s.push();
            for b in &extras {
                s.assert(b);
            }
        }
        debug!("doing a check");
        let verdict = s.check();
        if !extras.is_empty() {
            s.pop(1);
        }
        match verdict {
            SatResult::Sat => Ok(true),
            SatResult::Unsat => Ok(false),
            SatResult::Unknown => Err(self.unknown_err()),
        }
    }

    /// Check and, on sat, pull a generic model for the given symbols.
    #[instrument(skip_all)]
    pub fn results(
        &self,
        s: &Solver,
        extra: &[AstRef],
        symbols: &HashMap<String, u32>,
    ) -> Result<SolverResult, ChimeError> {
        let extras: Vec<Bool> = extra
            .iter()
            .map(|c| self.resolve_bool(c))
            .collect::<Result<_, _>>()?;
        if !extras.is_empty() {
            s.push();
            for b in &extras {
                s.assert(b);
            }
        }
        debug!("doing a check");
        let verdict = s.check();
        let mut model = ModelMap::new();
        let mut backend_model = None;
        if verdict == SatResult::Sat {
            if let Some(m) = s.get_model() {
                for (name, bits) in symbols {
                    let c = BV::new_const(name.as_str(), *bits);
                    if let Some(v) = m.eval(&c, true).and_then(|r| r.as_u64()) {
                        model.insert(name.clone(), Value::Bvv(BVV::new(v, *bits)));
                    }
                }
                backend_model = Some(Rc::new(m));
            }
        }
        if !extras.is_empty() {
            s.pop(1);
        }
        match verdict {
            SatResult::Unknown => Err(self.unknown_err()),
            v => Ok(SolverResult {
                sat: v == SatResult::Sat,
                model,
                backend_model,
            }),
        }
    }

    /// Up to `n` distinct concretizations of `e`. A cached model answers the
    /// first sample for free; later samples exclude earlier ones inside a
    /// frame. Unsat on the very first check is an error, running dry later
    /// just ends the enumeration.
    #[instrument(skip_all)]
    pub fn eval(
        &self,
        s: &Solver,
        e: &AstRef,
        n: usize,
        extra: &[AstRef],
        cached: Option<&SolverResult>,
    ) -> Result<Vec<Value>, ChimeError> {
        let native = self.resolve(e, None)?;
        let extras: Vec<Bool> = extra
            .iter()
            .map(|c| self.resolve_bool(c))
            .collect::<Result<_, _>>()?;
        let framed = !extras.is_empty() || n != 1;
        if framed {
            s.push();
        }
        let mut model: Option<Rc<Model>> = if extras.is_empty() {
            cached.and_then(|r| r.backend_model.clone())
        } else {
            for b in &extras {
                s.assert(b);
            }
            None
        };
        let mut out: Vec<Value> = Vec::new();
        let mut unknown = false;
        for i in 0..n {
            if model.is_none() {
                debug!("doing a check");
                match s.check() {
                    SatResult::Sat => model = s.get_model().map(Rc::new),
                    SatResult::Unsat => break,
                    SatResult::Unknown => {
                        unknown = true;
                        break;
                    }
                }
            }
            let Some(m) = model.as_ref() else { break };
            let v = match &native {
                SmtAst::BitVec(bv) => m
                    .eval(bv, true)
                    .and_then(|r| r.as_u64())
                    .map(|u| Value::Bvv(BVV::new(u, bv.get_size()))),
                SmtAst::Boolean(b) => m.eval(b, true).and_then(|r| r.as_bool()).map(Value::Bool),
            };
            let Some(v) = v else { break };
            out.push(v.clone());
            if i + 1 != n {
                match (&native, &v) {
                    (SmtAst::BitVec(bv), Value::Bvv(c)) => {
                        s.assert(&bv.eq(&BV::from_u64(c.value(), c.bits())).not());
                    }
                    (SmtAst::Boolean(b), Value::Bool(c)) => {
                        s.assert(&b.eq(&Bool::from_bool(*c)).not());
                    }
                    _ => {}
                }
                model = None;
            }
        }
        if framed {
            s.pop(1);
        }
        if unknown {
            return Err(self.unknown_err());
        }
        if out.is_empty() {
            return Err(ChimeError::Unsat);
        }
        Ok(out)
    }

    /// Smallest unsigned value of `e`, by binary search over `[0, 2^w - 1]`.
    /// Sat probes narrow from above and stay pushed; unsat probes pop
    /// immediately so no stale bound leaks into the next one.
    #[instrument(skip_all)]
    pub fn min(&self, s: &Solver, e: &AstRef, extra: &[AstRef]) -> Result<u64, ChimeError> {
        let bv = self.resolve(e, None)?.as_bv()?.clone();
        let w = bv.get_size();
        let extras: Vec<Bool> = extra
            .iter()
            .map(|c| self.resolve_bool(c))
            .collect::<Result<_, _>>()?;
        let mut lo: u64 = 0;
        let mut hi: u64 = width_max(w)?;
        let mut numpop = 0;
        if !extras.is_empty() {
            s.push();
            numpop += 1;
            for b in &extras {
                s.assert(b);
            }
        }
        while hi - lo > 1 {
            let middle = midpoint(lo, hi);
            s.push();
            numpop += 1;
            s.assert(&bv.bvuge(&BV::from_u64(lo, w)));
            s.assert(&bv.bvule(&BV::from_u64(middle, w)));
            debug!("doing a check");
            match s.check() {
                SatResult::Sat => hi = middle,
                SatResult::Unsat => {
                    lo = middle;
                    s.pop(1);
                    numpop -= 1;
                }
                SatResult::Unknown => {
                    s.pop(numpop);
                    return Err(self.unknown_err());
                }
            }
        }
        if numpop > 0 {
            s.pop(numpop);
        }
        if hi == lo {
            return Ok(lo);
        }
        s.push();
        s.assert(&bv.eq(&BV::from_u64(lo, w)));
        debug!("doing a check");
        let reaches_lo = s.check() == SatResult::Sat;
        s.pop(1);
        Ok(if reaches_lo { lo } else { hi })
    }

    /// Largest unsigned value of `e`; the mirror image of [`Self::min`].
    #[instrument(skip_all)]
    pub fn max(&self, s: &Solver, e: &AstRef, extra: &[AstRef]) -> Result<u64, ChimeError> {
        let bv = self.resolve(e, None)?.as_bv()?.clone();
        let w = bv.get_size();
        let extras: Vec<Bool> = extra
            .iter()
            .map(|c| self.resolve_bool(c))
            .collect::<Result<_, _>>()?;
        let mut lo: u64 = 0;
        let mut hi: u64 = width_max(w)?;
        let mut numpop = 0;
        if !extras.is_empty() {
            s.push();
            numpop += 1;
            for b in &extras {
                s.assert(b);
            }
        }
        while hi - lo > 1 {
            let middle = midpoint(lo, hi);
            s.push();
            numpop += 1;
            s.assert(&bv.bvugt(&BV::from_u64(middle, w)));
            s.assert(&bv.bvule(&BV::from_u64(hi, w)));
            debug!("doing a check");
            match s.check() {
                SatResult::Sat => lo = middle,
                SatResult::Unsat => {
                    hi = middle;
                    s.pop(1);
                    numpop -= 1;
                }
                SatResult::Unknown => {
                    s.pop(numpop);
                    return Err(self.unknown_err());
                }
            }
        }
        if numpop > 0 {
            s.pop(numpop);
        }
        if hi == lo {
            return Ok(lo);
        }
        s.push();
        s.assert(&bv.eq(&BV::from_u64(hi, w)));
        debug!("doing a check");
        let reaches_hi = s.check() == SatResult::Sat;
        s.pop(1);
        Ok(if reaches_hi { hi } else { lo })
    }

    /// Simplify through the solver. Boolean shapes go through the tactic
    /// pipeline, bit-vectors through the plain simplifier; results the
    /// concrete backend recognizes come back as value leaves, everything
    /// else is reified. Never fails: any backend trouble returns the input.
    pub fn simplify(&self, e: &AstRef) -> AstRef {
        if e.is_simplified() {
            return e.clone();
        }
        let out = self.try_simplify(e).unwrap_or_else(|_| e.clone());
        out.mark_simplified();
        out
    }

    fn try_simplify(&self, e: &AstRef) -> Result<AstRef, ChimeError> {
        match self.resolve(e, None)? {
            SmtAst::Boolean(b) => {
                let s = tactics::simplify_bool(&b).map_err(ChimeError::Smt)?;
                if let Some(v) = s.as_bool() {
                    return Ok(ast::bool_val(v));
                }
                self.abstract_ast(&Dynamic::from_ast(&s))
            }
            SmtAst::BitVec(bv) => {
                let s = bv.simplify();
                if let Some(v) = s.as_u64() {
                    return Ok(ast::bvv(v, s.get_size()));
                }
                self.abstract_ast(&Dynamic::from_ast(&s))
            }
        }
    }

    /// Rebuild an IR tree from a native expression.
    pub fn abstract_ast(&self, d: &Dynamic) -> Result<AstRef, ChimeError> {
        abstraction::abstract_dynamic(&self.abstraction_cache, d)
    }
}

fn width_max(w: u32) -> Result<u64, ChimeError> {
    if w > 64 {
        return Err(ChimeError::Smt(format!(
            "cannot range-search a {w}-bit expression"
        )));
    }
    Ok(if w == 64 { u64::MAX } else { (1u64 << w) - 1 })
}

fn midpoint(lo: u64, hi: u64) -> u64 {
    ((lo as u128 + hi as u128) / 2) as u64
}

impl Backend for BackendZ3 {
    type Native = SmtAst;

    fn convert_value(&self, v: &Value) -> Result<SmtAst, BackendError> {
        match v {
            Value::Bvv(b) => Ok(SmtAst::BitVec(BV::from_u64(b.value(), b.bits()))),
            Value::Bool(b) => Ok(SmtAst::Boolean(Bool::from_bool(*b))),
            Value::Si(si) => match si.as_singleton() {
                Some(c) => Ok(SmtAst::BitVec(BV::from_u64(c, si.bits()))),
                None => Err(BackendError::WrongKind),
            },
            _ => Err(BackendError::WrongKind),
        }
    }

    fn convert_symbol(
        &self,
        name: &str,
        bits: u32,
        _model: Option<&ModelMap>,
    ) -> Result<SmtAst, BackendError> {
        Ok(SmtAst::BitVec(BV::new_const(name, bits)))
    }

    fn apply(&self, node: &AstRef, operands: Vec<SmtAst>) -> Result<SmtAst, BackendError> {
        use SmtAst::{BitVec, Boolean};
        let op = node.op();
        let bv2 = |f: fn(&BV, &BV) -> BV| -> Result<SmtAst, BackendError> {
            Ok(BitVec(f(operands[0].as_bv()?, operands[1].as_bv()?)))
        };
        let cmp = |f: fn(&BV, &BV) -> Bool| -> Result<SmtAst, BackendError> {
            Ok(Boolean(f(operands[0].as_bv()?, operands[1].as_bv()?)))
        };
        let param = |i: usize| -> Result<u32, BackendError> {
            node.uint_param(i)
                .map(|p| p as u32)
                .ok_or(BackendError::WrongKind)
        };
        match op {
            Op::Add => bv2(|a, b| a.bvadd(b)),
            Op::Sub => bv2(|a, b| a.bvsub(b)),
            Op::Mul => bv2(|a, b| a.bvmul(b)),
            Op::Div => bv2(|a, b| a.bvsdiv(b)),
            Op::Mod => bv2(|a, b| a.bvsrem(b)),
            Op::And => bv2(|a, b| a.bvand(b)),
            Op::Or => bv2(|a, b| a.bvor(b)),
            Op::Xor => bv2(|a, b| a.bvxor(b)),
            Op::Shl => bv2(|a, b| a.bvshl(b)),
            Op::Shr => bv2(|a, b| a.bvashr(b)),
            Op::LShR => bv2(|a, b| a.bvlshr(b)),
            Op::RotateLeft => bv2(|a, b| a.bvrotl(b)),
            Op::RotateRight => bv2(|a, b| a.bvrotr(b)),
            Op::Neg => Ok(BitVec(operands[0].as_bv()?.bvneg())),
            Op::Invert => Ok(BitVec(operands[0].as_bv()?.bvnot())),
            Op::Pow => Err(BackendError::UnsupportedOp(op.name())),
            Op::ULt => cmp(|a, b| a.bvult(b)),
            Op::ULe => cmp(|a, b| a.bvule(b)),
            Op::UGt => cmp(|a, b| a.bvugt(b)),
            Op::UGe => cmp(|a, b| a.bvuge(b)),
            Op::SLt => cmp(|a, b| a.bvslt(b)),
            Op::SLe => cmp(|a, b| a.bvsle(b)),
            Op::SGt => cmp(|a, b| a.bvsgt(b)),
            Op::SGe => cmp(|a, b| a.bvsge(b)),
            Op::Eq => match (&operands[0], &operands[1]) {
                (BitVec(a), BitVec(b)) => Ok(Boolean(a.eq(b))),
                (Boolean(a), Boolean(b)) => Ok(Boolean(a.eq(b))),
                _ => Err(BackendError::WrongKind),
            },
            Op::Ne => match (&operands[0], &operands[1]) {
                (BitVec(a), BitVec(b)) => Ok(Boolean(a.eq(b).not())),
                (Boolean(a), Boolean(b)) => Ok(Boolean(a.eq(b).not())),
                _ => Err(BackendError::WrongKind),
            },
            Op::BoolAnd | Op::BoolOr => {
                let bools: Vec<Bool> = operands
                    .iter()
                    .map(|o| o.as_bool().cloned())
                    .collect::<Result<_, _>>()?;
                Ok(Boolean(if op == Op::BoolAnd {
                    Bool::and(&bools)
                } else {
                    Bool::or(&bools)
                }))
            }
            Op::BoolNot => Ok(Boolean(operands[0].as_bool()?.not())),
            Op::BoolXor => Ok(Boolean(operands[0].as_bool()?.xor(operands[1].as_bool()?))),
            Op::Implies => Ok(Boolean(
                operands[0].as_bool()?.implies(operands[1].as_bool()?),
            )),
            Op::If => {
                let c = operands[0].as_bool()?;
                match (&operands[1], &operands[2]) {
                    (BitVec(t), BitVec(f)) => Ok(BitVec(c.ite(t, f))),
                    (Boolean(t), Boolean(f)) => Ok(Boolean(c.ite(t, f))),
                    _ => Err(BackendError::WrongKind),
                }
            }
            Op::Concat => {
                let mut acc = operands[0].as_bv()?.clone();
                for o in &operands[1..] {
                    acc = acc.concat(o.as_bv()?);
                }
                Ok(BitVec(acc))
            }
            Op::Extract => Ok(BitVec(operands[0].as_bv()?.extract(param(0)?, param(1)?))),
            Op::SignExt => Ok(BitVec(operands[0].as_bv()?.sign_ext(param(0)?))),
            Op::ZeroExt => Ok(BitVec(operands[0].as_bv()?.zero_ext(param(0)?))),
            Op::Repeat => {
                let bv = operands[0].as_bv()?;
                let mut acc = bv.clone();
                for _ in 1..param(0)? {
                    acc = acc.concat(bv);
                }
                Ok(BitVec(acc))
            }
            Op::Reverse => {
                let bv = operands[0].as_bv()?;
                let size = bv.get_size();
                if size == 8 {
                    return Ok(BitVec(bv.clone()));
                }
                // bytewise swap: the lowest byte becomes the highest
                let mut acc = bv.extract(7, 0);
                let mut i = 8;
                while i < size {
                    acc = acc.concat(&bv.extract(i + 7, i));
                    i += 8;
                }
                Ok(BitVec(acc))
            }
            Op::BitVec | Op::Val => Err(BackendError::UnsupportedOp(op.name())),
        }
    }

    fn size_of(&self, native: &SmtAst) -> Result<u32, BackendError> {
        match native {
            SmtAst::BitVec(bv) => Ok(bv.get_size()),
            SmtAst::Boolean(_) => Err(BackendError::UnknownSize),
        }
    }

    fn name_of(&self, native: &SmtAst) -> Option<String> {
        match native {
            SmtAst::BitVec(bv) => {
                let d = bv.safe_decl().ok()?;
                if d.kind() == z3_sys::DeclKind::UNINTERPRETED {
                    Some(d.name())
                } else {
                    None
                }
            }
            SmtAst::Boolean(_) => None,
        }
    }

    fn cache(&self) -> &RefCell<HashMap<u64, SmtAst>> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{bv_sym, bvv};

    #[test]
    fn translation_round_trips_through_abstraction() {
        let b = BackendZ3::new();
        let x = bv_sym("x", 32);
        let e = (&x + &bvv(5, 32)).eq_(&bvv(15, 32)).unwrap();
        let native = b.resolve(&e, None).unwrap();
        let SmtAst::Boolean(nb) = native else {
            panic!("expected a boolean translation")
        };
        let back = b.abstract_ast(&Dynamic::from_ast(&nb)).unwrap();
        assert_eq!(back.op(), Op::Eq);
        assert!(back.variables().contains("x"));
        // abstraction is memoized on the native hash
        let again = b
            .abstract_ast(&Dynamic::from_ast(&b.resolve(&e, None).unwrap().as_bool().unwrap().clone()))
            .unwrap();
        assert_eq!(back, again);
    }

    #[test]
    fn check_and_eval() {
        let b = BackendZ3::new();
        let s = b.solver();
        let x = bv_sym("x", 32);
        b.add(&s, &[x.eq_(&bvv(10, 32)).unwrap()]).unwrap();
        assert!(b.check(&s, &[]).unwrap());
        assert!(!b.check(&s, &[x.eq_(&bvv(5, 32)).unwrap()]).unwrap());
        // the extra constraint was framed away
        assert!(b.check(&s, &[]).unwrap());

        let vals = b.eval(&s, &(&x + &bvv(5, 32)), 1, &[], None).unwrap();
        assert_eq!(vals[0].as_bvv().unwrap().value(), 15);
    }

    #[test]
    fn eval_enumerates_distinct_models() {
        let b = BackendZ3::new();
        let s = b.solver();
        let x = bv_sym("x", 32);
        b.add(&s, &[x.ult(&bvv(3, 32)).unwrap()]).unwrap();
        let mut vals: Vec<u64> = b
            .eval(&s, &x, 10, &[], None)
            .unwrap()
            .iter()
            .map(|v| v.as_bvv().unwrap().value())
            .collect();
        vals.sort_unstable();
        assert_eq!(vals, [0, 1, 2]);
        // enumeration happened inside a frame
        assert!(b.check(&s, &[]).unwrap());
    }

    #[test]
    fn eval_unsat_is_an_error() {
        let b = BackendZ3::new();
        let s = b.solver();
        let x = bv_sym("x", 32);
        b.add(&s, &[x.eq_(&bvv(1, 32)).unwrap(), x.eq_(&bvv(2, 32)).unwrap()])
            .unwrap();
        assert!(matches!(
            b.eval(&s, &x, 1, &[], None),
            Err(ChimeError::Unsat)
        ));
    }

    #[test]
    fn min_max_search() {
        let b = BackendZ3::new();
        let s = b.solver();
        let x = bv_sym("x", 32);
        let y = bv_sym("y", 32);
        let z = bv_sym("z", 32);
        b.add(
            &s,
            &[
                x.ugt(&bvv(10, 32)).unwrap(),
                x.ugt(&bvv(20, 32)).unwrap(),
                y.ugt(&x).unwrap(),
                z.ult(&bvv(5, 32)).unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(b.min(&s, &z, &[]).unwrap(), 0);
        assert_eq!(b.max(&s, &z, &[]).unwrap(), 4);
        assert_eq!(b.min(&s, &y, &[]).unwrap(), 22);
        assert_eq!(b.max(&s, &y, &[]).unwrap(), u32::MAX as u64);
    }

    #[test]
    fn simplify_collapses_chained_bounds() {
        let b = BackendZ3::new();
        let x = bv_sym("x", 32);
        let both = crate::ast::make(
            Op::BoolAnd,
            vec![
                Arg::Node(x.ugt(&bvv(10, 32)).unwrap()),
                Arg::Node(x.ugt(&bvv(20, 32)).unwrap()),
            ],
        )
        .unwrap();
        let simplified = b.simplify(&both);
        assert!(simplified.is_simplified());
        // simplifying again is the identity
        assert_eq!(b.simplify(&simplified), simplified);
        // the two bounds collapse into a single constraint on x
        assert_ne!(simplified, both);
        assert!(simplified.variables().contains("x"));
    }

    #[test]
    fn reverse_translates_bytewise() {
        let b = BackendZ3::new();
        let s = b.solver();
        let x = bv_sym("x", 32);
        b.add(&s, &[x.eq_(&bvv(0x01020304, 32)).unwrap()]).unwrap();
        let r = x.reversed().unwrap();
        let vals = b.eval(&s, &r, 1, &[], None).unwrap();
        assert_eq!(vals[0].as_bvv().unwrap().value(), 0x04030201);
    }
}
