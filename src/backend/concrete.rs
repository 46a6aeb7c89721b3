//! Concrete evaluation. Handles every operator on `BVV` and boolean
//! payloads; anything symbolic or abstract is refused with a typed error so
//! the caller can fall through to the next backend. Used eagerly during
//! interning and lazily when a solver model supplies variable values.

use crate::ast::{AstRef, Op, Value};
use crate::backend::{Backend, ModelMap};
use crate::bv::BVV;
use crate::error::BackendError;
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct BackendConcrete {
    cache: RefCell<HashMap<u64, Value>>,
}

impl BackendConcrete {
    pub fn new() -> Self {
        Self::default()
    }
}

fn bv(v: &Value) -> Result<&BVV, BackendError> {
    v.as_bvv().ok_or(BackendError::WrongKind)
}

fn boolean(v: &Value) -> Result<bool, BackendError> {
    v.as_bool().ok_or(BackendError::WrongKind)
}

fn uint(v: &Value) -> Result<u64, BackendError> {
    match v {
        Value::UInt(u) => Ok(*u),
        _ => Err(BackendError::WrongKind),
    }
}

/// Apply `op` to fully reduced arguments (operator parameters included, in
/// slot order). This is the eager-folding entry point: it is pure, so the
/// interning path can call it without a backend instance.
pub fn call(op: Op, args: &[Value]) -> Result<Value, BackendError> {
    use Value::{Bool, Bvv};
    let binary = |f: fn(&BVV, &BVV) -> BVV| -> Result<Value, BackendError> {
        Ok(Bvv(f(bv(&args[0])?, bv(&args[1])?)))
    };
    let compare = |f: fn(&BVV, &BVV) -> bool| -> Result<Value, BackendError> {
        Ok(Bool(f(bv(&args[0])?, bv(&args[1])?)))
    };
    match op {
        Op::Add => binary(BVV::add),
        Op::Sub => binary(BVV::sub),
        Op::Mul => binary(BVV::mul),
        Op::Pow => binary(BVV::pow),
        Op::And => binary(BVV::and),
        Op::Or => binary(BVV::or),
        Op::Xor => binary(BVV::xor),
        Op::Div => bv(&args[0])?
            .sdiv(bv(&args[1])?)
            .map(Bvv)
            .ok_or(BackendError::DivisionByZero),
        Op::Mod => bv(&args[0])?
            .srem(bv(&args[1])?)
            .map(Bvv)
            .ok_or(BackendError::DivisionByZero),
        Op::Neg => Ok(Bvv(bv(&args[0])?.neg())),
        Op::Invert => Ok(Bvv(bv(&args[0])?.invert())),
        Op::Shl => Ok(Bvv(bv(&args[0])?.shl(bv(&args[1])?.value()))),
        Op::Shr => Ok(Bvv(bv(&args[0])?.ashr(bv(&args[1])?.value()))),
        Op::LShR => Ok(Bvv(bv(&args[0])?.lshr(bv(&args[1])?.value()))),
        Op::RotateLeft => Ok(Bvv(bv(&args[0])?.rotate_left(bv(&args[1])?.value()))),
        Op::RotateRight => Ok(Bvv(bv(&args[0])?.rotate_right(bv(&args[1])?.value()))),
        Op::ULt => compare(BVV::ult),
        Op::ULe => compare(BVV::ule),
        Op::UGt => compare(|a, b| b.ult(a)),
        Op::UGe => compare(|a, b| b.ule(a)),
        Op::SLt => compare(BVV::slt),
        Op::SLe => compare(BVV::sle),
        Op::SGt => compare(|a, b| b.slt(a)),
        Op::SGe => compare(|a, b| b.sle(a)),
        Op::Eq | Op::Ne => {
            let same = match (&args[0], &args[1]) {
                (Bvv(a), Bvv(b)) => a == b,
                (Bool(a), Bool(b)) => a == b,
                _ => return Err(BackendError::WrongKind),
            };
            Ok(Bool(if op == Op::Eq { same } else { !same }))
        }
        Op::BoolAnd => {
            let mut acc = true;
            for a in args {
                acc &= boolean(a)?;
            }
            Ok(Bool(acc))
        }
        Op::BoolOr => {
            let mut acc = false;
            for a in args {
                acc |= boolean(a)?;
            }
            Ok(Bool(acc))
        }
        Op::BoolNot => Ok(Bool(!boolean(&args[0])?)),
        Op::BoolXor => Ok(Bool(boolean(&args[0])? ^ boolean(&args[1])?)),
        Op::Implies => Ok(Bool(!boolean(&args[0])? | boolean(&args[1])?)),
        Op::If => {
            if boolean(&args[0])? {
                Ok(args[1].clone())
            } else {
                Ok(args[2].clone())
            }
        }
        Op::Concat => {
            let mut acc = *bv(&args[0])?;
            for a in &args[1..] {
                acc = acc.concat(bv(a)?);
            }
            Ok(Bvv(acc))
        }
        Op::Extract => {
            let hi = uint(&args[0])? as u32;
            let lo = uint(&args[1])? as u32;
            Ok(Bvv(bv(&args[2])?.extract(hi, lo)))
        }
        Op::SignExt => Ok(Bvv(bv(&args[1])?.sign_extend(uint(&args[0])? as u32))),
        Op::ZeroExt => Ok(Bvv(bv(&args[1])?.zero_extend(uint(&args[0])? as u32))),
        Op::Repeat => Ok(Bvv(bv(&args[1])?.repeat(uint(&args[0])? as u32))),
        Op::Reverse => Ok(Bvv(bv(&args[0])?.reverse())),
        Op::BitVec | Op::Val => Err(BackendError::UnsupportedOp(op.name())),
    }
}

impl Backend for BackendConcrete {
    type Native = Value;

    fn convert_value(&self, v: &Value) -> Result<Value, BackendError> {
        match v {
            Value::Bvv(_) | Value::Bool(_) => Ok(v.clone()),
            _ => Err(BackendError::WrongKind),
        }
    }

    fn convert_symbol(
        &self,
        name: &str,
        bits: u32,
        model: Option<&ModelMap>,
    ) -> Result<Value, BackendError> {
        match model.and_then(|m| m.get(name)) {
            Some(Value::Bvv(b)) if b.bits() == bits => Ok(Value::Bvv(*b)),
            // eval with model completion: an unconstrained variable is zero
            _ if model.is_some() => Ok(Value::Bvv(BVV::new(0, bits))),
            _ => Err(BackendError::SymbolicLeaf),
        }
    }

    fn apply(&self, node: &AstRef, operands: Vec<Value>) -> Result<Value, BackendError> {
        let mut vals: Vec<Value> = node
            .args()
            .iter()
            .take(node.op().parameter_count())
            .filter_map(|a| match a {
                crate::ast::Arg::Val(v) => Some(v.clone()),
                crate::ast::Arg::Node(_) => None,
            })
            .collect();
        vals.extend(operands);
        call(node.op(), &vals)
    }

    fn size_of(&self, native: &Value) -> Result<u32, BackendError> {
        native.bits().ok_or(BackendError::UnknownSize)
    }

    fn cache(&self) -> &RefCell<HashMap<u64, Value>> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{bv_sym, bvv};

    #[test]
    fn resolves_concrete_trees() {
        let b = BackendConcrete::new();
        let e = &bvv(10, 32) + &bvv(5, 32);
        // the tree already folded at construction; resolve sees the leaf
        let v = b.resolve(&e, None).unwrap();
        assert_eq!(v.as_bvv().unwrap().value(), 15);
    }

    #[test]
    fn refuses_symbolic_without_model() {
        let b = BackendConcrete::new();
        let x = bv_sym("x", 32);
        let e = &x + &bvv(5, 32);
        assert_eq!(b.resolve(&e, None), Err(BackendError::SymbolicLeaf));
    }

    #[test]
    fn substitutes_model_values() {
        let b = BackendConcrete::new();
        let x = bv_sym("x", 32);
        let e = &x + &bvv(5, 32);

        let mut m = ModelMap::new();
        m.insert("x".into(), Value::Bvv(BVV::new(10, 32)));
        let v = b.resolve(&e, Some(&m)).unwrap();
        assert_eq!(v.as_bvv().unwrap().value(), 15);

        let mut m2 = ModelMap::new();
        m2.insert("x".into(), Value::Bvv(BVV::new(15, 32)));
        let v2 = b.resolve(&e, Some(&m2)).unwrap();
        assert_eq!(v2.as_bvv().unwrap().value(), 20);
    }

    #[test]
    fn division_by_zero_is_refused() {
        assert_eq!(
            call(
                Op::Div,
                &[Value::Bvv(BVV::new(1, 8)), Value::Bvv(BVV::new(0, 8))]
            ),
            Err(BackendError::DivisionByZero)
        );
    }

    #[test]
    fn boolean_folding() {
        let f = call(
            Op::BoolAnd,
            &[Value::Bool(false), Value::Bool(false), Value::Bool(true)],
        )
        .unwrap();
        assert_eq!(f.as_bool(), Some(false));
        let t = call(
            Op::BoolOr,
            &[Value::Bool(false), Value::Bool(false), Value::Bool(true)],
        )
        .unwrap();
        assert_eq!(t.as_bool(), Some(true));
    }
}
