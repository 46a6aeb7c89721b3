//! The backend contract: a backend translates IR nodes into its own native
//! values and applies operators to them. Translation of a node is memoized
//! per backend, keyed by the node's structural hash; resolving against a
//! model bypasses the cache so model-specific values never leak into it.

pub mod concrete;
pub mod z3;

use crate::ast::{AstRef, Op, Value};
use crate::error::BackendError;
use std::cell::RefCell;
use std::collections::HashMap;

/// A satisfying assignment: variable name to concrete value.
pub type ModelMap = HashMap<String, Value>;

pub trait Backend {
    type Native: Clone;

    /// Translate a reduced leaf payload.
    fn convert_value(&self, v: &Value) -> Result<Self::Native, BackendError>;

    /// Translate a named symbolic leaf, substituting from `model` when one
    /// is available.
    fn convert_symbol(
        &self,
        name: &str,
        bits: u32,
        model: Option<&ModelMap>,
    ) -> Result<Self::Native, BackendError>;

    /// Apply `node.op()` to already-translated operands. The node itself is
    /// passed along for parameter access (extract bounds, extension widths)
    /// and, for the lazy backends, the original condition expression.
    fn apply(&self, node: &AstRef, operands: Vec<Self::Native>)
    -> Result<Self::Native, BackendError>;

    fn size_of(&self, native: &Self::Native) -> Result<u32, BackendError>;

    fn name_of(&self, _native: &Self::Native) -> Option<String> {
        None
    }

    fn cache(&self) -> &RefCell<HashMap<u64, Self::Native>>;

    /// Translate a whole expression, reusing cached translations. With a
    /// `model`, symbolic leaves resolve to their assigned values and nothing
    /// is cached.
    fn resolve(&self, e: &AstRef, model: Option<&ModelMap>) -> Result<Self::Native, BackendError> {
        if model.is_none() {
            if let Some(hit) = self.cache().borrow().get(&e.structural_hash()) {
                return Ok(hit.clone());
            }
        }
        let native = match e.op() {
            Op::Val => self.convert_value(e.value().ok_or(BackendError::WrongKind)?)?,
            Op::BitVec => {
                let name = e.symbol().ok_or(BackendError::WrongKind)?;
                let bits = e.length().ok_or(BackendError::UnknownSize)?;
                self.convert_symbol(name, bits, model)?
            }
            _ => {
                let operands = e
                    .operands()
                    .map(|c| self.resolve(c, model))
                    .collect::<Result<Vec<_>, _>>()?;
                self.apply(e, operands)?
            }
        };
        if model.is_none() {
            self.cache()
                .borrow_mut()
                .insert(e.structural_hash(), native.clone());
        }
        Ok(native)
    }
}
