//! The hash-consed expression IR.
//!
//! Nodes are interned: building the same `(op, args, length)` twice yields
//! the same heap object, so identity comparison doubles as structural
//! equality. Construction goes through [`make`], which validates widths and
//! eagerly folds applications whose operands are all concrete.

pub mod ops;

pub use ops::{Arity, Op};

use crate::backend::concrete;
use crate::bv::BVV;
use crate::error::ChimeError;
use crate::vsa::{DiscreteStridedIntervalSet, StridedInterval, ValueSet};
use internment::ArcIntern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::{Add, BitAnd, BitOr, BitXor, Deref, Mul, Neg, Not, Sub};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A primitive payload: either a reduced value sitting in a `Val` leaf, or an
/// operator parameter (extract bounds, extension widths, symbol names).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Bvv(BVV),
    Bool(bool),
    UInt(u64),
    Str(String),
    Si(StridedInterval),
    Dsis(DiscreteStridedIntervalSet),
    Vs(ValueSet),
}

impl Value {
    /// Bit width of the payload, when it has one.
    pub fn bits(&self) -> Option<u32> {
        match self {
            Value::Bvv(b) => Some(b.bits()),
            Value::Si(si) => Some(si.bits()),
            Value::Dsis(d) => Some(d.bits()),
            Value::Vs(vs) => Some(vs.bits()),
            Value::Bool(_) | Value::UInt(_) | Value::Str(_) => None,
        }
    }

    pub fn as_bvv(&self) -> Option<&BVV> {
        match self {
            Value::Bvv(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bvv(b) => write!(f, "{b}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Si(si) => write!(f, "{si}"),
            Value::Dsis(d) => write!(f, "{d}"),
            Value::Vs(vs) => write!(f, "{vs}"),
        }
    }
}

/// One argument slot of an application: a child expression or a primitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arg {
    Node(AstRef),
    Val(Value),
}

impl Arg {
    fn as_node(&self) -> Option<&AstRef> {
        match self {
            Arg::Node(n) => Some(n),
            Arg::Val(_) => None,
        }
    }
}

/// An immutable expression node. Obtained through [`make`] or the leaf
/// constructors; always held behind an [`AstRef`].
#[derive(Debug)]
pub struct Ast {
    op: Op,
    args: Vec<Arg>,
    length: Option<u32>,
    // Arc'd so unioning into parents clones pointers, not strings
    variables: BTreeSet<Arc<str>>,
    symbolic: bool,
    simplified: AtomicBool,
    hash: u64,
}

// Equality and hashing cover the structural triple only. `variables` and
// `symbolic` are functions of it, and `simplified` is a shared cache mark.
impl PartialEq for Ast {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.op == other.op
            && self.length == other.length
            && self.args == other.args
    }
}

impl Eq for Ast {}

impl Hash for Ast {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl Ast {
    pub fn op(&self) -> Op {
        self.op
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Bit width; `None` for boolean-sorted expressions.
    pub fn length(&self) -> Option<u32> {
        self.length
    }

    pub fn variables(&self) -> &BTreeSet<Arc<str>> {
        &self.variables
    }

    pub fn symbolic(&self) -> bool {
        self.symbolic
    }

    pub fn structural_hash(&self) -> u64 {
        self.hash
    }

    pub fn is_simplified(&self) -> bool {
        self.simplified.load(Ordering::Relaxed)
    }

    /// Monotone: once set, every holder of this interned node sees it.
    pub fn mark_simplified(&self) {
        self.simplified.store(true, Ordering::Relaxed);
    }

    /// The i-th expression operand, skipping leading parameter slots.
    pub fn operand(&self, i: usize) -> Option<&AstRef> {
        self.args.get(self.op.parameter_count() + i)?.as_node()
    }

    pub fn operands(&self) -> impl Iterator<Item = &AstRef> {
        self.args
            .iter()
            .skip(self.op.parameter_count())
            .filter_map(Arg::as_node)
    }

    /// The i-th `UInt` parameter.
    pub fn uint_param(&self, i: usize) -> Option<u64> {
        match self.args.get(i)? {
            Arg::Val(Value::UInt(u)) => Some(*u),
            _ => None,
        }
    }

    /// The payload of a `Val` leaf.
    pub fn value(&self) -> Option<&Value> {
        if self.op != Op::Val {
            return None;
        }
        match self.args.first()? {
            Arg::Val(v) => Some(v),
            Arg::Node(_) => None,
        }
    }

    /// The symbol name of a `BitVec` leaf.
    pub fn symbol(&self) -> Option<&str> {
        if self.op != Op::BitVec {
            return None;
        }
        match self.args.first()? {
            Arg::Val(Value::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// A cheap, clonable handle to an interned node. Two handles compare equal
/// iff they point at the same node, which (by interning) is the same thing
/// as structural equality.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AstRef(ArcIntern<Ast>);

impl Deref for AstRef {
    type Target = Ast;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for AstRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AstRef({self})")
    }
}

fn structural_hash(op: Op, args: &[Arg], length: Option<u32>) -> u64 {
    let mut h = DefaultHasher::new();
    op.hash(&mut h);
    length.hash(&mut h);
    for a in args {
        match a {
            Arg::Node(n) => {
                1u8.hash(&mut h);
                h.write_u64(n.structural_hash());
            }
            Arg::Val(v) => {
                2u8.hash(&mut h);
                v.hash(&mut h);
            }
        }
    }
    h.finish()
}

fn intern_node(op: Op, args: Vec<Arg>, length: Option<u32>) -> AstRef {
    let mut variables = BTreeSet::new();
    match op {
        Op::BitVec => {
            if let Some(Arg::Val(Value::Str(name))) = args.first() {
                variables.insert(Arc::from(name.as_str()));
            }
        }
        // named abstract leaves (strided intervals, value sets) are
        // symbolic: the name is their identity in refinement results
        Op::Val => {
            if let Some(Arg::Val(Value::Str(name))) = args.get(1) {
                variables.insert(Arc::from(name.as_str()));
            }
        }
        _ => {
            for a in &args {
                if let Arg::Node(n) = a {
                    variables.extend(n.variables.iter().cloned());
                }
            }
        }
    }
    let symbolic = !variables.is_empty();
    let hash = structural_hash(op, &args, length);
    AstRef(ArcIntern::new(Ast {
        op,
        args,
        length,
        variables,
        symbolic,
        simplified: AtomicBool::new(false),
        hash,
    }))
}

/// Wrap a reduced value as an identity leaf.
pub fn leaf(value: Value) -> AstRef {
    let length = value.bits();
    intern_node(Op::Val, vec![Arg::Val(value)], length)
}

pub fn bvv(value: u64, bits: u32) -> AstRef {
    leaf(Value::Bvv(BVV::new(value, bits)))
}

pub fn bool_val(b: bool) -> AstRef {
    leaf(Value::Bool(b))
}

static ABSTRACT_LEAF_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Abstract-domain leaves carry a fresh name: each constructed interval is
/// its own symbolic entity, and refinement results point back at it.
fn named_leaf(value: Value, prefix: &str) -> AstRef {
    let n = ABSTRACT_LEAF_COUNTER.fetch_add(1, Ordering::Relaxed);
    keyed_leaf(value, format!("{prefix}_{n}"))
}

/// A named leaf with a caller-provided identity, for rebuilding persisted
/// trees without minting a new name.
fn keyed_leaf(value: Value, name: String) -> AstRef {
    let length = value.bits();
    intern_node(
        Op::Val,
        vec![Arg::Val(value), Arg::Val(Value::Str(name))],
        length,
    )
}

pub fn si_val(si: StridedInterval) -> AstRef {
    named_leaf(Value::Si(si), "si")
}

pub fn dsis_val(d: DiscreteStridedIntervalSet) -> AstRef {
    named_leaf(Value::Dsis(d), "dsis")
}

pub fn vs_val(vs: ValueSet) -> AstRef {
    named_leaf(Value::Vs(vs), "vs")
}

/// A named symbolic bit-vector.
pub fn bv_sym(name: impl Into<String>, bits: u32) -> AstRef {
    intern_node(
        Op::BitVec,
        vec![
            Arg::Val(Value::Str(name.into())),
            Arg::Val(Value::UInt(bits as u64)),
        ],
        Some(bits),
    )
}

/// Validate an application and compute its result width.
fn infer_length(op: Op, args: &[Arg]) -> Result<Option<u32>, ChimeError> {
    let params = op.parameter_count();
    for (i, a) in args.iter().take(params).enumerate() {
        let ok = match a {
            Arg::Val(Value::UInt(_)) => true,
            // BitVec carries (name, bits)
            Arg::Val(Value::Str(_)) => op == Op::BitVec && i == 0,
            _ => false,
        };
        if !ok {
            return Err(ChimeError::op(format!("{op} expects parameter in slot {i}")));
        }
    }
    let operands: Vec<&AstRef> = args
        .iter()
        .skip(params)
        .map(|a| {
            a.as_node()
                .ok_or_else(|| ChimeError::op(format!("{op} operand is not an expression")))
        })
        .collect::<Result<_, _>>()?;
    match op.arity() {
        Arity::Fixed(n) if operands.len() != n => {
            return Err(ChimeError::op(format!(
                "{op} takes {n} operands, got {}",
                operands.len()
            )));
        }
        Arity::Variadic(min) if operands.len() < min => {
            return Err(ChimeError::op(format!(
                "{op} takes at least {min} operands, got {}",
                operands.len()
            )));
        }
        _ => {}
    }

    let same_width = |ops: &[&AstRef]| -> Result<Option<u32>, ChimeError> {
        let first = ops[0].length();
        for o in &ops[1..] {
            if o.length() != first {
                return Err(ChimeError::op(format!("{op} operand widths differ")));
            }
        }
        Ok(first)
    };

    match op {
        Op::BitVec => {
            let bits = match args.get(1) {
                Some(Arg::Val(Value::UInt(b))) => *b as u32,
                _ => return Err(ChimeError::op("BitVec takes (name, bits)")),
            };
            Ok(Some(bits))
        }
        Op::Val => Err(ChimeError::op("Val leaves are built through leaf()")),
        Op::BoolAnd | Op::BoolOr | Op::BoolNot | Op::BoolXor | Op::Implies => {
            for o in &operands {
                if o.length().is_some() {
                    return Err(ChimeError::op(format!("{op} operand is not boolean")));
                }
            }
            Ok(None)
        }
        Op::Eq | Op::Ne => {
            same_width(&operands)?;
            Ok(None)
        }
        Op::SLt
        | Op::SLe
        | Op::SGt
        | Op::SGe
        | Op::ULt
        | Op::ULe
        | Op::UGt
        | Op::UGe => {
            let w = same_width(&operands)?;
            if w.is_none() {
                return Err(ChimeError::op(format!("{op} compares bit-vectors")));
            }
            Ok(None)
        }
        Op::If => {
            if operands[0].length().is_some() {
                return Err(ChimeError::op("If condition is not boolean"));
            }
            same_width(&operands[1..])
        }
        Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::Mod
        | Op::Pow
        | Op::And
        | Op::Or
        | Op::Xor
        | Op::Shl
        | Op::Shr
        | Op::LShR
        | Op::RotateLeft
        | Op::RotateRight => {
            let w = same_width(&operands)?;
            if w.is_none() {
                return Err(ChimeError::op(format!("{op} operates on bit-vectors")));
            }
            Ok(w)
        }
        Op::Neg | Op::Invert => {
            let w = operands[0].length();
            if w.is_none() {
                return Err(ChimeError::op(format!("{op} operates on bit-vectors")));
            }
            Ok(w)
        }
        Op::Reverse => {
            let w = operands[0]
                .length()
                .ok_or_else(|| ChimeError::op("Reverse operates on bit-vectors"))?;
            if w % 8 != 0 {
                return Err(ChimeError::op("can't reverse a non-byte-sized bit-vector"));
            }
            Ok(Some(w))
        }
        Op::Concat => {
            let mut total = 0;
            for o in &operands {
                total += o
                    .length()
                    .ok_or_else(|| ChimeError::op("Concat operates on bit-vectors"))?;
            }
            Ok(Some(total))
        }
        Op::Extract => {
            let (hi, lo) = match (&args[0], &args[1]) {
                (Arg::Val(Value::UInt(hi)), Arg::Val(Value::UInt(lo))) => {
                    (*hi as u32, *lo as u32)
                }
                _ => return Err(ChimeError::op("Extract takes (hi, lo, expr)")),
            };
            let w = operands[0]
                .length()
                .ok_or_else(|| ChimeError::op("Extract operates on bit-vectors"))?;
            if lo > hi || hi >= w {
                return Err(ChimeError::op(format!(
                    "Extract({hi}, {lo}) out of range for width {w}"
                )));
            }
            Ok(Some(hi - lo + 1))
        }
        Op::SignExt | Op::ZeroExt => {
            let n = match &args[0] {
                Arg::Val(Value::UInt(n)) => *n as u32,
                _ => return Err(ChimeError::op("extension takes (n, expr)")),
            };
            let w = operands[0]
                .length()
                .ok_or_else(|| ChimeError::op("extension operates on bit-vectors"))?;
            Ok(Some(w + n))
        }
        Op::Repeat => {
            let n = match &args[0] {
                Arg::Val(Value::UInt(u)) => *u as u32,
                _ => return Err(ChimeError::op("bad Repeat")),
            };
            if n == 0 {
                return Err(ChimeError::op("Repeat count must be positive"));
            }
            let w = operands[0]
                .length()
                .ok_or_else(|| ChimeError::op("Repeat operates on bit-vectors"))?;
            Ok(Some(w * n))
        }
    }
}

/// Build an application. Widths are validated; applications whose operands
/// are all reduced leaves are folded through the model backends (concrete
/// first, then the value-set domain) and come back as `Val` leaves.
pub fn make(op: Op, args: Vec<Arg>) -> Result<AstRef, ChimeError> {
    let length = infer_length(op, &args)?;

    let symbolic = args
        .iter()
        .filter_map(Arg::as_node)
        .any(|n| n.symbolic());
    if !symbolic && op != Op::BitVec {
        let mut vals = Vec::with_capacity(args.len());
        let mut all_leaves = true;
        for a in &args {
            match a {
                Arg::Val(v) => vals.push(v.clone()),
                Arg::Node(n) => match n.value() {
                    Some(v) => vals.push(v.clone()),
                    None => {
                        all_leaves = false;
                        break;
                    }
                },
            }
        }
        if all_leaves {
            if let Ok(v) = concrete::call(op, &vals) {
                return Ok(leaf(v));
            }
        }
    }

    Ok(intern_node(op, args, length))
}

fn make2(op: Op, a: &AstRef, b: &AstRef) -> Result<AstRef, ChimeError> {
    make(op, vec![Arg::Node(a.clone()), Arg::Node(b.clone())])
}

fn make1(op: Op, a: &AstRef) -> Result<AstRef, ChimeError> {
    make(op, vec![Arg::Node(a.clone())])
}

impl AstRef {
    /// Substitute `new` for every occurrence of `old`, sharing unchanged
    /// subtrees. Replacement nodes must be width-compatible.
    pub fn replace(&self, old: &AstRef, new: &AstRef) -> AstRef {
        debug_assert_eq!(old.length(), new.length());
        if self == old {
            return new.clone();
        }
        let mut changed = false;
        let args: Vec<Arg> = self
            .args()
            .iter()
            .map(|a| match a {
                Arg::Node(n) => {
                    let r = n.replace(old, new);
                    if r != *n {
                        changed = true;
                    }
                    Arg::Node(r)
                }
                Arg::Val(v) => Arg::Val(v.clone()),
            })
            .collect();
        if changed {
            intern_node(self.op(), args, self.length())
        } else {
            self.clone()
        }
    }

    pub fn eq_(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::Eq, self, other)
    }

    pub fn ne_(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::Ne, self, other)
    }

    pub fn ult(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::ULt, self, other)
    }

    pub fn ule(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::ULe, self, other)
    }

    pub fn ugt(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::UGt, self, other)
    }

    pub fn uge(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::UGe, self, other)
    }

    pub fn slt(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::SLt, self, other)
    }

    pub fn sle(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::SLe, self, other)
    }

    pub fn sgt(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::SGt, self, other)
    }

    pub fn sge(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::SGe, self, other)
    }

    /// `self` on the high side.
    pub fn concat(&self, other: &AstRef) -> Result<AstRef, ChimeError> {
        make2(Op::Concat, self, other)
    }

    pub fn extract(&self, hi: u32, lo: u32) -> Result<AstRef, ChimeError> {
        make(
            Op::Extract,
            vec![
                Arg::Val(Value::UInt(hi as u64)),
                Arg::Val(Value::UInt(lo as u64)),
                Arg::Node(self.clone()),
            ],
        )
    }

    /// Single-bit extract.
    pub fn bit(&self, i: u32) -> Result<AstRef, ChimeError> {
        self.extract(i, i)
    }

    pub fn zero_extend(&self, extra: u32) -> Result<AstRef, ChimeError> {
        make(
            Op::ZeroExt,
            vec![Arg::Val(Value::UInt(extra as u64)), Arg::Node(self.clone())],
        )
    }

    pub fn sign_extend(&self, extra: u32) -> Result<AstRef, ChimeError> {
        make(
            Op::SignExt,
            vec![Arg::Val(Value::UInt(extra as u64)), Arg::Node(self.clone())],
        )
    }

    pub fn repeat(&self, times: u32) -> Result<AstRef, ChimeError> {
        make(
            Op::Repeat,
            vec![Arg::Val(Value::UInt(times as u64)), Arg::Node(self.clone())],
        )
    }

    pub fn reversed(&self) -> Result<AstRef, ChimeError> {
        make1(Op::Reverse, self)
    }

    fn shift_amount(&self, n: u64) -> Result<AstRef, ChimeError> {
        let w = self
            .length()
            .ok_or_else(|| ChimeError::op("shift operates on bit-vectors"))?;
        Ok(bvv(n, w))
    }

    pub fn shl(&self, n: u64) -> Result<AstRef, ChimeError> {
        make2(Op::Shl, self, &self.shift_amount(n)?)
    }

    /// Logical shift right.
    pub fn lshr(&self, n: u64) -> Result<AstRef, ChimeError> {
        make2(Op::LShR, self, &self.shift_amount(n)?)
    }

    /// Arithmetic shift right.
    pub fn ashr(&self, n: u64) -> Result<AstRef, ChimeError> {
        make2(Op::Shr, self, &self.shift_amount(n)?)
    }

    pub fn rotate_left(&self, n: u64) -> Result<AstRef, ChimeError> {
        make2(Op::RotateLeft, self, &self.shift_amount(n)?)
    }

    pub fn rotate_right(&self, n: u64) -> Result<AstRef, ChimeError> {
        make2(Op::RotateRight, self, &self.shift_amount(n)?)
    }

    /// `if self { t } else { f }` — `self` must be boolean.
    pub fn ite(&self, t: &AstRef, f: &AstRef) -> Result<AstRef, ChimeError> {
        make(
            Op::If,
            vec![
                Arg::Node(self.clone()),
                Arg::Node(t.clone()),
                Arg::Node(f.clone()),
            ],
        )
    }

    /// The `length/k` k-bit pieces of this expression, high piece first.
    pub fn chop(&self, k: u32) -> Result<Vec<AstRef>, ChimeError> {
        let w = self
            .length()
            .ok_or_else(|| ChimeError::op("chop operates on bit-vectors"))?;
        if k == 0 || w % k != 0 {
            return Err(ChimeError::op(format!(
                "chop size {k} does not divide width {w}"
            )));
        }
        (0..w / k)
            .rev()
            .map(|i| self.extract((i + 1) * k - 1, i * k))
            .collect()
    }
}

macro_rules! binary_op_impl {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait for &AstRef {
            type Output = AstRef;

            /// Panics when operand widths are incompatible; use the fallible
            /// constructors to handle that case.
            fn $method(self, rhs: &AstRef) -> AstRef {
                match make2($op, self, rhs) {
                    Ok(r) => r,
                    Err(e) => panic!("{e}"),
                }
            }
        }
    };
}

binary_op_impl!(Add, add, Op::Add);
binary_op_impl!(Sub, sub, Op::Sub);
binary_op_impl!(Mul, mul, Op::Mul);
binary_op_impl!(BitAnd, bitand, Op::And);
binary_op_impl!(BitOr, bitor, Op::Or);
binary_op_impl!(BitXor, bitxor, Op::Xor);

impl Neg for &AstRef {
    type Output = AstRef;

    fn neg(self) -> AstRef {
        match make1(Op::Neg, self) {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        }
    }
}

impl Not for &AstRef {
    type Output = AstRef;

    fn not(self) -> AstRef {
        match make1(Op::Invert, self) {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        }
    }
}

impl Display for AstRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.op() {
            Op::Val => write!(f, "{}", self.value().unwrap()),
            Op::BitVec => write!(f, "{}", self.symbol().unwrap_or("?")),
            Op::BoolNot | Op::Neg | Op::Invert | Op::Reverse => {
                write!(f, "{}({})", self.op().name(), self.operand(0).unwrap())
            }
            op if matches!(op.arity(), Arity::Fixed(2)) && op.parameter_count() == 0 => {
                write!(
                    f,
                    "({} {} {})",
                    self.operand(0).unwrap(),
                    op.name(),
                    self.operand(1).unwrap()
                )
            }
            op => {
                write!(f, "{}(", op.name())?;
                let mut first = true;
                for a in self.args() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    match a {
                        Arg::Node(n) => write!(f, "{n}")?,
                        Arg::Val(v) => write!(f, "{v}")?,
                    }
                }
                write!(f, ")")
            }
        }
    }
}

/// Gather every named bit-vector symbol in the tree with its width.
pub fn collect_symbols(e: &AstRef, out: &mut std::collections::HashMap<String, u32>) {
    if e.op() == Op::BitVec {
        if let (Some(name), Some(bits)) = (e.symbol(), e.length()) {
            out.insert(name.to_string(), bits);
        }
        return;
    }
    for a in e.args() {
        if let Arg::Node(n) = a {
            collect_symbols(n, out);
        }
    }
}

/// A portable, serde-able rendition of one node: operator, parameters, and
/// the structural-hash keys of its children. Persistence collaborators store
/// a table of these and rebuild through [`from_table`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstData {
    pub op: Op,
    pub args: Vec<ArgData>,
    pub length: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArgData {
    Node(u64),
    Val(Value),
}

/// Flatten `e` into a key → data table (children before parents).
pub fn to_table(e: &AstRef, table: &mut Vec<(u64, AstData)>) {
    if table.iter().any(|(k, _)| *k == e.structural_hash()) {
        return;
    }
    let args = e
        .args()
        .iter()
        .map(|a| match a {
            Arg::Node(n) => {
                to_table(n, table);
                ArgData::Node(n.structural_hash())
            }
            Arg::Val(v) => ArgData::Val(v.clone()),
        })
        .collect();
    table.push((
        e.structural_hash(),
        AstData {
            op: e.op(),
            args,
            length: e.length(),
        },
    ));
}

/// Rebuild the node for `key` out of a table produced by [`to_table`].
/// Reconstruction goes back through the interning factory, so rebuilding an
/// expression that is still alive yields the same object.
pub fn from_table(key: u64, table: &[(u64, AstData)]) -> Result<AstRef, ChimeError> {
    let (_, data) = table
        .iter()
        .find(|(k, _)| *k == key)
        .ok_or_else(|| ChimeError::op(format!("missing node key {key:#x}")))?;
    let mut args = Vec::with_capacity(data.args.len());
    for a in &data.args {
        match a {
            ArgData::Node(k) => args.push(Arg::Node(from_table(*k, table)?)),
            ArgData::Val(v) => args.push(Arg::Val(v.clone())),
        }
    }
    match data.op {
        Op::Val => {
            let mut it = args.into_iter();
            match (it.next(), it.next()) {
                (Some(Arg::Val(v)), None) => Ok(leaf(v)),
                (Some(Arg::Val(v)), Some(Arg::Val(Value::Str(name)))) => Ok(keyed_leaf(v, name)),
                _ => Err(ChimeError::op("malformed Val data")),
            }
        }
        Op::BitVec => {
            let (name, bits) = match (args.first(), args.get(1)) {
                (Some(Arg::Val(Value::Str(n))), Some(Arg::Val(Value::UInt(b)))) => {
                    (n.clone(), *b as u32)
                }
                _ => return Err(ChimeError::op("malformed BitVec data")),
            };
            Ok(bv_sym(name, bits))
        }
        op => make(op, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups() {
        let a = bvv(1, 1);
        let b = bvv(1, 1);
        assert_eq!(a, b);
        let x = bv_sym("x", 32);
        let y = bv_sym("x", 32);
        assert_eq!(x, y);
        let s1 = &x + &bvv(5, 32);
        let s2 = &x + &bvv(5, 32);
        assert_eq!(s1, s2);
        // operand order matters: 5 + x and x + 5 are different nodes
        let s3 = &bvv(5, 32) + &x;
        assert_ne!(s1, s3);
    }

    #[test]
    fn eager_folding() {
        let a = bvv(1, 1);
        let sum = &a + &a;
        assert_eq!(sum.op(), Op::Val);
        assert_eq!(sum.value().unwrap().as_bvv().unwrap().value(), 0);

        let e = bvv(0x01020304, 32);
        let r = e.reversed().unwrap();
        assert_eq!(r.length(), Some(32));
        assert_eq!(r.value().unwrap().as_bvv().unwrap().value(), 0x04030201);

        let rsum = &e + &r;
        assert_eq!(
            rsum.value().unwrap().as_bvv().unwrap().value(),
            0x05050505
        );
    }

    #[test]
    fn symbolic_stays_symbolic() {
        let x = bv_sym("x", 32);
        let c = &bvv(5, 32) + &x;
        assert_eq!(c.op(), Op::Add);
        assert!(c.symbolic());
        assert_eq!(c.variables().len(), 1);
        assert!(c.variables().contains("x"));
    }

    #[test]
    fn chop_and_concat_round_trip() {
        let e = bvv(0x01020304, 32);
        let pieces = e.chop(8).unwrap();
        let vals: Vec<u64> = pieces
            .iter()
            .map(|p| p.value().unwrap().as_bvv().unwrap().value())
            .collect();
        assert_eq!(vals, [1, 2, 3, 4]);
        let mut back = pieces[0].clone();
        for p in &pieces[1..] {
            back = back.concat(p).unwrap();
        }
        assert_eq!(back, e);

        let r = e.reversed().unwrap();
        let rvals: Vec<u64> = r
            .chop(8)
            .unwrap()
            .iter()
            .map(|p| p.value().unwrap().as_bvv().unwrap().value())
            .collect();
        assert_eq!(rvals, [4, 3, 2, 1]);
    }

    #[test]
    fn bit_indexing() {
        let e1 = bvv(0x04, 8);
        assert_eq!(e1.bit(2).unwrap().value().unwrap().as_bvv().unwrap().value(), 1);
        assert_eq!(e1.bit(1).unwrap().value().unwrap().as_bvv().unwrap().value(), 0);
        let bits: Vec<u64> = e1
            .chop(1)
            .unwrap()
            .iter()
            .map(|p| p.value().unwrap().as_bvv().unwrap().value())
            .collect();
        assert_eq!(bits, [0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn replace_rewrites_variables() {
        let old = bv_sym("old", 32);
        let new = bv_sym("new", 32);
        let zero = bvv(0, 32);

        let m = make2(Op::Mod, &(&old + &bvv(1, 32)), &bvv(256, 32)).unwrap();
        let old_formula = m
            .eq_(&bvv(0, 32))
            .unwrap()
            .ite(&(&old + &bvv(10, 32)), &(&old + &bvv(20, 32)))
            .unwrap();
        let new_formula = old_formula.replace(&old, &new);
        let zero_formula = new_formula.replace(&new, &zero);

        assert_ne!(old_formula, new_formula);
        assert_ne!(new_formula, zero_formula);
        assert!(old_formula.variables().contains("old"));
        assert!(new_formula.variables().contains("new"));
        assert!(!new_formula.variables().contains("old"));
        assert!(zero_formula.variables().is_empty());
        assert!(old_formula.symbolic());
        assert!(!zero_formula.symbolic());

        assert_eq!(
            old_formula.to_string().replace("old", "new"),
            new_formula.to_string()
        );
    }

    #[test]
    fn reverse_validation() {
        let odd = bvv(1, 7);
        assert!(odd.reversed().is_err());
        let byte = bvv(0xab, 8);
        assert_eq!(byte.reversed().unwrap(), byte);
    }

    #[test]
    fn extract_validation() {
        let e = bvv(0, 8);
        assert!(e.extract(8, 0).is_err());
        assert!(e.extract(1, 2).is_err());
        assert_eq!(e.extract(7, 0).unwrap().length(), Some(8));
    }

    #[test]
    fn extension_folds() {
        let e1 = bvv(0x04, 8);
        let ee1 = e1.zero_extend(8).unwrap();
        assert_eq!(ee1.length(), Some(16));
        assert_eq!(ee1.value().unwrap().as_bvv().unwrap().value(), 0x0004);
        let se = bvv(0xfe, 8).sign_extend(8).unwrap();
        assert_eq!(se.value().unwrap().as_bvv().unwrap().value(), 0xfffe);
    }

    #[test]
    fn data_round_trip() {
        let x = bv_sym("x", 32);
        let e = (&x + &bvv(5, 32)).eq_(&bvv(15, 32)).unwrap();
        let mut table = Vec::new();
        to_table(&e, &mut table);
        let back = from_table(e.structural_hash(), &table).unwrap();
        assert_eq!(back, e);
    }
}
