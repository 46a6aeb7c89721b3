use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The closed operator set. Applications (`Op::*` except the two leaf tags)
/// carry their operands in `Ast::args`; `BitVec` is a named symbolic leaf and
/// `Val` wraps an already-reduced value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Op {
    // boolean
    BoolAnd,
    BoolOr,
    BoolNot,
    BoolXor,
    Implies,
    If,
    Eq,
    Ne,
    // comparisons, signed then unsigned
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Pow,
    // bitwise
    And,
    Or,
    Xor,
    Invert,
    Shl,
    Shr,
    LShR,
    RotateLeft,
    RotateRight,
    // structural
    Concat,
    Extract,
    SignExt,
    ZeroExt,
    Repeat,
    Reverse,
    // leaves
    BitVec,
    Val,
}

/// How many expression operands an operator takes. Parameter arguments
/// (extract bounds, extension widths, symbol names) are not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// At least this many; `And(a, b, c)` style n-ary application.
    Variadic(usize),
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::BoolAnd => "And",
            Op::BoolOr => "Or",
            Op::BoolNot => "Not",
            Op::BoolXor => "Xor",
            Op::Implies => "Implies",
            Op::If => "If",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::SLt => "<s",
            Op::SLe => "<=s",
            Op::SGt => ">s",
            Op::SGe => ">=s",
            Op::ULt => "<u",
            Op::ULe => "<=u",
            Op::UGt => ">u",
            Op::UGe => ">=u",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Neg => "neg",
            Op::Pow => "**",
            Op::And => "&",
            Op::Or => "|",
            Op::Xor => "^",
            Op::Invert => "~",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::LShR => "LShR",
            Op::RotateLeft => "RotateLeft",
            Op::RotateRight => "RotateRight",
            Op::Concat => "Concat",
            Op::Extract => "Extract",
            Op::SignExt => "SignExt",
            Op::ZeroExt => "ZeroExt",
            Op::Repeat => "Repeat",
            Op::Reverse => "Reverse",
            Op::BitVec => "BitVec",
            Op::Val => "Val",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Op::BoolAnd | Op::BoolOr | Op::Concat => Arity::Variadic(2),
            Op::BoolNot | Op::Neg | Op::Invert | Op::Reverse => Arity::Fixed(1),
            Op::Extract | Op::SignExt | Op::ZeroExt | Op::Repeat => Arity::Fixed(1),
            Op::If => Arity::Fixed(3),
            Op::BitVec | Op::Val => Arity::Fixed(0),
            _ => Arity::Fixed(2),
        }
    }

    /// Operators whose n-ary form may be split into independent conjuncts or
    /// disjuncts by the solvers.
    pub fn splittable(&self) -> bool {
        matches!(self, Op::BoolAnd | Op::BoolOr)
    }

    pub fn commutative(&self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Mul
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::BoolAnd
                | Op::BoolOr
                | Op::BoolXor
                | Op::Eq
                | Op::Ne
        )
    }

    /// True when the application yields a boolean, regardless of operand
    /// widths. `If` mirrors its branches instead.
    pub fn boolean_result(&self) -> bool {
        matches!(
            self,
            Op::BoolAnd
                | Op::BoolOr
                | Op::BoolNot
                | Op::BoolXor
                | Op::Implies
                | Op::Eq
                | Op::Ne
                | Op::SLt
                | Op::SLe
                | Op::SGt
                | Op::SGe
                | Op::ULt
                | Op::ULe
                | Op::UGt
                | Op::UGe
        )
    }

    /// Leading `UInt` parameter arguments preceding the expression operands:
    /// `Extract(hi, lo, e)`, `SignExt(n, e)`, `ZeroExt(n, e)`, `Repeat(n, e)`,
    /// `BitVec(name, bits)`.
    pub fn parameter_count(&self) -> usize {
        match self {
            Op::Extract => 2,
            Op::SignExt | Op::ZeroExt | Op::Repeat => 1,
            Op::BitVec => 2,
            _ => 0,
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_table() {
        assert_eq!(Op::BoolAnd.arity(), Arity::Variadic(2));
        assert_eq!(Op::If.arity(), Arity::Fixed(3));
        assert_eq!(Op::Reverse.arity(), Arity::Fixed(1));
        assert_eq!(Op::Add.arity(), Arity::Fixed(2));
    }

    #[test]
    fn split_markers() {
        assert!(Op::BoolAnd.splittable());
        assert!(Op::BoolOr.splittable());
        assert!(!Op::And.splittable());
        assert!(!Op::Eq.splittable());
    }
}
