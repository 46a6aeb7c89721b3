//! A lazy conditional over abstract values: the condition expression stays
//! symbolic, and operators map over both branches until a query forces a
//! decision.

use crate::ast::{AstRef, Op};
use crate::vsa::VsaValue;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq)]
pub struct IfProxy {
    cond: AstRef,
    iftrue: Box<VsaValue>,
    iffalse: Box<VsaValue>,
}

impl IfProxy {
    pub fn new(cond: AstRef, iftrue: VsaValue, iffalse: VsaValue) -> Self {
        Self {
            cond,
            iftrue: Box::new(iftrue),
            iffalse: Box::new(iffalse),
        }
    }

    pub fn cond(&self) -> &AstRef {
        &self.cond
    }

    pub fn iftrue(&self) -> &VsaValue {
        &self.iftrue
    }

    pub fn iffalse(&self) -> &VsaValue {
        &self.iffalse
    }

    pub fn bits(&self) -> Option<u32> {
        self.iftrue.bits().or(self.iffalse.bits())
    }

    /// Conditions that select opposite halves of the same split: one the
    /// `Not` of the other, or the same comparison with its polarity flipped.
    pub fn complementary(a: &AstRef, b: &AstRef) -> bool {
        if a.op() == Op::BoolNot && a.operand(0) == Some(b) {
            return true;
        }
        if b.op() == Op::BoolNot && b.operand(0) == Some(a) {
            return true;
        }
        let flipped = matches!(
            (a.op(), b.op()),
            (Op::Eq, Op::Ne)
                | (Op::Ne, Op::Eq)
                | (Op::ULt, Op::UGe)
                | (Op::UGe, Op::ULt)
                | (Op::ULe, Op::UGt)
                | (Op::UGt, Op::ULe)
                | (Op::SLt, Op::SGe)
                | (Op::SGe, Op::SLt)
                | (Op::SLe, Op::SGt)
                | (Op::SGt, Op::SLe)
        );
        if !flipped {
            return false;
        }
        let direct = a.operand(0) == b.operand(0) && a.operand(1) == b.operand(1);
        let swapped = a.op().commutative()
            && a.operand(0) == b.operand(1)
            && a.operand(1) == b.operand(0);
        direct || swapped
    }
}

impl Display for IfProxy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IfProxy({}, {}, {})",
            self.cond, self.iftrue, self.iffalse
        )
    }
}
