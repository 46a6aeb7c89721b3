use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Tri-state verdict of an abstract comparison: definitely true, definitely
/// false, or true for some members of the operand sets and false for others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolResult {
    True,
    False,
    Maybe,
}

impl BoolResult {
    pub fn is_true(&self) -> bool {
        matches!(self, BoolResult::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, BoolResult::False)
    }

    pub fn is_maybe(&self) -> bool {
        matches!(self, BoolResult::Maybe)
    }

    pub fn not(&self) -> BoolResult {
        match self {
            BoolResult::True => BoolResult::False,
            BoolResult::False => BoolResult::True,
            BoolResult::Maybe => BoolResult::Maybe,
        }
    }

    pub fn and(&self, other: &BoolResult) -> BoolResult {
        match (self, other) {
            (BoolResult::False, _) | (_, BoolResult::False) => BoolResult::False,
            (BoolResult::True, BoolResult::True) => BoolResult::True,
            _ => BoolResult::Maybe,
        }
    }

    pub fn or(&self, other: &BoolResult) -> BoolResult {
        match (self, other) {
            (BoolResult::True, _) | (_, BoolResult::True) => BoolResult::True,
            (BoolResult::False, BoolResult::False) => BoolResult::False,
            _ => BoolResult::Maybe,
        }
    }

    pub fn xor(&self, other: &BoolResult) -> BoolResult {
        match (self, other) {
            (BoolResult::Maybe, _) | (_, BoolResult::Maybe) => BoolResult::Maybe,
            (a, b) => {
                if a.is_true() ^ b.is_true() {
                    BoolResult::True
                } else {
                    BoolResult::False
                }
            }
        }
    }

    /// Both verdicts a set may produce, for joining branch outcomes.
    pub fn union(&self, other: &BoolResult) -> BoolResult {
        if self == other { *self } else { BoolResult::Maybe }
    }
}

impl From<bool> for BoolResult {
    fn from(b: bool) -> Self {
        if b { BoolResult::True } else { BoolResult::False }
    }
}

impl Display for BoolResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BoolResult::True => write!(f, "True"),
            BoolResult::False => write!(f, "False"),
            BoolResult::Maybe => write!(f, "Maybe"),
        }
    }
}
