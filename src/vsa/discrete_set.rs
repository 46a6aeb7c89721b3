//! A finite set of strided intervals, kept while the member count stays
//! under a cap; beyond it the set collapses into the smallest enclosing
//! interval. Members live in a sorted, deduplicated vector.

use crate::vsa::{BoolResult, StridedInterval};
use itertools::iproduct;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Collapse threshold: past this many members the set degrades to one SI.
const MAX_MEMBERS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscreteStridedIntervalSet {
    bits: u32,
    members: Vec<StridedInterval>,
}

impl DiscreteStridedIntervalSet {
    pub fn new(bits: u32) -> Self {
        Self {
            bits,
            members: Vec::new(),
        }
    }

    pub fn from_si(si: StridedInterval) -> Self {
        let mut s = Self::new(si.bits());
        s.insert(si);
        s
    }

    pub fn from_members(bits: u32, members: impl IntoIterator<Item = StridedInterval>) -> Self {
        let mut s = Self::new(bits);
        for m in members {
            s.insert(m);
        }
        s.normalized()
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn members(&self) -> &[StridedInterval] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.iter().all(StridedInterval::is_empty)
    }

    pub fn cardinality(&self) -> u128 {
        self.members.iter().map(StridedInterval::cardinality).sum()
    }

    pub fn insert(&mut self, si: StridedInterval) {
        debug_assert_eq!(si.bits(), self.bits);
        if si.is_empty() {
            return;
        }
        match self.members.binary_search(&si) {
            Ok(_) => {}
            Err(pos) => self.members.insert(pos, si),
        }
    }

    /// The smallest single interval containing every member.
    pub fn collapse(&self) -> StridedInterval {
        self.members
            .iter()
            .fold(StridedInterval::empty(self.bits), |acc, m| acc.union(m))
    }

    fn normalized(self) -> Self {
        if self.members.len() > MAX_MEMBERS {
            let collapsed = self.collapse();
            Self::from_si(collapsed)
        } else {
            self
        }
    }

    /// Lift a binary interval operation over the member cross product.
    pub fn lift2(&self, other: &Self, f: impl Fn(&StridedInterval, &StridedInterval) -> StridedInterval) -> Self {
        let mut out = Self::new(self.bits);
        for (a, b) in iproduct!(&self.members, &other.members) {
            out.insert(f(a, b));
        }
        out.normalized()
    }

    pub fn lift1(&self, f: impl Fn(&StridedInterval) -> StridedInterval) -> Self {
        let mut out = Self::new(self.bits);
        for a in &self.members {
            out.insert(f(a));
        }
        out.normalized()
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for m in &other.members {
            out.insert(*m);
        }
        out.normalized()
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut out = Self::new(self.bits);
        for (a, b) in iproduct!(&self.members, &other.members) {
            let i = a.intersection(b);
            if !i.is_empty() {
                out.insert(i);
            }
        }
        out.normalized()
    }

    /// Compare through the enclosing intervals; the member structure adds
    /// nothing once the extremes are known.
    pub fn compare(
        &self,
        other: &Self,
        f: impl Fn(&StridedInterval, &StridedInterval) -> BoolResult,
    ) -> BoolResult {
        f(&self.collapse(), &other.collapse())
    }

    pub fn contains(&self, v: u64) -> bool {
        self.members.iter().any(|m| m.contains(v))
    }

    /// Up to `n` member values, ascending and deduplicated.
    pub fn values(&self, n: usize) -> Vec<u64> {
        let mut out: Vec<u64> = self
            .members
            .iter()
            .flat_map(|m| m.values(n))
            .collect();
        out.sort_unstable();
        out.dedup();
        out.truncate(n);
        out
    }
}

impl Display for DiscreteStridedIntervalSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, m) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{m}")?;
        }
        write!(f, "}}")
    }
}
