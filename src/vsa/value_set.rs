//! Region-partitioned address sets: one strided interval per memory region.

use crate::vsa::{BoolResult, StridedInterval};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueSet {
    bits: u32,
    regions: BTreeMap<String, StridedInterval>,
}

impl ValueSet {
    pub fn new(bits: u32) -> Self {
        Self {
            bits,
            regions: BTreeMap::new(),
        }
    }

    pub fn with_si(bits: u32, region: impl Into<String>, si: StridedInterval) -> Self {
        let mut vs = Self::new(bits);
        vs.merge_si(region, si);
        vs
    }

    pub fn with_value(bits: u32, region: impl Into<String>, value: u64) -> Self {
        Self::with_si(bits, region, StridedInterval::singleton(bits, value as i128))
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.regions.values().all(StridedInterval::is_empty)
    }

    /// Union `si` into the named region's interval.
    pub fn merge_si(&mut self, region: impl Into<String>, si: StridedInterval) {
        debug_assert_eq!(si.bits(), self.bits);
        self.regions
            .entry(region.into())
            .and_modify(|cur| *cur = cur.union(&si))
            .or_insert(si);
    }

    pub fn get_si(&self, region: &str) -> Option<&StridedInterval> {
        self.regions.get(region)
    }

    pub fn regions(&self) -> impl Iterator<Item = (&str, &StridedInterval)> {
        self.regions.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Apply an interval operation pointwise against a single interval.
    pub fn map_si(&self, si: &StridedInterval, f: impl Fn(&StridedInterval, &StridedInterval) -> StridedInterval) -> Self {
        let mut out = Self::new(self.bits);
        for (region, cur) in &self.regions {
            out.regions.insert(region.clone(), f(cur, si));
        }
        out
    }

    /// Apply an interval operation region by region; a region present on one
    /// side only is carried through unchanged.
    pub fn map_vs(&self, o: &Self, f: impl Fn(&StridedInterval, &StridedInterval) -> StridedInterval) -> Self {
        let mut out = Self::new(self.bits);
        for (region, cur) in &self.regions {
            match o.regions.get(region) {
                Some(other) => {
                    out.regions.insert(region.clone(), f(cur, other));
                }
                None => {
                    out.regions.insert(region.clone(), *cur);
                }
            }
        }
        for (region, other) in &o.regions {
            if !self.regions.contains_key(region) {
                out.regions.insert(region.clone(), *other);
            }
        }
        out
    }

    pub fn union(&self, o: &Self) -> Self {
        let mut out = self.clone();
        for (region, si) in &o.regions {
            out.merge_si(region.clone(), *si);
        }
        out
    }

    pub fn eq_(&self, o: &Self) -> BoolResult {
        let mut acc = BoolResult::True;
        for (region, si) in &self.regions {
            match o.regions.get(region) {
                Some(other) => acc = acc.and(&si.eq_(other)),
                None if si.is_empty() => {}
                None => return BoolResult::Maybe,
            }
        }
        for (region, si) in &o.regions {
            if !self.regions.contains_key(region) && !si.is_empty() {
                return BoolResult::Maybe;
            }
        }
        acc
    }

    /// Every address in the set, capped at `n`, region order.
    pub fn values(&self, n: usize) -> Vec<u64> {
        let mut out = Vec::new();
        for si in self.regions.values() {
            out.extend(si.values(n.saturating_sub(out.len())));
            if out.len() >= n {
                break;
            }
        }
        out
    }

    pub fn signed_min(&self) -> i128 {
        self.regions
            .values()
            .map(StridedInterval::signed_min)
            .min()
            .unwrap_or(0)
    }

    pub fn unsigned_max(&self) -> u64 {
        self.regions
            .values()
            .map(StridedInterval::upper_bound)
            .max()
            .unwrap_or(0)
    }
}

impl Display for ValueSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "VS(")?;
        for (i, (region, si)) in self.regions.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{region}: {si}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_per_region() {
        let mut vs = ValueSet::new(32);
        assert!(vs.is_empty());
        vs.merge_si("global", StridedInterval::singleton(32, 10));
        vs.merge_si("global", StridedInterval::singleton(32, 28));
        assert_eq!(
            vs.get_si("global"),
            Some(&StridedInterval::new(32, 18, 10, 28))
        );
        assert_eq!(vs.bits(), 32);
    }

    #[test]
    fn masking_distributes_over_regions() {
        let vs = ValueSet::with_value(32, "global", 0x0fa7_b00b);
        let zero = StridedInterval::singleton(32, 0);
        let ones = StridedInterval::singleton(32, 0xffff_ffff);
        let masked = vs.map_si(&zero, StridedInterval::and);
        assert!(masked.eq_(&ValueSet::with_value(32, "global", 0)).is_true());
        let kept = vs.map_si(&ones, StridedInterval::and);
        assert!(kept.eq_(&vs).is_true());
    }
}
