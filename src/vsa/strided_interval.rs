//! Circular strided intervals.
//!
//! `SI(bits, stride, lower, upper)` denotes the set
//! `{ lower + k*stride mod 2^bits : 0 <= k, lower + k*stride circularly
//! before upper }`. Bounds are stored masked to the width, so an interval
//! may wrap either the unsigned seam (at 0) or the signed seam (at
//! 2^(bits-1)); operations split at the relevant seam before working on
//! plain ranges.

use crate::vsa::BoolResult;
use itertools::iproduct;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StridedInterval {
    bits: u32,
    stride: u64,
    lower: u64,
    upper: u64,
    empty: bool,
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// gcd treating 0 (a singleton's stride) as the identity.
fn gcd0(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, x) | (x, 0) => x,
        (a, b) => gcd(a, b),
    }
}

fn to_signed(v: u64, bits: u32) -> i128 {
    if bits >= 64 {
        v as i64 as i128
    } else if v & (1 << (bits - 1)) == 0 {
        v as i128
    } else {
        v as i128 - (1i128 << bits)
    }
}

impl StridedInterval {
    /// Bounds are masked to the width; `upper` is snapped down onto the
    /// stride grid.
    pub fn new(bits: u32, stride: u64, lower: i128, upper: i128) -> Self {
        debug_assert!((1..=64).contains(&bits));
        let m = mask(bits);
        let lower = (lower as u64) & m;
        let upper = (upper as u64) & m;
        Self::raw(bits, stride, lower, upper)
    }

    fn raw(bits: u32, stride: u64, lower: u64, upper: u64) -> Self {
        let m = mask(bits);
        let (lower, mut upper) = (lower & m, upper & m);
        let mut stride = stride;
        if lower == upper {
            stride = 0;
        } else {
            if stride == 0 {
                stride = 1;
            }
            let span = upper.wrapping_sub(lower) & m;
            upper = lower.wrapping_add(span / stride * stride) & m;
            if upper == lower {
                stride = 0;
            }
        }
        Self {
            bits,
            stride,
            lower,
            upper,
            empty: false,
        }
    }

    pub fn singleton(bits: u32, value: i128) -> Self {
        Self::new(bits, 0, value, value)
    }

    /// The full circle in canonical form: stride 1 from signed min to
    /// signed max.
    pub fn top(bits: u32) -> Self {
        let half = 1u64 << (bits - 1);
        Self::raw(bits, 1, half, half.wrapping_sub(1) & mask(bits))
    }

    pub fn empty(bits: u32) -> Self {
        Self {
            bits,
            stride: 0,
            lower: 0,
            upper: 0,
            empty: true,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn lower_bound(&self) -> u64 {
        self.lower
    }

    pub fn upper_bound(&self) -> u64 {
        self.upper
    }

    /// The lower bound on the signed number line.
    pub fn lower_signed(&self) -> i128 {
        to_signed(self.lower, self.bits)
    }

    pub fn upper_signed(&self) -> i128 {
        to_signed(self.upper, self.bits)
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn is_singleton(&self) -> bool {
        !self.empty && self.stride == 0
    }

    pub fn as_singleton(&self) -> Option<u64> {
        if self.is_singleton() { Some(self.lower) } else { None }
    }

    /// Circular distance from lower to upper.
    fn span(&self) -> u128 {
        (self.upper.wrapping_sub(self.lower) & mask(self.bits)) as u128
    }

    pub fn is_top(&self) -> bool {
        !self.empty && self.stride == 1 && self.span() == mask(self.bits) as u128
    }

    pub fn cardinality(&self) -> u128 {
        if self.empty {
            0
        } else if self.stride == 0 {
            1
        } else {
            self.span() / self.stride as u128 + 1
        }
    }

    pub fn contains(&self, v: u64) -> bool {
        if self.empty {
            return false;
        }
        let m = mask(self.bits);
        let off = (v.wrapping_sub(self.lower) & m) as u128;
        if self.stride == 0 {
            off == 0
        } else {
            off <= self.span() && off % self.stride as u128 == 0
        }
    }

    /// Up to `n` members, starting at the lower bound.
    pub fn values(&self, n: usize) -> Vec<u64> {
        let m = mask(self.bits);
        let count = self.cardinality().min(n as u128) as u64;
        (0..count)
            .map(|k| self.lower.wrapping_add(k.wrapping_mul(self.stride)) & m)
            .collect()
    }

    /// Split into at most two pieces, none of which wraps the unsigned seam.
    fn split_unsigned(&self) -> Vec<Self> {
        if self.empty {
            return vec![];
        }
        if self.lower <= self.upper {
            return vec![*self];
        }
        let m = mask(self.bits);
        let steps = (m - self.lower) as u128 / self.stride as u128;
        let last = self.lower + (steps as u64) * self.stride;
        let first = last.wrapping_add(self.stride) & m;
        vec![
            Self::raw(self.bits, self.stride, self.lower, last),
            Self::raw(self.bits, self.stride, first, self.upper),
        ]
    }

    /// Split at the signed seam instead.
    fn split_signed(&self) -> Vec<Self> {
        if self.empty {
            return vec![];
        }
        let m = mask(self.bits);
        let half = 1u64 << (self.bits - 1);
        let shifted = Self::raw(
            self.bits,
            self.stride,
            self.lower.wrapping_add(half) & m,
            self.upper.wrapping_add(half) & m,
        );
        shifted
            .split_unsigned()
            .into_iter()
            .map(|p| {
                Self::raw(
                    p.bits,
                    p.stride,
                    p.lower.wrapping_sub(half) & m,
                    p.upper.wrapping_sub(half) & m,
                )
            })
            .collect()
    }

    pub fn unsigned_min(&self) -> u64 {
        self.split_unsigned()
            .iter()
            .map(|p| p.lower)
            .min()
            .unwrap_or(0)
    }

    pub fn unsigned_max(&self) -> u64 {
        self.split_unsigned()
            .iter()
            .map(|p| p.upper)
            .max()
            .unwrap_or(0)
    }

    pub fn signed_min(&self) -> i128 {
        self.split_signed()
            .iter()
            .map(|p| p.lower_signed())
            .min()
            .unwrap_or(0)
    }

    pub fn signed_max(&self) -> i128 {
        self.split_signed()
            .iter()
            .map(|p| p.upper_signed())
            .max()
            .unwrap_or(0)
    }

    fn wraps_signed(&self) -> bool {
        self.split_signed().len() > 1
    }

    pub fn add(&self, o: &Self) -> Self {
        debug_assert_eq!(self.bits, o.bits);
        if self.empty || o.empty {
            return Self::empty(self.bits);
        }
        // a combined span covering the whole circle is no interval at all
        if self.span() + o.span() >= mask(self.bits) as u128 {
            return Self::top(self.bits);
        }
        Self::raw(
            self.bits,
            gcd0(self.stride, o.stride),
            self.lower.wrapping_add(o.lower),
            self.upper.wrapping_add(o.upper),
        )
    }

    pub fn neg(&self) -> Self {
        if self.empty {
            return *self;
        }
        Self::raw(
            self.bits,
            self.stride,
            self.upper.wrapping_neg(),
            self.lower.wrapping_neg(),
        )
    }

    pub fn sub(&self, o: &Self) -> Self {
        self.add(&o.neg())
    }

    pub fn invert(&self) -> Self {
        if self.empty {
            return *self;
        }
        Self::raw(self.bits, self.stride, !self.upper, !self.lower)
    }

    pub fn mul(&self, o: &Self) -> Self {
        debug_assert_eq!(self.bits, o.bits);
        if self.empty || o.empty {
            return Self::empty(self.bits);
        }
        let m128 = 1u128 << self.bits;
        if let (Some(a), Some(b)) = (self.as_singleton(), o.as_singleton()) {
            return Self::singleton(self.bits, (a.wrapping_mul(b) & mask(self.bits)) as i128);
        }
        // singleton factor: scale the other interval
        let scaled = |iv: &Self, k: u64| -> Self {
            let ks = to_signed(k, iv.bits);
            if ks == 0 {
                return Self::singleton(iv.bits, 0);
            }
            if iv.wraps_signed() {
                return Self::top(iv.bits);
            }
            let p1 = iv.lower_signed() * ks;
            let p2 = iv.upper_signed() * ks;
            let (mn, mx) = (p1.min(p2), p1.max(p2));
            let stride = iv.stride as u128 * ks.unsigned_abs();
            if (mx - mn) as u128 >= m128 || stride >= m128 {
                return Self::top(iv.bits);
            }
            Self::new(iv.bits, stride as u64, mn, mx)
        };
        if let Some(k) = o.as_singleton() {
            return scaled(self, k);
        }
        if let Some(k) = self.as_singleton() {
            return scaled(o, k);
        }
        if self.wraps_signed() || o.wraps_signed() {
            return Self::top(self.bits);
        }
        let pairs = [
            self.lower_signed() * o.lower_signed(),
            self.lower_signed() * o.upper_signed(),
            self.upper_signed() * o.lower_signed(),
            self.upper_signed() * o.upper_signed(),
        ];
        let mn = *pairs.iter().min().unwrap();
        let mx = *pairs.iter().max().unwrap();
        if (mx - mn) as u128 >= m128 {
            return Self::top(self.bits);
        }
        Self::new(self.bits, gcd0(self.stride, o.stride), mn, mx)
    }

    /// Signed division, truncating toward zero.
    pub fn sdiv(&self, o: &Self) -> Self {
        debug_assert_eq!(self.bits, o.bits);
        if self.empty || o.empty {
            return Self::empty(self.bits);
        }
        if let (Some(a), Some(b)) = (self.as_singleton(), o.as_singleton()) {
            if b == 0 {
                return Self::top(self.bits);
            }
            let q = to_signed(a, self.bits)
                .checked_div(to_signed(b, self.bits))
                .unwrap_or(0);
            return Self::singleton(self.bits, q);
        }
        if self.wraps_signed() || o.wraps_signed() {
            return Self::top(self.bits);
        }
        // a divisor range straddling zero puts the quotient extremes at
        // interior points, not the endpoints
        if o.signed_min() <= 0 && o.signed_max() >= 0 {
            return Self::top(self.bits);
        }
        if let Some(k) = o.as_singleton() {
            let ks = to_signed(k, self.bits);
            let q1 = self.lower_signed() / ks;
            let q2 = self.upper_signed() / ks;
            let (mn, mx) = (q1.min(q2), q1.max(q2));
            let stride = if ks > 0 && self.stride as i128 % ks == 0 {
                (self.stride as i128 / ks) as u64
            } else {
                1
            };
            return Self::new(self.bits, stride, mn, mx);
        }
        let pairs = [
            self.lower_signed() / o.lower_signed(),
            self.lower_signed() / o.upper_signed(),
            self.upper_signed() / o.lower_signed(),
            self.upper_signed() / o.upper_signed(),
        ];
        Self::new(
            self.bits,
            1,
            *pairs.iter().min().unwrap(),
            *pairs.iter().max().unwrap(),
        )
    }

    /// Signed remainder; the sign follows the dividend.
    pub fn srem(&self, o: &Self) -> Self {
        debug_assert_eq!(self.bits, o.bits);
        if self.empty || o.empty {
            return Self::empty(self.bits);
        }
        if let (Some(a), Some(b)) = (self.as_singleton(), o.as_singleton()) {
            if b == 0 {
                return Self::top(self.bits);
            }
            let r = to_signed(a, self.bits) % to_signed(b, self.bits);
            return Self::singleton(self.bits, r);
        }
        if let Some(k) = o.as_singleton() {
            let ka = to_signed(k, self.bits).unsigned_abs();
            if ka == 0 {
                return Self::top(self.bits);
            }
            let bound = (ka - 1) as i128;
            if !self.wraps_signed() && self.lower_signed() >= 0 {
                return Self::new(self.bits, 1, 0, bound);
            }
            return Self::new(self.bits, 1, -bound, bound);
        }
        Self::top(self.bits)
    }

    fn shl_const(&self, k: u64) -> Self {
        if self.empty {
            return *self;
        }
        if k >= self.bits as u64 {
            return Self::singleton(self.bits, 0);
        }
        if self.span() << k >= 1u128 << self.bits {
            return Self::top(self.bits);
        }
        let m = mask(self.bits);
        Self::raw(
            self.bits,
            (self.stride << k) & m,
            (self.lower << k) & m,
            (self.upper << k) & m,
        )
    }

    fn lshr_const(&self, k: u64) -> Self {
        if self.empty {
            return *self;
        }
        let k = k.min(63);
        let pieces: Vec<Self> = self
            .split_unsigned()
            .into_iter()
            .map(|p| {
                let stride = if p.stride != 0 && k < 64 && p.stride % (1u64 << k.min(63)) == 0 {
                    p.stride >> k
                } else {
                    1
                };
                Self::raw(p.bits, stride, p.lower >> k, p.upper >> k)
            })
            .collect();
        Self::union_all(self.bits, pieces)
    }

    fn ashr_const(&self, k: u64) -> Self {
        if self.empty {
            return *self;
        }
        let k = k.min(self.bits as u64 - 1);
        let pieces: Vec<Self> = self
            .split_signed()
            .into_iter()
            .map(|p| {
                let stride = if p.stride != 0 && p.stride % (1u64 << k) == 0 {
                    p.stride >> k
                } else {
                    1
                };
                Self::new(p.bits, stride, p.lower_signed() >> k, p.upper_signed() >> k)
            })
            .collect();
        Self::union_all(self.bits, pieces)
    }

    fn by_amount(&self, o: &Self, f: impl Fn(&Self, u64) -> Self) -> Self {
        if self.empty || o.empty {
            return Self::empty(self.bits);
        }
        if let Some(k) = o.as_singleton() {
            return f(self, k);
        }
        if o.cardinality() <= 16 {
            let pieces: Vec<Self> = o.values(16).into_iter().map(|k| f(self, k)).collect();
            return Self::union_all(self.bits, pieces);
        }
        Self::top(self.bits)
    }

    pub fn shl(&self, o: &Self) -> Self {
        self.by_amount(o, Self::shl_const)
    }

    pub fn lshr(&self, o: &Self) -> Self {
        self.by_amount(o, Self::lshr_const)
    }

    pub fn ashr(&self, o: &Self) -> Self {
        self.by_amount(o, Self::ashr_const)
    }

    pub fn rotate_left(&self, o: &Self) -> Self {
        self.by_amount(o, |iv, k| {
            let k = k % iv.bits as u64;
            if k == 0 {
                *iv
            } else if let Some(v) = iv.as_singleton() {
                let m = mask(iv.bits);
                let r = ((v << k) | (v >> (iv.bits as u64 - k))) & m;
                Self::singleton(iv.bits, r as i128)
            } else {
                Self::top(iv.bits)
            }
        })
    }

    pub fn rotate_right(&self, o: &Self) -> Self {
        self.by_amount(o, |iv, k| {
            let k = k % iv.bits as u64;
            let back = (iv.bits as u64 - k) % iv.bits as u64;
            iv.rotate_left(&Self::singleton(iv.bits, back as i128))
        })
    }

    /// Number of trailing zero bits every member of the set shares, derived
    /// from the stride (or the value itself, for a singleton).
    fn known_trailing_zeros(&self) -> u32 {
        match self.as_singleton() {
            Some(v) => v.trailing_zeros().min(self.bits),
            None => self.stride.trailing_zeros().min(self.bits),
        }
    }

    fn bitop(&self, o: &Self, kind: BitOpKind) -> Self {
        debug_assert_eq!(self.bits, o.bits);
        if self.empty || o.empty {
            return Self::empty(self.bits);
        }
        let m = mask(self.bits);
        if let (Some(a), Some(b)) = (self.as_singleton(), o.as_singleton()) {
            let v = match kind {
                BitOpKind::Or => a | b,
                BitOpKind::And => a & b,
                BitOpKind::Xor => a ^ b,
            };
            return Self::singleton(self.bits, (v & m) as i128);
        }
        // identities
        match kind {
            BitOpKind::Or | BitOpKind::Xor => {
                if self.as_singleton() == Some(0) {
                    return *o;
                }
                if o.as_singleton() == Some(0) {
                    return *self;
                }
            }
            BitOpKind::And => {
                if self.as_singleton() == Some(m) {
                    return *o;
                }
                if o.as_singleton() == Some(m) {
                    return *self;
                }
                if self.as_singleton() == Some(0) || o.as_singleton() == Some(0) {
                    return Self::singleton(self.bits, 0);
                }
            }
        }
        // stride: every member keeps its low t bits fixed
        let t = match kind {
            BitOpKind::And => match (self.as_singleton(), o.as_singleton()) {
                (Some(v), None) | (None, Some(v)) => v.trailing_zeros().min(self.bits),
                _ => self.known_trailing_zeros().min(o.known_trailing_zeros()),
            },
            _ => self.known_trailing_zeros().min(o.known_trailing_zeros()),
        };
        let t = t.min(self.bits - 1);
        let low_mask = (1u64 << t).wrapping_sub(1);
        let residue = match kind {
            BitOpKind::Or => (self.lower | o.lower) & low_mask,
            BitOpKind::Xor => (self.lower ^ o.lower) & low_mask,
            BitOpKind::And => match (self.as_singleton(), o.as_singleton()) {
                (Some(_), None) | (None, Some(_)) => 0,
                _ => (self.lower & o.lower) & low_mask,
            },
        };
        let stride = 1u64 << t;
        let mut pieces = Vec::new();
        for (p, q) in iproduct!(self.split_unsigned(), o.split_unsigned()) {
            let (mn, mx) = warren_bounds(kind, p.lower, p.upper, q.lower, q.upper, self.bits);
            // snap the lower bound onto the residue class
            let snapped = mn as u128 + (residue.wrapping_sub(mn) & low_mask) as u128;
            if snapped > mx as u128 {
                continue;
            }
            pieces.push(Self::raw(self.bits, stride, snapped as u64, mx));
        }
        Self::union_all(self.bits, pieces)
    }

    pub fn or(&self, o: &Self) -> Self {
        self.bitop(o, BitOpKind::Or)
    }

    pub fn and(&self, o: &Self) -> Self {
        self.bitop(o, BitOpKind::And)
    }

    pub fn xor(&self, o: &Self) -> Self {
        self.bitop(o, BitOpKind::Xor)
    }

    /// Keep the low `w` bits of every member.
    fn truncate(&self, w: u32) -> Self {
        if self.empty {
            return Self::empty(w);
        }
        if w >= self.bits {
            return *self;
        }
        let low = mask(w);
        // a stride that is a multiple of 2^w makes the low bits invariant
        if self.stride != 0 && w < 64 && self.stride % (1u64 << w) == 0 {
            return Self::singleton(w, (self.lower & low) as i128);
        }
        if self.as_singleton().is_some() {
            return Self::singleton(w, (self.lower & low) as i128);
        }
        if self.lower <= self.upper && self.upper <= low {
            return Self::raw(w, self.stride, self.lower, self.upper);
        }
        Self::top(w)
    }

    pub fn extract(&self, hi: u32, lo: u32) -> Self {
        debug_assert!(lo <= hi && hi < self.bits);
        self.lshr_const(lo as u64).truncate(hi - lo + 1)
    }

    pub fn zero_extend(&self, extra: u32) -> Self {
        let bits = self.bits + extra;
        if self.empty {
            return Self::empty(bits);
        }
        let pieces: Vec<Self> = self
            .split_unsigned()
            .into_iter()
            .map(|p| Self::raw(bits, p.stride, p.lower, p.upper))
            .collect();
        Self::union_all(bits, pieces)
    }

    pub fn sign_extend(&self, extra: u32) -> Self {
        let bits = self.bits + extra;
        if self.empty {
            return Self::empty(bits);
        }
        let pieces: Vec<Self> = self
            .split_signed()
            .into_iter()
            .map(|p| Self::new(bits, p.stride, p.lower_signed(), p.upper_signed()))
            .collect();
        Self::union_all(bits, pieces)
    }

    /// `self` on the high side.
    pub fn concat(&self, o: &Self) -> Self {
        let hi = self.zero_extend(o.bits).shl_const(o.bits as u64);
        let lo = o.zero_extend(self.bits);
        hi.or(&lo)
    }

    /// Smallest strided interval containing both operands.
    pub fn union(&self, o: &Self) -> Self {
        debug_assert_eq!(self.bits, o.bits);
        if self.empty {
            return *o;
        }
        if o.empty {
            return *self;
        }
        if self == o {
            return *self;
        }
        if self.is_top() || o.is_top() {
            return Self::top(self.bits);
        }
        if !self.wraps_signed() && !o.wraps_signed() {
            let d = (self.lower_signed() - o.lower_signed()).unsigned_abs();
            let g = gcd0(gcd0(self.stride, o.stride), d as u64);
            return Self::new(
                self.bits,
                g,
                self.lower_signed().min(o.lower_signed()),
                self.upper_signed().max(o.upper_signed()),
            );
        }
        if self.lower <= self.upper && o.lower <= o.upper {
            let g = gcd0(gcd0(self.stride, o.stride), self.lower.abs_diff(o.lower));
            return Self::raw(
                self.bits,
                g,
                self.lower.min(o.lower),
                self.upper.max(o.upper),
            );
        }
        Self::top(self.bits)
    }

    fn union_all(bits: u32, pieces: Vec<Self>) -> Self {
        pieces
            .into_iter()
            .fold(Self::empty(bits), |acc, p| acc.union(&p))
    }

    /// Interval meet: the members common to both. May come back empty. When
    /// either side wraps in a way the congruence walk cannot handle, the
    /// smaller operand is returned, which still encloses the true meet.
    pub fn intersection(&self, o: &Self) -> Self {
        debug_assert_eq!(self.bits, o.bits);
        if self.empty || o.empty {
            return Self::empty(self.bits);
        }
        if self == o {
            return *self;
        }
        if self.is_top() {
            return *o;
        }
        if o.is_top() {
            return *self;
        }
        if let Some(v) = self.as_singleton() {
            return if o.contains(v) {
                *self
            } else {
                Self::empty(self.bits)
            };
        }
        if let Some(v) = o.as_singleton() {
            return if self.contains(v) {
                *o
            } else {
                Self::empty(self.bits)
            };
        }
        if self.wraps_signed() || o.wraps_signed() {
            let mut acc = Self::empty(self.bits);
            for p in self.split_signed() {
                for q in o.split_signed() {
                    acc = acc.union(&p.intersection(&q));
                }
            }
            return acc;
        }
        let (sa, sb) = (self.stride as i128, o.stride as i128);
        let g = gcd(self.stride, o.stride) as i128;
        let (la, lb) = (self.lower_signed(), o.lower_signed());
        if (la - lb).rem_euclid(g) != 0 {
            return Self::empty(self.bits);
        }
        let lcm = sa / g * sb;
        if lcm > u64::MAX as i128 {
            return if self.cardinality() <= o.cardinality() {
                *self
            } else {
                *o
            };
        }
        // solve x = la (mod sa), x = lb (mod sb)
        let (_, inv, _) = ext_gcd(sa / g, sb / g);
        let k = ((lb - la) / g).rem_euclid(sb / g) * inv.rem_euclid(sb / g) % (sb / g);
        let x0 = la + sa * k.rem_euclid(sb / g);
        let lo = la.max(lb);
        let hi = self.upper_signed().min(o.upper_signed());
        if lo > hi {
            return Self::empty(self.bits);
        }
        let lo = lo + (x0 - lo).rem_euclid(lcm);
        if lo > hi {
            return Self::empty(self.bits);
        }
        Self::new(self.bits, lcm as u64, lo, hi)
    }

    pub fn eq_(&self, o: &Self) -> BoolResult {
        if self.empty || o.empty {
            return BoolResult::False;
        }
        if self == o {
            return BoolResult::True;
        }
        if self.intersection(o).is_empty() {
            BoolResult::False
        } else {
            BoolResult::Maybe
        }
    }

    pub fn ne_(&self, o: &Self) -> BoolResult {
        self.eq_(o).not()
    }

    pub fn ult(&self, o: &Self) -> BoolResult {
        if self.unsigned_max() < o.unsigned_min() {
            BoolResult::True
        } else if self.unsigned_min() >= o.unsigned_max() {
            BoolResult::False
        } else {
            BoolResult::Maybe
        }
    }

    pub fn ule(&self, o: &Self) -> BoolResult {
        if self.unsigned_max() <= o.unsigned_min() {
            BoolResult::True
        } else if self.unsigned_min() > o.unsigned_max() {
            BoolResult::False
        } else {
            BoolResult::Maybe
        }
    }

    pub fn ugt(&self, o: &Self) -> BoolResult {
        o.ult(self)
    }

    pub fn uge(&self, o: &Self) -> BoolResult {
        o.ule(self)
    }

    pub fn slt(&self, o: &Self) -> BoolResult {
        if self.signed_max() < o.signed_min() {
            BoolResult::True
        } else if self.signed_min() >= o.signed_max() {
            BoolResult::False
        } else {
            BoolResult::Maybe
        }
    }

    pub fn sle(&self, o: &Self) -> BoolResult {
        if self.signed_max() <= o.signed_min() {
            BoolResult::True
        } else if self.signed_min() > o.signed_max() {
            BoolResult::False
        } else {
            BoolResult::Maybe
        }
    }

    pub fn sgt(&self, o: &Self) -> BoolResult {
        o.slt(self)
    }

    pub fn sge(&self, o: &Self) -> BoolResult {
        o.sle(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitOpKind {
    Or,
    And,
    Xor,
}

fn ext_gcd(a: i128, b: i128) -> (i128, i128, i128) {
    if b == 0 {
        (a, 1, 0)
    } else {
        let (g, x, y) = ext_gcd(b, a % b);
        (g, y, x - a / b * y)
    }
}

/// Warren's algorithms for the tight unsigned bounds of a bitwise operation
/// over two plain (non-wrapping) ranges.
fn warren_bounds(kind: BitOpKind, a: u64, b: u64, c: u64, d: u64, bits: u32) -> (u64, u64) {
    match kind {
        BitOpKind::Or => (min_or(a, b, c, d, bits), max_or(a, b, c, d, bits)),
        BitOpKind::And => (min_and(a, b, c, d, bits), max_and(a, b, c, d, bits)),
        BitOpKind::Xor => (min_xor(a, b, c, d, bits), max_xor(a, b, c, d, bits)),
    }
}

fn top_bit(bits: u32) -> u64 {
    1u64 << (bits - 1)
}

fn min_or(mut a: u64, b: u64, mut c: u64, d: u64, bits: u32) -> u64 {
    let mut m = top_bit(bits);
    while m != 0 {
        if !a & c & m != 0 {
            let t = (a | m) & m.wrapping_neg();
            if t <= b {
                a = t;
                break;
            }
        } else if a & !c & m != 0 {
            let t = (c | m) & m.wrapping_neg();
            if t <= d {
                c = t;
                break;
            }
        }
        m >>= 1;
    }
    a | c
}

fn max_or(a: u64, mut b: u64, c: u64, mut d: u64, bits: u32) -> u64 {
    let mut m = top_bit(bits);
    while m != 0 {
        if b & d & m != 0 {
            let t = (b - m) | (m - 1);
            if t >= a {
                b = t;
                break;
            }
            let t = (d - m) | (m - 1);
            if t >= c {
                d = t;
                break;
            }
        }
        m >>= 1;
    }
    b | d
}

fn min_and(mut a: u64, b: u64, mut c: u64, d: u64, bits: u32) -> u64 {
    let mut m = top_bit(bits);
    while m != 0 {
        if !a & !c & m != 0 {
            let t = (a | m) & m.wrapping_neg();
            if t <= b {
                a = t;
                break;
            }
            let t = (c | m) & m.wrapping_neg();
            if t <= d {
                c = t;
                break;
            }
        }
        m >>= 1;
    }
    a & c
}

fn max_and(a: u64, mut b: u64, c: u64, mut d: u64, bits: u32) -> u64 {
    let mut m = top_bit(bits);
    while m != 0 {
        if b & !d & m != 0 {
            let t = (b & !m) | (m - 1);
            if t >= a {
                b = t;
                break;
            }
        } else if !b & d & m != 0 {
            let t = (d & !m) | (m - 1);
            if t >= c {
                d = t;
                break;
            }
        }
        m >>= 1;
    }
    b & d
}

fn min_xor(mut a: u64, b: u64, mut c: u64, d: u64, bits: u32) -> u64 {
    let mut m = top_bit(bits);
    while m != 0 {
        if !a & c & m != 0 {
            let t = (a | m) & m.wrapping_neg();
            if t <= b {
                a = t;
            }
        } else if a & !c & m != 0 {
            let t = (c | m) & m.wrapping_neg();
            if t <= d {
                c = t;
            }
        }
        m >>= 1;
    }
    a ^ c
}

fn max_xor(a: u64, mut b: u64, c: u64, mut d: u64, bits: u32) -> u64 {
    let mut m = top_bit(bits);
    while m != 0 {
        if b & d & m != 0 {
            let t = (b - m) | (m - 1);
            if t >= a {
                b = t;
            } else {
                let t = (d - m) | (m - 1);
                if t >= c {
                    d = t;
                }
            }
        }
        m >>= 1;
    }
    b ^ d
}

impl Display for StridedInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.empty {
            return write!(f, "<{}>[]", self.bits);
        }
        write!(
            f,
            "<{}>{:#x}[{:#x}, {:#x}]",
            self.bits, self.stride, self.lower, self.upper
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn si(bits: u32, stride: u64, lower: i128, upper: i128) -> StridedInterval {
        StridedInterval::new(bits, stride, lower, upper)
    }

    #[test]
    fn add_cases() {
        let si1 = si(32, 0, 10, 10);
        let si_a = si(32, 2, 10, 20);
        let si_b = si(32, 2, -100, 200);
        let si_c = si(32, 3, -100, 200);
        assert_eq!(si1.add(&si1), si(32, 0, 20, 20));
        assert_eq!(si1.add(&si_a), si(32, 2, 20, 30));
        assert_eq!(si_a.add(&si_b), si(32, 2, -90, 220));
        assert_eq!(si_b.add(&si_c), si(32, 1, -200, 400));
        // wraps around the unsigned seam
        let h = si(32, 0, 0x8000_0000, 0x8000_0000);
        assert_eq!(h.add(&si(32, 0, -1, -1)), si(32, 0, 0x7fff_ffff, 0x7fff_ffff));
    }

    #[test]
    fn sub_and_neg() {
        let si_a = si(32, 2, 10, 20);
        let si_b = si(32, 2, -100, 200);
        let si_c = si(32, 3, -100, 200);
        assert_eq!(si_a.sub(&si_a).contains(0), true);
        assert_eq!(si_a.sub(&si_b), si(32, 2, -190, 120));
        assert_eq!(si_b.sub(&si_c), si(32, 1, -300, 300));
        assert_eq!(si(32, 0, 10, 10).invert(), si(32, 0, -11, -11));
        assert_eq!(si_b.invert(), si(32, 2, -201, 99));
    }

    #[test]
    fn or_cases() {
        let si1 = si(32, 0, 10, 10);
        let si3 = si(32, 0, 28, 28);
        let si_a = si(32, 2, 10, 20);
        let si_d = si(32, 2, 50, 60);
        let si_e = si(16, 1, 0x2000, 0x3000);
        let si_f = si(16, 1, 0, 255);
        let si_g = si(16, 1, 0, 0xff);
        assert_eq!(si1.or(&si3), si(32, 0, 30, 30));
        assert_eq!(si1.or(&si1), si(32, 0, 10, 10));
        assert_eq!(si1.or(&si_a), si(32, 2, 10, 30));
        assert_eq!(si_a.or(&si1), si(32, 2, 10, 30));
        assert_eq!(si_a.or(&si_d), si(32, 2, 50, 62));
        assert_eq!(si_d.or(&si_a), si(32, 2, 50, 62));
        assert_eq!(si_e.or(&si_f), si(16, 1, 0x2000, 0x30ff));
        assert_eq!(si_e.or(&si_g), si(16, 1, 0x2000, 0x30ff));
    }

    #[test]
    fn and_cases() {
        let full = si(32, 1, 0, 0xffff_ffff);
        let msb = si(32, 0, 0x8000_0000, 0x8000_0000);
        assert_eq!(full.and(&msb), si(32, 0x8000_0000, 0, 0x8000_0000));
        let low = si(32, 1, 0, 0x7fff_ffff);
        assert_eq!(low.and(&msb), si(32, 0, 0, 0));
    }

    #[test]
    fn mul_div_mod() {
        let si1 = si(32, 0, 10, 10);
        let si_a = si(32, 2, 10, 20);
        let si_b = si(32, 2, -100, 200);
        let three = si(32, 0, 3, 3);
        assert_eq!(si1.mul(&three), si(32, 0, 30, 30));
        assert_eq!(si_a.mul(&three), si(32, 6, 30, 60));
        assert_eq!(si_a.mul(&si_b), si(32, 2, -2000, 4000));
        assert_eq!(si1.sdiv(&three), si(32, 0, 3, 3));
        assert_eq!(si_a.sdiv(&three), si(32, 1, 3, 6));
        assert_eq!(si1.srem(&three), si(32, 0, 1, 1));
        assert_eq!(si_a.srem(&three), si(32, 1, 0, 2));
    }

    #[test]
    fn shifting() {
        let si1 = si(32, 0, 10, 10);
        let r = si1.shl(&si(32, 0, 3, 3));
        assert_eq!(r.bits(), 32);
        assert_eq!(r, si(32, 0, 80, 80));
    }

    #[test]
    fn extraction() {
        // sign bit of a negative singleton
        let neg = si(64, 0, -1, -1);
        assert_eq!(neg.extract(63, 63), si(1, 0, 1, 1));
        // sign bit over {-1, 0}
        let np = si(64, 1, -1, 0);
        assert_eq!(np.extract(63, 63), si(1, 1, 0, 1));
        // halves of a singleton
        let v = si(64, 0, 0x7fff_ffff_ffff_0000, 0x7fff_ffff_ffff_0000);
        assert_eq!(v.extract(63, 32), si(32, 0, 0x7fff_ffff, 0x7fff_ffff));
        assert_eq!(v.extract(31, 0), si(32, 0, 0xffff_0000, 0xffff_0000));
        assert_eq!(
            v.extract(63, 32).concat(&v.extract(31, 0)),
            v
        );
        // halves of a strided interval
        let s = si(64, 9, 1, 10);
        assert_eq!(s.extract(63, 32), si(32, 0, 0, 0));
        assert_eq!(s.extract(31, 0), si(32, 9, 1, 10));
        assert_eq!(s.extract(63, 32).concat(&s.extract(31, 0)), s);
        // byte-invariant strides collapse to singletons
        let b = si(32, 0x100_0000, 0xcff_ffff, 0xdff_ffff);
        assert_eq!(b.extract(7, 0), si(8, 0, 0xff, 0xff));
        assert_eq!(b.extract(15, 8), si(8, 0, 0xff, 0xff));
        assert_eq!(b.extract(23, 16), si(8, 0, 0xff, 0xff));
        assert_eq!(b.extract(31, 24), si(8, 1, 0xc, 0xd));
    }

    #[test]
    fn extension() {
        let part2 = si(32, 9, 1, 10);
        assert_eq!(part2.zero_extend(32), si(64, 9, 1, 10));
        assert_eq!(part2.sign_extend(32), si(64, 9, 1, 10));
        assert_eq!(part2.zero_extend(32).extract(31, 0), part2);
        assert_eq!(si(1, 0, 1, 1).sign_extend(31), si(32, 0, 0xffff_ffff, 0xffff_ffff));
    }

    #[test]
    fn union_cases() {
        let si1 = si(32, 0, 10, 10);
        let si2 = si(32, 0, 10, 10);
        let si3 = si(32, 0, 28, 28);
        let si_a = si(32, 2, 10, 20);
        let si_b = si(32, 2, -100, 200);
        let si_c = si(32, 3, -100, 200);
        assert_eq!(si1.union(&si2), si(32, 0, 10, 10));
        assert_eq!(si1.union(&si3), si(32, 18, 10, 28));
        assert_eq!(si1.union(&si_a), si(32, 2, 10, 20));
        assert_eq!(si_a.union(&si_b), si(32, 2, -100, 200));
        assert_eq!(si_b.union(&si_c), si(32, 1, -100, 200));
    }

    #[test]
    fn intersection_cases() {
        let si1 = si(32, 0, 10, 10);
        let si2 = si(32, 0, 10, 10);
        let si_a = si(32, 2, 10, 20);
        let si_b = si(32, 2, -100, 200);
        let si_c = si(32, 3, -100, 200);
        assert_eq!(si1.intersection(&si1), si1);
        assert_eq!(si1.intersection(&si2), si(32, 0, 10, 10));
        assert_eq!(si1.intersection(&si_a), si(32, 0, 10, 10));
        assert_eq!(si_a.intersection(&si_b), si(32, 2, 10, 20));
        assert_eq!(si_b.intersection(&si_c), si(32, 6, -100, 200));
        assert!(
            si(32, 0, 0, 0)
                .intersection(&si(32, 0, 1, 1))
                .is_empty()
        );
    }

    #[test]
    fn soundness_under_add() {
        let a = si(32, 3, 5, 26);
        let b = si(32, 4, -8, 8);
        let sum = a.add(&b);
        for x in a.values(16) {
            for y in b.values(16) {
                assert!(sum.contains(x.wrapping_add(y)), "{x} + {y} not in {sum}");
            }
        }
    }

    #[test]
    fn comparison_verdicts() {
        let low = si(32, 1, 0, 10);
        let high = si(32, 1, 20, 30);
        assert!(low.ult(&high).is_true());
        assert!(high.ult(&low).is_false());
        let touching = si(32, 1, 10, 20);
        assert!(low.ule(&si(32, 0, 10, 10)).is_true());
        assert!(low.ult(&touching).is_maybe());
        // signed comparison with a negative range
        let s = si(32, 1, -0x7f, 0x7f);
        let c = si(32, 0, 0x30, 0x30);
        assert!(s.slt(&c).is_maybe());
    }

    #[test]
    fn top_and_bounds() {
        let t = StridedInterval::top(32);
        assert!(t.is_top());
        assert_eq!(t.lower_signed(), -0x8000_0000);
        assert_eq!(t.upper_bound(), 0x7fff_ffff);
        let full = si(32, 1, 0, 0xffff_ffff);
        let m1 = si(32, 0, 1, 1);
        // subtracting from the full range wraps into canonical top
        assert!(full.sub(&m1).is_top());
    }
}
