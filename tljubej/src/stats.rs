use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

/// 64-bit limbs of [`ExactSum`].
const LIMBS: usize = 34;

/// Bit position of the smallest subnormal once a quotient carries one extra
/// limb of fraction.
const SUBNORMAL_BIT: usize = 64;

/// Exponent of the lowest bit of a quotient: one limb below 2^-1074.
const QUOTIENT_EXP: i32 = -1074 - 64;

/// Exact sum of finite `f64`s, kept as a two's complement integer counting
/// units of 2^-1074.
///
/// Every finite `f64` is a whole number of such units below 2^2098, so 34
/// limbs leave 64 bits of headroom for the count and the sum never wraps.
/// Addition is associative and commutative, which makes the sum independent
/// of the order values and partial sums arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExactSum {
    limbs: [u64; LIMBS],
}

impl ExactSum {
    const ZERO: ExactSum = ExactSum { limbs: [0; LIMBS] };

    fn add(&mut self, value: f64) {
        debug_assert!(value.is_finite());
        let bits = value.to_bits();
        let exponent = ((bits >> 52) & 0x7ff) as usize;
        let fraction = bits & ((1 << 52) - 1);
        let (mantissa, shift) = match exponent {
            0 => (fraction, 0),
            _ => (fraction | (1 << 52), exponent - 1),
        };
        if mantissa == 0 {
            return;
        }

        let wide = u128::from(mantissa) << (shift % 64);
        let parts = [wide as u64, (wide >> 64) as u64];
        if bits >> 63 == 0 {
            self.add_at(shift / 64, parts);
        } else {
            self.sub_at(shift / 64, parts);
        }
    }

    fn add_at(&mut self, start: usize, parts: [u64; 2]) {
        let mut carry = false;
        for (idx, limb) in self.limbs[start..].iter_mut().enumerate() {
            if idx >= parts.len() && !carry {
                break;
            }
            let (sum, c1) = limb.overflowing_add(parts.get(idx).copied().unwrap_or(0));
            let (sum, c2) = sum.overflowing_add(u64::from(carry));
            *limb = sum;
            carry = c1 || c2;
        }
    }

    fn sub_at(&mut self, start: usize, parts: [u64; 2]) {
        let mut borrow = false;
        for (idx, limb) in self.limbs[start..].iter_mut().enumerate() {
            if idx >= parts.len() && !borrow {
                break;
            }
            let (diff, b1) = limb.overflowing_sub(parts.get(idx).copied().unwrap_or(0));
            let (diff, b2) = diff.overflowing_sub(u64::from(borrow));
            *limb = diff;
            borrow = b1 || b2;
        }
    }

    fn merge(&mut self, other: &ExactSum) {
        let mut carry = false;
        for (limb, other) in self.limbs.iter_mut().zip(other.limbs) {
            let (sum, c1) = limb.overflowing_add(other);
            let (sum, c2) = sum.overflowing_add(u64::from(carry));
            *limb = sum;
            carry = c1 || c2;
        }
    }

    fn is_negative(&self) -> bool {
        self.limbs[LIMBS - 1] >> 63 == 1
    }

    /// `self / divisor`, correctly rounded to the nearest `f64` (ties to even).
    fn quotient(&self, divisor: u64) -> f64 {
        debug_assert!(divisor > 0);
        let negative = self.is_negative();

        // Magnitude shifted up one limb, so the quotient keeps 64 fraction bits.
        let mut digits = [0u64; LIMBS + 1];
        let mut carry = negative;
        for (digit, limb) in digits[1..].iter_mut().zip(self.limbs) {
            let limb = if negative { !limb } else { limb };
            let (value, overflow) = limb.overflowing_add(u64::from(carry));
            *digit = value;
            carry = overflow;
        }

        let divisor = u128::from(divisor);
        let mut rem = 0u128;
        for digit in digits.iter_mut().rev() {
            let cur = (rem << 64) | u128::from(*digit);
            *digit = (cur / divisor) as u64;
            rem = cur % divisor;
        }

        let magnitude = round_to_f64(&digits, rem != 0);
        if negative {
            -magnitude
        } else {
            magnitude
        }
    }
}

/// Rounds the integer `digits * 2^QUOTIENT_EXP` (plus a sticky remainder) to
/// the nearest `f64`.
fn round_to_f64(digits: &[u64], sticky: bool) -> f64 {
    let Some(top) = digits.iter().rposition(|&limb| limb != 0) else {
        return 0.0;
    };
    let high = top * 64 + 63 - digits[top].leading_zeros() as usize;
    let low = high.saturating_sub(52).max(SUBNORMAL_BIT);
    if high + 1 < low {
        // Below half the smallest subnormal.
        return 0.0;
    }

    let mut mantissa = window(digits, low);
    let round = bit(digits, low - 1);
    let sticky = sticky || any_below(digits, low - 1);
    if round && (sticky || mantissa & 1 == 1) {
        mantissa += 1;
    }
    scale(mantissa as f64, low as i32 + QUOTIENT_EXP)
}

fn bit(digits: &[u64], pos: usize) -> bool {
    (digits[pos / 64] >> (pos % 64)) & 1 == 1
}

fn any_below(digits: &[u64], pos: usize) -> bool {
    let idx = pos / 64;
    digits[..idx].iter().any(|&limb| limb != 0) || digits[idx] & ((1 << (pos % 64)) - 1) != 0
}

/// The 54 bits of `digits` starting at `low`.
fn window(digits: &[u64], low: usize) -> u64 {
    let idx = low / 64;
    let lo = u128::from(digits[idx]);
    let hi = digits.get(idx + 1).copied().map_or(0, u128::from);
    (((hi << 64) | lo) >> (low % 64)) as u64 & ((1 << 54) - 1)
}

/// `mantissa * 2^exp` for a mantissa of at most 54 bits whose product is
/// representable (or overflows to infinity).
fn scale(mantissa: f64, exp: i32) -> f64 {
    if exp < -1022 {
        mantissa * pow2(exp + 1022) * pow2(-1022)
    } else if exp > 1023 {
        mantissa * pow2(1023) * pow2((exp - 1023).min(1023))
    } else {
        mantissa * pow2(exp)
    }
}

fn pow2(exp: i32) -> f64 {
    debug_assert!((-1022..=1023).contains(&exp));
    f64::from_bits(((exp + 1023) as u64) << 52)
}

/// Running min/max/sum/count of one key.
///
/// `count == 0` is the unseen state; `min <= max` holds whenever `count > 0`.
/// The sum is exact, so merging partial stats in any grouping yields the same
/// value and the mean is the correctly rounded `sum / count`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningStat {
    min: f64,
    max: f64,
    count: u64,
    sum: ExactSum,
}

impl Default for RunningStat {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl RunningStat {
    pub const EMPTY: RunningStat = RunningStat {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
        count: 0,
        sum: ExactSum::ZERO,
    };

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Folds in one finite value.
    pub fn observe(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum.add(value);
        self.count += 1;
    }

    /// Folds `other` in with the same algebra as [`observe`](Self::observe).
    pub fn merge(&mut self, other: &RunningStat) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum.merge(&other.sum);
        self.count += other.count;
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// The exact sum rounded to the nearest `f64`; infinite only when the
    /// true sum exceeds `f64::MAX`.
    pub fn sum(&self) -> f64 {
        self.sum.quotient(1)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// The exact mean rounded once, so it always lies in `[min, max]`.
    pub fn mean(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.sum.quotient(self.count))
    }
}

/// Per-key statistics owned by one worker, or the merge of several.
#[derive(Debug, Default, Clone)]
pub struct StatsStore {
    entries: FxHashMap<Box<[u8]>, RunningStat>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observation. The key is copied only the first time it is seen.
    pub fn record(&mut self, key: &[u8], value: f64) {
        if let Some(stat) = self.entries.get_mut(key) {
            stat.observe(value);
        } else {
            let mut stat = RunningStat::EMPTY;
            stat.observe(value);
            self.entries.insert(key.into(), stat);
        }
    }

    pub fn merge(&mut self, mut other: StatsStore) {
        if other.entries.len() > self.entries.len() {
            std::mem::swap(self, &mut other);
        }
        for (key, stat) in other.entries {
            match self.entries.entry(key) {
                Entry::Occupied(mut entry) => entry.get_mut().merge(&stat),
                Entry::Vacant(entry) => {
                    entry.insert(stat);
                }
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&RunningStat> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts.
    pub fn observations(&self) -> u64 {
        self.entries.values().map(RunningStat::count).sum()
    }

    /// Ends mutation; the result iterates in byte-wise key order.
    pub fn freeze(self) -> FrozenStore {
        let mut entries: Vec<_> = self.entries.into_iter().collect();
        entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        FrozenStore { entries }
    }
}

/// Read-only statistics sorted by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrozenStore {
    entries: Vec<(Box<[u8]>, RunningStat)>,
}

impl FrozenStore {
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &RunningStat)> {
        self.entries.iter().map(|(key, stat)| (&**key, stat))
    }

    pub fn get(&self, key: &[u8]) -> Option<&RunningStat> {
        self.entries
            .binary_search_by(|(probe, _)| (**probe).cmp(key))
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn observe_tracks_extremes() {
        let mut stat = RunningStat::default();
        assert!(stat.is_empty());
        assert_eq!(stat.mean(), None);

        for value in [3.0, -1.5, 7.25] {
            stat.observe(value);
        }
        assert_eq!((stat.min(), stat.max(), stat.count()), (-1.5, 7.25, 3));
        assert_eq!(stat.mean(), Some(8.75 / 3.0));
    }

    #[test]
    fn mean_stays_within_extremes() {
        let mut stat = RunningStat::default();
        for _ in 0..3 {
            stat.observe(0.1);
        }
        assert_eq!(stat.mean(), Some(0.1));
    }

    #[test]
    fn summation_order_does_not_matter() {
        let values = [0.1, 0.2, 0.3, -0.7, 12.4, 0.25, 0.01, 0.47, 0.57, 12.34, 1e-7];
        let mut forward = RunningStat::default();
        values.iter().for_each(|v| forward.observe(*v));
        let mut backward = RunningStat::default();
        values.iter().rev().for_each(|v| backward.observe(*v));

        assert_eq!(forward, backward);
        assert_eq!(forward.mean().map(f64::to_bits), backward.mean().map(f64::to_bits));
    }

    fn partial(values: &[f64]) -> RunningStat {
        let mut stat = RunningStat::default();
        values.iter().for_each(|v| stat.observe(*v));
        stat
    }

    #[test]
    fn regrouping_partials_keeps_the_mean() {
        let mut left = partial(&[0.01, 0.47]);
        left.merge(&partial(&[0.57]));
        let mut right = partial(&[0.01]);
        right.merge(&partial(&[0.47, 0.57]));

        assert_eq!(left, right);
        assert_eq!(left.mean().map(f64::to_bits), right.mean().map(f64::to_bits));
    }

    #[test]
    fn huge_values_do_not_overflow() {
        let mut stat = partial(&[1.7e308, 1.7e308]);
        stat.merge(&partial(&[-1.7e308, -1.7e308]));
        assert_eq!(stat.mean(), Some(0.0));
        assert_eq!(stat.sum(), 0.0);

        let stat = partial(&[f64::MAX, f64::MAX, f64::MAX]);
        assert_eq!(stat.mean(), Some(f64::MAX));
        assert_eq!(stat.sum(), f64::INFINITY);
    }

    #[test]
    fn mean_is_correctly_rounded_for_subnormals() {
        let tiny = f64::from_bits(1);
        assert_eq!(partial(&[tiny, tiny, 0.0]).mean(), Some(tiny));
        assert_eq!(partial(&[tiny, 0.0]).mean(), Some(0.0));
        assert_eq!(partial(&[-tiny, -tiny, 0.0]).mean(), Some(-tiny));
        assert_eq!(partial(&[f64::MIN_POSITIVE, -tiny]).sum(), f64::MIN_POSITIVE - tiny);
    }

    #[test]
    fn merging_empty_is_identity() {
        let mut stat = RunningStat::default();
        stat.observe(4.0);
        let before = stat;

        stat.merge(&RunningStat::EMPTY);
        assert_eq!(stat, before);

        let mut empty = RunningStat::EMPTY;
        empty.merge(&before);
        assert_eq!(empty, before);
    }

    #[test]
    fn store_merges_disjoint_and_shared_keys() {
        let mut left = StatsStore::new();
        left.record(b"Oslo", 1.0);
        left.record(b"Lima", 20.0);

        let mut right = StatsStore::new();
        right.record(b"Oslo", -3.0);
        right.record(b"Oslo", 5.0);
        right.record(b"Suva", 27.5);

        left.merge(right);
        assert_eq!(left.len(), 3);
        assert_eq!(left.observations(), 5);

        let oslo = left.get(b"Oslo").unwrap();
        assert_eq!((oslo.min(), oslo.max(), oslo.sum(), oslo.count()), (-3.0, 5.0, 3.0, 3));
    }

    #[test]
    fn freeze_sorts_by_key_bytes() {
        let mut store = StatsStore::new();
        for key in ["b", "Z", "a", "Ä", "aa"] {
            store.record(key.as_bytes(), 1.0);
        }
        let frozen = store.freeze();
        let keys: Vec<_> = frozen.iter().map(|(key, _)| key.to_vec()).collect();

        assert_eq!(
            keys,
            vec![b"Z".to_vec(), b"a".to_vec(), b"aa".to_vec(), b"b".to_vec(), "Ä".as_bytes().to_vec()]
        );
        assert_eq!(frozen.get(b"aa").map(RunningStat::count), Some(1));
        assert!(frozen.get(b"c").is_none());
    }

    fn value() -> impl Strategy<Value = f64> {
        prop_oneof![
            4 => (-999i32..=999).prop_map(|tenths| f64::from(tenths) / 10.0),
            4 => (-99_999i32..=99_999, 1i32..=5).prop_map(|(digits, scale)| f64::from(digits) / 10f64.powi(scale)),
            1 => prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO,
        ]
    }

    fn linear(records: &[(u8, f64)]) -> FrozenStore {
        let mut store = StatsStore::new();
        for (key, value) in records {
            store.record(&[*key], *value);
        }
        store.freeze()
    }

    proptest! {
        #[test]
        fn partitioned_merge_matches_linear_pass(
            records in prop::collection::vec((0u8..6, value()), 0..200),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
            reverse in any::<bool>(),
        ) {
            let mut bounds: Vec<usize> = cuts.iter().map(|idx| idx.index(records.len() + 1)).collect();
            bounds.push(0);
            bounds.push(records.len());
            bounds.sort_unstable();

            let mut partials: Vec<StatsStore> = bounds
                .windows(2)
                .map(|w| {
                    let mut store = StatsStore::new();
                    for (key, value) in &records[w[0]..w[1]] {
                        store.record(&[*key], *value);
                    }
                    store
                })
                .collect();
            if reverse {
                partials.reverse();
            }

            let mut merged = StatsStore::new();
            for partial in partials {
                merged.merge(partial);
            }
            let merged = merged.freeze();
            let expected = linear(&records);

            prop_assert_eq!(merged.len(), expected.len());
            for ((k1, s1), (k2, s2)) in merged.iter().zip(expected.iter()) {
                prop_assert_eq!(k1, k2);
                prop_assert_eq!(s1, s2);
                let mean = s1.mean().unwrap();
                prop_assert_eq!(mean.to_bits(), s2.mean().unwrap().to_bits());
                prop_assert!(s1.min() <= mean && mean <= s1.max());
            }
        }
    }
}
