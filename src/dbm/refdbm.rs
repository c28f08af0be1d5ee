//! DBMs over reference clocks: the partial-order generalisation of the
//! plain algebra.
//!
//! The first `refcount` indices of the matrix are *reference clocks*, one
//! per process cluster; the remaining indices are *offset clocks*, each
//! associated with a reference clock through [`RefClocks`]. A zone is
//! *positive* when every offset clock is at or above its reference clock,
//! and *synchronised* when all reference clocks agree.
//!
//! Operations are free functions over a plain [`Dbm`] of dimension
//! [`RefClocks::size`], mirroring the layout-sharing of the plain algebra:
//! consistency and tightness mean exactly the same thing and are preserved
//! the same way.

use fixedbitset::FixedBitSet;

use crate::clockbounds::{BoundValue, NO_BOUND};
use crate::dbm::{Bound, Dbm, ZoneStatus};
use crate::{ClockCmp, ClockConstraint, ClockId, ClockReset, REFERENCE_CLOCK};

/// Spread value meaning "no spread bound".
pub const UNBOUNDED_SPREAD: i32 = i32::MAX;

/// Reference-clock layout: which reference clock each offset clock counts
/// from, and how system clocks translate into matrix indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefClocks {
    refcount: usize,
    /// For every matrix index, the index of its reference clock (reference
    /// clocks map to themselves).
    refmap: Vec<usize>,
}

impl RefClocks {
    /// Single reference clock shared by `nclocks` offset clocks: the
    /// synchronous layout, equivalent to a plain DBM.
    pub fn single(nclocks: usize) -> RefClocks {
        RefClocks { refcount: 1, refmap: vec![0; 1 + nclocks] }
    }

    /// One reference clock per process; `owner[x]` is the process of
    /// system clock `x + 1`.
    pub fn per_process(owner: &[usize], nprocs: usize) -> RefClocks {
        let mut refmap = Vec::with_capacity(nprocs + owner.len());
        for t in 0..nprocs {
            refmap.push(t);
        }
        for &p in owner {
            debug_assert!(p < nprocs);
            refmap.push(p);
        }
        RefClocks { refcount: nprocs, refmap }
    }

    /// Number of reference clocks.
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// Matrix dimension: reference clocks plus offset clocks.
    pub fn size(&self) -> usize {
        self.refmap.len()
    }

    /// Number of offset clocks.
    pub fn offset_count(&self) -> usize {
        self.size() - self.refcount
    }

    /// Reference clock of a matrix index.
    pub fn refclock_of(&self, i: usize) -> usize {
        self.refmap[i]
    }

    /// Matrix index of a system clock (system clocks are numbered from 1).
    pub fn translate_system_clock(&self, x: ClockId) -> usize {
        debug_assert!(x != REFERENCE_CLOCK);
        self.refcount + (x as usize - 1)
    }

    /// Reference clock of a system clock.
    pub fn refclock_of_system_clock(&self, x: ClockId) -> usize {
        self.refmap[self.translate_system_clock(x)]
    }

    /// Translate a system clock constraint into matrix indices, mapping
    /// the reference-clock side to the other side's reference clock.
    pub fn translate_constraint(&self, c: &ClockConstraint) -> (usize, usize, ClockCmp, i32) {
        debug_assert!(c.x != REFERENCE_CLOCK || c.y != REFERENCE_CLOCK);
        let x = if c.x == REFERENCE_CLOCK {
            self.refclock_of_system_clock(c.y)
        } else {
            self.translate_system_clock(c.x)
        };
        let y = if c.y == REFERENCE_CLOCK {
            self.refclock_of_system_clock(c.x)
        } else {
            self.translate_system_clock(c.y)
        };
        (x, y, c.cmp, c.value)
    }
}

/// The universal zone.
pub fn universal(r: &RefClocks) -> Dbm {
    Dbm::universal(r.size())
}

/// The universal zone restricted to non-negative offset clocks
/// (`ref(x) - x ≤ 0` for every offset clock `x`).
pub fn universal_positive(r: &RefClocks) -> Dbm {
    let mut rdbm = Dbm::universal(r.size());
    for i in r.refcount..r.size() {
        rdbm[(r.refmap[i], i)] = Bound::LE_ZERO;
    }
    debug_assert!(rdbm.is_tight());
    rdbm
}

/// The zone where all clocks equal zero.
pub fn zero(r: &RefClocks) -> Dbm {
    Dbm::zero(r.size())
}

/// Whether every offset clock is at or above its reference clock.
pub fn is_positive(rdbm: &Dbm, r: &RefClocks) -> bool {
    (r.refcount..r.size()).all(|i| rdbm[(r.refmap[i], i)] <= Bound::LE_ZERO)
}

/// Whether the zone is the positive universal zone.
pub fn is_universal_positive(rdbm: &Dbm, r: &RefClocks) -> bool {
    let dim = r.size();
    for i in 0..dim {
        for j in 0..dim {
            let expected = if i == j || i == r.refmap[j] {
                Bound::LE_ZERO
            } else {
                Bound::LT_INFINITY
            };
            if rdbm[(i, j)] != expected {
                return false;
            }
        }
    }
    true
}

/// Whether the zone is closed under asynchronous time elapse: every
/// difference towards a reference clock is unbounded.
pub fn is_open_up(rdbm: &Dbm, r: &RefClocks) -> bool {
    for x in 0..r.size() {
        for t in 0..r.refcount {
            if x != t && rdbm[(x, t)] != Bound::LT_INFINITY {
                return false;
            }
        }
    }
    true
}

/// Whether all pairs of reference clocks are equal in the zone.
pub fn is_synchronized(rdbm: &Dbm, r: &RefClocks) -> bool {
    let mut all = FixedBitSet::with_capacity(r.refcount);
    all.insert_range(..);
    is_synchronized_on(rdbm, r, &all)
}

/// Whether the reference clocks in `sync_ref_clocks` are pairwise equal.
pub fn is_synchronized_on(rdbm: &Dbm, r: &RefClocks, sync_ref_clocks: &FixedBitSet) -> bool {
    debug_assert_eq!(sync_ref_clocks.len(), r.refcount);
    let mut prev: Option<usize> = None;
    for t in sync_ref_clocks.ones() {
        if let Some(p) = prev {
            if rdbm[(p, t)] != Bound::LE_ZERO || rdbm[(t, p)] != Bound::LE_ZERO {
                return false;
            }
        }
        prev = Some(t);
    }
    true
}

/// Whether the zone contains at least one synchronised valuation: no
/// negative weight between two reference clocks.
pub fn is_synchronizable(rdbm: &Dbm, r: &RefClocks) -> bool {
    for t1 in 0..r.refcount {
        for t2 in 0..r.refcount {
            if t1 != t2 && rdbm[(t1, t2)] < Bound::LE_ZERO {
                return false;
            }
        }
    }
    true
}

/// Intersect with a translated system clock constraint.
pub fn constrain(rdbm: &mut Dbm, r: &RefClocks, c: &ClockConstraint) -> ZoneStatus {
    let (x, y, cmp, value) = r.translate_constraint(c);
    rdbm.constrain(x, y, cmp, value)
}

/// Intersect with every constraint of a container.
pub fn constrain_all<'a>(
    rdbm: &mut Dbm,
    r: &RefClocks,
    constraints: impl IntoIterator<Item = &'a ClockConstraint>,
) -> ZoneStatus {
    for c in constraints {
        if constrain(rdbm, r, c).is_empty() {
            return ZoneStatus::Empty;
        }
    }
    ZoneStatus::NonEmpty
}

/// Synchronise all reference clocks (spread `0`).
pub fn synchronize(rdbm: &mut Dbm, r: &RefClocks) -> ZoneStatus {
    bound_spread(rdbm, r, 0)
}

/// Synchronise the given subset of reference clocks.
pub fn synchronize_on(rdbm: &mut Dbm, r: &RefClocks, ref_clocks: &FixedBitSet) -> ZoneStatus {
    bound_spread_on(rdbm, r, 0, ref_clocks)
}

/// Bound the spread between all reference clocks by `spread`.
pub fn bound_spread(rdbm: &mut Dbm, r: &RefClocks, spread: i32) -> ZoneStatus {
    let mut all = FixedBitSet::with_capacity(r.refcount);
    all.insert_range(..);
    bound_spread_on(rdbm, r, spread, &all)
}

/// Bound the spread between the reference clocks of `ref_clocks` by
/// `spread`, then retighten using only those reference clocks as
/// witnesses (sufficient since only their rows and columns were touched).
pub fn bound_spread_on(
    rdbm: &mut Dbm,
    r: &RefClocks,
    spread: i32,
    ref_clocks: &FixedBitSet,
) -> ZoneStatus {
    debug_assert_eq!(ref_clocks.len(), r.refcount);
    if spread == UNBOUNDED_SPREAD {
        return ZoneStatus::NonEmpty;
    }
    let le_spread = Bound::new(ClockCmp::Le, spread);
    for t1 in ref_clocks.ones() {
        for t2 in ref_clocks.ones() {
            if rdbm[(t1, t2)] > le_spread {
                rdbm[(t1, t2)] = le_spread;
            }
        }
        rdbm[(t1, t1)] = Bound::LE_ZERO;
    }

    let dim = r.size();
    for t in ref_clocks.ones() {
        for x in 0..dim {
            if x == t || rdbm[(x, t)].is_infinite() {
                continue;
            }
            for y in 0..dim {
                if y == t || rdbm[(t, y)].is_infinite() {
                    continue;
                }
                let via = rdbm[(x, t)].sum(rdbm[(t, y)]);
                if via < rdbm[(x, y)] {
                    rdbm[(x, y)] = via;
                }
            }
            if rdbm[(x, x)] < Bound::LE_ZERO {
                rdbm[(0, 0)] = Bound::LT_ZERO;
                return ZoneStatus::Empty;
            }
        }
    }
    debug_assert!(rdbm.is_consistent() && rdbm.is_tight());
    ZoneStatus::NonEmpty
}

/// Replace row and column of matrix index `x` by those of its reference
/// clock (the local-time reset `x := ref(x)`).
pub fn reset_to_reference_clock(rdbm: &mut Dbm, r: &RefClocks, x: usize) {
    let tx = r.refmap[x];
    if tx == x {
        return;
    }
    for z in 0..r.size() {
        rdbm[(x, z)] = rdbm[(tx, z)];
        rdbm[(z, x)] = rdbm[(z, tx)];
    }
    rdbm[(x, x)] = Bound::LE_ZERO;
    debug_assert!(rdbm.is_consistent() && rdbm.is_tight());
}

/// Apply a system clock reset, which must be a reset to zero
/// (`x := ref(x)` in local time).
pub fn reset(rdbm: &mut Dbm, r: &RefClocks, reset: &ClockReset) {
    debug_assert!(reset.y == REFERENCE_CLOCK && reset.value == 0);
    let x = r.translate_system_clock(reset.x);
    reset_to_reference_clock(rdbm, r, x);
}

/// Let every reference clock advance independently: `x - t < ∞` for every
/// clock `x` and reference clock `t`.
pub fn asynchronous_open_up(rdbm: &mut Dbm, r: &RefClocks) {
    for t in 0..r.refcount {
        for x in 0..r.size() {
            rdbm[(x, t)] = Bound::LT_INFINITY;
        }
        rdbm[(t, t)] = Bound::LE_ZERO;
    }
    debug_assert!(rdbm.is_consistent() && rdbm.is_tight());
}

/// Asynchronous open-up restricted to the reference clocks allowed to
/// delay.
pub fn asynchronous_open_up_allowed(rdbm: &mut Dbm, r: &RefClocks, delay_allowed: &FixedBitSet) {
    debug_assert_eq!(delay_allowed.len(), r.refcount);
    for t in delay_allowed.ones() {
        for x in 0..r.size() {
            rdbm[(x, t)] = Bound::LT_INFINITY;
        }
        rdbm[(t, t)] = Bound::LE_ZERO;
    }
    debug_assert!(rdbm.is_consistent() && rdbm.is_tight());
}

fn map_at(r: &RefClocks, m: &[BoundValue], i: usize) -> i64 {
    if i < r.refcount {
        i64::MAX // reference clocks are never abstracted
    } else {
        m[i - r.refcount] as i64
    }
}

/// `aLU*` inclusion: whether `self ⊆ aLU*(other)` over reference-clock
/// zones, with `l`/`u` indexed by offset clock.
pub fn is_alu_star_le(d1: &Dbm, d2: &Dbm, r: &RefClocks, l: &[BoundValue], u: &[BoundValue]) -> bool {
    let dim = r.size();
    for y in 0..dim {
        let ly = map_at(r, l, y);
        if ly == NO_BOUND as i64 {
            continue;
        }
        for x in 0..dim {
            let ux = map_at(r, u, x);
            if ux == NO_BOUND as i64 {
                continue;
            }
            // First condition: d2[y,x] < d1[y,x].
            if d2[(y, x)] >= d1[(y, x)] {
                continue;
            }
            // Second condition, for offset clocks only:
            // (≤, U(x)) + d1[ref(x), x] ≥ (≤, 0).
            if x >= r.refcount && ux < i64::MAX {
                let le_ux = Bound::new(ClockCmp::Le, ux as i32);
                if le_ux.sum(d1[(r.refmap[x], x)]) < Bound::LE_ZERO {
                    continue;
                }
            }
            // Third condition, for offset clocks only:
            // (<, -L(y)) + d2[y,x] < d1[ref(y), x].
            if y >= r.refcount && ly < i64::MAX {
                let lt_minus_ly = Bound::new(ClockCmp::Lt, -(ly as i32));
                if lt_minus_ly.sum(d2[(y, x)]) >= d1[(r.refmap[y], x)] {
                    continue;
                }
            }
            return false;
        }
    }
    true
}

/// `aM*` inclusion (`aLU*` with `L = U = M`).
pub fn is_am_star_le(d1: &Dbm, d2: &Dbm, r: &RefClocks, m: &[BoundValue]) -> bool {
    is_alu_star_le(d1, d2, r, m, m)
}

/// `aLU*` inclusion specialised to time-elapsed zones: differences towards
/// reference clocks are unbounded there, so only offset-clock columns need
/// checking.
pub fn is_time_elapse_alu_star_le(
    d1: &Dbm,
    d2: &Dbm,
    r: &RefClocks,
    l: &[BoundValue],
    u: &[BoundValue],
) -> bool {
    let dim = r.size();
    for y in 0..dim {
        let ly = map_at(r, l, y);
        if ly == NO_BOUND as i64 {
            continue;
        }
        for x in r.refcount..dim {
            let ux = u[x - r.refcount] as i64;
            if ux == NO_BOUND as i64 {
                continue;
            }
            if d2[(y, x)] >= d1[(y, x)] {
                continue;
            }
            if ux < i64::MAX {
                let le_ux = Bound::new(ClockCmp::Le, ux as i32);
                if le_ux.sum(d1[(r.refmap[x], x)]) < Bound::LE_ZERO {
                    continue;
                }
            }
            if y >= r.refcount && ly < i64::MAX {
                let lt_minus_ly = Bound::new(ClockCmp::Lt, -(ly as i32));
                if lt_minus_ly.sum(d2[(y, x)]) >= d1[(r.refmap[y], x)] {
                    continue;
                }
            }
            return false;
        }
    }
    true
}

/// `aM*` inclusion on time-elapsed zones.
pub fn is_time_elapse_am_star_le(d1: &Dbm, d2: &Dbm, r: &RefClocks, m: &[BoundValue]) -> bool {
    is_time_elapse_alu_star_le(d1, d2, r, m, m)
}

/// Sync-aware `aLU` inclusion, comparing zones through their local-time
/// elapse: each offset clock is represented by the minimum difference bound
/// over all reference clocks.
pub fn is_sync_alu_le(d1: &Dbm, d2: &Dbm, r: &RefClocks, l: &[BoundValue], u: &[BoundValue]) -> bool {
    let dim = r.size();
    let refcount = r.refcount;

    // Local-time elapse replaces every bound towards a reference clock by
    // < ∞; reading columns below refcount as infinite simulates it.
    let lte = |d: &Dbm, i: usize, j: usize| -> Bound {
        if j < refcount {
            Bound::LT_INFINITY
        } else {
            d[(i, j)]
        }
    };

    for x in refcount..dim {
        let ux = u[x - refcount];
        if ux == NO_BOUND {
            continue;
        }

        let mut min_tx1 = lte(d1, 0, x);
        for t in 1..refcount {
            min_tx1 = min_tx1.min(lte(d1, t, x));
        }

        // First condition.
        if ux != i32::MAX && min_tx1 < Bound::new(ClockCmp::Le, -ux) {
            continue;
        }

        let mut min_tx2 = lte(d2, 0, x);
        for t in 1..refcount {
            min_tx2 = min_tx2.min(lte(d2, t, x));
        }

        // First case: the representative column itself shrank.
        if min_tx2 < min_tx1 {
            return false;
        }

        for y in refcount..dim {
            if x == y {
                continue;
            }
            let ly = l[y - refcount];
            if ly == NO_BOUND {
                continue;
            }
            if lte(d2, y, x) >= lte(d1, y, x) {
                continue;
            }
            let third = if ly == i32::MAX {
                true
            } else {
                lte(d2, y, x).sum(Bound::new(ClockCmp::Lt, -ly)) < min_tx1
            };
            if third {
                return false;
            }
        }
    }
    true
}

/// Sync-aware `aM` inclusion.
pub fn is_sync_am_le(d1: &Dbm, d2: &Dbm, r: &RefClocks, m: &[BoundValue]) -> bool {
    is_sync_alu_le(d1, d2, r, m, m)
}

/// Project a synchronised reference-clock zone to a plain DBM over the
/// system clocks.
///
/// # Panics
/// Panics (debug) if the zone is not synchronised.
pub fn to_dbm(rdbm: &Dbm, r: &RefClocks) -> Dbm {
    debug_assert!(is_synchronized(rdbm, r));
    let dim = r.offset_count() + 1;
    let mut dbm = Dbm::universal(dim);
    for i in 1..dim {
        let ref_i = r.refclock_of_system_clock(i as ClockId);
        let off_i = r.translate_system_clock(i as ClockId);
        dbm[(0, i)] = rdbm[(ref_i, off_i)];
        dbm[(i, 0)] = rdbm[(off_i, ref_i)];
        for j in (i + 1)..dim {
            let off_j = r.translate_system_clock(j as ClockId);
            dbm[(i, j)] = rdbm[(off_i, off_j)];
            dbm[(j, i)] = rdbm[(off_j, off_i)];
        }
        dbm[(i, i)] = rdbm[(off_i, off_i)];
    }
    dbm[(0, 0)] = Bound::LE_ZERO;
    debug_assert!(dbm.is_consistent() && dbm.is_tight());
    dbm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClockCmp::Le;

    fn two_proc_layout() -> RefClocks {
        // Two processes, clock 1 owned by process 0 and clock 2 by process 1.
        RefClocks::per_process(&[0, 1], 2)
    }

    #[test]
    fn layout_translation() {
        let r = two_proc_layout();
        assert_eq!(r.refcount(), 2);
        assert_eq!(r.size(), 4);
        assert_eq!(r.translate_system_clock(1), 2);
        assert_eq!(r.translate_system_clock(2), 3);
        assert_eq!(r.refclock_of_system_clock(1), 0);
        assert_eq!(r.refclock_of_system_clock(2), 1);
    }

    #[test]
    fn universal_positive_bounds_offsets_by_their_reference() {
        let r = two_proc_layout();
        let rdbm = universal_positive(&r);
        assert!(is_positive(&rdbm, &r));
        assert!(is_universal_positive(&rdbm, &r));
        assert_eq!(rdbm[(0, 2)], Bound::LE_ZERO);
        assert_eq!(rdbm[(1, 3)], Bound::LE_ZERO);
        assert_eq!(rdbm[(0, 3)], Bound::LT_INFINITY);
    }

    #[test]
    fn zero_is_synchronized() {
        let r = two_proc_layout();
        let rdbm = zero(&r);
        assert!(is_synchronized(&rdbm, &r));
        assert!(is_synchronizable(&rdbm, &r));
    }

    #[test]
    fn synchronize_after_asynchronous_open_up() {
        let r = two_proc_layout();
        let mut rdbm = zero(&r);
        asynchronous_open_up(&mut rdbm, &r);
        assert!(is_open_up(&rdbm, &r));
        assert!(!is_synchronized(&rdbm, &r));
        assert_eq!(synchronize(&mut rdbm, &r), ZoneStatus::NonEmpty);
        assert!(is_synchronized(&rdbm, &r));
        assert!(rdbm.is_tight());
    }

    #[test]
    fn bound_spread_limits_reference_distance() {
        let r = two_proc_layout();
        let mut rdbm = zero(&r);
        asynchronous_open_up(&mut rdbm, &r);
        assert_eq!(bound_spread(&mut rdbm, &r, 3), ZoneStatus::NonEmpty);
        assert!(rdbm[(0, 1)] <= Bound::new(Le, 3));
        assert!(rdbm[(1, 0)] <= Bound::new(Le, 3));
        assert!(rdbm.is_tight());
    }

    #[test]
    fn reset_to_reference_clock_zeroes_the_offset() {
        let r = two_proc_layout();
        let mut rdbm = universal_positive(&r);
        constrain(&mut rdbm, &r, &ClockConstraint::upper(1, Le, 10));
        reset(&mut rdbm, &r, &ClockReset::to_value(1, 0));
        let x = r.translate_system_clock(1);
        assert_eq!(rdbm[(x, r.refclock_of(x))], Bound::LE_ZERO);
        assert_eq!(rdbm[(r.refclock_of(x), x)], Bound::LE_ZERO);
    }

    #[test]
    fn to_dbm_round_trip_when_synchronized() {
        let r = two_proc_layout();
        let mut rdbm = zero(&r);
        // x1 <= 5, x2 - x1 <= 2 in system clock terms.
        asynchronous_open_up(&mut rdbm, &r);
        assert_eq!(synchronize(&mut rdbm, &r), ZoneStatus::NonEmpty);
        assert_eq!(constrain(&mut rdbm, &r, &ClockConstraint::upper(1, Le, 5)), ZoneStatus::NonEmpty);
        assert_eq!(
            constrain(&mut rdbm, &r, &ClockConstraint::new(2, 1, Le, 2)),
            ZoneStatus::NonEmpty
        );

        let dbm = to_dbm(&rdbm, &r);
        assert_eq!(dbm.dim(), 3);
        assert!(dbm.is_tight());

        // The same constraints applied directly to a plain DBM agree.
        let mut direct = Dbm::zero(3);
        direct.open_up();
        direct.constrain(1, 0, Le, 5);
        direct.constrain(2, 1, Le, 2);
        assert!(dbm.is_equal(&direct));
    }

    #[test]
    fn sync_alu_le_is_reflexive() {
        let r = two_proc_layout();
        let mut rdbm = universal_positive(&r);
        constrain(&mut rdbm, &r, &ClockConstraint::upper(1, Le, 4));
        let l = [2, 2];
        let u = [2, 2];
        assert!(is_sync_alu_le(&rdbm, &rdbm, &r, &l, &u));
        assert!(is_alu_star_le(&rdbm, &rdbm, &r, &l, &u));
    }

    #[test]
    fn alu_star_le_detects_strictly_smaller_zone() {
        let r = two_proc_layout();
        let big = universal_positive(&r);
        let mut small = universal_positive(&r);
        constrain(&mut small, &r, &ClockConstraint::upper(1, Le, 1));
        let l = [10, 10];
        let u = [10, 10];
        assert!(is_alu_star_le(&small, &big, &r, &l, &u));
        assert!(!is_alu_star_le(&big, &small, &r, &l, &u));
    }
}
