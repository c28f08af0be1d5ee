//! Clock-bound maps for extrapolation: per-location and global `L`, `U`
//! and `M` tables, and the static analysis that derives them from guards
//! and invariants.
//!
//! A bound map assigns to every clock either [`NO_BOUND`] (the clock is
//! never compared against a constant, its coordinates may be abstracted
//! completely) or the largest constant it is compared to. Updates are
//! monotone: a bound only ever grows. The value `i32::MAX` means "never
//! abstract this clock".

use crate::syncprod::Vloc;
use crate::system::expr::Expr;
use crate::system::stmt::Stmt;
use crate::system::System;
use crate::{ClockId, LocationId};

/// Value of a clock bound.
pub type BoundValue = i32;

/// The absent bound: the clock is never compared.
pub const NO_BOUND: BoundValue = i32::MIN;

/// A map from clocks (numbered from 1) to bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundMap {
    bounds: Vec<BoundValue>,
}

impl BoundMap {
    /// Map with [`NO_BOUND`] for `clock_nb` clocks.
    pub fn new(clock_nb: usize) -> BoundMap {
        BoundMap { bounds: vec![NO_BOUND; clock_nb] }
    }

    /// Number of clocks covered.
    pub fn clock_count(&self) -> usize {
        self.bounds.len()
    }

    /// Bound of clock `x` (clocks are numbered from 1).
    pub fn get(&self, x: ClockId) -> BoundValue {
        self.bounds[x as usize - 1]
    }

    /// Reset every bound to [`NO_BOUND`].
    pub fn clear(&mut self) {
        self.bounds.fill(NO_BOUND);
    }

    /// Monotone update: raise the bound of `x` to at least `bound`.
    ///
    /// Returns whether the map changed.
    pub fn update(&mut self, x: ClockId, bound: BoundValue) -> bool {
        let slot = &mut self.bounds[x as usize - 1];
        if bound <= *slot {
            return false;
        }
        *slot = bound;
        true
    }

    /// Point-wise max with another map. Returns whether the map changed.
    pub fn update_with(&mut self, other: &BoundMap) -> bool {
        debug_assert_eq!(self.bounds.len(), other.bounds.len());
        let mut modified = false;
        for (slot, &b) in self.bounds.iter_mut().zip(other.bounds.iter()) {
            if b > *slot {
                *slot = b;
                modified = true;
            }
        }
        modified
    }

    /// Bounds indexed by clock minus one, as expected by the DBM
    /// extrapolation operations.
    pub fn as_slice(&self) -> &[BoundValue] {
        &self.bounds
    }
}

/// Per-location `L`/`U` maps.
#[derive(Clone, Debug)]
pub struct LocalLuMap {
    clock_nb: usize,
    l: Vec<BoundMap>,
    u: Vec<BoundMap>,
}

impl LocalLuMap {
    /// Empty maps for `loc_nb` locations over `clock_nb` clocks.
    pub fn new(loc_nb: usize, clock_nb: usize) -> LocalLuMap {
        LocalLuMap {
            clock_nb,
            l: vec![BoundMap::new(clock_nb); loc_nb],
            u: vec![BoundMap::new(clock_nb); loc_nb],
        }
    }

    /// Number of locations covered.
    pub fn loc_count(&self) -> usize {
        self.l.len()
    }

    /// Number of clocks covered.
    pub fn clock_count(&self) -> usize {
        self.clock_nb
    }

    /// Lower-bound map of a location.
    pub fn l(&self, loc: LocationId) -> &BoundMap {
        &self.l[loc as usize]
    }

    /// Upper-bound map of a location.
    pub fn u(&self, loc: LocationId) -> &BoundMap {
        &self.u[loc as usize]
    }

    /// Mutable lower-bound map of a location.
    pub fn l_mut(&mut self, loc: LocationId) -> &mut BoundMap {
        &mut self.l[loc as usize]
    }

    /// Mutable upper-bound map of a location.
    pub fn u_mut(&mut self, loc: LocationId) -> &mut BoundMap {
        &mut self.u[loc as usize]
    }

    /// Component-wise max of the `L`/`U` maps over the locations of a
    /// Vloc, written into `l` and `u`.
    pub fn bounds_for_vloc(&self, vloc: &Vloc, l: &mut BoundMap, u: &mut BoundMap) {
        l.clear();
        u.clear();
        for &loc in vloc.iter() {
            l.update_with(&self.l[loc as usize]);
            u.update_with(&self.u[loc as usize]);
        }
    }
}

/// Global `L`/`U` maps: the point-wise max over all locations.
#[derive(Clone, Debug)]
pub struct GlobalLuMap {
    /// Lower-bound map.
    pub l: BoundMap,
    /// Upper-bound map.
    pub u: BoundMap,
}

impl GlobalLuMap {
    /// Derive the global map from a local one.
    pub fn from_local(local: &LocalLuMap) -> GlobalLuMap {
        let mut l = BoundMap::new(local.clock_nb);
        let mut u = BoundMap::new(local.clock_nb);
        for loc in 0..local.loc_count() {
            l.update_with(&local.l[loc]);
            u.update_with(&local.u[loc]);
        }
        GlobalLuMap { l, u }
    }
}

/// Per-location `M` map.
#[derive(Clone, Debug)]
pub struct LocalMMap {
    m: Vec<BoundMap>,
    clock_nb: usize,
}

impl LocalMMap {
    /// Empty map for `loc_nb` locations over `clock_nb` clocks.
    pub fn new(loc_nb: usize, clock_nb: usize) -> LocalMMap {
        LocalMMap { m: vec![BoundMap::new(clock_nb); loc_nb], clock_nb }
    }

    /// `M` map of a location.
    pub fn m(&self, loc: LocationId) -> &BoundMap {
        &self.m[loc as usize]
    }

    /// Component-wise max of the `M` maps over the locations of a Vloc.
    pub fn bounds_for_vloc(&self, vloc: &Vloc, m: &mut BoundMap) {
        m.clear();
        for &loc in vloc.iter() {
            m.update_with(&self.m[loc as usize]);
        }
    }
}

/// Global `M` map.
#[derive(Clone, Debug)]
pub struct GlobalMMap {
    /// The map.
    pub m: BoundMap,
}

impl GlobalMMap {
    /// Derive the global map from a local one.
    pub fn from_local(local: &LocalMMap) -> GlobalMMap {
        let mut m = BoundMap::new(local.clock_nb);
        for map in &local.m {
            m.update_with(map);
        }
        GlobalMMap { m }
    }
}

/// Fill a local `M` map with `max(L, U)` from a local `L`/`U` map.
pub fn fill_local_m_map(m: &mut LocalMMap, lu: &LocalLuMap) {
    debug_assert_eq!(m.m.len(), lu.loc_count());
    for loc in 0..lu.loc_count() {
        m.m[loc].clear();
        m.m[loc].update_with(&lu.l[loc]);
        m.m[loc].update_with(&lu.u[loc]);
    }
}

/// Compute per-location `L`/`U` maps from the guards and invariants of a
/// system.
///
/// Constraints contribute at the location where they are evaluated:
/// invariants at their location, guards at the source location of their
/// edge. Bounds then propagate backward across edges, transferring through
/// clock copies `x := y + c` and stopping at resets to constants. The
/// chaotic iteration is capped; entries still unstable at the cap widen to
/// `i32::MAX`, which disables abstraction for those clocks (sound).
pub fn compute_local_lu(system: &System) -> LocalLuMap {
    let loc_nb = system.location_count();
    let clock_nb = system.clock_count();
    let mut map = LocalLuMap::new(loc_nb, clock_nb);

    // Seed with the constraints evaluated at each location.
    for loc in 0..loc_nb as LocationId {
        collect_expr_bounds(system, system.location(loc).invariant_expr(), loc, &mut map);
        for &e in system.outgoing_edges_all(loc) {
            collect_expr_bounds(system, system.edge(e).guard_expr(), loc, &mut map);
        }
        // Target invariants are evaluated after the jump: they constrain
        // the clocks as seen from the source through the edge resets, which
        // the propagation loop below covers via the edge rule.
    }

    // Backward propagation until fixpoint, capped.
    let cap = loc_nb * clock_nb + 2;
    let mut iterations = 0;
    loop {
        let mut modified = false;
        for e in 0..system.edge_count() as crate::SysEdgeId {
            let edge = system.edge(e);
            let src = edge.src();
            let tgt = edge.tgt();
            let resets = collect_resets(system, edge.stmt());
            for x in 1..=clock_nb as ClockId {
                match resets.iter().find(|r| r.0 == x) {
                    None => {
                        let lb = map.l(tgt).get(x);
                        let ub = map.u(tgt).get(x);
                        if lb != NO_BOUND {
                            modified |= map.l_mut(src).update(x, lb);
                        }
                        if ub != NO_BOUND {
                            modified |= map.u_mut(src).update(x, ub);
                        }
                    }
                    Some(&(_, Some(y), c)) => {
                        // x := y + c at the edge: bounds on x at the target
                        // constrain y at the source, shifted by c.
                        let lb = map.l(tgt).get(x);
                        let ub = map.u(tgt).get(x);
                        if lb != NO_BOUND {
                            modified |= map.l_mut(src).update(y, saturating_shift(lb, c));
                        }
                        if ub != NO_BOUND {
                            modified |= map.u_mut(src).update(y, saturating_shift(ub, c));
                        }
                    }
                    Some(&(_, None, _)) => {
                        // x := c: the reset severs the dependency.
                    }
                }
            }
        }
        if !modified {
            break;
        }
        iterations += 1;
        if iterations > cap {
            // Non-convergence (offset-reset cycle): widen everything that
            // carries a bound to "never abstract".
            for loc in 0..loc_nb as LocationId {
                for x in 1..=clock_nb as ClockId {
                    if map.l(loc).get(x) != NO_BOUND {
                        map.l_mut(loc).update(x, i32::MAX);
                    }
                    if map.u(loc).get(x) != NO_BOUND {
                        map.u_mut(loc).update(x, i32::MAX);
                    }
                }
            }
            break;
        }
    }

    map
}

/// Compute per-location `M` maps (`max(L, U)`).
pub fn compute_local_m(system: &System) -> LocalMMap {
    let lu = compute_local_lu(system);
    let mut m = LocalMMap::new(lu.loc_count(), lu.clock_count());
    fill_local_m_map(&mut m, &lu);
    m
}

fn saturating_shift(bound: BoundValue, c: i32) -> BoundValue {
    if bound == i32::MAX {
        return i32::MAX;
    }
    (bound as i64 - c as i64).clamp(NO_BOUND as i64 + 1, i32::MAX as i64) as BoundValue
}

/// Collect the clock comparisons of an expression into the maps of `loc`.
///
/// Bound expressions need not be constant: their maximal value over the
/// declared integer-variable ranges is used, which over-approximates the
/// comparison soundly.
fn collect_expr_bounds(system: &System, expr: &Expr, loc: LocationId, map: &mut LocalLuMap) {
    expr.for_each_clock_atom(&mut |x, y, cmp, bound| {
        let (lo, hi) = system.expr_range(bound);
        let clamp = |v: i64| v.clamp(NO_BOUND as i64 + 1, i32::MAX as i64) as i32;
        let hi = clamp(hi);
        let neg_lo = clamp(-clamp(lo) as i64);
        use crate::system::expr::ClockCmpOp::*;
        match cmp {
            Lt | Le => {
                // x - y ≺ c: upper bound on x at c, lower bound on y at -c.
                if x != 0 {
                    map.u_mut(loc).update(x, hi);
                }
                if y != 0 {
                    map.l_mut(loc).update(y, neg_lo);
                }
            }
            Gt | Ge => {
                // x - y ≻ c: lower bound on x at c, upper bound on y at -c.
                if x != 0 {
                    map.l_mut(loc).update(x, hi);
                }
                if y != 0 {
                    map.u_mut(loc).update(y, neg_lo);
                }
            }
            Eq => {
                if x != 0 {
                    map.l_mut(loc).update(x, hi);
                    map.u_mut(loc).update(x, hi);
                }
                if y != 0 {
                    map.l_mut(loc).update(y, neg_lo);
                    map.u_mut(loc).update(y, neg_lo);
                }
            }
        }
    });
}

/// Clock resets of a statement as `(x, source clock, offset)` triples;
/// `None` source means a reset to a constant.
fn collect_resets(system: &System, stmt: &Stmt) -> Vec<(ClockId, Option<ClockId>, i32)> {
    let mut resets = Vec::new();
    stmt.for_each_clock_reset(&mut |x, y, value| {
        let (lo, _) = system.expr_range(value);
        let c = lo.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        resets.push((x, y, c));
    });
    resets
}
