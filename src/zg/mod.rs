//! The zone-graph transition system: synchronised product × integer
//! variables × zones, with extrapolation.
//!
//! States are triples `(vloc, intvars, zone)`. Tuples of locations and
//! integer valuations are interned ([`crate::sharing`]), so state equality
//! compares two pointers and one matrix.

use fixedbitset::FixedBitSet;
use tracing::trace;

use crate::clockbounds::{
    self, BoundMap, GlobalLuMap, GlobalMMap, LocalLuMap, LocalMMap,
};
use crate::dbm::Dbm;
use crate::graph::subsumption::SubsumptionGraph;
use crate::sharing::{Shared, SharingTable};
use crate::syncprod::{Synchronizer, Vedge, Vloc};
use crate::system::System;
use crate::ta::{self, StepContainers};
use crate::ts::{NodeStatus, Ts};
use crate::vm::Vm;
use crate::ConfigError;

/// Whether stored zones are time-elapsed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Semantics {
    /// Zones are closed under time elapse: delay is applied after each
    /// discrete step (and to the initial zone).
    Elapsed,
    /// Zones are not elapsed; delay is applied at the start of each step.
    NonElapsed,
}

/// Extrapolation applied to every computed zone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Extrapolation {
    /// No abstraction: termination is not guaranteed.
    None,
    /// `ExtraM` with global bounds.
    MGlobal,
    /// `ExtraM` with per-location bounds.
    MLocal,
    /// `ExtraM+` with global bounds.
    MPlusGlobal,
    /// `ExtraM+` with per-location bounds.
    MPlusLocal,
    /// `ExtraLU` with global bounds.
    LuGlobal,
    /// `ExtraLU` with per-location bounds.
    LuLocal,
    /// `ExtraLU+` with global bounds.
    LuPlusGlobal,
    /// `ExtraLU+` with per-location bounds.
    LuPlusLocal,
}

/// A symbolic state of the zone graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct State {
    /// Tuple of locations (shared).
    pub vloc: Shared<Vloc>,
    /// Integer-variable valuation (shared).
    pub intvars: Shared<Vec<i64>>,
    /// Clock zone.
    pub zone: Dbm,
}

impl State {
    /// Hash of the discrete part only (vloc and intvars, not the zone).
    ///
    /// Nodes that may cover each other must collide under this hash: the
    /// subsumption graph buckets nodes with it so that covering zones of
    /// the same discrete state meet in one bucket.
    pub fn shallow_hash(&self) -> u64 {
        self.vloc
            .content_hash()
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(self.intvars.content_hash())
    }

    /// Whether the zone is non-empty.
    pub fn is_positive(&self) -> bool {
        !self.zone.is_empty()
    }
}

/// A transition of the zone graph: the vedge taken.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Tuple of edges (shared); empty for initial transitions.
    pub vedge: Shared<Vedge>,
}

enum BoundsTables {
    None,
    LocalLu(LocalLuMap),
    GlobalLu(GlobalLuMap),
    LocalM(LocalMMap),
    GlobalM(GlobalMMap),
}

/// The zone-graph transition system over a built [`System`].
pub struct ZoneGraph<'a> {
    system: &'a System,
    semantics: Semantics,
    extrapolation: Extrapolation,
    dim: usize,
    vm: Vm,
    containers: StepContainers,
    vloc_table: SharingTable<Vloc>,
    ival_table: SharingTable<Vec<i64>>,
    vedge_table: SharingTable<Vedge>,
    bounds: BoundsTables,
    l_scratch: BoundMap,
    u_scratch: BoundMap,
    vedge_scratch: Vec<Vedge>,
}

impl<'a> ZoneGraph<'a> {
    /// Transition system over `system` with the chosen semantics and
    /// extrapolation. Computes the clock-bound tables the extrapolation
    /// needs.
    pub fn new(
        system: &'a System,
        semantics: Semantics,
        extrapolation: Extrapolation,
    ) -> Result<ZoneGraph<'a>, ConfigError> {
        if system.process_count() == 0 {
            return Err(ConfigError::Dimension { expected: 1, got: 0 });
        }
        let nclocks = system.clock_count();
        let bounds = match extrapolation {
            Extrapolation::None => BoundsTables::None,
            Extrapolation::MLocal | Extrapolation::MPlusLocal => {
                BoundsTables::LocalM(clockbounds::compute_local_m(system))
            }
            Extrapolation::MGlobal | Extrapolation::MPlusGlobal => {
                BoundsTables::GlobalM(GlobalMMap::from_local(&clockbounds::compute_local_m(
                    system,
                )))
            }
            Extrapolation::LuLocal | Extrapolation::LuPlusLocal => {
                BoundsTables::LocalLu(clockbounds::compute_local_lu(system))
            }
            Extrapolation::LuGlobal | Extrapolation::LuPlusGlobal => {
                BoundsTables::GlobalLu(GlobalLuMap::from_local(&clockbounds::compute_local_lu(
                    system,
                )))
            }
        };
        Ok(ZoneGraph {
            system,
            semantics,
            extrapolation,
            dim: nclocks + 1,
            vm: Vm::new(nclocks),
            containers: StepContainers::new(),
            vloc_table: SharingTable::new(),
            ival_table: SharingTable::new(),
            vedge_table: SharingTable::new(),
            bounds,
            l_scratch: BoundMap::new(nclocks),
            u_scratch: BoundMap::new(nclocks),
            vedge_scratch: Vec::new(),
        })
    }

    /// The underlying system.
    pub fn system(&self) -> &'a System {
        self.system
    }

    /// The chosen semantics.
    pub fn semantics(&self) -> Semantics {
        self.semantics
    }

    /// The chosen extrapolation.
    pub fn extrapolation(&self) -> Extrapolation {
        self.extrapolation
    }

    /// Zone dimension (number of clocks plus the reference clock).
    pub fn dim(&self) -> usize {
        self.dim
    }

    fn extrapolate(&mut self, zone: &mut Dbm, vloc: &Vloc) {
        let extrapolation = self.extrapolation;
        let ZoneGraph { bounds, l_scratch, u_scratch, .. } = self;
        match bounds {
            BoundsTables::None => {}
            BoundsTables::GlobalM(g) => {
                if matches!(extrapolation, Extrapolation::MPlusGlobal) {
                    zone.extra_m_plus(g.m.as_slice());
                } else {
                    zone.extra_m(g.m.as_slice());
                }
            }
            BoundsTables::LocalM(local) => {
                local.bounds_for_vloc(vloc, l_scratch);
                if matches!(extrapolation, Extrapolation::MPlusLocal) {
                    zone.extra_m_plus(l_scratch.as_slice());
                } else {
                    zone.extra_m(l_scratch.as_slice());
                }
            }
            BoundsTables::GlobalLu(g) => {
                if matches!(extrapolation, Extrapolation::LuPlusGlobal) {
                    zone.extra_lu_plus(g.l.as_slice(), g.u.as_slice());
                } else {
                    zone.extra_lu(g.l.as_slice(), g.u.as_slice());
                }
            }
            BoundsTables::LocalLu(local) => {
                local.bounds_for_vloc(vloc, l_scratch, u_scratch);
                if matches!(extrapolation, Extrapolation::LuPlusLocal) {
                    zone.extra_lu_plus(l_scratch.as_slice(), u_scratch.as_slice());
                } else {
                    zone.extra_lu(l_scratch.as_slice(), u_scratch.as_slice());
                }
            }
        }
    }

    /// The covering order induced by the chosen extrapolation, packaged
    /// for use by a subsumption graph.
    pub fn covering_order(&self) -> CoveringOrder {
        let bounds = match &self.bounds {
            BoundsTables::None => OrderBounds::Exact,
            BoundsTables::GlobalM(g) => OrderBounds::GlobalM(g.clone()),
            BoundsTables::LocalM(m) => OrderBounds::LocalM(m.clone()),
            BoundsTables::GlobalLu(g) => OrderBounds::GlobalLu(g.clone()),
            BoundsTables::LocalLu(l) => OrderBounds::LocalLu(l.clone()),
        };
        CoveringOrder { bounds, nclocks: self.dim - 1 }
    }
}

enum OrderBounds {
    Exact,
    LocalLu(LocalLuMap),
    GlobalLu(GlobalLuMap),
    LocalM(LocalMMap),
    GlobalM(GlobalMMap),
}

/// The node-covering preorder of a zone graph: discrete parts equal,
/// zones included modulo the abstraction of the chosen extrapolation.
///
/// With `aLU`/`aM` bounds this is a well-quasi-order on the reachable
/// states, which guarantees termination of covering reachability.
pub struct CoveringOrder {
    bounds: OrderBounds,
    nclocks: usize,
}

impl CoveringOrder {
    /// Whether `s1` is covered by `s2`.
    pub fn le(&self, s1: &State, s2: &State) -> bool {
        if s1.vloc != s2.vloc || s1.intvars != s2.intvars {
            return false;
        }
        match &self.bounds {
            OrderBounds::Exact => s1.zone.is_le(&s2.zone),
            OrderBounds::GlobalM(g) => s1.zone.is_am_le(&s2.zone, g.m.as_slice()),
            OrderBounds::LocalM(local) => {
                let mut m = BoundMap::new(self.nclocks);
                local.bounds_for_vloc(&s1.vloc, &mut m);
                s1.zone.is_am_le(&s2.zone, m.as_slice())
            }
            OrderBounds::GlobalLu(g) => {
                s1.zone.is_alu_le(&s2.zone, g.l.as_slice(), g.u.as_slice())
            }
            OrderBounds::LocalLu(local) => {
                let mut l = BoundMap::new(self.nclocks);
                let mut u = BoundMap::new(self.nclocks);
                local.bounds_for_vloc(&s1.vloc, &mut l, &mut u);
                s1.zone.is_alu_le(&s2.zone, l.as_slice(), u.as_slice())
            }
        }
    }
}

impl SubsumptionGraph<State, Transition> {
    /// A subsumption graph whose node hash and covering predicate come
    /// from a zone graph: nodes are bucketed by their discrete part and
    /// covered according to the extrapolation's abstract inclusion.
    pub fn for_zone_graph(zg: &ZoneGraph<'_>) -> SubsumptionGraph<State, Transition> {
        Self::for_zone_graph_with_table_size(zg, 65_536)
    }

    /// As [`SubsumptionGraph::for_zone_graph`] with an explicit hash-table
    /// size.
    pub fn for_zone_graph_with_table_size(
        zg: &ZoneGraph<'_>,
        table_size: usize,
    ) -> SubsumptionGraph<State, Transition> {
        let order = zg.covering_order();
        SubsumptionGraph::new(
            table_size,
            Box::new(|s: &State| s.shallow_hash()),
            Box::new(move |s1: &State, s2: &State| order.le(s1, s2)),
        )
    }
}

/// Apply the zone part of one discrete step, in evaluation order: source
/// invariant, source delay (non-elapsed semantics), guard, resets, target
/// invariant, target delay (elapsed semantics).
///
/// Returns the emptiness status of the first operation that empties the
/// zone, [`NodeStatus::Ok`] otherwise.
fn apply_zone_step(
    zone: &mut Dbm,
    semantics: Semantics,
    src_delay: bool,
    tgt_delay: bool,
    containers: &StepContainers,
) -> NodeStatus {
    if zone.constrain_all(&containers.src_invariant).is_empty() {
        return NodeStatus::ClocksSrcInvariantViolated;
    }
    if src_delay && semantics == Semantics::NonElapsed {
        zone.open_up();
        if zone.constrain_all(&containers.src_invariant).is_empty() {
            return NodeStatus::ClocksSrcInvariantViolated;
        }
    }
    if zone.constrain_all(&containers.guard).is_empty() {
        return NodeStatus::ClocksGuardViolated;
    }
    zone.reset_all(&containers.resets);
    if zone.constrain_all(&containers.tgt_invariant).is_empty() {
        return NodeStatus::ClocksTgtInvariantViolated;
    }
    if tgt_delay && semantics == Semantics::Elapsed {
        zone.open_up();
        if zone.constrain_all(&containers.tgt_invariant).is_empty() {
            return NodeStatus::ClocksTgtInvariantViolated;
        }
    }
    NodeStatus::Ok
}

impl Ts for ZoneGraph<'_> {
    type State = State;
    type Transition = Transition;

    fn initial(&mut self, out: &mut Vec<(NodeStatus, State, Transition)>) {
        self.containers.clear();
        let mut containers = core::mem::take(&mut self.containers);
        let (status, vloc, intvars) = ta::initial(self.system, &mut self.vm, &mut containers);
        if status.is_ok() {
            let mut zone = Dbm::zero(self.dim);
            let delay = ta::delay_allowed(self.system, &vloc);
            let mut ok = !zone.constrain_all(&containers.src_invariant).is_empty();
            if ok && delay && self.semantics == Semantics::Elapsed {
                zone.open_up();
                ok = !zone.constrain_all(&containers.src_invariant).is_empty();
            }
            if ok {
                self.extrapolate(&mut zone, &vloc);
                let state = State {
                    vloc: self.vloc_table.intern(vloc),
                    intvars: self.ival_table.intern(intvars),
                    zone,
                };
                let nprocs = self.system.process_count();
                let transition = Transition {
                    vedge: self.vedge_table.intern(Vedge::new(vec![None; nprocs])),
                };
                trace!(vloc = ?state.vloc, "initial state");
                out.push((NodeStatus::Ok, state, transition));
            } else {
                trace!(status = ?NodeStatus::ClocksEmptyZone, "initial state discarded");
            }
        }
        self.containers = containers;
    }

    fn next(&mut self, state: &State, out: &mut Vec<(NodeStatus, State, Transition)>) {
        let mut vedges = core::mem::take(&mut self.vedge_scratch);
        vedges.clear();
        Synchronizer::new(self.system).outgoing_vedges(&state.vloc, &mut vedges);

        let src_delay = ta::delay_allowed(self.system, &state.vloc);

        for vedge in vedges.drain(..) {
            self.containers.clear();
            let mut containers = core::mem::take(&mut self.containers);
            let (status, result) = ta::next(
                self.system,
                &mut self.vm,
                &state.vloc,
                &state.intvars,
                &vedge,
                &mut containers,
            );
            if let (true, Some((vloc, intvars))) = (status.is_ok(), result) {
                let tgt_delay = ta::delay_allowed(self.system, &vloc);
                let mut zone = state.zone.clone();
                let zone_status = apply_zone_step(
                    &mut zone,
                    self.semantics,
                    src_delay,
                    tgt_delay,
                    &containers,
                );
                if zone_status.is_ok() {
                    self.extrapolate(&mut zone, &vloc);
                    let next_state = State {
                        vloc: self.vloc_table.intern(vloc),
                        intvars: self.ival_table.intern(intvars),
                        zone,
                    };
                    let transition =
                        Transition { vedge: self.vedge_table.intern(vedge) };
                    trace!(vloc = ?next_state.vloc, "successor state");
                    out.push((NodeStatus::Ok, next_state, transition));
                } else {
                    trace!(status = ?zone_status, "successor discarded");
                }
            }
            self.containers = containers;
        }
        self.vedge_scratch = vedges;
    }

    fn labels(&self, state: &State) -> FixedBitSet {
        ta::labels(self.system, &state.vloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{expr, stmt, SystemBuilder};

    fn one_clock_loop() -> System {
        let mut b = SystemBuilder::new("loop");
        let p = b.add_process("p");
        let tick = b.add_event("tick");
        let x = b.add_clock("x");
        let l0 = b.add_location(p, "l0");
        b.set_initial(l0);
        b.add_edge(
            p,
            l0,
            tick,
            l0,
            expr::clock_le(x, 10),
            stmt::reset_clock(x, 0),
        );
        b.build().unwrap()
    }

    #[test]
    fn initial_zone_is_elapsed_under_elapsed_semantics() {
        let system = one_clock_loop();
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::None).unwrap();
        let mut out = Vec::new();
        zg.initial(&mut out);
        assert_eq!(out.len(), 1);
        let (status, state, _) = &out[0];
        assert!(status.is_ok());
        // x unbounded above, >= 0 below.
        assert_eq!(state.zone[(1, 0)], crate::dbm::Bound::LT_INFINITY);
        assert_eq!(state.zone[(0, 1)], crate::dbm::Bound::LE_ZERO);
    }

    #[test]
    fn initial_zone_is_zero_under_non_elapsed_semantics() {
        let system = one_clock_loop();
        let mut zg =
            ZoneGraph::new(&system, Semantics::NonElapsed, Extrapolation::None).unwrap();
        let mut out = Vec::new();
        zg.initial(&mut out);
        let (_, state, _) = &out[0];
        assert!(state.zone.contains_zero());
        assert!(state.zone.is_single_valuation());
    }

    #[test]
    fn guarded_self_loop_converges_with_extrapolation() {
        let system = one_clock_loop();
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut out = Vec::new();
        zg.initial(&mut out);
        let (_, s0, _) = out.pop().unwrap();

        // Iterate successors; the state space must close after few steps.
        let mut seen = vec![s0.clone()];
        let mut frontier = vec![s0];
        for _ in 0..10 {
            let mut next_frontier = Vec::new();
            for s in &frontier {
                let mut succ = Vec::new();
                zg.next(s, &mut succ);
                for (status, s2, _) in succ {
                    assert!(status.is_ok());
                    if !seen.contains(&s2) {
                        seen.push(s2.clone());
                        next_frontier.push(s2);
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        assert!(seen.len() <= 3, "state space must be finite, got {}", seen.len());
    }

    #[test]
    fn guard_blocks_when_zone_cannot_satisfy_it() {
        // x >= 5 guard from a zone bounded by x <= 2 is empty.
        let mut b = SystemBuilder::new("blocked");
        let p = b.add_process("p");
        let go = b.add_event("go");
        let x = b.add_clock("x");
        let l0 = b.add_location(p, "l0");
        let l1 = b.add_location(p, "l1");
        b.set_initial(l0);
        b.set_invariant(l0, expr::clock_le(x, 2));
        b.add_edge(p, l0, go, l1, expr::clock_ge(x, 5), stmt::nop());
        let system = b.build().unwrap();
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::None).unwrap();
        let mut out = Vec::new();
        zg.initial(&mut out);
        let (_, s0, _) = out.pop().unwrap();
        let mut succ = Vec::new();
        zg.next(&s0, &mut succ);
        assert!(succ.is_empty());
    }

    #[test]
    fn shared_states_compare_by_pointer() {
        let system = one_clock_loop();
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut out = Vec::new();
        zg.initial(&mut out);
        let (_, s0, _) = out.pop().unwrap();
        let mut succ = Vec::new();
        zg.next(&s0, &mut succ);
        let (_, s1, _) = succ.pop().unwrap();
        assert!(Shared::same(&s0.vloc, &s1.vloc));
        assert_eq!(s0.shallow_hash(), s1.shallow_hash());
    }
}
