//! Synchronised product of processes: tuples of locations, tuples of
//! edges, and the enumeration of system steps from a tuple of locations.
//!
//! A system step is either one synchronisation vector instantiated with
//! one matching edge per constrained process, or a single asynchronous
//! edge. The [`Synchronizer`] enumerates both kinds, composing the
//! enabled-synchronisation filter with a Cartesian product over matching
//! edges.

use core::fmt;
use core::ops::Index;

use crate::system::{SyncStrength, System, WeakSyncPolicy};
use crate::{LocationId, ProcessId, SysEdgeId};

/// A tuple of locations, one per process. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Vloc(Box<[LocationId]>);

impl Vloc {
    /// Tuple from per-process locations.
    pub fn new(locations: impl Into<Box<[LocationId]>>) -> Vloc {
        Vloc(locations.into())
    }

    /// The initial tuple of a system.
    pub fn initial(system: &System) -> Vloc {
        Vloc((0..system.process_count() as ProcessId)
            .map(|p| system.initial_location(p))
            .collect())
    }

    /// Number of processes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the tuple is empty (systems without processes).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Locations in process order.
    pub fn iter(&self) -> core::slice::Iter<'_, LocationId> {
        self.0.iter()
    }
}

impl Index<ProcessId> for Vloc {
    type Output = LocationId;

    fn index(&self, pid: ProcessId) -> &LocationId {
        &self.0[pid as usize]
    }
}

/// A tuple of edges, one per participating process; non-participating
/// processes carry no entry. Immutable once constructed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Vedge(Box<[Option<SysEdgeId>]>);

impl Vedge {
    /// Tuple from per-process optional edges.
    pub fn new(edges: impl Into<Box<[Option<SysEdgeId>]>>) -> Vedge {
        Vedge(edges.into())
    }

    /// Tuple with a single asynchronous edge.
    pub fn asynchronous(nprocs: usize, pid: ProcessId, edge: SysEdgeId) -> Vedge {
        let mut edges = vec![None; nprocs];
        edges[pid as usize] = Some(edge);
        Vedge(edges.into())
    }

    /// Number of processes (participating or not).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no process participates.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// The edge of a process, if it participates.
    pub fn edge(&self, pid: ProcessId) -> Option<SysEdgeId> {
        self.0[pid as usize]
    }

    /// Participating `(process, edge)` pairs in process order.
    pub fn iter(&self) -> impl Iterator<Item = (ProcessId, SysEdgeId)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(p, e)| e.map(|e| (p as ProcessId, e)))
    }
}

impl fmt::Debug for Vedge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Enumerator of system steps from a tuple of locations.
pub struct Synchronizer<'a> {
    system: &'a System,
}

impl<'a> Synchronizer<'a> {
    /// Synchronizer over a system.
    pub fn new(system: &'a System) -> Synchronizer<'a> {
        Synchronizer { system }
    }

    /// Enumerate the outgoing vedges of `vloc` into `out`.
    ///
    /// Synchronisations come first, in declaration order, each expanded to
    /// the Cartesian product of the matching edges of its constrained
    /// processes; asynchronous edges follow, in process order. When some
    /// process of `vloc` is in a committed location, only vedges involving
    /// a committed process are kept.
    pub fn outgoing_vedges(&self, vloc: &Vloc, out: &mut Vec<Vedge>) {
        let system = self.system;
        let nprocs = vloc.len();
        let first = out.len();

        for sync in system.synchronizations() {
            if !self.sync_enabled(vloc, sync.constraints()) {
                continue;
            }
            // Axes of the product: matching edges per constrained process,
            // unmatched weak constraints dropped.
            let mut axes: Vec<(ProcessId, &[SysEdgeId])> = Vec::new();
            for c in sync.constraints() {
                let edges = system.outgoing_edges(vloc[c.pid], c.event);
                if edges.is_empty() {
                    debug_assert!(c.strength == SyncStrength::Weak);
                    continue;
                }
                axes.push((c.pid, edges));
            }
            if axes.is_empty() {
                continue;
            }
            // Cartesian product, advancing the rightmost axis first.
            let mut pick = vec![0usize; axes.len()];
            loop {
                let mut edges = vec![None; nprocs];
                for (axis, &(pid, axis_edges)) in axes.iter().enumerate() {
                    edges[pid as usize] = Some(axis_edges[pick[axis]]);
                }
                out.push(Vedge::new(edges));

                let mut axis = axes.len();
                loop {
                    if axis == 0 {
                        break;
                    }
                    axis -= 1;
                    pick[axis] += 1;
                    if pick[axis] < axes[axis].1.len() {
                        break;
                    }
                    pick[axis] = 0;
                }
                if pick.iter().all(|&i| i == 0) {
                    break;
                }
            }
        }

        for pid in 0..nprocs as ProcessId {
            for &e in system.asynchronous_outgoing_edges(vloc[pid]) {
                out.push(Vedge::asynchronous(nprocs, pid, e));
            }
        }

        // Committed locations take priority over the rest of the system.
        if vloc.iter().any(|&l| system.location(l).is_committed()) {
            let mut write = first;
            for read in first..out.len() {
                let involves_committed = out[read]
                    .iter()
                    .any(|(pid, _)| system.location(vloc[pid]).is_committed());
                if involves_committed {
                    out.swap(write, read);
                    write += 1;
                }
            }
            out.truncate(write);
        }
    }

    /// Whether a synchronisation is enabled in `vloc`: every strong
    /// constraint has a matching edge, and the weak-synchronisation policy
    /// admits the matched set.
    fn sync_enabled(&self, vloc: &Vloc, constraints: &[crate::system::SyncConstraint]) -> bool {
        let system = self.system;
        let mut matched = 0usize;
        let mut all_weak_unmatched = true;
        for c in constraints {
            let has_event = system.has_outgoing_event(vloc[c.pid], c.event);
            if has_event {
                matched += 1;
            }
            all_weak_unmatched &= c.strength == SyncStrength::Weak && !has_event;
            if c.strength == SyncStrength::Strong && !has_event {
                return false;
            }
        }
        if all_weak_unmatched {
            return false;
        }
        match system.weak_sync_policy() {
            WeakSyncPolicy::EmitPartial => true,
            WeakSyncPolicy::RequireTwo => {
                matched >= 2 || constraints.iter().all(|c| c.strength == SyncStrength::Strong)
            }
        }
    }

    /// Apply a vedge to a tuple of locations.
    ///
    /// Only participating processes move; the source location of every
    /// edge must match `vloc`. Returns `None` on a source mismatch
    /// (`INCOMPATIBLE_EDGE`).
    pub fn next(&self, vloc: &Vloc, vedge: &Vedge) -> Option<Vloc> {
        debug_assert_eq!(vloc.len(), vedge.len());
        let mut locations: Box<[LocationId]> = vloc.0.clone();
        for (pid, e) in vedge.iter() {
            let edge = self.system.edge(e);
            if edge.src() != vloc[pid] {
                return None;
            }
            locations[pid as usize] = edge.tgt();
        }
        Some(Vloc(locations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{expr, stmt, SyncConstraint, SystemBuilder};

    fn builder() -> (SystemBuilder, [ProcessId; 2], [crate::EventId; 2]) {
        let mut b = SystemBuilder::new("sp");
        let p0 = b.add_process("p0");
        let p1 = b.add_process("p1");
        let a = b.add_event("a");
        let t = b.add_event("tau");
        (b, [p0, p1], [a, t])
    }

    #[test]
    fn asynchronous_edges_are_enumerated_per_process() {
        let (mut b, [p0, p1], [_, tau]) = builder();
        let l0 = b.add_location(p0, "l0");
        let m0 = b.add_location(p1, "m0");
        b.set_initial(l0);
        b.set_initial(m0);
        b.add_edge(p0, l0, tau, l0, expr::tt(), stmt::nop());
        b.add_edge(p1, m0, tau, m0, expr::tt(), stmt::nop());
        let system = b.build().unwrap();

        let sp = Synchronizer::new(&system);
        let vloc = Vloc::initial(&system);
        let mut out = Vec::new();
        sp.outgoing_vedges(&vloc, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].edge(p0), Some(0));
        assert_eq!(out[0].edge(p1), None);
        assert_eq!(out[1].edge(p1), Some(1));
    }

    #[test]
    fn strong_sync_requires_all_processes() {
        let (mut b, [p0, p1], [a, _]) = builder();
        let l0 = b.add_location(p0, "l0");
        let l1 = b.add_location(p0, "l1");
        let m0 = b.add_location(p1, "m0");
        let m1 = b.add_location(p1, "m1");
        b.set_initial(l0);
        b.set_initial(m0);
        b.add_edge(p0, l0, a, l1, expr::tt(), stmt::nop());
        let e1 = b.add_edge(p1, m0, a, m1, expr::tt(), stmt::nop());
        b.add_sync(vec![
            SyncConstraint { pid: p0, event: a, strength: SyncStrength::Strong },
            SyncConstraint { pid: p1, event: a, strength: SyncStrength::Strong },
        ]);
        let system = b.build().unwrap();
        let sp = Synchronizer::new(&system);

        let mut out = Vec::new();
        sp.outgoing_vedges(&Vloc::initial(&system), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].edge(p0), Some(0));
        assert_eq!(out[0].edge(p1), Some(e1));

        // From (l1, m0) process p0 has no a-edge: the sync is disabled.
        out.clear();
        sp.outgoing_vedges(&Vloc::new(vec![l1, m0]), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn cartesian_product_covers_all_edge_choices() {
        let (mut b, [p0, p1], [a, _]) = builder();
        let l0 = b.add_location(p0, "l0");
        let m0 = b.add_location(p1, "m0");
        b.set_initial(l0);
        b.set_initial(m0);
        b.add_edge(p0, l0, a, l0, expr::tt(), stmt::nop());
        b.add_edge(p0, l0, a, l0, expr::tt(), stmt::nop());
        b.add_edge(p1, m0, a, m0, expr::tt(), stmt::nop());
        b.add_edge(p1, m0, a, m0, expr::tt(), stmt::nop());
        b.add_sync(vec![
            SyncConstraint { pid: p0, event: a, strength: SyncStrength::Strong },
            SyncConstraint { pid: p1, event: a, strength: SyncStrength::Strong },
        ]);
        let system = b.build().unwrap();
        let sp = Synchronizer::new(&system);
        let mut out = Vec::new();
        sp.outgoing_vedges(&Vloc::initial(&system), &mut out);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn weak_partial_match_is_emitted_by_default() {
        let (mut b, [p0, p1], [a, _]) = builder();
        let l0 = b.add_location(p0, "l0");
        let m0 = b.add_location(p1, "m0");
        let m1 = b.add_location(p1, "m1");
        b.set_initial(l0);
        b.set_initial(m0);
        // Only p1 has an a-edge; p0's weak constraint is unmatched.
        let e = b.add_edge(p1, m0, a, m1, expr::tt(), stmt::nop());
        b.add_sync(vec![
            SyncConstraint { pid: p0, event: a, strength: SyncStrength::Weak },
            SyncConstraint { pid: p1, event: a, strength: SyncStrength::Weak },
        ]);
        let system = b.build().unwrap();
        let sp = Synchronizer::new(&system);
        let mut out = Vec::new();
        sp.outgoing_vedges(&Vloc::initial(&system), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].edge(p1), Some(e));
        assert_eq!(out[0].edge(p0), None);
    }

    #[test]
    fn weak_partial_match_needs_two_under_require_two() {
        let (mut b, [p0, p1], [a, _]) = builder();
        let l0 = b.add_location(p0, "l0");
        let m0 = b.add_location(p1, "m0");
        b.set_initial(l0);
        b.set_initial(m0);
        b.add_edge(p1, m0, a, m0, expr::tt(), stmt::nop());
        b.add_sync(vec![
            SyncConstraint { pid: p0, event: a, strength: SyncStrength::Weak },
            SyncConstraint { pid: p1, event: a, strength: SyncStrength::Weak },
        ]);
        b.set_weak_sync_policy(WeakSyncPolicy::RequireTwo);
        let system = b.build().unwrap();
        let sp = Synchronizer::new(&system);
        let mut out = Vec::new();
        sp.outgoing_vedges(&Vloc::initial(&system), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn sync_with_every_weak_constraint_unmatched_is_dropped() {
        let (mut b, [p0, p1], [a, tau]) = builder();
        let l0 = b.add_location(p0, "l0");
        let m0 = b.add_location(p1, "m0");
        b.set_initial(l0);
        b.set_initial(m0);
        b.add_edge(p0, l0, tau, l0, expr::tt(), stmt::nop());
        b.add_sync(vec![
            SyncConstraint { pid: p0, event: a, strength: SyncStrength::Weak },
            SyncConstraint { pid: p1, event: a, strength: SyncStrength::Weak },
        ]);
        let system = b.build().unwrap();
        let sp = Synchronizer::new(&system);
        let mut out = Vec::new();
        sp.outgoing_vedges(&Vloc::initial(&system), &mut out);
        // Only the asynchronous tau edge remains.
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].edge(p0), Some(0));
    }

    #[test]
    fn next_rejects_incompatible_edges() {
        let (mut b, [p0, p1], [_, tau]) = builder();
        let l0 = b.add_location(p0, "l0");
        let l1 = b.add_location(p0, "l1");
        let m0 = b.add_location(p1, "m0");
        b.set_initial(l0);
        b.set_initial(m0);
        let e = b.add_edge(p0, l0, tau, l1, expr::tt(), stmt::nop());
        let system = b.build().unwrap();
        let sp = Synchronizer::new(&system);

        let vedge = Vedge::asynchronous(2, p0, e);
        let next = sp.next(&Vloc::initial(&system), &vedge).unwrap();
        assert_eq!(next[p0], l1);
        assert_eq!(next[p1], m0);

        // From (l1, m0) the edge's source no longer matches.
        assert!(sp.next(&next, &vedge).is_none());
    }

    #[test]
    fn committed_locations_preempt_others() {
        let (mut b, [p0, p1], [_, tau]) = builder();
        let l0 = b.add_location(p0, "l0");
        let m0 = b.add_location(p1, "m0");
        b.set_initial(l0);
        b.set_initial(m0);
        b.set_committed(l0);
        b.add_edge(p0, l0, tau, l0, expr::tt(), stmt::nop());
        b.add_edge(p1, m0, tau, m0, expr::tt(), stmt::nop());
        let system = b.build().unwrap();
        let sp = Synchronizer::new(&system);
        let mut out = Vec::new();
        sp.outgoing_vedges(&Vloc::initial(&system), &mut out);
        // Only the committed process may move.
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].edge(p0), Some(0));
    }
}
