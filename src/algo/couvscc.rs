//! Couvreur's SCC-decomposition-based emptiness check, for generalised
//! and single Büchi conditions.
//!
//! This is the iterative translation of the recursive algorithm in
//! Gaiser & Schwoon, *Comparison of Algorithms for Checking Emptiness on
//! Büchi Automata* (MEMICS 2009). Three stacks drive the search: `todo`
//! (node and remaining successors), `roots` (SCC roots with accumulated
//! label sets) and `active` (nodes of the open SCCs); `dfsnum` orders the
//! roots and the `current` flag marks active membership. Successors are
//! expanded lazily into a reachability graph as nodes are pushed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use tracing::debug;

use crate::algo::Stats;
use crate::graph::reachability::ReachabilityGraph;
use crate::graph::NodeIndex;
use crate::ts::Ts;

struct TodoEntry {
    node: NodeIndex,
    successors: VecDeque<NodeIndex>,
}

struct RootsEntry {
    node: NodeIndex,
    /// Labels seen in the explored part of the SCC (generalised variant).
    labels: FixedBitSet,
}

/// Emptiness check for generalised Büchi conditions: a cycle is accepting
/// when the merged SCC touches every required label.
pub struct GeneralizedCouvreur {
    stop: Option<Arc<AtomicBool>>,
    count: u32,
    todo: Vec<TodoEntry>,
    roots: Vec<RootsEntry>,
    active: Vec<NodeIndex>,
}

impl Default for GeneralizedCouvreur {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneralizedCouvreur {
    /// New algorithm instance.
    pub fn new() -> GeneralizedCouvreur {
        GeneralizedCouvreur {
            stop: None,
            count: 0,
            todo: Vec::new(),
            roots: Vec::new(),
            active: Vec::new(),
        }
    }

    /// Poll `flag` between node expansions.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> GeneralizedCouvreur {
        self.stop = Some(flag);
        self
    }

    /// Check whether `ts` has an infinite run visiting every label of
    /// `labels` infinitely often, building the explored graph.
    ///
    /// # Returns
    /// Statistics with `cycle` set iff an accepting cycle exists. With
    /// empty `labels` the full state space is built and `cycle` stays
    /// false.
    pub fn run<TS: Ts>(
        &mut self,
        ts: &mut TS,
        graph: &mut ReachabilityGraph<TS::State, TS::Transition>,
        labels: &FixedBitSet,
    ) -> Stats
    where
        TS::State: core::hash::Hash + Eq,
    {
        let mut stats = Stats::begin();
        self.count = 0;

        let mut triples = Vec::new();
        ts.initial(&mut triples);
        let initial: Vec<NodeIndex> = triples
            .drain(..)
            .filter(|(status, _, _)| status.is_ok())
            .map(|(_, state, _)| {
                let (_, node) = graph.add_node(state);
                graph.flags_mut(node).initial = true;
                node
            })
            .collect();

        for node in initial {
            if graph.flags(node).dfsnum == 0 {
                self.couv_dfs(node, ts, graph, labels, &mut stats);
            }
            if stats.cycle {
                break;
            }
        }

        stats.stored_states = graph.node_count();
        self.clear_stacks();
        stats.finish();
        debug!(
            visited = stats.visited_states,
            stored = stats.stored_states,
            cycle = stats.cycle,
            "generalized couvreur done"
        );
        stats
    }

    fn couv_dfs<TS: Ts>(
        &mut self,
        node: NodeIndex,
        ts: &mut TS,
        graph: &mut ReachabilityGraph<TS::State, TS::Transition>,
        labels: &FixedBitSet,
        stats: &mut Stats,
    ) where
        TS::State: core::hash::Hash + Eq,
    {
        self.push(node, ts, graph, stats);
        loop {
            if self.stop.as_ref().is_some_and(|f| f.load(Ordering::Relaxed)) {
                return;
            }
            let next = match self.todo.last_mut() {
                None => break,
                Some(top) => (top.node, top.successors.pop_front()),
            };
            match next {
                (n, None) => {
                    if self.roots.last().map(|r| r.node) == Some(n) {
                        self.close_scc(n, graph);
                    }
                    self.todo.pop();
                }
                (_, Some(t)) => {
                    if graph.flags(t).dfsnum == 0 {
                        self.push(t, ts, graph, stats);
                    } else if graph.flags(t).current {
                        self.merge_scc(t, labels, graph, stats);
                        if stats.cycle {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Mark all nodes of the closed SCC rooted at `n` as inactive.
    fn close_scc<S, T>(&mut self, n: NodeIndex, graph: &mut ReachabilityGraph<S, T>) {
        self.roots.pop();
        loop {
            let u = self.active.pop().expect("active stack underflow");
            graph.flags_mut(u).current = false;
            if u == n {
                break;
            }
        }
    }

    /// Merge the SCCs on the loop closed through `t`, accumulating their
    /// label sets; report a cycle when every required label is present.
    fn merge_scc<S, T>(
        &mut self,
        t: NodeIndex,
        labels: &FixedBitSet,
        graph: &ReachabilityGraph<S, T>,
        stats: &mut Stats,
    ) {
        let t_dfsnum = graph.flags(t).dfsnum;
        let mut scc_labels = FixedBitSet::with_capacity(labels.len());
        loop {
            let entry = self.roots.last().expect("roots stack underflow");
            let u = entry.node;
            scc_labels.union_with(&entry.labels);
            if labels.count_ones(..) > 0 && labels.is_subset(&scc_labels) {
                stats.cycle = true;
                return;
            }
            self.roots.pop();
            if graph.flags(u).dfsnum <= t_dfsnum {
                self.roots.push(RootsEntry { node: u, labels: scc_labels });
                return;
            }
        }
    }

    /// Number, flag and stack the node, expanding its successors into the
    /// graph.
    fn push<TS: Ts>(
        &mut self,
        node: NodeIndex,
        ts: &mut TS,
        graph: &mut ReachabilityGraph<TS::State, TS::Transition>,
        stats: &mut Stats,
    ) where
        TS::State: core::hash::Hash + Eq,
    {
        self.count += 1;
        graph.flags_mut(node).dfsnum = self.count;
        graph.flags_mut(node).current = true;
        let successors = expand_node(node, ts, graph, stats);
        let node_labels = ts.labels(graph.state(node));
        self.todo.push(TodoEntry { node, successors });
        self.roots.push(RootsEntry { node, labels: node_labels });
        self.active.push(node);
        stats.visited_states += 1;
    }

    fn clear_stacks(&mut self) {
        self.todo.clear();
        self.roots.clear();
        self.active.clear();
    }
}

/// Add all successors of `node` to the graph and return them in order.
fn expand_node<TS: Ts>(
    node: NodeIndex,
    ts: &mut TS,
    graph: &mut ReachabilityGraph<TS::State, TS::Transition>,
    stats: &mut Stats,
) -> VecDeque<NodeIndex>
where
    TS::State: core::hash::Hash + Eq,
{
    let mut triples = Vec::new();
    ts.next(graph.state(node), &mut triples);
    let mut successors = VecDeque::with_capacity(triples.len());
    for (status, state, transition) in triples {
        if !status.is_ok() {
            continue;
        }
        stats.visited_transitions += 1;
        let (_, next) = graph.add_node(state);
        graph.add_edge(node, next, transition);
        successors.push_back(next);
    }
    successors
}

struct SingleRootsEntry {
    node: NodeIndex,
}

/// Emptiness check for a single Büchi condition: roots carry the `final`
/// flag of their node, merging ORs the flags, and a cycle is reported as
/// soon as a merged root is final.
pub struct SingleCouvreur {
    stop: Option<Arc<AtomicBool>>,
    count: u32,
    todo: Vec<TodoEntry>,
    roots: Vec<SingleRootsEntry>,
    active: Vec<NodeIndex>,
}

impl Default for SingleCouvreur {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleCouvreur {
    /// New algorithm instance.
    pub fn new() -> SingleCouvreur {
        SingleCouvreur {
            stop: None,
            count: 0,
            todo: Vec::new(),
            roots: Vec::new(),
            active: Vec::new(),
        }
    }

    /// Poll `flag` between node expansions.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> SingleCouvreur {
        self.stop = Some(flag);
        self
    }

    /// Check whether `ts` has an infinite run through a state satisfying
    /// `labels`, treating `labels` as one accepting condition.
    ///
    /// Initial and final nodes are marked in the graph.
    pub fn run<TS: Ts>(
        &mut self,
        ts: &mut TS,
        graph: &mut ReachabilityGraph<TS::State, TS::Transition>,
        labels: &FixedBitSet,
    ) -> Stats
    where
        TS::State: core::hash::Hash + Eq,
    {
        let mut stats = Stats::begin();
        self.count = 0;

        let mut triples = Vec::new();
        ts.initial(&mut triples);
        let initial: Vec<NodeIndex> = triples
            .drain(..)
            .filter(|(status, _, _)| status.is_ok())
            .map(|(_, state, _)| {
                let accepting = ts.satisfies(&state, labels);
                let (_, node) = graph.add_node(state);
                graph.flags_mut(node).initial = true;
                graph.flags_mut(node).is_final = accepting;
                node
            })
            .collect();

        for node in initial {
            if graph.flags(node).dfsnum == 0 {
                self.couv_dfs(node, ts, graph, labels, &mut stats);
            }
            if stats.cycle {
                break;
            }
        }

        stats.stored_states = graph.node_count();
        self.todo.clear();
        self.roots.clear();
        self.active.clear();
        stats.finish();
        debug!(
            visited = stats.visited_states,
            stored = stats.stored_states,
            cycle = stats.cycle,
            "single couvreur done"
        );
        stats
    }

    fn couv_dfs<TS: Ts>(
        &mut self,
        node: NodeIndex,
        ts: &mut TS,
        graph: &mut ReachabilityGraph<TS::State, TS::Transition>,
        labels: &FixedBitSet,
        stats: &mut Stats,
    ) where
        TS::State: core::hash::Hash + Eq,
    {
        self.push(node, ts, graph, labels, stats);
        loop {
            if self.stop.as_ref().is_some_and(|f| f.load(Ordering::Relaxed)) {
                return;
            }
            let next = match self.todo.last_mut() {
                None => break,
                Some(top) => (top.node, top.successors.pop_front()),
            };
            match next {
                (n, None) => {
                    if self.roots.last().map(|r| r.node) == Some(n) {
                        self.close_scc(n, graph);
                    }
                    self.todo.pop();
                }
                (_, Some(t)) => {
                    if graph.flags(t).dfsnum == 0 {
                        self.push(t, ts, graph, labels, stats);
                    } else if graph.flags(t).current {
                        self.merge_scc(t, graph, stats);
                        if stats.cycle {
                            return;
                        }
                    }
                }
            }
        }
    }

    fn close_scc<S, T>(&mut self, n: NodeIndex, graph: &mut ReachabilityGraph<S, T>) {
        self.roots.pop();
        loop {
            let u = self.active.pop().expect("active stack underflow");
            graph.flags_mut(u).current = false;
            if u == n {
                break;
            }
        }
    }

    /// Merge the SCC roots on the loop closed through `t`; a final root
    /// anywhere on the loop witnesses an accepting cycle.
    fn merge_scc<S, T>(
        &mut self,
        t: NodeIndex,
        graph: &ReachabilityGraph<S, T>,
        stats: &mut Stats,
    ) {
        let t_dfsnum = graph.flags(t).dfsnum;
        loop {
            let u = self.roots.last().expect("roots stack underflow").node;
            if graph.flags(u).is_final {
                stats.cycle = true;
                return;
            }
            self.roots.pop();
            if graph.flags(u).dfsnum <= t_dfsnum {
                self.roots.push(SingleRootsEntry { node: u });
                return;
            }
        }
    }

    fn push<TS: Ts>(
        &mut self,
        node: NodeIndex,
        ts: &mut TS,
        graph: &mut ReachabilityGraph<TS::State, TS::Transition>,
        labels: &FixedBitSet,
        stats: &mut Stats,
    ) where
        TS::State: core::hash::Hash + Eq,
    {
        self.count += 1;
        graph.flags_mut(node).dfsnum = self.count;
        graph.flags_mut(node).current = true;

        let mut triples = Vec::new();
        ts.next(graph.state(node), &mut triples);
        let mut successors = VecDeque::with_capacity(triples.len());
        for (status, state, transition) in triples {
            if !status.is_ok() {
                continue;
            }
            stats.visited_transitions += 1;
            let accepting = ts.satisfies(&state, labels);
            let (_, next) = graph.add_node(state);
            graph.add_edge(node, next, transition);
            graph.flags_mut(next).is_final = accepting;
            successors.push_back(next);
        }

        self.todo.push(TodoEntry { node, successors });
        self.roots.push(SingleRootsEntry { node });
        self.active.push(node);
        stats.visited_states += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{expr, stmt, System, SystemBuilder};
    use crate::zg::{Extrapolation, Semantics, ZoneGraph};

    /// Self-loop `l0 -> l0` guarded by `x <= 10` with reset, labelled.
    fn accepting_loop(with_label: bool) -> System {
        let mut b = SystemBuilder::new("live");
        let p = b.add_process("p");
        let tick = b.add_event("tick");
        let x = b.add_clock("x");
        let acc = b.add_label("acc");
        let l0 = b.add_location(p, "l0");
        b.set_initial(l0);
        if with_label {
            b.set_location_labels(l0, &[acc]);
        }
        b.add_edge(p, l0, tick, l0, expr::clock_le(x, 10), stmt::reset_clock(x, 0));
        b.build().unwrap()
    }

    #[test]
    fn generalized_reports_labelled_cycle() {
        let system = accepting_loop(true);
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut graph = ReachabilityGraph::new();
        let labels = system.label_set(&["acc"]).unwrap();
        let stats = GeneralizedCouvreur::new().run(&mut zg, &mut graph, &labels);
        assert!(stats.cycle);
    }

    #[test]
    fn generalized_without_label_finds_no_cycle() {
        let system = accepting_loop(false);
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut graph = ReachabilityGraph::new();
        let labels = system.label_set(&["acc"]).unwrap();
        let stats = GeneralizedCouvreur::new().run(&mut zg, &mut graph, &labels);
        assert!(!stats.cycle);
        // The whole (finite) zone graph was explored.
        assert!(stats.stored_states >= 1);
    }

    #[test]
    fn single_agrees_with_generalized_on_one_label() {
        for with_label in [true, false] {
            let system = accepting_loop(with_label);
            let mut zg =
                ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal)
                    .unwrap();
            let mut graph = ReachabilityGraph::new();
            let labels = system.label_set(&["acc"]).unwrap();
            let stats = SingleCouvreur::new().run(&mut zg, &mut graph, &labels);
            assert_eq!(stats.cycle, with_label);
        }
    }

    /// A lasso whose cycle does not carry the label: prefix into an
    /// unlabelled loop must not report a cycle, while a labelled loop
    /// after the same prefix must.
    #[test]
    fn cycle_must_lie_on_the_loop() {
        let mut b = SystemBuilder::new("lasso");
        let p = b.add_process("p");
        let go = b.add_event("go");
        let loop_ = b.add_event("loop");
        let acc = b.add_label("acc");
        let l0 = b.add_location(p, "l0");
        let l1 = b.add_location(p, "l1");
        b.set_initial(l0);
        // The label sits on the prefix state only.
        b.set_location_labels(l0, &[acc]);
        b.add_edge(p, l0, go, l1, expr::tt(), stmt::nop());
        b.add_edge(p, l1, loop_, l1, expr::tt(), stmt::nop());
        let system = b.build().unwrap();
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut graph = ReachabilityGraph::new();
        let labels = system.label_set(&["acc"]).unwrap();
        let stats = GeneralizedCouvreur::new().run(&mut zg, &mut graph, &labels);
        assert!(!stats.cycle);
    }
}
