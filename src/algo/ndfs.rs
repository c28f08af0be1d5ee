//! Nested depth-first search: the alternative liveness core.
//!
//! A blue DFS explores the transition system, expanding successors into a
//! reachability graph; nodes on the blue stack carry the `current` flag
//! (cyan). On the post-order visit of a final node a red DFS starts from
//! it; reaching any cyan node closes an accepting cycle through the outer
//! stack. When the blue DFS finishes a node all its proper descendants
//! are blue or cyan, so the red DFS only meets nodes whose successors are
//! already in the graph. Cyan and red are independent markings: the red
//! seed stays cyan, which is what lets a final node's self-loop close the
//! cycle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use hashbrown::HashSet;
use tracing::debug;

use crate::algo::Stats;
use crate::graph::reachability::ReachabilityGraph;
use crate::graph::NodeIndex;
use crate::ts::Ts;

struct BlueEntry {
    node: NodeIndex,
    successors: VecDeque<NodeIndex>,
}

/// The nested-DFS emptiness check.
pub struct NestedDfs {
    stop: Option<Arc<AtomicBool>>,
    blue: HashSet<NodeIndex>,
    red: HashSet<NodeIndex>,
}

impl Default for NestedDfs {
    fn default() -> Self {
        Self::new()
    }
}

impl NestedDfs {
    /// New algorithm instance.
    pub fn new() -> NestedDfs {
        NestedDfs { stop: None, blue: HashSet::new(), red: HashSet::new() }
    }

    /// Poll `flag` between node expansions.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> NestedDfs {
        self.stop = Some(flag);
        self
    }

    /// Check whether `ts` has an infinite run through a state satisfying
    /// `labels`, building the explored graph with initial and final nodes
    /// marked.
    ///
    /// # Returns
    /// Statistics with `cycle` set iff an accepting cycle exists. The
    /// lasso witness can be extracted from the graph afterwards with
    /// [`crate::algo::path::LassoExtraction`].
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
        self.blue.clear();
        self.red.clear();

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
            if self.is_white(node, graph) {
                self.blue_dfs(node, ts, graph, labels, &mut stats);
            }
            if stats.cycle {
                break;
            }
        }

        stats.stored_states = graph.node_count();
        stats.finish();
        debug!(
            visited = stats.visited_states,
            stored = stats.stored_states,
            cycle = stats.cycle,
            "nested dfs done"
        );
        stats
    }

    fn is_white<S, T>(&self, n: NodeIndex, graph: &ReachabilityGraph<S, T>) -> bool {
        !graph.flags(n).current && !self.blue.contains(&n)
    }

    fn blue_dfs<TS: Ts>(
        &mut self,
        root: NodeIndex,
        ts: &mut TS,
        graph: &mut ReachabilityGraph<TS::State, TS::Transition>,
        labels: &FixedBitSet,
        stats: &mut Stats,
    ) where
        TS::State: core::hash::Hash + Eq,
    {
        let mut stack = Vec::new();
        let entry = self.blue_push(root, ts, graph, labels, stats);
        stack.push(entry);

        loop {
            if self.stop.as_ref().is_some_and(|f| f.load(Ordering::Relaxed)) {
                return;
            }
            let next = match stack.last_mut() {
                None => break,
                Some(top) => (top.node, top.successors.pop_front()),
            };
            match next {
                (_, Some(t)) => {
                    if self.is_white(t, graph) {
                        let entry = self.blue_push(t, ts, graph, labels, stats);
                        stack.push(entry);
                    }
                }
                (n, None) => {
                    // Post-order: start the inner search from final nodes.
                    if graph.flags(n).is_final && self.red_dfs(n, graph) {
                        stats.cycle = true;
                        return;
                    }
                    self.blue.insert(n);
                    graph.flags_mut(n).current = false;
                    stack.pop();
                }
            }
        }
    }

    fn blue_push<TS: Ts>(
        &mut self,
        node: NodeIndex,
        ts: &mut TS,
        graph: &mut ReachabilityGraph<TS::State, TS::Transition>,
        labels: &FixedBitSet,
        stats: &mut Stats,
    ) -> BlueEntry
    where
        TS::State: core::hash::Hash + Eq,
    {
        graph.flags_mut(node).current = true;
        stats.visited_states += 1;

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
        BlueEntry { node, successors }
    }

    /// Inner search: from `seed`, any path to a cyan node closes a cycle
    /// through the blue stack. The seed keeps its cyan flag.
    fn red_dfs<S, T>(&mut self, seed: NodeIndex, graph: &ReachabilityGraph<S, T>) -> bool {
        let mut stack = vec![seed];
        self.red.insert(seed);
        while let Some(n) = stack.pop() {
            for e in graph.outgoing_edges(n) {
                let t = graph.edge_tgt(e);
                if graph.flags(t).current {
                    return true;
                }
                if self.red.insert(t) {
                    stack.push(t);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{expr, stmt, System, SystemBuilder};
    use crate::zg::{Extrapolation, Semantics, ZoneGraph};

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
    fn accepting_self_loop_is_found() {
        let system = accepting_loop(true);
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut graph = ReachabilityGraph::new();
        let labels = system.label_set(&["acc"]).unwrap();
        let stats = NestedDfs::new().run(&mut zg, &mut graph, &labels);
        assert!(stats.cycle);
    }

    #[test]
    fn unlabelled_loop_is_not_accepting() {
        let system = accepting_loop(false);
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut graph = ReachabilityGraph::new();
        let labels = system.label_set(&["acc"]).unwrap();
        let stats = NestedDfs::new().run(&mut zg, &mut graph, &labels);
        assert!(!stats.cycle);
    }

    /// Final state without a cycle through it: a terminal labelled state
    /// must not be reported.
    #[test]
    fn terminal_final_state_has_no_cycle() {
        let mut b = SystemBuilder::new("terminal");
        let p = b.add_process("p");
        let go = b.add_event("go");
        let acc = b.add_label("acc");
        let l0 = b.add_location(p, "l0");
        let l1 = b.add_location(p, "l1");
        b.set_initial(l0);
        b.set_location_labels(l1, &[acc]);
        b.add_edge(p, l0, go, l1, expr::tt(), stmt::nop());
        let system = b.build().unwrap();
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut graph = ReachabilityGraph::new();
        let labels = system.label_set(&["acc"]).unwrap();
        let stats = NestedDfs::new().run(&mut zg, &mut graph, &labels);
        assert!(!stats.cycle);
    }

    /// A cycle below an accepting state that cannot reach the blue stack
    /// must not be reported; a later accepting cycle must.
    #[test]
    fn red_visits_do_not_leak_across_seeds() {
        let mut b = SystemBuilder::new("two-loops");
        let p = b.add_process("p");
        let go = b.add_event("go");
        let spin = b.add_event("spin");
        let acc = b.add_label("acc");
        let l0 = b.add_location(p, "l0");
        let l1 = b.add_location(p, "l1");
        let l2 = b.add_location(p, "l2");
        b.set_initial(l0);
        b.set_location_labels(l0, &[acc]);
        // l0 -> l1 -> l2 -> l2: the only cycle avoids the accepting l0.
        b.add_edge(p, l0, go, l1, expr::tt(), stmt::nop());
        b.add_edge(p, l1, go, l2, expr::tt(), stmt::nop());
        b.add_edge(p, l2, spin, l2, expr::tt(), stmt::nop());
        let system = b.build().unwrap();
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut graph = ReachabilityGraph::new();
        let labels = system.label_set(&["acc"]).unwrap();
        let stats = NestedDfs::new().run(&mut zg, &mut graph, &labels);
        assert!(!stats.cycle);
    }
}
