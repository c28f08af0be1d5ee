//! Reachability with covering: waiting-list exploration of a transition
//! system into a subsumption graph, evicting covered nodes as larger
//! ones are discovered.
//!
//! The resulting graph over-approximates the reachable states; the answer
//! is complete when the covering predicate is a trace inclusion, and the
//! run terminates when it is a well-quasi-order (supplied by the `aLU+` or
//! `aM+` abstractions composed with zone inclusion).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use tracing::debug;

use crate::algo::Stats;
use crate::graph::subsumption::SubsumptionGraph;
use crate::graph::{EdgeKind, NodeIndex};
use crate::ts::Ts;
use crate::waiting::Waiting;

pub use crate::waiting::Policy;

/// A reusable covering-reachability run configuration.
///
/// # Examples
///
/// ```
/// use zonegraph::algo::covreach::{CoveringReachability, Policy};
/// use zonegraph::graph::subsumption::SubsumptionGraph;
/// use zonegraph::system::SystemBuilder;
/// use zonegraph::zg::{Extrapolation, Semantics, ZoneGraph};
/// use zonegraph::{expr, stmt};
///
/// let mut b = SystemBuilder::new("gate");
/// let p = b.add_process("p");
/// let open = b.add_event("open");
/// let x = b.add_clock("x");
/// let goal = b.add_label("goal");
/// let l0 = b.add_location(p, "l0");
/// let l1 = b.add_location(p, "l1");
/// b.set_initial(l0);
/// b.set_location_labels(l1, &[goal]);
/// b.add_edge(p, l0, open, l1, expr::clock_ge(x, 2), stmt::nop());
/// let system = b.build().unwrap();
///
/// let mut zg = ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
/// let mut graph = SubsumptionGraph::for_zone_graph(&zg);
/// let labels = system.label_set(&["goal"]).unwrap();
/// let stats = CoveringReachability::new(Policy::Bfs).run(&mut zg, &mut graph, &labels);
/// assert!(stats.reachable);
/// ```
pub struct CoveringReachability {
    policy: Policy,
    stop: Option<Arc<AtomicBool>>,
}

impl CoveringReachability {
    /// Algorithm with the given waiting-list policy.
    pub fn new(policy: Policy) -> CoveringReachability {
        CoveringReachability { policy, stop: None }
    }

    /// Poll `flag` between node expansions; when observed true, return
    /// partial statistics.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> CoveringReachability {
        self.stop = Some(flag);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Build a covering reachability graph of `ts` from its initial
    /// states, until a state satisfying `labels` is reached or the state
    /// space is exhausted.
    ///
    /// # Arguments
    /// * `ts`: the transition system.
    /// * `graph`: the subsumption graph to build into.
    /// * `labels`: accepting labels; when empty, the whole state space is
    ///   explored.
    ///
    /// # Returns
    /// Statistics, with `reachable` set iff a satisfying state was found.
    pub fn run<TS: Ts>(
        &self,
        ts: &mut TS,
        graph: &mut SubsumptionGraph<TS::State, TS::Transition>,
        labels: &FixedBitSet,
    ) -> Stats {
        let mut stats = Stats::begin();
        let mut waiting: Waiting<NodeIndex> = Waiting::new(self.policy);
        let mut triples = Vec::new();
        let mut covered = Vec::new();

        // Initial nodes, kept only when maximal under the covering order.
        ts.initial(&mut triples);
        for (status, state, _) in triples.drain(..) {
            if !status.is_ok() {
                continue;
            }
            let node = graph.add_node(state);
            if graph.is_covered(node).is_some() {
                graph.remove_node(node);
                stats.covered_states += 1;
            } else {
                graph.flags_mut(node).initial = true;
                waiting.insert(node);
            }
        }

        let mut next_nodes = Vec::new();
        while let Some(node) = waiting.pop() {
            if self.stop_requested() {
                break;
            }
            // The node may have been evicted while waiting.
            if !graph.is_stored(node) {
                continue;
            }
            stats.visited_states += 1;

            if ts.satisfies(graph.state(node), labels) {
                stats.reachable = true;
                break;
            }

            // First expand every successor, so that all edges of `node`
            // exist before any eviction can touch it.
            ts.next(graph.state(node), &mut triples);
            next_nodes.clear();
            for (status, state, transition) in triples.drain(..) {
                if !status.is_ok() {
                    continue;
                }
                stats.visited_transitions += 1;
                let next_node = graph.add_node(state);
                if let Some(covering) = graph.is_covered(next_node) {
                    graph.add_edge(node, covering, EdgeKind::Subsumption, transition);
                    graph.remove_node(next_node);
                    stats.covered_states += 1;
                } else {
                    graph.add_edge(node, next_node, EdgeKind::Actual, transition);
                    next_nodes.push(next_node);
                }
            }

            // Then evict the nodes each maximal successor covers,
            // re-pointing their incoming edges as subsumption edges.
            for &next_node in &next_nodes {
                waiting.insert(next_node);
                if !graph.is_stored(next_node) {
                    continue;
                }
                covered.clear();
                graph.covered_nodes(next_node, &mut covered);
                for &covered_node in &covered {
                    graph.move_incoming_edges(covered_node, next_node, EdgeKind::Subsumption);
                    graph.remove_edges(covered_node);
                    graph.remove_node(covered_node);
                    waiting.remove(&covered_node);
                    stats.covered_states += 1;
                }
            }
        }

        waiting.clear();
        stats.stored_states = graph.node_count();
        stats.finish();
        debug!(
            visited = stats.visited_states,
            stored = stats.stored_states,
            covered = stats.covered_states,
            reachable = stats.reachable,
            "covering reachability done"
        );
        stats
    }
}
