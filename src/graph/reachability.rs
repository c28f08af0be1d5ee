//! Reachability graphs: nodes deduplicated under full state equality,
//! edges carrying transitions, and a multigraph variant without
//! deduplication for the simulation driver.

use core::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use crate::graph::directed::{Adjacency, EdgeWalker};
use crate::graph::find::FindTable;
use crate::graph::{Direction, EdgeIndex, NodeFlags, NodeIndex};

fn content_hash<S: Hash>(state: &S) -> u64 {
    let mut hasher = DefaultHasher::new();
    state.hash(&mut hasher);
    hasher.finish()
}

/// A graph storing one node per distinct state.
#[derive(Debug)]
pub struct ReachabilityGraph<S, T> {
    states: Vec<S>,
    flags: Vec<NodeFlags>,
    adj: Adjacency<T>,
    find: FindTable,
}

impl<S: Hash + Eq, T> ReachabilityGraph<S, T> {
    /// Add a node for `state`, or return the existing node of an equal
    /// state.
    ///
    /// # Returns
    /// `(is_new, node)`.
    pub fn add_node(&mut self, state: S) -> (bool, NodeIndex) {
        let hash = content_hash(&state);
        if let Some(existing) = self.find.find(hash, |n| self.states[n.index()] == state) {
            return (false, existing);
        }
        let node = self.adj.add_node();
        debug_assert_eq!(node.index(), self.states.len());
        self.states.push(state);
        self.flags.push(NodeFlags::default());
        self.find.insert(hash, node);
        (true, node)
    }
}

impl<S, T> ReachabilityGraph<S, T> {
    /// Empty graph.
    pub fn new() -> ReachabilityGraph<S, T> {
        ReachabilityGraph {
            states: Vec::new(),
            flags: Vec::new(),
            adj: Adjacency::new(),
            find: FindTable::new(),
        }
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.states.len()
    }

    /// Add an edge carrying `transition`.
    pub fn add_edge(&mut self, src: NodeIndex, tgt: NodeIndex, transition: T) -> EdgeIndex {
        self.adj.add_edge(src, tgt, transition)
    }

    /// The state of a node.
    pub fn state(&self, n: NodeIndex) -> &S {
        &self.states[n.index()]
    }

    /// The flags of a node.
    pub fn flags(&self, n: NodeIndex) -> &NodeFlags {
        &self.flags[n.index()]
    }

    /// Mutable flags of a node.
    pub fn flags_mut(&mut self, n: NodeIndex) -> &mut NodeFlags {
        &mut self.flags[n.index()]
    }

    /// Iterator over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> {
        (0..self.states.len()).map(NodeIndex::new)
    }

    /// Outgoing edges of a node.
    pub fn outgoing_edges(&self, n: NodeIndex) -> EdgeWalker<'_, T> {
        self.adj.edges(n, Direction::Outgoing)
    }

    /// Incoming edges of a node.
    pub fn incoming_edges(&self, n: NodeIndex) -> EdgeWalker<'_, T> {
        self.adj.edges(n, Direction::Incoming)
    }

    /// Source node of an edge.
    pub fn edge_src(&self, e: EdgeIndex) -> NodeIndex {
        self.adj.edge_src(e)
    }

    /// Target node of an edge.
    pub fn edge_tgt(&self, e: EdgeIndex) -> NodeIndex {
        self.adj.edge_tgt(e)
    }

    /// The transition carried by an edge.
    pub fn transition(&self, e: EdgeIndex) -> &T {
        self.adj.edge_weight(e)
    }

    /// Drop all nodes and edges.
    pub fn clear(&mut self) {
        self.states.clear();
        self.flags.clear();
        self.adj.clear();
        self.find.clear();
    }
}

impl<S, T> Default for ReachabilityGraph<S, T> {
    fn default() -> Self {
        ReachabilityGraph::new()
    }
}

/// A graph without node deduplication: every `add_node` creates a fresh
/// node. Used by the simulation driver, where revisiting a state must
/// produce a new step in the recorded run.
#[derive(Debug)]
pub struct Multigraph<S, T> {
    states: Vec<S>,
    flags: Vec<NodeFlags>,
    adj: Adjacency<T>,
}

impl<S, T> Multigraph<S, T> {
    /// Empty multigraph.
    pub fn new() -> Multigraph<S, T> {
        Multigraph { states: Vec::new(), flags: Vec::new(), adj: Adjacency::new() }
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.states.len()
    }

    /// Add a fresh node for `state`.
    pub fn add_node(&mut self, state: S) -> NodeIndex {
        let node = self.adj.add_node();
        self.states.push(state);
        self.flags.push(NodeFlags::default());
        node
    }

    /// Add an edge carrying `transition`.
    pub fn add_edge(&mut self, src: NodeIndex, tgt: NodeIndex, transition: T) -> EdgeIndex {
        self.adj.add_edge(src, tgt, transition)
    }

    /// The state of a node.
    pub fn state(&self, n: NodeIndex) -> &S {
        &self.states[n.index()]
    }

    /// The flags of a node.
    pub fn flags(&self, n: NodeIndex) -> &NodeFlags {
        &self.flags[n.index()]
    }

    /// Mutable flags of a node.
    pub fn flags_mut(&mut self, n: NodeIndex) -> &mut NodeFlags {
        &mut self.flags[n.index()]
    }

    /// Iterator over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> {
        (0..self.states.len()).map(NodeIndex::new)
    }

    /// Outgoing edges of a node.
    pub fn outgoing_edges(&self, n: NodeIndex) -> EdgeWalker<'_, T> {
        self.adj.edges(n, Direction::Outgoing)
    }

    /// Incoming edges of a node.
    pub fn incoming_edges(&self, n: NodeIndex) -> EdgeWalker<'_, T> {
        self.adj.edges(n, Direction::Incoming)
    }

    /// Source node of an edge.
    pub fn edge_src(&self, e: EdgeIndex) -> NodeIndex {
        self.adj.edge_src(e)
    }

    /// Target node of an edge.
    pub fn edge_tgt(&self, e: EdgeIndex) -> NodeIndex {
        self.adj.edge_tgt(e)
    }

    /// The transition carried by an edge.
    pub fn transition(&self, e: EdgeIndex) -> &T {
        self.adj.edge_weight(e)
    }
}

impl<S, T> Default for Multigraph<S, T> {
    fn default() -> Self {
        Multigraph::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_states_share_a_node() {
        let mut g: ReachabilityGraph<&str, u32> = ReachabilityGraph::new();
        let (new_a, a) = g.add_node("a");
        let (new_b, b) = g.add_node("b");
        let (new_a2, a2) = g.add_node("a");
        assert!(new_a && new_b && !new_a2);
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn multigraph_never_merges() {
        let mut g: Multigraph<&str, ()> = Multigraph::new();
        let a = g.add_node("a");
        let a2 = g.add_node("a");
        assert_ne!(a, a2);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn edges_connect_nodes() {
        let mut g: ReachabilityGraph<u32, &str> = ReachabilityGraph::new();
        let (_, a) = g.add_node(1);
        let (_, b) = g.add_node(2);
        let e = g.add_edge(a, b, "t");
        assert_eq!(g.edge_src(e), a);
        assert_eq!(g.edge_tgt(e), b);
        assert_eq!(*g.transition(e), "t");
        assert_eq!(g.outgoing_edges(a).collect::<Vec<_>>(), vec![e]);
        assert_eq!(g.incoming_edges(b).collect::<Vec<_>>(), vec![e]);
    }
}
