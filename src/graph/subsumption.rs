//! Subsumption graph: node covering plus actual/subsumption edges.
//!
//! Nodes are bucketed in a [`CoverTable`] under a caller-supplied hash
//! (for zone graphs, the discrete part of the state) and compared with a
//! caller-supplied covering predicate. Edges carry a transition and a
//! kind; covering reachability re-types the incoming edges of an evicted
//! node into subsumption edges of its covering node.

use crate::graph::cover::CoverTable;
use crate::graph::directed::{Adjacency, EdgeWalker};
use crate::graph::{Direction, EdgeIndex, EdgeKind, NodeFlags, NodeIndex};

/// Hash function over states.
pub type NodeHashFn<S> = Box<dyn Fn(&S) -> u64>;

/// Covering predicate over states: `le(s1, s2)` means `s1` is covered by
/// `s2`.
pub type NodeLeFn<S> = Box<dyn Fn(&S, &S) -> bool>;

struct SubEdge<T> {
    kind: EdgeKind,
    transition: T,
}

/// A graph with node covering and two kinds of edges.
pub struct SubsumptionGraph<S, T> {
    states: Vec<S>,
    flags: Vec<NodeFlags>,
    adj: Adjacency<SubEdge<T>>,
    cover: CoverTable,
    hash_fn: NodeHashFn<S>,
    le_fn: NodeLeFn<S>,
}

impl<S, T> SubsumptionGraph<S, T> {
    /// Graph with `table_size` cover buckets, a node hash and a covering
    /// predicate.
    ///
    /// For the answers of covering reachability to be complete, `le` must
    /// be a trace inclusion; for termination it must be a well-quasi-order
    /// on the reachable states.
    pub fn new(table_size: usize, hash_fn: NodeHashFn<S>, le_fn: NodeLeFn<S>) -> Self {
        SubsumptionGraph {
            states: Vec::new(),
            flags: Vec::new(),
            adj: Adjacency::new(),
            cover: CoverTable::new(table_size),
            hash_fn,
            le_fn,
        }
    }

    /// Number of stored nodes (evicted nodes are not counted).
    pub fn node_count(&self) -> usize {
        self.cover.len()
    }

    /// Add a node for `state`. Nodes are not deduplicated: covering
    /// reachability evicts covered nodes explicitly.
    pub fn add_node(&mut self, state: S) -> NodeIndex {
        let hash = (self.hash_fn)(&state);
        let node = self.adj.add_node();
        debug_assert_eq!(node.index(), self.states.len());
        self.states.push(state);
        self.flags.push(NodeFlags::default());
        self.cover.add(node, hash);
        node
    }

    /// Add an edge of the given kind.
    ///
    /// # Panics
    /// Panics (debug) if either endpoint is not stored.
    pub fn add_edge(
        &mut self,
        src: NodeIndex,
        tgt: NodeIndex,
        kind: EdgeKind,
        transition: T,
    ) -> EdgeIndex {
        debug_assert!(self.cover.is_stored(src) && self.cover.is_stored(tgt));
        self.adj.add_edge(src, tgt, SubEdge { kind, transition })
    }

    /// Find a node covering `n`, other than `n` itself.
    pub fn is_covered(&self, n: NodeIndex) -> Option<NodeIndex> {
        let state = &self.states[n.index()];
        let hash = (self.hash_fn)(state);
        self.cover
            .bucket_of_hash(hash)
            .iter()
            .copied()
            .find(|&m| m != n && (self.le_fn)(state, &self.states[m.index()]))
    }

    /// Collect the stored nodes covered by `n`, other than `n` itself.
    pub fn covered_nodes(&self, n: NodeIndex, out: &mut Vec<NodeIndex>) {
        let state = &self.states[n.index()];
        let hash = (self.hash_fn)(state);
        for &m in self.cover.bucket_of_hash(hash) {
            if m != n && (self.le_fn)(&self.states[m.index()], state) {
                out.push(m);
            }
        }
    }

    /// Remove a stored node.
    ///
    /// # Panics
    /// Panics if the node still has edges, or is not stored.
    pub fn remove_node(&mut self, n: NodeIndex) {
        if !self.adj.is_detached(n) {
            panic!("removing a node that is still connected");
        }
        self.cover.remove(n);
    }

    /// Remove all edges of a node.
    pub fn remove_edges(&mut self, n: NodeIndex) {
        self.adj.remove_edges(n);
    }

    /// Move all incoming edges of `n1` onto `n2`, re-typing them to
    /// `kind`.
    pub fn move_incoming_edges(&mut self, n1: NodeIndex, n2: NodeIndex, kind: EdgeKind) {
        let mut e = self.adj.first_edge(n1, Direction::Incoming);
        while e != EdgeIndex::END {
            self.adj.edge_weight_mut(e).kind = kind;
            e = self.adj.next_edge(e, Direction::Incoming);
        }
        self.adj.move_incoming_edges(n1, n2);
    }

    /// The state of a node (stored or evicted).
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

    /// Whether a node is currently stored.
    pub fn is_stored(&self, n: NodeIndex) -> bool {
        self.cover.is_stored(n)
    }

    /// Iterator over the stored nodes.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.cover.iter()
    }

    /// Outgoing edges of a node.
    pub fn outgoing_edges(&self, n: NodeIndex) -> SubsumptionEdges<'_, T> {
        SubsumptionEdges { inner: self.adj.edges(n, Direction::Outgoing) }
    }

    /// Incoming edges of a node.
    pub fn incoming_edges(&self, n: NodeIndex) -> SubsumptionEdges<'_, T> {
        SubsumptionEdges { inner: self.adj.edges(n, Direction::Incoming) }
    }

    /// Source node of an edge.
    pub fn edge_src(&self, e: EdgeIndex) -> NodeIndex {
        self.adj.edge_src(e)
    }

    /// Target node of an edge.
    pub fn edge_tgt(&self, e: EdgeIndex) -> NodeIndex {
        self.adj.edge_tgt(e)
    }

    /// Kind of an edge.
    pub fn edge_kind(&self, e: EdgeIndex) -> EdgeKind {
        self.adj.edge_weight(e).kind
    }

    /// The transition carried by an edge.
    pub fn transition(&self, e: EdgeIndex) -> &T {
        &self.adj.edge_weight(e).transition
    }

    /// Drop all nodes and edges.
    pub fn clear(&mut self) {
        self.states.clear();
        self.flags.clear();
        self.adj.clear();
        self.cover.clear();
    }
}

/// Iterator over the edges of one node of a subsumption graph.
pub struct SubsumptionEdges<'a, T> {
    inner: EdgeWalker<'a, SubEdge<T>>,
}

impl<T> Iterator for SubsumptionEdges<'_, T> {
    type Item = EdgeIndex;

    fn next(&mut self) -> Option<EdgeIndex> {
        self.inner.next()
    }
}
