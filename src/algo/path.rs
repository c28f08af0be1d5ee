//! Witness-path extraction over built graphs: lasso-shaped witnesses for
//! liveness, finite paths for reachability.
//!
//! Extraction runs on any graph exposing the [`PathGraph`] view. The
//! lasso search is a nested DFS over the stored edges with a single stack
//! of `(node, edge iterator)` entries; filtering predicates on first
//! nodes, final nodes and edges restrict the search (used to impose
//! labels, or to skip subsumption edges).
//!
//! Symbolic witnesses concretise to rational clock valuations through
//! [`crate::dbm::Dbm::constrain_to_single_valuation`].

use hashbrown::{HashMap, HashSet};

use crate::graph::reachability::{Multigraph, ReachabilityGraph};
use crate::graph::subsumption::SubsumptionGraph;
use crate::graph::{EdgeIndex, NodeFlags, NodeIndex};

/// Read-only view of a graph for path extraction.
pub trait PathGraph {
    /// All node identifiers.
    fn node_ids(&self) -> Vec<NodeIndex>;

    /// Outgoing edges of a node.
    fn out_edges(&self, n: NodeIndex) -> Vec<EdgeIndex>;

    /// Incoming edges of a node.
    fn in_edges(&self, n: NodeIndex) -> Vec<EdgeIndex>;

    /// Source node of an edge.
    fn edge_src(&self, e: EdgeIndex) -> NodeIndex;

    /// Target node of an edge.
    fn edge_tgt(&self, e: EdgeIndex) -> NodeIndex;

    /// Exploration flags of a node.
    fn node_flags(&self, n: NodeIndex) -> &NodeFlags;
}

impl<S, T> PathGraph for ReachabilityGraph<S, T> {
    fn node_ids(&self) -> Vec<NodeIndex> {
        self.nodes().collect()
    }

    fn out_edges(&self, n: NodeIndex) -> Vec<EdgeIndex> {
        self.outgoing_edges(n).collect()
    }

    fn in_edges(&self, n: NodeIndex) -> Vec<EdgeIndex> {
        self.incoming_edges(n).collect()
    }

    fn edge_src(&self, e: EdgeIndex) -> NodeIndex {
        ReachabilityGraph::edge_src(self, e)
    }

    fn edge_tgt(&self, e: EdgeIndex) -> NodeIndex {
        ReachabilityGraph::edge_tgt(self, e)
    }

    fn node_flags(&self, n: NodeIndex) -> &NodeFlags {
        self.flags(n)
    }
}

impl<S, T> PathGraph for Multigraph<S, T> {
    fn node_ids(&self) -> Vec<NodeIndex> {
        self.nodes().collect()
    }

    fn out_edges(&self, n: NodeIndex) -> Vec<EdgeIndex> {
        self.outgoing_edges(n).collect()
    }

    fn in_edges(&self, n: NodeIndex) -> Vec<EdgeIndex> {
        self.incoming_edges(n).collect()
    }

    fn edge_src(&self, e: EdgeIndex) -> NodeIndex {
        Multigraph::edge_src(self, e)
    }

    fn edge_tgt(&self, e: EdgeIndex) -> NodeIndex {
        Multigraph::edge_tgt(self, e)
    }

    fn node_flags(&self, n: NodeIndex) -> &NodeFlags {
        self.flags(n)
    }
}

impl<S, T> PathGraph for SubsumptionGraph<S, T> {
    fn node_ids(&self) -> Vec<NodeIndex> {
        self.nodes().collect()
    }

    fn out_edges(&self, n: NodeIndex) -> Vec<EdgeIndex> {
        self.outgoing_edges(n).collect()
    }

    fn in_edges(&self, n: NodeIndex) -> Vec<EdgeIndex> {
        self.incoming_edges(n).collect()
    }

    fn edge_src(&self, e: EdgeIndex) -> NodeIndex {
        SubsumptionGraph::edge_src(self, e)
    }

    fn edge_tgt(&self, e: EdgeIndex) -> NodeIndex {
        SubsumptionGraph::edge_tgt(self, e)
    }

    fn node_flags(&self, n: NodeIndex) -> &NodeFlags {
        self.flags(n)
    }
}

/// A lasso-shaped witness: edges of the prefix, then edges of the cycle.
#[derive(Debug, Default)]
pub struct LassoEdges {
    /// Edges leading from the first node to the loop root.
    pub prefix: Vec<EdgeIndex>,
    /// Edges of the cycle, starting and ending at the loop root.
    pub cycle: Vec<EdgeIndex>,
}

impl LassoEdges {
    /// Whether no lasso was found.
    pub fn is_empty(&self) -> bool {
        self.cycle.is_empty()
    }
}

struct DfsEntry {
    node: NodeIndex,
    edges: Vec<EdgeIndex>,
    next: usize,
}

impl DfsEntry {
    fn new<G: PathGraph>(g: &G, node: NodeIndex) -> DfsEntry {
        DfsEntry { node, edges: g.out_edges(node), next: 0 }
    }

    fn pick(&mut self) -> Option<EdgeIndex> {
        let e = self.edges.get(self.next).copied();
        self.next += 1;
        e
    }
}

/// Lasso extraction over a built graph.
pub struct LassoExtraction;

impl LassoExtraction {
    /// Extract a lasso whose edges all satisfy `filter_edge`, starting
    /// from a node satisfying `filter_first`, with a node satisfying
    /// `filter_final` on the blue path whose inner search closes the
    /// cycle.
    ///
    /// # Returns
    /// The lasso, or an empty one when no such lasso exists.
    pub fn run<G: PathGraph>(
        g: &G,
        filter_first: impl Fn(&G, NodeIndex) -> bool,
        filter_final: impl Fn(&G, NodeIndex) -> bool,
        filter_edge: impl Fn(&G, EdgeIndex) -> bool,
    ) -> LassoEdges {
        let mut cyan = HashSet::new();
        let mut blue = HashSet::new();
        let mut red = HashSet::new();

        for n in g.node_ids() {
            if !filter_first(g, n) || blue.contains(&n) {
                continue;
            }
            let edges =
                blue_dfs(g, n, &filter_final, &filter_edge, &mut cyan, &mut blue, &mut red);
            if let Some(edges) = edges {
                return split_lasso(g, edges);
            }
        }
        LassoEdges::default()
    }
}

/// Split a raw edge sequence, whose last edge closes the cycle, into
/// prefix and cycle at the loop root.
fn split_lasso<G: PathGraph>(g: &G, edges: Vec<EdgeIndex>) -> LassoEdges {
    let mut lasso = LassoEdges::default();
    let loop_root = g.edge_tgt(*edges.last().expect("lasso edges cannot be empty"));
    let first = g.edge_src(edges[0]);

    let mut it = edges.into_iter();
    if loop_root != first {
        for e in it.by_ref() {
            lasso.prefix.push(e);
            if g.edge_tgt(e) == loop_root {
                break;
            }
        }
    }
    lasso.cycle.extend(it);
    lasso
}

/// Outer search: returns the blue-stack edges extended with the inner
/// cycle edges when a lasso is found.
fn blue_dfs<G: PathGraph>(
    g: &G,
    root: NodeIndex,
    filter_final: &impl Fn(&G, NodeIndex) -> bool,
    filter_edge: &impl Fn(&G, EdgeIndex) -> bool,
    cyan: &mut HashSet<NodeIndex>,
    blue: &mut HashSet<NodeIndex>,
    red: &mut HashSet<NodeIndex>,
) -> Option<Vec<EdgeIndex>> {
    let mut stack = vec![DfsEntry::new(g, root)];
    let mut edges: Vec<EdgeIndex> = Vec::new();
    cyan.insert(root);

    loop {
        let (node, picked) = match stack.last_mut() {
            None => break,
            Some(entry) => (entry.node, entry.pick()),
        };
        match picked {
            Some(edge) => {
                if !filter_edge(g, edge) {
                    continue;
                }
                let next = g.edge_tgt(edge);
                if !cyan.contains(&next) && !blue.contains(&next) {
                    stack.push(DfsEntry::new(g, next));
                    cyan.insert(next);
                    edges.push(edge);
                }
            }
            None => {
                if filter_final(g, node) {
                    if let Some(red_edges) = red_dfs(g, node, filter_edge, cyan, red) {
                        edges.extend(red_edges);
                        return Some(edges);
                    }
                }
                blue.insert(node);
                cyan.remove(&node);
                stack.pop();
                edges.pop();
            }
        }
    }
    debug_assert!(edges.is_empty());
    None
}

/// Inner search: a path of stored edges from `root` to any cyan node.
fn red_dfs<G: PathGraph>(
    g: &G,
    root: NodeIndex,
    filter_edge: &impl Fn(&G, EdgeIndex) -> bool,
    cyan: &HashSet<NodeIndex>,
    red: &mut HashSet<NodeIndex>,
) -> Option<Vec<EdgeIndex>> {
    let mut stack = vec![DfsEntry::new(g, root)];
    let mut edges: Vec<EdgeIndex> = Vec::new();
    red.insert(root);

    loop {
        let picked = match stack.last_mut() {
            None => break,
            Some(entry) => entry.pick(),
        };
        match picked {
            Some(edge) => {
                if !filter_edge(g, edge) {
                    continue;
                }
                let next = g.edge_tgt(edge);
                if cyan.contains(&next) {
                    edges.push(edge);
                    return Some(edges);
                }
                if !red.contains(&next) {
                    stack.push(DfsEntry::new(g, next));
                    red.insert(next);
                    edges.push(edge);
                }
            }
            None => {
                stack.pop();
                edges.pop();
            }
        }
    }
    debug_assert!(edges.is_empty());
    None
}

/// A finite path from an initial node to `target` over edges satisfying
/// `filter_edge`, or `None` when covering broke the actual-edge ancestry
/// of `target`.
///
/// Backward breadth-first search over incoming edges, so the returned
/// path is shortest in edge count.
pub fn finite_path<G: PathGraph>(
    g: &G,
    target: NodeIndex,
    filter_edge: impl Fn(&G, EdgeIndex) -> bool,
) -> Option<Vec<EdgeIndex>> {
    let mut parent: HashMap<NodeIndex, EdgeIndex> = HashMap::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(target);
    let mut start = None;

    if g.node_flags(target).initial {
        return Some(Vec::new());
    }

    'search: while let Some(n) = queue.pop_front() {
        for e in g.in_edges(n) {
            if !filter_edge(g, e) {
                continue;
            }
            let src = g.edge_src(e);
            if parent.contains_key(&src) || src == target {
                continue;
            }
            parent.insert(src, e);
            if g.node_flags(src).initial {
                start = Some(src);
                break 'search;
            }
            queue.push_back(src);
        }
    }

    let mut node = start?;
    let mut path = Vec::new();
    while node != target {
        let e = parent[&node];
        path.push(e);
        node = g.edge_tgt(e);
    }
    Some(path)
}
