//! Find table: a hash table of node indices deduplicating nodes under
//! full equality. The graph owning the table supplies the equality test,
//! so the table itself only stores hashes and indices.

use hashbrown::HashMap;

use crate::graph::NodeIndex;

/// A table mapping content hashes to the nodes carrying them.
#[derive(Debug, Default)]
pub struct FindTable {
    buckets: HashMap<u64, Vec<NodeIndex>>,
    len: usize,
}

impl FindTable {
    /// Empty table.
    pub fn new() -> FindTable {
        FindTable::default()
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no node is stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Find a stored node with the given hash accepted by `eq`.
    pub fn find(&self, hash: u64, mut eq: impl FnMut(NodeIndex) -> bool) -> Option<NodeIndex> {
        self.buckets.get(&hash)?.iter().copied().find(|&n| eq(n))
    }

    /// Store a node under its hash. The caller guarantees no equal node is
    /// already stored.
    pub fn insert(&mut self, hash: u64, n: NodeIndex) {
        self.buckets.entry(hash).or_default().push(n);
        self.len += 1;
    }

    /// Drop all stored nodes.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_scans_only_the_hash_bucket() {
        let mut table = FindTable::new();
        let a = NodeIndex::new(0);
        let b = NodeIndex::new(1);
        table.insert(7, a);
        table.insert(9, b);
        assert_eq!(table.find(7, |n| n == a), Some(a));
        assert_eq!(table.find(7, |n| n == b), None);
        assert_eq!(table.find(9, |n| n == b), Some(b));
        assert_eq!(table.len(), 2);
    }
}
