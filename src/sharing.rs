//! Sharing of immutable objects.
//!
//! Tuples of locations, tuples of edges and integer-variable valuations
//! are interned in a [`SharingTable`]: equal objects are stored once, and
//! the returned [`Shared`] handles compare by pointer. The content hash is
//! computed once at intern time and carried by the handle, so hashing a
//! shared object is a single word read.
//!
//! Tables are scoped to one transition-system instance and mutated only on
//! the owning thread; handles are plain `Rc`s.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Deref;
use std::collections::hash_map::DefaultHasher;
use std::rc::Rc;

use hashbrown::HashMap;

#[derive(Debug)]
struct WithHash<T> {
    hash: u64,
    value: T,
}

/// A handle to an interned object.
///
/// Equality is pointer equality; the hash is the content hash computed
/// when the object was interned.
pub struct Shared<T>(Rc<WithHash<T>>);

impl<T> Shared<T> {
    /// The content hash of the object.
    pub fn content_hash(&self) -> u64 {
        self.0.hash
    }

    /// Whether two handles denote the same interned object.
    pub fn same(a: &Shared<T>, b: &Shared<T>) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(Rc::clone(&self.0))
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0.value
    }
}

impl<T> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Shared<T> {}

impl<T> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.value.fmt(f)
    }
}

/// Deduplication table for immutable objects.
pub struct SharingTable<T> {
    buckets: HashMap<u64, Vec<Shared<T>>>,
}

impl<T: Hash + Eq> SharingTable<T> {
    /// Empty table.
    pub fn new() -> SharingTable<T> {
        SharingTable { buckets: HashMap::new() }
    }

    /// Intern a value: return the existing handle for an equal value, or
    /// store this one.
    pub fn intern(&mut self, value: T) -> Shared<T> {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        let hash = hasher.finish();

        let bucket = self.buckets.entry(hash).or_default();
        for shared in bucket.iter() {
            if **shared == value {
                return shared.clone();
            }
        }
        let shared = Shared(Rc::new(WithHash { hash, value }));
        bucket.push(shared.clone());
        shared
    }

    /// Number of distinct objects stored.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl<T: Hash + Eq> Default for SharingTable<T> {
    fn default() -> Self {
        SharingTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_share_one_object() {
        let mut table = SharingTable::new();
        let a = table.intern(vec![1, 2, 3]);
        let b = table.intern(vec![1, 2, 3]);
        let c = table.intern(vec![4]);
        assert!(Shared::same(&a, &b));
        assert!(!Shared::same(&a, &c));
        assert_eq!(table.len(), 2);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn handles_deref_to_the_value() {
        let mut table = SharingTable::new();
        let a = table.intern(String::from("loc"));
        assert_eq!(a.as_str(), "loc");
    }
}
