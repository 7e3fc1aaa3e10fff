//! Storage collaborator seam.
//!
//! The overlay decides *who* owns a key; storing and replicating the data
//! behind the key is a separate component's job. This module defines the
//! contract the membership protocol drives during key migration, plus an
//! in-memory implementation used by tests and demos.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::common::{Id, RingSpace};

/// What the membership protocol needs from a storage component.
///
/// Keys lost with a failed node are *not* recovered through this interface;
/// that is the replication layer's responsibility.
pub trait Storage: std::fmt::Debug + Send {
    /// Move every key in the circular range `(after, upto]` from `source`'s
    /// store to `dest`'s.
    fn migrate_range(&mut self, source: Id, dest: Id, after: Id, upto: Id, space: &RingSpace);

    /// Does `node` currently hold `key`?
    fn owns(&self, node: Id, key: Id) -> bool;

    /// Record `key` under `node`.
    fn insert(&mut self, node: Id, key: Id);

    /// Keys currently held by `node`, in ascending order.
    fn keys(&self, node: Id) -> Vec<Id>;

    /// Forget a destroyed node's holdings.
    fn drop_node(&mut self, node: Id);
}

/// Plain in-process key placement table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    held: HashMap<Id, BTreeSet<Id>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            held: HashMap::new(),
        }
    }
}

impl Storage for MemoryStore {
    fn migrate_range(&mut self, source: Id, dest: Id, after: Id, upto: Id, space: &RingSpace) {
        if source == dest {
            return;
        }

        let moved: Vec<Id> = match self.held.get(&source) {
            Some(keys) => keys
                .iter()
                .copied()
                .filter(|k| space.between_right_incl(after, upto, *k))
                .collect(),
            None => return,
        };

        if moved.is_empty() {
            return;
        }

        if let Some(keys) = self.held.get_mut(&source) {
            for k in &moved {
                keys.remove(k);
            }
        }

        let dest_keys = self.held.entry(dest).or_default();
        for k in &moved {
            dest_keys.insert(*k);
        }

        debug!(%source, %dest, count = moved.len(), "migrated key range");
    }

    fn owns(&self, node: Id, key: Id) -> bool {
        self.held
            .get(&node)
            .map(|keys| keys.contains(&key))
            .unwrap_or(false)
    }

    fn insert(&mut self, node: Id, key: Id) {
        self.held.entry(node).or_default().insert(key);
    }

    fn keys(&self, node: Id) -> Vec<Id> {
        self.held
            .get(&node)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    fn drop_node(&mut self, node: Id) {
        self.held.remove(&node);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn migrate_moves_only_the_range() {
        let space = RingSpace::new(4).unwrap();
        let mut store = MemoryStore::new();

        for key in [1u64, 2, 5, 7, 8, 12] {
            store.insert(Id(8), Id(key));
        }

        // Keys in (0, 2] move from node 8 to node 2.
        store.migrate_range(Id(8), Id(2), Id(0), Id(2), &space);

        assert_eq!(store.keys(Id(2)), vec![Id(1), Id(2)]);
        assert_eq!(store.keys(Id(8)), vec![Id(5), Id(7), Id(8), Id(12)]);
        assert!(store.owns(Id(2), Id(1)));
        assert!(!store.owns(Id(8), Id(1)));
    }

    #[test]
    fn migrate_handles_wrapped_ranges() {
        let space = RingSpace::new(4).unwrap();
        let mut store = MemoryStore::new();

        for key in [13u64, 15, 0, 2, 6] {
            store.insert(Id(4), Id(key));
        }

        // (12, 2] wraps through zero.
        store.migrate_range(Id(4), Id(2), Id(12), Id(2), &space);

        assert_eq!(store.keys(Id(2)), vec![Id(0), Id(2), Id(13), Id(15)]);
        assert_eq!(store.keys(Id(4)), vec![Id(6)]);
    }

    #[test]
    fn drop_node_forgets_holdings() {
        let space = RingSpace::new(4).unwrap();
        let mut store = MemoryStore::new();

        store.insert(Id(4), Id(1));
        store.drop_node(Id(4));

        assert!(store.keys(Id(4)).is_empty());
        store.migrate_range(Id(4), Id(8), Id(0), Id(15), &space);
        assert!(store.keys(Id(8)).is_empty());
    }
}
