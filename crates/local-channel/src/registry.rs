//! The set of live Local pairs.
//!
//! Used only for enumeration: CLI listings, device state scans and the
//! manager surface. A pair is a member from allocation until its hangup
//! completes. The registry lock sits above the pair mutex in the lock
//! hierarchy, so enumeration snapshots the set first and locks pairs after.

use std::sync::Arc;

use dashmap::DashMap;

use crate::pair::{LocalPair, PairId};

/// Live pairs owned by one driver instance.
#[derive(Default)]
pub struct LocalRegistry {
    pairs: DashMap<PairId, Arc<LocalPair>>,
}

impl LocalRegistry {
    pub(crate) fn new() -> LocalRegistry {
        LocalRegistry {
            pairs: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, pair: Arc<LocalPair>) {
        self.pairs.insert(pair.id(), pair);
    }

    pub(crate) fn remove(&self, id: PairId) -> Option<Arc<LocalPair>> {
        self.pairs.remove(&id).map(|(_, pair)| pair)
    }

    /// Is this pair a live member? Guards the manager surface against
    /// channels that belong to other drivers or are already torn down.
    pub fn contains(&self, id: PairId) -> bool {
        self.pairs.contains_key(&id)
    }

    /// Clone out the current membership for enumeration without holding the
    /// registry lock across per-pair work.
    pub fn snapshot(&self) -> Vec<Arc<LocalPair>> {
        self.pairs.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
