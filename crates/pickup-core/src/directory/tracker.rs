use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

/// Handle for one issued request. Carries the slot it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket<K> {
    pub key: K,
    seq: u64,
}

/// Last-request-wins bookkeeping per logical query slot.
///
/// Every `begin` supersedes earlier tickets of the same slot. Results are
/// applied only if their ticket is still the latest one issued.
#[derive(Debug)]
pub struct QueryTracker<K> {
    latest: HashMap<K, u64>,
    next_seq: u64,
}

impl<K> Default for QueryTracker<K> {
    fn default() -> Self {
        Self {
            latest: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> QueryTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, key: K) -> Ticket<K> {
        self.next_seq += 1;
        self.latest.insert(key.clone(), self.next_seq);
        Ticket {
            key,
            seq: self.next_seq,
        }
    }

    pub fn is_current(&self, ticket: &Ticket<K>) -> bool {
        self.latest.get(&ticket.key) == Some(&ticket.seq)
    }

    /// Consume a ticket on result arrival. Returns false for superseded results.
    pub fn accept(&mut self, ticket: &Ticket<K>) -> bool {
        if self.is_current(ticket) {
            self.latest.remove(&ticket.key);
            true
        } else {
            debug!(slot = ?ticket.key, "Discarding superseded result");
            false
        }
    }

    /// Whether a request is outstanding for the slot.
    pub fn in_flight(&self, key: &K) -> bool {
        self.latest.contains_key(key)
    }
}
