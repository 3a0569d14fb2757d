//! Module that contains lock requests and the structure that orders them.

use crate::{ProcessId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A lock request. Ordered by timestamp, then by process id, so equal timestamps break ties
/// deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "time")]
    pub timestamp: Timestamp,
    #[serde(rename = "processID")]
    pub process_id: ProcessId,
}

impl Request {
    pub fn new(timestamp: Timestamp, process_id: ProcessId) -> Self {
        Self {
            timestamp,
            process_id,
        }
    }
}

/// Outstanding requests ordered by `(timestamp, process_id)`.
#[derive(Debug, Default, Clone)]
pub struct RequestOrder(BTreeSet<Request>);

impl RequestOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request: Request) -> bool {
        self.0.insert(request)
    }

    pub fn peek_min(&self) -> Option<&Request> {
        self.0.first()
    }

    /// Removes every request matching `predicate` and returns them in order.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<Request>
    where
        F: FnMut(&Request) -> bool,
    {
        let removed: Vec<Request> = self.0.iter().copied().filter(|r| predicate(r)).collect();
        for request in &removed {
            self.0.remove(request);
        }
        removed
    }

    /// Empties the structure, yielding requests from oldest to newest.
    pub fn drain(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.0).into_iter().collect()
    }

    pub fn contains(&self, request: &Request) -> bool {
        self.0.contains(request)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
