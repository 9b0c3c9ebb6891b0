//! Bounded dedup queue for websocket emittables.
//!
//! An approximate set: membership only covers the last `size` insertions,
//! with oldest-first eviction. Older duplicates slipping through are
//! harmless — block insertion downstream is idempotent on height.

use std::collections::VecDeque;

/// FIFO of recently seen emittable hashes.
#[derive(Debug)]
pub struct DedupQueue {
    data: VecDeque<String>,
    size: usize,
}

impl DedupQueue {
    pub fn new(size: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(size),
            size,
        }
    }

    /// Record a hash, evicting the oldest entry when full.
    pub fn add(&mut self, hash: String) {
        if self.data.len() >= self.size {
            self.data.pop_front();
        }
        self.data.push_back(hash);
    }

    /// Linear scan over at most `size` entries.
    pub fn has(&self, hash: &str) -> bool {
        self.data.iter().any(|h| h == hash)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
