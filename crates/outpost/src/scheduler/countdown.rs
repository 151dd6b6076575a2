// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-key second countdowns driven by an external one-second tick.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Countdowns<K: Ord + Clone> {
    remaining: BTreeMap<K, u64>,
}

impl<K: Ord + Clone> Default for Countdowns<K> {
    fn default() -> Self {
        Self {
            remaining: BTreeMap::new(),
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elapsed<K> {
    /// Keys still running, with their new remaining time.
    pub running: Vec<(K, u64)>,
    /// Keys that reached zero on this tick. They are no longer running.
    pub expired: Vec<K>,
}

impl<K: Ord + Clone> Countdowns<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)start `key` at `secs`. Zero is raised to one so it expires on
    /// the next tick rather than never.
    pub fn start(&mut self, key: K, secs: u64) {
        self.remaining.insert(key, secs.max(1));
    }

    /// Stop `key`. Returns whether it was running.
    pub fn stop(&mut self, key: &K) -> bool {
        self.remaining.remove(key).is_some()
    }

    pub fn remaining(&self, key: &K) -> Option<u64> {
        self.remaining.get(key).copied()
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.remaining.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    pub fn clear(&mut self) {
        self.remaining.clear();
    }

    /// Advance every countdown by one second.
    pub fn tick(&mut self) -> Elapsed<K> {
        let mut running = Vec::new();
        let mut expired = Vec::new();
        for (key, secs) in self.remaining.iter_mut() {
            *secs = secs.saturating_sub(1);
            if *secs == 0 {
                expired.push(key.clone());
            } else {
                running.push((key.clone(), *secs));
            }
        }
        for key in &expired {
            self.remaining.remove(key);
        }
        Elapsed { running, expired }
    }
}
