// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};

use crate::connection::ConnectionId;

/// Method-name → owning connection, and event-name → subscriber set.
///
/// Invariant: every method name is owned by exactly one connection at a
/// time (the last `register` to claim it wins); disconnection removes all
/// entries owned by that connection.
#[derive(Debug, Default)]
pub struct Router {
    methods: HashMap<String, ConnectionId>,
    subscribers: HashMap<String, HashSet<ConnectionId>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim_methods(&mut self, conn: ConnectionId, methods: &[String]) {
        for m in methods {
            self.methods.insert(m.clone(), conn);
        }
    }

    pub fn subscribe(&mut self, conn: ConnectionId, events: &[String]) {
        for e in events {
            self.subscribers.entry(e.clone()).or_default().insert(conn);
        }
    }

    pub fn owner_of(&self, method: &str) -> Option<ConnectionId> {
        self.methods.get(method).copied()
    }

    pub fn subscribers_of(&self, event: &str) -> Vec<ConnectionId> {
        self.subscribers
            .get(event)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove every entry owned by `conn` (methods it owns, subscriptions it holds).
    pub fn disconnect(&mut self, conn: ConnectionId) {
        self.methods.retain(|_, owner| *owner != conn);
        for subs in self.subscribers.values_mut() {
            subs.remove(&conn);
        }
    }

    pub fn method_owners_snapshot(&self) -> Vec<(String, ConnectionId)> {
        let mut v: Vec<_> = self.methods.iter().map(|(k, v)| (k.clone(), *v)).collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    }

    pub fn event_names_snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self.subscribers.keys().cloned().collect();
        names.sort();
        names
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
