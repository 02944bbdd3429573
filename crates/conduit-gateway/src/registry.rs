// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use conduit_protocol::ServiceRegistration;

use crate::connection::ConnectionId;

/// Tracks which connection owns which [`ServiceRegistration`].
///
/// A duplicate service name replaces the prior entry (last-writer-wins); the
/// caller is responsible for treating the prior connection as disconnected
/// (the [`Gateway`](crate::Gateway) does this by tearing down its router
/// entries before installing the new registration).
#[derive(Debug, Default)]
pub struct Registry {
    by_conn: HashMap<ConnectionId, ServiceRegistration>,
    by_service: HashMap<String, ConnectionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a registration, returning the previous owner (if the service
    /// name was already registered to a different connection).
    pub fn insert(&mut self, conn: ConnectionId, reg: ServiceRegistration) -> Option<ConnectionId> {
        let prior = self.by_service.insert(reg.service.clone(), conn);
        self.by_conn.insert(conn, reg);
        prior.filter(|p| *p != conn)
    }

    pub fn remove(&mut self, conn: ConnectionId) -> Option<ServiceRegistration> {
        let reg = self.by_conn.remove(&conn)?;
        // Only remove the by_service entry if it still points at this conn
        // (a later register() for the same name may have already replaced it).
        if self.by_service.get(&reg.service) == Some(&conn) {
            self.by_service.remove(&reg.service);
        }
        Some(reg)
    }

    pub fn get(&self, conn: ConnectionId) -> Option<&ServiceRegistration> {
        self.by_conn.get(&conn)
    }

    pub fn conn_for_service(&self, service: &str) -> Option<ConnectionId> {
        self.by_service.get(service).copied()
    }

    pub fn resolve_source(&self, conn: ConnectionId, fallback: &str) -> String {
        self.by_conn
            .get(&conn)
            .map(|r| r.service.clone())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_service.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_live(&self, conn: ConnectionId) -> bool {
        self.by_conn.contains_key(&conn)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
