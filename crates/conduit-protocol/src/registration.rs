// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Declaration a service sends in its `gateway.register` request.
///
/// Unique by `service`; the gateway's registry treats a duplicate name as
/// last-writer-wins (the prior connection is treated as disconnected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ServiceRegistration {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            methods: Vec::new(),
            events: Vec::new(),
            subscriptions: Vec::new(),
            version: None,
        }
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subscriptions(mut self, subs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.subscriptions = subs.into_iter().map(Into::into).collect();
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_all_fields() {
        let reg = ServiceRegistration::new("sessions")
            .with_methods(["session.create", "session.get"])
            .with_events(["session.created"])
            .with_subscriptions(["cron.trigger"]);
        assert_eq!(reg.service, "sessions");
        assert_eq!(reg.methods, vec!["session.create", "session.get"]);
        assert_eq!(reg.events, vec!["session.created"]);
        assert_eq!(reg.subscriptions, vec!["cron.trigger"]);
    }

    #[test]
    fn missing_optional_fields_default_empty() {
        let json = r#"{"service":"bare"}"#;
        let reg: ServiceRegistration = serde_json::from_str(json).unwrap();
        assert!(reg.methods.is_empty());
        assert!(reg.events.is_empty());
        assert!(reg.subscriptions.is_empty());
        assert!(reg.version.is_none());
    }
}
