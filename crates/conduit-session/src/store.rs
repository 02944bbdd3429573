// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Session store contract (spec §4.5) plus a file-backed YAML
//! implementation, the default persistence for `session.*` state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session '{0}' was deleted concurrently")]
    DeletedConcurrently(String),
    #[error("session '{0}' already exists with messages")]
    AlreadyExists(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Main,
    Subagent,
    Cron,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_key: String,
    pub label: Option<String>,
    pub agent_id: Option<String>,
    pub kind: SessionKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Session {
    pub fn new(session_key: impl Into<String>, kind: SessionKind, now: DateTime<Utc>) -> Self {
        Self {
            session_key: session_key.into(),
            label: None,
            agent_id: None,
            kind,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub session_key: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Patch applied by [`SessionStore::update`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub label: Option<Option<String>>,
    pub agent_id: Option<Option<String>>,
    pub metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub kind: Option<SessionKind>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub limit: Option<usize>,
    pub before: Option<DateTime<Utc>>,
}

/// Event the store side-reports so a caller (the sessions service) can
/// decide whether to emit `session.created` / `session.message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExistsEmpty,
    AlreadyExistsWithMessages,
}

/// The semantic contract shared by every persistence backend (spec §4.5).
///
/// `create` is "ensure-exists-without-truncation": an existing session with
/// messages is never wiped (Open Question resolved in DESIGN.md).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> Result<CreateOutcome, StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Session>, StoreError>;
    async fn update(&self, key: &str, patch: SessionPatch) -> Result<Option<Session>, StoreError>;
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    async fn list(&self, filter: ListFilter) -> Result<Vec<Session>, StoreError>;
    async fn add_message(&self, session_key: &str, role: MessageRole, content: String, metadata: Option<Value>) -> Result<SessionMessage, StoreError>;
    async fn get_messages(&self, key: &str, filter: MessageFilter) -> Result<Vec<SessionMessage>, StoreError>;
}

#[derive(Debug, Default)]
struct SessionRecord {
    session: Session,
    messages: Vec<SessionMessage>,
}

/// File-backed `SessionStore`: one YAML document per session under
/// `root/<sanitized-key>.yaml`, guarded by an in-process mutex for the
/// create-convergence and total-ordering invariants (spec §4.5's
/// "internal lock map" option).
pub struct FileSessionStore {
    root: PathBuf,
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl FileSessionStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Arc<Self>, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let mut records = HashMap::new();
        if root.is_dir() {
            for entry in std::fs::read_dir(&root)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                    continue;
                }
                let text = std::fs::read_to_string(&path)?;
                if let Ok(record) = serde_yaml::from_str::<OnDiskRecord>(&text) {
                    records.insert(
                        record.session.session_key.clone(),
                        SessionRecord {
                            session: record.session,
                            messages: record.messages,
                        },
                    );
                }
            }
        }
        Ok(Arc::new(Self {
            root,
            records: Mutex::new(records),
        }))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.yaml", sanitize(key)))
    }

    async fn persist(&self, key: &str, record: &SessionRecord) -> Result<(), StoreError> {
        let on_disk = OnDiskRecord {
            session: record.session.clone(),
            messages: record.messages.clone(),
        };
        let text = serde_yaml::to_string(&on_disk)?;
        let path = self.path_for(key);
        // Write-then-rename keeps a crash from ever leaving a half-written file.
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn remove_file(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OnDiskRecord {
    session: Session,
    messages: Vec<SessionMessage>,
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, session: Session) -> Result<CreateOutcome, StoreError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(&session.session_key) {
            if existing.messages.is_empty() {
                return Ok(CreateOutcome::AlreadyExistsEmpty);
            }
            return Ok(CreateOutcome::AlreadyExistsWithMessages);
        }
        let key = session.session_key.clone();
        let record = SessionRecord {
            session,
            messages: Vec::new(),
        };
        self.persist(&key, &record).await?;
        records.insert(key, record);
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, key: &str) -> Result<Option<Session>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(key).map(|r| r.session.clone()))
    }

    async fn update(&self, key: &str, patch: SessionPatch) -> Result<Option<Session>, StoreError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(key) else {
            return Ok(None);
        };
        if let Some(label) = patch.label {
            record.session.label = label;
        }
        if let Some(agent_id) = patch.agent_id {
            record.session.agent_id = agent_id;
        }
        if let Some(metadata) = patch.metadata {
            record.session.metadata.extend(metadata);
        }
        record.session.updated_at = Utc::now();
        let snapshot = record.session.clone();
        self.persist(key, record).await?;
        Ok(Some(snapshot))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let existed = records.remove(key).is_some();
        if existed {
            self.remove_file(key).await?;
        }
        Ok(existed)
    }

    async fn list(&self, filter: ListFilter) -> Result<Vec<Session>, StoreError> {
        let records = self.records.lock().await;
        let mut sessions: Vec<Session> = records
            .values()
            .map(|r| r.session.clone())
            .filter(|s| filter.kind.map(|k| k == s.kind).unwrap_or(true))
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = filter.limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    async fn add_message(&self, session_key: &str, role: MessageRole, content: String, metadata: Option<Value>) -> Result<SessionMessage, StoreError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(session_key) else {
            return Err(StoreError::DeletedConcurrently(session_key.to_string()));
        };
        let message = SessionMessage {
            id: Uuid::new_v4().to_string(),
            session_key: session_key.to_string(),
            role,
            content,
            timestamp: Utc::now(),
            metadata,
        };
        record.messages.push(message.clone());
        record.session.updated_at = message.timestamp;
        self.persist(session_key, record).await?;
        debug!(session = %session_key, "appended session message");
        Ok(message)
    }

    async fn get_messages(&self, key: &str, filter: MessageFilter) -> Result<Vec<SessionMessage>, StoreError> {
        let records = self.records.lock().await;
        let Some(record) = records.get(key) else {
            return Ok(Vec::new());
        };
        let mut messages: Vec<SessionMessage> = record
            .messages
            .iter()
            .filter(|m| filter.before.map(|b| m.timestamp < b).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let start = messages.len().saturating_sub(limit);
            messages = messages.split_off(start);
        }
        Ok(messages)
    }
}

/// Convenience constructor pointing at the conventional
/// `paths.workspace/.conduit/sessions` directory (spec §6).
pub fn default_root(workspace: &Path) -> PathBuf {
    workspace.join(".conduit").join("sessions")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Arc<FileSessionStore> {
        let dir = tempfile::tempdir().unwrap();
        FileSessionStore::open(dir.keep()).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = store().await;
        let now = Utc::now();
        let outcome = store
            .create(Session::new("cli:x", SessionKind::Main, now))
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Created);
        let got = store.get("cli:x").await.unwrap().unwrap();
        assert_eq!(got.session_key, "cli:x");
    }

    #[tokio::test]
    async fn create_is_noop_when_session_already_has_messages() {
        let store = store().await;
        let now = Utc::now();
        store.create(Session::new("cli:x", SessionKind::Main, now)).await.unwrap();
        store.add_message("cli:x", MessageRole::User, "hi".into(), None).await.unwrap();

        let outcome = store.create(Session::new("cli:x", SessionKind::Main, now)).await.unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExistsWithMessages);
        let messages = store.get_messages("cli:x", MessageFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 1, "create must not wipe existing messages");
    }

    #[tokio::test]
    async fn add_message_refreshes_updated_at_and_preserves_order() {
        let store = store().await;
        let now = Utc::now();
        store.create(Session::new("cli:x", SessionKind::Main, now)).await.unwrap();
        store.add_message("cli:x", MessageRole::User, "one".into(), None).await.unwrap();
        store.add_message("cli:x", MessageRole::Assistant, "two".into(), None).await.unwrap();

        let messages = store.get_messages("cli:x", MessageFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "one");
        assert_eq!(messages[1].content, "two");
    }

    #[tokio::test]
    async fn add_message_fails_if_session_deleted() {
        let store = store().await;
        let result = store.add_message("nope", MessageRole::User, "hi".into(), None).await;
        assert!(matches!(result, Err(StoreError::DeletedConcurrently(_))));
    }

    #[tokio::test]
    async fn delete_removes_session_and_messages() {
        let store = store().await;
        let now = Utc::now();
        store.create(Session::new("cli:x", SessionKind::Main, now)).await.unwrap();
        store.add_message("cli:x", MessageRole::User, "hi".into(), None).await.unwrap();

        assert!(store.delete("cli:x").await.unwrap());
        assert!(store.get("cli:x").await.unwrap().is_none());
        assert!(!store.delete("cli:x").await.unwrap());
    }

    #[tokio::test]
    async fn list_is_newest_first_by_updated_at() {
        let store = store().await;
        let now = Utc::now();
        store.create(Session::new("cli:a", SessionKind::Main, now)).await.unwrap();
        store.create(Session::new("cli:b", SessionKind::Main, now)).await.unwrap();
        store.add_message("cli:b", MessageRole::User, "bump".into(), None).await.unwrap();

        let sessions = store.list(ListFilter::default()).await.unwrap();
        assert_eq!(sessions[0].session_key, "cli:b");
    }

    #[tokio::test]
    async fn reopen_recovers_sessions_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.keep();
        {
            let store = FileSessionStore::open(path.clone()).await.unwrap();
            store.create(Session::new("cli:x", SessionKind::Main, Utc::now())).await.unwrap();
            store.add_message("cli:x", MessageRole::User, "hi".into(), None).await.unwrap();
        }
        let reopened = FileSessionStore::open(path).await.unwrap();
        let messages = reopened.get_messages("cli:x", MessageFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}
