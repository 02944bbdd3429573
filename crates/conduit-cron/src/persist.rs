// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! File-backed [`PersistHook`]: the non-ephemeral task set as one YAML
//! document, written with the same write-then-rename discipline as
//! `conduit_session::store::FileSessionStore`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use crate::scheduler::PersistHook;
use crate::task::CronTask;

pub struct FileCronPersist {
    path: PathBuf,
}

impl FileCronPersist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the persisted task set, or an empty vec if no file exists yet.
    pub fn load(&self) -> std::io::Result<Vec<CronTask>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(serde_yaml::from_str(&text).unwrap_or_default())
    }
}

#[async_trait]
impl PersistHook for FileCronPersist {
    async fn persist(&self, tasks: &[CronTask]) {
        let Ok(yaml) = serde_yaml::to_string(tasks) else {
            warn!("failed to serialize cron task set");
            return;
        };
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create cron persistence directory");
                return;
            }
        }
        let tmp = self.path.with_extension("yaml.tmp");
        if let Err(e) = std::fs::write(&tmp, yaml) {
            warn!(error = %e, "failed to write cron task file");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            warn!(error = %e, "failed to rename cron task file into place");
        }
    }
}

/// Convenience constructor pointing at the conventional
/// `paths.workspace/.conduit/cron.yaml` location (spec §6).
pub fn default_path(workspace: &Path) -> PathBuf {
    workspace.join(".conduit").join("cron.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{CronTask, CronTaskInput};

    fn task(id: &str) -> CronTask {
        CronTask::from_input(
            CronTaskInput {
                id: id.into(),
                schedule: "* * * * * *".into(),
                name: None,
                description: None,
                task: "check in".into(),
                notify: None,
                session_key: None,
                timezone: None,
                enabled: None,
                built_in: None,
            },
            "UTC",
        )
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let persist = FileCronPersist::new(dir.path().join("cron.yaml"));
        persist.persist(&[task("heartbeat")]).await;

        let loaded = persist.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "heartbeat");
    }

    #[test]
    fn load_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persist = FileCronPersist::new(dir.path().join("nope.yaml"));
        assert!(persist.load().unwrap().is_empty());
    }
}
