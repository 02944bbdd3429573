// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Read-only accessors for the workspace directory of human-edited markdown
//! context files. Content is treated as opaque: building a prompt from it is
//! an external collaborator's job, not this crate's.

use std::path::{Path, PathBuf};

/// Recognized workspace context file names, in the order an external prompt
/// builder would typically want them.
pub const RECOGNIZED_FILES: &[&str] =
    &["AGENTS.md", "SOUL.md", "USER.md", "TOOLS.md", "MEMORY.md", "HEARTBEAT.md", "BOOTSTRAP.md"];

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads a recognized context file's contents, or `None` if it doesn't
    /// exist. Returns an error for an unrecognized file name, since those
    /// aren't part of this workspace's contract.
    pub fn read(&self, name: &str) -> anyhow::Result<Option<String>> {
        if !RECOGNIZED_FILES.contains(&name) {
            anyhow::bail!("unrecognized workspace context file: {name}");
        }
        let path = self.root.join(name);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads every recognized file that exists, in `RECOGNIZED_FILES` order.
    pub fn read_all(&self) -> anyhow::Result<Vec<(&'static str, String)>> {
        let mut found = Vec::new();
        for name in RECOGNIZED_FILES {
            if let Some(contents) = self.read(name)? {
                found.push((*name, contents));
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_recognized_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        assert!(ws.read("AGENTS.md").unwrap().is_none());
    }

    #[test]
    fn read_unrecognized_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        assert!(ws.read("NOTES.md").is_err());
    }

    #[test]
    fn read_existing_file_returns_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SOUL.md"), "be helpful").unwrap();
        let ws = Workspace::new(dir.path());
        assert_eq!(ws.read("SOUL.md").unwrap().as_deref(), Some("be helpful"));
    }

    #[test]
    fn read_all_returns_only_existing_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MEMORY.md"), "m").unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "a").unwrap();
        let ws = Workspace::new(dir.path());
        let found = ws.read_all().unwrap();
        let names: Vec<&str> = found.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["AGENTS.md", "MEMORY.md"]);
    }
}
