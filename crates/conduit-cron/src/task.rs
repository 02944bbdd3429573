// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `CronTask` data model (spec §3, §4.10).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronTaskInput {
    pub id: String,
    pub schedule: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Instruction handed to the agent as the prompt when this task fires.
    pub task: String,
    /// Optional notification targets to deliver the result to, separate
    /// from the prompt itself.
    #[serde(default)]
    pub notify: Option<Vec<String>>,
    #[serde(default, rename = "sessionKey")]
    pub session_key: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Marks a task shipped with the deployment rather than added by a user.
    #[serde(default, rename = "builtIn")]
    pub built_in: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronTask {
    pub id: String,
    pub schedule: String,
    pub name: String,
    pub description: String,
    pub task: String,
    pub notify: Option<Vec<String>>,
    pub session_key: Option<String>,
    pub timezone: String,
    pub enabled: bool,
    #[serde(rename = "builtIn")]
    pub built_in: bool,
}

impl CronTask {
    pub fn from_input(input: CronTaskInput, default_timezone: &str) -> Self {
        let description = input
            .description
            .unwrap_or_else(|| input.task.chars().take(100).collect());
        Self {
            name: input.name.unwrap_or_else(|| input.id.clone()),
            description,
            id: input.id,
            schedule: input.schedule,
            task: input.task,
            notify: input.notify,
            session_key: input.session_key,
            timezone: input.timezone.unwrap_or_else(|| default_timezone.to_string()),
            enabled: input.enabled.unwrap_or(true),
            built_in: input.built_in.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CronTaskPatch {
    pub schedule: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub task: Option<String>,
    pub notify: Option<Option<Vec<String>>>,
    #[serde(rename = "sessionKey")]
    pub session_key: Option<Option<String>>,
    pub timezone: Option<String>,
    pub enabled: Option<bool>,
}

impl CronTaskPatch {
    /// Whether this patch touches the schedule, which forces a job
    /// teardown/recreate rather than an in-place mutation (spec §4.10).
    pub fn changes_schedule(&self) -> bool {
        self.schedule.is_some() || self.timezone.is_some()
    }

    pub fn apply(&self, task: &mut CronTask) {
        if let Some(schedule) = &self.schedule {
            task.schedule = schedule.clone();
        }
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(prompt) = &self.task {
            task.task = prompt.clone();
        }
        if let Some(notify) = &self.notify {
            task.notify = notify.clone();
        }
        if let Some(session_key) = &self.session_key {
            task.session_key = session_key.clone();
        }
        if let Some(timezone) = &self.timezone {
            task.timezone = timezone.clone();
        }
        if let Some(enabled) = self.enabled {
            task.enabled = enabled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_input_fills_defaults() {
        let input = CronTaskInput {
            id: "heartbeat".into(),
            schedule: "0 */5 * * * *".into(),
            name: None,
            description: None,
            task: "check in".into(),
            notify: None,
            session_key: None,
            timezone: None,
            enabled: None,
            built_in: None,
        };
        let task = CronTask::from_input(input, "UTC");
        assert_eq!(task.name, "heartbeat");
        assert_eq!(task.description, "check in");
        assert!(task.enabled);
        assert_eq!(task.timezone, "UTC");
        assert!(!task.built_in);
    }

    #[test]
    fn description_truncates_long_task_to_100_chars() {
        let input = CronTaskInput {
            id: "t".into(),
            schedule: "* * * * * *".into(),
            name: None,
            description: None,
            task: "x".repeat(200),
            notify: None,
            session_key: None,
            timezone: None,
            enabled: None,
            built_in: None,
        };
        let task = CronTask::from_input(input, "UTC");
        assert_eq!(task.description.len(), 100);
    }
}
