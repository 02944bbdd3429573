// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Cron scheduler (spec §4.10): holds `taskId → {task, job}`, arms a
//! per-task tokio task that sleeps until the next tick and fires through a
//! [`TriggerSink`], gated by an optional [`BeforeFireHook`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::clock::Clock;
use crate::task::{CronTask, CronTaskInput, CronTaskPatch};

/// Publishes a fired task. Decouples the scheduling state machine from the
/// gateway event it ultimately produces (`cron.trigger`), mirroring how
/// `conduit_session::queue::ExecuteHook` decouples the FIFO from model
/// execution.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn on_trigger(&self, task: &CronTask);
}

/// Per-task gate evaluated immediately before a fire, including manual
/// `triggerTask` invocations. Returning `false` cancels this tick.
#[async_trait]
pub trait BeforeFireHook: Send + Sync {
    async fn check(&self, task: &CronTask) -> bool;
}

/// Persists the non-ephemeral task set whenever it changes.
#[async_trait]
pub trait PersistHook: Send + Sync {
    async fn persist(&self, tasks: &[CronTask]);
}

struct Entry {
    task: CronTask,
    ephemeral: bool,
    job: Option<JoinHandle<()>>,
    before_fire: Option<Arc<dyn BeforeFireHook>>,
}

pub struct CronScheduler {
    entries: Mutex<HashMap<String, Entry>>,
    sink: Arc<dyn TriggerSink>,
    persist: Option<Arc<dyn PersistHook>>,
    clock: Arc<dyn Clock>,
    default_timezone: String,
    armed: std::sync::atomic::AtomicBool,
}

fn parse_tz(name: &str) -> Tz {
    Tz::from_str(name).unwrap_or_else(|_| {
        warn!(timezone = %name, "unknown timezone, falling back to UTC");
        chrono_tz::UTC
    })
}

impl CronScheduler {
    pub fn new(sink: Arc<dyn TriggerSink>, persist: Option<Arc<dyn PersistHook>>, clock: Arc<dyn Clock>, default_timezone: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            sink,
            persist,
            clock,
            default_timezone: default_timezone.into(),
            armed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub async fn add_task(self: &Arc<Self>, input: CronTaskInput, ephemeral: bool) -> Result<CronTask, String> {
        let task = CronTask::from_input(input, &self.default_timezone);
        validate_schedule(&task.schedule)?;

        {
            let mut entries = self.entries.lock().await;
            if entries.contains_key(&task.id) {
                return Err(format!("task '{}' already exists", task.id));
            }
            entries.insert(
                task.id.clone(),
                Entry {
                    task: task.clone(),
                    ephemeral,
                    job: None,
                    before_fire: None,
                },
            );
        }

        if task.enabled && self.armed.load(std::sync::atomic::Ordering::SeqCst) {
            self.arm_task(&task.id).await;
        }
        self.persist_now().await;
        Ok(task)
    }

    pub async fn update_task(self: &Arc<Self>, id: &str, patch: CronTaskPatch) -> Option<CronTask> {
        let needs_rearm;
        let updated;
        {
            let mut entries = self.entries.lock().await;
            let entry = entries.get_mut(id)?;
            needs_rearm = patch.changes_schedule();
            patch.apply(&mut entry.task);
            updated = entry.task.clone();
            if needs_rearm {
                if let Some(job) = entry.job.take() {
                    job.abort();
                }
            }
        }

        if needs_rearm && updated.enabled && self.armed.load(std::sync::atomic::Ordering::SeqCst) {
            self.arm_task(id).await;
        }
        self.persist_now().await;
        Some(updated)
    }

    pub async fn remove_task(self: &Arc<Self>, id: &str) -> bool {
        let removed = {
            let mut entries = self.entries.lock().await;
            entries.remove(id)
        };
        let Some(entry) = removed else { return false };
        if let Some(job) = entry.job {
            job.abort();
        }
        self.persist_now().await;
        true
    }

    pub async fn on_before_fire(&self, id: &str, hook: Arc<dyn BeforeFireHook>) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(id) {
            entry.before_fire = Some(hook);
        }
    }

    pub async fn start_all(self: &Arc<Self>) {
        self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        let ids: Vec<String> = {
            let entries = self.entries.lock().await;
            entries.iter().filter(|(_, e)| e.task.enabled).map(|(id, _)| id.clone()).collect()
        };
        for id in ids {
            self.arm_task(&id).await;
        }
    }

    pub async fn stop_all(&self) {
        self.armed.store(false, std::sync::atomic::Ordering::SeqCst);
        let mut entries = self.entries.lock().await;
        for entry in entries.values_mut() {
            if let Some(job) = entry.job.take() {
                job.abort();
            }
        }
    }

    /// Manual invocation (spec §4.10): bypasses the schedule but still
    /// honors the before-fire hook. Returns `false` if the task doesn't
    /// exist or the hook vetoed this tick.
    pub async fn trigger_task(&self, id: &str) -> bool {
        let task = {
            let entries = self.entries.lock().await;
            entries.get(id).map(|e| e.task.clone())
        };
        let Some(task) = task else { return false };
        self.fire(id, &task).await
    }

    pub async fn list_tasks(&self) -> Vec<CronTask> {
        self.entries.lock().await.values().map(|e| e.task.clone()).collect()
    }

    pub async fn get_task(&self, id: &str) -> Option<CronTask> {
        self.entries.lock().await.get(id).map(|e| e.task.clone())
    }

    async fn fire(&self, id: &str, task: &CronTask) -> bool {
        let hook = {
            let entries = self.entries.lock().await;
            entries.get(id).and_then(|e| e.before_fire.clone())
        };
        if let Some(hook) = hook {
            if !hook.check(task).await {
                return false;
            }
        }
        self.sink.on_trigger(task).await;
        true
    }

    async fn persist_now(&self) {
        let Some(persist) = &self.persist else { return };
        let tasks: Vec<CronTask> = {
            let entries = self.entries.lock().await;
            entries.values().filter(|e| !e.ephemeral).map(|e| e.task.clone()).collect()
        };
        persist.persist(&tasks).await;
    }

    async fn arm_task(self: &Arc<Self>, id: &str) {
        let task = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(id) else { return };
            if let Some(job) = entry.job.take() {
                job.abort();
            }
            entry.task.clone()
        };

        let scheduler = self.clone();
        let id = id.to_string();
        let handle = tokio::spawn(async move {
            scheduler.run_job_loop(id).await;
        });

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&task.id) {
            entry.job = Some(handle);
        }
    }

    async fn run_job_loop(self: Arc<Self>, id: String) {
        loop {
            let task = match self.get_task(&id).await {
                Some(t) if t.enabled => t,
                _ => return,
            };

            let schedule = match cron::Schedule::from_str(&normalize_schedule(&task.schedule)) {
                Ok(s) => s,
                Err(e) => {
                    warn!(task = %id, error = %e, "invalid cron schedule, disarming");
                    return;
                }
            };

            let tz = parse_tz(&task.timezone);
            let now_tz = self.clock.now().with_timezone(&tz);
            let Some(next) = schedule.after(&now_tz).next() else {
                warn!(task = %id, "schedule has no upcoming tick, disarming");
                return;
            };

            let now_utc = self.clock.now();
            let next_utc = next.with_timezone(&Utc);
            let sleep_for = (next_utc - now_utc).to_std().unwrap_or(StdDuration::from_secs(0));
            tokio::time::sleep(sleep_for).await;

            if let Some(task) = self.get_task(&id).await {
                if task.enabled {
                    self.fire(&id, &task).await;
                }
            }
        }
    }
}

/// The `cron` crate's grammar requires a leading seconds field (6–7 fields
/// total); the standard crontab grammar this spec's tasks are written in
/// has 5. Prepend a `0` seconds field so a 5-field expression parses the
/// way a standard 5-field cron parser would.
fn normalize_schedule(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn validate_schedule(expr: &str) -> Result<(), String> {
    let normalized = normalize_schedule(expr);
    cron::Schedule::from_str(&normalized).map(|_| ()).map_err(|e| format!("invalid cron expression '{expr}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        fired: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl TriggerSink for RecordingSink {
        async fn on_trigger(&self, task: &CronTask) {
            self.fired.lock().unwrap().push(task.id.clone());
        }
    }

    fn input(id: &str, schedule: &str) -> CronTaskInput {
        CronTaskInput {
            id: id.to_string(),
            schedule: schedule.to_string(),
            name: None,
            description: None,
            task: "tick".into(),
            notify: None,
            session_key: None,
            timezone: None,
            enabled: None,
            built_in: None,
        }
    }

    #[tokio::test]
    async fn add_task_rejects_invalid_schedule() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = CronScheduler::new(sink, None, Arc::new(SystemClock), "UTC");
        let result = scheduler.add_task(input("bad", "not a cron expr"), false).await;
        assert!(result.is_err());
    }

    /// Spec's canonical heartbeat task uses a 5-field expression; the
    /// underlying `cron` crate only parses 6-7 fields, so this must go
    /// through `normalize_schedule` to be accepted at all.
    #[tokio::test]
    async fn add_task_accepts_five_field_schedule() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = CronScheduler::new(sink, None, Arc::new(SystemClock), "UTC");
        let result = scheduler.add_task(input("hb", "* * * * *"), false).await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn add_task_rejects_duplicate_id() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = CronScheduler::new(sink, None, Arc::new(SystemClock), "UTC");
        scheduler.add_task(input("t1", "* * * * * *"), false).await.unwrap();
        let result = scheduler.add_task(input("t1", "* * * * * *"), false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn trigger_task_fires_sink_directly() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = CronScheduler::new(sink.clone(), None, Arc::new(SystemClock), "UTC");
        scheduler.add_task(input("t1", "* * * * * *"), false).await.unwrap();
        assert!(scheduler.trigger_task("t1").await);
        assert_eq!(sink.fired.lock().unwrap().as_slice(), ["t1"]);
    }

    #[tokio::test]
    async fn trigger_task_on_unknown_id_returns_false() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = CronScheduler::new(sink, None, Arc::new(SystemClock), "UTC");
        assert!(!scheduler.trigger_task("ghost").await);
    }

    struct VetoHook;

    #[async_trait]
    impl BeforeFireHook for VetoHook {
        async fn check(&self, _task: &CronTask) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn before_fire_hook_can_veto_manual_trigger() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = CronScheduler::new(sink.clone(), None, Arc::new(SystemClock), "UTC");
        scheduler.add_task(input("t1", "* * * * * *"), false).await.unwrap();
        scheduler.on_before_fire("t1", Arc::new(VetoHook)).await;

        assert!(!scheduler.trigger_task("t1").await);
        assert!(sink.fired.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_task_returns_whether_it_existed() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = CronScheduler::new(sink, None, Arc::new(SystemClock), "UTC");
        scheduler.add_task(input("t1", "* * * * * *"), false).await.unwrap();
        assert!(scheduler.remove_task("t1").await);
        assert!(!scheduler.remove_task("t1").await);
    }

    #[tokio::test]
    async fn ephemeral_tasks_are_excluded_from_persist() {
        #[derive(Default)]
        struct RecordingPersist {
            snapshots: StdMutex<Vec<Vec<String>>>,
        }
        #[async_trait]
        impl PersistHook for RecordingPersist {
            async fn persist(&self, tasks: &[CronTask]) {
                self.snapshots.lock().unwrap().push(tasks.iter().map(|t| t.id.clone()).collect());
            }
        }

        let sink = Arc::new(RecordingSink::default());
        let persist = Arc::new(RecordingPersist::default());
        let scheduler = CronScheduler::new(sink, Some(persist.clone()), Arc::new(SystemClock), "UTC");

        scheduler.add_task(input("persisted", "* * * * * *"), false).await.unwrap();
        scheduler.add_task(input("ephemeral", "* * * * * *"), true).await.unwrap();

        let last = persist.snapshots.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last, vec!["persisted".to_string()]);
    }

    #[tokio::test]
    async fn update_task_mutates_in_place_without_touching_schedule() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = CronScheduler::new(sink, None, Arc::new(SystemClock), "UTC");
        scheduler.add_task(input("t1", "* * * * * *"), false).await.unwrap();

        let patch = CronTaskPatch {
            task: Some("new message".into()),
            ..Default::default()
        };
        let updated = scheduler.update_task("t1", patch).await.unwrap();
        assert_eq!(updated.task, "new message");
        assert_eq!(updated.schedule, "* * * * * *");
    }
}
