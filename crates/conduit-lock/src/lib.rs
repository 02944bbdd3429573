// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Process single-instance lock (spec §4.11): a durable heartbeat record
//! (host, pid, startedAt, heartbeat) in the data directory, refreshed on a
//! timer, plus a best-effort advisory file lock (`fs4`) for the common case
//! where the filesystem actually supports it. The heartbeat/staleness check
//! is the mechanism of record — it still works over filesystems (NFS, etc.)
//! where advisory locks and PID checks are unreliable.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock held by another host ({host}), heartbeat still fresh")]
    HeldRemotely { host: String },
    #[error("lock held by live local process {pid}")]
    HeldLocally { pid: u32 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt lock record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    host: String,
    pid: u32,
    started_at: DateTime<Utc>,
    heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub path: PathBuf,
    pub stale_threshold: Duration,
    pub heartbeat_interval: Duration,
}

impl LockConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// An acquired single-instance lock. Dropping it stops the heartbeat
/// refresh task and releases the advisory file lock; the record itself is
/// left on disk (its pid will no longer be alive, so the next acquirer
/// simply overwrites it).
pub struct ProcessLock {
    file: File,
    stop: Arc<Notify>,
    heartbeat_task: Option<JoinHandle<()>>,
}

/// Read-only snapshot of a lock record, for `gateway status`/`stop` without
/// contending for the lock itself.
#[derive(Debug, Clone)]
pub struct LockStatus {
    pub host: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub heartbeat: DateTime<Utc>,
    pub stale: bool,
}

/// Inspect the lock record at `path` without acquiring it. Returns `None`
/// if no record exists yet.
pub fn inspect(path: &Path, stale_threshold: Duration) -> Result<Option<LockStatus>, LockError> {
    let Ok(mut file) = OpenOptions::new().read(true).open(path) else {
        return Ok(None);
    };
    let Some(record) = read_record(&mut file)? else {
        return Ok(None);
    };
    let age = Utc::now().signed_duration_since(record.heartbeat);
    let stale = if record.host == local_hostname() {
        !pid_is_alive(record.pid)
    } else {
        age.to_std().unwrap_or(Duration::ZERO) >= stale_threshold
    };
    Ok(Some(LockStatus {
        host: record.host,
        pid: record.pid,
        started_at: record.started_at,
        heartbeat: record.heartbeat,
        stale,
    }))
}

impl ProcessLock {
    /// Attempt to acquire the lock at `config.path`, creating the file if
    /// needed. Fails if another process (local and alive, or remote and
    /// within the stale threshold) currently holds it.
    pub async fn acquire(config: LockConfig) -> Result<Self, LockError> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).read(true).write(true).open(&config.path)?;

        if let Err(e) = file.try_lock_exclusive() {
            debug!(error = %e, "advisory file lock unavailable (filesystem may not support it)");
        }

        let existing = read_record(&mut file)?;
        let our_host = local_hostname();
        let our_pid = std::process::id();

        if let Some(record) = existing {
            if record.host != our_host {
                let age = Utc::now().signed_duration_since(record.heartbeat);
                // A negative age (heartbeat apparently in the future, e.g. clock
                // skew) is treated as maximally fresh rather than stale.
                if age.to_std().unwrap_or(Duration::ZERO) < config.stale_threshold {
                    let _ = file.unlock();
                    return Err(LockError::HeldRemotely { host: record.host });
                }
                warn!(host = %record.host, "stale remote lock record, taking over");
            } else if record.pid != our_pid && pid_is_alive(record.pid) {
                let _ = file.unlock();
                return Err(LockError::HeldLocally { pid: record.pid });
            }
        }

        let now = Utc::now();
        let record = LockRecord {
            host: our_host,
            pid: our_pid,
            started_at: now,
            heartbeat: now,
        };
        write_record(&mut file, &record)?;

        let stop = Arc::new(Notify::new());
        let heartbeat_task = spawn_heartbeat(config.path.clone(), config.heartbeat_interval, stop.clone());

        Ok(Self {
            file,
            stop,
            heartbeat_task: Some(heartbeat_task),
        })
    }

    pub async fn release(mut self) {
        self.stop.notify_waiters();
        if let Some(task) = self.heartbeat_task.take() {
            let _ = task.await;
        }
        let _ = self.file.unlock();
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.stop.notify_waiters();
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        let _ = self.file.unlock();
    }
}

fn spawn_heartbeat(path: PathBuf, interval: Duration, stop: Arc<Notify>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.notified() => return,
            }
            if let Err(e) = refresh_heartbeat(&path) {
                warn!(error = %e, "failed to refresh lock heartbeat");
            }
        }
    })
}

fn refresh_heartbeat(path: &Path) -> Result<(), LockError> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let Some(mut record) = read_record(&mut file)? else {
        return Ok(()); // record vanished; next acquirer will recreate it
    };
    record.heartbeat = Utc::now();
    write_record(&mut file, &record)
}

fn read_record(file: &mut File) -> Result<Option<LockRecord>, LockError> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    if contents.trim().is_empty() {
        return Ok(None);
    }
    serde_yaml::from_str(&contents).map(Some).map_err(|e| LockError::Corrupt(e.to_string()))
}

fn write_record(file: &mut File, record: &LockRecord) -> Result<(), LockError> {
    let yaml = serde_yaml::to_string(record).map_err(|e| LockError::Corrupt(e.to_string()))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(yaml.as_bytes())?;
    file.flush()?;
    Ok(())
}

fn local_hostname() -> String {
    hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    // signal 0 performs no-op existence/permission checks without sending anything.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    true // conservative: assume alive when liveness can't be checked
}
