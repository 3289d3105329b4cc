//! Controller lease: a process-wide single-writer lock with PID liveness
//! and heartbeat freshness.
//!
//! The lock file and heartbeat file must reference the same session id.
//! Takeover always overwrites atomically; it never deletes first, which
//! would open a race window between the delete and the re-create.

use crate::core::error::{HarnessError, Result};
use crate::core::state::atomic_write;
use chrono::{DateTime, Duration, Utc};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use uuid::Uuid;

/// Heartbeats older than this are stale (strictly greater than).
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 5 * 60;

/// Interval between heartbeat updates in a long-lived session.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub pid: i32,
    pub start_time: DateTime<Utc>,
    pub session_id: Uuid,
}

/// Contents of the heartbeat file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatInfo {
    pub session_id: Uuid,
    pub last_beat_at: DateTime<Utc>,
}

/// Why a stale lock was taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    PidDead,
    HeartbeatTimeout,
}

impl StaleReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PidDead => "PID_DEAD",
            Self::HeartbeatTimeout => "HEARTBEAT_TIMEOUT",
        }
    }
}

/// Successful acquisition outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Fresh,
    StaleTakeover(StaleReason),
    ForceTakeover,
}

/// Manages the lock and heartbeat pair under `<home>/locks/`.
#[derive(Debug)]
pub struct LockManager {
    lock_path: PathBuf,
    heartbeat_path: PathBuf,
    session_id: Option<Uuid>,
}

impl LockManager {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let locks_dir = home.into().join("locks");
        Self {
            lock_path: locks_dir.join("commander.lock"),
            heartbeat_path: locks_dir.join("commander.heartbeat"),
            session_id: None,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Reads the current lock file, if any. An unreadable file is treated
    /// as absent; acquisition will then overwrite it.
    #[must_use]
    pub fn read_lock(&self) -> Option<LockInfo> {
        let bytes = std::fs::read(&self.lock_path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    #[must_use]
    pub fn read_heartbeat(&self) -> Option<HeartbeatInfo> {
        let bytes = std::fs::read(&self.heartbeat_path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Attempts to acquire the controller lease.
    ///
    /// Denials come back as `LockHeld` (live holder) or `LockInconsistent`
    /// (lock/heartbeat session mismatch). A dead holder is taken over
    /// without prompting; a stale heartbeat requires `force` (the session
    /// command prompts before setting it).
    pub fn acquire(&mut self, force: bool) -> Result<Acquired> {
        let session_id = Uuid::new_v4();

        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Fast path: atomic exclusive create.
        let info = self.lock_info(session_id);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => {
                drop(file);
                // The file exists (and excludes other creators); fill it in
                // through the same atomic-overwrite path used everywhere.
                self.write_lock(&info)?;
                self.write_heartbeat_for(session_id)?;
                self.session_id = Some(session_id);
                return Ok(Acquired::Fresh);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        // Collision: examine the holder.
        let Some(existing) = self.read_lock() else {
            // Unreadable lock file; claim it by overwrite.
            self.takeover(session_id)?;
            return Ok(Acquired::StaleTakeover(StaleReason::PidDead));
        };

        if !pid_alive(existing.pid) {
            self.takeover(session_id)?;
            return Ok(Acquired::StaleTakeover(StaleReason::PidDead));
        }

        let heartbeat = self.read_heartbeat();
        match heartbeat {
            None => {
                if force {
                    self.takeover(session_id)?;
                    Ok(Acquired::ForceTakeover)
                } else {
                    Err(HarnessError::LockInconsistent)
                }
            }
            Some(hb) if hb.session_id != existing.session_id => {
                if force {
                    self.takeover(session_id)?;
                    Ok(Acquired::ForceTakeover)
                } else {
                    Err(HarnessError::LockInconsistent)
                }
            }
            Some(hb) if heartbeat_stale(&hb, Utc::now()) => {
                if force {
                    self.takeover(session_id)?;
                    Ok(Acquired::StaleTakeover(StaleReason::HeartbeatTimeout))
                } else {
                    Err(HarnessError::LockHeld { pid: existing.pid })
                }
            }
            Some(_) => {
                if force {
                    self.takeover(session_id)?;
                    Ok(Acquired::ForceTakeover)
                } else {
                    Err(HarnessError::LockHeld { pid: existing.pid })
                }
            }
        }
    }

    /// Whether the stale-heartbeat takeover path applies (used by `session`
    /// to decide when to prompt for confirmation).
    #[must_use]
    pub fn holder_heartbeat_stale(&self) -> bool {
        match (self.read_lock(), self.read_heartbeat()) {
            (Some(lock), Some(hb)) => {
                pid_alive(lock.pid)
                    && hb.session_id == lock.session_id
                    && heartbeat_stale(&hb, Utc::now())
            }
            _ => false,
        }
    }

    /// Refreshes the heartbeat for the owned session.
    pub fn update_heartbeat(&self) -> Result<()> {
        let session_id = self
            .session_id
            .ok_or_else(|| HarnessError::Other("no active session".to_string()))?;
        self.write_heartbeat_for(session_id)
    }

    /// Releases the lease, deleting lock and heartbeat only when they still
    /// belong to this session.
    pub fn release(&mut self) {
        let Some(session_id) = self.session_id.take() else {
            return;
        };

        if self
            .read_lock()
            .is_some_and(|lock| lock.session_id == session_id)
        {
            let _ = std::fs::remove_file(&self.lock_path);
        }
        if self
            .read_heartbeat()
            .is_some_and(|hb| hb.session_id == session_id)
        {
            let _ = std::fs::remove_file(&self.heartbeat_path);
        }
    }

    /// True when this process currently owns the lock on disk.
    #[must_use]
    pub fn is_controller(&self) -> bool {
        match (self.session_id, self.read_lock()) {
            (Some(ours), Some(lock)) => lock.session_id == ours,
            _ => false,
        }
    }

    fn lock_info(&self, session_id: Uuid) -> LockInfo {
        LockInfo {
            pid: std::process::id() as i32,
            start_time: Utc::now(),
            session_id,
        }
    }

    /// Overwrite-takeover: write the new lock over the old one atomically.
    fn takeover(&mut self, session_id: Uuid) -> Result<()> {
        self.write_lock(&self.lock_info(session_id))?;
        self.write_heartbeat_for(session_id)?;
        self.session_id = Some(session_id);
        Ok(())
    }

    fn write_lock(&self, info: &LockInfo) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(info)
            .map_err(|e| HarnessError::Other(format!("serialize lock: {e}")))?;
        atomic_write(&self.lock_path, &bytes)
    }

    fn write_heartbeat_for(&self, session_id: Uuid) -> Result<()> {
        let info = HeartbeatInfo {
            session_id,
            last_beat_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&info)
            .map_err(|e| HarnessError::Other(format!("serialize heartbeat: {e}")))?;
        atomic_write(&self.heartbeat_path, &bytes)
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.release();
    }
}

/// A heartbeat is stale strictly after the timeout: an age of exactly
/// five minutes is still fresh.
#[must_use]
pub fn heartbeat_stale(heartbeat: &HeartbeatInfo, now: DateTime<Utc>) -> bool {
    now - heartbeat.last_beat_at > Duration::seconds(HEARTBEAT_TIMEOUT_SECS)
}

/// Checks the OS process table for the PID (signal 0).
#[must_use]
pub fn pid_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Background task that owns the heartbeat file for a long-lived session.
///
/// The thread updates the heartbeat every [`HEARTBEAT_INTERVAL_SECS`] until
/// the cancel channel fires or drops.
pub struct HeartbeatTask {
    cancel: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatTask {
    /// Spawns the heartbeat loop for an already-acquired session.
    pub fn spawn(home: PathBuf, session_id: Uuid) -> Self {
        let (cancel, rx) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            let mut manager = LockManager::new(home);
            manager.session_id = Some(session_id);
            loop {
                match rx.recv_timeout(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = manager.update_heartbeat() {
                            tracing::warn!(error = %e, "heartbeat update failed");
                        }
                    }
                }
            }
            // The session owns release; the task must not delete the files.
            manager.session_id = None;
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Signals the loop and waits for it to exit.
    pub fn stop(mut self) {
        let _ = self.cancel.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        let _ = self.cancel.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
