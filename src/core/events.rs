//! Append-only audit trail of lifecycle and lock events.
//!
//! One JSON object per line at `<home>/events.log`. Appends are best-effort:
//! a failed append is logged as a warning and never aborts the command. The
//! log is never truncated by the commander.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Closed set of audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "SESSION_STARTED")]
    SessionStarted,
    #[serde(rename = "SESSION_ENDED")]
    SessionEnded,
    #[serde(rename = "LOCK_ACQUIRED")]
    LockAcquired,
    #[serde(rename = "LOCK_DENIED")]
    LockDenied,
    #[serde(rename = "LOCK_RELEASED")]
    LockReleased,
    #[serde(rename = "LOCK_STALE_TAKEOVER")]
    LockStaleTakeover,
    #[serde(rename = "RECONCILE_START")]
    ReconcileStart,
    #[serde(rename = "RECONCILE_RESULT")]
    ReconcileResult,
    #[serde(rename = "COMMAND_PLAN")]
    CommandPlan,
    #[serde(rename = "COMMAND_EXECUTE")]
    CommandExecute,
    #[serde(rename = "COMMAND_VERIFY_OK")]
    CommandVerifyOk,
    #[serde(rename = "COMMAND_VERIFY_FAIL")]
    CommandVerifyFail,
    #[serde(rename = "STATE_UPDATED")]
    StateUpdated,
}

/// One audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default, flatten)]
    pub fields: Map<String, Value>,
}

/// Append-only logger bound to one session.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    session_id: Option<Uuid>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn set_session(&mut self, session_id: Uuid) {
        self.session_id = Some(session_id);
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event. Best-effort: failures warn, never abort.
    pub fn emit(&self, kind: EventKind, fields: Map<String, Value>) {
        let event = Event {
            ts: Utc::now(),
            kind,
            session_id: self.session_id,
            fields,
        };
        if let Err(e) = self.append(&event) {
            tracing::warn!(error = %e, "failed to append event log entry");
        }
    }

    /// Convenience for events with no extra fields.
    pub fn emit_empty(&self, kind: EventKind) {
        self.emit(kind, Map::new());
    }

    fn append(&self, event: &Event) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let result = writeln!(file, "{line}").and_then(|()| file.flush());
        let _ = fs2::FileExt::unlock(&file);
        result
    }

    /// Reads events, most recent last, tolerating malformed lines.
    pub fn read(&self, limit: Option<usize>) -> Vec<Event> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };

        let mut events: Vec<Event> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed event log line");
                    None
                }
            })
            .collect();

        if let Some(limit) = limit {
            if events.len() > limit {
                events.drain(..events.len() - limit);
            }
        }
        events
    }
}

/// Builds the `fields` map from key/value pairs.
#[macro_export]
macro_rules! event_fields {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = serde_json::Map::new();
        $(map.insert($key.to_string(), serde_json::json!($value));)*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_one_json_object_per_line() {
        let tmp = tempdir().expect("tempdir");
        let log = EventLog::new(tmp.path().join("events.log")).with_session(Uuid::new_v4());

        log.emit_empty(EventKind::SessionStarted);
        log.emit(
            EventKind::LockDenied,
            event_fields! {"controllerPid" => 4242},
        );

        let content = std::fs::read_to_string(log.path()).expect("read");
        assert_eq!(content.lines().count(), 2);

        let events = log.read(None);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::SessionStarted);
        assert_eq!(events[1].kind, EventKind::LockDenied);
        assert_eq!(
            events[1].fields.get("controllerPid"),
            Some(&serde_json::json!(4242))
        );
    }

    #[test]
    fn read_tolerates_malformed_lines() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("events.log");
        let log = EventLog::new(&path);

        log.emit_empty(EventKind::ReconcileStart);
        {
            let mut file = OpenOptions::new().append(true).open(&path).expect("open");
            writeln!(file, "not json at all").expect("write");
        }
        log.emit_empty(EventKind::ReconcileResult);

        let events = log.read(None);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn read_with_limit_keeps_most_recent() {
        let tmp = tempdir().expect("tempdir");
        let log = EventLog::new(tmp.path().join("events.log"));

        log.emit_empty(EventKind::SessionStarted);
        log.emit_empty(EventKind::LockAcquired);
        log.emit_empty(EventKind::SessionEnded);

        let events = log.read(Some(2));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::LockAcquired);
        assert_eq!(events[1].kind, EventKind::SessionEnded);
    }

    #[test]
    fn missing_log_reads_empty() {
        let tmp = tempdir().expect("tempdir");
        let log = EventLog::new(tmp.path().join("absent.log"));
        assert!(log.read(None).is_empty());
    }

    #[test]
    fn kind_serializes_to_screaming_case() {
        let json = serde_json::to_string(&EventKind::LockStaleTakeover).expect("serialize");
        assert_eq!(json, "\"LOCK_STALE_TAKEOVER\"");
    }
}
