use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::RenudgeError;
use crate::reminder::Reminder;
use crate::subscription::Subscription;

pub const STATE_FILE: &str = "state.json";
pub const REMINDERS_FILE: &str = "reminders.json";

#[derive(Default, Serialize, Deserialize)]
struct StateSnapshot {
    #[serde(default)]
    sessions: BTreeMap<String, Subscription>,
}

/// In-memory working copy of the durable state. The two snapshot files
/// are the sole source of truth across restarts; every write replaces the
/// whole file atomically so a reader never observes a partial snapshot.
pub struct StateStore {
    data_dir: PathBuf,
    pub sessions: BTreeMap<String, Subscription>,
    pub reminders: Vec<Reminder>,
    dirty_sessions: bool,
    dirty_reminders: bool,
}

impl StateStore {
    /// Load both snapshots. A missing file is a normal first boot; an
    /// unreadable one is reported loudly and replaced with defaults
    /// rather than refusing to start.
    pub fn load(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();

        let sessions = match read_json::<StateSnapshot>(&data_dir.join(STATE_FILE)) {
            Ok(Some(snapshot)) => snapshot.sessions,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                error!("Unreadable {STATE_FILE}, starting with empty subscriptions: {e}");
                BTreeMap::new()
            }
        };

        let reminders = match read_json::<Vec<Reminder>>(&data_dir.join(REMINDERS_FILE)) {
            Ok(Some(reminders)) => reminders,
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("Unreadable {REMINDERS_FILE}, starting with no reminders: {e}");
                Vec::new()
            }
        };

        StateStore {
            data_dir,
            sessions,
            reminders,
            dirty_sessions: false,
            dirty_reminders: false,
        }
    }

    /// Mutable handle to a conversation's record, created on first touch.
    pub fn session_mut(&mut self, conversation_id: &str) -> &mut Subscription {
        self.dirty_sessions = true;
        self.sessions
            .entry(conversation_id.to_string())
            .or_default()
    }

    pub fn session(&self, conversation_id: &str) -> Option<&Subscription> {
        self.sessions.get(conversation_id)
    }

    pub fn mark_sessions_dirty(&mut self) {
        self.dirty_sessions = true;
    }

    pub fn mark_reminders_dirty(&mut self) {
        self.dirty_reminders = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_sessions || self.dirty_reminders
    }

    pub fn add_reminder(&mut self, reminder: Reminder) {
        self.reminders.push(reminder);
        self.dirty_reminders = true;
    }

    /// Remove by id; true when something was removed.
    pub fn remove_reminder(&mut self, id: &str) -> bool {
        let before = self.reminders.len();
        self.reminders.retain(|r| r.id != id);
        let removed = self.reminders.len() != before;
        if removed {
            self.dirty_reminders = true;
        }
        removed
    }

    pub fn reminders_for(&self, conversation_id: &str) -> Vec<&Reminder> {
        let mut list: Vec<&Reminder> = self
            .reminders
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Write out whatever changed since the last successful flush. On
    /// failure the dirty flag survives, so the next tick retries while
    /// the in-memory state stays authoritative.
    pub fn flush(&mut self) -> Result<(), RenudgeError> {
        if self.dirty_sessions {
            let snapshot = StateSnapshot {
                sessions: self.sessions.clone(),
            };
            write_json_atomic(&self.data_dir.join(STATE_FILE), &snapshot)?;
            self.dirty_sessions = false;
        }
        if self.dirty_reminders {
            write_json_atomic(&self.data_dir.join(REMINDERS_FILE), &self.reminders)?;
            self.dirty_reminders = false;
        }
        Ok(())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, RenudgeError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RenudgeError::Persistence(format!("read {path:?}: {e}"))),
    };
    let value = serde_json::from_str(&content)
        .map_err(|e| RenudgeError::Persistence(format!("parse {path:?}: {e}")))?;
    Ok(Some(value))
}

/// Atomic replace: temp file in the same directory, fsync, rename.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RenudgeError> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| RenudgeError::Persistence(format!("create dir {parent:?}: {e}")))?;
    }

    let mut file = std::fs::File::create(&tmp_path)
        .map_err(|e| RenudgeError::Persistence(format!("create {tmp_path:?}: {e}")))?;
    file.write_all(&json)
        .map_err(|e| RenudgeError::Persistence(format!("write {tmp_path:?}: {e}")))?;
    file.sync_all()
        .map_err(|e| RenudgeError::Persistence(format!("sync {tmp_path:?}: {e}")))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| RenudgeError::Persistence(format!("rename {tmp_path:?} -> {path:?}: {e}")))
}
