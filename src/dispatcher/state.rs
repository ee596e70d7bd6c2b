//! Polling cursor and its on-disk form.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Cursor state that survives restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Highest update id processed so far.
    pub last_update_id: Option<i64>,
    /// When the state was written.
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl PersistentState {
    /// Loads state from a JSON file, returns default if not found or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring unreadable state file {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// Saves state to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

/// Last processed update id. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    last_update_id: Option<i64>,
}

impl Cursor {
    /// Creates an empty cursor (nothing processed yet).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_update_id: None,
        }
    }

    /// Creates a cursor positioned at `update_id`.
    #[must_use]
    pub const fn at(update_id: i64) -> Self {
        Self {
            last_update_id: Some(update_id),
        }
    }

    /// Highest update id processed so far.
    #[must_use]
    pub const fn last_update_id(&self) -> Option<i64> {
        self.last_update_id
    }

    /// Offset to pass to `getUpdates`.
    #[must_use]
    pub fn next_offset(&self) -> Option<i64> {
        self.last_update_id.map(|id| id + 1)
    }

    /// True if `update_id` was already processed.
    #[must_use]
    pub fn has_seen(&self, update_id: i64) -> bool {
        self.last_update_id.is_some_and(|last| update_id <= last)
    }

    /// Moves the cursor to `update_id` if that is further ahead.
    ///
    /// Returns true if the cursor moved.
    pub fn advance(&mut self, update_id: i64) -> bool {
        if self.has_seen(update_id) {
            return false;
        }
        self.last_update_id = Some(update_id);
        true
    }

    /// Creates a cursor from persistent state loaded from disk.
    #[must_use]
    pub const fn from_persistent(persistent: &PersistentState) -> Self {
        Self {
            last_update_id: persistent.last_update_id,
        }
    }

    /// Converts to persistent state for saving.
    #[must_use]
    pub fn to_persistent(&self) -> PersistentState {
        PersistentState {
            last_update_id: self.last_update_id,
            saved_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cursor() {
        let cursor = Cursor::new();
        assert_eq!(cursor.last_update_id(), None);
        assert_eq!(cursor.next_offset(), None);
        assert!(!cursor.has_seen(0));
    }

    #[test]
    fn test_advance_only_moves_forward() {
        let mut cursor = Cursor::new();
        assert!(cursor.advance(5));
        assert!(cursor.advance(9));
        assert!(!cursor.advance(7));
        assert!(!cursor.advance(9));
        assert_eq!(cursor.last_update_id(), Some(9));
        assert_eq!(cursor.next_offset(), Some(10));
    }

    #[test]
    fn test_has_seen() {
        let cursor = Cursor::at(10);
        assert!(cursor.has_seen(3));
        assert!(cursor.has_seen(10));
        assert!(!cursor.has_seen(11));
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistentState::load(dir.path().join("absent.json"));
        assert_eq!(state, PersistentState::default());
    }

    #[test]
    fn test_load_garbage_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(PersistentState::load(&path).last_update_id, None);
    }

    #[test]
    fn test_save_and_restore_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        Cursor::at(41).to_persistent().save(&path).unwrap();
        let restored = Cursor::from_persistent(&PersistentState::load(&path));

        assert_eq!(restored.next_offset(), Some(42));
    }
}
