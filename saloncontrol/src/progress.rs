//! Durable view-progress store.
//!
//! Maps a library-relative location (the directory holding the file) to the
//! last watched item and position. The whole state is read once at startup and
//! rewritten on every save, so the in-memory copy and the file never diverge
//! for longer than one write.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One persisted progress record, keyed by its location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub content_name: String,
    pub position_seconds: f64,
    pub observed_at_epoch_ms: i64,
}

/// Reference to the most recently watched item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastWatched {
    pub location: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_watched: Option<LastWatched>,
    #[serde(default)]
    pub entries: HashMap<String, ProgressEntry>,
}

pub struct ProgressStore {
    path: PathBuf,
    state: Mutex<ProgressState>,
}

impl ProgressStore {
    /// Load the store from disk. A missing or unparsable file degrades to the
    /// empty state; startup never fails on a corrupt store.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "Progress file unreadable, starting empty");
                    ProgressState::default()
                }
            },
            Err(_) => {
                debug!(file = %path.display(), "No progress file yet, starting empty");
                ProgressState::default()
            }
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Record progress for `location` and rewrite the backing file.
    ///
    /// The lock is held across the rewrite, so concurrent saves are linearized
    /// in call order and partial writes never interleave.
    pub async fn save(&self, location: &str, entry: ProgressEntry) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.last_watched = Some(LastWatched {
            location: location.to_string(),
            name: entry.content_name.clone(),
        });
        state.entries.insert(location.to_string(), entry);

        let json = serde_json::to_vec(&*state)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Current state, reflecting the most recently completed save.
    pub async fn read(&self) -> ProgressState {
        self.state.lock().await.clone()
    }
}

/// Milliseconds since the Unix epoch, for `observed_at_epoch_ms`.
pub fn epoch_ms_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, position: f64) -> ProgressEntry {
        ProgressEntry {
            content_name: name.into(),
            position_seconds: position,
            observed_at_epoch_ms: epoch_ms_now(),
        }
    }

    #[tokio::test]
    async fn save_updates_entry_and_last_watched() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::load(dir.path().join("progress.json"));

        store.save("Movies/Dir", entry("movie.mkv", 321.0)).await.unwrap();

        let state = store.read().await;
        assert_eq!(state.entries["Movies/Dir"].content_name, "movie.mkv");
        assert_eq!(
            state.last_watched,
            Some(LastWatched {
                location: "Movies/Dir".into(),
                name: "movie.mkv".into(),
            })
        );
    }

    #[tokio::test]
    async fn repeated_save_is_idempotent_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let store = ProgressStore::load(&path);
        store.save("Series/S1", entry("e01.mkv", 10.0)).await.unwrap();
        store.save("Series/S1", entry("e01.mkv", 95.5)).await.unwrap();

        let state = store.read().await;
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries["Series/S1"].position_seconds, 95.5);

        // Reloading from disk reproduces exactly the in-memory state.
        let reloaded = ProgressStore::load(&path).read().await;
        assert_eq!(reloaded.entries["Series/S1"], state.entries["Series/S1"]);
        assert_eq!(reloaded.last_watched, state.last_watched);
    }

    #[tokio::test]
    async fn corrupt_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let state = ProgressStore::load(&path).read().await;
        assert!(state.last_watched.is_none());
        assert!(state.entries.is_empty());
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = ProgressStore::load(dir.path().join("absent.json")).read().await;
        assert!(state.last_watched.is_none());
        assert!(state.entries.is_empty());
    }
}
