//! Shared data model for the control plane: playback snapshots, the push
//! channel envelope, backend status shapes, and the player's playlist tree.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// The two mutually-exclusive playback backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Primary,
    Browser,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Primary => write!(f, "primary"),
            BackendKind::Browser => write!(f, "browser"),
        }
    }
}

/// A status sample paired with the immediately preceding sample from the same
/// poller run. `previous` is always the prior tick's `current`; a restarted
/// poller starts over with `previous` empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub current: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<T>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }
}

/// Point-in-time status reported by the primary player's HTTP interface.
///
/// Only the fields the hub consumes are modeled; everything else in the
/// player's status document is ignored on deserialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    /// Position as a fraction of the total length, in `[0, 1]`.
    #[serde(default)]
    pub position: f64,
    /// Elapsed time in seconds.
    #[serde(default)]
    pub time: i64,
    /// Total length in seconds (0 when unknown).
    #[serde(default)]
    pub length: i64,
    #[serde(default)]
    pub volume: i64,
    // The player reports `fullscreen` as either a boolean or 0.
    #[serde(default, deserialize_with = "loose_bool")]
    pub fullscreen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub information: Option<StatusInformation>,
}

impl PlayerStatus {
    /// Name of the item currently loaded, when the player reports one.
    pub fn filename(&self) -> Option<&str> {
        self.information
            .as_ref()
            .and_then(|info| info.category.meta.filename.as_deref())
    }
}

impl Default for PlayerStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            position: 0.0,
            time: 0,
            length: 0,
            volume: 0,
            fullscreen: false,
            information: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusInformation {
    #[serde(default)]
    pub category: StatusCategory,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusCategory {
    #[serde(default)]
    pub meta: StatusMeta,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

fn loose_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    })
}

/// Point-in-time status evaluated inside the browser page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserStatus {
    #[serde(default)]
    pub title: String,
    /// Elapsed time in seconds.
    #[serde(default)]
    pub position: u64,
    /// Total duration in seconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub loading: bool,
    pub state: PlaybackState,
    #[serde(default)]
    pub fullscreen: bool,
}

impl Default for BrowserStatus {
    fn default() -> Self {
        Self {
            title: String::new(),
            position: 0,
            duration: 0,
            volume: 0.0,
            muted: false,
            loading: false,
            state: PlaybackState::Stopped,
            fullscreen: false,
        }
    }
}

/// One event on the viewer push channel.
///
/// Serializes to the wire envelope `{"type": ..., "data": ...}` with the tags
/// `media`, `primary-status` and `browser-status`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PlayerEvent {
    Media(MediaListing),
    PrimaryStatus(Snapshot<PlayerStatus>),
    BrowserStatus(Snapshot<BrowserStatus>),
}

impl PlayerEvent {
    /// Whether this event reports active playback. Media listings are not
    /// status reports and return `None`.
    pub fn reports_playing(&self) -> Option<bool> {
        match self {
            PlayerEvent::Media(_) => None,
            PlayerEvent::PrimaryStatus(snapshot) => Some(snapshot.current.state.is_playing()),
            PlayerEvent::BrowserStatus(snapshot) => Some(snapshot.current.state.is_playing()),
        }
    }
}

/// A directory listing of the media library, as pushed to viewers and served
/// over REST.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaListing {
    pub media: Vec<MediaItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_watched: Option<crate::progress::LastWatched>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub name: String,
    /// Path relative to the media root.
    pub path: String,
    /// Parent directory relative to the media root ("" at the root).
    pub parent: String,
    pub is_directory: bool,
    /// Saved position in seconds, for files with recorded progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_progress: Option<f64>,
}

/// Node of the player's playlist tree (`playlist.json`). Leaves carry a `uri`,
/// inner nodes carry `children`.
#[derive(Clone, Debug, Deserialize)]
pub struct PlaylistNode {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub children: Vec<PlaylistNode>,
}

impl PlaylistNode {
    pub fn is_leaf(&self) -> bool {
        self.kind == "leaf"
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a PlaylistNode>) {
        if self.is_leaf() {
            out.push(self);
        }
        for child in &self.children {
            child.collect_leaves(out);
        }
    }
}

/// Find the playlist leaf backing the item the player currently reports.
///
/// The status query only exposes an item *name*; the playlist tells us where
/// that name lives. Matching is by exact name first, then by URI suffix for
/// players that report a decorated display name.
pub fn find_playlist_leaf<'a>(root: &'a PlaylistNode, name: &str) -> Option<&'a PlaylistNode> {
    let mut leaves = Vec::new();
    root.collect_leaves(&mut leaves);

    if let Some(leaf) = leaves.iter().find(|leaf| leaf.name == name) {
        return Some(leaf);
    }

    let suffix = format!("/{name}");
    leaves
        .into_iter()
        .find(|leaf| leaf.uri.as_deref().is_some_and(|uri| uri.ends_with(&suffix)))
}
