//! Primary player backend.
//!
//! Owns the player child process and drives it through its HTTP interface.
//! The poll source derived from it also records view progress whenever a
//! status sample reports active playback.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::ControlError;
use crate::model::{BackendKind, PlayerEvent, PlayerStatus, Snapshot};
use crate::player_client::{expand_media_paths, PlayerClient};
use crate::poller::{OverlapPolicy, StatusSource};
use crate::progress::{epoch_ms_now, ProgressEntry, ProgressStore};
use crate::scheduler::ManagedBackend;

const START_ATTEMPTS: u32 = 20;
const START_RETRY_DELAY: Duration = Duration::from_millis(300);

/// The player process plus the client used to talk to it.
pub struct PrimaryBackend {
    client: PlayerClient,
    executable: String,
    password: String,
    http_port: u16,
    media_root: String,
    child: Mutex<Option<Child>>,
}

impl PrimaryBackend {
    pub fn new(
        client: PlayerClient,
        executable: impl Into<String>,
        password: impl Into<String>,
        http_port: u16,
        media_root: impl Into<String>,
    ) -> Self {
        Self {
            client,
            executable: executable.into(),
            password: password.into(),
            http_port,
            media_root: media_root.into(),
            child: Mutex::new(None),
        }
    }

    pub fn from_config() -> Self {
        let config = salonconfig::get_config();
        let port = port_of(&config.get_player_base_url());
        Self::new(
            PlayerClient::from_config(),
            config.get_player_executable(),
            config.get_player_password(),
            port,
            config.get_media_root(),
        )
    }

    pub fn client(&self) -> &PlayerClient {
        &self.client
    }

    /// Run a raw operation against the player, with media paths expanded
    /// against the library root first.
    pub async fn run_command<T: DeserializeOwned>(
        &self,
        operation: &str,
    ) -> Result<T, ControlError> {
        let expanded = expand_media_paths(operation, &self.media_root);
        self.client.run_command(&expanded).await
    }

    async fn spawn_if_needed(&self) -> Result<(), ControlError> {
        let mut child = self.child.lock().await;

        if child.is_some() && self.client.status().await.is_ok() {
            return Ok(());
        }

        if child.is_none() {
            info!(executable = %self.executable, "Spawning player");
            let spawned = Command::new(&self.executable)
                .arg("--extraintf=http")
                .arg(format!("--http-password={}", self.password))
                .arg(format!("--http-port={}", self.http_port))
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| {
                    ControlError::BackendStart(BackendKind::Primary, err.to_string())
                })?;
            *child = Some(spawned);
        }

        for attempt in 1..=START_ATTEMPTS {
            if self.client.status().await.is_ok() {
                debug!(attempt, "Player HTTP interface is up");
                return Ok(());
            }
            tokio::time::sleep(START_RETRY_DELAY).await;
        }

        Err(ControlError::BackendStart(
            BackendKind::Primary,
            "HTTP interface did not come up".to_string(),
        ))
    }

    async fn has_process(&self) -> bool {
        self.child.lock().await.is_some()
    }
}

#[async_trait]
impl ManagedBackend for PrimaryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Primary
    }

    async fn start(&self) -> Result<(), ControlError> {
        self.spawn_if_needed().await
    }

    async fn pause(&self) -> Result<(), ControlError> {
        // Never spawn the player just to pause it.
        if !self.has_process().await {
            return Ok(());
        }
        self.client
            .force_pause()
            .await
            .map(|_| ())
            .map_err(|err| ControlError::BackendPause(BackendKind::Primary, err.to_string()))
    }
}

/// Resolves the URI of an item the player names in its status report.
#[async_trait]
pub trait ItemResolver: Send + Sync + 'static {
    async fn resolve_uri(&self, name: &str) -> Result<Option<String>, ControlError>;
}

#[async_trait]
impl ItemResolver for PlayerClient {
    async fn resolve_uri(&self, name: &str) -> Result<Option<String>, ControlError> {
        Ok(self.playlist_item(name).await?.and_then(|leaf| leaf.uri))
    }
}

/// Library-relative directory of a playlist item URI.
///
/// `file:///srv/media/Movies/Dir/movie.mkv` with root `/srv/media` becomes
/// `Movies/Dir`. Returns `None` for URIs outside the library.
pub fn location_from_uri(uri: &str, media_root: &str) -> Option<String> {
    let path = uri.strip_prefix("file://")?;
    let decoded = urlencoding::decode(path).ok()?;
    let root = media_root.trim_end_matches('/');
    let relative = decoded.strip_prefix(root)?.trim_start_matches('/');
    let (parent, _file) = relative.rsplit_once('/')?;
    Some(parent.to_string())
}

/// Poll source for the primary player.
///
/// Uses the cancel-restart overlap policy: a status sample loses its value
/// once the next tick arrives, so a stalled query is abandoned rather than
/// awaited.
pub struct PrimarySource {
    client: PlayerClient,
    resolver: Arc<dyn ItemResolver>,
    progress: Arc<ProgressStore>,
    media_root: String,
}

impl PrimarySource {
    pub fn new(
        client: PlayerClient,
        resolver: Arc<dyn ItemResolver>,
        progress: Arc<ProgressStore>,
        media_root: impl Into<String>,
    ) -> Self {
        Self {
            client,
            resolver,
            progress,
            media_root: media_root.into(),
        }
    }

    async fn record_progress(&self, status: &PlayerStatus) {
        let Some(name) = status.filename() else {
            return;
        };
        let uri = match self.resolver.resolve_uri(name).await {
            Ok(Some(uri)) => uri,
            Ok(None) => {
                debug!(item = name, "No playlist entry for current item");
                return;
            }
            Err(err) => {
                warn!(error = %err, "Playlist lookup failed, progress not recorded");
                return;
            }
        };
        let Some(location) = location_from_uri(&uri, &self.media_root) else {
            debug!(%uri, "Current item is outside the media library");
            return;
        };
        let entry = ProgressEntry {
            content_name: name.to_string(),
            position_seconds: status.time as f64,
            observed_at_epoch_ms: epoch_ms_now(),
        };
        if let Err(err) = self.progress.save(&location, entry).await {
            warn!(error = %err, "Saving view progress failed");
        }
    }
}

#[async_trait]
impl StatusSource for PrimarySource {
    type Status = PlayerStatus;

    fn label(&self) -> &'static str {
        "primary"
    }

    fn overlap_policy(&self) -> OverlapPolicy {
        OverlapPolicy::CancelRestart
    }

    async fn query(&self) -> Result<PlayerStatus, ControlError> {
        self.client.status().await
    }

    async fn on_snapshot(&self, snapshot: &Snapshot<PlayerStatus>) {
        if snapshot.current.state.is_playing() {
            self.record_progress(&snapshot.current).await;
        }
    }

    fn wrap(&self, snapshot: Snapshot<PlayerStatus>) -> PlayerEvent {
        PlayerEvent::PrimaryStatus(snapshot)
    }
}

fn port_of(base_url: &str) -> u16 {
    base_url
        .rsplit(':')
        .next()
        .and_then(|tail| {
            tail.trim_end_matches('/')
                .parse::<u16>()
                .ok()
        })
        .unwrap_or(8080)
}
