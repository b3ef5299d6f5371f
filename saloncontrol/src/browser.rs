//! Browser playback backend.
//!
//! Playback lives inside a web page, so every command becomes either a
//! navigation or a script evaluated against the page's `<video>` element.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::browser_session::BrowserSession;
use crate::errors::ControlError;
use crate::model::{BackendKind, BrowserStatus, PlayerEvent, Snapshot};
use crate::poller::{OverlapPolicy, StatusSource};
use crate::scheduler::ManagedBackend;

const SEARCH_API: &str = "https://www.googleapis.com/youtube/v3/search";

const PAUSE_SCRIPT: &str = "document.querySelector('video')?.pause()";
const RESUME_SCRIPT: &str = "document.querySelector('video')?.play()";
const NEXT_SCRIPT: &str = "document.querySelector('.ytp-next-button')?.click()";
const PREV_SCRIPT: &str = "document.querySelector('.ytp-prev-button')?.click()";

/// One command posted by a client for the browser backend.
#[derive(Clone, Debug, Deserialize)]
#[serde(
    tag = "action",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum BrowserCommand {
    /// Load and play a video by its site identifier.
    Play { video_id: String },
    Resume,
    Pause,
    /// Jump to an absolute position in seconds.
    Seek { position: u64 },
    /// Volume in `[0, 1]`.
    SetVolume { volume: f64 },
    Next,
    Prev,
}

pub struct BrowserBackend {
    session: Arc<BrowserSession>,
    http: reqwest::Client,
    watch_url: String,
    search_api_key: String,
}

impl BrowserBackend {
    pub fn new(
        session: Arc<BrowserSession>,
        watch_url: impl Into<String>,
        search_api_key: impl Into<String>,
    ) -> Self {
        Self {
            session,
            http: reqwest::Client::new(),
            watch_url: watch_url.into(),
            search_api_key: search_api_key.into(),
        }
    }

    pub fn from_config(session: Arc<BrowserSession>) -> Self {
        let config = salonconfig::get_config();
        Self::new(
            session,
            config.get_browser_watch_url(),
            config.get_browser_search_api_key(),
        )
    }

    pub fn session(&self) -> &Arc<BrowserSession> {
        &self.session
    }

    /// Execute one client command against the live session.
    pub async fn run(&self, command: BrowserCommand) -> Result<(), ControlError> {
        debug!(?command, "Browser command");
        match command {
            BrowserCommand::Play { video_id } => {
                let url = format!("{}{}", self.watch_url, video_id);
                self.session.goto(&url).await
            }
            BrowserCommand::Resume => self.session.evaluate(RESUME_SCRIPT).await.map(|_| ()),
            BrowserCommand::Pause => self.session.evaluate(PAUSE_SCRIPT).await.map(|_| ()),
            BrowserCommand::Seek { position } => {
                let script = format!(
                    "(() => {{ const v = document.querySelector('video'); if (v) v.currentTime = {position}; }})()"
                );
                self.session.evaluate(&script).await.map(|_| ())
            }
            BrowserCommand::SetVolume { volume } => {
                let clamped = volume.clamp(0.0, 1.0);
                let script = format!(
                    "(() => {{ const v = document.querySelector('video'); if (v) v.volume = {clamped}; }})()"
                );
                self.session.evaluate(&script).await.map(|_| ())
            }
            BrowserCommand::Next => self.session.evaluate(NEXT_SCRIPT).await.map(|_| ()),
            BrowserCommand::Prev => self.session.evaluate(PREV_SCRIPT).await.map(|_| ()),
        }
    }

    /// Proxy a video search to the site's data API and hand its JSON back
    /// untouched. Never touches the browser session.
    pub async fn search(&self, query: &str) -> Result<serde_json::Value, ControlError> {
        debug!(query, "Video search");
        let url = search_url(&self.search_api_key, query);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(ControlError::search_request)?;
        if !response.status().is_success() {
            return Err(ControlError::search_request(format!(
                "HTTP status {}",
                response.status().as_u16()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| ControlError::malformed_response("search", err))
    }
}

fn search_url(api_key: &str, query: &str) -> String {
    format!(
        "{SEARCH_API}?key={api_key}&type=video&part=snippet&q={}&maxResults=50",
        urlencoding::encode(query)
    )
}

#[async_trait]
impl ManagedBackend for BrowserBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Browser
    }

    async fn start(&self) -> Result<(), ControlError> {
        self.session.wake().await
    }

    async fn pause(&self) -> Result<(), ControlError> {
        // Never wake the browser just to pause it.
        if !self.session.is_connected().await {
            return Ok(());
        }
        self.session
            .evaluate(PAUSE_SCRIPT)
            .await
            .map(|_| ())
            .map_err(|err| ControlError::BackendPause(BackendKind::Browser, err.to_string()))
    }
}

/// Poll source for the browser backend.
///
/// Uses the skip-if-busy overlap policy: evaluate calls share the page's
/// single script context, so a new sample waits out the running one.
pub struct BrowserSource {
    session: Arc<BrowserSession>,
}

impl BrowserSource {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl StatusSource for BrowserSource {
    type Status = BrowserStatus;

    fn label(&self) -> &'static str {
        "browser"
    }

    fn overlap_policy(&self) -> OverlapPolicy {
        OverlapPolicy::SkipIfBusy
    }

    async fn query(&self) -> Result<BrowserStatus, ControlError> {
        self.session.status().await
    }

    fn wrap(&self, snapshot: Snapshot<BrowserStatus>) -> PlayerEvent {
        PlayerEvent::BrowserStatus(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_deserialize_from_the_wire_shape() {
        let play: BrowserCommand =
            serde_json::from_str(r#"{"action": "play", "data": {"videoId": "dQw4w9WgXcQ"}}"#)
                .unwrap();
        assert!(matches!(play, BrowserCommand::Play { video_id } if video_id == "dQw4w9WgXcQ"));

        let seek: BrowserCommand =
            serde_json::from_str(r#"{"action": "seek", "data": {"position": 90}}"#).unwrap();
        assert!(matches!(seek, BrowserCommand::Seek { position: 90 }));

        let pause: BrowserCommand = serde_json::from_str(r#"{"action": "pause"}"#).unwrap();
        assert!(matches!(pause, BrowserCommand::Pause));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result = serde_json::from_str::<BrowserCommand>(r#"{"action": "explode"}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pause_without_session_is_a_no_op() {
        let session = Arc::new(BrowserSession::new("firefox", 19998));
        let backend = BrowserBackend::new(session, "https://www.youtube.com/watch?v=", "");
        backend.pause().await.unwrap();
    }

    #[tokio::test]
    async fn commands_without_session_fail_cleanly() {
        let session = Arc::new(BrowserSession::new("firefox", 19997));
        let backend = BrowserBackend::new(session, "https://www.youtube.com/watch?v=", "");
        let result = backend.run(BrowserCommand::Resume).await;
        assert!(matches!(result, Err(ControlError::BrowserNotConnected)));
    }

    #[test]
    fn search_url_escapes_the_query() {
        let url = search_url("k3y", "chats drôles & co");
        assert!(url.starts_with("https://www.googleapis.com/youtube/v3/search?key=k3y&"));
        assert!(url.contains("q=chats%20dr%C3%B4les%20%26%20co"));
        assert!(url.ends_with("maxResults=50"));
    }
}
