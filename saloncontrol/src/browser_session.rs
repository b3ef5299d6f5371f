//! Remote-controlled browser session.
//!
//! The browser is launched with its remote automation agent listening on a
//! local port. The session talks to that agent over HTTP: navigation, script
//! evaluation, and a readiness probe. Scripts run in the page, so playback
//! state and commands both go through `evaluate`.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::ControlError;
use crate::model::BrowserStatus;

/// How many times to probe the automation agent after spawning the browser.
const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(300);

/// Script evaluated in the page to sample playback state. Reads the first
/// `<video>` element and reports a JSON document matching [`BrowserStatus`].
const STATUS_SCRIPT: &str = r#"
(() => {
    const v = document.querySelector('video');
    if (!v) {
        return JSON.stringify({
            title: document.title, position: 0, duration: 0, volume: 0,
            muted: false, loading: true, state: 'stopped', fullscreen: false
        });
    }
    return JSON.stringify({
        title: document.title,
        position: Math.floor(v.currentTime),
        duration: Math.floor(v.duration || 0),
        volume: v.volume,
        muted: v.muted,
        loading: v.readyState < 3,
        state: v.ended ? 'stopped' : (v.paused ? 'paused' : 'playing'),
        fullscreen: document.fullscreenElement !== null
    });
})()
"#;

#[derive(Debug, Deserialize)]
struct EvaluateReply {
    value: serde_json::Value,
}

struct SessionState {
    child: Option<Child>,
    connected: bool,
}

/// Handle on the automated browser. Cheap to share behind an `Arc`; all
/// mutation goes through the internal lock.
pub struct BrowserSession {
    client: Client,
    executable: String,
    agent_url: String,
    state: Mutex<SessionState>,
}

impl BrowserSession {
    pub fn new(executable: impl Into<String>, debug_port: u16) -> Self {
        Self {
            client: Client::new(),
            executable: executable.into(),
            agent_url: format!("http://localhost:{debug_port}"),
            state: Mutex::new(SessionState {
                child: None,
                connected: false,
            }),
        }
    }

    pub fn from_config() -> Self {
        let config = salonconfig::get_config();
        Self::new(
            config.get_browser_executable(),
            config.get_browser_debug_port(),
        )
    }

    /// Spawn the browser if needed and wait until its automation agent
    /// answers. Idempotent: a live session returns immediately.
    pub async fn wake(&self) -> Result<(), ControlError> {
        let mut state = self.state.lock().await;

        if state.connected && self.probe().await {
            return Ok(());
        }
        state.connected = false;

        if state.child.is_none() {
            info!(executable = %self.executable, "Spawning browser");
            let port = self
                .agent_url
                .rsplit(':')
                .next()
                .unwrap_or("0")
                .to_string();
            let child = Command::new(&self.executable)
                .arg(format!("--remote-debugging-port={port}"))
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| ControlError::browser_session(format!("spawn failed: {err}")))?;
            state.child = Some(child);
        }

        for attempt in 1..=CONNECT_ATTEMPTS {
            if self.probe().await {
                debug!(attempt, "Browser agent reachable");
                state.connected = true;
                return Ok(());
            }
            tokio::time::sleep(CONNECT_RETRY_DELAY).await;
        }

        Err(ControlError::browser_session(
            "automation agent did not come up",
        ))
    }

    async fn probe(&self) -> bool {
        self.client
            .get(format!("{}/session/status", self.agent_url))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Navigate the page. Requires a woken session.
    pub async fn goto(&self, url: &str) -> Result<(), ControlError> {
        self.require_connected().await?;
        debug!(%url, "Browser navigate");
        let response = self
            .client
            .post(format!("{}/session/navigate", self.agent_url))
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(ControlError::browser_session)?;
        if !response.status().is_success() {
            return Err(ControlError::browser_session(format!(
                "navigate returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    /// Evaluate a script in the page and return its value.
    pub async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, ControlError> {
        self.require_connected().await?;
        let response = self
            .client
            .post(format!("{}/session/evaluate", self.agent_url))
            .json(&json!({ "expression": expression }))
            .send()
            .await
            .map_err(ControlError::browser_session)?;
        if !response.status().is_success() {
            return Err(ControlError::browser_session(format!(
                "evaluate returned HTTP {}",
                response.status().as_u16()
            )));
        }
        let reply: EvaluateReply = response
            .json()
            .await
            .map_err(|err| ControlError::malformed_response("session/evaluate", err))?;
        Ok(reply.value)
    }

    /// Sample the page's playback state.
    pub async fn status(&self) -> Result<BrowserStatus, ControlError> {
        let value = self.evaluate(STATUS_SCRIPT).await?;
        let raw = value.as_str().ok_or_else(|| {
            ControlError::malformed_response("session/evaluate", "status script returned non-string")
        })?;
        serde_json::from_str(raw)
            .map_err(|err| ControlError::malformed_response("session/evaluate", err))
    }

    /// Drop the child process, if any. The session degrades to disconnected;
    /// the next `wake` respawns.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.connected = false;
        if let Some(mut child) = state.child.take() {
            if let Err(err) = child.kill().await {
                warn!(error = %err, "Browser process did not die cleanly");
            }
        }
    }

    async fn require_connected(&self) -> Result<(), ControlError> {
        if self.state.lock().await.connected {
            Ok(())
        } else {
            Err(ControlError::BrowserNotConnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_session_rejects_commands() {
        let session = BrowserSession::new("firefox", 19999);
        assert!(!session.is_connected().await);
        assert!(matches!(
            session.goto("https://example.com").await,
            Err(ControlError::BrowserNotConnected)
        ));
        assert!(matches!(
            session.evaluate("1 + 1").await,
            Err(ControlError::BrowserNotConnected)
        ));
    }

    #[test]
    fn status_script_parses_into_browser_status() {
        // The shape the page script emits must deserialize as BrowserStatus.
        let sample = r#"{
            "title": "Some video",
            "position": 42,
            "duration": 600,
            "volume": 0.8,
            "muted": false,
            "loading": false,
            "state": "playing",
            "fullscreen": true
        }"#;
        let status: BrowserStatus = serde_json::from_str(sample).unwrap();
        assert_eq!(status.position, 42);
        assert!(status.state.is_playing());
    }
}
