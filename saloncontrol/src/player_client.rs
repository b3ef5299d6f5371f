//! HTTP client for the primary player's control interface.
//!
//! The player exposes commands and status as JSON documents under
//! `/requests/`, authenticated with HTTP basic auth (empty user name). Every
//! command is a GET whose query string carries the operation parameters.

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::ControlError;
use crate::model::{find_playlist_leaf, PlayerStatus, PlaylistNode};

/// Client for the primary player's HTTP interface.
#[derive(Debug, Clone)]
pub struct PlayerClient {
    client: Client,
    base_url: String,
    password: String,
}

impl PlayerClient {
    pub fn new(base_url: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            password: password.into(),
        }
    }

    /// Build a client from the active configuration.
    pub fn from_config() -> Self {
        let config = salonconfig::get_config();
        Self::new(config.get_player_base_url(), config.get_player_password())
    }

    /// Run one operation against the player and decode the JSON reply.
    ///
    /// `operation` is the raw path-and-query fragment under `/requests/`, for
    /// example `status.json?command=pl_forcepause`. Media paths in it are
    /// expected to already be absolute, see [`expand_media_paths`].
    pub async fn run_command<T: DeserializeOwned>(
        &self,
        operation: &str,
    ) -> Result<T, ControlError> {
        let url = format!("{}/requests/{}", self.base_url, operation);
        debug!(%url, "Player command");

        let response = self
            .client
            .get(&url)
            .basic_auth("", Some(&self.password))
            .send()
            .await
            .map_err(|err| ControlError::player_request(operation, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::PlayerHttpStatus(
                operation.to_string(),
                status.as_u16(),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| ControlError::malformed_response(operation, err))
    }

    pub async fn status(&self) -> Result<PlayerStatus, ControlError> {
        self.run_command("status.json").await
    }

    pub async fn playlist(&self) -> Result<PlaylistNode, ControlError> {
        self.run_command("playlist.json").await
    }

    /// Look up the playlist leaf behind an item name the player reported.
    pub async fn playlist_item(&self, name: &str) -> Result<Option<PlaylistNode>, ControlError> {
        let playlist = self.playlist().await?;
        Ok(find_playlist_leaf(&playlist, name).cloned())
    }

    /// Pause playback if anything is playing. `pl_forcepause` is a no-op on an
    /// already paused or stopped player, so this is safe to call blindly.
    pub async fn force_pause(&self) -> Result<PlayerStatus, ControlError> {
        self.run_command("status.json?command=pl_forcepause").await
    }
}

/// Expand library-relative media references in a raw operation string.
///
/// Clients address media by their path below the library root; the player
/// wants absolute filesystem paths. Only the `in_play` and `in_enqueue`
/// commands carry such a path.
pub fn expand_media_paths(operation: &str, media_root: &str) -> String {
    let root = media_root.trim_end_matches('/');
    operation
        .replace(
            "command=in_play&input=",
            &format!("command=in_play&input={root}/"),
        )
        .replace(
            "command=in_enqueue&input=",
            &format!("command=in_enqueue&input={root}/"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_command_gets_media_root_prefixed() {
        let expanded = expand_media_paths(
            "status.json?command=in_play&input=Movies/film.mkv",
            "/srv/media",
        );
        assert_eq!(
            expanded,
            "status.json?command=in_play&input=/srv/media/Movies/film.mkv"
        );
    }

    #[test]
    fn enqueue_command_gets_media_root_prefixed() {
        let expanded = expand_media_paths(
            "status.json?command=in_enqueue&input=Movies/film2.mkv",
            "/srv/media/",
        );
        assert_eq!(
            expanded,
            "status.json?command=in_enqueue&input=/srv/media/Movies/film2.mkv"
        );
    }

    #[test]
    fn other_commands_pass_through_unchanged() {
        let raw = "status.json?command=pl_forcepause";
        assert_eq!(expand_media_paths(raw, "/srv/media"), raw);
    }
}
