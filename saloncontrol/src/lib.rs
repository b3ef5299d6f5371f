//! Control plane for the living-room media hub.
//!
//! Two playback backends share one screen: the primary media player and a
//! remote-controlled browser. This crate keeps them mutually exclusive,
//! samples their status on a fixed cadence, records view progress, and hands
//! the resulting event stream to whoever wants to push it to clients.

pub mod browser;
pub mod browser_session;
pub mod errors;
pub mod hub;
pub mod media;
pub mod model;
pub mod player_client;
pub mod poller;
pub mod primary;
pub mod progress;
pub mod scheduler;

pub use browser::{BrowserBackend, BrowserCommand, BrowserSource};
pub use browser_session::BrowserSession;
pub use errors::ControlError;
pub use hub::{ControlHub, EventSource, EventSubscription};
pub use media::MediaLibrary;
pub use model::{
    BackendKind, BrowserStatus, MediaItem, MediaListing, PlaybackState, PlayerEvent, PlayerStatus,
    Snapshot,
};
pub use player_client::PlayerClient;
pub use poller::{spawn_status_poller, OverlapPolicy, PollerHandle, StatusSource};
pub use primary::{PrimaryBackend, PrimarySource};
pub use progress::{LastWatched, ProgressEntry, ProgressState, ProgressStore};
pub use scheduler::{ExclusiveScheduler, ManagedBackend};
