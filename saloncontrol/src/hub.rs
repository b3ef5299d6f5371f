//! Control hub.
//!
//! Single entry point for the HTTP surface: routes commands through the
//! exclusive scheduler, keeps the status pollers in step with the active
//! backend, and hands out event subscriptions for the push channel.
//!
//! Feeds are lazy. The first subscription spawns the pollers and a fanout
//! task; once the last subscription is gone the fanout tears everything down
//! again, so an idle hub polls nothing.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::browser::{BrowserBackend, BrowserCommand, BrowserSource};
use crate::browser_session::BrowserSession;
use crate::errors::ControlError;
use crate::model::{BackendKind, MediaListing, PlayerEvent};
use crate::player_client::PlayerClient;
use crate::poller::{spawn_status_poller, PollerHandle};
use crate::primary::{PrimaryBackend, PrimarySource};
use crate::progress::ProgressStore;
use crate::scheduler::ExclusiveScheduler;

/// A live event feed. Dropping it unsubscribes; the hub notices on the next
/// delivered event.
pub struct EventSubscription {
    rx: UnboundedReceiver<PlayerEvent>,
}

impl EventSubscription {
    pub fn new(rx: UnboundedReceiver<PlayerEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<PlayerEvent> {
        self.rx.recv().await
    }
}

/// Anything that can hand out event subscriptions.
pub trait EventSource: Send + Sync + 'static {
    fn subscribe(&self) -> EventSubscription;
}

struct PollerSet {
    primary: PollerHandle,
    browser: Option<PollerHandle>,
}

#[derive(Default)]
struct FeedState {
    subscribers: Vec<UnboundedSender<PlayerEvent>>,
    pollers: Option<PollerSet>,
    feed_tx: Option<UnboundedSender<PlayerEvent>>,
}

pub struct ControlHub {
    scheduler: ExclusiveScheduler<PrimaryBackend, BrowserBackend>,
    primary: Arc<PrimaryBackend>,
    browser: Arc<BrowserBackend>,
    primary_source: Arc<PrimarySource>,
    browser_source: Arc<BrowserSource>,
    poll_interval: Duration,
    feeds: Arc<StdMutex<FeedState>>,
}

impl ControlHub {
    pub fn new(
        primary: Arc<PrimaryBackend>,
        browser: Arc<BrowserBackend>,
        primary_source: Arc<PrimarySource>,
        browser_source: Arc<BrowserSource>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scheduler: ExclusiveScheduler::new(primary.clone(), browser.clone()),
            primary,
            browser,
            primary_source,
            browser_source,
            poll_interval,
            feeds: Arc::new(StdMutex::new(FeedState::default())),
        }
    }

    /// Assemble the whole control plane from the active configuration.
    pub fn from_config(progress: Arc<ProgressStore>) -> Self {
        let config = salonconfig::get_config();
        let client = PlayerClient::from_config();
        let session = Arc::new(BrowserSession::from_config());

        let primary = Arc::new(PrimaryBackend::from_config());
        let browser = Arc::new(BrowserBackend::from_config(session.clone()));
        let primary_source = Arc::new(PrimarySource::new(
            client.clone(),
            Arc::new(client),
            progress,
            config.get_media_root(),
        ));
        let browser_source = Arc::new(BrowserSource::new(session));

        Self::new(
            primary,
            browser,
            primary_source,
            browser_source,
            Duration::from_millis(config.get_poll_interval_ms()),
        )
    }

    /// Route a raw operation to the primary player, activating it first.
    pub async fn player_command(
        &self,
        operation: &str,
    ) -> Result<serde_json::Value, ControlError> {
        self.scheduler.ensure_active(BackendKind::Primary).await?;
        let reply = self.primary.run_command(operation).await?;
        self.sync_feeds(BackendKind::Primary);
        Ok(reply)
    }

    /// Route a command to the browser backend, activating it first.
    pub async fn browser_command(&self, command: BrowserCommand) -> Result<(), ControlError> {
        self.scheduler.ensure_active(BackendKind::Browser).await?;
        self.browser.run(command).await?;
        self.sync_feeds(BackendKind::Browser);
        Ok(())
    }

    /// Search the browser backend's video catalogue. Pure pass-through, no
    /// backend activation involved.
    pub async fn browser_search(&self, query: &str) -> Result<serde_json::Value, ControlError> {
        self.browser.search(query).await
    }

    /// Currently active backend.
    pub async fn active_backend(&self) -> Option<BackendKind> {
        self.scheduler.active().await
    }

    /// Push a media listing to all live subscribers.
    pub fn publish_media(&self, listing: MediaListing) {
        let mut state = self.feeds.lock().unwrap();
        state
            .subscribers
            .retain(|tx| tx.send(PlayerEvent::Media(listing.clone())).is_ok());
        close_if_abandoned(&mut state);
    }

    /// Whether any poller is currently running. Mostly useful to observe the
    /// lazy feed lifecycle.
    pub fn feeds_running(&self) -> bool {
        let state = self.feeds.lock().unwrap();
        state
            .pollers
            .as_ref()
            .is_some_and(|set| set.primary.is_running())
    }

    /// Align the poller set with the active backend. The primary poller runs
    /// whenever feeds are open; the browser poller only while the browser is
    /// the active backend.
    fn sync_feeds(&self, active: BackendKind) {
        let mut state = self.feeds.lock().unwrap();
        let Some(feed_tx) = state.feed_tx.clone() else {
            return;
        };
        let Some(set) = state.pollers.as_mut() else {
            return;
        };
        match active {
            BackendKind::Browser => {
                if set.browser.as_ref().is_none_or(|h| !h.is_running()) {
                    debug!("Starting browser status poller");
                    set.browser = Some(spawn_status_poller(
                        self.browser_source.clone(),
                        self.poll_interval,
                        feed_tx,
                    ));
                }
            }
            BackendKind::Primary => {
                if set.browser.take().is_some() {
                    debug!("Stopping browser status poller");
                }
            }
        }
    }

    fn open_feeds(&self, state: &mut FeedState) {
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel::<PlayerEvent>();

        let primary = spawn_status_poller(
            self.primary_source.clone(),
            self.poll_interval,
            feed_tx.clone(),
        );
        let browser = match self.scheduler.active_hint() {
            Some(BackendKind::Browser) => Some(spawn_status_poller(
                self.browser_source.clone(),
                self.poll_interval,
                feed_tx.clone(),
            )),
            _ => None,
        };
        state.pollers = Some(PollerSet { primary, browser });
        state.feed_tx = Some(feed_tx);

        // Fanout task: forwards each event to every subscriber and closes the
        // whole feed once the last subscriber is gone.
        let feeds = self.feeds.clone();
        tokio::spawn(async move {
            while let Some(event) = feed_rx.recv().await {
                let mut state = feeds.lock().unwrap();
                state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
                if state.subscribers.is_empty() {
                    close_if_abandoned(&mut state);
                    return;
                }
            }
        });
        info!("Event feeds opened");
    }
}

/// Drop the pollers once nothing listens anymore.
fn close_if_abandoned(state: &mut FeedState) {
    if state.subscribers.is_empty() && state.pollers.is_some() {
        info!("Last event subscriber gone, closing feeds");
        state.pollers = None;
        state.feed_tx = None;
    }
}

impl EventSource for ControlHub {
    fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.feeds.lock().unwrap();
        state.subscribers.push(tx);

        let stale = state
            .pollers
            .as_ref()
            .is_none_or(|set| !set.primary.is_running());
        if stale {
            self.open_feeds(&mut state);
        }
        EventSubscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlaybackState;

    fn test_hub(dir: &std::path::Path) -> ControlHub {
        // Backends point at unreachable ports; status queries fail and the
        // pollers just log, which is enough to exercise the feed lifecycle.
        let client = PlayerClient::new("http://localhost:1", "pw");
        let session = Arc::new(BrowserSession::new("false", 19996));
        let progress = Arc::new(ProgressStore::load(dir.join("progress.json")));

        let primary = Arc::new(PrimaryBackend::new(
            client.clone(),
            "false",
            "pw",
            1,
            "/srv/media",
        ));
        let browser = Arc::new(BrowserBackend::new(
            session.clone(),
            "https://www.youtube.com/watch?v=",
            "",
        ));
        let primary_source = Arc::new(PrimarySource::new(
            client.clone(),
            Arc::new(client),
            progress,
            "/srv/media",
        ));
        let browser_source = Arc::new(BrowserSource::new(session));
        ControlHub::new(
            primary,
            browser,
            primary_source,
            browser_source,
            Duration::from_millis(20),
        )
    }

    fn listing() -> MediaListing {
        MediaListing {
            media: Vec::new(),
            last_watched: None,
        }
    }

    #[tokio::test]
    async fn first_subscription_opens_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(dir.path());

        assert!(!hub.feeds_running());
        let _subscription = hub.subscribe();
        assert!(hub.feeds_running());
    }

    #[tokio::test]
    async fn published_media_reaches_all_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(dir.path());

        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        hub.publish_media(listing());

        for subscription in [&mut a, &mut b] {
            match subscription.recv().await {
                Some(PlayerEvent::Media(_)) => {}
                other => panic!("expected media event, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn feeds_close_after_last_subscriber_drops() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(dir.path());

        let subscription = hub.subscribe();
        assert!(hub.feeds_running());
        drop(subscription);

        // Teardown happens on the next delivered event.
        hub.publish_media(listing());
        assert!(!hub.feeds_running());

        // A fresh subscription reopens everything.
        let _again = hub.subscribe();
        assert!(hub.feeds_running());
    }

    #[tokio::test]
    async fn event_stream_type_is_visible_to_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(dir.path());

        let mut subscription = hub.subscribe();
        hub.publish_media(listing());

        let event = subscription.recv().await.unwrap();
        assert!(event.reports_playing().is_none());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "media");

        // Status events carry a playing flag.
        let status = PlayerEvent::PrimaryStatus(crate::model::Snapshot {
            current: crate::model::PlayerStatus {
                state: PlaybackState::Playing,
                ..Default::default()
            },
            previous: None,
        });
        assert_eq!(status.reports_playing(), Some(true));
    }
}
