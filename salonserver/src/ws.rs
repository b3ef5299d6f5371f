//! WebSocket push channel.
//!
//! Viewers connect to `/ws` and receive the event stream as JSON text frames.
//! The upstream feed subscription is lazy: it opens when the first viewer
//! arrives and closes again once a status event reports non-playing while no
//! viewer is connected. Each viewer gets a small bounded queue; a viewer that
//! cannot keep up loses events instead of slowing the others down.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use saloncontrol::hub::{EventSource, EventSubscription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Frames queued per viewer before it starts losing events.
const VIEWER_QUEUE: usize = 32;

struct Inner {
    source: Arc<dyn EventSource>,
    viewers: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    upstream: Mutex<Option<JoinHandle<()>>>,
}

/// Fan-out from the event feed to all connected viewers.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                viewers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                upstream: Mutex::new(None),
            }),
        }
    }

    /// Register a viewer and make sure the upstream relay is running.
    pub fn register_viewer(&self) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(VIEWER_QUEUE);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .viewers
            .lock()
            .unwrap()
            .insert(id, tx);
        debug!(viewer = id, "Viewer registered");
        self.ensure_upstream();
        (id, rx)
    }

    /// Remove a viewer. The upstream relay keeps running; it retires on its
    /// own once playback stops with nobody watching.
    pub fn unregister_viewer(&self, id: u64) {
        self.inner
            .viewers
            .lock()
            .unwrap()
            .remove(&id);
        debug!(viewer = id, "Viewer unregistered");
    }

    pub fn viewer_count(&self) -> usize {
        self.inner
            .viewers
            .lock()
            .unwrap()
            .len()
    }

    fn ensure_upstream(&self) {
        let mut upstream = self
            .inner
            .upstream
            .lock()
            .unwrap();
        if upstream.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        info!("Opening upstream event subscription");
        let subscription = self.inner.source.subscribe();
        let inner = self.inner.clone();
        *upstream = Some(tokio::spawn(relay(inner, subscription)));
    }
}

/// Forward events to viewers until the feed closes or playback stops with an
/// empty viewer registry.
async fn relay(inner: Arc<Inner>, mut subscription: EventSubscription) {
    while let Some(event) = subscription.recv().await {
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "Dropping unserializable event");
                continue;
            }
        };

        let no_viewers = {
            let mut viewers = inner.viewers.lock().unwrap();
            viewers.retain(|id, tx| match tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    // Lagging viewer: drop this frame for it, keep the rest
                    // of the room live.
                    debug!(viewer = id, "Viewer queue full, frame dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
            viewers.is_empty()
        };

        if no_viewers && event.reports_playing() == Some(false) {
            // The registry re-check and the slot clear happen under the
            // upstream lock, so a registering viewer either finds this task
            // still alive or an empty slot to respawn into.
            let mut upstream = inner.upstream.lock().unwrap();
            if inner.viewers.lock().unwrap().is_empty() {
                info!("Nothing playing and no viewers left, closing upstream subscription");
                *upstream = None;
                return;
            }
        }
    }
    debug!("Upstream event feed ended");
}

/// Axum handler for `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(broadcaster): State<Broadcaster>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

/// Drive one WebSocket connection until the client leaves.
async fn handle_socket(socket: WebSocket, broadcaster: Broadcaster) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (id, mut rx) = broadcaster.register_viewer();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // The channel is push-only; inbound frames are only read to notice the
    // close.
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    broadcaster.unregister_viewer(id);
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use saloncontrol::model::{
        MediaListing, PlaybackState, PlayerEvent, PlayerStatus, Snapshot,
    };
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::time::timeout;

    /// Event source whose subscriptions the test feeds by hand.
    #[derive(Default)]
    struct FakeSource {
        taps: Mutex<Vec<UnboundedSender<PlayerEvent>>>,
        subscriptions: AtomicUsize,
    }

    impl FakeSource {
        fn push(&self, event: PlayerEvent) {
            let taps = self.taps.lock().unwrap();
            for tap in taps.iter() {
                let _ = tap.send(event.clone());
            }
        }

        fn subscription_count(&self) -> usize {
            self.subscriptions.load(Ordering::SeqCst)
        }

        fn live_taps(&self) -> usize {
            self.taps
                .lock()
                .unwrap()
                .iter()
                .filter(|tap| !tap.is_closed())
                .count()
        }
    }

    impl EventSource for FakeSource {
        fn subscribe(&self) -> EventSubscription {
            let (tx, rx) = mpsc::unbounded_channel();
            self.taps.lock().unwrap().push(tx);
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            EventSubscription::new(rx)
        }
    }

    fn status_event(state: PlaybackState) -> PlayerEvent {
        PlayerEvent::PrimaryStatus(Snapshot {
            current: PlayerStatus {
                state,
                ..PlayerStatus::default()
            },
            previous: None,
        })
    }

    fn media_event() -> PlayerEvent {
        PlayerEvent::Media(MediaListing {
            media: Vec::new(),
            last_watched: None,
        })
    }

    async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> String {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("viewer channel closed")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn upstream_opens_on_first_viewer_only() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Broadcaster::new(source.clone());
        assert_eq!(source.subscription_count(), 0);

        let (_a, _rx_a) = broadcaster.register_viewer();
        let (_b, _rx_b) = broadcaster.register_viewer();
        settle().await;

        assert_eq!(source.subscription_count(), 1);
        assert_eq!(broadcaster.viewer_count(), 2);
    }

    #[tokio::test]
    async fn frames_reach_every_viewer() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Broadcaster::new(source.clone());
        let (_a, mut rx_a) = broadcaster.register_viewer();
        let (_b, mut rx_b) = broadcaster.register_viewer();
        settle().await;

        source.push(status_event(PlaybackState::Playing));

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = recv_frame(rx).await;
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["type"], "primary-status");
        }
    }

    #[tokio::test]
    async fn upstream_survives_viewers_leaving_while_playing() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Broadcaster::new(source.clone());

        let (id, _rx) = broadcaster.register_viewer();
        settle().await;
        broadcaster.unregister_viewer(id);

        // Still playing: the subscription must stay open for late joiners.
        source.push(status_event(PlaybackState::Playing));
        settle().await;
        assert_eq!(source.live_taps(), 1);

        let (_again, mut rx) = broadcaster.register_viewer();
        source.push(status_event(PlaybackState::Playing));
        let frame = recv_frame(&mut rx).await;
        assert!(frame.contains("primary-status"));
        // No second subscription was needed.
        assert_eq!(source.subscription_count(), 1);
    }

    #[tokio::test]
    async fn upstream_closes_when_idle_and_unwatched() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Broadcaster::new(source.clone());

        let (id, _rx) = broadcaster.register_viewer();
        settle().await;
        broadcaster.unregister_viewer(id);

        source.push(status_event(PlaybackState::Stopped));
        settle().await;
        assert_eq!(source.live_taps(), 0);

        // The next viewer reopens a fresh subscription.
        let (_again, _rx_again) = broadcaster.register_viewer();
        settle().await;
        assert_eq!(source.subscription_count(), 2);
        assert_eq!(source.live_taps(), 1);
    }

    #[tokio::test]
    async fn viewer_arriving_during_teardown_is_not_stranded() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Broadcaster::new(source.clone());

        let (id, _rx) = broadcaster.register_viewer();
        settle().await;
        broadcaster.unregister_viewer(id);

        // Register again right behind the stopped event, racing the relay's
        // retirement. Whichever side wins, the new viewer must end up with a
        // live upstream feeding it.
        source.push(status_event(PlaybackState::Stopped));
        let (_late, mut rx) = broadcaster.register_viewer();
        settle().await;

        source.push(status_event(PlaybackState::Playing));
        recv_frame(&mut rx).await;
    }

    #[tokio::test]
    async fn media_events_never_close_the_upstream() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Broadcaster::new(source.clone());

        let (id, _rx) = broadcaster.register_viewer();
        settle().await;
        broadcaster.unregister_viewer(id);

        source.push(media_event());
        settle().await;
        assert_eq!(source.live_taps(), 1);
    }

    #[tokio::test]
    async fn slow_viewer_loses_frames_without_blocking_others() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Broadcaster::new(source.clone());
        let (_slow, mut rx_slow) = broadcaster.register_viewer();
        let (_fast, mut rx_fast) = broadcaster.register_viewer();
        settle().await;

        // Overflow the per-viewer queue without draining either side.
        for _ in 0..VIEWER_QUEUE + 8 {
            source.push(status_event(PlaybackState::Playing));
        }
        settle().await;

        // Drain the slow viewer: it kept at most one queue's worth.
        let mut slow_frames = 0;
        while rx_slow.try_recv().is_ok() {
            slow_frames += 1;
        }
        assert_eq!(slow_frames, VIEWER_QUEUE);

        // Both viewers still receive fresh frames afterwards.
        while rx_fast.try_recv().is_ok() {}
        source.push(status_event(PlaybackState::Playing));
        recv_frame(&mut rx_slow).await;
        recv_frame(&mut rx_fast).await;
    }
}
