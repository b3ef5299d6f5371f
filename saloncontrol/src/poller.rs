//! Generic status poller.
//!
//! One poller task per backend queries its status on a fixed cadence, wraps
//! each result in a [`Snapshot`] chained to the previous tick, runs the
//! source's hook, and emits the wrapped event. What happens when a query is
//! still outstanding at the next tick is the source's [`OverlapPolicy`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::errors::ControlError;
use crate::model::{PlayerEvent, Snapshot};

/// What a poller does when the previous query has not completed by the next
/// scheduled tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Abandon the in-flight query and issue a new one immediately. For
    /// backends where staleness is worse than a dropped sample.
    CancelRestart,
    /// Skip the tick entirely and resume on the following one. For backends
    /// where overlapping queries could corrupt in-flight session state.
    SkipIfBusy,
}

/// A pollable backend status endpoint.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    type Status: Clone + Send + Sync + 'static;

    /// Short name used in log lines.
    fn label(&self) -> &'static str;

    fn overlap_policy(&self) -> OverlapPolicy;

    async fn query(&self) -> Result<Self::Status, ControlError>;

    /// Invoked after each snapshot is built, before the event is emitted.
    async fn on_snapshot(&self, _snapshot: &Snapshot<Self::Status>) {}

    /// Wrap a snapshot into its push-channel event.
    fn wrap(&self, snapshot: Snapshot<Self::Status>) -> PlayerEvent;
}

/// Handle on a running poller task. Stopping (or dropping) the handle aborts
/// the task, which also drops any in-flight query so a late result can never
/// be emitted after the stop.
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a poller task for `source`, emitting events into `tx`.
///
/// The task ends on its own when the receiving side of `tx` goes away.
pub fn spawn_status_poller<S: StatusSource>(
    source: Arc<S>,
    period: Duration,
    tx: UnboundedSender<PlayerEvent>,
) -> PollerHandle {
    let task = tokio::spawn(async move {
        match source.overlap_policy() {
            OverlapPolicy::SkipIfBusy => run_skip_if_busy(source, period, tx).await,
            OverlapPolicy::CancelRestart => run_cancel_restart(source, period, tx).await,
        }
    });
    PollerHandle { task }
}

/// Build the chained snapshot, run the hook, and emit. Returns false when the
/// receiver is gone. A failed query never reaches this point, so `previous`
/// carries over unchanged to the next successful tick.
async fn emit<S: StatusSource>(
    source: &S,
    previous: &mut Option<S::Status>,
    current: S::Status,
    tx: &UnboundedSender<PlayerEvent>,
) -> bool {
    let snapshot = Snapshot {
        current,
        previous: previous.take(),
    };
    source.on_snapshot(&snapshot).await;
    *previous = Some(snapshot.current.clone());
    tx.send(source.wrap(snapshot)).is_ok()
}

async fn run_skip_if_busy<S: StatusSource>(
    source: Arc<S>,
    period: Duration,
    tx: UnboundedSender<PlayerEvent>,
) {
    let mut interval = tokio::time::interval(period);
    // A query running past its tick swallows the missed ticks; polling
    // resumes on the next scheduled one.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut previous: Option<S::Status> = None;

    loop {
        interval.tick().await;
        match source.query().await {
            Ok(status) => {
                if !emit(source.as_ref(), &mut previous, status, &tx).await {
                    return;
                }
            }
            Err(err) => {
                debug!(source = source.label(), error = %err, "Status query failed, skipping tick");
            }
        }
    }
}

async fn run_cancel_restart<S: StatusSource>(
    source: Arc<S>,
    period: Duration,
    tx: UnboundedSender<PlayerEvent>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut previous: Option<S::Status> = None;

    loop {
        interval.tick().await;
        // Race the query against the cadence: a tick firing first drops the
        // pending query and reissues immediately.
        loop {
            let query = source.query();
            tokio::pin!(query);
            tokio::select! {
                result = &mut query => {
                    match result {
                        Ok(status) => {
                            if !emit(source.as_ref(), &mut previous, status, &tx).await {
                                return;
                            }
                        }
                        Err(err) => {
                            debug!(source = source.label(), error = %err, "Status query failed, skipping tick");
                        }
                    }
                    break;
                }
                _ = interval.tick() => {
                    debug!(source = source.label(), "Query still pending at tick, restarting it");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlaybackState, PlayerStatus};
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
    use tokio::sync::mpsc;

    /// Source returning statuses whose `time` field counts query completions.
    struct TestSource {
        policy: OverlapPolicy,
        delay: Duration,
        started: AtomicU64,
        completed: AtomicU64,
        in_flight: AtomicI64,
        max_in_flight: AtomicI64,
        fail_on: Option<u64>,
    }

    impl TestSource {
        fn new(policy: OverlapPolicy, delay: Duration) -> Self {
            Self {
                policy,
                delay,
                started: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                in_flight: AtomicI64::new(0),
                max_in_flight: AtomicI64::new(0),
                fail_on: None,
            }
        }

        fn status(time: i64) -> PlayerStatus {
            PlayerStatus {
                state: PlaybackState::Playing,
                time,
                ..PlayerStatus::default()
            }
        }
    }

    /// Decrements the in-flight counter even when the query future is dropped
    /// mid-sleep by a cancel-restart or a stop.
    struct InFlightGuard<'a>(&'a AtomicI64);

    impl Drop for InFlightGuard<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StatusSource for TestSource {
        type Status = PlayerStatus;

        fn label(&self) -> &'static str {
            "test"
        }

        fn overlap_policy(&self) -> OverlapPolicy {
            self.policy
        }

        async fn query(&self) -> Result<PlayerStatus, ControlError> {
            let seq = self.started.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlightGuard(&self.in_flight);

            tokio::time::sleep(self.delay).await;

            self.completed.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(seq) {
                return Err(ControlError::player_request("status.json", "boom"));
            }
            Ok(Self::status(seq as i64))
        }

        fn wrap(&self, snapshot: Snapshot<PlayerStatus>) -> PlayerEvent {
            PlayerEvent::PrimaryStatus(snapshot)
        }
    }

    fn unwrap_snapshot(event: PlayerEvent) -> Snapshot<PlayerStatus> {
        match event {
            PlayerEvent::PrimaryStatus(snapshot) => snapshot,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshots_chain_previous_to_prior_current() {
        let source = Arc::new(TestSource::new(OverlapPolicy::SkipIfBusy, Duration::ZERO));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = spawn_status_poller(source, Duration::from_millis(10), tx);

        let mut snapshots = Vec::new();
        for _ in 0..4 {
            snapshots.push(unwrap_snapshot(rx.recv().await.unwrap()));
        }

        assert!(snapshots[0].previous.is_none());
        for pair in snapshots.windows(2) {
            assert_eq!(
                pair[1].previous.as_ref().unwrap().time,
                pair[0].current.time
            );
        }
    }

    #[tokio::test]
    async fn failed_query_skips_tick_without_poisoning_previous() {
        let mut source = TestSource::new(OverlapPolicy::SkipIfBusy, Duration::ZERO);
        source.fail_on = Some(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = spawn_status_poller(Arc::new(source), Duration::from_millis(10), tx);

        let first = unwrap_snapshot(rx.recv().await.unwrap());
        let second = unwrap_snapshot(rx.recv().await.unwrap());

        assert_eq!(first.current.time, 1);
        // Query 2 failed; the next emitted snapshot still chains to query 1.
        assert_eq!(second.current.time, 3);
        assert_eq!(second.previous.as_ref().unwrap().time, 1);
    }

    #[tokio::test]
    async fn skip_if_busy_never_overlaps_queries() {
        let source = Arc::new(TestSource::new(
            OverlapPolicy::SkipIfBusy,
            Duration::from_millis(35),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_status_poller(source.clone(), Duration::from_millis(10), tx);

        // Wait for a few slow queries to complete.
        for _ in 0..3 {
            let _ = rx.recv().await.unwrap();
        }
        handle.stop();

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        // Every started query ran to completion; none were abandoned.
        let started = source.started.load(Ordering::SeqCst);
        let completed = source.completed.load(Ordering::SeqCst);
        assert!(started == completed || started == completed + 1);
    }

    #[tokio::test]
    async fn cancel_restart_abandons_slow_queries() {
        let source = Arc::new(TestSource::new(
            OverlapPolicy::CancelRestart,
            Duration::from_millis(200),
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = spawn_status_poller(source.clone(), Duration::from_millis(10), tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();

        // Ticks kept restarting the query; none ever finished.
        assert!(source.started.load(Ordering::SeqCst) >= 3);
        assert_eq!(source.completed.load(Ordering::SeqCst), 0);
        // Restart replaces the pending query instead of stacking another.
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stopping_discards_in_flight_query() {
        let source = Arc::new(TestSource::new(
            OverlapPolicy::CancelRestart,
            Duration::from_millis(50),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_status_poller(source.clone(), Duration::from_millis(10), tx);

        tokio::time::sleep(Duration::from_millis(15)).await;
        handle.stop();
        // Give the aborted task's query time to have fired, were it alive.
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(rx.try_recv().is_err());
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn restarted_poller_resets_previous() {
        let source = Arc::new(TestSource::new(OverlapPolicy::SkipIfBusy, Duration::ZERO));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = spawn_status_poller(source.clone(), Duration::from_millis(10), tx.clone());
        let _ = unwrap_snapshot(rx.recv().await.unwrap());
        handle.stop();
        while rx.try_recv().is_ok() {}

        let _handle = spawn_status_poller(source, Duration::from_millis(10), tx);
        let first = unwrap_snapshot(rx.recv().await.unwrap());
        assert!(first.previous.is_none());
    }
}
