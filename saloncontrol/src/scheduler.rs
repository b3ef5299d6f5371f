//! Exclusive playback scheduler.
//!
//! At most one backend plays at a time. Activating one first pauses the other,
//! and the whole pause-then-start transition runs under a single lock so two
//! concurrent activations can never leave both backends playing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::ControlError;
use crate::model::BackendKind;

/// A playback backend the scheduler can activate and silence.
#[async_trait]
pub trait ManagedBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Bring the backend up, ready to accept commands. Idempotent.
    async fn start(&self) -> Result<(), ControlError>;

    /// Silence the backend. Must be a no-op when it never started.
    async fn pause(&self) -> Result<(), ControlError>;
}

pub struct ExclusiveScheduler<P, B> {
    primary: Arc<P>,
    browser: Arc<B>,
    active: Mutex<Option<BackendKind>>,
}

impl<P: ManagedBackend, B: ManagedBackend> ExclusiveScheduler<P, B> {
    pub fn new(primary: Arc<P>, browser: Arc<B>) -> Self {
        Self {
            primary,
            browser,
            active: Mutex::new(None),
        }
    }

    /// Make `kind` the active backend, pausing the other one first.
    ///
    /// An already-active backend is left alone and commands dispatch against
    /// it directly. A pause failure aborts the switch and leaves the previous
    /// backend active; a start failure records no active backend, so the next
    /// activation retries from idle.
    pub async fn ensure_active(&self, kind: BackendKind) -> Result<(), ControlError> {
        let mut active = self.active.lock().await;
        if *active == Some(kind) {
            return Ok(());
        }

        let (target, other): (Arc<dyn ErasedBackend>, Arc<dyn ErasedBackend>) = match kind {
            BackendKind::Primary => (self.primary.clone(), self.browser.clone()),
            BackendKind::Browser => (self.browser.clone(), self.primary.clone()),
        };
        if let Err(err) = other.erased_pause().await {
            // A failed pause leaves the other backend possibly still playing.
            return Err(match err {
                already @ ControlError::BackendPause(..) => already,
                other_err => ControlError::BackendPause(other.erased_kind(), other_err.to_string()),
            });
        }

        match target.erased_start().await {
            Ok(()) => {
                info!(backend = %kind, "Backend activated");
                *active = Some(kind);
                Ok(())
            }
            Err(err) => {
                *active = None;
                Err(match err {
                    already @ ControlError::BackendStart(..) => already,
                    other => ControlError::BackendStart(kind, other.to_string()),
                })
            }
        }
    }

    /// Currently active backend, or `None` when idle.
    pub async fn active(&self) -> Option<BackendKind> {
        *self.active.lock().await
    }

    /// Non-blocking peek at the active backend. Returns `None` both when idle
    /// and when a transition currently holds the lock.
    pub fn active_hint(&self) -> Option<BackendKind> {
        self.active.try_lock().ok().and_then(|guard| *guard)
    }
}

// Object-safe shim so ensure_active can treat both generic backends uniformly.
#[async_trait]
trait ErasedBackend: Send + Sync {
    fn erased_kind(&self) -> BackendKind;
    async fn erased_start(&self) -> Result<(), ControlError>;
    async fn erased_pause(&self) -> Result<(), ControlError>;
}

#[async_trait]
impl<T: ManagedBackend> ErasedBackend for T {
    fn erased_kind(&self) -> BackendKind {
        self.kind()
    }
    async fn erased_start(&self) -> Result<(), ControlError> {
        self.start().await
    }
    async fn erased_pause(&self) -> Result<(), ControlError> {
        self.pause().await
    }
}
