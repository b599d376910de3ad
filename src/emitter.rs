//! Listener registry and guarded notification delivery.

use crate::error::{BoxError, ListenerError};
use crate::types::{EventKind, Notification};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Type alias for a listener callback.
pub(crate) type Listener = Arc<dyn Fn(&Notification) -> Result<(), BoxError> + Send + Sync>;

/// Identifies a registered listener for later removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listeners keyed by notification kind, called in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    registry: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl Listeners {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Notification) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        self.registry
            .lock()
            .entry(kind)
            .or_default()
            .push((id, listener));
        id
    }

    pub(crate) fn remove(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut registry = self.registry.lock();
        let Some(list) = registry.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    pub(crate) fn clear(&self) {
        self.registry.lock().clear();
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.registry.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver a notification to every listener of its kind.
    ///
    /// A listener failure (an `Err` or a panic) never reaches the caller. It is
    /// re-dispatched as an `error` notification, unless it happened while an
    /// `error` notification was being delivered, in which case it is dropped.
    pub(crate) fn emit(&self, notification: Notification) {
        self.deliver(notification, false);
    }

    /// `reporting` is set on the nested call that reports a listener failure.
    /// The guard travels with the call, so concurrent emits on other threads
    /// never see it.
    fn deliver(&self, notification: Notification, reporting: bool) {
        let kind = notification.kind();

        // Snapshot so listeners may add or remove listeners while being called.
        let listeners: Vec<Listener> = match self.registry.lock().get(&kind) {
            Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => Vec::new(),
        };

        if listeners.is_empty() {
            if let Notification::Error(err) = &notification {
                warn!(error = %err, "unhandled listener error");
            }
            return;
        }

        let is_error = kind == EventKind::Error;
        let mut failures = Vec::new();
        for listener in listeners {
            let failure = match catch_unwind(AssertUnwindSafe(|| listener(&notification))) {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => ListenerError::Failed {
                    event: kind,
                    source,
                },
                Err(payload) => ListenerError::panicked(kind, payload),
            };
            failures.push(failure);
        }

        for failure in failures {
            if is_error || reporting {
                debug!(error = %failure, "dropping failure of an error listener");
                continue;
            }
            debug!(error = %failure, "listener failed");
            self.deliver(Notification::Error(failure), true);
        }
    }
}
