//! Auth-lost observer registry.
//!
//! Every subscriber is invoked, in subscription order, when a request loses its
//! authentication. A panicking observer is logged and skipped; it never reaches
//! the request that triggered the signal.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};
use tracing::{debug, error};

/// Details of the response that ended the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthLost {
    pub status: u16,
    pub code: Option<String>,
    pub path: Option<String>,
}

type Observer = Arc<dyn Fn(&AuthLost) + Send + Sync>;

/// Handle returned by [`AuthEvents::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct AuthEvents {
    next_id: AtomicU64,
    observers: RwLock<Vec<(SubscriptionId, Observer)>>,
}

impl AuthEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&AuthLost) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(observer)));
        id
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn emit(&self, event: &AuthLost) {
        // Snapshot so observers may subscribe or unsubscribe while being notified.
        let observers: Vec<Observer> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        debug!(status = event.status, observers = observers.len(), "auth lost");

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                error!("auth-lost observer panicked");
            }
        }
    }
}
