use crate::di::Binding;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use strum_macros::Display;
use tokio::sync::broadcast;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ContextEventKind {
    Bound,
    Unbound,
    Changed,
}

/// A mutation of a context's own registry.
#[derive(Debug, Clone)]
pub struct ContextEvent {
    pub kind: ContextEventKind,
    pub binding: Binding,
    /// Name of the context that owns `binding`.
    pub context: String,
}

/// Synchronous receiver of context events. Registered weakly.
pub(crate) trait ContextObserver: Send + Sync {
    fn observe(&self, event: &ContextEvent);
}

/// Fan-out of a context's events: weakly held observers, called inline, and
/// a broadcast channel created on first subscription.
pub(crate) struct EventHub {
    capacity: usize,
    sender: OnceLock<broadcast::Sender<ContextEvent>>,
    observers: Mutex<Vec<(u64, Weak<dyn ContextObserver>)>>,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sender: OnceLock::new(),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.sender
            .get_or_init(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub(crate) fn observe(&self, observer: Weak<dyn ContextObserver>) -> u64 {
        let id = NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed);
        self.lock_observers().push((id, observer));
        id
    }

    pub(crate) fn unobserve(&self, id: u64) {
        self.lock_observers().retain(|(observer_id, _)| *observer_id != id);
    }

    pub(crate) fn observer_count(&self) -> usize {
        let mut observers = self.lock_observers();
        observers.retain(|(_, observer)| observer.strong_count() > 0);
        observers.len()
    }

    pub(crate) fn publish(&self, event: ContextEvent) {
        let live: Vec<Arc<dyn ContextObserver>> = {
            let mut observers = self.lock_observers();
            observers.retain(|(_, observer)| observer.strong_count() > 0);
            observers.iter().filter_map(|(_, observer)| observer.upgrade()).collect()
        };
        for observer in live {
            observer.observe(&event);
        }
        if let Some(sender) = self.sender.get() {
            // No receivers is fine.
            let _ = sender.send(event);
        }
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Weak<dyn ContextObserver>)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
