use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Session lifecycle signals. Carry no payload beyond the fact itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    SignedIn,
    /// Explicit sign-out.
    SignedOut,
    /// The session ended because credentials could not be renewed.
    Expired,
}

/// Unique handle for a subscription, returned by [`SessionEvents::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type SessionHandler = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Fire-and-forget broadcast of [`SessionEvent`]s to any number of handlers.
///
/// Handlers run synchronously on the emitting task, in subscription order,
/// and must not block.
#[derive(Default)]
pub struct SessionEvents {
    handlers: RwLock<Vec<(SubscriptionId, SessionHandler)>>,
    next_id: AtomicU64,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push((id, Arc::new(handler)));
        id
    }

    /// Returns false when the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    pub fn emit(&self, event: SessionEvent) {
        // Snapshot so a handler may subscribe or unsubscribe re-entrantly.
        let handlers: Vec<SessionHandler> = {
            let guard = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            guard.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn subscribers_receive_events_in_order() {
        let events = SessionEvents::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        events.subscribe(move |e| s1.lock().unwrap().push(("a", e)));
        let s2 = seen.clone();
        events.subscribe(move |e| s2.lock().unwrap().push(("b", e)));

        events.emit(SessionEvent::Expired);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", SessionEvent::Expired), ("b", SessionEvent::Expired)]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let events = SessionEvents::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = events.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        events.emit(SessionEvent::SignedIn);
        assert!(events.unsubscribe(id));
        assert!(!events.unsubscribe(id));
        events.emit(SessionEvent::SignedOut);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(events.subscriber_count(), 0);
    }

    #[test]
    fn ids_are_unique() {
        let events = SessionEvents::new();
        let a = events.subscribe(|_| {});
        let b = events.subscribe(|_| {});
        assert_ne!(a, b);
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        SessionEvents::new().emit(SessionEvent::Expired);
    }
}
