//! Boundary objects that raise unsolicited inbound messages.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use {async_trait::async_trait, courier_protocol::Envelope, tracing::debug};

// ── Identity ────────────────────────────────────────────────────────────────

/// Reference identity of a listener.
///
/// Two handles compare equal only when they point at the same allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(usize);

impl ListenerId {
    pub fn of<T: ?Sized>(listener: &T) -> Self {
        Self(listener as *const T as *const () as usize)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{:x}", self.0)
    }
}

/// Token returned by [`Listener::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

// ── Traits ──────────────────────────────────────────────────────────────────

/// Receives "message" events from a listener.
///
/// Listeners await each subscriber in turn, so `on_message` should hand
/// long-running work off instead of doing it inline. Pipelines spawn the
/// incoming stack and return immediately.
#[async_trait]
pub trait MessageSubscriber<In>: Send + Sync {
    async fn on_message(&self, listener: ListenerId, envelope: Envelope<In>);
}

/// A source of unsolicited inbound envelopes (a socket reader, a pipe, an
/// in-process channel).
pub trait Listener<In>: Send + Sync {
    fn subscribe(&self, subscriber: Arc<dyn MessageSubscriber<In>>) -> SubscriptionHandle;

    /// Returns false if `handle` was not subscribed.
    fn unsubscribe(&self, handle: SubscriptionHandle) -> bool;
}

// ── ListenerHub ─────────────────────────────────────────────────────────────

struct Subscription<In> {
    subscriber: Arc<dyn MessageSubscriber<In>>,
    once: bool,
}

/// In-process listener: anything holding the hub can [`emit`](Self::emit)
/// messages to its subscribers.
pub struct ListenerHub<In> {
    next: AtomicU64,
    subscriptions: Mutex<BTreeMap<SubscriptionHandle, Subscription<In>>>,
}

impl<In> Default for ListenerHub<In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In> ListenerHub<In> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            subscriptions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> ListenerId {
        ListenerId::of(self)
    }

    fn insert(&self, subscriber: Arc<dyn MessageSubscriber<In>>, once: bool) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, Subscription { subscriber, once });
        handle
    }

    /// Subscribe for the next message only.
    pub fn subscribe_once(&self, subscriber: Arc<dyn MessageSubscriber<In>>) -> SubscriptionHandle {
        self.insert(subscriber, true)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<In: Clone + Send> ListenerHub<In> {
    /// Deliver `envelope` to every subscriber in subscription order, awaiting
    /// each. Returns the number of subscribers reached.
    pub async fn emit(&self, envelope: Envelope<In>) -> usize {
        let targets: Vec<Arc<dyn MessageSubscriber<In>>> = {
            let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
            let targets = subscriptions
                .values()
                .map(|s| Arc::clone(&s.subscriber))
                .collect();
            subscriptions.retain(|_, s| !s.once);
            targets
        };

        let id = self.id();
        debug!(listener = %id, subscribers = targets.len(), envelope = %envelope.id, "emitting message");
        for subscriber in &targets {
            subscriber.on_message(id, envelope.clone()).await;
        }
        targets.len()
    }
}

impl<In> Listener<In> for ListenerHub<In>
where
    In: Send,
{
    fn subscribe(&self, subscriber: Arc<dyn MessageSubscriber<In>>) -> SubscriptionHandle {
        self.insert(subscriber, false)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle)
            .is_some()
    }
}
