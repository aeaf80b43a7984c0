use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),
}

pub type BusResult<T> = Result<T, BusError>;

pub type Handler<K, P> = Arc<dyn Fn(&K, &P) + Send + Sync>;

/// Synchronous publish/subscribe register.
///
/// Handlers for a key run in subscription order, inside the `publish` call.
/// Publishing to a key nobody listens on does nothing.
pub trait Bus<K, P>: Send + Sync {
    fn subscribe_handler(&self, key: K, handler: Handler<K, P>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId) -> BusResult<()>;
    fn publish(&self, key: &K, payload: &P) -> usize;
}

struct Registry<K, P> {
    by_key: HashMap<K, Vec<(SubscriptionId, Handler<K, P>)>>,
    index: HashMap<SubscriptionId, K>,
}

impl<K, P> Default for Registry<K, P> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            index: HashMap::new(),
        }
    }
}

struct Inner<K, P> {
    registry: RwLock<Registry<K, P>>,
    next_id: AtomicU64,
}

impl<K, P> Inner<K, P>
where
    K: Eq + Hash + Clone,
{
    fn remove(&self, id: SubscriptionId) -> BusResult<()> {
        let mut guard = self.registry.write();
        let key = guard
            .index
            .remove(&id)
            .ok_or(BusError::UnknownSubscription(id))?;
        if let Some(handlers) = guard.by_key.get_mut(&key) {
            handlers.retain(|(existing, _)| *existing != id);
            if handlers.is_empty() {
                guard.by_key.remove(&key);
            }
        }
        Ok(())
    }

    fn is_live(&self, id: SubscriptionId) -> bool {
        self.registry.read().index.contains_key(&id)
    }
}

/// In-process bus shared by every component of a client session.
///
/// Cloning is cheap; all clones share one registry.
pub struct LocalBus<K, P> {
    inner: Arc<Inner<K, P>>,
}

impl<K, P> Clone for LocalBus<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, P> Default for LocalBus<K, P> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl<K, P> fmt::Debug for LocalBus<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.registry.read();
        f.debug_struct("LocalBus")
            .field("keys", &guard.by_key.len())
            .field("subscriptions", &guard.index.len())
            .finish()
    }
}

impl<K, P> LocalBus<K, P>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` on `key`. The returned guard unsubscribes when dropped.
    pub fn subscribe<F>(&self, key: K, handler: F) -> Subscription<K, P>
    where
        F: Fn(&K, &P) + Send + Sync + 'static,
    {
        let id = self.subscribe_handler(key, Arc::new(handler));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner
            .registry
            .read()
            .by_key
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Number of keys with at least one live handler.
    pub fn key_count(&self) -> usize {
        self.inner.registry.read().by_key.len()
    }
}

impl<K, P> Bus<K, P> for LocalBus<K, P>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn subscribe_handler(&self, key: K, handler: Handler<K, P>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.inner.registry.write();
        guard.index.insert(id, key.clone());
        guard.by_key.entry(key).or_default().push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BusResult<()> {
        self.inner.remove(id)
    }

    fn publish(&self, key: &K, payload: &P) -> usize {
        // snapshot so handlers may (un)subscribe without deadlocking
        let handlers = match self.inner.registry.read().by_key.get(key) {
            Some(handlers) => handlers.clone(),
            None => {
                trace!(target: "event_bus", ?key, "publish without subscribers");
                return 0;
            }
        };
        let mut delivered = 0;
        for (id, handler) in handlers {
            if !self.inner.is_live(id) {
                continue;
            }
            handler(key, payload);
            delivered += 1;
        }
        delivered
    }
}

/// Scoped registration on a [`LocalBus`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<K, P>
where
    K: Eq + Hash + Clone,
{
    id: SubscriptionId,
    bus: Weak<Inner<K, P>>,
}

impl<K, P> Subscription<K, P>
where
    K: Eq + Hash + Clone,
{
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Gives up the guard; the caller becomes responsible for `unsubscribe`.
    pub fn detach(mut self) -> SubscriptionId {
        self.bus = Weak::new();
        self.id
    }
}

impl<K, P> fmt::Debug for Subscription<K, P>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subscription").field(&self.id).finish()
    }
}

impl<K, P> Drop for Subscription<K, P>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            let _ = inner.remove(self.id);
        }
    }
}
