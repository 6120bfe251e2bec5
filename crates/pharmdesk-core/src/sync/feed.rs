//! In-process change feed.
//!
//! Every committed write publishes a [`Topic`]. Each live subscription on a
//! matching topic re-runs its query against the database and receives the
//! full result set. Listeners run on the publishing thread after the
//! registry lock has been released.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};

use crate::db::{Database, DbResult};

/// What a write touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Any conversation document
    Conversations,
    /// Messages of one conversation
    Messages(String),
}

/// Re-runs a query and delivers the result. An error makes the subscription inert.
pub type Listener = Box<dyn FnMut(&Database) -> DbResult<()> + Send>;

struct Slot {
    listener: Mutex<Listener>,
    /// Set when a publish arrives while the listener is already running
    redeliver: AtomicBool,
}

struct Entry {
    topic: Topic,
    slot: Arc<Slot>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of push subscriptions.
#[derive(Default)]
pub struct ChangeFeed {
    registry: SharedRegistry,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and deliver the current result set immediately.
    ///
    /// If the initial delivery fails the error is returned and nothing stays
    /// registered.
    pub fn subscribe(
        &self,
        db: &Database,
        topic: Topic,
        mut listener: Listener,
    ) -> DbResult<Subscription> {
        listener(db)?;

        let slot = Arc::new(Slot {
            listener: Mutex::new(listener),
            redeliver: AtomicBool::new(false),
        });

        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.insert(id, Entry { topic, slot });
            id
        };

        Ok(Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        })
    }

    /// Notify every subscription on `topic`.
    pub fn publish(&self, db: &Database, topic: &Topic) {
        let targets: Vec<(u64, Arc<Slot>)> = lock(&self.registry)
            .entries
            .iter()
            .filter(|(_, entry)| entry.topic == *topic)
            .map(|(id, entry)| (*id, Arc::clone(&entry.slot)))
            .collect();

        tracing::debug!(?topic, listeners = targets.len(), "Publishing change");

        for (id, slot) in targets {
            self.deliver(db, id, &slot);
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deliver(&self, db: &Database, id: u64, slot: &Slot) {
        loop {
            // A listener may have unsubscribed another one earlier in this pass.
            if !lock(&self.registry).entries.contains_key(&id) {
                return;
            }

            let mut listener = match slot.listener.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    slot.redeliver.store(true, Ordering::SeqCst);
                    return;
                }
            };

            slot.redeliver.store(false, Ordering::SeqCst);
            if let Err(e) = listener(db) {
                tracing::error!(subscription = id, error = %e, "Subscription query failed; removing it");
                lock(&self.registry).entries.remove(&id);
                return;
            }
            drop(listener);

            if !slot.redeliver.swap(false, Ordering::SeqCst) {
                return;
            }
        }
    }
}

/// Owned handle for a push subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Stop receiving pushes. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).entries.remove(&self.id);
        }
    }

    /// Check if the subscription still receives pushes.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| lock(&registry).entries.contains_key(&self.id))
            .unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
