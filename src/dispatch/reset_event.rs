//! Keyed one-shot wait primitive.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tokio::sync::oneshot;

/// A per-key one-shot event.
///
/// `wait(key)` suspends until `set(key)` is called; a key set before anyone
/// waits stays signaled, so an initiator can never race the echo of its own
/// operation. Keys are expected to be unique per occurrence (domain ids), so
/// signaled keys are only cleared by an explicit `reset`.
#[derive(Debug, Default)]
pub struct TaskResetEvent<K: Eq + Hash + Clone> {
    inner: Mutex<Inner<K>>,
}

#[derive(Debug)]
struct Inner<K> {
    signaled: HashSet<K>,
    waiters: HashMap<K, Vec<oneshot::Sender<()>>>,
}

impl<K> Default for Inner<K> {
    fn default() -> Self {
        Self {
            signaled: HashSet::new(),
            waiters: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> TaskResetEvent<K> {
    /// Create an event with no signaled keys.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Wait until `key` is signaled. Returns immediately when it already is.
    pub async fn wait(&self, key: K) {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.signaled.contains(&key) {
                return;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(key).or_default().push(tx);
            rx
        };
        // A dropped sender only happens on reset; treat it as a wake-up.
        let _ = rx.await;
    }

    /// Signal `key`, waking all current waiters and any future ones.
    pub fn set(&self, key: K) {
        let waiters = {
            let mut inner = self.inner.lock();
            inner.signaled.insert(key.clone());
            inner.waiters.remove(&key).unwrap_or_default()
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    /// Forget a signaled key.
    pub fn reset(&self, key: &K) {
        self.inner.lock().signaled.remove(key);
    }

    /// Whether `key` is currently signaled.
    pub fn is_signaled(&self, key: &K) -> bool {
        self.inner.lock().signaled.contains(key)
    }
}
