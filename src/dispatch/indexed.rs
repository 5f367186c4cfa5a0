//! The sequencing barrier for server-pushed callbacks.

use crate::error::{DispatcherError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

type IndexedJob = (u64, Pin<Box<dyn Future<Output = ()> + Send + 'static>>);

/// Applies indexed work strictly in index order.
///
/// Callbacks may be delivered out of order or concurrently; work for index
/// `n + 1` is buffered until the work for `n` has fully completed. This is a
/// sequencing barrier, not a priority queue: indices are expected to be dense
/// starting from zero, and stale duplicates are dropped with a warning.
#[derive(Debug)]
pub struct IndexedDispatcher {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<IndexedJob>>>,
}

impl IndexedDispatcher {
    /// Create the barrier and spawn its draining task.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let task_name = name.clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<IndexedJob>();
        tokio::spawn(async move {
            let mut next: u64 = 0;
            let mut pending: BTreeMap<u64, Pin<Box<dyn Future<Output = ()> + Send>>> =
                BTreeMap::new();
            while let Some((index, fut)) = rx.recv().await {
                if index < next {
                    tracing::warn!(
                        dispatcher = %task_name,
                        index,
                        expected = next,
                        "dropping stale callback index"
                    );
                    continue;
                }
                pending.insert(index, fut);
                while let Some(fut) = pending.remove(&next) {
                    fut.await;
                    next += 1;
                }
            }
        });
        Self {
            name,
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Submit the work for `index`. Returns as soon as the work is enqueued;
    /// execution happens when `index` becomes current.
    pub fn invoke<F>(&self, index: u64, fut: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx
                .send((index, Box::pin(fut)))
                .map_err(|_| DispatcherError::Disposed(self.name.clone()).into()),
            None => Err(DispatcherError::Disposed(self.name.clone()).into()),
        }
    }

    /// Stop accepting work and drop anything still buffered out of order.
    pub fn dispose(&self) {
        self.tx.lock().take();
    }
}
