//! Serialization primitives.
//!
//! Every stateful owner in the core (host, contexts, domains, loggers) owns
//! exactly one [`Dispatcher`]: a queue with a single consumer task, so all
//! work submitted to one owner executes in strict FIFO order and never
//! concurrently with itself. Two different owners run fully in parallel.
//!
//! [`IndexedDispatcher`] layers a sequencing barrier on top: work items carry
//! an index and are applied strictly in index order regardless of arrival
//! order. [`TaskResetEvent`] provides keyed one-shot waits used for the
//! "wait for echo" pattern around domain creation and deletion.

mod indexed;
mod reset_event;

pub use indexed::IndexedDispatcher;
pub use reset_event::TaskResetEvent;

use crate::error::{DispatcherError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_OWNER: u64;
}

/// A per-owner serialized execution queue.
///
/// Work submitted from the owner's own execution context runs immediately
/// (reentrant submission cannot deadlock); work submitted from anywhere else
/// is enqueued and runs on the owner's consumer task in submission order.
#[derive(Debug)]
pub struct Dispatcher {
    name: String,
    owner_id: u64,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

impl Dispatcher {
    /// Create a dispatcher and spawn its consumer task.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let owner_id = NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(CURRENT_OWNER.scope(owner_id, async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        }));
        Arc::new(Self {
            name,
            owner_id,
            tx: Mutex::new(Some(tx)),
        })
    }

    /// The dispatcher's diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling task is the owner's execution context.
    pub fn is_current(&self) -> bool {
        CURRENT_OWNER
            .try_with(|owner| *owner == self.owner_id)
            .unwrap_or(false)
    }

    /// Fail unless called from the owner's execution context.
    ///
    /// Used as a precondition gate on APIs that touch owner state directly.
    pub fn verify_access(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(DispatcherError::WrongContext(self.name.clone()).into())
        }
    }

    /// Enqueue `f` and await its result.
    ///
    /// Reentrant: when already on the owner's context the closure runs
    /// inline, preserving the total order.
    pub async fn invoke<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let _ = done_tx.send(f());
        }))?;
        done_rx
            .await
            .map_err(|_| DispatcherError::Disposed(self.name.clone()).into())
    }

    /// Enqueue `f` without waiting for it.
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            f();
            return Ok(());
        }
        self.submit(Box::new(f))
    }

    /// Enqueue `f` and block the calling thread until it ran.
    ///
    /// For non-async callers only; must not be used from the owner's own
    /// context or from inside a single-threaded runtime.
    pub fn invoke_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        let (done_tx, done_rx) = std::sync::mpsc::sync_channel(1);
        self.submit(Box::new(move || {
            let _ = done_tx.send(f());
        }))?;
        done_rx
            .recv()
            .map_err(|_| DispatcherError::Disposed(self.name.clone()).into())
    }

    /// Stop accepting work. Already-queued jobs still drain; later
    /// submissions fail with [`DispatcherError::Disposed`].
    pub fn dispose(&self) {
        self.tx.lock().take();
    }

    /// Whether the dispatcher has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.tx.lock().is_none()
    }

    fn submit(&self, job: Job) -> Result<()> {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx
                .send(job)
                .map_err(|_| DispatcherError::Disposed(self.name.clone()).into()),
            None => Err(DispatcherError::Disposed(self.name.clone()).into()),
        }
    }
}
