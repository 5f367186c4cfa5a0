//! Domain registry and callback routing.
//!
//! The context owns every live domain, assigns the per-subscription sequence
//! number of each callback, and rebroadcasts callbacks to subscribers in
//! strict index order. Creation and deletion use the "wait for echo" shape:
//! the initiator registers the domain, emits the callback through the pump,
//! and only returns once its own echo has been applied, so a returned handle
//! is always observable.

use crate::auth::Authentication;
use crate::dispatch::{Dispatcher, IndexedDispatcher, TaskResetEvent};
use crate::domain::logger::{DomainLogger, LoggerRecovery};
use crate::domain::source::{source_from_snapshot, SourceSnapshot};
use crate::domain::{spawn_domain, DomainHandle};
use crate::error::{NotFoundError, Result};
use crate::users::UserContext;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tabularium_model::{
    CallbackInfo, DomainActionBody, DomainCallback, DomainInfo, DomainItemKind, DomainMetaData,
    DomainState, SignatureDate,
};
use tokio::sync::mpsc;
use uuid::Uuid;

type Subscriber = mpsc::UnboundedSender<(CallbackInfo, DomainCallback)>;

/// Registry and event router for every live domain of a host.
#[derive(Debug, Clone)]
pub struct DomainContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    dispatcher: Arc<Dispatcher>,
    base_path: PathBuf,
    users: Arc<UserContext>,
    domains: DashMap<Uuid, DomainHandle>,
    pending: DashMap<Uuid, DomainHandle>,
    creation_event: TaskResetEvent<Uuid>,
    deletion_event: TaskResetEvent<Uuid>,
    callback_event: IndexedDispatcher,
    next_index: AtomicU64,
    events_tx: mpsc::UnboundedSender<(SignatureDate, DomainCallback)>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl DomainContext {
    /// Create the context and start its callback pump.
    pub fn new(base_path: impl Into<PathBuf>, users: Arc<UserContext>) -> Self {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ContextInner {
            dispatcher: Dispatcher::new("domain-context"),
            base_path: base_path.into(),
            users,
            domains: DashMap::new(),
            pending: DashMap::new(),
            creation_event: TaskResetEvent::new(),
            deletion_event: TaskResetEvent::new(),
            callback_event: IndexedDispatcher::new("domain-callbacks"),
            next_index: AtomicU64::new(0),
            events_tx,
            subscribers: Mutex::new(Vec::new()),
        });
        let pump = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some((signature, callback)) = events_rx.recv().await {
                let index = pump.next_index.fetch_add(1, Ordering::Relaxed);
                let info = CallbackInfo {
                    index,
                    signature_date: signature,
                };
                if ContextInner::route(&pump, info, callback).is_err() {
                    break;
                }
            }
        });
        Self { inner }
    }

    /// Subscribe to the ordered callback stream.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<(CallbackInfo, DomainCallback)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Apply one replicated callback.
    ///
    /// Out-of-order indices are buffered; application is strictly in index
    /// order. Errors inside (unknown signature, unknown domain) are logged
    /// and swallowed so the stream keeps flowing.
    pub fn handle_callback(&self, info: CallbackInfo, callback: DomainCallback) -> Result<()> {
        ContextInner::route(&self.inner, info, callback)
    }

    /// Create a new domain over `snapshot` and wait for its echo.
    pub async fn create(
        &self,
        auth: &Authentication,
        data_base_id: Uuid,
        item_name: &str,
        item_kind: DomainItemKind,
        category_path: &str,
        snapshot: SourceSnapshot,
    ) -> Result<DomainHandle> {
        auth.verify()?;
        let signature = auth.sign()?;
        let info = DomainInfo::new(
            data_base_id,
            item_name,
            item_kind,
            category_path,
            signature.clone(),
        );
        let domain_id = info.domain_id;
        let logger = DomainLogger::new(&self.inner.base_path, &info, &snapshot)?;
        let source = source_from_snapshot(item_kind, &snapshot)?;
        let handle = spawn_domain(info.clone(), source, logger, self.inner.events_tx.clone());
        self.inner.pending.insert(domain_id, handle.clone());

        let meta = DomainMetaData {
            domain_info: info,
            domain_state: DomainState::Created,
            users: Vec::new(),
        };
        self.inner
            .events_tx
            .send((
                signature,
                DomainCallback::DomainsCreated {
                    meta_datas: vec![meta],
                },
            ))
            .map_err(|_| crate::error::StateError::HostNotOpen)?;
        self.inner.creation_event.wait(domain_id).await;
        // Domain ids never recur; drop the echo key once consumed.
        self.inner.creation_event.reset(&domain_id);
        tracing::info!(domain_id = %domain_id, item_name = %item_name, "domain created");
        Ok(handle)
    }

    /// End a domain and wait until its removal has been applied.
    pub async fn delete(
        &self,
        auth: &Authentication,
        domain_id: Uuid,
        is_canceled: bool,
    ) -> Result<()> {
        let handle = self.get_domain(domain_id)?;
        handle.dispose(auth, is_canceled).await?;
        self.inner.deletion_event.wait(domain_id).await;
        self.inner.deletion_event.reset(&domain_id);
        Ok(())
    }

    /// End every domain that belongs to one data base.
    pub async fn delete_domains(
        &self,
        auth: &Authentication,
        data_base_id: Uuid,
        is_canceled: bool,
    ) -> Result<usize> {
        let handles: Vec<DomainHandle> = self
            .inner
            .domains
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut deleted = 0;
        for handle in handles {
            let (info, _) = handle.info().await?;
            if info.data_base_id == data_base_id {
                self.delete(auth, handle.domain_id(), is_canceled).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Look up one registered domain.
    pub fn get_domain(&self, domain_id: Uuid) -> Result<DomainHandle> {
        self.inner
            .domains
            .get(&domain_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NotFoundError::Domain(domain_id).into())
    }

    /// Handles of every registered domain.
    pub fn get_domains(&self) -> Vec<DomainHandle> {
        self.inner
            .domains
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of registered domains.
    pub fn len(&self) -> usize {
        self.inner.domains.len()
    }

    /// Whether no domain is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.domains.is_empty()
    }

    /// Bind the host to one domain so it accepts row mutations.
    pub async fn attach_domain_host(&self, domain_id: Uuid) -> Result<()> {
        self.get_domain(domain_id)?.attach().await
    }

    /// Unbind the host from one domain.
    pub async fn detach_domain_host(&self, domain_id: Uuid) -> Result<()> {
        self.get_domain(domain_id)?.detach().await
    }

    /// Restore every domain left on disk by an earlier run.
    ///
    /// Each log directory is replayed: the snapshot hydrates the source and
    /// every completed action is re-applied. Actions posted but never
    /// completed are dropped with a warning. Participants do not survive a
    /// restart; restored domains come back empty of users.
    pub async fn restore(&self) -> Result<Vec<Uuid>> {
        let mut restored = Vec::new();
        for dir in LoggerRecovery::scan(&self.inner.base_path)? {
            let recovery = LoggerRecovery::load(&dir)?;
            let info = recovery.domain_info.clone();
            let domain_id = info.domain_id;
            let unfinished = recovery.unfinished();
            if !unfinished.is_empty() {
                tracing::warn!(
                    domain_id = %domain_id,
                    dropped = unfinished.len(),
                    "dropping unfinished actions from restored domain"
                );
            }

            let mut source = source_from_snapshot(info.item_kind, &recovery.snapshot)?;
            for entry in &recovery.posted {
                if !recovery.completed.contains(&entry.id) {
                    continue;
                }
                match &entry.action.body {
                    DomainActionBody::NewRow { rows } => source.new_row(rows)?,
                    DomainActionBody::SetRow { rows } => source.set_row(rows)?,
                    DomainActionBody::RemoveRow { rows } => source.remove_row(rows)?,
                    DomainActionBody::SetProperty {
                        property_name,
                        value,
                    } => source.set_property(property_name, value)?,
                    // Participation does not survive a restart.
                    _ => {}
                }
            }

            let (logger, _) = DomainLogger::resume(&self.inner.base_path, &info)?;
            let handle = spawn_domain(info.clone(), source, logger, self.inner.events_tx.clone());
            self.inner.pending.insert(domain_id, handle);
            let meta = DomainMetaData {
                domain_info: info,
                domain_state: DomainState::Created,
                users: Vec::new(),
            };
            self.inner
                .events_tx
                .send((
                    SignatureDate::new(crate::auth::SYSTEM_ID),
                    DomainCallback::DomainsCreated {
                        meta_datas: vec![meta],
                    },
                ))
                .map_err(|_| crate::error::StateError::HostNotOpen)?;
            self.inner.creation_event.wait(domain_id).await;
            self.inner.creation_event.reset(&domain_id);
            restored.push(domain_id);
            tracing::info!(domain_id = %domain_id, "domain restored");
        }
        Ok(restored)
    }

    /// End every domain and stop the pump. Used at host close.
    pub async fn dispose(&self) -> Result<()> {
        let system = Authentication::system();
        let handles = self.get_domains();
        for handle in handles {
            if let Err(e) = self.delete(&system, handle.domain_id(), false).await {
                tracing::error!(domain_id = %handle.domain_id(), error = %e, "domain did not dispose cleanly");
            }
        }
        self.inner.callback_event.dispose();
        self.inner.dispatcher.dispose();
        Ok(())
    }
}

impl ContextInner {
    /// Push one callback through the ordering barrier onto the context's
    /// dispatcher.
    fn route(inner: &Arc<Self>, info: CallbackInfo, callback: DomainCallback) -> Result<()> {
        let apply = Arc::clone(inner);
        inner.callback_event.invoke(info.index, async move {
            let inner = Arc::clone(&apply);
            let result = apply
                .dispatcher
                .invoke(move || inner.apply(info, callback))
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, code = e.error_code(), "callback pump stalled");
            }
        })
    }

    /// Applies one callback. Runs on the context dispatcher, strictly in
    /// index order. Never returns an error to the pump.
    fn apply(&self, info: CallbackInfo, callback: DomainCallback) {
        if let Err(e) = self.users.authenticate(&info.signature_date) {
            tracing::error!(
                signer = %info.signature_date.id,
                index = info.index,
                error = %e,
                "dropping callback with unknown signature"
            );
            return;
        }

        match &callback {
            DomainCallback::DomainsCreated { meta_datas } => {
                for meta in meta_datas {
                    let domain_id = meta.domain_info.domain_id;
                    if let Some((_, handle)) = self.pending.remove(&domain_id) {
                        self.domains.insert(domain_id, handle);
                    }
                    self.creation_event.set(domain_id);
                }
            }
            DomainCallback::DomainsDeleted { domain_ids, .. } => {
                for domain_id in domain_ids {
                    self.domains.remove(domain_id);
                    self.deletion_event.set(*domain_id);
                }
            }
            other => {
                if let Some(domain_id) = other.domain_id() {
                    if !self.domains.contains_key(&domain_id) {
                        tracing::error!(
                            domain_id = %domain_id,
                            index = info.index,
                            kind = ?std::mem::discriminant(other),
                            "dropping callback for unknown domain"
                        );
                        return;
                    }
                }
            }
        }
        self.broadcast(info, callback);
    }

    fn broadcast(&self, info: CallbackInfo, callback: DomainCallback) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send((info.clone(), callback.clone())).is_ok());
    }
}
