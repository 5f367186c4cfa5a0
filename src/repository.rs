//! Version-control backend integration.
//!
//! The core never talks to a backend directly: everything goes through
//! [`RepositoryHost`], which serializes all repository work on its own
//! dispatcher. The backend itself is a [`Repository`] implementation, a
//! narrow surface of add/delete/move/copy plus commit, log, status and
//! transactions. [`MemoryRepository`] is the in-process backend used by
//! tests and by hosts that do not need durable history.

use crate::dispatch::Dispatcher;
use crate::error::{CoreError, NotFoundError, Result, StateError};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabularium_model::{LogInfo, LogPropertyInfo, RepositoryItem, RepositoryItemState};

/// Commit property key carrying the producing program version.
pub const VERSION_KEY: &str = "version";

/// The backend surface the core commits through.
pub trait Repository: Send + fmt::Debug {
    /// Root of the working copy.
    fn base_path(&self) -> &Path;

    /// Schedule a path for addition.
    fn add(&mut self, path: &str) -> Result<()>;

    /// Mark a tracked path as modified.
    fn modify(&mut self, path: &str) -> Result<()>;

    /// Schedule a tracked path for deletion.
    fn delete(&mut self, path: &str) -> Result<()>;

    /// Move a tracked path.
    fn move_item(&mut self, from: &str, to: &str) -> Result<()>;

    /// Copy a tracked path.
    fn copy_item(&mut self, from: &str, to: &str) -> Result<()>;

    /// Commit all pending changes, returning the new revision.
    fn commit(
        &mut self,
        author: &str,
        comment: &str,
        properties: &[LogPropertyInfo],
    ) -> Result<String>;

    /// History up to `revision` (the head when `None`), newest first.
    fn get_log(&self, paths: &[String], revision: Option<&str>) -> Result<Vec<LogInfo>>;

    /// Working-copy state of `paths`, or of everything pending when empty.
    fn status(&self, paths: &[String]) -> Result<Vec<RepositoryItem>>;

    /// Throw away all pending changes.
    fn revert(&mut self) -> Result<()>;

    /// Open a named transaction; until it ends, `cancel_transaction` can
    /// restore the state at this point.
    fn begin_transaction(&mut self, author: &str, name: &str) -> Result<()>;

    /// Close the transaction, keeping its changes.
    fn end_transaction(&mut self) -> Result<()>;

    /// Close the transaction, restoring the state at its begin.
    fn cancel_transaction(&mut self) -> Result<()>;

    /// Stable URI of a path at a revision.
    fn get_uri(&self, path: &str, revision: Option<&str>) -> Result<String>;

    /// Materialize a URI into `export_path`.
    fn export(&self, uri: &str, export_path: &Path) -> Result<PathBuf>;
}

struct HostInner {
    repository: Mutex<Box<dyn Repository>>,
    locked_paths: Mutex<HashSet<String>>,
}

/// Serialized front of a [`Repository`].
///
/// The synchronous methods require the caller to already be on the host's
/// dispatcher (`verify_access` style); the `*_async` methods and [`invoke`]
/// get there from anywhere. Path locks guard concurrent edit sessions from
/// committing over each other.
///
/// [`invoke`]: Self::invoke
#[derive(Clone)]
pub struct RepositoryHost {
    dispatcher: Arc<Dispatcher>,
    inner: Arc<HostInner>,
}

impl RepositoryHost {
    /// Wrap a backend behind a fresh dispatcher.
    pub fn new(name: impl Into<String>, repository: Box<dyn Repository>) -> Self {
        Self {
            dispatcher: Dispatcher::new(name),
            inner: Arc::new(HostInner {
                repository: Mutex::new(repository),
                locked_paths: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// The host's dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run `f` on the host's dispatcher.
    pub async fn invoke<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RepositoryHost) -> Result<T> + Send + 'static,
    {
        let host = self.clone();
        self.dispatcher.invoke(move || f(&host)).await?
    }

    /// Schedule a path for addition.
    pub fn add(&self, path: &str) -> Result<()> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().add(path)
    }

    /// Mark a tracked path as modified.
    pub fn modify(&self, path: &str) -> Result<()> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().modify(path)
    }

    /// Schedule a tracked path for deletion.
    pub fn delete(&self, path: &str) -> Result<()> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().delete(path)
    }

    /// Move a tracked path.
    pub fn move_item(&self, from: &str, to: &str) -> Result<()> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().move_item(from, to)
    }

    /// Copy a tracked path.
    pub fn copy_item(&self, from: &str, to: &str) -> Result<()> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().copy_item(from, to)
    }

    /// Commit pending changes, stamping the program version property.
    pub fn commit(
        &self,
        author: &str,
        comment: &str,
        properties: &[LogPropertyInfo],
    ) -> Result<String> {
        self.dispatcher.verify_access()?;
        let mut all = vec![LogPropertyInfo {
            key: VERSION_KEY.to_string(),
            value: env!("CARGO_PKG_VERSION").to_string(),
        }];
        all.extend_from_slice(properties);
        let revision = self.inner.repository.lock().commit(author, comment, &all)?;
        tracing::info!(author, revision = %revision, "committed");
        Ok(revision)
    }

    /// History up to `revision`, newest first.
    pub fn get_log(&self, paths: &[String], revision: Option<&str>) -> Result<Vec<LogInfo>> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().get_log(paths, revision)
    }

    /// Working-copy state of `paths`.
    pub fn status(&self, paths: &[String]) -> Result<Vec<RepositoryItem>> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().status(paths)
    }

    /// Throw away pending changes.
    pub fn revert(&self) -> Result<()> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().revert()
    }

    /// Open a named transaction.
    pub fn begin_transaction(&self, author: &str, name: &str) -> Result<()> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().begin_transaction(author, name)
    }

    /// Close the transaction, keeping its changes.
    pub fn end_transaction(&self) -> Result<()> {
        self.dispatcher.verify_access()?;
        self.inner.repository.lock().end_transaction()
    }

    /// Close the transaction, restoring the state at its begin.
    pub fn cancel_transaction(&self) -> Result<()> {
        self.dispatcher.verify_access()?;
        let result = self.inner.repository.lock().cancel_transaction();
        self.inner.locked_paths.lock().clear();
        result
    }

    /// Stable URI of a path at a revision.
    pub fn get_uri(&self, path: &str, revision: Option<&str>) -> Result<String> {
        self.inner.repository.lock().get_uri(path, revision)
    }

    /// Materialize a URI into `export_path`.
    pub fn export(&self, uri: &str, export_path: &Path) -> Result<PathBuf> {
        self.inner.repository.lock().export(uri, export_path)
    }

    /// Reserve `paths` for one edit session.
    pub fn lock(&self, paths: &[String]) -> Result<()> {
        self.dispatcher.verify_access()?;
        let mut locked = self.inner.locked_paths.lock();
        for path in paths {
            if locked.contains(path) {
                return Err(CoreError::AlreadyExists(path.clone()));
            }
        }
        for path in paths {
            locked.insert(path.clone());
        }
        Ok(())
    }

    /// Release paths reserved with [`lock`].
    ///
    /// [`lock`]: Self::lock
    pub fn unlock(&self, paths: &[String]) -> Result<()> {
        self.dispatcher.verify_access()?;
        let mut locked = self.inner.locked_paths.lock();
        for path in paths {
            if !locked.contains(path) {
                return Err(NotFoundError::Item(path.clone()).into());
            }
        }
        for path in paths {
            locked.remove(path);
        }
        Ok(())
    }

    /// Reserve paths from any execution context.
    pub async fn lock_async(&self, paths: Vec<String>) -> Result<()> {
        self.invoke(move |host| host.lock(&paths)).await
    }

    /// Release paths from any execution context.
    pub async fn unlock_async(&self, paths: Vec<String>) -> Result<()> {
        self.invoke(move |host| host.unlock(&paths)).await
    }

    /// Commit from any execution context.
    pub async fn commit_async(
        &self,
        author: String,
        comment: String,
        properties: Vec<LogPropertyInfo>,
    ) -> Result<String> {
        self.invoke(move |host| host.commit(&author, &comment, &properties))
            .await
    }

    /// Stop the host's dispatcher.
    pub fn dispose(&self) {
        self.dispatcher.dispose();
    }
}

impl fmt::Debug for RepositoryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryHost")
            .field("dispatcher", &self.dispatcher.name())
            .finish()
    }
}

/// In-process backend tracking states and history without touching disk.
#[derive(Debug)]
pub struct MemoryRepository {
    base_path: PathBuf,
    items: BTreeMap<String, RepositoryItemState>,
    revision: u64,
    log: Vec<LogInfo>,
    transaction: Option<BTreeMap<String, RepositoryItemState>>,
}

impl MemoryRepository {
    /// Create an empty repository rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            items: BTreeMap::new(),
            revision: 0,
            log: Vec::new(),
            transaction: None,
        }
    }
}

impl Repository for MemoryRepository {
    fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn add(&mut self, path: &str) -> Result<()> {
        if self.items.contains_key(path) {
            return Err(CoreError::AlreadyExists(path.to_string()));
        }
        self.items
            .insert(path.to_string(), RepositoryItemState::Added);
        Ok(())
    }

    fn modify(&mut self, path: &str) -> Result<()> {
        let state = self
            .items
            .get_mut(path)
            .ok_or_else(|| NotFoundError::Item(path.to_string()))?;
        if *state == RepositoryItemState::Unchanged {
            *state = RepositoryItemState::Modified;
        }
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        let state = *self
            .items
            .get(path)
            .ok_or_else(|| NotFoundError::Item(path.to_string()))?;
        if state == RepositoryItemState::Added {
            self.items.remove(path);
        } else {
            self.items
                .insert(path.to_string(), RepositoryItemState::Deleted);
        }
        Ok(())
    }

    fn move_item(&mut self, from: &str, to: &str) -> Result<()> {
        if self.items.contains_key(to) {
            return Err(CoreError::AlreadyExists(to.to_string()));
        }
        let state = self
            .items
            .remove(from)
            .ok_or_else(|| NotFoundError::Item(from.to_string()))?;
        let state = match state {
            RepositoryItemState::Added => RepositoryItemState::Added,
            _ => RepositoryItemState::Modified,
        };
        self.items.insert(to.to_string(), state);
        Ok(())
    }

    fn copy_item(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.items.contains_key(from) {
            return Err(NotFoundError::Item(from.to_string()).into());
        }
        if self.items.contains_key(to) {
            return Err(CoreError::AlreadyExists(to.to_string()));
        }
        self.items
            .insert(to.to_string(), RepositoryItemState::Added);
        Ok(())
    }

    fn commit(
        &mut self,
        author: &str,
        comment: &str,
        properties: &[LogPropertyInfo],
    ) -> Result<String> {
        self.items.retain(|_, state| {
            if *state == RepositoryItemState::Deleted {
                return false;
            }
            *state = RepositoryItemState::Unchanged;
            true
        });
        self.revision += 1;
        let revision = self.revision.to_string();
        self.log.push(LogInfo {
            revision: revision.clone(),
            author: author.to_string(),
            comment: comment.to_string(),
            date_time: Utc::now(),
            properties: properties.to_vec(),
        });
        Ok(revision)
    }

    fn get_log(&self, _paths: &[String], revision: Option<&str>) -> Result<Vec<LogInfo>> {
        let limit: u64 = match revision {
            Some(rev) => rev
                .parse()
                .map_err(|_| NotFoundError::Item(rev.to_string()))?,
            None => self.revision,
        };
        Ok(self
            .log
            .iter()
            .filter(|entry| entry.revision.parse::<u64>().map_or(false, |r| r <= limit))
            .rev()
            .cloned()
            .collect())
    }

    fn status(&self, paths: &[String]) -> Result<Vec<RepositoryItem>> {
        Ok(self
            .items
            .iter()
            .filter(|(path, state)| {
                let selected = paths.is_empty() || paths.iter().any(|p| path.starts_with(p));
                selected && **state != RepositoryItemState::Unchanged
            })
            .map(|(path, state)| RepositoryItem {
                path: path.clone(),
                state: *state,
            })
            .collect())
    }

    fn revert(&mut self) -> Result<()> {
        self.items.retain(|_, state| {
            if *state == RepositoryItemState::Added {
                return false;
            }
            *state = RepositoryItemState::Unchanged;
            true
        });
        Ok(())
    }

    fn begin_transaction(&mut self, _author: &str, _name: &str) -> Result<()> {
        if self.transaction.is_some() {
            return Err(StateError::TransactionInProgress.into());
        }
        self.transaction = Some(self.items.clone());
        Ok(())
    }

    fn end_transaction(&mut self) -> Result<()> {
        self.transaction
            .take()
            .map(|_| ())
            .ok_or_else(|| StateError::NoTransaction.into())
    }

    fn cancel_transaction(&mut self) -> Result<()> {
        match self.transaction.take() {
            Some(snapshot) => {
                self.items = snapshot;
                Ok(())
            }
            None => Err(StateError::NoTransaction.into()),
        }
    }

    fn get_uri(&self, path: &str, revision: Option<&str>) -> Result<String> {
        let revision = match revision {
            Some(rev) => rev.to_string(),
            None => self.revision.to_string(),
        };
        Ok(format!("mem://{}/{path}@{revision}", self.base_path.display()))
    }

    fn export(&self, _uri: &str, _export_path: &Path) -> Result<PathBuf> {
        Err(CoreError::Remote(
            "export is not supported by the memory backend".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> RepositoryHost {
        RepositoryHost::new("repo-test", Box::new(MemoryRepository::new("/tmp/repo")))
    }

    #[tokio::test]
    async fn test_direct_access_requires_dispatcher() {
        let host = host();
        assert!(host.add("/tables/a.json").is_err());
        host.invoke(|host| host.add("/tables/a.json")).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_advances_revision_and_stamps_version() {
        let host = host();
        host.invoke(|host| {
            host.add("/tables/a.json")?;
            host.commit("admin", "add table a", &[])
        })
        .await
        .unwrap();
        let log = host.invoke(|host| host.get_log(&[], None)).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].revision, "1");
        assert_eq!(log[0].author, "admin");
        assert!(log[0].properties.iter().any(|p| p.key == VERSION_KEY));
        let pending = host.invoke(|host| host.status(&[])).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_pending_changes() {
        let host = host();
        let items = host
            .invoke(|host| {
                host.add("/tables/a.json")?;
                host.commit("admin", "seed", &[])?;
                host.modify("/tables/a.json")?;
                host.add("/tables/b.json")?;
                host.status(&[])
            })
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items
            .iter()
            .any(|i| i.path == "/tables/a.json" && i.state == RepositoryItemState::Modified));
        assert!(items
            .iter()
            .any(|i| i.path == "/tables/b.json" && i.state == RepositoryItemState::Added));
    }

    #[tokio::test]
    async fn test_cancel_transaction_restores_state() {
        let host = host();
        host.invoke(|host| {
            host.add("/tables/a.json")?;
            host.commit("admin", "seed", &[])
        })
        .await
        .unwrap();
        let pending = host
            .invoke(|host| {
                host.begin_transaction("admin", "edit-a")?;
                host.delete("/tables/a.json")?;
                host.add("/tables/b.json")?;
                host.cancel_transaction()?;
                host.status(&[])
            })
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_path_locks_are_exclusive() {
        let host = host();
        let paths = vec!["/tables/a.json".to_string()];
        host.lock_async(paths.clone()).await.unwrap();
        assert!(matches!(
            host.lock_async(paths.clone()).await,
            Err(CoreError::AlreadyExists(_))
        ));
        host.unlock_async(paths.clone()).await.unwrap();
        host.lock_async(paths).await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_unknown_path_fails() {
        let host = host();
        assert!(matches!(
            host.unlock_async(vec!["/tables/x.json".to_string()]).await,
            Err(CoreError::NotFound(NotFoundError::Item(_)))
        ));
    }

    #[tokio::test]
    async fn test_revert_drops_additions() {
        let host = host();
        let pending = host
            .invoke(|host| {
                host.add("/tables/a.json")?;
                host.revert()?;
                host.status(&[])
            })
            .await
            .unwrap();
        assert!(pending.is_empty());
    }
}
