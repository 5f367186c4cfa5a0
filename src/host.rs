//! The host: one process-wide lifecycle owner.
//!
//! Opening builds the user, domain, data base and repository contexts and
//! replays any domain logs left behind by an earlier run. Closing expires
//! every session first, so no caller can slip a command in while the
//! contexts shut down. Transitions run on the host's dispatcher and go
//! through an intermediate state, so a second `open` or `close` arriving
//! mid-flight fails instead of interleaving.

use crate::auth::Authentication;
use crate::config::Config;
use crate::data::DataBaseContext;
use crate::dispatch::Dispatcher;
use crate::domain::DomainContext;
use crate::error::{CoreError, PermissionError, Result, StateError};
use crate::repository::{MemoryRepository, RepositoryHost};
use crate::users::UserContext;
use parking_lot::Mutex;
use std::sync::Arc;

/// Lifecycle state of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostState {
    /// Not open.
    #[default]
    None,
    /// `open` in progress.
    Opening,
    /// Serving.
    Opened,
    /// `close` in progress.
    Closing,
}

struct Contexts {
    users: Arc<UserContext>,
    domains: DomainContext,
    data_bases: Arc<DataBaseContext>,
    repository: RepositoryHost,
}

struct HostShared {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<HostState>,
    contexts: Mutex<Option<Contexts>>,
}

/// The coordination host. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RepoHost {
    shared: Arc<HostShared>,
}

impl RepoHost {
    /// Build a closed host from its configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(HostShared {
                config,
                dispatcher: Dispatcher::new("host"),
                state: Mutex::new(HostState::None),
                contexts: Mutex::new(None),
            }),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HostState {
        *self.shared.state.lock()
    }

    /// The host's configuration.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Open the host: build contexts, seed the administrator, restore
    /// domains left on disk.
    pub async fn open(&self) -> Result<()> {
        self.transition(HostState::None, HostState::Opening).await?;
        match self.build_contexts().await {
            Ok(contexts) => {
                *self.shared.contexts.lock() = Some(contexts);
                self.force_state(HostState::Opened).await?;
                tracing::info!(host = %self.shared.config.host.name, "host opened");
                Ok(())
            }
            Err(e) => {
                self.force_state(HostState::None).await?;
                Err(e)
            }
        }
    }

    /// Close the host. Every session expires before the contexts go away.
    pub async fn close(&self) -> Result<()> {
        self.transition(HostState::Opened, HostState::Closing)
            .await?;
        let contexts = self.shared.contexts.lock().take();
        if let Some(contexts) = contexts {
            // Sessions first: an expired principal fails every later call,
            // so nothing races the teardown below.
            contexts.users.expire_all();
            contexts.data_bases.clear_entered();
            contexts.domains.dispose().await?;
            contexts.repository.dispose();
        }
        self.force_state(HostState::None).await?;
        tracing::info!(host = %self.shared.config.host.name, "host closed");
        Ok(())
    }

    /// Close on behalf of a session. Administrators only.
    pub async fn shutdown(&self, auth: &Authentication) -> Result<()> {
        auth.verify()?;
        if !auth.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        tracing::warn!(by = %auth.user_id(), "shutdown requested");
        self.close().await
    }

    /// Log a user in.
    ///
    /// The session registers before the host-level checks run; any failure
    /// after that point rolls the registration back, so a rejected login
    /// never leaves a live token behind.
    pub fn login(&self, id: &str, password: &str) -> Result<Authentication> {
        let guard = self.shared.contexts.lock();
        let contexts = guard.as_ref().ok_or(StateError::HostNotOpen)?;
        let auth = contexts.users.login(id, password)?;
        if contexts.users.session_count() > self.shared.config.limits.max_sessions {
            let _ = contexts.users.logout(&auth);
            tracing::warn!(user_id = %id, "login rolled back, session limit reached");
            return Err(CoreError::LoginRejected(id.to_string()));
        }
        Ok(auth)
    }

    /// Log a session out.
    pub fn logout(&self, auth: &Authentication) -> Result<()> {
        let guard = self.shared.contexts.lock();
        let contexts = guard.as_ref().ok_or(StateError::HostNotOpen)?;
        contexts.users.logout(auth)
    }

    /// The user registry.
    pub fn users(&self) -> Result<Arc<UserContext>> {
        let guard = self.shared.contexts.lock();
        let contexts = guard.as_ref().ok_or(StateError::HostNotOpen)?;
        Ok(Arc::clone(&contexts.users))
    }

    /// The domain registry.
    pub fn domains(&self) -> Result<DomainContext> {
        let guard = self.shared.contexts.lock();
        let contexts = guard.as_ref().ok_or(StateError::HostNotOpen)?;
        Ok(contexts.domains.clone())
    }

    /// The data base registry.
    pub fn data_bases(&self) -> Result<Arc<DataBaseContext>> {
        let guard = self.shared.contexts.lock();
        let contexts = guard.as_ref().ok_or(StateError::HostNotOpen)?;
        Ok(Arc::clone(&contexts.data_bases))
    }

    /// The commit boundary.
    pub fn repository(&self) -> Result<RepositoryHost> {
        let guard = self.shared.contexts.lock();
        let contexts = guard.as_ref().ok_or(StateError::HostNotOpen)?;
        Ok(contexts.repository.clone())
    }

    /// Create a domain, honoring the configured ceiling.
    pub async fn create_domain(
        &self,
        auth: &Authentication,
        data_base_id: uuid::Uuid,
        item_name: &str,
        item_kind: tabularium_model::DomainItemKind,
        category_path: &str,
        snapshot: crate::domain::SourceSnapshot,
    ) -> Result<crate::domain::DomainHandle> {
        let domains = self.domains()?;
        if domains.len() >= self.shared.config.limits.max_domains {
            return Err(StateError::HostBusy.into());
        }
        domains
            .create(auth, data_base_id, item_name, item_kind, category_path, snapshot)
            .await
    }

    async fn build_contexts(&self) -> Result<Contexts> {
        let config = &self.shared.config;
        std::fs::create_dir_all(&config.storage.base_path)?;

        let users = Arc::new(UserContext::new());
        users.register(
            &config.host.admin_id,
            &config.host.admin_name,
            &config.host.admin_password,
            crate::auth::Authority::Admin,
        )?;

        let domains = DomainContext::new(
            config.storage.base_path.join("domains"),
            Arc::clone(&users),
        );
        let restored = domains.restore().await?;
        if !restored.is_empty() {
            tracing::info!(count = restored.len(), "restored domains from disk");
        }

        let repository = RepositoryHost::new(
            config.host.name.clone(),
            Box::new(MemoryRepository::new(
                config.storage.base_path.join("repo"),
            )),
        );

        Ok(Contexts {
            users,
            domains,
            data_bases: Arc::new(DataBaseContext::new()),
            repository,
        })
    }

    async fn transition(&self, from: HostState, to: HostState) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .dispatcher
            .invoke(move || {
                let mut state = shared.state.lock();
                if *state != from {
                    return Err(match *state {
                        HostState::Opened => StateError::HostAlreadyOpen,
                        HostState::Opening | HostState::Closing => StateError::HostBusy,
                        HostState::None => StateError::HostNotOpen,
                    }
                    .into());
                }
                *state = to;
                Ok(())
            })
            .await?
    }

    async fn force_state(&self, to: HostState) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .dispatcher
            .invoke(move || {
                *shared.state.lock() = to;
            })
            .await
    }
}

impl std::fmt::Debug for RepoHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoHost")
            .field("name", &self.shared.config.host.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.base_path = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_open_close_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let host = RepoHost::new(test_config(dir.path())).unwrap();
        assert_eq!(host.state(), HostState::None);

        host.open().await.unwrap();
        assert_eq!(host.state(), HostState::Opened);
        assert!(matches!(
            host.open().await.unwrap_err(),
            CoreError::State(StateError::HostAlreadyOpen)
        ));

        host.close().await.unwrap();
        assert_eq!(host.state(), HostState::None);
        assert!(matches!(
            host.close().await.unwrap_err(),
            CoreError::State(StateError::HostNotOpen)
        ));
    }

    #[tokio::test]
    async fn test_login_requires_open_host() {
        let dir = tempfile::tempdir().unwrap();
        let host = RepoHost::new(test_config(dir.path())).unwrap();
        assert!(matches!(
            host.login("admin", "admin").unwrap_err(),
            CoreError::State(StateError::HostNotOpen)
        ));
    }

    #[tokio::test]
    async fn test_close_expires_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let host = RepoHost::new(test_config(dir.path())).unwrap();
        host.open().await.unwrap();
        let auth = host.login("admin", "admin").unwrap();
        host.close().await.unwrap();
        assert!(auth.is_expired());
        assert!(auth.id().is_err());
    }

    #[tokio::test]
    async fn test_session_limit_rolls_login_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.limits.max_sessions = 1;
        let host = RepoHost::new(config).unwrap();
        host.open().await.unwrap();

        let admin = host.login("admin", "admin").unwrap();
        host.users()
            .unwrap()
            .add_user(&admin, "bob", "Bob", "hunter2", crate::auth::Authority::Member)
            .unwrap();
        let err = host.login("bob", "hunter2").unwrap_err();
        assert!(matches!(err, CoreError::LoginRejected(_)));
        // The rejected session left no token behind.
        assert_eq!(host.users().unwrap().session_count(), 1);
        host.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_requires_admin() {
        let dir = tempfile::tempdir().unwrap();
        let host = RepoHost::new(test_config(dir.path())).unwrap();
        host.open().await.unwrap();
        let admin = host.login("admin", "admin").unwrap();
        host.users()
            .unwrap()
            .add_user(&admin, "bob", "Bob", "hunter2", crate::auth::Authority::Member)
            .unwrap();
        let bob = host.login("bob", "hunter2").unwrap();
        assert!(matches!(
            host.shutdown(&bob).await.unwrap_err(),
            CoreError::Permission(PermissionError::Denied)
        ));
        host.shutdown(&admin).await.unwrap();
        assert_eq!(host.state(), HostState::None);
    }
}
