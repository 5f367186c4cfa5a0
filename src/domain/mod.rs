//! Live edit sessions.
//!
//! A domain is one exclusive collaborative edit session over a single data
//! object. Each domain runs as its own actor task: commands arrive on an
//! mpsc channel and are applied one at a time, so two mutations of the same
//! domain are never interleaved while different domains run in parallel.
//! Every accepted mutation is appended to the domain's replayable log and
//! echoed to the owning context as a callback.

pub mod context;
pub mod logger;
pub mod source;
mod types;

pub use context::DomainContext;
pub use logger::{DomainLogger, LoggerRecovery, PostedEntry};
pub use source::{DomainSource, SourceSnapshot};
pub use types::DomainUser;

use crate::auth::Authentication;
use crate::error::{CoreError, NotFoundError, PermissionError, Result, StateError};
use chrono::Utc;
use tabularium_model::{
    DomainAccessType, DomainAction, DomainActionBody, DomainCallback, DomainFieldInfo, DomainInfo,
    DomainLocationInfo, DomainMetaData, DomainRowInfo, DomainState, DomainUserInfo,
    DomainUserState, RemoveInfo, RemoveReason, SignatureDate,
};
use tokio::sync::{mpsc, oneshot};
use types::DomainCommand;
use uuid::Uuid;

type EventSender = mpsc::UnboundedSender<(SignatureDate, DomainCallback)>;

/// Cloneable handle to one domain's actor task.
///
/// All methods are async sends; once the domain is disposed every further
/// call fails with [`StateError::DomainDisposed`].
#[derive(Debug, Clone)]
pub struct DomainHandle {
    domain_id: Uuid,
    tx: mpsc::UnboundedSender<DomainCommand>,
}

impl DomainHandle {
    /// The domain's id.
    pub fn domain_id(&self) -> Uuid {
        self.domain_id
    }

    fn send(&self, command: DomainCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| StateError::DomainDisposed.into())
    }

    async fn recv<T>(&self, rx: oneshot::Receiver<T>) -> Result<T> {
        rx.await.map_err(|_| StateError::DomainDisposed.into())
    }

    /// Join the edit session. The first writer becomes the owner.
    pub async fn join(
        &self,
        auth: &Authentication,
        access_type: DomainAccessType,
    ) -> Result<DomainUserInfo> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::Join {
            auth: auth.clone(),
            access_type,
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Leave the session. Ownership moves to the next writer.
    pub async fn leave(&self, auth: &Authentication) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::Leave {
            auth: auth.clone(),
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Remove another participant. Owner or administrator only.
    pub async fn kick(
        &self,
        auth: &Authentication,
        target_id: &str,
        comment: &str,
    ) -> Result<RemoveInfo> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::Kick {
            auth: auth.clone(),
            target_id: target_id.to_string(),
            comment: comment.to_string(),
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Transfer edit ownership to another writer.
    pub async fn set_owner(&self, auth: &Authentication, target_id: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::SetOwner {
            auth: auth.clone(),
            target_id: target_id.to_string(),
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Open an edit span at `location`.
    pub async fn begin_edit(
        &self,
        auth: &Authentication,
        location: DomainLocationInfo,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::BeginEdit {
            auth: auth.clone(),
            location,
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Close the caller's edit span.
    pub async fn end_edit(&self, auth: &Authentication) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::EndEdit {
            auth: auth.clone(),
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Move the caller's cursor.
    pub async fn set_location(
        &self,
        auth: &Authentication,
        location: DomainLocationInfo,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::SetLocation {
            auth: auth.clone(),
            location,
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Add rows.
    pub async fn new_row(&self, auth: &Authentication, rows: Vec<DomainRowInfo>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::NewRow {
            auth: auth.clone(),
            rows,
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Change rows identified by their keys.
    pub async fn set_row(&self, auth: &Authentication, rows: Vec<DomainRowInfo>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::SetRow {
            auth: auth.clone(),
            rows,
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Remove rows identified by their keys.
    pub async fn remove_row(&self, auth: &Authentication, rows: Vec<DomainRowInfo>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::RemoveRow {
            auth: auth.clone(),
            rows,
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Set a source-level property.
    pub async fn set_property(
        &self,
        auth: &Authentication,
        name: &str,
        value: DomainFieldInfo,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::SetProperty {
            auth: auth.clone(),
            name: name.to_string(),
            value,
            reply,
        })?;
        self.recv(rx).await?
    }

    /// Current info and lifecycle state.
    pub async fn info(&self) -> Result<(DomainInfo, DomainState)> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::GetInfo { reply })?;
        self.recv(rx).await
    }

    /// Current participants.
    pub async fn users(&self) -> Result<Vec<(DomainUserInfo, DomainUserState)>> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::GetUsers { reply })?;
        self.recv(rx).await
    }

    /// Full snapshot of identity, state, and participants.
    pub async fn meta_data(&self) -> Result<DomainMetaData> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::GetMetaData { reply })?;
        self.recv(rx).await
    }

    /// Current source data.
    pub async fn snapshot(&self) -> Result<SourceSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::GetSnapshot { reply })?;
        self.recv(rx).await
    }

    /// Bind the host. Row mutations require an attached host.
    pub async fn attach(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::Attach { reply })?;
        self.recv(rx).await?
    }

    /// Unbind the host.
    pub async fn detach(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::Detach { reply })?;
        self.recv(rx).await?
    }

    /// End the session. `is_canceled` tells subscribers whether the edits
    /// were discarded or completed.
    pub async fn dispose(&self, auth: &Authentication, is_canceled: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DomainCommand::Dispose {
            auth: auth.clone(),
            is_canceled,
            reply,
        })?;
        self.recv(rx).await?
    }
}

/// Spawn a domain actor and return its handle.
pub(crate) fn spawn_domain(
    info: DomainInfo,
    source: Box<dyn DomainSource>,
    logger: DomainLogger,
    events_tx: EventSender,
) -> DomainHandle {
    let domain_id = info.domain_id;
    let (tx, rx) = mpsc::unbounded_channel();
    let domain = Domain {
        info,
        state: DomainState::Created,
        users: Vec::new(),
        source,
        logger,
        attached: false,
        events_tx,
    };
    tokio::spawn(domain.run(rx));
    DomainHandle { domain_id, tx }
}

enum RowMutation {
    New,
    Set,
    Remove,
}

struct Domain {
    info: DomainInfo,
    state: DomainState,
    users: Vec<DomainUser>,
    source: Box<dyn DomainSource>,
    logger: DomainLogger,
    attached: bool,
    events_tx: EventSender,
}

impl Domain {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DomainCommand>) {
        while let Some(command) = rx.recv().await {
            if self.handle(command).await {
                break;
            }
        }
        rx.close();
    }

    /// Returns true when the domain disposed itself.
    async fn handle(&mut self, command: DomainCommand) -> bool {
        match command {
            DomainCommand::Join {
                auth,
                access_type,
                reply,
            } => {
                let _ = reply.send(self.join(&auth, access_type));
            }
            DomainCommand::Leave { auth, reply } => {
                let _ = reply.send(self.leave(&auth));
            }
            DomainCommand::Kick {
                auth,
                target_id,
                comment,
                reply,
            } => {
                let _ = reply.send(self.kick(&auth, &target_id, &comment));
            }
            DomainCommand::SetOwner {
                auth,
                target_id,
                reply,
            } => {
                let _ = reply.send(self.set_owner(&auth, &target_id));
            }
            DomainCommand::BeginEdit {
                auth,
                location,
                reply,
            } => {
                let _ = reply.send(self.begin_edit(&auth, location));
            }
            DomainCommand::EndEdit { auth, reply } => {
                let _ = reply.send(self.end_edit(&auth));
            }
            DomainCommand::SetLocation {
                auth,
                location,
                reply,
            } => {
                let _ = reply.send(self.set_location(&auth, location));
            }
            DomainCommand::NewRow { auth, rows, reply } => {
                let _ = reply.send(self.mutate_rows(&auth, rows, RowMutation::New));
            }
            DomainCommand::SetRow { auth, rows, reply } => {
                let _ = reply.send(self.mutate_rows(&auth, rows, RowMutation::Set));
            }
            DomainCommand::RemoveRow { auth, rows, reply } => {
                let _ = reply.send(self.mutate_rows(&auth, rows, RowMutation::Remove));
            }
            DomainCommand::SetProperty {
                auth,
                name,
                value,
                reply,
            } => {
                let _ = reply.send(self.set_property(&auth, &name, value));
            }
            DomainCommand::GetInfo { reply } => {
                let _ = reply.send((self.info.clone(), self.state));
            }
            DomainCommand::GetUsers { reply } => {
                let _ = reply.send(self.user_list());
            }
            DomainCommand::GetMetaData { reply } => {
                let _ = reply.send(DomainMetaData {
                    domain_info: self.info.clone(),
                    domain_state: self.state,
                    users: self.user_list(),
                });
            }
            DomainCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.source.snapshot());
            }
            DomainCommand::Attach { reply } => {
                let _ = reply.send(self.attach());
            }
            DomainCommand::Detach { reply } => {
                let _ = reply.send(self.detach());
            }
            DomainCommand::Dispose {
                auth,
                is_canceled,
                reply,
            } => {
                let result = self.dispose(&auth, is_canceled).await;
                let ended = result.is_ok();
                let _ = reply.send(result);
                return ended;
            }
        }
        false
    }

    fn user_list(&self) -> Vec<(DomainUserInfo, DomainUserState)> {
        self.users
            .iter()
            .map(|u| (u.info.clone(), u.state.clone()))
            .collect()
    }

    fn emit(&self, signature: SignatureDate, callback: DomainCallback) {
        if self.events_tx.send((signature, callback)).is_err() {
            tracing::warn!(domain_id = %self.info.domain_id, "event channel closed, callback dropped");
        }
    }

    fn log(&self, auth: &Authentication, body: DomainActionBody) -> Result<()> {
        let id = self.logger.post(DomainAction {
            user_id: auth.user_id().to_string(),
            accept_time: Utc::now(),
            body,
        })?;
        self.logger.complete(id)
    }

    fn user_index(&self, user_id: &str) -> Result<usize> {
        self.users
            .iter()
            .position(|u| u.info.user_id == user_id)
            .ok_or_else(|| NotFoundError::DomainUser(user_id.to_string()).into())
    }

    fn writer_index(&self, auth: &Authentication) -> Result<usize> {
        let index = self.user_index(auth.user_id())?;
        if self.users[index].info.access_type < DomainAccessType::Write {
            return Err(PermissionError::Denied.into());
        }
        Ok(index)
    }

    fn is_owner(&self, user_id: &str) -> bool {
        self.users
            .iter()
            .any(|u| u.info.user_id == user_id && u.state.is_owner)
    }

    fn join(
        &mut self,
        auth: &Authentication,
        access_type: DomainAccessType,
    ) -> Result<DomainUserInfo> {
        auth.verify()?;
        let user_id = auth.user_id().to_string();
        if self.users.iter().any(|u| u.info.user_id == user_id) {
            return Err(CoreError::AlreadyExists(user_id));
        }
        let info = DomainUserInfo {
            user_id,
            user_name: auth.user_name().to_string(),
            access_type,
        };
        let mut user = DomainUser::new(info.clone());
        // The first writer owns the edit session.
        if access_type == DomainAccessType::Write && !self.users.iter().any(|u| u.state.is_owner) {
            user.state.is_owner = true;
        }
        let state = user.state.clone();
        self.users.push(user);
        self.log(auth, DomainActionBody::Join { access_type })?;
        self.emit(
            auth.sign()?,
            DomainCallback::UserAdded {
                domain_id: self.info.domain_id,
                user_info: info.clone(),
                user_state: state,
            },
        );
        Ok(info)
    }

    fn leave(&mut self, auth: &Authentication) -> Result<()> {
        auth.verify()?;
        let index = self.user_index(auth.user_id())?;
        let user = self.users.remove(index);
        let remove_info = RemoveInfo {
            reason: RemoveReason::Leave,
            message: String::new(),
        };
        self.log(
            auth,
            DomainActionBody::Disjoin {
                remove_info: remove_info.clone(),
            },
        )?;
        let signature = auth.sign()?;
        self.emit(
            signature.clone(),
            DomainCallback::UserRemoved {
                domain_id: self.info.domain_id,
                user_id: user.info.user_id.clone(),
                remover_id: user.info.user_id,
                remove_info,
            },
        );
        if user.state.is_owner {
            self.promote_next_owner(signature);
        }
        Ok(())
    }

    fn kick(&mut self, auth: &Authentication, target_id: &str, comment: &str) -> Result<RemoveInfo> {
        auth.verify()?;
        if !self.is_owner(auth.user_id()) && !auth.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        // The owner leaves, they do not kick themselves.
        if target_id == auth.user_id() {
            return Err(PermissionError::Denied.into());
        }
        let index = self.user_index(target_id)?;
        let target = self.users.remove(index);
        let remove_info = RemoveInfo {
            reason: RemoveReason::Kick,
            message: comment.to_string(),
        };
        self.log(
            auth,
            DomainActionBody::Kick {
                target_id: target_id.to_string(),
                comment: comment.to_string(),
            },
        )?;
        let signature = auth.sign()?;
        self.emit(
            signature.clone(),
            DomainCallback::UserRemoved {
                domain_id: self.info.domain_id,
                user_id: target.info.user_id,
                remover_id: auth.user_id().to_string(),
                remove_info: remove_info.clone(),
            },
        );
        if target.state.is_owner {
            self.promote_next_owner(signature);
        }
        Ok(remove_info)
    }

    fn promote_next_owner(&mut self, signature: SignatureDate) {
        let next = self
            .users
            .iter_mut()
            .find(|u| u.info.access_type == DomainAccessType::Write);
        if let Some(user) = next {
            user.state.is_owner = true;
            let owner_id = user.info.user_id.clone();
            self.emit(
                signature,
                DomainCallback::OwnerChanged {
                    domain_id: self.info.domain_id,
                    owner_id,
                },
            );
        }
    }

    fn set_owner(&mut self, auth: &Authentication, target_id: &str) -> Result<()> {
        auth.verify()?;
        if !self.is_owner(auth.user_id()) && !auth.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        let index = self.user_index(target_id)?;
        if self.users[index].info.access_type < DomainAccessType::Write {
            return Err(PermissionError::Denied.into());
        }
        for user in &mut self.users {
            user.state.is_owner = false;
        }
        self.users[index].state.is_owner = true;
        self.log(
            auth,
            DomainActionBody::SetOwner {
                target_id: target_id.to_string(),
            },
        )?;
        self.emit(
            auth.sign()?,
            DomainCallback::OwnerChanged {
                domain_id: self.info.domain_id,
                owner_id: target_id.to_string(),
            },
        );
        Ok(())
    }

    fn begin_edit(&mut self, auth: &Authentication, location: DomainLocationInfo) -> Result<()> {
        auth.verify()?;
        let index = self.writer_index(auth)?;
        if self.users[index].state.is_editing {
            return Err(StateError::EditAlreadyBegun.into());
        }
        self.users[index].state.is_editing = true;
        self.users[index].state.location = location.clone();
        self.emit(
            auth.sign()?,
            DomainCallback::UserEditBegun {
                domain_id: self.info.domain_id,
                user_id: auth.user_id().to_string(),
                location,
            },
        );
        Ok(())
    }

    fn end_edit(&mut self, auth: &Authentication) -> Result<()> {
        auth.verify()?;
        let index = self.user_index(auth.user_id())?;
        if !self.users[index].state.is_editing {
            return Err(StateError::EditNotBegun.into());
        }
        self.users[index].state.is_editing = false;
        self.emit(
            auth.sign()?,
            DomainCallback::UserEditEnded {
                domain_id: self.info.domain_id,
                user_id: auth.user_id().to_string(),
            },
        );
        Ok(())
    }

    fn set_location(&mut self, auth: &Authentication, location: DomainLocationInfo) -> Result<()> {
        auth.verify()?;
        let index = self.user_index(auth.user_id())?;
        self.users[index].state.location = location.clone();
        self.emit(
            auth.sign()?,
            DomainCallback::UserLocationChanged {
                domain_id: self.info.domain_id,
                user_id: auth.user_id().to_string(),
                location,
            },
        );
        Ok(())
    }

    fn mutate_rows(
        &mut self,
        auth: &Authentication,
        rows: Vec<DomainRowInfo>,
        mutation: RowMutation,
    ) -> Result<()> {
        auth.verify()?;
        if !self.attached {
            return Err(StateError::NotAttached.into());
        }
        self.writer_index(auth)?;
        let domain_id = self.info.domain_id;
        let (body, callback) = match mutation {
            RowMutation::New => {
                self.source.new_row(&rows)?;
                (
                    DomainActionBody::NewRow { rows: rows.clone() },
                    DomainCallback::RowAdded { domain_id, rows },
                )
            }
            RowMutation::Set => {
                self.source.set_row(&rows)?;
                (
                    DomainActionBody::SetRow { rows: rows.clone() },
                    DomainCallback::RowChanged { domain_id, rows },
                )
            }
            RowMutation::Remove => {
                self.source.remove_row(&rows)?;
                (
                    DomainActionBody::RemoveRow { rows: rows.clone() },
                    DomainCallback::RowRemoved { domain_id, rows },
                )
            }
        };
        let signature = auth.sign()?;
        self.info.modification_info = signature.clone();
        self.log(auth, body)?;
        self.emit(signature, callback);
        Ok(())
    }

    fn set_property(
        &mut self,
        auth: &Authentication,
        name: &str,
        value: DomainFieldInfo,
    ) -> Result<()> {
        auth.verify()?;
        if !self.attached {
            return Err(StateError::NotAttached.into());
        }
        self.writer_index(auth)?;
        self.source.set_property(name, &value)?;
        let signature = auth.sign()?;
        self.info.modification_info = signature.clone();
        self.log(
            auth,
            DomainActionBody::SetProperty {
                property_name: name.to_string(),
                value: value.clone(),
            },
        )?;
        self.emit(
            signature,
            DomainCallback::PropertyChanged {
                domain_id: self.info.domain_id,
                property_name: name.to_string(),
                value,
            },
        );
        Ok(())
    }

    fn state_changed(&self) -> DomainCallback {
        DomainCallback::DomainStateChanged {
            domain_id: self.info.domain_id,
            domain_state: self.state,
            is_attached: self.attached,
        }
    }

    fn attach(&mut self) -> Result<()> {
        if self.attached {
            return Err(StateError::AlreadyAttached.into());
        }
        self.attached = true;
        // Host binding is a host act, not a user's.
        self.emit(SignatureDate::new(crate::auth::SYSTEM_ID), self.state_changed());
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        if !self.attached {
            return Err(StateError::NotAttached.into());
        }
        self.attached = false;
        self.emit(SignatureDate::new(crate::auth::SYSTEM_ID), self.state_changed());
        Ok(())
    }

    async fn dispose(&mut self, auth: &Authentication, is_canceled: bool) -> Result<()> {
        auth.verify()?;
        if !self.is_owner(auth.user_id()) && !auth.is_admin() && !auth.is_system() {
            return Err(PermissionError::Denied.into());
        }
        self.state = DomainState::Deleted;
        self.attached = false;
        // The log exists for crash recovery; a session that ends properly
        // leaves nothing to recover.
        self.logger.dispose(true).await?;
        let signature = auth.sign()?;
        self.emit(signature.clone(), self.state_changed());
        self.emit(
            signature,
            DomainCallback::DomainsDeleted {
                domain_ids: vec![self.info.domain_id],
                is_canceled: vec![is_canceled],
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authority;
    use crate::domain::source::source_for;
    use tabularium_model::{DomainItemKind, FieldValue};

    fn make_domain(
        dir: &std::path::Path,
    ) -> (
        DomainHandle,
        mpsc::UnboundedReceiver<(SignatureDate, DomainCallback)>,
    ) {
        let info = DomainInfo::new(
            Uuid::new_v4(),
            "items",
            DomainItemKind::TableContent,
            "/tables/",
            SignatureDate::new("alice"),
        );
        let logger = DomainLogger::new(dir, &info, &SourceSnapshot::default()).unwrap();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = spawn_domain(
            info,
            source_for(DomainItemKind::TableContent),
            logger,
            events_tx,
        );
        (handle, events_rx)
    }

    fn row(key: i64) -> DomainRowInfo {
        DomainRowInfo {
            table_name: "items".to_string(),
            fields: vec![tabularium_model::DomainFieldInfo::from_value(
                &FieldValue::String("v".to_string()),
            )],
            keys: vec![tabularium_model::DomainFieldInfo::from_value(
                &FieldValue::Int64(key),
            )],
        }
    }

    #[tokio::test]
    async fn test_first_writer_becomes_owner() {
        let dir = tempfile::tempdir().unwrap();
        let (domain, _events) = make_domain(dir.path());
        let reader = Authentication::new("eve", "Eve", Authority::Member);
        let writer = Authentication::new("alice", "Alice", Authority::Member);

        domain.join(&reader, DomainAccessType::Read).await.unwrap();
        domain.join(&writer, DomainAccessType::Write).await.unwrap();

        let users = domain.users().await.unwrap();
        let owner: Vec<&str> = users
            .iter()
            .filter(|(_, s)| s.is_owner)
            .map(|(i, _)| i.user_id.as_str())
            .collect();
        assert_eq!(owner, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_non_participant_mutation_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (domain, _events) = make_domain(dir.path());
        domain.attach().await.unwrap();
        let outsider = Authentication::new("mallory", "Mallory", Authority::Member);
        let err = domain.new_row(&outsider, vec![row(1)]).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotFound(NotFoundError::DomainUser(_))
        ));
    }

    #[tokio::test]
    async fn test_reader_cannot_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let (domain, _events) = make_domain(dir.path());
        domain.attach().await.unwrap();
        let reader = Authentication::new("eve", "Eve", Authority::Member);
        domain.join(&reader, DomainAccessType::Read).await.unwrap();
        let err = domain.new_row(&reader, vec![row(1)]).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Permission(PermissionError::Denied)
        ));
    }

    #[tokio::test]
    async fn test_mutation_requires_attached_host() {
        let dir = tempfile::tempdir().unwrap();
        let (domain, _events) = make_domain(dir.path());
        let writer = Authentication::new("alice", "Alice", Authority::Member);
        domain.join(&writer, DomainAccessType::Write).await.unwrap();
        let err = domain.new_row(&writer, vec![row(1)]).await.unwrap_err();
        assert!(matches!(err, CoreError::State(StateError::NotAttached)));
    }

    #[tokio::test]
    async fn test_begin_edit_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (domain, _events) = make_domain(dir.path());
        let writer = Authentication::new("alice", "Alice", Authority::Member);
        domain.join(&writer, DomainAccessType::Write).await.unwrap();
        domain
            .begin_edit(&writer, DomainLocationInfo::default())
            .await
            .unwrap();
        let err = domain
            .begin_edit(&writer, DomainLocationInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::State(StateError::EditAlreadyBegun)));
        domain.end_edit(&writer).await.unwrap();
        assert!(matches!(
            domain.end_edit(&writer).await.unwrap_err(),
            CoreError::State(StateError::EditNotBegun)
        ));
    }

    #[tokio::test]
    async fn test_ownership_transfers_when_owner_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let (domain, _events) = make_domain(dir.path());
        let alice = Authentication::new("alice", "Alice", Authority::Member);
        let bob = Authentication::new("bob", "Bob", Authority::Member);
        domain.join(&alice, DomainAccessType::Write).await.unwrap();
        domain.join(&bob, DomainAccessType::Write).await.unwrap();

        domain.leave(&alice).await.unwrap();
        let users = domain.users().await.unwrap();
        assert!(users.iter().any(|(i, s)| i.user_id == "bob" && s.is_owner));
    }

    #[tokio::test]
    async fn test_dispose_rejects_further_commands() {
        let dir = tempfile::tempdir().unwrap();
        let (domain, _events) = make_domain(dir.path());
        let admin = Authentication::new("admin", "Admin", Authority::Admin);
        domain.dispose(&admin, false).await.unwrap();
        // The actor has stopped; the channel is closed.
        let err = domain.users().await.unwrap_err();
        assert!(matches!(err, CoreError::State(StateError::DomainDisposed)));
    }

    #[tokio::test]
    async fn test_binding_and_deletion_are_announced() {
        let dir = tempfile::tempdir().unwrap();
        let (domain, mut events) = make_domain(dir.path());

        domain.attach().await.unwrap();
        let (signature, callback) = events.recv().await.unwrap();
        assert_eq!(signature.id, crate::auth::SYSTEM_ID);
        assert!(matches!(
            callback,
            DomainCallback::DomainStateChanged {
                domain_state: DomainState::Created,
                is_attached: true,
                ..
            }
        ));

        domain.detach().await.unwrap();
        let (_, callback) = events.recv().await.unwrap();
        assert!(matches!(
            callback,
            DomainCallback::DomainStateChanged {
                is_attached: false,
                ..
            }
        ));

        let admin = Authentication::new("admin", "Admin", Authority::Admin);
        domain.dispose(&admin, false).await.unwrap();
        let (_, callback) = events.recv().await.unwrap();
        assert!(matches!(
            callback,
            DomainCallback::DomainStateChanged {
                domain_state: DomainState::Deleted,
                ..
            }
        ));
        let (_, callback) = events.recv().await.unwrap();
        assert!(matches!(callback, DomainCallback::DomainsDeleted { .. }));
    }

    #[tokio::test]
    async fn test_kick_requires_owner_or_admin() {
        let dir = tempfile::tempdir().unwrap();
        let (domain, _events) = make_domain(dir.path());
        let alice = Authentication::new("alice", "Alice", Authority::Member);
        let bob = Authentication::new("bob", "Bob", Authority::Member);
        domain.join(&alice, DomainAccessType::Write).await.unwrap();
        domain.join(&bob, DomainAccessType::Write).await.unwrap();

        let err = domain.kick(&bob, "alice", "no").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Permission(PermissionError::Denied)
        ));
        let info = domain.kick(&alice, "bob", "done").await.unwrap();
        assert_eq!(info.reason, RemoveReason::Kick);
    }
}
