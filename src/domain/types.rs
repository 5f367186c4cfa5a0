//! Commands and runtime participant state of the domain actor.

use crate::auth::Authentication;
use crate::domain::source::SourceSnapshot;
use crate::error::Result;
use tabularium_model::{
    DomainAccessType, DomainInfo, DomainLocationInfo, DomainMetaData, DomainRowInfo, DomainState,
    DomainUserInfo, DomainUserState, RemoveInfo,
};
use tokio::sync::oneshot;

/// A participant of a live domain.
#[derive(Debug, Clone)]
pub struct DomainUser {
    /// Who the participant is and how they joined.
    pub info: DomainUserInfo,
    /// Ownership, edit span, cursor.
    pub state: DomainUserState,
}

impl DomainUser {
    pub(crate) fn new(info: DomainUserInfo) -> Self {
        Self {
            info,
            state: DomainUserState::default(),
        }
    }
}

/// One message to a domain actor. Every command that can fail carries a
/// `oneshot` reply; queries reply with their snapshot.
pub(crate) enum DomainCommand {
    Join {
        auth: Authentication,
        access_type: DomainAccessType,
        reply: oneshot::Sender<Result<DomainUserInfo>>,
    },
    Leave {
        auth: Authentication,
        reply: oneshot::Sender<Result<()>>,
    },
    Kick {
        auth: Authentication,
        target_id: String,
        comment: String,
        reply: oneshot::Sender<Result<RemoveInfo>>,
    },
    SetOwner {
        auth: Authentication,
        target_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    BeginEdit {
        auth: Authentication,
        location: DomainLocationInfo,
        reply: oneshot::Sender<Result<()>>,
    },
    EndEdit {
        auth: Authentication,
        reply: oneshot::Sender<Result<()>>,
    },
    SetLocation {
        auth: Authentication,
        location: DomainLocationInfo,
        reply: oneshot::Sender<Result<()>>,
    },
    NewRow {
        auth: Authentication,
        rows: Vec<DomainRowInfo>,
        reply: oneshot::Sender<Result<()>>,
    },
    SetRow {
        auth: Authentication,
        rows: Vec<DomainRowInfo>,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveRow {
        auth: Authentication,
        rows: Vec<DomainRowInfo>,
        reply: oneshot::Sender<Result<()>>,
    },
    SetProperty {
        auth: Authentication,
        name: String,
        value: tabularium_model::DomainFieldInfo,
        reply: oneshot::Sender<Result<()>>,
    },
    GetInfo {
        reply: oneshot::Sender<(DomainInfo, DomainState)>,
    },
    GetUsers {
        reply: oneshot::Sender<Vec<(DomainUserInfo, DomainUserState)>>,
    },
    GetMetaData {
        reply: oneshot::Sender<DomainMetaData>,
    },
    GetSnapshot {
        reply: oneshot::Sender<SourceSnapshot>,
    },
    Attach {
        reply: oneshot::Sender<Result<()>>,
    },
    Detach {
        reply: oneshot::Sender<Result<()>>,
    },
    Dispose {
        auth: Authentication,
        is_canceled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
}
