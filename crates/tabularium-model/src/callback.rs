//! The host callback surface.
//!
//! Every state-changing operation the host accepts is replicated to
//! subscribed clients as one of these callbacks. Each carries a
//! [`CallbackInfo`] whose `index` is a per-subscription sequence number: the
//! receiving context must apply callback `n + 1` only after `n` has been
//! fully applied, even when the transport delivers them out of order.

use crate::domain::{
    DomainInfo, DomainLocationInfo, DomainMetaData, DomainState, DomainUserInfo, DomainUserState,
    RemoveInfo,
};
use crate::row::{DomainFieldInfo, DomainRowInfo};
use crate::signature::SignatureDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordering and authentication envelope of one callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackInfo {
    /// Per-subscription sequence number, starting at zero.
    pub index: u64,
    /// Signature of the session whose operation produced the callback.
    pub signature_date: SignatureDate,
}

/// A server-pushed domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainCallback {
    /// New domains were registered.
    DomainsCreated {
        /// Snapshots of the new domains.
        meta_datas: Vec<DomainMetaData>,
    },
    /// Domains ended.
    DomainsDeleted {
        /// The ended domains.
        domain_ids: Vec<Uuid>,
        /// Per-domain: whether the session was canceled rather than completed.
        is_canceled: Vec<bool>,
    },
    /// A domain's info changed wholesale.
    ///
    /// Only sent by an external authority; a local domain reports info
    /// updates through the mutation callbacks that caused them.
    DomainInfoChanged {
        /// Target domain.
        domain_id: Uuid,
        /// The new info.
        domain_info: DomainInfo,
    },
    /// A domain's lifecycle state or host binding changed.
    ///
    /// Sent when the host attaches or detaches the domain and when the
    /// session ends (then followed by [`DomainsDeleted`]).
    ///
    /// [`DomainsDeleted`]: Self::DomainsDeleted
    DomainStateChanged {
        /// Target domain.
        domain_id: Uuid,
        /// The new state.
        domain_state: DomainState,
        /// Whether the host currently accepts mutations for the domain.
        is_attached: bool,
    },
    /// A user joined a domain.
    UserAdded {
        /// Target domain.
        domain_id: Uuid,
        /// The new participant.
        user_info: DomainUserInfo,
        /// Initial participant state.
        user_state: DomainUserState,
    },
    /// A user left or was removed from a domain.
    UserRemoved {
        /// Target domain.
        domain_id: Uuid,
        /// The removed participant.
        user_id: String,
        /// Who removed them (same id for voluntary leave).
        remover_id: String,
        /// Removal details.
        remove_info: RemoveInfo,
    },
    /// A participant's cursor moved.
    UserLocationChanged {
        /// Target domain.
        domain_id: Uuid,
        /// The participant.
        user_id: String,
        /// New location.
        location: DomainLocationInfo,
    },
    /// A participant's state changed wholesale.
    ///
    /// Only sent by an external authority; a local domain reports state
    /// transitions through the dedicated edit/owner callbacks.
    UserStateChanged {
        /// Target domain.
        domain_id: Uuid,
        /// The participant.
        user_id: String,
        /// New state.
        user_state: DomainUserState,
    },
    /// A participant entered an edit span.
    UserEditBegun {
        /// Target domain.
        domain_id: Uuid,
        /// The participant.
        user_id: String,
        /// Where editing begins.
        location: DomainLocationInfo,
    },
    /// A participant left their edit span.
    UserEditEnded {
        /// Target domain.
        domain_id: Uuid,
        /// The participant.
        user_id: String,
    },
    /// Edit ownership moved to another participant.
    OwnerChanged {
        /// Target domain.
        domain_id: Uuid,
        /// The new owner.
        owner_id: String,
    },
    /// Rows were added.
    RowAdded {
        /// Target domain.
        domain_id: Uuid,
        /// The added rows.
        rows: Vec<DomainRowInfo>,
    },
    /// Rows were changed.
    RowChanged {
        /// Target domain.
        domain_id: Uuid,
        /// The changed rows.
        rows: Vec<DomainRowInfo>,
    },
    /// Rows were removed.
    RowRemoved {
        /// Target domain.
        domain_id: Uuid,
        /// The removed rows.
        rows: Vec<DomainRowInfo>,
    },
    /// A source property was set.
    PropertyChanged {
        /// Target domain.
        domain_id: Uuid,
        /// Property name.
        property_name: String,
        /// New value.
        value: DomainFieldInfo,
    },
    /// Asynchronous host tasks completed.
    TaskCompleted {
        /// The completed tasks.
        task_ids: Vec<Uuid>,
    },
}

impl DomainCallback {
    /// The domain the callback targets, when it targets exactly one.
    pub fn domain_id(&self) -> Option<Uuid> {
        match self {
            Self::DomainsCreated { .. }
            | Self::DomainsDeleted { .. }
            | Self::TaskCompleted { .. } => None,
            Self::DomainInfoChanged { domain_id, .. }
            | Self::DomainStateChanged { domain_id, .. }
            | Self::UserAdded { domain_id, .. }
            | Self::UserRemoved { domain_id, .. }
            | Self::UserLocationChanged { domain_id, .. }
            | Self::UserStateChanged { domain_id, .. }
            | Self::UserEditBegun { domain_id, .. }
            | Self::UserEditEnded { domain_id, .. }
            | Self::OwnerChanged { domain_id, .. }
            | Self::RowAdded { domain_id, .. }
            | Self::RowChanged { domain_id, .. }
            | Self::RowRemoved { domain_id, .. }
            | Self::PropertyChanged { domain_id, .. } => Some(*domain_id),
        }
    }
}
