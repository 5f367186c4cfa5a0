//! Domain descriptors.
//!
//! A *domain* is one exclusive collaborative edit session over a single data
//! object: a table's content, a table template, or a type template. These
//! types describe a domain and its participants on the wire and in the
//! replayable action log; the live state machine lives in the root crate.

use crate::row::{DomainFieldInfo, DomainRowInfo};
use crate::signature::SignatureDate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of data object a domain edits. A closed set: every domain is
/// exactly one of these, and the host dispatches source mutations by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainItemKind {
    /// Row-level edits to a table's content.
    TableContent,
    /// Structural edits to a table template (columns).
    TableTemplate,
    /// Edits to a type template (enumeration members).
    TypeTemplate,
}

/// Immutable identity and bookkeeping of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    /// Stable identifier of the domain.
    pub domain_id: Uuid,
    /// Data base the edited item belongs to.
    pub data_base_id: Uuid,
    /// Name of the edited item (table/type name).
    pub item_name: String,
    /// What kind of object is being edited.
    pub item_kind: DomainItemKind,
    /// Category path of the edited item.
    pub category_path: String,
    /// Who created the domain and when.
    pub creation_info: SignatureDate,
    /// Last completed mutation.
    pub modification_info: SignatureDate,
}

/// Lifecycle state of a domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainState {
    /// Constructed but not yet registered with a context.
    #[default]
    None,
    /// Registered and accepting operations.
    Created,
    /// Terminal: the edit session ended or was canceled.
    Deleted,
}

/// Access level a participant joined a domain with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DomainAccessType {
    /// May observe the edit session only.
    Read,
    /// May submit mutations.
    Write,
}

/// Where inside the edited object a participant currently is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainLocationInfo {
    /// Table the cursor is on, empty when unset.
    pub table_name: String,
    /// Row index, `-1` when unset.
    pub row: i64,
    /// Column name, empty when unset.
    pub column: String,
}

/// Identity of a domain participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainUserInfo {
    /// User id of the participant.
    pub user_id: String,
    /// Display name of the participant.
    pub user_name: String,
    /// Level the participant joined with.
    pub access_type: DomainAccessType,
}

/// Mutable per-participant state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainUserState {
    /// Whether this participant holds the edit ownership of the domain.
    pub is_owner: bool,
    /// Whether this participant is inside a `begin_edit`/`end_edit` span.
    pub is_editing: bool,
    /// Current cursor location.
    pub location: DomainLocationInfo,
}

/// Why a participant was removed from a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveReason {
    /// The participant left on their own.
    Leave,
    /// The participant was kicked by the owner or an administrator.
    Kick,
}

/// Removal details delivered with a `UserRemoved` callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveInfo {
    /// Why the participant was removed.
    pub reason: RemoveReason,
    /// Free-form message (kick comment, empty for voluntary leave).
    pub message: String,
}

/// Snapshot of a domain used to hydrate a context: identity, state, and the
/// participant list at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMetaData {
    /// Domain identity.
    pub domain_info: DomainInfo,
    /// Lifecycle state at snapshot time.
    pub domain_state: DomainState,
    /// Participants and their states.
    pub users: Vec<(DomainUserInfo, DomainUserState)>,
}

/// One completed action in a domain's replayable log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAction {
    /// Who performed the action.
    pub user_id: String,
    /// When the host accepted it.
    pub accept_time: DateTime<Utc>,
    /// What was done.
    pub body: DomainActionBody,
}

/// The payload of a logged domain action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DomainActionBody {
    /// Rows were added.
    NewRow {
        /// The added rows.
        rows: Vec<DomainRowInfo>,
    },
    /// Rows were changed.
    SetRow {
        /// The changed rows (keys identify targets).
        rows: Vec<DomainRowInfo>,
    },
    /// Rows were removed.
    RemoveRow {
        /// The removed rows (keys identify targets).
        rows: Vec<DomainRowInfo>,
    },
    /// A source-level property was set.
    SetProperty {
        /// Property name.
        property_name: String,
        /// New value.
        value: DomainFieldInfo,
    },
    /// A user joined the domain.
    Join {
        /// Level joined with.
        access_type: DomainAccessType,
    },
    /// A user left or was removed from the domain.
    Disjoin {
        /// Removal details.
        remove_info: RemoveInfo,
    },
    /// A user was kicked.
    Kick {
        /// Who was kicked.
        target_id: String,
        /// Kick comment.
        comment: String,
    },
    /// Edit ownership was transferred.
    SetOwner {
        /// The new owner.
        target_id: String,
    },
}

impl DomainActionBody {
    /// Stable label for log lines and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewRow { .. } => "new_row",
            Self::SetRow { .. } => "set_row",
            Self::RemoveRow { .. } => "remove_row",
            Self::SetProperty { .. } => "set_property",
            Self::Join { .. } => "join",
            Self::Disjoin { .. } => "disjoin",
            Self::Kick { .. } => "kick",
            Self::SetOwner { .. } => "set_owner",
        }
    }
}

impl DomainInfo {
    /// Build the info for a freshly created domain.
    pub fn new(
        data_base_id: Uuid,
        item_name: impl Into<String>,
        item_kind: DomainItemKind,
        category_path: impl Into<String>,
        creation_info: SignatureDate,
    ) -> Self {
        Self {
            domain_id: Uuid::new_v4(),
            data_base_id,
            item_name: item_name.into(),
            item_kind,
            category_path: category_path.into(),
            modification_info: creation_info.clone(),
            creation_info,
        }
    }
}
