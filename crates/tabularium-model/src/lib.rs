//! # tabularium-model
//!
//! Shared model types for the tabularium coordination core: signature dates,
//! access and lock metadata, domain descriptors, typed row payloads, and the
//! host callback surface.
//!
//! These types are plain data. All behavior that requires a dispatcher or a
//! live session lives in the `tabularium` crate; this crate only defines the
//! values that cross component boundaries and must round-trip through
//! serialization.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod access;
pub mod callback;
pub mod domain;
pub mod repo;
pub mod row;
pub mod signature;

pub use access::{AccessInfo, AccessMemberInfo, AccessType, LockInfo};
pub use callback::{CallbackInfo, DomainCallback};
pub use domain::{
    DomainAccessType, DomainAction, DomainActionBody, DomainInfo, DomainItemKind,
    DomainLocationInfo, DomainMetaData, DomainState, DomainUserInfo, DomainUserState, RemoveInfo,
    RemoveReason,
};
pub use repo::{LogInfo, LogPropertyInfo, RepositoryItem, RepositoryItemState};
pub use row::{DomainFieldInfo, DomainRowInfo, FieldError, FieldValue};
pub use signature::SignatureDate;
