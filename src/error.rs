//! Unified error handling for tabularium.
//!
//! This module provides the error hierarchy of the coordination core, with
//! stable `error_code()` labels for log fields. Validation errors are raised
//! before any mutation occurs; the only place errors are swallowed is the
//! callback pump, which logs and keeps delivering.

use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identity errors (authentication lifecycle)
// ============================================================================

/// Errors from operating on an expired or mis-chained authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("authentication is expired")]
    Expired,

    #[error("authentication already has an active commission")]
    AlreadyCommissioned,

    #[error("a commissioned authentication cannot begin a commission")]
    NestedCommission,

    #[error("authentication is not the tracked commission of this principal")]
    CommissionMismatch,

    #[error("signature id {0} does not match authentication id {1}")]
    SignatureMismatch(String, String),
}

// ============================================================================
// Dispatcher errors (serialization primitive)
// ============================================================================

/// Errors from the per-owner dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatcherError {
    /// `verify_access` was called outside the owner's execution context.
    #[error("not on dispatcher {0}")]
    WrongContext(String),

    #[error("dispatcher {0} is disposed")]
    Disposed(String),
}

// ============================================================================
// Permission errors (access/lock validation)
// ============================================================================

/// Access/lock validation failures. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("permission denied")]
    Denied,

    #[error("item is already public")]
    AlreadyPublic,

    #[error("item is already private")]
    AlreadyPrivate,

    #[error("cannot manage members of a public item")]
    PublicItem,

    #[error("inherited access settings cannot be edited here")]
    Inherited,

    #[error("the Owner level cannot be granted directly")]
    OwnerNotGrantable,

    #[error("the System level cannot be granted")]
    SystemNotGrantable,

    #[error("'{0}' is already a member")]
    AlreadyMember(String),

    #[error("'{0}' is not a member")]
    NotMember(String),

    #[error("'{0}' already holds that level")]
    AlreadySet(String),

    #[error("the owner's level cannot be changed")]
    OwnerImmutable,

    #[error("cannot change or remove a member at or above your own level")]
    PeerLevel,

    #[error("item is already locked")]
    AlreadyLocked,

    #[error("item is not locked")]
    NotLocked,
}

// ============================================================================
// State errors (lifecycle ordering)
// ============================================================================

/// An operation arrived while its target was in the wrong lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("domain is disposed")]
    DomainDisposed,

    #[error("domain is already initialized")]
    AlreadyInitialized,

    #[error("domain host is already attached")]
    AlreadyAttached,

    #[error("domain host is not attached")]
    NotAttached,

    #[error("edit span already begun")]
    EditAlreadyBegun,

    #[error("no edit span to end")]
    EditNotBegun,

    #[error("host is not open")]
    HostNotOpen,

    #[error("host is already open")]
    HostAlreadyOpen,

    #[error("host is busy with a lifecycle transition")]
    HostBusy,

    #[error("a transaction is already in progress")]
    TransactionInProgress,

    #[error("no transaction in progress")]
    NoTransaction,
}

// ============================================================================
// Lookup errors
// ============================================================================

/// A lookup missed during callback processing or a direct query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("no such domain: {0}")]
    Domain(Uuid),

    #[error("user {0} is not a participant of the domain")]
    DomainUser(String),

    #[error("no such user: {0}")]
    User(String),

    #[error("no such data base: {0}")]
    DataBase(String),

    #[error("no such category: {0}")]
    Category(String),

    #[error("no such item: {0}")]
    Item(String),

    #[error("no such property: {0}")]
    Property(String),
}

// ============================================================================
// Unified core error
// ============================================================================

/// Top-level error of the coordination core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Field(#[from] tabularium_model::FieldError),

    #[error("login rejected for {0}")]
    LoginRejected(String),

    #[error("item already exists: {0}")]
    AlreadyExists(String),

    #[error("password hashing failed: {0}")]
    Password(String),

    #[error("remote operation failed: {0}")]
    Remote(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Identity(IdentityError::Expired) => "identity_expired",
            Self::Identity(IdentityError::AlreadyCommissioned) => "already_commissioned",
            Self::Identity(IdentityError::NestedCommission) => "nested_commission",
            Self::Identity(IdentityError::CommissionMismatch) => "commission_mismatch",
            Self::Identity(IdentityError::SignatureMismatch(..)) => "signature_mismatch",
            Self::Dispatcher(DispatcherError::WrongContext(_)) => "wrong_context",
            Self::Dispatcher(DispatcherError::Disposed(_)) => "dispatcher_disposed",
            Self::Permission(_) => "permission_denied",
            Self::State(_) => "invalid_state",
            Self::NotFound(_) => "not_found",
            Self::Field(_) => "field_error",
            Self::LoginRejected(_) => "login_rejected",
            Self::AlreadyExists(_) => "already_exists",
            Self::Password(_) => "password_error",
            Self::Remote(_) => "remote_failure",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Whether this error is a pre-mutation validation failure (nothing was
    /// changed, so the caller needs no rollback).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Identity(_) | Self::Permission(_) | Self::State(_) | Self::NotFound(_)
        )
    }
}

/// Result type of the coordination core.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            CoreError::from(IdentityError::Expired).error_code(),
            "identity_expired"
        );
        assert_eq!(
            CoreError::from(PermissionError::Denied).error_code(),
            "permission_denied"
        );
        assert_eq!(
            CoreError::from(NotFoundError::User("x".into())).error_code(),
            "not_found"
        );
    }

    #[test]
    fn test_validation_classification() {
        assert!(CoreError::from(PermissionError::Denied).is_validation());
        assert!(!CoreError::Remote("boom".into()).is_validation());
    }
}
