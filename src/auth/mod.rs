//! Authentication principals.
//!
//! An [`Authentication`] is the in-process proof of a logged-in session. It
//! stamps [`SignatureDate`]s onto every validated operation, can delegate
//! itself once through a *commission* (a short-lived secondary principal
//! acting on the same identity), and notifies subscribers when it expires.
//!
//! Commission chains are at most one level deep: a commissioned principal
//! cannot begin a commission of its own, and a principal with a live
//! commission cannot begin another until the first is ended.

mod collection;

pub use collection::AuthenticationCollection;

use crate::error::{IdentityError, Result};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tabularium_model::SignatureDate;
use uuid::Uuid;

/// Reserved id of the internal system principal.
pub const SYSTEM_ID: &str = "System";
/// Display name of the internal system principal.
pub const SYSTEM_NAME: &str = "System";

lazy_static! {
    static ref SYSTEM_AUTHENTICATION: Authentication = Authentication::new_root(
        SYSTEM_ID,
        SYSTEM_NAME,
        Authority::Admin,
        AuthenticationType::ADMINISTRATOR | AuthenticationType::SYSTEM,
        Uuid::from_u128(0xedce_74b2_58f2_41c1_8b35_3b14_7357_9ddb),
    );
}

/// Role of a logged-in user, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Authority {
    /// Not logged in.
    None,
    /// Read-only account.
    Guest,
    /// Regular account.
    Member,
    /// Administrator account.
    Admin,
}

/// Capability bits of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthenticationType(u8);

impl AuthenticationType {
    /// No capabilities.
    pub const NONE: Self = Self(0);
    /// An ordinary logged-in user.
    pub const USER: Self = Self(1);
    /// May administer users and data bases.
    pub const ADMINISTRATOR: Self = Self(1 << 1);
    /// Internal host principal, above every grantable level.
    pub const SYSTEM: Self = Self(1 << 2);

    /// Whether every bit of `other` is present.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AuthenticationType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<Authority> for AuthenticationType {
    fn from(authority: Authority) -> Self {
        match authority {
            Authority::None => Self::NONE,
            Authority::Guest | Authority::Member => Self::USER,
            Authority::Admin => Self::USER | Self::ADMINISTRATOR,
        }
    }
}

enum Kind {
    Root {
        commission: Mutex<Option<Authentication>>,
        expiry_hooks: Mutex<Vec<(u64, Box<dyn Fn(&str) + Send + Sync>)>>,
        next_hook_id: AtomicU64,
    },
    Commissioned {
        parent: Weak<Inner>,
    },
}

struct Inner {
    user_id: String,
    user_name: String,
    authority: Authority,
    types: AuthenticationType,
    token: Uuid,
    expired: AtomicBool,
    kind: Kind,
}

/// A live session principal. Cheap to clone; all clones share expiry state.
#[derive(Clone)]
pub struct Authentication {
    inner: Arc<Inner>,
}

impl Authentication {
    fn new_root(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        authority: Authority,
        types: AuthenticationType,
        token: Uuid,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                user_id: user_id.into(),
                user_name: user_name.into(),
                authority,
                types,
                token,
                expired: AtomicBool::new(false),
                kind: Kind::Root {
                    commission: Mutex::new(None),
                    expiry_hooks: Mutex::new(Vec::new()),
                    next_hook_id: AtomicU64::new(1),
                },
            }),
        }
    }

    /// Create the principal of a fresh login.
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, authority: Authority) -> Self {
        Self::new_root(
            user_id,
            user_name,
            authority,
            authority.into(),
            Uuid::new_v4(),
        )
    }

    /// The internal system principal. Never expires.
    pub fn system() -> Authentication {
        SYSTEM_AUTHENTICATION.clone()
    }

    /// User id of the session, failing once the principal has expired.
    pub fn id(&self) -> Result<&str> {
        self.verify()?;
        Ok(&self.inner.user_id)
    }

    /// Display name of the session's user, failing once the principal has
    /// expired.
    pub fn name(&self) -> Result<&str> {
        self.verify()?;
        Ok(&self.inner.user_name)
    }

    /// User id without the expiry check. For log fields and lookups only;
    /// permission gates go through [`id`].
    ///
    /// [`id`]: Self::id
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Display name without the expiry check.
    pub fn user_name(&self) -> &str {
        &self.inner.user_name
    }

    /// Role of the session's user.
    pub fn authority(&self) -> Authority {
        self.inner.authority
    }

    /// Capability bits of the session.
    pub fn types(&self) -> AuthenticationType {
        self.inner.types
    }

    /// Opaque token identifying this principal instance.
    pub fn token(&self) -> Uuid {
        self.inner.token
    }

    /// Whether the principal carries the system capability.
    pub fn is_system(&self) -> bool {
        self.inner.types.contains(AuthenticationType::SYSTEM)
    }

    /// Whether the principal carries the administrator capability.
    pub fn is_admin(&self) -> bool {
        self.inner.types.contains(AuthenticationType::ADMINISTRATOR)
    }

    /// Whether the principal has expired.
    pub fn is_expired(&self) -> bool {
        self.inner.expired.load(Ordering::Acquire)
    }

    /// Whether this principal is a commission of another.
    pub fn is_commissioned(&self) -> bool {
        matches!(self.inner.kind, Kind::Commissioned { .. })
    }

    /// Stamp a fresh signature, failing when the principal has expired.
    pub fn sign(&self) -> Result<SignatureDate> {
        self.verify()?;
        Ok(SignatureDate::new(&self.inner.user_id))
    }

    /// Fail when the principal has expired.
    pub fn verify(&self) -> Result<()> {
        if self.is_expired() {
            return Err(IdentityError::Expired.into());
        }
        Ok(())
    }

    /// Fail unless `signature_date` was stamped by this principal's user.
    pub fn verify_signature(&self, signature_date: &SignatureDate) -> Result<()> {
        self.verify()?;
        if signature_date.id != self.inner.user_id {
            return Err(IdentityError::SignatureMismatch(
                signature_date.id.clone(),
                self.inner.user_id.clone(),
            )
            .into());
        }
        Ok(())
    }

    /// Create a one-level commission of this principal.
    ///
    /// At most one commission may be live at a time, and a commission cannot
    /// itself be commissioned.
    pub fn begin_commission(&self) -> Result<Authentication> {
        self.verify()?;
        let Kind::Root { commission, .. } = &self.inner.kind else {
            return Err(IdentityError::NestedCommission.into());
        };
        let mut slot = commission.lock();
        if let Some(active) = slot.as_ref() {
            if !active.is_expired() {
                return Err(IdentityError::AlreadyCommissioned.into());
            }
        }
        let child = Authentication {
            inner: Arc::new(Inner {
                user_id: self.inner.user_id.clone(),
                user_name: self.inner.user_name.clone(),
                authority: self.inner.authority,
                types: self.inner.types,
                token: Uuid::new_v4(),
                expired: AtomicBool::new(false),
                kind: Kind::Commissioned {
                    parent: Arc::downgrade(&self.inner),
                },
            }),
        };
        *slot = Some(child.clone());
        Ok(child)
    }

    /// End a commission previously created by [`begin_commission`].
    ///
    /// The commission expires immediately; the principal may commission again
    /// afterwards.
    ///
    /// [`begin_commission`]: Self::begin_commission
    pub fn end_commission(&self, commissioned: &Authentication) -> Result<()> {
        self.verify()?;
        let Kind::Root { commission, .. } = &self.inner.kind else {
            return Err(IdentityError::NestedCommission.into());
        };
        let mut slot = commission.lock();
        match slot.as_ref() {
            Some(active) if active.token() == commissioned.token() => {
                commissioned.inner.expired.store(true, Ordering::Release);
                *slot = None;
                Ok(())
            }
            _ => Err(IdentityError::CommissionMismatch.into()),
        }
    }

    /// Expire the principal.
    ///
    /// A live commission expires with it, and every expiry subscriber fires
    /// exactly once with the user id. Expiring an already-expired principal
    /// is a no-op.
    pub fn expire(&self) {
        if self.inner.expired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Kind::Root {
            commission,
            expiry_hooks,
            ..
        } = &self.inner.kind
        {
            if let Some(child) = commission.lock().take() {
                child.inner.expired.store(true, Ordering::Release);
            }
            // Subscribers run outside the lock; one may unsubscribe others.
            let hooks = std::mem::take(&mut *expiry_hooks.lock());
            for (_, hook) in hooks {
                hook(&self.inner.user_id);
            }
        }
    }

    /// Subscribe to expiry. Returns a handle usable with [`unsubscribe_expired`].
    ///
    /// For a commissioned principal the subscription attaches to its root, so
    /// it fires when the underlying session ends, not when the commission
    /// does.
    ///
    /// [`unsubscribe_expired`]: Self::unsubscribe_expired
    pub fn subscribe_expired<F>(&self, hook: F) -> u64
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let root = self.root();
        let Kind::Root {
            expiry_hooks,
            next_hook_id,
            ..
        } = &root.kind
        else {
            unreachable!("root of a commission chain is always a root principal");
        };
        let id = next_hook_id.fetch_add(1, Ordering::Relaxed);
        if root.expired.load(Ordering::Acquire) {
            hook(&root.user_id);
        } else {
            expiry_hooks.lock().push((id, Box::new(hook)));
        }
        id
    }

    /// Remove an expiry subscription.
    pub fn unsubscribe_expired(&self, id: u64) {
        let root = self.root();
        if let Kind::Root { expiry_hooks, .. } = &root.kind {
            expiry_hooks.lock().retain(|(hook_id, _)| *hook_id != id);
        }
    }

    fn root(&self) -> Arc<Inner> {
        match &self.inner.kind {
            Kind::Root { .. } => Arc::clone(&self.inner),
            // The root outlives its commissions through the collection; a
            // dangling parent means the session is gone, treat self as root.
            Kind::Commissioned { parent } => {
                parent.upgrade().unwrap_or_else(|| Arc::clone(&self.inner))
            }
        }
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("user_id", &self.inner.user_id)
            .field("authority", &self.inner.authority)
            .field("token", &self.inner.token)
            .field("expired", &self.is_expired())
            .field("commissioned", &self.is_commissioned())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn test_sign_stamps_user_id() {
        let auth = Authentication::new("alice", "Alice", Authority::Member);
        let sig = auth.sign().unwrap();
        assert_eq!(sig.id, "alice");
        auth.verify_signature(&sig).unwrap();
    }

    #[test]
    fn test_expired_principal_rejects_everything() {
        let auth = Authentication::new("alice", "Alice", Authority::Member);
        auth.expire();
        assert!(auth.is_expired());
        assert!(matches!(
            auth.sign(),
            Err(CoreError::Identity(IdentityError::Expired))
        ));
        assert!(auth.id().is_err());
        assert!(auth.name().is_err());
        assert!(auth.begin_commission().is_err());
    }

    #[test]
    fn test_commission_is_single_level() {
        let auth = Authentication::new("alice", "Alice", Authority::Member);
        let commission = auth.begin_commission().unwrap();
        assert!(commission.is_commissioned());
        assert_eq!(commission.user_id(), "alice");
        assert_ne!(commission.token(), auth.token());
        assert!(matches!(
            commission.begin_commission(),
            Err(CoreError::Identity(IdentityError::NestedCommission))
        ));
    }

    #[test]
    fn test_second_commission_requires_ending_first() {
        let auth = Authentication::new("alice", "Alice", Authority::Member);
        let first = auth.begin_commission().unwrap();
        assert!(matches!(
            auth.begin_commission(),
            Err(CoreError::Identity(IdentityError::AlreadyCommissioned))
        ));
        auth.end_commission(&first).unwrap();
        assert!(first.is_expired());
        let second = auth.begin_commission().unwrap();
        assert!(!second.is_expired());
    }

    #[test]
    fn test_end_commission_rejects_strangers() {
        let auth = Authentication::new("alice", "Alice", Authority::Member);
        let _own = auth.begin_commission().unwrap();
        let other = Authentication::new("alice", "Alice", Authority::Member);
        let foreign = other.begin_commission().unwrap();
        assert!(matches!(
            auth.end_commission(&foreign),
            Err(CoreError::Identity(IdentityError::CommissionMismatch))
        ));
    }

    #[test]
    fn test_expiring_root_expires_commission() {
        let auth = Authentication::new("alice", "Alice", Authority::Member);
        let commission = auth.begin_commission().unwrap();
        auth.expire();
        assert!(commission.is_expired());
        assert!(commission.sign().is_err());
    }

    #[test]
    fn test_commission_subscription_attaches_to_root() {
        let fired = Arc::new(AtomicBool::new(false));
        let auth = Authentication::new("alice", "Alice", Authority::Member);
        let commission = auth.begin_commission().unwrap();
        let flag = Arc::clone(&fired);
        commission.subscribe_expired(move |user_id| {
            assert_eq!(user_id, "alice");
            flag.store(true, Ordering::SeqCst);
        });
        // Ending the commission is not a session end.
        auth.end_commission(&commission).unwrap();
        assert!(!fired.load(Ordering::SeqCst));
        auth.expire();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let fired = Arc::new(AtomicBool::new(false));
        let auth = Authentication::new("alice", "Alice", Authority::Member);
        let flag = Arc::clone(&fired);
        let id = auth.subscribe_expired(move |_| flag.store(true, Ordering::SeqCst));
        auth.unsubscribe_expired(id);
        auth.expire();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_subscribe_after_expiry_fires_immediately() {
        let auth = Authentication::new("alice", "Alice", Authority::Member);
        auth.expire();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        auth.subscribe_expired(move |_| flag.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_system_principal() {
        let system = Authentication::system();
        assert!(system.is_system());
        assert!(system.is_admin());
        assert_eq!(system.user_id(), SYSTEM_ID);
        assert!(!system.is_expired());
    }

    #[test]
    fn test_authority_to_types() {
        assert!(AuthenticationType::from(Authority::Admin).contains(AuthenticationType::ADMINISTRATOR));
        assert!(AuthenticationType::from(Authority::Member).contains(AuthenticationType::USER));
        assert!(!AuthenticationType::from(Authority::Guest).contains(AuthenticationType::ADMINISTRATOR));
        assert_eq!(AuthenticationType::from(Authority::None), AuthenticationType::NONE);
    }
}
