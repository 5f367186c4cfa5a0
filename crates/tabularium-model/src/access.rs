//! Access and lock metadata for permission-bearing items.
//!
//! An item is *public* when its [`AccessInfo`] carries no owner, and
//! *private* once an owner claims it and grants per-member access levels.
//! Both access and lock settings are inheritable: a category that carries no
//! explicit setting takes the effective value of its nearest configured
//! ancestor, which is recorded here through `parent_path`.

use crate::signature::SignatureDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission level for an item, totally ordered.
///
/// A check for level `x` passes whenever the effective level is at least `x`,
/// so permissions are monotonic in this ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AccessType {
    /// No access at all (locked out).
    #[default]
    None,
    /// Read-only access.
    Guest,
    /// May edit content.
    Dev,
    /// May edit content and structure.
    Editor,
    /// Full access to the item itself.
    Owner,
    /// Owner plus permission management over other members.
    Master,
    /// Internal/privileged access; never grantable to a member.
    System,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Guest => "Guest",
            Self::Dev => "Dev",
            Self::Editor => "Editor",
            Self::Owner => "Owner",
            Self::Master => "Master",
            Self::System => "System",
        };
        f.write_str(name)
    }
}

/// One explicit access grant inside a private item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMemberInfo {
    /// Member the grant applies to.
    pub user_id: String,
    /// Granted level.
    pub access_type: AccessType,
    /// Who granted it and when.
    pub signature_date: SignatureDate,
}

/// Access settings of an item: owner, member grants, and inheritance origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessInfo {
    /// Path of the item these settings were configured on.
    pub path: String,
    /// Path of the ancestor the settings are inherited from; empty when the
    /// settings belong to the item itself.
    pub parent_path: String,
    /// Owner of the item. Empty means the item is public.
    pub user_id: String,
    /// When the item was made private.
    pub signature_date: SignatureDate,
    /// Explicit member grants. The owner is implicit and never listed here.
    pub members: Vec<AccessMemberInfo>,
}

impl AccessInfo {
    /// Whether the item is public (no owner).
    pub fn is_public(&self) -> bool {
        self.user_id.is_empty()
    }

    /// Whether the item is private (has an owner).
    pub fn is_private(&self) -> bool {
        !self.user_id.is_empty()
    }

    /// Whether the settings came from an ancestor rather than the item itself.
    pub fn is_inherited(&self) -> bool {
        !self.parent_path.is_empty()
    }

    /// Whether `user_id` is the owner of these settings.
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.is_private() && self.user_id == user_id
    }

    /// Whether `user_id` has an explicit grant.
    pub fn contains(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    /// Effective level of `user_id` under these settings: `Owner` for the
    /// owner, the explicit grant for members, `None` otherwise.
    pub fn get_access_type(&self, user_id: &str) -> AccessType {
        if self.is_owner(user_id) {
            return AccessType::Owner;
        }
        self.members
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.access_type)
            .unwrap_or(AccessType::None)
    }

    /// Clear the owner and all grants, making the item public.
    pub fn set_public(&mut self) {
        self.user_id.clear();
        self.signature_date = SignatureDate::default();
        self.members.clear();
    }

    /// Claim the item for the signer, making it private.
    pub fn set_private(&mut self, path: impl Into<String>, signature_date: SignatureDate) {
        self.path = path.into();
        self.parent_path.clear();
        self.user_id = signature_date.id.clone();
        self.signature_date = signature_date;
    }

    /// Add a grant for a member not yet listed.
    pub fn add(&mut self, signature_date: SignatureDate, user_id: &str, access_type: AccessType) {
        self.members.push(AccessMemberInfo {
            user_id: user_id.to_string(),
            access_type,
            signature_date,
        });
    }

    /// Replace the grant of an already-listed member.
    pub fn set(&mut self, signature_date: SignatureDate, user_id: &str, access_type: AccessType) {
        if let Some(member) = self.members.iter_mut().find(|m| m.user_id == user_id) {
            member.access_type = access_type;
            member.signature_date = signature_date;
        }
    }

    /// Remove a member's grant.
    pub fn remove(&mut self, _signature_date: SignatureDate, user_id: &str) {
        self.members.retain(|m| m.user_id != user_id);
    }
}

/// Lock settings of an item.
///
/// A locked item rejects every mutation from sessions other than the locker,
/// and the locker itself is elevated to `System` on that item while the lock
/// holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Path of the item the lock was placed on.
    pub path: String,
    /// Path of the ancestor the lock is inherited from; empty when the lock
    /// belongs to the item itself.
    pub parent_path: String,
    /// Who locked the item and when. An empty signature means unlocked.
    pub signature_date: SignatureDate,
    /// Operator-supplied reason for the lock.
    pub comment: String,
}

impl LockInfo {
    /// The locking user, or empty when unlocked.
    pub fn user_id(&self) -> &str {
        &self.signature_date.id
    }

    /// Whether the item is locked.
    pub fn is_locked(&self) -> bool {
        !self.signature_date.id.is_empty()
    }

    /// Whether the lock came from an ancestor.
    pub fn is_inherited(&self) -> bool {
        !self.parent_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_type_ordering_is_total() {
        use AccessType::*;
        let ordered = [None, Guest, Dev, Editor, Owner, Master, System];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_owner_is_implicit_member() {
        let mut info = AccessInfo::default();
        assert!(info.is_public());
        info.set_private("/tables/a", SignatureDate::new("alice"));
        assert!(info.is_private());
        assert_eq!(info.get_access_type("alice"), AccessType::Owner);
        assert_eq!(info.get_access_type("bob"), AccessType::None);
        assert!(!info.contains("alice"));
    }

    #[test]
    fn test_member_grants() {
        let mut info = AccessInfo::default();
        info.set_private("/tables/a", SignatureDate::new("alice"));
        info.add(SignatureDate::new("alice"), "bob", AccessType::Editor);
        assert_eq!(info.get_access_type("bob"), AccessType::Editor);
        info.set(SignatureDate::new("alice"), "bob", AccessType::Master);
        assert_eq!(info.get_access_type("bob"), AccessType::Master);
        info.remove(SignatureDate::new("alice"), "bob");
        assert_eq!(info.get_access_type("bob"), AccessType::None);
    }

    #[test]
    fn test_set_public_clears_grants() {
        let mut info = AccessInfo::default();
        info.set_private("/tables/a", SignatureDate::new("alice"));
        info.add(SignatureDate::new("alice"), "bob", AccessType::Guest);
        info.set_public();
        assert!(info.is_public());
        assert!(info.members.is_empty());
        assert_eq!(info.get_access_type("alice"), AccessType::None);
    }

    #[test]
    fn test_lock_info_states() {
        let mut lock = LockInfo::default();
        assert!(!lock.is_locked());
        lock.signature_date = SignatureDate::new("carol");
        lock.comment = "migration".to_string();
        assert!(lock.is_locked());
        assert_eq!(lock.user_id(), "carol");
    }
}
