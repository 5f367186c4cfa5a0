//! Permission and lock enforcement for a single item.
//!
//! [`AccessHolder`] carries the effective access and lock settings of one
//! permission-bearing item (a data base, a category, a table or a type).
//! Inherited settings are materialized into the holder by the tree layer
//! with `parent_path` pointing at the configuring ancestor, so every check
//! here works on local state.
//!
//! Every mutation has a `validate_*` gate that runs before anything changes
//! and an `apply` counterpart that assumes validation passed. The gates
//! reject with [`PermissionError`] variants rather than a single opaque
//! denial so callers can log the precise rule that fired.

use crate::auth::Authentication;
use crate::error::{PermissionError, Result};
use tabularium_model::{AccessInfo, AccessType, LockInfo, SignatureDate};

/// Access and lock state of one item.
#[derive(Debug, Clone, Default)]
pub struct AccessHolder {
    path: String,
    access: AccessInfo,
    lock: LockInfo,
}

impl AccessHolder {
    /// Create the holder for a public, unlocked item.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            access: AccessInfo::default(),
            lock: LockInfo::default(),
        }
    }

    /// Rebuild a holder from persisted settings.
    pub fn with_settings(path: impl Into<String>, access: AccessInfo, lock: LockInfo) -> Self {
        Self {
            path: path.into(),
            access,
            lock,
        }
    }

    /// Path of the item.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Effective access settings.
    pub fn access_info(&self) -> &AccessInfo {
        &self.access
    }

    /// Effective lock settings.
    pub fn lock_info(&self) -> &LockInfo {
        &self.lock
    }

    /// Whether the item has no owner.
    pub fn is_public(&self) -> bool {
        self.access.is_public()
    }

    /// Whether the item has an owner.
    pub fn is_private(&self) -> bool {
        self.access.is_private()
    }

    /// Whether the item is locked.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Whether the access settings belong to this item rather than an
    /// ancestor.
    pub fn has_own_access(&self) -> bool {
        self.access.is_private() && !self.access.is_inherited()
    }

    /// Whether the lock belongs to this item rather than an ancestor.
    pub fn has_own_lock(&self) -> bool {
        self.lock.is_locked() && !self.lock.is_inherited()
    }

    // ------------------------------------------------------------------
    // Effective level
    // ------------------------------------------------------------------

    /// Effective level of `authentication` on this item.
    ///
    /// A system principal is always `System`; an unauthenticated one is a
    /// `Guest`. A lock shuts everyone out except the locker, who is elevated
    /// to `System` while the lock holds. A public item grants `Owner` to any
    /// logged-in user; a private one grants the explicit membership level.
    pub fn get_access_type(&self, authentication: &Authentication) -> AccessType {
        if authentication.is_system() {
            return AccessType::System;
        }
        if authentication.types() == crate::auth::AuthenticationType::NONE {
            return AccessType::Guest;
        }
        if self.lock.is_locked() {
            return if self.lock.user_id() == authentication.user_id() {
                AccessType::System
            } else {
                AccessType::None
            };
        }
        if self.access.is_public() {
            return AccessType::Owner;
        }
        self.access.get_access_type(authentication.user_id())
    }

    /// Whether the effective level reaches `access_type`.
    pub fn verify_access_type(
        &self,
        authentication: &Authentication,
        access_type: AccessType,
    ) -> bool {
        self.get_access_type(authentication) >= access_type
    }

    /// Fail unless the effective level reaches `access_type`.
    pub fn validate_access_type(
        &self,
        authentication: &Authentication,
        access_type: AccessType,
    ) -> Result<()> {
        authentication.verify()?;
        if !self.verify_access_type(authentication, access_type) {
            return Err(PermissionError::Denied.into());
        }
        Ok(())
    }

    /// Fail when the item is locked by someone other than the caller.
    pub fn validate_invoke(&self, authentication: &Authentication) -> Result<()> {
        authentication.verify()?;
        if self.lock.is_locked() && self.lock.user_id() != authentication.user_id() {
            return Err(PermissionError::Denied.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation gates
    // ------------------------------------------------------------------

    /// Gate for making the item public again.
    pub fn validate_set_public(&self, authentication: &Authentication) -> Result<()> {
        self.validate_invoke(authentication)?;
        if !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        if !self.access.is_private() || self.access.is_inherited() {
            return Err(PermissionError::AlreadyPublic.into());
        }
        self.validate_access_type(authentication, AccessType::Owner)
    }

    /// Gate for claiming the item as private.
    pub fn validate_set_private(&self, authentication: &Authentication) -> Result<()> {
        self.validate_invoke(authentication)?;
        if !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        if self.access.is_private() && !self.access.is_inherited() {
            return Err(PermissionError::AlreadyPrivate.into());
        }
        self.validate_access_type(authentication, AccessType::Owner)
    }

    /// Gate for granting a new member a level.
    pub fn validate_add_access_member(
        &self,
        authentication: &Authentication,
        member_id: &str,
        access_type: AccessType,
    ) -> Result<()> {
        self.validate_invoke(authentication)?;
        if !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        if !self.access.is_private() {
            return Err(PermissionError::PublicItem.into());
        }
        if self.access.is_inherited() {
            return Err(PermissionError::Inherited.into());
        }
        self.validate_access_type(authentication, AccessType::Master)?;
        if access_type == AccessType::Owner {
            return Err(PermissionError::OwnerNotGrantable.into());
        }
        if access_type == AccessType::System {
            return Err(PermissionError::SystemNotGrantable.into());
        }
        if self.access.contains(member_id) {
            return Err(PermissionError::AlreadyMember(member_id.to_string()).into());
        }
        Ok(())
    }

    /// Gate for changing an existing member's level.
    ///
    /// `Owner` is never a grant; it only arises from the private claim
    /// itself. Below `System` nobody may touch a member at or above their
    /// own level.
    pub fn validate_set_access_member(
        &self,
        authentication: &Authentication,
        member_id: &str,
        access_type: AccessType,
    ) -> Result<()> {
        self.validate_invoke(authentication)?;
        if !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        if !self.access.is_private() {
            return Err(PermissionError::PublicItem.into());
        }
        if self.access.is_inherited() {
            return Err(PermissionError::Inherited.into());
        }
        self.validate_access_type(authentication, AccessType::Master)?;
        let current = self.access.get_access_type(member_id);
        if current == access_type {
            return Err(PermissionError::AlreadySet(member_id.to_string()).into());
        }
        if access_type == AccessType::Owner {
            return Err(PermissionError::OwnerNotGrantable.into());
        }
        if access_type == AccessType::System {
            return Err(PermissionError::SystemNotGrantable.into());
        }
        if self.access.is_owner(member_id) {
            return Err(PermissionError::OwnerImmutable.into());
        }
        if !self.verify_access_type(authentication, AccessType::System)
            && current >= self.access.get_access_type(authentication.user_id())
        {
            return Err(PermissionError::PeerLevel.into());
        }
        if !self.access.contains(member_id) {
            return Err(PermissionError::NotMember(member_id.to_string()).into());
        }
        Ok(())
    }

    /// Gate for revoking a member's grant.
    pub fn validate_remove_access_member(
        &self,
        authentication: &Authentication,
        member_id: &str,
    ) -> Result<()> {
        self.validate_invoke(authentication)?;
        if !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        if !self.access.is_private() {
            return Err(PermissionError::PublicItem.into());
        }
        if self.access.is_inherited() {
            return Err(PermissionError::Inherited.into());
        }
        self.validate_access_type(authentication, AccessType::Master)?;
        if self.access.is_owner(member_id) {
            return Err(PermissionError::OwnerImmutable.into());
        }
        let current = self.access.get_access_type(member_id);
        if current >= self.get_access_type(authentication) {
            return Err(PermissionError::PeerLevel.into());
        }
        if !self.access.contains(member_id) {
            return Err(PermissionError::NotMember(member_id.to_string()).into());
        }
        Ok(())
    }

    /// Gate for locking the item.
    pub fn validate_lock(&self, authentication: &Authentication) -> Result<()> {
        authentication.verify()?;
        if !authentication.is_system() && !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        if self.lock.is_locked() && !self.lock.is_inherited() {
            return Err(PermissionError::AlreadyLocked.into());
        }
        if !authentication.is_admin()
            && !self.verify_access_type(authentication, AccessType::Editor)
        {
            return Err(PermissionError::Denied.into());
        }
        Ok(())
    }

    /// Gate for releasing the lock.
    pub fn validate_unlock(&self, authentication: &Authentication) -> Result<()> {
        authentication.verify()?;
        if !authentication.is_system() && !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        if !self.lock.is_locked() || self.lock.is_inherited() {
            return Err(PermissionError::NotLocked.into());
        }
        if !authentication.is_system() && self.lock.user_id() != authentication.user_id() {
            return Err(PermissionError::Denied.into());
        }
        Ok(())
    }

    /// Gate for renaming the item.
    pub fn validate_rename(&self, authentication: &Authentication) -> Result<()> {
        self.validate_invoke(authentication)?;
        self.validate_access_type(authentication, AccessType::Master)
    }

    /// Gate for deleting the item.
    pub fn validate_delete(&self, authentication: &Authentication) -> Result<()> {
        self.validate_invoke(authentication)?;
        if !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        self.validate_access_type(authentication, AccessType::Master)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Clear the owner and grants. Assumes [`validate_set_public`] passed.
    ///
    /// [`validate_set_public`]: Self::validate_set_public
    pub fn set_public(&mut self) {
        self.access.set_public();
        self.access.path.clear();
        self.access.parent_path.clear();
    }

    /// Claim the item for the signer. Assumes [`validate_set_private`]
    /// passed.
    ///
    /// [`validate_set_private`]: Self::validate_set_private
    pub fn set_private(&mut self, signature_date: SignatureDate) {
        let path = self.path.clone();
        self.access.set_private(path, signature_date);
    }

    /// Record a new member grant.
    pub fn add_access_member(
        &mut self,
        signature_date: SignatureDate,
        member_id: &str,
        access_type: AccessType,
    ) {
        self.access.add(signature_date, member_id, access_type);
    }

    /// Replace a member's grant.
    pub fn set_access_member(
        &mut self,
        signature_date: SignatureDate,
        member_id: &str,
        access_type: AccessType,
    ) {
        self.access.set(signature_date, member_id, access_type);
    }

    /// Drop a member's grant.
    pub fn remove_access_member(&mut self, signature_date: SignatureDate, member_id: &str) {
        self.access.remove(signature_date, member_id);
    }

    /// Place the lock. Assumes [`validate_lock`] passed.
    ///
    /// [`validate_lock`]: Self::validate_lock
    pub fn lock(&mut self, signature_date: SignatureDate, comment: impl Into<String>) {
        self.lock = LockInfo {
            path: self.path.clone(),
            parent_path: String::new(),
            signature_date,
            comment: comment.into(),
        };
    }

    /// Release the lock. Assumes [`validate_unlock`] passed.
    ///
    /// [`validate_unlock`]: Self::validate_unlock
    pub fn unlock(&mut self) {
        self.lock = LockInfo::default();
    }

    /// Track a rename of the underlying item.
    pub fn rename(&mut self, path: impl Into<String>) {
        self.path = path.into();
        if self.has_own_access() {
            self.access.path = self.path.clone();
        }
        if self.has_own_lock() {
            self.lock.path = self.path.clone();
        }
    }

    // ------------------------------------------------------------------
    // Inheritance plumbing (driven by the tree layer)
    // ------------------------------------------------------------------

    /// Materialize an ancestor's access settings onto this item.
    ///
    /// No-op when the item carries its own settings.
    pub fn set_inherited_access(&mut self, parent: &AccessInfo) {
        if self.has_own_access() {
            return;
        }
        self.access = parent.clone();
        self.access.parent_path = parent.path.clone();
        self.access.path = self.path.clone();
    }

    /// Drop inherited access settings, leaving own settings untouched.
    pub fn clear_inherited_access(&mut self) {
        if self.access.is_inherited() {
            self.access = AccessInfo::default();
        }
    }

    /// Materialize an ancestor's lock onto this item.
    ///
    /// No-op when the item carries its own lock.
    pub fn set_inherited_lock(&mut self, parent: &LockInfo) {
        if self.has_own_lock() {
            return;
        }
        self.lock = parent.clone();
        self.lock.parent_path = parent.path.clone();
        self.lock.path = self.path.clone();
    }

    /// Drop an inherited lock, leaving an own lock untouched.
    pub fn clear_inherited_lock(&mut self) {
        if self.lock.is_inherited() {
            self.lock = LockInfo::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authority;
    use crate::error::CoreError;

    fn admin() -> Authentication {
        Authentication::new("admin", "Admin", Authority::Admin)
    }

    fn member(id: &str) -> Authentication {
        Authentication::new(id, id, Authority::Member)
    }

    fn private_holder(owner: &Authentication) -> AccessHolder {
        let mut holder = AccessHolder::new("/tables/a");
        holder.validate_set_private(owner).unwrap();
        holder.set_private(owner.sign().unwrap());
        holder
    }

    #[test]
    fn test_public_item_grants_owner_to_any_user() {
        let holder = AccessHolder::new("/tables/a");
        assert_eq!(holder.get_access_type(&member("bob")), AccessType::Owner);
        assert_eq!(
            holder.get_access_type(&Authentication::system()),
            AccessType::System
        );
    }

    #[test]
    fn test_private_item_uses_membership() {
        let admin = admin();
        let system = Authentication::system();
        let mut holder = private_holder(&admin);
        let bob = member("bob");
        assert_eq!(holder.get_access_type(&bob), AccessType::None);
        assert_eq!(holder.get_access_type(&admin), AccessType::Owner);
        holder
            .validate_add_access_member(&system, "bob", AccessType::Dev)
            .unwrap();
        holder.add_access_member(system.sign().unwrap(), "bob", AccessType::Dev);
        assert_eq!(holder.get_access_type(&bob), AccessType::Dev);
        assert!(holder.verify_access_type(&bob, AccessType::Guest));
        assert!(!holder.verify_access_type(&bob, AccessType::Editor));
    }

    #[test]
    fn test_lock_elevates_owner_to_manage_members() {
        let admin = admin();
        let mut holder = private_holder(&admin);
        // The implicit owner sits below Master and cannot manage grants.
        assert!(matches!(
            holder.validate_add_access_member(&admin, "bob", AccessType::Dev),
            Err(CoreError::Permission(PermissionError::Denied))
        ));
        holder.validate_lock(&admin).unwrap();
        holder.lock(admin.sign().unwrap(), "granting");
        holder
            .validate_add_access_member(&admin, "bob", AccessType::Dev)
            .unwrap();
        holder.add_access_member(admin.sign().unwrap(), "bob", AccessType::Dev);
        holder.validate_unlock(&admin).unwrap();
        holder.unlock();
        assert_eq!(holder.get_access_type(&member("bob")), AccessType::Dev);
    }

    #[test]
    fn test_lock_shuts_out_everyone_but_locker() {
        let admin = admin();
        let mut holder = AccessHolder::new("/tables/a");
        holder.validate_lock(&admin).unwrap();
        holder.lock(admin.sign().unwrap(), "migration");
        assert_eq!(holder.get_access_type(&member("bob")), AccessType::None);
        assert_eq!(holder.get_access_type(&admin), AccessType::System);
        assert!(holder.validate_invoke(&member("bob")).is_err());
        holder.validate_invoke(&admin).unwrap();
    }

    #[test]
    fn test_set_private_requires_admin() {
        let holder = AccessHolder::new("/tables/a");
        assert!(matches!(
            holder.validate_set_private(&member("bob")),
            Err(CoreError::Permission(PermissionError::Denied))
        ));
    }

    #[test]
    fn test_set_private_twice_rejected() {
        let admin = admin();
        let holder = private_holder(&admin);
        assert!(matches!(
            holder.validate_set_private(&admin),
            Err(CoreError::Permission(PermissionError::AlreadyPrivate))
        ));
    }

    #[test]
    fn test_owner_and_system_levels_not_grantable() {
        let system = Authentication::system();
        let holder = private_holder(&admin());
        assert!(matches!(
            holder.validate_add_access_member(&system, "bob", AccessType::Owner),
            Err(CoreError::Permission(PermissionError::OwnerNotGrantable))
        ));
        assert!(matches!(
            holder.validate_add_access_member(&system, "bob", AccessType::System),
            Err(CoreError::Permission(PermissionError::SystemNotGrantable))
        ));
        assert!(matches!(
            holder.validate_set_access_member(&system, "bob", AccessType::Owner),
            Err(CoreError::Permission(PermissionError::OwnerNotGrantable))
        ));
    }

    #[test]
    fn test_owner_grant_is_immutable() {
        let owner = admin();
        let system = Authentication::system();
        let holder = private_holder(&owner);
        assert!(matches!(
            holder.validate_set_access_member(&system, "admin", AccessType::Guest),
            Err(CoreError::Permission(PermissionError::OwnerImmutable))
        ));
        assert!(matches!(
            holder.validate_remove_access_member(&system, "admin"),
            Err(CoreError::Permission(PermissionError::OwnerImmutable))
        ));
    }

    #[test]
    fn test_peer_level_member_cannot_be_demoted() {
        let system = Authentication::system();
        let mut holder = private_holder(&admin());
        let peer = Authentication::new("peer", "Peer", Authority::Admin);
        holder.add_access_member(system.sign().unwrap(), "peer", AccessType::Master);
        holder.add_access_member(system.sign().unwrap(), "rival", AccessType::Master);
        // A Master cannot demote another Master; System can.
        assert!(matches!(
            holder.validate_set_access_member(&peer, "rival", AccessType::Guest),
            Err(CoreError::Permission(PermissionError::PeerLevel))
        ));
        holder
            .validate_set_access_member(&system, "rival", AccessType::Guest)
            .unwrap();
        // A Master managing below their own level is fine.
        holder.set_access_member(system.sign().unwrap(), "rival", AccessType::Guest);
        holder
            .validate_set_access_member(&peer, "rival", AccessType::Dev)
            .unwrap();
    }

    #[test]
    fn test_inherited_settings_are_immutable_here() {
        let admin = admin();
        let mut parent = private_holder(&admin);
        parent.add_access_member(admin.sign().unwrap(), "bob", AccessType::Dev);
        let mut child = AccessHolder::new("/tables/a/items");
        child.set_inherited_access(parent.access_info());
        assert!(child.is_private());
        assert_eq!(child.get_access_type(&member("bob")), AccessType::Dev);
        assert!(matches!(
            child.validate_add_access_member(&admin, "carol", AccessType::Guest),
            Err(CoreError::Permission(PermissionError::Inherited))
        ));
        assert!(matches!(
            child.validate_set_public(&admin),
            Err(CoreError::Permission(PermissionError::AlreadyPublic))
        ));
        // An inherited setting may be shadowed by a private claim.
        child.validate_set_private(&admin).unwrap();
    }

    #[test]
    fn test_unlock_only_by_locker_or_system() {
        let locker = admin();
        let other = Authentication::new("other", "Other", Authority::Admin);
        let mut holder = AccessHolder::new("/tables/a");
        holder.lock(locker.sign().unwrap(), "hold");
        assert!(matches!(
            holder.validate_unlock(&other),
            Err(CoreError::Permission(PermissionError::Denied))
        ));
        holder.validate_unlock(&locker).unwrap();
        holder.validate_unlock(&Authentication::system()).unwrap();
    }

    #[test]
    fn test_rename_moves_own_settings() {
        let admin = admin();
        let mut holder = private_holder(&admin);
        holder.lock(admin.sign().unwrap(), "hold");
        holder.rename("/tables/b");
        assert_eq!(holder.access_info().path, "/tables/b");
        assert_eq!(holder.lock_info().path, "/tables/b");
    }
}
