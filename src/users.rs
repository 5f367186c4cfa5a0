//! User registry and login sessions.
//!
//! [`UserContext`] owns the known-user table and the live-token registry.
//! Passwords are stored as argon2 hashes and verified at login; a user holds
//! at most one live session, and a second login forces the first one out.

use crate::auth::{Authentication, AuthenticationCollection, Authority, SYSTEM_ID, SYSTEM_NAME};
use crate::error::{CoreError, IdentityError, NotFoundError, PermissionError, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use dashmap::DashMap;
use tabularium_model::SignatureDate;
use uuid::Uuid;

/// Public record of a known user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Login id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Role.
    pub authority: Authority,
    /// Whether logins are refused.
    pub is_banned: bool,
    /// Operator comment attached to the ban, empty otherwise.
    pub ban_comment: String,
}

#[derive(Debug)]
struct UserEntry {
    info: UserInfo,
    password_hash: String,
}

/// The user table and its live sessions.
#[derive(Debug, Default)]
pub struct UserContext {
    users: DashMap<String, UserEntry>,
    authentications: AuthenticationCollection,
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Password(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

impl UserContext {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user without a permission gate. Used while seeding the
    /// initial accounts at host open.
    pub fn register(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        password: &str,
        authority: Authority,
    ) -> Result<()> {
        let id = id.into();
        if id == SYSTEM_ID {
            return Err(CoreError::AlreadyExists(id));
        }
        let entry = UserEntry {
            info: UserInfo {
                id: id.clone(),
                name: name.into(),
                authority,
                is_banned: false,
                ban_comment: String::new(),
            },
            password_hash: hash_password(password)?,
        };
        match self.users.entry(id.clone()) {
            dashmap::Entry::Occupied(_) => Err(CoreError::AlreadyExists(id)),
            dashmap::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Add a user. Administrators only.
    pub fn add_user(
        &self,
        authentication: &Authentication,
        id: impl Into<String>,
        name: impl Into<String>,
        password: &str,
        authority: Authority,
    ) -> Result<()> {
        self.validate_admin(authentication)?;
        let id = id.into();
        self.register(&id, name, password, authority)?;
        tracing::info!(user_id = %id, by = %authentication.user_id(), "user added");
        Ok(())
    }

    /// Remove a user, expiring any live session. Administrators only.
    pub fn remove_user(&self, authentication: &Authentication, id: &str) -> Result<()> {
        self.validate_admin(authentication)?;
        let (id, _) = self
            .users
            .remove(id)
            .ok_or_else(|| NotFoundError::User(id.to_string()))?;
        if let Some(live) = self.authentications.find_by_user(&id) {
            self.authentications.remove(live.token());
        }
        tracing::info!(user_id = %id, by = %authentication.user_id(), "user removed");
        Ok(())
    }

    /// Ban a user, expiring any live session. Administrators only.
    pub fn ban(&self, authentication: &Authentication, id: &str, comment: &str) -> Result<()> {
        self.validate_admin(authentication)?;
        {
            let mut entry = self
                .users
                .get_mut(id)
                .ok_or_else(|| NotFoundError::User(id.to_string()))?;
            entry.info.is_banned = true;
            entry.info.ban_comment = comment.to_string();
        }
        if let Some(live) = self.authentications.find_by_user(id) {
            self.authentications.remove(live.token());
        }
        tracing::warn!(user_id = %id, by = %authentication.user_id(), comment, "user banned");
        Ok(())
    }

    /// Lift a ban. Administrators only.
    pub fn unban(&self, authentication: &Authentication, id: &str) -> Result<()> {
        self.validate_admin(authentication)?;
        let mut entry = self
            .users
            .get_mut(id)
            .ok_or_else(|| NotFoundError::User(id.to_string()))?;
        entry.info.is_banned = false;
        entry.info.ban_comment.clear();
        Ok(())
    }

    /// Change a password. Allowed for the user themselves or an
    /// administrator.
    pub fn change_password(
        &self,
        authentication: &Authentication,
        id: &str,
        new_password: &str,
    ) -> Result<()> {
        authentication.verify()?;
        if authentication.user_id() != id && !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        let hash = hash_password(new_password)?;
        let mut entry = self
            .users
            .get_mut(id)
            .ok_or_else(|| NotFoundError::User(id.to_string()))?;
        entry.password_hash = hash;
        Ok(())
    }

    /// Log a user in, returning the session principal.
    ///
    /// Unknown ids, wrong passwords and banned users all reject with the
    /// same error. A previous live session of the same user is forced out.
    pub fn login(&self, id: &str, password: &str) -> Result<Authentication> {
        let (name, authority) = {
            let entry = self
                .users
                .get(id)
                .ok_or_else(|| CoreError::LoginRejected(id.to_string()))?;
            if entry.info.is_banned || !verify_password(password, &entry.password_hash) {
                return Err(CoreError::LoginRejected(id.to_string()));
            }
            (entry.info.name.clone(), entry.info.authority)
        };
        if let Some(previous) = self.authentications.find_by_user(id) {
            tracing::warn!(user_id = %id, "forcing previous session out");
            self.authentications.remove(previous.token());
        }
        let authentication = Authentication::new(id, name, authority);
        self.authentications.insert(authentication.clone());
        tracing::info!(user_id = %id, token = %authentication.token(), "logged in");
        Ok(authentication)
    }

    /// End a session, expiring its principal.
    pub fn logout(&self, authentication: &Authentication) -> Result<()> {
        authentication.verify()?;
        self.authentications
            .remove(authentication.token())
            .ok_or(IdentityError::Expired)?;
        tracing::info!(user_id = %authentication.user_id(), "logged out");
        Ok(())
    }

    /// Resolve a replicated signature to a live principal.
    ///
    /// The system id resolves to the system principal; any other id must
    /// have a live session.
    pub fn authenticate(&self, signature_date: &SignatureDate) -> Result<Authentication> {
        if signature_date.id == SYSTEM_ID {
            return Ok(Authentication::system());
        }
        self.authentications
            .find_by_user(&signature_date.id)
            .ok_or_else(|| NotFoundError::User(signature_date.id.clone()).into())
    }

    /// Resolve a login token.
    pub fn authentication_by_token(&self, token: Uuid) -> Result<Authentication> {
        self.authentications.get(token)
    }

    /// Expire every live session. Used on host close.
    pub fn expire_all(&self) {
        self.authentications.expire_all();
    }

    /// Public record of a user.
    pub fn user_info(&self, id: &str) -> Option<UserInfo> {
        if id == SYSTEM_ID {
            return Some(UserInfo {
                id: SYSTEM_ID.to_string(),
                name: SYSTEM_NAME.to_string(),
                authority: Authority::Admin,
                is_banned: false,
                ban_comment: String::new(),
            });
        }
        self.users.get(id).map(|entry| entry.info.clone())
    }

    /// Records of every known user.
    pub fn users(&self) -> Vec<UserInfo> {
        self.users.iter().map(|entry| entry.info.clone()).collect()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.authentications.len()
    }

    fn validate_admin(&self, authentication: &Authentication) -> Result<()> {
        authentication.verify()?;
        if !authentication.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_admin() -> (UserContext, Authentication) {
        let context = UserContext::new();
        context
            .register("admin", "Admin", "secret", Authority::Admin)
            .unwrap();
        let admin = context.login("admin", "secret").unwrap();
        (context, admin)
    }

    #[test]
    fn test_login_round_trip() {
        let (context, admin) = context_with_admin();
        assert_eq!(admin.user_id(), "admin");
        assert!(admin.is_admin());
        let resolved = context.authentication_by_token(admin.token()).unwrap();
        assert_eq!(resolved.token(), admin.token());
        context.logout(&admin).unwrap();
        assert!(admin.is_expired());
        assert!(context.authentication_by_token(admin.token()).is_err());
    }

    #[test]
    fn test_wrong_password_and_unknown_user_reject_alike() {
        let (context, _admin) = context_with_admin();
        assert!(matches!(
            context.login("admin", "wrong"),
            Err(CoreError::LoginRejected(_))
        ));
        assert!(matches!(
            context.login("ghost", "secret"),
            Err(CoreError::LoginRejected(_))
        ));
    }

    #[test]
    fn test_second_login_forces_first_out() {
        let (context, _admin) = context_with_admin();
        context
            .register("alice", "Alice", "pw", Authority::Member)
            .unwrap();
        let first = context.login("alice", "pw").unwrap();
        let second = context.login("alice", "pw").unwrap();
        assert!(first.is_expired());
        assert!(!second.is_expired());
        assert_ne!(first.token(), second.token());
    }

    #[test]
    fn test_banned_user_cannot_login() {
        let (context, admin) = context_with_admin();
        context
            .register("alice", "Alice", "pw", Authority::Member)
            .unwrap();
        let session = context.login("alice", "pw").unwrap();
        context.ban(&admin, "alice", "abuse").unwrap();
        assert!(session.is_expired());
        assert!(context.login("alice", "pw").is_err());
        context.unban(&admin, "alice").unwrap();
        context.login("alice", "pw").unwrap();
    }

    #[test]
    fn test_admin_gate_on_user_management() {
        let (context, _admin) = context_with_admin();
        context
            .register("alice", "Alice", "pw", Authority::Member)
            .unwrap();
        let alice = context.login("alice", "pw").unwrap();
        assert!(matches!(
            context.add_user(&alice, "bob", "Bob", "pw", Authority::Member),
            Err(CoreError::Permission(PermissionError::Denied))
        ));
        assert!(context.remove_user(&alice, "admin").is_err());
    }

    #[test]
    fn test_duplicate_and_reserved_ids_rejected() {
        let (context, admin) = context_with_admin();
        assert!(matches!(
            context.add_user(&admin, "admin", "Admin", "pw", Authority::Admin),
            Err(CoreError::AlreadyExists(_))
        ));
        assert!(context
            .add_user(&admin, SYSTEM_ID, "Sys", "pw", Authority::Admin)
            .is_err());
    }

    #[test]
    fn test_authenticate_resolves_signatures() {
        let (context, admin) = context_with_admin();
        let signature = admin.sign().unwrap();
        let resolved = context.authenticate(&signature).unwrap();
        assert_eq!(resolved.user_id(), "admin");

        let system = context
            .authenticate(&SignatureDate::new(SYSTEM_ID))
            .unwrap();
        assert!(system.is_system());

        assert!(matches!(
            context.authenticate(&SignatureDate::new("ghost")),
            Err(CoreError::NotFound(NotFoundError::User(_)))
        ));
    }

    #[test]
    fn test_change_password_self_or_admin() {
        let (context, admin) = context_with_admin();
        context
            .register("alice", "Alice", "pw", Authority::Member)
            .unwrap();
        let alice = context.login("alice", "pw").unwrap();
        context.change_password(&alice, "alice", "pw2").unwrap();
        assert!(matches!(
            context.change_password(&alice, "admin", "oops"),
            Err(CoreError::Permission(PermissionError::Denied))
        ));
        context.change_password(&admin, "alice", "pw3").unwrap();
        context.login("alice", "pw3").unwrap();
    }

    #[test]
    fn test_remove_user_expires_session() {
        let (context, admin) = context_with_admin();
        context
            .register("alice", "Alice", "pw", Authority::Member)
            .unwrap();
        let alice = context.login("alice", "pw").unwrap();
        context.remove_user(&admin, "alice").unwrap();
        assert!(alice.is_expired());
        assert!(context.user_info("alice").is_none());
    }
}
