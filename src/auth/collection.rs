//! Token-indexed registry of live principals.

use super::Authentication;
use crate::error::{IdentityError, Result};
use dashmap::DashMap;
use uuid::Uuid;

/// Live principals keyed by token.
///
/// The host owns one of these per opened repository. Looking a token up
/// re-checks expiry, so a stale token held by a remote caller can never
/// resurrect a session.
#[derive(Debug, Default)]
pub struct AuthenticationCollection {
    by_token: DashMap<Uuid, Authentication>,
}

impl AuthenticationCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a principal under its token.
    pub fn insert(&self, authentication: Authentication) {
        self.by_token
            .insert(authentication.token(), authentication);
    }

    /// Resolve a token to its live principal.
    pub fn get(&self, token: Uuid) -> Result<Authentication> {
        // Clone out of the shard guard before removing, so the removal
        // below never waits on our own read lock.
        match self.by_token.get(&token).map(|entry| entry.clone()) {
            Some(entry) if !entry.is_expired() => Ok(entry),
            Some(_) => {
                drop(self.by_token.remove(&token));
                Err(IdentityError::Expired.into())
            }
            None => Err(IdentityError::Expired.into()),
        }
    }

    /// The live principal of `user_id`, if any.
    pub fn find_by_user(&self, user_id: &str) -> Option<Authentication> {
        self.by_token
            .iter()
            .find(|entry| entry.user_id() == user_id && !entry.is_expired())
            .map(|entry| entry.clone())
    }

    /// Drop a token, expiring its principal.
    pub fn remove(&self, token: Uuid) -> Option<Authentication> {
        let (_, authentication) = self.by_token.remove(&token)?;
        authentication.expire();
        Some(authentication)
    }

    /// Expire and drop every principal. Used on host close.
    pub fn expire_all(&self) {
        let tokens: Vec<Uuid> = self.by_token.iter().map(|e| *e.key()).collect();
        for token in tokens {
            if let Some((_, authentication)) = self.by_token.remove(&token) {
                authentication.expire();
            }
        }
    }

    /// Number of registered principals.
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    /// Whether no principal is registered.
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}
