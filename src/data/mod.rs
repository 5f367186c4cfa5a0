//! Data bases and their category trees.
//!
//! A data base is the unit users enter and leave; it carries its own access
//! and lock settings and a category tree for tables and types. Categories
//! without settings of their own inherit from the nearest ancestor that has
//! them, and every mutation re-derives that inheritance so a private or
//! locked parent immediately shades its subtree. Table data itself lives in
//! domain sources; this tree only names and guards the items.

use crate::access::AccessHolder;
use crate::auth::Authentication;
use crate::error::{CoreError, NotFoundError, PermissionError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use tabularium_model::{AccessInfo, AccessType, LockInfo, SignatureDate};
use uuid::Uuid;

/// What a category item names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataItemKind {
    /// A table.
    Table,
    /// A type.
    Type,
}

/// One node of the category tree.
#[derive(Debug)]
pub struct Category {
    holder: AccessHolder,
    items: BTreeMap<String, DataItemKind>,
}

impl Category {
    fn new(path: impl Into<String>) -> Self {
        Self {
            holder: AccessHolder::new(path),
            items: BTreeMap::new(),
        }
    }

    /// Access and lock settings of this category.
    pub fn holder(&self) -> &AccessHolder {
        &self.holder
    }

    /// Item names and kinds in this category.
    pub fn items(&self) -> &BTreeMap<String, DataItemKind> {
        &self.items
    }
}

#[derive(Debug)]
struct DataBaseInner {
    name: String,
    holder: AccessHolder,
    categories: BTreeMap<String, Category>,
    entered: HashSet<Uuid>,
    modification_info: SignatureDate,
}

/// A named data base: entry gate, access settings, category tree.
#[derive(Debug)]
pub struct DataBase {
    id: Uuid,
    creation_info: SignatureDate,
    inner: RwLock<DataBaseInner>,
}

const ROOT_PATH: &str = "/";
const TABLES_PATH: &str = "/tables/";
const TYPES_PATH: &str = "/types/";

fn validate_category_path(path: &str) -> Result<()> {
    if path.len() > 1 && path.starts_with('/') && path.ends_with('/') {
        Ok(())
    } else {
        Err(NotFoundError::Category(path.to_string()).into())
    }
}

fn parent_path(path: &str) -> &str {
    let trimmed = &path[..path.len() - 1];
    match trimmed.rfind('/') {
        Some(0) | None => ROOT_PATH,
        Some(at) => &path[..=at],
    }
}

impl DataBase {
    pub(crate) fn new(name: impl Into<String>, creation_info: SignatureDate) -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(TABLES_PATH.to_string(), Category::new(TABLES_PATH));
        categories.insert(TYPES_PATH.to_string(), Category::new(TYPES_PATH));
        Self {
            id: Uuid::new_v4(),
            inner: RwLock::new(DataBaseInner {
                name: name.into(),
                holder: AccessHolder::new(ROOT_PATH),
                categories,
                entered: HashSet::new(),
                modification_info: creation_info.clone(),
            }),
            creation_info,
        }
    }

    /// Stable id, used to key domains and log directories.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current name.
    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    /// Who created the data base and when.
    pub fn creation_info(&self) -> &SignatureDate {
        &self.creation_info
    }

    /// Last mutation.
    pub fn modification_info(&self) -> SignatureDate {
        self.inner.read().modification_info.clone()
    }

    /// The caller's effective access level on the data base itself.
    pub fn access_type(&self, auth: &Authentication) -> AccessType {
        self.inner.read().holder.get_access_type(auth)
    }

    /// Copies of the root access and lock settings.
    pub fn settings(&self) -> (AccessInfo, LockInfo) {
        let inner = self.inner.read();
        (
            inner.holder.access_info().clone(),
            inner.holder.lock_info().clone(),
        )
    }

    /// Enter the data base. Gate for every later operation in it.
    pub fn enter(&self, auth: &Authentication) -> Result<()> {
        auth.verify()?;
        let mut inner = self.inner.write();
        inner.holder.validate_access_type(auth, AccessType::Guest)?;
        if !inner.entered.insert(auth.token()) {
            return Err(CoreError::AlreadyExists(auth.user_id().to_string()));
        }
        tracing::debug!(data_base = %inner.name, user_id = %auth.user_id(), "entered");
        Ok(())
    }

    /// Leave the data base.
    pub fn leave(&self, auth: &Authentication) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.entered.remove(&auth.token()) {
            return Err(NotFoundError::User(auth.user_id().to_string()).into());
        }
        Ok(())
    }

    /// Whether the session has entered.
    pub fn is_entered(&self, auth: &Authentication) -> bool {
        self.inner.read().entered.contains(&auth.token())
    }

    /// Drop every entered session. Used at host close.
    pub(crate) fn clear_entered(&self) {
        self.inner.write().entered.clear();
    }

    /// Number of entered sessions.
    pub fn entered_count(&self) -> usize {
        self.inner.read().entered.len()
    }

    // ------------------------------------------------------------------
    // Access and lock settings, addressed by path ("/" is the data base)
    // ------------------------------------------------------------------

    /// Make the item at `path` private, the caller becoming its owner.
    pub fn set_private(&self, auth: &Authentication, path: &str) -> Result<()> {
        self.require_entered(auth)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        inner.holder_at(path)?.validate_set_private(auth)?;
        inner.holder_at(path)?.set_private(signature.clone());
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Make the item at `path` public again.
    pub fn set_public(&self, auth: &Authentication, path: &str) -> Result<()> {
        self.require_entered(auth)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        inner.holder_at(path)?.validate_set_public(auth)?;
        inner.holder_at(path)?.set_public();
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Grant `member_id` the `access_type` level on the item at `path`.
    pub fn add_access_member(
        &self,
        auth: &Authentication,
        path: &str,
        member_id: &str,
        access_type: AccessType,
    ) -> Result<()> {
        self.require_entered(auth)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        inner
            .holder_at(path)?
            .validate_add_access_member(auth, member_id, access_type)?;
        inner
            .holder_at(path)?
            .add_access_member(signature.clone(), member_id, access_type);
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Change an existing member's level on the item at `path`.
    pub fn set_access_member(
        &self,
        auth: &Authentication,
        path: &str,
        member_id: &str,
        access_type: AccessType,
    ) -> Result<()> {
        self.require_entered(auth)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        inner
            .holder_at(path)?
            .validate_set_access_member(auth, member_id, access_type)?;
        inner
            .holder_at(path)?
            .set_access_member(signature.clone(), member_id, access_type);
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Revoke a member's grant on the item at `path`.
    pub fn remove_access_member(
        &self,
        auth: &Authentication,
        path: &str,
        member_id: &str,
    ) -> Result<()> {
        self.require_entered(auth)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        inner
            .holder_at(path)?
            .validate_remove_access_member(auth, member_id)?;
        inner
            .holder_at(path)?
            .remove_access_member(signature.clone(), member_id);
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Lock the item at `path`, shutting everyone else out.
    pub fn lock(&self, auth: &Authentication, path: &str, comment: &str) -> Result<()> {
        self.require_entered(auth)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        inner.holder_at(path)?.validate_lock(auth)?;
        inner.holder_at(path)?.lock(signature.clone(), comment);
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Release the lock on the item at `path`.
    pub fn unlock(&self, auth: &Authentication, path: &str) -> Result<()> {
        self.require_entered(auth)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        inner.holder_at(path)?.validate_unlock(auth)?;
        inner.holder_at(path)?.unlock();
        inner.finish_mutation(signature);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Category tree
    // ------------------------------------------------------------------

    /// Create a category. Its parent must exist and be accessible.
    pub fn add_category(&self, auth: &Authentication, path: &str) -> Result<()> {
        self.require_entered(auth)?;
        validate_category_path(path)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        if inner.categories.contains_key(path) {
            return Err(CoreError::AlreadyExists(path.to_string()));
        }
        inner
            .effective_holder(parent_path(path))?
            .validate_access_type(auth, AccessType::Editor)?;
        inner
            .categories
            .insert(path.to_string(), Category::new(path));
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Delete a category and its subtree. Every descendant is validated
    /// before anything is removed.
    pub fn remove_category(&self, auth: &Authentication, path: &str) -> Result<()> {
        self.require_entered(auth)?;
        validate_category_path(path)?;
        if path == TABLES_PATH || path == TYPES_PATH {
            return Err(PermissionError::Denied.into());
        }
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        if !inner.categories.contains_key(path) {
            return Err(NotFoundError::Category(path.to_string()).into());
        }
        let subtree: Vec<String> = inner
            .categories
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in &subtree {
            inner.categories[p].holder.validate_delete(auth)?;
        }
        for p in &subtree {
            inner.categories.remove(p);
        }
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Rename a category, carrying its subtree and settings along.
    pub fn rename_category(&self, auth: &Authentication, path: &str, new_path: &str) -> Result<()> {
        self.require_entered(auth)?;
        validate_category_path(path)?;
        validate_category_path(new_path)?;
        if path == TABLES_PATH || path == TYPES_PATH {
            return Err(PermissionError::Denied.into());
        }
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        if !inner.categories.contains_key(path) {
            return Err(NotFoundError::Category(path.to_string()).into());
        }
        if inner.categories.contains_key(new_path) {
            return Err(CoreError::AlreadyExists(new_path.to_string()));
        }
        let subtree: Vec<String> = inner
            .categories
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in &subtree {
            inner.categories[p].holder.validate_rename(auth)?;
        }
        for p in subtree {
            if let Some(mut category) = inner.categories.remove(&p) {
                let moved = format!("{new_path}{}", &p[path.len()..]);
                category.holder.rename(moved.clone());
                inner.categories.insert(moved, category);
            }
        }
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Register an item (table or type name) in a category.
    pub fn add_item(
        &self,
        auth: &Authentication,
        category_path: &str,
        name: &str,
        kind: DataItemKind,
    ) -> Result<()> {
        self.require_entered(auth)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        inner
            .effective_holder(category_path)?
            .validate_access_type(auth, AccessType::Editor)?;
        let category = inner
            .categories
            .get_mut(category_path)
            .ok_or_else(|| NotFoundError::Category(category_path.to_string()))?;
        if category.items.contains_key(name) {
            return Err(CoreError::AlreadyExists(name.to_string()));
        }
        category.items.insert(name.to_string(), kind);
        inner.finish_mutation(signature);
        Ok(())
    }

    /// Drop an item from a category.
    pub fn remove_item(&self, auth: &Authentication, category_path: &str, name: &str) -> Result<()> {
        self.require_entered(auth)?;
        let signature = auth.sign()?;
        let mut inner = self.inner.write();
        inner
            .effective_holder(category_path)?
            .validate_access_type(auth, AccessType::Editor)?;
        let category = inner
            .categories
            .get_mut(category_path)
            .ok_or_else(|| NotFoundError::Category(category_path.to_string()))?;
        if category.items.remove(name).is_none() {
            return Err(NotFoundError::Item(name.to_string()).into());
        }
        inner.finish_mutation(signature);
        Ok(())
    }

    /// The caller's effective level at a category path.
    pub fn category_access_type(&self, auth: &Authentication, path: &str) -> Result<AccessType> {
        let inner = self.inner.read();
        let category = inner
            .categories
            .get(path)
            .ok_or_else(|| NotFoundError::Category(path.to_string()))?;
        Ok(category.holder.get_access_type(auth))
    }

    /// Paths of every category, parents before children.
    pub fn category_paths(&self) -> Vec<String> {
        self.inner.read().categories.keys().cloned().collect()
    }

    /// Items of one category.
    pub fn items(&self, category_path: &str) -> Result<Vec<(String, DataItemKind)>> {
        let inner = self.inner.read();
        let category = inner
            .categories
            .get(category_path)
            .ok_or_else(|| NotFoundError::Category(category_path.to_string()))?;
        Ok(category
            .items
            .iter()
            .map(|(name, kind)| (name.clone(), *kind))
            .collect())
    }

    fn require_entered(&self, auth: &Authentication) -> Result<()> {
        auth.verify()?;
        if auth.is_system() || self.is_entered(auth) {
            Ok(())
        } else {
            Err(PermissionError::Denied.into())
        }
    }
}

impl DataBaseInner {
    fn holder_at(&mut self, path: &str) -> Result<&mut AccessHolder> {
        if path == ROOT_PATH {
            return Ok(&mut self.holder);
        }
        self.categories
            .get_mut(path)
            .map(|c| &mut c.holder)
            .ok_or_else(|| NotFoundError::Category(path.to_string()).into())
    }

    fn effective_holder(&self, path: &str) -> Result<&AccessHolder> {
        if path == ROOT_PATH {
            return Ok(&self.holder);
        }
        self.categories
            .get(path)
            .map(|c| &c.holder)
            .ok_or_else(|| NotFoundError::Category(path.to_string()).into())
    }

    /// Stamp the mutation and re-derive inherited settings top-down.
    fn finish_mutation(&mut self, signature: SignatureDate) {
        self.modification_info = signature;
        let paths: Vec<String> = self.categories.keys().cloned().collect();
        // BTreeMap order puts parents before children, so a freshly derived
        // parent is visible when its children are derived.
        for path in paths {
            let (parent_access, parent_lock) = {
                let parent = self.nearest_settings_above(&path);
                match parent {
                    Some(holder) => (
                        holder.has_own_access().then(|| holder.access_info().clone()),
                        holder.has_own_lock().then(|| holder.lock_info().clone()),
                    ),
                    None => (None, None),
                }
            };
            let category = match self.categories.get_mut(&path) {
                Some(category) => category,
                None => continue,
            };
            if !category.holder.has_own_access() {
                match parent_access {
                    Some(access) => category.holder.set_inherited_access(&access),
                    None => category.holder.clear_inherited_access(),
                }
            }
            if !category.holder.has_own_lock() {
                match parent_lock {
                    Some(lock) => category.holder.set_inherited_lock(&lock),
                    None => category.holder.clear_inherited_lock(),
                }
            }
        }
    }

    /// The nearest ancestor of `path` carrying settings of its own.
    fn nearest_settings_above(&self, path: &str) -> Option<&AccessHolder> {
        let mut current = parent_path(path);
        loop {
            if current == ROOT_PATH {
                let root = &self.holder;
                return (root.has_own_access() || root.has_own_lock()).then_some(root);
            }
            if let Some(category) = self.categories.get(current) {
                if category.holder.has_own_access() || category.holder.has_own_lock() {
                    return Some(&category.holder);
                }
            }
            current = parent_path(current);
        }
    }
}

/// Registry of data bases.
#[derive(Debug, Default)]
pub struct DataBaseContext {
    data_bases: DashMap<String, std::sync::Arc<DataBase>>,
}

impl DataBaseContext {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a data base. Administrators only.
    pub fn create(
        &self,
        auth: &Authentication,
        name: impl Into<String>,
    ) -> Result<std::sync::Arc<DataBase>> {
        auth.verify()?;
        if !auth.is_admin() {
            return Err(PermissionError::Denied.into());
        }
        let name = name.into();
        let data_base = std::sync::Arc::new(DataBase::new(&name, auth.sign()?));
        match self.data_bases.entry(name.clone()) {
            dashmap::Entry::Occupied(_) => Err(CoreError::AlreadyExists(name)),
            dashmap::Entry::Vacant(slot) => {
                slot.insert(std::sync::Arc::clone(&data_base));
                tracing::info!(data_base = %name, id = %data_base.id(), "data base created");
                Ok(data_base)
            }
        }
    }

    /// Delete a data base. Nobody may still be inside.
    pub fn delete(&self, auth: &Authentication, name: &str) -> Result<()> {
        auth.verify()?;
        let data_base = self.get(name)?;
        {
            let inner = data_base.inner.read();
            inner.holder.validate_delete(auth)?;
            if !inner.entered.is_empty() {
                return Err(crate::error::StateError::HostBusy.into());
            }
        }
        self.data_bases.remove(name);
        tracing::info!(data_base = %name, "data base deleted");
        Ok(())
    }

    /// Look a data base up by name.
    pub fn get(&self, name: &str) -> Result<std::sync::Arc<DataBase>> {
        self.data_bases
            .get(name)
            .map(|entry| std::sync::Arc::clone(entry.value()))
            .ok_or_else(|| NotFoundError::DataBase(name.to_string()).into())
    }

    /// Names of every data base.
    pub fn names(&self) -> Vec<String> {
        self.data_bases
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Every data base.
    pub fn data_bases(&self) -> Vec<std::sync::Arc<DataBase>> {
        self.data_bases
            .iter()
            .map(|entry| std::sync::Arc::clone(entry.value()))
            .collect()
    }

    /// Drop all entered sessions everywhere. Used at host close.
    pub(crate) fn clear_entered(&self) {
        for entry in self.data_bases.iter() {
            entry.value().clear_entered();
        }
    }
}
