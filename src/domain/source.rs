//! In-memory materialized data edited by a domain.
//!
//! Each domain kind edits a different shape of data through the same closed
//! surface: rows keyed by their key fields, plus named source-level
//! properties. The kind-specific types only differ in what they accept;
//! storage and keying are shared.

use crate::error::{CoreError, NotFoundError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabularium_model::{DomainFieldInfo, DomainItemKind, DomainRowInfo, FieldValue};

/// Serializable state of a source, written as the domain's snapshot file
/// and used to hydrate mirrors and restored domains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    /// All rows in key order.
    pub rows: Vec<DomainRowInfo>,
    /// Source-level properties.
    pub properties: BTreeMap<String, DomainFieldInfo>,
}

/// The mutation surface a domain drives its data through.
pub trait DomainSource: Send {
    /// Which kind of data this source materializes.
    fn kind(&self) -> DomainItemKind;

    /// Insert rows; their keys must be free.
    fn new_row(&mut self, rows: &[DomainRowInfo]) -> Result<()>;

    /// Replace rows identified by their keys.
    fn set_row(&mut self, rows: &[DomainRowInfo]) -> Result<()>;

    /// Remove rows identified by their keys.
    fn remove_row(&mut self, rows: &[DomainRowInfo]) -> Result<()>;

    /// Set a source-level property.
    fn set_property(&mut self, name: &str, value: &DomainFieldInfo) -> Result<()>;

    /// Serializable copy of the current state.
    fn snapshot(&self) -> SourceSnapshot;
}

/// Build the empty source for a domain kind.
pub fn source_for(kind: DomainItemKind) -> Box<dyn DomainSource> {
    match kind {
        DomainItemKind::TableContent => Box::new(TableContentSource::default()),
        DomainItemKind::TableTemplate => Box::new(TableTemplateSource::default()),
        DomainItemKind::TypeTemplate => Box::new(TypeTemplateSource::default()),
    }
}

/// Rebuild a source of `kind` from a snapshot.
pub fn source_from_snapshot(
    kind: DomainItemKind,
    snapshot: &SourceSnapshot,
) -> Result<Box<dyn DomainSource>> {
    let mut source = source_for(kind);
    if !snapshot.rows.is_empty() {
        source.new_row(&snapshot.rows)?;
    }
    for (name, value) in &snapshot.properties {
        source.set_property(name, value)?;
    }
    Ok(source)
}

fn row_key(row: &DomainRowInfo) -> Result<String> {
    let key = serde_json::to_string(&row.keys)?;
    Ok(format!("{}\u{1f}{key}", row.table_name))
}

/// Shared keyed-row storage behind the kind-specific sources.
#[derive(Debug, Default)]
struct RowStore {
    rows: BTreeMap<String, DomainRowInfo>,
    properties: BTreeMap<String, DomainFieldInfo>,
}

impl RowStore {
    fn insert(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        for row in rows {
            let key = row_key(row)?;
            if self.rows.contains_key(&key) {
                return Err(CoreError::AlreadyExists(key));
            }
        }
        for row in rows {
            self.rows.insert(row_key(row)?, row.clone());
        }
        Ok(())
    }

    fn replace(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        for row in rows {
            let key = row_key(row)?;
            if !self.rows.contains_key(&key) {
                return Err(NotFoundError::Item(key).into());
            }
        }
        for row in rows {
            self.rows.insert(row_key(row)?, row.clone());
        }
        Ok(())
    }

    fn remove(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        for row in rows {
            let key = row_key(row)?;
            if !self.rows.contains_key(&key) {
                return Err(NotFoundError::Item(key).into());
            }
        }
        for row in rows {
            self.rows.remove(&row_key(row)?);
        }
        Ok(())
    }

    fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            rows: self.rows.values().cloned().collect(),
            properties: self.properties.clone(),
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Row-level edits to a table's content. Accepts any row shape; the schema
/// is owned by the table template, not the content session.
#[derive(Debug, Default)]
pub struct TableContentSource {
    store: RowStore,
}

impl TableContentSource {
    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.store.len()
    }
}

impl DomainSource for TableContentSource {
    fn kind(&self) -> DomainItemKind {
        DomainItemKind::TableContent
    }

    fn new_row(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        for row in rows {
            if row.keys.is_empty() {
                return Err(tabularium_model::FieldError::MissingValue("keys".into()).into());
            }
        }
        self.store.insert(rows)
    }

    fn set_row(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        self.store.replace(rows)
    }

    fn remove_row(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        self.store.remove(rows)
    }

    fn set_property(&mut self, name: &str, value: &DomainFieldInfo) -> Result<()> {
        self.store
            .properties
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn snapshot(&self) -> SourceSnapshot {
        self.store.snapshot()
    }
}

/// Structural edits to a table template: each row describes one column and
/// is keyed by the column name.
#[derive(Debug, Default)]
pub struct TableTemplateSource {
    store: RowStore,
}

fn single_string_key(row: &DomainRowInfo, what: &str) -> Result<()> {
    match row.keys.as_slice() {
        [key] => match key.to_value()? {
            FieldValue::String(_) => Ok(()),
            other => Err(tabularium_model::FieldError::InvalidValue {
                type_name: other.type_name().unwrap_or("null").to_string(),
                value: format!("{what} key must be a string"),
            }
            .into()),
        },
        _ => Err(tabularium_model::FieldError::MissingValue(format!("{what} name key")).into()),
    }
}

impl DomainSource for TableTemplateSource {
    fn kind(&self) -> DomainItemKind {
        DomainItemKind::TableTemplate
    }

    fn new_row(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        for row in rows {
            single_string_key(row, "column")?;
        }
        self.store.insert(rows)
    }

    fn set_row(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        for row in rows {
            single_string_key(row, "column")?;
        }
        self.store.replace(rows)
    }

    fn remove_row(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        self.store.remove(rows)
    }

    fn set_property(&mut self, name: &str, value: &DomainFieldInfo) -> Result<()> {
        self.store
            .properties
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn snapshot(&self) -> SourceSnapshot {
        self.store.snapshot()
    }
}

/// Edits to a type template: each row is one enumeration member, keyed by
/// the member name, whose value field must be integral.
#[derive(Debug, Default)]
pub struct TypeTemplateSource {
    store: RowStore,
}

fn validate_member_value(row: &DomainRowInfo) -> Result<()> {
    for field in &row.fields {
        let value = field.to_value()?;
        match value {
            FieldValue::Null
            | FieldValue::DbNull
            | FieldValue::String(_)
            | FieldValue::Boolean(_)
            | FieldValue::SByte(_)
            | FieldValue::Byte(_)
            | FieldValue::Int16(_)
            | FieldValue::UInt16(_)
            | FieldValue::Int32(_)
            | FieldValue::UInt32(_)
            | FieldValue::Int64(_)
            | FieldValue::UInt64(_) => {}
            other => {
                return Err(tabularium_model::FieldError::InvalidValue {
                    type_name: other.type_name().unwrap_or("null").to_string(),
                    value: "type members take integral or string fields".to_string(),
                }
                .into())
            }
        }
    }
    Ok(())
}

impl DomainSource for TypeTemplateSource {
    fn kind(&self) -> DomainItemKind {
        DomainItemKind::TypeTemplate
    }

    fn new_row(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        for row in rows {
            single_string_key(row, "member")?;
            validate_member_value(row)?;
        }
        self.store.insert(rows)
    }

    fn set_row(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        for row in rows {
            single_string_key(row, "member")?;
            validate_member_value(row)?;
        }
        self.store.replace(rows)
    }

    fn remove_row(&mut self, rows: &[DomainRowInfo]) -> Result<()> {
        self.store.remove(rows)
    }

    fn set_property(&mut self, name: &str, value: &DomainFieldInfo) -> Result<()> {
        self.store
            .properties
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn snapshot(&self) -> SourceSnapshot {
        self.store.snapshot()
    }
}
