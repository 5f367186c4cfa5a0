//! Typed row payloads.
//!
//! Row mutations cross the host boundary as [`DomainRowInfo`] entries whose
//! cells are [`DomainFieldInfo`] pairs of `(type name, canonical string)`.
//! The supported base types are a closed set; there is no reflection. The
//! *unset* value and the *database null* are distinct: the former encodes as
//! two absent fields, the latter as the `DBNull` type name with no value.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from decoding a [`DomainFieldInfo`] back into a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The type name is not in the supported base set.
    #[error("unsupported field type: {0}")]
    UnsupportedType(String),
    /// A typed field arrived without a value.
    #[error("missing value for field type: {0}")]
    MissingValue(String),
    /// The value string does not parse as the named type.
    #[error("invalid {type_name} value: {value}")]
    InvalidValue {
        /// The declared type name.
        type_name: String,
        /// The offending value string.
        value: String,
    },
}

/// A typed cell value. The closed set of supported base types.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Unset (no value was supplied).
    Null,
    /// The database null value, distinct from unset.
    DbNull,
    /// `boolean`
    Boolean(bool),
    /// `string`
    String(String),
    /// `sbyte`
    SByte(i8),
    /// `byte`
    Byte(u8),
    /// `int16`
    Int16(i16),
    /// `uint16`
    UInt16(u16),
    /// `int32`
    Int32(i32),
    /// `uint32`
    UInt32(u32),
    /// `int64`
    Int64(i64),
    /// `uint64`
    UInt64(u64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// `dateTime`
    DateTime(DateTime<Utc>),
    /// `duration`, millisecond precision
    Duration(Duration),
    /// `guid`
    Guid(Uuid),
}

impl FieldValue {
    /// The wire type name, or `None` for the unset value.
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            Self::Null => None,
            Self::DbNull => Some("DBNull"),
            Self::Boolean(_) => Some("boolean"),
            Self::String(_) => Some("string"),
            Self::SByte(_) => Some("sbyte"),
            Self::Byte(_) => Some("byte"),
            Self::Int16(_) => Some("int16"),
            Self::UInt16(_) => Some("uint16"),
            Self::Int32(_) => Some("int32"),
            Self::UInt32(_) => Some("uint32"),
            Self::Int64(_) => Some("int64"),
            Self::UInt64(_) => Some("uint64"),
            Self::Float(_) => Some("float"),
            Self::Double(_) => Some("double"),
            Self::DateTime(_) => Some("dateTime"),
            Self::Duration(_) => Some("duration"),
            Self::Guid(_) => Some("guid"),
        }
    }

    /// The canonical string encoding, or `None` for unset and database null.
    ///
    /// Numeric encodings use Rust's shortest-round-trip formatting, so every
    /// `float`/`double` value (including negative zero) survives the trip.
    pub fn encode(&self) -> Option<String> {
        match self {
            Self::Null | Self::DbNull => None,
            Self::Boolean(v) => Some(v.to_string()),
            Self::String(v) => Some(v.clone()),
            Self::SByte(v) => Some(v.to_string()),
            Self::Byte(v) => Some(v.to_string()),
            Self::Int16(v) => Some(v.to_string()),
            Self::UInt16(v) => Some(v.to_string()),
            Self::Int32(v) => Some(v.to_string()),
            Self::UInt32(v) => Some(v.to_string()),
            Self::Int64(v) => Some(v.to_string()),
            Self::UInt64(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Double(v) => Some(v.to_string()),
            Self::DateTime(v) => Some(v.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            Self::Duration(v) => Some(v.num_milliseconds().to_string()),
            Self::Guid(v) => Some(v.to_string()),
        }
    }
}

/// The `(type name, canonical string)` encoding of one cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFieldInfo {
    /// Declared base type, `None` for the unset value.
    pub type_name: Option<String>,
    /// Canonical string encoding, `None` for unset and database null.
    pub value: Option<String>,
}

impl DomainFieldInfo {
    /// Encode a value.
    pub fn from_value(value: &FieldValue) -> Self {
        Self {
            type_name: value.type_name().map(str::to_string),
            value: value.encode(),
        }
    }

    /// Decode back into a typed value.
    pub fn to_value(&self) -> Result<FieldValue, FieldError> {
        let type_name = match &self.type_name {
            None => return Ok(FieldValue::Null),
            Some(name) => name.as_str(),
        };
        if type_name == "DBNull" {
            return Ok(FieldValue::DbNull);
        }
        let raw = self
            .value
            .as_deref()
            .ok_or_else(|| FieldError::MissingValue(type_name.to_string()))?;
        let invalid = || FieldError::InvalidValue {
            type_name: type_name.to_string(),
            value: raw.to_string(),
        };
        match type_name {
            "boolean" => raw.parse().map(FieldValue::Boolean).map_err(|_| invalid()),
            "string" => Ok(FieldValue::String(raw.to_string())),
            "sbyte" => raw.parse().map(FieldValue::SByte).map_err(|_| invalid()),
            "byte" => raw.parse().map(FieldValue::Byte).map_err(|_| invalid()),
            "int16" => raw.parse().map(FieldValue::Int16).map_err(|_| invalid()),
            "uint16" => raw.parse().map(FieldValue::UInt16).map_err(|_| invalid()),
            "int32" => raw.parse().map(FieldValue::Int32).map_err(|_| invalid()),
            "uint32" => raw.parse().map(FieldValue::UInt32).map_err(|_| invalid()),
            "int64" => raw.parse().map(FieldValue::Int64).map_err(|_| invalid()),
            "uint64" => raw.parse().map(FieldValue::UInt64).map_err(|_| invalid()),
            "float" => raw.parse().map(FieldValue::Float).map_err(|_| invalid()),
            "double" => raw.parse().map(FieldValue::Double).map_err(|_| invalid()),
            "dateTime" => DateTime::parse_from_rfc3339(raw)
                .map(|dt| FieldValue::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| invalid()),
            "duration" => raw
                .parse::<i64>()
                .map(|ms| FieldValue::Duration(Duration::milliseconds(ms)))
                .map_err(|_| invalid()),
            "guid" => raw.parse().map(FieldValue::Guid).map_err(|_| invalid()),
            other => Err(FieldError::UnsupportedType(other.to_string())),
        }
    }
}

/// One row in a mutation payload: the target table, the cell values, and the
/// key cells that identify the row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRowInfo {
    /// Table the row belongs to.
    pub table_name: String,
    /// Cell values in column order.
    pub fields: Vec<DomainFieldInfo>,
    /// Key cells identifying the row.
    pub keys: Vec<DomainFieldInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: FieldValue) {
        let info = DomainFieldInfo::from_value(&value);
        assert_eq!(info.to_value().unwrap(), value);
    }

    #[test]
    fn test_round_trip_all_base_types() {
        round_trip(FieldValue::Boolean(true));
        round_trip(FieldValue::String("héllo\tworld".to_string()));
        round_trip(FieldValue::SByte(-5));
        round_trip(FieldValue::Byte(200));
        round_trip(FieldValue::Int16(-30000));
        round_trip(FieldValue::UInt16(60000));
        round_trip(FieldValue::Int32(i32::MIN));
        round_trip(FieldValue::UInt32(u32::MAX));
        round_trip(FieldValue::Int64(i64::MIN));
        round_trip(FieldValue::UInt64(u64::MAX));
        round_trip(FieldValue::Float(3.129_54));
        round_trip(FieldValue::Double(f64::MIN_POSITIVE));
        round_trip(FieldValue::DateTime(Utc::now()));
        round_trip(FieldValue::Duration(Duration::milliseconds(86_400_123)));
        round_trip(FieldValue::Guid(Uuid::new_v4()));
    }

    #[test]
    fn test_null_and_dbnull_are_distinct() {
        let null = DomainFieldInfo::from_value(&FieldValue::Null);
        assert_eq!(null.type_name, None);
        assert_eq!(null.value, None);
        assert_eq!(null.to_value().unwrap(), FieldValue::Null);

        let db_null = DomainFieldInfo::from_value(&FieldValue::DbNull);
        assert_eq!(db_null.type_name.as_deref(), Some("DBNull"));
        assert_eq!(db_null.value, None);
        assert_eq!(db_null.to_value().unwrap(), FieldValue::DbNull);

        assert_ne!(null, db_null);
    }

    #[test]
    fn test_unsupported_type_rejected() {
        let info = DomainFieldInfo {
            type_name: Some("decimal".to_string()),
            value: Some("1.0".to_string()),
        };
        assert_eq!(
            info.to_value(),
            Err(FieldError::UnsupportedType("decimal".to_string()))
        );
    }

    #[test]
    fn test_typed_field_without_value_rejected() {
        let info = DomainFieldInfo {
            type_name: Some("int32".to_string()),
            value: None,
        };
        assert_eq!(
            info.to_value(),
            Err(FieldError::MissingValue("int32".to_string()))
        );
    }

    #[test]
    fn test_garbage_value_rejected() {
        let info = DomainFieldInfo {
            type_name: Some("int32".to_string()),
            value: Some("forty-two".to_string()),
        };
        assert!(matches!(
            info.to_value(),
            Err(FieldError::InvalidValue { .. })
        ));
    }
}
