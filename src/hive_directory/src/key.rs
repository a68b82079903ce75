use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

use crate::{ColumnType, DirError, DirResult};

/// A value usable as a primary index key, resource id or secondary index key.
///
/// The concrete type is fixed per dimension (and per call for resource and secondary
/// keys) and checked against the metadata column type once, before any SQL runs.
pub trait DirectoryKey:
    ToSql + FromSql + Clone + PartialEq + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn accepts(column_type: ColumnType) -> bool;
}

macro_rules! integral_key {
    ($($t:ty),*) => {
        $(
            impl DirectoryKey for $t {
                fn accepts(column_type: ColumnType) -> bool {
                    column_type.is_integral()
                }
            }
        )*
    };
}

integral_key!(i8, i16, i32, i64);

impl DirectoryKey for f64 {
    fn accepts(column_type: ColumnType) -> bool {
        matches!(column_type, ColumnType::Float | ColumnType::Double)
    }
}

impl DirectoryKey for String {
    fn accepts(column_type: ColumnType) -> bool {
        column_type.is_textual()
    }
}

/// A key whose type is only known from metadata at runtime, e.g. the resource ids
/// visited by a cascade delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyKey {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Display for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyKey::Integer(v) => write!(f, "{}", v),
            AnyKey::Real(v) => write!(f, "{}", v),
            AnyKey::Text(v) => write!(f, "{}", v),
        }
    }
}

impl ToSql for AnyKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            AnyKey::Integer(v) => ToSqlOutput::from(*v),
            AnyKey::Real(v) => ToSqlOutput::from(*v),
            AnyKey::Text(v) => ToSqlOutput::from(v.as_str()),
        })
    }
}

impl FromSql for AnyKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(v) => Ok(AnyKey::Integer(v)),
            ValueRef::Real(v) => Ok(AnyKey::Real(v)),
            ValueRef::Text(_) => value.as_str().map(|s| AnyKey::Text(s.to_string())),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl DirectoryKey for AnyKey {
    fn accepts(_column_type: ColumnType) -> bool {
        true
    }
}

pub fn check_key_type<T: DirectoryKey>(column_type: ColumnType, what: &str) -> DirResult<()> {
    if T::accepts(column_type) {
        return Ok(());
    }
    Err(DirError::InvalidParam(format!(
        "key type {} cannot be stored in {} column of {}",
        std::any::type_name::<T>(),
        column_type.sql_type(),
        what
    )))
}

/// Converts a key into an owned SQL value so heterogeneous keys can be batched.
pub fn to_sql_value<T: ToSql + ?Sized>(value: &T) -> DirResult<Value> {
    let output = value
        .to_sql()
        .map_err(|e| DirError::InvalidParam(format!("convert key to sql failed: {}", e)))?;
    match output {
        ToSqlOutput::Borrowed(value_ref) => Ok(value_ref.into()),
        ToSqlOutput::Owned(value) => Ok(value),
        _ => Err(DirError::Unsupported(
            "key converts to an unsupported sql value".to_string(),
        )),
    }
}
