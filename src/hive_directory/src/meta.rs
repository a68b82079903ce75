//! Static sharding topology: the metadata snapshot the directory resolves against.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::{DirError, DirResult, NodeId};

const PRIMARY_TABLE_PREFIX: &str = "hive_primary_";
const RESOURCE_TABLE_PREFIX: &str = "hive_resource_";
const SECONDARY_TABLE_PREFIX: &str = "hive_secondary_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Writable,
    ReadOnly,
}

impl Status {
    pub fn from_read_only(read_only: bool) -> Self {
        if read_only {
            Status::ReadOnly
        } else {
            Status::Writable
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Status::ReadOnly)
    }

    pub fn to_i64(&self) -> i64 {
        match self {
            Status::Writable => 0,
            Status::ReadOnly => 1,
        }
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.to_i64().into())
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_i64()? {
            0 => Ok(Status::Writable),
            1 => Ok(Status::ReadOnly),
            other => Err(FromSqlError::OutOfRange(other)),
        }
    }
}

/// SQL column type of a key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Char,
    Varchar,
    Text,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::TinyInt => "TINYINT",
            ColumnType::SmallInt => "SMALLINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Char => "CHAR(255)",
            ColumnType::Varchar => "VARCHAR(255)",
            ColumnType::Text => "TEXT",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            ColumnType::TinyInt | ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt
        )
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ColumnType::Char
                | ColumnType::Varchar
                | ColumnType::Text
                | ColumnType::Date
                | ColumnType::Timestamp
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_capacity() -> u32 {
    1
}

impl Node {
    pub fn new(id: NodeId, name: &str, uri: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            uri: uri.to_string(),
            status: Status::Writable,
            capacity: default_capacity(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.status.is_read_only()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndex {
    pub id: i64,
    /// Indexed column name.
    pub name: String,
    pub resource_name: String,
    pub column_type: ColumnType,
}

impl SecondaryIndex {
    pub fn new(id: i64, name: &str, resource_name: &str, column_type: ColumnType) -> Self {
        Self {
            id,
            name: name.to_string(),
            resource_name: resource_name.to_string(),
            column_type,
        }
    }

    pub fn table_name(&self) -> String {
        format!(
            "{}{}_{}",
            SECONDARY_TABLE_PREFIX,
            self.resource_name.to_lowercase(),
            self.name.to_lowercase()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub is_partitioning_resource: bool,
    #[serde(default)]
    pub secondary_indexes: Vec<SecondaryIndex>,
}

impl Resource {
    pub fn new(id: i64, name: &str, column_type: ColumnType, is_partitioning_resource: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            column_type,
            is_partitioning_resource,
            secondary_indexes: Vec::new(),
        }
    }

    pub fn with_secondary_index(mut self, id: i64, name: &str, column_type: ColumnType) -> Self {
        let index = SecondaryIndex::new(id, name, &self.name, column_type);
        self.secondary_indexes.push(index);
        self
    }

    /// Only meaningful for non-partitioning resources; the partitioning resource has no table.
    pub fn table_name(&self) -> String {
        format!("{}{}", RESOURCE_TABLE_PREFIX, self.name.to_lowercase())
    }

    pub fn get_secondary_index(&self, name: &str) -> DirResult<&SecondaryIndex> {
        self.secondary_indexes
            .iter()
            .find(|index| index.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                DirError::NotFound(format!(
                    "secondary index {} of resource {}",
                    name, self.name
                ))
            })
    }
}

/// An index the directory can resolve through.
///
/// `ResourceOwner` is the implicit index of a non-partitioning resource: its rows live in
/// the resource table and map a resource id to the owning primary index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRef<'a> {
    Plain {
        index: &'a SecondaryIndex,
        resource: &'a Resource,
    },
    ResourceOwner(&'a Resource),
}

impl<'a> IndexRef<'a> {
    pub fn resource(&self) -> &'a Resource {
        match self {
            IndexRef::Plain { resource, .. } => resource,
            IndexRef::ResourceOwner(resource) => resource,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            IndexRef::Plain { index, .. } => index.column_type,
            IndexRef::ResourceOwner(resource) => resource.column_type,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            IndexRef::Plain { index, resource } => format!("{}.{}", resource.name, index.name),
            IndexRef::ResourceOwner(resource) => format!("{}.id", resource.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDimension {
    pub id: i64,
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub index_uri: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl PartitionDimension {
    pub fn new(id: i64, name: &str, column_type: ColumnType) -> Self {
        Self {
            id,
            name: name.to_string(),
            column_type,
            index_uri: String::new(),
            resources: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn primary_table_name(&self) -> String {
        format!("{}{}", PRIMARY_TABLE_PREFIX, self.name.to_lowercase())
    }

    pub fn get_resource(&self, name: &str) -> DirResult<&Resource> {
        self.resources
            .iter()
            .find(|resource| resource.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                DirError::NotFound(format!("resource {} of dimension {}", name, self.name))
            })
    }

    /// Finds the owning resource of `index`, returning it as a resolvable index.
    pub fn index_ref<'a>(&'a self, index: &'a SecondaryIndex) -> DirResult<IndexRef<'a>> {
        let resource = self.get_resource(&index.resource_name)?;
        Ok(IndexRef::Plain { index, resource })
    }

    pub fn partitioning_resource(&self) -> Option<&Resource> {
        self.resources.iter().find(|r| r.is_partitioning_resource)
    }

    pub fn get_node(&self, node_id: NodeId) -> DirResult<&Node> {
        self.nodes
            .iter()
            .find(|node| node.id == node_id)
            .ok_or_else(|| DirError::NotFound(format!("node {}", node_id)))
    }
}

/// Hive-wide availability. `revision` moves on every administrative status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HiveSemaphore {
    pub status: Status,
    pub revision: u64,
}

impl HiveSemaphore {
    pub fn is_read_only(&self) -> bool {
        self.status.is_read_only()
    }
}
