use log::info;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::assigner::{Assigner, ConsistentHashAssigner, RandomAssigner};
use crate::cache::MemoryCache;
use crate::cached_facade::CachedHive;
use crate::facade::HiveFacade;
use crate::schema::validate_identifier;
use crate::{
    ColumnType, DirError, DirResult, DirectoryKey, Node, PartitionDimension, Resource,
    SecondaryIndex, SqlDirectory, Status,
};

pub fn read_json_config<T: DeserializeOwned>(path: &Path) -> DirResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DirError::IoError(format!("read {} failed: {}", path.display(), e)))?;
    serde_json::from_str::<T>(&content)
        .map_err(|e| DirError::InvalidData(format!("parse {} failed: {}", path.display(), e)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DimensionConfig {
    pub id: i64,
    #[serde(alias = "dimension_name")]
    pub name: String,
    #[serde(alias = "type", alias = "key_type")]
    pub column_type: ColumnType,
    pub index_uri: String,
}

impl Default for DimensionConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: String::new(),
            column_type: ColumnType::Integer,
            index_uri: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecondaryIndexConfigEntry {
    pub id: i64,
    #[serde(alias = "column", alias = "column_name")]
    pub name: String,
    #[serde(alias = "type")]
    pub column_type: ColumnType,
}

impl Default for SecondaryIndexConfigEntry {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            column_type: ColumnType::Varchar,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceConfigEntry {
    pub id: i64,
    pub name: String,
    #[serde(alias = "type")]
    pub column_type: ColumnType,
    #[serde(alias = "is_partitioning_resource")]
    pub partitioning: bool,
    #[serde(alias = "indexes")]
    pub secondary_indexes: Vec<SecondaryIndexConfigEntry>,
}

impl Default for ResourceConfigEntry {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            column_type: ColumnType::Integer,
            partitioning: false,
            secondary_indexes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfigEntry {
    pub id: i64,
    pub name: String,
    #[serde(alias = "url", alias = "address")]
    pub uri: String,
    #[serde(alias = "readonly")]
    pub read_only: bool,
    #[serde(alias = "weight")]
    pub capacity: u32,
}

impl Default for NodeConfigEntry {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            uri: String::new(),
            read_only: false,
            capacity: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(alias = "max_entries")]
    pub capacity: usize,
    #[serde(alias = "timeout_ms")]
    pub op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10000,
            op_timeout_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignerKind {
    #[default]
    Random,
    #[serde(alias = "maglev")]
    ConsistentHash,
}

/// On-disk description of one hive: its dimension, resources, nodes and runtime settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HiveConfigFile {
    #[serde(alias = "partition_dimension")]
    pub dimension: DimensionConfig,
    pub resources: Vec<ResourceConfigEntry>,
    #[serde(alias = "data_nodes")]
    pub nodes: Vec<NodeConfigEntry>,
    /// SQLite file of the directory tables; in memory when absent.
    #[serde(alias = "meta_db_path", alias = "directory_db_path")]
    pub db_path: Option<PathBuf>,
    pub cache: CacheConfig,
    pub assigner: AssignerKind,
}

impl HiveConfigFile {
    pub fn load(path: &Path) -> DirResult<Self> {
        let config: HiveConfigFile = read_json_config(path)?;
        info!(
            "hive config {}: dimension {} with {} resources, {} nodes",
            path.display(),
            config.dimension.name,
            config.resources.len(),
            config.nodes.len()
        );
        Ok(config)
    }

    /// Validates the snapshot and turns it into the metadata the directory resolves against.
    /// Zero ids are replaced by their 1-based position.
    pub fn to_dimension(&self) -> DirResult<PartitionDimension> {
        validate_identifier(&self.dimension.name)?;
        let mut dimension = PartitionDimension::new(
            self.dimension.id,
            &self.dimension.name,
            self.dimension.column_type,
        );
        dimension.index_uri = self.dimension.index_uri.clone();

        let mut resource_names = HashSet::new();
        for (i, entry) in self.resources.iter().enumerate() {
            validate_identifier(&entry.name)?;
            if !resource_names.insert(entry.name.to_lowercase()) {
                return Err(DirError::InvalidParam(format!(
                    "resource {} is declared twice",
                    entry.name
                )));
            }
            let column_type = if entry.partitioning {
                self.dimension.column_type
            } else {
                entry.column_type
            };
            let mut resource = Resource::new(
                position_id(entry.id, i),
                &entry.name,
                column_type,
                entry.partitioning,
            );

            let mut index_names = HashSet::new();
            for (j, index) in entry.secondary_indexes.iter().enumerate() {
                validate_identifier(&index.name)?;
                if !index_names.insert(index.name.to_lowercase()) {
                    return Err(DirError::InvalidParam(format!(
                        "secondary index {}.{} is declared twice",
                        entry.name, index.name
                    )));
                }
                resource.secondary_indexes.push(SecondaryIndex::new(
                    position_id(index.id, j),
                    &index.name,
                    &entry.name,
                    index.column_type,
                ));
            }
            dimension.resources.push(resource);
        }

        let partitioning = dimension
            .resources
            .iter()
            .filter(|r| r.is_partitioning_resource)
            .count();
        if partitioning > 1 {
            return Err(DirError::InvalidParam(format!(
                "dimension {} declares {} partitioning resources, at most one is allowed",
                dimension.name, partitioning
            )));
        }

        let mut node_ids = HashSet::new();
        let mut node_uris = HashSet::new();
        for (i, entry) in self.nodes.iter().enumerate() {
            let id = position_id(entry.id, i);
            if !node_ids.insert(id) || !node_uris.insert(entry.uri.clone()) {
                return Err(DirError::InvalidParam(format!(
                    "node {} ({}) is declared twice",
                    id, entry.uri
                )));
            }
            let mut node = Node::new(id, &entry.name, &entry.uri);
            node.status = Status::from_read_only(entry.read_only);
            node.capacity = entry.capacity;
            dimension.nodes.push(node);
        }

        Ok(dimension)
    }

    pub fn build_assigner(&self) -> Arc<dyn Assigner> {
        match self.assigner {
            AssignerKind::Random => Arc::new(RandomAssigner::new()),
            AssignerKind::ConsistentHash => Arc::new(ConsistentHashAssigner::new()),
        }
    }

    pub fn open_directory<K: DirectoryKey>(&self) -> DirResult<SqlDirectory<K>> {
        let dimension = self.to_dimension()?;
        match self.db_path.as_ref() {
            Some(db_path) => {
                if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                SqlDirectory::open(db_path, dimension)
            }
            None => SqlDirectory::open_in_memory(dimension),
        }
    }

    pub fn open_facade<K: DirectoryKey>(&self) -> DirResult<HiveFacade<SqlDirectory<K>>> {
        let directory = self.open_directory::<K>()?;
        Ok(HiveFacade::new(directory).with_assigner(self.build_assigner()))
    }

    /// The facade behind a `MemoryCache` overlay. A disabled cache still yields the
    /// overlay, backed by a cache that stores nothing.
    pub fn open_cached<K: DirectoryKey>(&self) -> DirResult<CachedHive<SqlDirectory<K>>> {
        let facade = Arc::new(self.open_facade::<K>()?);
        let capacity = if self.cache.enabled {
            self.cache.capacity
        } else {
            0
        };
        Ok(CachedHive::new(facade, Arc::new(MemoryCache::new(capacity)))
            .with_op_timeout(Duration::from_millis(self.cache.op_timeout_ms)))
    }
}

fn position_id(id: i64, index: usize) -> i64 {
    if id == 0 {
        index as i64 + 1
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_CONFIG: &str = r#"{
        "partition_dimension": { "name": "ProductId", "type": "integer" },
        "resources": [
            {
                "name": "Product",
                "column_type": "integer",
                "indexes": [ { "column": "name", "type": "varchar" } ]
            },
            { "name": "Catalog", "is_partitioning_resource": true }
        ],
        "data_nodes": [
            { "name": "node-a", "url": "sqlite:///var/hive/a.db", "weight": 3 },
            { "name": "node-b", "url": "sqlite:///var/hive/b.db", "readonly": true }
        ],
        "cache": { "max_entries": 16 },
        "assigner": "maglev"
    }"#;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("hive.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_config_with_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let config = HiveConfigFile::load(&write_config(dir.path(), PRODUCT_CONFIG)).unwrap();
        assert_eq!(config.assigner, AssignerKind::ConsistentHash);
        assert_eq!(config.cache.capacity, 16);
        assert!(config.cache.enabled);
        assert!(config.db_path.is_none());

        let dimension = config.to_dimension().unwrap();
        assert_eq!(dimension.name, "ProductId");
        let product = dimension.get_resource("Product").unwrap();
        assert_eq!(product.id, 1);
        assert_eq!(product.secondary_indexes[0].table_name(), "hive_secondary_product_name");
        let catalog = dimension.partitioning_resource().unwrap();
        assert_eq!(catalog.name, "Catalog");
        assert_eq!(catalog.column_type, ColumnType::Integer);

        assert_eq!(dimension.nodes.len(), 2);
        assert_eq!(dimension.nodes[0].capacity, 3);
        assert!(dimension.nodes[1].is_read_only());
        assert_eq!(dimension.nodes[1].id, 2);
    }

    #[test]
    fn test_rejects_invalid_snapshots() {
        let two_partitioning = r#"{
            "dimension": { "name": "ProductId" },
            "resources": [
                { "name": "A", "partitioning": true },
                { "name": "B", "partitioning": true }
            ]
        }"#;
        let config: HiveConfigFile = serde_json::from_str(two_partitioning).unwrap();
        assert!(matches!(config.to_dimension(), Err(DirError::InvalidParam(_))));

        let bad_name = r#"{ "dimension": { "name": "Product Id" } }"#;
        let config: HiveConfigFile = serde_json::from_str(bad_name).unwrap();
        assert!(config.to_dimension().is_err());

        let duplicate_node = r#"{
            "dimension": { "name": "ProductId" },
            "nodes": [ { "uri": "a" }, { "uri": "a" } ]
        }"#;
        let config: HiveConfigFile = serde_json::from_str(duplicate_node).unwrap();
        assert!(config.to_dimension().is_err());
    }

    #[test]
    fn test_missing_or_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = HiveConfigFile::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, DirError::IoError(_)));

        let path = write_config(dir.path(), "{ not json");
        let err = HiveConfigFile::load(&path).unwrap_err();
        assert!(matches!(err, DirError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_open_cached_hive_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config: HiveConfigFile = serde_json::from_str(PRODUCT_CONFIG).unwrap();
        config.db_path = Some(dir.path().join("db").join("hive.db"));

        let hive = config.open_cached::<i32>().unwrap();
        let dimension = hive.facade().dimension().clone();
        let product = dimension.get_resource("Product").unwrap();

        // node-b is read-only, so every key lands on node-a
        let node = hive.insert_primary_index_key(&1).await.unwrap();
        assert_eq!(node.id, 1);
        hive.insert_resource_id(product, &10i32, &1).await.unwrap();
        assert_eq!(
            hive.get_node_ids_of_resource_id(product, &10i32).await.unwrap(),
            vec![1]
        );
        assert!(dir.path().join("db").join("hive.db").exists());
    }
}
