use log::{debug, info, warn};
use rusqlite::types::FromSql;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, Params};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::batch::run_in_transaction;
use crate::key::check_key_type;
use crate::schema::{install_dimension_schema, validate_dimension_identifiers};
use crate::{
    ColumnType, DirError, DirResult, Directory, DirectoryKey, IndexRef, KeySemaphore, Node, NodeId,
    PartitionDimension, Resource, SecondaryIndex, SecondaryKeyBatch, Status,
};

/// Query shape of an index, decided once per call by `SqlDirectory::join_route`.
///
/// Every index has a "key" column (`id`) and an "owner" column (`pkey`). For the
/// resource table the owner is the primary index key; for secondary tables it is the
/// primary index key (partitioning resource) or a resource id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JoinRoute {
    /// Resource ids of the partitioning resource are primary index keys.
    Primary { primary: String },
    /// Resource table lookup.
    Direct { resource: String, primary: String },
    /// Secondary index of the partitioning resource: secondary -> primary.
    ViaPrimary { secondary: String, primary: String },
    /// Secondary index of any other resource: secondary -> resource -> primary.
    ViaResource {
        secondary: String,
        resource: String,
        primary: String,
    },
}

impl JoinRoute {
    /// Table holding the `(id, pkey)` rows; `None` when the key space is the primary table.
    fn row_table(&self) -> Option<&str> {
        match self {
            JoinRoute::Primary { .. } => None,
            JoinRoute::Direct { resource, .. } => Some(resource),
            JoinRoute::ViaPrimary { secondary, .. } => Some(secondary),
            JoinRoute::ViaResource { secondary, .. } => Some(secondary),
        }
    }

    fn key_table(&self) -> &str {
        match self {
            JoinRoute::Primary { primary } => primary,
            JoinRoute::Direct { resource, .. } => resource,
            JoinRoute::ViaPrimary { secondary, .. } => secondary,
            JoinRoute::ViaResource { secondary, .. } => secondary,
        }
    }

    fn semaphores_sql(&self) -> String {
        match self {
            JoinRoute::Primary { primary } => format!(
                "SELECT id, node, status FROM {} WHERE id = ?1 ORDER BY node",
                primary
            ),
            JoinRoute::Direct { resource, primary } => format!(
                "SELECT DISTINCT p.id, p.node, p.status FROM {} r
                 JOIN {} p ON r.pkey = p.id
                 WHERE r.id = ?1 ORDER BY p.node",
                resource, primary
            ),
            JoinRoute::ViaPrimary { secondary, primary } => format!(
                "SELECT DISTINCT p.id, p.node, p.status FROM {} s
                 JOIN {} p ON s.pkey = p.id
                 WHERE s.id = ?1 ORDER BY p.node",
                secondary, primary
            ),
            JoinRoute::ViaResource {
                secondary,
                resource,
                primary,
            } => format!(
                "SELECT DISTINCT p.id, p.node, p.status FROM {} s
                 JOIN {} r ON s.pkey = r.id
                 JOIN {} p ON r.pkey = p.id
                 WHERE s.id = ?1 ORDER BY p.node",
                secondary, resource, primary
            ),
        }
    }

    fn primary_keys_sql(&self) -> String {
        match self {
            JoinRoute::Primary { primary } => {
                format!("SELECT DISTINCT id FROM {} WHERE id = ?1", primary)
            }
            JoinRoute::Direct { resource, .. } => {
                format!("SELECT DISTINCT pkey FROM {} WHERE id = ?1", resource)
            }
            JoinRoute::ViaPrimary { secondary, .. } => {
                format!("SELECT DISTINCT pkey FROM {} WHERE id = ?1", secondary)
            }
            JoinRoute::ViaResource {
                secondary,
                resource,
                ..
            } => format!(
                "SELECT DISTINCT r.pkey FROM {} s
                 JOIN {} r ON s.pkey = r.id
                 WHERE s.id = ?1",
                secondary, resource
            ),
        }
    }

    fn owner_ids_sql(&self) -> String {
        match self {
            JoinRoute::Primary { primary } => {
                format!("SELECT DISTINCT id FROM {} WHERE id = ?1", primary)
            }
            _ => format!(
                "SELECT DISTINCT pkey FROM {} WHERE id = ?1",
                self.key_table()
            ),
        }
    }

    fn keys_of_owner_sql(&self) -> String {
        match self {
            JoinRoute::Primary { primary } => {
                format!("SELECT DISTINCT id FROM {} WHERE id = ?1", primary)
            }
            _ => format!("SELECT id FROM {} WHERE pkey = ?1", self.key_table()),
        }
    }

    fn keys_of_primary_key_sql(&self) -> String {
        match self {
            JoinRoute::ViaResource {
                secondary,
                resource,
                ..
            } => format!(
                "SELECT s.id FROM {} s
                 JOIN {} r ON s.pkey = r.id
                 WHERE r.pkey = ?1",
                secondary, resource
            ),
            _ => self.keys_of_owner_sql(),
        }
    }

    fn exists_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM {} WHERE id = ?1", self.key_table())
    }
}

fn db_error(op: &str, e: rusqlite::Error) -> DirError {
    if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
        return DirError::NotFound(format!("{}: no rows", op));
    }
    warn!("SqlDirectory: {} failed! {}", op, e);
    DirError::DbError(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

fn write_error(op: &str, what: String, e: rusqlite::Error) -> DirError {
    if is_constraint_violation(&e) {
        warn!("SqlDirectory: {} rejected duplicate {}", op, what);
        return DirError::AlreadyExists(what);
    }
    db_error(op, e)
}

/// Directory over the primary, resource and secondary tables of one partition dimension,
/// keyed by `K`.
pub struct SqlDirectory<K: DirectoryKey> {
    dimension: PartitionDimension,
    primary_table: String,
    conn: Arc<Mutex<Connection>>,
    _key: PhantomData<fn() -> K>,
}

impl<K: DirectoryKey> SqlDirectory<K> {
    pub fn open(db_path: impl AsRef<Path>, dimension: PartitionDimension) -> DirResult<Self> {
        let db_path = db_path.as_ref();
        debug!("SqlDirectory: open db path: {}", db_path.display());
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .map_err(|e| {
            warn!("SqlDirectory: open db failed! {}", e);
            DirError::DbError(e.to_string())
        })?;
        Self::from_connection(Arc::new(Mutex::new(conn)), dimension)
    }

    pub fn open_in_memory(dimension: PartitionDimension) -> DirResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            warn!("SqlDirectory: open in-memory db failed! {}", e);
            DirError::DbError(e.to_string())
        })?;
        Self::from_connection(Arc::new(Mutex::new(conn)), dimension)
    }

    /// Uses a shared connection, installing any missing tables of `dimension`.
    pub fn from_connection(
        conn: Arc<Mutex<Connection>>,
        dimension: PartitionDimension,
    ) -> DirResult<Self> {
        check_key_type::<K>(dimension.column_type, &dimension.name)?;
        validate_dimension_identifiers(&dimension)?;
        {
            let guard = conn.lock().map_err(|_| {
                DirError::InvalidState("SqlDirectory: connection mutex poisoned".to_string())
            })?;
            install_dimension_schema(&guard, &dimension)?;
        }
        info!(
            "SqlDirectory: dimension {} ready with {} resources and {} nodes",
            dimension.name,
            dimension.resources.len(),
            dimension.nodes.len()
        );
        Ok(Self {
            primary_table: dimension.primary_table_name(),
            dimension,
            conn,
            _key: PhantomData,
        })
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn lock_conn(&self) -> DirResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            DirError::InvalidState("SqlDirectory: connection mutex poisoned".to_string())
        })
    }

    /// The single place where the query shape of an index is decided.
    pub(crate) fn join_route(&self, index: &IndexRef<'_>) -> JoinRoute {
        let primary = self.primary_table.clone();
        match index {
            IndexRef::ResourceOwner(resource) if resource.is_partitioning_resource => {
                JoinRoute::Primary { primary }
            }
            IndexRef::ResourceOwner(resource) => JoinRoute::Direct {
                resource: resource.table_name(),
                primary,
            },
            IndexRef::Plain { index, resource } if resource.is_partitioning_resource => {
                JoinRoute::ViaPrimary {
                    secondary: index.table_name(),
                    primary,
                }
            }
            IndexRef::Plain { index, resource } => JoinRoute::ViaResource {
                secondary: index.table_name(),
                resource: resource.table_name(),
                primary,
            },
        }
    }

    /// Resource ids of the partitioning resource live in the primary key space.
    fn resource_id_type(&self, resource: &Resource) -> ColumnType {
        if resource.is_partitioning_resource {
            self.dimension.column_type
        } else {
            resource.column_type
        }
    }

    fn check_resource_id<R: DirectoryKey>(&self, resource: &Resource) -> DirResult<()> {
        check_key_type::<R>(self.resource_id_type(resource), &resource.name)
    }

    /// Resolves `index` and checks the secondary key type `S`.
    fn secondary_ref<'a, S: DirectoryKey>(
        &'a self,
        index: &'a SecondaryIndex,
    ) -> DirResult<IndexRef<'a>> {
        let index_ref = self.dimension.index_ref(index)?;
        check_key_type::<S>(index.column_type, &index_ref.describe())?;
        Ok(index_ref)
    }

    fn check_owner<O: DirectoryKey>(&self, index_ref: &IndexRef<'_>) -> DirResult<()> {
        let resource = index_ref.resource();
        check_key_type::<O>(
            self.resource_id_type(resource),
            &format!("owner of {}", index_ref.describe()),
        )
    }

    fn mutable_row_table<'r>(&self, route: &'r JoinRoute, what: &str) -> DirResult<&'r str> {
        route.row_table().ok_or_else(|| {
            DirError::InvalidParam(format!(
                "{} belongs to the partitioning resource, use primary index key operations",
                what
            ))
        })
    }

    fn query_values<T: FromSql, P: Params>(&self, op: &str, sql: &str, params: P) -> DirResult<Vec<T>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(sql).map_err(|e| db_error(op, e))?;
        let rows = stmt
            .query_map(params, |row| row.get::<_, T>(0))
            .map_err(|e| db_error(op, e))?;

        let mut values = Vec::new();
        for row in rows {
            values.push(row.map_err(|e| db_error(op, e))?);
        }
        Ok(values)
    }

    fn query_semaphores<P: Params>(
        &self,
        op: &str,
        sql: &str,
        params: P,
    ) -> DirResult<Vec<KeySemaphore<K>>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(sql).map_err(|e| db_error(op, e))?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(KeySemaphore::new(
                    row.get::<_, K>(0)?,
                    row.get::<_, NodeId>(1)?,
                    row.get::<_, Status>(2)?,
                ))
            })
            .map_err(|e| db_error(op, e))?;

        let mut semaphores = Vec::new();
        for row in rows {
            semaphores.push(row.map_err(|e| db_error(op, e))?);
        }
        Ok(semaphores)
    }

    fn query_count<P: Params>(&self, op: &str, sql: &str, params: P) -> DirResult<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(sql, params, |row| row.get::<_, i64>(0))
            .map_err(|e| db_error(op, e))
    }

    fn execute<P: Params>(&self, op: &str, sql: &str, params: P) -> DirResult<usize> {
        let conn = self.lock_conn()?;
        conn.execute(sql, params).map_err(|e| db_error(op, e))
    }

    fn single_primary_key(&self, what: String, mut keys: Vec<K>) -> DirResult<K> {
        match keys.len() {
            0 => Err(DirError::NotFound(what)),
            1 => Ok(keys.remove(0)),
            n => {
                warn!(
                    "SqlDirectory: {} resolves to {} primary index keys {:?}",
                    what, n, keys
                );
                Err(DirError::Corruption(format!(
                    "{} resolves to {} primary index keys",
                    what, n
                )))
            }
        }
    }

    fn write_secondary_batch<O: DirectoryKey>(
        &self,
        op: &str,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
        sql_template: fn(&str) -> String,
    ) -> DirResult<()> {
        let resource_name = match batch.resource_name()? {
            Some(name) => name,
            None => return Ok(()),
        };
        let resource = self.dimension.get_resource(resource_name)?;
        check_key_type::<O>(
            self.resource_id_type(resource),
            &format!("owner of {}", resource.name),
        )?;

        let mut statements: Vec<(String, &[rusqlite::types::Value])> = Vec::new();
        for (index, keys) in batch.iter() {
            let index_ref = self.dimension.index_ref(index)?;
            let route = self.join_route(&index_ref);
            let table = self.mutable_row_table(&route, &index_ref.describe())?;
            statements.push((sql_template(table), keys));
        }

        let mut conn = self.lock_conn()?;
        run_in_transaction(&mut conn, op, |tx| {
            for (sql, keys) in statements.iter() {
                for key in keys.iter() {
                    tx.execute(sql, params![key, owner_id])
                        .map_err(|e| write_error(op, format!("{:?} of {}", key, owner_id), e))?;
                }
            }
            Ok(())
        })?;
        debug!(
            "SqlDirectory: {} {} keys of {} {}",
            op,
            batch.len(),
            resource.name,
            owner_id
        );
        Ok(())
    }
}

impl<K: DirectoryKey> Directory for SqlDirectory<K> {
    type Key = K;

    fn dimension(&self) -> &PartitionDimension {
        &self.dimension
    }

    fn does_primary_index_key_exist(&self, key: &K) -> DirResult<bool> {
        let count = self.query_count(
            "primary key exists",
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", self.primary_table),
            params![key],
        )?;
        Ok(count > 0)
    }

    fn insert_primary_index_key(&self, node: &Node, key: &K) -> DirResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, node, status) VALUES (?1, ?2, ?3)",
                self.primary_table
            ),
            params![key, node.id, Status::Writable],
        )
        .map_err(|e| {
            write_error(
                "insert primary key",
                format!("primary index key {} on node {}", key, node.id),
                e,
            )
        })?;
        debug!("SqlDirectory: primary index key {} -> node {}", key, node.id);
        Ok(())
    }

    fn delete_primary_index_key(&self, key: &K) -> DirResult<()> {
        let deleted = self.execute(
            "delete primary key",
            &format!("DELETE FROM {} WHERE id = ?1", self.primary_table),
            params![key],
        )?;
        if deleted == 0 {
            return Err(DirError::NotFound(format!("primary index key {}", key)));
        }
        Ok(())
    }

    fn delete_node_of_primary_index_key(&self, key: &K, node_id: NodeId) -> DirResult<()> {
        let deleted = self.execute(
            "delete primary key replica",
            &format!(
                "DELETE FROM {} WHERE id = ?1 AND node = ?2",
                self.primary_table
            ),
            params![key, node_id],
        )?;
        if deleted == 0 {
            return Err(DirError::NotFound(format!(
                "primary index key {} on node {}",
                key, node_id
            )));
        }
        Ok(())
    }

    fn update_node_of_primary_index_key(
        &self,
        key: &K,
        from_node_id: NodeId,
        to_node_id: NodeId,
    ) -> DirResult<()> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                &format!(
                    "UPDATE {} SET node = ?3 WHERE id = ?1 AND node = ?2",
                    self.primary_table
                ),
                params![key, from_node_id, to_node_id],
            )
            .map_err(|e| {
                write_error(
                    "move primary key replica",
                    format!("primary index key {} on node {}", key, to_node_id),
                    e,
                )
            })?;
        if updated == 0 {
            return Err(DirError::NotFound(format!(
                "primary index key {} on node {}",
                key, from_node_id
            )));
        }
        info!(
            "SqlDirectory: primary index key {} moved from node {} to node {}",
            key, from_node_id, to_node_id
        );
        Ok(())
    }

    fn update_primary_index_key_read_only(&self, key: &K, read_only: bool) -> DirResult<()> {
        let updated = self.execute(
            "update primary key status",
            &format!("UPDATE {} SET status = ?2 WHERE id = ?1", self.primary_table),
            params![key, Status::from_read_only(read_only)],
        )?;
        if updated == 0 {
            return Err(DirError::NotFound(format!("primary index key {}", key)));
        }
        Ok(())
    }

    fn get_key_semaphores_of_primary_index_key(&self, key: &K) -> DirResult<Vec<KeySemaphore<K>>> {
        let route = JoinRoute::Primary {
            primary: self.primary_table.clone(),
        };
        self.query_semaphores("primary key semaphores", &route.semaphores_sql(), params![key])
    }

    fn get_resource_ids_of_primary_index_key<R: DirectoryKey>(
        &self,
        resource: &Resource,
        key: &K,
    ) -> DirResult<Vec<R>> {
        self.check_resource_id::<R>(resource)?;
        let route = self.join_route(&IndexRef::ResourceOwner(resource));
        self.query_values(
            "resource ids of primary key",
            &route.keys_of_primary_key_sql(),
            params![key],
        )
    }

    fn does_resource_id_exist<R: DirectoryKey>(&self, resource: &Resource, id: &R) -> DirResult<bool> {
        self.check_resource_id::<R>(resource)?;
        let route = self.join_route(&IndexRef::ResourceOwner(resource));
        let count = self.query_count("resource id exists", &route.exists_sql(), params![id])?;
        Ok(count > 0)
    }

    fn insert_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
        primary_key: &K,
    ) -> DirResult<()> {
        self.check_resource_id::<R>(resource)?;
        let route = self.join_route(&IndexRef::ResourceOwner(resource));
        let table = self.mutable_row_table(&route, &resource.name)?;

        let conn = self.lock_conn()?;
        let existing: i64 = conn
            .query_row(&route.exists_sql(), params![id], |row| row.get(0))
            .map_err(|e| db_error("insert resource id", e))?;
        if existing > 0 {
            return Err(DirError::AlreadyExists(format!(
                "{} id {} already has a primary index key",
                resource.name, id
            )));
        }
        conn.execute(
            &format!("INSERT INTO {} (id, pkey) VALUES (?1, ?2)", table),
            params![id, primary_key],
        )
        .map_err(|e| db_error("insert resource id", e))?;
        debug!(
            "SqlDirectory: {} id {} -> primary index key {}",
            resource.name, id, primary_key
        );
        Ok(())
    }

    fn update_primary_index_key_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
        primary_key: &K,
    ) -> DirResult<()> {
        self.check_resource_id::<R>(resource)?;
        let route = self.join_route(&IndexRef::ResourceOwner(resource));
        let table = self.mutable_row_table(&route, &resource.name)?;

        // Refuses to rewrite an id that is already ambiguous.
        let current: Vec<K> = self.query_values(
            "update resource id owner",
            &route.primary_keys_sql(),
            params![id],
        )?;
        self.single_primary_key(format!("{} id {}", resource.name, id), current)?;

        self.execute(
            "update resource id owner",
            &format!("UPDATE {} SET pkey = ?2 WHERE id = ?1", table),
            params![id, primary_key],
        )?;
        Ok(())
    }

    fn delete_resource_id<R: DirectoryKey>(&self, resource: &Resource, id: &R) -> DirResult<()> {
        self.check_resource_id::<R>(resource)?;
        let route = self.join_route(&IndexRef::ResourceOwner(resource));
        let table = self.mutable_row_table(&route, &resource.name)?;
        let deleted = self.execute(
            "delete resource id",
            &format!("DELETE FROM {} WHERE id = ?1", table),
            params![id],
        )?;
        if deleted == 0 {
            return Err(DirError::NotFound(format!("{} id {}", resource.name, id)));
        }
        Ok(())
    }

    fn get_primary_index_key_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<K> {
        self.check_resource_id::<R>(resource)?;
        let route = self.join_route(&IndexRef::ResourceOwner(resource));
        let keys: Vec<K> =
            self.query_values("primary key of resource id", &route.primary_keys_sql(), params![id])?;
        self.single_primary_key(format!("{} id {}", resource.name, id), keys)
    }

    fn get_key_semaphores_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<Vec<KeySemaphore<K>>> {
        self.check_resource_id::<R>(resource)?;
        let route = self.join_route(&IndexRef::ResourceOwner(resource));
        let semaphores =
            self.query_semaphores("resource id semaphores", &route.semaphores_sql(), params![id])?;

        // every replica must belong to the one owning key
        let mut owners: Vec<K> = Vec::new();
        for semaphore in semaphores.iter() {
            if !owners.contains(&semaphore.key) {
                owners.push(semaphore.key.clone());
            }
        }
        if owners.len() > 1 {
            self.single_primary_key(format!("{} id {}", resource.name, id), owners)?;
        }
        Ok(semaphores)
    }

    fn does_secondary_index_key_exist<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<bool> {
        let index_ref = self.secondary_ref::<S>(index)?;
        self.check_owner::<O>(&index_ref)?;
        let route = self.join_route(&index_ref);
        let table = self.mutable_row_table(&route, &index_ref.describe())?;
        let count = self.query_count(
            "secondary key exists",
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1 AND pkey = ?2", table),
            params![key, owner_id],
        )?;
        Ok(count > 0)
    }

    fn insert_secondary_index_key<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<()> {
        let index_ref = self.secondary_ref::<S>(index)?;
        self.check_owner::<O>(&index_ref)?;
        let route = self.join_route(&index_ref);
        let table = self.mutable_row_table(&route, &index_ref.describe())?;

        let conn = self.lock_conn()?;
        conn.execute(
            &format!("INSERT INTO {} (id, pkey) VALUES (?1, ?2)", table),
            params![key, owner_id],
        )
        .map_err(|e| {
            write_error(
                "insert secondary key",
                format!("{} {} of {}", index_ref.describe(), key, owner_id),
                e,
            )
        })?;
        Ok(())
    }

    fn delete_secondary_index_key<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<()> {
        let index_ref = self.secondary_ref::<S>(index)?;
        self.check_owner::<O>(&index_ref)?;
        let route = self.join_route(&index_ref);
        let table = self.mutable_row_table(&route, &index_ref.describe())?;
        let deleted = self.execute(
            "delete secondary key",
            &format!("DELETE FROM {} WHERE id = ?1 AND pkey = ?2", table),
            params![key, owner_id],
        )?;
        if deleted == 0 {
            return Err(DirError::NotFound(format!(
                "{} {} of {}",
                index_ref.describe(),
                key,
                owner_id
            )));
        }
        Ok(())
    }

    fn get_key_semaphores_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<KeySemaphore<K>>> {
        let index_ref = self.secondary_ref::<S>(index)?;
        let route = self.join_route(&index_ref);
        self.query_semaphores("secondary key semaphores", &route.semaphores_sql(), params![key])
    }

    fn get_primary_index_keys_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<K>> {
        let index_ref = self.secondary_ref::<S>(index)?;
        let route = self.join_route(&index_ref);
        self.query_values(
            "primary keys of secondary key",
            &route.primary_keys_sql(),
            params![key],
        )
    }

    fn get_resource_ids_of_secondary_index_key<S: DirectoryKey, R: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<R>> {
        let index_ref = self.secondary_ref::<S>(index)?;
        self.check_owner::<R>(&index_ref)?;
        let route = self.join_route(&index_ref);
        self.query_values(
            "resource ids of secondary key",
            &route.owner_ids_sql(),
            params![key],
        )
    }

    fn get_secondary_index_keys_of_resource_id<S: DirectoryKey, R: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        id: &R,
    ) -> DirResult<Vec<S>> {
        let index_ref = self.secondary_ref::<S>(index)?;
        self.check_owner::<R>(&index_ref)?;
        let route = self.join_route(&index_ref);
        self.query_values(
            "secondary keys of resource id",
            &route.keys_of_owner_sql(),
            params![id],
        )
    }

    fn get_secondary_index_keys_of_primary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &K,
    ) -> DirResult<Vec<S>> {
        let index_ref = self.secondary_ref::<S>(index)?;
        let route = self.join_route(&index_ref);
        self.query_values(
            "secondary keys of primary key",
            &route.keys_of_primary_key_sql(),
            params![key],
        )
    }

    fn batch_insert_secondary_index_keys<O: DirectoryKey>(
        &self,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
    ) -> DirResult<()> {
        self.write_secondary_batch("insert secondary keys", batch, owner_id, |table| {
            format!("INSERT INTO {} (id, pkey) VALUES (?1, ?2)", table)
        })
    }

    fn batch_delete_secondary_index_keys<O: DirectoryKey>(
        &self,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
    ) -> DirResult<()> {
        self.write_secondary_batch("delete secondary keys", batch, owner_id, |table| {
            format!("DELETE FROM {} WHERE id = ?1 AND pkey = ?2", table)
        })
    }

    fn delete_all_secondary_index_keys_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<()> {
        self.check_resource_id::<R>(resource)?;
        let mut tables = Vec::with_capacity(resource.secondary_indexes.len());
        for index in resource.secondary_indexes.iter() {
            let index_ref = IndexRef::Plain { index, resource };
            let route = self.join_route(&index_ref);
            tables.push(self.mutable_row_table(&route, &index_ref.describe())?.to_string());
        }
        if tables.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock_conn()?;
        let deleted = run_in_transaction(&mut conn, "delete secondary keys of resource id", |tx| {
            let mut deleted = 0usize;
            for table in tables.iter() {
                deleted += tx
                    .execute(&format!("DELETE FROM {} WHERE pkey = ?1", table), params![id])
                    .map_err(|e| db_error("delete secondary keys of resource id", e))?;
            }
            Ok(deleted)
        })?;
        debug!(
            "SqlDirectory: deleted {} secondary keys of {} id {}",
            deleted, resource.name, id
        );
        Ok(())
    }
}
