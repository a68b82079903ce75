use log::{debug, info, warn};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::assigner::{Assigner, RandomAssigner};
use crate::{
    AnyKey, DirError, DirResult, Directory, DirectoryKey, HiveSemaphore, KeySemaphore, LockTier,
    Node, NodeId, PartitionDimension, Resource, SecondaryIndex, SecondaryKeyBatch, Status,
};

/// Administrative availability: the hive tier and the node tier.
#[derive(Debug, Clone)]
struct AdminState {
    hive: HiveSemaphore,
    nodes: Vec<Node>,
}

/// Resource ids removed by a cascading primary key delete, tagged with their resource name.
pub type DeletedResourceIds = Vec<(String, AnyKey)>;

/// Write gate in front of a [`Directory`].
///
/// Every mutation resolves the hive, node and key tiers first and refuses with
/// `LockDenied` before any row is touched. Reads pass straight through.
pub struct HiveFacade<D: Directory> {
    directory: D,
    assigner: Arc<dyn Assigner>,
    state: RwLock<AdminState>,
}

impl<D: Directory> HiveFacade<D> {
    pub fn new(directory: D) -> Self {
        let nodes = directory.dimension().nodes.clone();
        Self {
            directory,
            assigner: Arc::new(RandomAssigner::new()),
            state: RwLock::new(AdminState {
                hive: HiveSemaphore::default(),
                nodes,
            }),
        }
    }

    /// Set the placement policy for new primary index keys.
    pub fn with_assigner(mut self, assigner: Arc<dyn Assigner>) -> Self {
        self.assigner = assigner;
        self
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn dimension(&self) -> &PartitionDimension {
        self.directory.dimension()
    }

    fn read_state(&self) -> DirResult<RwLockReadGuard<'_, AdminState>> {
        self.state
            .read()
            .map_err(|_| DirError::InvalidState("HiveFacade: state lock poisoned".to_string()))
    }

    fn write_state(&self) -> DirResult<RwLockWriteGuard<'_, AdminState>> {
        self.state
            .write()
            .map_err(|_| DirError::InvalidState("HiveFacade: state lock poisoned".to_string()))
    }

    // ---- administrative status ----

    pub fn hive_semaphore(&self) -> DirResult<HiveSemaphore> {
        Ok(self.read_state()?.hive)
    }

    pub fn nodes(&self) -> DirResult<Vec<Node>> {
        Ok(self.read_state()?.nodes.clone())
    }

    pub fn writable_nodes(&self) -> DirResult<Vec<Node>> {
        let state = self.read_state()?;
        Ok(state
            .nodes
            .iter()
            .filter(|node| !node.is_read_only())
            .cloned()
            .collect())
    }

    pub fn get_node(&self, node_id: NodeId) -> DirResult<Node> {
        let state = self.read_state()?;
        state
            .nodes
            .iter()
            .find(|node| node.id == node_id)
            .cloned()
            .ok_or_else(|| DirError::NotFound(format!("node {}", node_id)))
    }

    pub fn update_hive_read_only(&self, read_only: bool) -> DirResult<HiveSemaphore> {
        let mut state = self.write_state()?;
        state.hive.status = Status::from_read_only(read_only);
        state.hive.revision += 1;
        info!(
            "HiveFacade: hive {} is now {:?}, revision {}",
            self.dimension().name,
            state.hive.status,
            state.hive.revision
        );
        Ok(state.hive)
    }

    pub fn update_node_read_only(&self, node_id: NodeId, read_only: bool) -> DirResult<()> {
        let mut state = self.write_state()?;
        let node = state
            .nodes
            .iter_mut()
            .find(|node| node.id == node_id)
            .ok_or_else(|| DirError::NotFound(format!("node {}", node_id)))?;
        node.status = Status::from_read_only(read_only);
        info!("HiveFacade: node {} is now {:?}", node_id, node.status);
        state.hive.revision += 1;
        Ok(())
    }

    // ---- lock checks ----

    fn check_hive_writable(&self, what: &str) -> DirResult<()> {
        if self.read_state()?.hive.is_read_only() {
            warn!("HiveFacade: {} refused, hive is read-only", what);
            return Err(DirError::lock_denied(LockTier::Hive, what));
        }
        Ok(())
    }

    fn check_node_writable(&self, node_id: NodeId, what: &str) -> DirResult<()> {
        let state = self.read_state()?;
        let node = state
            .nodes
            .iter()
            .find(|node| node.id == node_id)
            .ok_or_else(|| DirError::NotFound(format!("node {} of {}", node_id, what)))?;
        if node.is_read_only() {
            warn!("HiveFacade: {} refused, node {} is read-only", what, node_id);
            return Err(DirError::lock_denied(LockTier::Node(node_id), what));
        }
        Ok(())
    }

    /// Hive first, then every replica's node, then the key itself.
    fn check_semaphores_writable(
        &self,
        semaphores: &[KeySemaphore<D::Key>],
        what: &str,
    ) -> DirResult<()> {
        self.check_hive_writable(what)?;
        for semaphore in semaphores.iter() {
            self.check_node_writable(semaphore.node_id, what)?;
        }
        if let Some(semaphore) = semaphores.iter().find(|s| s.is_read_only()) {
            warn!(
                "HiveFacade: {} refused, primary index key {} is read-only on node {}",
                what, semaphore.key, semaphore.node_id
            );
            return Err(DirError::lock_denied(LockTier::Key, what));
        }
        Ok(())
    }

    fn writable_semaphores_of_primary_index_key(
        &self,
        key: &D::Key,
        what: &str,
    ) -> DirResult<Vec<KeySemaphore<D::Key>>> {
        let semaphores = self.directory.get_key_semaphores_of_primary_index_key(key)?;
        if semaphores.is_empty() {
            return Err(DirError::NotFound(format!("primary index key {}", key)));
        }
        self.check_semaphores_writable(&semaphores, what)?;
        Ok(semaphores)
    }

    fn writable_semaphores_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
        what: &str,
    ) -> DirResult<Vec<KeySemaphore<D::Key>>> {
        let semaphores = self.directory.get_key_semaphores_of_resource_id(resource, id)?;
        if semaphores.is_empty() {
            return Err(DirError::NotFound(format!("{} id {}", resource.name, id)));
        }
        self.check_semaphores_writable(&semaphores, what)?;
        Ok(semaphores)
    }

    // ---- primary index ----

    /// Places a new primary index key on a writable node chosen by the assigner.
    pub fn insert_primary_index_key(&self, key: &D::Key) -> DirResult<Node> {
        let what = format!("insert primary index key {}", key);
        self.check_hive_writable(&what)?;
        if self.directory.does_primary_index_key_exist(key)? {
            return Err(DirError::AlreadyExists(format!("primary index key {}", key)));
        }

        let writable = self.writable_nodes()?;
        if writable.is_empty() {
            warn!("HiveFacade: {} failed, no writable node", what);
            return Err(DirError::InvalidState(format!("{}: no writable node", what)));
        }
        let node = self.assigner.choose_node(&writable, &key.to_string()).clone();
        self.directory.insert_primary_index_key(&node, key)?;
        debug!("HiveFacade: primary index key {} placed on node {}", key, node.id);
        Ok(node)
    }

    /// Adds a replica of an existing key on a given node.
    pub fn insert_primary_index_key_on_node(&self, key: &D::Key, node_id: NodeId) -> DirResult<()> {
        let what = format!("replicate primary index key {} to node {}", key, node_id);
        self.check_hive_writable(&what)?;
        self.check_node_writable(node_id, &what)?;
        let node = self.get_node(node_id)?;
        self.directory.insert_primary_index_key(&node, key)
    }

    /// Allowed while the key is read-only, so a locked key can be unlocked.
    pub fn update_primary_index_key_read_only(&self, key: &D::Key, read_only: bool) -> DirResult<()> {
        self.check_hive_writable(&format!("update status of primary index key {}", key))?;
        if !self.directory.does_primary_index_key_exist(key)? {
            return Err(DirError::NotFound(format!("primary index key {}", key)));
        }
        self.directory.update_primary_index_key_read_only(key, read_only)?;
        info!(
            "HiveFacade: primary index key {} is now {:?}",
            key,
            Status::from_read_only(read_only)
        );
        Ok(())
    }

    /// Moves one replica. Both nodes and the key must be writable.
    pub fn update_node_of_primary_index_key(
        &self,
        key: &D::Key,
        from_node_id: NodeId,
        to_node_id: NodeId,
    ) -> DirResult<()> {
        let what = format!(
            "move primary index key {} from node {} to node {}",
            key, from_node_id, to_node_id
        );
        self.writable_semaphores_of_primary_index_key(key, &what)?;
        self.check_node_writable(to_node_id, &what)?;
        self.directory
            .update_node_of_primary_index_key(key, from_node_id, to_node_id)
    }

    /// Drops one replica. The last replica only goes with `delete_primary_index_key`,
    /// which also removes what the key owns.
    pub fn delete_node_of_primary_index_key(&self, key: &D::Key, node_id: NodeId) -> DirResult<()> {
        let what = format!("delete replica of primary index key {} on node {}", key, node_id);
        let semaphores = self.writable_semaphores_of_primary_index_key(key, &what)?;
        if !semaphores.iter().any(|s| s.node_id == node_id) {
            return Err(DirError::NotFound(format!(
                "primary index key {} on node {}",
                key, node_id
            )));
        }
        if semaphores.len() == 1 {
            warn!("HiveFacade: {} refused, it is the last replica", what);
            return Err(DirError::InvalidState(format!("{}: last replica", what)));
        }
        self.directory.delete_node_of_primary_index_key(key, node_id)
    }

    /// Deletes the key with everything it owns, children first: secondary rows and
    /// resource rows of every resource, then the primary rows.
    pub fn delete_primary_index_key(&self, key: &D::Key) -> DirResult<DeletedResourceIds> {
        let what = format!("delete primary index key {}", key);
        self.writable_semaphores_of_primary_index_key(key, &what)?;

        let mut deleted = DeletedResourceIds::new();
        for resource in self.directory.dimension().resources.iter() {
            if resource.is_partitioning_resource {
                self.directory
                    .delete_all_secondary_index_keys_of_resource_id(resource, key)?;
                continue;
            }

            let ids: Vec<AnyKey> = self
                .directory
                .get_resource_ids_of_primary_index_key(resource, key)?;
            for id in ids {
                self.directory
                    .delete_all_secondary_index_keys_of_resource_id(resource, &id)?;
                self.directory.delete_resource_id(resource, &id)?;
                deleted.push((resource.name.clone(), id));
            }
        }

        self.directory.delete_primary_index_key(key)?;
        info!(
            "HiveFacade: deleted primary index key {} and {} resource ids",
            key,
            deleted.len()
        );
        Ok(deleted)
    }

    pub fn does_primary_index_key_exist(&self, key: &D::Key) -> DirResult<bool> {
        self.directory.does_primary_index_key_exist(key)
    }

    pub fn get_key_semaphores_of_primary_index_key(
        &self,
        key: &D::Key,
    ) -> DirResult<Vec<KeySemaphore<D::Key>>> {
        self.directory.get_key_semaphores_of_primary_index_key(key)
    }

    pub fn get_node_ids_of_primary_index_key(&self, key: &D::Key) -> DirResult<Vec<NodeId>> {
        self.directory.get_node_ids_of_primary_index_key(key)
    }

    pub fn get_read_only_of_primary_index_key(&self, key: &D::Key) -> DirResult<bool> {
        self.directory.get_read_only_of_primary_index_key(key)
    }

    pub fn get_resource_ids_of_primary_index_key<R: DirectoryKey>(
        &self,
        resource: &Resource,
        key: &D::Key,
    ) -> DirResult<Vec<R>> {
        self.directory.get_resource_ids_of_primary_index_key(resource, key)
    }

    // ---- resource ids ----

    pub fn insert_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
        primary_key: &D::Key,
    ) -> DirResult<()> {
        let what = format!("insert {} id {}", resource.name, id);
        self.writable_semaphores_of_primary_index_key(primary_key, &what)?;
        self.directory.insert_resource_id(resource, id, primary_key)
    }

    /// Re-homes a resource id. The current and the new owner must both be writable.
    pub fn update_primary_index_key_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
        primary_key: &D::Key,
    ) -> DirResult<()> {
        let what = format!("move {} id {} to primary index key {}", resource.name, id, primary_key);
        self.writable_semaphores_of_resource_id(resource, id, &what)?;
        self.writable_semaphores_of_primary_index_key(primary_key, &what)?;
        self.directory
            .update_primary_index_key_of_resource_id(resource, id, primary_key)
    }

    /// Deletes the resource id and its secondary rows.
    pub fn delete_resource_id<R: DirectoryKey>(&self, resource: &Resource, id: &R) -> DirResult<()> {
        if resource.is_partitioning_resource {
            return Err(DirError::Unsupported(format!(
                "{} is the partitioning resource, delete its primary index key instead",
                resource.name
            )));
        }
        let what = format!("delete {} id {}", resource.name, id);
        self.writable_semaphores_of_resource_id(resource, id, &what)?;
        self.directory
            .delete_all_secondary_index_keys_of_resource_id(resource, id)?;
        self.directory.delete_resource_id(resource, id)
    }

    pub fn does_resource_id_exist<R: DirectoryKey>(&self, resource: &Resource, id: &R) -> DirResult<bool> {
        self.directory.does_resource_id_exist(resource, id)
    }

    pub fn get_primary_index_key_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<D::Key> {
        self.directory.get_primary_index_key_of_resource_id(resource, id)
    }

    pub fn get_key_semaphores_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<Vec<KeySemaphore<D::Key>>> {
        self.directory.get_key_semaphores_of_resource_id(resource, id)
    }

    pub fn get_node_ids_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<Vec<NodeId>> {
        self.directory.get_node_ids_of_resource_id(resource, id)
    }

    // ---- secondary indexes ----

    fn owner_resource(&self, index: &SecondaryIndex) -> DirResult<&Resource> {
        self.directory.dimension().get_resource(&index.resource_name)
    }

    pub fn insert_secondary_index_key<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<()> {
        let resource = self.owner_resource(index)?;
        let what = format!(
            "insert {}.{} {} of {}",
            resource.name, index.name, key, owner_id
        );
        self.writable_semaphores_of_resource_id(resource, owner_id, &what)?;
        self.directory.insert_secondary_index_key(index, key, owner_id)
    }

    pub fn delete_secondary_index_key<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<()> {
        let resource = self.owner_resource(index)?;
        let what = format!(
            "delete {}.{} {} of {}",
            resource.name, index.name, key, owner_id
        );
        self.writable_semaphores_of_resource_id(resource, owner_id, &what)?;
        self.directory.delete_secondary_index_key(index, key, owner_id)
    }

    fn check_batch_owner<O: DirectoryKey>(
        &self,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
        op: &str,
    ) -> DirResult<bool> {
        let resource_name = match batch.resource_name()? {
            Some(name) => name,
            None => return Ok(false),
        };
        let resource = self.directory.dimension().get_resource(resource_name)?;
        let what = format!("{} {} keys of {} {}", op, batch.len(), resource.name, owner_id);
        self.writable_semaphores_of_resource_id(resource, owner_id, &what)?;
        Ok(true)
    }

    /// All keys of the batch or none.
    pub fn insert_secondary_index_keys<O: DirectoryKey>(
        &self,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
    ) -> DirResult<()> {
        if !self.check_batch_owner(batch, owner_id, "insert")? {
            return Ok(());
        }
        self.directory.batch_insert_secondary_index_keys(batch, owner_id)
    }

    /// All keys of the batch or none.
    pub fn delete_secondary_index_keys<O: DirectoryKey>(
        &self,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
    ) -> DirResult<()> {
        if !self.check_batch_owner(batch, owner_id, "delete")? {
            return Ok(());
        }
        self.directory.batch_delete_secondary_index_keys(batch, owner_id)
    }

    pub fn does_secondary_index_key_exist<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<bool> {
        self.directory.does_secondary_index_key_exist(index, key, owner_id)
    }

    pub fn get_key_semaphores_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<KeySemaphore<D::Key>>> {
        self.directory.get_key_semaphores_of_secondary_index_key(index, key)
    }

    pub fn get_node_ids_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<NodeId>> {
        self.directory.get_node_ids_of_secondary_index_key(index, key)
    }

    pub fn get_primary_index_keys_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<D::Key>> {
        self.directory
            .get_primary_index_keys_of_secondary_index_key(index, key)
    }

    pub fn get_resource_ids_of_secondary_index_key<S: DirectoryKey, R: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<R>> {
        self.directory.get_resource_ids_of_secondary_index_key(index, key)
    }

    pub fn get_secondary_index_keys_of_resource_id<S: DirectoryKey, R: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        id: &R,
    ) -> DirResult<Vec<S>> {
        self.directory.get_secondary_index_keys_of_resource_id(index, id)
    }

    pub fn get_secondary_index_keys_of_primary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &D::Key,
    ) -> DirResult<Vec<S>> {
        self.directory
            .get_secondary_index_keys_of_primary_index_key(index, key)
    }
}
