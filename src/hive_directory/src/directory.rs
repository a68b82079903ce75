use crate::semaphore::{any_read_only, node_ids_of};
use crate::{
    DirError, DirResult, DirectoryKey, KeySemaphore, Node, NodeId, PartitionDimension, Resource,
    SecondaryIndex, SecondaryKeyBatch,
};

/// Resolution and mutation contract over a dimension's primary, resource and
/// secondary index tables.
///
/// Resolution queries return every matching replica; callers reduce them. Owner ids of
/// secondary index keys are primary index keys when the index belongs to the
/// partitioning resource, and resource ids otherwise.
pub trait Directory: Send + Sync {
    type Key: DirectoryKey;

    fn dimension(&self) -> &PartitionDimension;

    // ---- primary index ----

    fn does_primary_index_key_exist(&self, key: &Self::Key) -> DirResult<bool>;

    fn insert_primary_index_key(&self, node: &Node, key: &Self::Key) -> DirResult<()>;

    /// Removes every replica row of `key`. Dependents must already be gone.
    fn delete_primary_index_key(&self, key: &Self::Key) -> DirResult<()>;

    fn delete_node_of_primary_index_key(&self, key: &Self::Key, node_id: NodeId) -> DirResult<()>;

    fn update_node_of_primary_index_key(
        &self,
        key: &Self::Key,
        from_node_id: NodeId,
        to_node_id: NodeId,
    ) -> DirResult<()>;

    fn update_primary_index_key_read_only(&self, key: &Self::Key, read_only: bool)
        -> DirResult<()>;

    fn get_key_semaphores_of_primary_index_key(
        &self,
        key: &Self::Key,
    ) -> DirResult<Vec<KeySemaphore<Self::Key>>>;

    fn get_node_ids_of_primary_index_key(&self, key: &Self::Key) -> DirResult<Vec<NodeId>> {
        let semaphores = self.get_key_semaphores_of_primary_index_key(key)?;
        Ok(node_ids_of(&semaphores))
    }

    fn get_read_only_of_primary_index_key(&self, key: &Self::Key) -> DirResult<bool> {
        let semaphores = self.get_key_semaphores_of_primary_index_key(key)?;
        if semaphores.is_empty() {
            return Err(DirError::NotFound(format!("primary index key {}", key)));
        }
        Ok(any_read_only(&semaphores))
    }

    fn get_resource_ids_of_primary_index_key<R: DirectoryKey>(
        &self,
        resource: &Resource,
        key: &Self::Key,
    ) -> DirResult<Vec<R>>;

    // ---- resource ids ----

    fn does_resource_id_exist<R: DirectoryKey>(&self, resource: &Resource, id: &R)
        -> DirResult<bool>;

    fn insert_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
        primary_key: &Self::Key,
    ) -> DirResult<()>;

    fn update_primary_index_key_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
        primary_key: &Self::Key,
    ) -> DirResult<()>;

    /// Removes the resource row only; secondary rows are the caller's to delete first.
    fn delete_resource_id<R: DirectoryKey>(&self, resource: &Resource, id: &R) -> DirResult<()>;

    fn get_primary_index_key_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<Self::Key>;

    fn get_key_semaphores_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<Vec<KeySemaphore<Self::Key>>>;

    fn get_node_ids_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<Vec<NodeId>> {
        let semaphores = self.get_key_semaphores_of_resource_id(resource, id)?;
        Ok(node_ids_of(&semaphores))
    }

    // ---- secondary indexes ----

    fn does_secondary_index_key_exist<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<bool>;

    fn insert_secondary_index_key<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<()>;

    fn delete_secondary_index_key<S: DirectoryKey, O: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
        owner_id: &O,
    ) -> DirResult<()>;

    fn get_key_semaphores_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<KeySemaphore<Self::Key>>>;

    fn get_node_ids_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<NodeId>> {
        let semaphores = self.get_key_semaphores_of_secondary_index_key(index, key)?;
        Ok(node_ids_of(&semaphores))
    }

    fn get_primary_index_keys_of_secondary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<Self::Key>>;

    fn get_resource_ids_of_secondary_index_key<S: DirectoryKey, R: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &S,
    ) -> DirResult<Vec<R>>;

    fn get_secondary_index_keys_of_resource_id<S: DirectoryKey, R: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        id: &R,
    ) -> DirResult<Vec<S>>;

    fn get_secondary_index_keys_of_primary_index_key<S: DirectoryKey>(
        &self,
        index: &SecondaryIndex,
        key: &Self::Key,
    ) -> DirResult<Vec<S>>;

    /// All-or-nothing.
    fn batch_insert_secondary_index_keys<O: DirectoryKey>(
        &self,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
    ) -> DirResult<()>;

    /// All-or-nothing.
    fn batch_delete_secondary_index_keys<O: DirectoryKey>(
        &self,
        batch: &SecondaryKeyBatch,
        owner_id: &O,
    ) -> DirResult<()>;

    /// Deletes the secondary rows of `id` across every index of `resource` in one transaction.
    fn delete_all_secondary_index_keys_of_resource_id<R: DirectoryKey>(
        &self,
        resource: &Resource,
        id: &R,
    ) -> DirResult<()>;
}
