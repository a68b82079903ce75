use rusqlite::params;

use crate::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn product_dimension() -> PartitionDimension {
    let mut dimension = PartitionDimension::new(1, "ProductId", ColumnType::Integer);
    dimension.nodes.push(Node::new(1, "node-a", "sqlite::memory:a"));
    dimension.nodes.push(Node::new(2, "node-b", "sqlite::memory:b"));
    dimension.resources.push(
        Resource::new(1, "Product", ColumnType::Integer, false).with_secondary_index(
            1,
            "name",
            ColumnType::Varchar,
        ),
    );
    dimension.resources.push(
        Resource::new(2, "Catalog", ColumnType::Integer, true).with_secondary_index(
            2,
            "region",
            ColumnType::Varchar,
        ),
    );
    dimension
}

fn open() -> (SqlDirectory<i32>, PartitionDimension) {
    init_logging();
    let dimension = product_dimension();
    let directory = SqlDirectory::<i32>::open_in_memory(dimension.clone()).unwrap();
    (directory, dimension)
}

#[test]
fn test_resolves_product_name_to_primary_key_and_node() {
    let (directory, dimension) = open();
    let node = dimension.get_node(1).unwrap();
    let product = dimension.get_resource("Product").unwrap();
    let name = product.get_secondary_index("name").unwrap();

    directory.insert_primary_index_key(node, &1).unwrap();
    directory.insert_resource_id(product, &10i32, &1).unwrap();
    directory
        .insert_secondary_index_key(name, &"Spork".to_string(), &10i32)
        .unwrap();

    assert!(directory.does_primary_index_key_exist(&1).unwrap());
    assert!(!directory.does_primary_index_key_exist(&2).unwrap());
    assert!(directory.does_resource_id_exist(product, &10i32).unwrap());
    assert!(directory
        .does_secondary_index_key_exist(name, &"Spork".to_string(), &10i32)
        .unwrap());

    let semaphores = directory
        .get_key_semaphores_of_secondary_index_key(name, &"Spork".to_string())
        .unwrap();
    assert_eq!(semaphores, vec![KeySemaphore::new(1, 1, Status::Writable)]);
    assert_eq!(
        directory
            .get_primary_index_keys_of_secondary_index_key(name, &"Spork".to_string())
            .unwrap(),
        vec![1]
    );
    assert_eq!(
        directory
            .get_resource_ids_of_secondary_index_key::<String, i32>(name, &"Spork".to_string())
            .unwrap(),
        vec![10]
    );
    assert_eq!(
        directory
            .get_secondary_index_keys_of_resource_id::<String, i32>(name, &10)
            .unwrap(),
        vec!["Spork".to_string()]
    );
    assert_eq!(
        directory
            .get_secondary_index_keys_of_primary_index_key::<String>(name, &1)
            .unwrap(),
        vec!["Spork".to_string()]
    );
    assert_eq!(
        directory
            .get_primary_index_key_of_resource_id(product, &10i32)
            .unwrap(),
        1
    );
    assert_eq!(
        directory
            .get_resource_ids_of_primary_index_key::<i32>(product, &1)
            .unwrap(),
        vec![10]
    );
    assert_eq!(
        directory.get_node_ids_of_resource_id(product, &10i32).unwrap(),
        vec![1]
    );
}

#[test]
fn test_missing_keys_resolve_to_empty_or_not_found() {
    let (directory, dimension) = open();
    let product = dimension.get_resource("Product").unwrap();
    let name = product.get_secondary_index("name").unwrap();

    assert!(directory
        .get_key_semaphores_of_primary_index_key(&5)
        .unwrap()
        .is_empty());
    assert!(directory
        .get_key_semaphores_of_secondary_index_key(name, &"None".to_string())
        .unwrap()
        .is_empty());
    assert!(directory
        .get_primary_index_key_of_resource_id(product, &99i32)
        .unwrap_err()
        .is_not_found());
    assert!(directory
        .get_read_only_of_primary_index_key(&5)
        .unwrap_err()
        .is_not_found());
    assert!(directory.delete_primary_index_key(&5).unwrap_err().is_not_found());
}

#[test]
fn test_duplicate_resource_rows_are_corruption() {
    let (directory, dimension) = open();
    let node = dimension.get_node(1).unwrap();
    let product = dimension.get_resource("Product").unwrap();
    directory.insert_primary_index_key(node, &1).unwrap();
    directory.insert_primary_index_key(node, &2).unwrap();
    directory.insert_resource_id(product, &10i32, &1).unwrap();

    {
        let conn = directory.connection();
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO hive_resource_product (id, pkey) VALUES (?1, ?2)",
            params![10, 2],
        )
        .unwrap();
    }

    let err = directory
        .get_primary_index_key_of_resource_id(product, &10i32)
        .unwrap_err();
    assert!(err.is_corruption());
    let err = directory
        .update_primary_index_key_of_resource_id(product, &10i32, &1)
        .unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_duplicate_resource_rows_fail_semaphore_reads_and_writes() {
    let (directory, dimension) = open();
    let node_a = dimension.get_node(1).unwrap();
    let node_b = dimension.get_node(2).unwrap();
    let product = dimension.get_resource("Product").unwrap();
    let name = product.get_secondary_index("name").unwrap();
    directory.insert_primary_index_key(node_a, &1).unwrap();
    directory.insert_primary_index_key(node_b, &2).unwrap();
    directory.insert_resource_id(product, &23i32, &1).unwrap();
    directory.insert_resource_id(product, &24i32, &2).unwrap();

    {
        let conn = directory.connection();
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO hive_resource_product (id, pkey) VALUES (?1, ?2)",
            params![23, 2],
        )
        .unwrap();
    }

    let err = directory
        .get_key_semaphores_of_resource_id(product, &23i32)
        .unwrap_err();
    assert!(err.is_corruption());
    // a healthy id is unaffected
    assert_eq!(
        directory
            .get_key_semaphores_of_resource_id(product, &24i32)
            .unwrap(),
        vec![KeySemaphore::new(2, 2, Status::Writable)]
    );

    let hive = HiveFacade::new(directory);
    let err = hive
        .insert_secondary_index_key(name, &"Spork".to_string(), &23i32)
        .unwrap_err();
    assert!(err.is_corruption());
    let err = hive.delete_resource_id(product, &23i32).unwrap_err();
    assert!(err.is_corruption());
    let err = hive
        .update_primary_index_key_of_resource_id(product, &23i32, &1)
        .unwrap_err();
    assert!(err.is_corruption());

    // nothing was repaired
    {
        let conn = hive.directory().connection();
        let conn = conn.lock().unwrap();
        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM hive_resource_product WHERE id = 23",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, 2);
    }
    assert!(!hive
        .does_secondary_index_key_exist(name, &"Spork".to_string(), &23i32)
        .unwrap());
}

#[test]
fn test_replicated_primary_key_reports_every_replica() {
    let (directory, dimension) = open();
    let node_a = dimension.get_node(1).unwrap();
    let node_b = dimension.get_node(2).unwrap();
    directory.insert_primary_index_key(node_a, &7).unwrap();
    directory.insert_primary_index_key(node_b, &7).unwrap();

    assert_eq!(directory.get_node_ids_of_primary_index_key(&7).unwrap(), vec![1, 2]);
    assert!(!directory.get_read_only_of_primary_index_key(&7).unwrap());

    // same pair twice is refused
    let err = directory.insert_primary_index_key(node_a, &7).unwrap_err();
    assert!(matches!(err, DirError::AlreadyExists(_)));

    directory.update_primary_index_key_read_only(&7, true).unwrap();
    let semaphores = directory.get_key_semaphores_of_primary_index_key(&7).unwrap();
    assert_eq!(semaphores.len(), 2);
    assert!(semaphores.iter().all(|s| s.is_read_only()));
    assert!(directory.get_read_only_of_primary_index_key(&7).unwrap());

    directory.delete_node_of_primary_index_key(&7, 1).unwrap();
    assert_eq!(directory.get_node_ids_of_primary_index_key(&7).unwrap(), vec![2]);
}

#[test]
fn test_move_primary_key_between_nodes() {
    let (directory, dimension) = open();
    let node_a = dimension.get_node(1).unwrap();
    directory.insert_primary_index_key(node_a, &3).unwrap();

    directory.update_node_of_primary_index_key(&3, 1, 2).unwrap();
    assert_eq!(directory.get_node_ids_of_primary_index_key(&3).unwrap(), vec![2]);

    let err = directory.update_node_of_primary_index_key(&3, 1, 2).unwrap_err();
    assert!(err.is_not_found());

    directory.insert_primary_index_key(node_a, &3).unwrap();
    let err = directory.update_node_of_primary_index_key(&3, 1, 2).unwrap_err();
    assert!(matches!(err, DirError::AlreadyExists(_)));
}

#[test]
fn test_resource_id_mutations() {
    let (directory, dimension) = open();
    let node = dimension.get_node(1).unwrap();
    let product = dimension.get_resource("Product").unwrap();
    directory.insert_primary_index_key(node, &1).unwrap();
    directory.insert_primary_index_key(node, &2).unwrap();

    directory.insert_resource_id(product, &10i32, &1).unwrap();
    let err = directory.insert_resource_id(product, &10i32, &2).unwrap_err();
    assert!(matches!(err, DirError::AlreadyExists(_)));

    directory
        .update_primary_index_key_of_resource_id(product, &10i32, &2)
        .unwrap();
    assert_eq!(
        directory
            .get_primary_index_key_of_resource_id(product, &10i32)
            .unwrap(),
        2
    );

    directory.delete_resource_id(product, &10i32).unwrap();
    assert!(!directory.does_resource_id_exist(product, &10i32).unwrap());
    assert!(directory
        .delete_resource_id(product, &10i32)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_partitioning_resource_ids_are_primary_keys() {
    let (directory, dimension) = open();
    let node = dimension.get_node(2).unwrap();
    let catalog = dimension.get_resource("Catalog").unwrap();
    let region = catalog.get_secondary_index("region").unwrap();

    directory.insert_primary_index_key(node, &5).unwrap();
    directory
        .insert_secondary_index_key(region, &"EU".to_string(), &5i32)
        .unwrap();

    assert!(directory.does_resource_id_exist(catalog, &5i32).unwrap());
    assert_eq!(
        directory
            .get_primary_index_key_of_resource_id(catalog, &5i32)
            .unwrap(),
        5
    );
    assert_eq!(
        directory
            .get_resource_ids_of_primary_index_key::<i32>(catalog, &5)
            .unwrap(),
        vec![5]
    );
    assert_eq!(
        directory
            .get_node_ids_of_secondary_index_key(region, &"EU".to_string())
            .unwrap(),
        vec![2]
    );
    assert_eq!(
        directory
            .get_secondary_index_keys_of_primary_index_key::<String>(region, &5)
            .unwrap(),
        vec!["EU".to_string()]
    );

    let err = directory.insert_resource_id(catalog, &6i32, &5).unwrap_err();
    assert!(matches!(err, DirError::InvalidParam(_)));
}

#[test]
fn test_key_types_are_checked_before_sql() {
    let (directory, dimension) = open();
    let product = dimension.get_resource("Product").unwrap();
    let name = product.get_secondary_index("name").unwrap();

    let err = directory
        .insert_secondary_index_key(name, &42i32, &10i32)
        .unwrap_err();
    assert!(matches!(err, DirError::InvalidParam(_)));
    let err = directory
        .insert_resource_id(product, &"10".to_string(), &1)
        .unwrap_err();
    assert!(matches!(err, DirError::InvalidParam(_)));
}

#[test]
fn test_batch_insert_is_all_or_nothing() {
    let (directory, dimension) = open();
    let node = dimension.get_node(1).unwrap();
    let product = dimension.get_resource("Product").unwrap();
    let name = product.get_secondary_index("name").unwrap();
    directory.insert_primary_index_key(node, &1).unwrap();
    directory.insert_resource_id(product, &10i32, &1).unwrap();

    let mut batch = SecondaryKeyBatch::new();
    batch
        .insert_all(name, vec!["Spork".to_string(), "Knork".to_string(), "Spork".to_string()])
        .unwrap();
    let err = directory
        .batch_insert_secondary_index_keys(&batch, &10i32)
        .unwrap_err();
    assert!(matches!(err, DirError::TransactionFailed(_)));
    assert!(directory
        .get_secondary_index_keys_of_resource_id::<String, i32>(name, &10)
        .unwrap()
        .is_empty());

    let mut batch = SecondaryKeyBatch::new();
    batch
        .insert_all(name, vec!["Spork".to_string(), "Knork".to_string()])
        .unwrap();
    directory
        .batch_insert_secondary_index_keys(&batch, &10i32)
        .unwrap();
    let mut keys = directory
        .get_secondary_index_keys_of_resource_id::<String, i32>(name, &10)
        .unwrap();
    keys.sort();
    assert_eq!(keys, vec!["Knork".to_string(), "Spork".to_string()]);

    directory
        .batch_delete_secondary_index_keys(&batch, &10i32)
        .unwrap();
    assert!(directory
        .get_secondary_index_keys_of_resource_id::<String, i32>(name, &10)
        .unwrap()
        .is_empty());

    // empty batch touches nothing
    directory
        .batch_insert_secondary_index_keys(&SecondaryKeyBatch::new(), &10i32)
        .unwrap();
}

#[test]
fn test_delete_all_secondary_keys_of_resource_id() {
    let (directory, dimension) = open();
    let node = dimension.get_node(1).unwrap();
    let product = dimension.get_resource("Product").unwrap();
    let name = product.get_secondary_index("name").unwrap();
    directory.insert_primary_index_key(node, &1).unwrap();
    directory.insert_resource_id(product, &10i32, &1).unwrap();
    directory.insert_resource_id(product, &11i32, &1).unwrap();
    directory
        .insert_secondary_index_key(name, &"Spork".to_string(), &10i32)
        .unwrap();
    directory
        .insert_secondary_index_key(name, &"Knork".to_string(), &10i32)
        .unwrap();
    directory
        .insert_secondary_index_key(name, &"Ladle".to_string(), &11i32)
        .unwrap();

    directory
        .delete_all_secondary_index_keys_of_resource_id(product, &10i32)
        .unwrap();
    assert!(directory
        .get_secondary_index_keys_of_resource_id::<String, i32>(name, &10)
        .unwrap()
        .is_empty());
    assert_eq!(
        directory
            .get_secondary_index_keys_of_resource_id::<String, i32>(name, &11)
            .unwrap(),
        vec!["Ladle".to_string()]
    );
}

#[test]
fn test_open_file_db_persists_rows() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("hive.db");
    let dimension = product_dimension();
    {
        let directory = SqlDirectory::<i32>::open(&db_path, dimension.clone()).unwrap();
        let node = dimension.get_node(1).unwrap();
        directory.insert_primary_index_key(node, &42).unwrap();
    }

    let directory = SqlDirectory::<i32>::open(&db_path, dimension).unwrap();
    assert!(directory.does_primary_index_key_exist(&42).unwrap());
}
