use log::{debug, warn};
use rusqlite::Connection;

use crate::{DirError, DirResult, PartitionDimension};

/// Table and column names are spliced into SQL, so they must be plain identifiers.
pub fn validate_identifier(name: &str) -> DirResult<()> {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if first_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Ok(());
    }
    Err(DirError::InvalidParam(format!(
        "invalid identifier: {:?}",
        name
    )))
}

pub fn validate_dimension_identifiers(dimension: &PartitionDimension) -> DirResult<()> {
    validate_identifier(&dimension.name)?;
    for resource in dimension.resources.iter() {
        validate_identifier(&resource.name)?;
        for index in resource.secondary_indexes.iter() {
            validate_identifier(&index.name)?;
        }
    }
    Ok(())
}

fn execute_ddl(conn: &Connection, table: &str, sql: &str) -> DirResult<()> {
    conn.execute(sql, []).map_err(|e| {
        warn!("schema: create {} failed! {}", table, e);
        DirError::DbError(e.to_string())
    })?;
    Ok(())
}

/// Creates the primary, resource and secondary tables of `dimension` if missing.
pub fn install_dimension_schema(conn: &Connection, dimension: &PartitionDimension) -> DirResult<()> {
    validate_dimension_identifiers(dimension)?;

    let primary = dimension.primary_table_name();
    let key_type = dimension.column_type.sql_type();
    debug!("schema: installing tables of dimension {}", dimension.name);

    execute_ddl(
        conn,
        &primary,
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id {} NOT NULL,
                node INTEGER NOT NULL,
                status INTEGER NOT NULL DEFAULT 0
            )",
            primary, key_type
        ),
    )?;
    execute_ddl(
        conn,
        &primary,
        &format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_{0}_id_node ON {0}(id, node)",
            primary
        ),
    )?;

    for resource in dimension.resources.iter() {
        // The partitioning resource's ids are the primary keys; owners of its
        // secondary rows are primary keys as well.
        let owner_type = if resource.is_partitioning_resource {
            key_type
        } else {
            let table = resource.table_name();
            execute_ddl(
                conn,
                &table,
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id {} NOT NULL,
                        pkey {} NOT NULL
                    )",
                    table,
                    resource.column_type.sql_type(),
                    key_type
                ),
            )?;
            execute_ddl(
                conn,
                &table,
                &format!("CREATE INDEX IF NOT EXISTS idx_{0}_id ON {0}(id)", table),
            )?;
            execute_ddl(
                conn,
                &table,
                &format!("CREATE INDEX IF NOT EXISTS idx_{0}_pkey ON {0}(pkey)", table),
            )?;
            resource.column_type.sql_type()
        };

        for index in resource.secondary_indexes.iter() {
            let table = index.table_name();
            execute_ddl(
                conn,
                &table,
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id {} NOT NULL,
                        pkey {} NOT NULL
                    )",
                    table,
                    index.column_type.sql_type(),
                    owner_type
                ),
            )?;
            execute_ddl(
                conn,
                &table,
                &format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_{0}_id_pkey ON {0}(id, pkey)",
                    table
                ),
            )?;
            execute_ddl(
                conn,
                &table,
                &format!("CREATE INDEX IF NOT EXISTS idx_{0}_pkey ON {0}(pkey)", table),
            )?;
        }
    }
    Ok(())
}
