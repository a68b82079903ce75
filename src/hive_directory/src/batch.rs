use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{Connection, Transaction};

use crate::key::{check_key_type, to_sql_value};
use crate::{DirError, DirResult, DirectoryKey, SecondaryIndex};

/// Secondary index keys of one owner, grouped per index.
#[derive(Debug, Clone, Default)]
pub struct SecondaryKeyBatch {
    entries: Vec<(SecondaryIndex, Vec<Value>)>,
}

impl SecondaryKeyBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: DirectoryKey>(&mut self, index: &SecondaryIndex, key: &S) -> DirResult<()> {
        check_key_type::<S>(index.column_type, &index.table_name())?;
        let value = to_sql_value(key)?;
        let slot = self
            .entries
            .iter_mut()
            .find(|(i, _)| i.name == index.name && i.resource_name == index.resource_name);
        match slot {
            Some((_, keys)) => keys.push(value),
            None => self.entries.push((index.clone(), vec![value])),
        }
        Ok(())
    }

    pub fn insert_all<S: DirectoryKey>(
        &mut self,
        index: &SecondaryIndex,
        keys: impl IntoIterator<Item = S>,
    ) -> DirResult<()> {
        for key in keys {
            self.insert(index, &key)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, keys)| keys.is_empty())
    }

    /// Total number of keys across all indexes.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, keys)| keys.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SecondaryIndex, &[Value])> {
        self.entries
            .iter()
            .map(|(index, keys)| (index, keys.as_slice()))
    }

    /// The single resource every index of the batch belongs to.
    pub fn resource_name(&self) -> DirResult<Option<&str>> {
        let mut name: Option<&str> = None;
        for (index, _) in self.entries.iter() {
            match name {
                None => name = Some(index.resource_name.as_str()),
                Some(current) if current.eq_ignore_ascii_case(&index.resource_name) => {}
                Some(current) => {
                    return Err(DirError::InvalidParam(format!(
                        "batch mixes indexes of resources {} and {}",
                        current, index.resource_name
                    )));
                }
            }
        }
        Ok(name)
    }
}

/// Runs `f` inside one transaction. Commits on `Ok`; any error rolls the whole
/// transaction back and is reported as `TransactionFailed`.
pub fn run_in_transaction<T, F>(conn: &mut Connection, op: &str, f: F) -> DirResult<T>
where
    F: FnOnce(&Transaction<'_>) -> DirResult<T>,
{
    let tx = conn.transaction().map_err(|e| {
        warn!("batch {}: begin transaction failed! {}", op, e);
        DirError::TransactionFailed(format!("{}: {}", op, e))
    })?;

    match f(&tx) {
        Ok(result) => {
            tx.commit().map_err(|e| {
                warn!("batch {}: commit failed! {}", op, e);
                DirError::TransactionFailed(format!("{}: {}", op, e))
            })?;
            debug!("batch {}: committed", op);
            Ok(result)
        }
        Err(err) => {
            warn!("batch {}: rolling back, {}", op, err);
            if let Err(e) = tx.rollback() {
                warn!("batch {}: rollback failed! {}", op, e);
            }
            match err {
                DirError::TransactionFailed(_) => Err(err),
                other => Err(DirError::TransactionFailed(format!("{}: {}", op, other))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ColumnType;
    use rusqlite::params;

    fn name_index() -> SecondaryIndex {
        SecondaryIndex::new(1, "name", "Product", ColumnType::Varchar)
    }

    #[test]
    fn test_batch_groups_keys_per_index() {
        let name = name_index();
        let price = SecondaryIndex::new(2, "price", "Product", ColumnType::Double);

        let mut batch = SecondaryKeyBatch::new();
        assert!(batch.is_empty());
        batch
            .insert_all(&name, vec!["Spork".to_string(), "Knork".to_string()])
            .unwrap();
        batch.insert(&price, &2.5f64).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.iter().count(), 2);
        assert_eq!(batch.resource_name().unwrap(), Some("Product"));
    }

    #[test]
    fn test_batch_rejects_wrong_key_type_and_mixed_resources() {
        let mut batch = SecondaryKeyBatch::new();
        assert!(batch.insert(&name_index(), &42i32).is_err());

        batch.insert(&name_index(), &"Spork".to_string()).unwrap();
        let other = SecondaryIndex::new(3, "city", "Store", ColumnType::Varchar);
        batch.insert(&other, &"Oslo".to_string()).unwrap();
        assert!(batch.resource_name().is_err());
    }

    #[test]
    fn test_run_in_transaction_rolls_back_on_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER NOT NULL UNIQUE)", [])
            .unwrap();

        let result: DirResult<()> = run_in_transaction(&mut conn, "insert", |tx| {
            tx.execute("INSERT INTO t (id) VALUES (?1)", params![1])
                .map_err(|e| DirError::DbError(e.to_string()))?;
            tx.execute("INSERT INTO t (id) VALUES (?1)", params![1])
                .map_err(|e| DirError::DbError(e.to_string()))?;
            Ok(())
        });
        assert!(matches!(result, Err(DirError::TransactionFailed(_))));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        run_in_transaction(&mut conn, "insert", |tx| {
            tx.execute("INSERT INTO t (id) VALUES (?1)", params![2])
                .map_err(|e| DirError::DbError(e.to_string()))?;
            Ok(())
        })
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
