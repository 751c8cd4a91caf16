//! Table operations: create/delete/get/setTableACL, plus the two
//! intentionally-unimplemented access-policy endpoints.

use super::{entity_collection_name, DataStore};
use crate::error::{Result, TableStoreError};
use crate::model::Table;

/// Table-level access policy is out of scope for this store; both get and
/// set always fail.
#[derive(Debug, Clone, Copy)]
pub struct TableAccessPolicy;

impl DataStore {
    /// `(account, table)` uniquely identifies a table record.
    pub fn create_table(&self, account: &str, table: &str, table_acl: Option<serde_json::Value>) -> Result<Table> {
        if self.tables.find_one(&[account, table])?.is_some() {
            return Err(TableStoreError::TableAlreadyExists {
                account: account.to_string(),
                table: table.to_string(),
            });
        }
        let record = Table {
            account: account.to_string(),
            table: table.to_string(),
            table_acl,
        };
        self.tables.insert(&[account, table], &serde_json::to_value(&record)?)?;

        // Drop any stale leftover collection from a previous table of the
        // same name before creating the fresh one.
        let coll_name = entity_collection_name(account, table);
        self.db.remove_collection(&coll_name)?;
        self.db.add_collection(&coll_name, &["partition_key", "row_key"])?;

        tracing::info!(account, table, "table created");
        Ok(record)
    }

    pub fn delete_table(&self, account: &str, table: &str) -> Result<()> {
        let existed = self.tables.remove(&[account, table])?;
        if !existed {
            return Err(TableStoreError::ResourceNotFound);
        }
        self.db.remove_collection(&entity_collection_name(account, table))?;
        tracing::info!(account, table, "table deleted");
        Ok(())
    }

    /// `getTable`/`getServiceProperties`-style lookups model "absent" as
    /// `Ok(None)` rather than a typed error, leaving the not-found mapping
    /// to the caller.
    pub fn get_table(&self, account: &str, table: &str) -> Result<Option<Table>> {
        match self.tables.find_one(&[account, table])? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub fn set_table_acl(&self, account: &str, table: &str, table_acl: Option<serde_json::Value>) -> Result<Table> {
        let mut record: Table = self
            .tables
            .find_one(&[account, table])?
            .ok_or_else(|| TableStoreError::TableNotFound {
                account: account.to_string(),
                table: table.to_string(),
            })
            .and_then(|doc| Ok(serde_json::from_value(doc)?))?;
        record.table_acl = table_acl;
        self.tables.update(&[account, table], &serde_json::to_value(&record)?)?;
        Ok(record)
    }

    pub fn get_table_access_policy(&self, _account: &str, _table: &str) -> Result<TableAccessPolicy> {
        Err(TableStoreError::NotImplemented("table-level access policy"))
    }

    pub fn set_table_access_policy(&self, _account: &str, _table: &str) -> Result<()> {
        Err(TableStoreError::NotImplemented("table-level access policy"))
    }
}
