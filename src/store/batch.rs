//! Batch transaction manager: one in-flight batch per store, an
//! all-or-nothing rollback driven by two undo logs.

use crate::error::{Result, TableStoreError};
use crate::model::Entity;

use super::DataStore;

/// Undo state for the single batch a store may have in flight at a time.
/// `rollback_pre_images` holds the pre-write snapshot of every entity an
/// update/merge/delete touched; `inserted_during_batch` holds every entity a
/// plain insert created. Abort replays both in reverse.
#[derive(Debug, Default)]
pub struct BatchState {
    pub(crate) active: Option<String>,
    pub(crate) rollback_pre_images: Vec<Entity>,
    pub(crate) inserted_during_batch: Vec<Entity>,
}

impl DataStore {
    /// Open a batch. Only one may be in flight at a time.
    pub fn begin_batch(&self, batch_id: &str) -> Result<()> {
        let mut batch = self.batch.lock().unwrap();
        if batch.active.is_some() {
            return Err(TableStoreError::TransactionOverlap);
        }
        *batch = BatchState {
            active: Some(batch_id.to_string()),
            ..BatchState::default()
        };
        Ok(())
    }

    /// Close the batch named `batch_id`. On `succeeded = false`, every
    /// update/merge/delete pre-image is written back and every entity
    /// inserted during the batch is removed, undoing the batch's effects on
    /// `(account, table)`'s entity collection.
    pub fn end_batch(&self, account: &str, table: &str, batch_id: &str, succeeded: bool) -> Result<()> {
        let mut batch = self.batch.lock().unwrap();
        match &batch.active {
            Some(id) if id == batch_id => {}
            _ => return Err(TableStoreError::ResourceNotFound),
        }

        if !succeeded {
            let coll = self.entity_collection(account, table)?;
            for entity in batch.rollback_pre_images.drain(..) {
                let key = [entity.partition_key.as_str(), entity.row_key.as_str()];
                // The entity may have been deleted during the batch, so an
                // `update` would silently match zero rows. Remove whatever
                // is there now, then insert the clean pre-image.
                coll.remove(&key)?;
                coll.insert(&key, &serde_json::to_value(&entity)?)?;
            }
            for entity in batch.inserted_during_batch.drain(..) {
                coll.remove(&[&entity.partition_key, &entity.row_key])?;
            }
        }

        *batch = BatchState::default();
        Ok(())
    }
}
