//! Data model bootstrap, plus the `DataStore` facade every other operation
//! hangs off of.

mod batch;
mod entities;
mod pagination;
mod service_properties;
mod tables;

pub use batch::BatchState;
pub use entities::EntityPatch;
pub use pagination::{decode_continuation_key, encode_continuation_key, Continuation, Page};
pub use tables::TableAccessPolicy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::collections::{Collection, Database};
use crate::config::StoreConfig;
use crate::error::Result;

pub const TABLES_COLLECTION: &str = "$TABLES_COLLECTION$";
pub const SERVICES_COLLECTION: &str = "$SERVICES_COLLECTION$";

pub(crate) fn entity_collection_name(account: &str, table: &str) -> String {
    format!("{account}${table}")
}

/// The metadata store core: tables, entities, service properties, query
/// compilation, pagination and batch rollback, all in one facade.
pub struct DataStore {
    db: Arc<Database>,
    tables: Collection,
    services: Collection,
    batch: Mutex<BatchState>,
    config: StoreConfig,
    initialized: AtomicBool,
    autosave_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DataStore {
    /// Bootstrap: open (or create) the backing file, ensure the two
    /// well-known collections exist, snapshot once, spawn the autosave
    /// loop, and mark the store initialized. One of the store's three
    /// async suspension points (the other two are `close` and autosave).
    pub async fn init(config: StoreConfig) -> Result<Self> {
        let db = Arc::new(Database::open(&config.db_path)?);
        let tables = db.add_collection(TABLES_COLLECTION, &["account", "table_name"])?;
        let services = db.add_collection(SERVICES_COLLECTION, &["account_name"])?;
        db.snapshot()?;

        let handle = db.spawn_autosave(Duration::from_secs(config.autosave_interval_secs));

        tracing::info!(db_path = %config.db_path, "table store initialized");

        Ok(Self {
            db,
            tables,
            services,
            batch: Mutex::new(BatchState::default()),
            config,
            initialized: AtomicBool::new(true),
            autosave_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Flush through the durable-collection layer and mark closed; every
    /// subsequent operation on this store observably fails.
    pub async fn close(&self) -> Result<()> {
        self.db.close()?;
        if let Some(handle) = self.autosave_handle.lock().unwrap().take() {
            handle.abort();
        }
        tracing::info!("table store closed");
        Ok(())
    }

    pub(crate) fn entity_collection(&self, account: &str, table: &str) -> Result<Collection> {
        let name = entity_collection_name(account, table);
        self.db
            .get_collection(&name, &["partition_key", "row_key"])?
            .ok_or_else(|| crate::error::TableStoreError::TableNotExist {
                account: account.to_string(),
                table: table.to_string(),
            })
    }
}
