pub mod collections;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, TableStoreError};
pub use model::{Entity, PropertyMap, PropertyValue, ServiceProperties, ServicePropertiesPatch, Table};
pub use store::{decode_continuation_key, encode_continuation_key, Continuation, DataStore, EntityPatch, Page, TableAccessPolicy};

/// Shared test-only tracing init, scoped to `cargo test`'s captured output.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
