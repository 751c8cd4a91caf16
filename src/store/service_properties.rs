//! Per-account service properties.

use crate::error::Result;
use crate::model::{ServiceProperties, ServicePropertiesPatch};

use super::DataStore;

impl DataStore {
    pub fn get_service_properties(&self, account: &str) -> Result<Option<ServiceProperties>> {
        match self.services.by(account)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Create the record on first call, otherwise overlay only the fields
    /// `patch` sets — CORS/metrics/logging sub-structures are independently
    /// nullable-or-absent.
    pub fn set_service_properties(&self, account: &str, patch: ServicePropertiesPatch) -> Result<ServiceProperties> {
        let mut record = match self.services.by(account)? {
            Some(doc) => serde_json::from_value(doc)?,
            None => ServiceProperties {
                account_name: account.to_string(),
                ..ServiceProperties::default()
            },
        };
        record.apply_patch(patch);
        let doc = serde_json::to_value(&record)?;
        if self.services.update(&[account], &doc)? {
            // already existed, updated in place
        } else {
            self.services.insert(&[account], &doc)?;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    #[tokio::test]
    async fn absent_account_returns_none() {
        let store = DataStore::init(StoreConfig {
            db_path: ":memory:".to_string(),
            ..StoreConfig::default()
        })
        .await
        .unwrap();
        assert!(store.get_service_properties("acct").unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_patch_preserves_untouched_fields() {
        let store = DataStore::init(StoreConfig {
            db_path: ":memory:".to_string(),
            ..StoreConfig::default()
        })
        .await
        .unwrap();
        let cors = serde_json::json!({"allowedOrigins": ["*"]});
        store
            .set_service_properties(
                "acct",
                ServicePropertiesPatch {
                    account_name: "acct".to_string(),
                    cors: Some(cors.clone()),
                    ..ServicePropertiesPatch::default()
                },
            )
            .unwrap();

        let logging = serde_json::json!({"delete": true});
        let updated = store
            .set_service_properties(
                "acct",
                ServicePropertiesPatch {
                    account_name: "acct".to_string(),
                    logging: Some(logging.clone()),
                    ..ServicePropertiesPatch::default()
                },
            )
            .unwrap();

        assert_eq!(updated.cors, Some(cors));
        assert_eq!(updated.logging, Some(logging));
    }
}
