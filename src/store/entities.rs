//! Entity operations: insert/insertOrUpdate/insertOrMerge/update/merge/
//! delete, with ETag optimistic concurrency and batch-scoped undo logging.

use chrono::Utc;

use super::DataStore;
use crate::error::{Result, TableStoreError};
use crate::model::{Entity, PropertyMap};

/// The subset of an entity a merge supplies: the primary key plus the
/// properties to overlay. `properties` may contain `<name>@odata.type`
/// companion keys, synchronised onto the stored entity alongside their base
/// key.
#[derive(Debug, Clone)]
pub struct EntityPatch {
    pub partition_key: String,
    pub row_key: String,
    pub properties: PropertyMap,
}

/// Replace up to the first two `:` in `s` with `%3A` — the URL-encoding
/// quirk the update/merge ETag comparison requires, bounded at two
/// replacements.
fn urlencode_first_two_colons(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut replaced = 0;
    for c in s.chars() {
        if c == ':' && replaced < 2 {
            out.push_str("%3A");
            replaced += 1;
        } else {
            out.push(c);
        }
    }
    out
}

/// ETag compare used by update/merge: both sides URL-encoded before
/// comparison.
fn check_etag_urlencoded(stored: &str, if_match: Option<&str>) -> Result<()> {
    match if_match {
        None | Some("*") => Ok(()),
        Some(tag) => {
            if urlencode_first_two_colons(stored) == urlencode_first_two_colons(tag) {
                Ok(())
            } else {
                Err(TableStoreError::PreconditionFailed)
            }
        }
    }
}

/// ETag compare used by delete: raw, unencoded — intentionally asymmetric
/// with update/merge's URL-encoded comparison (see DESIGN.md).
fn check_etag_raw(stored: &str, if_match: Option<&str>) -> Result<()> {
    match if_match {
        None | Some("*") => Ok(()),
        Some(tag) => {
            if stored == tag {
                Ok(())
            } else {
                Err(TableStoreError::PreconditionFailed)
            }
        }
    }
}

fn generate_etag(ts: chrono::DateTime<Utc>) -> String {
    format!("W/\"{}\"", crate::model::format_timestamp(ts))
}

fn batch_id_active(batch_id: Option<&str>) -> bool {
    matches!(batch_id, Some(id) if !id.is_empty())
}

impl DataStore {
    pub fn insert_entity(
        &self,
        account: &str,
        table: &str,
        mut entity: Entity,
        batch_id: Option<&str>,
    ) -> Result<Entity> {
        let coll = self.entity_collection(account, table)?;
        if coll.find_one(&[&entity.partition_key, &entity.row_key])?.is_some() {
            return Err(TableStoreError::EntityAlreadyExists {
                partition_key: entity.partition_key,
                row_key: entity.row_key,
            });
        }
        let now = Utc::now();
        entity.touch(now);
        entity.e_tag = generate_etag(now);
        coll.insert(
            &[&entity.partition_key, &entity.row_key],
            &serde_json::to_value(&entity)?,
        )?;
        if batch_id_active(batch_id) {
            self.batch.lock().unwrap().inserted_during_batch.push(entity.clone());
        }
        Ok(entity)
    }

    pub fn insert_or_update_entity(
        &self,
        account: &str,
        table: &str,
        entity: Entity,
        if_match: Option<&str>,
        batch_id: Option<&str>,
    ) -> Result<Entity> {
        let dispatch_to_update = if if_match.is_none() || if_match == Some("*") {
            let coll = self.entity_collection(account, table)?;
            coll.find_one(&[&entity.partition_key, &entity.row_key])?.is_some()
        } else {
            true
        };
        if dispatch_to_update {
            self.update_entity(account, table, entity, if_match, batch_id)
        } else {
            self.insert_entity(account, table, entity, batch_id)
        }
    }

    pub fn insert_or_merge_entity(
        &self,
        account: &str,
        table: &str,
        patch: EntityPatch,
        if_match: Option<&str>,
        batch_id: Option<&str>,
    ) -> Result<Entity> {
        // Existence is a function of the committed store only, same as
        // `insert_or_update_entity` — `batch_id` plays no part in the probe.
        let dispatch_to_merge = if if_match.is_none() || if_match == Some("*") {
            let coll = self.entity_collection(account, table)?;
            coll.find_one(&[&patch.partition_key, &patch.row_key])?.is_some()
        } else {
            true
        };
        if dispatch_to_merge {
            self.merge_entity(account, table, patch, if_match, batch_id)
        } else {
            let entity = Entity {
                partition_key: patch.partition_key,
                row_key: patch.row_key,
                properties: patch.properties,
                last_modified_time: Utc::now(),
                e_tag: String::new(),
            };
            self.insert_entity(account, table, entity, batch_id)
        }
    }

    pub fn update_entity(
        &self,
        account: &str,
        table: &str,
        mut new_entity: Entity,
        if_match: Option<&str>,
        batch_id: Option<&str>,
    ) -> Result<Entity> {
        let coll = self.entity_collection(account, table)?;
        let existing_doc = coll
            .find_one(&[&new_entity.partition_key, &new_entity.row_key])?
            .ok_or(TableStoreError::EntityNotFound)?;
        let existing: Entity = serde_json::from_value(existing_doc)?;
        check_etag_urlencoded(&existing.e_tag, if_match)?;

        if batch_id_active(batch_id) {
            self.batch.lock().unwrap().rollback_pre_images.push(existing);
        }

        let now = Utc::now();
        new_entity.touch(now);
        new_entity.e_tag = generate_etag(now);
        coll.update(
            &[&new_entity.partition_key, &new_entity.row_key],
            &serde_json::to_value(&new_entity)?,
        )?;
        Ok(new_entity)
    }

    pub fn merge_entity(
        &self,
        account: &str,
        table: &str,
        patch: EntityPatch,
        if_match: Option<&str>,
        batch_id: Option<&str>,
    ) -> Result<Entity> {
        let coll = self.entity_collection(account, table)?;
        let existing_doc = coll
            .find_one(&[&patch.partition_key, &patch.row_key])?
            .ok_or(TableStoreError::EntityNotFound)?;
        let mut existing: Entity = serde_json::from_value(existing_doc)?;
        check_etag_urlencoded(&existing.e_tag, if_match)?;

        if batch_id_active(batch_id) {
            self.batch.lock().unwrap().rollback_pre_images.push(existing.clone());
        }

        for (key, value) in patch.properties.iter() {
            if PropertyMap::is_type_tag(key) {
                continue;
            }
            existing.properties.set(key.clone(), value.clone());
            let tag_key = PropertyMap::type_tag_key(key);
            match patch.properties.get(&tag_key) {
                Some(tag_value) => existing.properties.set(tag_key, tag_value.clone()),
                None => existing.properties.remove(&tag_key),
            }
        }

        let now = Utc::now();
        existing.touch(now);
        existing.e_tag = generate_etag(now);
        coll.update(
            &[&existing.partition_key, &existing.row_key],
            &serde_json::to_value(&existing)?,
        )?;
        Ok(existing)
    }

    pub fn delete_entity(
        &self,
        account: &str,
        table: &str,
        partition_key: Option<&str>,
        row_key: Option<&str>,
        if_match: Option<&str>,
        batch_id: Option<&str>,
    ) -> Result<()> {
        let (partition_key, row_key) = match (partition_key, row_key) {
            (Some(pk), Some(rk)) if !pk.is_empty() && !rk.is_empty() => (pk, rk),
            _ => return Err(TableStoreError::PropertiesNeedValue),
        };
        let coll = self.entity_collection(account, table)?;
        let existing_doc = coll
            .find_one(&[partition_key, row_key])?
            .ok_or(TableStoreError::EntityNotFound)?;
        let existing: Entity = serde_json::from_value(existing_doc)?;
        check_etag_raw(&existing.e_tag, if_match)?;

        if batch_id_active(batch_id) {
            self.batch.lock().unwrap().rollback_pre_images.push(existing);
        }

        coll.remove(&[partition_key, row_key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::model::PropertyValue;

    async fn fresh_store_with_table() -> DataStore {
        crate::init_test_tracing();
        let store = DataStore::init(StoreConfig {
            db_path: ":memory:".to_string(),
            ..StoreConfig::default()
        })
        .await
        .unwrap();
        store.create_table("acct", "t", None).unwrap();
        store
    }

    fn entity(pk: &str, rk: &str, props: &[(&str, PropertyValue)]) -> Entity {
        let mut properties = PropertyMap::new();
        for (k, v) in props {
            properties.set(*k, v.clone());
        }
        Entity {
            partition_key: pk.to_string(),
            row_key: rk.to_string(),
            properties,
            last_modified_time: Utc::now(),
            e_tag: String::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_read_stamps_timestamp() {
        let store = fresh_store_with_table().await;
        let inserted = store
            .insert_entity("acct", "t", entity("p", "r", &[("x", PropertyValue::Number(1.0))]), None)
            .unwrap();
        assert_eq!(
            inserted.properties.get("Timestamp@odata.type"),
            Some(&PropertyValue::String("Edm.DateTime".to_string()))
        );
        let coll = store.entity_collection("acct", "t").unwrap();
        let fetched: Entity = serde_json::from_value(coll.find_one(&["p", "r"]).unwrap().unwrap()).unwrap();
        assert_eq!(fetched.properties.get("x"), Some(&PropertyValue::Number(1.0)));
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = fresh_store_with_table().await;
        store.insert_entity("acct", "t", entity("p", "r", &[]), None).unwrap();
        let err = store.insert_entity("acct", "t", entity("p", "r", &[]), None).unwrap_err();
        assert!(matches!(err, TableStoreError::EntityAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn etag_mismatch_on_update_fails_precondition() {
        let store = fresh_store_with_table().await;
        store.insert_entity("acct", "t", entity("p", "r", &[]), None).unwrap();
        let err = store
            .update_entity("acct", "t", entity("p", "r", &[]), Some("W/\"2\""), None)
            .unwrap_err();
        assert!(matches!(err, TableStoreError::PreconditionFailed));
    }

    #[tokio::test]
    async fn etag_wildcard_bypasses_precondition() {
        let store = fresh_store_with_table().await;
        store.insert_entity("acct", "t", entity("p", "r", &[]), None).unwrap();
        let updated = store
            .update_entity(
                "acct",
                "t",
                entity("p", "r", &[("x", PropertyValue::Number(2.0))]),
                Some("*"),
                None,
            )
            .unwrap();
        assert_eq!(updated.properties.get("x"), Some(&PropertyValue::Number(2.0)));
    }

    #[tokio::test]
    async fn merge_overlays_and_tracks_type_tags() {
        let store = fresh_store_with_table().await;
        store
            .insert_entity(
                "acct",
                "t",
                entity(
                    "p",
                    "r",
                    &[
                        ("a", PropertyValue::Number(1.0)),
                        ("b", PropertyValue::String("keep".to_string())),
                    ],
                ),
                None,
            )
            .unwrap();

        let mut patch_props = PropertyMap::new();
        patch_props.set("a", PropertyValue::Number(9.0));
        patch_props.set(PropertyMap::type_tag_key("a"), PropertyValue::String("Edm.Int64".to_string()));
        let patch = EntityPatch {
            partition_key: "p".to_string(),
            row_key: "r".to_string(),
            properties: patch_props,
        };
        let merged = store.merge_entity("acct", "t", patch, None, None).unwrap();
        assert_eq!(merged.properties.get("a"), Some(&PropertyValue::Number(9.0)));
        assert_eq!(
            merged.properties.get("a@odata.type"),
            Some(&PropertyValue::String("Edm.Int64".to_string()))
        );
        assert_eq!(merged.properties.get("b"), Some(&PropertyValue::String("keep".to_string())));
    }

    #[tokio::test]
    async fn delete_requires_both_keys() {
        let store = fresh_store_with_table().await;
        let err = store.delete_entity("acct", "t", Some("p"), None, None, None).unwrap_err();
        assert!(matches!(err, TableStoreError::PropertiesNeedValue));
    }

    #[tokio::test]
    async fn delete_compares_etag_raw_not_urlencoded() {
        let store = fresh_store_with_table().await;
        let inserted = store.insert_entity("acct", "t", entity("p", "r", &[]), None).unwrap();
        // The raw stored ETag (with an un-encoded `:`) must be supplied
        // verbatim; a URL-encoded form that update/merge would accept must
        // fail here — delete's comparison is intentionally not URL-encoded.
        let encoded = inserted.e_tag.replacen(':', "%3A", 2);
        assert_ne!(encoded, inserted.e_tag);
        let err = store
            .delete_entity("acct", "t", Some("p"), Some("r"), Some(&encoded), None)
            .unwrap_err();
        assert!(matches!(err, TableStoreError::PreconditionFailed));
        store
            .delete_entity("acct", "t", Some("p"), Some("r"), Some(&inserted.e_tag), None)
            .unwrap();
    }

    #[tokio::test]
    async fn insert_or_update_dispatches_by_existence_when_ifmatch_absent() {
        let store = fresh_store_with_table().await;
        let inserted = store
            .insert_or_update_entity("acct", "t", entity("p", "r", &[]), None, None)
            .unwrap();
        assert!(!inserted.e_tag.is_empty());
        let updated = store
            .insert_or_update_entity(
                "acct",
                "t",
                entity("p", "r", &[("x", PropertyValue::Number(5.0))]),
                None,
                None,
            )
            .unwrap();
        assert_eq!(updated.properties.get("x"), Some(&PropertyValue::Number(5.0)));
    }
}
