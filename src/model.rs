use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A dynamically-typed OData property value. Every property is one of
/// these three JSON-native shapes, with richer EDM types (datetime, guid,
/// long) carried as strings plus a companion `@odata.type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Parse this value, assumed to hold an ISO-8601 timestamp string, into
    /// milliseconds since the epoch. Used by the query rewriter when a
    /// custom property is compared against a `datetime'...'` literal.
    pub fn as_datetime_millis(&self) -> Option<i64> {
        let s = self.as_str()?;
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis())
    }
}

/// Ordered name -> value mapping. Order matters for deterministic
/// serialization and for keeping a property's `@odata.type` companion key
/// adjacent to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMap(pub Vec<(String, PropertyValue)>);

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Insert or overwrite `name`, preserving its original position if it
    /// already existed.
    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
        let name = name.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| k != name);
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, PropertyValue)> {
        self.0.iter()
    }

    /// Every key that is a type-tag companion (`<name>@odata.type`) rather
    /// than a data property.
    pub fn is_type_tag(name: &str) -> bool {
        name.ends_with("@odata.type")
    }

    pub fn type_tag_key(name: &str) -> String {
        format!("{name}@odata.type")
    }

    /// Set `properties.Timestamp`/`Timestamp@odata.type` from
    /// `last_modified_time`. Every successful write recomputes `Timestamp`
    /// from the new `last_modified_time` rather than leaving a stale value.
    pub fn stamp_timestamp(&mut self, last_modified_time: DateTime<Utc>) {
        self.set("Timestamp", PropertyValue::String(format_timestamp(last_modified_time)));
        self.set(
            Self::type_tag_key("Timestamp"),
            PropertyValue::String("Edm.DateTime".to_string()),
        );
    }
}

/// Azure Table Storage's wire form for `Edm.DateTime`: ISO-8601 with
/// millisecond precision and a literal `Z` suffix.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A table record. `(account, table)` is its natural key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub account: String,
    pub table: String,
    pub table_acl: Option<serde_json::Value>,
}

impl crate::query::FilterTarget for Table {
    fn system_field(&self, mapped: &str) -> Option<PropertyValue> {
        (mapped == "table").then(|| PropertyValue::String(self.table.clone()))
    }

    fn property(&self, _name: &str) -> Option<PropertyValue> {
        // Table-name queries never reach here: custom properties are
        // rejected at filter-compile time.
        None
    }
}

/// An entity record. `(partition_key, row_key)` is its natural key within
/// one table's entity collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub partition_key: String,
    pub row_key: String,
    pub properties: PropertyMap,
    pub last_modified_time: DateTime<Utc>,
    pub e_tag: String,
}

impl Entity {
    /// Recompute `Timestamp`/`Timestamp@odata.type` and bump
    /// `last_modified_time` in lockstep, the way every successful write
    /// path does (insert/update/merge).
    pub fn touch(&mut self, last_modified_time: DateTime<Utc>) {
        self.last_modified_time = last_modified_time;
        self.properties.stamp_timestamp(last_modified_time);
    }
}

impl crate::query::FilterTarget for Entity {
    fn system_field(&self, mapped: &str) -> Option<PropertyValue> {
        match mapped {
            "PartitionKey" => Some(PropertyValue::String(self.partition_key.clone())),
            "RowKey" => Some(PropertyValue::String(self.row_key.clone())),
            _ => None,
        }
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        self.properties.get(name).cloned()
    }
}

/// Per-account service configuration. The CORS/metrics/logging
/// sub-structures are opaque JSON at this layer — this store persists them
/// but does not interpret them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceProperties {
    pub account_name: String,
    pub cors: Option<serde_json::Value>,
    pub hour_metrics: Option<serde_json::Value>,
    pub minute_metrics: Option<serde_json::Value>,
    pub logging: Option<serde_json::Value>,
}

impl ServiceProperties {
    /// Overlay only the fields that are `Some(..)` in `patch`, leaving the
    /// rest of `self` untouched.
    pub fn apply_patch(&mut self, patch: ServicePropertiesPatch) {
        if patch.cors.is_some() {
            self.cors = patch.cors;
        }
        if patch.hour_metrics.is_some() {
            self.hour_metrics = patch.hour_metrics;
        }
        if patch.minute_metrics.is_some() {
            self.minute_metrics = patch.minute_metrics;
        }
        if patch.logging.is_some() {
            self.logging = patch.logging;
        }
    }
}

/// Input to `setServiceProperties`: same shape as `ServiceProperties` but
/// every sub-structure is optional-as-"leave unchanged", not
/// optional-as-"null the field".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicePropertiesPatch {
    pub account_name: String,
    pub cors: Option<serde_json::Value>,
    pub hour_metrics: Option<serde_json::Value>,
    pub minute_metrics: Option<serde_json::Value>,
    pub logging: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_map_preserves_insertion_order_on_overwrite() {
        let mut props = PropertyMap::new();
        props.set("a", PropertyValue::Number(1.0));
        props.set("b", PropertyValue::Number(2.0));
        props.set("a", PropertyValue::Number(3.0));
        assert_eq!(props.0[0].0, "a");
        assert_eq!(props.0[1].0, "b");
        assert_eq!(props.get("a"), Some(&PropertyValue::Number(3.0)));
    }

    #[test]
    fn stamp_timestamp_sets_type_tag() {
        let mut props = PropertyMap::new();
        let now: DateTime<Utc> = "2024-01-02T03:04:05.000Z".parse().unwrap();
        props.stamp_timestamp(now);
        assert_eq!(
            props.get("Timestamp@odata.type"),
            Some(&PropertyValue::String("Edm.DateTime".to_string()))
        );
        assert_eq!(
            props.get("Timestamp"),
            Some(&PropertyValue::String(format_timestamp(now)))
        );
    }

    #[test]
    fn datetime_millis_parses_rfc3339() {
        let v = PropertyValue::String("2024-01-02T03:04:05Z".to_string());
        assert!(v.as_datetime_millis().is_some());
        let v = PropertyValue::String("not-a-date".to_string());
        assert!(v.as_datetime_millis().is_none());
    }
}
