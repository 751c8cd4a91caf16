//! Paginated query engine: `top+1` probing, per-key Base64 continuation
//! tokens, and the two query entry points.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{Result, TableStoreError};
use crate::model::{Entity, Table};
use crate::query::{self, QueryMode};

use super::DataStore;

/// One page of results plus (if the underlying set had more) the token to
/// resume from. Continuation is encoded per-key, not as one composite token.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation: Option<Continuation>,
}

/// Both variants hold Base64(UTF-8)-encoded key material, never the raw
/// key — the same wire representation `continuation_token` inputs decode
/// from and `encode_continuation_key`/`decode_continuation_key` expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    Table {
        next_table_name: String,
    },
    Entity {
        next_partition_key: String,
        next_row_key: String,
    },
}

pub fn encode_continuation_key(raw: &str) -> String {
    STANDARD.encode(raw.as_bytes())
}

pub fn decode_continuation_key(token: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(token)
        .map_err(|_| TableStoreError::QueryConditionInvalid("invalid continuation token".to_string()))?;
    String::from_utf8(bytes).map_err(|_| TableStoreError::QueryConditionInvalid("invalid continuation token".to_string()))
}

impl DataStore {
    /// List tables for `account`, optionally OData-filtered, ordered by
    /// table name, paginated via `top`/`continuation_token`.
    pub fn query_tables(
        &self,
        account: &str,
        filter: &str,
        top: Option<u32>,
        continuation_token: Option<&str>,
    ) -> Result<Page<Table>> {
        let pred = query::compile::<Table>(filter, QueryMode::TableName)?;
        let top = top.unwrap_or(self.config.query_page_default_top).min(self.config.query_result_max_num) as usize;

        let mut rows: Vec<Table> = self
            .tables
            .scan_prefix(&[account])?
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?;
        rows.sort_by(|a, b| a.table.cmp(&b.table));
        rows.retain(|t| pred(t));

        if let Some(token) = continuation_token {
            let resume_after = decode_continuation_key(token)?;
            rows.retain(|t| t.table > resume_after);
        }

        let mut probe: Vec<Table> = rows.into_iter().take(top + 1).collect();
        let continuation = if probe.len() > top {
            probe.truncate(top);
            probe.last().map(|t| Continuation::Table {
                next_table_name: encode_continuation_key(&t.table),
            })
        } else {
            None
        };
        Ok(Page { items: probe, continuation })
    }

    /// List entities within `(account, table)`, optionally OData-filtered,
    /// ordered by `(PartitionKey, RowKey)`, paginated via `top`/
    /// `continuation_token`.
    pub fn query_entities(
        &self,
        account: &str,
        table: &str,
        filter: &str,
        top: Option<u32>,
        continuation_token: Option<&Continuation>,
    ) -> Result<Page<Entity>> {
        let pred = query::compile::<Entity>(filter, QueryMode::Entity)?;
        let top = top.unwrap_or(self.config.query_page_default_top).min(self.config.query_result_max_num) as usize;

        let coll = self.entity_collection(account, table)?;
        let mut rows: Vec<Entity> = coll
            .scan_all()?
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?;
        rows.sort_by(|a, b| (&a.partition_key, &a.row_key).cmp(&(&b.partition_key, &b.row_key)));
        rows.retain(|e| pred(e));

        if let Some(Continuation::Entity {
            next_partition_key,
            next_row_key,
        }) = continuation_token
        {
            let next_partition_key = decode_continuation_key(next_partition_key)?;
            let next_row_key = decode_continuation_key(next_row_key)?;
            rows.retain(|e| (&e.partition_key, &e.row_key) > (&next_partition_key, &next_row_key));
        }

        let mut probe: Vec<Entity> = rows.into_iter().take(top + 1).collect();
        let continuation = if probe.len() > top {
            probe.truncate(top);
            probe.last().map(|e| Continuation::Entity {
                next_partition_key: encode_continuation_key(&e.partition_key),
                next_row_key: encode_continuation_key(&e.row_key),
            })
        } else {
            None
        };
        Ok(Page { items: probe, continuation })
    }

    /// Single-entity point lookup. Absent is `Ok(None)`, consistent with
    /// `get_table`.
    pub fn get_entity(&self, account: &str, table: &str, partition_key: &str, row_key: &str) -> Result<Option<Entity>> {
        let coll = self.entity_collection(account, table)?;
        match coll.find_one(&[partition_key, row_key])? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }
}
