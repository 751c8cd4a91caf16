use rusqlite::{Connection, params_from_iter};
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// One durable collection: a named, disk-backed set of JSON documents keyed
/// by one or more natural-key columns (`addCollection(name, {indices,
/// unique})`). Filtering, sorting and pagination over a collection's
/// contents happen in memory (see `QueryBuilder`) once the relevant rows
/// have been fetched by an indexed key match.
pub struct Collection {
    conn: Arc<Mutex<Connection>>,
    name: String,
    key_columns: Vec<String>,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Collection {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, name: impl Into<String>, key_columns: &[&str]) -> Self {
        Self {
            conn,
            name: name.into(),
            key_columns: key_columns.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn table_ident(&self) -> String {
        quote_ident(&self.name)
    }

    fn key_where_clause(&self, up_to: usize) -> String {
        self.key_columns[..up_to]
            .iter()
            .map(|c| format!("{} = ?", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Insert a new document. Fails (via a `rusqlite::Error` wrapping a
    /// UNIQUE-constraint violation) if the key already exists — callers that
    /// need "already exists" semantics check existence first via
    /// `find_one`.
    pub fn insert(&self, key: &[&str], doc: &serde_json::Value) -> Result<()> {
        assert_eq!(key.len(), self.key_columns.len());
        let conn = self.conn.lock().unwrap();
        let cols: Vec<String> = self.key_columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders = vec!["?"; cols.len() + 1].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}, doc) VALUES ({})",
            self.table_ident(),
            cols.join(", "),
            placeholders
        );
        let doc_text = serde_json::to_string(doc).expect("doc is always serializable");
        let mut bound: Vec<&dyn rusqlite::ToSql> = key.iter().map(|k| k as &dyn rusqlite::ToSql).collect();
        bound.push(&doc_text);
        conn.execute(&sql, params_from_iter(bound))?;
        Ok(())
    }

    /// Replace the document for an existing key. No-ops (reports zero rows
    /// updated) if the key is absent; callers check existence themselves.
    pub fn update(&self, key: &[&str], doc: &serde_json::Value) -> Result<bool> {
        assert_eq!(key.len(), self.key_columns.len());
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "UPDATE {} SET doc = ? WHERE {}",
            self.table_ident(),
            self.key_where_clause(self.key_columns.len())
        );
        let doc_text = serde_json::to_string(doc).expect("doc is always serializable");
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&doc_text];
        bound.extend(key.iter().map(|k| k as &dyn rusqlite::ToSql));
        let n = conn.execute(&sql, params_from_iter(bound))?;
        Ok(n > 0)
    }

    pub fn remove(&self, key: &[&str]) -> Result<bool> {
        assert_eq!(key.len(), self.key_columns.len());
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.table_ident(),
            self.key_where_clause(self.key_columns.len())
        );
        let n = conn.execute(&sql, params_from_iter(key.iter()))?;
        Ok(n > 0)
    }

    pub fn find_one(&self, key: &[&str]) -> Result<Option<serde_json::Value>> {
        assert!(key.len() <= self.key_columns.len());
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT doc FROM {} WHERE {}",
            self.table_ident(),
            self.key_where_clause(key.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(key.iter()))?;
        if let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&text).expect("stored doc is valid JSON")))
        } else {
            Ok(None)
        }
    }

    /// Unique-field lookup, `by(uniqueField, value)`. This implementation
    /// only supports looking up by the collection's declared key prefix,
    /// which is sufficient for every caller in this crate (the service
    /// properties collection, keyed solely by `accountName`).
    pub fn by(&self, value: &str) -> Result<Option<serde_json::Value>> {
        self.find_one(&[value])
    }

    /// All documents whose leading key columns match `prefix`, in no
    /// particular order — ordering and further filtering happen in memory
    /// via `QueryBuilder`.
    pub fn scan_prefix(&self, prefix: &[&str]) -> Result<Vec<serde_json::Value>> {
        assert!(prefix.len() <= self.key_columns.len());
        let conn = self.conn.lock().unwrap();
        let sql = if prefix.is_empty() {
            format!("SELECT doc FROM {}", self.table_ident())
        } else {
            format!(
                "SELECT doc FROM {} WHERE {}",
                self.table_ident(),
                self.key_where_clause(prefix.len())
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(prefix.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            out.push(serde_json::from_str(&text).expect("stored doc is valid JSON"));
        }
        Ok(out)
    }

    pub fn scan_all(&self) -> Result<Vec<serde_json::Value>> {
        self.scan_prefix(&[])
    }
}

/// A chainable, in-memory query builder over an already-fetched slice of
/// records, supporting a `find`/`where`/`sort`/`limit` chain. The paginated
/// query engine is this crate's only caller.
pub struct QueryBuilder<T> {
    items: Vec<T>,
}

impl<T> QueryBuilder<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn where_pred(mut self, pred: impl Fn(&T) -> bool) -> Self {
        self.items.retain(pred);
        self
    }

    pub fn sort_by(mut self, cmp: impl FnMut(&T, &T) -> std::cmp::Ordering) -> Self {
        self.items.sort_by(cmp);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.items.truncate(n);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}
