//! Store backed by a shared wide-column table.
//!
//! The physical layout is one table keyed by `(key text, name bigint)`:
//!
//! ```text
//! CREATE TABLE t (key text, name bigint, value blob, PRIMARY KEY (key, name))
//! ```
//!
//! Opening the network session belongs to the host; this module only needs
//! something implementing [`ColumnSession`]. Every key is namespaced with the
//! store's prefix, so several logical stores (one per index, one for metadata)
//! can share a single table and session.
//!
//! Column indexes are stored bit-for-bit as signed `bigint` names.

use super::Store;
use crate::config::{ColumnConfig, Consistency};
use crate::error::Result;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Statements a wide-column driver must be able to run against the table.
/// Driver failures should be reported as [`crate::Error::Backend`].
pub trait ColumnSession: Send + Sync {
    /// `INSERT INTO t (key, name, value) VALUES (?, ?, ?)`
    fn insert(&self, key: &str, name: i64, value: &[u8], consistency: Consistency) -> Result<()>;

    /// `SELECT value FROM t WHERE key = ? AND name = ?`
    fn select(&self, key: &str, name: i64, consistency: Consistency) -> Result<Option<Vec<u8>>>;

    /// `SELECT value FROM t WHERE key = ?`
    fn select_row(&self, key: &str, consistency: Consistency) -> Result<Vec<Vec<u8>>>;

    /// `SELECT value FROM t WHERE key = ? LIMIT 1`
    fn exists(&self, key: &str, consistency: Consistency) -> Result<bool>;

    /// `DELETE FROM t WHERE key = ?`
    fn delete_row(&self, key: &str, consistency: Consistency) -> Result<()>;

    /// `DELETE FROM t WHERE key = ? AND name = ?`
    fn delete_cell(&self, key: &str, name: i64, consistency: Consistency) -> Result<()>;

    /// `SELECT DISTINCT key FROM t`, optionally narrowed to a key prefix.
    fn keys(&self, prefix: &str, consistency: Consistency) -> Result<Vec<String>>;
}

/// DDL for the table every [`WideColumnStore`] expects.
pub fn create_table_statement(keyspace: &str, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (key text, name bigint, value blob, PRIMARY KEY (key, name))",
        keyspace, table
    )
}

pub struct WideColumnStore<S: ColumnSession> {
    session: Arc<S>,
    config: ColumnConfig,
    /// Rows this process has seen exist. Best effort only: a concurrent delete
    /// from another process is not observed until this process deletes too.
    known: RwLock<HashSet<String>>,
}

impl<S: ColumnSession> WideColumnStore<S> {
    pub fn new(session: Arc<S>, config: ColumnConfig) -> Self {
        Self {
            session,
            config,
            known: RwLock::new(HashSet::new()),
        }
    }

    /// Another logical store sharing this store's session and table.
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        Self::new(
            self.session.clone(),
            ColumnConfig {
                prefix: prefix.into(),
                ..self.config.clone()
            },
        )
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}/{}", self.config.prefix, key)
    }
}

impl<S: ColumnSession> Store for WideColumnStore<S> {
    fn put(&self, key: &str, col: u64, value: &[u8]) -> Result<()> {
        let key = self.prefixed(key);
        self.session
            .insert(&key, col as i64, value, self.config.consistency)?;
        self.known.write().unwrap().insert(key);
        Ok(())
    }

    fn get(&self, key: &str, col: u64) -> Result<Option<Vec<u8>>> {
        self.session
            .select(&self.prefixed(key), col as i64, self.config.consistency)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let key = self.prefixed(key);
        self.session.delete_row(&key, self.config.consistency)?;
        self.known.write().unwrap().remove(&key);
        Ok(())
    }

    fn delete_col(&self, key: &str, col: u64) -> Result<()> {
        let key = self.prefixed(key);
        self.session
            .delete_cell(&key, col as i64, self.config.consistency)?;
        // The row may now be empty; let the next has_key ask the table.
        self.known.write().unwrap().remove(&key);
        Ok(())
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        let key = self.prefixed(key);
        if self.known.read().unwrap().contains(&key) {
            return Ok(true);
        }
        let exists = self.session.exists(&key, self.config.consistency)?;
        if exists {
            self.known.write().unwrap().insert(key);
        }
        Ok(exists)
    }

    fn all_values(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.session
            .select_row(&self.prefixed(key), self.config.consistency)
    }

    fn col_size(&self) -> usize {
        self.config.col_size
    }

    fn all_keys(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.config.prefix);
        Ok(self
            .session
            .keys(&prefix, self.config.consistency)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}
