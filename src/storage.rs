use serde_json::Value;
use thiserror::Error;

use crate::models::write::NewTransaction;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
    #[error("no active transaction")]
    NoActiveTransaction,
}

pub type TransactionId = u64;

/// A result row keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Positional statement parameter. Values are always bound, never
/// interpolated into SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Real(v)
    }
}

/// Capability contract for the relational store: parameterized reads
/// and writes plus savepoint-scoped transactions. Exactly one
/// concrete adapter exists (`SqliteStore`); the engine only talks to
/// this trait.
pub trait FinanceStore: Send + Sync {
    /// Create the schema if missing and seed default rows into empty
    /// tables. Idempotent.
    fn initialize(&self) -> Result<(), StoreError>;

    fn close(&self) -> Result<(), StoreError>;

    fn fetch_one(&self, sql: &str, params: &[SqlParam]) -> Result<Option<Row>, StoreError>;

    fn fetch_all(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, StoreError>;

    fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<usize, StoreError>;

    /// Insert a validated transaction and return its generated id.
    fn insert_transaction(&self, tx: &NewTransaction) -> Result<String, StoreError>;

    fn begin_transaction(&self) -> Result<TransactionId, StoreError>;
    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StoreError>;
    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StoreError>;
}

pub fn row_str(row: &Row, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

pub fn row_opt_str(row: &Row, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

pub fn row_f64(row: &Row, key: &str) -> f64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn row_i64(row: &Row, key: &str) -> i64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}
