//! Read-heavy personal finance engine: a SQLite-backed store queried
//! through a small tool protocol, with aggregation, insight, and
//! export operations on top.

pub mod analytics;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod period;
pub mod query;
pub mod report;
pub mod sqlite_store;
pub mod storage;
