use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

use rusqlite::{params, params_from_iter, types::ValueRef, Connection};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    models::write::NewTransaction,
    period::format_date,
    storage::{FinanceStore, Row, SqlParam, StoreError, TransactionId},
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL DEFAULT '',
        default_currency TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS categories (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
        parent_id TEXT REFERENCES categories(id),
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS ledgers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        account_kind TEXT NOT NULL
            CHECK (account_kind IN ('checking', 'savings', 'credit', 'cash', 'investment')),
        balance REAL NOT NULL DEFAULT 0,
        currency TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS budgets (
        id TEXT PRIMARY KEY,
        category_id TEXT NOT NULL REFERENCES categories(id),
        amount REAL NOT NULL,
        period TEXT NOT NULL CHECK (period IN ('monthly', 'weekly', 'yearly')),
        start_date TEXT NOT NULL,
        end_date TEXT,
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
        amount REAL NOT NULL CHECK (amount > 0),
        category_id TEXT NOT NULL REFERENCES categories(id),
        ledger_id TEXT NOT NULL REFERENCES ledgers(id),
        description TEXT NOT NULL DEFAULT '',
        date TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
    CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id);
    CREATE INDEX IF NOT EXISTS idx_transactions_ledger ON transactions(ledger_id);
";

const SEED_INCOME_CATEGORIES: &[&str] = &["Salary", "Other Income"];
const SEED_EXPENSE_CATEGORIES: &[&str] = &[
    "Food",
    "Transport",
    "Housing",
    "Utilities",
    "Entertainment",
    "Health",
    "Shopping",
    "Other",
];

pub struct SqliteStore {
    conn: Mutex<Connection>,
    default_currency: String,
    tx_counter: AtomicU64,
    active_tx: Mutex<Option<TransactionId>>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Other(e.to_string())
}

pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

fn bind_value(p: &SqlParam) -> rusqlite::types::Value {
    match p {
        SqlParam::Null => rusqlite::types::Value::Null,
        SqlParam::Int(i) => rusqlite::types::Value::Integer(*i),
        SqlParam::Real(f) => rusqlite::types::Value::Real(*f),
        SqlParam::Text(s) => rusqlite::types::Value::Text(s.clone()),
    }
}

fn column_value(v: ValueRef) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

impl SqliteStore {
    pub fn new(path: &str, default_currency: &str) -> Result<Self, StoreError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(db_err)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(db_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            default_currency: default_currency.to_string(),
            tx_counter: AtomicU64::new(1),
            active_tx: Mutex::new(None),
        })
    }

    fn seed_defaults(&self, conn: &Connection) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc().to_string();

        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .map_err(db_err)?;
        if users == 0 {
            conn.execute(
                "INSERT INTO users (id, name, email, default_currency, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new_id("user"), "Default User", "", self.default_currency, now],
            )
            .map_err(db_err)?;
        }

        let categories: i64 = conn
            .query_row("SELECT COUNT(*) FROM categories", [], |r| r.get(0))
            .map_err(db_err)?;
        if categories == 0 {
            for name in SEED_INCOME_CATEGORIES {
                conn.execute(
                    "INSERT INTO categories (id, name, kind) VALUES (?1, ?2, 'income')",
                    params![new_id("cat"), name],
                )
                .map_err(db_err)?;
            }
            for name in SEED_EXPENSE_CATEGORIES {
                conn.execute(
                    "INSERT INTO categories (id, name, kind) VALUES (?1, ?2, 'expense')",
                    params![new_id("cat"), name],
                )
                .map_err(db_err)?;
            }
        }

        let ledgers: i64 = conn
            .query_row("SELECT COUNT(*) FROM ledgers", [], |r| r.get(0))
            .map_err(db_err)?;
        if ledgers == 0 {
            conn.execute(
                "INSERT INTO ledgers (id, name, account_kind, balance, currency)
                 VALUES (?1, 'Checking', 'checking', 0, ?2)",
                params![new_id("ledger"), self.default_currency],
            )
            .map_err(db_err)?;
        }

        Ok(())
    }
}

impl FinanceStore for SqliteStore {
    fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        self.seed_defaults(&conn)?;
        tracing::info!("store initialized");
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA optimize;").map_err(db_err)?;
        tracing::info!("store closed");
        Ok(())
    }

    fn fetch_one(&self, sql: &str, params: &[SqlParam]) -> Result<Option<Row>, StoreError> {
        Ok(self.fetch_all(sql, params)?.into_iter().next())
    }

    fn fetch_all(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|c| c.to_string())
            .collect();

        let mut rows = stmt
            .query(params_from_iter(params.iter().map(bind_value)))
            .map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut map = Row::new();
            for (i, name) in columns.iter().enumerate() {
                map.insert(name.clone(), column_value(row.get_ref(i).map_err(db_err)?));
            }
            out.push(map);
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(sql, params_from_iter(params.iter().map(bind_value)))
            .map_err(db_err)
    }

    fn insert_transaction(&self, tx: &NewTransaction) -> Result<String, StoreError> {
        let conn = self.conn.lock().unwrap();
        let id = new_id("txn");
        let now = OffsetDateTime::now_utc().to_string();
        let tags = serde_json::to_string(&tx.tags)
            .map_err(|e| StoreError::Other(e.to_string()))?;

        conn.execute(
            "INSERT INTO transactions
                 (id, kind, amount, category_id, ledger_id, description, date, tags,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                tx.kind.as_str(),
                tx.amount,
                tx.category_id,
                tx.ledger_id,
                tx.description,
                format_date(tx.date),
                tags,
                now
            ],
        )
        .map_err(db_err)?;

        Ok(id)
    }

    fn begin_transaction(&self) -> Result<TransactionId, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("SAVEPOINT finsight_tx").map_err(db_err)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        *self.active_tx.lock().unwrap() = Some(tx_id);
        tracing::debug!(tx_id, "transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StoreError> {
        let mut active = self.active_tx.lock().unwrap();
        if *active != Some(tx_id) {
            return Err(StoreError::NoActiveTransaction);
        }
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("RELEASE SAVEPOINT finsight_tx")
            .map_err(db_err)?;
        *active = None;
        tracing::debug!(tx_id, "transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StoreError> {
        let mut active = self.active_tx.lock().unwrap();
        if *active != Some(tx_id) {
            return Err(StoreError::NoActiveTransaction);
        }
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("ROLLBACK TO SAVEPOINT finsight_tx; RELEASE SAVEPOINT finsight_tx;")
            .map_err(db_err)?;
        *active = None;
        tracing::debug!(tx_id, "transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionKind;
    use crate::storage::{row_f64, row_str};
    use time::macros::date;

    fn open() -> SqliteStore {
        let store = SqliteStore::new(":memory:", "USD").unwrap();
        store.initialize().unwrap();
        store
    }

    fn any_category(store: &SqliteStore) -> String {
        let row = store
            .fetch_one(
                "SELECT id FROM categories WHERE kind = 'expense' LIMIT 1",
                &[],
            )
            .unwrap()
            .unwrap();
        row_str(&row, "id")
    }

    fn any_ledger(store: &SqliteStore) -> String {
        let row = store
            .fetch_one("SELECT id FROM ledgers LIMIT 1", &[])
            .unwrap()
            .unwrap();
        row_str(&row, "id")
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let store = open();
        store.initialize().unwrap();
        let row = store
            .fetch_one("SELECT COUNT(*) AS n FROM users", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row_f64(&row, "n"), 1.0);
    }

    #[test]
    fn test_insert_and_fetch_transaction() {
        let store = open();
        let id = store
            .insert_transaction(&NewTransaction {
                kind: TransactionKind::Expense,
                amount: 12.5,
                category_id: any_category(&store),
                ledger_id: any_ledger(&store),
                description: "coffee".to_string(),
                date: date!(2026 - 08 - 01),
                tags: vec!["cafe".to_string()],
            })
            .unwrap();

        let row = store
            .fetch_one(
                "SELECT amount, description, date FROM transactions WHERE id = ?",
                &[SqlParam::from(id)],
            )
            .unwrap()
            .unwrap();
        assert_eq!(row_f64(&row, "amount"), 12.5);
        assert_eq!(row_str(&row, "description"), "coffee");
        assert_eq!(row_str(&row, "date"), "2026-08-01");
    }

    #[test]
    fn test_missing_category_is_a_store_failure() {
        let store = open();
        let result = store.insert_transaction(&NewTransaction {
            kind: TransactionKind::Expense,
            amount: 5.0,
            category_id: "cat_does_not_exist".to_string(),
            ledger_id: any_ledger(&store),
            description: String::new(),
            date: date!(2026 - 08 - 01),
            tags: Vec::new(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_rollback_discards_insert() {
        let store = open();
        let category = any_category(&store);
        let ledger = any_ledger(&store);

        let tx_id = store.begin_transaction().unwrap();
        store
            .insert_transaction(&NewTransaction {
                kind: TransactionKind::Income,
                amount: 100.0,
                category_id: category,
                ledger_id: ledger,
                description: "paycheck".to_string(),
                date: date!(2026 - 08 - 15),
                tags: Vec::new(),
            })
            .unwrap();
        store.rollback_transaction(tx_id).unwrap();

        let row = store
            .fetch_one("SELECT COUNT(*) AS n FROM transactions", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row_f64(&row, "n"), 0.0);
    }
}
