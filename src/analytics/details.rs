use serde::Deserialize;
use serde_json::{json, Value};
use time::Date;

use crate::{
    analytics::round2,
    error::ToolError,
    period::month_to_date,
    query::expand_tags,
    storage::{row_f64, row_str, FinanceStore, SqlParam},
};

#[derive(Debug, Deserialize)]
pub struct RecordDetailsRequest {
    pub record_type: String,
    pub record_id: String,
    #[serde(default)]
    pub include_related: bool,
}

const TRANSACTION_SELECT: &str = "
    SELECT t.id, t.kind, t.amount, t.category_id,
           COALESCE(c.name, '') AS category_name,
           t.ledger_id, COALESCE(l.name, '') AS ledger_name,
           t.description, t.date, t.tags, t.created_at, t.updated_at
    FROM transactions t
    LEFT JOIN categories c ON c.id = t.category_id
    LEFT JOIN ledgers l ON l.id = t.ledger_id";

/// Fetch one entity by id with its joined display fields, failing
/// NotFound when the id is absent.
pub fn record_details(
    store: &dyn FinanceStore,
    today: Date,
    req: &RecordDetailsRequest,
) -> Result<Value, ToolError> {
    match req.record_type.as_str() {
        "transaction" => transaction_details(store, &req.record_id, req.include_related),
        "ledger_record" => ledger_details(store, &req.record_id, req.include_related),
        "budget_snapshot" => budget_snapshot(store, today, &req.record_id, req.include_related),
        other => Err(ToolError::unknown("record_type", other)),
    }
}

fn transaction_details(
    store: &dyn FinanceStore,
    id: &str,
    include_related: bool,
) -> Result<Value, ToolError> {
    let sql = format!("{TRANSACTION_SELECT} WHERE t.id = ?");
    let mut row = store
        .fetch_one(&sql, &[SqlParam::from(id)])?
        .ok_or_else(|| ToolError::not_found("transaction", id))?;
    expand_tags(&mut row);

    let mut out = json!({ "transaction": Value::Object(row.clone()) });
    if include_related {
        // Five most recent siblings in the same category, self excluded.
        let related_sql = format!(
            "{TRANSACTION_SELECT}
             WHERE t.category_id = ? AND t.id != ?
             ORDER BY t.date DESC, t.id DESC
             LIMIT 5"
        );
        let mut related = store.fetch_all(
            &related_sql,
            &[
                SqlParam::from(row_str(&row, "category_id")),
                SqlParam::from(id),
            ],
        )?;
        for r in related.iter_mut() {
            expand_tags(r);
        }
        out["related_transactions"] = Value::Array(related.into_iter().map(Value::Object).collect());
    }
    Ok(out)
}

fn ledger_details(
    store: &dyn FinanceStore,
    id: &str,
    include_related: bool,
) -> Result<Value, ToolError> {
    let row = store
        .fetch_one(
            "SELECT id, name, account_kind, balance, currency, is_active
             FROM ledgers WHERE id = ?",
            &[SqlParam::from(id)],
        )?
        .ok_or_else(|| ToolError::not_found("ledger", id))?;

    let mut out = json!({ "ledger": Value::Object(row) });
    if include_related {
        let sql = format!(
            "{TRANSACTION_SELECT}
             WHERE t.ledger_id = ?
             ORDER BY t.date DESC, t.id DESC
             LIMIT 10"
        );
        let mut recent = store.fetch_all(&sql, &[SqlParam::from(id)])?;
        for r in recent.iter_mut() {
            expand_tags(r);
        }
        out["recent_transactions"] = Value::Array(recent.into_iter().map(Value::Object).collect());
    }
    Ok(out)
}

fn budget_snapshot(
    store: &dyn FinanceStore,
    today: Date,
    id: &str,
    include_related: bool,
) -> Result<Value, ToolError> {
    let row = store
        .fetch_one(
            "SELECT b.id, b.category_id, COALESCE(c.name, '') AS category_name,
                    b.amount, b.period, b.start_date, b.end_date, b.is_active
             FROM budgets b
             LEFT JOIN categories c ON c.id = b.category_id
             WHERE b.id = ?",
            &[SqlParam::from(id)],
        )?
        .ok_or_else(|| ToolError::not_found("budget", id))?;

    let mut out = json!({ "budget": Value::Object(row.clone()) });
    if include_related {
        // Current-month daily spend against the budget's category.
        let window = month_to_date(today);
        let rows = store.fetch_all(
            "SELECT date, SUM(amount) AS total
             FROM transactions
             WHERE kind = 'expense' AND category_id = ? AND date >= ? AND date <= ?
             GROUP BY date
             ORDER BY date ASC",
            &[
                SqlParam::from(row_str(&row, "category_id")),
                SqlParam::from(window.start_str()),
                SqlParam::from(window.end_str()),
            ],
        )?;
        out["daily_spending"] = Value::Array(
            rows.iter()
                .map(|r| {
                    json!({
                        "date": row_str(r, "date"),
                        "total": round2(row_f64(r, "total")),
                    })
                })
                .collect(),
        );
    }
    Ok(out)
}
