use serde::Deserialize;
use serde_json::Value;
use time::Date;

use crate::{
    config::Config,
    error::ToolError,
    models::{
        read::{BatchItemResult, BatchResult, BatchSummary},
        write::NewTransaction,
        TransactionKind,
    },
    period::parse_date,
    storage::{row_str, FinanceStore, SqlParam},
};

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub transactions: Vec<Value>,
    #[serde(default)]
    pub validate_only: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawItem {
    #[serde(rename = "type")]
    kind: Option<String>,
    amount: Option<f64>,
    category_id: Option<String>,
    #[serde(default)]
    ledger_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

fn category_exists(store: &dyn FinanceStore, id: &str) -> Result<bool, ToolError> {
    Ok(store
        .fetch_one(
            "SELECT id FROM categories WHERE id = ?",
            &[SqlParam::from(id)],
        )?
        .is_some())
}

fn ledger_exists(store: &dyn FinanceStore, id: &str) -> Result<bool, ToolError> {
    Ok(store
        .fetch_one("SELECT id FROM ledgers WHERE id = ?", &[SqlParam::from(id)])?
        .is_some())
}

fn default_ledger(store: &dyn FinanceStore) -> Result<Option<String>, ToolError> {
    Ok(store
        .fetch_one(
            "SELECT id FROM ledgers WHERE is_active = 1 ORDER BY id ASC LIMIT 1",
            &[],
        )?
        .map(|row| row_str(&row, "id")))
}

/// Validate one raw item into an insertable transaction. Every check
/// reports through the item's own error slot so one bad row never
/// poisons its neighbors.
fn validate_item(
    store: &dyn FinanceStore,
    today: Date,
    fallback_ledger: &Option<String>,
    raw: &Value,
) -> Result<NewTransaction, ToolError> {
    let item: RawItem = serde_json::from_value(raw.clone())
        .map_err(|e| ToolError::Validation(format!("malformed transaction: {e}")))?;

    let kind = match item.kind.as_deref() {
        Some(k) => {
            TransactionKind::parse(k).ok_or_else(|| ToolError::unknown("type", k))?
        }
        None => return Err(ToolError::Validation("type is required".to_string())),
    };

    let amount = item
        .amount
        .ok_or_else(|| ToolError::Validation("amount is required".to_string()))?;
    if !(amount > 0.0) {
        return Err(ToolError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }

    let category_id = item
        .category_id
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ToolError::Validation("category_id is required".to_string()))?;
    if !category_exists(store, &category_id)? {
        return Err(ToolError::not_found("category", &category_id));
    }

    let ledger_id = match item.ledger_id.filter(|l| !l.trim().is_empty()) {
        Some(id) => {
            if !ledger_exists(store, &id)? {
                return Err(ToolError::not_found("ledger", &id));
            }
            id
        }
        None => fallback_ledger
            .clone()
            .ok_or_else(|| ToolError::Validation("no active ledger available".to_string()))?,
    };

    let date = match item.date.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => today,
    };

    Ok(NewTransaction {
        kind,
        amount,
        category_id,
        ledger_id,
        description: item.description.unwrap_or_default(),
        date,
        tags: item.tags.unwrap_or_default(),
    })
}

/// Create transactions in bulk with per-item isolation. With
/// `validate_only` every item is checked but nothing is written.
pub fn batch_create_transactions(
    store: &dyn FinanceStore,
    config: &Config,
    today: Date,
    req: &BatchRequest,
) -> Result<BatchResult, ToolError> {
    let max = config.defaults.max_batch_size;
    if req.transactions.len() > max {
        return Err(ToolError::Validation(format!(
            "batch size {} exceeds the limit of {max}",
            req.transactions.len()
        )));
    }

    let fallback_ledger = default_ledger(store)?;
    let tx = if req.validate_only {
        None
    } else {
        Some(store.begin_transaction()?)
    };

    let mut results = Vec::with_capacity(req.transactions.len());
    let mut succeeded = 0usize;
    for (index, raw) in req.transactions.iter().enumerate() {
        let outcome = validate_item(store, today, &fallback_ledger, raw).and_then(|txn| {
            if req.validate_only {
                Ok(None)
            } else {
                store.insert_transaction(&txn).map(Some).map_err(Into::into)
            }
        });
        match outcome {
            Ok(id) => {
                succeeded += 1;
                results.push(BatchItemResult {
                    index,
                    status: if req.validate_only { "valid" } else { "created" }.to_string(),
                    id,
                    error: None,
                });
            }
            Err(err) => results.push(BatchItemResult {
                index,
                status: "error".to_string(),
                id: None,
                error: Some(err.to_string()),
            }),
        }
    }

    if let Some(tx) = tx {
        store.commit_transaction(tx)?;
    }

    let total = req.transactions.len();
    Ok(BatchResult {
        validate_only: req.validate_only,
        results,
        summary: BatchSummary {
            total,
            succeeded,
            failed: total - succeeded,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_item_tolerates_missing_fields() {
        let item: RawItem = serde_json::from_value(json!({"type": "expense"})).unwrap();
        assert_eq!(item.kind.as_deref(), Some("expense"));
        assert!(item.amount.is_none());
        assert!(item.tags.is_none());
    }
}
