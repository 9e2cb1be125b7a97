use serde::Deserialize;
use serde_json::{json, Value};
use time::Date;

use crate::{
    analytics::summary::period_totals,
    error::ToolError,
    period::PeriodSpec,
    query::{self, expand_tags, TransactionFilters},
    storage::FinanceStore,
};

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub export_type: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub filters: Option<TransactionFilters>,
    #[serde(default)]
    pub options: Option<ExportOptions>,
}

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportOptions {
    #[serde(default)]
    pub period: Option<PeriodSpec>,
}

pub fn export_data(
    store: &dyn FinanceStore,
    today: Date,
    req: &ExportRequest,
) -> Result<String, ToolError> {
    let payload = match req.export_type.as_str() {
        "transactions" => export_transactions(store, req.filters.as_ref())?,
        "summary_report" => export_summary(store, today, req.options.as_ref())?,
        "full_backup" => export_backup(store)?,
        other => return Err(ToolError::unknown("export_type", other)),
    };
    render(&payload, &req.format)
}

fn export_transactions(
    store: &dyn FinanceStore,
    filters: Option<&TransactionFilters>,
) -> Result<Value, ToolError> {
    let filters = filters.cloned().unwrap_or_default();
    let pred = query::build_predicate(&None, &filters);
    let sql = format!(
        "SELECT t.id, t.kind, t.amount, t.category_id,
                COALESCE(c.name, '') AS category_name,
                t.ledger_id, COALESCE(l.name, '') AS ledger_name,
                t.description, t.date, t.tags
         FROM transactions t
         LEFT JOIN categories c ON c.id = t.category_id
         LEFT JOIN ledgers l ON l.id = t.ledger_id
         {}
         ORDER BY t.date ASC, t.id ASC",
        pred.where_sql()
    );
    let mut rows = store.fetch_all(&sql, pred.params())?;
    for row in rows.iter_mut() {
        expand_tags(row);
    }
    Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
}

fn export_summary(
    store: &dyn FinanceStore,
    today: Date,
    options: Option<&ExportOptions>,
) -> Result<Value, ToolError> {
    let spec = options
        .and_then(|o| o.period.clone())
        .unwrap_or(PeriodSpec {
            name: Some("this_month".to_string()),
            ..Default::default()
        });
    let window = spec.resolve(today)?;
    period_totals(store, &window, true)
}

fn export_backup(store: &dyn FinanceStore) -> Result<Value, ToolError> {
    let table = |sql: &str| -> Result<Value, ToolError> {
        let rows = store.fetch_all(sql, &[])?;
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    };
    let mut transactions = store.fetch_all(
        "SELECT * FROM transactions ORDER BY date ASC, id ASC",
        &[],
    )?;
    for row in transactions.iter_mut() {
        expand_tags(row);
    }
    Ok(json!({
        "profile": table("SELECT * FROM users ORDER BY created_at ASC")?,
        "categories": table("SELECT * FROM categories ORDER BY id ASC")?,
        "ledgers": table("SELECT * FROM ledgers ORDER BY id ASC")?,
        "budgets": table("SELECT * FROM budgets ORDER BY id ASC")?,
        "transactions": Value::Array(transactions.into_iter().map(Value::Object).collect()),
    }))
}

/// Render a result value in the requested output format.
pub fn render(value: &Value, format: &str) -> Result<String, ToolError> {
    match format {
        "json" => {
            serde_json::to_string_pretty(value).map_err(|e| ToolError::Validation(e.to_string()))
        }
        "csv" => Ok(to_csv(value)),
        "markdown" => Ok(to_markdown(value)),
        other => Err(ToolError::unknown("format", other)),
    }
}

fn csv_cell(value: Option<&Value>) -> String {
    let raw = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    format!("\"{}\"", raw.replace('"', "\"\""))
}

/// Flat arrays of objects only. The header comes from the first
/// record's keys; later records contribute empty cells for keys they
/// lack.
pub fn to_csv(value: &Value) -> String {
    let records = match value {
        Value::Array(records) => records,
        _ => return "CSV export requires a flat record list".to_string(),
    };
    let first = match records.first().and_then(Value::as_object) {
        Some(first) => first,
        None => return String::new(),
    };

    let columns: Vec<&String> = first.keys().collect();
    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(
        columns
            .iter()
            .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(","),
    );
    for record in records {
        let row = record.as_object();
        lines.push(
            columns
                .iter()
                .map(|c| csv_cell(row.and_then(|r| r.get(*c))))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}

/// Financial summary template when the shape fits, JSON otherwise.
pub fn to_markdown(value: &Value) -> String {
    let (period, totals) = match (value.get("period"), value.get("totals")) {
        (Some(p), Some(t)) => (p, t),
        _ => {
            return serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        }
    };

    let num = |v: &Value, key: &str| v.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    let text = |v: &Value, key: &str| {
        v.get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    let mut out = String::new();
    out.push_str("# Financial Summary\n\n");
    out.push_str(&format!(
        "**Period:** {} to {}\n\n",
        text(period, "start"),
        text(period, "end")
    ));
    out.push_str("| Metric | Amount |\n|---|---|\n");
    out.push_str(&format!("| Income | {:.2} |\n", num(totals, "income")));
    out.push_str(&format!("| Expenses | {:.2} |\n", num(totals, "expenses")));
    out.push_str(&format!("| Net | {:.2} |\n", num(totals, "net")));
    out.push_str(&format!(
        "| Transactions | {} |\n",
        totals
            .get("transaction_count")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    ));

    if let Some(Value::Array(breakdown)) = value.get("breakdown") {
        if !breakdown.is_empty() {
            out.push_str("\n## Spending by Category\n\n");
            out.push_str("| Category | Total | Share |\n|---|---|---|\n");
            for row in breakdown {
                out.push_str(&format!(
                    "| {} | {:.2} | {:.2}% |\n",
                    text(row, "category_name"),
                    num(row, "total"),
                    num(row, "percentage")
                ));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_quotes_every_cell_and_doubles_quotes() {
        let value = json!([
            {"id": "txn_1", "description": "coffee \"large\"", "amount": 4.5},
            {"id": "txn_2", "description": "lunch", "amount": 12.0},
        ]);
        let csv = to_csv(&value);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "\"amount\",\"description\",\"id\"");
        assert!(lines[1].contains("\"coffee \"\"large\"\"\""));
        assert!(lines[2].contains("\"12.0\""));
    }

    #[test]
    fn test_csv_missing_keys_are_empty_cells() {
        let value = json!([
            {"a": "x", "b": "y"},
            {"a": "z"},
        ]);
        let csv = to_csv(&value);
        assert_eq!(csv.lines().last().unwrap(), "\"z\",\"\"");
    }

    #[test]
    fn test_csv_rejects_non_array() {
        let csv = to_csv(&json!({"not": "a list"}));
        assert!(csv.contains("flat record list"));
    }

    #[test]
    fn test_markdown_summary_template() {
        let value = json!({
            "period": {"start": "2026-08-01", "end": "2026-08-28"},
            "totals": {"income": 100.0, "expenses": 60.0, "net": 40.0, "transaction_count": 3},
            "breakdown": [
                {"category_name": "Food", "total": 60.0, "percentage": 100.0}
            ],
        });
        let md = to_markdown(&value);
        assert!(md.starts_with("# Financial Summary"));
        assert!(md.contains("| Income | 100.00 |"));
        assert!(md.contains("| Food | 60.00 | 100.00% |"));
    }

    #[test]
    fn test_markdown_falls_back_to_json() {
        let md = to_markdown(&json!({"anything": 1}));
        assert!(md.contains("\"anything\": 1"));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let err = render(&json!([]), "xml");
        assert!(matches!(err, Err(ToolError::UnknownOperand { .. })));
    }
}
