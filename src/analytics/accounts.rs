use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::ToolError,
    storage::{row_opt_str, row_str, FinanceStore, Row},
};

#[derive(Debug, Deserialize)]
pub struct AccountDataRequest {
    pub data_type: String,
    #[serde(default)]
    pub filters: Option<AccountDataFilters>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountDataFilters {
    #[serde(default)]
    pub include_inactive: bool,
}

pub fn account_data(
    store: &dyn FinanceStore,
    req: &AccountDataRequest,
) -> Result<Value, ToolError> {
    let filters = req.filters.clone().unwrap_or_default();
    match req.data_type.as_str() {
        "profile" => profile(store),
        "categories" => categories(store, &filters),
        "ledgers" => ledgers(store, &filters),
        "budgets" => budgets(store, &filters),
        other => Err(ToolError::unknown("data_type", other)),
    }
}

/// Most recently created profile row; the seed guarantees one exists.
fn profile(store: &dyn FinanceStore) -> Result<Value, ToolError> {
    let row = store
        .fetch_one(
            "SELECT id, name, email, default_currency, created_at
             FROM users
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            &[],
        )?
        .ok_or_else(|| ToolError::not_found("profile", "default"))?;
    Ok(json!({ "profile": Value::Object(row) }))
}

fn active_clause(include_inactive: bool, column: &str) -> String {
    if include_inactive {
        String::new()
    } else {
        format!("WHERE {column} = 1")
    }
}

fn categories(
    store: &dyn FinanceStore,
    filters: &AccountDataFilters,
) -> Result<Value, ToolError> {
    let sql = format!(
        "SELECT id, name, kind, parent_id, is_active
         FROM categories
         {}
         ORDER BY kind ASC, name ASC",
        active_clause(filters.include_inactive, "is_active")
    );
    let rows = store.fetch_all(&sql, &[])?;

    let flat: Vec<Value> = rows.iter().cloned().map(Value::Object).collect();
    let tree = build_tree(&rows);

    Ok(json!({
        "categories": flat,
        "tree": tree,
    }))
}

/// Nest categories under their parents; roots have a null parent.
/// Children referencing a filtered-out parent surface as roots rather
/// than disappearing.
fn build_tree(rows: &[Row]) -> Vec<Value> {
    let mut children: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    let mut roots: Vec<&Row> = Vec::new();
    let known: std::collections::HashSet<String> =
        rows.iter().map(|r| row_str(r, "id")).collect();

    for row in rows {
        match row_opt_str(row, "parent_id") {
            Some(parent) if known.contains(&parent) => {
                children.entry(parent).or_default().push(row)
            }
            _ => roots.push(row),
        }
    }

    fn node(row: &Row, children: &BTreeMap<String, Vec<&Row>>) -> Value {
        let id = row_str(row, "id");
        let kids = children
            .get(&id)
            .map(|rows| rows.iter().map(|r| node(r, children)).collect())
            .unwrap_or_else(Vec::new);
        let mut value = Value::Object((*row).clone());
        value["children"] = Value::Array(kids);
        value
    }

    roots.iter().map(|r| node(r, &children)).collect()
}

fn ledgers(store: &dyn FinanceStore, filters: &AccountDataFilters) -> Result<Value, ToolError> {
    let sql = format!(
        "SELECT id, name, account_kind, balance, currency, is_active
         FROM ledgers
         {}
         ORDER BY name ASC",
        active_clause(filters.include_inactive, "is_active")
    );
    let rows = store.fetch_all(&sql, &[])?;
    Ok(json!({
        "ledgers": rows.into_iter().map(Value::Object).collect::<Vec<_>>(),
    }))
}

fn budgets(store: &dyn FinanceStore, filters: &AccountDataFilters) -> Result<Value, ToolError> {
    let sql = format!(
        "SELECT b.id, b.category_id, COALESCE(c.name, '') AS category_name,
                b.amount, b.period, b.start_date, b.end_date, b.is_active
         FROM budgets b
         LEFT JOIN categories c ON c.id = b.category_id
         {}
         ORDER BY b.start_date ASC, b.id ASC",
        active_clause(filters.include_inactive, "b.is_active")
    );
    let rows = store.fetch_all(&sql, &[])?;
    Ok(json!({
        "budgets": rows.into_iter().map(Value::Object).collect::<Vec<_>>(),
    }))
}
