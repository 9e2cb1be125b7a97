use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::Config,
    error::ToolError,
    models::read::{PaginationMeta, TransactionPage},
    storage::{row_i64, FinanceStore, Row, SqlParam},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRange {
    #[serde(alias = "start_date")]
    pub start: Option<String>,
    #[serde(alias = "end_date")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilters {
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub category_ids: Option<Vec<String>>,
    #[serde(default)]
    pub ledger_ids: Option<Vec<String>>,
    #[serde(default, alias = "search")]
    pub search_text: Option<String>,
    #[serde(default)]
    pub min_amount: Option<f64>,
    #[serde(default)]
    pub max_amount: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SortSpec {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub filters: Option<TransactionFilters>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
}

/// Composable WHERE clause: predicate fragments paired with bound
/// values, joined with AND. Values are never interpolated.
#[derive(Debug, Default)]
pub struct Predicate {
    fragments: Vec<String>,
    params: Vec<SqlParam>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str, param: SqlParam) {
        self.fragments.push(fragment.to_string());
        self.params.push(param);
    }

    /// `column IN (?, ?, ...)` over a non-empty id set. Empty sets
    /// are a no-op, not an exclude-all.
    pub fn push_id_set(&mut self, column: &str, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        self.fragments
            .push(format!("{column} IN ({placeholders})"));
        for id in ids {
            self.params.push(SqlParam::from(id.clone()));
        }
    }

    pub fn where_sql(&self) -> String {
        if self.fragments.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.fragments.join(" AND "))
        }
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }
}

/// Build the shared predicate for the row and count queries.
/// Malformed values fall through as bound text and simply match
/// nothing; this layer produces empty pages, not errors.
pub(crate) fn build_predicate(kind: &Option<String>, filters: &TransactionFilters) -> Predicate {
    let mut pred = Predicate::new();

    match kind.as_deref() {
        Some("income") | Some("expense") => {
            pred.push("t.kind = ?", SqlParam::from(kind.clone().unwrap()))
        }
        _ => {}
    }

    if let Some(range) = &filters.date_range {
        if let Some(start) = &range.start {
            if !start.trim().is_empty() {
                pred.push("t.date >= ?", SqlParam::from(start.trim()));
            }
        }
        if let Some(end) = &range.end {
            if !end.trim().is_empty() {
                pred.push("t.date <= ?", SqlParam::from(end.trim()));
            }
        }
    }

    if let Some(ids) = &filters.category_ids {
        pred.push_id_set("t.category_id", ids);
    }
    if let Some(ids) = &filters.ledger_ids {
        pred.push_id_set("t.ledger_id", ids);
    }

    if let Some(text) = &filters.search_text {
        let text = text.trim();
        if !text.is_empty() {
            pred.push(
                "t.description LIKE ?",
                SqlParam::from(format!("%{text}%")),
            );
        }
    }

    if let Some(min) = filters.min_amount {
        pred.push("t.amount >= ?", SqlParam::from(min));
    }
    if let Some(max) = filters.max_amount {
        pred.push("t.amount <= ?", SqlParam::from(max));
    }

    pred
}

fn order_clause(sort: &SortSpec) -> String {
    let order = match sort.order.as_deref() {
        Some("asc") => "ASC",
        _ => "DESC",
    };
    // Unknown sort fields fall back to amount ordering.
    let field = match sort.field.as_deref() {
        None | Some("date") => "t.date",
        Some("amount") => "t.amount",
        Some("category") => "category_name",
        Some(_) => "t.amount",
    };
    format!("ORDER BY {field} {order}, t.id {order}")
}

pub(crate) fn clamp_limit(requested: Option<u32>, config: &Config) -> u32 {
    requested
        .unwrap_or(config.defaults.page_size)
        .clamp(1, config.defaults.max_page_size)
}

/// Decode the stored tags column (a JSON array in TEXT) in place.
pub(crate) fn expand_tags(row: &mut Row) {
    if let Some(Value::String(raw)) = row.get("tags") {
        let parsed = serde_json::from_str::<Value>(raw).unwrap_or(Value::Array(Vec::new()));
        row.insert("tags".to_string(), parsed);
    }
}

pub fn run(
    store: &dyn FinanceStore,
    config: &Config,
    query: &TransactionQuery,
) -> Result<TransactionPage, ToolError> {
    let filters = query.filters.clone().unwrap_or_default();
    let pagination = query.pagination.clone().unwrap_or_default();
    let sort = query.sort.clone().unwrap_or_default();

    let limit = clamp_limit(pagination.limit, config);
    let page = pagination.page.unwrap_or(1).max(1);
    let offset = (page as i64 - 1) * limit as i64;

    let pred = build_predicate(&query.kind, &filters);
    let where_sql = pred.where_sql();
    let order_sql = order_clause(&sort);

    let count_sql = format!(
        "SELECT COUNT(*) AS total
         FROM transactions t
         LEFT JOIN categories c ON c.id = t.category_id
         LEFT JOIN ledgers l ON l.id = t.ledger_id
         {where_sql}"
    );
    let total = store
        .fetch_one(&count_sql, pred.params())?
        .map(|row| row_i64(&row, "total"))
        .unwrap_or(0);

    let rows_sql = format!(
        "SELECT t.id, t.kind, t.amount, t.category_id,
                COALESCE(c.name, '') AS category_name,
                t.ledger_id, COALESCE(l.name, '') AS ledger_name,
                t.description, t.date, t.tags, t.created_at, t.updated_at
         FROM transactions t
         LEFT JOIN categories c ON c.id = t.category_id
         LEFT JOIN ledgers l ON l.id = t.ledger_id
         {where_sql}
         {order_sql}
         LIMIT ? OFFSET ?"
    );
    let mut row_params = pred.into_params();
    row_params.push(SqlParam::Int(limit as i64));
    row_params.push(SqlParam::Int(offset));

    let mut rows = store.fetch_all(&rows_sql, &row_params)?;
    for row in rows.iter_mut() {
        expand_tags(row);
    }

    let has_next = (page as i64) * (limit as i64) < total;

    Ok(TransactionPage {
        transactions: rows.into_iter().map(Value::Object).collect(),
        pagination: PaginationMeta {
            page,
            limit,
            total,
            has_next,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filters_produce_no_predicate() {
        let pred = build_predicate(&None, &TransactionFilters::default());
        assert_eq!(pred.where_sql(), "");
        assert!(pred.params().is_empty());
    }

    #[test]
    fn test_empty_id_set_is_a_noop() {
        let filters = TransactionFilters {
            category_ids: Some(Vec::new()),
            ..Default::default()
        };
        let pred = build_predicate(&None, &filters);
        assert_eq!(pred.where_sql(), "");
    }

    #[test]
    fn test_id_set_binds_each_value() {
        let filters = TransactionFilters {
            category_ids: Some(vec!["cat_a".to_string(), "cat_b".to_string()]),
            ..Default::default()
        };
        let pred = build_predicate(&None, &filters);
        assert_eq!(pred.where_sql(), "WHERE t.category_id IN (?, ?)");
        assert_eq!(pred.params().len(), 2);
    }

    #[test]
    fn test_unknown_sort_field_falls_back_to_amount() {
        let sort = SortSpec {
            field: Some("color".to_string()),
            order: None,
        };
        assert_eq!(order_clause(&sort), "ORDER BY t.amount DESC, t.id DESC");
    }

    #[test]
    fn test_default_sort_is_date_desc() {
        assert_eq!(
            order_clause(&SortSpec::default()),
            "ORDER BY t.date DESC, t.id DESC"
        );
    }
}
