use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    analytics::round2,
    error::ToolError,
    models::read::{
        BudgetVariance, BudgetVarianceRow, CategoryBreakdown, CategoryBreakdownRow, TimeTrend,
        TrendBucket,
    },
    models::TransactionKind,
    period::{parse_date, Window},
    query::Predicate,
    storage::{row_f64, row_i64, row_str, FinanceStore, Row, SqlParam},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisFilters {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub category_ids: Option<Vec<String>>,
}

/// Shared predicate over the transaction relation for a window plus
/// optional kind/category filters.
fn window_predicate(window: &Window, kind: Option<&str>, filters: &AnalysisFilters) -> Predicate {
    let mut pred = Predicate::new();
    if let Some(kind) = kind {
        pred.push("t.kind = ?", SqlParam::from(kind));
    }
    pred.push("t.date >= ?", SqlParam::from(window.start_str()));
    pred.push("t.date <= ?", SqlParam::from(window.end_str()));
    if let Some(ids) = &filters.category_ids {
        pred.push_id_set("t.category_id", ids);
    }
    pred
}

/// Group spending by category within the window. Percentages are each
/// group's share of the grand total, two-decimal rounded, and 0 when
/// the grand total is zero.
pub fn category_breakdown(
    store: &dyn FinanceStore,
    window: &Window,
    filters: &AnalysisFilters,
) -> Result<CategoryBreakdown, ToolError> {
    let kind = filters
        .kind
        .as_deref()
        .and_then(TransactionKind::parse)
        .unwrap_or(TransactionKind::Expense);
    let pred = window_predicate(window, Some(kind.as_str()), filters);

    let sql = format!(
        "SELECT t.category_id,
                COALESCE(c.name, 'Uncategorized') AS category_name,
                SUM(t.amount) AS total,
                COUNT(*) AS count,
                AVG(t.amount) AS average
         FROM transactions t
         LEFT JOIN categories c ON c.id = t.category_id
         {}
         GROUP BY t.category_id, category_name
         ORDER BY total DESC",
        pred.where_sql()
    );
    let rows = store.fetch_all(&sql, pred.params())?;

    let grand_total: f64 = rows.iter().map(|r| row_f64(r, "total")).sum();
    let categories = rows
        .iter()
        .map(|row| {
            let total = row_f64(row, "total");
            let percentage = if grand_total == 0.0 {
                0.0
            } else {
                round2(total / grand_total * 100.0)
            };
            CategoryBreakdownRow {
                category_id: row_str(row, "category_id"),
                category_name: row_str(row, "category_name"),
                total: round2(total),
                count: row_i64(row, "count"),
                average: round2(row_f64(row, "average")),
                percentage,
            }
        })
        .collect();

    Ok(CategoryBreakdown {
        period: window.info(),
        grand_total: round2(grand_total),
        categories,
    })
}

fn bucket_label(date: time::Date, grouping: &str) -> String {
    match grouping {
        "day" => crate::period::format_date(date),
        "week" => {
            let (iso_year, iso_week, _) = date.to_iso_week_date();
            format!("{iso_year:04}-W{iso_week:02}")
        }
        _ => format!("{:04}-{:02}", date.year(), date.month() as u8),
    }
}

/// Bucket transactions into day/week/month buckets. Weeks follow ISO
/// week-of-year numbering; an unrecognized grouping falls back to
/// month. Buckets come back in ascending order.
pub fn time_trend(
    store: &dyn FinanceStore,
    window: &Window,
    grouping: Option<&str>,
    filters: &AnalysisFilters,
) -> Result<TimeTrend, ToolError> {
    let grouping = match grouping {
        Some(g @ ("day" | "week" | "month")) => g,
        _ => "month",
    };
    let kind = filters.kind.as_deref().and_then(TransactionKind::parse);
    let pred = window_predicate(window, kind.map(|k| k.as_str()), filters);

    let sql = format!(
        "SELECT t.date AS day,
                SUM(CASE WHEN t.kind = 'expense' THEN t.amount ELSE 0 END) AS expenses,
                SUM(CASE WHEN t.kind = 'income' THEN t.amount ELSE 0 END) AS income,
                COUNT(*) AS count
         FROM transactions t
         {}
         GROUP BY t.date
         ORDER BY t.date ASC",
        pred.where_sql()
    );
    let rows = store.fetch_all(&sql, pred.params())?;

    // Fold per-day rows into the requested granularity; BTreeMap
    // keeps bucket labels ascending.
    let mut buckets: BTreeMap<String, TrendBucket> = BTreeMap::new();
    for row in &rows {
        let date = parse_date(&row_str(row, "day"))?;
        let label = bucket_label(date, grouping);
        let bucket = buckets.entry(label.clone()).or_insert(TrendBucket {
            bucket: label,
            expenses: 0.0,
            income: 0.0,
            count: 0,
        });
        bucket.expenses = round2(bucket.expenses + row_f64(row, "expenses"));
        bucket.income = round2(bucket.income + row_f64(row, "income"));
        bucket.count += row_i64(row, "count");
    }

    Ok(TimeTrend {
        period: window.info(),
        grouping: grouping.to_string(),
        buckets: buckets.into_values().collect(),
    })
}

/// Active budgets joined to their category names.
pub(crate) fn active_budgets(store: &dyn FinanceStore) -> Result<Vec<Row>, ToolError> {
    let rows = store.fetch_all(
        "SELECT b.id, b.category_id, COALESCE(c.name, '') AS category_name,
                b.amount, b.period, b.start_date, b.end_date
         FROM budgets b
         LEFT JOIN categories c ON c.id = b.category_id
         WHERE b.is_active = 1
         ORDER BY b.start_date ASC, b.id ASC",
        &[],
    )?;
    Ok(rows)
}

/// Expense total for one category within the window; 0 when no rows
/// match.
pub(crate) fn expense_sum(
    store: &dyn FinanceStore,
    category_id: &str,
    window: &Window,
) -> Result<f64, ToolError> {
    let row = store.fetch_one(
        "SELECT COALESCE(SUM(amount), 0) AS total
         FROM transactions
         WHERE kind = 'expense' AND category_id = ? AND date >= ? AND date <= ?",
        &[
            SqlParam::from(category_id),
            SqlParam::from(window.start_str()),
            SqlParam::from(window.end_str()),
        ],
    )?;
    Ok(row.map(|r| row_f64(&r, "total")).unwrap_or(0.0))
}

/// Actual vs budgeted per active budget. Status is "over" only on a
/// strict overrun; the percentage is 0 when nothing was budgeted.
pub fn budget_variance(
    store: &dyn FinanceStore,
    window: &Window,
) -> Result<BudgetVariance, ToolError> {
    let mut out = Vec::new();
    for budget in active_budgets(store)? {
        let budgeted = row_f64(&budget, "amount");
        let category_id = row_str(&budget, "category_id");
        let actual = expense_sum(store, &category_id, window)?;
        let variance = actual - budgeted;
        let variance_percentage = if budgeted == 0.0 {
            0.0
        } else {
            round2(variance / budgeted * 100.0)
        };
        out.push(BudgetVarianceRow {
            budget_id: row_str(&budget, "id"),
            category_id,
            category_name: row_str(&budget, "category_name"),
            budget_period: row_str(&budget, "period"),
            budgeted_amount: budgeted,
            actual_amount: round2(actual),
            variance: round2(variance),
            variance_percentage,
            status: if actual > budgeted { "over" } else { "under" }.to_string(),
        });
    }

    Ok(BudgetVariance {
        period: window.info(),
        budgets: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_bucket_labels() {
        let d = date!(2026 - 01 - 01);
        assert_eq!(bucket_label(d, "day"), "2026-01-01");
        assert_eq!(bucket_label(d, "month"), "2026-01");
        // 2026-01-01 falls in ISO week 1 of 2026.
        assert_eq!(bucket_label(d, "week"), "2026-W01");
        // December 29th 2025 belongs to ISO week 1 of 2026.
        assert_eq!(bucket_label(date!(2025 - 12 - 29), "week"), "2026-W01");
    }
}
