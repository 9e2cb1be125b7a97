use serde_json::{json, Value};

use crate::{
    analytics::{
        round2,
        spending::{active_budgets, category_breakdown, expense_sum, AnalysisFilters},
    },
    error::ToolError,
    period::Window,
    storage::{row_f64, row_i64, row_str, FinanceStore, SqlParam},
};

fn window_totals(store: &dyn FinanceStore, window: &Window) -> Result<(f64, f64, i64), ToolError> {
    let row = store
        .fetch_one(
            "SELECT COALESCE(SUM(CASE WHEN kind = 'income' THEN amount ELSE 0 END), 0) AS income,
                    COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount ELSE 0 END), 0) AS expenses,
                    COUNT(*) AS count
             FROM transactions
             WHERE date >= ? AND date <= ?",
            &[
                SqlParam::from(window.start_str()),
                SqlParam::from(window.end_str()),
            ],
        )?
        .unwrap_or_default();
    Ok((
        row_f64(&row, "income"),
        row_f64(&row, "expenses"),
        row_i64(&row, "count"),
    ))
}

/// Income/expense/net totals for the window, with an optional
/// per-category breakdown attached.
pub fn period_totals(
    store: &dyn FinanceStore,
    window: &Window,
    include_details: bool,
) -> Result<Value, ToolError> {
    let (income, expenses, count) = window_totals(store, window)?;

    let mut out = json!({
        "period": window.info(),
        "totals": {
            "income": round2(income),
            "expenses": round2(expenses),
            "net": round2(income - expenses),
            "transaction_count": count,
        },
    });

    if include_details {
        let breakdown = category_breakdown(store, window, &AnalysisFilters::default())?;
        out["breakdown"] = serde_json::to_value(breakdown.categories)
            .map_err(|e| ToolError::Validation(e.to_string()))?;
    }

    Ok(out)
}

/// Spent/remaining/percent-used per active budget.
pub fn budget_status(store: &dyn FinanceStore, window: &Window) -> Result<Value, ToolError> {
    let mut budgets = Vec::new();
    for budget in active_budgets(store)? {
        let budgeted = row_f64(&budget, "amount");
        let category_id = row_str(&budget, "category_id");
        let spent = expense_sum(store, &category_id, window)?;
        let percent_used = if budgeted == 0.0 {
            0.0
        } else {
            round2(spent / budgeted * 100.0)
        };
        budgets.push(json!({
            "budget_id": row_str(&budget, "id"),
            "category_id": category_id,
            "category_name": row_str(&budget, "category_name"),
            "budgeted_amount": budgeted,
            "spent": round2(spent),
            "remaining": round2(budgeted - spent),
            "percent_used": percent_used,
            "status": if spent > budgeted { "over" } else { "under" },
        }));
    }

    Ok(json!({
        "period": window.info(),
        "budgets": budgets,
    }))
}

/// Daily average spend over the inclusive day count plus the single
/// highest-spending category.
pub fn quick_stats(store: &dyn FinanceStore, window: &Window) -> Result<Value, ToolError> {
    let (income, expenses, count) = window_totals(store, window)?;
    let days = window.day_count().max(1);
    let daily_average = round2(expenses / days as f64);

    let top = store.fetch_one(
        "SELECT t.category_id, COALESCE(c.name, 'Uncategorized') AS category_name,
                SUM(t.amount) AS total
         FROM transactions t
         LEFT JOIN categories c ON c.id = t.category_id
         WHERE t.kind = 'expense' AND t.date >= ? AND t.date <= ?
         GROUP BY t.category_id, category_name
         ORDER BY total DESC
         LIMIT 1",
        &[
            SqlParam::from(window.start_str()),
            SqlParam::from(window.end_str()),
        ],
    )?;

    let top_category = top.map(|row| {
        json!({
            "category_id": row_str(&row, "category_id"),
            "category_name": row_str(&row, "category_name"),
            "total": round2(row_f64(&row, "total")),
        })
    });

    Ok(json!({
        "period": window.info(),
        "days": days,
        "income": round2(income),
        "expenses": round2(expenses),
        "net": round2(income - expenses),
        "transaction_count": count,
        "daily_average_expense": daily_average,
        "top_category": top_category,
    }))
}
