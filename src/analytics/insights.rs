use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};
use time::Date;

use crate::{
    analytics::{
        round2,
        spending::{active_budgets, expense_sum},
        DAY_NAMES,
    },
    error::ToolError,
    period::{PeriodSpec, Window},
    storage::{row_f64, row_i64, row_str, FinanceStore, SqlParam},
};

const OUTLIER_FACTOR: f64 = 2.0;
const SPIKE_FACTOR: f64 = 1.5;
const RECURRING_MIN_OCCURRENCES: i64 = 2;
const MICRO_AMOUNT_CEILING: f64 = 20.0;
const MICRO_MIN_FREQUENCY: i64 = 5;
const FORECAST_MONTH_DAYS: f64 = 30.0;
const SUBSCRIPTION_KEYWORDS: &[&str] = &[
    "subscription",
    "monthly",
    "annual",
    "service",
    "premium",
    "plus",
];

#[derive(Debug, Deserialize)]
pub struct InsightsRequest {
    pub data_scope: String,
    #[serde(default)]
    pub period: InsightsPeriod,
    #[serde(default = "default_true")]
    pub include_components: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InsightsPeriod {
    #[serde(default)]
    pub current: Option<PeriodSpec>,
    #[serde(default)]
    pub comparison: Option<PeriodSpec>,
}

pub fn insights(
    store: &dyn FinanceStore,
    today: Date,
    req: &InsightsRequest,
) -> Result<Value, ToolError> {
    let current = match &req.period.current {
        Some(spec) => spec.resolve(today)?,
        None => PeriodSpec {
            name: Some("this_month".to_string()),
            ..Default::default()
        }
        .resolve(today)?,
    };
    let comparison = match &req.period.comparison {
        Some(spec) => Some(spec.resolve(today)?),
        None => None,
    };

    match req.data_scope.as_str() {
        "spending_patterns" => {
            spending_patterns(store, &current, comparison.as_ref(), req.include_components)
        }
        "budget_analysis" => budget_analysis(store, &current, req.include_components),
        "anomaly_detection" => anomaly_detection(store, &current, req.include_components),
        "savings_potential" => savings_potential(store, &current, req.include_components),
        other => Err(ToolError::unknown("data_scope", other)),
    }
}

#[derive(Debug, Clone)]
struct CategoryStats {
    category_id: String,
    category_name: String,
    total: f64,
    count: i64,
    average: f64,
    min: f64,
    max: f64,
}

fn category_stats(
    store: &dyn FinanceStore,
    window: &Window,
) -> Result<Vec<CategoryStats>, ToolError> {
    let rows = store.fetch_all(
        "SELECT t.category_id,
                COALESCE(c.name, 'Uncategorized') AS category_name,
                SUM(t.amount) AS total,
                COUNT(*) AS count,
                AVG(t.amount) AS average,
                MIN(t.amount) AS min_amount,
                MAX(t.amount) AS max_amount
         FROM transactions t
         LEFT JOIN categories c ON c.id = t.category_id
         WHERE t.kind = 'expense' AND t.date >= ? AND t.date <= ?
         GROUP BY t.category_id, category_name
         ORDER BY total DESC",
        &[
            SqlParam::from(window.start_str()),
            SqlParam::from(window.end_str()),
        ],
    )?;
    Ok(rows
        .iter()
        .map(|row| CategoryStats {
            category_id: row_str(row, "category_id"),
            category_name: row_str(row, "category_name"),
            total: row_f64(row, "total"),
            count: row_i64(row, "count"),
            average: row_f64(row, "average"),
            min: row_f64(row, "min_amount"),
            max: row_f64(row, "max_amount"),
        })
        .collect())
}

/// Highest-spend day of week per category, `strftime('%w')` numbering
/// (0 = Sunday).
fn top_days(
    store: &dyn FinanceStore,
    window: &Window,
) -> Result<HashMap<String, String>, ToolError> {
    let rows = store.fetch_all(
        "SELECT category_id,
                CAST(strftime('%w', date) AS INTEGER) AS dow,
                SUM(amount) AS total
         FROM transactions
         WHERE kind = 'expense' AND date >= ? AND date <= ?
         GROUP BY category_id, dow",
        &[
            SqlParam::from(window.start_str()),
            SqlParam::from(window.end_str()),
        ],
    )?;

    let mut best: HashMap<String, (f64, usize)> = HashMap::new();
    for row in &rows {
        let category = row_str(row, "category_id");
        let total = row_f64(row, "total");
        let dow = row_i64(row, "dow").clamp(0, 6) as usize;
        let entry = best.entry(category).or_insert((f64::MIN, 0));
        if total > entry.0 {
            *entry = (total, dow);
        }
    }
    Ok(best
        .into_iter()
        .map(|(category, (_, dow))| (category, DAY_NAMES[dow].to_string()))
        .collect())
}

fn spending_patterns(
    store: &dyn FinanceStore,
    current: &Window,
    comparison: Option<&Window>,
    include_components: bool,
) -> Result<Value, ToolError> {
    let stats = category_stats(store, current)?;
    let days = top_days(store, current)?;

    let categories: Vec<Value> = stats
        .iter()
        .map(|s| {
            json!({
                "category_id": s.category_id,
                "category_name": s.category_name,
                "total": round2(s.total),
                "count": s.count,
                "average": round2(s.average),
                "min": round2(s.min),
                "max": round2(s.max),
                "top_day": days.get(&s.category_id),
            })
        })
        .collect();

    let mut out = json!({
        "period": current.info(),
        "categories": categories,
    });

    if let Some(prev_window) = comparison {
        let prev: HashMap<String, f64> = category_stats(store, prev_window)?
            .into_iter()
            .map(|s| (s.category_id, s.total))
            .collect();
        let changes: Vec<Value> = stats
            .iter()
            .map(|s| {
                let previous = prev.get(&s.category_id).copied().unwrap_or(0.0);
                // A category with no prior activity reads as a full
                // increase from zero.
                let percent_change = if previous == 0.0 {
                    100.0
                } else {
                    round2((s.total - previous) / previous * 100.0)
                };
                json!({
                    "category_id": s.category_id,
                    "category_name": s.category_name,
                    "current_total": round2(s.total),
                    "previous_total": round2(previous),
                    "amount_change": round2(s.total - previous),
                    "percent_change": percent_change,
                })
            })
            .collect();
        out["comparison"] = json!({
            "period": prev_window.info(),
            "changes": changes,
        });
    }

    if include_components {
        let daily = store.fetch_all(
            "SELECT date, SUM(amount) AS total
             FROM transactions
             WHERE kind = 'expense' AND date >= ? AND date <= ?
             GROUP BY date
             ORDER BY date ASC",
            &[
                SqlParam::from(current.start_str()),
                SqlParam::from(current.end_str()),
            ],
        )?;
        out["daily_totals"] = Value::Array(
            daily
                .iter()
                .map(|r| {
                    json!({
                        "date": row_str(r, "date"),
                        "total": round2(row_f64(r, "total")),
                    })
                })
                .collect(),
        );

        // Frequency patterns only mean something past a single hit.
        out["frequency_patterns"] = Value::Array(
            stats
                .iter()
                .filter(|s| s.count > 1)
                .map(|s| {
                    json!({
                        "category_id": s.category_id,
                        "category_name": s.category_name,
                        "frequency": s.count,
                        "average_amount": round2(s.average),
                    })
                })
                .collect(),
        );
    }

    Ok(out)
}

fn budget_analysis(
    store: &dyn FinanceStore,
    window: &Window,
    include_components: bool,
) -> Result<Value, ToolError> {
    let days = window.day_count().max(1) as f64;

    let mut performance = Vec::new();
    let mut forecast = Vec::new();
    for budget in active_budgets(store)? {
        let budgeted = row_f64(&budget, "amount");
        let category_id = row_str(&budget, "category_id");
        let spent = expense_sum(store, &category_id, window)?;
        let percent_used = if budgeted == 0.0 {
            0.0
        } else {
            round2(spent / budgeted * 100.0)
        };
        performance.push(json!({
            "budget_id": row_str(&budget, "id"),
            "category_id": category_id,
            "category_name": row_str(&budget, "category_name"),
            "budgeted_amount": budgeted,
            "spent": round2(spent),
            "remaining": round2(budgeted - spent),
            "percent_used": percent_used,
        }));

        let daily_rate = spent / days;
        let projected_monthly = daily_rate * FORECAST_MONTH_DAYS;
        forecast.push(json!({
            "budget_id": row_str(&budget, "id"),
            "category_id": row_str(&budget, "category_id"),
            "category_name": row_str(&budget, "category_name"),
            "daily_rate": round2(daily_rate),
            "projected_monthly": round2(projected_monthly),
            "budgeted_amount": budgeted,
            "status": if projected_monthly > budgeted { "over_budget" } else { "on_track" },
        }));
    }

    let mut out = json!({
        "period": window.info(),
        "performance": performance,
        "forecast": forecast,
    });

    if include_components {
        // Day-by-category spend, restricted to budgeted categories.
        let rows = store.fetch_all(
            "SELECT t.date, t.category_id,
                    COALESCE(c.name, '') AS category_name,
                    SUM(t.amount) AS total
             FROM transactions t
             LEFT JOIN categories c ON c.id = t.category_id
             WHERE t.kind = 'expense' AND t.date >= ? AND t.date <= ?
               AND t.category_id IN (SELECT category_id FROM budgets WHERE is_active = 1)
             GROUP BY t.date, t.category_id, category_name
             ORDER BY t.date ASC, t.category_id ASC",
            &[
                SqlParam::from(window.start_str()),
                SqlParam::from(window.end_str()),
            ],
        )?;
        out["trend"] = Value::Array(
            rows.iter()
                .map(|r| {
                    json!({
                        "date": row_str(r, "date"),
                        "category_id": row_str(r, "category_id"),
                        "category_name": row_str(r, "category_name"),
                        "total": round2(row_f64(r, "total")),
                    })
                })
                .collect(),
        );
    }

    Ok(out)
}

fn anomaly_detection(
    store: &dyn FinanceStore,
    window: &Window,
    include_components: bool,
) -> Result<Value, ToolError> {
    // Outliers measure against the category's all-history mean, not
    // just the window.
    let outliers = store.fetch_all(
        "SELECT t.id, t.amount, t.category_id,
                COALESCE(c.name, 'Uncategorized') AS category_name,
                t.description, t.date, m.mean_amount
         FROM transactions t
         JOIN (SELECT category_id, AVG(amount) AS mean_amount
               FROM transactions
               WHERE kind = 'expense'
               GROUP BY category_id) m ON m.category_id = t.category_id
         LEFT JOIN categories c ON c.id = t.category_id
         WHERE t.kind = 'expense' AND t.date >= ? AND t.date <= ?
           AND t.amount > ? * m.mean_amount
         ORDER BY t.amount DESC",
        &[
            SqlParam::from(window.start_str()),
            SqlParam::from(window.end_str()),
            SqlParam::from(OUTLIER_FACTOR),
        ],
    )?;

    let mut out = json!({
        "period": window.info(),
        "outliers": outliers
            .iter()
            .map(|r| {
                json!({
                    "transaction_id": row_str(r, "id"),
                    "amount": row_f64(r, "amount"),
                    "category_id": row_str(r, "category_id"),
                    "category_name": row_str(r, "category_name"),
                    "description": row_str(r, "description"),
                    "date": row_str(r, "date"),
                    "category_mean": round2(row_f64(r, "mean_amount")),
                })
            })
            .collect::<Vec<_>>(),
    });

    if include_components {
        // Spike baseline: mean of daily expense totals strictly
        // before the window. No history means no spike baseline.
        let baseline = store
            .fetch_one(
                "SELECT AVG(day_total) AS mean_daily
                 FROM (SELECT SUM(amount) AS day_total
                       FROM transactions
                       WHERE kind = 'expense' AND date < ?
                       GROUP BY date)",
                &[SqlParam::from(window.start_str())],
            )?
            .map(|r| row_f64(&r, "mean_daily"))
            .unwrap_or(0.0);

        let mut spikes = Vec::new();
        if baseline > 0.0 {
            let days = store.fetch_all(
                "SELECT date, SUM(amount) AS total
                 FROM transactions
                 WHERE kind = 'expense' AND date >= ? AND date <= ?
                 GROUP BY date
                 HAVING SUM(amount) > ?
                 ORDER BY date ASC",
                &[
                    SqlParam::from(window.start_str()),
                    SqlParam::from(window.end_str()),
                    SqlParam::from(SPIKE_FACTOR * baseline),
                ],
            )?;
            for row in &days {
                spikes.push(json!({
                    "date": row_str(row, "date"),
                    "total": round2(row_f64(row, "total")),
                    "baseline_mean": round2(baseline),
                }));
            }
        }
        out["spikes"] = Value::Array(spikes);

        let merchants = store.fetch_all(
            "SELECT t.description,
                    MIN(t.date) AS first_date,
                    COUNT(*) AS count,
                    SUM(t.amount) AS total
             FROM transactions t
             WHERE t.kind = 'expense' AND t.date >= ? AND t.date <= ?
               AND t.description NOT IN
                   (SELECT description FROM transactions
                    WHERE kind = 'expense' AND date < ?)
             GROUP BY t.description
             ORDER BY total DESC",
            &[
                SqlParam::from(window.start_str()),
                SqlParam::from(window.end_str()),
                SqlParam::from(window.start_str()),
            ],
        )?;
        out["new_merchants"] = Value::Array(
            merchants
                .iter()
                .map(|r| {
                    json!({
                        "description": row_str(r, "description"),
                        "first_date": row_str(r, "first_date"),
                        "count": row_i64(r, "count"),
                        "total": round2(row_f64(r, "total")),
                    })
                })
                .collect(),
        );
    }

    Ok(out)
}

fn savings_potential(
    store: &dyn FinanceStore,
    window: &Window,
    include_components: bool,
) -> Result<Value, ToolError> {
    // Recurring charges look across all history, not just the window.
    let recurring = store.fetch_all(
        "SELECT t.description, t.category_id,
                COALESCE(c.name, 'Uncategorized') AS category_name,
                COUNT(*) AS occurrences,
                SUM(t.amount) AS total,
                AVG(t.amount) AS average
         FROM transactions t
         LEFT JOIN categories c ON c.id = t.category_id
         WHERE t.kind = 'expense'
         GROUP BY t.description, t.category_id, category_name
         HAVING COUNT(*) >= ?
         ORDER BY total DESC",
        &[SqlParam::Int(RECURRING_MIN_OCCURRENCES)],
    )?;

    let mut out = json!({
        "period": window.info(),
        "recurring_charges": recurring
            .iter()
            .map(|r| {
                json!({
                    "description": row_str(r, "description"),
                    "category_id": row_str(r, "category_id"),
                    "category_name": row_str(r, "category_name"),
                    "occurrences": row_i64(r, "occurrences"),
                    "total": round2(row_f64(r, "total")),
                    "average": round2(row_f64(r, "average")),
                })
            })
            .collect::<Vec<_>>(),
    });

    if include_components {
        let micro = store.fetch_all(
            "SELECT t.category_id,
                    COALESCE(c.name, 'Uncategorized') AS category_name,
                    COUNT(*) AS frequency,
                    SUM(t.amount) AS total
             FROM transactions t
             LEFT JOIN categories c ON c.id = t.category_id
             WHERE t.kind = 'expense' AND t.amount < ?
               AND t.date >= ? AND t.date <= ?
             GROUP BY t.category_id, category_name
             HAVING COUNT(*) >= ?
             ORDER BY frequency DESC",
            &[
                SqlParam::from(MICRO_AMOUNT_CEILING),
                SqlParam::from(window.start_str()),
                SqlParam::from(window.end_str()),
                SqlParam::Int(MICRO_MIN_FREQUENCY),
            ],
        )?;
        out["micro_transactions"] = Value::Array(
            micro
                .iter()
                .map(|r| {
                    json!({
                        "category_id": row_str(r, "category_id"),
                        "category_name": row_str(r, "category_name"),
                        "frequency": row_i64(r, "frequency"),
                        "total": round2(row_f64(r, "total")),
                    })
                })
                .collect(),
        );

        let keyword_clause = vec!["LOWER(t.description) LIKE ?"; SUBSCRIPTION_KEYWORDS.len()]
            .join(" OR ");
        let sql = format!(
            "SELECT t.description, t.category_id,
                    COALESCE(c.name, 'Uncategorized') AS category_name,
                    COUNT(*) AS occurrences,
                    SUM(t.amount) AS total
             FROM transactions t
             LEFT JOIN categories c ON c.id = t.category_id
             WHERE t.kind = 'expense' AND t.date >= ? AND t.date <= ?
               AND ({keyword_clause})
             GROUP BY t.description, t.category_id, category_name
             ORDER BY total DESC"
        );
        let mut params = vec![
            SqlParam::from(window.start_str()),
            SqlParam::from(window.end_str()),
        ];
        for keyword in SUBSCRIPTION_KEYWORDS {
            params.push(SqlParam::from(format!("%{keyword}%")));
        }
        let subscriptions = store.fetch_all(&sql, &params)?;
        out["subscriptions"] = Value::Array(
            subscriptions
                .iter()
                .map(|r| {
                    json!({
                        "description": row_str(r, "description"),
                        "category_id": row_str(r, "category_id"),
                        "category_name": row_str(r, "category_name"),
                        "occurrences": row_i64(r, "occurrences"),
                        "total": round2(row_f64(r, "total")),
                    })
                })
                .collect(),
        );
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_keyword_clause_binds_all_keywords() {
        let clause = vec!["LOWER(t.description) LIKE ?"; SUBSCRIPTION_KEYWORDS.len()].join(" OR ");
        assert_eq!(clause.matches('?').count(), SUBSCRIPTION_KEYWORDS.len());
    }
}
