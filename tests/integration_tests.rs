use std::sync::Arc;

use serde_json::{json, Value};
use time::macros::date;

use finsight::{
    config::Config,
    dispatch::{Dispatcher, RequestContext, ToolCall},
    models::{write::NewTransaction, TransactionKind},
    sqlite_store::SqliteStore,
    storage::{row_i64, row_str, FinanceStore, SqlParam},
};

fn setup() -> (Arc<SqliteStore>, Dispatcher) {
    let store = Arc::new(SqliteStore::new(":memory:", "USD").unwrap());
    store.initialize().unwrap();
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(Config::default()));
    (store, dispatcher)
}

fn ctx() -> RequestContext {
    RequestContext {
        today: date!(2026 - 08 - 28),
    }
}

fn call(dispatcher: &Dispatcher, tool: &str, arguments: Value) -> (bool, String) {
    let resp = dispatcher.handle(
        &ctx(),
        ToolCall {
            tool: tool.to_string(),
            arguments,
        },
    );
    (resp.ok, resp.payload)
}

fn call_ok(dispatcher: &Dispatcher, tool: &str, arguments: Value) -> Value {
    let (ok, payload) = call(dispatcher, tool, arguments);
    assert!(ok, "tool call failed: {payload}");
    serde_json::from_str(&payload).expect("payload should be JSON")
}

fn category_id(store: &SqliteStore, name: &str) -> String {
    let row = store
        .fetch_one(
            "SELECT id FROM categories WHERE name = ?",
            &[SqlParam::from(name)],
        )
        .unwrap()
        .expect("seeded category");
    row_str(&row, "id")
}

fn ledger_id(store: &SqliteStore) -> String {
    let row = store
        .fetch_one("SELECT id FROM ledgers LIMIT 1", &[])
        .unwrap()
        .unwrap();
    row_str(&row, "id")
}

fn insert_expense(store: &SqliteStore, category: &str, amount: f64, day: u8, desc: &str) {
    store
        .insert_transaction(&NewTransaction {
            kind: TransactionKind::Expense,
            amount,
            category_id: category.to_string(),
            ledger_id: ledger_id(store),
            description: desc.to_string(),
            date: time::Date::from_calendar_date(2026, time::Month::August, day).unwrap(),
            tags: Vec::new(),
        })
        .unwrap();
}

fn insert_budget(store: &SqliteStore, category: &str, amount: f64) {
    store
        .execute(
            "INSERT INTO budgets (id, category_id, amount, period, start_date, end_date, is_active)
             VALUES (?, ?, ?, 'monthly', '2026-08-01', NULL, 1)",
            &[
                SqlParam::from(format!("budget_{category}_{amount}")),
                SqlParam::from(category),
                SqlParam::from(amount),
            ],
        )
        .unwrap();
}

fn transaction_count(store: &SqliteStore) -> i64 {
    let row = store
        .fetch_one("SELECT COUNT(*) AS n FROM transactions", &[])
        .unwrap()
        .unwrap();
    row_i64(&row, "n")
}

fn august() -> Value {
    json!({"start_date": "2026-08-01", "end_date": "2026-08-31"})
}

#[test]
fn test_category_breakdown_worked_example() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 10.0, 1, "groceries");
    insert_expense(&store, &food, 20.0, 10, "groceries");
    insert_expense(&store, &food, 30.0, 20, "restaurant");

    let out = call_ok(
        &dispatcher,
        "analyze_spending",
        json!({"analysis_type": "category_breakdown", "period": august()}),
    );
    assert_eq!(out["grand_total"], json!(60.0));
    let row = &out["categories"][0];
    assert_eq!(row["category_id"].as_str().unwrap(), food);
    assert_eq!(row["total"], json!(60.0));
    assert_eq!(row["count"], json!(3));
    assert_eq!(row["average"], json!(20.0));
    assert_eq!(row["percentage"], json!(100.0));
}

#[test]
fn test_breakdown_percentages_sum_to_hundred() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    let transport = category_id(&store, "Transport");
    let health = category_id(&store, "Health");
    insert_expense(&store, &food, 10.0, 1, "a");
    insert_expense(&store, &transport, 10.0, 2, "b");
    insert_expense(&store, &health, 10.0, 3, "c");

    let out = call_ok(
        &dispatcher,
        "analyze_spending",
        json!({"analysis_type": "category_breakdown", "period": august()}),
    );
    let total: f64 = out["categories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["total"].as_f64().unwrap())
        .sum();
    assert_eq!(total, out["grand_total"].as_f64().unwrap());
    let pct: f64 = out["categories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["percentage"].as_f64().unwrap())
        .sum();
    assert!((pct - 100.0).abs() < 0.05, "percentages summed to {pct}");
}

#[test]
fn test_budget_variance_worked_example() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 10.0, 1, "a");
    insert_expense(&store, &food, 20.0, 10, "b");
    insert_expense(&store, &food, 30.0, 20, "c");
    insert_budget(&store, &food, 100.0);

    let out = call_ok(
        &dispatcher,
        "analyze_spending",
        json!({"analysis_type": "budget_variance", "period": august()}),
    );
    let row = &out["budgets"][0];
    assert_eq!(row["actual_amount"], json!(60.0));
    assert_eq!(row["variance"], json!(-40.0));
    assert_eq!(row["variance_percentage"], json!(-40.0));
    assert_eq!(row["status"], json!("under"));
}

#[test]
fn test_zero_budget_has_zero_percentage() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 60.0, 5, "a");
    insert_budget(&store, &food, 0.0);

    let out = call_ok(
        &dispatcher,
        "analyze_spending",
        json!({"analysis_type": "budget_variance", "period": august()}),
    );
    let row = &out["budgets"][0];
    assert_eq!(row["variance_percentage"], json!(0.0));
    assert_eq!(row["status"], json!("over"));
}

#[test]
fn test_pagination_has_next() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    for day in 1..=7 {
        insert_expense(&store, &food, 5.0, day, "snack");
    }

    let page2 = call_ok(
        &dispatcher,
        "query_transactions",
        json!({"pagination": {"page": 2, "limit": 3}}),
    );
    assert_eq!(page2["pagination"]["total"], json!(7));
    assert_eq!(page2["pagination"]["has_next"], json!(true));
    assert_eq!(page2["transactions"].as_array().unwrap().len(), 3);

    let page3 = call_ok(
        &dispatcher,
        "query_transactions",
        json!({"pagination": {"page": 3, "limit": 3}}),
    );
    assert_eq!(page3["pagination"]["has_next"], json!(false));
    assert_eq!(page3["transactions"].as_array().unwrap().len(), 1);
}

#[test]
fn test_oversized_limit_clamps() {
    let (_store, dispatcher) = setup();
    let out = call_ok(
        &dispatcher,
        "query_transactions",
        json!({"pagination": {"limit": 500}}),
    );
    assert_eq!(out["pagination"]["limit"], json!(100));
}

#[test]
fn test_query_filters_by_kind_and_search() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    let salary = category_id(&store, "Salary");
    insert_expense(&store, &food, 12.0, 3, "morning coffee");
    insert_expense(&store, &food, 40.0, 4, "dinner");
    store
        .insert_transaction(&NewTransaction {
            kind: TransactionKind::Income,
            amount: 1000.0,
            category_id: salary,
            ledger_id: ledger_id(&store),
            description: "paycheck".to_string(),
            date: date!(2026 - 08 - 15),
            tags: Vec::new(),
        })
        .unwrap();

    let expenses = call_ok(&dispatcher, "query_transactions", json!({"type": "expense"}));
    assert_eq!(expenses["pagination"]["total"], json!(2));

    let coffee = call_ok(
        &dispatcher,
        "query_transactions",
        json!({"filters": {"search": "coffee"}}),
    );
    assert_eq!(coffee["pagination"]["total"], json!(1));
    assert_eq!(
        coffee["transactions"][0]["description"],
        json!("morning coffee")
    );
}

#[test]
fn test_record_details_not_found() {
    let (_store, dispatcher) = setup();
    let (ok, payload) = call(
        &dispatcher,
        "get_record_details",
        json!({"record_type": "transaction", "record_id": "txn_999"}),
    );
    assert!(!ok);
    assert_eq!(payload, "transaction not found: txn_999");
}

#[test]
fn test_unknown_tool_and_operand() {
    let (_store, dispatcher) = setup();
    let (ok, payload) = call(&dispatcher, "fly_to_the_moon", json!({}));
    assert!(!ok);
    assert_eq!(payload, "unsupported value for tool: fly_to_the_moon");

    let (ok, payload) = call(
        &dispatcher,
        "get_summary",
        json!({"summary_type": "horoscope"}),
    );
    assert!(!ok);
    assert_eq!(payload, "unsupported value for summary_type: horoscope");
}

#[test]
fn test_summary_with_details() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    let salary = category_id(&store, "Salary");
    insert_expense(&store, &food, 60.0, 5, "groceries");
    store
        .insert_transaction(&NewTransaction {
            kind: TransactionKind::Income,
            amount: 100.0,
            category_id: salary,
            ledger_id: ledger_id(&store),
            description: "paycheck".to_string(),
            date: date!(2026 - 08 - 01),
            tags: Vec::new(),
        })
        .unwrap();

    let out = call_ok(
        &dispatcher,
        "get_summary",
        json!({"summary_type": "period_totals", "period": august(), "include_details": true}),
    );
    assert_eq!(out["totals"]["income"], json!(100.0));
    assert_eq!(out["totals"]["expenses"], json!(60.0));
    assert_eq!(out["totals"]["net"], json!(40.0));
    assert_eq!(out["totals"]["transaction_count"], json!(2));
    assert!(out["breakdown"].is_array());
}

#[test]
fn test_summary_custom_period_uses_date_range() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 45.0, 12, "groceries");

    let out = call_ok(
        &dispatcher,
        "get_summary",
        json!({
            "summary_type": "period_totals",
            "period": {"name": "custom"},
            "date_range": {"start_date": "2026-08-01", "end_date": "2026-08-31"},
        }),
    );
    assert_eq!(out["totals"]["expenses"], json!(45.0));
    assert_eq!(out["period"]["start"], json!("2026-08-01"));
    assert_eq!(out["period"]["end"], json!("2026-08-31"));
}

#[test]
fn test_period_accepts_bare_string_name() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 18.0, 5, "lunch");

    // Fixed today is 2026-08-28, so this_month covers the 5th.
    let summary = call_ok(
        &dispatcher,
        "get_summary",
        json!({"summary_type": "period_totals", "period": "this_month"}),
    );
    assert_eq!(summary["totals"]["expenses"], json!(18.0));
    assert_eq!(summary["period"]["start"], json!("2026-08-01"));

    let breakdown = call_ok(
        &dispatcher,
        "analyze_spending",
        json!({"analysis_type": "category_breakdown", "period": "this_month"}),
    );
    assert_eq!(breakdown["grand_total"], json!(18.0));

    let insights = call_ok(
        &dispatcher,
        "get_insights_data",
        json!({"data_scope": "spending_patterns", "period": {"current": "this_month"}}),
    );
    assert_eq!(insights["categories"][0]["total"], json!(18.0));
}

#[test]
fn test_read_operations_are_idempotent() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 10.0, 1, "a");
    insert_expense(&store, &food, 25.0, 15, "b");

    let args = json!({"analysis_type": "category_breakdown", "period": august()});
    let (_, first) = call(&dispatcher, "analyze_spending", args.clone());
    let (_, second) = call(&dispatcher, "analyze_spending", args);
    assert_eq!(first, second);
}

#[test]
fn test_batch_validate_only_persists_nothing() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    let before = transaction_count(&store);

    let out = call_ok(
        &dispatcher,
        "batch_create_transactions",
        json!({
            "validate_only": true,
            "transactions": [
                {"type": "expense", "amount": 5.0, "category_id": food, "date": "2026-08-01"},
                {"type": "expense", "amount": -1.0, "category_id": food},
                {"type": "expense", "amount": 5.0, "category_id": "cat_missing"},
            ],
        }),
    );
    assert_eq!(out["summary"]["total"], json!(3));
    assert_eq!(out["summary"]["succeeded"], json!(1));
    assert_eq!(out["summary"]["failed"], json!(2));
    assert_eq!(out["results"][0]["status"], json!("valid"));
    assert_eq!(out["results"][1]["status"], json!("error"));
    assert_eq!(
        out["results"][2]["error"],
        json!("category not found: cat_missing")
    );
    assert_eq!(transaction_count(&store), before);
}

#[test]
fn test_batch_partial_success() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");

    let out = call_ok(
        &dispatcher,
        "batch_create_transactions",
        json!({
            "transactions": [
                {"type": "expense", "amount": 8.0, "category_id": food, "description": "bagel"},
                {"type": "teleport", "amount": 8.0, "category_id": food},
            ],
        }),
    );
    assert_eq!(out["summary"]["succeeded"], json!(1));
    assert_eq!(out["summary"]["failed"], json!(1));
    assert_eq!(out["results"][0]["status"], json!("created"));
    assert!(out["results"][0]["id"].is_string());
    assert_eq!(
        out["results"][1]["error"],
        json!("unsupported value for type: teleport")
    );
    assert_eq!(transaction_count(&store), 1);
}

#[test]
fn test_batch_defaults_date_and_ledger() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    let out = call_ok(
        &dispatcher,
        "batch_create_transactions",
        json!({"transactions": [{"type": "expense", "amount": 3.5, "category_id": food}]}),
    );
    let id = out["results"][0]["id"].as_str().unwrap();
    let row = store
        .fetch_one(
            "SELECT date, ledger_id FROM transactions WHERE id = ?",
            &[SqlParam::from(id)],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row_str(&row, "date"), "2026-08-28");
    assert_eq!(row_str(&row, "ledger_id"), ledger_id(&store));
}

#[test]
fn test_csv_export_quotes_cells() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 4.5, 1, "coffee \"large\"");
    insert_expense(&store, &food, 12.0, 2, "lunch");

    let (ok, payload) = call(
        &dispatcher,
        "export_data",
        json!({"export_type": "transactions", "format": "csv"}),
    );
    assert!(ok);
    let lines: Vec<&str> = payload.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("\"description\""));
    assert!(payload.contains("\"coffee \"\"large\"\"\""));
}

#[test]
fn test_markdown_export_summary() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 30.0, 10, "groceries");

    let (ok, payload) = call(
        &dispatcher,
        "export_data",
        json!({
            "export_type": "summary_report",
            "format": "markdown",
            "options": {"period": august()},
        }),
    );
    assert!(ok);
    assert!(payload.starts_with("# Financial Summary"));
    assert!(payload.contains("| Expenses | 30.00 |"));
}

#[test]
fn test_unknown_export_format() {
    let (_store, dispatcher) = setup();
    let (ok, payload) = call(
        &dispatcher,
        "export_data",
        json!({"export_type": "transactions", "format": "xml"}),
    );
    assert!(!ok);
    assert_eq!(payload, "unsupported value for format: xml");
}

#[test]
fn test_full_backup_contains_all_tables() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 9.0, 1, "a");

    let out = call_ok(
        &dispatcher,
        "export_data",
        json!({"export_type": "full_backup", "format": "json"}),
    );
    for key in ["profile", "categories", "ledgers", "budgets", "transactions"] {
        assert!(out[key].is_array(), "missing {key} section");
    }
    assert_eq!(out["transactions"].as_array().unwrap().len(), 1);
}

#[test]
fn test_time_trend_buckets_ascending() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 5.0, 3, "a");
    insert_expense(&store, &food, 7.0, 3, "b");
    insert_expense(&store, &food, 11.0, 20, "c");

    let out = call_ok(
        &dispatcher,
        "analyze_spending",
        json!({"analysis_type": "time_trend", "grouping": "day", "period": august()}),
    );
    let buckets = out["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0]["bucket"], json!("2026-08-03"));
    assert_eq!(buckets[0]["expenses"], json!(12.0));
    assert_eq!(buckets[1]["bucket"], json!("2026-08-20"));
}

#[test]
fn test_insights_spending_patterns() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 10.0, 3, "groceries");
    insert_expense(&store, &food, 20.0, 17, "groceries");

    let out = call_ok(
        &dispatcher,
        "get_insights_data",
        json!({
            "data_scope": "spending_patterns",
            "period": {"current": august()},
        }),
    );
    let row = &out["categories"][0];
    assert_eq!(row["total"], json!(30.0));
    assert_eq!(row["count"], json!(2));
    assert_eq!(out["frequency_patterns"][0]["frequency"], json!(2));
    assert!(out["daily_totals"].is_array());
}

#[test]
fn test_insights_comparison_treats_missing_as_full_increase() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 50.0, 10, "new habit");

    let out = call_ok(
        &dispatcher,
        "get_insights_data",
        json!({
            "data_scope": "spending_patterns",
            "period": {
                "current": august(),
                "comparison": {"start_date": "2026-07-01", "end_date": "2026-07-31"},
            },
        }),
    );
    let change = &out["comparison"]["changes"][0];
    assert_eq!(change["previous_total"], json!(0.0));
    assert_eq!(change["percent_change"], json!(100.0));
}

#[test]
fn test_insights_budget_forecast() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    insert_budget(&store, &food, 100.0);
    // 62 spent over a 31-day window projects to 60/month, on track.
    insert_expense(&store, &food, 62.0, 1, "stock up");

    let out = call_ok(
        &dispatcher,
        "get_insights_data",
        json!({"data_scope": "budget_analysis", "period": {"current": august()}}),
    );
    let forecast = &out["forecast"][0];
    assert_eq!(forecast["daily_rate"], json!(2.0));
    assert_eq!(forecast["projected_monthly"], json!(60.0));
    assert_eq!(forecast["status"], json!("on_track"));
    assert_eq!(out["performance"][0]["percent_used"], json!(62.0));
}

#[test]
fn test_anomaly_detection_flags_outliers_and_new_merchants() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    // History in July establishes the baseline.
    store
        .insert_transaction(&NewTransaction {
            kind: TransactionKind::Expense,
            amount: 10.0,
            category_id: food.clone(),
            ledger_id: ledger_id(&store),
            description: "usual lunch".to_string(),
            date: date!(2026 - 07 - 05),
            tags: Vec::new(),
        })
        .unwrap();
    insert_expense(&store, &food, 10.0, 2, "usual lunch");
    insert_expense(&store, &food, 90.0, 15, "banquet hall");

    let out = call_ok(
        &dispatcher,
        "get_insights_data",
        json!({"data_scope": "anomaly_detection", "period": {"current": august()}}),
    );
    // 90 > 2 x mean(10, 10, 90).
    assert_eq!(out["outliers"][0]["amount"], json!(90.0));
    let merchants = out["new_merchants"].as_array().unwrap();
    assert_eq!(merchants.len(), 1);
    assert_eq!(merchants[0]["description"], json!("banquet hall"));
    // 90 on the 15th exceeds 1.5 x the 10/day July baseline.
    assert!(out["spikes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["date"] == json!("2026-08-15")));
}

#[test]
fn test_savings_potential_groups() {
    let (store, dispatcher) = setup();
    let food = category_id(&store, "Food");
    let fun = category_id(&store, "Entertainment");
    insert_expense(&store, &fun, 15.99, 1, "Streaming Monthly Premium");
    insert_expense(&store, &fun, 15.99, 28, "Streaming Monthly Premium");
    for day in 1..=5 {
        insert_expense(&store, &food, 4.0, day, "vending machine");
    }

    let out = call_ok(
        &dispatcher,
        "get_insights_data",
        json!({"data_scope": "savings_potential", "period": {"current": august()}}),
    );
    let recurring = out["recurring_charges"].as_array().unwrap();
    assert!(recurring
        .iter()
        .any(|r| r["description"] == json!("vending machine") && r["occurrences"] == json!(5)));
    assert!(recurring
        .iter()
        .any(|r| r["description"] == json!("Streaming Monthly Premium")));

    let micro = out["micro_transactions"].as_array().unwrap();
    assert_eq!(micro.len(), 1);
    assert_eq!(micro[0]["frequency"], json!(5));

    let subs = out["subscriptions"].as_array().unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0]["description"], json!("Streaming Monthly Premium"));
}

#[test]
fn test_account_data_tree_and_details() {
    let (store, dispatcher) = setup();
    let out = call_ok(&dispatcher, "get_account_data", json!({"data_type": "categories"}));
    assert!(out["categories"].as_array().unwrap().len() >= 10);
    assert_eq!(
        out["categories"].as_array().unwrap().len(),
        out["tree"].as_array().unwrap().len()
    );

    let profile = call_ok(&dispatcher, "get_account_data", json!({"data_type": "profile"}));
    assert_eq!(profile["profile"]["default_currency"], json!("USD"));

    let food = category_id(&store, "Food");
    insert_expense(&store, &food, 10.0, 1, "a");
    let txn = store
        .fetch_one("SELECT id FROM transactions LIMIT 1", &[])
        .unwrap()
        .unwrap();
    let details = call_ok(
        &dispatcher,
        "get_record_details",
        json!({"record_type": "transaction", "record_id": row_str(&txn, "id")}),
    );
    assert_eq!(details["transaction"]["amount"], json!(10.0));
    assert_eq!(details["transaction"]["category_name"], json!("Food"));
}

#[test]
fn test_file_backed_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("finsight.db");
    let path = path.to_str().unwrap();

    {
        let store = SqliteStore::new(path, "USD").unwrap();
        store.initialize().unwrap();
        let food = category_id(&store, "Food");
        store
            .insert_transaction(&NewTransaction {
                kind: TransactionKind::Expense,
                amount: 10.0,
                category_id: food,
                ledger_id: ledger_id(&store),
                description: "persisted".to_string(),
                date: date!(2026 - 08 - 01),
                tags: Vec::new(),
            })
            .unwrap();
        store.close().unwrap();
    }

    let reopened = SqliteStore::new(path, "USD").unwrap();
    reopened.initialize().unwrap();
    let row = reopened
        .fetch_one("SELECT COUNT(*) AS n FROM transactions", &[])
        .unwrap()
        .unwrap();
    assert_eq!(row_i64(&row, "n"), 1);
}
