use serde::Serialize;
use serde_json::Value;

/// Result shapes returned by the query builder and the aggregation
/// engine. Everything here is plain data; the dispatcher serializes
/// it into the response envelope.

#[derive(Debug, Clone, Serialize)]
pub struct PeriodInfo {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub has_next: bool,
}

#[derive(Debug, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<Value>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBreakdownRow {
    pub category_id: String,
    pub category_name: String,
    pub total: f64,
    pub count: i64,
    pub average: f64,
    pub percentage: f64,
}

#[derive(Debug, Serialize)]
pub struct CategoryBreakdown {
    pub period: PeriodInfo,
    pub grand_total: f64,
    pub categories: Vec<CategoryBreakdownRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendBucket {
    pub bucket: String,
    pub expenses: f64,
    pub income: f64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct TimeTrend {
    pub period: PeriodInfo,
    pub grouping: String,
    pub buckets: Vec<TrendBucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetVarianceRow {
    pub budget_id: String,
    pub category_id: String,
    pub category_name: String,
    pub budget_period: String,
    pub budgeted_amount: f64,
    pub actual_amount: f64,
    pub variance: f64,
    pub variance_percentage: f64,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct BudgetVariance {
    pub period: PeriodInfo,
    pub budgets: Vec<BudgetVarianceRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub validate_only: bool,
    pub results: Vec<BatchItemResult>,
    pub summary: BatchSummary,
}
