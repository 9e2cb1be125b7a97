use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use crate::{
    analytics::{
        accounts::{account_data, AccountDataRequest},
        details::{record_details, RecordDetailsRequest},
        insights::{insights, InsightsRequest},
        spending::{budget_variance, category_breakdown, time_trend, AnalysisFilters},
        summary::{budget_status, period_totals, quick_stats},
    },
    batch::{batch_create_transactions, BatchRequest},
    config::Config,
    error::ToolError,
    period::{PeriodSpec, Window},
    query::{self, TransactionQuery},
    report::{export_data, ExportRequest},
    storage::FinanceStore,
};

/// Per-invocation clock. Aggregations resolve named periods against
/// this date, so a fixed context yields fixed results.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub today: Date,
}

#[derive(Debug, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub ok: bool,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    analysis_type: String,
    #[serde(default)]
    period: Option<PeriodSpec>,
    #[serde(default)]
    grouping: Option<String>,
    #[serde(default)]
    filters: Option<AnalysisFilters>,
}

#[derive(Debug, Deserialize)]
struct SummaryRequest {
    summary_type: String,
    #[serde(default)]
    period: Option<PeriodSpec>,
    #[serde(default)]
    date_range: Option<PeriodSpec>,
    #[serde(default)]
    include_details: bool,
}

pub struct Dispatcher {
    store: Arc<dyn FinanceStore>,
    config: Arc<Config>,
}

fn decode<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::Validation(format!("invalid arguments: {e}")))
}

fn pretty<T: Serialize>(value: &T) -> Result<String, ToolError> {
    serde_json::to_string_pretty(value).map_err(|e| ToolError::Validation(e.to_string()))
}

/// Resolve an optional period spec, defaulting to the current month.
/// A name-only period borrows explicit dates from `date_range`, so
/// `period: "custom"` plus a separate range resolves to that range.
fn resolve_window(
    today: Date,
    period: Option<&PeriodSpec>,
    date_range: Option<&PeriodSpec>,
) -> Result<Window, ToolError> {
    let merged = match (period, date_range) {
        (Some(p), Some(r)) if p.start.is_none() && p.end.is_none() => PeriodSpec {
            name: p.name.clone(),
            start: r.start.clone(),
            end: r.end.clone(),
        },
        (Some(p), _) => p.clone(),
        (None, Some(r)) => r.clone(),
        (None, None) => PeriodSpec {
            name: Some("this_month".to_string()),
            ..Default::default()
        },
    };
    merged.resolve(today)
}

impl Dispatcher {
    pub fn new(store: Arc<dyn FinanceStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Run one tool call to completion and wrap the outcome. Success
    /// carries the serialized payload; failure carries the error's
    /// display text.
    pub fn handle(&self, ctx: &RequestContext, call: ToolCall) -> ToolResponse {
        tracing::debug!(tool = %call.tool, "dispatching tool call");
        match self.dispatch(ctx, &call.tool, call.arguments) {
            Ok(payload) => ToolResponse { ok: true, payload },
            Err(err) => {
                tracing::warn!(tool = %call.tool, error = %err, "tool call failed");
                ToolResponse {
                    ok: false,
                    payload: err.to_string(),
                }
            }
        }
    }

    fn dispatch(&self, ctx: &RequestContext, tool: &str, args: Value) -> Result<String, ToolError> {
        let store: &dyn FinanceStore = self.store.as_ref();
        match tool {
            "get_account_data" => {
                let req: AccountDataRequest = decode(args)?;
                pretty(&account_data(store, &req)?)
            }
            "query_transactions" => {
                let req: TransactionQuery = decode(args)?;
                pretty(&query::run(store, &self.config, &req)?)
            }
            "analyze_spending" => {
                let req: AnalyzeRequest = decode(args)?;
                let window = resolve_window(ctx.today, req.period.as_ref(), None)?;
                let filters = req.filters.unwrap_or_default();
                match req.analysis_type.as_str() {
                    "category_breakdown" => {
                        pretty(&category_breakdown(store, &window, &filters)?)
                    }
                    "time_trend" => pretty(&time_trend(
                        store,
                        &window,
                        req.grouping.as_deref(),
                        &filters,
                    )?),
                    "budget_variance" => pretty(&budget_variance(store, &window)?),
                    other => Err(ToolError::unknown("analysis_type", other)),
                }
            }
            "get_summary" => {
                let req: SummaryRequest = decode(args)?;
                let window =
                    resolve_window(ctx.today, req.period.as_ref(), req.date_range.as_ref())?;
                match req.summary_type.as_str() {
                    "period_totals" => {
                        pretty(&period_totals(store, &window, req.include_details)?)
                    }
                    "budget_status" => pretty(&budget_status(store, &window)?),
                    "quick_stats" => pretty(&quick_stats(store, &window)?),
                    other => Err(ToolError::unknown("summary_type", other)),
                }
            }
            "get_record_details" => {
                let req: RecordDetailsRequest = decode(args)?;
                pretty(&record_details(store, ctx.today, &req)?)
            }
            "get_insights_data" => {
                let req: InsightsRequest = decode(args)?;
                pretty(&insights(store, ctx.today, &req)?)
            }
            "batch_create_transactions" => {
                let req: BatchRequest = decode(args)?;
                pretty(&batch_create_transactions(
                    store,
                    &self.config,
                    ctx.today,
                    &req,
                )?)
            }
            "export_data" => {
                let req: ExportRequest = decode(args)?;
                export_data(store, ctx.today, &req)
            }
            other => Err(ToolError::unknown("tool", other)),
        }
    }
}
