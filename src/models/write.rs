use time::Date;

use crate::models::TransactionKind;

/// Fully validated transaction ready for insertion. Raw tool
/// arguments are checked in the batch layer before one of these is
/// built.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: f64,
    pub category_id: String,
    pub ledger_id: String,
    pub description: String,
    pub date: Date,
    pub tags: Vec<String>,
}
