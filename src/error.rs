use thiserror::Error;

use crate::storage::StoreError;

/// Error taxonomy surfaced through the response envelope. Display
/// text is what callers see, so messages name the offending value.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("unsupported value for {field}: {value}")]
    UnknownOperand { field: &'static str, value: String },

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl ToolError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        ToolError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn unknown(field: &'static str, value: &str) -> Self {
        ToolError::UnknownOperand {
            field,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_offender() {
        assert_eq!(
            ToolError::not_found("transaction", "txn_999").to_string(),
            "transaction not found: txn_999"
        );
        assert_eq!(
            ToolError::unknown("period", "last_decade").to_string(),
            "unsupported value for period: last_decade"
        );
    }
}
