//! Column-mapping suggestion providers.
//!
//! A provider turns a file's headers and sample rows into a stream of
//! progressively filled [`PartialMapping`] objects.

pub mod gemini;
pub mod mock;

use crate::models::{MappableField, PartialMapping};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Number of sample rows included in the prompt.
pub const PROMPT_SAMPLE_ROWS: usize = 4;

/// Error type for provider operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Content filtered")]
    ContentFiltered,

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Stream of partial mapping deliveries.
pub type MappingStream =
    Pin<Box<dyn Stream<Item = Result<PartialMapping, ProviderError>> + Send>>;

#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    /// Start a mapping suggestion for the given file sample.
    async fn suggest_mapping(
        &self,
        columns: &[String],
        rows: &[BTreeMap<String, String>],
    ) -> Result<MappingStream, ProviderError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// Instruction text sent to the model.
pub fn build_mapping_prompt(columns: &[String], rows: &[BTreeMap<String, String>]) -> String {
    let targets = MappableField::ALL
        .iter()
        .map(|f| f.key())
        .collect::<Vec<_>>()
        .join(", ");
    let sample: Vec<_> = rows.iter().take(PROMPT_SAMPLE_ROWS).collect();
    let sample = serde_json::to_string(&sample).unwrap_or_else(|_| "[]".to_string());

    format!(
        "You are mapping the columns of a bank transaction CSV export onto these \
         fields: {targets}.\n\
         For each field, answer with the exact name of the CSV column that holds it. \
         Use the sample rows only to understand what each column contains; map \
         columns, not values. Leave a field out when no column matches or you are \
         unsure.\n\n\
         Columns: {columns}\n\
         Sample rows: {sample}",
        columns = columns.join(", "),
    )
}

/// JSON schema of the structured response: every field optional, string valued.
pub fn mapping_schema() -> serde_json::Value {
    let properties: serde_json::Map<String, serde_json::Value> = MappableField::ALL
        .iter()
        .map(|f| (f.key().to_string(), json!({ "type": "string" })))
        .collect();

    json!({
        "type": "object",
        "properties": properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_columns_and_truncates_rows() {
        let columns = vec!["Date".to_string(), "Memo".to_string()];
        let rows: Vec<BTreeMap<String, String>> = (0..10)
            .map(|i| {
                let mut row = BTreeMap::new();
                row.insert("Memo".to_string(), format!("row-{}", i));
                row
            })
            .collect();

        let prompt = build_mapping_prompt(&columns, &rows);

        assert!(prompt.contains("Columns: Date, Memo"));
        assert!(prompt.contains("row-3"));
        assert!(!prompt.contains("row-4"));
        assert!(prompt.contains("date, description, amount, balance, currency, account"));
    }

    #[test]
    fn schema_has_a_property_per_field() {
        let schema = mapping_schema();
        let properties = schema["properties"].as_object().unwrap();
        assert_eq!(properties.len(), MappableField::ALL.len());
        assert_eq!(properties["amount"]["type"], "string");
    }
}
