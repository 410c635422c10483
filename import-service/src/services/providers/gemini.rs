//! Gemini suggestion provider.
//!
//! Requests a structured JSON answer from `streamGenerateContent` over SSE
//! and re-parses the accumulated text after every chunk, emitting a new
//! partial mapping whenever another member completes.

use super::{
    build_mapping_prompt, mapping_schema, MappingStream, ProviderError, SuggestionProvider,
};
use crate::models::PartialMapping;
use crate::services::partial_json::parse_partial_object;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Gemini API base URL.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini provider configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

pub struct GeminiSuggestionProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiSuggestionProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.config.base_url,
            self.config.model,
            method,
            self.config.api_key.expose_secret()
        )
    }
}

#[async_trait]
impl SuggestionProvider for GeminiSuggestionProvider {
    async fn suggest_mapping(
        &self,
        columns: &[String],
        rows: &[BTreeMap<String, String>],
    ) -> Result<MappingStream, ProviderError> {
        if columns.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "No file columns to map".to_string(),
            ));
        }

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![ContentPart {
                    text: build_mapping_prompt(columns, rows),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: Some(0.0),
                response_mime_type: "application/json".to_string(),
                response_schema: mapping_schema(),
            },
        };

        let url = format!("{}&alt=sse", self.api_url("streamGenerateContent"));

        tracing::debug!(
            model = %self.config.model,
            column_count = columns.len(),
            row_count = rows.len(),
            "Starting mapping suggestion stream"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }

            return Err(ProviderError::ApiError(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut accumulator = PartialAccumulator::default();

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::NetworkError(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in decoder.push(&chunk) {
                    let Ok(event) = serde_json::from_str::<GenerateContentResponse>(&data) else {
                        tracing::debug!("Skipping unparseable SSE event");
                        continue;
                    };

                    let Some(candidate) = event.candidates.first() else {
                        continue;
                    };

                    if candidate.finish_reason.as_deref() == Some("SAFETY") {
                        let _ = tx.send(Err(ProviderError::ContentFiltered)).await;
                        return;
                    }

                    for part in &candidate.content.parts {
                        if let Some(partial) = accumulator.push(&part.text) {
                            if tx.send(Ok(partial)).await.is_err() {
                                // Receiver dropped: the suggestion was cancelled.
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as MappingStream)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.expose_secret().is_empty() {
            return Err(ProviderError::NotConfigured(
                "Gemini API key not configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Bytes are buffered until an event is complete, so a multi-byte character
/// split across network chunks is decoded whole.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(event_end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buffer.drain(..event_end + 2).collect();
            let Ok(event) = std::str::from_utf8(&raw) else {
                tracing::debug!("Skipping SSE event with invalid UTF-8");
                continue;
            };
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            if !data.is_empty() {
                events.push(data.join("\n"));
            }
        }
        events
    }
}

/// Accumulates streamed text and reports each new partial object.
#[derive(Default)]
struct PartialAccumulator {
    text: String,
    last: Option<PartialMapping>,
}

impl PartialAccumulator {
    fn push(&mut self, chunk: &str) -> Option<PartialMapping> {
        self.text.push_str(chunk);
        let partial = parse_partial_object(&self.text)?;
        if self.last.as_ref() == Some(&partial) {
            return None;
        }
        self.last = Some(partial.clone());
        Some(partial)
    }
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
}
