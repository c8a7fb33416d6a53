//! Ollama integration for local LLM generation
//!
//! Calls the Ollama REST API for chapter extraction and batch translation,
//! always requesting JSON-shaped responses.

use crate::backend::StructuredGenerator;
use crate::config::OllamaConfig;
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Ollama client for making API calls
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        }
    }

    /// Generate a raw completion from Ollama
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, PipelineError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            system: system.map(|s| s.to_string()),
            stream: false,
            options: Some(GenerateOptions {
                temperature: 0.3, // Lower temperature for more consistent output
                num_predict: 2048,
            }),
        };

        log::info!(
            "Sending request to Ollama: model={}, prompt_len={}",
            self.model,
            prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                PipelineError::TransientNetwork(format!("Failed to call Ollama: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::TransientNetwork(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: GenerateResponse = response.json().await.map_err(|e| {
            PipelineError::TransientNetwork(format!("Failed to parse Ollama response: {}", e))
        })?;

        log::info!(
            "Ollama response received: {} chars, eval_duration={:?}ms",
            result.response.len(),
            result.eval_duration.map(|d| d / 1_000_000)
        );

        Ok(result.response)
    }
}

#[async_trait]
impl StructuredGenerator for OllamaGenerator {
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        schema: &Value,
    ) -> Result<Value, PipelineError> {
        let full_prompt = format!(
            "{}\n\nRespond with JSON only, matching this shape:\n{}",
            prompt, schema
        );

        let default_system = "You are a structured-output assistant. Always respond with valid JSON and nothing else.";
        let system = system.or(Some(default_system));

        let response = self.complete(&full_prompt, system).await?;

        extract_json_from_response(&response).ok_or_else(|| {
            PipelineError::Validation(format!(
                "no parseable JSON in model response ({} chars)",
                response.len()
            ))
        })
    }
}

/// Extract JSON from LLM response (handles markdown code blocks)
fn extract_json_from_response(response: &str) -> Option<Value> {
    let trimmed = response.trim();

    // Try direct parse first
    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        return Some(json);
    }

    // Try to extract from markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after_marker = &trimmed[start + 7..];
        if let Some(end) = after_marker.find("```") {
            let json_str = &after_marker[..end].trim();
            if let Ok(json) = serde_json::from_str::<Value>(json_str) {
                return Some(json);
            }
        }
    }

    // Try to find a JSON object or array in the response. Whichever
    // bracket opens first wins, so an array wrapped in prose is not
    // mistaken for its first element.
    let mut openings: Vec<(usize, char, char)> = [('{', '}'), ('[', ']')]
        .iter()
        .filter_map(|&(open, close)| trimmed.find(open).map(|pos| (pos, open, close)))
        .collect();
    openings.sort_by_key(|&(pos, _, _)| pos);

    for (start, open, close) in openings {
        // Find matching closing bracket
        let mut depth = 0;
        let mut end = start;
        for (i, c) in trimmed[start..].char_indices() {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
        }
        if end > start {
            if let Ok(json) = serde_json::from_str::<Value>(&trimmed[start..end]) {
                return Some(json);
            }
        }
    }

    None
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_duration: Option<u64>,
}
