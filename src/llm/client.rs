use std::time::Duration;

use reqwest::Client;

use super::ExtractionBackend;
use super::error::ExtractError;
use super::types::{ChatMessage, ChatRequest, ChatResponse, PaperMeta};
use crate::batch::{FieldSet, Job};
use crate::metadata;

pub const API_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";

const PROMPT_TEMPLATE: &str = r#"You are an expert at extracting metadata from academic papers. Extract the paper's metadata from the first-page text below.

Reply with exactly this JSON structure and no surrounding commentary:
{
  "title": "paper title",
  "authors": [
    {
      "name": "author name",
      "order": 1,
      "affiliation": "author institution",
      "is_first_author": true,
      "is_corresponding_author": false,
      "email": "email address if present"
    }
  ],
  "abstract": "abstract text",
  "keywords": ["keyword 1", "keyword 2"],
  "emails": ["email 1"],
  "confidence": 0.95
}

Author order must follow visual reading order: rows top to bottom, left to right within a row.

Only fill keywords when the page labels them "Keyword"/"Keywords"; keep short forms such as "Gp" or "LLM" as written.

First-page text:
"#;

/// HTTP client for the OpenAI-compatible chat-completions service.
///
/// Performs exactly one request per `extract` call and maps every failure
/// onto the `ExtractError` taxonomy; retry and rate decisions happen in
/// the worker pool.
pub struct ExtractionClient {
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    base_url: String,
    client: Client,
}

impl ExtractionClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, API_URL.to_string())
    }

    /// Create a client pointing at a custom endpoint (useful for testing).
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");
        Self {
            api_key,
            model,
            max_tokens: 4000,
            temperature: 0.1,
            base_url,
            client,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_request(&self, page_text: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: format!("{PROMPT_TEMPLATE}{page_text}"),
            }],
        }
    }

    async fn call(&self, job: &Job) -> Result<FieldSet, ExtractError> {
        let req = self.build_request(&job.document.text);

        let response = self
            .client
            .post(&self.base_url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&req)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000))
                .unwrap_or(1000);
            return Err(ExtractError::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ExtractError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<ChatResponse>().await?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ExtractError::Malformed("reply has no choices".into()))?;

        let meta = PaperMeta::parse_reply(content)?;
        Ok(metadata::assemble(job.mode, &meta, &job.document.filename))
    }
}

impl ExtractionBackend for ExtractionClient {
    async fn extract(&self, job: &Job) -> Result<FieldSet, ExtractError> {
        self.call(job).await
    }
}
