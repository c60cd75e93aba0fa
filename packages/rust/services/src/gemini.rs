//! Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use thesiskit_shared::{
    AppConfig, ContentGenerator, GeminiConfig, GenerationContext, Result, ThesisError,
    gemini_api_key,
};

use crate::USER_AGENT;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Text generation through the Generative Language API.
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ThesisError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
        })
    }

    /// Build a client from the app config, reading the key from the
    /// configured environment variable.
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        Self::new(&config.gemini, gemini_api_key(config)?)
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

/// Full prompt sent for one pending block.
pub fn compose_prompt(prompt: &str, context: &GenerationContext) -> String {
    let mut out = format!(
        "You are writing an academic work titled \"{}\".\n",
        context.project_title
    );
    if let Some(brief) = context.brief.as_deref().filter(|b| !b.trim().is_empty()) {
        out.push_str(&format!("Assignment: {}\n", brief.trim()));
    }
    if !context.section_path.is_empty() {
        out.push_str(&format!("Section: {}\n", context.section_path.join(" > ")));
    }
    out.push_str(
        "Write formal academic prose as plain paragraphs separated by blank lines. \
         Do not repeat the section title and do not use Markdown.\n\n",
    );
    out.push_str(prompt.trim());
    out
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn into_text(self) -> Option<String> {
        let parts = self.candidates.into_iter().next()?.content?.parts;
        let text: String = parts.into_iter().filter_map(|p| p.text).collect();
        Some(text).filter(|t| !t.trim().is_empty())
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    #[instrument(skip_all, fields(model = %self.model, location = %context.location))]
    async fn generate(&self, prompt: &str, context: &GenerationContext) -> Result<String> {
        let service_error = |message: String| ThesisError::ContentService {
            location: context.location.clone(),
            message,
        };

        let full_prompt = compose_prompt(prompt, context);
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: &full_prompt }],
            }],
        };

        let response = self
            .client
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| service_error(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(service_error(format!("HTTP {status}: {}", detail.trim())));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| service_error(format!("malformed response: {e}")))?;
        let text = parsed
            .into_text()
            .ok_or_else(|| service_error("response contained no text".into()))?;

        debug!(chars = text.len(), "generated text");
        Ok(text)
    }
}
