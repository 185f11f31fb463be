//! Google Gemini conversation provider.
//!
//! Gemini's `generateContent` endpoint is stateless, so each conversation
//! keeps its own contents and resends them with every message.

use super::{Conversation, ConversationError, ConversationHandle, ConversationProvider};
use async_trait::async_trait;
use parley_common::GeminiConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

impl Content {
    fn user(text: &str) -> Self {
        Self {
            role: "user",
            parts: vec![Part { text: text.into() }],
        }
    }

    fn model(text: &str) -> Self {
        Self {
            role: "model",
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f64,
    top_p: f64,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

// ══════════════════════════════════════════════════════════════════════════════
// PROVIDER
// ══════════════════════════════════════════════════════════════════════════════

/// Opens Gemini conversations sharing one HTTP client.
pub struct GeminiProvider {
    client: Client,
    config: Arc<GeminiConfig>,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            config: Arc::new(config),
        }
    }
}

impl ConversationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn start_conversation(&self) -> ConversationHandle {
        Arc::new(GeminiConversation {
            id: Uuid::new_v4().to_string(),
            client: self.client.clone(),
            config: self.config.clone(),
            contents: Mutex::new(Vec::new()),
        })
    }
}

struct GeminiConversation {
    id: String,
    client: Client,
    config: Arc<GeminiConfig>,
    /// Whole transcript, unbounded. Once it outgrows the model's context
    /// window every send fails until the session is evicted or dropped.
    contents: Mutex<Vec<Content>>,
}

impl GeminiConversation {
    fn endpoint(&self) -> String {
        let model = &self.config.model;
        let model_name = if model.starts_with("models/") {
            model.clone()
        } else {
            format!("models/{model}")
        };
        format!(
            "{}/{model_name}:generateContent?key={}",
            self.config.base_url,
            self.config.api_key.expose()
        )
    }

    async fn generate(&self, contents: &[Content]) -> Result<String, ConversationError> {
        let request = GenerateContentRequest {
            contents,
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "text/plain",
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors carry the URL, which carries the key
                ConversationError::new(format!("Request failed: {}", e.without_url()))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ConversationError::with_status(
                format!("API error ({}): {}", status.as_u16(), error_text),
                status.as_u16(),
            ));
        }

        let result: GenerateContentResponse = response.json().await.map_err(|e| {
            ConversationError::new(format!("Failed to parse response: {}", e.without_url()))
        })?;

        if let Some(err) = result.error {
            return Err(ConversationError::new(format!("API error: {}", err.message)));
        }

        let candidate = result
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ConversationError::new("No response from Gemini"))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
            return Err(ConversationError::new(format!(
                "Empty response from Gemini (finish reason: {reason})"
            )));
        }

        Ok(text)
    }
}

#[async_trait]
impl Conversation for GeminiConversation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, text: &str) -> Result<String, ConversationError> {
        // Held across the request so exchanges land in context in send order.
        let mut contents = self.contents.lock().await;

        let mut outgoing = contents.clone();
        outgoing.push(Content::user(text));

        let reply = self.generate(&outgoing).await?;

        contents.push(Content::user(text));
        contents.push(Content::model(&reply));
        Ok(reply)
    }
}
