//! Conversation gateway over an external generative-AI capability.
//!
//! A [`ConversationProvider`] opens conversations; each open conversation is
//! a [`ConversationHandle`] that remembers its own context on the provider
//! side. Sessions own exactly one handle each.

mod gemini;

pub use gemini::GeminiProvider;

use async_trait::async_trait;
use std::sync::Arc;

/// Failure of the external conversation capability.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{cause}")]
pub struct ConversationError {
    pub cause: String,
    pub status_code: Option<u16>,
}

impl ConversationError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            status_code: None,
        }
    }

    pub fn with_status(cause: impl Into<String>, status_code: u16) -> Self {
        Self {
            cause: cause.into(),
            status_code: Some(status_code),
        }
    }
}

/// One live conversation with remembered context.
#[async_trait]
pub trait Conversation: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    /// Send a user message and return the reply text.
    ///
    /// On success the exchange becomes part of the remembered context. On
    /// failure the context is left as it was.
    async fn send(&self, text: &str) -> Result<String, ConversationError>;
}

pub type ConversationHandle = Arc<dyn Conversation>;

/// Factory for conversations.
pub trait ConversationProvider: Send + Sync {
    /// Provider name (e.g., "gemini").
    fn name(&self) -> &str;

    /// Open a fresh conversation with empty context. Must not block.
    fn start_conversation(&self) -> ConversationHandle;
}

/// Reply from the conversation capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotReply {
    pub text: String,
}

/// Entry point used by request handling.
#[derive(Clone)]
pub struct ConversationGateway {
    provider: Arc<dyn ConversationProvider>,
}

impl ConversationGateway {
    pub fn new(provider: Arc<dyn ConversationProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn start(&self) -> ConversationHandle {
        let handle = self.provider.start_conversation();
        tracing::debug!(
            provider = self.provider.name(),
            conversation = handle.id(),
            "Conversation started"
        );
        handle
    }

    /// Send `text` through `handle`. A single attempt; no retry.
    pub async fn send(
        &self,
        handle: &ConversationHandle,
        text: &str,
    ) -> Result<BotReply, ConversationError> {
        let start = std::time::Instant::now();
        match handle.send(text).await {
            Ok(reply) => {
                tracing::debug!(
                    conversation = handle.id(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    reply_len = reply.len(),
                    "Conversation reply received"
                );
                Ok(BotReply { text: reply })
            }
            Err(err) => {
                tracing::warn!(
                    conversation = handle.id(),
                    status = ?err.status_code,
                    error = %err,
                    "Conversation send failed"
                );
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for ConversationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationGateway")
            .field("provider", &self.provider.name())
            .finish()
    }
}
