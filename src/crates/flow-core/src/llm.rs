//! The `ChatModel` contract (§6): "object with `generate(messages, model,
//! tools?)` and `stream(messages, model, tools?)`". Concrete wire formats are
//! an external collaborator (§1); this module only fixes the shape every
//! provider client (the `llm` crate) and the Provider Adapter (C5, built on
//! top via retry/breaker wrapping) agree on.

use crate::error::Result;
use crate::messages::{Message, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Whether a thinking-capable model's reasoning trace should be captured,
/// discarded, or left interleaved with the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    /// Don't ask the provider to separate reasoning from the answer.
    #[default]
    Off,
    /// Capture the reasoning trace separately from the final answer.
    Separated,
}

impl ReasoningMode {
    pub fn should_capture(self) -> bool {
        matches!(self, ReasoningMode::Separated)
    }
}

/// A captured reasoning/thinking trace, kept apart from the answer text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningContent {
    pub content: String,
}

impl ReasoningContent {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }
}

/// Sampling and shaping parameters, independent of any one provider's wire format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequestConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub reasoning_mode: ReasoningMode,
}

/// A callable tool description passed to a provider that supports tool use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One non-streaming or streaming invocation of a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub config: ChatRequestConfig,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            config: ChatRequestConfig::default(),
            tools: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ChatRequestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Token usage as reported by the provider, §4.10's per-step cost hook reads
/// `output.cost`/`output.provider_result.cost` from values derived from this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
    pub reasoning_tokens: Option<usize>,
}

impl UsageMetadata {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            reasoning_tokens: None,
        }
    }

    pub fn with_reasoning(input_tokens: usize, output_tokens: usize, reasoning_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            reasoning_tokens: Some(reasoning_tokens),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<UsageMetadata>,
    pub reasoning: Option<ReasoningContent>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
}

impl ChatResponse {
    pub fn text(&self) -> &str {
        self.message.text().unwrap_or_default()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message.tool_calls.as_deref().unwrap_or_default()
    }
}

/// One chunk of a streamed response. The engine's streaming modes (§4.4:
/// `tokens`/`sentences`/`full`) group these deltas before forwarding them to
/// `stream_callback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamChunk {
    pub delta: String,
    pub done: bool,
    pub usage: Option<UsageMetadata>,
}

pub type ChatStreamResponse =
    std::pin::Pin<Box<dyn futures::Stream<Item = Result<ChatStreamChunk>> + Send>>;

/// The pluggable provider contract. `401`/`403` are reported through
/// `Result`'s error variants (`FlowCoreError::ProviderAuth`), never panics.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
    async fn stream(&self, request: ChatRequest) -> Result<ChatStreamResponse>;
    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }
    fn clone_box(&self) -> Box<dyn ChatModel>;
}

impl Clone for Box<dyn ChatModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
