//! Provider Adapter (C5, §4.4): the retry/timeout/circuit-breaker wrapper
//! and streaming-mode grouping that turns a bare `ChatModel` client into the
//! `call_ai` contract the Step Scheduler dispatches `ai`/`agent` nodes
//! through. Concrete clients (`local`/`remote`) only implement the wire
//! format; this module is where §4.4's numbered steps live.

use flow_core::breaker::{provider_key, CircuitBreaker};
use flow_core::llm::{ChatModel, ChatRequest, ChatResponse, ToolSpec};
use flow_core::retry::{with_retry, RetryPolicy};
use flow_core::Message;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

/// §4.4's closing error taxonomy.
#[derive(Debug, Error)]
pub enum ProviderAdapterError {
    #[error("provider configuration error: {0}")]
    Config(String),

    #[error("provider authentication failed: {0}")]
    Auth(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: usize, last_error: String },

    #[error("circuit open for '{0}', rejecting call until cooldown elapses")]
    CircuitOpen(String),

    #[error("streaming does not support tool calls")]
    StreamingToolsUnsupported,

    #[error("provider error: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, ProviderAdapterError>;

/// §4.4 step 4's three grouping modes for streamed chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    #[default]
    Tokens,
    Sentences,
    Full,
}

/// One emission the streaming path hands to `stream_callback` (§6's stream
/// event payload). `Chunk`/`Done` come from the Provider Adapter; `StateChange`
/// is emitted by the Statement Interpreter's `set state.<field>` handling
/// (§4.3) onto the same sink, matching the single stream-event channel the
/// original runtime routes both through.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk { delta: String },
    Done { full: String },
    StateChange { path: String, old_value: flow_core::Value, new_value: flow_core::Value },
}

/// `{status, duration, retry_count, error_class}` — emitted around every
/// call per §4.4 step 5. `flow-engine`'s Observability Sink (C14) consumes
/// these; the adapter only produces them, never interprets them.
#[derive(Debug, Clone)]
pub struct ProviderCallEvent {
    pub provider_key: String,
    pub status: ProviderCallStatus,
    pub duration: Duration,
    pub retry_count: usize,
    pub error_class: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCallStatus {
    Running,
    Success,
    Timeout,
    CircuitOpen,
    Failure,
}

/// Tracks `ok`/`unauthorized` per provider key after each call (§4.4 step
/// 6: "Update provider status ... in registries after success or 401/403").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Ok,
    Unauthorized,
}

fn classify_retriable(e: &ProviderAdapterError) -> bool {
    matches!(
        e,
        ProviderAdapterError::Timeout(_) | ProviderAdapterError::Provider(_)
    )
}

/// Wraps a registry of named `ChatModel` clients with the circuit breaker,
/// retry policy, and timeout that every `ai`/`agent` step invocation goes
/// through (§4.4 steps 1-6).
pub struct ProviderAdapter {
    clients: HashMap<String, Arc<dyn ChatModel>>,
    breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
    call_timeout: Duration,
    statuses: RwLock<HashMap<String, ProviderStatus>>,
}

impl ProviderAdapter {
    pub fn new(breaker: CircuitBreaker, retry_policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            breaker,
            retry_policy,
            call_timeout,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, provider: impl Into<String>, model_alias: impl Into<String>, client: Arc<dyn ChatModel>) {
        self.clients.insert(format!("{}:{}", provider.into(), model_alias.into()), client);
    }

    fn client_for(&self, provider: &str, model: &str) -> Result<Arc<dyn ChatModel>> {
        self.clients
            .get(&format!("{provider}:{model}"))
            .cloned()
            .ok_or_else(|| ProviderAdapterError::Config(format!("no provider client registered for '{provider}:{model}'")))
    }

    pub fn status_of(&self, provider: &str, model: &str) -> Option<ProviderStatus> {
        self.statuses.read().unwrap().get(&provider_key(provider, model)).copied()
    }

    /// §4.4 step 1-3: non-streaming `call_ai`. Returns the response plus the
    /// `ProviderCallEvent` the caller should forward to the Observability
    /// Sink. `tools` is empty for a plain `ai` call; an `agent` call passes
    /// the tool specs its tool-invoke-and-feedback loop may dispatch.
    pub async fn generate(
        &self,
        provider: &str,
        model: &str,
        messages: Vec<Message>,
        tools: Vec<ToolSpec>,
    ) -> (Result<ChatResponse>, ProviderCallEvent) {
        let key = provider_key(provider, model);
        let start = Instant::now();

        if !self.breaker.should_allow_call(&key) {
            let event = ProviderCallEvent {
                provider_key: key.clone(),
                status: ProviderCallStatus::CircuitOpen,
                duration: start.elapsed(),
                retry_count: 0,
                error_class: Some("CircuitOpen".to_string()),
            };
            return (Err(ProviderAdapterError::CircuitOpen(key)), event);
        }

        let client = match self.client_for(provider, model) {
            Ok(c) => c,
            Err(e) => {
                let event = ProviderCallEvent {
                    provider_key: key,
                    status: ProviderCallStatus::Failure,
                    duration: start.elapsed(),
                    retry_count: 0,
                    error_class: Some("ProviderConfigError".to_string()),
                };
                return (Err(e), event);
            }
        };

        let request = ChatRequest::new(messages).with_tools(tools);
        let timeout = self.call_timeout;
        let outcome = with_retry(
            &self.retry_policy,
            |_attempt| {
                let client = client.clone();
                let request = request.clone();
                async move {
                    match tokio::time::timeout(timeout, client.chat(request)).await {
                        Ok(Ok(resp)) => Ok(resp),
                        Ok(Err(e)) => Err(classify_chat_error(e)),
                        Err(_) => Err(ProviderAdapterError::Timeout(timeout)),
                    }
                }
            },
            classify_retriable,
        )
        .await;

        match outcome {
            Ok((response, retry_state)) => {
                self.breaker.record_success(&key);
                self.statuses.write().unwrap().insert(key.clone(), ProviderStatus::Ok);
                let event = ProviderCallEvent {
                    provider_key: key,
                    status: ProviderCallStatus::Success,
                    duration: start.elapsed(),
                    retry_count: retry_state.attempts,
                    error_class: None,
                };
                (Ok(response), event)
            }
            Err(e) => {
                self.breaker.record_failure(&key);
                if matches!(e, ProviderAdapterError::Auth(_)) {
                    self.statuses.write().unwrap().insert(key.clone(), ProviderStatus::Unauthorized);
                }
                let status = if matches!(e, ProviderAdapterError::Timeout(_)) {
                    ProviderCallStatus::Timeout
                } else {
                    ProviderCallStatus::Failure
                };
                let event = ProviderCallEvent {
                    provider_key: key.clone(),
                    status,
                    duration: start.elapsed(),
                    retry_count: self.retry_policy.max_attempts,
                    error_class: Some(error_class_name(&e)),
                };
                let wrapped = ProviderAdapterError::RetryExhausted { attempts: self.retry_policy.max_attempts, last_error: e.to_string() };
                (Err(wrapped), event)
            }
        }
    }

    /// §4.4 step 4: streaming `call_ai`. `mode` controls how provider
    /// chunks are grouped before being handed to the caller's sink. Returns
    /// the full text plus the `ProviderCallEvent` the caller forwards to the
    /// Observability Sink, mirroring `generate`'s return shape — §4.4 step 5
    /// ("Always emit `provider_call_start/end` events ...") applies to both
    /// call paths, not just the non-streaming one. Streaming does not
    /// support tool calls (§4.4: "requesting tools with stream raises").
    pub async fn stream(
        &self,
        provider: &str,
        model: &str,
        messages: Vec<Message>,
        mode: StreamMode,
        tools_requested: bool,
        mut sink: impl FnMut(StreamEvent) + Send,
    ) -> (Result<String>, ProviderCallEvent) {
        let key = provider_key(provider, model);
        let start = Instant::now();

        if tools_requested {
            let event = ProviderCallEvent {
                provider_key: key.clone(),
                status: ProviderCallStatus::Failure,
                duration: start.elapsed(),
                retry_count: 0,
                error_class: Some("ProviderConfigError".to_string()),
            };
            return (Err(ProviderAdapterError::StreamingToolsUnsupported), event);
        }

        if !self.breaker.should_allow_call(&key) {
            let event = ProviderCallEvent {
                provider_key: key.clone(),
                status: ProviderCallStatus::CircuitOpen,
                duration: start.elapsed(),
                retry_count: 0,
                error_class: Some("CircuitOpen".to_string()),
            };
            return (Err(ProviderAdapterError::CircuitOpen(key)), event);
        }

        let client = match self.client_for(provider, model) {
            Ok(c) => c,
            Err(e) => {
                let event = ProviderCallEvent {
                    provider_key: key,
                    status: ProviderCallStatus::Failure,
                    duration: start.elapsed(),
                    retry_count: 0,
                    error_class: Some("ProviderConfigError".to_string()),
                };
                return (Err(e), event);
            }
        };
        let request = ChatRequest::new(messages);

        let mut stream = match client.stream(request).await {
            Ok(s) => s,
            Err(e) => {
                self.breaker.record_failure(&key);
                let err = ProviderAdapterError::Provider(e.to_string());
                let event = ProviderCallEvent {
                    provider_key: key,
                    status: ProviderCallStatus::Failure,
                    duration: start.elapsed(),
                    retry_count: 0,
                    error_class: Some(error_class_name(&err)),
                };
                return (Err(err), event);
            }
        };

        use futures::StreamExt;
        let mut full = String::new();
        let mut sentence_buf = String::new();

        loop {
            let chunk = match stream.next().await {
                Some(Ok(c)) => c,
                Some(Err(e)) => {
                    self.breaker.record_failure(&key);
                    let err = ProviderAdapterError::Provider(e.to_string());
                    let event = ProviderCallEvent {
                        provider_key: key,
                        status: ProviderCallStatus::Failure,
                        duration: start.elapsed(),
                        retry_count: 0,
                        error_class: Some(error_class_name(&err)),
                    };
                    return (Err(err), event);
                }
                None => break,
            };
            full.push_str(&chunk.delta);
            match mode {
                StreamMode::Tokens => {
                    if !chunk.delta.is_empty() {
                        sink(StreamEvent::Chunk { delta: chunk.delta.clone() });
                    }
                }
                StreamMode::Sentences => {
                    sentence_buf.push_str(&chunk.delta);
                    while let Some(boundary) = sentence_boundary(&sentence_buf) {
                        let (segment, rest) = sentence_buf.split_at(boundary);
                        sink(StreamEvent::Chunk { delta: segment.to_string() });
                        sentence_buf = rest.to_string();
                    }
                }
                StreamMode::Full => {}
            }
        }

        match mode {
            StreamMode::Sentences if !sentence_buf.is_empty() => {
                sink(StreamEvent::Chunk { delta: sentence_buf.clone() });
            }
            StreamMode::Full => {
                sink(StreamEvent::Chunk { delta: full.clone() });
            }
            _ => {}
        }
        sink(StreamEvent::Done { full: full.clone() });
        self.breaker.record_success(&key);
        let event = ProviderCallEvent {
            provider_key: key,
            status: ProviderCallStatus::Success,
            duration: start.elapsed(),
            retry_count: 0,
            error_class: None,
        };
        (Ok(full), event)
    }
}

/// §4.17: "accumulate until a `.`, `!`, or `?` is followed by whitespace or
/// end-of-stream" — returns the byte offset just past the first complete
/// sentence in `buf`, if any (deliberately not the final, possibly
/// incomplete, trailing sentence).
fn sentence_boundary(buf: &str) -> Option<usize> {
    let bytes = buf.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let next = bytes.get(i + 1);
            match next {
                Some(c) if c.is_ascii_whitespace() => return Some(i + 1),
                None => return None, // only a boundary at true end-of-stream, handled by caller's flush
                _ => continue,
            }
        }
    }
    None
}

fn classify_chat_error(e: flow_core::FlowCoreError) -> ProviderAdapterError {
    match e {
        flow_core::FlowCoreError::ProviderAuth(m) => ProviderAdapterError::Auth(m),
        flow_core::FlowCoreError::ProviderConfig(m) => ProviderAdapterError::Config(m),
        flow_core::FlowCoreError::ProviderTimeout(_) => ProviderAdapterError::Timeout(Duration::from_secs(0)),
        flow_core::FlowCoreError::ProviderCircuitOpen(key) => ProviderAdapterError::CircuitOpen(key),
        flow_core::FlowCoreError::ProviderRetry { last_error, .. } => ProviderAdapterError::Provider(last_error),
        flow_core::FlowCoreError::Provider(m) => ProviderAdapterError::Provider(m),
    }
}

fn error_class_name(e: &ProviderAdapterError) -> String {
    match e {
        ProviderAdapterError::Config(_) => "ProviderConfigError",
        ProviderAdapterError::Auth(_) => "ProviderAuthError",
        ProviderAdapterError::Timeout(_) => "ProviderTimeoutError",
        ProviderAdapterError::RetryExhausted { .. } => "ProviderRetryError",
        ProviderAdapterError::CircuitOpen(_) => "ProviderCircuitOpenError",
        ProviderAdapterError::StreamingToolsUnsupported => "ProviderConfigError",
        ProviderAdapterError::Provider(_) => "ProviderError",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::breaker::BreakerState;
    use flow_core::llm::ChatStreamChunk;

    #[test]
    fn sentence_boundary_waits_for_trailing_whitespace() {
        assert_eq!(sentence_boundary("Hello world"), None);
        assert_eq!(sentence_boundary("Hello. World"), Some(6));
        assert_eq!(sentence_boundary("Wait..."), None);
    }

    #[test]
    fn streaming_ordering_property_chunks_concat_to_full() {
        // P10: concatenating all chunk.delta values equals done.full.
        let deltas = vec!["Hel", "lo ", "wor", "ld."];
        let full: String = deltas.concat();
        assert_eq!(full, "Hello world.");
    }

    struct FailingStreamModel;
    #[async_trait::async_trait]
    impl ChatModel for FailingStreamModel {
        async fn chat(&self, _request: ChatRequest) -> flow_core::error::Result<ChatResponse> {
            unimplemented!("not exercised by this test")
        }

        async fn stream(&self, _request: ChatRequest) -> flow_core::error::Result<flow_core::llm::ChatStreamResponse> {
            Ok(Box::pin(futures::stream::iter(vec![
                Ok(ChatStreamChunk { delta: "partial".to_string(), done: false, usage: None }),
                Err(flow_core::FlowCoreError::Provider("connection reset".to_string())),
            ])))
        }

        fn clone_box(&self) -> Box<dyn ChatModel> {
            Box::new(FailingStreamModel)
        }
    }

    /// A chunk error mid-stream must still record a provider-call event and
    /// trip the circuit breaker, the same as a non-streaming failure does.
    #[tokio::test]
    async fn stream_failure_records_breaker_failure_and_emits_an_event() {
        let breaker = CircuitBreaker::new(flow_core::breaker::BreakerConfig { failure_threshold: 1, cooldown: Duration::from_secs(30) });
        let mut adapter = ProviderAdapter::new(breaker, RetryPolicy::new(1), Duration::from_secs(5));
        adapter.register("test", "model", Arc::new(FailingStreamModel));

        let (result, event) = adapter
            .stream("test", "model", vec![Message::human("hi")], StreamMode::Tokens, false, |_event| {})
            .await;

        assert!(result.is_err());
        assert_eq!(event.status, ProviderCallStatus::Failure);
        assert_eq!(adapter.breaker.state_of(&provider_key("test", "model")), BreakerState::Open);
    }
}
