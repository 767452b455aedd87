//! Tool Executor (C7, §4.5): HTTP/GraphQL/multipart/local-function tool
//! dispatch with auth, rate limiting, retry, and response schema validation.
//!
//! Concrete HTTP wire-format concerns (building the `reqwest::Client`,
//! encoding query params, multipart bodies) live here rather than in
//! `flow-engine`, which only owns *when* a `tool` node is dispatched, not
//! *how* the HTTP call is shaped — mirroring the split between the Step
//! Scheduler and the Provider Adapter in `llm`.

use async_trait::async_trait;
use flow_core::value::Value;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ToolExecError {
    #[error("tool '{0}' is not registered")]
    UnknownTool(String),

    #[error("missing required input field '{0}'")]
    MissingInput(String),

    #[error("argument expression error: {0}")]
    ArgEval(String),
}

/// `{ok, status, data, headers, error?}` — §4.5 step 6's uniform envelope,
/// also used by local-function and GraphQL calls so `tool` node output is
/// shaped the same regardless of `ToolKind`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub ok: bool,
    pub status: Option<u16>,
    pub data: Value,
    pub headers: IndexMap<String, String>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(status: Option<u16>, data: Value, headers: IndexMap<String, String>) -> Self {
        Self { ok: true, status, data, headers, error: None }
    }

    pub fn failure(status: Option<u16>, error: impl Into<String>) -> Self {
        Self { ok: false, status, data: Value::Null, headers: IndexMap::new(), error: Some(error.into()) }
    }

    pub fn to_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert("ok".to_string(), Value::Bool(self.ok));
        map.insert(
            "status".to_string(),
            self.status.map(|s| Value::Int(s as i64)).unwrap_or(Value::Null),
        );
        map.insert("data".to_string(), self.data.clone());
        map.insert(
            "headers".to_string(),
            Value::from_map(self.headers.iter().map(|(k, v)| (k.clone(), Value::str(v.clone()))).collect()),
        );
        if let Some(err) = &self.error {
            map.insert("error".to_string(), Value::str(err.clone()));
        }
        Value::from_map(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Http,
    GraphQl,
    Multipart,
    LocalFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEncoding {
    Repeat,
    Csv,
}

/// §4.5 step 3's auth schemes. `OAuth2` is resolved to a static bearer token
/// (no refresh flow, per the Open Question decision in this repo's design
/// notes) and redacted under the same rule as `Bearer`.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    None,
    Bearer { token: String },
    Basic { username: String, password: String },
    ApiKeyHeader { header: String, key: String },
    ApiKeyQuery { param: String, key: String },
    OAuth2StaticToken { token: String },
}

impl AuthScheme {
    /// Header name(s) this scheme sets, used to redact them from logged
    /// request headers (§4.5 step 3: "with header redaction in logs").
    fn redacted_header_names(&self) -> Vec<&str> {
        match self {
            AuthScheme::None => vec![],
            AuthScheme::Bearer { .. } | AuthScheme::OAuth2StaticToken { .. } => vec!["authorization"],
            AuthScheme::Basic { .. } => vec!["authorization"],
            AuthScheme::ApiKeyHeader { header, .. } => vec![header.as_str()],
            AuthScheme::ApiKeyQuery { .. } => vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffMode {
    None,
    Constant,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct ToolRetryPolicy {
    pub max_attempts: usize,
    pub backoff: BackoffMode,
    pub initial_interval: Duration,
    pub max_delay: Option<Duration>,
    pub jitter: bool,
    /// GET/HEAD retry without this flag; any other method needs it set.
    pub allow_unsafe: bool,
    pub retriable_status_codes: Vec<u16>,
}

impl Default for ToolRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffMode::None,
            initial_interval: Duration::from_millis(250),
            max_delay: None,
            jitter: true,
            allow_unsafe: false,
            retriable_status_codes: vec![429, 502, 503, 504],
        }
    }
}

impl ToolRetryPolicy {
    fn delay(&self, attempt: usize) -> Duration {
        let base = match self.backoff {
            BackoffMode::None => return Duration::ZERO,
            BackoffMode::Constant => self.initial_interval,
            BackoffMode::Exponential => self.initial_interval * 2u32.saturating_pow(attempt as u32),
        };
        let capped = match self.max_delay {
            Some(max) => base.min(max),
            None => base,
        };
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(capped.as_secs_f64() * factor)
        } else {
            capped
        }
    }

    fn allows_method(&self, method: &str) -> bool {
        self.allow_unsafe || matches!(method.to_ascii_uppercase().as_str(), "GET" | "HEAD")
    }
}

/// Per-tool combined token bucket: per-second, per-minute, and burst
/// allowances (§4.5 step 4). All three must have capacity for a call to
/// proceed; each refills independently.
struct RateBucket {
    per_second: Option<TokenBucket>,
    per_minute: Option<TokenBucket>,
    burst: Option<TokenBucket>,
}

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, period: Duration) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec: capacity as f64 / period.as_secs_f64().max(0.001),
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateLimitConfig {
    pub per_second: Option<u32>,
    pub per_minute: Option<u32>,
    pub burst: Option<u32>,
}

/// Named configuration for one tool (§4.5's `ToolConfig`). URL/headers/
/// query/body are carried as raw strings (templates) or pre-evaluated
/// `Value`s — expression evaluation against flow state happens in
/// `flow-engine`'s dispatcher, upstream of `execute_tool`, since `Expr`
/// evaluation needs the `VariableEnvironment`/`ExternalResolver` this crate
/// does not depend on.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub name: String,
    pub kind: ToolKind,
    pub method: String,
    pub url_template: String,
    pub headers: IndexMap<String, String>,
    pub query: IndexMap<String, Value>,
    pub query_encoding: QueryEncoding,
    pub body: Option<Value>,
    pub graphql_query: Option<String>,
    pub input_fields: Vec<String>,
    pub timeout: Duration,
    pub retry: ToolRetryPolicy,
    pub auth: AuthScheme,
    pub rate_limit: RateLimitConfig,
    pub response_schema: Option<serde_json::Value>,
}

impl ToolConfig {
    pub fn new(name: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            name: name.into(),
            kind,
            method: "GET".to_string(),
            url_template: String::new(),
            headers: IndexMap::new(),
            query: IndexMap::new(),
            query_encoding: QueryEncoding::Repeat,
            body: None,
            graphql_query: None,
            input_fields: Vec::new(),
            timeout: Duration::from_secs(30),
            retry: ToolRetryPolicy::default(),
            auth: AuthScheme::None,
            rate_limit: RateLimitConfig::default(),
            response_schema: None,
        }
    }
}

/// §6: "callable receiving keyword args (or a single dict) ... collapsed to
/// a single `Value::Map` argument in Rust".
pub type LocalFunction = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// An interceptor run before/after a tool call. Must never panic or fail
/// the step (§4.5 step 7); `ToolExecutor::execute` wraps each call so an
/// interceptor's own panic only gets logged.
#[async_trait]
pub trait ToolInterceptor: Send + Sync {
    async fn before(&self, _tool: &str, _args: &Value) {}
    async fn after(&self, _tool: &str, _result: &ToolResult) {}
}

fn substitute_template(template: &str, args: &IndexMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '{' {
            if let Some(end) = template[i..].find('}') {
                let key = &template[i + 1..i + end];
                if let Some(v) = args.get(key) {
                    out.push_str(&v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_json().to_string()));
                    for _ in 0..end {
                        chars.next();
                    }
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Resolves tool names to configs, concrete `reqwest::Client`, local
/// function registry, and the process-wide rate limiter state (§5:
/// "process-wide circuit breaker and rate limiter state").
pub struct ToolExecutor {
    client: reqwest::Client,
    configs: HashMap<String, ToolConfig>,
    local_functions: HashMap<String, LocalFunction>,
    rate_buckets: Mutex<HashMap<String, RateBucket>>,
    interceptors: Vec<Arc<dyn ToolInterceptor>>,
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            configs: HashMap::new(),
            local_functions: HashMap::new(),
            rate_buckets: Mutex::new(HashMap::new()),
            interceptors: Vec::new(),
        }
    }

    pub fn register(&mut self, config: ToolConfig) {
        self.configs.insert(config.name.clone(), config);
    }

    /// Looks up a registered tool's config, e.g. to describe it to a
    /// provider as a [`flow_core::llm::ToolSpec`] before an `agent` call.
    pub fn config(&self, name: &str) -> Option<&ToolConfig> {
        self.configs.get(name)
    }

    pub fn register_local_function(&mut self, name: impl Into<String>, f: LocalFunction) {
        self.local_functions.insert(name.into(), f);
    }

    pub fn add_interceptor(&mut self, interceptor: Arc<dyn ToolInterceptor>) {
        self.interceptors.push(interceptor);
    }

    fn rate_limited(&self, config: &ToolConfig) -> bool {
        let rl = &config.rate_limit;
        if rl.per_second.is_none() && rl.per_minute.is_none() && rl.burst.is_none() {
            return false;
        }
        let mut buckets = self.rate_buckets.lock();
        let bucket = buckets.entry(config.name.clone()).or_insert_with(|| RateBucket {
            per_second: rl.per_second.map(|n| TokenBucket::new(n, Duration::from_secs(1))),
            per_minute: rl.per_minute.map(|n| TokenBucket::new(n, Duration::from_secs(60))),
            burst: rl.burst.map(|n| TokenBucket::new(n, Duration::from_millis(100))),
        });
        // All configured buckets must allow the call; a denial from any one
        // of them blocks it (checked in a fixed order so partial debits on
        // earlier buckets are an accepted, bounded imprecision).
        for b in [&mut bucket.per_second, &mut bucket.per_minute, &mut bucket.burst] {
            if let Some(b) = b {
                if !b.try_acquire() {
                    return true;
                }
            }
        }
        false
    }

    /// §4.5's `execute_tool(node, state, runtime_ctx, tool_override?)`,
    /// narrowed to the args already resolved by the caller (step 1's
    /// expression evaluation happens in `flow-engine`).
    pub async fn execute(&self, tool_name: &str, args: IndexMap<String, Value>) -> Result<ToolResult, ToolExecError> {
        let config = self
            .configs
            .get(tool_name)
            .ok_or_else(|| ToolExecError::UnknownTool(tool_name.to_string()))?;

        for field in &config.input_fields {
            if !args.contains_key(field) {
                return Err(ToolExecError::MissingInput(field.clone()));
            }
        }

        let before_args = Value::from_map(args.clone());
        for interceptor in &self.interceptors {
            if AssertUnwindSafe(interceptor.before(tool_name, &before_args))
                .catch_unwind()
                .await
                .is_err()
            {
                tracing::warn!(tool = tool_name, "before-interceptor panicked, continuing");
            }
        }

        let result = match config.kind {
            ToolKind::LocalFunction => self.call_local_function(config, &args).await,
            ToolKind::Http | ToolKind::GraphQl | ToolKind::Multipart => self.call_http(config, &args).await,
        };

        for interceptor in &self.interceptors {
            if AssertUnwindSafe(interceptor.after(tool_name, &result))
                .catch_unwind()
                .await
                .is_err()
            {
                tracing::warn!(tool = tool_name, "after-interceptor panicked, continuing");
            }
        }

        Ok(result)
    }

    async fn call_local_function(&self, config: &ToolConfig, args: &IndexMap<String, Value>) -> ToolResult {
        let Some(func) = self.local_functions.get(&config.name) else {
            return ToolResult::failure(None, format!("no local function registered for tool '{}'", config.name));
        };
        let output = func(Value::from_map(args.clone())).await;
        if let Some(schema) = &config.response_schema {
            if let Err(e) = validate_response(schema, &output) {
                return ToolResult::failure(None, format!("response schema validation failed: {e}"));
            }
        }
        ToolResult::success(None, output, IndexMap::new())
    }

    async fn call_http(&self, config: &ToolConfig, args: &IndexMap<String, Value>) -> ToolResult {
        if self.rate_limited(config) {
            return ToolResult::failure(None, format!("rate limit exceeded ({})", config.name));
        }

        let mut attempt = 0;
        loop {
            let outcome = self.send_http_once(config, args).await;
            let retriable = match &outcome {
                Ok(resp) if config.retry.allows_method(&config.method) => {
                    config.retry.retriable_status_codes.contains(&resp.status().as_u16())
                }
                Err(_) => config.retry.allows_method(&config.method),
                _ => false,
            };
            if !retriable || attempt + 1 >= config.retry.max_attempts {
                return self.finish_http(config, outcome).await;
            }
            tokio::time::sleep(config.retry.delay(attempt)).await;
            attempt += 1;
        }
    }

    async fn send_http_once(&self, config: &ToolConfig, args: &IndexMap<String, Value>) -> Result<reqwest::Response, reqwest::Error> {
        let url = substitute_template(&config.url_template, args);
        let method = reqwest::Method::from_bytes(config.method.as_bytes()).unwrap_or(reqwest::Method::GET);
        let mut request = self.client.request(method, &url).timeout(config.timeout);

        for (k, v) in &config.headers {
            request = request.header(k, substitute_template(v, args));
        }
        request = apply_auth(request, &config.auth);

        if !config.query.is_empty() {
            let pairs = encode_query(&config.query, config.query_encoding);
            request = request.query(&pairs);
        }

        request = match config.kind {
            ToolKind::GraphQl => {
                let mut body = IndexMap::new();
                body.insert("query".to_string(), Value::str(config.graphql_query.clone().unwrap_or_default()));
                body.insert("variables".to_string(), Value::from_map(args.clone()));
                request.json(&Value::from_map(body).to_json())
            }
            ToolKind::Multipart => {
                let mut form = reqwest::multipart::Form::new();
                for (k, v) in args {
                    form = form.text(k.clone(), v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_json().to_string()));
                }
                request.multipart(form)
            }
            _ => match &config.body {
                Some(body) => request.json(&body.to_json()),
                None if !args.is_empty() && config.method.to_ascii_uppercase() != "GET" => {
                    request.json(&Value::from_map(args.clone()).to_json())
                }
                None => request,
            },
        };

        request.send().await
    }

    async fn finish_http(&self, config: &ToolConfig, outcome: Result<reqwest::Response, reqwest::Error>) -> ToolResult {
        let response = match outcome {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(None, format!("Network error: {e}")),
        };

        let status = response.status().as_u16();
        let mut headers = IndexMap::new();
        for (name, value) in response.headers() {
            if config.auth.redacted_header_names().iter().any(|h| h.eq_ignore_ascii_case(name.as_str())) {
                continue;
            }
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let ok_status = (200..300).contains(&status);
        let bytes = response.bytes().await.unwrap_or_default();
        let data = serde_json::from_slice::<serde_json::Value>(&bytes)
            .map(Value::from_json)
            .unwrap_or_else(|_| Value::str(String::from_utf8_lossy(&bytes).to_string()));

        if config.kind == ToolKind::GraphQl {
            if let Some(errors) = data.as_map().and_then(|m| m.get("errors")).and_then(|e| e.as_list()) {
                if !errors.is_empty() {
                    let message = errors
                        .first()
                        .and_then(|e| e.as_map())
                        .and_then(|m| m.get("message"))
                        .and_then(|m| m.as_str())
                        .unwrap_or("GraphQL error")
                        .to_string();
                    return ToolResult { ok: false, status: Some(status), data, headers, error: Some(message) };
                }
            }
        }

        if !ok_status {
            return ToolResult { ok: false, status: Some(status), data, headers, error: Some(format!("HTTP {status}")) };
        }

        if let Some(schema) = &config.response_schema {
            if let Err(e) = validate_response(schema, &data) {
                return ToolResult {
                    ok: false,
                    status: Some(status),
                    data,
                    headers,
                    error: Some(format!("response schema validation failed: {e}")),
                };
            }
        }

        ToolResult { ok: true, status: Some(status), data, headers, error: None }
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_auth(request: reqwest::RequestBuilder, auth: &AuthScheme) -> reqwest::RequestBuilder {
    match auth {
        AuthScheme::None => request,
        AuthScheme::Bearer { token } | AuthScheme::OAuth2StaticToken { token } => {
            request.bearer_auth(token)
        }
        AuthScheme::Basic { username, password } => request.basic_auth(username, Some(password)),
        AuthScheme::ApiKeyHeader { header, key } => request.header(header, key),
        AuthScheme::ApiKeyQuery { param, key } => request.query(&[(param, key)]),
    }
}

fn encode_query(query: &IndexMap<String, Value>, encoding: QueryEncoding) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in query {
        match (value, encoding) {
            (Value::List(items), QueryEncoding::Csv) => {
                let joined = items.iter().map(|v| v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_json().to_string())).collect::<Vec<_>>().join(",");
                pairs.push((key.clone(), joined));
            }
            (Value::List(items), QueryEncoding::Repeat) => {
                for item in items {
                    pairs.push((key.clone(), item.as_str().map(|s| s.to_string()).unwrap_or_else(|| item.to_json().to_string())));
                }
            }
            (other, _) => pairs.push((key.clone(), other.as_str().map(|s| s.to_string()).unwrap_or_else(|| other.to_json().to_string()))),
        }
    }
    pairs
}

fn validate_response(schema: &serde_json::Value, data: &Value) -> Result<(), String> {
    let compiled = jsonschema::JSONSchema::compile(schema).map_err(|e| e.to_string())?;
    let instance = data.to_json();
    let result = compiled.validate(&instance);
    if let Err(errors) = result {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(messages.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_template_fills_known_args() {
        let mut args = IndexMap::new();
        args.insert("id".to_string(), Value::str("42"));
        assert_eq!(substitute_template("https://api/items/{id}", &args), "https://api/items/42");
    }

    #[test]
    fn substitute_template_leaves_unknown_placeholders() {
        let args = IndexMap::new();
        assert_eq!(substitute_template("https://api/{missing}", &args), "https://api/{missing}");
    }

    #[test]
    fn retry_policy_gates_on_method_and_allow_unsafe() {
        let policy = ToolRetryPolicy::default();
        assert!(policy.allows_method("GET"));
        assert!(policy.allows_method("HEAD"));
        assert!(!policy.allows_method("POST"));

        let unsafe_ok = ToolRetryPolicy { allow_unsafe: true, ..ToolRetryPolicy::default() };
        assert!(unsafe_ok.allows_method("POST"));
    }

    #[test]
    fn exponential_backoff_without_jitter_doubles() {
        let policy = ToolRetryPolicy {
            backoff: BackoffMode::Exponential,
            initial_interval: Duration::from_millis(100),
            jitter: false,
            max_delay: None,
            ..ToolRetryPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn token_bucket_denies_once_exhausted() {
        let mut bucket = TokenBucket::new(1, Duration::from_secs(60));
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test]
    async fn local_function_tool_executes_and_returns_ok() {
        let mut executor = ToolExecutor::new();
        let mut config = ToolConfig::new("echo", ToolKind::LocalFunction);
        config.input_fields = vec!["text".to_string()];
        executor.register(config);
        executor.register_local_function(
            "echo",
            Arc::new(|args: Value| Box::pin(async move { args }) as BoxFuture<'static, Value>),
        );

        let mut args = IndexMap::new();
        args.insert("text".to_string(), Value::str("hi"));
        let result = executor.execute("echo", args).await.unwrap();
        assert!(result.ok);
    }

    #[tokio::test]
    async fn missing_required_input_field_errors_before_dispatch() {
        let mut executor = ToolExecutor::new();
        let mut config = ToolConfig::new("echo", ToolKind::LocalFunction);
        config.input_fields = vec!["text".to_string()];
        executor.register(config);
        executor.register_local_function("echo", Arc::new(|args: Value| Box::pin(async move { args }) as BoxFuture<'static, Value>));

        let err = executor.execute("echo", IndexMap::new()).await.unwrap_err();
        assert!(matches!(err, ToolExecError::MissingInput(_)));
    }

    struct PanickingInterceptor;

    #[async_trait]
    impl ToolInterceptor for PanickingInterceptor {
        async fn before(&self, _tool: &str, _args: &Value) {
            panic!("boom");
        }
    }

    /// §4.17: a panicking interceptor must not fail the step.
    #[tokio::test]
    async fn panicking_interceptor_does_not_fail_the_call() {
        let mut executor = ToolExecutor::new();
        let mut config = ToolConfig::new("echo", ToolKind::LocalFunction);
        config.input_fields = vec!["text".to_string()];
        executor.register(config);
        executor.register_local_function(
            "echo",
            Arc::new(|args: Value| Box::pin(async move { args }) as BoxFuture<'static, Value>),
        );
        executor.add_interceptor(Arc::new(PanickingInterceptor));

        let mut args = IndexMap::new();
        args.insert("text".to_string(), Value::str("hi"));
        let result = executor.execute("echo", args).await.unwrap();
        assert!(result.ok);
    }
}
