//! Composes every other component into the end-to-end request pipeline.
//!
//! Step numbering in the comments below is stable so the control flow can be checked against
//! the pipeline's documented ordering line by line.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use uuid::Uuid;

use crate::cloudllm::client_wrapper::{Message, Role};
use crate::gateway::audit::{AuditRecord, AuditStatus, ChannelAuditSink};
use crate::gateway::auth::{AuthGate, Principal};
use crate::gateway::cache::SemanticCache;
use crate::gateway::compression::build_pipeline;
use crate::gateway::config::GatewayConfig;
use crate::gateway::embedding::EmbeddingClient;
use crate::gateway::error::{ErrorKind, GatewayError};
use crate::gateway::flags::{BodyOverrides, Flags, HeaderOverrides};
use crate::gateway::llm::LlmClient;
use crate::gateway::patterns::{match_message, PatternRegistry};
use crate::gateway::pii;
use crate::gateway::rate_limit::RateLimiter;
use crate::gateway::tools::{ParamValue, ToolOutcome, ToolRegistry};

/// Inbound chat-completion payload.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessageInput>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub n: Option<u32>,
    pub stream: bool,
    pub overrides: BodyOverrides,
}

#[derive(Debug, Clone)]
pub struct ChatMessageInput {
    pub role: String,
    pub content: String,
}

/// Per-request tracing identity. Deliberately carries no cancellation token — cancellation is
/// expressed structurally, via channel/receiver drop, rather than as a value threaded through
/// the pipeline.
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// OpenAI-compatible chat completion response body.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: ChatUsage,
    #[serde(skip)]
    pub cache_hit: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessageInput,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Everything the orchestrator needs to drive one request through the pipeline: auth, rate
/// limiting, pattern/tool dispatch, the embedding client, semantic cache, LLM client, and audit
/// sink.
pub struct Orchestrator {
    pub config: Arc<GatewayConfig>,
    pub auth_gate: AuthGate,
    pub rate_limiter: RateLimiter,
    pub pattern_registry: Arc<PatternRegistry>,
    pub tool_registry: Arc<ToolRegistry>,
    pub embedding_client: Arc<dyn EmbeddingClient>,
    pub cache: Arc<SemanticCache>,
    pub llm_client: Arc<dyn LlmClient>,
    pub audit_sink: Arc<ChannelAuditSink>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<GatewayConfig>,
        pattern_registry: Arc<PatternRegistry>,
        tool_registry: Arc<ToolRegistry>,
        embedding_client: Arc<dyn EmbeddingClient>,
        cache: Arc<SemanticCache>,
        llm_client: Arc<dyn LlmClient>,
        audit_sink: Arc<ChannelAuditSink>,
    ) -> Self {
        let auth_gate = AuthGate::new(&config);
        let rate_limiter = RateLimiter::new();
        Self {
            config,
            auth_gate,
            rate_limiter,
            pattern_registry,
            tool_registry,
            embedding_client,
            cache,
            llm_client,
            audit_sink,
        }
    }

    /// Unary chat-completion path: validate, authenticate, rate-limit, resolve flags, dispatch
    /// keyword patterns, compress, redact, check the cache, call the LLM, then cache and audit
    /// the result. Streaming is handled separately by [`Orchestrator::handle_streaming`], since
    /// it has distinct cancellation and partial-cache-suppression semantics.
    pub async fn handle(
        &self,
        request: ChatRequest,
        authorization_header: Option<&str>,
        header_overrides: HeaderOverrides,
    ) -> Result<ChatResponse, GatewayError> {
        let ctx = RequestContext::new();

        // Step 1: validate.
        validate(&request, &ctx.request_id)?;

        // Step 2: authenticate.
        let principal = self.auth_gate.authenticate(authorization_header).map_err(|mut e| {
            e.request_id = ctx.request_id.clone();
            e
        })?;

        // Step 3: admit through the rate limiter.
        if !self.rate_limiter.admit(&principal) {
            return Err(GatewayError::new(ErrorKind::RateLimited, "rate limit exceeded", ctx.request_id));
        }

        // Step 4: resolve effective flags.
        let flags = Flags::resolve(&self.config, &header_overrides, &request.overrides);

        let mut messages = to_internal_messages(&request.messages);

        // Step 5: keyword-pattern dispatch, only considered against the last message when its
        // role is user.
        if let Some(last) = request.messages.last() {
            if flags.keyword_detection_enabled && last.role == "user" {
                let snapshot = self.pattern_registry.snapshot();
                if let Some(matched) = match_message(&snapshot, &last.content, &principal, &flags) {
                    // Tools must see masked text whenever mask_pii_before_llm is enabled, same as
                    // the LLM does — redact before dispatch rather than after.
                    let dispatch_content = if flags.mask_pii_before_llm {
                        pii::redact(&last.content).0
                    } else {
                        last.content.clone()
                    };
                    let params = matched
                        .params
                        .into_iter()
                        .map(|(k, v)| (k, ParamValue::String(v)))
                        .collect();
                    let outcome = self.tool_registry.dispatch(
                        &matched.tool,
                        &params,
                        &principal,
                        &dispatch_content,
                        &ctx.request_id,
                    );
                    match outcome {
                        Ok(ToolOutcome::Terminal { content, .. }) => {
                            self.write_audit(&ctx, &principal, &request.model, &dispatch_content, &content, false, 0, 0, AuditStatus::Completed);
                            return Ok(terminal_response(&ctx, &request.model, content));
                        }
                        Ok(ToolOutcome::Augment { augmented_messages }) => {
                            messages = augmented_messages;
                        }
                        Ok(ToolOutcome::Stream(chunks)) => {
                            let content: String = chunks.into_iter().map(|c| c.content).collect();
                            self.write_audit(&ctx, &principal, &request.model, &dispatch_content, &content, false, 0, 0, AuditStatus::Completed);
                            return Ok(terminal_response(&ctx, &request.model, content));
                        }
                        Err(err) => {
                            // TOOL_FAILURE is recovered locally: surface a descriptive
                            // assistant message instead of propagating the error.
                            log::warn!("tool dispatch for pattern {:?} failed: {}", matched.pattern_name, err);
                            let content = format!("The {} tool failed: {}", matched.tool, err.message);
                            self.write_audit(&ctx, &principal, &request.model, &dispatch_content, &content, false, 0, 0, AuditStatus::Completed);
                            return Ok(terminal_response(&ctx, &request.model, content));
                        }
                    }
                }
            }
        }

        // Step 6: compress user/system message content.
        let mut degraded = false;
        if flags.use_synthlang {
            let pipeline = build_pipeline(flags.synthlang_compression_level, flags.use_gzip, self.config.gzip_size_threshold);
            for message in messages.iter_mut() {
                if matches!(message.role, Role::User | Role::System) {
                    let result = pipeline.encode(&message.content);
                    degraded = degraded || result.compression_degraded;
                    message.content = Arc::from(result.text.as_str());
                }
            }
        }
        if degraded {
            log::warn!("compression_degraded=true for request {}", ctx.request_id);
        }

        // Step 7: redact PII before sending upstream, if enabled.
        if flags.mask_pii_before_llm {
            for message in messages.iter_mut() {
                if matches!(message.role, Role::User | Role::System) {
                    let (masked, _map) = pii::redact(&message.content);
                    message.content = Arc::from(masked.as_str());
                }
            }
        }

        let canonical = canonicalize(&request.model, &messages);
        let prompt_for_audit = if flags.mask_pii_in_logs {
            pii::redact(&canonical).0
        } else {
            canonical.clone()
        };

        // Step 8: semantic cache lookup.
        if flags.cache {
            if let Ok(vector) = self.embedding_client.embed(&canonical).await {
                if let Some((entry, _sim)) = self.cache.lookup(&request.model, &vector, self.config.cache_similarity_threshold).await {
                    let response_text = String::from_utf8_lossy(&entry.response).to_string();
                    let response_for_audit = if flags.mask_pii_in_logs { pii::redact(&response_text).0 } else { response_text.clone() };
                    self.write_audit(&ctx, &principal, &request.model, &prompt_for_audit, &response_for_audit, true, 0, 0, AuditStatus::Completed);
                    let mut response = terminal_response(&ctx, &request.model, response_text);
                    response.cache_hit = true;
                    return Ok(response);
                }
            }
        }

        // Step 9: invoke the LLM.
        let completion = self.llm_client.complete(&messages, &ctx.request_id).await?;

        // Step 10: cache insert + audit.
        if flags.cache {
            if let Ok(vector) = self.embedding_client.embed(&canonical).await {
                self.cache
                    .insert(&request.model, vector, canonical.as_bytes().to_vec(), completion.content.as_bytes().to_vec())
                    .await;
            }
        }

        let response_for_audit = if flags.mask_pii_in_logs {
            pii::redact(&completion.content).0
        } else {
            completion.content.clone()
        };
        self.write_audit(
            &ctx,
            &principal,
            &request.model,
            &prompt_for_audit,
            &response_for_audit,
            false,
            completion.prompt_tokens,
            completion.completion_tokens,
            AuditStatus::Completed,
        );

        Ok(ChatResponse {
            id: ctx.request_id,
            object: "chat.completion",
            created: now_unix(),
            model: request.model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessageInput { role: "assistant".to_string(), content: completion.content },
                finish_reason: "stop",
            }],
            usage: ChatUsage {
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
                total_tokens: completion.prompt_tokens + completion.completion_tokens,
            },
            cache_hit: false,
        })
    }

    /// Streaming chat-completion path. Runs steps 1–8 identically to [`Self::handle`], including
    /// keyword-pattern/tool dispatch (a terminal or stream tool outcome is delivered to `sink` as
    /// a single chunk and the upstream LLM is skipped entirely), then forwards upstream chunks to
    /// `sink` as they arrive; the accumulated text is cached and audited only once the stream
    /// completes. If `sink` stops accepting chunks (the consumer dropped its receiver, i.e. the
    /// client disconnected), the upstream stream is dropped, nothing is cached, and the audit
    /// record is written with `status=aborted`.
    pub async fn handle_streaming(
        &self,
        request: ChatRequest,
        authorization_header: Option<&str>,
        header_overrides: HeaderOverrides,
        sink: tokio::sync::mpsc::Sender<Result<String, GatewayError>>,
    ) -> Result<(), GatewayError> {
        let ctx = RequestContext::new();
        validate(&request, &ctx.request_id)?;
        let principal = self.auth_gate.authenticate(authorization_header).map_err(|mut e| {
            e.request_id = ctx.request_id.clone();
            e
        })?;
        if !self.rate_limiter.admit(&principal) {
            return Err(GatewayError::new(ErrorKind::RateLimited, "rate limit exceeded", ctx.request_id));
        }

        let flags = Flags::resolve(&self.config, &header_overrides, &request.overrides);
        let mut messages = to_internal_messages(&request.messages);

        // Step 5: keyword-pattern dispatch, same as `handle()`. A terminal/stream outcome is
        // delivered to `sink` as a single chunk and the upstream LLM is never called.
        if let Some(last) = request.messages.last() {
            if flags.keyword_detection_enabled && last.role == "user" {
                let snapshot = self.pattern_registry.snapshot();
                if let Some(matched) = match_message(&snapshot, &last.content, &principal, &flags) {
                    let dispatch_content = if flags.mask_pii_before_llm {
                        pii::redact(&last.content).0
                    } else {
                        last.content.clone()
                    };
                    let params = matched
                        .params
                        .into_iter()
                        .map(|(k, v)| (k, ParamValue::String(v)))
                        .collect();
                    let outcome = self.tool_registry.dispatch(
                        &matched.tool,
                        &params,
                        &principal,
                        &dispatch_content,
                        &ctx.request_id,
                    );
                    match outcome {
                        Ok(ToolOutcome::Terminal { content, .. }) => {
                            let _ = sink.send(Ok(content.clone())).await;
                            self.write_audit(&ctx, &principal, &request.model, &dispatch_content, &content, false, 0, 0, AuditStatus::Completed);
                            return Ok(());
                        }
                        Ok(ToolOutcome::Augment { augmented_messages }) => {
                            messages = augmented_messages;
                        }
                        Ok(ToolOutcome::Stream(chunks)) => {
                            let content: String = chunks.into_iter().map(|c| c.content).collect();
                            let _ = sink.send(Ok(content.clone())).await;
                            self.write_audit(&ctx, &principal, &request.model, &dispatch_content, &content, false, 0, 0, AuditStatus::Completed);
                            return Ok(());
                        }
                        Err(err) => {
                            log::warn!("tool dispatch for pattern {:?} failed: {}", matched.pattern_name, err);
                            let content = format!("The {} tool failed: {}", matched.tool, err.message);
                            let _ = sink.send(Ok(content.clone())).await;
                            self.write_audit(&ctx, &principal, &request.model, &dispatch_content, &content, false, 0, 0, AuditStatus::Completed);
                            return Ok(());
                        }
                    }
                }
            }
        }

        if flags.use_synthlang {
            let pipeline = build_pipeline(flags.synthlang_compression_level, flags.use_gzip, self.config.gzip_size_threshold);
            for message in messages.iter_mut() {
                if matches!(message.role, Role::User | Role::System) {
                    let result = pipeline.encode(&message.content);
                    message.content = Arc::from(result.text.as_str());
                }
            }
        }
        if flags.mask_pii_before_llm {
            for message in messages.iter_mut() {
                if matches!(message.role, Role::User | Role::System) {
                    let (masked, _map) = pii::redact(&message.content);
                    message.content = Arc::from(masked.as_str());
                }
            }
        }

        let canonical = canonicalize(&request.model, &messages);
        let prompt_for_audit = if flags.mask_pii_in_logs { pii::redact(&canonical).0 } else { canonical.clone() };

        if flags.cache {
            if let Ok(vector) = self.embedding_client.embed(&canonical).await {
                if let Some((entry, _sim)) = self.cache.lookup(&request.model, &vector, self.config.cache_similarity_threshold).await {
                    // A cache hit is delivered as a single simulated chunk.
                    let response_text = String::from_utf8_lossy(&entry.response).to_string();
                    let response_for_audit = if flags.mask_pii_in_logs { pii::redact(&response_text).0 } else { response_text.clone() };
                    let _ = sink.send(Ok(response_text)).await;
                    self.write_audit(&ctx, &principal, &request.model, &prompt_for_audit, &response_for_audit, true, 0, 0, AuditStatus::Completed);
                    return Ok(());
                }
            }
        }

        let stream = self.llm_client.stream(&messages, &ctx.request_id).await?;
        let mut accumulated = String::new();
        let mut aborted = false;

        match stream {
            Some(mut chunks) => {
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(c) => {
                            accumulated.push_str(&c.content);
                            if sink.send(Ok(c.content)).await.is_err() {
                                // Client disconnected: stop reading upstream immediately.
                                aborted = true;
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = sink.send(Err(GatewayError::new(ErrorKind::UpstreamUnknown, e.to_string(), ctx.request_id.clone()))).await;
                            aborted = true;
                            break;
                        }
                    }
                }
            }
            None => {
                let completion = self.llm_client.complete(&messages, &ctx.request_id).await?;
                accumulated = completion.content;
                let _ = sink.send(Ok(accumulated.clone())).await;
            }
        }

        if aborted {
            self.write_audit(&ctx, &principal, &request.model, &prompt_for_audit, "", false, 0, 0, AuditStatus::Aborted);
            return Ok(());
        }

        if flags.cache {
            if let Ok(vector) = self.embedding_client.embed(&canonical).await {
                self.cache
                    .insert(&request.model, vector, canonical.as_bytes().to_vec(), accumulated.as_bytes().to_vec())
                    .await;
            }
        }
        let response_for_audit = if flags.mask_pii_in_logs { pii::redact(&accumulated).0 } else { accumulated.clone() };
        self.write_audit(&ctx, &principal, &request.model, &prompt_for_audit, &response_for_audit, false, 0, 0, AuditStatus::Completed);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_audit(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        model: &str,
        prompt_masked: &str,
        response_masked: &str,
        cache_hit: bool,
        prompt_tokens: usize,
        response_tokens: usize,
        status: AuditStatus,
    ) {
        self.audit_sink.submit(AuditRecord {
            request_id: ctx.request_id.clone(),
            user_id: principal.user_id.clone(),
            model: model.to_string(),
            prompt_masked: prompt_masked.to_string(),
            response_masked: response_masked.to_string(),
            cache_hit,
            prompt_tokens,
            response_tokens,
            status,
            timestamp: now_unix(),
        });
    }
}

fn validate(request: &ChatRequest, request_id: &str) -> Result<(), GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::new(ErrorKind::Validation, "messages must be non-empty", request_id));
    }
    if request.model.trim().is_empty() {
        return Err(GatewayError::new(ErrorKind::Validation, "model must be non-empty", request_id));
    }
    if let Some(t) = request.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(GatewayError::new(ErrorKind::Validation, "temperature must be in [0,2]", request_id));
        }
    }
    if let Some(p) = request.top_p {
        if !(0.0..=1.0).contains(&p) || p <= 0.0 {
            return Err(GatewayError::new(ErrorKind::Validation, "top_p must be in (0,1]", request_id));
        }
    }
    if let Some(n) = request.n {
        if n < 1 {
            return Err(GatewayError::new(ErrorKind::Validation, "n must be >= 1", request_id));
        }
    }
    for m in &request.messages {
        if !matches!(m.role.as_str(), "system" | "user" | "assistant" | "tool") {
            return Err(GatewayError::new(ErrorKind::Validation, format!("unknown role {:?}", m.role), request_id));
        }
    }
    Ok(())
}

fn to_internal_messages(messages: &[ChatMessageInput]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| Message {
            role: match m.role.as_str() {
                "system" => Role::System,
                "assistant" => Role::Assistant,
                "tool" => Role::Tool { call_id: String::new() },
                _ => Role::User,
            },
            content: Arc::from(m.content.as_str()),
            tool_calls: vec![],
        })
        .collect()
}

/// Canonicalize `messages` plus `model` into one text for embedding, joining with role-tagged
/// separators.
fn canonicalize(model: &str, messages: &[Message]) -> String {
    let mut out = format!("model:{model}\n");
    for m in messages {
        let role = match &m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool { .. } => "tool",
        };
        out.push_str(role);
        out.push(':');
        out.push_str(&m.content);
        out.push('\n');
    }
    out
}

fn terminal_response(ctx: &RequestContext, model: &str, content: String) -> ChatResponse {
    ChatResponse {
        id: ctx.request_id.clone(),
        object: "chat.completion",
        created: now_unix(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessageInput { role: "assistant".to_string(), content },
            finish_reason: "stop",
        }],
        usage: ChatUsage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 },
        cache_hit: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::audit::AuditSink;
    use crate::gateway::llm::CompletionResult;
    use crate::gateway::tools::{Params, Tool};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubEmbedding;
    #[async_trait]
    impl EmbeddingClient for StubEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::gateway::embedding::EmbeddingError> {
            // Deterministic, cheap "embedding": character count plus a constant dimension.
            Ok(vec![text.len() as f32, 1.0])
        }
        fn dim(&self) -> usize {
            2
        }
    }

    struct StubLlm {
        reply: String,
    }
    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(&self, _messages: &[Message], _request_id: &str) -> Result<CompletionResult, GatewayError> {
            Ok(CompletionResult { content: self.reply.clone(), prompt_tokens: 3, completion_tokens: 4 })
        }
        async fn stream(
            &self,
            _messages: &[Message],
            _request_id: &str,
        ) -> Result<Option<crate::cloudllm::client_wrapper::MessageChunkStream>, GatewayError> {
            Ok(None)
        }
    }

    struct RecordingAuditSink {
        records: Mutex<Vec<AuditRecord>>,
    }
    #[async_trait]
    impl AuditSink for RecordingAuditSink {
        async fn write(&self, record: AuditRecord) -> Result<(), String> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    struct WeatherTool;
    impl Tool for WeatherTool {
        fn call(&self, params: &Params, _principal: &Principal, _raw_message: &str) -> Result<ToolOutcome, String> {
            let location = match params.get("location") {
                Some(ParamValue::String(s)) => s.clone(),
                _ => "unknown".to_string(),
            };
            Ok(ToolOutcome::Terminal {
                content: format!("Weather in {location}: 15°C, cloudy."),
                metadata: None,
            })
        }
    }

    fn config_with(vars: &[(&str, &str)]) -> Arc<GatewayConfig> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Arc::new(GatewayConfig::from_map(&map).unwrap())
    }

    fn basic_request(content: &str) -> ChatRequest {
        ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![ChatMessageInput { role: "user".to_string(), content: content.to_string() }],
            temperature: None,
            top_p: None,
            n: None,
            stream: false,
            overrides: BodyOverrides::default(),
        }
    }

    fn orchestrator_with_reply(reply: &str, config: Arc<GatewayConfig>) -> (Orchestrator, Arc<RecordingAuditSink>) {
        let backend = Arc::new(RecordingAuditSink { records: Mutex::new(Vec::new()) });
        let audit_backend: Arc<dyn AuditSink> = backend.clone();
        let audit_sink = Arc::new(ChannelAuditSink::spawn(16, audit_backend));
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(PatternRegistry::new()),
            Arc::new(ToolRegistry::new()),
            Arc::new(StubEmbedding),
            Arc::new(SemanticCache::new(100)),
            Arc::new(StubLlm { reply: reply.to_string() }),
            audit_sink,
        );
        (orchestrator, backend)
    }

    #[tokio::test]
    async fn validation_failure_never_calls_downstream() {
        let (orchestrator, backend) = orchestrator_with_reply("hi", config_with(&[]));
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![],
            temperature: None,
            top_p: None,
            n: None,
            stream: false,
            overrides: BodyOverrides::default(),
        };
        let err = orchestrator.handle(request, Some("Bearer t"), HeaderOverrides::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(backend.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_bearer_is_unauthenticated_before_anything_else() {
        let (orchestrator, _backend) = orchestrator_with_reply("hi", config_with(&[]));
        let err = orchestrator.handle(basic_request("hello"), None, HeaderOverrides::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn happy_path_reaches_llm_and_writes_audit() {
        let (orchestrator, backend) = orchestrator_with_reply("Paris.", config_with(&[("USE_SYNTHLANG", "0")]));
        let response = orchestrator
            .handle(basic_request("What is the capital of France?"), Some("Bearer t"), HeaderOverrides::default())
            .await
            .unwrap();
        assert_eq!(response.choices[0].message.content, "Paris.");
        assert!(!response.cache_hit);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(backend.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_similar_request_is_served_from_cache() {
        let (orchestrator, _backend) = orchestrator_with_reply("Paris.", config_with(&[("USE_SYNTHLANG", "0"), ("CACHE_SIMILARITY_THRESHOLD", "0.90")]));
        let first = orchestrator
            .handle(basic_request("What is the capital of France?"), Some("Bearer t"), HeaderOverrides::default())
            .await
            .unwrap();
        assert!(!first.cache_hit);
        let second = orchestrator
            .handle(basic_request("What is the capital of France?"), Some("Bearer t"), HeaderOverrides::default())
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.choices[0].message.content, "Paris.");
    }

    #[tokio::test]
    async fn pattern_match_dispatches_tool_without_calling_llm() {
        let config = config_with(&[("USE_SYNTHLANG", "0")]);
        let (mut orchestrator, _backend) = orchestrator_with_reply("should not be used", config);
        let registry = PatternRegistry::new();
        registry.add(crate::gateway::patterns::Pattern {
            name: "weather".to_string(),
            regex: regex::Regex::new(r"(?i)what(?:'s| is) the weather in (?P<location>.+?)\??$").unwrap(),
            tool: "weather".to_string(),
            description: String::new(),
            priority: 1,
            required_role: None,
            enabled: true,
        });
        orchestrator.pattern_registry = Arc::new(registry);
        let mut tools = ToolRegistry::new();
        tools.register("weather", Arc::new(WeatherTool), None);
        orchestrator.tool_registry = Arc::new(tools);

        let response = orchestrator
            .handle(basic_request("What's the weather in London?"), Some("Bearer t"), HeaderOverrides::default())
            .await
            .unwrap();
        assert_eq!(response.choices[0].message.content, "Weather in London: 15°C, cloudy.");
    }

    #[tokio::test]
    async fn pattern_match_dispatches_tool_in_streaming_path_without_calling_llm() {
        let config = config_with(&[("USE_SYNTHLANG", "0")]);
        let (mut orchestrator, backend) = orchestrator_with_reply("should not be used", config);
        let registry = PatternRegistry::new();
        registry.add(crate::gateway::patterns::Pattern {
            name: "weather".to_string(),
            regex: regex::Regex::new(r"(?i)what(?:'s| is) the weather in (?P<location>.+?)\??$").unwrap(),
            tool: "weather".to_string(),
            description: String::new(),
            priority: 1,
            required_role: None,
            enabled: true,
        });
        orchestrator.pattern_registry = Arc::new(registry);
        let mut tools = ToolRegistry::new();
        tools.register("weather", Arc::new(WeatherTool), None);
        orchestrator.tool_registry = Arc::new(tools);

        let (tx, mut rx) = tokio::sync::mpsc::channel::<Result<String, GatewayError>>(4);
        orchestrator
            .handle_streaming(
                ChatRequest { stream: true, ..basic_request("What's the weather in London?") },
                Some("Bearer t"),
                HeaderOverrides::default(),
                tx,
            )
            .await
            .unwrap();

        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk, "Weather in London: 15°C, cloudy.");
        assert!(rx.recv().await.is_none(), "no further chunks once the tool has answered");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let records = backend.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AuditStatus::Completed);
    }

    #[tokio::test]
    async fn tool_dispatch_sees_masked_text_when_mask_before_llm_is_set() {
        struct RecordingTool {
            seen: Arc<Mutex<Option<String>>>,
        }
        impl Tool for RecordingTool {
            fn call(&self, _params: &Params, _principal: &Principal, raw_message: &str) -> Result<ToolOutcome, String> {
                *self.seen.lock().unwrap() = Some(raw_message.to_string());
                Ok(ToolOutcome::Terminal { content: "noted".to_string(), metadata: None })
            }
        }

        let config = config_with(&[("USE_SYNTHLANG", "0"), ("MASK_PII_BEFORE_LLM", "1")]);
        let (mut orchestrator, _backend) = orchestrator_with_reply("should not be used", config);
        let registry = PatternRegistry::new();
        registry.add(crate::gateway::patterns::Pattern {
            name: "remember".to_string(),
            regex: regex::Regex::new(r"(?i)^remember (?P<rest>.+)$").unwrap(),
            tool: "echo".to_string(),
            description: String::new(),
            priority: 1,
            required_role: None,
            enabled: true,
        });
        orchestrator.pattern_registry = Arc::new(registry);
        let seen = Arc::new(Mutex::new(None));
        let mut tools = ToolRegistry::new();
        tools.register("echo", Arc::new(RecordingTool { seen: seen.clone() }), None);
        orchestrator.tool_registry = Arc::new(tools);

        let _ = orchestrator
            .handle(basic_request("remember my email is a@b.co"), Some("Bearer t"), HeaderOverrides::default())
            .await
            .unwrap();

        let recorded = seen.lock().unwrap().clone().unwrap();
        assert!(!recorded.contains("a@b.co"), "tool saw raw PII: {recorded:?}");
        assert!(recorded.contains("EMAIL_1"));
    }

    #[tokio::test]
    async fn rate_limited_principal_never_reaches_llm() {
        let config = config_with(&[("DEFAULT_RATE_LIMIT_QPM", "1")]);
        let (orchestrator, _backend) = orchestrator_with_reply("should not be reached", config);
        let first = orchestrator.handle(basic_request("hi"), Some("Bearer same-token"), HeaderOverrides::default()).await;
        assert!(first.is_ok());
        let second = orchestrator.handle(basic_request("hi"), Some("Bearer same-token"), HeaderOverrides::default()).await;
        assert_eq!(second.unwrap_err().kind, ErrorKind::RateLimited);
    }
}
