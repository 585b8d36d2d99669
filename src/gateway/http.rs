//! Axum HTTP surface: the chat-completion endpoint plus the debug/admin surface.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::gateway::auth::require_role;
use crate::gateway::compression::{build_pipeline, StageMetrics};
use crate::gateway::config::CompressionLevel;
use crate::gateway::error::GatewayError;
use crate::gateway::flags::{BodyOverrides, HeaderOverrides};
use crate::gateway::orchestrator::{ChatMessageInput, ChatRequest, Orchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the router. Callers mount this under their own `axum::serve` loop; this
/// crate does not own the listener.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/synthlang/compress", post(synthlang_compress))
        .route("/v1/synthlang/decompress", post(synthlang_decompress))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache/clear", post(cache_clear))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(AppState { orchestrator })
}

#[derive(Deserialize)]
struct ChatMessageDto {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionBody {
    model: String,
    messages: Vec<ChatMessageDto>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    n: Option<u32>,
    stream: Option<bool>,
    use_synthlang: Option<bool>,
    use_gzip: Option<bool>,
    synthlang_compression_level: Option<String>,
    cache: Option<bool>,
    disable_keyword_detection: Option<bool>,
}

fn parse_compression_level(raw: &str) -> Option<CompressionLevel> {
    match raw.to_lowercase().as_str() {
        "low" => Some(CompressionLevel::Low),
        "medium" => Some(CompressionLevel::Medium),
        "high" => Some(CompressionLevel::High),
        _ => None,
    }
}

fn header_flag(headers: &HeaderMap, name: &str) -> Option<bool> {
    headers.get(name).and_then(|v| v.to_str().ok()).and_then(|v| match v {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    })
}

fn bearer_header(headers: &HeaderMap) -> Option<String> {
    headers.get("authorization").and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

impl ChatCompletionBody {
    fn into_request(self) -> ChatRequest {
        let overrides = BodyOverrides {
            use_synthlang: self.use_synthlang,
            use_gzip: self.use_gzip,
            synthlang_compression_level: self.synthlang_compression_level.as_deref().and_then(parse_compression_level),
            cache: self.cache,
            disable_keyword_detection: self.disable_keyword_detection,
        };
        ChatRequest {
            model: self.model,
            messages: self.messages.into_iter().map(|m| ChatMessageInput { role: m.role, content: m.content }).collect(),
            temperature: self.temperature,
            top_p: self.top_p,
            n: self.n,
            stream: self.stream.unwrap_or(false),
            overrides,
        }
    }
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionBody>,
) -> Response {
    let header_overrides = HeaderOverrides {
        mask_pii_before_llm: header_flag(&headers, "x-mask-pii-before-llm"),
        mask_pii_in_logs: header_flag(&headers, "x-mask-pii-in-logs"),
    };
    let auth = bearer_header(&headers);
    let request = body.into_request();

    if request.stream {
        return stream_chat_completions(state, request, auth, header_overrides).await;
    }

    match state.orchestrator.handle(request, auth.as_deref(), header_overrides).await {
        Ok(response) => {
            let cache_hit = response.cache_hit;
            let mut http_response = (StatusCode::OK, Json(response)).into_response();
            if cache_hit {
                http_response.headers_mut().insert("X-Cache-Hit", "true".parse().unwrap());
            }
            http_response
        }
        Err(err) => err.into_response(),
    }
}

async fn stream_chat_completions(
    state: AppState,
    request: ChatRequest,
    auth: Option<String>,
    header_overrides: HeaderOverrides,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<String, GatewayError>>(32);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(err) = orchestrator.handle_streaming(request, auth.as_deref(), header_overrides, tx.clone()).await {
            let _ = tx.send(Err(err)).await;
        }
    });

    let event_stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .map(|item| -> Result<Event, Infallible> {
        match item {
            Ok(content) => Ok(Event::default().data(
                serde_json::json!({"choices": [{"delta": {"content": content}}]}).to_string(),
            )),
            Err(err) => Ok(Event::default().data(err.to_json().to_string())),
        }
    });
    let terminated = event_stream.chain(futures_util::stream::once(async { Ok(Event::default().data("[DONE]")) }));
    Sse::new(terminated).into_response()
}

#[derive(Deserialize)]
struct CompressBody {
    text: String,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    gzip: bool,
}

#[derive(Serialize)]
struct CompressResponseBody {
    output: String,
    input_chars: usize,
    output_chars: usize,
    delta_chars: i64,
    compression_degraded: bool,
}

async fn synthlang_compress(State(state): State<AppState>, Json(body): Json<CompressBody>) -> Response {
    let level = body.level.as_deref().and_then(parse_compression_level).unwrap_or(CompressionLevel::Medium);
    let pipeline = build_pipeline(level, body.gzip, state.orchestrator.config.gzip_size_threshold);
    let result = pipeline.encode(&body.text);
    Json(CompressResponseBody {
        input_chars: body.text.chars().count(),
        output_chars: result.text.chars().count(),
        delta_chars: result.text.chars().count() as i64 - body.text.chars().count() as i64,
        compression_degraded: result.compression_degraded,
        output: result.text,
    })
    .into_response()
}

#[derive(Deserialize)]
struct DecompressBody {
    text: String,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    gzip: bool,
}

async fn synthlang_decompress(State(state): State<AppState>, Json(body): Json<DecompressBody>) -> Response {
    let level = body.level.as_deref().and_then(parse_compression_level).unwrap_or(CompressionLevel::Medium);
    let pipeline = build_pipeline(level, body.gzip, state.orchestrator.config.gzip_size_threshold);
    // This debug surface has no prior encode's StageMetrics to replay, so every stage is
    // assumed to have applied — the only stage that matters for exactness here is the
    // gzip+base64 terminal stage, which is genuinely reversible.
    let assumed_applied: Vec<StageMetrics> = (0..pipeline_stage_count(&pipeline))
        .map(|i| StageMetrics { name: stage_name(&pipeline, i), in_chars: 0, out_chars: 0, applied: true })
        .collect();
    let output = pipeline.decode(&body.text, &assumed_applied);
    Json(serde_json::json!({ "output": output })).into_response()
}

fn pipeline_stage_count(pipeline: &crate::gateway::compression::Pipeline) -> usize {
    pipeline.stage_names().len()
}

fn stage_name(pipeline: &crate::gateway::compression::Pipeline, index: usize) -> &'static str {
    pipeline.stage_names()[index]
}

async fn cache_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match authenticate_admin(&state, &headers) {
        Ok(()) => {}
        Err(err) => return err.into_response(),
    }
    let stats = state.orchestrator.cache.stats(None).await;
    let body: Vec<_> = stats
        .into_iter()
        .map(|(model, s)| serde_json::json!({"model": model, "entry_count": s.entry_count, "max_items": s.max_items}))
        .collect();
    Json(serde_json::json!({ "models": body })).into_response()
}

async fn cache_clear(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match authenticate_admin(&state, &headers) {
        Ok(()) => {}
        Err(err) => return err.into_response(),
    }
    state.orchestrator.cache.clear(None).await;
    StatusCode::NO_CONTENT.into_response()
}

fn authenticate_admin(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let auth = bearer_header(headers);
    let principal = state.orchestrator.auth_gate.authenticate(auth.as_deref())?;
    require_role(&principal, "admin", "")
}

async fn health() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    let dropped = state.orchestrator.audit_sink.dropped_count();
    let cache_stats = state.orchestrator.cache.stats(None).await;
    let mut out = String::new();
    out.push_str("# HELP gateway_audit_queue_dropped_total Records dropped from the audit queue.\n");
    out.push_str("# TYPE gateway_audit_queue_dropped_total counter\n");
    out.push_str(&format!("gateway_audit_queue_dropped_total {dropped}\n"));
    out.push_str("# HELP gateway_cache_entries Current semantic cache entries per model.\n");
    out.push_str("# TYPE gateway_cache_entries gauge\n");
    for (model, stats) in cache_stats {
        out.push_str(&format!("gateway_cache_entries{{model=\"{model}\"}} {}\n", stats.entry_count));
    }
    (StatusCode::OK, out).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognized_compression_levels() {
        assert_eq!(parse_compression_level("LOW"), Some(CompressionLevel::Low));
        assert_eq!(parse_compression_level("bogus"), None);
    }

    #[test]
    fn header_flag_reads_boolean_style_values() {
        let mut headers = HeaderMap::new();
        headers.insert("x-mask-pii-before-llm", "1".parse().unwrap());
        assert_eq!(header_flag(&headers, "x-mask-pii-before-llm"), Some(true));
        assert_eq!(header_flag(&headers, "missing"), None);
    }
}
