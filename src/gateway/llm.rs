//! Upstream LLM client: unary and streaming calls, error classification, retry, timeout.
//!
//! Adapts the [`ClientWrapper`] trait (request/response shape, native tool calls, token usage)
//! into the orchestration-facing shape the gateway needs: a deadline, a single retry on
//! transient failure, and error classification into [`ErrorKind`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::cloudllm::client_wrapper::{ClientWrapper, Message, MessageChunk};
use crate::gateway::error::{classify_upstream_error, ErrorKind, GatewayError};

/// Assistant response plus accounting, returned by [`LlmClient::complete`].
pub struct CompletionResult {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Orchestration-facing LLM client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message], request_id: &str) -> Result<CompletionResult, GatewayError>;

    async fn stream(
        &self,
        messages: &[Message],
        request_id: &str,
    ) -> Result<Option<crate::cloudllm::client_wrapper::MessageChunkStream>, GatewayError>;
}

/// Wraps any [`ClientWrapper`] (e.g. `OpenAIClient`) with a deadline and a retry policy: at most
/// one retry on a transient network error or 5xx, never on a 4xx.
pub struct WrappedLlmClient<C: ClientWrapper> {
    inner: Arc<C>,
    timeout: Duration,
}

impl<C: ClientWrapper> WrappedLlmClient<C> {
    pub fn new(inner: Arc<C>, timeout_seconds: u64) -> Self {
        Self {
            inner,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    fn classify(err: &(dyn std::error::Error + 'static)) -> ErrorKind {
        let message = err.to_string();
        let lower = message.to_lowercase();
        if let Some(status) = extract_status(&lower) {
            return classify_upstream_error(status, &lower);
        }
        if lower.contains("timeout") || lower.contains("timed out") {
            ErrorKind::UpstreamTimeout
        } else if lower.contains("unauthorized") || lower.contains("invalid api key") {
            ErrorKind::UpstreamAuth
        } else if lower.contains("rate limit") || lower.contains("too many requests") {
            ErrorKind::UpstreamRate
        } else if lower.contains("connection") || lower.contains("connect") || lower.contains("dns") {
            ErrorKind::UpstreamConnection
        } else if lower.contains("model") && lower.contains("not found") {
            ErrorKind::UpstreamModelNotFound
        } else if lower.contains("invalid request") || lower.contains("bad request") {
            ErrorKind::UpstreamInvalid
        } else {
            ErrorKind::UpstreamUnknown
        }
    }

    fn is_retryable(kind: ErrorKind) -> bool {
        matches!(
            kind,
            ErrorKind::UpstreamConnection | ErrorKind::UpstreamTimeout | ErrorKind::UpstreamUnknown
        )
    }
}

fn extract_status(message: &str) -> Option<u16> {
    // Heuristic: provider error strings commonly embed "status 429" or "429 too many requests".
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|tok| tok.parse::<u16>().ok())
        .find(|code| (400..600).contains(code))
}

#[async_trait]
impl<C: ClientWrapper + 'static> LlmClient for WrappedLlmClient<C> {
    async fn complete(&self, messages: &[Message], request_id: &str) -> Result<CompletionResult, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let call = self.inner.send_message(messages, None);
            let outcome = tokio::time::timeout(self.timeout, call).await;

            let kind = match outcome {
                Ok(Ok(message)) => {
                    let usage = self.inner.get_last_usage().await;
                    return Ok(CompletionResult {
                        content: message.content.to_string(),
                        prompt_tokens: usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
                        completion_tokens: usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
                    });
                }
                Ok(Err(err)) => Self::classify(err.as_ref()),
                Err(_) => ErrorKind::UpstreamTimeout,
            };

            if attempt == 1 && Self::is_retryable(kind) {
                log::warn!("upstream call failed ({kind:?}), retrying once");
                continue;
            }
            log::error!("upstream call failed permanently: {kind:?}");
            return Err(GatewayError::new(kind, "upstream LLM call failed", request_id));
        }
    }

    async fn stream(
        &self,
        messages: &[Message],
        request_id: &str,
    ) -> Result<Option<crate::cloudllm::client_wrapper::MessageChunkStream>, GatewayError> {
        let future = self.inner.send_message_stream(messages, None);
        match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(err)) => {
                let kind = Self::classify(err.as_ref());
                log::error!("upstream stream call failed: {kind:?}");
                Err(GatewayError::new(kind, "upstream LLM stream call failed", request_id))
            }
            Err(_) => Err(GatewayError::new(
                ErrorKind::UpstreamTimeout,
                "upstream LLM stream call timed out",
                request_id,
            )),
        }
    }
}

/// Drain a chunk stream into a single assembled string, respecting back-pressure by awaiting
/// each chunk before requesting the next. Streamed responses are cached only once fully
/// assembled.
pub async fn collect_stream(mut stream: crate::cloudllm::client_wrapper::MessageChunkStream) -> Result<String, GatewayError> {
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(MessageChunk { content, .. }) => out.push_str(&content),
            Err(err) => {
                return Err(GatewayError::without_request(
                    classify_stream_error(err.as_ref()),
                    "stream chunk failed",
                ))
            }
        }
    }
    Ok(out)
}

fn classify_stream_error(err: &(dyn std::error::Error + 'static)) -> ErrorKind {
    let lower = err.to_string().to_lowercase();
    if lower.contains("timeout") {
        ErrorKind::UpstreamTimeout
    } else {
        ErrorKind::UpstreamUnknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_status_code_from_error_message() {
        assert_eq!(extract_status("error: status 429 too many requests"), Some(429));
        assert_eq!(extract_status("401 unauthorized"), Some(401));
        assert_eq!(extract_status("no status code here"), None);
    }
}
