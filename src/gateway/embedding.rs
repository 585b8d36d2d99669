//! Text-to-vector embedding client with an exact-text-hash cache.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::cloudllm::clients::common::get_shared_http_client;

#[derive(Debug, Clone)]
pub struct EmbeddingError(pub String);

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "embedding error: {}", self.0)
    }
}

impl Error for EmbeddingError {}

/// `embed(text) → float[dim]`. `dim` is fixed per configured embedding model.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn dim(&self) -> usize;
}

/// Calls an OpenAI-compatible `/v1/embeddings` endpoint using the shared, pooled `reqwest`
/// client (see `clients::http_pool`/`clients::common::get_shared_http_client`).
pub struct OpenAiEmbeddingClient {
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dim,
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let client = get_shared_http_client();
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({ "model": self.model, "input": text });

        let response = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError(format!("upstream returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError(format!("invalid JSON response: {e}")))?;

        let vector = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| EmbeddingError("missing data[0].embedding in response".to_string()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        Ok(vector)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Wraps any [`EmbeddingClient`] with a tiny in-process cache keyed by exact text hash, so
/// repeated text within or across requests doesn't re-embed. Keyed by a `sha2-256` digest.
pub struct CachingEmbeddingClient<T: EmbeddingClient> {
    inner: T,
    cache: DashMap<[u8; 32], Vec<f32>>,
}

impl<T: EmbeddingClient> CachingEmbeddingClient<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    fn digest(text: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }
}

#[async_trait]
impl<T: EmbeddingClient> EmbeddingClient for CachingEmbeddingClient<T> {
    /// Failures fall through to "cache miss" at the semantic cache layer without aborting the
    /// request — this is enforced by the orchestrator, which treats an `Err` here as
    /// a signal to skip the cache step, not as a hard pipeline failure.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = Self::digest(text);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }
        let vector = self.inner.embed(text).await?;
        self.cache.insert(key, vector.clone());
        Ok(vector)
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for CountingClient {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }
        fn dim(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn caches_repeat_text_within_a_request() {
        let client = CachingEmbeddingClient::new(CountingClient { calls: AtomicUsize::new(0) });
        let a = client.embed("hello world").await.unwrap();
        let b = client.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_text_produces_distinct_cache_entries() {
        let client = CachingEmbeddingClient::new(CountingClient { calls: AtomicUsize::new(0) });
        client.embed("one").await.unwrap();
        client.embed("two").await.unwrap();
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }
}
