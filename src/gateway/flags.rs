//! Per-request effective configuration.
//!
//! `Flags` is the merge of [`GatewayConfig`] ⊕ request headers ⊕ request body overrides,
//! computed once per request by the orchestrator and threaded through explicitly — no
//! thread-local or global mutable config.

use crate::gateway::config::{CompressionLevel, GatewayConfig};

/// Headers this crate recognizes as per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct HeaderOverrides {
    pub mask_pii_before_llm: Option<bool>,
    pub mask_pii_in_logs: Option<bool>,
}

/// Request-body fields that override compression and cache toggles.
#[derive(Debug, Clone, Default)]
pub struct BodyOverrides {
    pub use_synthlang: Option<bool>,
    pub use_gzip: Option<bool>,
    pub synthlang_compression_level: Option<CompressionLevel>,
    pub cache: Option<bool>,
    pub disable_keyword_detection: Option<bool>,
}

/// Effective, fully-resolved configuration for a single request.
#[derive(Debug, Clone)]
pub struct Flags {
    pub use_synthlang: bool,
    pub use_gzip: bool,
    pub synthlang_compression_level: CompressionLevel,
    pub mask_pii_before_llm: bool,
    pub mask_pii_in_logs: bool,
    pub cache: bool,
    pub keyword_detection_enabled: bool,
}

impl Flags {
    /// Merge `config ⊕ headers ⊕ body` in that precedence order: body wins over headers, which
    /// win over config.
    pub fn resolve(config: &GatewayConfig, headers: &HeaderOverrides, body: &BodyOverrides) -> Self {
        Flags {
            use_synthlang: body.use_synthlang.unwrap_or(config.use_synthlang),
            use_gzip: body.use_gzip.unwrap_or(config.default_use_gzip),
            synthlang_compression_level: body
                .synthlang_compression_level
                .unwrap_or(config.synthlang_compression_level),
            mask_pii_before_llm: headers
                .mask_pii_before_llm
                .unwrap_or(config.mask_pii_before_llm),
            mask_pii_in_logs: headers.mask_pii_in_logs.unwrap_or(config.mask_pii_in_logs),
            cache: body.cache.unwrap_or(config.enable_cache),
            keyword_detection_enabled: config.enable_keyword_detection
                && !body.disable_keyword_detection.unwrap_or(false),
        }
    }
}
