//! Typed, immutable snapshot of environment-driven settings.
//!
//! `GatewayConfig` is read once at startup and handed to the [`crate::Orchestrator`] behind an
//! `Arc`. Nothing in the pipeline mutates it; per-request overrides live in [`super::flags::Flags`].

use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;

/// Compression aggressiveness selected for [`crate::gateway::compression::Pipeline`] presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    Low,
    Medium,
    High,
}

impl CompressionLevel {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_lowercase().as_str() {
            "low" => Ok(CompressionLevel::Low),
            "medium" => Ok(CompressionLevel::Medium),
            "high" => Ok(CompressionLevel::High),
            other => Err(ConfigError::new(format!(
                "SYNTHLANG_COMPRESSION_LEVEL must be one of low|medium|high, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompressionLevel::Low => "low",
            CompressionLevel::Medium => "medium",
            CompressionLevel::High => "high",
        };
        f.write_str(s)
    }
}

/// Raised while parsing environment variables into a [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct ConfigError(String);

impl ConfigError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Immutable, process-wide configuration snapshot.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub use_synthlang: bool,
    pub default_use_gzip: bool,
    pub gzip_size_threshold: usize,
    pub synthlang_compression_level: CompressionLevel,
    pub mask_pii_before_llm: bool,
    pub mask_pii_in_logs: bool,
    pub enable_cache: bool,
    pub cache_similarity_threshold: f32,
    pub cache_max_items: usize,
    pub cache_embedding_model: String,
    pub default_rate_limit_qpm: u32,
    pub premium_rate_limit_qpm: u32,
    pub default_model: String,
    pub llm_timeout_seconds: u64,
    pub enable_keyword_detection: bool,
    pub keyword_detection_threshold: f32,
    pub keyword_config_path: Option<String>,
    pub default_role: String,
    pub admin_users: HashSet<String>,
    pub premium_users: HashSet<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            use_synthlang: true,
            default_use_gzip: false,
            gzip_size_threshold: 5000,
            synthlang_compression_level: CompressionLevel::Medium,
            mask_pii_before_llm: false,
            mask_pii_in_logs: true,
            enable_cache: true,
            cache_similarity_threshold: 0.95,
            cache_max_items: 1000,
            cache_embedding_model: "text-embedding-3-small".to_string(),
            default_rate_limit_qpm: 60,
            premium_rate_limit_qpm: 120,
            default_model: "gpt-4.1-mini".to_string(),
            llm_timeout_seconds: 30,
            enable_keyword_detection: true,
            keyword_detection_threshold: 0.0,
            keyword_config_path: None,
            default_role: "basic".to_string(),
            admin_users: HashSet::new(),
            premium_users: HashSet::new(),
        }
    }
}

impl GatewayConfig {
    /// Build a config from the process environment, applying documented defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_map(&vars)
    }

    /// Build a config from an explicit map, used by tests so they don't mutate the real
    /// process environment.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut cfg = GatewayConfig::default();

        if let Some(v) = vars.get("USE_SYNTHLANG") {
            cfg.use_synthlang = parse_bool(v, "USE_SYNTHLANG")?;
        }
        if let Some(v) = vars.get("DEFAULT_USE_GZIP") {
            cfg.default_use_gzip = parse_bool(v, "DEFAULT_USE_GZIP")?;
        }
        if let Some(v) = vars.get("GZIP_SIZE_THRESHOLD") {
            cfg.gzip_size_threshold = parse_usize(v, "GZIP_SIZE_THRESHOLD")?;
        }
        if let Some(v) = vars.get("SYNTHLANG_COMPRESSION_LEVEL") {
            cfg.synthlang_compression_level = CompressionLevel::parse(v)?;
        }
        if let Some(v) = vars.get("MASK_PII_BEFORE_LLM") {
            cfg.mask_pii_before_llm = parse_bool(v, "MASK_PII_BEFORE_LLM")?;
        }
        if let Some(v) = vars.get("MASK_PII_IN_LOGS") {
            cfg.mask_pii_in_logs = parse_bool(v, "MASK_PII_IN_LOGS")?;
        }
        if let Some(v) = vars.get("ENABLE_CACHE") {
            cfg.enable_cache = parse_bool(v, "ENABLE_CACHE")?;
        }
        if let Some(v) = vars.get("CACHE_SIMILARITY_THRESHOLD") {
            let f = parse_f32(v, "CACHE_SIMILARITY_THRESHOLD")?;
            if !(0.0..=1.0).contains(&f) {
                return Err(ConfigError::new("CACHE_SIMILARITY_THRESHOLD must be in [0,1]"));
            }
            cfg.cache_similarity_threshold = f;
        }
        if let Some(v) = vars.get("CACHE_MAX_ITEMS") {
            cfg.cache_max_items = parse_usize(v, "CACHE_MAX_ITEMS")?;
        }
        if let Some(v) = vars.get("CACHE_EMBEDDING_MODEL") {
            cfg.cache_embedding_model = v.clone();
        }
        if let Some(v) = vars.get("DEFAULT_RATE_LIMIT_QPM") {
            cfg.default_rate_limit_qpm = parse_u32(v, "DEFAULT_RATE_LIMIT_QPM")?;
        }
        if let Some(v) = vars.get("PREMIUM_RATE_LIMIT_QPM") {
            cfg.premium_rate_limit_qpm = parse_u32(v, "PREMIUM_RATE_LIMIT_QPM")?;
        }
        if let Some(v) = vars.get("DEFAULT_MODEL") {
            cfg.default_model = v.clone();
        }
        if let Some(v) = vars.get("LLM_TIMEOUT_SECONDS") {
            cfg.llm_timeout_seconds = parse_u64(v, "LLM_TIMEOUT_SECONDS")?;
        }
        if let Some(v) = vars.get("ENABLE_KEYWORD_DETECTION") {
            cfg.enable_keyword_detection = parse_bool(v, "ENABLE_KEYWORD_DETECTION")?;
        }
        if let Some(v) = vars.get("KEYWORD_DETECTION_THRESHOLD") {
            let f = parse_f32(v, "KEYWORD_DETECTION_THRESHOLD")?;
            if !(0.0..=1.0).contains(&f) {
                return Err(ConfigError::new("KEYWORD_DETECTION_THRESHOLD must be in [0,1]"));
            }
            cfg.keyword_detection_threshold = f;
        }
        if let Some(v) = vars.get("KEYWORD_CONFIG_PATH") {
            cfg.keyword_config_path = Some(v.clone());
        }
        if let Some(v) = vars.get("DEFAULT_ROLE") {
            cfg.default_role = v.clone();
        }
        if let Some(v) = vars.get("ADMIN_USERS") {
            cfg.admin_users = split_csv(v);
        }
        if let Some(v) = vars.get("PREMIUM_USERS") {
            cfg.premium_users = split_csv(v);
        }

        Ok(cfg)
    }
}

fn split_csv(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str, key: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(ConfigError::new(format!("{key} is not a valid boolean: {raw:?}"))),
    }
}

fn parse_usize(raw: &str, key: &str) -> Result<usize, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::new(format!("{key} is not a valid non-negative integer: {raw:?}")))
}

fn parse_u32(raw: &str, key: &str) -> Result<u32, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::new(format!("{key} is not a valid u32: {raw:?}")))
}

fn parse_u64(raw: &str, key: &str) -> Result<u64, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::new(format!("{key} is not a valid u64: {raw:?}")))
}

fn parse_f32(raw: &str, key: &str) -> Result<f32, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::new(format!("{key} is not a valid float: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = GatewayConfig::default();
        assert!(cfg.use_synthlang);
        assert!(!cfg.default_use_gzip);
        assert_eq!(cfg.gzip_size_threshold, 5000);
        assert_eq!(cfg.synthlang_compression_level, CompressionLevel::Medium);
        assert!(!cfg.mask_pii_before_llm);
        assert!(cfg.mask_pii_in_logs);
        assert!(cfg.enable_cache);
        assert_eq!(cfg.cache_similarity_threshold, 0.95);
        assert_eq!(cfg.default_rate_limit_qpm, 60);
        assert_eq!(cfg.premium_rate_limit_qpm, 120);
    }

    #[test]
    fn from_map_overrides_defaults() {
        let mut vars = HashMap::new();
        vars.insert("USE_SYNTHLANG".to_string(), "0".to_string());
        vars.insert("SYNTHLANG_COMPRESSION_LEVEL".to_string(), "high".to_string());
        vars.insert("ADMIN_USERS".to_string(), "alice, bob".to_string());
        let cfg = GatewayConfig::from_map(&vars).unwrap();
        assert!(!cfg.use_synthlang);
        assert_eq!(cfg.synthlang_compression_level, CompressionLevel::High);
        assert!(cfg.admin_users.contains("alice"));
        assert!(cfg.admin_users.contains("bob"));
    }

    #[test]
    fn invalid_compression_level_is_rejected() {
        let mut vars = HashMap::new();
        vars.insert("SYNTHLANG_COMPRESSION_LEVEL".to_string(), "ultra".to_string());
        assert!(GatewayConfig::from_map(&vars).is_err());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut vars = HashMap::new();
        vars.insert("CACHE_SIMILARITY_THRESHOLD".to_string(), "1.5".to_string());
        assert!(GatewayConfig::from_map(&vars).is_err());
    }
}
