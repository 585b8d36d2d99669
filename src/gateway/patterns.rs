//! Keyword-pattern registry and matcher.
//!
//! Registry writes publish a fresh immutable snapshot under a short write lock; readers clone
//! the `Arc` and never block behind a writer — copy-on-write, lock-free for readers.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::Deserialize;

use crate::gateway::auth::Principal;
use crate::gateway::flags::Flags;

/// A compiled pattern bound to a tool.
#[derive(Clone)]
pub struct Pattern {
    pub name: String,
    pub regex: Regex,
    pub tool: String,
    pub description: String,
    pub priority: i64,
    pub required_role: Option<String>,
    pub enabled: bool,
}

/// On-disk representation, one table per pattern.
#[derive(Deserialize)]
struct RawPattern {
    pattern: String,
    tool: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    required_role: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
struct RawPatternFile {
    #[serde(default)]
    patterns: HashMap<String, RawPattern>,
}

#[derive(Debug, Clone)]
pub struct PatternError(pub String);

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pattern error: {}", self.0)
    }
}

impl std::error::Error for PatternError {}

/// Process-wide registry of patterns, published as immutable snapshots.
pub struct PatternRegistry {
    snapshot: RwLock<Arc<Vec<Pattern>>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Load patterns from a TOML file, replacing the current snapshot.
    pub fn load_toml_file(path: &str) -> Result<Self, PatternError> {
        let contents = fs::read_to_string(path).map_err(|e| PatternError(format!("reading {path}: {e}")))?;
        let registry = Self::new();
        registry.load_toml_str(&contents)?;
        Ok(registry)
    }

    pub fn load_toml_str(&self, contents: &str) -> Result<(), PatternError> {
        let raw: RawPatternFile = toml::from_str(contents).map_err(|e| PatternError(format!("parsing TOML: {e}")))?;
        let mut patterns = Vec::with_capacity(raw.patterns.len());
        for (name, entry) in raw.patterns {
            patterns.push(Self::compile(name, entry)?);
        }
        self.publish(patterns);
        Ok(())
    }

    fn compile(name: String, raw: RawPattern) -> Result<Pattern, PatternError> {
        let regex = Regex::new(&raw.pattern)
            .map_err(|e| PatternError(format!("pattern {name:?} has invalid regex: {e}")))?;
        Ok(Pattern {
            name,
            regex,
            tool: raw.tool,
            description: raw.description,
            priority: raw.priority,
            required_role: raw.required_role,
            enabled: raw.enabled,
        })
    }

    /// `add(pattern)`. Replaces any existing pattern with the same name.
    pub fn add(&self, pattern: Pattern) {
        let mut patterns = self.list();
        patterns.retain(|p| p.name != pattern.name);
        patterns.push(pattern);
        self.publish(patterns);
    }

    /// `remove(name)`.
    pub fn remove(&self, name: &str) {
        let mut patterns = self.list();
        patterns.retain(|p| p.name != name);
        self.publish(patterns);
    }

    /// `update(name, fields)`, expressed as a mutator closure applied to the
    /// existing pattern (keeps the call site simple without a separate partial-update struct).
    pub fn update(&self, name: &str, mutator: impl FnOnce(&mut Pattern)) -> bool {
        let mut patterns = self.list();
        if let Some(p) = patterns.iter_mut().find(|p| p.name == name) {
            mutator(p);
            self.publish(patterns);
            true
        } else {
            false
        }
    }

    /// `list()`: a clone of the current snapshot's contents.
    pub fn list(&self) -> Vec<Pattern> {
        self.snapshot.read().expect("pattern registry lock poisoned").as_ref().clone()
    }

    /// `snapshot() → immutable ordered slice`: an `Arc` clone, lock-free for the
    /// reader for the duration of its use.
    pub fn snapshot(&self) -> Arc<Vec<Pattern>> {
        self.snapshot.read().expect("pattern registry lock poisoned").clone()
    }

    fn publish(&self, mut patterns: Vec<Pattern>) {
        // Total order: descending priority, ties broken by ascending name.
        patterns.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        *self.snapshot.write().expect("pattern registry lock poisoned") = Arc::new(patterns);
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of a successful pattern match.
pub struct MatchResult {
    pub tool: String,
    pub params: HashMap<String, String>,
    pub pattern_name: String,
}

/// `match(message_text, principal, feature_flags) → MatchResult | NoMatch`.
pub fn match_message(
    snapshot: &[Pattern],
    message_text: &str,
    principal: &Principal,
    flags: &Flags,
) -> Option<MatchResult> {
    if !flags.keyword_detection_enabled {
        return None;
    }

    for pattern in snapshot {
        if !pattern.enabled {
            continue;
        }
        if let Some(role) = &pattern.required_role {
            if !principal.has_role(role) {
                continue;
            }
        }
        if let Some(captures) = pattern.regex.captures(message_text) {
            let mut params = HashMap::new();
            for name in pattern.regex.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    params.insert(name.to_string(), m.as_str().to_string());
                }
            }
            return Some(MatchResult {
                tool: pattern.tool.clone(),
                params,
                pattern_name: pattern.name.clone(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn principal(roles: &[&str]) -> Principal {
        Principal {
            user_id: "u1".to_string(),
            roles: roles.iter().map(|s| s.to_string()).collect(),
            quota_qpm: 60,
        }
    }

    fn flags() -> Flags {
        Flags {
            use_synthlang: true,
            use_gzip: false,
            synthlang_compression_level: crate::gateway::config::CompressionLevel::Medium,
            mask_pii_before_llm: false,
            mask_pii_in_logs: true,
            cache: true,
            keyword_detection_enabled: true,
        }
    }

    #[test]
    fn higher_priority_pattern_wins_over_lower() {
        let registry = PatternRegistry::new();
        registry.add(Pattern {
            name: "low".to_string(),
            regex: Regex::new(r"(?i)weather").unwrap(),
            tool: "low_tool".to_string(),
            description: String::new(),
            priority: 1,
            required_role: None,
            enabled: true,
        });
        registry.add(Pattern {
            name: "high".to_string(),
            regex: Regex::new(r"(?i)weather").unwrap(),
            tool: "high_tool".to_string(),
            description: String::new(),
            priority: 10,
            required_role: None,
            enabled: true,
        });

        let snapshot = registry.snapshot();
        let principal = principal(&["basic"]);
        let result = match_message(&snapshot, "what's the weather", &principal, &flags()).unwrap();
        assert_eq!(result.tool, "high_tool");
    }

    #[test]
    fn role_gated_pattern_is_skipped_for_unprivileged_principal() {
        let registry = PatternRegistry::new();
        registry.add(Pattern {
            name: "admin_only".to_string(),
            regex: Regex::new(r"(?i)admin thing").unwrap(),
            tool: "admin_tool".to_string(),
            description: String::new(),
            priority: 5,
            required_role: Some("admin".to_string()),
            enabled: true,
        });

        let snapshot = registry.snapshot();
        let principal = principal(&["basic"]);
        assert!(match_message(&snapshot, "do the admin thing", &principal, &flags()).is_none());
    }

    #[test]
    fn keyword_detection_disabled_skips_matching_entirely() {
        let registry = PatternRegistry::new();
        registry.add(Pattern {
            name: "p".to_string(),
            regex: Regex::new(r"(?i)hello").unwrap(),
            tool: "t".to_string(),
            description: String::new(),
            priority: 1,
            required_role: None,
            enabled: true,
        });

        let snapshot = registry.snapshot();
        let principal = principal(&["basic"]);
        let mut f = flags();
        f.keyword_detection_enabled = false;
        assert!(match_message(&snapshot, "hello there", &principal, &f).is_none());
    }

    #[test]
    fn named_captures_become_params() {
        let registry = PatternRegistry::new();
        registry.add(Pattern {
            name: "weather".to_string(),
            regex: Regex::new(r"(?i)what(?:'s| is) the weather in (?P<location>.+?)\??$").unwrap(),
            tool: "weather".to_string(),
            description: String::new(),
            priority: 1,
            required_role: None,
            enabled: true,
        });

        let snapshot = registry.snapshot();
        let principal = principal(&["basic"]);
        let result = match_message(&snapshot, "What's the weather in London?", &principal, &flags()).unwrap();
        assert_eq!(result.params.get("location").map(String::as_str), Some("London"));
    }

    #[test]
    fn loads_from_toml_schema() {
        let registry = PatternRegistry::new();
        let toml = r#"
            [patterns.weather]
            pattern = "(?i)weather in (?P<location>.+)"
            tool = "weather"
            description = "looks up weather"
            priority = 5
            enabled = true
        "#;
        registry.load_toml_str(toml).unwrap();
        assert_eq!(registry.list().len(), 1);
    }
}
