//! The gateway pipeline: auth, rate limiting, PII redaction, symbolic compression, keyword
//! dispatch, the semantic cache, the LLM client adapter, the audit sink, and the orchestrator
//! that composes all of them.

pub mod audit;
pub mod auth;
pub mod cache;
pub mod compression;
pub mod config;
pub mod embedding;
pub mod error;
pub mod flags;
pub mod llm;
pub mod orchestrator;
pub mod patterns;
pub mod rate_limit;
pub mod tools;

#[cfg(feature = "server")]
pub mod http;
