// src/lib.rs

//! `synthgate` — an OpenAI-compatible gateway that sits between client applications and an
//! upstream LLM provider, enforcing auth/quota, optionally compressing and redacting prompts,
//! dispatching keyword-matched messages to in-process tools, serving a semantic response cache,
//! and auditing every completed request.
//!
//! The request-processing pipeline lives in [`gateway::orchestrator`]; see that module for the
//! end-to-end flow. The HTTP surface (`axum` router) lives in [`gateway::http`].

// The `cloudllm` module retains the provider-agnostic LLM client abstraction this crate was
// built from: `ClientWrapper`, `Message`/`Role`, and the OpenAI-compatible concrete client.
pub mod cloudllm;

// The gateway module tree implements the pipeline itself: auth, rate limiting, PII redaction,
// symbolic compression, keyword dispatch, the semantic cache, and the orchestrator that
// composes them.
pub mod gateway;

pub use cloudllm::client_wrapper::{ClientWrapper, Message, Role};
pub use gateway::config::GatewayConfig;
pub use gateway::orchestrator::Orchestrator;

/// Initialize the `env_logger` backend for the `log` facade.
///
/// Safe to call more than once; subsequent calls are no-ops. Controlled by `RUST_LOG`
/// (falls back to `info` when unset).
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(false)
        .try_init();
}
