//! Tool registry and dispatcher.
//!
//! Only the interface and dispatch logic ship here — concrete tools (weather, calculator, etc.)
//! are out of scope. Tests register small fixture tools to exercise the dispatcher.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::cloudllm::client_wrapper::{Message, MessageChunk};
use crate::gateway::auth::{require_role, Principal};
use crate::gateway::error::{ErrorKind, GatewayError};

/// A parameter value bound from a pattern's named captures.
#[derive(Debug, Clone)]
pub enum ParamValue {
    String(String),
    Number(f64),
    Bool(bool),
}

pub type Params = HashMap<String, ParamValue>;

/// What a dispatched tool hands back to the orchestrator.
pub enum ToolOutcome {
    /// Becomes the assistant message; the LLM is not called.
    Terminal { content: String, metadata: Option<serde_json::Value> },
    /// Orchestrator proceeds with these messages in place of the originals.
    Augment { augmented_messages: Vec<Message> },
    /// A stream of chunks, same shape as LLM streaming output.
    Stream(Vec<MessageChunk>),
}

/// A registered in-process handler. Implementors must not retain `principal` beyond the call.
pub trait Tool: Send + Sync {
    fn call(&self, params: &Params, principal: &Principal, raw_message: &str) -> Result<ToolOutcome, String>;
}

struct Registration {
    tool: Arc<dyn Tool>,
    required_role: Option<String>,
}

/// `register(name, handler, required_role?)` plus dispatch.
pub struct ToolRegistry {
    tools: HashMap<String, Registration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool under `name` (dot-namespaced, e.g. `weather.lookup`); a second
    /// registration under the same name replaces the first.
    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>, required_role: Option<String>) {
        self.tools.insert(name.into(), Registration { tool, required_role });
    }

    /// Dispatch `(name, params, principal, raw_message)`.
    ///
    /// Role check runs before the handler. Panics inside a handler, and handlers that return
    /// `Err`, are both mapped to `TOOL_FAILURE` — tool errors are caught, never propagated as a
    /// hard failure.
    pub fn dispatch(
        &self,
        name: &str,
        params: &Params,
        principal: &Principal,
        raw_message: &str,
        request_id: &str,
    ) -> Result<ToolOutcome, GatewayError> {
        let registration = self.tools.get(name).ok_or_else(|| {
            GatewayError::new(ErrorKind::ToolFailure, format!("unknown tool {name:?}"), request_id)
        })?;

        if let Some(role) = &registration.required_role {
            require_role(principal, role, request_id)?;
        }

        let tool = registration.tool.clone();
        let params = params.clone();
        let principal = principal.clone();
        let raw_message = raw_message.to_string();

        let outcome = catch_unwind(AssertUnwindSafe(|| tool.call(&params, &principal, &raw_message)));
        match outcome {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(message)) => {
                log::warn!("tool {name:?} returned an error: {message}");
                Err(GatewayError::new(ErrorKind::ToolFailure, message, request_id))
            }
            Err(_) => {
                log::error!("tool {name:?} panicked during dispatch");
                Err(GatewayError::new(
                    ErrorKind::ToolFailure,
                    format!("tool {name:?} panicked"),
                    request_id,
                ))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct EchoTool;
    impl Tool for EchoTool {
        fn call(&self, params: &Params, _principal: &Principal, _raw_message: &str) -> Result<ToolOutcome, String> {
            let name = match params.get("name") {
                Some(ParamValue::String(s)) => s.clone(),
                _ => "world".to_string(),
            };
            Ok(ToolOutcome::Terminal {
                content: format!("hello, {name}"),
                metadata: None,
            })
        }
    }

    struct FailingTool;
    impl Tool for FailingTool {
        fn call(&self, _: &Params, _: &Principal, _: &str) -> Result<ToolOutcome, String> {
            Err("boom".to_string())
        }
    }

    fn principal(roles: &[&str]) -> Principal {
        Principal {
            user_id: "u1".to_string(),
            roles: roles.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            quota_qpm: 60,
        }
    }

    #[test]
    fn dispatches_to_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", Arc::new(EchoTool), None);
        let mut params = Params::new();
        params.insert("name".to_string(), ParamValue::String("Ada".to_string()));
        let outcome = registry
            .dispatch("echo", &params, &principal(&["basic"]), "hi", "req-1")
            .unwrap();
        match outcome {
            ToolOutcome::Terminal { content, .. } => assert_eq!(content, "hello, Ada"),
            _ => panic!("expected terminal outcome"),
        }
    }

    #[test]
    fn unknown_tool_is_tool_failure() {
        let registry = ToolRegistry::new();
        let err = registry
            .dispatch("nope", &Params::new(), &principal(&["basic"]), "hi", "req-1")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolFailure);
    }

    #[test]
    fn role_gated_tool_rejects_unprivileged_principal() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", Arc::new(EchoTool), Some("admin".to_string()));
        let err = registry
            .dispatch("echo", &Params::new(), &principal(&["basic"]), "hi", "req-1")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[test]
    fn tool_error_becomes_tool_failure() {
        let mut registry = ToolRegistry::new();
        registry.register("fail", Arc::new(FailingTool), None);
        let err = registry
            .dispatch("fail", &Params::new(), &principal(&["basic"]), "hi", "req-1")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolFailure);
    }
}
