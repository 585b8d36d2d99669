//! Error taxonomy for the gateway.
//!
//! A plain enum of kinds, a manual `Display` impl, and `impl Error` — no `thiserror`.

use std::fmt;

/// The kind of failure that occurred while processing a request.
///
/// Kinds, not types: every failure path in the pipeline is tagged with exactly one of these so
/// the orchestrator can pick the right HTTP status and skip (or not skip) downstream components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request body or headers. No downstream calls are made.
    Validation,
    /// Missing or unknown bearer token.
    Unauthenticated,
    /// Principal lacks a required role.
    Forbidden,
    /// Rate-limit bucket exhausted.
    RateLimited,
    /// Upstream rejected credentials.
    UpstreamAuth,
    /// Upstream reported its own rate limit.
    UpstreamRate,
    /// Upstream connection could not be established or was reset.
    UpstreamConnection,
    /// Upstream call exceeded the configured deadline.
    UpstreamTimeout,
    /// Upstream model identifier was not recognized.
    UpstreamModelNotFound,
    /// Upstream rejected the request body as invalid.
    UpstreamInvalid,
    /// Upstream failure that does not fit the other `Upstream*` kinds.
    UpstreamUnknown,
    /// A registered tool raised an error during dispatch; recovered locally.
    ToolFailure,
    /// Unexpected internal failure. Detail is logged, never returned verbatim to the client.
    Internal,
}

impl ErrorKind {
    /// Map this kind to its HTTP status code.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::RateLimited => 429,
            ErrorKind::UpstreamTimeout => 504,
            ErrorKind::UpstreamAuth
            | ErrorKind::UpstreamRate
            | ErrorKind::UpstreamConnection
            | ErrorKind::UpstreamModelNotFound
            | ErrorKind::UpstreamInvalid
            | ErrorKind::UpstreamUnknown => 502,
            // Tool failures are recovered into a descriptive assistant message, but a
            // caller hitting the dispatcher directly (e.g. a debug surface) still needs a code.
            ErrorKind::ToolFailure => 200,
            ErrorKind::Internal => 500,
        }
    }

    /// Lowercase, API-stable string used in the `{"error":{"type": ...}}` response body.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::UpstreamAuth => "UPSTREAM_AUTH",
            ErrorKind::UpstreamRate => "UPSTREAM_RATE",
            ErrorKind::UpstreamConnection => "UPSTREAM_CONNECTION",
            ErrorKind::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorKind::UpstreamModelNotFound => "MODEL_NOT_FOUND",
            ErrorKind::UpstreamInvalid => "INVALID_REQUEST",
            ErrorKind::UpstreamUnknown => "UNKNOWN",
            ErrorKind::ToolFailure => "TOOL_FAILURE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// An error flowing out of the pipeline, carrying enough context to build the client-facing
/// `{"error":{"type","message","request_id"}}` body and to decide the HTTP status.
#[derive(Debug, Clone)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    pub request_id: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            request_id: request_id.into(),
        }
    }

    /// Convenience constructor for the common case where no request id is known yet
    /// (i.e. validation failures before the id is minted).
    pub fn without_request(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, "")
    }

    /// Render the `{"error": {"type", "message", "request_id"}}` JSON body.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "type": self.kind.as_str(),
                "message": self.message,
                "request_id": self.request_id,
            }
        })
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for GatewayError {}

#[cfg(feature = "server")]
impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status =
            StatusCode::from_u16(self.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, axum::Json(self.to_json())).into_response();
        if self.kind == ErrorKind::RateLimited {
            response
                .headers_mut()
                .insert("Retry-After", axum::http::HeaderValue::from_static("1"));
        }
        response
    }
}

/// Classify an upstream HTTP status code plus response body into an [`ErrorKind`], per spec
/// §4.10: "Upstream error bodies are inspected and mapped by pattern when the HTTP status is
/// ambiguous."
pub fn classify_upstream_error(status: u16, body: &str) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::UpstreamAuth,
        429 => ErrorKind::UpstreamRate,
        404 => ErrorKind::UpstreamModelNotFound,
        400 | 422 => ErrorKind::UpstreamInvalid,
        408 | 504 => ErrorKind::UpstreamTimeout,
        s if (500..600).contains(&s) => {
            let lower = body.to_lowercase();
            if lower.contains("timeout") || lower.contains("timed out") {
                ErrorKind::UpstreamTimeout
            } else if lower.contains("rate limit") || lower.contains("too many requests") {
                ErrorKind::UpstreamRate
            } else {
                ErrorKind::UpstreamConnection
            }
        }
        _ => ErrorKind::UpstreamUnknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(ErrorKind::Validation.status_code(), 400);
        assert_eq!(ErrorKind::Unauthenticated.status_code(), 401);
        assert_eq!(ErrorKind::Forbidden.status_code(), 403);
        assert_eq!(ErrorKind::RateLimited.status_code(), 429);
        assert_eq!(ErrorKind::UpstreamConnection.status_code(), 502);
        assert_eq!(ErrorKind::UpstreamTimeout.status_code(), 504);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
    }

    #[test]
    fn classify_ambiguous_5xx_by_body_pattern() {
        assert_eq!(
            classify_upstream_error(503, "upstream request timed out"),
            ErrorKind::UpstreamTimeout
        );
        assert_eq!(
            classify_upstream_error(500, "Too Many Requests, slow down"),
            ErrorKind::UpstreamRate
        );
        assert_eq!(
            classify_upstream_error(500, "internal server error"),
            ErrorKind::UpstreamConnection
        );
    }

    #[test]
    fn classify_unambiguous_status_codes() {
        assert_eq!(classify_upstream_error(401, ""), ErrorKind::UpstreamAuth);
        assert_eq!(classify_upstream_error(404, ""), ErrorKind::UpstreamModelNotFound);
        assert_eq!(classify_upstream_error(400, ""), ErrorKind::UpstreamInvalid);
    }

    #[test]
    fn error_json_has_spec_shape() {
        let err = GatewayError::new(ErrorKind::RateLimited, "too fast", "req-1");
        let json = err.to_json();
        assert_eq!(json["error"]["type"], "RATE_LIMITED");
        assert_eq!(json["error"]["request_id"], "req-1");
    }
}
