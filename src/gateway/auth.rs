//! Bearer-token authentication and role resolution.
//!
//! Constant-time comparison via [`subtle::ConstantTimeEq`], `Authorization: Bearer <token>`
//! extraction, and a 401 on anything that doesn't check out.

use std::collections::HashSet;

use subtle::ConstantTimeEq;

use crate::gateway::config::GatewayConfig;
use crate::gateway::error::{ErrorKind, GatewayError};

/// Authenticated caller identity plus its transitively-expanded role set.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub roles: HashSet<String>,
    pub quota_qpm: u32,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// `admin > premium > basic`; every authenticated user implicitly holds `basic`.
fn expand_roles(direct: &str) -> HashSet<String> {
    let mut roles = HashSet::new();
    roles.insert("basic".to_string());
    match direct {
        "admin" => {
            roles.insert("admin".to_string());
            roles.insert("premium".to_string());
        }
        "premium" => {
            roles.insert("premium".to_string());
        }
        _ => {}
    }
    roles
}

/// Resolves bearer tokens to [`Principal`]s using the `ADMIN_USERS`/`PREMIUM_USERS`
/// membership lists from [`GatewayConfig`].
///
/// The gateway treats the bearer token itself as the user identity; the identity provider is
/// left external to the core. Deployments that front this with a real API-key store can swap in
/// their own lookup ahead of [`AuthGate::authenticate`].
pub struct AuthGate {
    admin_users: HashSet<String>,
    premium_users: HashSet<String>,
    default_role: String,
    default_rate_limit_qpm: u32,
    premium_rate_limit_qpm: u32,
}

impl AuthGate {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            admin_users: config.admin_users.clone(),
            premium_users: config.premium_users.clone(),
            default_role: config.default_role.clone(),
            default_rate_limit_qpm: config.default_rate_limit_qpm,
            premium_rate_limit_qpm: config.premium_rate_limit_qpm,
        }
    }

    /// Resolve an `Authorization: Bearer <token>` header value into a [`Principal`].
    ///
    /// `UNAUTHENTICATED` when the header is missing, malformed, or the token is empty.
    /// Bearer-token well-formedness is the only check performed here; constant-time equality is
    /// reserved for the membership checks below, which is where timing differences could leak
    /// which identity class a given token belongs to.
    pub fn authenticate(&self, authorization_header: Option<&str>) -> Result<Principal, GatewayError> {
        let token = extract_bearer(authorization_header).ok_or_else(|| {
            GatewayError::without_request(ErrorKind::Unauthenticated, "missing or malformed bearer token")
        })?;
        if token.is_empty() {
            return Err(GatewayError::without_request(
                ErrorKind::Unauthenticated,
                "empty bearer token",
            ));
        }

        let direct_role = if self.contains_constant_time(&self.admin_users, token) {
            "admin"
        } else if self.contains_constant_time(&self.premium_users, token) {
            "premium"
        } else {
            self.default_role.as_str()
        };

        let roles = expand_roles(direct_role);
        let quota_qpm = if roles.contains("premium") {
            self.premium_rate_limit_qpm
        } else {
            self.default_rate_limit_qpm
        };

        Ok(Principal {
            user_id: token.to_string(),
            roles,
            quota_qpm,
        })
    }

    /// Constant-time membership test: compares `needle` against every member of `set`,
    /// never short-circuiting on the first match, so membership timing does not vary with
    /// where in the set (or whether) the token appears.
    fn contains_constant_time(&self, set: &HashSet<String>, needle: &str) -> bool {
        let mut found = false;
        for member in set {
            if member.len() == needle.len() && bool::from(member.as_bytes().ct_eq(needle.as_bytes())) {
                found = true;
            }
        }
        found
    }
}

/// `require_role(principal, role) → FORBIDDEN` when not satisfied.
pub fn require_role(principal: &Principal, role: &str, request_id: &str) -> Result<(), GatewayError> {
    if principal.has_role(role) {
        Ok(())
    } else {
        Err(GatewayError::new(
            ErrorKind::Forbidden,
            format!("principal lacks required role {role:?}"),
            request_id,
        ))
    }
}

fn extract_bearer(header: Option<&str>) -> Option<&str> {
    header?.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn gate_with(admin: &str, premium: &str) -> AuthGate {
        let mut vars = HashMap::new();
        vars.insert("ADMIN_USERS".to_string(), admin.to_string());
        vars.insert("PREMIUM_USERS".to_string(), premium.to_string());
        let config = GatewayConfig::from_map(&vars).unwrap();
        AuthGate::new(&config)
    }

    #[test]
    fn missing_header_is_unauthenticated() {
        let gate = gate_with("", "");
        let err = gate.authenticate(None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
    }

    #[test]
    fn wrong_scheme_is_unauthenticated() {
        let gate = gate_with("", "");
        let err = gate.authenticate(Some("Basic abc123")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
    }

    #[test]
    fn admin_token_closes_over_premium_and_basic() {
        let gate = gate_with("admin-token", "");
        let principal = gate.authenticate(Some("Bearer admin-token")).unwrap();
        assert!(principal.has_role("admin"));
        assert!(principal.has_role("premium"));
        assert!(principal.has_role("basic"));
    }

    #[test]
    fn unknown_token_gets_default_role_only() {
        let gate = gate_with("admin-token", "premium-token");
        let principal = gate.authenticate(Some("Bearer nobody-knows-this")).unwrap();
        assert!(!principal.has_role("admin"));
        assert!(!principal.has_role("premium"));
        assert!(principal.has_role("basic"));
        assert_eq!(principal.quota_qpm, 60);
    }

    #[test]
    fn premium_token_gets_premium_quota() {
        let gate = gate_with("", "premium-token");
        let principal = gate.authenticate(Some("Bearer premium-token")).unwrap();
        assert_eq!(principal.quota_qpm, 120);
    }

    #[test]
    fn require_role_rejects_missing_role() {
        let gate = gate_with("", "");
        let principal = gate.authenticate(Some("Bearer anyone")).unwrap();
        let err = require_role(&principal, "admin", "req-1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }
}
