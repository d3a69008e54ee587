//! Resolved identity extracted from a verified token
//!
//! The gateway never looks at raw JWT payloads after verification; the
//! verifier reduces them to this struct, which travels with the request
//! (and, for WebSocket sessions, is persisted in the per-socket
//! attachment).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default role assigned when a token carries none.
pub const DEFAULT_ROLE: &str = "client";

/// Claims of a verified caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedClaims {
    /// `sub`: the caller's client id
    pub client_id: String,
    /// `gw`: the gateway the token is bound to
    pub gateway_id: String,
    /// `role`, defaulting to `client`
    pub role: String,
    /// String and string-array claims retained for rule substitution.
    /// Always includes `sub`.
    pub custom_claims: Map<String, Value>,
}

impl ResolvedClaims {
    /// Whether the caller holds the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Resolve a custom claim into a list of strings.
    ///
    /// A string claim becomes a one-element list, a string array is
    /// returned as-is, anything else (including absence) is empty.
    pub fn claim_values(&self, name: &str) -> Vec<String> {
        match self.custom_claims.get(name) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        }
    }
}
