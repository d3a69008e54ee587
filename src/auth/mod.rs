//! JWT verification and signing
//!
//! Tokens are compact HS256 JWS. Verification supports two-secret
//! rotation: the primary secret is tried first and the previous secret
//! only on a signature mismatch, never on expiry or malformed input.
//! The payload is reduced to [`ResolvedClaims`]; `exp` is mandatory and
//! must be strictly in the future by the server's wall clock.

use crate::constants::DEFAULT_TOKEN_TTL_SECS;
use crate::types::claims::{ResolvedClaims, DEFAULT_ROLE};
use crate::types::error::{Error, Result};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Claims the gateway itself reserves; everything else is custom.
const RESERVED_CLAIMS: [&str; 7] = ["sub", "gw", "exp", "iat", "iss", "aud", "role"];

/// Secret material for token verification and signing.
#[derive(Debug, Clone)]
pub struct JwtKeys {
    /// Secret used for signing and tried first on verification
    primary: String,
    /// Retired secret still accepted on signature mismatch
    previous: Option<String>,
}

impl JwtKeys {
    /// Build from a primary secret and an optional previous secret.
    pub fn new(primary: impl Into<String>, previous: Option<String>) -> Result<Self> {
        let primary = primary.into();
        if primary.is_empty() {
            return Err(Error::validation("JWT secret must be non-empty"));
        }
        Ok(Self { primary, previous: previous.filter(|p| !p.is_empty()) })
    }

    /// Parse the `JWT_SECRET` binding: a bare secret, a JSON two-entry
    /// list, or a comma-separated pair.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with('[') {
            let entries: Vec<String> = serde_json::from_str(raw)
                .map_err(|_| Error::validation("JWT_SECRET list must be a JSON array of strings"))?;
            match entries.as_slice() {
                [primary] => Self::new(primary.clone(), None),
                [primary, previous] => Self::new(primary.clone(), Some(previous.clone())),
                _ => Err(Error::validation("JWT_SECRET list must hold one or two secrets")),
            }
        } else if let Some((primary, previous)) = raw.split_once(',') {
            Self::new(primary.trim().to_string(), Some(previous.trim().to_string()))
        } else {
            Self::new(raw.to_string(), None)
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    // Expiry is checked by hand below so a stale token is never
    // confused with a signature mismatch during rotation fallback.
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Verify a compact JWS and reduce its payload to resolved claims.
pub fn verify_token(token: &str, keys: &JwtKeys) -> Result<ResolvedClaims> {
    verify_token_at(token, keys, now_secs())
}

/// [`verify_token`] against an explicit wall-clock reading (seconds).
pub fn verify_token_at(token: &str, keys: &JwtKeys, now: u64) -> Result<ResolvedClaims> {
    let header = decode_header(token).map_err(map_decode_error)?;
    if header.alg != Algorithm::HS256 {
        return Err(Error::auth("Unsupported JWT: algorithm must be HS256"));
    }
    if header.typ.as_deref() != Some("JWT") {
        return Err(Error::auth("Unsupported JWT: typ must be JWT"));
    }

    let primary = DecodingKey::from_secret(keys.primary.as_bytes());
    let payload = match decode::<Map<String, Value>>(token, &primary, &validation()) {
        Ok(data) => data.claims,
        Err(err) if matches!(err.kind(), ErrorKind::InvalidSignature) => {
            let previous = keys
                .previous
                .as_ref()
                .ok_or_else(|| Error::auth("Invalid signature"))?;
            let previous = DecodingKey::from_secret(previous.as_bytes());
            decode::<Map<String, Value>>(token, &previous, &validation())
                .map_err(|_| Error::auth("Invalid signature"))?
                .claims
        }
        Err(err) => return Err(map_decode_error(err)),
    };

    extract_claims(&payload, now)
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> Error {
    match err.kind() {
        ErrorKind::InvalidSignature => Error::auth("Invalid signature"),
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            Error::auth("Unsupported JWT: algorithm must be HS256")
        }
        _ => Error::auth(format!("Malformed JWT: {err}")),
    }
}

/// Reduce a verified payload to [`ResolvedClaims`].
fn extract_claims(payload: &Map<String, Value>, now: u64) -> Result<ResolvedClaims> {
    let client_id = payload
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::auth("Malformed JWT: missing sub claim"))?;
    let gateway_id = payload
        .get("gw")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::auth("Malformed JWT: missing gw claim"))?;
    let exp = payload
        .get("exp")
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::auth("Malformed JWT: missing exp claim"))?;
    if exp <= now as f64 {
        return Err(Error::auth("Token expired"));
    }
    let role = payload
        .get("role")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_ROLE);

    let mut custom_claims = Map::new();
    for (name, value) in payload {
        if RESERVED_CLAIMS.contains(&name.as_str()) {
            continue;
        }
        let keep = match value {
            Value::String(_) => true,
            Value::Array(items) => items.iter().all(Value::is_string),
            _ => false,
        };
        if keep {
            custom_claims.insert(name.clone(), value.clone());
        }
    }
    custom_claims.insert("sub".into(), Value::String(client_id.to_string()));

    Ok(ResolvedClaims {
        client_id: client_id.to_string(),
        gateway_id: gateway_id.to_string(),
        role: role.to_string(),
        custom_claims,
    })
}

/// Options for [`sign_token`].
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Role claim; defaults to `client`
    pub role: Option<String>,
    /// Lifetime in seconds; defaults to one hour
    pub ttl_secs: Option<u64>,
    /// Extra claims copied into the payload
    pub extra: Map<String, Value>,
}

/// Sign an HS256 token with the primary secret.
pub fn sign_token(
    keys: &JwtKeys,
    client_id: &str,
    gateway_id: &str,
    options: SignOptions,
) -> Result<String> {
    let mut payload = options.extra;
    payload.insert("sub".into(), Value::String(client_id.to_string()));
    payload.insert("gw".into(), Value::String(gateway_id.to_string()));
    payload.insert(
        "role".into(),
        Value::String(options.role.unwrap_or_else(|| DEFAULT_ROLE.to_string())),
    );
    let ttl = options.ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
    payload.insert("iat".into(), Value::Number(now_secs().into()));
    payload.insert("exp".into(), Value::Number((now_secs() + ttl).into()));

    encode(
        &Header::new(Algorithm::HS256),
        &payload,
        &EncodingKey::from_secret(keys.primary.as_bytes()),
    )
    .map_err(|e| Error::internal(format!("token signing failed: {e}")))
}
