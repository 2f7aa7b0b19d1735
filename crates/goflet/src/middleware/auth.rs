//! JWT authentication middleware.
//!
//! Tokens arrive in the `token` query parameter (highest priority) or an
//! `Authorization: Bearer` header. Claims carry a permission list; a
//! request is allowed when any permission matches its method, path and
//! query. Path patterns containing `*` match any path beginning with the
//! characters before the first `*`; otherwise equality.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use crate::config::JwtConfig;
use crate::error::AppError;
use crate::state::AppState;

/// A single grant inside a token.
#[derive(Debug, Clone, Deserialize)]
pub struct Permission {
    /// Path pattern; `*` matches any suffix.
    pub path: String,
    /// Allowed methods; matched by membership.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Required query parameters; each listed pair must match exactly.
    #[serde(default)]
    pub query: HashMap<String, String>,
}

/// Token claims.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Middleware enforcing token authentication on the file service routes.
///
/// The health endpoint stays open; everything else requires a token whose
/// permissions cover the request.
pub async fn require_permission(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let jwt = &state.config().jwt;
    if !jwt.enabled || request.uri().path() == "/healthz" {
        return next.run(request).await;
    }

    let token = match extract_token(&request) {
        Some(token) => token,
        None => return AppError::Unauthorized.into_response(),
    };

    let claims = match parse_token(&token, jwt) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "rejected token");
            return AppError::Unauthorized.into_response();
        }
    };

    let method = request.method().as_str();
    let path = request.uri().path();
    let query = parse_query(request.uri().query().unwrap_or(""));

    if !is_authorized(&claims, method, path, &query) {
        return AppError::Forbidden.into_response();
    }

    next.run(request).await
}

/// Token from the `token` query parameter, else the Bearer header.
fn extract_token(request: &Request<Body>) -> Option<String> {
    let query = parse_query(request.uri().query().unwrap_or(""));
    if let Some(token) = query.get("token")
        && !token.is_empty()
    {
        return Some(token.clone());
    }

    request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Verify the token signature, expiry and issuer.
fn parse_token(token: &str, conf: &JwtConfig) -> anyhow::Result<Claims> {
    let algorithm = match conf.algorithm.as_str() {
        "HS256" => Algorithm::HS256,
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        other => anyhow::bail!("unsupported JWT algorithm: {other}"),
    };

    let mut validation = Validation::new(algorithm);
    // exp is honored when present but not required, matching tokens minted
    // without an expiry.
    validation.required_spec_claims.clear();
    validation.validate_exp = true;

    let key = DecodingKey::from_secret(conf.signing_key.as_bytes());
    let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)?;

    if !conf.trust_any_issuer {
        let issuer = data.claims.iss.as_deref().unwrap_or("");
        if !conf.trusted_issuers.iter().any(|t| t == issuer) {
            anyhow::bail!("untrusted issuer");
        }
    }

    Ok(data.claims)
}

/// Whether any permission covers the request.
fn is_authorized(
    claims: &Claims,
    method: &str,
    path: &str,
    query: &HashMap<String, String>,
) -> bool {
    claims.permissions.iter().any(|perm| {
        match_pattern(&perm.path, path)
            && perm.methods.iter().any(|m| m == method)
            && perm
                .query
                .iter()
                .all(|(k, v)| query.get(k).is_some_and(|actual| actual == v))
    })
}

/// `*`-prefix pattern match: a pattern containing `*` matches any name
/// beginning with the characters before the first `*`; otherwise equality.
fn match_pattern(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, _)) => name.starts_with(prefix),
        None => pattern == name,
    }
}

/// Minimal query-string parsing; values are percent-decoded by the client
/// convention of the original service (raw comparison).
fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
