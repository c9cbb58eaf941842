//! Bearer-token authentication for the protected API routes.
//!
//! A missing or malformed `Authorization` header is 401; a well-formed token
//! that does not match the configured access key is 403.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

#[derive(Clone)]
pub struct AuthConfig {
    access_key: Arc<str>,
}

impl AuthConfig {
    pub fn new(access_key: &str) -> Self {
        Self {
            access_key: Arc::from(access_key),
        }
    }

    fn matches(&self, token: &str) -> bool {
        // An empty key never authenticates anyone.
        !self.access_key.is_empty() && self.access_key.as_bytes().ct_eq(token.as_bytes()).into()
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_key", &"[redacted]")
            .finish()
    }
}

pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        debug!("rejected {}: missing bearer token", request.uri().path());
        return deny(StatusCode::UNAUTHORIZED, "unauthorized: missing token");
    };

    if !auth.matches(token) {
        debug!("rejected {}: wrong access key", request.uri().path());
        return deny(StatusCode::FORBIDDEN, "forbidden: invalid access key");
    }

    next.run(request).await
}

fn deny(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
