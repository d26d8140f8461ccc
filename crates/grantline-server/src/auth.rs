use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::dto::ErrorResponse;
use crate::state::AppState;

/// Environment variable holding the key clients present as a bearer token.
pub const API_KEY_ENV: &str = "GRANTLINE_SERVER_API_KEY";

/// Route prefixes served without a key: liveness checks and API docs.
const PUBLIC_PREFIXES: [&str; 3] = ["/health", "/api-docs", "/swagger-ui"];

/// Whether `path` is one of the public routes or lives under one.
pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PREFIXES.iter().any(|prefix| {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// Token from `Authorization: Bearer <token>`. The scheme is case-insensitive.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Guards every non-public route with the service API key.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let authorized = bearer_token(request.headers())
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(state.api_key.as_bytes())));

    if !authorized {
        tracing::debug!(path = %request.uri().path(), "Rejected request without a valid API key");
        let body = ErrorResponse {
            error: "unauthorized".to_string(),
            message: format!("Missing or invalid Authorization header. Expected: Bearer <{API_KEY_ENV}>"),
        };
        return (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn docs_and_health_are_public() {
        assert!(is_public_path("/health"));
        assert!(is_public_path("/api-docs/openapi.json"));
        assert!(is_public_path("/swagger-ui"));
        assert!(is_public_path("/swagger-ui/index.html"));
    }

    #[test]
    fn lookalike_and_api_paths_are_guarded() {
        assert!(!is_public_path("/healthcheck"));
        assert!(!is_public_path("/v1/jobs"));
        assert!(!is_public_path("/v1/health"));
        assert!(!is_public_path("/"));
    }

    #[test]
    fn bearer_token_accepts_any_scheme_case() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
