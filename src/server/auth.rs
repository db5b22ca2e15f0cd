//! Проверка API токена для защищённых маршрутов

use super::{error_response, App};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

pub async fn require_api_token(
    State(app): State<Arc<App>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = app.api_token().await;
    if expected.is_empty() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "api token is not configured");
    }

    let provided = read_token(request.headers());
    if !tokens_match(&provided, &expected) {
        debug!("Rejected request with invalid api token");
        return error_response(StatusCode::UNAUTHORIZED, "invalid api token");
    }
    next.run(request).await
}

/// `Authorization: Bearer <token>`, иначе `X-API-Token`
fn read_token(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default()
    };

    let authorization = header("authorization");
    if authorization.len() > 7 {
        if let Some(scheme) = authorization.get(..7) {
            if scheme.eq_ignore_ascii_case("bearer ") {
                return authorization[7..].trim().to_string();
            }
        }
    }
    header("x-api-token").to_string()
}

// Сравниваем дайджесты, время не зависит от места расхождения
fn tokens_match(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}
