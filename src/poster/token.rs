//! Сохранение обновлённого OAuth2 токена в конфиг

use super::{AuthMode, Poster};
use crate::config::{self, split_csv, unique_non_empty, Config, CredentialConfig};
use crate::error::{AppError, AppResult};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// Переносит токен из клиента в конфиг и сохраняет файл.
///
/// Возвращает `false`, если сохранять нечего: OAuth1, токен без
/// возможности обновления или токен не изменился.
pub fn persist_oauth2_token(cfg: &mut Config, path: &Path, poster: &Poster) -> AppResult<bool> {
    if poster.auth_mode() != AuthMode::OAuth2UserToken {
        return Ok(false);
    }
    let Some(token) = poster.client().oauth2_token().filter(|t| !t.is_empty()) else {
        return Ok(false);
    };

    let before = cfg.credentials.clone();
    apply_oauth2_token(&mut cfg.credentials, &token, chrono::Utc::now().timestamp())?;
    if cfg.credentials == before {
        return Ok(false);
    }
    config::save(path, cfg)?;
    debug!("OAuth2 token persisted to {}", path.display());
    Ok(true)
}

/// Записывает поля токена в конфиг.
///
/// `access_token` обязателен. Срок действия: `expires_at`, иначе
/// `now + expires_in`, иначе остаётся прежним.
pub fn apply_oauth2_token(
    cfg: &mut CredentialConfig,
    token: &Map<String, Value>,
    now: i64,
) -> AppResult<()> {
    let text = |key: &str| token.get(key).and_then(as_text).unwrap_or_default();

    let access = text("access_token");
    if access.is_empty() {
        return Err(AppError::TokenExtraction(
            "oauth2 token does not contain access_token".to_string(),
        ));
    }
    cfg.oauth2_access_token = access;
    cfg.oauth2_refresh_token = text("refresh_token");
    cfg.oauth2_token_type = text("token_type");

    let scope = text("scope");
    if !scope.is_empty() {
        cfg.oauth2_scope = if scope.contains(',') {
            split_csv(&scope)
        } else {
            unique_non_empty(scope.split_whitespace())
        };
    }

    let expires_at = token.get("expires_at").and_then(as_i64).or_else(|| {
        token
            .get("expires_in")
            .and_then(as_i64)
            .filter(|n| *n > 0)
            .map(|n| now + n)
    });
    if let Some(at) = expires_at.filter(|at| *at > 0) {
        cfg.oauth2_expires_at = at;
    }

    Ok(())
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{poster, FakeApi};
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn token(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn applies_all_fields() {
        let mut cfg = CredentialConfig::default();
        let t = token(json!({
            "access_token": "a",
            "refresh_token": "r",
            "token_type": "bearer",
            "scope": "tweet.read tweet.write tweet.read",
            "expires_at": 1_800_000_000
        }));

        apply_oauth2_token(&mut cfg, &t, 0).unwrap();

        assert_eq!(cfg.oauth2_access_token, "a");
        assert_eq!(cfg.oauth2_refresh_token, "r");
        assert_eq!(cfg.oauth2_token_type, "bearer");
        assert_eq!(cfg.oauth2_scope, vec!["tweet.read", "tweet.write"]);
        assert_eq!(cfg.oauth2_expires_at, 1_800_000_000);
    }

    #[test]
    fn expires_in_is_relative_to_now() {
        let mut cfg = CredentialConfig::default();
        apply_oauth2_token(&mut cfg, &token(json!({"access_token": "a", "expires_in": "60"})), 1_000)
            .unwrap();
        assert_eq!(cfg.oauth2_expires_at, 1_060);
    }

    #[test]
    fn unknown_expiry_keeps_previous_value() {
        let mut cfg = CredentialConfig {
            oauth2_expires_at: 42,
            oauth2_scope: vec!["keep".to_string()],
            ..CredentialConfig::default()
        };
        apply_oauth2_token(&mut cfg, &token(json!({"access_token": "a", "expires_in": 0})), 1_000)
            .unwrap();
        assert_eq!(cfg.oauth2_expires_at, 42);
        assert_eq!(cfg.oauth2_scope, vec!["keep"]);
    }

    #[test]
    fn comma_separated_scope() {
        let mut cfg = CredentialConfig::default();
        apply_oauth2_token(&mut cfg, &token(json!({"access_token": "a", "scope": "a, b"})), 0)
            .unwrap();
        assert_eq!(cfg.oauth2_scope, vec!["a", "b"]);
    }

    #[test]
    fn missing_access_token_is_an_error() {
        let mut cfg = CredentialConfig::default();
        let err = apply_oauth2_token(&mut cfg, &token(json!({"access_token": "  "})), 0).unwrap_err();
        assert!(matches!(err, AppError::TokenExtraction(_)));
    }

    #[test]
    fn persists_refreshed_token_to_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let api = Arc::new(FakeApi::default());
        *api.token.lock().unwrap() = Some(token(json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_at": 1_900_000_000
        })));
        let poster = poster(api, AuthMode::OAuth2UserToken);
        let mut cfg = Config::default();

        assert!(persist_oauth2_token(&mut cfg, &path, &poster).unwrap());

        let (saved, _) = config::load_or_init(&path).unwrap();
        assert_eq!(saved.credentials.oauth2_access_token, "new-access");
        assert_eq!(saved.credentials.oauth2_refresh_token, "new-refresh");
        assert_eq!(saved.credentials.oauth2_expires_at, 1_900_000_000);
    }

    #[test]
    fn oauth1_or_static_token_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = Config::default();

        let oauth1 = poster(Arc::new(FakeApi::default()), AuthMode::OAuth1);
        assert!(!persist_oauth2_token(&mut cfg, &path, &oauth1).unwrap());

        let static_token = poster(Arc::new(FakeApi::default()), AuthMode::OAuth2UserToken);
        assert!(!persist_oauth2_token(&mut cfg, &path, &static_token).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn unchanged_token_is_not_saved_again() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let api = Arc::new(FakeApi::default());
        *api.token.lock().unwrap() = Some(token(json!({
            "access_token": "same",
            "refresh_token": "same-refresh",
            "expires_at": 1_900_000_000
        })));
        let poster = poster(api, AuthMode::OAuth2UserToken);
        let mut cfg = Config::default();

        assert!(persist_oauth2_token(&mut cfg, &path, &poster).unwrap());
        std::fs::remove_file(&path).unwrap();

        assert!(!persist_oauth2_token(&mut cfg, &path, &poster).unwrap());
        assert!(!path.exists());
    }
}
