//! OAuth2 PKCE авторизация и обновление токена

use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

const AUTHORIZE_URL: &str = "https://x.com/i/oauth2/authorize";
pub const TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";

/// Запас до истечения токена, при котором он обновляется заранее
const REFRESH_MARGIN_SECS: i64 = 30;

/// Зарегистрированное OAuth2 приложение
#[derive(Debug, Clone)]
pub struct OAuth2App {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Token endpoint, обычно `TOKEN_URL`
    pub token_url: String,
}

/// Состояние OAuth2 токена
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Unix время истечения
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl OAuth2Token {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at - REFRESH_MARGIN_SECS <= now)
    }
}

/// Генерирует PKCE пару `(verifier, challenge)` (S256)
pub fn generate_pkce() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    (verifier, challenge)
}

/// URL, который пользователь открывает в браузере
pub fn authorization_url(app: &OAuth2App, state: &str, challenge: &str) -> AppResult<String> {
    let mut url = url::Url::parse(AUTHORIZE_URL)
        .map_err(|e| AppError::Config(format!("invalid authorize url: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &app.client_id)
        .append_pair("redirect_uri", &app.redirect_uri)
        .append_pair("scope", &app.scopes.join(" "))
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256");
    Ok(url.to_string())
}

/// Достаёт `code` из callback URL и сверяет `state`
pub fn parse_callback(callback_url: &str, expected_state: &str) -> AppResult<String> {
    let url = url::Url::parse(callback_url.trim())
        .map_err(|e| AppError::InvalidRequest(format!("invalid callback url: {}", e)))?;

    let mut code = None;
    let mut state = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            "error" => {
                return Err(AppError::InvalidRequest(format!(
                    "authorization denied: {}",
                    v
                )))
            }
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        return Err(AppError::InvalidRequest(
            "callback state does not match".to_string(),
        ));
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::InvalidRequest("callback url has no code".to_string()))
}

/// Обменивает authorization code на токен
pub async fn exchange_code(
    http: &reqwest::Client,
    app: &OAuth2App,
    code: &str,
    verifier: &str,
) -> AppResult<OAuth2Token> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", app.redirect_uri.as_str()),
        ("code_verifier", verifier),
        ("client_id", app.client_id.as_str()),
    ];
    let token = token_request(http, app, &form).await?;
    info!("OAuth2 authorization code exchanged");
    Ok(token)
}

/// Обновляет истёкший access token
pub async fn refresh_token(
    http: &reqwest::Client,
    app: &OAuth2App,
    refresh: &str,
) -> AppResult<OAuth2Token> {
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", app.client_id.as_str()),
    ];
    let mut token = token_request(http, app, &form).await?;
    // X может не вернуть новый refresh token
    if token.refresh_token.is_none() {
        token.refresh_token = Some(refresh.to_string());
    }
    info!("OAuth2 access token refreshed");
    Ok(token)
}

async fn token_request(
    http: &reqwest::Client,
    app: &OAuth2App,
    form: &[(&str, &str)],
) -> AppResult<OAuth2Token> {
    let mut request = http.post(&app.token_url).form(form);
    if let Some(secret) = app.client_secret.as_deref().filter(|s| !s.is_empty()) {
        request = request.basic_auth(&app.client_id, Some(secret));
    }

    let response = request.send().await.map_err(|e| {
        error!("OAuth2 token request failed: {}", e);
        if e.is_timeout() {
            AppError::Timeout
        } else {
            AppError::NetworkError(e)
        }
    })?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(AppError::Api {
            status: status.as_u16(),
            body: body.trim().to_string(),
        });
    }

    let value: Value = serde_json::from_str(&body)?;
    debug!("OAuth2 token response received");
    parse_token_response(&value, chrono::Utc::now().timestamp())
}

/// Разбирает ответ token endpoint, `expires_in` переводится в абсолютное время
pub fn parse_token_response(value: &Value, now: i64) -> AppResult<OAuth2Token> {
    let text = |key: &str| {
        value[key]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let access_token = text("access_token")
        .ok_or_else(|| AppError::TokenExtraction("response has no access_token".to_string()))?;
    let expires_at = value["expires_in"]
        .as_i64()
        .filter(|n| *n > 0)
        .map(|n| now + n);

    Ok(OAuth2Token {
        access_token,
        refresh_token: text("refresh_token"),
        token_type: text("token_type"),
        scope: text("scope"),
        expires_at,
    })
}
