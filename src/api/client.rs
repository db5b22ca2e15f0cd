use super::oauth1::OAuth1Credentials;
use super::oauth2::{self, OAuth2App, OAuth2Token};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response};
use serde_json::{Map, Value};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const USER_AGENT: &str = "xpost/0.3";
const TIMEOUT_SECS: u64 = 60;
const API_BASE_URL: &str = "https://api.x.com/2";
const LEGACY_UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Способ авторизации запросов
pub enum ClientAuth {
    /// Каждый запрос подписывается HMAC-SHA1
    OAuth1(OAuth1Credentials),
    /// Bearer токен, опционально с возможностью обновления
    OAuth2(OAuth2Session),
}

/// Bearer токен и (если задан client id) данные для его обновления
pub struct OAuth2Session {
    app: Option<OAuth2App>,
    token: Mutex<OAuth2Token>,
    /// Одновременно идёт не больше одного обновления
    refresh_lock: tokio::sync::Mutex<()>,
}

impl OAuth2Session {
    pub fn new(token: OAuth2Token, app: Option<OAuth2App>) -> Self {
        OAuth2Session {
            app,
            token: Mutex::new(token),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.app.is_some()
    }

    fn current(&self) -> OAuth2Token {
        match self.token.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, token: OAuth2Token) {
        match self.token.lock() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    /// Возвращает актуальный заголовок, обновляя токен при необходимости
    async fn bearer(&self, http: &Client) -> AppResult<String> {
        let token = self.current();
        let Some(app) = &self.app else {
            return Ok(format!("Bearer {}", token.access_token));
        };
        if !needs_refresh(&token) {
            return Ok(format!("Bearer {}", token.access_token));
        }

        let _guard = self.refresh_lock.lock().await;
        // Пока ждали блокировку, токен мог обновить другой запрос
        let token = self.current();
        let refresh = match token.refresh_token.as_deref() {
            Some(refresh) if needs_refresh(&token) => refresh,
            _ => return Ok(format!("Bearer {}", token.access_token)),
        };

        debug!("OAuth2 access token expired, refreshing");
        let fresh = oauth2::refresh_token(http, app, refresh).await?;
        let header = format!("Bearer {}", fresh.access_token);
        self.replace(fresh);
        Ok(header)
    }
}

fn needs_refresh(token: &OAuth2Token) -> bool {
    token.refresh_token.as_deref().is_some_and(|r| !r.is_empty())
        && token.is_expired(chrono::Utc::now().timestamp())
}

pub struct XClient {
    http_client: Client,
    auth: ClientAuth,
    base_url: String,
}

impl XClient {
    pub fn new(auth: ClientAuth) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        XClient {
            http_client,
            auth,
            base_url: API_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn authorization(&self, method: &str, url: &str) -> AppResult<String> {
        match &self.auth {
            ClientAuth::OAuth1(creds) => creds.authorization_header(method, url),
            ClientAuth::OAuth2(session) => session.bearer(&self.http_client).await,
        }
    }

    async fn post_json(&self, path: &str, body: Option<Value>) -> AppResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let mut request = self
            .http_client
            .post(&url)
            .header(AUTHORIZATION, self.authorization("POST", &url).await?);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            warn!("Request to {} failed: {}", path, e);
            network_error(e)
        })?;

        read_json(response).await
    }
}

fn network_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout
    } else {
        AppError::NetworkError(e)
    }
}

/// Читает JSON ответ; статус вне 2xx превращается в `AppError::Api`.
/// Больше `MAX_RESPONSE_BYTES` не читается.
async fn read_json(mut response: Response) -> AppResult<Value> {
    let status = response.status();
    let mut payload = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = response.chunk().await.map_err(network_error)? {
        let room = MAX_RESPONSE_BYTES - payload.len();
        if chunk.len() > room {
            payload.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        payload.extend_from_slice(&chunk);
    }

    if !status.is_success() {
        return Err(AppError::Api {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&payload).trim().to_string(),
        });
    }
    if truncated {
        warn!("Response body exceeds {} bytes", MAX_RESPONSE_BYTES);
        return Err(AppError::ApiError(format!(
            "response exceeds {} bytes",
            MAX_RESPONSE_BYTES
        )));
    }

    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&payload).map_err(|e| {
        error!("Failed to parse response JSON: {}", e);
        AppError::JsonError(e)
    })
}

#[async_trait]
impl super::XApi for XClient {
    async fn upload_media(&self, body: Value) -> AppResult<Value> {
        self.post_json("/media/upload", Some(body)).await
    }

    async fn initialize_upload(&self, body: Value) -> AppResult<Value> {
        self.post_json("/media/upload/initialize", Some(body)).await
    }

    async fn append_upload(&self, media_id: &str, body: Value) -> AppResult<Value> {
        self.post_json(&format!("/media/upload/{}/append", media_id), Some(body))
            .await
    }

    async fn finalize_upload(&self, media_id: &str) -> AppResult<Value> {
        self.post_json(&format!("/media/upload/{}/finalize", media_id), None)
            .await
    }

    async fn create_post(&self, body: Value) -> AppResult<Value> {
        let result = self.post_json("/tweets", Some(body)).await?;
        info!("Post created");
        Ok(result)
    }

    async fn upload_media_legacy(&self, data: &[u8], content_type: &str) -> AppResult<Value> {
        let ClientAuth::OAuth1(creds) = &self.auth else {
            return Err(AppError::Config(
                "oauth1 auth is required for v1 media upload fallback".to_string(),
            ));
        };

        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name("upload");
        let mut form = reqwest::multipart::Form::new().part("media", part);
        if !content_type.trim().is_empty() {
            form = form.text("media_type", content_type.trim().to_string());
        }

        let response = self
            .http_client
            .post(LEGACY_UPLOAD_URL)
            .header(
                AUTHORIZATION,
                creds.authorization_header("POST", LEGACY_UPLOAD_URL)?,
            )
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                warn!("v1 media upload request failed: {}", e);
                network_error(e)
            })?;

        read_json(response).await
    }

    fn oauth2_token(&self) -> Option<Map<String, Value>> {
        let ClientAuth::OAuth2(session) = &self.auth else {
            return None;
        };
        if !session.can_refresh() {
            return None;
        }
        match serde_json::to_value(session.current()) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}
