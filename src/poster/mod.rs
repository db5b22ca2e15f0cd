pub mod compose;
pub mod context;
pub mod media;
pub mod token;

use crate::api::client::{ClientAuth, OAuth2Session};
use crate::api::oauth1::OAuth1Credentials;
use crate::api::oauth2::{self, OAuth2App, OAuth2Token};
use crate::api::{XApi, XClient};
use crate::config::{unique_non_empty, CredentialConfig};
use crate::error::{AppError, AppResult};
use crate::models::{MediaInput, MediaRef, TweetOutcome};
use context::RequestContext;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_OAUTH2_SCOPES: [&str; 4] =
    ["tweet.read", "tweet.write", "users.read", "offline.access"];

/// Активная схема авторизации
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    OAuth1,
    OAuth2UserToken,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::OAuth1 => "oauth1",
            AuthMode::OAuth2UserToken => "oauth2_user_token",
        }
    }
}

/// Авторизованный клиент X и режим, в котором он создан
pub struct Poster {
    client: Arc<dyn XApi>,
    auth_mode: AuthMode,
}

impl std::fmt::Debug for Poster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poster")
            .field("auth_mode", &self.auth_mode)
            .finish_non_exhaustive()
    }
}

impl Poster {
    pub fn new(client: Arc<dyn XApi>, auth_mode: AuthMode) -> Self {
        Poster { client, auth_mode }
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn client(&self) -> &dyn XApi {
        self.client.as_ref()
    }

    /// Выбирает схему авторизации по конфигу и строит клиент.
    ///
    /// OAuth1 проверяется первым: если задано хоть одно его поле, должны
    /// быть заданы все четыре.
    pub fn resolve(cfg: &CredentialConfig) -> AppResult<Poster> {
        if has_any_oauth1_fields(cfg) {
            let missing = missing_oauth1_fields(cfg);
            if !missing.is_empty() {
                return Err(AppError::IncompleteCredentials(missing));
            }

            let creds = OAuth1Credentials {
                consumer_key: cfg.api_key.trim().to_string(),
                consumer_secret: cfg.api_secret.trim().to_string(),
                token: cfg.access_token.trim().to_string(),
                token_secret: cfg.access_token_secret.trim().to_string(),
            };
            info!("Using OAuth1 credentials");
            let client = XClient::new(ClientAuth::OAuth1(creds));
            return Ok(Poster::new(Arc::new(client), AuthMode::OAuth1));
        }

        let access_token = cfg.oauth2_access_token.trim();
        if !access_token.is_empty() {
            let client_id = cfg.oauth2_client_id.trim();
            let session = if client_id.is_empty() {
                debug!("No OAuth2 client id, token will not be refreshed");
                OAuth2Session::new(
                    OAuth2Token {
                        access_token: access_token.to_string(),
                        ..OAuth2Token::default()
                    },
                    None,
                )
            } else {
                let secret = cfg.oauth2_client_secret.trim();
                let app = OAuth2App {
                    client_id: client_id.to_string(),
                    client_secret: (!secret.is_empty()).then(|| secret.to_string()),
                    redirect_uri: cfg.oauth2_redirect_uri.trim().to_string(),
                    scopes: effective_oauth2_scopes(&cfg.oauth2_scope),
                    token_url: oauth2::TOKEN_URL.to_string(),
                };
                OAuth2Session::new(oauth2_token_from_config(cfg), Some(app))
            };
            info!("Using OAuth2 user token");
            let client = XClient::new(ClientAuth::OAuth2(session));
            return Ok(Poster::new(Arc::new(client), AuthMode::OAuth2UserToken));
        }

        Err(AppError::MissingCredentials)
    }

    /// Загружает вложения по очереди и публикует пост
    pub async fn publish(
        &self,
        ctx: &RequestContext,
        text: &str,
        media: &[MediaInput],
    ) -> AppResult<TweetOutcome> {
        let mut uploaded: Vec<MediaRef> = Vec::with_capacity(media.len());
        for input in media {
            let media_ref = self
                .upload_media(ctx, &input.data, &input.content_type)
                .await?;
            uploaded.push(media_ref);
        }

        let tweet = self.create_tweet(ctx, text, &uploaded).await?;

        Ok(TweetOutcome {
            ok: true,
            auth_mode: self.auth_mode.as_str(),
            media_count: uploaded.len(),
            media: uploaded,
            tweet,
        })
    }
}

fn has_any_oauth1_fields(cfg: &CredentialConfig) -> bool {
    [
        &cfg.api_key,
        &cfg.api_secret,
        &cfg.access_token,
        &cfg.access_token_secret,
    ]
    .into_iter()
    .any(|v| !v.trim().is_empty())
}

/// Незаданные OAuth1 поля в фиксированном порядке
pub fn missing_oauth1_fields(cfg: &CredentialConfig) -> Vec<String> {
    [
        ("api_key", &cfg.api_key),
        ("api_secret", &cfg.api_secret),
        ("access_token", &cfg.access_token),
        ("access_token_secret", &cfg.access_token_secret),
    ]
    .into_iter()
    .filter(|(_, v)| v.trim().is_empty())
    .map(|(name, _)| name.to_string())
    .collect()
}

/// Scopes для OAuth2: из конфига без дубликатов или набор по умолчанию
pub fn effective_oauth2_scopes(scopes: &[String]) -> Vec<String> {
    let scopes = unique_non_empty(scopes);
    if scopes.is_empty() {
        return DEFAULT_OAUTH2_SCOPES.iter().map(|s| s.to_string()).collect();
    }
    scopes
}

fn oauth2_token_from_config(cfg: &CredentialConfig) -> OAuth2Token {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };
    OAuth2Token {
        access_token: cfg.oauth2_access_token.trim().to_string(),
        refresh_token: non_empty(&cfg.oauth2_refresh_token),
        token_type: non_empty(&cfg.oauth2_token_type),
        scope: non_empty(&cfg.oauth2_scope.join(" ")),
        expires_at: (cfg.oauth2_expires_at > 0).then_some(cfg.oauth2_expires_at),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Ответ, который FakeApi вернёт на очередной вызов
    pub enum Reply {
        Ok(Value),
        Err(AppError),
        Hang,
    }

    pub fn api_err(msg: &str) -> Reply {
        Reply::Err(AppError::Api {
            status: 400,
            body: msg.to_string(),
        })
    }

    /// X API с заранее заданными ответами; записывает все вызовы
    #[derive(Default)]
    pub struct FakeApi {
        pub upload: Mutex<VecDeque<Reply>>,
        pub initialize: Mutex<VecDeque<Reply>>,
        pub append: Mutex<VecDeque<Reply>>,
        pub finalize: Mutex<VecDeque<Reply>>,
        pub create_post: Mutex<VecDeque<Reply>>,
        pub legacy: Mutex<VecDeque<Reply>>,
        pub calls: Mutex<Vec<(String, Value)>>,
        pub token: Mutex<Option<Map<String, Value>>>,
    }

    impl FakeApi {
        pub fn script(queue: &Mutex<VecDeque<Reply>>, replies: Vec<Reply>) {
            queue.lock().unwrap().extend(replies);
        }

        pub fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_names(&self) -> Vec<String> {
            self.calls().into_iter().map(|(name, _)| name).collect()
        }

        async fn answer(
            &self,
            name: &str,
            queue: &Mutex<VecDeque<Reply>>,
            body: Value,
        ) -> AppResult<Value> {
            self.calls.lock().unwrap().push((name.to_string(), body));
            let reply = queue.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Ok(value)) => Ok(value),
                Some(Reply::Err(e)) => Err(e),
                Some(Reply::Hang) => std::future::pending().await,
                None => Err(AppError::ApiError(format!("{}: no scripted reply", name))),
            }
        }
    }

    #[async_trait]
    impl XApi for FakeApi {
        async fn upload_media(&self, body: Value) -> AppResult<Value> {
            self.answer("upload", &self.upload, body).await
        }

        async fn initialize_upload(&self, body: Value) -> AppResult<Value> {
            self.answer("initialize", &self.initialize, body).await
        }

        async fn append_upload(&self, media_id: &str, mut body: Value) -> AppResult<Value> {
            body["path_id"] = Value::String(media_id.to_string());
            self.answer("append", &self.append, body).await
        }

        async fn finalize_upload(&self, media_id: &str) -> AppResult<Value> {
            let body = serde_json::json!({ "path_id": media_id });
            self.answer("finalize", &self.finalize, body).await
        }

        async fn create_post(&self, body: Value) -> AppResult<Value> {
            self.answer("create_post", &self.create_post, body).await
        }

        async fn upload_media_legacy(&self, data: &[u8], content_type: &str) -> AppResult<Value> {
            let body = serde_json::json!({ "len": data.len(), "media_type": content_type });
            self.answer("legacy", &self.legacy, body).await
        }

        fn oauth2_token(&self) -> Option<Map<String, Value>> {
            self.token.lock().unwrap().clone()
        }
    }

    pub fn poster(api: Arc<FakeApi>, mode: AuthMode) -> Poster {
        Poster::new(api, mode)
    }
}
