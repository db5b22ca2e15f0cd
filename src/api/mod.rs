pub mod client;
pub mod oauth1;
pub mod oauth2;

use crate::error::AppResult;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use client::XClient;

/// Абстрактный интерфейс к X API.
///
/// Ответы возвращаются как произвольный JSON: формат ответов загрузки медиа
/// отличается между версиями API.
#[async_trait]
pub trait XApi: Send + Sync {
    /// Простая загрузка медиа одним запросом
    async fn upload_media(&self, body: Value) -> AppResult<Value>;

    /// Chunked загрузка: INIT
    async fn initialize_upload(&self, body: Value) -> AppResult<Value>;

    /// Chunked загрузка: APPEND
    async fn append_upload(&self, media_id: &str, body: Value) -> AppResult<Value>;

    /// Chunked загрузка: FINALIZE
    async fn finalize_upload(&self, media_id: &str) -> AppResult<Value>;

    /// Публикует пост
    async fn create_post(&self, body: Value) -> AppResult<Value>;

    /// Загрузка через v1.1 multipart endpoint, подписанная OAuth1
    async fn upload_media_legacy(&self, data: &[u8], content_type: &str) -> AppResult<Value>;

    /// Текущее состояние OAuth2 токена, если клиент умеет его обновлять
    fn oauth2_token(&self) -> Option<Map<String, Value>>;
}
