use serde::{Deserialize, Serialize};

/// Ссылка на загруженное медиа: id и/или media_key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_key: Option<String>,
}

impl MediaRef {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.media_key.is_none()
    }
}

/// Медиа файл, готовый к загрузке
#[derive(Debug, Clone)]
pub struct MediaInput {
    pub data: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTweetJsonRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media_base64: Vec<String>,
    #[serde(default)]
    pub media_content_types: Vec<String>,
}

/// Разобранный запрос на публикацию
#[derive(Debug, Clone, Default)]
pub struct TweetRequest {
    pub text: String,
    pub media: Vec<MediaInput>,
}

/// Результат публикации, одинаковый для HTTP и CLI
#[derive(Debug, Clone, Serialize)]
pub struct TweetOutcome {
    pub ok: bool,
    pub auth_mode: &'static str,
    pub media: Vec<MediaRef>,
    pub media_count: usize,
    pub tweet: serde_json::Value,
}
