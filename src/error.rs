use std::path::PathBuf;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("config I/O failed for {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse failed for {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("incomplete OAuth1 config, missing: {}", .0.join(", "))]
    IncompleteCredentials(Vec<String>),

    #[error("missing x auth configuration (set OAuth1 fields or oauth2_access_token)")]
    MissingCredentials,

    #[error("media upload failed: {0}")]
    MediaUpload(String),

    #[error("create tweet failed: {0}")]
    PostSubmission(String),

    #[error("oauth2 token extraction failed: {0}")]
    TokenExtraction(String),

    /// Ответ X API со статусом вне 2xx, тело передаётся как есть
    #[error("x api error: status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Timeout waiting for server response")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    InvalidRequest(String),
}

impl AppError {
    /// Ошибки, после которых цепочка стратегий должна остановиться
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled | AppError::DeadlineExceeded)
    }

    /// Клиент X ещё не готов: учётные данные не заданы или заданы не полностью
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            AppError::IncompleteCredentials(_) | AppError::MissingCredentials
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_credentials_lists_fields_in_order() {
        let err = AppError::IncompleteCredentials(vec![
            "api_secret".to_string(),
            "access_token_secret".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "incomplete OAuth1 config, missing: api_secret, access_token_secret"
        );
        assert!(err.is_not_ready());
    }

    #[test]
    fn cancellation_kinds() {
        assert!(AppError::Cancelled.is_cancellation());
        assert!(AppError::DeadlineExceeded.is_cancellation());
        assert!(!AppError::Timeout.is_cancellation());
        assert!(!AppError::MediaUpload("x".into()).is_cancellation());
    }
}
