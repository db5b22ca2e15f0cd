use crate::error::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Общий дедлайн на весь запрос (все вложения и сам пост)
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Контекст исходящих вызовов одного запроса: дедлайн и отмена
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Instant,
}

impl RequestContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        RequestContext {
            cancel: CancellationToken::new(),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ошибка, если запрос уже отменён или дедлайн прошёл
    pub fn check(&self) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(AppError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Выполняет вызов, прерывая его при отмене или по дедлайну
    pub async fn run<T, F>(&self, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(AppError::DeadlineExceeded),
            result = call => result,
        }
    }
}
