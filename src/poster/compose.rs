use super::context::RequestContext;
use super::Poster;
use crate::config::unique_non_empty;
use crate::error::{AppError, AppResult};
use crate::models::MediaRef;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

impl Poster {
    /// Публикует пост с текстом и ссылками на медиа.
    ///
    /// Сначала отправляются `media.media_ids`. Если X отклонил запрос и есть
    /// media keys, запрос повторяется один раз с `media.media_keys`.
    pub async fn create_tweet(
        &self,
        ctx: &RequestContext,
        text: &str,
        media: &[MediaRef],
    ) -> AppResult<Value> {
        let mut body = Map::new();
        let text = text.trim();
        if !text.is_empty() {
            body.insert("text".into(), Value::String(text.to_string()));
        }

        let media_ids = unique_non_empty(media.iter().filter_map(|m| m.id.as_deref()));
        let mut media_keys = unique_non_empty(media.iter().filter_map(|m| m.media_key.as_deref()));
        media_keys.retain(|key| !media_ids.contains(key));

        if !media_ids.is_empty() {
            body.insert("media".into(), json!({ "media_ids": media_ids }));
        }

        let first = ctx
            .run(self.client.create_post(Value::Object(body.clone())))
            .await;
        let first_err = match first {
            Ok(resp) => return Ok(resp),
            Err(e) if e.is_cancellation() || media_keys.is_empty() => return Err(e),
            Err(e) => e,
        };

        warn!("Create tweet with media_ids failed, retrying with media_keys: {}", first_err);
        body.insert("media".into(), json!({ "media_keys": media_keys }));
        match ctx.run(self.client.create_post(Value::Object(body))).await {
            Ok(resp) => {
                debug!("Create tweet succeeded with media_keys");
                Ok(resp)
            }
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => Err(AppError::PostSubmission(format!(
                "{}; retry with media_keys: {}",
                first_err, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{api_err, poster, FakeApi, Reply};
    use super::super::AuthMode;
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(5))
    }

    fn media(id: Option<&str>, key: Option<&str>) -> MediaRef {
        MediaRef {
            id: id.map(str::to_string),
            media_key: key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn text_only_post_has_no_media_key() {
        let api = Arc::new(FakeApi::default());
        FakeApi::script(&api.create_post, vec![Reply::Ok(json!({"data": {"id": "1"}}))]);
        let poster = poster(api.clone(), AuthMode::OAuth1);

        poster.create_tweet(&ctx(), "  hello ", &[]).await.unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, json!({"text": "hello"}));
    }

    #[tokio::test]
    async fn media_ids_are_deduplicated() {
        let api = Arc::new(FakeApi::default());
        FakeApi::script(&api.create_post, vec![Reply::Ok(json!({}))]);
        let poster = poster(api.clone(), AuthMode::OAuth1);
        let refs = [media(Some("1"), None), media(Some("1"), None), media(Some("2"), None)];

        poster.create_tweet(&ctx(), "", &refs).await.unwrap();

        assert_eq!(api.calls()[0].1, json!({"media": {"media_ids": ["1", "2"]}}));
    }

    #[tokio::test]
    async fn rejected_ids_are_retried_as_keys() {
        let api = Arc::new(FakeApi::default());
        FakeApi::script(
            &api.create_post,
            vec![api_err("invalid media ids"), Reply::Ok(json!({"data": {"id": "5"}}))],
        );
        let poster = poster(api.clone(), AuthMode::OAuth2UserToken);
        let refs = [media(Some("1"), Some("3_1"))];

        let resp = poster.create_tweet(&ctx(), "hi", &refs).await.unwrap();

        assert_eq!(resp["data"]["id"], "5");
        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, json!({"text": "hi", "media": {"media_keys": ["3_1"]}}));
    }

    #[tokio::test]
    async fn failure_without_keys_is_returned_unchanged() {
        let api = Arc::new(FakeApi::default());
        FakeApi::script(&api.create_post, vec![api_err("duplicate content")]);
        let poster = poster(api.clone(), AuthMode::OAuth1);

        let err = poster
            .create_tweet(&ctx(), "hi", &[media(Some("1"), None)])
            .await
            .unwrap_err();

        match err {
            AppError::Api { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "duplicate content");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn both_attempts_failing_reports_both() {
        let api = Arc::new(FakeApi::default());
        FakeApi::script(&api.create_post, vec![api_err("ids"), api_err("keys")]);
        let poster = poster(api, AuthMode::OAuth1);

        let err = poster
            .create_tweet(&ctx(), "", &[media(None, Some("3_1"))])
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(matches!(err, AppError::PostSubmission(_)));
        assert!(message.contains("body=ids") && message.contains("body=keys"));
    }

    #[tokio::test]
    async fn deadline_during_first_attempt_skips_key_retry() {
        let api = Arc::new(FakeApi::default());
        FakeApi::script(&api.create_post, vec![Reply::Hang, Reply::Ok(json!({}))]);
        let poster = poster(api.clone(), AuthMode::OAuth2UserToken);
        let ctx = RequestContext::with_timeout(Duration::from_millis(50));

        let err = poster
            .create_tweet(&ctx, "hi", &[media(Some("1"), Some("3_1"))])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DeadlineExceeded));
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_during_first_attempt_skips_key_retry() {
        let api = Arc::new(FakeApi::default());
        FakeApi::script(&api.create_post, vec![Reply::Hang, Reply::Ok(json!({}))]);
        let poster = poster(api.clone(), AuthMode::OAuth2UserToken);
        let ctx = ctx();
        let token = ctx.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let err = poster
            .create_tweet(&ctx, "hi", &[media(Some("1"), Some("3_1"))])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn deadline_during_key_retry_is_not_wrapped() {
        let api = Arc::new(FakeApi::default());
        FakeApi::script(&api.create_post, vec![api_err("invalid media ids"), Reply::Hang]);
        let poster = poster(api.clone(), AuthMode::OAuth2UserToken);
        let ctx = RequestContext::with_timeout(Duration::from_millis(50));

        let err = poster
            .create_tweet(&ctx, "hi", &[media(Some("1"), Some("3_1"))])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DeadlineExceeded));
        assert_eq!(api.calls().len(), 2);
    }
}
