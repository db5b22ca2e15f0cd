use super::{error_response, App};
use crate::error::{AppError, AppResult};
use crate::models::{CreateTweetJsonRequest, MediaInput, TweetRequest};
use crate::poster::context::{RequestContext, REQUEST_TIMEOUT};
use crate::poster::media::{sniff_content_type, MAX_MEDIA_BYTES, MAX_MEDIA_COUNT};
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, error, info};

/// POST /v1/tweets
pub async fn create_tweet(State(app): State<Arc<App>>, request: Request) -> Response {
    let poster = match app.poster().await {
        Ok(poster) => poster,
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    };

    let tweet = match parse_tweet_request(request).await {
        Ok(tweet) => tweet,
        Err(e) => {
            debug!("Rejected tweet request: {}", e);
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let ctx = RequestContext::with_timeout(REQUEST_TIMEOUT);
    // Клиент отключился: future хендлера дропается и отменяет вызовы
    let _cancel_on_drop = ctx.cancellation_token().drop_guard();

    let outcome = match poster.publish(&ctx, &tweet.text, &tweet.media).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Create tweet failed: {}", e);
            return error_response(StatusCode::BAD_GATEWAY, e.to_string());
        }
    };
    info!(
        "Tweet created via {} with {} media",
        outcome.auth_mode, outcome.media_count
    );

    tokio::spawn(async move {
        app.persist_oauth2_token(&poster).await;
    });

    (StatusCode::OK, Json(outcome)).into_response()
}

async fn parse_tweet_request(request: Request) -> AppResult<TweetRequest> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        });

    if is_multipart {
        parse_multipart(request).await
    } else {
        parse_json(request).await
    }
}

async fn parse_multipart(request: Request) -> AppResult<TweetRequest> {
    let invalid = |msg: String| AppError::InvalidRequest(format!("invalid multipart request: {}", msg));

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| invalid(e.body_text()))?;

    let mut text = String::new();
    let mut media = Vec::new();
    while let Some(mut field) = multipart.next_field().await.map_err(|e| invalid(e.body_text()))? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => {
                text = field.text().await.map_err(|e| invalid(e.body_text()))?;
            }
            "media" => {
                if media.len() >= MAX_MEDIA_COUNT {
                    return Err(AppError::InvalidRequest(format!(
                        "too many media files, max is {}",
                        MAX_MEDIA_COUNT
                    )));
                }
                let file_name = field.file_name().unwrap_or("media").to_string();
                let declared = field
                    .content_type()
                    .map(|ct| ct.trim().to_string())
                    .filter(|ct| !ct.is_empty());

                let mut data = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(|e| invalid(e.body_text()))? {
                    if data.len() + chunk.len() > MAX_MEDIA_BYTES {
                        return Err(AppError::InvalidRequest(format!(
                            "file {:?} exceeds max size {} bytes",
                            file_name, MAX_MEDIA_BYTES
                        )));
                    }
                    data.extend_from_slice(&chunk);
                }

                let content_type =
                    declared.unwrap_or_else(|| sniff_content_type(&data).to_string());
                media.push(MediaInput { data, content_type });
            }
            _ => {}
        }
    }

    let text = text.trim().to_string();
    if text.is_empty() && media.is_empty() {
        return Err(AppError::InvalidRequest("text or media is required".to_string()));
    }
    Ok(TweetRequest { text, media })
}

async fn parse_json(request: Request) -> AppResult<TweetRequest> {
    let body = Bytes::from_request(request, &())
        .await
        .map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let req: CreateTweetJsonRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidRequest(format!("invalid json request: {}", e)))?;
    json_tweet_request(req)
}

/// Проверяет JSON запрос и декодирует base64 вложения
pub fn json_tweet_request(req: CreateTweetJsonRequest) -> AppResult<TweetRequest> {
    let text = req.text.trim().to_string();
    if text.is_empty() && req.media_base64.is_empty() {
        return Err(AppError::InvalidRequest(
            "text or media_base64 is required".to_string(),
        ));
    }
    if req.media_base64.len() > MAX_MEDIA_COUNT {
        return Err(AppError::InvalidRequest(format!(
            "too many media items, max is {}",
            MAX_MEDIA_COUNT
        )));
    }
    if !req.media_content_types.is_empty()
        && req.media_content_types.len() != req.media_base64.len()
    {
        return Err(AppError::InvalidRequest(
            "media_content_types length must match media_base64 length".to_string(),
        ));
    }

    let mut media = Vec::with_capacity(req.media_base64.len());
    for (i, item) in req.media_base64.iter().enumerate() {
        let raw = item.trim();
        if raw.is_empty() {
            return Err(AppError::InvalidRequest(format!("media_base64[{}] is empty", i)));
        }
        let data = STANDARD.decode(raw).map_err(|e| {
            AppError::InvalidRequest(format!("media_base64[{}] decode failed: {}", i, e))
        })?;
        if data.len() > MAX_MEDIA_BYTES {
            return Err(AppError::InvalidRequest(format!(
                "media_base64[{}] exceeds max size {} bytes",
                i, MAX_MEDIA_BYTES
            )));
        }

        let content_type = req
            .media_content_types
            .get(i)
            .map(|ct| ct.trim())
            .filter(|ct| !ct.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| sniff_content_type(&data).to_string());
        media.push(MediaInput { data, content_type });
    }

    Ok(TweetRequest { text, media })
}
