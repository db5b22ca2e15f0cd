//! Загрузка медиа через цепочку стратегий

use super::context::RequestContext;
use super::{AuthMode, Poster};
use crate::error::{AppError, AppResult};
use crate::models::MediaRef;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub const MAX_MEDIA_COUNT: usize = 4;
pub const MAX_MEDIA_BYTES: usize = 8 * 1024 * 1024;

const ID_KEYS: [&str; 3] = ["media_id_string", "media_id", "id"];
const KEY_KEYS: [&str; 1] = ["media_key"];

/// Неудачная попытка одной стратегии
#[derive(Debug)]
struct UploadAttempt {
    strategy: &'static str,
    error: String,
}

impl Poster {
    /// Загружает медиа, перебирая стратегии до первого успеха.
    ///
    /// Порядок: простая загрузка (поле `media`, затем `media_data`),
    /// chunked загрузка, v1.1 multipart (только OAuth1). Если все упали,
    /// ошибка содержит причины всех попыток через ` | `.
    pub async fn upload_media(
        &self,
        ctx: &RequestContext,
        data: &[u8],
        content_type: &str,
    ) -> AppResult<MediaRef> {
        let encoded = STANDARD.encode(data);
        let category = media_category(content_type);
        let mut attempts: Vec<UploadAttempt> = Vec::new();

        for (strategy, field) in [("simple_media", "media"), ("simple_media_data", "media_data")] {
            let mut body = Map::new();
            body.insert(field.to_string(), Value::String(encoded.clone()));
            body.insert("media_type".into(), Value::String(content_type.to_string()));
            body.insert("media_category".into(), Value::String(category.to_string()));

            match ctx.run(self.client.upload_media(Value::Object(body))).await {
                Ok(resp) => {
                    let media_ref = extract_media_ref(&resp);
                    if !media_ref.is_empty() {
                        info!("Media uploaded via {}", strategy);
                        return Ok(media_ref);
                    }
                    attempts.push(UploadAttempt {
                        strategy,
                        error: "upload returned no media identifier".to_string(),
                    });
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => attempts.push(UploadAttempt {
                    strategy,
                    error: e.to_string(),
                }),
            }
            debug!("Upload strategy {} failed", strategy);
        }

        match self
            .upload_media_chunked(ctx, &encoded, data.len(), content_type)
            .await
        {
            Ok(media_ref) => {
                info!("Media uploaded via chunked upload");
                return Ok(media_ref);
            }
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => attempts.push(UploadAttempt {
                strategy: "chunked",
                error: e.to_string(),
            }),
        }

        if self.auth_mode == AuthMode::OAuth1 {
            match self.upload_media_legacy(ctx, data, content_type).await {
                Ok(media_ref) => {
                    info!("Media uploaded via v1.1 fallback");
                    return Ok(media_ref);
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => attempts.push(UploadAttempt {
                    strategy: "v1_multipart",
                    error: e.to_string(),
                }),
            }
        }

        let message = attempts
            .iter()
            .map(|a| format!("{}: {}", a.strategy, a.error))
            .collect::<Vec<_>>()
            .join(" | ");
        warn!("All media upload strategies failed: {}", message);
        Err(AppError::MediaUpload(message))
    }

    /// INIT, APPEND (сегмент 0), FINALIZE; ошибка любой фазы прерывает попытку
    async fn upload_media_chunked(
        &self,
        ctx: &RequestContext,
        encoded: &str,
        size: usize,
        content_type: &str,
    ) -> AppResult<MediaRef> {
        let init_body = serde_json::json!({
            "total_bytes": size,
            "media_type": content_type,
            "media_category": media_category(content_type),
        });
        let init_resp = ctx.run(self.client.initialize_upload(init_body)).await?;
        let init_ref = extract_media_ref(&init_resp);
        let media_id = init_ref
            .id
            .clone()
            .ok_or_else(|| AppError::ApiError("initialize_upload did not return media id".into()))?;
        debug!("Chunked upload initialized: {}", media_id);

        let mut append_result = Ok(Value::Null);
        for field in ["media", "media_data"] {
            let mut body = Map::new();
            body.insert("segment_index".into(), Value::from(0));
            body.insert(field.to_string(), Value::String(encoded.to_string()));

            append_result = ctx
                .run(self.client.append_upload(&media_id, Value::Object(body)))
                .await;
            match &append_result {
                Ok(_) => break,
                Err(e) if e.is_cancellation() => break,
                Err(e) => debug!("append_upload with field {} failed: {}", field, e),
            }
        }
        append_result?;

        let final_resp = ctx.run(self.client.finalize_upload(&media_id)).await?;
        let mut final_ref = extract_media_ref(&final_resp);
        if final_ref.id.is_none() {
            final_ref.id = Some(media_id);
        }
        if final_ref.media_key.is_none() {
            final_ref.media_key = init_ref.media_key;
        }
        Ok(final_ref)
    }

    async fn upload_media_legacy(
        &self,
        ctx: &RequestContext,
        data: &[u8],
        content_type: &str,
    ) -> AppResult<MediaRef> {
        let resp = ctx
            .run(self.client.upload_media_legacy(data, content_type))
            .await?;
        let media_ref = extract_media_ref(&resp);
        if media_ref.id.is_none() {
            return Err(AppError::ApiError(format!(
                "v1 media upload returned no media id: {}",
                resp
            )));
        }
        Ok(media_ref)
    }
}

/// Категория медиа для X API по MIME типу
pub fn media_category(content_type: &str) -> &'static str {
    let ct = content_type.trim().to_ascii_lowercase();
    if ct.starts_with("video/") || ct.starts_with("audio/") {
        "tweet_video"
    } else {
        "tweet_image"
    }
}

/// Ищет id и media_key в ответе произвольной вложенности
pub fn extract_media_ref(payload: &Value) -> MediaRef {
    MediaRef {
        id: find_first_by_priority(payload, &ID_KEYS),
        media_key: find_first_by_priority(payload, &KEY_KEYS),
    }
}

/// Сначала текущий уровень в порядке приоритета ключей, потом вложенные
fn find_first_by_priority(payload: &Value, keys: &[&str]) -> Option<String> {
    match payload {
        Value::Object(map) => {
            for key in keys {
                let found = map
                    .iter()
                    .filter(|(k, _)| k.eq_ignore_ascii_case(key))
                    .find_map(|(_, raw)| stringify(raw));
                if found.is_some() {
                    return found;
                }
            }
            map.values()
                .find_map(|raw| find_first_by_priority(raw, keys))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|raw| find_first_by_priority(raw, keys)),
        _ => None,
    }
}

fn stringify(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                let f = n.as_f64()?;
                if f.is_finite() && f.fract() == 0.0 {
                    format!("{:.0}", f)
                } else {
                    f.to_string()
                }
            }
        }
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Определяет MIME тип по сигнатуре файла
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    const SIGNATURES: [(&[u8], &str); 7] = [
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"\x1a\x45\xdf\xa3", "video/webm"),
        (b"ID3", "audio/mpeg"),
        (b"OggS", "application/ogg"),
    ];

    if let Some((_, mime)) = SIGNATURES.iter().find(|(sig, _)| data.starts_with(sig)) {
        return *mime;
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return "image/webp";
    }
    if data.len() >= 8 && &data[4..8] == b"ftyp" {
        return "video/mp4";
    }
    "application/octet-stream"
}
