use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use http::HeaderMap;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use api::response::ChunkUploadResponse;

use crate::error::AppError;
use crate::model::{AudioChunk, Device, STATUS_QUEUED};
use crate::result::Result;
use crate::route::AppState;

/// Sanity bound on a single chunk; recorders emit ~60 s files.
const MAX_CHUNK_SPAN_SEC: i64 = 600;
const ALLOWED_SAMPLE_RATES: [i32; 5] = [8000, 16000, 24000, 32000, 48000];

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::CHUNKS, post(upload_chunk))
}

async fn upload_chunk(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>> {
    let token = auth::bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    let device = Device::db_find_by_token_hash(&state.pool, &auth::hash_token(&token))
        .await?
        .ok_or_else(|| {
            warn!("chunk upload with unknown device token");
            AppError::Unauthorized
        })?;
    if !device.is_enabled {
        warn!(device_id = %device.device_id, "chunk upload from disabled device");
        return Err(AppError::Forbidden("device is disabled".to_string()));
    }

    let form = read_upload_form(multipart).await?;
    validate_upload(&form, &device, state.config.storage.max_upload_size_bytes)?;

    let file_sha256 = format!("{:x}", Sha256::digest(&form.payload));
    if let Some(existing) =
        AudioChunk::db_find_duplicate(&state.pool, device.device_id, form.start_ts, &file_sha256)
            .await?
    {
        info!(
            chunk_id = %existing.chunk_id,
            device_id = %device.device_id,
            "duplicate upload collapsed onto existing chunk"
        );
        Device::db_touch_last_seen(&state.pool, device.device_id).await?;
        return Ok(Json(ChunkUploadResponse::queued(
            existing.chunk_id,
            existing.file_path,
        )));
    }

    let chunk_id = Uuid::new_v4();
    let relative_path =
        storage::chunk_relative_path(form.point_id, form.register_id, form.start_ts, chunk_id);
    // File first, row second. A crash in between leaves an orphan file for
    // the sweep; the reverse would leave a row pointing at nothing.
    let file_size = storage::save_chunk(
        &state.config.storage.audio_dir,
        &relative_path,
        &form.payload,
    )
    .await
    .map_err(|e| {
        error!(%chunk_id, path = %relative_path, "chunk file write failed: {}", e);
        AppError::InternalServerError(e.into())
    })?;

    let duration_ms = (form.end_ts - form.start_ts).num_milliseconds();
    let chunk = AudioChunk {
        chunk_id,
        device_id: device.device_id,
        point_id: form.point_id,
        register_id: form.register_id,
        start_ts: form.start_ts,
        end_ts: form.end_ts,
        duration_sec: ((duration_ms + 500) / 1000) as i32,
        codec: form.codec,
        sample_rate: form.sample_rate,
        channels: form.channels,
        file_path: relative_path.clone(),
        file_size_bytes: file_size as i64,
        file_sha256,
        status: STATUS_QUEUED.to_string(),
    };
    chunk.db_insert(&state.pool).await?;
    Device::db_touch_last_seen(&state.pool, device.device_id).await?;

    info!(
        %chunk_id,
        device_id = %device.device_id,
        duration_sec = chunk.duration_sec,
        file_size,
        "chunk queued"
    );
    Ok(Json(ChunkUploadResponse::queued(chunk_id, relative_path)))
}

#[derive(Debug)]
struct UploadForm {
    point_id: Uuid,
    register_id: Uuid,
    device_id: Uuid,
    start_ts: DateTime<Utc>,
    end_ts: DateTime<Utc>,
    codec: String,
    sample_rate: i32,
    channels: i32,
    payload: Bytes,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm> {
    let mut point_id = None;
    let mut register_id = None;
    let mut device_id = None;
    let mut start_ts = None;
    let mut end_ts = None;
    let mut codec = None;
    let mut sample_rate = None;
    let mut channels = None;
    let mut payload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "point_id" => point_id = Some(parse_uuid(&name, &text_field(field).await?)?),
            "register_id" => register_id = Some(parse_uuid(&name, &text_field(field).await?)?),
            "device_id" => device_id = Some(parse_uuid(&name, &text_field(field).await?)?),
            "start_ts" => start_ts = Some(parse_ts(&name, &text_field(field).await?)?),
            "end_ts" => end_ts = Some(parse_ts(&name, &text_field(field).await?)?),
            "codec" => codec = Some(text_field(field).await?),
            "sample_rate" => sample_rate = Some(parse_i32(&name, &text_field(field).await?)?),
            "channels" => channels = Some(parse_i32(&name, &text_field(field).await?)?),
            "chunk_file" => {
                payload = Some(field.bytes().await.map_err(|e| {
                    AppError::bad_request(format!("failed to read chunk_file: {e}"))
                })?)
            }
            _ => {}
        }
    }

    Ok(UploadForm {
        point_id: require("point_id", point_id)?,
        register_id: require("register_id", register_id)?,
        device_id: require("device_id", device_id)?,
        start_ts: require("start_ts", start_ts)?,
        end_ts: require("end_ts", end_ts)?,
        codec: require("codec", codec)?,
        sample_rate: require("sample_rate", sample_rate)?,
        channels: require("channels", channels)?,
        payload: require("chunk_file", payload)?,
    })
}

fn validate_upload(form: &UploadForm, device: &Device, max_size: usize) -> Result<()> {
    if form.device_id != device.device_id {
        return Err(AppError::bad_request(
            "device_id does not match authenticated device",
        ));
    }
    if form.point_id != device.point_id || form.register_id != device.register_id {
        return Err(AppError::bad_request(
            "point_id or register_id does not match device registration",
        ));
    }
    if form.end_ts <= form.start_ts {
        return Err(AppError::bad_request("end_ts must be after start_ts"));
    }
    if form.end_ts - form.start_ts > Duration::seconds(MAX_CHUNK_SPAN_SEC) {
        return Err(AppError::bad_request(format!(
            "chunk spans more than {MAX_CHUNK_SPAN_SEC}s"
        )));
    }
    if form.codec != "opus" {
        return Err(AppError::bad_request("codec must be \"opus\""));
    }
    if !ALLOWED_SAMPLE_RATES.contains(&form.sample_rate) {
        return Err(AppError::bad_request(
            "sample_rate must be one of 8000, 16000, 24000, 32000, 48000",
        ));
    }
    if form.channels != 1 {
        return Err(AppError::bad_request("channels must be 1"));
    }
    if form.payload.is_empty() {
        return Err(AppError::bad_request("empty chunk_file"));
    }
    if form.payload.len() > max_size {
        return Err(AppError::PayloadTooLarge(format!(
            "chunk_file exceeds maximum size of {max_size} bytes"
        )));
    }
    Ok(())
}

async fn text_field(field: Field<'_>) -> Result<String> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request(format!("failed to read field {name}: {e}")))
}

fn require<T>(name: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| AppError::bad_request(format!("missing field {name}")))
}

fn parse_uuid(name: &str, raw: &str) -> Result<Uuid> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("{name} must be a UUID")))
}

fn parse_i32(name: &str, raw: &str) -> Result<i32> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("{name} must be an integer")))
}

fn parse_ts(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            AppError::bad_request(format!(
                "{name} must be an RFC 3339 timestamp with timezone"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_device() -> Device {
        Device {
            device_id: Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap(),
            point_id: Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap(),
            register_id: Uuid::parse_str("00000000-0000-0000-0000-000000000003").unwrap(),
            token_hash: String::new(),
            is_enabled: true,
            created_at: Utc::now(),
            last_seen_at: None,
        }
    }

    fn test_form(device: &Device) -> UploadForm {
        let start = Utc.with_ymd_and_hms(2026, 7, 9, 14, 0, 0).unwrap();
        UploadForm {
            point_id: device.point_id,
            register_id: device.register_id,
            device_id: device.device_id,
            start_ts: start,
            end_ts: start + Duration::seconds(60),
            codec: "opus".to_string(),
            sample_rate: 16000,
            channels: 1,
            payload: Bytes::from_static(b"OggS"),
        }
    }

    #[test]
    fn valid_form_passes() {
        let device = test_device();
        assert!(validate_upload(&test_form(&device), &device, 1024).is_ok());
    }

    #[test]
    fn identity_mismatch_is_rejected() {
        let device = test_device();
        let mut form = test_form(&device);
        form.device_id = Uuid::new_v4();
        assert!(matches!(
            validate_upload(&form, &device, 1024),
            Err(AppError::BadRequest(_))
        ));

        let mut form = test_form(&device);
        form.point_id = Uuid::new_v4();
        assert!(validate_upload(&form, &device, 1024).is_err());
    }

    #[test]
    fn inverted_or_oversized_time_span_is_rejected() {
        let device = test_device();
        let mut form = test_form(&device);
        form.end_ts = form.start_ts;
        assert!(validate_upload(&form, &device, 1024).is_err());

        let mut form = test_form(&device);
        form.end_ts = form.start_ts + Duration::seconds(MAX_CHUNK_SPAN_SEC + 1);
        assert!(validate_upload(&form, &device, 1024).is_err());
    }

    #[test]
    fn codec_parameters_are_checked() {
        let device = test_device();
        let mut form = test_form(&device);
        form.codec = "mp3".to_string();
        assert!(validate_upload(&form, &device, 1024).is_err());

        let mut form = test_form(&device);
        form.sample_rate = 44100;
        assert!(validate_upload(&form, &device, 1024).is_err());

        let mut form = test_form(&device);
        form.channels = 2;
        assert!(validate_upload(&form, &device, 1024).is_err());
    }

    #[test]
    fn payload_bounds_are_checked() {
        let device = test_device();
        let mut form = test_form(&device);
        form.payload = Bytes::new();
        assert!(validate_upload(&form, &device, 1024).is_err());

        let form = test_form(&device);
        assert!(matches!(
            validate_upload(&form, &device, 3),
            Err(AppError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn timestamps_require_timezone() {
        assert!(parse_ts("start_ts", "2026-07-09T14:00:00Z").is_ok());
        assert!(parse_ts("start_ts", "2026-07-09T14:00:00+03:00").is_ok());
        assert!(parse_ts("start_ts", "2026-07-09T14:00:00").is_err());
        assert!(parse_ts("start_ts", "not a time").is_err());
    }
}
