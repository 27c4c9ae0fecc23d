use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use http::{header, HeaderMap, StatusCode};
use tracing::error;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::AudioChunk;
use crate::result::Result;
use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(
        "/api/v1/internal/chunks/{chunk_id}/file",
        get(get_chunk_file),
    )
}

/// Serve raw chunk bytes to the ASR worker, with enough metadata to decode
/// them without another round trip. A simple single-range `Range` header is
/// honored for resumable fetches.
async fn get_chunk_file(
    State(state): State<AppState>,
    Path(chunk_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response> {
    let chunk = AudioChunk::db_find_by_id(&state.pool, chunk_id)
        .await?
        .ok_or_else(|| AppError::resource_not_found("chunk not found"))?;

    let bytes = storage::read_chunk(&state.config.storage.audio_dir, &chunk.file_path)
        .await
        .map_err(|e| {
            error!(%chunk_id, path = %chunk.file_path, "chunk file unreadable: {}", e);
            AppError::InternalServerError(e.into())
        })?;
    let total = bytes.len() as u64;

    let range = headers
        .get(header::RANGE)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    let builder = |status: StatusCode| {
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "audio/ogg")
            .header(header::ACCEPT_RANGES, "bytes")
            .header("x-sample-rate", chunk.sample_rate.to_string())
            .header("x-channels", chunk.channels.to_string())
            .header("x-duration-sec", chunk.duration_sec.to_string())
            .header("x-start-ts", chunk.start_ts.to_rfc3339())
    };

    let response = match range {
        None => builder(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total)
            .body(Body::from(bytes)),
        Some(raw) => {
            let (start, end) =
                parse_byte_range(&raw, total).ok_or(AppError::RangeNotSatisfiable)?;
            let slice = bytes[start..=end].to_vec();
            builder(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, slice.len())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{total}"),
                )
                .body(Body::from(slice))
        }
    };
    response.map_err(|e| AppError::InternalServerError(e.into()))
}

/// Parse `bytes=a-b` / `bytes=a-` / `bytes=-n` against a body of `total`
/// bytes. Multi-range requests are not supported.
fn parse_byte_range(raw: &str, total: u64) -> Option<(usize, usize)> {
    let spec = raw.strip_prefix("bytes=")?;
    if spec.contains(',') || total == 0 {
        return None;
    }
    let (a, b) = spec.split_once('-')?;
    let (start, end) = if a.is_empty() {
        let suffix: u64 = b.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        (total.saturating_sub(suffix), total - 1)
    } else {
        let start: u64 = a.parse().ok()?;
        let end = if b.is_empty() {
            total - 1
        } else {
            b.parse::<u64>().ok()?.min(total - 1)
        };
        (start, end)
    };
    if start > end || start >= total {
        return None;
    }
    Some((start as usize, end as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_and_open_ranges() {
        assert_eq!(parse_byte_range("bytes=0-99", 100), Some((0, 99)));
        assert_eq!(parse_byte_range("bytes=10-19", 100), Some((10, 19)));
        assert_eq!(parse_byte_range("bytes=90-", 100), Some((90, 99)));
        assert_eq!(parse_byte_range("bytes=0-1000", 100), Some((0, 99)));
    }

    #[test]
    fn suffix_range() {
        assert_eq!(parse_byte_range("bytes=-10", 100), Some((90, 99)));
        assert_eq!(parse_byte_range("bytes=-1000", 100), Some((0, 99)));
        assert_eq!(parse_byte_range("bytes=-0", 100), None);
    }

    #[test]
    fn invalid_ranges() {
        assert_eq!(parse_byte_range("bytes=100-", 100), None);
        assert_eq!(parse_byte_range("bytes=20-10", 100), None);
        assert_eq!(parse_byte_range("bytes=0-10,20-30", 100), None);
        assert_eq!(parse_byte_range("items=0-10", 100), None);
        assert_eq!(parse_byte_range("bytes=0-10", 0), None);
    }
}
