use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Relative path of a chunk file below the storage root.
///
/// `audio/<point_id>/<register_id>/<YYYY-MM-DD>/<HH>/chunk_<YYYYmmdd_HHMMSS>_<chunk_id>.ogg`
///
/// The layout is part of the external interface; existing archives were laid
/// out this way and the path must stay byte-for-byte compatible.
pub fn chunk_relative_path(
    point_id: Uuid,
    register_id: Uuid,
    start_ts: DateTime<Utc>,
    chunk_id: Uuid,
) -> String {
    format!(
        "audio/{}/{}/{}/{}/chunk_{}_{}.ogg",
        point_id,
        register_id,
        start_ts.format("%Y-%m-%d"),
        start_ts.format("%H"),
        start_ts.format("%Y%m%d_%H%M%S"),
        chunk_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn chunk_path_layout_is_exact() {
        let point = Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap();
        let register = Uuid::parse_str("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee").unwrap();
        let chunk = Uuid::parse_str("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 7, 9, 14, 3, 27).unwrap();

        assert_eq!(
            chunk_relative_path(point, register, start, chunk),
            "audio/11111111-2222-3333-4444-555555555555/aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee/2026-07-09/14/chunk_20260709_140327_01234567-89ab-cdef-0123-456789abcdef.ogg"
        );
    }

    #[test]
    fn chunk_path_pads_hour_directory() {
        let start = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let path = chunk_relative_path(Uuid::nil(), Uuid::nil(), start, Uuid::nil());
        assert!(path.contains("/2026-01-02/03/chunk_20260102_030405_"));
    }
}
