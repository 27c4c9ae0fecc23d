use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A chunk this worker has moved to PROCESSING and owns until its commit,
/// error, or the stuck timeout.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedChunk {
    pub chunk_id: Uuid,
    pub device_id: Uuid,
    pub point_id: Uuid,
    pub register_id: Uuid,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub duration_sec: i32,
    pub sample_rate: i32,
    pub channels: i32,
    pub file_path: String,
}

/// The device_dialogue_state row, read under FOR UPDATE inside the commit
/// transaction.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct DialogueCursor {
    pub open_dialogue_id: Uuid,
    pub dialogue_started_at: DateTime<Utc>,
    pub last_speech_end_ts: DateTime<Utc>,
}
