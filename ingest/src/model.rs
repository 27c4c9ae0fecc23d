use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

pub const STATUS_QUEUED: &str = "QUEUED";

#[derive(Debug, Clone, FromRow)]
pub struct Device {
    pub device_id: Uuid,
    pub point_id: Uuid,
    pub register_id: Uuid,
    pub token_hash: String,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Device {
    pub fn to_response(&self) -> api::response::DeviceResponse {
        api::response::DeviceResponse {
            device_id: self.device_id,
            point_id: self.point_id,
            register_id: self.register_id,
            is_enabled: self.is_enabled,
            created_at: self.created_at,
            last_seen_at: self.last_seen_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AudioChunk {
    pub chunk_id: Uuid,
    pub device_id: Uuid,
    pub point_id: Uuid,
    pub register_id: Uuid,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub duration_sec: i32,
    pub codec: String,
    pub sample_rate: i32,
    pub channels: i32,
    pub file_path: String,
    pub file_size_bytes: i64,
    pub file_sha256: String,
    pub status: String,
}
