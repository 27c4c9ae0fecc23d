use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChunkUploadResponse {
    pub status: String,
    pub chunk_id: Uuid,
    pub stored_path: String,
    pub queued: bool,
}

impl ChunkUploadResponse {
    pub fn queued(chunk_id: Uuid, stored_path: String) -> Self {
        Self {
            status: "ok".to_string(),
            chunk_id,
            stored_path,
            queued: true,
        }
    }
}

/// Device info as exposed to admins. The token hash never leaves the server.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeviceResponse {
    pub device_id: Uuid,
    pub point_id: Uuid,
    pub register_id: Uuid,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub db: bool,
    pub storage_writable: bool,
    pub time: DateTime<Utc>,
}
