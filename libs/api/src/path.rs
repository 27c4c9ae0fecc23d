use uuid::Uuid;

pub const CHUNKS: &str = "/api/v1/chunks";
pub const ADMIN_DEVICES: &str = "/api/v1/admin/devices";
pub const HEALTH: &str = "/health";

pub fn admin_device(device_id: Uuid) -> String {
    format!("/api/v1/admin/devices/{}", device_id)
}

pub fn internal_chunk_file(chunk_id: Uuid) -> String {
    format!("/api/v1/internal/chunks/{}/file", chunk_id)
}
