use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeviceCreateRequest {
    pub point_id: Uuid,
    pub register_id: Uuid,
    pub device_id: Uuid,
    pub token_plain: String,
    #[serde(default)]
    pub is_enabled: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DeviceUpdateRequest {
    #[serde(default)]
    pub is_enabled: Option<bool>,
}
