use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::{Json, Router};
use http::StatusCode;
use tracing::info;
use uuid::Uuid;

use api::request::{DeviceCreateRequest, DeviceUpdateRequest};
use api::response::DeviceResponse;

use crate::error::AppError;
use crate::model::Device;
use crate::result::Result;
use crate::route::AppState;

const MIN_TOKEN_LEN: usize = 16;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::ADMIN_DEVICES, post(create_device).get(list_devices))
        .route("/api/v1/admin/devices/{device_id}", patch(update_device))
}

async fn create_device(
    State(state): State<AppState>,
    Json(req): Json<DeviceCreateRequest>,
) -> Result<(StatusCode, Json<DeviceResponse>)> {
    if req.token_plain.len() < MIN_TOKEN_LEN {
        return Err(AppError::bad_request(format!(
            "token_plain must be at least {MIN_TOKEN_LEN} characters"
        )));
    }
    if Device::db_find_by_id(&state.pool, req.device_id)
        .await?
        .is_some()
    {
        return Err(AppError::ResourceAlreadyExists(
            "device already exists".to_string(),
        ));
    }

    let device = Device {
        device_id: req.device_id,
        point_id: req.point_id,
        register_id: req.register_id,
        token_hash: auth::hash_token(&req.token_plain),
        is_enabled: req.is_enabled.unwrap_or(true),
        created_at: chrono::Utc::now(),
        last_seen_at: None,
    };
    device.db_insert(&state.pool).await?;

    // Re-read so the response carries the server-assigned created_at.
    let device = Device::db_find_by_id(&state.pool, req.device_id)
        .await?
        .ok_or_else(|| {
            AppError::InternalServerError(anyhow::anyhow!("device row missing after insert"))
        })?;

    info!(device_id = %device.device_id, point_id = %device.point_id, "device created");
    Ok((StatusCode::CREATED, Json(device.to_response())))
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<DeviceResponse>>> {
    let devices = Device::db_list(&state.pool).await?;
    Ok(Json(devices.iter().map(Device::to_response).collect()))
}

async fn update_device(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
    Json(req): Json<DeviceUpdateRequest>,
) -> Result<Json<DeviceResponse>> {
    let device = match req.is_enabled {
        Some(enabled) => Device::db_set_enabled(&state.pool, device_id, enabled).await?,
        None => Device::db_find_by_id(&state.pool, device_id).await?,
    }
    .ok_or_else(|| AppError::resource_not_found("device not found"))?;

    info!(device_id = %device.device_id, is_enabled = device.is_enabled, "device updated");
    Ok(Json(device.to_response()))
}
