//! Bearer-authenticated device management (list and remove).

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use tracing::{error, info};

use crate::device::models::DeviceMode;
use crate::device::repo::DeviceRepo;

use super::session::authenticate_bearer;
use super::types::DeviceSummary;

/// List the caller's registered devices, oldest first.
#[utoipa::path(
    get,
    path = "/v1/devices",
    responses(
        (status = 200, description = "Registered devices", body = [DeviceSummary]),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "devices"
)]
pub async fn list_devices(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    let session = match authenticate_bearer(&headers, &pool).await {
        Ok(Some(session)) => session,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(status) => return status.into_response(),
    };

    match DeviceRepo::list_for_user(&pool, session.user_id).await {
        Ok(devices) => {
            let summaries: Vec<DeviceSummary> = devices
                .iter()
                .map(|device| DeviceSummary {
                    registration_id: device.registration_id.to_string(),
                    device_id: device.device_id.clone(),
                    name: device.name.clone(),
                    platform: device.platform.as_str().to_string(),
                    modes: device
                        .modes()
                        .into_iter()
                        .map(|mode: DeviceMode| mode.as_str().to_string())
                        .collect(),
                    is_trusted: device.is_trusted,
                    requires_password: device.requires_password,
                    created_at: device.created_at.to_rfc3339(),
                })
                .collect();
            (StatusCode::OK, Json(summaries)).into_response()
        }
        Err(err) => {
            error!("Failed to list devices: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Remove one of the caller's devices. Terminal: the registration id is gone
/// and the device must re-register from scratch.
#[utoipa::path(
    delete,
    path = "/v1/devices/{device_id}",
    params(("device_id" = String, Path, description = "Client-chosen device identifier")),
    responses(
        (status = 204, description = "Device removed"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "No such device")
    ),
    tag = "devices"
)]
pub async fn delete_device(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let session = match authenticate_bearer(&headers, &pool).await {
        Ok(Some(session)) => session,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(status) => return status.into_response(),
    };

    match DeviceRepo::remove(&pool, session.user_id, &device_id).await {
        Ok(true) => {
            info!(user_id = %session.user_id, device_id = %device_id, "device removed");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to delete device: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
