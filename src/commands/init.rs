use super::run_blocking;
use crate::bridge::CameraHandle;
use crate::errors::{CaptureError, Stage};
use crate::types::CameraDeviceInfo;
use tauri::command;

/// List the cameras the capture engine can see
#[command]
pub async fn list_cameras() -> Result<Vec<CameraDeviceInfo>, CaptureError> {
    let cameras = run_blocking(Stage::Enumerate, |bridge| bridge.list_devices()).await?;
    log::info!("Found {} cameras", cameras.len());
    for camera in &cameras {
        log::debug!("Camera: {} - {}", camera.id, camera.name);
    }
    Ok(cameras)
}

/// Open a camera; opening an open camera is a no-op
#[command]
pub async fn open_camera(device_id: String) -> Result<CameraHandle, CaptureError> {
    run_blocking(Stage::Open, move |bridge| bridge.open(&device_id)).await
}

/// Stop any preview and release the camera
#[command]
pub async fn dispose_camera(device_id: String) -> Result<(), CaptureError> {
    run_blocking(Stage::Dispose, move |bridge| {
        bridge.dispose(&CameraHandle::new(device_id))
    })
    .await
}
