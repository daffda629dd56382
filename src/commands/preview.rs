use super::run_blocking;
use crate::bridge::{CameraHandle, PreviewHandle};
use crate::catalog::MediaTypeCatalog;
use crate::errors::{CaptureError, Stage};
use crate::selector::Selection;
use crate::session::{FrameSink, PreviewEvent, PreviewStatus};
use crate::types::{Frame, FrameEvent, PreviewSettings, SelectionConstraints};
use serde::Serialize;
use std::sync::Arc;
use tauri::{command, AppHandle, Emitter, Runtime};

pub const FRAME_EVENT: &str = "camera-bridge://frame";
pub const PREVIEW_EVENT: &str = "camera-bridge://preview-event";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceFrameEvent {
    device_id: String,
    #[serde(flatten)]
    frame: FrameEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DevicePreviewEvent {
    device_id: String,
    event: PreviewEvent,
}

/// Forwards frames and lifecycle events to the webview as Tauri events.
struct EmitterSink<R: Runtime> {
    app: AppHandle<R>,
    device_id: String,
}

impl<R: Runtime> FrameSink for EmitterSink<R> {
    fn on_frame(&self, frame: &Frame<'_>) {
        let payload = DeviceFrameEvent {
            device_id: self.device_id.clone(),
            frame: frame.to_event(),
        };
        if let Err(e) = self.app.emit(FRAME_EVENT, payload) {
            log::debug!("Failed to emit frame for {}: {}", self.device_id, e);
        }
    }

    fn on_event(&self, event: &PreviewEvent) {
        let payload = DevicePreviewEvent {
            device_id: self.device_id.clone(),
            event: event.clone(),
        };
        if let Err(e) = self.app.emit(PREVIEW_EVENT, payload) {
            log::warn!("Failed to emit preview event for {}: {}", self.device_id, e);
        }
    }
}

/// Preview media types the camera advertises, in device order
#[command]
pub async fn list_media_types(device_id: String) -> Result<MediaTypeCatalog, CaptureError> {
    run_blocking(Stage::Enumerate, move |bridge| {
        bridge.catalog(&CameraHandle::new(device_id))
    })
    .await
}

/// Pick a media type without configuring the device
#[command]
pub async fn negotiate_media_type(
    device_id: String,
    constraints: SelectionConstraints,
) -> Result<Selection, CaptureError> {
    run_blocking(Stage::Select, move |bridge| {
        bridge.negotiate(&CameraHandle::new(device_id), &constraints)
    })
    .await
}

/// Start preview, streaming frames to the webview
#[command]
pub async fn start_preview<R: Runtime>(
    app: AppHandle<R>,
    device_id: String,
    settings: Option<PreviewSettings>,
) -> Result<PreviewHandle, CaptureError> {
    let sink: Arc<dyn FrameSink> = Arc::new(EmitterSink {
        app,
        device_id: device_id.clone(),
    });
    start_preview_with(device_id, settings, Some(sink)).await
}

/// Start preview with an arbitrary sink; `None` keeps the registered one.
///
/// Missing settings fall back to the configured default preset.
pub async fn start_preview_with(
    device_id: String,
    settings: Option<PreviewSettings>,
    sink: Option<Arc<dyn FrameSink>>,
) -> Result<PreviewHandle, CaptureError> {
    run_blocking(Stage::Start, move |bridge| {
        let camera = bridge.open(&device_id)?;
        if let Some(sink) = sink {
            bridge.set_frame_sink(&camera, sink)?;
        }
        let settings = settings.unwrap_or_else(|| {
            PreviewSettings::new(bridge.config().selection.default_preset)
        });
        let preview = bridge.start_preview(&camera, &settings)?;
        log::info!(
            "Preview started on {}: {} ({}x{})",
            device_id,
            preview.media_type,
            preview.frame_width,
            preview.frame_height
        );
        Ok(preview)
    })
    .await
}

/// Stop a preview; stale handles are ignored
#[command]
pub async fn stop_preview(preview: PreviewHandle) -> Result<(), CaptureError> {
    run_blocking(Stage::Stop, move |bridge| bridge.stop_preview(&preview)).await
}

/// Status of the camera's current or last preview
#[command]
pub async fn get_preview_status(device_id: String) -> Result<Option<PreviewStatus>, CaptureError> {
    run_blocking(Stage::Stream, move |bridge| {
        bridge.status(&CameraHandle::new(device_id))
    })
    .await
}
