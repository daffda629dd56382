//! Capture bridge
//!
//! Owns the open cameras and runs the negotiation pipeline for each preview:
//! enumerate (cached per open) -> select -> apply -> start. Every failure
//! leaves the camera ready for another `start_preview` or a `dispose`.

use crate::catalog::MediaTypeCatalog;
use crate::config::{BridgeConfig, ConfigError};
use crate::configurator::DeviceConfigurator;
use crate::errors::{CaptureError, Stage};
use crate::platform::{CaptureEngine, DeviceHandle};
use crate::selector::{CapabilityPolicy, DefaultPolicy, MediaTypeSelector, Selection};
use crate::session::{
    lock, FrameSink, Generation, GenerationCounter, PreviewSession, PreviewState, PreviewStatus,
    SinkRegistry,
};
use crate::types::{
    CameraDeviceInfo, MediaTypeDescriptor, PreviewSettings, SelectionConstraints, StreamPurpose,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// An open camera.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraHandle {
    pub device_id: String,
}

impl CameraHandle {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

/// A started preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewHandle {
    pub camera: CameraHandle,
    pub session_id: Uuid,
    pub generation: Generation,
    pub media_type: MediaTypeDescriptor,
    pub frame_width: u32,
    pub frame_height: u32,
}

#[derive(Default)]
struct Slot {
    catalog: Option<MediaTypeCatalog>,
    session: Option<Arc<PreviewSession>>,
    last_status: Option<PreviewStatus>,
}

struct Camera {
    device: Arc<DeviceHandle>,
    generations: Arc<GenerationCounter>,
    sinks: Arc<SinkRegistry>,
    /// Held across retire -> select -> apply -> start so two starts on one
    /// camera run one after the other. Taken before `slot`.
    pipeline: Mutex<()>,
    slot: Mutex<Slot>,
}

impl Camera {
    fn new(device: Arc<DeviceHandle>) -> Self {
        Self {
            device,
            generations: Arc::new(GenerationCounter::new()),
            sinks: Arc::new(SinkRegistry::new()),
            pipeline: Mutex::new(()),
            slot: Mutex::new(Slot::default()),
        }
    }
}

impl Camera {
    fn take_session(&self) -> Option<Arc<PreviewSession>> {
        lock(&self.slot).session.take()
    }

    /// Install `session`. The caller holds `pipeline` and retired the
    /// previous session, so the slot is empty.
    fn install_session(&self, session: Arc<PreviewSession>) {
        lock(&self.slot).session = Some(session);
    }

    /// Remove the session with `id` if it is still installed.
    fn remove_session(&self, id: Uuid) -> Option<Arc<PreviewSession>> {
        let mut slot = lock(&self.slot);
        if slot.session.as_ref().map(|s| s.id()) == Some(id) {
            slot.session.take()
        } else {
            None
        }
    }

    /// Dispose a session this camera no longer tracks, keeping its final status.
    fn retire(&self, session: Arc<PreviewSession>) {
        let outcome = session.dispose();
        log::debug!("Retired preview session {} ({:?})", session.id(), outcome);
        lock(&self.slot).last_status = Some(session.status());
    }
}

/// Entry point for opening cameras and running previews on them.
pub struct CaptureBridge {
    engine: Arc<dyn CaptureEngine>,
    config: RwLock<BridgeConfig>,
    policy: Option<Arc<dyn CapabilityPolicy>>,
    configurator: DeviceConfigurator,
    cameras: Mutex<HashMap<String, Arc<Camera>>>,
}

impl CaptureBridge {
    pub fn new(engine: Arc<dyn CaptureEngine>, config: BridgeConfig) -> Self {
        log::info!("Capture bridge using {} engine", engine.name());
        Self {
            engine,
            config: RwLock::new(config),
            policy: None,
            configurator: DeviceConfigurator::new(),
            cameras: Mutex::new(HashMap::new()),
        }
    }

    /// Use a custom capability policy instead of [`DefaultPolicy`].
    pub fn with_policy(mut self, policy: Arc<dyn CapabilityPolicy>) -> Self {
        log::info!("Capture bridge using capability policy {}", policy.name());
        self.policy = Some(policy);
        self
    }

    pub fn engine(&self) -> &dyn CaptureEngine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> BridgeConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the configuration; applies to previews started afterwards.
    pub fn set_config(&self, config: BridgeConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::Invalid)?;
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
        log::info!("Capture bridge configuration updated");
        Ok(())
    }

    pub fn selector(&self) -> MediaTypeSelector {
        let policy = self.policy.clone().unwrap_or_else(|| {
            Arc::new(DefaultPolicy {
                reject_unknown_formats: self.config().selection.reject_unknown_formats,
            })
        });
        MediaTypeSelector::new(policy)
    }

    pub fn list_devices(&self) -> Result<Vec<CameraDeviceInfo>, CaptureError> {
        self.engine.list_devices().map_err(|fault| {
            log::error!("Device listing failed on {}: {}", self.engine.name(), fault);
            CaptureError::DeviceUnavailable {
                stage: Stage::Enumerate,
                device_id: "*".to_string(),
                reason: "capture devices could not be listed".to_string(),
                fault: Some(fault),
            }
        })
    }

    /// Open a camera. Opening an already-open camera returns its handle.
    ///
    /// The device is opened without holding the camera table, so a slow
    /// device does not stall calls on other cameras.
    pub fn open(&self, device_id: &str) -> Result<CameraHandle, CaptureError> {
        if lock(&self.cameras).contains_key(device_id) {
            log::debug!("Camera {} already open", device_id);
            return Ok(CameraHandle::new(device_id));
        }

        let opened = DeviceHandle::open(self.engine.as_ref(), device_id);

        let mut cameras = lock(&self.cameras);
        if cameras.contains_key(device_id) {
            // Lost a race with another open of the same camera.
            match opened {
                Ok(duplicate) => {
                    log::debug!("Camera {} opened concurrently; closing duplicate", device_id);
                    drop(cameras);
                    duplicate.close();
                }
                Err(e) => log::debug!("Concurrent open of {} failed: {}", device_id, e),
            }
            return Ok(CameraHandle::new(device_id));
        }

        cameras.insert(device_id.to_string(), Arc::new(Camera::new(opened?)));
        Ok(CameraHandle::new(device_id))
    }

    pub fn open_cameras(&self) -> Vec<CameraHandle> {
        let mut handles: Vec<CameraHandle> = lock(&self.cameras)
            .keys()
            .map(|id| CameraHandle::new(id.as_str()))
            .collect();
        handles.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        handles
    }

    fn camera(&self, handle: &CameraHandle, stage: Stage) -> Result<Arc<Camera>, CaptureError> {
        lock(&self.cameras)
            .get(&handle.device_id)
            .cloned()
            .ok_or_else(|| {
                CaptureError::device_unavailable(stage, &handle.device_id, "camera is not open")
            })
    }

    fn catalog_for(&self, camera: &Camera) -> Result<MediaTypeCatalog, CaptureError> {
        if let Some(catalog) = lock(&camera.slot).catalog.clone() {
            return Ok(catalog);
        }

        let catalog = MediaTypeCatalog::enumerate(&camera.device, StreamPurpose::Preview)?;
        lock(&camera.slot).catalog = Some(catalog.clone());
        Ok(catalog)
    }

    /// The preview media type catalog, enumerated once per open.
    pub fn catalog(&self, handle: &CameraHandle) -> Result<MediaTypeCatalog, CaptureError> {
        let camera = self.camera(handle, Stage::Enumerate)?;
        self.catalog_for(&camera)
    }

    /// Forget the cached catalog, e.g. after the device reconnected.
    pub fn invalidate_catalog(&self, handle: &CameraHandle) -> Result<(), CaptureError> {
        let camera = self.camera(handle, Stage::Enumerate)?;
        lock(&camera.slot).catalog = None;
        log::debug!("Invalidated media type catalog of {}", handle.device_id);
        Ok(())
    }

    /// Run selection without touching the device configuration.
    pub fn negotiate(
        &self,
        handle: &CameraHandle,
        constraints: &SelectionConstraints,
    ) -> Result<Selection, CaptureError> {
        let camera = self.camera(handle, Stage::Select)?;
        let catalog = self.catalog_for(&camera)?;
        let selection = self.selector().select(&catalog, constraints)?;
        log::info!(
            "Negotiated {} for {} ({})",
            selection.descriptor,
            handle.device_id,
            selection.trace
        );
        Ok(selection)
    }

    /// Register the sink receiving frames and lifecycle events of `handle`.
    pub fn set_frame_sink(
        &self,
        handle: &CameraHandle,
        sink: Arc<dyn FrameSink>,
    ) -> Result<(), CaptureError> {
        let camera = self.camera(handle, Stage::Stream)?;
        let replaced = camera.sinks.set(sink);
        let running = lock(&camera.slot)
            .session
            .as_ref()
            .map(|s| s.state() == PreviewState::Running)
            .unwrap_or(false);
        if replaced && running {
            log::warn!("Replaced the frame sink of {} while preview is running", handle.device_id);
        }
        Ok(())
    }

    pub fn clear_frame_sink(&self, handle: &CameraHandle) -> Result<(), CaptureError> {
        self.camera(handle, Stage::Stream)?.sinks.clear();
        Ok(())
    }

    /// Negotiate a media type for `settings`, apply it and start preview.
    ///
    /// A live preview on the same camera is stopped first. Concurrent starts
    /// on one camera are serialised; the last one to run owns the preview.
    pub fn start_preview(
        &self,
        handle: &CameraHandle,
        settings: &PreviewSettings,
    ) -> Result<PreviewHandle, CaptureError> {
        let result = self.start_preview_inner(handle, settings);
        if let Err(e) = &result {
            log::error!("Preview start on {} failed: {}", handle.device_id, e);
        }
        result
    }

    fn start_preview_inner(
        &self,
        handle: &CameraHandle,
        settings: &PreviewSettings,
    ) -> Result<PreviewHandle, CaptureError> {
        let camera = self.camera(handle, Stage::Start)?;
        let _pipeline = lock(&camera.pipeline);

        if settings.video_bitrate.is_some() || settings.enable_audio {
            log::debug!(
                "Preview ignores video bitrate {:?} and audio {}",
                settings.video_bitrate,
                settings.enable_audio
            );
        }

        if let Some(previous) = camera.take_session() {
            log::info!(
                "Stopping previous preview session {} on {}",
                previous.id(),
                handle.device_id
            );
            camera.retire(previous);
        }

        let config = self.config();
        let constraints = settings.to_constraints(config.selection.allow_compressed_fallback);

        let catalog = self.catalog_for(&camera)?;
        let selection = self.selector().select(&catalog, &constraints)?;
        log::info!(
            "Selected {} (catalog entry {}) for {} ({})",
            selection.descriptor,
            selection.catalog_index,
            handle.device_id,
            selection.trace
        );

        self.configurator
            .apply(&camera.device, catalog.stream_index(), &selection.descriptor)?;

        let session = Arc::new(PreviewSession::new(
            camera.device.clone(),
            camera.generations.clone(),
            camera.sinks.clone(),
            config.session.clone(),
        )?);
        camera.install_session(session.clone());

        let started = session
            .start(&selection.descriptor, catalog.stream_index())
            .and_then(|generation| {
                session
                    .wait_for_start(config.session.start_timeout())
                    .map(|_| generation)
            });

        match started {
            Ok(generation) => Ok(PreviewHandle {
                camera: handle.clone(),
                session_id: session.id(),
                generation,
                media_type: selection.descriptor,
                frame_width: selection.frame_width,
                frame_height: selection.frame_height,
            }),
            Err(e) => {
                if let Some(failed) = camera.remove_session(session.id()) {
                    camera.retire(failed);
                }
                Err(e)
            }
        }
    }

    /// Stop the preview `preview` refers to.
    ///
    /// A handle to a preview that was already replaced or stopped is a no-op.
    /// `Err(PreviewStopTimedOut)` is soft: the preview is disposed regardless.
    pub fn stop_preview(&self, preview: &PreviewHandle) -> Result<(), CaptureError> {
        let camera = self.camera(&preview.camera, Stage::Stop)?;
        let Some(session) = camera.remove_session(preview.session_id) else {
            log::debug!(
                "Preview {} on {} is no longer active",
                preview.session_id,
                preview.camera.device_id
            );
            return Ok(());
        };

        let result = session.stop();
        camera.retire(session);

        match result {
            Ok(outcome) => {
                log::info!("Preview stopped on {} ({:?})", preview.camera.device_id, outcome);
                Ok(())
            }
            Err(e) => {
                if e.is_soft() {
                    log::warn!("{}", e);
                } else {
                    log::error!("Preview stop on {} failed: {}", preview.camera.device_id, e);
                }
                Err(e)
            }
        }
    }

    /// Stop any preview and close the camera. Unknown handles are ignored.
    pub fn dispose(&self, handle: &CameraHandle) -> Result<(), CaptureError> {
        let Some(camera) = lock(&self.cameras).remove(&handle.device_id) else {
            log::debug!("Dispose of {}: camera is not open", handle.device_id);
            return Ok(());
        };

        if let Some(session) = camera.take_session() {
            camera.retire(session);
        }
        camera.sinks.clear();
        camera.device.close();
        log::info!("Disposed camera {}", handle.device_id);
        Ok(())
    }

    /// Status of the current preview, or of the last one if none is active.
    pub fn status(&self, handle: &CameraHandle) -> Result<Option<PreviewStatus>, CaptureError> {
        let camera = self.camera(handle, Stage::Stream)?;
        let slot = lock(&camera.slot);
        Ok(match &slot.session {
            Some(session) => Some(session.status()),
            None => slot.last_status.clone(),
        })
    }

    /// Dispose every open camera.
    pub fn shutdown(&self) {
        for handle in self.open_cameras() {
            let _ = self.dispose(&handle);
        }
    }
}

impl Drop for CaptureBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
