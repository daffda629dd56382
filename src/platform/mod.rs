//! Capture engine seam
//!
//! The bridge talks to a platform capture engine only through
//! [`CaptureEngine`] and [`CaptureDevice`]. Start and stop are asynchronous:
//! the device reports their completion, and delivers frames, through the
//! [`EngineCallbacks`] handed to [`CaptureDevice::start_preview`], usually from
//! a thread the engine owns.

pub mod nokhwa_engine;

pub use nokhwa_engine::NokhwaEngine;

use crate::errors::{CaptureError, DeviceFault, Stage};
use crate::session::EngineCallbacks;
use crate::types::{CameraDeviceInfo, MediaTypeDescriptor, StreamPurpose};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A platform video-capture engine.
pub trait CaptureEngine: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    fn list_devices(&self) -> Result<Vec<CameraDeviceInfo>, DeviceFault>;

    fn open_device(&self, device_id: &str) -> Result<Box<dyn CaptureDevice>, DeviceFault>;
}

/// An opened physical device.
pub trait CaptureDevice: Send + Sync {
    /// Map a stream purpose onto the device's concrete stream index.
    fn resolve_stream(&self, purpose: StreamPurpose) -> Result<u32, DeviceFault>;

    /// Native media types of a stream, in the device's own order.
    fn native_media_types(&self, stream_index: u32)
        -> Result<Vec<MediaTypeDescriptor>, DeviceFault>;

    fn current_media_type(&self, stream_index: u32)
        -> Result<Option<MediaTypeDescriptor>, DeviceFault>;

    fn set_current_media_type(
        &self,
        stream_index: u32,
        media_type: &MediaTypeDescriptor,
    ) -> Result<(), DeviceFault>;

    /// Request preview start. `Ok` means the request was accepted; the outcome
    /// arrives later through `callbacks`.
    fn start_preview(&self, stream_index: u32, callbacks: EngineCallbacks)
        -> Result<(), DeviceFault>;

    /// Request preview stop; acknowledged through the callbacks given to start.
    fn stop_preview(&self) -> Result<(), DeviceFault>;

    /// Release the device. Must be safe to call more than once.
    fn close(&self);
}

/// An open device plus the bookkeeping the bridge keeps about it.
pub struct DeviceHandle {
    device_id: String,
    device: Box<dyn CaptureDevice>,
    open: AtomicBool,
    enumerating: AtomicBool,
}

impl DeviceHandle {
    /// Open `device_id` on `engine`, mapping any failure to `DeviceUnavailable`.
    pub fn open(engine: &dyn CaptureEngine, device_id: &str) -> Result<Arc<Self>, CaptureError> {
        let device = engine.open_device(device_id).map_err(|fault| {
            log::error!(
                "Failed to open device {} on {}: {}",
                device_id,
                engine.name(),
                fault
            );
            CaptureError::DeviceUnavailable {
                stage: Stage::Open,
                device_id: device_id.to_string(),
                reason: format!("{} could not open the device", engine.name()),
                fault: Some(fault),
            }
        })?;

        log::info!("Opened device {} on {}", device_id, engine.name());
        Ok(Arc::new(Self::from_device(device_id, device)))
    }

    pub fn from_device(device_id: &str, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device_id: device_id.to_string(),
            device,
            open: AtomicBool::new(true),
            enumerating: AtomicBool::new(false),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device(&self) -> &dyn CaptureDevice {
        self.device.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Close the device; later calls are no-ops.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            log::info!("Closing device {}", self.device_id);
            self.device.close();
        }
    }

    /// Claim the enumeration slot; `None` while another enumeration runs.
    pub(crate) fn begin_enumeration(&self) -> Option<EnumerationGuard<'_>> {
        self.enumerating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| EnumerationGuard { handle: self })
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) struct EnumerationGuard<'a> {
    handle: &'a DeviceHandle,
}

impl Drop for EnumerationGuard<'_> {
    fn drop(&mut self) {
        self.handle.enumerating.store(false, Ordering::Release);
    }
}
