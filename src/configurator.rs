//! Applies a negotiated media type to a device stream.

use crate::errors::{CaptureError, Stage};
use crate::platform::DeviceHandle;
use crate::types::MediaTypeDescriptor;
use serde::Serialize;

/// What applying a media type actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Applied {
    /// The stream already carried this media type; nothing was sent to the device
    AlreadyActive,
    Configured,
}

/// Sets the current media type of a stream, once.
///
/// The device's answer is never retried and never reinterpreted: a rejection
/// surfaces as `ConfigurationRejected` with the raw fault attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceConfigurator;

impl DeviceConfigurator {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(
        &self,
        device: &DeviceHandle,
        stream_index: u32,
        media_type: &MediaTypeDescriptor,
    ) -> Result<Applied, CaptureError> {
        if !device.is_open() {
            return Err(CaptureError::device_unavailable(
                Stage::Configure,
                device.device_id(),
                "device is not open",
            ));
        }

        // A failed read only costs the shortcut.
        match device.device().current_media_type(stream_index) {
            Ok(Some(current)) if current == *media_type => {
                log::debug!(
                    "Stream {} of {} already set to {}",
                    stream_index,
                    device.device_id(),
                    media_type
                );
                return Ok(Applied::AlreadyActive);
            }
            Ok(_) => {}
            Err(fault) => log::debug!(
                "Could not read current media type of {}: {}",
                device.device_id(),
                fault
            ),
        }

        match device.device().set_current_media_type(stream_index, media_type) {
            Ok(()) => {
                log::info!(
                    "Configured stream {} of {} to {}",
                    stream_index,
                    device.device_id(),
                    media_type
                );
                Ok(Applied::Configured)
            }
            Err(fault) => {
                log::error!(
                    "Device {} rejected media type {}: {}",
                    device.device_id(),
                    media_type,
                    fault
                );
                Err(CaptureError::ConfigurationRejected {
                    media_type: media_type.to_string(),
                    fault,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CaptureErrorKind, DeviceFault, ERROR_GEN_FAILURE};
    use crate::testing::{synthetic_data, ScriptedDevice, ScriptedEngine};
    use crate::types::{FrameRate, PixelFormat};

    fn mjpeg_1080p() -> MediaTypeDescriptor {
        MediaTypeDescriptor::new(1920, 1080, FrameRate::fps(30), PixelFormat::Mjpeg)
    }

    #[test]
    fn test_apply_is_idempotent() {
        let engine = ScriptedEngine::new();
        engine.add_device(ScriptedDevice::new("cam0", synthetic_data::standard_webcam_catalog()));
        let handle = DeviceHandle::open(&engine, "cam0").unwrap();
        let control = engine.control("cam0").unwrap();

        let configurator = DeviceConfigurator::new();
        assert_eq!(configurator.apply(&handle, 0, &mjpeg_1080p()).unwrap(), Applied::Configured);
        assert_eq!(configurator.apply(&handle, 0, &mjpeg_1080p()).unwrap(), Applied::AlreadyActive);
        assert_eq!(control.apply_calls(), 1);
        assert_eq!(control.applied(), Some(mjpeg_1080p()));
    }

    #[test]
    fn test_rejection_keeps_raw_code_and_is_not_retried() {
        let engine = ScriptedEngine::new();
        engine.add_device(
            ScriptedDevice::new("cam0", synthetic_data::standard_webcam_catalog()).with_apply_fault(
                DeviceFault::from_code(ERROR_GEN_FAILURE, "SetCurrentDeviceMediaType"),
            ),
        );
        let handle = DeviceHandle::open(&engine, "cam0").unwrap();

        let err = DeviceConfigurator::new()
            .apply(&handle, 0, &mjpeg_1080p())
            .unwrap_err();
        assert_eq!(err.kind(), CaptureErrorKind::ConfigurationRejected);
        assert_eq!(err.device_error_code(), Some(ERROR_GEN_FAILURE));
        assert!(err.to_string().contains("1920x1080@30 MJPG"));
        assert_eq!(engine.control("cam0").unwrap().apply_calls(), 1);
    }

    #[test]
    fn test_closed_device_is_unavailable() {
        let engine = ScriptedEngine::new();
        engine.add_device(ScriptedDevice::new("cam0", synthetic_data::standard_webcam_catalog()));
        let handle = DeviceHandle::open(&engine, "cam0").unwrap();
        handle.close();

        let err = DeviceConfigurator::new()
            .apply(&handle, 0, &mjpeg_1080p())
            .unwrap_err();
        assert_eq!(err.kind(), CaptureErrorKind::DeviceUnavailable);
        assert_eq!(err.stage(), Stage::Configure);
    }
}
