//! Media type catalog: the frozen capability snapshot of one device stream.

use crate::errors::{CaptureError, Stage};
use crate::platform::DeviceHandle;
use crate::types::{MediaTypeDescriptor, StreamPurpose};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Ordered, immutable set of media types a stream advertises.
///
/// Built once per device-open. Entries are shared behind an `Arc<[_]>` and
/// there is no API to reorder, add or remove them; a reconnect or
/// reconfiguration produces a new catalog instead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeCatalog {
    device_id: String,
    purpose: StreamPurpose,
    stream_index: u32,
    entries: Arc<[MediaTypeDescriptor]>,
    enumerated_at: DateTime<Utc>,
}

impl MediaTypeCatalog {
    /// Enumerate the native media types of `device` for `purpose`.
    ///
    /// Failures are reported, never retried.
    pub fn enumerate(
        device: &DeviceHandle,
        purpose: StreamPurpose,
    ) -> Result<MediaTypeCatalog, CaptureError> {
        if !device.is_open() {
            return Err(CaptureError::device_unavailable(
                Stage::Enumerate,
                device.device_id(),
                "device is not open",
            ));
        }

        let _guard = device
            .begin_enumeration()
            .ok_or_else(|| CaptureError::EnumerationFailed {
                purpose,
                reason: format!(
                    "device {} is already being enumerated",
                    device.device_id()
                ),
                fault: None,
            })?;

        let stream_index = device
            .device()
            .resolve_stream(purpose)
            .map_err(|fault| CaptureError::EnumerationFailed {
                purpose,
                reason: "device has no stream for this purpose".to_string(),
                fault: Some(fault),
            })?;

        let entries = device
            .device()
            .native_media_types(stream_index)
            .map_err(|fault| CaptureError::EnumerationFailed {
                purpose,
                reason: format!("native media type query failed on stream {}", stream_index),
                fault: Some(fault),
            })?;

        if entries.is_empty() {
            log::error!(
                "Device {} reported zero {} media types on stream {}",
                device.device_id(),
                purpose,
                stream_index
            );
            return Err(CaptureError::EnumerationFailed {
                purpose,
                reason: format!("device reported zero media types on stream {}", stream_index),
                fault: None,
            });
        }

        log::info!(
            "Enumerated {} {} media types on device {} stream {}",
            entries.len(),
            purpose,
            device.device_id(),
            stream_index
        );
        for (i, entry) in entries.iter().enumerate() {
            log::debug!("  [{}] {}", i, entry);
        }

        Ok(Self::from_entries(
            device.device_id(),
            purpose,
            stream_index,
            entries,
        ))
    }

    /// Build a catalog from already-known entries.
    pub fn from_entries(
        device_id: &str,
        purpose: StreamPurpose,
        stream_index: u32,
        entries: Vec<MediaTypeDescriptor>,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            purpose,
            stream_index,
            entries: entries.into(),
            enumerated_at: Utc::now(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn purpose(&self) -> StreamPurpose {
        self.purpose
    }

    pub fn stream_index(&self) -> u32 {
        self.stream_index
    }

    pub fn entries(&self) -> &[MediaTypeDescriptor] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&MediaTypeDescriptor> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enumerated_at(&self) -> DateTime<Utc> {
        self.enumerated_at
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MediaTypeDescriptor> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a MediaTypeCatalog {
    type Item = &'a MediaTypeDescriptor;
    type IntoIter = std::slice::Iter<'a, MediaTypeDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
