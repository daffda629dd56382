//! Error taxonomy for the capture bridge
//!
//! Every stage converts its local failures into exactly one [`CaptureError`]
//! kind before the failure crosses a component boundary. Engine failures are
//! carried as a [`DeviceFault`] so the raw device code survives all the way to
//! the caller.

use crate::types::StreamPurpose;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Broad classification of a device/engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultCategory {
    /// Firmware or driver refused the requested media type
    FormatRejected,
    /// Device is in use by another client or not ready
    DeviceBusy,
    /// Access to the device was denied
    PermissionDenied,
    /// Device vanished or stopped functioning
    Disconnected,
    /// Engine did not answer in time
    Timeout,
    /// Operation not supported by this engine/device
    Unsupported,
    Other,
}

impl FaultCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultCategory::FormatRejected => "format rejected",
            FaultCategory::DeviceBusy => "device busy",
            FaultCategory::PermissionDenied => "permission denied",
            FaultCategory::Disconnected => "device disconnected",
            FaultCategory::Timeout => "timeout",
            FaultCategory::Unsupported => "unsupported",
            FaultCategory::Other => "device error",
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Well-known HRESULT values reported by capture engines.
pub const E_ACCESSDENIED: u32 = 0x8007_0005;
pub const ERROR_GEN_FAILURE: u32 = 0x8007_001F;
pub const ERROR_DEVICE_NOT_CONNECTED: u32 = 0x8007_048F;
pub const ERROR_DEVICE_IN_USE: u32 = 0x8007_0964;
pub const E_NOTIMPL: u32 = 0x8000_4001;
pub const MF_E_INVALIDMEDIATYPE: u32 = 0xC00D_36B4;
pub const MF_E_UNSUPPORTED_FORMAT: u32 = 0xC00D_5212;
pub const MF_E_INVALIDREQUEST: u32 = 0xC00D_36B2;
pub const MF_E_HW_MFT_FAILED_START_STREAMING: u32 = 0xC00D_3704;
pub const MF_E_VIDEO_RECORDING_DEVICE_INVALIDATED: u32 = 0xC00D_3E85;
pub const MF_E_VIDEO_RECORDING_DEVICE_PREEMPTED: u32 = 0xC00D_3E86;
pub const MF_E_TIMEOUT: u32 = 0xC00D_36C8;

/// Raw failure reported by the capture engine, kept unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFault {
    pub category: FaultCategory,
    /// Native error code (HRESULT, errno, ...) when the engine reports one
    pub code: Option<u32>,
    pub detail: String,
}

impl DeviceFault {
    pub fn new(category: FaultCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            code: None,
            detail: detail.into(),
        }
    }

    /// Build a fault from a native code, classifying well-known values.
    pub fn from_code(code: u32, detail: impl Into<String>) -> Self {
        Self {
            category: classify_code(code),
            code: Some(code),
            detail: detail.into(),
        }
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    /// Code rendered the way platform tooling prints it, e.g. `0x8007001F`.
    pub fn code_hex(&self) -> Option<String> {
        self.code.map(|c| format!("0x{:08X}", c))
    }

    /// Pull the first `0x????????` token out of an engine message.
    ///
    /// Engines that only hand back strings still embed the native code in
    /// their text on Windows; recovering it keeps diagnostics precise.
    pub fn from_message(fallback: FaultCategory, message: impl Into<String>) -> Self {
        let message = message.into();
        match scan_hex_code(&message) {
            Some(code) => {
                let category = match classify_code(code) {
                    FaultCategory::Other => fallback,
                    known => known,
                };
                Self {
                    category,
                    code: Some(code),
                    detail: message,
                }
            }
            None => Self::new(fallback, message),
        }
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.code_hex() {
            Some(hex) => write!(f, "{} ({}): {}", self.category, hex, self.detail)?,
            None => write!(f, "{}: {}", self.category, self.detail)?,
        }
        if let Some(system) = self.code.and_then(system_message) {
            write!(f, " [{}]", system)?;
        }
        Ok(())
    }
}

fn classify_code(code: u32) -> FaultCategory {
    match code {
        E_ACCESSDENIED => FaultCategory::PermissionDenied,
        ERROR_GEN_FAILURE
        | ERROR_DEVICE_NOT_CONNECTED
        | MF_E_VIDEO_RECORDING_DEVICE_INVALIDATED => FaultCategory::Disconnected,
        ERROR_DEVICE_IN_USE | MF_E_VIDEO_RECORDING_DEVICE_PREEMPTED | MF_E_INVALIDREQUEST => {
            FaultCategory::DeviceBusy
        }
        MF_E_INVALIDMEDIATYPE | MF_E_UNSUPPORTED_FORMAT | MF_E_HW_MFT_FAILED_START_STREAMING => {
            FaultCategory::FormatRejected
        }
        MF_E_TIMEOUT => FaultCategory::Timeout,
        E_NOTIMPL => FaultCategory::Unsupported,
        _ => FaultCategory::Other,
    }
}

fn scan_hex_code(message: &str) -> Option<u32> {
    let bytes = message.as_bytes();
    let mut i = 0;
    while i + 10 <= bytes.len() {
        if bytes[i] == b'0' && (bytes[i + 1] == b'x' || bytes[i + 1] == b'X') {
            let digits = &bytes[i + 2..i + 10];
            let terminated = bytes
                .get(i + 10)
                .map_or(true, |b| !b.is_ascii_hexdigit());
            if terminated && digits.iter().all(u8::is_ascii_hexdigit) {
                let parsed = std::str::from_utf8(digits)
                    .ok()
                    .and_then(|s| u32::from_str_radix(s, 16).ok());
                if let Some(code) = parsed {
                    return Some(code);
                }
            }
        }
        i += 1;
    }
    None
}

#[cfg(target_os = "windows")]
fn system_message(code: u32) -> Option<String> {
    let message = format!("{}", windows::core::HRESULT(code as i32).message());
    let message = message.trim();
    if message.is_empty() {
        None
    } else {
        Some(message.to_string())
    }
}

#[cfg(not(target_os = "windows"))]
fn system_message(_code: u32) -> Option<String> {
    None
}

/// Pipeline stage a failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Open,
    Enumerate,
    Select,
    Configure,
    Start,
    Stream,
    Stop,
    Dispose,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Open => "open",
            Stage::Enumerate => "enumerate",
            Stage::Select => "select",
            Stage::Configure => "configure",
            Stage::Start => "start",
            Stage::Stream => "stream",
            Stage::Stop => "stop",
            Stage::Dispose => "dispose",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The constraint that removed the last selection candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EliminatingConstraint {
    CatalogEmpty,
    Width,
    Height,
    Compression,
    CapabilityPolicy,
}

impl fmt::Display for EliminatingConstraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            EliminatingConstraint::CatalogEmpty => "catalog empty",
            EliminatingConstraint::Width => "width",
            EliminatingConstraint::Height => "height",
            EliminatingConstraint::Compression => "compression",
            EliminatingConstraint::CapabilityPolicy => "capability policy",
        };
        f.write_str(s)
    }
}

/// Stable, caller-facing failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureErrorKind {
    DeviceUnavailable,
    EnumerationFailed,
    NoAcceptableFormat,
    ConfigurationRejected,
    PreviewStartFailed,
    PreviewStopTimedOut,
    InternalInvariantViolation,
}

impl CaptureErrorKind {
    /// Stable error code surfaced to the application framework.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureErrorKind::DeviceUnavailable => "device_unavailable",
            CaptureErrorKind::EnumerationFailed => "enumeration_failed",
            CaptureErrorKind::NoAcceptableFormat => "no_acceptable_format",
            CaptureErrorKind::ConfigurationRejected => "configuration_rejected",
            CaptureErrorKind::PreviewStartFailed => "preview_start_failed",
            CaptureErrorKind::PreviewStopTimedOut => "preview_stop_timed_out",
            CaptureErrorKind::InternalInvariantViolation => "internal_invariant_violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("[{stage}] device {device_id} unavailable: {reason}{}", fault_suffix(.fault))]
    DeviceUnavailable {
        stage: Stage,
        device_id: String,
        reason: String,
        fault: Option<DeviceFault>,
    },

    #[error("[enumerate] media type enumeration failed for {purpose} stream: {reason}{}", fault_suffix(.fault))]
    EnumerationFailed {
        purpose: StreamPurpose,
        reason: String,
        fault: Option<DeviceFault>,
    },

    #[error("[select] no acceptable format among {catalog_size} media types, every candidate eliminated by {eliminating} ({detail})")]
    NoAcceptableFormat {
        catalog_size: usize,
        eliminating: EliminatingConstraint,
        detail: String,
    },

    #[error("[configure] device rejected media type {media_type}: {fault}")]
    ConfigurationRejected { media_type: String, fault: DeviceFault },

    #[error("[start] preview start failed for {media_type}: {fault}")]
    PreviewStartFailed { media_type: String, fault: DeviceFault },

    #[error("[stop] engine did not acknowledge preview stop within {timeout_ms} ms; session disposed anyway")]
    PreviewStopTimedOut { timeout_ms: u64 },

    #[error("[{stage}] internal invariant violated: {message}")]
    InternalInvariantViolation { stage: Stage, message: String },
}

fn fault_suffix(fault: &Option<DeviceFault>) -> String {
    match fault {
        Some(fault) => format!(" ({})", fault),
        None => String::new(),
    }
}

impl CaptureError {
    pub fn kind(&self) -> CaptureErrorKind {
        match self {
            CaptureError::DeviceUnavailable { .. } => CaptureErrorKind::DeviceUnavailable,
            CaptureError::EnumerationFailed { .. } => CaptureErrorKind::EnumerationFailed,
            CaptureError::NoAcceptableFormat { .. } => CaptureErrorKind::NoAcceptableFormat,
            CaptureError::ConfigurationRejected { .. } => CaptureErrorKind::ConfigurationRejected,
            CaptureError::PreviewStartFailed { .. } => CaptureErrorKind::PreviewStartFailed,
            CaptureError::PreviewStopTimedOut { .. } => CaptureErrorKind::PreviewStopTimedOut,
            CaptureError::InternalInvariantViolation { .. } => {
                CaptureErrorKind::InternalInvariantViolation
            }
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    pub fn stage(&self) -> Stage {
        match self {
            CaptureError::DeviceUnavailable { stage, .. } => *stage,
            CaptureError::EnumerationFailed { .. } => Stage::Enumerate,
            CaptureError::NoAcceptableFormat { .. } => Stage::Select,
            CaptureError::ConfigurationRejected { .. } => Stage::Configure,
            CaptureError::PreviewStartFailed { .. } => Stage::Start,
            CaptureError::PreviewStopTimedOut { .. } => Stage::Stop,
            CaptureError::InternalInvariantViolation { stage, .. } => *stage,
        }
    }

    pub fn fault(&self) -> Option<&DeviceFault> {
        match self {
            CaptureError::DeviceUnavailable { fault, .. }
            | CaptureError::EnumerationFailed { fault, .. } => fault.as_ref(),
            CaptureError::ConfigurationRejected { fault, .. }
            | CaptureError::PreviewStartFailed { fault, .. } => Some(fault),
            _ => None,
        }
    }

    /// Raw device error code, if the engine reported one.
    pub fn device_error_code(&self) -> Option<u32> {
        self.fault().and_then(|f| f.code)
    }

    /// Soft failures leave the bridge consistent; the requested end state was reached.
    pub fn is_soft(&self) -> bool {
        matches!(self, CaptureError::PreviewStopTimedOut { .. })
    }

    pub fn device_unavailable(
        stage: Stage,
        device_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CaptureError::DeviceUnavailable {
            stage,
            device_id: device_id.into(),
            reason: reason.into(),
            fault: None,
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            stage: self.stage(),
            message: self.to_string(),
            device_error_code: self.fault().and_then(|f| f.code_hex()),
            category: self.fault().map(|f| f.category),
        }
    }
}

/// Serialized shape of a [`CaptureError`] handed to the application framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub stage: Stage,
    pub message: String,
    pub device_error_code: Option<String>,
    pub category: Option<FaultCategory>,
}

impl Serialize for CaptureError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload().serialize(serializer)
    }
}
