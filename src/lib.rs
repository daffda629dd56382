//! camera-bridge: capture-format negotiation and preview sessions for Tauri camera apps
//!
//! The bridge sits between an application's camera API and a platform video
//! capture engine. Opening a camera enumerates what the device can produce;
//! starting a preview picks a media type the device can deliver without
//! failing, applies it, and runs a race-free preview session whose frames are
//! handed to a registered sink.
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! camera-bridge = "0.1"
//! tauri = { version = "2.0", features = ["protocol-asset"] }
//! ```
//!
//! Then in your Tauri app:
//! ```rust,ignore
//! fn main() {
//!     tauri::Builder::default()
//!         .plugin(camera_bridge::init())
//!         .run(tauri::generate_context!())
//!         .expect("error while running tauri application");
//! }
//! ```
//!
//! Or drive a bridge directly:
//! ```rust,ignore
//! use camera_bridge::{BridgeConfig, CaptureBridge, NokhwaEngine, PreviewSettings, ResolutionPreset};
//! use std::sync::Arc;
//!
//! let bridge = CaptureBridge::new(Arc::new(NokhwaEngine::new()), BridgeConfig::default());
//! let camera = bridge.open("0")?;
//! bridge.set_frame_sink(&camera, Arc::new(|frame: &camera_bridge::Frame<'_>| {
//!     println!("{}x{} {}", frame.width, frame.height, frame.pixel_format);
//! }))?;
//! let preview = bridge.start_preview(&camera, &PreviewSettings::new(ResolutionPreset::High))?;
//! bridge.stop_preview(&preview)?;
//! ```
pub mod bridge;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod configurator;
pub mod errors;
pub mod invariant_ppt;
pub mod platform;
pub mod selector;
pub mod session;
pub mod timing;
pub mod types;

// Testing utilities - scripted engine and synthetic data for offline testing
pub mod testing;

// Re-exports for convenience
pub use bridge::{CameraHandle, CaptureBridge, PreviewHandle};
pub use catalog::MediaTypeCatalog;
pub use config::BridgeConfig;
pub use configurator::{Applied, DeviceConfigurator};
pub use errors::{CaptureError, CaptureErrorKind, DeviceFault, FaultCategory, Stage};
pub use platform::{CaptureDevice, CaptureEngine, NokhwaEngine};
pub use selector::{CapabilityPolicy, DefaultPolicy, MediaTypeSelector, Selection};
pub use session::{FrameSink, PreviewEvent, PreviewSession, PreviewState, PreviewStatus};
pub use types::{
    CameraDeviceInfo, Frame, FrameRate, MediaTypeDescriptor, PixelFormat, PreviewSettings,
    ResolutionPreset, SelectionConstraints, StreamPurpose,
};

use tauri::{
    plugin::{Builder, TauriPlugin},
    Runtime,
};

/// Initialize the camera-bridge plugin with all commands
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("camera-bridge")
        .invoke_handler(tauri::generate_handler![
            // Device commands
            commands::init::list_cameras,
            commands::init::open_camera,
            commands::init::dispose_camera,
            // Negotiation and preview commands
            commands::preview::list_media_types,
            commands::preview::negotiate_media_type,
            commands::preview::start_preview,
            commands::preview::stop_preview,
            commands::preview::get_preview_status,
            // Configuration commands
            commands::config::get_config,
            commands::config::update_config,
            commands::config::reset_config,
        ])
        .on_drop(|_app| {
            commands::shutdown_bridge();
        })
        .build()
}

/// Initialize logging for the capture bridge
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "camera_bridge=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
