pub mod config;
pub mod init;
pub mod preview;

pub use config::*;
pub use init::*;
pub use preview::*;

use crate::bridge::CaptureBridge;
use crate::config::BridgeConfig;
use crate::errors::{CaptureError, Stage};
use crate::platform::NokhwaEngine;
use std::sync::{Arc, RwLock};

lazy_static::lazy_static! {
    static ref BRIDGE: RwLock<Option<Arc<CaptureBridge>>> = RwLock::new(None);
}

/// The bridge every command runs against, created on first use.
pub fn bridge() -> Arc<CaptureBridge> {
    if let Some(bridge) = BRIDGE
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .as_ref()
    {
        return bridge.clone();
    }

    let mut slot = BRIDGE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.get_or_insert_with(|| {
        Arc::new(CaptureBridge::new(
            Arc::new(NokhwaEngine::new()),
            BridgeConfig::load_or_default(),
        ))
    })
    .clone()
}

/// Replace the command bridge, returning the previous one.
pub fn install_bridge(bridge: Arc<CaptureBridge>) -> Option<Arc<CaptureBridge>> {
    BRIDGE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .replace(bridge)
}

/// Dispose every camera of the installed bridge, if one was created.
pub fn shutdown_bridge() {
    let installed = BRIDGE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(bridge) = installed {
        bridge.shutdown();
    }
}

/// Run a blocking bridge call off the async runtime.
pub(crate) async fn run_blocking<T, F>(stage: Stage, f: F) -> Result<T, CaptureError>
where
    T: Send + 'static,
    F: FnOnce(&CaptureBridge) -> Result<T, CaptureError> + Send + 'static,
{
    let bridge = bridge();
    tokio::task::spawn_blocking(move || f(bridge.as_ref()))
        .await
        .map_err(|e| CaptureError::InternalInvariantViolation {
            stage,
            message: format!("Task join error: {}", e),
        })?
}
