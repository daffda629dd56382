//! Testing utilities for camera-bridge
//!
//! A scripted capture engine plus capability sets and frames modelled on
//! real hardware, so negotiation and session lifecycles can be tested
//! without a camera attached.

pub mod scripted;
pub mod synthetic_data;

pub use scripted::{ScriptControl, ScriptedDevice, ScriptedEngine, StartBehavior, StopBehavior};
pub use synthetic_data::{ai_camera_catalog, standard_webcam_catalog, synthetic_frame, SyntheticFrame};
