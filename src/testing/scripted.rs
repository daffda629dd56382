//! In-process capture engine driven by a script
//!
//! [`ScriptedEngine`] implements the engine seam without hardware. Each
//! [`ScriptedDevice`] describes what a device advertises and how it answers
//! configuration, start and stop; a [`ScriptControl`] lets a test play the
//! engine's side of the asynchronous protocol by hand.

use crate::errors::{DeviceFault, FaultCategory};
use crate::platform::{CaptureDevice, CaptureEngine};
use crate::session::{lock, EngineCallbacks};
use crate::testing::synthetic_data;
use crate::types::{CameraDeviceInfo, Frame, MediaTypeDescriptor, StreamPurpose};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a scripted device answers `start_preview`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartBehavior {
    /// Accept and report started before returning
    Auto,
    /// Refuse the request synchronously
    Reject(DeviceFault),
    /// Accept, then report a start failure before returning
    FailAsync(DeviceFault),
    /// Accept and wait for the test to report the outcome
    Manual,
}

/// How a scripted device answers `stop_preview`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopBehavior {
    /// Accept and acknowledge before returning
    Acknowledge,
    /// Accept but never acknowledge
    Never,
    /// Refuse the request
    Reject(DeviceFault),
    /// Block inside the call for the given time, then acknowledge
    Block(Duration),
}

/// Script for one device.
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    id: String,
    name: String,
    entries: Vec<MediaTypeDescriptor>,
    streams: HashMap<StreamPurpose, u32>,
    open_fault: Option<DeviceFault>,
    open_delay: Option<Duration>,
    enumeration_fault: Option<DeviceFault>,
    apply_fault: Option<DeviceFault>,
    start: StartBehavior,
    stop: StopBehavior,
    frames_on_start: usize,
}

impl ScriptedDevice {
    pub fn new(id: &str, entries: Vec<MediaTypeDescriptor>) -> Self {
        let mut streams = HashMap::new();
        streams.insert(StreamPurpose::Preview, 0);
        Self {
            id: id.to_string(),
            name: format!("Scripted Camera {}", id),
            entries,
            streams,
            open_fault: None,
            open_delay: None,
            enumeration_fault: None,
            apply_fault: None,
            start: StartBehavior::Auto,
            stop: StopBehavior::Acknowledge,
            frames_on_start: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_stream(mut self, purpose: StreamPurpose, index: u32) -> Self {
        self.streams.insert(purpose, index);
        self
    }

    pub fn with_open_fault(mut self, fault: DeviceFault) -> Self {
        self.open_fault = Some(fault);
        self
    }

    /// Take `delay` to open, like a device that is slow to power up.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn with_enumeration_fault(mut self, fault: DeviceFault) -> Self {
        self.enumeration_fault = Some(fault);
        self
    }

    /// Reject every `set_current_media_type` with `fault`.
    pub fn with_apply_fault(mut self, fault: DeviceFault) -> Self {
        self.apply_fault = Some(fault);
        self
    }

    pub fn with_start(mut self, behavior: StartBehavior) -> Self {
        self.start = behavior;
        self
    }

    pub fn with_stop(mut self, behavior: StopBehavior) -> Self {
        self.stop = behavior;
        self
    }

    /// Deliver `count` synthetic frames right after an automatic start.
    pub fn with_frames_on_start(mut self, count: usize) -> Self {
        self.frames_on_start = count;
        self
    }
}

#[derive(Default)]
struct Activity {
    current: Option<MediaTypeDescriptor>,
    callbacks: Option<EngineCallbacks>,
    apply_calls: usize,
    start_calls: usize,
    stop_calls: usize,
    open_count: usize,
    closed: bool,
}

struct Script {
    device: ScriptedDevice,
    activity: Mutex<Activity>,
}

/// Engine over a set of scripted devices.
#[derive(Default)]
pub struct ScriptedEngine {
    scripts: Mutex<Vec<Arc<Script>>>,
    list_fault: Mutex<Option<DeviceFault>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device, replacing any script with the same id.
    pub fn add_device(&self, device: ScriptedDevice) {
        let mut scripts = lock(&self.scripts);
        scripts.retain(|s| s.device.id != device.id);
        scripts.push(Arc::new(Script {
            device,
            activity: Mutex::new(Activity::default()),
        }));
    }

    pub fn remove_device(&self, device_id: &str) {
        lock(&self.scripts).retain(|s| s.device.id != device_id);
    }

    pub fn fail_listing(&self, fault: DeviceFault) {
        *lock(&self.list_fault) = Some(fault);
    }

    pub fn control(&self, device_id: &str) -> Option<ScriptControl> {
        lock(&self.scripts)
            .iter()
            .find(|s| s.device.id == device_id)
            .map(|script| ScriptControl {
                script: script.clone(),
            })
    }
}

impl CaptureEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn list_devices(&self) -> Result<Vec<CameraDeviceInfo>, DeviceFault> {
        if let Some(fault) = lock(&self.list_fault).clone() {
            return Err(fault);
        }
        Ok(lock(&self.scripts)
            .iter()
            .map(|s| {
                CameraDeviceInfo::new(s.device.id.clone(), s.device.name.clone())
                    .with_description(format!("{} media types", s.device.entries.len()))
            })
            .collect())
    }

    fn open_device(&self, device_id: &str) -> Result<Box<dyn CaptureDevice>, DeviceFault> {
        let script = lock(&self.scripts)
            .iter()
            .find(|s| s.device.id == device_id)
            .cloned()
            .ok_or_else(|| {
                DeviceFault::new(
                    FaultCategory::Disconnected,
                    format!("no scripted device {}", device_id),
                )
            })?;

        if let Some(delay) = script.device.open_delay {
            std::thread::sleep(delay);
        }
        if let Some(fault) = script.device.open_fault.clone() {
            return Err(fault);
        }

        {
            let mut activity = lock(&script.activity);
            activity.open_count += 1;
            activity.closed = false;
        }
        Ok(Box::new(ScriptedCapture { script }))
    }
}

struct ScriptedCapture {
    script: Arc<Script>,
}

impl ScriptedCapture {
    fn deliver_start_frames(&self, callbacks: &EngineCallbacks) {
        let current = lock(&self.script.activity).current.clone();
        let Some(media_type) = current.or_else(|| self.script.device.entries.first().cloned())
        else {
            return;
        };
        let frame =
            synthetic_data::synthetic_frame(media_type.width, media_type.height, media_type.pixel_format);
        for i in 0..self.script.device.frames_on_start {
            callbacks.frame(&frame.as_frame(i as i64 * 333_333));
        }
    }
}

impl CaptureDevice for ScriptedCapture {
    fn resolve_stream(&self, purpose: StreamPurpose) -> Result<u32, DeviceFault> {
        self.script
            .device
            .streams
            .get(&purpose)
            .copied()
            .ok_or_else(|| {
                DeviceFault::new(
                    FaultCategory::Unsupported,
                    format!("no {} stream", purpose),
                )
            })
    }

    fn native_media_types(
        &self,
        stream_index: u32,
    ) -> Result<Vec<MediaTypeDescriptor>, DeviceFault> {
        if let Some(fault) = self.script.device.enumeration_fault.clone() {
            return Err(fault);
        }
        Ok(self
            .script
            .device
            .entries
            .iter()
            .cloned()
            .map(|d| d.with_stream_index(stream_index))
            .collect())
    }

    fn current_media_type(
        &self,
        _stream_index: u32,
    ) -> Result<Option<MediaTypeDescriptor>, DeviceFault> {
        Ok(lock(&self.script.activity).current.clone())
    }

    fn set_current_media_type(
        &self,
        _stream_index: u32,
        media_type: &MediaTypeDescriptor,
    ) -> Result<(), DeviceFault> {
        let mut activity = lock(&self.script.activity);
        activity.apply_calls += 1;
        if let Some(fault) = self.script.device.apply_fault.clone() {
            return Err(fault);
        }
        activity.current = Some(media_type.clone());
        Ok(())
    }

    fn start_preview(
        &self,
        _stream_index: u32,
        callbacks: EngineCallbacks,
    ) -> Result<(), DeviceFault> {
        {
            let mut activity = lock(&self.script.activity);
            activity.start_calls += 1;
            if let StartBehavior::Reject(fault) = &self.script.device.start {
                return Err(fault.clone());
            }
            activity.callbacks = Some(callbacks.clone());
        }

        // Callbacks run without the activity lock held, as a real engine thread would.
        match &self.script.device.start {
            StartBehavior::Auto => {
                callbacks.started();
                self.deliver_start_frames(&callbacks);
            }
            StartBehavior::FailAsync(fault) => callbacks.start_failed(fault.clone()),
            StartBehavior::Manual | StartBehavior::Reject(_) => {}
        }
        Ok(())
    }

    fn stop_preview(&self) -> Result<(), DeviceFault> {
        let callbacks = {
            let mut activity = lock(&self.script.activity);
            activity.stop_calls += 1;
            activity.callbacks.clone()
        };

        match &self.script.device.stop {
            StopBehavior::Acknowledge => {
                if let Some(callbacks) = callbacks {
                    callbacks.stopped();
                }
                Ok(())
            }
            StopBehavior::Never => Ok(()),
            StopBehavior::Reject(fault) => Err(fault.clone()),
            StopBehavior::Block(duration) => {
                std::thread::sleep(*duration);
                if let Some(callbacks) = callbacks {
                    callbacks.stopped();
                }
                Ok(())
            }
        }
    }

    fn close(&self) {
        let mut activity = lock(&self.script.activity);
        activity.closed = true;
        activity.callbacks = None;
    }
}

/// Test-side handle onto a scripted device.
#[derive(Clone)]
pub struct ScriptControl {
    script: Arc<Script>,
}

impl ScriptControl {
    /// Callbacks from the most recent start request.
    pub fn callbacks(&self) -> Option<EngineCallbacks> {
        lock(&self.script.activity).callbacks.clone()
    }

    pub fn deliver_started(&self) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.started();
        }
    }

    pub fn deliver_start_failed(&self, fault: DeviceFault) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.start_failed(fault);
        }
    }

    pub fn deliver_frame(&self, frame: &Frame<'_>) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.frame(frame);
        }
    }

    pub fn deliver_error(&self, fault: DeviceFault) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.error(fault);
        }
    }

    pub fn deliver_stopped(&self) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.stopped();
        }
    }

    /// Media type last applied to the device.
    pub fn applied(&self) -> Option<MediaTypeDescriptor> {
        lock(&self.script.activity).current.clone()
    }

    pub fn apply_calls(&self) -> usize {
        lock(&self.script.activity).apply_calls
    }

    pub fn start_calls(&self) -> usize {
        lock(&self.script.activity).start_calls
    }

    pub fn stop_calls(&self) -> usize {
        lock(&self.script.activity).stop_calls
    }

    pub fn open_count(&self) -> usize {
        lock(&self.script.activity).open_count
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.script.activity).closed
    }
}
