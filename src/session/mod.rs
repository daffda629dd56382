//! Preview session lifecycle
//!
//! A [`PreviewSession`] drives one preview of one camera through
//! `Idle -> Starting -> Running -> Stopping -> Disposed` (with `Failed` as the
//! detour for engine errors). Engine completions arrive through
//! [`EngineCallbacks`] tagged with the generation of the start they belong to;
//! anything tagged with an older generation is dropped.

pub mod dispatch;
pub mod state;

pub use dispatch::{FrameSink, PreviewEvent, SinkRegistry};
pub use state::{Generation, GenerationCounter, PreviewState, StopOutcome};

use crate::config::SessionConfig;
use crate::errors::{CaptureError, DeviceFault, ErrorPayload, FaultCategory, Stage};
use crate::platform::DeviceHandle;
use crate::types::{Frame, MediaTypeDescriptor};
use chrono::{DateTime, Utc};
use dispatch::{Dispatcher, QueuedFrame};
use serde::Serialize;
use std::fmt;
use crossbeam_channel::RecvTimeoutError;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Core {
    state: PreviewState,
    generation: Generation,
    media_type: Option<MediaTypeDescriptor>,
    failure: Option<CaptureError>,
    stop_acknowledged: bool,
    stop_outcome: Option<StopOutcome>,
    frames_delivered: u64,
    started_at: Option<DateTime<Utc>>,
}

struct Shared {
    camera_id: String,
    core: Mutex<Core>,
    changed: Condvar,
    dispatcher: Dispatcher,
}

impl Shared {
    fn media_type_label(core: &Core) -> String {
        core.media_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "<none>".to_string())
    }

    /// Move a live session to `Failed`. Caller holds the core lock.
    fn fail_locked(&self, core: &mut Core, error: CaptureError) {
        log::error!(
            "Preview session on {} failed ({}): {}",
            self.camera_id,
            core.generation,
            error
        );
        core.state = PreviewState::Failed;
        core.failure = Some(error.clone());
        self.dispatcher.queue.clear_frames();
        self.dispatcher.queue.push_event(PreviewEvent::Failed {
            generation: core.generation,
            error,
        });
        self.changed.notify_all();
    }

    /// Move to `Disposed`. Caller holds the core lock.
    fn finish_locked(&self, core: &mut Core, outcome: StopOutcome) {
        core.state = PreviewState::Disposed;
        core.stop_outcome = Some(outcome);
        self.dispatcher.queue.clear_frames();
        self.dispatcher.queue.push_event(PreviewEvent::Disposed {
            generation: core.generation,
            outcome,
        });
        self.changed.notify_all();
        log::info!(
            "Preview session on {} disposed ({}, {:?})",
            self.camera_id,
            core.generation,
            outcome
        );
    }
}

/// Completion and frame callbacks handed to the engine for one start attempt.
///
/// Cheap to clone and safe to call from any thread. Calls made after the
/// session moved on to a newer generation, or after it was dropped, are
/// ignored.
#[derive(Clone)]
pub struct EngineCallbacks {
    shared: Weak<Shared>,
    generation: Generation,
}

impl fmt::Debug for EngineCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EngineCallbacks")
            .field("generation", &self.generation)
            .field("attached", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl EngineCallbacks {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether these callbacks still belong to the session's current start.
    pub fn is_current(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| lock(&shared.core).generation == self.generation)
            .unwrap_or(false)
    }

    /// Run `f` with the core lock held, if this generation is still current.
    fn with_current<F>(&self, what: &str, f: F)
    where
        F: FnOnce(&Shared, &mut Core),
    {
        let Some(shared) = self.shared.upgrade() else {
            log::debug!("Discarding {} for {}: session is gone", what, self.generation);
            return;
        };
        let mut core = lock(&shared.core);
        if core.generation != self.generation {
            log::debug!(
                "Discarding stale {} for {} on {} (current {})",
                what,
                self.generation,
                shared.camera_id,
                core.generation
            );
            return;
        }
        f(&*shared, &mut *core);
    }

    /// The engine reports that preview is running.
    pub fn started(&self) {
        self.with_current("start completion", |shared, core| match core.state {
            PreviewState::Starting => {
                core.state = PreviewState::Running;
                core.started_at = Some(Utc::now());
                log::info!(
                    "Preview running on {} ({}, {})",
                    shared.camera_id,
                    core.generation,
                    Shared::media_type_label(core)
                );
                if let Some(media_type) = core.media_type.clone() {
                    shared.dispatcher.queue.push_event(PreviewEvent::Started {
                        generation: core.generation,
                        media_type,
                    });
                }
                shared.changed.notify_all();
            }
            other => log::debug!(
                "Ignoring start completion on {} in state {}",
                shared.camera_id,
                other
            ),
        });
    }

    /// The engine could not start preview.
    pub fn start_failed(&self, fault: DeviceFault) {
        self.with_current("start failure", |shared, core| match core.state {
            PreviewState::Starting => {
                let error = CaptureError::PreviewStartFailed {
                    media_type: Shared::media_type_label(core),
                    fault,
                };
                shared.fail_locked(core, error);
            }
            PreviewState::Stopping => {
                // Nothing is running, so nothing is left to stop.
                core.stop_acknowledged = true;
                shared.changed.notify_all();
            }
            other => log::debug!(
                "Ignoring start failure on {} in state {}: {}",
                shared.camera_id,
                other,
                fault
            ),
        });
    }

    /// Hand a frame to the session. The buffer is copied before this returns.
    pub fn frame(&self, frame: &Frame<'_>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if !deliverable(&lock(&shared.core), self.generation) {
            return;
        }

        let queued = QueuedFrame::copy_from(self.generation, frame);

        // Re-checked under the lock so nothing is queued once a stop began.
        let core = lock(&shared.core);
        if deliverable(&core, self.generation) {
            shared.dispatcher.queue.push_frame_drop_oldest(queued);
        }
    }

    /// The engine hit a runtime error.
    pub fn error(&self, fault: DeviceFault) {
        self.with_current("engine error", |shared, core| match core.state {
            PreviewState::Starting => {
                let error = CaptureError::PreviewStartFailed {
                    media_type: Shared::media_type_label(core),
                    fault,
                };
                shared.fail_locked(core, error);
            }
            PreviewState::Running => {
                let error = CaptureError::DeviceUnavailable {
                    stage: Stage::Stream,
                    device_id: shared.camera_id.clone(),
                    reason: "engine reported a streaming error".to_string(),
                    fault: Some(fault),
                };
                shared.fail_locked(core, error);
            }
            other => log::warn!(
                "Engine error on {} in state {}: {}",
                shared.camera_id,
                other,
                fault
            ),
        });
    }

    /// The engine acknowledges that preview stopped.
    pub fn stopped(&self) {
        self.with_current("stop acknowledgement", |shared, core| match core.state {
            PreviewState::Stopping => {
                core.stop_acknowledged = true;
                shared.changed.notify_all();
            }
            PreviewState::Starting | PreviewState::Running => {
                let error = CaptureError::DeviceUnavailable {
                    stage: Stage::Stream,
                    device_id: shared.camera_id.clone(),
                    reason: "engine stopped the preview unexpectedly".to_string(),
                    fault: None,
                };
                shared.fail_locked(core, error);
            }
            other => log::debug!(
                "Ignoring stop acknowledgement on {} in state {}",
                shared.camera_id,
                other
            ),
        });
    }
}

fn deliverable(core: &Core, generation: Generation) -> bool {
    core.state == PreviewState::Running && core.generation == generation
}

/// Snapshot of a session for callers and the application framework.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewStatus {
    pub session_id: Uuid,
    pub camera_id: String,
    pub state: PreviewState,
    pub generation: Generation,
    pub media_type: Option<MediaTypeDescriptor>,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub last_error: Option<ErrorPayload>,
    pub started_at: Option<DateTime<Utc>>,
    pub stop_outcome: Option<StopOutcome>,
}

/// One preview run of one camera.
pub struct PreviewSession {
    id: Uuid,
    shared: Arc<Shared>,
    device: Arc<DeviceHandle>,
    generations: Arc<GenerationCounter>,
    config: SessionConfig,
}

impl PreviewSession {
    /// Create an idle session and spawn its frame dispatcher.
    pub fn new(
        device: Arc<DeviceHandle>,
        generations: Arc<GenerationCounter>,
        sinks: Arc<SinkRegistry>,
        config: SessionConfig,
    ) -> Result<Self, CaptureError> {
        let camera_id = device.device_id().to_string();
        let shared = Arc::new(Shared {
            camera_id: camera_id.clone(),
            core: Mutex::new(Core {
                state: PreviewState::Idle,
                generation: generations.last(),
                media_type: None,
                failure: None,
                stop_acknowledged: false,
                stop_outcome: None,
                frames_delivered: 0,
                started_at: None,
            }),
            changed: Condvar::new(),
            dispatcher: Dispatcher::new(config.frame_queue_capacity),
        });

        let weak = Arc::downgrade(&shared);
        shared
            .dispatcher
            .spawn(
                format!("camera-bridge-dispatch-{}", camera_id),
                sinks,
                move |generation| {
                    let Some(shared) = weak.upgrade() else {
                        return false;
                    };
                    let mut core = lock(&shared.core);
                    let ok = deliverable(&core, generation);
                    if ok {
                        core.frames_delivered += 1;
                    }
                    ok
                },
            )
            .map_err(|e| CaptureError::DeviceUnavailable {
                stage: Stage::Start,
                device_id: camera_id.clone(),
                reason: format!("failed to spawn frame dispatcher: {}", e),
                fault: None,
            })?;

        let id = Uuid::new_v4();
        log::debug!("Created preview session {} for {}", id, camera_id);
        Ok(Self {
            id,
            shared,
            device,
            generations,
            config,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn camera_id(&self) -> &str {
        &self.shared.camera_id
    }

    pub fn state(&self) -> PreviewState {
        lock(&self.shared.core).state
    }

    pub fn generation(&self) -> Generation {
        lock(&self.shared.core).generation
    }

    pub fn media_type(&self) -> Option<MediaTypeDescriptor> {
        lock(&self.shared.core).media_type.clone()
    }

    pub fn last_error(&self) -> Option<CaptureError> {
        lock(&self.shared.core).failure.clone()
    }

    /// Ask the engine to start preview with `media_type` on `stream_index`.
    ///
    /// Returns once the request is accepted; use [`wait_for_start`] to wait
    /// for the engine's completion.
    ///
    /// [`wait_for_start`]: PreviewSession::wait_for_start
    pub fn start(
        &self,
        media_type: &MediaTypeDescriptor,
        stream_index: u32,
    ) -> Result<Generation, CaptureError> {
        let generation = {
            let mut core = lock(&self.shared.core);
            crate::check_invariant!(
                core.state == PreviewState::Idle,
                Stage::Start,
                "preview starts only from idle"
            )?;

            let generation = self.generations.advance();
            crate::check_invariant!(
                generation > core.generation,
                Stage::Start,
                "generation strictly increases on start"
            )?;

            core.generation = generation;
            core.state = PreviewState::Starting;
            core.media_type = Some(media_type.clone());
            core.failure = None;
            core.stop_acknowledged = false;
            self.shared.dispatcher.queue.push_event(PreviewEvent::Starting {
                generation,
                media_type: media_type.clone(),
            });
            generation
        };

        log::info!(
            "Starting preview on {} with {} ({})",
            self.shared.camera_id,
            media_type,
            generation
        );

        let callbacks = EngineCallbacks {
            shared: Arc::downgrade(&self.shared),
            generation,
        };
        if let Err(fault) = self.device.device().start_preview(stream_index, callbacks) {
            let error = CaptureError::PreviewStartFailed {
                media_type: media_type.to_string(),
                fault,
            };
            let mut core = lock(&self.shared.core);
            if core.generation == generation && core.state == PreviewState::Starting {
                self.shared.fail_locked(&mut core, error.clone());
            }
            return Err(error);
        }

        Ok(generation)
    }

    /// Wait until the engine reports the outcome of the last start.
    pub fn wait_for_start(&self, timeout: Duration) -> Result<(), CaptureError> {
        let core = lock(&self.shared.core);
        let (mut core, _) = self
            .shared
            .changed
            .wait_timeout_while(core, timeout, |c| c.state == PreviewState::Starting)
            .unwrap_or_else(PoisonError::into_inner);

        let state = core.state;
        match state {
            PreviewState::Running => Ok(()),
            PreviewState::Failed => Err(core.failure.clone().unwrap_or_else(|| {
                CaptureError::PreviewStartFailed {
                    media_type: Shared::media_type_label(&core),
                    fault: DeviceFault::new(FaultCategory::Other, "preview failed to start"),
                }
            })),
            PreviewState::Starting => {
                let error = CaptureError::PreviewStartFailed {
                    media_type: Shared::media_type_label(&core),
                    fault: DeviceFault::new(
                        FaultCategory::Timeout,
                        format!(
                            "engine did not report a start within {} ms",
                            timeout.as_millis()
                        ),
                    ),
                };
                self.shared.fail_locked(&mut core, error.clone());
                Err(error)
            }
            other => Err(CaptureError::PreviewStartFailed {
                media_type: Shared::media_type_label(&core),
                fault: DeviceFault::new(
                    FaultCategory::Other,
                    format!("preview was {} before start completed", other),
                ),
            }),
        }
    }

    /// Stop preview and dispose the session.
    ///
    /// Always ends in `Disposed`. An engine that never acknowledges the stop
    /// yields `Err(PreviewStopTimedOut)`, which is soft: resources are
    /// released at the deadline anyway. Calling stop again is a no-op.
    pub fn stop(&self) -> Result<StopOutcome, CaptureError> {
        let generation = {
            let mut core = lock(&self.shared.core);
            let state = core.state;
            match state {
                PreviewState::Idle => {
                    self.shared.finish_locked(&mut core, StopOutcome::NotStarted);
                    return Ok(StopOutcome::NotStarted);
                }
                PreviewState::Disposed => return Ok(StopOutcome::AlreadyDisposed),
                PreviewState::Stopping => {
                    drop(core);
                    return self.wait_for_other_stop();
                }
                PreviewState::Failed => {
                    drop(core);
                    return Ok(self.release_failed());
                }
                PreviewState::Starting | PreviewState::Running => {
                    core.state = PreviewState::Stopping;
                    core.stop_acknowledged = false;
                    self.shared
                        .dispatcher
                        .queue
                        .push_event(PreviewEvent::Stopping {
                            generation: core.generation,
                        });
                    core.generation
                }
            }
        };

        log::info!("Stopping preview on {} ({})", self.shared.camera_id, generation);

        // One deadline covers the engine request and its acknowledgement.
        let timeout = self.config.stop_timeout();
        let deadline = Instant::now() + timeout;

        self.shared.dispatcher.queue.clear_frames();
        self.shared.dispatcher.fence();

        match self.request_stop(deadline) {
            Some(Err(fault)) => {
                log::warn!(
                    "Engine refused preview stop on {}: {}; releasing anyway",
                    self.shared.camera_id,
                    fault
                );
                let mut core = lock(&self.shared.core);
                if core.stop_acknowledged {
                    self.shared.finish_locked(&mut core, StopOutcome::Acknowledged);
                    return Ok(StopOutcome::Acknowledged);
                }
                self.shared.finish_locked(&mut core, StopOutcome::Released);
                return Ok(StopOutcome::Released);
            }
            Some(Ok(())) => {}
            None => log::warn!(
                "Engine stop request on {} still blocked after {:?}",
                self.shared.camera_id,
                timeout
            ),
        }

        let core = lock(&self.shared.core);
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (mut core, _) = self
            .shared
            .changed
            .wait_timeout_while(core, remaining, |c| {
                c.state == PreviewState::Stopping && !c.stop_acknowledged
            })
            .unwrap_or_else(PoisonError::into_inner);

        if core.state != PreviewState::Stopping {
            return Ok(core.stop_outcome.unwrap_or(StopOutcome::AlreadyDisposed));
        }

        if core.stop_acknowledged {
            self.shared.finish_locked(&mut core, StopOutcome::Acknowledged);
            Ok(StopOutcome::Acknowledged)
        } else {
            log::warn!(
                "Engine did not acknowledge preview stop on {} within {:?}; disposing",
                self.shared.camera_id,
                timeout
            );
            self.shared.finish_locked(&mut core, StopOutcome::TimedOut);
            Err(CaptureError::PreviewStopTimedOut {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    /// Send the engine stop from a helper thread and wait for its answer
    /// until `deadline`. `None` means the engine is still blocked in the call;
    /// the helper thread finishes on its own.
    fn request_stop(&self, deadline: Instant) -> Option<Result<(), DeviceFault>> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let device = self.device.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("camera-bridge-stop-{}", self.shared.camera_id))
            .spawn(move || {
                let _ = reply_tx.send(device.device().stop_preview());
            });
        if let Err(e) = spawned {
            log::warn!(
                "Failed to spawn stop thread for {}: {}; stopping inline",
                self.shared.camera_id,
                e
            );
            return Some(self.device.device().stop_preview());
        }

        match reply_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(DeviceFault::new(
                FaultCategory::Other,
                "engine stop request panicked",
            ))),
        }
    }

    fn wait_for_other_stop(&self) -> Result<StopOutcome, CaptureError> {
        let timeout = self.config.stop_timeout();
        let core = lock(&self.shared.core);
        let (core, _) = self
            .shared
            .changed
            .wait_timeout_while(core, timeout, |c| c.state != PreviewState::Disposed)
            .unwrap_or_else(PoisonError::into_inner);

        if core.state == PreviewState::Disposed {
            Ok(StopOutcome::AlreadyDisposed)
        } else {
            Err(CaptureError::PreviewStopTimedOut {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    fn release_failed(&self) -> StopOutcome {
        // The engine may still be streaming after a runtime error.
        self.shared.dispatcher.fence();
        let deadline = Instant::now() + self.config.stop_timeout();
        match self.request_stop(deadline) {
            Some(Ok(())) => {}
            Some(Err(fault)) => log::debug!(
                "Best-effort stop after failure on {}: {}",
                self.shared.camera_id,
                fault
            ),
            None => log::warn!(
                "Best-effort stop after failure on {} is still blocked; releasing",
                self.shared.camera_id
            ),
        }
        let mut core = lock(&self.shared.core);
        if core.state == PreviewState::Disposed {
            return StopOutcome::AlreadyDisposed;
        }
        self.shared.finish_locked(&mut core, StopOutcome::Released);
        StopOutcome::Released
    }

    /// Stop if needed, then shut the frame dispatcher down.
    ///
    /// Never fails: a stop timeout is reported as [`StopOutcome::TimedOut`].
    pub fn dispose(&self) -> StopOutcome {
        let outcome = match self.stop() {
            Ok(outcome) => outcome,
            Err(e) if e.is_soft() => StopOutcome::TimedOut,
            Err(e) => {
                log::error!("Stop failed during dispose of {}: {}", self.shared.camera_id, e);
                let mut core = lock(&self.shared.core);
                if core.state != PreviewState::Disposed {
                    self.shared.finish_locked(&mut core, StopOutcome::Released);
                }
                StopOutcome::Released
            }
        };

        self.shared
            .dispatcher
            .shutdown(self.config.dispatcher_join_timeout());
        outcome
    }

    pub fn status(&self) -> PreviewStatus {
        let core = lock(&self.shared.core);
        PreviewStatus {
            session_id: self.id,
            camera_id: self.shared.camera_id.clone(),
            state: core.state,
            generation: core.generation,
            media_type: core.media_type.clone(),
            frames_delivered: core.frames_delivered,
            frames_dropped: self.shared.dispatcher.queue.dropped(),
            last_error: core.failure.as_ref().map(CaptureError::payload),
            started_at: core.started_at,
            stop_outcome: core.stop_outcome,
        }
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        if !self.state().is_terminal() {
            log::debug!("Preview session {} dropped while live; disposing", self.id);
        }
        self.dispose();
    }
}

impl fmt::Debug for PreviewSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PreviewSession")
            .field("id", &self.id)
            .field("camera_id", &self.shared.camera_id)
            .field("state", &self.state())
            .finish()
    }
}
