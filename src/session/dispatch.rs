//! Frame and lifecycle hand-off from engine threads to the consumer.
//!
//! Engine callbacks only copy a frame and push it onto a bounded drop-oldest
//! queue; a dedicated dispatch thread pops it and runs the registered
//! [`FrameSink`]. Lifecycle events share the thread but are never dropped.

use super::state::{Generation, StopOutcome};
use super::lock;
use crate::errors::CaptureError;
use crate::types::{Frame, MediaTypeDescriptor, PixelFormat};
use bytes::Bytes;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Consumer of preview output. Called on the session's dispatch thread.
pub trait FrameSink: Send + Sync {
    /// The frame buffer is only valid for the duration of this call.
    fn on_frame(&self, frame: &Frame<'_>);

    fn on_event(&self, _event: &PreviewEvent) {}
}

impl<F> FrameSink for F
where
    F: Fn(&Frame<'_>) + Send + Sync,
{
    fn on_frame(&self, frame: &Frame<'_>) {
        self(frame)
    }
}

/// Lifecycle notifications relayed to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PreviewEvent {
    Starting {
        generation: Generation,
        media_type: MediaTypeDescriptor,
    },
    Started {
        generation: Generation,
        media_type: MediaTypeDescriptor,
    },
    Failed {
        generation: Generation,
        error: CaptureError,
    },
    Stopping {
        generation: Generation,
    },
    Disposed {
        generation: Generation,
        outcome: StopOutcome,
    },
}

/// Sink slot shared between a camera and its current session, so the sink
/// can be swapped without restarting the preview.
#[derive(Default)]
pub struct SinkRegistry {
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, sink: Arc<dyn FrameSink>) -> bool {
        self.sink
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(sink)
            .is_some()
    }

    pub fn clear(&self) {
        self.sink
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn current(&self) -> Option<Arc<dyn FrameSink>> {
        self.sink
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Owned copy of an engine frame waiting for dispatch.
pub(crate) struct QueuedFrame {
    pub generation: Generation,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub timestamp_ticks: i64,
    pub data: Bytes,
}

impl QueuedFrame {
    pub fn copy_from(generation: Generation, frame: &Frame<'_>) -> Self {
        Self {
            generation,
            width: frame.width,
            height: frame.height,
            pixel_format: frame.pixel_format,
            timestamp_ticks: frame.timestamp_ticks,
            data: Bytes::copy_from_slice(frame.buffer),
        }
    }

    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            timestamp_ticks: self.timestamp_ticks,
            buffer: &self.data,
        }
    }
}

pub(crate) enum DispatchItem {
    Event(PreviewEvent),
    Frame(QueuedFrame),
}

pub(crate) struct DispatchQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

struct QueueInner {
    events: VecDeque<PreviewEvent>,
    frames: VecDeque<QueuedFrame>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                events: VecDeque::new(),
                frames: VecDeque::with_capacity(capacity.min(64)),
                capacity: capacity.max(1),
                dropped: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn push_frame_drop_oldest(&self, frame: QueuedFrame) {
        let mut g = lock(&self.inner);
        if g.closed {
            return;
        }

        if g.frames.len() >= g.capacity {
            g.frames.pop_front();
            g.dropped = g.dropped.saturating_add(1);
            log::debug!("Frame queue full, dropped oldest frame ({} total)", g.dropped);
        }
        g.frames.push_back(frame);
        self.cv.notify_one();
    }

    pub fn push_event(&self, event: PreviewEvent) {
        let mut g = lock(&self.inner);
        if g.closed {
            return;
        }
        g.events.push_back(event);
        self.cv.notify_one();
    }

    /// Discard queued frames; events stay.
    pub fn clear_frames(&self) {
        lock(&self.inner).frames.clear();
    }

    /// Block until an item is available. `None` once closed and drained.
    pub fn pop(&self) -> Option<DispatchItem> {
        let mut g = lock(&self.inner);
        loop {
            if let Some(event) = g.events.pop_front() {
                return Some(DispatchItem::Event(event));
            }
            if let Some(frame) = g.frames.pop_front() {
                return Some(DispatchItem::Frame(frame));
            }
            if g.closed {
                return None;
            }
            g = self
                .cv
                .wait(g)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn dropped(&self) -> u64 {
        lock(&self.inner).dropped
    }

    /// Stop accepting items; queued events are still drained, frames are not.
    pub fn close(&self) {
        let mut g = lock(&self.inner);
        g.closed = true;
        g.frames.clear();
        self.cv.notify_all();
    }
}

/// The dispatch thread and the gate that fences sink invocations.
pub(crate) struct Dispatcher {
    pub queue: Arc<DispatchQueue>,
    delivery: Arc<Mutex<()>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: Mutex<Option<ThreadId>>,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(DispatchQueue::new(capacity)),
            delivery: Arc::new(Mutex::new(())),
            thread: Mutex::new(None),
            thread_id: Mutex::new(None),
        }
    }

    /// Spawn the dispatch thread. `deliverable` is consulted, with the
    /// delivery gate held, right before each frame reaches the sink.
    pub fn spawn<D>(
        &self,
        name: String,
        sinks: Arc<SinkRegistry>,
        deliverable: D,
    ) -> std::io::Result<()>
    where
        D: Fn(Generation) -> bool + Send + 'static,
    {
        let queue = self.queue.clone();
        let delivery = self.delivery.clone();
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || dispatch_loop(queue, delivery, sinks, deliverable))?;

        *lock(&self.thread_id) = Some(handle.thread().id());
        *lock(&self.thread) = Some(handle);
        Ok(())
    }

    pub fn is_dispatch_thread(&self) -> bool {
        *lock(&self.thread_id) == Some(std::thread::current().id())
    }

    /// Wait for an in-flight sink call to return.
    ///
    /// No-op on the dispatch thread itself, where a sink may call back into
    /// the session.
    pub fn fence(&self) {
        if !self.is_dispatch_thread() {
            drop(lock(&self.delivery));
        }
    }

    /// Close the queue and join the thread, giving up after `join_timeout`.
    pub fn shutdown(&self, join_timeout: Duration) {
        self.queue.close();

        if self.is_dispatch_thread() {
            // Called from a sink: the loop exits on its own once the call returns.
            return;
        }

        let Some(handle) = lock(&self.thread).take() else {
            return;
        };

        let start = Instant::now();
        let mut handle = Some(handle);
        loop {
            if handle.as_ref().is_some_and(|h| h.is_finished()) {
                if let Some(h) = handle.take() {
                    let _ = h.join();
                }
                break;
            }
            if start.elapsed() >= join_timeout {
                // Best-effort: a sink stuck in consumer code must not hang disposal.
                log::warn!(
                    "Frame dispatcher did not finish within {:?}; detaching it",
                    join_timeout
                );
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

fn dispatch_loop<D>(
    queue: Arc<DispatchQueue>,
    delivery: Arc<Mutex<()>>,
    sinks: Arc<SinkRegistry>,
    deliverable: D,
) where
    D: Fn(Generation) -> bool,
{
    while let Some(item) = queue.pop() {
        let _gate = lock(&delivery);
        let Some(sink) = sinks.current() else {
            continue;
        };

        match item {
            DispatchItem::Event(event) => {
                invoke(|| sink.on_event(&event));
            }
            DispatchItem::Frame(queued) => {
                if !deliverable(queued.generation) {
                    continue;
                }
                let frame = queued.as_frame();
                invoke(|| sink.on_frame(&frame));
            }
        }
    }
    log::debug!("Frame dispatcher exiting");
}

fn invoke(f: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        log::error!("Frame sink panicked; continuing dispatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(generation: u64, value: u8) -> QueuedFrame {
        let data = [value; 4];
        let f = Frame {
            width: 2,
            height: 1,
            pixel_format: PixelFormat::Gray8,
            timestamp_ticks: value as i64,
            buffer: &data,
        };
        QueuedFrame::copy_from(Generation(generation), &f)
    }

    #[test]
    fn test_queue_drops_oldest_frames() {
        let queue = DispatchQueue::new(2);
        queue.push_frame_drop_oldest(frame(1, 1));
        queue.push_frame_drop_oldest(frame(1, 2));
        queue.push_frame_drop_oldest(frame(1, 3));
        assert_eq!(queue.dropped(), 1);

        match queue.pop() {
            Some(DispatchItem::Frame(f)) => assert_eq!(f.timestamp_ticks, 2),
            _ => panic!("expected frame"),
        }
    }

    #[test]
    fn test_events_are_popped_before_frames() {
        let queue = DispatchQueue::new(2);
        queue.push_frame_drop_oldest(frame(1, 1));
        queue.push_event(PreviewEvent::Stopping {
            generation: Generation(1),
        });
        assert!(matches!(queue.pop(), Some(DispatchItem::Event(_))));
        assert!(matches!(queue.pop(), Some(DispatchItem::Frame(_))));
    }

    #[test]
    fn test_close_drains_events_but_not_frames() {
        let queue = DispatchQueue::new(2);
        queue.push_frame_drop_oldest(frame(1, 1));
        queue.push_event(PreviewEvent::Stopping {
            generation: Generation(1),
        });
        queue.close();
        assert!(matches!(queue.pop(), Some(DispatchItem::Event(_))));
        assert!(queue.pop().is_none());
        queue.push_event(PreviewEvent::Stopping {
            generation: Generation(2),
        });
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_sink_registry_replace_reports_previous() {
        let registry = SinkRegistry::new();
        assert!(!registry.set(Arc::new(|_: &Frame<'_>| {})));
        assert!(registry.set(Arc::new(|_: &Frame<'_>| {})));
        registry.clear();
        assert!(registry.current().is_none());
    }

    #[test]
    fn test_dispatcher_delivers_only_deliverable_generations() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sinks = Arc::new(SinkRegistry::new());
        let sink_received = received.clone();
        sinks.set(Arc::new(move |f: &Frame<'_>| {
            sink_received.lock().unwrap().push(f.timestamp_ticks);
        }));

        let dispatcher = Dispatcher::new(8);
        dispatcher
            .spawn("test-dispatch".to_string(), sinks, |g| g == Generation(2))
            .unwrap();
        dispatcher.queue.push_frame_drop_oldest(frame(1, 10));
        dispatcher.queue.push_frame_drop_oldest(frame(2, 20));

        let deadline = Instant::now() + Duration::from_secs(2);
        while received.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        dispatcher.shutdown(Duration::from_secs(1));
        assert_eq!(*received.lock().unwrap(), vec![20]);
    }
}
