//! Capture engine backed by nokhwa
//!
//! nokhwa cameras are not `Send`, so every opened device gets an actor thread
//! that creates and owns the camera. Requests reach it over a channel; while
//! a preview runs the actor interleaves request handling with frame reads and
//! reports start, stop, frames and errors through the session callbacks.

use super::{CaptureDevice, CaptureEngine};
use crate::errors::{DeviceFault, FaultCategory};
use crate::session::{lock, EngineCallbacks};
use crate::timing::FrameClock;
use crate::types::{
    CameraDeviceInfo, Frame, FrameRate, MediaTypeDescriptor, PixelFormat, StreamPurpose,
};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{query, Camera, NokhwaError};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a caller waits for the device thread to answer a request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// nokhwa exposes a single stream per device.
const STREAM_INDEX: u32 = 0;

pub struct NokhwaEngine {
    backend: ApiBackend,
}

impl NokhwaEngine {
    pub fn new() -> Self {
        Self {
            backend: ApiBackend::Auto,
        }
    }

    pub fn with_backend(backend: ApiBackend) -> Self {
        Self { backend }
    }
}

impl Default for NokhwaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureEngine for NokhwaEngine {
    fn name(&self) -> &str {
        "nokhwa"
    }

    fn list_devices(&self) -> Result<Vec<CameraDeviceInfo>, DeviceFault> {
        let cameras = query(self.backend).map_err(|e| fault(FaultCategory::Other, &e))?;
        log::debug!("Found {} cameras using {:?} backend", cameras.len(), self.backend);

        Ok(cameras
            .into_iter()
            .map(|info| {
                CameraDeviceInfo::new(info.index().to_string(), info.human_name())
                    .with_description(info.description().to_string())
            })
            .collect())
    }

    fn open_device(&self, device_id: &str) -> Result<Box<dyn CaptureDevice>, DeviceFault> {
        let index = device_id.parse::<u32>().map_err(|_| {
            DeviceFault::new(
                FaultCategory::Unsupported,
                format!("invalid device id {:?}, expected a camera index", device_id),
            )
        })?;

        let (requests, inbox) = unbounded();
        let (opened_tx, opened_rx) = bounded(1);
        let thread = std::thread::Builder::new()
            .name(format!("camera-bridge-device-{}", index))
            .spawn(move || device_thread(index, inbox, opened_tx))
            .map_err(|e| {
                DeviceFault::new(FaultCategory::Other, format!("failed to spawn device thread: {}", e))
            })?;

        match opened_rx.recv_timeout(REQUEST_TIMEOUT) {
            Ok(Ok(())) => Ok(Box::new(NokhwaDevice {
                device_id: device_id.to_string(),
                requests,
                thread: Mutex::new(Some(thread)),
            })),
            Ok(Err(fault)) => {
                let _ = thread.join();
                Err(fault)
            }
            Err(_) => Err(DeviceFault::new(
                FaultCategory::Timeout,
                format!("camera {} did not open within {:?}", index, REQUEST_TIMEOUT),
            )),
        }
    }
}

type Reply<T> = Sender<Result<T, DeviceFault>>;

enum Request {
    NativeTypes(Reply<Vec<MediaTypeDescriptor>>),
    Current(Reply<Option<MediaTypeDescriptor>>),
    Apply(MediaTypeDescriptor, Reply<()>),
    Start(EngineCallbacks, Reply<()>),
    Stop(Reply<()>),
    Close,
}

struct NokhwaDevice {
    device_id: String,
    requests: Sender<Request>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl NokhwaDevice {
    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, DeviceFault> {
        let (tx, rx) = bounded(1);
        self.requests.send(make(tx)).map_err(|_| {
            DeviceFault::new(
                FaultCategory::Disconnected,
                format!("device thread for {} has exited", self.device_id),
            )
        })?;

        match rx.recv_timeout(REQUEST_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DeviceFault::new(
                FaultCategory::Timeout,
                format!("device {} did not answer within {:?}", self.device_id, REQUEST_TIMEOUT),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceFault::new(
                FaultCategory::Disconnected,
                format!("device thread for {} exited mid-request", self.device_id),
            )),
        }
    }
}

impl CaptureDevice for NokhwaDevice {
    fn resolve_stream(&self, _purpose: StreamPurpose) -> Result<u32, DeviceFault> {
        Ok(STREAM_INDEX)
    }

    fn native_media_types(
        &self,
        stream_index: u32,
    ) -> Result<Vec<MediaTypeDescriptor>, DeviceFault> {
        check_stream(stream_index)?;
        self.call(Request::NativeTypes)
    }

    fn current_media_type(
        &self,
        stream_index: u32,
    ) -> Result<Option<MediaTypeDescriptor>, DeviceFault> {
        check_stream(stream_index)?;
        self.call(Request::Current)
    }

    fn set_current_media_type(
        &self,
        stream_index: u32,
        media_type: &MediaTypeDescriptor,
    ) -> Result<(), DeviceFault> {
        check_stream(stream_index)?;
        let media_type = media_type.clone();
        self.call(move |reply| Request::Apply(media_type, reply))
    }

    fn start_preview(
        &self,
        stream_index: u32,
        callbacks: EngineCallbacks,
    ) -> Result<(), DeviceFault> {
        check_stream(stream_index)?;
        self.call(move |reply| Request::Start(callbacks, reply))
    }

    fn stop_preview(&self) -> Result<(), DeviceFault> {
        self.call(Request::Stop)
    }

    fn close(&self) {
        let _ = self.requests.send(Request::Close);
        if let Some(handle) = lock(&self.thread).take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn check_stream(stream_index: u32) -> Result<(), DeviceFault> {
    if stream_index == STREAM_INDEX {
        Ok(())
    } else {
        Err(DeviceFault::new(
            FaultCategory::Unsupported,
            format!("stream {} does not exist", stream_index),
        ))
    }
}

fn fault(category: FaultCategory, error: &NokhwaError) -> DeviceFault {
    DeviceFault::from_message(category, error.to_string())
}

struct Streaming {
    callbacks: EngineCallbacks,
    clock: FrameClock,
}

fn device_thread(index: u32, inbox: Receiver<Request>, opened: Sender<Result<(), DeviceFault>>) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
    let mut camera = match Camera::new(CameraIndex::Index(index), requested) {
        Ok(camera) => {
            let _ = opened.send(Ok(()));
            camera
        }
        Err(e) => {
            log::error!("Failed to open camera {}: {}", index, e);
            let _ = opened.send(Err(fault(FaultCategory::DeviceBusy, &e)));
            return;
        }
    };
    log::debug!("Device thread for camera {} running", index);

    let mut streaming: Option<Streaming> = None;
    loop {
        let request = if streaming.is_some() {
            match inbox.try_recv() {
                Ok(request) => Some(request),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match inbox.recv() {
                Ok(request) => Some(request),
                Err(_) => break,
            }
        };

        match request {
            Some(Request::Close) => break,
            Some(request) => handle_request(&mut camera, &mut streaming, request),
            None => {
                if let Some(active) = &streaming {
                    if let Err(fault) = read_frame(&mut camera, active) {
                        log::error!("Frame read failed on camera {}: {}", index, fault);
                        if let Some(failed) = streaming.take() {
                            let _ = camera.stop_stream();
                            failed.callbacks.error(fault);
                        }
                    }
                }
            }
        }
    }

    if let Some(active) = streaming.take() {
        let _ = camera.stop_stream();
        active.callbacks.stopped();
    }
    log::debug!("Device thread for camera {} exiting", index);
}

fn handle_request(camera: &mut Camera, streaming: &mut Option<Streaming>, request: Request) {
    match request {
        Request::NativeTypes(reply) => {
            let result = camera
                .compatible_camera_formats()
                .map(|formats| formats.iter().map(descriptor_from).collect())
                .map_err(|e| fault(FaultCategory::Other, &e));
            let _ = reply.send(result);
        }
        Request::Current(reply) => {
            let _ = reply.send(Ok(Some(descriptor_from(&camera.camera_format()))));
        }
        Request::Apply(media_type, reply) => {
            let _ = reply.send(apply(camera, &media_type));
        }
        Request::Start(callbacks, reply) => {
            if streaming.is_some() {
                let _ = reply.send(Err(DeviceFault::new(
                    FaultCategory::DeviceBusy,
                    "preview is already running",
                )));
                return;
            }
            // Accepted; the outcome is reported through the callbacks.
            let _ = reply.send(Ok(()));
            match camera.open_stream() {
                Ok(()) => {
                    callbacks.started();
                    *streaming = Some(Streaming {
                        callbacks,
                        clock: FrameClock::new(),
                    });
                }
                Err(e) => callbacks.start_failed(fault(FaultCategory::DeviceBusy, &e)),
            }
        }
        Request::Stop(reply) => match streaming.take() {
            Some(active) => {
                let stopped = camera.stop_stream();
                match stopped {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                        active.callbacks.stopped();
                    }
                    Err(e) => {
                        let _ = reply.send(Err(fault(FaultCategory::Other, &e)));
                    }
                }
            }
            None => {
                let _ = reply.send(Err(DeviceFault::new(
                    FaultCategory::Other,
                    "preview is not running",
                )));
            }
        },
        Request::Close => {}
    }
}

fn apply(camera: &mut Camera, media_type: &MediaTypeDescriptor) -> Result<(), DeviceFault> {
    let frame_format = frame_format_for(media_type.pixel_format).ok_or_else(|| {
        DeviceFault::new(
            FaultCategory::Unsupported,
            format!("{} cannot be requested through nokhwa", media_type.pixel_format),
        )
    })?;
    let fps = media_type.frame_rate.as_f64().round() as u32;
    let format = CameraFormat::new(
        Resolution::new(media_type.width, media_type.height),
        frame_format,
        fps,
    );

    let applied = camera
        .set_camera_requset(RequestedFormat::new::<RgbFormat>(RequestedFormatType::Exact(
            format,
        )))
        .map_err(|e| fault(FaultCategory::FormatRejected, &e))?;

    if applied != format {
        return Err(DeviceFault::new(
            FaultCategory::FormatRejected,
            format!("requested {} but the device settled on {}", format, applied),
        ));
    }
    Ok(())
}

fn read_frame(camera: &mut Camera, active: &Streaming) -> Result<(), DeviceFault> {
    let buffer = camera
        .frame()
        .map_err(|e| fault(FaultCategory::Disconnected, &e))?;
    let timestamp_ticks = active.clock.ticks();
    let resolution = buffer.resolution();

    match buffer.decode_image::<RgbFormat>() {
        Ok(image) => {
            let frame = Frame {
                width: image.width(),
                height: image.height(),
                pixel_format: PixelFormat::Rgb24,
                timestamp_ticks,
                buffer: image.as_raw(),
            };
            active.callbacks.frame(&frame);
        }
        Err(e) => {
            log::debug!("Passing undecoded frame through: {}", e);
            let frame = Frame {
                width: resolution.width(),
                height: resolution.height(),
                pixel_format: pixel_format_from(buffer.source_frame_format()),
                timestamp_ticks,
                buffer: buffer.buffer(),
            };
            active.callbacks.frame(&frame);
        }
    }
    Ok(())
}

fn descriptor_from(format: &CameraFormat) -> MediaTypeDescriptor {
    MediaTypeDescriptor::new(
        format.width(),
        format.height(),
        FrameRate::fps(format.frame_rate()),
        pixel_format_from(format.format()),
    )
    .with_stream_index(STREAM_INDEX)
}

fn pixel_format_from(format: FrameFormat) -> PixelFormat {
    match format {
        FrameFormat::MJPEG => PixelFormat::Mjpeg,
        FrameFormat::YUYV => PixelFormat::Yuy2,
        FrameFormat::NV12 => PixelFormat::Nv12,
        FrameFormat::GRAY => PixelFormat::Gray8,
        FrameFormat::RAWRGB => PixelFormat::Rgb24,
        #[allow(unreachable_patterns)]
        _ => PixelFormat::Unknown(0),
    }
}

fn frame_format_for(format: PixelFormat) -> Option<FrameFormat> {
    match format {
        PixelFormat::Mjpeg => Some(FrameFormat::MJPEG),
        PixelFormat::Yuy2 => Some(FrameFormat::YUYV),
        PixelFormat::Nv12 => Some(FrameFormat::NV12),
        PixelFormat::Gray8 => Some(FrameFormat::GRAY),
        PixelFormat::Rgb24 => Some(FrameFormat::RAWRGB),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_formats_map_both_ways() {
        for format in [
            PixelFormat::Mjpeg,
            PixelFormat::Yuy2,
            PixelFormat::Nv12,
            PixelFormat::Gray8,
            PixelFormat::Rgb24,
        ] {
            let frame_format = frame_format_for(format).unwrap();
            assert_eq!(pixel_format_from(frame_format), format);
        }
        assert_eq!(frame_format_for(PixelFormat::H264), None);
    }

    #[test]
    fn test_descriptor_from_camera_format() {
        let format = CameraFormat::new(Resolution::new(1280, 720), FrameFormat::MJPEG, 30);
        let descriptor = descriptor_from(&format);
        assert_eq!(descriptor.width, 1280);
        assert_eq!(descriptor.height, 720);
        assert_eq!(descriptor.frame_rate, FrameRate::fps(30));
        assert!(descriptor.is_compressed);
    }

    #[test]
    fn test_non_index_device_id_is_rejected() {
        let err = NokhwaEngine::new()
            .open_device("front-camera")
            .err()
            .unwrap();
        assert_eq!(err.category, FaultCategory::Unsupported);
    }
}
