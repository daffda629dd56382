//! End-to-end negotiation scenarios against the scripted engine.

use camera_bridge::errors::{
    CaptureErrorKind, DeviceFault, EliminatingConstraint, Stage, ERROR_GEN_FAILURE,
    MF_E_HW_MFT_FAILED_START_STREAMING,
};
use camera_bridge::testing::{
    synthetic_data, ScriptControl, ScriptedDevice, ScriptedEngine, StartBehavior,
};
use camera_bridge::{
    BridgeConfig, CaptureBridge, CaptureError, Frame, FrameRate, MediaTypeDescriptor, PixelFormat,
    PreviewSettings, PreviewState, ResolutionPreset, SelectionConstraints,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

fn bridge_with(devices: Vec<ScriptedDevice>) -> (Arc<ScriptedEngine>, CaptureBridge) {
    let engine = Arc::new(ScriptedEngine::new());
    for device in devices {
        engine.add_device(device);
    }
    let mut config = BridgeConfig::default();
    config.session.start_timeout_ms = 1000;
    config.session.stop_timeout_ms = 100;
    let bridge = CaptureBridge::new(engine.clone(), config);
    (engine, bridge)
}

#[test]
fn test_prefers_uncompressed_over_higher_resolution_compressed() {
    let (engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        vec![
            MediaTypeDescriptor::new(1920, 1080, FrameRate::fps(30), PixelFormat::Mjpeg),
            MediaTypeDescriptor::new(1280, 720, FrameRate::fps(60), PixelFormat::Nv12),
        ],
    )]);
    let camera = bridge.open("cam0").unwrap();

    let constraints = SelectionConstraints::new(1080)
        .with_preferred_fps(30)
        .with_compressed_fallback(false);
    let selection = bridge.negotiate(&camera, &constraints).unwrap();
    assert_eq!(selection.descriptor.width, 1280);
    assert_eq!(selection.descriptor.height, 720);
    assert_eq!(selection.descriptor.frame_rate, FrameRate::fps(60));

    // Negotiation alone never touches the device configuration.
    assert_eq!(engine.control("cam0").unwrap().apply_calls(), 0);
}

#[test]
fn test_rejected_configuration_surfaces_device_code() {
    let (_engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        synthetic_data::standard_webcam_catalog(),
    )
    .with_apply_fault(DeviceFault::from_code(
        ERROR_GEN_FAILURE,
        "SetCurrentDeviceMediaType",
    ))]);
    let camera = bridge.open("cam0").unwrap();

    let err = bridge
        .start_preview(&camera, &PreviewSettings::new(ResolutionPreset::VeryHigh))
        .unwrap_err();
    assert_eq!(err.kind(), CaptureErrorKind::ConfigurationRejected);
    assert_eq!(err.device_error_code(), Some(0x8007_001F));
    assert_eq!(err.stage(), Stage::Configure);

    let payload = err.payload();
    assert_eq!(payload.code, "configuration_rejected");
    assert_eq!(payload.device_error_code.as_deref(), Some("0x8007001F"));
    assert!(payload.message.contains("[configure]"));
}

#[test]
fn test_everything_above_cap_reports_height() {
    let (_engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        vec![
            MediaTypeDescriptor::new(1920, 1080, FrameRate::fps(30), PixelFormat::Nv12),
            MediaTypeDescriptor::new(1280, 720, FrameRate::fps(30), PixelFormat::Nv12),
        ],
    )]);
    let camera = bridge.open("cam0").unwrap();

    let err = bridge
        .start_preview(&camera, &PreviewSettings::new(ResolutionPreset::Low))
        .unwrap_err();
    match err {
        CaptureError::NoAcceptableFormat {
            catalog_size,
            eliminating,
            ..
        } => {
            assert_eq!(catalog_size, 2);
            assert_eq!(eliminating, EliminatingConstraint::Height);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_ai_camera_unusual_formats_are_skipped() {
    let (engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "ai",
        synthetic_data::ai_camera_catalog(),
    )]);
    let camera = bridge.open("ai").unwrap();

    let preview = bridge
        .start_preview(
            &camera,
            &PreviewSettings::new(ResolutionPreset::VeryHigh).with_fps(30),
        )
        .unwrap();
    assert_eq!(preview.media_type.pixel_format, PixelFormat::Nv12);
    assert_eq!(preview.media_type.height, 1080);
    assert_eq!(preview.media_type.frame_rate, FrameRate::fps(30));
    assert_eq!(
        engine.control("ai").unwrap().applied(),
        Some(preview.media_type.clone())
    );
    bridge.stop_preview(&preview).unwrap();
}

/// Plays the engine side of a manual start once the bridge asked for it.
fn complete_start_after(control: ScriptControl, start_calls: usize, outcome: Option<DeviceFault>) {
    std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(2);
        while control.start_calls() < start_calls && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        match outcome {
            Some(fault) => control.deliver_start_failed(fault),
            None => control.deliver_started(),
        }
    });
}

#[test]
fn test_failed_start_leaves_camera_restartable() {
    let (engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        synthetic_data::standard_webcam_catalog(),
    )
    .with_start(StartBehavior::Manual)]);
    let camera = bridge.open("cam0").unwrap();
    let control = engine.control("cam0").unwrap();

    complete_start_after(
        control.clone(),
        1,
        Some(DeviceFault::from_code(
            MF_E_HW_MFT_FAILED_START_STREAMING,
            "StartPreview",
        )),
    );
    let err = bridge
        .start_preview(&camera, &PreviewSettings::default())
        .unwrap_err();
    assert_eq!(err.kind(), CaptureErrorKind::PreviewStartFailed);
    assert_eq!(err.device_error_code(), Some(0xC00D_3704));

    let status = bridge.status(&camera).unwrap().unwrap();
    assert_eq!(status.state, PreviewState::Disposed);
    assert_eq!(
        status.last_error.map(|e| e.code),
        Some("preview_start_failed".to_string())
    );

    // Same camera, no reopen: the next start goes through.
    complete_start_after(control.clone(), 2, None);
    let preview = bridge
        .start_preview(&camera, &PreviewSettings::default())
        .unwrap();
    assert_eq!(
        bridge.status(&camera).unwrap().unwrap().state,
        PreviewState::Running
    );
    assert_eq!(control.open_count(), 1);
    bridge.stop_preview(&preview).unwrap();
}

#[test]
fn test_start_timeout_is_reported_and_cleaned_up() {
    let (engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        synthetic_data::standard_webcam_catalog(),
    )
    .with_start(StartBehavior::Manual)]);
    let camera = bridge.open("cam0").unwrap();

    let started = Instant::now();
    let err = bridge
        .start_preview(&camera, &PreviewSettings::default())
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(err.kind(), CaptureErrorKind::PreviewStartFailed);

    // The late completion belongs to a disposed session.
    engine.control("cam0").unwrap().deliver_started();
    let status = bridge.status(&camera).unwrap().unwrap();
    assert_eq!(status.state, PreviewState::Disposed);
}

#[test]
fn test_restart_replaces_running_preview() {
    let (engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        synthetic_data::standard_webcam_catalog(),
    )]);
    let camera = bridge.open("cam0").unwrap();

    let first = bridge
        .start_preview(&camera, &PreviewSettings::new(ResolutionPreset::Medium))
        .unwrap();
    let second = bridge
        .start_preview(&camera, &PreviewSettings::new(ResolutionPreset::High))
        .unwrap();

    assert!(second.generation > first.generation);
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(engine.control("cam0").unwrap().stop_calls(), 1);

    // The replaced handle is stale now.
    bridge.stop_preview(&first).unwrap();
    assert_eq!(
        bridge.status(&camera).unwrap().unwrap().state,
        PreviewState::Running
    );
    bridge.stop_preview(&second).unwrap();
}

#[test]
fn test_frames_flow_to_registered_sink() {
    let (_engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        synthetic_data::standard_webcam_catalog(),
    )
    .with_frames_on_start(3)]);
    let camera = bridge.open("cam0").unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    bridge
        .set_frame_sink(
            &camera,
            Arc::new(move |frame: &Frame<'_>| {
                assert!(!frame.buffer.is_empty());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    let preview = bridge
        .start_preview(&camera, &PreviewSettings::default())
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while seen.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    bridge.stop_preview(&preview).unwrap();

    let status = bridge.status(&camera).unwrap().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(status.frames_delivered, 3);
    assert_eq!(status.frames_dropped, 0);
}

#[test]
fn test_open_failure_is_device_unavailable() {
    let (_engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        synthetic_data::standard_webcam_catalog(),
    )
    .with_open_fault(DeviceFault::from_code(0x8007_0005, "ActivateObject"))]);

    let err = bridge.open("cam0").unwrap_err();
    assert_eq!(err.kind(), CaptureErrorKind::DeviceUnavailable);
    assert_eq!(err.stage(), Stage::Open);
    assert_eq!(err.device_error_code(), Some(0x8007_0005));
}

#[test]
fn test_uncompressed_preferred_over_taller_compressed() {
    let (_engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "ai",
        synthetic_data::ai_camera_catalog(),
    )]);
    let camera = bridge.open("ai").unwrap();

    // Only compressed entries reach 2160 lines on this device.
    let settings = PreviewSettings::new(ResolutionPreset::UltraHigh).with_fps(30);
    let preview = bridge.start_preview(&camera, &settings).unwrap();
    assert!(!preview.media_type.is_compressed);
    assert_eq!(preview.media_type.height, 1080);
    bridge.stop_preview(&preview).unwrap();
}

#[test]
fn test_concurrent_starts_on_one_camera_are_serialised() {
    let (engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        synthetic_data::standard_webcam_catalog(),
    )]);
    let bridge = Arc::new(bridge);
    let camera = bridge.open("cam0").unwrap();
    let control = engine.control("cam0").unwrap();

    for _ in 0..50 {
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [ResolutionPreset::High, ResolutionPreset::Medium]
            .into_iter()
            .map(|preset| {
                let bridge = bridge.clone();
                let camera = camera.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    bridge.start_preview(&camera, &PreviewSettings::new(preset))
                })
            })
            .collect();

        let previews: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().expect("both starts should succeed"))
            .collect();

        let status = bridge.status(&camera).unwrap().unwrap();
        assert_eq!(status.state, PreviewState::Running);
        assert!(previews.iter().any(|p| p.session_id == status.session_id));
        assert_eq!(status.media_type, control.applied());

        for preview in &previews {
            bridge.stop_preview(preview).unwrap();
        }
    }
}

#[test]
fn test_slow_open_does_not_block_other_cameras() {
    let (_engine, bridge) = bridge_with(vec![
        ScriptedDevice::new("fast", synthetic_data::standard_webcam_catalog()),
        ScriptedDevice::new("slow", synthetic_data::standard_webcam_catalog())
            .with_open_delay(Duration::from_millis(1500)),
    ]);
    let bridge = Arc::new(bridge);
    let fast = bridge.open("fast").unwrap();

    let opener = {
        let bridge = bridge.clone();
        std::thread::spawn(move || bridge.open("slow"))
    };
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    assert!(bridge.status(&fast).unwrap().is_none());
    assert!(started.elapsed() < Duration::from_millis(500));

    opener.join().unwrap().unwrap();
    assert_eq!(bridge.open_cameras().len(), 2);
}

#[test]
fn test_concurrent_opens_share_one_camera() {
    let (_engine, bridge) = bridge_with(vec![ScriptedDevice::new(
        "cam0",
        synthetic_data::standard_webcam_catalog(),
    )
    .with_open_delay(Duration::from_millis(50))]);
    let bridge = Arc::new(bridge);

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bridge = bridge.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                bridge.open("cam0")
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap().device_id, "cam0");
    }
    assert_eq!(bridge.open_cameras().len(), 1);

    let camera = bridge.open("cam0").unwrap();
    let preview = bridge
        .start_preview(&camera, &PreviewSettings::default())
        .unwrap();
    bridge.stop_preview(&preview).unwrap();
}
