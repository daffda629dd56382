#[cfg(test)]
mod commands_preview_tests {
    use camera_bridge::commands::config::{get_config, reset_config, set_config_path, update_config};
    use camera_bridge::commands::init::{dispose_camera, list_cameras, open_camera};
    use camera_bridge::commands::preview::{
        get_preview_status, list_media_types, negotiate_media_type, start_preview_with,
        stop_preview,
    };
    use camera_bridge::commands::install_bridge;
    use camera_bridge::testing::{synthetic_data, ScriptedDevice, ScriptedEngine};
    use camera_bridge::{
        BridgeConfig, CaptureBridge, Frame, FrameSink, PixelFormat, PreviewSettings,
        PreviewState, ResolutionPreset, SelectionConstraints,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Once};
    use std::time::Duration;
    use tokio::time::timeout;

    static SETUP: Once = Once::new();

    /// Every test uses its own device id on one shared scripted bridge.
    fn setup() {
        SETUP.call_once(|| {
            let engine = Arc::new(ScriptedEngine::new());
            for id in ["list", "open", "negotiate", "preview", "dispose"] {
                engine.add_device(ScriptedDevice::new(
                    id,
                    synthetic_data::standard_webcam_catalog(),
                ));
            }
            engine.add_device(
                ScriptedDevice::new("ai", synthetic_data::ai_camera_catalog())
                    .with_name(synthetic_data::AI_CAMERA_NAME)
                    .with_frames_on_start(2),
            );
            install_bridge(Arc::new(CaptureBridge::new(engine, BridgeConfig::default())));
        });
    }

    #[tokio::test]
    async fn test_list_cameras() {
        setup();
        let cameras = list_cameras().await.unwrap();
        assert!(cameras.len() >= 6);
        for camera in &cameras {
            assert!(!camera.id.is_empty(), "Camera ID should not be empty");
            assert!(!camera.name.is_empty(), "Camera name should not be empty");
        }
        assert!(cameras
            .iter()
            .any(|c| c.id == "ai" && c.name == synthetic_data::AI_CAMERA_NAME));
    }

    #[tokio::test]
    async fn test_open_camera_and_list_media_types() {
        setup();
        let first = open_camera("open".to_string()).await.unwrap();
        let second = open_camera("open".to_string()).await.unwrap();
        assert_eq!(first, second);

        let catalog = list_media_types("open".to_string()).await.unwrap();
        assert_eq!(
            catalog.entries(),
            synthetic_data::standard_webcam_catalog().as_slice()
        );

        let json = serde_json::to_value(&catalog).unwrap();
        assert_eq!(json["deviceId"], "open");
        assert_eq!(json["purpose"], "preview");
    }

    #[tokio::test]
    async fn test_negotiate_media_type() {
        setup();
        open_camera("negotiate".to_string()).await.unwrap();

        let constraints = SelectionConstraints::new(720)
            .with_preferred_fps(30)
            .with_compressed_fallback(false);
        let selection = negotiate_media_type("negotiate".to_string(), constraints)
            .await
            .unwrap();
        assert!(selection.descriptor.height <= 720);
        assert!(!selection.descriptor.is_compressed);
    }

    #[tokio::test]
    async fn test_preview_round_trip() {
        setup();
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = frames.clone();
        let sink: Arc<dyn FrameSink> = Arc::new(move |frame: &Frame<'_>| {
            assert_eq!(frame.pixel_format, PixelFormat::Nv12);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let preview = timeout(
            Duration::from_secs(5),
            start_preview_with(
                "ai".to_string(),
                Some(PreviewSettings::new(ResolutionPreset::VeryHigh).with_fps(30)),
                Some(sink),
            ),
        )
        .await
        .expect("start should not hang")
        .unwrap();
        assert_eq!(preview.media_type.height, 1080);
        assert_eq!(preview.media_type.pixel_format, PixelFormat::Nv12);

        let status = get_preview_status("ai".to_string()).await.unwrap().unwrap();
        assert_eq!(status.state, PreviewState::Running);
        assert_eq!(status.session_id, preview.session_id);

        for _ in 0..200 {
            if frames.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(frames.load(Ordering::SeqCst), 2);

        stop_preview(preview.clone()).await.unwrap();
        let status = get_preview_status("ai".to_string()).await.unwrap().unwrap();
        assert_eq!(status.state, PreviewState::Disposed);
        assert_eq!(status.frames_delivered, 2);

        // A stale handle is ignored.
        stop_preview(preview).await.unwrap();
    }

    #[tokio::test]
    async fn test_default_settings_use_configured_preset() {
        setup();
        let preview = start_preview_with("preview".to_string(), None, None)
            .await
            .unwrap();
        assert!(preview.media_type.height <= ResolutionPreset::High.max_height());
        stop_preview(preview).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_device_error_is_structured() {
        setup();
        let err = start_preview_with("missing".to_string(), None, None)
            .await
            .unwrap_err();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "device_unavailable");
        assert_eq!(json["stage"], "open");
        assert_eq!(json["category"], "disconnected");
    }

    #[tokio::test]
    async fn test_dispose_camera() {
        setup();
        open_camera("dispose".to_string()).await.unwrap();
        dispose_camera("dispose".to_string()).await.unwrap();
        // Unknown and already disposed cameras are fine.
        dispose_camera("dispose".to_string()).await.unwrap();
        assert!(get_preview_status("dispose".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_config_commands() {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera-bridge.toml");
        set_config_path(path.clone());

        let mut config = get_config().await.unwrap();
        config.session.start_timeout_ms = 4000;
        update_config(config.clone()).await.unwrap();
        assert_eq!(get_config().await.unwrap(), config);
        assert_eq!(BridgeConfig::load_from_file(&path).unwrap(), config);

        let mut invalid = config.clone();
        invalid.session.frame_queue_capacity = 0;
        let err = update_config(invalid).await.unwrap_err();
        assert!(err.contains("Invalid config"));

        let reset = reset_config().await.unwrap();
        assert_eq!(reset, BridgeConfig::default());
        assert_eq!(get_config().await.unwrap(), BridgeConfig::default());
    }
}
