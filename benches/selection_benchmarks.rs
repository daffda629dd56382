//! Performance benchmarks for media type selection and frame hand-off
//!
//! Run with: cargo bench
//!
//! Selection runs on every start_preview and frame copies run on the engine
//! thread, so both should stay far below a frame interval.

use camera_bridge::selector::MediaTypeSelector;
use camera_bridge::testing::{synthetic_data, ScriptedDevice, ScriptedEngine};
use camera_bridge::{
    BridgeConfig, CaptureBridge, FrameRate, MediaTypeDescriptor, PixelFormat, PreviewSettings,
    ResolutionPreset, SelectionConstraints,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

/// A catalog the size some UVC devices report: every resolution at every rate
/// in several encodings.
fn large_catalog(entries: usize) -> Vec<MediaTypeDescriptor> {
    let resolutions = [
        (320, 240),
        (640, 360),
        (640, 480),
        (1280, 720),
        (1920, 1080),
        (2560, 1440),
        (3840, 2160),
    ];
    let rates = [5, 10, 15, 24, 25, 30, 50, 60];
    let formats = [
        PixelFormat::Nv12,
        PixelFormat::Yuy2,
        PixelFormat::Mjpeg,
        PixelFormat::H264,
    ];

    let mut all = Vec::new();
    for &(w, h) in &resolutions {
        for &fps in &rates {
            for &pf in &formats {
                all.push(MediaTypeDescriptor::new(w, h, FrameRate::fps(fps), pf));
            }
        }
    }
    all.iter().cycle().take(entries).cloned().collect()
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("Media Type Selection");
    let selector = MediaTypeSelector::default();
    let constraints = SelectionConstraints::new(1080)
        .with_preferred_fps(30)
        .with_compressed_fallback(true);

    for size in [10usize, 64, 224, 1024] {
        let catalog = large_catalog(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("select_from", size), &catalog, |b, catalog| {
            b.iter(|| selector.select_from(black_box(catalog), black_box(&constraints)))
        });
    }

    let ai = synthetic_data::ai_camera_catalog();
    group.bench_function("ai_camera_catalog", |b| {
        b.iter(|| selector.select_from(black_box(&ai), black_box(&constraints)))
    });

    group.finish();
}

fn bench_start_stop(c: &mut Criterion) {
    let mut group = c.benchmark_group("Preview Lifecycle");
    group.sample_size(20);

    let engine = Arc::new(ScriptedEngine::new());
    engine.add_device(ScriptedDevice::new(
        "bench",
        synthetic_data::standard_webcam_catalog(),
    ));
    let bridge = CaptureBridge::new(engine, BridgeConfig::default());
    let camera = bridge.open("bench").expect("open scripted camera");
    let settings = PreviewSettings::new(ResolutionPreset::High).with_fps(30);

    group.bench_function("start_stop_scripted", |b| {
        b.iter(|| {
            let preview = bridge
                .start_preview(&camera, &settings)
                .expect("start preview");
            bridge.stop_preview(&preview).expect("stop preview");
        })
    });

    group.finish();
}

criterion_group!(benches, bench_selection, bench_start_stop);
criterion_main!(benches);
