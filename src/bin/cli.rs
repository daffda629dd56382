use anyhow::{anyhow, bail, Context, Result};
use camera_bridge::{
    BridgeConfig, CameraHandle, CaptureBridge, Frame, NokhwaEngine, PixelFormat, PreviewSettings,
    ResolutionPreset, SelectionConstraints,
};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const USAGE: &str = "Usage: camera-bridge-cli <command> [args]

Commands:
  list-devices [--json]
  list-formats <device_id> [--json]
  negotiate <device_id> [--preset <preset>] [--fps <n>] [--max-width <n>] [--no-compressed] [--json]
  preview <device_id> [--preset <preset>] [--fps <n>] [--seconds <n>] [--snapshot <file.png>]

Presets: low, medium, high, veryHigh, ultraHigh, max";

fn main() -> Result<()> {
    camera_bridge::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let config = BridgeConfig::load_or_default();
    let bridge = CaptureBridge::new(Arc::new(NokhwaEngine::new()), config);

    let command = &args[1];
    match command.as_str() {
        "list-devices" => cmd_list_devices(&bridge, &args),
        "list-formats" => cmd_list_formats(&bridge, &args),
        "negotiate" => cmd_negotiate(&bridge, &args),
        "preview" => cmd_preview(&bridge, &args),
        _ => {
            eprintln!("Unknown command: {}\n\n{}", command, USAGE);
            std::process::exit(1);
        }
    }
}

/// Flags shared by the negotiating commands.
struct Options {
    device_id: String,
    preset: ResolutionPreset,
    fps: Option<u32>,
    max_width: Option<u32>,
    allow_compressed: bool,
    seconds: u64,
    snapshot: Option<PathBuf>,
    json: bool,
}

fn parse_options(args: &[String], default_preset: ResolutionPreset) -> Result<Options> {
    let mut device_id = None;
    let mut options = Options {
        device_id: String::new(),
        preset: default_preset,
        fps: None,
        max_width: None,
        allow_compressed: true,
        seconds: 5,
        snapshot: None,
        json: false,
    };

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--preset" => {
                i += 1;
                options.preset = parse_preset(value(args, i, "--preset")?)?;
            }
            "--fps" => {
                i += 1;
                options.fps = Some(value(args, i, "--fps")?.parse().context("--fps")?);
            }
            "--max-width" => {
                i += 1;
                options.max_width = Some(value(args, i, "--max-width")?.parse().context("--max-width")?);
            }
            "--seconds" => {
                i += 1;
                options.seconds = value(args, i, "--seconds")?.parse().context("--seconds")?;
            }
            "--snapshot" => {
                i += 1;
                options.snapshot = Some(PathBuf::from(value(args, i, "--snapshot")?));
            }
            "--no-compressed" => options.allow_compressed = false,
            "--json" => options.json = true,
            other if other.starts_with("--") => bail!("Unknown flag: {}", other),
            other => {
                if device_id.is_some() {
                    bail!("Unexpected argument: {}", other);
                }
                device_id = Some(other.to_string());
            }
        }
        i += 1;
    }

    options.device_id = device_id.ok_or_else(|| anyhow!("device_id required"))?;
    Ok(options)
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} needs a value", flag))
}

fn parse_preset(s: &str) -> Result<ResolutionPreset> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| anyhow!("Unknown preset: {}", s))
}

fn cmd_list_devices(bridge: &CaptureBridge, args: &[String]) -> Result<()> {
    let devices = bridge.list_devices()?;
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for d in devices {
            println!("{}: {}", d.id, d.name);
        }
    }
    Ok(())
}

fn cmd_list_formats(bridge: &CaptureBridge, args: &[String]) -> Result<()> {
    if args.len() < 3 {
        eprintln!("Usage: camera-bridge-cli list-formats <device_id> [--json]");
        std::process::exit(1);
    }
    let camera = bridge.open(&args[2])?;
    let catalog = bridge.catalog(&camera)?;
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&catalog)?);
    } else {
        for (i, entry) in catalog.iter().enumerate() {
            println!("[{:>2}] {}", i, entry);
        }
    }
    bridge.dispose(&camera)?;
    Ok(())
}

fn cmd_negotiate(bridge: &CaptureBridge, args: &[String]) -> Result<()> {
    let options = parse_options(args, bridge.config().selection.default_preset)?;
    let mut constraints = SelectionConstraints::new(options.preset.max_height())
        .with_compressed_fallback(options.allow_compressed);
    if let Some(fps) = options.fps {
        constraints = constraints.with_preferred_fps(fps);
    }
    if let Some(width) = options.max_width {
        constraints = constraints.with_max_width(width);
    }

    let camera = bridge.open(&options.device_id)?;
    let result = bridge.negotiate(&camera, &constraints);
    bridge.dispose(&camera)?;
    let selection = result?;

    if options.json {
        println!("{}", serde_json::to_string(&selection)?);
    } else {
        println!(
            "{} (entry {}, {})",
            selection.descriptor, selection.catalog_index, selection.trace
        );
    }
    Ok(())
}

fn cmd_preview(bridge: &CaptureBridge, args: &[String]) -> Result<()> {
    let options = parse_options(args, bridge.config().selection.default_preset)?;
    let mut settings = PreviewSettings::new(options.preset);
    if let Some(fps) = options.fps {
        settings = settings.with_fps(fps);
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        }) {
            log::warn!("Failed to install Ctrl+C handler: {}", err);
        }
    }

    let frames = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));
    let last_rgb: Arc<Mutex<Option<(u32, u32, Vec<u8>)>>> = Arc::new(Mutex::new(None));
    let camera: CameraHandle = bridge.open(&options.device_id)?;
    {
        let frames = frames.clone();
        let bytes = bytes.clone();
        let last_rgb = last_rgb.clone();
        let keep_rgb = options.snapshot.is_some();
        bridge.set_frame_sink(
            &camera,
            Arc::new(move |frame: &Frame<'_>| {
                frames.fetch_add(1, Ordering::Relaxed);
                bytes.fetch_add(frame.buffer.len() as u64, Ordering::Relaxed);
                if keep_rgb && frame.pixel_format == PixelFormat::Rgb24 {
                    if let Ok(mut slot) = last_rgb.lock() {
                        *slot = Some((frame.width, frame.height, frame.buffer.to_vec()));
                    }
                }
            }),
        )?;
    }

    let preview = bridge.start_preview(&camera, &settings)?;
    println!(
        "Previewing {} at {}x{}; press Ctrl+C to stop",
        preview.media_type, preview.frame_width, preview.frame_height
    );

    let started = Instant::now();
    let limit = Duration::from_secs(options.seconds);
    while running.load(Ordering::SeqCst) && started.elapsed() < limit {
        std::thread::sleep(Duration::from_millis(100));
    }

    if let Err(e) = bridge.stop_preview(&preview) {
        if !e.is_soft() {
            return Err(e.into());
        }
        log::warn!("{}", e);
    }

    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
    let count = frames.load(Ordering::Relaxed);
    println!(
        "{} frames ({:.1} fps, {} bytes)",
        count,
        count as f64 / elapsed,
        bytes.load(Ordering::Relaxed)
    );
    if let Some(status) = bridge.status(&camera)? {
        println!("Dropped {} frames, final state {}", status.frames_dropped, status.state);
    }
    bridge.dispose(&camera)?;

    if let Some(path) = &options.snapshot {
        let last = last_rgb.lock().map_err(|_| anyhow!("frame slot poisoned"))?.take();
        match last {
            Some((width, height, data)) => save_snapshot(path, width, height, data)?,
            None => log::warn!("No RGB frame arrived; snapshot not written"),
        }
    }
    Ok(())
}

fn save_snapshot(path: &Path, width: u32, height: u32, data: Vec<u8>) -> Result<()> {
    let img = image::RgbImage::from_raw(width, height, data)
        .ok_or_else(|| anyhow!("Frame buffer does not match {}x{} RGB", width, height))?;
    img.save(path)
        .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;
    println!("Saved {}x{} snapshot to {}", width, height, path.display());
    Ok(())
}
