//! Core data model shared by negotiation, configuration and preview.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Pixel encodings a capture device may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv12,
    Yuy2,
    Uyvy,
    I420,
    Rgb24,
    Rgb32,
    Argb32,
    Gray8,
    Mjpeg,
    H264,
    Hevc,
    /// Anything we cannot decode; keeps the raw fourCC (0 when the engine gave none)
    Unknown(u32),
}

/// Pack a four-character code the way capture stacks do (little endian).
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    (tag[0] as u32) | ((tag[1] as u32) << 8) | ((tag[2] as u32) << 16) | ((tag[3] as u32) << 24)
}

// Media Foundation encodes packed RGB formats as D3DFORMAT values, not fourCCs.
const D3DFMT_R8G8B8: u32 = 20;
const D3DFMT_A8R8G8B8: u32 = 21;
const D3DFMT_X8R8G8B8: u32 = 22;

impl PixelFormat {
    pub fn from_fourcc(code: u32) -> Self {
        match code {
            c if c == fourcc(b"NV12") => PixelFormat::Nv12,
            c if c == fourcc(b"YUY2") || c == fourcc(b"YUYV") => PixelFormat::Yuy2,
            c if c == fourcc(b"UYVY") => PixelFormat::Uyvy,
            c if c == fourcc(b"I420") || c == fourcc(b"IYUV") => PixelFormat::I420,
            c if c == fourcc(b"RGB3") || c == D3DFMT_R8G8B8 => PixelFormat::Rgb24,
            c if c == fourcc(b"RGB4") || c == D3DFMT_X8R8G8B8 => PixelFormat::Rgb32,
            c if c == fourcc(b"BGRA") || c == D3DFMT_A8R8G8B8 => PixelFormat::Argb32,
            c if c == fourcc(b"Y800") || c == fourcc(b"GREY") || c == fourcc(b"L8  ") => {
                PixelFormat::Gray8
            }
            c if c == fourcc(b"MJPG") => PixelFormat::Mjpeg,
            c if c == fourcc(b"H264") || c == fourcc(b"AVC1") => PixelFormat::H264,
            c if c == fourcc(b"HEVC") || c == fourcc(b"H265") => PixelFormat::Hevc,
            other => PixelFormat::Unknown(other),
        }
    }

    pub fn fourcc(&self) -> u32 {
        match self {
            PixelFormat::Nv12 => fourcc(b"NV12"),
            PixelFormat::Yuy2 => fourcc(b"YUY2"),
            PixelFormat::Uyvy => fourcc(b"UYVY"),
            PixelFormat::I420 => fourcc(b"I420"),
            PixelFormat::Rgb24 => fourcc(b"RGB3"),
            PixelFormat::Rgb32 => fourcc(b"RGB4"),
            PixelFormat::Argb32 => fourcc(b"BGRA"),
            PixelFormat::Gray8 => fourcc(b"Y800"),
            PixelFormat::Mjpeg => fourcc(b"MJPG"),
            PixelFormat::H264 => fourcc(b"H264"),
            PixelFormat::Hevc => fourcc(b"HEVC"),
            PixelFormat::Unknown(code) => *code,
        }
    }

    /// Whether frames in this format need a decoder before display.
    pub fn is_compressed(&self) -> bool {
        matches!(
            self,
            PixelFormat::Mjpeg | PixelFormat::H264 | PixelFormat::Hevc
        )
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, PixelFormat::Unknown(_))
    }

    pub fn as_str(&self) -> String {
        match self {
            PixelFormat::Nv12 => "NV12".to_string(),
            PixelFormat::Yuy2 => "YUY2".to_string(),
            PixelFormat::Uyvy => "UYVY".to_string(),
            PixelFormat::I420 => "I420".to_string(),
            PixelFormat::Rgb24 => "RGB24".to_string(),
            PixelFormat::Rgb32 => "RGB32".to_string(),
            PixelFormat::Argb32 => "ARGB32".to_string(),
            PixelFormat::Gray8 => "GRAY8".to_string(),
            PixelFormat::Mjpeg => "MJPG".to_string(),
            PixelFormat::H264 => "H264".to_string(),
            PixelFormat::Hevc => "HEVC".to_string(),
            PixelFormat::Unknown(code) => {
                let bytes = code.to_le_bytes();
                if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
                    format!("unknown({})", String::from_utf8_lossy(&bytes))
                } else {
                    format!("unknown(0x{:08X})", code)
                }
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Frame rate as an exact ratio; 30000/1001 stays 30000/1001.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub const fn fps(fps: u32) -> Self {
        Self::new(fps, 1)
    }

    pub fn is_valid(&self) -> bool {
        self.numerator > 0 && self.denominator > 0
    }

    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }

    /// Exact ordering by value, without floating point.
    pub fn cmp_value(&self, other: &FrameRate) -> Ordering {
        let lhs = self.numerator as u64 * other.denominator.max(1) as u64;
        let rhs = other.numerator as u64 * self.denominator.max(1) as u64;
        lhs.cmp(&rhs)
    }

    /// Exact ordering of `|self - target|` against `|other - target|`.
    pub fn cmp_distance_to(&self, other: &FrameRate, target_fps: u32) -> Ordering {
        // |n/d - t| = |n - t*d| / d, compare a/b against c/e via a*e vs c*b
        let distance = |rate: &FrameRate| -> (u64, u64) {
            let d = rate.denominator.max(1) as u64;
            let scaled = target_fps as u64 * d;
            (scaled.abs_diff(rate.numerator as u64), d)
        };
        let (a, b) = distance(self);
        let (c, e) = distance(other);
        (a as u128 * e as u128).cmp(&(c as u128 * b as u128))
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{:.2}", self.as_f64())
        }
    }
}

/// Purpose a device stream serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamPurpose {
    Preview,
    Record,
    Photo,
}

impl StreamPurpose {
    /// Pseudo stream index asking the engine for its preferred stream,
    /// using the values Media Foundation reserves for this.
    pub fn preferred_stream_index(&self) -> u32 {
        match self {
            StreamPurpose::Preview => 0xFFFF_FFFA,
            StreamPurpose::Record => 0xFFFF_FFF9,
            StreamPurpose::Photo => 0xFFFF_FFF8,
        }
    }
}

impl fmt::Display for StreamPurpose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            StreamPurpose::Preview => "preview",
            StreamPurpose::Record => "record",
            StreamPurpose::Photo => "photo",
        };
        f.write_str(s)
    }
}

/// One entry of a device's advertised capability set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeDescriptor {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub pixel_format: PixelFormat,
    pub is_compressed: bool,
    pub source_stream_index: u32,
}

impl MediaTypeDescriptor {
    /// Descriptor on stream 0 with compression derived from the pixel format.
    pub fn new(width: u32, height: u32, frame_rate: FrameRate, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            frame_rate,
            pixel_format,
            is_compressed: pixel_format.is_compressed(),
            source_stream_index: 0,
        }
    }

    pub fn with_stream_index(mut self, index: u32) -> Self {
        self.source_stream_index = index;
        self
    }

    /// Override the device-reported compression flag.
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.is_compressed = compressed;
        self
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for MediaTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{}@{} {}{}",
            self.width,
            self.height,
            self.frame_rate,
            self.pixel_format,
            if self.is_compressed { " (compressed)" } else { "" }
        )
    }
}

/// Caller-supplied negotiation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionConstraints {
    pub max_height: u32,
    pub max_width: Option<u32>,
    pub preferred_fps: Option<u32>,
    pub allow_compressed_fallback: bool,
}

impl SelectionConstraints {
    pub fn new(max_height: u32) -> Self {
        Self {
            max_height,
            max_width: None,
            preferred_fps: None,
            allow_compressed_fallback: true,
        }
    }

    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.max_width = Some(max_width);
        self
    }

    pub fn with_preferred_fps(mut self, fps: u32) -> Self {
        self.preferred_fps = Some(fps);
        self
    }

    pub fn with_compressed_fallback(mut self, allow: bool) -> Self {
        self.allow_compressed_fallback = allow;
        self
    }
}

/// Resolution presets recognised by the application framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionPreset {
    Low,
    Medium,
    High,
    VeryHigh,
    UltraHigh,
    Max,
}

impl ResolutionPreset {
    /// Height cap this preset imposes on negotiation.
    pub fn max_height(&self) -> u32 {
        match self {
            ResolutionPreset::Low => 240,
            ResolutionPreset::Medium => 480,
            ResolutionPreset::High => 720,
            ResolutionPreset::VeryHigh => 1080,
            ResolutionPreset::UltraHigh => 2160,
            ResolutionPreset::Max => u32::MAX,
        }
    }
}

impl Default for ResolutionPreset {
    fn default() -> Self {
        ResolutionPreset::High
    }
}

/// Settings object handed down by the application framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSettings {
    #[serde(default)]
    pub resolution_preset: ResolutionPreset,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub video_bitrate: Option<u32>,
    #[serde(default)]
    pub enable_audio: bool,
}

impl PreviewSettings {
    pub fn new(resolution_preset: ResolutionPreset) -> Self {
        Self {
            resolution_preset,
            fps: None,
            video_bitrate: None,
            enable_audio: false,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    /// Translate framework settings into negotiation constraints.
    pub fn to_constraints(&self, allow_compressed_fallback: bool) -> SelectionConstraints {
        SelectionConstraints {
            max_height: self.resolution_preset.max_height(),
            max_width: None,
            preferred_fps: self.fps.filter(|fps| *fps > 0),
            allow_compressed_fallback,
        }
    }
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self::new(ResolutionPreset::default())
    }
}

/// A delivered image. The buffer is only valid for the duration of the callback;
/// copy it (see [`Frame::to_event`]) to keep it.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Presentation time in 100 ns ticks since the session clock started
    pub timestamp_ticks: i64,
    pub buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn to_event(&self) -> FrameEvent {
        FrameEvent {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            timestamp: self.timestamp_ticks,
            data: self.buffer.to_vec(),
        }
    }
}

/// Owned frame event surfaced to the application framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameEvent {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub timestamp: i64,
    pub data: Vec<u8>,
}

/// Camera device as reported by platform enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDeviceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl CameraDeviceInfo {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = description;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_round_trip_for_known_formats() {
        for format in [PixelFormat::Nv12, PixelFormat::Mjpeg, PixelFormat::Hevc] {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()), format);
        }
        assert_eq!(PixelFormat::from_fourcc(fourcc(b"YUYV")), PixelFormat::Yuy2);
        assert_eq!(PixelFormat::from_fourcc(22), PixelFormat::Rgb32);
    }

    #[test]
    fn test_unknown_fourcc_display() {
        let format = PixelFormat::from_fourcc(fourcc(b"Y8I "));
        assert_eq!(format, PixelFormat::Unknown(fourcc(b"Y8I ")));
        assert_eq!(format.to_string(), "unknown(Y8I )");
        assert_eq!(PixelFormat::Unknown(0).to_string(), "unknown(0x00000000)");
    }

    #[test]
    fn test_frame_rate_exact_comparison() {
        let ntsc = FrameRate::new(30000, 1001);
        let thirty = FrameRate::fps(30);
        assert_eq!(ntsc.cmp_value(&thirty), Ordering::Less);
        assert_eq!(FrameRate::new(60, 2).cmp_value(&thirty), Ordering::Equal);
        // 29.97 is closer to 30 than 25 is
        assert_eq!(
            ntsc.cmp_distance_to(&FrameRate::fps(25), 30),
            Ordering::Less
        );
        // 24 and 36 are equally far from 30
        assert_eq!(
            FrameRate::fps(24).cmp_distance_to(&FrameRate::fps(36), 30),
            Ordering::Equal
        );
    }

    #[test]
    fn test_preset_maps_to_height_cap() {
        assert_eq!(ResolutionPreset::Low.max_height(), 240);
        assert_eq!(ResolutionPreset::VeryHigh.max_height(), 1080);
        assert_eq!(ResolutionPreset::Max.max_height(), u32::MAX);
    }

    #[test]
    fn test_settings_to_constraints_ignores_zero_fps() {
        let settings = PreviewSettings::new(ResolutionPreset::High).with_fps(0);
        let constraints = settings.to_constraints(false);
        assert_eq!(constraints.max_height, 720);
        assert_eq!(constraints.preferred_fps, None);
        assert!(!constraints.allow_compressed_fallback);
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: PreviewSettings =
            serde_json::from_str(r#"{"resolutionPreset":"veryHigh","fps":30}"#).unwrap();
        assert_eq!(settings.resolution_preset, ResolutionPreset::VeryHigh);
        assert_eq!(settings.fps, Some(30));
        assert!(!settings.enable_audio);
    }

    #[test]
    fn test_descriptor_display() {
        let d = MediaTypeDescriptor::new(1920, 1080, FrameRate::fps(30), PixelFormat::Mjpeg);
        assert!(d.is_compressed);
        assert_eq!(d.to_string(), "1920x1080@30 MJPG (compressed)");
    }
}
