//! Capability sets and frames modelled on real hardware
//!
//! The catalogs mirror what devices actually advertise, in the order they
//! advertise it, so selection can be exercised offline without a camera.

use crate::types::{fourcc, Frame, FrameRate, MediaTypeDescriptor, PixelFormat};

/// Device name reported by the AI tracking camera the catalog below was taken from.
pub const AI_CAMERA_NAME: &str = "OBSBOT Tiny 4K";

fn entry(width: u32, height: u32, fps: u32, format: PixelFormat) -> MediaTypeDescriptor {
    MediaTypeDescriptor::new(width, height, FrameRate::fps(fps), format)
}

/// A typical 1080p UVC webcam: MJPEG at every size, raw formats only at
/// lower sizes or frame rates.
pub fn standard_webcam_catalog() -> Vec<MediaTypeDescriptor> {
    vec![
        entry(1920, 1080, 30, PixelFormat::Mjpeg),
        entry(1280, 720, 30, PixelFormat::Mjpeg),
        entry(640, 480, 30, PixelFormat::Mjpeg),
        entry(1920, 1080, 5, PixelFormat::Yuy2),
        entry(1280, 720, 10, PixelFormat::Yuy2),
        entry(1280, 720, 30, PixelFormat::Nv12),
        entry(640, 480, 30, PixelFormat::Yuy2),
        entry(640, 480, 30, PixelFormat::Nv12),
        MediaTypeDescriptor::new(640, 480, FrameRate::new(30000, 1001), PixelFormat::Nv12),
        entry(320, 240, 30, PixelFormat::Yuy2),
    ]
}

/// An AI tracking camera: 4K compressed modes, an IR stream in a vendor
/// fourCC, and entries the driver reports with broken rates.
pub fn ai_camera_catalog() -> Vec<MediaTypeDescriptor> {
    vec![
        entry(3840, 2160, 30, PixelFormat::Mjpeg),
        entry(3840, 2160, 30, PixelFormat::H264),
        entry(1920, 1080, 60, PixelFormat::Mjpeg),
        entry(1920, 1080, 60, PixelFormat::Hevc),
        entry(1280, 720, 30, PixelFormat::Unknown(fourcc(b"Y8I "))),
        MediaTypeDescriptor::new(1920, 1080, FrameRate::new(0, 1), PixelFormat::Nv12),
        entry(1920, 1080, 30, PixelFormat::Nv12),
        entry(1920, 1080, 5, PixelFormat::Yuy2),
        entry(1280, 720, 60, PixelFormat::Nv12),
        entry(1280, 720, 30, PixelFormat::Yuy2),
        entry(640, 360, 30, PixelFormat::Nv12),
    ]
}

/// An owned test frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

impl SyntheticFrame {
    pub fn as_frame(&self, timestamp_ticks: i64) -> Frame<'_> {
        Frame {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            timestamp_ticks,
            buffer: &self.data,
        }
    }
}

/// Bytes one frame of `format` occupies; compressed formats get a fixed size.
pub fn frame_size(width: u32, height: u32, format: PixelFormat) -> usize {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Gray8 => pixels,
        PixelFormat::Nv12 | PixelFormat::I420 => pixels * 3 / 2,
        PixelFormat::Yuy2 | PixelFormat::Uyvy => pixels * 2,
        PixelFormat::Rgb24 => pixels * 3,
        PixelFormat::Rgb32 | PixelFormat::Argb32 => pixels * 4,
        PixelFormat::Mjpeg | PixelFormat::H264 | PixelFormat::Hevc | PixelFormat::Unknown(_) => 4096,
    }
}

/// A gradient frame; the pattern shifts with the frame dimensions so
/// mixed-up buffers are easy to spot.
pub fn synthetic_frame(width: u32, height: u32, pixel_format: PixelFormat) -> SyntheticFrame {
    let size = frame_size(width, height, pixel_format);
    let stride = width.max(1) as usize;
    let mut data = Vec::with_capacity(size);
    for i in 0..size {
        let x = i % stride;
        let y = i / stride;
        data.push(((x + y) % 256) as u8);
    }

    if pixel_format == PixelFormat::Mjpeg && data.len() >= 4 {
        // SOI ... EOI
        data[0] = 0xFF;
        data[1] = 0xD8;
        let n = data.len();
        data[n - 2] = 0xFF;
        data[n - 1] = 0xD9;
    }

    SyntheticFrame {
        width,
        height,
        pixel_format,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes_follow_format() {
        assert_eq!(synthetic_frame(4, 2, PixelFormat::Nv12).data.len(), 12);
        assert_eq!(synthetic_frame(4, 2, PixelFormat::Yuy2).data.len(), 16);
        let jpeg = synthetic_frame(64, 48, PixelFormat::Mjpeg);
        assert_eq!(&jpeg.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_ai_catalog_has_unselectable_entries() {
        let catalog = ai_camera_catalog();
        assert!(catalog.iter().any(|d| !d.pixel_format.is_known()));
        assert!(catalog.iter().any(|d| !d.frame_rate.is_valid()));
        assert!(catalog
            .iter()
            .any(|d| !d.is_compressed && d.pixel_format.is_known() && d.height <= 1080));
    }
}
