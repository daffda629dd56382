//! Media type selection
//!
//! Selection is a pure function of a catalog, the caller's constraints and a
//! [`CapabilityPolicy`]. Candidates pass through a fixed sequence of filters
//! (width, height, compression, policy); survivors are ranked by a total
//! order whose last key is catalog position, so the same inputs always pick
//! the same entry.
//!
//! Ranking, most significant first:
//! 1. uncompressed before compressed
//! 2. frame rate closest to `preferred_fps`, ties to the higher native rate
//! 3. largest height, then largest width, within the caps
//! 4. higher native frame rate (only when no `preferred_fps` was given)
//! 5. the policy's pixel format preference
//! 6. catalog enumeration order

use crate::catalog::MediaTypeCatalog;
use crate::errors::{CaptureError, EliminatingConstraint};
use crate::types::{MediaTypeDescriptor, PixelFormat, SelectionConstraints};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Pluggable device-quirk policy.
///
/// New quirky devices are handled by adjusting what a policy admits and how
/// it ranks pixel formats, never by matching on device identity.
pub trait CapabilityPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a descriptor is usable at all.
    fn admits(&self, descriptor: &MediaTypeDescriptor) -> bool;

    /// Lower ranks are preferred when everything else ties.
    fn pixel_format_rank(&self, format: PixelFormat) -> u32;
}

/// Policy used unless the caller installs another.
#[derive(Debug, Clone)]
pub struct DefaultPolicy {
    pub reject_unknown_formats: bool,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            reject_unknown_formats: true,
        }
    }
}

impl CapabilityPolicy for DefaultPolicy {
    fn name(&self) -> &str {
        "default"
    }

    fn admits(&self, descriptor: &MediaTypeDescriptor) -> bool {
        if descriptor.width == 0 || descriptor.height == 0 {
            return false;
        }
        if !descriptor.frame_rate.is_valid() {
            return false;
        }
        !(self.reject_unknown_formats && !descriptor.pixel_format.is_known())
    }

    fn pixel_format_rank(&self, format: PixelFormat) -> u32 {
        match format {
            PixelFormat::Nv12 => 0,
            PixelFormat::Yuy2 => 1,
            PixelFormat::Uyvy => 2,
            PixelFormat::I420 => 3,
            PixelFormat::Rgb32 | PixelFormat::Argb32 => 4,
            PixelFormat::Rgb24 => 5,
            PixelFormat::Gray8 => 6,
            PixelFormat::Mjpeg => 7,
            PixelFormat::H264 => 8,
            PixelFormat::Hevc => 9,
            PixelFormat::Unknown(_) => 10,
        }
    }
}

/// Survivor counts after each filter stage, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterTrace {
    pub catalog: usize,
    pub after_width: usize,
    pub after_height: usize,
    pub after_compression: usize,
    pub after_policy: usize,
}

impl fmt::Display for FilterTrace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "catalog {} -> width {} -> height {} -> compression {} -> policy {}",
            self.catalog,
            self.after_width,
            self.after_height,
            self.after_compression,
            self.after_policy
        )
    }
}

/// A successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub descriptor: MediaTypeDescriptor,
    /// Position of the descriptor in its catalog
    pub catalog_index: usize,
    pub frame_width: u32,
    pub frame_height: u32,
    pub trace: FilterTrace,
}

/// Every candidate was filtered out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoAcceptableFormat {
    pub catalog_size: usize,
    pub eliminating: EliminatingConstraint,
    pub constraints: SelectionConstraints,
    pub trace: FilterTrace,
}

impl From<NoAcceptableFormat> for CaptureError {
    fn from(rejection: NoAcceptableFormat) -> Self {
        let limit = match rejection.eliminating {
            EliminatingConstraint::Width => match rejection.constraints.max_width {
                Some(w) => format!("max width {}; ", w),
                None => String::new(),
            },
            EliminatingConstraint::Height => {
                format!("max height {}; ", rejection.constraints.max_height)
            }
            EliminatingConstraint::Compression => "compressed fallback disabled; ".to_string(),
            _ => String::new(),
        };
        CaptureError::NoAcceptableFormat {
            catalog_size: rejection.catalog_size,
            eliminating: rejection.eliminating,
            detail: format!("{}{}", limit, rejection.trace),
        }
    }
}

pub type SelectionResult = Result<Selection, NoAcceptableFormat>;

/// Scores catalogs against constraints using a capability policy.
#[derive(Clone)]
pub struct MediaTypeSelector {
    policy: Arc<dyn CapabilityPolicy>,
}

impl Default for MediaTypeSelector {
    fn default() -> Self {
        Self::new(Arc::new(DefaultPolicy::default()))
    }
}

impl fmt::Debug for MediaTypeSelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MediaTypeSelector")
            .field("policy", &self.policy.name())
            .finish()
    }
}

impl MediaTypeSelector {
    pub fn new(policy: Arc<dyn CapabilityPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &dyn CapabilityPolicy {
        self.policy.as_ref()
    }

    pub fn select(
        &self,
        catalog: &MediaTypeCatalog,
        constraints: &SelectionConstraints,
    ) -> SelectionResult {
        self.select_from(catalog.entries(), constraints)
    }

    /// Select from a plain slice of descriptors in enumeration order.
    pub fn select_from(
        &self,
        entries: &[MediaTypeDescriptor],
        constraints: &SelectionConstraints,
    ) -> SelectionResult {
        let mut trace = FilterTrace {
            catalog: entries.len(),
            ..FilterTrace::default()
        };
        let reject = |eliminating, trace| NoAcceptableFormat {
            catalog_size: entries.len(),
            eliminating,
            constraints: *constraints,
            trace,
        };

        if entries.is_empty() {
            return Err(reject(EliminatingConstraint::CatalogEmpty, trace));
        }

        let mut candidates: Vec<(usize, &MediaTypeDescriptor)> =
            entries.iter().enumerate().collect();

        if let Some(max_width) = constraints.max_width {
            candidates.retain(|(_, d)| d.width <= max_width);
        }
        trace.after_width = candidates.len();
        if candidates.is_empty() {
            return Err(reject(EliminatingConstraint::Width, trace));
        }

        candidates.retain(|(_, d)| d.height <= constraints.max_height);
        trace.after_height = candidates.len();
        if candidates.is_empty() {
            return Err(reject(EliminatingConstraint::Height, trace));
        }

        if !constraints.allow_compressed_fallback {
            candidates.retain(|(_, d)| !d.is_compressed);
        }
        trace.after_compression = candidates.len();
        if candidates.is_empty() {
            return Err(reject(EliminatingConstraint::Compression, trace));
        }

        candidates.retain(|(_, d)| self.policy.admits(d));
        trace.after_policy = candidates.len();
        if candidates.is_empty() {
            return Err(reject(EliminatingConstraint::CapabilityPolicy, trace));
        }

        let (catalog_index, descriptor) = candidates
            .into_iter()
            .min_by(|a, b| self.rank(a, b, constraints))
            .ok_or_else(|| reject(EliminatingConstraint::CatalogEmpty, trace))?;

        log::debug!(
            "Selected [{}] {} ({}) using {} policy",
            catalog_index,
            descriptor,
            trace,
            self.policy.name()
        );

        Ok(Selection {
            descriptor: descriptor.clone(),
            catalog_index,
            frame_width: descriptor.width,
            frame_height: descriptor.height,
            trace,
        })
    }

    fn rank(
        &self,
        (a_index, a): &(usize, &MediaTypeDescriptor),
        (b_index, b): &(usize, &MediaTypeDescriptor),
        constraints: &SelectionConstraints,
    ) -> Ordering {
        a.is_compressed
            .cmp(&b.is_compressed)
            .then_with(|| match constraints.preferred_fps {
                Some(target) => a
                    .frame_rate
                    .cmp_distance_to(&b.frame_rate, target)
                    .then_with(|| b.frame_rate.cmp_value(&a.frame_rate)),
                None => Ordering::Equal,
            })
            .then_with(|| b.height.cmp(&a.height))
            .then_with(|| b.width.cmp(&a.width))
            .then_with(|| match constraints.preferred_fps {
                Some(_) => Ordering::Equal,
                None => b.frame_rate.cmp_value(&a.frame_rate),
            })
            .then_with(|| {
                self.policy
                    .pixel_format_rank(a.pixel_format)
                    .cmp(&self.policy.pixel_format_rank(b.pixel_format))
            })
            .then_with(|| a_index.cmp(b_index))
    }
}

/// Select with the default policy.
pub fn select(catalog: &MediaTypeCatalog, constraints: &SelectionConstraints) -> SelectionResult {
    MediaTypeSelector::default().select(catalog, constraints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_data;
    use crate::types::{FrameRate, StreamPurpose};

    fn d(w: u32, h: u32, fps: u32, pf: PixelFormat) -> MediaTypeDescriptor {
        MediaTypeDescriptor::new(w, h, FrameRate::fps(fps), pf)
    }

    fn catalog(entries: Vec<MediaTypeDescriptor>) -> MediaTypeCatalog {
        MediaTypeCatalog::from_entries("test", StreamPurpose::Preview, 0, entries)
    }

    #[test]
    fn test_uncompressed_wins_when_fallback_disabled() {
        let c = catalog(vec![
            d(1920, 1080, 30, PixelFormat::Mjpeg),
            d(1280, 720, 60, PixelFormat::Nv12),
        ]);
        let constraints = SelectionConstraints::new(1080)
            .with_preferred_fps(30)
            .with_compressed_fallback(false);

        let selection = select(&c, &constraints).unwrap();
        assert_eq!(selection.descriptor, d(1280, 720, 60, PixelFormat::Nv12));
        assert_eq!(selection.catalog_index, 1);
        assert_eq!((selection.frame_width, selection.frame_height), (1280, 720));
    }

    #[test]
    fn test_compressed_used_only_as_fallback() {
        let c = catalog(vec![
            d(1920, 1080, 30, PixelFormat::Mjpeg),
            d(640, 480, 30, PixelFormat::Yuy2),
        ]);
        let constraints = SelectionConstraints::new(1080).with_compressed_fallback(true);
        let selection = select(&c, &constraints).unwrap();
        assert_eq!(selection.descriptor.pixel_format, PixelFormat::Yuy2);

        let only_compressed = catalog(vec![d(1920, 1080, 30, PixelFormat::Mjpeg)]);
        let selection = select(&only_compressed, &constraints).unwrap();
        assert_eq!(selection.descriptor.pixel_format, PixelFormat::Mjpeg);
    }

    #[test]
    fn test_empty_catalog_reports_catalog_empty() {
        let err = select(&catalog(Vec::new()), &SelectionConstraints::new(1080)).unwrap_err();
        assert_eq!(err.eliminating, EliminatingConstraint::CatalogEmpty);
        assert_eq!(err.catalog_size, 0);
    }

    #[test]
    fn test_everything_too_tall_reports_height() {
        let c = catalog(vec![
            d(3840, 2160, 30, PixelFormat::Nv12),
            d(1920, 1080, 30, PixelFormat::Nv12),
        ]);
        let err = select(&c, &SelectionConstraints::new(720)).unwrap_err();
        assert_eq!(err.eliminating, EliminatingConstraint::Height);
        assert_eq!(err.trace.after_height, 0);

        let capture: CaptureError = err.into();
        assert!(capture.to_string().contains("max height 720"));
    }

    #[test]
    fn test_width_cap_reported() {
        let c = catalog(vec![d(1920, 1080, 30, PixelFormat::Nv12)]);
        let err = select(&c, &SelectionConstraints::new(1080).with_max_width(1280)).unwrap_err();
        assert_eq!(err.eliminating, EliminatingConstraint::Width);
    }

    #[test]
    fn test_compression_reported_when_only_compressed_fit() {
        let c = catalog(vec![
            d(1920, 1080, 30, PixelFormat::Mjpeg),
            d(3840, 2160, 30, PixelFormat::Nv12),
        ]);
        let constraints = SelectionConstraints::new(1080).with_compressed_fallback(false);
        let err = select(&c, &constraints).unwrap_err();
        assert_eq!(err.eliminating, EliminatingConstraint::Compression);
    }

    #[test]
    fn test_unknown_formats_rejected_by_policy() {
        let c = catalog(vec![d(1280, 720, 30, PixelFormat::Unknown(0x2049_3859))]);
        let err = select(&c, &SelectionConstraints::new(1080)).unwrap_err();
        assert_eq!(err.eliminating, EliminatingConstraint::CapabilityPolicy);

        let lenient = MediaTypeSelector::new(Arc::new(DefaultPolicy {
            reject_unknown_formats: false,
        }));
        assert!(lenient.select(&c, &SelectionConstraints::new(1080)).is_ok());
    }

    #[test]
    fn test_fps_closeness_then_higher_native_rate() {
        let c = catalog(vec![
            d(1280, 720, 24, PixelFormat::Nv12),
            d(1280, 720, 36, PixelFormat::Nv12),
            d(1280, 720, 15, PixelFormat::Nv12),
        ]);
        let selection = select(&c, &SelectionConstraints::new(720).with_preferred_fps(30)).unwrap();
        assert_eq!(selection.descriptor.frame_rate, FrameRate::fps(36));
    }

    #[test]
    fn test_fps_preference_outranks_resolution() {
        let c = catalog(vec![
            d(1920, 1080, 15, PixelFormat::Nv12),
            d(1280, 720, 30, PixelFormat::Nv12),
        ]);
        let selection =
            select(&c, &SelectionConstraints::new(1080).with_preferred_fps(30)).unwrap();
        assert_eq!(selection.descriptor.height, 720);
    }

    #[test]
    fn test_without_fps_largest_resolution_wins() {
        let c = catalog(vec![
            d(1280, 720, 60, PixelFormat::Nv12),
            d(1920, 1080, 30, PixelFormat::Nv12),
            d(1920, 1080, 60, PixelFormat::Nv12),
        ]);
        let selection = select(&c, &SelectionConstraints::new(1080)).unwrap();
        assert_eq!(selection.catalog_index, 2);
    }

    #[test]
    fn test_pixel_format_then_catalog_order_break_ties() {
        let c = catalog(vec![
            d(1280, 720, 30, PixelFormat::Yuy2),
            d(1280, 720, 30, PixelFormat::Nv12),
            d(1280, 720, 30, PixelFormat::Nv12),
        ]);
        let selection = select(&c, &SelectionConstraints::new(720)).unwrap();
        assert_eq!(selection.catalog_index, 1);
    }

    #[test]
    fn test_ai_camera_catalog_avoids_exotic_entries() {
        let c = catalog(synthetic_data::ai_camera_catalog());
        let constraints = SelectionConstraints::new(1080)
            .with_preferred_fps(30)
            .with_compressed_fallback(false);
        let selection = select(&c, &constraints).unwrap();
        assert!(selection.descriptor.pixel_format.is_known());
        assert!(!selection.descriptor.is_compressed);
        assert!(selection.descriptor.height <= 1080);
    }

    #[test]
    fn test_selection_is_repeatable() {
        let c = catalog(synthetic_data::ai_camera_catalog());
        let constraints = SelectionConstraints::new(2160).with_preferred_fps(25);
        let first = select(&c, &constraints);
        for _ in 0..10 {
            assert_eq!(select(&c, &constraints), first);
        }
    }
}
