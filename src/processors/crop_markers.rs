//! Marker-based cropping step.
//!
//! Locates one alignment marker per image quadrant by normalized
//! cross-correlation template matching, then warps the quadrilateral
//! spanned by the four marker centers onto an axis-aligned frame. A
//! marker that cannot be located with sufficient confidence yields the
//! pipeline failure-signal for that sheet.

use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::template_matching::{match_template, MatchTemplateMethod};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::config::TuningConfig;
use crate::core::errors::{OmrError, OmrResult};
use crate::template::resolve_asset;
use crate::utils::image::{load_gray, resize_gray};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Options {
    #[serde(rename = "relativePath")]
    relative_path: Option<String>,
    #[serde(rename = "minMatchingThreshold")]
    min_matching_threshold: f32,
    #[serde(rename = "markerRescaleRange")]
    marker_rescale_range: [u32; 2],
    #[serde(rename = "markerRescaleSteps")]
    marker_rescale_steps: u32,
    #[serde(rename = "sheetToMarkerWidthRatio")]
    sheet_to_marker_width_ratio: Option<f32>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            relative_path: None,
            min_matching_threshold: 0.3,
            marker_rescale_range: [85, 115],
            marker_rescale_steps: 5,
            sheet_to_marker_width_ratio: None,
        }
    }
}

/// Four-corner marker cropping step.
#[derive(Debug)]
pub struct CropOnMarkers {
    marker: GrayImage,
    marker_path: PathBuf,
    min_matching_threshold: f32,
    rescale_range: (u32, u32),
    rescale_steps: u32,
}

impl CropOnMarkers {
    /// Builds the step from template options, resolving and loading the
    /// marker image relative to the template's directory.
    pub fn from_options(
        options: &serde_json::Value,
        asset_dir: &Path,
        tuning: &TuningConfig,
    ) -> OmrResult<Self> {
        let opts: Options = serde_json::from_value(options.clone())?;
        let [lo, hi] = opts.marker_rescale_range;
        if lo == 0 || hi < lo {
            return Err(OmrError::config_error(format!(
                "markerRescaleRange must be an ascending positive pair, got [{lo}, {hi}]"
            )));
        }
        let relative = opts.relative_path.ok_or_else(|| {
            OmrError::config_error("CropOnMarkers requires options.relativePath")
        })?;
        let marker_path = resolve_asset(asset_dir, &relative).ok_or_else(|| {
            OmrError::config_error(format!(
                "marker image '{relative}' not found near {}",
                asset_dir.display()
            ))
        })?;
        let mut marker = load_gray(&marker_path)?;
        if let Some(ratio) = opts.sheet_to_marker_width_ratio {
            if ratio > 0.0 {
                let target_w =
                    ((tuning.dimensions.processing_width as f32 / ratio).round() as u32).max(4);
                let target_h = (target_w as f32 * marker.height() as f32
                    / marker.width() as f32)
                    .round()
                    .max(4.0) as u32;
                marker = resize_gray(&marker, target_w, target_h);
            }
        }
        Ok(Self {
            marker,
            marker_path,
            min_matching_threshold: opts.min_matching_threshold,
            rescale_range: (opts.marker_rescale_range[0], opts.marker_rescale_range[1]),
            rescale_steps: opts.marker_rescale_steps.max(1),
        })
    }

    /// Constructs the step directly; used by tests and embedding callers
    /// that already hold a marker image.
    pub fn new(marker: GrayImage, marker_path: PathBuf, min_matching_threshold: f32) -> Self {
        Self {
            marker,
            marker_path,
            min_matching_threshold,
            rescale_range: (100, 100),
            rescale_steps: 1,
        }
    }

    /// The resolved on-disk location of the marker asset.
    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// Locates the four markers and warps the spanned quadrilateral onto
    /// an axis-aligned frame. Returns `Ok(None)` when any marker cannot
    /// be matched above the confidence threshold.
    pub fn apply(&self, img: GrayImage, _tuning: &TuningConfig) -> OmrResult<Option<GrayImage>> {
        let (w, h) = img.dimensions();
        let (half_w, half_h) = (w / 2, h / 2);
        if half_w < self.marker.width() || half_h < self.marker.height() {
            warn!(
                image_w = w,
                image_h = h,
                "image too small for marker matching"
            );
            return Ok(None);
        }

        // Quadrant order: TL, TR, BL, BR.
        let quadrants = [
            (0, 0),
            (w - half_w, 0),
            (0, h - half_h),
            (w - half_w, h - half_h),
        ];
        let mut centers = [(0.0f32, 0.0f32); 4];
        for (i, &(qx, qy)) in quadrants.iter().enumerate() {
            let quad = image::imageops::crop_imm(&img, qx, qy, half_w, half_h).to_image();
            let Some((score, cx, cy)) = self.best_match(&quad) else {
                warn!(quadrant = i, "no finite marker correlation in quadrant");
                return Ok(None);
            };
            if score < self.min_matching_threshold {
                warn!(
                    quadrant = i,
                    score,
                    threshold = self.min_matching_threshold,
                    "marker not found"
                );
                return Ok(None);
            }
            debug!(quadrant = i, score, "marker located");
            centers[i] = (qx as f32 + cx, qy as f32 + cy);
        }

        let [tl, tr, bl, br] = centers;
        let top_w = tr.0 - tl.0;
        let bottom_w = br.0 - bl.0;
        let left_h = bl.1 - tl.1;
        let right_h = br.1 - tr.1;
        let dst_w = top_w.max(bottom_w).round();
        let dst_h = left_h.max(right_h).round();
        if dst_w < 8.0 || dst_h < 8.0 {
            warn!("degenerate marker quadrilateral");
            return Ok(None);
        }

        let projection = Projection::from_control_points(
            [tl, tr, br, bl],
            [
                (0.0, 0.0),
                (dst_w, 0.0),
                (dst_w, dst_h),
                (0.0, dst_h),
            ],
        );
        let Some(projection) = projection else {
            warn!("marker centers do not form a usable quadrilateral");
            return Ok(None);
        };

        let mut out = GrayImage::new(dst_w as u32, dst_h as u32);
        warp_into(
            &img,
            &projection,
            Interpolation::Bilinear,
            Luma([255]),
            &mut out,
        );
        Ok(Some(out))
    }

    /// Best normalized cross-correlation of the marker over one
    /// quadrant, searched across the configured rescale range. Returns
    /// the score and the matched marker's center within the quadrant.
    fn best_match(&self, quad: &GrayImage) -> Option<(f32, f32, f32)> {
        let (lo, hi) = self.rescale_range;
        let steps = self.rescale_steps;
        let mut best: Option<(f32, f32, f32)> = None;
        for step in 0..steps {
            let percent = if steps == 1 {
                lo
            } else {
                lo + (hi - lo) * step / (steps - 1)
            };
            let mw = (self.marker.width() * percent / 100).max(2);
            let mh = (self.marker.height() * percent / 100).max(2);
            if mw >= quad.width() || mh >= quad.height() {
                continue;
            }
            let scaled = resize_gray(&self.marker, mw, mh);
            let scores = match_template(
                quad,
                &scaled,
                MatchTemplateMethod::CrossCorrelationNormalized,
            );
            // NaN scores arise on flat patches; keep the best finite one.
            for (x, y, value) in scores.enumerate_pixels() {
                let score = value.0[0];
                if !score.is_finite() {
                    continue;
                }
                if best.map_or(true, |(b, _, _)| score > b) {
                    best = Some((
                        score,
                        x as f32 + mw as f32 / 2.0,
                        y as f32 + mh as f32 / 2.0,
                    ));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_pattern(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let border = x < 3 || y < 3 || x >= size - 3 || y >= size - 3;
            if border {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    fn stamp(canvas: &mut GrayImage, patch: &GrayImage, ox: u32, oy: u32) {
        for (x, y, p) in patch.enumerate_pixels() {
            canvas.put_pixel(ox + x, oy + y, *p);
        }
    }

    #[test]
    fn test_markers_found_and_cropped() {
        let marker = marker_pattern(16);
        let mut sheet = GrayImage::from_pixel(240, 240, Luma([255]));
        for &(ox, oy) in &[(10u32, 10u32), (214, 10), (10, 214), (214, 214)] {
            stamp(&mut sheet, &marker, ox, oy);
        }
        let step = CropOnMarkers::new(marker, PathBuf::from("marker.png"), 0.8);
        let out = step
            .apply(sheet, &TuningConfig::default())
            .unwrap()
            .expect("markers should be located");
        // marker centers sit 204px apart; warped frame matches that span
        assert!((out.width() as i32 - 204).abs() <= 2);
        assert!((out.height() as i32 - 204).abs() <= 2);
    }

    #[test]
    fn test_blank_sheet_signals_failure() {
        let marker = marker_pattern(16);
        let sheet = GrayImage::from_pixel(240, 240, Luma([255]));
        let step = CropOnMarkers::new(marker, PathBuf::from("marker.png"), 0.8);
        assert!(step.apply(sheet, &TuningConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_descending_rescale_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        marker_pattern(16).save(dir.path().join("marker.png")).unwrap();
        let options = serde_json::json!({
            "relativePath": "marker.png",
            "markerRescaleRange": [115, 85]
        });
        let err = CropOnMarkers::from_options(&options, dir.path(), &TuningConfig::default())
            .unwrap_err();
        assert!(matches!(err, OmrError::Config { .. }));

        let zero = serde_json::json!({
            "relativePath": "marker.png",
            "markerRescaleRange": [0, 115]
        });
        assert!(CropOnMarkers::from_options(&zero, dir.path(), &TuningConfig::default()).is_err());
    }

    #[test]
    fn test_image_smaller_than_marker_signals_failure() {
        let marker = marker_pattern(16);
        let sheet = GrayImage::from_pixel(20, 20, Luma([255]));
        let step = CropOnMarkers::new(marker, PathBuf::from("marker.png"), 0.8);
        assert!(step.apply(sheet, &TuningConfig::default()).unwrap().is_none());
    }
}
