//! Page boundary cropping step.
//!
//! Trims the scan down to the bright page area: the image is thresholded
//! with Otsu's method and cropped to the bounding box of rows and
//! columns that contain a minimum share of bright pixels. Scans with no
//! detectable page area yield the pipeline failure-signal.

use image::GrayImage;
use imageproc::contrast::otsu_level;
use serde::Deserialize;
use tracing::warn;

use crate::core::errors::OmrResult;

/// Share of a row/column that must be bright for it to count as page.
const MIN_BRIGHT_RATIO: f32 = 0.05;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Options {
    #[serde(rename = "morphKernel")]
    _morph_kernel: Option<[u32; 2]>,
}

impl Default for Options {
    fn default() -> Self {
        Self { _morph_kernel: None }
    }
}

/// Content bounding-box page crop.
#[derive(Debug, Default)]
pub struct CropPage;

impl CropPage {
    pub fn from_options(options: &serde_json::Value) -> OmrResult<Self> {
        // Options are accepted for template compatibility but the crop
        // itself is parameter-free.
        let _opts: Options = serde_json::from_value(options.clone())?;
        Ok(Self)
    }

    /// Crops to the bright page area, or signals failure when none is
    /// found.
    pub fn apply(&self, img: GrayImage) -> OmrResult<Option<GrayImage>> {
        let (w, h) = img.dimensions();
        let threshold = otsu_level(&img);

        let min_row_hits = ((w as f32) * MIN_BRIGHT_RATIO).max(1.0) as u32;
        let min_col_hits = ((h as f32) * MIN_BRIGHT_RATIO).max(1.0) as u32;

        let mut row_hits = vec![0u32; h as usize];
        let mut col_hits = vec![0u32; w as usize];
        for (x, y, pixel) in img.enumerate_pixels() {
            if pixel.0[0] > threshold {
                row_hits[y as usize] += 1;
                col_hits[x as usize] += 1;
            }
        }

        let top = row_hits.iter().position(|&c| c >= min_row_hits);
        let bottom = row_hits.iter().rposition(|&c| c >= min_row_hits);
        let left = col_hits.iter().position(|&c| c >= min_col_hits);
        let right = col_hits.iter().rposition(|&c| c >= min_col_hits);

        let (Some(top), Some(bottom), Some(left), Some(right)) = (top, bottom, left, right)
        else {
            warn!("no page area found while cropping");
            return Ok(None);
        };
        if bottom <= top + 8 || right <= left + 8 {
            warn!(top, bottom, left, right, "page area too small to crop");
            return Ok(None);
        }

        let cropped = image::imageops::crop_imm(
            &img,
            left as u32,
            top as u32,
            (right - left + 1) as u32,
            (bottom - top + 1) as u32,
        )
        .to_image();
        Ok(Some(cropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_crops_bright_region() {
        let mut img = GrayImage::from_pixel(200, 200, Luma([10]));
        for y in 40..160 {
            for x in 30..170 {
                img.put_pixel(x, y, Luma([250]));
            }
        }
        let out = CropPage.apply(img).unwrap().expect("page should be found");
        assert_eq!(out.dimensions(), (140, 120));
        assert_eq!(out.get_pixel(0, 0).0, [250]);
    }

    #[test]
    fn test_uniform_image_signals_failure() {
        // A black image has nothing brighter than any threshold level.
        let img = GrayImage::from_pixel(100, 100, Luma([0]));
        assert!(CropPage.apply(img).unwrap().is_none());
    }
}
