//! Infallible pixel-level filter steps: blurs and a levels remap.

use image::GrayImage;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use serde::Deserialize;

use crate::core::errors::{OmrError, OmrResult};

/// Gaussian smoothing step.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GaussianBlur {
    #[serde(rename = "kSize")]
    pub k_size: [u32; 2],
    #[serde(rename = "sigmaX")]
    pub sigma_x: f32,
}

impl Default for GaussianBlur {
    fn default() -> Self {
        Self {
            k_size: [3, 3],
            sigma_x: 0.0,
        }
    }
}

impl GaussianBlur {
    pub fn from_options(options: &serde_json::Value) -> OmrResult<Self> {
        Ok(serde_json::from_value(options.clone())?)
    }

    pub fn apply(&self, img: GrayImage) -> GrayImage {
        // Zero sigma means "derive from kernel size", as OpenCV does.
        let sigma = if self.sigma_x > 0.0 {
            self.sigma_x
        } else {
            let k = self.k_size[0].max(1) as f32;
            0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8
        };
        gaussian_blur_f32(&img, sigma.max(0.1))
    }
}

/// Median smoothing step.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MedianBlur {
    #[serde(rename = "kSize")]
    pub k_size: u32,
}

impl Default for MedianBlur {
    fn default() -> Self {
        Self { k_size: 3 }
    }
}

impl MedianBlur {
    pub fn from_options(options: &serde_json::Value) -> OmrResult<Self> {
        let opts: MedianBlur = serde_json::from_value(options.clone())?;
        if opts.k_size == 0 || opts.k_size % 2 == 0 {
            return Err(OmrError::config_error(format!(
                "MedianBlur kSize must be odd and positive, got {}",
                opts.k_size
            )));
        }
        Ok(opts)
    }

    pub fn apply(&self, img: GrayImage) -> GrayImage {
        let radius = self.k_size / 2;
        if radius == 0 {
            return img;
        }
        median_filter(&img, radius, radius)
    }
}

/// Intensity level remap with gamma correction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Levels {
    pub low: u8,
    pub high: u8,
    pub gamma: f32,
}

impl Default for Levels {
    fn default() -> Self {
        Self {
            low: 0,
            high: 255,
            gamma: 1.0,
        }
    }
}

impl Levels {
    pub fn from_options(options: &serde_json::Value) -> OmrResult<Self> {
        let opts: Levels = serde_json::from_value(options.clone())?;
        if opts.high <= opts.low {
            return Err(OmrError::config_error(format!(
                "Levels requires low < high, got low={} high={}",
                opts.low, opts.high
            )));
        }
        if opts.gamma <= 0.0 {
            return Err(OmrError::config_error(format!(
                "Levels gamma must be positive, got {}",
                opts.gamma
            )));
        }
        Ok(opts)
    }

    pub fn apply(&self, mut img: GrayImage) -> GrayImage {
        let lut = self.build_lut();
        for pixel in img.pixels_mut() {
            pixel.0[0] = lut[pixel.0[0] as usize];
        }
        img
    }

    fn build_lut(&self) -> [u8; 256] {
        let low = self.low as f32;
        let span = (self.high - self.low) as f32;
        let inv_gamma = 1.0 / self.gamma;
        let mut lut = [0u8; 256];
        for (value, slot) in lut.iter_mut().enumerate() {
            let normalized = ((value as f32 - low) / span).clamp(0.0, 1.0);
            *slot = (normalized.powf(inv_gamma) * 255.0).round() as u8;
        }
        lut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_levels_lut_endpoints() {
        let levels = Levels {
            low: 50,
            high: 200,
            gamma: 1.0,
        };
        let lut = levels.build_lut();
        assert_eq!(lut[0], 0);
        assert_eq!(lut[50], 0);
        assert_eq!(lut[200], 255);
        assert_eq!(lut[255], 255);
        assert_eq!(lut[125], 128); // midpoint of the span
    }

    #[test]
    fn test_levels_validation() {
        let bad = serde_json::json!({"low": 200, "high": 100});
        assert!(Levels::from_options(&bad).is_err());
        let bad_gamma = serde_json::json!({"gamma": 0.0});
        assert!(Levels::from_options(&bad_gamma).is_err());
    }

    #[test]
    fn test_median_blur_removes_speckle() {
        let mut img = GrayImage::from_pixel(9, 9, Luma([255]));
        img.put_pixel(4, 4, Luma([0]));
        let out = MedianBlur { k_size: 3 }.apply(img);
        assert_eq!(out.get_pixel(4, 4).0, [255]);
    }

    #[test]
    fn test_median_blur_rejects_even_kernel() {
        let bad = serde_json::json!({"kSize": 4});
        assert!(MedianBlur::from_options(&bad).is_err());
    }

    #[test]
    fn test_gaussian_blur_preserves_flat_image() {
        let img = GrayImage::from_pixel(8, 8, Luma([200]));
        let out = GaussianBlur::default().apply(img);
        assert_eq!(out.get_pixel(4, 4).0, [200]);
    }
}
