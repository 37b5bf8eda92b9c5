//! Image loading and conversion helpers.

use std::path::Path;

use image::imageops::FilterType;
use image::{GrayImage, RgbImage};

use crate::core::errors::OmrResult;

/// Loads an image from disk as 8-bit grayscale.
///
/// Any raster format supported by the `image` crate is accepted; the
/// decoded image is converted to luma.
pub fn load_gray(path: &Path) -> OmrResult<GrayImage> {
    let img = image::open(path)?;
    Ok(img.to_luma8())
}

/// Resizes a grayscale image to exact dimensions with bilinear filtering.
pub fn resize_gray(img: &GrayImage, width: u32, height: u32) -> GrayImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    image::imageops::resize(img, width, height, FilterType::Triangle)
}

/// Expands a grayscale image into an RGB image for annotation drawing.
pub fn gray_to_rgb(img: &GrayImage) -> RgbImage {
    let mut rgb = RgbImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let v = pixel.0[0];
        rgb.put_pixel(x, y, image::Rgb([v, v, v]));
    }
    rgb
}
