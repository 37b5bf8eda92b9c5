//! Utility functions for image loading and visualization.

pub mod image;
pub mod visualization;

pub use image::{gray_to_rgb, load_gray, resize_gray};
pub use visualization::draw_template_layout;
