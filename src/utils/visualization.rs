//! Drawing helpers for layout previews and marked-sheet visualizations.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::template::Template;
use crate::utils::image::{gray_to_rgb, resize_gray};

/// Outline color for the bubble grid.
pub const GRID_COLOR: Rgb<u8> = Rgb([200, 40, 40]);
/// Fill color for bubbles detected as marked.
pub const MARKED_COLOR: Rgb<u8> = Rgb([40, 160, 40]);

/// Draws one hollow bubble outline, with a second inner rectangle for
/// visibility at small sizes.
pub fn outline_bubble(canvas: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, color: Rgb<u8>) {
    draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(w.max(2), h.max(2)), color);
    if w > 4 && h > 4 {
        draw_hollow_rect_mut(
            canvas,
            Rect::at(x + 1, y + 1).of_size(w - 2, h - 2),
            color,
        );
    }
}

/// Fills one bubble rectangle.
pub fn fill_bubble(canvas: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, color: Rgb<u8>) {
    draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(w.max(1), h.max(1)), color);
}

/// Renders the template's bubble grid over a preprocessed sheet image.
///
/// The sheet is resized to the template's page dimensions so grid
/// coordinates apply directly; used by the layout-preview mode to
/// visualize detected alignment without running the full pipeline.
pub fn draw_template_layout(template: &Template, img: &GrayImage) -> RgbImage {
    let (page_w, page_h) = template.page_dimensions;
    let mut canvas = gray_to_rgb(&resize_gray(img, page_w, page_h));
    let (bubble_w, bubble_h) = template.bubble_dimensions;
    for block in &template.field_blocks {
        for field in &block.fields {
            for bubble in &field.bubbles {
                outline_bubble(
                    &mut canvas,
                    bubble.x as i32,
                    bubble.y as i32,
                    bubble_w,
                    bubble_h,
                    GRID_COLOR,
                );
            }
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TuningConfig;
    use image::Luma;
    use std::path::Path;

    #[test]
    fn test_layout_is_drawn_at_page_dimensions() {
        let json = r#"{
            "pageDimensions": [120, 160],
            "bubbleDimensions": [10, 10],
            "fieldBlocks": {
                "B": {
                    "origin": [20, 20],
                    "bubbleValues": ["A", "B"],
                    "fieldLabels": ["q1"],
                    "bubblesGap": 30,
                    "labelsGap": 30
                }
            }
        }"#;
        let template = Template::from_bytes(
            json.as_bytes(),
            Path::new("."),
            &TuningConfig::default(),
        )
        .unwrap();
        let sheet = GrayImage::from_pixel(240, 320, Luma([255]));
        let canvas = draw_template_layout(&template, &sheet);
        assert_eq!(canvas.dimensions(), (120, 160));
        // the outline passes through the bubble's top-left corner
        assert_eq!(canvas.get_pixel(20, 20), &GRID_COLOR);
        assert_eq!(canvas.get_pixel(50, 20), &GRID_COLOR);
    }

    #[test]
    fn test_fill_bubble_writes_color() {
        let mut canvas = RgbImage::new(20, 20);
        fill_bubble(&mut canvas, 5, 5, 4, 4, MARKED_COLOR);
        assert_eq!(canvas.get_pixel(6, 6), &MARKED_COLOR);
    }
}
