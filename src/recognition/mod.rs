//! Bubble recognition: the engine contract and the built-in reader.
//!
//! The directory walker talks to recognition strictly through
//! [`RecognitionEngine`]; any error returned by an engine is absorbed as
//! a per-sheet recognition failure, never a run failure. The built-in
//! [`BubbleReader`] classifies bubble fill from mean intensity under
//! each bubble window, with a per-field threshold refinement when the
//! sorted intensity profile shows a clear jump.

use std::collections::HashMap;
use std::path::Path;

use image::{GrayImage, RgbImage};
use tracing::debug;

use crate::core::config::TuningConfig;
use crate::core::errors::{OmrError, OmrResult, ProcessingStage};
use crate::template::Template;
use crate::utils::image::{gray_to_rgb, resize_gray};
use crate::utils::visualization::{fill_bubble, outline_bubble, GRID_COLOR, MARKED_COLOR};

/// Per-field intensity diagnostics emitted alongside the responses.
#[derive(Debug, Clone)]
pub struct FieldIntensity {
    pub label: String,
    /// Mean intensity under each bubble window, in bubble order.
    pub means: Vec<f32>,
    /// The fill threshold applied to this field.
    pub threshold: f32,
    /// True when the field's intensity jump cleared `min_jump` by the
    /// configured confident surplus.
    pub confident: bool,
}

/// Everything a recognition engine produces for one preprocessed sheet.
#[derive(Debug)]
pub struct RecognitionOutput {
    /// Marked value(s) per field label; multiple marks concatenate.
    pub responses: HashMap<String, String>,
    /// Rendered visualization of the detected marks.
    pub final_marked: RgbImage,
    /// True when any field carries more than one mark.
    pub multi_marked: bool,
    /// Auxiliary per-field diagnostics.
    pub field_intensities: Vec<FieldIntensity>,
}

/// Contract with the recognition engine: extract per-question responses
/// from a preprocessed sheet image.
pub trait RecognitionEngine {
    /// Reads the marked responses off `image`. `name` is a stable sheet
    /// identifier; when `save_dir` is given the engine may write its
    /// marked visualization there.
    fn read_response(
        &self,
        template: &Template,
        image: &GrayImage,
        name: &str,
        save_dir: Option<&Path>,
        tuning: &TuningConfig,
    ) -> OmrResult<RecognitionOutput>;
}

/// Built-in intensity-threshold bubble reader.
#[derive(Debug, Default)]
pub struct BubbleReader;

impl BubbleReader {
    pub fn new() -> Self {
        Self
    }

    /// Picks the fill threshold for one field from its sorted bubble
    /// means: the midpoint of the largest adjacent jump when that jump
    /// is decisive, the global threshold otherwise. Also returns the
    /// size of that largest jump for confidence diagnostics.
    fn field_threshold(means: &[f32], tuning: &TuningConfig) -> (f32, f32) {
        let global = tuning.threshold_params.global_threshold;
        if means.len() < 2 {
            return (global, 0.0);
        }
        let mut sorted = means.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mut best_jump = 0.0f32;
        let mut best_mid = global;
        for pair in sorted.windows(2) {
            let jump = pair[1] - pair[0];
            if jump > best_jump {
                best_jump = jump;
                best_mid = (pair[0] + pair[1]) / 2.0;
            }
        }
        if best_jump >= tuning.threshold_params.min_jump {
            (best_mid, best_jump)
        } else {
            (global, best_jump)
        }
    }
}

impl RecognitionEngine for BubbleReader {
    fn read_response(
        &self,
        template: &Template,
        image: &GrayImage,
        name: &str,
        save_dir: Option<&Path>,
        tuning: &TuningConfig,
    ) -> OmrResult<RecognitionOutput> {
        let (page_w, page_h) = template.page_dimensions;
        let sheet = resize_gray(image, page_w, page_h);
        let (bubble_w, bubble_h) = template.bubble_dimensions;

        let mut canvas = gray_to_rgb(&sheet);
        let mut responses = HashMap::new();
        let mut field_intensities = Vec::new();
        let mut multi_marked = false;

        for block in &template.field_blocks {
            for field in &block.fields {
                let means: Vec<f32> = field
                    .bubbles
                    .iter()
                    .map(|b| window_mean(&sheet, b.x, b.y, bubble_w, bubble_h))
                    .collect();
                let (threshold, jump) = Self::field_threshold(&means, tuning);
                let confident = jump
                    >= tuning.threshold_params.min_jump
                        + tuning.threshold_params.confident_surplus;

                let mut value = String::new();
                let mut marks = 0u32;
                for (bubble, &mean) in field.bubbles.iter().zip(&means) {
                    let marked = mean < threshold;
                    if marked {
                        marks += 1;
                        value.push_str(&bubble.value);
                        fill_bubble(
                            &mut canvas,
                            bubble.x as i32,
                            bubble.y as i32,
                            bubble_w,
                            bubble_h,
                            MARKED_COLOR,
                        );
                    } else {
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
                if marks > 1 {
                    multi_marked = true;
                }
                if marks == 0 {
                    value = template.empty_value.clone();
                }
                debug!(
                    field = field.label.as_str(),
                    threshold,
                    confident,
                    marks,
                    value = value.as_str(),
                    "field read"
                );
                responses.insert(field.label.clone(), value);
                field_intensities.push(FieldIntensity {
                    label: field.label.clone(),
                    means,
                    threshold,
                    confident,
                });
            }
        }

        if let Some(dir) = save_dir {
            if tuning.outputs.save_image_level >= 1 {
                let path = dir.join(name);
                canvas.save(&path).map_err(|e| {
                    OmrError::processing_error(
                        ProcessingStage::Output,
                        &format!("saving marked visualization to {}", path.display()),
                        e,
                    )
                })?;
            }
        }

        Ok(RecognitionOutput {
            responses,
            final_marked: canvas,
            multi_marked,
            field_intensities,
        })
    }
}

/// Mean intensity of a bubble window, clamped to the image bounds.
fn window_mean(img: &GrayImage, x: f32, y: f32, w: u32, h: u32) -> f32 {
    let (img_w, img_h) = img.dimensions();
    let x0 = (x.max(0.0) as u32).min(img_w.saturating_sub(1));
    let y0 = (y.max(0.0) as u32).min(img_h.saturating_sub(1));
    let x1 = (x0 + w.max(1)).min(img_w);
    let y1 = (y0 + h.max(1)).min(img_h);
    let mut sum = 0u64;
    let mut count = 0u64;
    for yy in y0..y1 {
        for xx in x0..x1 {
            sum += img.get_pixel(xx, yy).0[0] as u64;
            count += 1;
        }
    }
    if count == 0 {
        255.0
    } else {
        sum as f32 / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn test_template() -> Template {
        let json = r#"{
            "pageDimensions": [300, 400],
            "bubbleDimensions": [20, 20],
            "fieldBlocks": {
                "Block1": {
                    "origin": [40, 40],
                    "fieldType": "QTYPE_MCQ4",
                    "fieldLabels": ["q1..3"],
                    "bubblesGap": 40,
                    "labelsGap": 50
                }
            }
        }"#;
        Template::from_bytes(json.as_bytes(), Path::new("."), &TuningConfig::default()).unwrap()
    }

    fn blank_sheet() -> GrayImage {
        GrayImage::from_pixel(300, 400, Luma([255]))
    }

    /// Fills the bubble of `field_index` at `bubble_index` with black.
    fn fill(sheet: &mut GrayImage, field_index: u32, bubble_index: u32) {
        let x0 = 40 + bubble_index * 40;
        let y0 = 40 + field_index * 50;
        for y in y0..y0 + 20 {
            for x in x0..x0 + 20 {
                sheet.put_pixel(x, y, Luma([0]));
            }
        }
    }

    #[test]
    fn test_single_mark_read() {
        let template = test_template();
        let tuning = TuningConfig::default();
        let mut sheet = blank_sheet();
        fill(&mut sheet, 1, 2); // q2 -> C
        let output = BubbleReader::new()
            .read_response(&template, &sheet, "sheet1.png", None, &tuning)
            .unwrap();
        assert_eq!(output.responses["q2"], "C");
        assert_eq!(output.responses["q1"], "");
        assert_eq!(output.responses["q3"], "");
        assert!(!output.multi_marked);
        assert_eq!(output.field_intensities.len(), 3);
        // a marked field shows a decisive jump, an all-blank one does not
        let q2 = output.field_intensities.iter().find(|f| f.label == "q2").unwrap();
        assert!(q2.confident);
        let q1 = output.field_intensities.iter().find(|f| f.label == "q1").unwrap();
        assert!(!q1.confident);
    }

    #[test]
    fn test_multiple_marks_concatenate_and_flag() {
        let template = test_template();
        let tuning = TuningConfig::default();
        let mut sheet = blank_sheet();
        fill(&mut sheet, 0, 0); // q1 -> A
        fill(&mut sheet, 0, 1); // q1 -> B
        let output = BubbleReader::new()
            .read_response(&template, &sheet, "sheet2.png", None, &tuning)
            .unwrap();
        assert_eq!(output.responses["q1"], "AB");
        assert!(output.multi_marked);
    }

    #[test]
    fn test_field_threshold_prefers_decisive_jump() {
        let tuning = TuningConfig::default();
        // one dark bubble among bright ones: threshold sits in the gap
        let (threshold, jump) =
            BubbleReader::field_threshold(&[12.0, 250.0, 252.0, 249.0], &tuning);
        assert!(threshold > 100.0 && threshold < 200.0);
        assert!(jump > 200.0);
        // no decisive jump: fall back to the global threshold
        let (flat, small_jump) =
            BubbleReader::field_threshold(&[250.0, 251.0, 252.0, 249.0], &tuning);
        assert_eq!(flat, tuning.threshold_params.global_threshold);
        assert!(small_jump < tuning.threshold_params.min_jump);
    }

    #[test]
    fn test_visualization_saved_at_level_one() {
        let template = test_template();
        let tuning = TuningConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let sheet = blank_sheet();
        BubbleReader::new()
            .read_response(&template, &sheet, "sheet.png", Some(dir.path()), &tuning)
            .unwrap();
        assert!(dir.path().join("sheet.png").exists());
    }
}
