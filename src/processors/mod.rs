//! Image preprocessing steps and the pipeline adapter.
//!
//! Steps are a tagged enum rather than trait objects so that runtime
//! selection (e.g. the layout-preview mode that only runs marker
//! cropping) is a pattern match on [`StepKind`] instead of downcasting.
//!
//! A step's `apply` distinguishes two failure modes: `Ok(None)` is the
//! failure-signal that halts the pipeline for this sheet (e.g. an
//! alignment marker was not found) and routes it to the error channel,
//! while `Err` is an internal fault.

pub mod crop_markers;
pub mod crop_page;
pub mod filters;

use std::path::{Path, PathBuf};

use image::GrayImage;
use tracing::{debug, warn};

use crate::core::config::TuningConfig;
use crate::core::errors::{OmrError, OmrResult};
use crate::template::PreProcessorSpec;
use crate::utils::image::resize_gray;

pub use crop_markers::CropOnMarkers;
pub use crop_page::CropPage;
pub use filters::{GaussianBlur, Levels, MedianBlur};

/// Discriminant for runtime step selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    CropPage,
    CropOnMarkers,
    GaussianBlur,
    MedianBlur,
    Levels,
}

/// A named, orderable image transform declared by a template.
#[derive(Debug)]
pub enum PreProcessor {
    CropPage(CropPage),
    CropOnMarkers(CropOnMarkers),
    GaussianBlur(GaussianBlur),
    MedianBlur(MedianBlur),
    Levels(Levels),
}

impl PreProcessor {
    /// Instantiates a step from its raw template entry. Relative assets
    /// (the marker image) resolve against `asset_dir`.
    pub fn from_spec(
        spec: &PreProcessorSpec,
        asset_dir: &Path,
        tuning: &TuningConfig,
    ) -> OmrResult<Self> {
        // A step declared without options gets an empty options object.
        let options = if spec.options.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            spec.options.clone()
        };
        match spec.name.as_str() {
            "CropPage" => Ok(Self::CropPage(CropPage::from_options(&options)?)),
            "CropOnMarkers" => Ok(Self::CropOnMarkers(CropOnMarkers::from_options(
                &options, asset_dir, tuning,
            )?)),
            "GaussianBlur" => Ok(Self::GaussianBlur(GaussianBlur::from_options(&options)?)),
            "MedianBlur" => Ok(Self::MedianBlur(MedianBlur::from_options(&options)?)),
            "Levels" => Ok(Self::Levels(Levels::from_options(&options)?)),
            other => Err(OmrError::config_error(format!(
                "unknown preprocessor '{other}'"
            ))),
        }
    }

    /// The step's kind tag, used for restricted pipeline runs.
    pub fn kind(&self) -> StepKind {
        match self {
            Self::CropPage(_) => StepKind::CropPage,
            Self::CropOnMarkers(_) => StepKind::CropOnMarkers,
            Self::GaussianBlur(_) => StepKind::GaussianBlur,
            Self::MedianBlur(_) => StepKind::MedianBlur,
            Self::Levels(_) => StepKind::Levels,
        }
    }

    /// The step's declared name, as it appears in template JSON.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CropPage(_) => "CropPage",
            Self::CropOnMarkers(_) => "CropOnMarkers",
            Self::GaussianBlur(_) => "GaussianBlur",
            Self::MedianBlur(_) => "MedianBlur",
            Self::Levels(_) => "Levels",
        }
    }

    /// Applies the transform. `Ok(None)` is the failure-signal that
    /// halts the pipeline for this sheet.
    pub fn apply(&self, img: GrayImage, tuning: &TuningConfig) -> OmrResult<Option<GrayImage>> {
        match self {
            Self::CropPage(step) => step.apply(img),
            Self::CropOnMarkers(step) => step.apply(img, tuning),
            Self::GaussianBlur(step) => Ok(Some(step.apply(img))),
            Self::MedianBlur(step) => Ok(Some(step.apply(img))),
            Self::Levels(step) => Ok(Some(step.apply(img))),
        }
    }

    /// Relative asset files this step consumes, which must never be
    /// treated as sheet images. Callers swallow a failure here into an
    /// empty set; a step that cannot report exclusions excludes nothing.
    pub fn exclude_files(&self) -> OmrResult<Vec<PathBuf>> {
        match self {
            Self::CropOnMarkers(step) => Ok(vec![step.marker_path().to_path_buf()]),
            _ => Ok(Vec::new()),
        }
    }
}

/// Applies a template's preprocessing chain to one sheet image.
///
/// The image is first resized to the configured processing dimensions,
/// then each step consumes the previous step's output in declared order.
/// A failure-signal from any step skips all remaining steps and returns
/// `Ok(None)`. When `restrict_to` is set, only steps of that kind run
/// (layout-preview behaviour).
pub fn apply_pipeline(
    steps: &[PreProcessor],
    img: GrayImage,
    tuning: &TuningConfig,
    restrict_to: Option<StepKind>,
) -> OmrResult<Option<GrayImage>> {
    let mut current = resize_gray(
        &img,
        tuning.dimensions.processing_width,
        tuning.dimensions.processing_height,
    );
    for step in steps {
        if let Some(kind) = restrict_to {
            if step.kind() != kind {
                debug!(step = step.name(), "skipping step in restricted pipeline run");
                continue;
            }
        }
        match step.apply(current, tuning)? {
            Some(next) => current = next,
            None => {
                warn!(step = step.name(), "preprocessing step signalled failure");
                return Ok(None);
            }
        }
    }
    Ok(Some(current))
}
