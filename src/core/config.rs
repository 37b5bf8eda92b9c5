//! Tuning parameters with system-wide defaults.
//!
//! A directory may carry a local `config.json` overriding any subset of
//! these knobs. Resolution is deliberately a merge of *defaults* with the
//! local file (local keys win), never a merge against the parent
//! directory's already-resolved parameters: a child that re-specifies a
//! config file starts from defaults again. `#[serde(default)]` on every
//! level gives exactly that key-by-key semantics.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::core::errors::{OmrError, OmrResult};

/// Conventional file name for local tuning parameters.
pub const CONFIG_FILENAME: &str = "config.json";

/// Display and processing dimensions.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Dimensions {
    pub display_width: u32,
    pub display_height: u32,
    pub processing_width: u32,
    pub processing_height: u32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            display_width: 1280,
            display_height: 960,
            processing_width: 666,
            processing_height: 820,
        }
    }
}

/// Bubble intensity thresholding knobs used by the built-in reader.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdParams {
    /// Fallback fill cutoff on the 0-255 intensity scale; a bubble whose
    /// mean intensity falls below it counts as marked.
    pub global_threshold: f32,
    /// Minimum intensity jump between sorted bubble means for a field to
    /// get its own local threshold instead of the global one.
    pub min_jump: f32,
    /// Surplus over the local jump midpoint required to call a detection
    /// confident (diagnostic only).
    pub confident_surplus: f32,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            global_threshold: 200.0,
            min_jump: 25.0,
            confident_surplus: 5.0,
        }
    }
}

/// Marker alignment knobs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlignmentParams {
    pub auto_align: bool,
    /// Search tolerance around expected marker positions, in pixels.
    pub match_range: u32,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            auto_align: false,
            match_range: 20,
        }
    }
}

/// Output behaviour switches.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputParams {
    /// 0 disables on-screen style diagnostics entirely.
    pub show_image_level: u8,
    /// 1 and above writes the final marked visualization per sheet.
    pub save_image_level: u8,
    /// When true, sheets with any multi-marked field are routed to the
    /// multi-marked channel instead of the results channel.
    pub filter_out_multimarked_files: bool,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            show_image_level: 0,
            save_image_level: 1,
            filter_out_multimarked_files: false,
        }
    }
}

/// Numeric and behavioural tuning knobs, overridable per directory.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TuningConfig {
    pub dimensions: Dimensions,
    pub threshold_params: ThresholdParams,
    pub alignment_params: AlignmentParams,
    pub outputs: OutputParams,
}

impl TuningConfig {
    /// Loads a local config file merged key-by-key over the defaults.
    pub fn from_file(path: &Path) -> OmrResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: TuningConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates ranges that serde alone cannot express.
    pub fn validate(&self) -> OmrResult<()> {
        if self.threshold_params.global_threshold <= 0.0
            || self.threshold_params.global_threshold > 255.0
        {
            return Err(OmrError::config_error(format!(
                "threshold_params.global_threshold must be in (0, 255], got {}",
                self.threshold_params.global_threshold
            )));
        }
        if self.threshold_params.min_jump < 0.0 {
            return Err(OmrError::config_error(format!(
                "threshold_params.min_jump must be non-negative, got {}",
                self.threshold_params.min_jump
            )));
        }
        if self.dimensions.processing_width == 0 || self.dimensions.processing_height == 0 {
            return Err(OmrError::config_error(
                "dimensions.processing_width and processing_height must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TuningConfig::default();
        assert_eq!(config.threshold_params.global_threshold, 200.0);
        assert!(!config.outputs.filter_out_multimarked_files);
        assert_eq!(config.dimensions.processing_width, 666);
    }

    #[test]
    fn test_partial_override_keeps_default_siblings() {
        let config: TuningConfig = serde_json::from_str(
            r#"{"outputs": {"filter_out_multimarked_files": true}}"#,
        )
        .unwrap();
        assert!(config.outputs.filter_out_multimarked_files);
        // untouched keys come from defaults, not from any parent scope
        assert_eq!(config.outputs.save_image_level, 1);
        assert_eq!(config.threshold_params.min_jump, 25.0);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = TuningConfig::default();
        config.threshold_params.global_threshold = 300.0;
        assert!(config.validate().is_err());
        config.threshold_params.global_threshold = 0.0;
        assert!(config.validate().is_err());
    }
}
