//! Error types for the OMR batch pipeline.
//!
//! This module defines the error taxonomy used across the crate. Two
//! variants are fatal and unwind out of a whole orchestrator invocation:
//! [`OmrError::Structural`] (a malformed input tree, e.g. images with no
//! template anywhere in their ancestor chain) and [`OmrError::Usage`]
//! (a caller-supplied template byte source that is not template JSON).
//! Everything else is either absorbed locally by the directory walker or
//! wrapped as a [`OmrError::Processing`] error with stage context.

use thiserror::Error;

/// Enum identifying the stage of the pipeline an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Error occurred while applying preprocessing steps.
    Preprocessing,
    /// Error occurred while reading bubble responses.
    Recognition,
    /// Error occurred while grading responses against a scoring key.
    Evaluation,
    /// Error occurred while writing output rows or images.
    Output,
    /// Generic processing error.
    Generic,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Preprocessing => write!(f, "preprocessing"),
            ProcessingStage::Recognition => write!(f, "recognition"),
            ProcessingStage::Evaluation => write!(f, "evaluation"),
            ProcessingStage::Output => write!(f, "output"),
            ProcessingStage::Generic => write!(f, "processing"),
        }
    }
}

/// Enum representing the errors that can occur while processing a
/// directory tree of OMR sheets.
#[derive(Error, Debug)]
pub enum OmrError {
    /// The input tree itself is malformed; aborts the current subtree.
    #[error("structural error: {message}")]
    Structural {
        /// A message identifying the offending directory or input.
        message: String,
    },

    /// The caller supplied unusable input (e.g. a non-JSON template upload).
    #[error("usage error: {message}")]
    Usage {
        /// A message describing what the caller did wrong.
        message: String,
    },

    /// Error occurred while loading an image.
    #[error("image load")]
    ImageLoad(#[source] image::ImageError),

    /// Error occurred during a processing stage.
    #[error("{stage} failed: {context}")]
    Processing {
        /// The stage of the pipeline where the error occurred.
        stage: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error indicating a template / tuning / scoring-key problem.
    #[error("configuration: {message}")]
    Config {
        /// A message describing the configuration error.
        message: String,
    },

    /// Error parsing JSON configuration data.
    #[error("json parse")]
    Json(#[from] serde_json::Error),

    /// Error writing tabular output.
    #[error("tabular output")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

impl OmrError {
    /// Creates a structural error for a malformed input tree.
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
        }
    }

    /// Creates a usage error for invalid caller-supplied input.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a processing error with stage context.
    pub fn processing_error(
        stage: ProcessingStage,
        context: &str,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            stage,
            context: context.to_string(),
            source: Box::new(error),
        }
    }

    /// Creates a recognition-stage processing error.
    pub fn recognition_error(
        context: &str,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::processing_error(ProcessingStage::Recognition, context, error)
    }

    /// Returns true when this error must unwind out of the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Structural { .. } | Self::Usage { .. })
    }
}

impl From<image::ImageError> for OmrError {
    fn from(error: image::ImageError) -> Self {
        Self::ImageLoad(error)
    }
}

/// Convenient result alias for OMR operations.
pub type OmrResult<T> = Result<T, OmrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(OmrError::structural("no template under /x").is_fatal());
        assert!(OmrError::usage("not JSON").is_fatal());
        assert!(!OmrError::config_error("bad field").is_fatal());
        let io = OmrError::from(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert!(!io.is_fatal());
    }

    #[test]
    fn test_display_includes_stage() {
        let err = OmrError::recognition_error(
            "reading block A",
            std::io::Error::new(std::io::ErrorKind::InvalidData, "bad"),
        );
        assert_eq!(err.to_string(), "recognition failed: reading block A");
    }
}
