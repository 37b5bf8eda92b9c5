//! Layout template loading and bubble grid geometry.
//!
//! A template JSON file declares the sheet's reference dimensions, the
//! bubble grid as named field blocks, the ordered preprocessing chain and
//! the ordered output column names:
//!
//! ```json
//! {
//!   "pageDimensions": [300, 400],
//!   "bubbleDimensions": [20, 20],
//!   "preProcessors": [
//!     { "name": "CropOnMarkers", "options": { "relativePath": "omr_marker.jpg" } }
//!   ],
//!   "fieldBlocks": {
//!     "MCQBlock1": {
//!       "origin": [60, 60],
//!       "fieldType": "QTYPE_MCQ4",
//!       "fieldLabels": ["q1..4"],
//!       "bubblesGap": 40,
//!       "labelsGap": 40
//!     }
//!   },
//!   "outputColumns": ["q1", "q2", "q3", "q4"]
//! }
//! ```
//!
//! Templates are immutable after load: bubble coordinates are generated
//! once in template space and scaled to the processed image at read time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::core::config::TuningConfig;
use crate::core::errors::{OmrError, OmrResult};
use crate::processors::PreProcessor;

/// Conventional file name for a local layout template.
pub const TEMPLATE_FILENAME: &str = "template.json";

/// One selectable bubble: a value and its top-left position in template
/// page space.
#[derive(Debug, Clone, PartialEq)]
pub struct Bubble {
    pub value: String,
    pub x: f32,
    pub y: f32,
}

/// One question: a label and its ordered bubbles.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub label: String,
    pub bubbles: Vec<Bubble>,
}

/// A named group of fields sharing one origin and gap geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBlock {
    pub name: String,
    pub fields: Vec<Field>,
}

/// Axis along which a field's bubbles advance. Labels advance along the
/// perpendicular axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Horizontal,
    Vertical,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldBlockSpec {
    origin: [f32; 2],
    #[serde(rename = "bubblesGap")]
    bubbles_gap: f32,
    #[serde(rename = "labelsGap")]
    labels_gap: f32,
    #[serde(rename = "fieldLabels")]
    field_labels: Vec<String>,
    #[serde(rename = "fieldType", default)]
    field_type: Option<String>,
    #[serde(rename = "bubbleValues", default)]
    bubble_values: Option<Vec<String>>,
    #[serde(default)]
    direction: Option<Direction>,
}

/// Raw step entry as it appears in the template file.
#[derive(Debug, Clone, Deserialize)]
pub struct PreProcessorSpec {
    pub name: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(rename = "pageDimensions")]
    page_dimensions: [u32; 2],
    #[serde(rename = "bubbleDimensions")]
    bubble_dimensions: [u32; 2],
    #[serde(rename = "preProcessors", default)]
    pre_processors: Vec<PreProcessorSpec>,
    #[serde(rename = "fieldBlocks")]
    field_blocks: BTreeMap<String, FieldBlockSpec>,
    #[serde(rename = "outputColumns", default)]
    output_columns: Vec<String>,
    #[serde(rename = "emptyValue", default)]
    empty_value: Option<String>,
}

/// Immutable sheet layout: bubble grid geometry, instantiated
/// preprocessing chain and ordered output columns.
#[derive(Debug)]
pub struct Template {
    pub page_dimensions: (u32, u32),
    pub bubble_dimensions: (u32, u32),
    pub pre_processors: Vec<PreProcessor>,
    pub field_blocks: Vec<FieldBlock>,
    pub output_columns: Vec<String>,
    /// Value recorded for a field with no marked bubble.
    pub empty_value: String,
    /// Location the template was loaded from, for logging.
    pub source: PathBuf,
}

impl Template {
    /// Loads a template from a JSON file on disk. Relative asset paths
    /// named by preprocessing steps resolve against the template's own
    /// directory.
    pub fn load(path: &Path, tuning: &TuningConfig) -> OmrResult<Self> {
        let contents = fs::read_to_string(path)?;
        let asset_dir = path.parent().unwrap_or(Path::new("."));
        Self::from_json(&contents, asset_dir, path.to_path_buf(), tuning)
    }

    /// Builds a template from raw bytes supplied by a caller (e.g. an
    /// uploaded file). A byte source that is not template JSON is a
    /// usage error, not a crash. `asset_dir` is where relative step
    /// assets are searched.
    pub fn from_bytes(bytes: &[u8], asset_dir: &Path, tuning: &TuningConfig) -> OmrResult<Self> {
        let contents = std::str::from_utf8(bytes).map_err(|_| {
            OmrError::usage("supplied template is not valid UTF-8 JSON; expected a template JSON file")
        })?;
        if serde_json::from_str::<serde_json::Value>(contents).is_err() {
            return Err(OmrError::usage(
                "supplied template is not parseable as JSON; expected a template JSON file \
                 (if you meant to process a sheet image, place it in the input directory instead)",
            ));
        }
        Self::from_json(
            contents,
            asset_dir,
            asset_dir.join("<uploaded template>"),
            tuning,
        )
    }

    fn from_json(
        contents: &str,
        asset_dir: &Path,
        source: PathBuf,
        tuning: &TuningConfig,
    ) -> OmrResult<Self> {
        let raw: TemplateFile = serde_json::from_str(contents)?;

        let mut field_blocks = Vec::with_capacity(raw.field_blocks.len());
        for (name, spec) in &raw.field_blocks {
            field_blocks.push(build_field_block(name, spec, raw.page_dimensions)?);
        }

        let mut output_columns = raw.output_columns;
        if output_columns.is_empty() {
            output_columns = field_blocks
                .iter()
                .flat_map(|block| block.fields.iter().map(|f| f.label.clone()))
                .collect();
        } else {
            let known: Vec<&str> = field_blocks
                .iter()
                .flat_map(|block| block.fields.iter().map(|f| f.label.as_str()))
                .collect();
            for column in &output_columns {
                if !known.contains(&column.as_str()) {
                    warn!(
                        column = column.as_str(),
                        "output column does not match any field label in the template"
                    );
                }
            }
        }

        let mut pre_processors = Vec::with_capacity(raw.pre_processors.len());
        for spec in &raw.pre_processors {
            pre_processors.push(PreProcessor::from_spec(spec, asset_dir, tuning)?);
        }

        Ok(Self {
            page_dimensions: (raw.page_dimensions[0], raw.page_dimensions[1]),
            bubble_dimensions: (raw.bubble_dimensions[0], raw.bubble_dimensions[1]),
            pre_processors,
            field_blocks,
            output_columns,
            empty_value: raw.empty_value.unwrap_or_default(),
            source,
        })
    }

    /// All field labels in block declaration order.
    pub fn field_labels(&self) -> impl Iterator<Item = &str> {
        self.field_blocks
            .iter()
            .flat_map(|block| block.fields.iter().map(|f| f.label.as_str()))
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source.display())
    }
}

fn build_field_block(
    name: &str,
    spec: &FieldBlockSpec,
    page_dimensions: [u32; 2],
) -> OmrResult<FieldBlock> {
    let values = bubble_values_for(spec)?;
    let direction = spec.direction.unwrap_or(Direction::Horizontal);

    let mut labels = Vec::new();
    for label_spec in &spec.field_labels {
        expand_field_label(label_spec, &mut labels)?;
    }
    if labels.is_empty() {
        return Err(OmrError::config_error(format!(
            "field block '{name}' declares no field labels"
        )));
    }

    let mut fields = Vec::with_capacity(labels.len());
    for (field_index, label) in labels.into_iter().enumerate() {
        let mut bubbles = Vec::with_capacity(values.len());
        for (bubble_index, value) in values.iter().enumerate() {
            let (dx, dy) = match direction {
                Direction::Horizontal => (
                    bubble_index as f32 * spec.bubbles_gap,
                    field_index as f32 * spec.labels_gap,
                ),
                Direction::Vertical => (
                    field_index as f32 * spec.labels_gap,
                    bubble_index as f32 * spec.bubbles_gap,
                ),
            };
            let x = spec.origin[0] + dx;
            let y = spec.origin[1] + dy;
            if x < 0.0
                || y < 0.0
                || x >= page_dimensions[0] as f32
                || y >= page_dimensions[1] as f32
            {
                return Err(OmrError::config_error(format!(
                    "field block '{name}': bubble for '{label}' at ({x}, {y}) \
                     lies outside pageDimensions {page_dimensions:?}"
                )));
            }
            bubbles.push(Bubble {
                value: value.clone(),
                x,
                y,
            });
        }
        fields.push(Field { label, bubbles });
    }

    Ok(FieldBlock {
        name: name.to_string(),
        fields,
    })
}

fn bubble_values_for(spec: &FieldBlockSpec) -> OmrResult<Vec<String>> {
    if let Some(values) = &spec.bubble_values {
        if values.is_empty() {
            return Err(OmrError::config_error("bubbleValues must not be empty"));
        }
        return Ok(values.clone());
    }
    match spec.field_type.as_deref() {
        Some("QTYPE_MCQ4") => Ok(["A", "B", "C", "D"].map(String::from).to_vec()),
        Some("QTYPE_MCQ5") => Ok(["A", "B", "C", "D", "E"].map(String::from).to_vec()),
        Some("QTYPE_INT") => Ok((0..=9).map(|d| d.to_string()).collect()),
        Some(other) => Err(OmrError::config_error(format!(
            "unknown fieldType '{other}' (expected QTYPE_MCQ4, QTYPE_MCQ5 or QTYPE_INT, \
             or provide explicit bubbleValues)"
        ))),
        None => Err(OmrError::config_error(
            "field block needs either fieldType or bubbleValues",
        )),
    }
}

/// Expands a field label spec into `out`. Plain labels pass through;
/// `"q1..12"` expands to `q1, q2, ..., q12` inclusive.
pub fn expand_field_label(spec: &str, out: &mut Vec<String>) -> OmrResult<()> {
    let Some((start, end)) = spec.split_once("..") else {
        out.push(spec.to_string());
        return Ok(());
    };
    let digit_at = start
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| OmrError::config_error(format!("bad field label range '{spec}'")))?;
    let (prefix, from_str) = start.split_at(digit_at);
    let from: u32 = from_str
        .parse()
        .map_err(|_| OmrError::config_error(format!("bad field label range '{spec}'")))?;
    let to: u32 = end
        .parse()
        .map_err(|_| OmrError::config_error(format!("bad field label range '{spec}'")))?;
    if to < from {
        return Err(OmrError::config_error(format!(
            "field label range '{spec}' runs backwards"
        )));
    }
    for n in from..=to {
        out.push(format!("{prefix}{n}"));
    }
    Ok(())
}

/// Resolves a relative asset path declared inside a template.
///
/// The literal relative path is tried first; when absent, the asset
/// directory is searched for a case-insensitive file name match.
pub fn resolve_asset(asset_dir: &Path, relative: &str) -> Option<PathBuf> {
    let relative_path = Path::new(relative);
    if relative_path.is_absolute() {
        return relative_path.exists().then(|| relative_path.to_path_buf());
    }
    let candidate = asset_dir.join(relative_path);
    if candidate.exists() {
        return Some(candidate);
    }
    let wanted = relative_path.file_name()?.to_string_lossy().to_lowercase();
    let entries = fs::read_dir(asset_dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if let Some(name) = path.file_name() {
                if name.to_string_lossy().to_lowercase() == wanted {
                    return Some(path);
                }
            }
        }
    }
    None
}
