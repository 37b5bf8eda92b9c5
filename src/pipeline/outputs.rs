//! Per-subtree output destinations and append-only tabular files.
//!
//! One [`OutputsNamespace`] exists per (subtree root, resolved template)
//! pair, created lazily the first time that pair has processable images
//! and shared with descendants that inherit the same template. Rows are
//! flushed as they are appended so a crash mid-run preserves everything
//! processed up to that point.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, WriterBuilder};

use crate::core::errors::OmrResult;
use crate::template::Template;

/// Placeholder written in the score column of rows without a computed
/// score.
const SCORE_PLACEHOLDER: &str = "NA";

/// Physical output locations beneath one output root.
#[derive(Debug, Clone)]
pub struct Paths {
    pub output_dir: PathBuf,
    /// Successfully marked sheets and their visualizations.
    pub save_marked_dir: PathBuf,
    /// Tabular result files.
    pub results_dir: PathBuf,
    /// Sheets that failed preprocessing or recognition.
    pub errors_dir: PathBuf,
    /// Sheets held back for ambiguous multiple marks.
    pub multi_marked_dir: PathBuf,
    /// Grading artifacts.
    pub evaluation_dir: PathBuf,
}

impl Paths {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            save_marked_dir: output_dir.join("CheckedOMRs"),
            results_dir: output_dir.join("Results"),
            errors_dir: output_dir.join("Manual").join("ErrorFiles"),
            multi_marked_dir: output_dir.join("Manual").join("MultiMarkedFiles"),
            evaluation_dir: output_dir.join("Evaluation"),
        }
    }

    /// Creates every output subdirectory.
    pub fn create_dirs(&self) -> OmrResult<()> {
        for dir in [
            &self.output_dir,
            &self.save_marked_dir,
            &self.results_dir,
            &self.errors_dir,
            &self.multi_marked_dir,
            &self.evaluation_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Open output channels for one subtree and template.
pub struct OutputsNamespace {
    paths: Paths,
    output_columns: Vec<String>,
    empty_resp: Vec<String>,
    results: csv::Writer<File>,
    errors: csv::Writer<File>,
    multi_marked: csv::Writer<File>,
    accumulated: Vec<Vec<String>>,
}

impl OutputsNamespace {
    /// Opens the three tabular files beneath `paths`, writing the header
    /// row for files that do not yet have content. The header carries
    /// the template's ordered output columns.
    pub fn new(paths: Paths, template: &Template) -> OmrResult<Self> {
        let output_columns = template.output_columns.clone();
        let empty_resp = vec![template.empty_value.clone(); output_columns.len()];

        let header: Vec<String> = ["file_id", "input_path", "output_path", "score"]
            .iter()
            .map(|s| s.to_string())
            .chain(output_columns.iter().cloned())
            .collect();

        let results = open_channel(&paths.results_dir.join("Results.csv"), &header)?;
        let errors = open_channel(&paths.results_dir.join("ErrorFiles.csv"), &header)?;
        let multi_marked =
            open_channel(&paths.results_dir.join("MultiMarkedFiles.csv"), &header)?;

        Ok(Self {
            paths,
            output_columns,
            empty_resp,
            results,
            errors,
            multi_marked,
            accumulated: Vec::new(),
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// The placeholder response row used for sheets that never produced
    /// responses.
    pub fn empty_resp(&self) -> &[String] {
        &self.empty_resp
    }

    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    /// Rows accumulated in memory this run, in append order.
    pub fn accumulated_rows(&self) -> &[Vec<String>] {
        &self.accumulated
    }

    /// Appends a successfully recognized sheet to the results channel.
    pub fn append_result(
        &mut self,
        file_id: &str,
        input_path: &Path,
        output_path: &Path,
        score: f32,
        responses: &[String],
    ) -> OmrResult<()> {
        let row = build_row(file_id, input_path, output_path, &format_score(score), responses);
        self.results.write_record(&row)?;
        self.results.flush()?;
        self.accumulated.push(row);
        Ok(())
    }

    /// Appends a failed sheet to the errors channel with the placeholder
    /// response vector.
    pub fn append_error(
        &mut self,
        file_id: &str,
        input_path: &Path,
        output_path: &Path,
    ) -> OmrResult<()> {
        let responses = self.empty_resp.clone();
        let row = build_row(file_id, input_path, output_path, SCORE_PLACEHOLDER, &responses);
        self.errors.write_record(&row)?;
        self.errors.flush()?;
        self.accumulated.push(row);
        Ok(())
    }

    /// Appends an ambiguous multi-marked sheet to its channel.
    pub fn append_multi_marked(
        &mut self,
        file_id: &str,
        input_path: &Path,
        output_path: &Path,
        responses: &[String],
    ) -> OmrResult<()> {
        let row = build_row(file_id, input_path, output_path, SCORE_PLACEHOLDER, responses);
        self.multi_marked.write_record(&row)?;
        self.multi_marked.flush()?;
        self.accumulated.push(row);
        Ok(())
    }
}

fn build_row(
    file_id: &str,
    input_path: &Path,
    output_path: &Path,
    score: &str,
    responses: &[String],
) -> Vec<String> {
    let mut row = Vec::with_capacity(4 + responses.len());
    row.push(file_id.to_string());
    row.push(input_path.display().to_string());
    row.push(output_path.display().to_string());
    row.push(score.to_string());
    row.extend(responses.iter().cloned());
    row
}

fn format_score(score: f32) -> String {
    // trim trailing zeros but keep integers readable
    if score.fract() == 0.0 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

fn open_channel(path: &Path, header: &[String]) -> OmrResult<csv::Writer<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_new = file.metadata()?.len() == 0;
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .from_writer(file);
    if is_new {
        writer.write_record(header)?;
        writer.flush()?;
    }
    Ok(writer)
}
