//! The hierarchical batch orchestrator.
//!
//! [`Orchestrator::run`] walks an input directory tree depth-first. Each
//! directory frame resolves its configuration scope, processes the sheet
//! images it contains, then recurses into its subdirectories in name
//! order. Output channels follow template scope: a directory that
//! resolves its own template opens a fresh outputs namespace, and
//! descendants inheriting that template append to it.
//!
//! Per-sheet failures are absorbed: a sheet that cannot be preprocessed
//! or recognized lands on the error channel and the walk continues.
//! Structural problems (missing input root, images with no template in
//! scope, a response missing a declared output column) abort the run.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::core::errors::{OmrError, OmrResult};
use crate::core::stats::Stats;
use crate::pipeline::classify::{check_and_move, classify_recognized, Outcome};
use crate::pipeline::outputs::{OutputsNamespace, Paths};
use crate::pipeline::scope::{resolve_scope, ConfigScope, ResolvedScope};
use crate::processors::{apply_pipeline, StepKind};
use crate::recognition::{BubbleReader, RecognitionEngine};
use crate::template::Template;
use crate::utils::image::load_gray;
use crate::utils::visualization::draw_template_layout;

/// Where an externally supplied root template comes from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// A template file anywhere on disk.
    Path(PathBuf),
    /// Raw template JSON, e.g. received over the network. Relative
    /// assets resolve against the input root.
    Bytes(Vec<u8>),
}

/// Run-wide options. Everything per-directory lives in [`ConfigScope`]
/// instead.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Root under which the output tree mirrors the input tree.
    pub output_dir: PathBuf,
    /// Template applied to the root frame, overriding a local
    /// `template.json` there.
    pub template: Option<TemplateSource>,
    /// Layout-preview mode: render the bubble grid over each sheet
    /// instead of recognizing it. Only marker-crop steps run.
    pub set_layout: bool,
}

impl RunOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            template: None,
            set_layout: false,
        }
    }

    pub fn with_template(mut self, source: TemplateSource) -> Self {
        self.template = Some(source);
        self
    }

    pub fn with_layout_preview(mut self) -> Self {
        self.set_layout = true;
        self
    }
}

/// Drives the whole batch: directory walk, preprocessing, recognition,
/// grading, classification and output rows.
#[derive(Debug, Default)]
pub struct Orchestrator<E = BubbleReader> {
    engine: E,
}

impl Orchestrator<BubbleReader> {
    /// An orchestrator using the built-in intensity-threshold reader.
    pub fn new() -> Self {
        Self {
            engine: BubbleReader::new(),
        }
    }
}

impl<E: RecognitionEngine> Orchestrator<E> {
    /// An orchestrator driving a custom recognition engine.
    pub fn with_engine(engine: E) -> Self {
        Self { engine }
    }

    /// Processes every sheet image under `input_dir`, mirroring the tree
    /// under `options.output_dir`. Statistics accumulate into `stats`
    /// across calls.
    pub fn run(&self, input_dir: &Path, options: &RunOptions, stats: &mut Stats) -> OmrResult<()> {
        if !input_dir.is_dir() {
            return Err(OmrError::structural(format!(
                "input directory '{}' does not exist",
                input_dir.display()
            )));
        }
        info!(
            input = %input_dir.display(),
            output = %options.output_dir.display(),
            set_layout = options.set_layout,
            "starting batch run"
        );
        self.process_dir(
            input_dir,
            input_dir,
            options,
            &ConfigScope::default(),
            options.template.as_ref(),
            None,
            stats,
        )?;
        info!(
            files_moved = stats.files_moved,
            files_not_moved = stats.files_not_moved,
            "batch run complete"
        );
        Ok(())
    }

    /// One recursion frame: resolve scope, process this directory's
    /// images, recurse into subdirectories.
    #[allow(clippy::too_many_arguments)]
    fn process_dir(
        &self,
        root: &Path,
        curr: &Path,
        options: &RunOptions,
        parent_scope: &ConfigScope,
        injected: Option<&TemplateSource>,
        inherited_outputs: Option<Rc<RefCell<OutputsNamespace>>>,
        stats: &mut Stats,
    ) -> OmrResult<()> {
        let resolved = resolve_scope(curr, parent_scope, injected, options.set_layout)?;

        // A locally resolved template starts a new output scope; rows
        // from sheets under different templates never share a file.
        let mut outputs = if resolved.template_is_local {
            None
        } else {
            inherited_outputs
        };

        let images = discover_images(curr, &resolved.scope)?;
        log_config_summary(curr, &resolved, images.len(), options.set_layout);
        if !images.is_empty() {
            let template = resolved.scope.template.as_deref().ok_or_else(|| {
                OmrError::structural(format!(
                    "found {} image(s) in '{}' but no template in scope",
                    images.len(),
                    curr.display()
                ))
            })?;

            let rel = curr.strip_prefix(root).unwrap_or(Path::new(""));
            let paths = Paths::new(&options.output_dir.join(rel));

            if options.set_layout {
                paths.create_dirs()?;
                self.show_template_layouts(&images, template, &resolved.scope, &paths)?;
            } else {
                let outputs = match &outputs {
                    Some(existing) => Rc::clone(existing),
                    None => {
                        paths.create_dirs()?;
                        let ns = OutputsNamespace::new(paths, template)?;
                        let shared = Rc::new(RefCell::new(ns));
                        outputs = Some(Rc::clone(&shared));
                        shared
                    }
                };
                self.process_files(
                    &images,
                    template,
                    &resolved.scope,
                    &mut outputs.borrow_mut(),
                    stats,
                )?;
            }
        }

        let mut subdirs: Vec<PathBuf> = std::fs::read_dir(curr)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        subdirs.sort();
        for subdir in subdirs {
            self.process_dir(
                root,
                &subdir,
                options,
                &resolved.scope,
                None,
                outputs.clone(),
                stats,
            )?;
        }
        Ok(())
    }

    /// Processes the sheet images of one directory against its resolved
    /// scope. Every image gets exactly one outcome and one output row;
    /// only an undecodable file is skipped (logged, no row, no count).
    fn process_files(
        &self,
        images: &[PathBuf],
        template: &Template,
        scope: &ConfigScope,
        outputs: &mut OutputsNamespace,
        stats: &mut Stats,
    ) -> OmrResult<()> {
        let tuning = &scope.tuning;
        for path in images {
            let file_id = file_name_of(path);
            let gray = match load_gray(path) {
                Ok(img) => img,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "could not decode image, skipping");
                    continue;
                }
            };

            let outcome = match apply_pipeline(&template.pre_processors, gray, tuning, None) {
                Err(e) => {
                    error!(file = %path.display(), error = %e, "preprocessing failed");
                    Outcome::RecognitionFailure
                }
                Ok(None) => Outcome::RecognitionFailure,
                Ok(Some(processed)) => {
                    let save_dir = outputs.paths().save_marked_dir.clone();
                    match self.engine.read_response(
                        template,
                        &processed,
                        &file_id,
                        Some(&save_dir),
                        tuning,
                    ) {
                        Err(e) => {
                            error!(file = %path.display(), error = %e, "recognition failed");
                            Outcome::RecognitionFailure
                        }
                        Ok(output) => {
                            let score = scope
                                .evaluation
                                .as_ref()
                                .map(|eval| eval.evaluate(&output.responses))
                                .unwrap_or(0.0);
                            let outcome = classify_recognized(
                                output.multi_marked,
                                tuning.outputs.filter_out_multimarked_files,
                                score,
                            );
                            if let Outcome::Success { score } = outcome {
                                let responses = project_response(
                                    &output.responses,
                                    outputs.output_columns(),
                                )?;
                                let dest = outputs.paths().save_marked_dir.join(&file_id);
                                info!(
                                    file = file_id.as_str(),
                                    score,
                                    multi_marked = output.multi_marked,
                                    "sheet recognized"
                                );
                                stats.files_not_moved += 1;
                                outputs.append_result(&file_id, path, &dest, score, &responses)?;
                                continue;
                            }
                            // multi-marked falls through to the routing
                            // below with its responses preserved
                            let responses =
                                project_response(&output.responses, outputs.output_columns())?;
                            let dest = outputs.paths().multi_marked_dir.join(&file_id);
                            warn!(file = file_id.as_str(), "sheet has ambiguous multiple marks");
                            if check_and_move(stats, path, &dest) {
                                outputs.append_multi_marked(&file_id, path, &dest, &responses)?;
                            }
                            continue;
                        }
                    }
                }
            };

            debug_assert_eq!(outcome, Outcome::RecognitionFailure);
            let dest = outputs.paths().errors_dir.join(&file_id);
            if check_and_move(stats, path, &dest) {
                outputs.append_error(&file_id, path, &dest)?;
            }
        }
        Ok(())
    }

    /// Layout-preview mode: run only the marker-crop steps, then render
    /// the template's bubble grid over each sheet.
    fn show_template_layouts(
        &self,
        images: &[PathBuf],
        template: &Template,
        scope: &ConfigScope,
        paths: &Paths,
    ) -> OmrResult<()> {
        for path in images {
            let file_id = file_name_of(path);
            let gray = match load_gray(path) {
                Ok(img) => img,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "could not decode image, skipping");
                    continue;
                }
            };
            let aligned = match apply_pipeline(
                &template.pre_processors,
                gray,
                &scope.tuning,
                Some(StepKind::CropOnMarkers),
            )? {
                Some(img) => img,
                None => {
                    warn!(file = %path.display(), "marker alignment failed, skipping preview");
                    continue;
                }
            };
            let layout = draw_template_layout(template, &aligned);
            let dest = paths.save_marked_dir.join(&file_id);
            layout
                .save(&dest)
                .map_err(|e| OmrError::structural(format!(
                    "saving layout preview to '{}': {e}",
                    dest.display()
                )))?;
            info!(file = file_id.as_str(), dest = %dest.display(), "layout preview saved");
        }
        Ok(())
    }
}

/// Lists this directory's sheet images in name order, minus any files a
/// scope component claims as its own asset (alignment markers, answer
/// key images).
fn discover_images(dir: &Path, scope: &ConfigScope) -> OmrResult<Vec<PathBuf>> {
    let mut excluded: HashSet<PathBuf> = HashSet::new();
    if let Some(template) = &scope.template {
        for step in &template.pre_processors {
            match step.exclude_files() {
                Ok(files) => excluded.extend(files),
                Err(e) => {
                    warn!(step = step.name(), error = %e, "exclusion query failed, excluding nothing");
                }
            }
        }
    }
    if let Some(evaluation) = &scope.evaluation {
        excluded.extend(evaluation.exclude_files().iter().cloned());
    }

    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_image_extension(path))
        .filter(|path| !excluded.contains(path))
        .collect();
    images.sort();
    debug!(dir = %dir.display(), count = images.len(), "discovered sheet images");
    Ok(images)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ext == "png" || ext == "jpg" || ext == "jpeg"
        })
        .unwrap_or(false)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Orders a response map by the declared output columns. A column with
/// no response is a layout/template mismatch and aborts the run.
fn project_response(
    responses: &HashMap<String, String>,
    output_columns: &[String],
) -> OmrResult<Vec<String>> {
    output_columns
        .iter()
        .map(|column| {
            responses.get(column).cloned().ok_or_else(|| {
                OmrError::structural(format!(
                    "recognition produced no response for output column '{column}'"
                ))
            })
        })
        .collect()
}

/// Logged for every directory that either carries local configuration
/// or actually has sheets to process.
fn log_config_summary(dir: &Path, resolved: &ResolvedScope, image_count: usize, set_layout: bool) {
    let has_local = resolved.local_config.is_some()
        || resolved.template_is_local
        || resolved.local_evaluation.is_some();
    if image_count == 0 && !has_local {
        return;
    }
    let (steps, marker_detection) = match &resolved.scope.template {
        Some(template) => (
            template
                .pre_processors
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(","),
            template
                .pre_processors
                .iter()
                .any(|s| s.kind() == StepKind::CropOnMarkers),
        ),
        None => (String::new(), false),
    };
    let template = resolved
        .scope
        .template
        .as_ref()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "none".to_string());
    let evaluation = resolved
        .scope
        .evaluation
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "none".to_string());
    let alignment = &resolved.scope.tuning.alignment_params;
    info!(
        dir = %dir.display(),
        images = image_count,
        set_layout,
        marker_detection,
        auto_align = alignment.auto_align,
        align_match_range = alignment.match_range,
        steps = steps.as_str(),
        local_tuning = resolved.local_config.is_some(),
        template = template.as_str(),
        evaluation = evaluation.as_str(),
        "configuration scope resolved"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_summary_reports_scope_details() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(crate::template::TEMPLATE_FILENAME),
            r#"{
                "pageDimensions": [100, 100],
                "bubbleDimensions": [10, 10],
                "preProcessors": [{ "name": "GaussianBlur" }],
                "fieldBlocks": {
                    "B": {
                        "origin": [10, 10],
                        "bubbleValues": ["A", "B"],
                        "fieldLabels": ["q1"],
                        "bubblesGap": 20,
                        "labelsGap": 20
                    }
                }
            }"#,
        )
        .unwrap();
        let resolved = resolve_scope(dir.path(), &ConfigScope::default(), None, false).unwrap();

        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            log_config_summary(dir.path(), &resolved, 3, false);
        });

        let out = logs.contents();
        assert!(out.contains("configuration scope resolved"));
        assert!(out.contains("images=3"));
        assert!(out.contains("set_layout=false"));
        assert!(out.contains("marker_detection=false"));
        assert!(out.contains("auto_align=false"));
        assert!(out.contains("steps=\"GaussianBlur\""));
    }

    #[test]
    fn test_config_summary_skips_empty_inherited_frames() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_scope(dir.path(), &ConfigScope::default(), None, false).unwrap();

        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            log_config_summary(dir.path(), &resolved, 0, false);
        });
        assert!(logs.contents().is_empty());
    }

    #[test]
    fn test_missing_input_dir_is_structural() {
        let options = RunOptions::new("out");
        let mut stats = Stats::default();
        let err = Orchestrator::new()
            .run(Path::new("/nonexistent/input"), &options, &mut stats)
            .unwrap_err();
        assert!(matches!(err, OmrError::Structural { .. }));
    }

    #[test]
    fn test_discover_images_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.jpeg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let images = discover_images(dir.path(), &ConfigScope::default()).unwrap();
        let names: Vec<String> = images.iter().map(|p| file_name_of(p)).collect();
        assert_eq!(names, ["a.jpg", "b.PNG", "c.jpeg"]);
    }

    #[test]
    fn test_project_response_orders_by_columns() {
        let responses: HashMap<String, String> = [("q1", "A"), ("q2", "B")]
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .into();
        let columns = vec!["q2".to_string(), "q1".to_string()];
        assert_eq!(project_response(&responses, &columns).unwrap(), ["B", "A"]);

        let missing = vec!["q3".to_string()];
        assert!(matches!(
            project_response(&responses, &missing).unwrap_err(),
            OmrError::Structural { .. }
        ));
    }

    #[test]
    fn test_run_options_builder() {
        let options = RunOptions::new("outputs")
            .with_template(TemplateSource::Path(PathBuf::from("t.json")))
            .with_layout_preview();
        assert!(options.template.is_some());
        assert!(options.set_layout);
        assert_eq!(options.output_dir, PathBuf::from("outputs"));
    }
}
