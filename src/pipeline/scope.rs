//! Per-directory configuration scope resolution.
//!
//! Each recursion frame derives its scope from the parent's resolved
//! scope plus whatever override files the directory itself carries.
//! The three sub-objects resolve independently: a directory may override
//! just its tuning parameters and keep inheriting template and scoring
//! key, or any other combination. A directory carrying none of the
//! three files inherits the parent scope unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::core::config::{TuningConfig, CONFIG_FILENAME};
use crate::core::errors::OmrResult;
use crate::evaluation::{EvaluationConfig, EVALUATION_FILENAME};
use crate::pipeline::walker::TemplateSource;
use crate::template::{Template, TEMPLATE_FILENAME};

/// The resolved bundle of tuning parameters, layout template and scoring
/// key for one directory node.
#[derive(Debug, Clone, Default)]
pub struct ConfigScope {
    pub tuning: Arc<TuningConfig>,
    pub template: Option<Arc<Template>>,
    pub evaluation: Option<Arc<EvaluationConfig>>,
}

/// A scope plus bookkeeping about which parts this directory overrode.
#[derive(Debug)]
pub struct ResolvedScope {
    pub scope: ConfigScope,
    /// True when this directory (or an injected root template) replaced
    /// the inherited template; descendants then need a fresh outputs
    /// namespace.
    pub template_is_local: bool,
    /// Local tuning file, when present, for the configuration summary.
    pub local_config: Option<PathBuf>,
    /// Local scoring key file, when present.
    pub local_evaluation: Option<PathBuf>,
}

/// Resolves the configuration scope for one directory node.
///
/// `injected` carries an externally supplied template and is only ever
/// `Some` for the root frame. In layout-preview mode scoring keys are
/// not loaded.
pub fn resolve_scope(
    dir: &Path,
    parent: &ConfigScope,
    injected: Option<&TemplateSource>,
    set_layout: bool,
) -> OmrResult<ResolvedScope> {
    // Tuning: a local file re-merges against defaults, not against the
    // parent's resolved values.
    let local_config_path = dir.join(CONFIG_FILENAME);
    let (tuning, local_config) = if local_config_path.is_file() {
        (
            Arc::new(TuningConfig::from_file(&local_config_path)?),
            Some(local_config_path),
        )
    } else {
        (Arc::clone(&parent.tuning), None)
    };

    // Template: injection wins at the root, then a local file, then the
    // inherited reference.
    let mut template_is_local = false;
    let template = if let Some(source) = injected {
        template_is_local = true;
        let loaded = match source {
            TemplateSource::Path(path) => Template::load(path, &tuning)?,
            TemplateSource::Bytes(bytes) => Template::from_bytes(bytes, dir, &tuning)?,
        };
        Some(Arc::new(loaded))
    } else {
        let local_template_path = dir.join(TEMPLATE_FILENAME);
        if local_template_path.is_file() {
            template_is_local = true;
            Some(Arc::new(Template::load(&local_template_path, &tuning)?))
        } else {
            parent.template.clone()
        }
    };

    // Scoring key: ignored entirely in layout-preview mode.
    let local_evaluation_path = dir.join(EVALUATION_FILENAME);
    let (evaluation, local_evaluation) = if !set_layout && local_evaluation_path.is_file() {
        if template.is_none() {
            warn!(
                path = %local_evaluation_path.display(),
                "found a scoring key without a template anywhere in scope; \
                 the file may be misplaced"
            );
        }
        let loaded = EvaluationConfig::load(
            dir,
            &local_evaluation_path,
            template.as_deref(),
            &tuning,
        )?;
        (Some(Arc::new(loaded)), Some(local_evaluation_path))
    } else {
        (parent.evaluation.clone(), None)
    };

    Ok(ResolvedScope {
        scope: ConfigScope {
            tuning,
            template,
            evaluation,
        },
        template_is_local,
        local_config,
        local_evaluation,
    })
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

    fn minimal_template_json() -> &'static str {
        r#"{
            "pageDimensions": [100, 100],
            "bubbleDimensions": [10, 10],
            "fieldBlocks": {
                "B": {
                    "origin": [10, 10],
                    "bubbleValues": ["A", "B"],
                    "fieldLabels": ["q1"],
                    "bubblesGap": 20,
                    "labelsGap": 20
                }
            }
        }"#
    }

    #[test]
    fn test_empty_directory_inherits_parent_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let parent = ConfigScope::default();
        let resolved = resolve_scope(dir.path(), &parent, None, false).unwrap();
        assert!(Arc::ptr_eq(&resolved.scope.tuning, &parent.tuning));
        assert!(resolved.scope.template.is_none());
        assert!(!resolved.template_is_local);
    }

    #[test]
    fn test_local_tuning_remerges_from_defaults_not_parent() {
        let dir = tempfile::tempdir().unwrap();
        // parent resolved a non-default filter flag
        let mut parent_tuning = TuningConfig::default();
        parent_tuning.outputs.filter_out_multimarked_files = true;
        let parent = ConfigScope {
            tuning: Arc::new(parent_tuning),
            template: None,
            evaluation: None,
        };
        // the child's local file overrides an unrelated key only
        fs::write(
            dir.path().join(CONFIG_FILENAME),
            r#"{"threshold_params": {"min_jump": 40}}"#,
        )
        .unwrap();
        let resolved = resolve_scope(dir.path(), &parent, None, false).unwrap();
        assert_eq!(resolved.scope.tuning.threshold_params.min_jump, 40.0);
        // the parent's non-default value does not survive the re-merge
        assert!(!resolved.scope.tuning.outputs.filter_out_multimarked_files);
    }

    #[test]
    fn test_local_template_marks_scope_local() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(TEMPLATE_FILENAME), minimal_template_json()).unwrap();
        let resolved = resolve_scope(dir.path(), &ConfigScope::default(), None, false).unwrap();
        assert!(resolved.template_is_local);
        assert!(resolved.scope.template.is_some());
    }

    #[test]
    fn test_injected_bytes_template() {
        let dir = tempfile::tempdir().unwrap();
        let source = TemplateSource::Bytes(minimal_template_json().as_bytes().to_vec());
        let resolved =
            resolve_scope(dir.path(), &ConfigScope::default(), Some(&source), false).unwrap();
        assert!(resolved.template_is_local);
        assert!(resolved.scope.template.is_some());
    }

    #[test]
    fn test_scoring_key_without_template_warns_but_resolves() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(EVALUATION_FILENAME),
            r#"{"options": {"questions_in_order": ["q1"], "answers_in_order": ["A"]}}"#,
        )
        .unwrap();

        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        let resolved = tracing::subscriber::with_default(subscriber, || {
            resolve_scope(dir.path(), &ConfigScope::default(), None, false)
        })
        .unwrap();

        // a misplaced key is advisory only; resolution carries on
        assert!(resolved.scope.evaluation.is_some());
        assert!(resolved.scope.template.is_none());
        assert!(logs.contents().contains("scoring key without a template"));
    }

    #[test]
    fn test_scoring_key_skipped_in_layout_mode() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(TEMPLATE_FILENAME), minimal_template_json()).unwrap();
        fs::write(
            dir.path().join(EVALUATION_FILENAME),
            r#"{"options": {"questions_in_order": ["q1"], "answers_in_order": ["A"]}}"#,
        )
        .unwrap();
        let with_layout =
            resolve_scope(dir.path(), &ConfigScope::default(), None, true).unwrap();
        assert!(with_layout.scope.evaluation.is_none());
        let without_layout =
            resolve_scope(dir.path(), &ConfigScope::default(), None, false).unwrap();
        assert!(without_layout.scope.evaluation.is_some());
    }
}
