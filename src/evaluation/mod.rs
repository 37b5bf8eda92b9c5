//! Scoring keys: per-directory answer keys plus marking schemes.
//!
//! An `evaluation.json` file declares the expected answers in question
//! order and one or more marking schemes:
//!
//! ```json
//! {
//!   "options": {
//!     "questions_in_order": ["q1..4"],
//!     "answers_in_order": ["A", "B", ["C", "D"], "D"]
//!   },
//!   "marking_schemes": {
//!     "DEFAULT": { "correct": "3", "incorrect": "-1", "unmarked": "0" }
//!   }
//! }
//! ```
//!
//! Section schemes may override the default for a subset of questions
//! via `{ "marking": {...}, "questions": ["q1..2"] }` entries. An answer
//! given as a list accepts any of its values as correct.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::core::config::TuningConfig;
use crate::core::errors::{OmrError, OmrResult};
use crate::template::{expand_field_label, resolve_asset, Template};

/// Conventional file name for a local scoring key.
pub const EVALUATION_FILENAME: &str = "evaluation.json";

/// A marking value may appear as a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MarkValue {
    Number(f32),
    Text(String),
}

impl MarkValue {
    fn as_f32(&self) -> OmrResult<f32> {
        match self {
            MarkValue::Number(n) => Ok(*n),
            MarkValue::Text(s) => s.trim().parse().map_err(|_| {
                OmrError::config_error(format!("marking value '{s}' is not numeric"))
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SchemeValues {
    correct: MarkValue,
    incorrect: MarkValue,
    unmarked: MarkValue,
}

/// Either the DEFAULT scheme (bare values) or a section scheme scoped to
/// a question list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SchemeSpec {
    Default(SchemeValues),
    Section {
        marking: SchemeValues,
        questions: Vec<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AnswerSpec {
    One(String),
    AnyOf(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct OptionsSpec {
    questions_in_order: Vec<String>,
    answers_in_order: Vec<AnswerSpec>,
    #[serde(default)]
    answer_key_image_path: Option<String>,
    #[serde(default)]
    answer_key_csv_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EvaluationFile {
    options: OptionsSpec,
    #[serde(default)]
    marking_schemes: BTreeMap<String, SchemeSpec>,
}

/// Score deltas applied per verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkingScheme {
    pub correct: f32,
    pub incorrect: f32,
    pub unmarked: f32,
}

impl Default for MarkingScheme {
    fn default() -> Self {
        Self {
            correct: 1.0,
            incorrect: 0.0,
            unmarked: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct Question {
    label: String,
    answers: Vec<String>,
    scheme: MarkingScheme,
}

/// A resolved scoring key for one directory scope.
#[derive(Debug)]
pub struct EvaluationConfig {
    questions: Vec<Question>,
    exclude: Vec<PathBuf>,
    source: PathBuf,
}

impl EvaluationConfig {
    /// Loads a scoring key from `evaluation.json` in `dir`.
    ///
    /// `template` is the currently resolved layout template; a scoring
    /// key without one in scope is a misplaced file and only warned
    /// about by the caller. Tuning parameters are accepted for parity
    /// with the scope contract but do not affect scoring.
    pub fn load(
        dir: &Path,
        path: &Path,
        template: Option<&Template>,
        _tuning: &TuningConfig,
    ) -> OmrResult<Self> {
        let contents = fs::read_to_string(path)?;
        let raw: EvaluationFile = serde_json::from_str(&contents)?;

        let mut labels = Vec::new();
        for spec in &raw.options.questions_in_order {
            expand_field_label(spec, &mut labels)?;
        }
        if labels.len() != raw.options.answers_in_order.len() {
            return Err(OmrError::config_error(format!(
                "{}: {} questions but {} answers",
                path.display(),
                labels.len(),
                raw.options.answers_in_order.len()
            )));
        }

        let default_scheme = match raw.marking_schemes.get("DEFAULT") {
            Some(SchemeSpec::Default(values)) => MarkingScheme {
                correct: values.correct.as_f32()?,
                incorrect: values.incorrect.as_f32()?,
                unmarked: values.unmarked.as_f32()?,
            },
            Some(SchemeSpec::Section { .. }) => {
                return Err(OmrError::config_error(
                    "DEFAULT marking scheme must not declare a question list",
                ))
            }
            None => MarkingScheme::default(),
        };

        let mut scheme_by_label: HashMap<String, MarkingScheme> = HashMap::new();
        for (name, spec) in &raw.marking_schemes {
            if name == "DEFAULT" {
                continue;
            }
            let SchemeSpec::Section { marking, questions } = spec else {
                return Err(OmrError::config_error(format!(
                    "marking scheme '{name}' must declare marking and questions"
                )));
            };
            let scheme = MarkingScheme {
                correct: marking.correct.as_f32()?,
                incorrect: marking.incorrect.as_f32()?,
                unmarked: marking.unmarked.as_f32()?,
            };
            let mut section_labels = Vec::new();
            for spec in questions {
                expand_field_label(spec, &mut section_labels)?;
            }
            for label in section_labels {
                scheme_by_label.insert(label, scheme);
            }
        }

        if let Some(template) = template {
            for label in &labels {
                if !template.field_labels().any(|l| l == label) {
                    warn!(
                        question = label.as_str(),
                        template = %template,
                        "scoring key question has no matching field in the template"
                    );
                }
            }
        }

        let questions = labels
            .into_iter()
            .zip(&raw.options.answers_in_order)
            .map(|(label, answer)| {
                let answers = match answer {
                    AnswerSpec::One(a) => vec![a.clone()],
                    AnswerSpec::AnyOf(list) => list.clone(),
                };
                let scheme = scheme_by_label
                    .get(&label)
                    .copied()
                    .unwrap_or(default_scheme);
                Question {
                    label,
                    answers,
                    scheme,
                }
            })
            .collect();

        let mut exclude = Vec::new();
        for asset in [
            raw.options.answer_key_image_path.as_deref(),
            raw.options.answer_key_csv_path.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            match resolve_asset(dir, asset) {
                Some(resolved) => exclude.push(resolved),
                None => warn!(asset, dir = %dir.display(), "answer key asset not found"),
            }
        }

        Ok(Self {
            questions,
            exclude,
            source: path.to_path_buf(),
        })
    }

    /// Computes the numeric score for one sheet's responses. A missing
    /// or empty response is unmarked; a response equal to any accepted
    /// answer is correct; anything else is incorrect.
    pub fn evaluate(&self, responses: &HashMap<String, String>) -> f32 {
        let mut score = 0.0;
        for question in &self.questions {
            let response = responses.get(&question.label).map(String::as_str);
            let delta = match response {
                None | Some("") => question.scheme.unmarked,
                Some(value) if question.answers.iter().any(|a| a == value) => {
                    question.scheme.correct
                }
                Some(_) => question.scheme.incorrect,
            };
            score += delta;
        }
        score
    }

    /// Maximum attainable score: every question correct.
    pub fn max_score(&self) -> f32 {
        self.questions.iter().map(|q| q.scheme.correct).sum()
    }

    /// Baseline score: every question left unmarked.
    pub fn min_score(&self) -> f32 {
        self.questions.iter().map(|q| q.scheme.unmarked).sum()
    }

    /// Relative asset files consumed by this key (e.g. an answer key
    /// image) which must never be treated as sheet images.
    pub fn exclude_files(&self) -> &[PathBuf] {
        &self.exclude
    }
}

impl std::fmt::Display for EvaluationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_evaluation(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join(EVALUATION_FILENAME);
        fs::write(&path, json).unwrap();
        path
    }

    fn load(dir: &Path, json: &str) -> EvaluationConfig {
        let path = write_evaluation(dir, json);
        EvaluationConfig::load(dir, &path, None, &TuningConfig::default()).unwrap()
    }

    #[test]
    fn test_exact_match_scores_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            r#"{
                "options": {
                    "questions_in_order": ["q1..3"],
                    "answers_in_order": ["A", "B", ["C", "D"]]
                },
                "marking_schemes": {
                    "DEFAULT": { "correct": "3", "incorrect": "-1", "unmarked": 0 }
                }
            }"#,
        );
        let responses: HashMap<String, String> = [("q1", "A"), ("q2", "B"), ("q3", "D")]
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .into();
        assert_eq!(config.evaluate(&responses), config.max_score());
        assert_eq!(config.max_score(), 9.0);
    }

    #[test]
    fn test_blank_responses_score_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            r#"{
                "options": {
                    "questions_in_order": ["q1..3"],
                    "answers_in_order": ["A", "B", "C"]
                },
                "marking_schemes": {
                    "DEFAULT": { "correct": 4, "incorrect": -1, "unmarked": 0.5 }
                }
            }"#,
        );
        let blank: HashMap<String, String> =
            (1..=3).map(|n| (format!("q{n}"), String::new())).collect();
        assert_eq!(config.evaluate(&blank), config.min_score());
        assert_eq!(config.min_score(), 1.5);
    }

    #[test]
    fn test_section_scheme_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            r#"{
                "options": {
                    "questions_in_order": ["q1", "q2"],
                    "answers_in_order": ["A", "A"]
                },
                "marking_schemes": {
                    "DEFAULT": { "correct": 1, "incorrect": 0, "unmarked": 0 },
                    "HARD": {
                        "marking": { "correct": 5, "incorrect": -2, "unmarked": 0 },
                        "questions": ["q2"]
                    }
                }
            }"#,
        );
        let responses: HashMap<String, String> = [("q1", "A"), ("q2", "B")]
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .into();
        assert_eq!(config.evaluate(&responses), 1.0 - 2.0);
    }

    #[test]
    fn test_answer_count_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_evaluation(
            dir.path(),
            r#"{
                "options": {
                    "questions_in_order": ["q1..4"],
                    "answers_in_order": ["A"]
                }
            }"#,
        );
        let err = EvaluationConfig::load(dir.path(), &path, None, &TuningConfig::default())
            .unwrap_err();
        assert!(matches!(err, OmrError::Config { .. }));
    }

    #[test]
    fn test_answer_key_asset_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("key.png"), b"stub").unwrap();
        let config = load(
            dir.path(),
            r#"{
                "options": {
                    "questions_in_order": ["q1"],
                    "answers_in_order": ["A"],
                    "answer_key_image_path": "key.png"
                }
            }"#,
        );
        assert_eq!(config.exclude_files().len(), 1);
        assert!(config.exclude_files()[0].ends_with("key.png"));
    }
}
