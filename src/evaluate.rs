//! Translation quality evaluation: a model report merged with structural checks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checks::structural_issues;
use crate::jsonparse::parse_final;
use crate::models::{ChatBackend, ChatRequest, StageError};
use crate::pipeline::{render_template, split_paragraphs, EvaluationOptions, EVALUATE_SYSTEM};
use crate::suggest::{map_suggestions, MapOptions, RawIssue, SegmentFeedback};
use crate::textutil::strip_segment_label;

#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error("nothing to evaluate: the {0} text is empty")]
    EmptyInput(&'static str),
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// The report as the model returns it; every field may be missing.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawEvaluation {
    pub score: Option<f64>,
    pub comments: Vec<String>,
    pub segment_scores: Vec<Option<f64>>,
    pub segment_feedbacks: Vec<RawSegmentFeedback>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawSegmentFeedback {
    pub segment_index: usize,
    pub issues: Vec<RawIssue>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub score: Option<f64>,
    pub comments: Vec<String>,
    pub segment_scores: Vec<Option<f64>>,
    pub original_segments: Vec<String>,
    pub translated_segments: Vec<String>,
    /// One entry per translated segment, in order.
    pub feedback: Vec<SegmentFeedback>,
    /// The model report was unusable; only structural checks contributed.
    pub degraded: bool,
}

impl Evaluation {
    #[must_use]
    pub fn issue_count(&self) -> usize {
        self.feedback.iter().map(|f| f.issues.len()).sum()
    }
}

/// Blank-line delimited paragraphs with any `[n]` label removed.
#[must_use]
pub fn segment_text(text: &str) -> Vec<String> {
    split_paragraphs(text)
        .iter()
        .map(|p| strip_segment_label(p).trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn numbered(segments: &[String]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[{i}] {s}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum IssueFamily {
    Terminology,
    Omission,
    Literal,
    Duplication,
}

fn issue_family(issue_type: &str) -> Option<IssueFamily> {
    let t = issue_type.trim().to_ascii_lowercase();
    if t.contains("terminolog") || t.starts_with("term") || t.contains("术语") {
        Some(IssueFamily::Terminology)
    } else if t.contains("omission") || t.contains("missing") || t.contains("省略") {
        Some(IssueFamily::Omission)
    } else if t.contains("literal") || t.contains("直译") {
        Some(IssueFamily::Literal)
    } else if t.contains("duplicat") || t.contains("重复") {
        Some(IssueFamily::Duplication)
    } else {
        None
    }
}

/// Summary comments derived from the score band and the kinds of issues found.
#[must_use]
pub fn overall_comments(feedback: &[SegmentFeedback], score: f64) -> Vec<String> {
    let mut families: BTreeMap<IssueFamily, usize> = BTreeMap::new();
    for issue in feedback.iter().flat_map(|f| &f.issues) {
        if let Some(family) = issue_family(&issue.issue_type) {
            *families.entry(family).or_default() += 1;
        }
    }

    let mut comments = Vec::new();
    comments.push(
        if score < 70.0 {
            "The translation needs significant improvement; several passages need correcting."
        } else if score < 80.0 {
            "The translation is basically usable but has some areas to improve."
        } else if score < 90.0 {
            "The translation is good, with a few places that could be polished."
        } else {
            "The translation is excellent and close to professional quality."
        }
        .to_string(),
    );
    for family in families.keys() {
        comments.push(
            match family {
                IssueFamily::Terminology => {
                    "Terminology needs to be standardised; check it against an industry glossary."
                }
                IssueFamily::Omission => {
                    "Some information is missing; make sure every important point of the source is carried over."
                }
                IssueFamily::Literal => {
                    "Parts of the translation are too literal; adjust them to read naturally in the target language."
                }
                IssueFamily::Duplication => "Avoid unnecessary repeated content.",
            }
            .to_string(),
        );
    }
    if score < 80.0 && comments.len() < 2 {
        comments.push("Check the translation carefully for accuracy and fluency.".to_string());
        comments.push(
            "Consider rephrasing some expressions to suit the intended readers.".to_string(),
        );
    }
    comments
}

/// Merges structural issues and the model report into per-segment feedback. Structural issues
/// come first and so win overlaps.
#[must_use]
pub fn build_evaluation(
    original: &str,
    translated: &str,
    report: Option<RawEvaluation>,
    options: MapOptions,
) -> Evaluation {
    let original_segments = segment_text(original);
    let translated_segments = segment_text(translated);
    let degraded = report.is_none();
    let report = report.unwrap_or_default();

    let mut by_segment: BTreeMap<usize, Vec<RawIssue>> = BTreeMap::new();
    for fb in report.segment_feedbacks {
        if fb.segment_index >= translated_segments.len() {
            debug!(segment_index = fb.segment_index, "dropping feedback for unknown segment");
            continue;
        }
        by_segment.entry(fb.segment_index).or_default().extend(fb.issues);
    }

    let feedback: Vec<SegmentFeedback> = translated_segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            let mut issues = structural_issues(seg);
            issues.extend(by_segment.remove(&i).unwrap_or_default());
            map_suggestions(i, seg, issues, options)
        })
        .collect();

    let score = report.score.map(|s| s.clamp(0.0, 100.0));
    let comments = if report.comments.is_empty() {
        score.map(|s| overall_comments(&feedback, s)).unwrap_or_default()
    } else {
        report.comments
    };

    Evaluation {
        score,
        comments,
        segment_scores: report.segment_scores,
        original_segments,
        translated_segments,
        feedback,
        degraded,
    }
}

/// Asks a chat backend for a quality report on a translation.
pub struct Evaluator<B> {
    backend: B,
    prompt: String,
    options: EvaluationOptions,
}

impl<B: ChatBackend> Evaluator<B> {
    pub fn new(backend: B, prompt: impl Into<String>, options: EvaluationOptions) -> Self {
        Self {
            backend,
            prompt: prompt.into(),
            options,
        }
    }

    pub fn evaluate(&self, original: &str, translated: &str) -> Result<Evaluation, EvaluateError> {
        if original.trim().is_empty() {
            return Err(EvaluateError::EmptyInput("original"));
        }
        if translated.trim().is_empty() {
            return Err(EvaluateError::EmptyInput("translated"));
        }

        let prompt = render_template(
            &self.prompt,
            &[
                ("original", &numbered(&segment_text(original))),
                ("translation", &numbered(&segment_text(translated))),
            ],
        );
        let mut request = ChatRequest::new(Some(EVALUATE_SYSTEM), &prompt);
        if let Some(t) = self.options.temperature {
            request = request.with_temperature(t);
        }
        let raw = self.backend.complete(&request)?;

        let report = match parse_final::<RawEvaluation>(&raw) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(error = %e, "evaluation report is not valid JSON, using structural checks only");
                None
            }
        };
        let evaluation = build_evaluation(original, translated, report, self.options.map);
        info!(
            score = ?evaluation.score,
            issues = evaluation.issue_count(),
            degraded = evaluation.degraded,
            "evaluation finished"
        );
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeKind;
    use crate::suggest::OverlapPolicy;

    struct Canned(&'static str);

    impl ChatBackend for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn complete(&self, _request: &ChatRequest) -> Result<String, StageError> {
            Ok(self.0.to_string())
        }
    }

    const ORIGINAL: &str = "The EU Indo-Pacific strategy aims to deepen cooperation.\n\nAbout 1,000 people attended.";
    const TRANSLATED: &str = "[1] 欧盟印太合作战略旨在加强合作。\n\n[2] 约 1 000 人出席。";

    const REPORT: &str = r#"```json
{
  "score": 76,
  "segmentScores": [70, 85],
  "segmentFeedbacks": [
    {
      "segmentIndex": 0,
      "issues": [
        {
          "type": "terminology",
          "description": "strategy name lacks the English reference",
          "originalText": "EU Indo-Pacific strategy",
          "translatedText": "欧盟印太合作战略",
          "suggestion": "欧盟印太合作战略（EU Strategy）",
          "reason": "keep the official name"
        },
        {
          "type": "fluency",
          "translatedText": "not in the text",
          "suggestion": "x"
        }
      ]
    },
    {
      "segmentIndex": 1,
      "issues": [
        {
          "type": "style",
          "translatedText": "1 000",
          "suggestion": "一千"
        }
      ]
    },
    { "segmentIndex": 7, "issues": [ { "type": "fluency", "translatedText": "约", "suggestion": "大约" } ] }
  ]
}
```"#;

    #[test]
    fn report_and_structural_checks_are_merged() {
        let evaluator = Evaluator::new(Canned(REPORT), "{{original}}|{{translation}}", EvaluationOptions::default());
        let ev = evaluator.evaluate(ORIGINAL, TRANSLATED).unwrap();

        assert!(!ev.degraded);
        assert_eq!(ev.score, Some(76.0));
        assert_eq!(ev.segment_scores, vec![Some(70.0), Some(85.0)]);
        assert_eq!(ev.translated_segments[0], "欧盟印太合作战略旨在加强合作。");
        assert_eq!(ev.feedback.len(), 2);

        let first = &ev.feedback[0].issues;
        assert_eq!(first.len(), 1);
        assert_eq!((first[0].start, first[0].end), (0, 8));
        assert_eq!(first[0].change, ChangeKind::Insert);

        // The structural number check claims the span first; the model's overlapping issue is dropped.
        let second = &ev.feedback[1].issues;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].issue_type, crate::checks::NUMBER_FORMAT);
        assert_eq!(second[0].replacement(), "1000");

        assert_eq!(
            ev.comments,
            vec![
                "The translation is basically usable but has some areas to improve.".to_string(),
                "Terminology needs to be standardised; check it against an industry glossary.".to_string(),
            ]
        );
    }

    #[test]
    fn unusable_report_degrades_to_structural_checks() {
        let evaluator = Evaluator::new(Canned("sorry, no JSON"), "{{translation}}", EvaluationOptions::default());
        let ev = evaluator.evaluate(ORIGINAL, TRANSLATED).unwrap();
        assert!(ev.degraded);
        assert_eq!(ev.score, None);
        assert!(ev.comments.is_empty());
        assert_eq!(ev.issue_count(), 1);
    }

    #[test]
    fn empty_input_is_rejected() {
        let evaluator = Evaluator::new(Canned("{}"), "", EvaluationOptions::default());
        assert!(matches!(
            evaluator.evaluate("  ", TRANSLATED),
            Err(EvaluateError::EmptyInput("original"))
        ));
        assert!(matches!(
            evaluator.evaluate(ORIGINAL, ""),
            Err(EvaluateError::EmptyInput("translated"))
        ));
    }

    #[test]
    fn comment_bands() {
        assert_eq!(overall_comments(&[], 95.0).len(), 1);
        assert!(overall_comments(&[], 85.0)[0].contains("good"));
        let low = overall_comments(&[], 60.0);
        assert_eq!(low.len(), 3);
        assert!(low[0].contains("significant"));
    }

    #[test]
    fn issue_types_are_grouped_loosely() {
        let report = RawEvaluation {
            score: Some(88.0),
            segment_feedbacks: vec![RawSegmentFeedback {
                segment_index: 0,
                issues: vec![
                    RawIssue {
                        issue_type: "过度直译".to_string(),
                        translated_span: "旨在".to_string(),
                        suggestion: "目的是".to_string(),
                        ..RawIssue::default()
                    },
                    RawIssue {
                        issue_type: "omission".to_string(),
                        translated_span: "合作。".to_string(),
                        suggestion: "务实合作。".to_string(),
                        ..RawIssue::default()
                    },
                ],
            }],
            ..RawEvaluation::default()
        };
        let ev = build_evaluation(
            "a",
            "欧盟印太合作战略旨在加强合作。",
            Some(report),
            MapOptions {
                overlap: OverlapPolicy::FirstSeen,
            },
        );
        assert_eq!(ev.issue_count(), 2);
        assert_eq!(ev.comments.len(), 3);
        assert!(ev.comments[1].contains("missing"));
        assert!(ev.comments[2].contains("literal"));
    }

    #[test]
    fn segments_drop_labels_and_blank_paragraphs() {
        assert_eq!(segment_text("[1] 甲\n \n\n[12]乙\n\n"), vec!["甲".to_string(), "乙".to_string()]);
    }
}
