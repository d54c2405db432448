//! Maps span-level correction suggestions onto absolute character offsets in a segment.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diff::{
    change_region, diff, merge_runs, tokenize, ChangeKind, EditKind, EditOperation, Span,
    Tokenization,
};
use crate::textutil::{char_len, char_slice, find_char_occurrences};

/// An issue as proposed by a producer (the evaluator model or a structural check).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawIssue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub description: String,
    /// Source-language text the issue refers to.
    #[serde(rename = "originalText")]
    pub original_span: String,
    /// Text that must occur verbatim in the translated segment.
    #[serde(rename = "translatedText")]
    pub translated_span: String,
    pub suggestion: String,
    pub reason: String,
    /// Character offset of `translated_span` when the producer knows it.
    #[serde(skip)]
    pub hint_offset: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub description: String,
    pub original_span: String,
    pub translated_span: String,
    pub suggestion: String,
    pub reason: String,
    pub start: usize,
    pub end: usize,
    /// `segment[start..end]`.
    pub original_text: String,
    /// Replacement for the change region; for an insertion, the inserted text.
    pub suggested_text: String,
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insertion_point: Option<usize>,
    #[serde(default)]
    pub ambiguous: bool,
    /// Script from `translated_span` to `suggestion`, ranges relative to each.
    pub operations: Vec<EditOperation>,
}

impl Issue {
    #[must_use]
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    /// Text that replaces `[start, end)` when the suggestion is accepted.
    #[must_use]
    pub fn replacement(&self) -> String {
        match (self.change, self.insertion_point) {
            (ChangeKind::Insert, Some(point)) => {
                let at = point.saturating_sub(self.start);
                let before = char_slice(&self.original_text, 0, at);
                let after = char_slice(&self.original_text, at, char_len(&self.original_text));
                format!("{before}{}{after}", self.suggested_text)
            }
            _ => self.suggested_text.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentFeedback {
    pub segment_index: usize,
    pub issues: Vec<Issue>,
}

/// What happens when a later issue overlaps one already kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// The earlier issue always wins.
    FirstSeen,
    /// Issues of the same type are merged; otherwise the earlier one wins.
    #[default]
    MergeSameType,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MapOptions {
    pub overlap: OverlapPolicy,
}

/// Where a change sits inside the segment.
struct Placement {
    start: usize,
    end: usize,
    suggested_text: String,
    change: ChangeKind,
    insertion_point: Option<usize>,
    operations: Vec<EditOperation>,
}

/// Places the change `span -> suggestion`, where `span` starts at char offset `pos`.
fn place(span: &str, suggestion: &str, pos: usize) -> Option<Placement> {
    let operations = merge_runs(&diff(span, suggestion, Tokenization::Words));
    let region = change_region(&operations)?;
    let suggested_text = char_slice(suggestion, region.target.start, region.target.end).to_string();

    if region.kind == ChangeKind::Insert {
        let point = region.source.start;
        let tokens = tokenize(span, Tokenization::Words);
        let anchor = tokens
            .iter()
            .rev()
            .find(|t| t.start + t.len == point)
            .or_else(|| tokens.iter().find(|t| t.start == point))
            .map(|t| t.span())?;
        return Some(Placement {
            start: pos + anchor.start,
            end: pos + anchor.end,
            suggested_text,
            change: ChangeKind::Insert,
            insertion_point: Some(pos + point),
            operations,
        });
    }

    Some(Placement {
        start: pos + region.source.start,
        end: pos + region.source.end,
        suggested_text,
        change: region.kind,
        insertion_point: None,
        operations,
    })
}

fn locate(segment_text: &str, raw: RawIssue) -> Option<Issue> {
    if raw.translated_span.is_empty() {
        debug!(issue_type = %raw.issue_type, "dropping issue with empty span");
        return None;
    }
    if raw.translated_span == raw.suggestion {
        debug!(issue_type = %raw.issue_type, span = %raw.translated_span, "dropping no-op issue");
        return None;
    }
    let occurrences = find_char_occurrences(segment_text, &raw.translated_span);
    let Some(first) = occurrences.first().copied() else {
        debug!(issue_type = %raw.issue_type, span = %raw.translated_span, "span not found in segment");
        return None;
    };
    let pos = raw
        .hint_offset
        .filter(|hint| occurrences.contains(hint))
        .unwrap_or(first);

    let placement = place(&raw.translated_span, &raw.suggestion, pos)?;
    Some(Issue {
        original_text: char_slice(segment_text, placement.start, placement.end).to_string(),
        start: placement.start,
        end: placement.end,
        suggested_text: placement.suggested_text,
        change: placement.change,
        insertion_point: placement.insertion_point,
        ambiguous: occurrences.len() > 1,
        operations: placement.operations,
        issue_type: raw.issue_type,
        description: raw.description,
        original_span: raw.original_span,
        translated_span: raw.translated_span,
        suggestion: raw.suggestion,
        reason: raw.reason,
    })
}

/// Where the text after source offset `at` begins in the target of `ops`.
/// An edit straddling `at` stays on the left.
fn target_after(ops: &[EditOperation], at: usize) -> usize {
    for op in ops {
        let src = op.source_range;
        if src.start < at && at < src.end {
            return match op.kind {
                EditKind::Keep => op.target_range.start + (at - src.start),
                _ => op.target_range.end,
            };
        }
        if src.start >= at {
            return op.target_range.start;
        }
    }
    ops.last().map_or(0, |op| op.target_range.end)
}

/// Where the text before source offset `at` ends in the target of `ops`.
/// An edit straddling `at` stays on the right.
fn target_before(ops: &[EditOperation], at: usize) -> usize {
    let mut pos = 0;
    for op in ops {
        let src = op.source_range;
        if src.start < at && at < src.end {
            return match op.kind {
                EditKind::Keep => op.target_range.start + (at - src.start),
                _ => op.target_range.start,
            };
        }
        if src.end > at {
            break;
        }
        pos = op.target_range.end;
    }
    pos
}

/// Folds `later` into `kept` over the union of their ranges. Inside `kept`'s range its own
/// edit wins; outside it, `later`'s edit is applied.
fn merge_into(segment_text: &str, kept: &mut Issue, later: &Issue) -> bool {
    let union = kept.span().union(&later.span());
    let later_replacement = later.replacement();
    let later_ops = merge_runs(&diff(&later.original_text, &later_replacement, Tokenization::Words));
    let later_len = char_len(&later_replacement);

    let head = if later.start < kept.start {
        let cut = target_before(&later_ops, kept.start - later.start);
        char_slice(&later_replacement, 0, cut)
    } else {
        ""
    };
    let tail = if later.end > kept.end {
        let cut = target_after(&later_ops, kept.end - later.start);
        char_slice(&later_replacement, cut, later_len)
    } else {
        ""
    };
    let merged = format!("{head}{}{tail}", kept.replacement());
    let union_text = char_slice(segment_text, union.start, union.end).to_string();
    if merged == union_text {
        return false;
    }

    kept.start = union.start;
    kept.end = union.end;
    kept.original_text = union_text.clone();
    kept.change = if merged.is_empty() {
        ChangeKind::Delete
    } else {
        ChangeKind::Replace
    };
    kept.insertion_point = None;
    kept.operations = merge_runs(&diff(&union_text, &merged, Tokenization::Words));
    kept.suggested_text = merged.clone();
    kept.translated_span = union_text;
    kept.suggestion = merged;
    kept.ambiguous |= later.ambiguous;
    if !later.reason.is_empty() && later.reason != kept.reason {
        if kept.reason.is_empty() {
            kept.reason = later.reason.clone();
        } else {
            kept.reason = format!("{}; {}", kept.reason, later.reason);
        }
    }
    true
}

/// Turns producer issues for one segment into positioned, non-overlapping feedback.
///
/// Issues are considered in producer order, which doubles as priority. Issues whose span is
/// empty, missing from the segment or identical to the suggestion are dropped.
pub fn map_suggestions(
    segment_index: usize,
    segment_text: &str,
    raw_issues: Vec<RawIssue>,
    options: MapOptions,
) -> SegmentFeedback {
    let mut kept: Vec<Issue> = Vec::new();
    if segment_text.is_empty() {
        return SegmentFeedback {
            segment_index,
            issues: kept,
        };
    }

    for raw in raw_issues {
        let Some(issue) = locate(segment_text, raw) else {
            continue;
        };
        let hits: Vec<usize> = kept
            .iter()
            .enumerate()
            .filter(|(_, k)| k.span().overlaps(&issue.span()))
            .map(|(i, _)| i)
            .collect();
        if hits.is_empty() {
            kept.push(issue);
            continue;
        }

        if options.overlap == OverlapPolicy::MergeSameType
            && hits.len() == 1
            && kept[hits[0]].issue_type == issue.issue_type
        {
            let h = hits[0];
            let union = kept[h].span().union(&issue.span());
            let collides = kept
                .iter()
                .enumerate()
                .any(|(i, k)| i != h && k.span().overlaps(&union));
            if !collides && merge_into(segment_text, &mut kept[h], &issue) {
                continue;
            }
        }
        debug!(
            segment_index,
            issue_type = %issue.issue_type,
            start = issue.start,
            end = issue.end,
            "dropping overlapping issue"
        );
    }

    kept.sort_by_key(|i| (i.start, i.end));
    SegmentFeedback {
        segment_index,
        issues: kept,
    }
}

/// Applies every issue of `feedback` to `segment_text`.
#[must_use]
pub fn apply_feedback(segment_text: &str, feedback: &SegmentFeedback) -> String {
    let mut out = String::with_capacity(segment_text.len());
    let mut cursor = 0usize;
    for issue in &feedback.issues {
        out.push_str(char_slice(segment_text, cursor, issue.start));
        out.push_str(&issue.replacement());
        cursor = issue.end;
    }
    out.push_str(char_slice(segment_text, cursor, char_len(segment_text)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: &str, span: &str, suggestion: &str, reason: &str) -> RawIssue {
        RawIssue {
            issue_type: kind.to_string(),
            translated_span: span.to_string(),
            suggestion: suggestion.to_string(),
            reason: reason.to_string(),
            ..RawIssue::default()
        }
    }

    fn assert_well_formed(text: &str, fb: &SegmentFeedback) {
        let len = char_len(text);
        for issue in &fb.issues {
            assert!(issue.start <= issue.end && issue.end <= len, "{issue:?}");
            assert_eq!(char_slice(text, issue.start, issue.end), issue.original_text);
        }
        for pair in fb.issues.windows(2) {
            assert!(pair[0].end <= pair[1].start, "overlap: {pair:?}");
        }
    }

    #[test]
    fn insertion_is_anchored_to_preceding_token() {
        let text = "欧盟印太合作战略旨在加强合作。";
        let fb = map_suggestions(
            0,
            text,
            vec![raw("terminology", "欧盟印太合作战略", "欧盟印太合作战略（EU Strategy）", "")],
            MapOptions::default(),
        );
        assert_eq!(fb.issues.len(), 1);
        let issue = &fb.issues[0];
        assert_eq!((issue.start, issue.end), (0, 8));
        assert_eq!(issue.change, ChangeKind::Insert);
        assert_eq!(issue.insertion_point, Some(8));
        assert_eq!(issue.suggested_text, "（EU Strategy）");
        assert_eq!(
            apply_feedback(text, &fb),
            "欧盟印太合作战略（EU Strategy）旨在加强合作。"
        );
    }

    #[test]
    fn insertion_at_start_anchors_to_following_token() {
        let text = "strategy matters";
        let fb = map_suggestions(0, text, vec![raw("fluency", "strategy", "the strategy", "")], MapOptions::default());
        let issue = &fb.issues[0];
        assert_eq!((issue.start, issue.end), (0, 8));
        assert_eq!(issue.insertion_point, Some(0));
        assert_eq!(apply_feedback(text, &fb), "the strategy matters");
    }

    #[test]
    fn replacement_is_narrowed_to_changed_text() {
        let text = "他说猫和狗很好";
        let fb = map_suggestions(3, text, vec![raw("fluency", "猫和狗", "猫和鸟", "bird")], MapOptions::default());
        assert_eq!(fb.segment_index, 3);
        let issue = &fb.issues[0];
        assert_eq!((issue.start, issue.end), (4, 5));
        assert_eq!(issue.original_text, "狗");
        assert_eq!(issue.suggested_text, "鸟");
        assert_eq!(issue.change, ChangeKind::Replace);
        assert_eq!(apply_feedback(text, &fb), "他说猫和鸟很好");
    }

    #[test]
    fn deletion_covers_removed_text() {
        let text = "a very very happy day";
        let fb = map_suggestions(0, text, vec![raw("duplication", "very very happy", "very happy", "")], MapOptions::default());
        let issue = &fb.issues[0];
        assert_eq!(issue.change, ChangeKind::Delete);
        assert_eq!(issue.original_text, "very ");
        assert_eq!(apply_feedback(text, &fb), "a very happy day");
        assert_well_formed(text, &fb);
    }

    #[test]
    fn unusable_issues_are_dropped() {
        let text = "完整的句子";
        let fb = map_suggestions(
            0,
            text,
            vec![
                raw("fluency", "", "x", ""),
                raw("fluency", "句子", "句子", ""),
                raw("fluency", "不存在", "存在", ""),
            ],
            MapOptions::default(),
        );
        assert!(fb.issues.is_empty());
        assert!(map_suggestions(0, "", vec![raw("a", "b", "c", "")], MapOptions::default()).issues.is_empty());
    }

    #[test]
    fn duplicated_span_uses_hint_or_first_occurrence() {
        let text = "猫和狗，猫和狗";
        let fb = map_suggestions(0, text, vec![raw("fluency", "猫和狗", "猫和鸟", "")], MapOptions::default());
        assert_eq!(fb.issues[0].start, 2);
        assert!(fb.issues[0].ambiguous);

        let mut hinted = raw("fluency", "猫和狗", "猫和鸟", "");
        hinted.hint_offset = Some(4);
        let fb = map_suggestions(0, text, vec![hinted], MapOptions::default());
        assert_eq!(fb.issues[0].start, 6);

        let mut bad_hint = raw("fluency", "猫和狗", "猫和鸟", "");
        bad_hint.hint_offset = Some(1);
        let fb = map_suggestions(0, text, vec![bad_hint], MapOptions::default());
        assert_eq!(fb.issues[0].start, 2);
    }

    #[test]
    fn overlapping_issue_of_other_type_loses() {
        let text = "The colour red";
        let fb = map_suggestions(
            0,
            text,
            vec![
                raw("terminology", "colour", "color", "US spelling"),
                raw("fluency", "colour red", "red colour", "order"),
            ],
            MapOptions::default(),
        );
        assert_eq!(fb.issues.len(), 1);
        assert_eq!(fb.issues[0].issue_type, "terminology");
        assert_well_formed(text, &fb);
    }

    #[test]
    fn overlapping_issues_of_same_type_merge() {
        let text = "The colour red";
        let issues = vec![
            raw("terminology", "colour", "color", "US spelling"),
            raw("terminology", "colour", "colours", "plural"),
        ];
        let fb = map_suggestions(0, text, issues.clone(), MapOptions::default());
        assert_eq!(fb.issues.len(), 1);
        let merged = &fb.issues[0];
        assert_eq!(merged.reason, "US spelling; plural");
        assert_eq!((merged.start, merged.end), (4, 10));
        assert_eq!(apply_feedback(text, &fb), "The color red");
        assert_well_formed(text, &fb);

        let fb = map_suggestions(0, text, issues, MapOptions { overlap: OverlapPolicy::FirstSeen });
        assert_eq!(fb.issues[0].reason, "US spelling");
    }

    #[test]
    fn partially_overlapping_merge_applies_both_edits() {
        let text = "a very big dog barks";
        let fb = map_suggestions(
            0,
            text,
            vec![
                raw("fluency", "very big", "huge", "r1"),
                raw("fluency", "big dog", "large hound", "r2"),
            ],
            MapOptions::default(),
        );
        assert_eq!(fb.issues.len(), 1);
        let merged = &fb.issues[0];
        assert_eq!((merged.start, merged.end), (2, 14));
        assert_eq!(merged.original_text, "very big dog");
        assert_eq!(merged.reason, "r1; r2");
        assert_eq!(apply_feedback(text, &fb), "a huge hound barks");
        assert_well_formed(text, &fb);

        let fb = map_suggestions(
            0,
            text,
            vec![
                raw("fluency", "big dog", "large hound", "r2"),
                raw("fluency", "very big", "enormous", "r1"),
            ],
            MapOptions::default(),
        );
        assert_eq!(fb.issues.len(), 1);
        // "big" belongs to the kept edit; only the deletion of "very " carries over.
        assert_eq!(fb.issues[0].reason, "r2; r1");
        assert_eq!((fb.issues[0].start, fb.issues[0].end), (2, 14));
        assert_eq!(apply_feedback(text, &fb), "a large hound barks");
    }

    #[test]
    fn output_is_sorted_and_disjoint() {
        let text = "one two three four";
        let fb = map_suggestions(
            1,
            text,
            vec![
                raw("fluency", "four", "4", ""),
                raw("fluency", "one", "1", ""),
                raw("terminology", "two three", "2 3", ""),
            ],
            MapOptions::default(),
        );
        let starts: Vec<usize> = fb.issues.iter().map(|i| i.start).collect();
        assert_eq!(starts, vec![0, 4, 14]);
        assert_well_formed(text, &fb);
        assert_eq!(apply_feedback(text, &fb), "1 2 3 4");
    }
}
