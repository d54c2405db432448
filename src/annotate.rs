use serde::Serialize;

use crate::diff::{lcs_diff, EditKind, Tokenization};
use crate::suggest::SegmentFeedback;
use crate::textutil::{char_len, char_slice};

/// A piece of an annotated segment. `issue` indexes into `SegmentFeedback::issues`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fragment {
    Plain { text: String },
    Deleted { text: String, issue: usize },
    Inserted { text: String, issue: usize },
}

fn push(out: &mut Vec<Fragment>, frag: Fragment) {
    let joined = match (out.last_mut(), &frag) {
        (Some(Fragment::Plain { text }), Fragment::Plain { text: more }) => {
            text.push_str(more);
            true
        }
        (Some(Fragment::Deleted { text, issue }), Fragment::Deleted { text: more, issue: i })
        | (Some(Fragment::Inserted { text, issue }), Fragment::Inserted { text: more, issue: i })
            if *issue == *i =>
        {
            text.push_str(more);
            true
        }
        _ => false,
    };
    if !joined {
        out.push(frag);
    }
}

/// Splits `segment_text` into plain text and per-issue deleted/inserted runs.
pub fn annotate(segment_text: &str, feedback: &SegmentFeedback) -> Vec<Fragment> {
    let mut out: Vec<Fragment> = Vec::new();
    let mut cursor = 0usize;
    for (idx, issue) in feedback.issues.iter().enumerate() {
        if issue.start < cursor {
            continue;
        }
        let before = char_slice(segment_text, cursor, issue.start);
        if !before.is_empty() {
            push(&mut out, Fragment::Plain { text: before.to_string() });
        }
        let replacement = issue.replacement();
        for op in lcs_diff(&issue.original_text, &replacement, Tokenization::Words) {
            let frag = match op.kind {
                EditKind::Keep => Fragment::Plain {
                    text: char_slice(&issue.original_text, op.source_range.start, op.source_range.end)
                        .to_string(),
                },
                EditKind::Delete => Fragment::Deleted {
                    text: char_slice(&issue.original_text, op.source_range.start, op.source_range.end)
                        .to_string(),
                    issue: idx,
                },
                EditKind::Insert | EditKind::Replace => Fragment::Inserted {
                    text: op.content.unwrap_or_default(),
                    issue: idx,
                },
            };
            push(&mut out, frag);
        }
        cursor = issue.end;
    }
    let rest = char_slice(segment_text, cursor, char_len(segment_text));
    if !rest.is_empty() {
        push(&mut out, Fragment::Plain { text: rest.to_string() });
    }
    out
}

/// Plain-text rendering for terminals: `[-deleted-]{+inserted+}`.
pub fn render_markup(fragments: &[Fragment]) -> String {
    let mut out = String::new();
    for frag in fragments {
        match frag {
            Fragment::Plain { text } => out.push_str(text),
            Fragment::Deleted { text, .. } => {
                out.push_str("[-");
                out.push_str(text);
                out.push_str("-]");
            }
            Fragment::Inserted { text, .. } => {
                out.push_str("{+");
                out.push_str(text);
                out.push_str("+}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggest::{map_suggestions, MapOptions, RawIssue};

    fn feedback(text: &str, span: &str, suggestion: &str) -> SegmentFeedback {
        let raw = RawIssue {
            issue_type: "fluency".to_string(),
            translated_span: span.to_string(),
            suggestion: suggestion.to_string(),
            ..RawIssue::default()
        };
        map_suggestions(0, text, vec![raw], MapOptions::default())
    }

    #[test]
    fn replacement_renders_as_delete_then_insert() {
        let text = "他说猫和狗很好";
        let frags = annotate(text, &feedback(text, "猫和狗", "猫和鸟"));
        assert_eq!(render_markup(&frags), "他说猫和[-狗-]{+鸟+}很好");
    }

    #[test]
    fn insertion_keeps_anchor_plain() {
        let text = "欧盟印太合作战略旨在加强合作";
        let frags = annotate(text, &feedback(text, "欧盟印太合作战略", "欧盟印太合作战略（EU Strategy）"));
        assert_eq!(
            render_markup(&frags),
            "欧盟印太合作战略{+（EU Strategy）+}旨在加强合作"
        );
        assert!(matches!(frags[0], Fragment::Plain { .. }));
    }

    #[test]
    fn no_feedback_is_one_plain_fragment() {
        let frags = annotate("原样输出", &SegmentFeedback::default());
        assert_eq!(frags, vec![Fragment::Plain { text: "原样输出".to_string() }]);
        assert!(annotate("", &SegmentFeedback::default()).is_empty());
    }
}
