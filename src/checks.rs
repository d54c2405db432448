//! Deterministic issue producers. They run ahead of model-proposed issues, so their findings win
//! overlaps.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::suggest::RawIssue;
use crate::textutil::{char_len, find_char_occurrences, is_han};

pub const NUMBER_FORMAT: &str = "number-format";
pub const DUPLICATION: &str = "duplication";

static SPACED_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\s+\d+(?:年|月|日)?").expect("spaced number regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

const MIN_DUPLICATE_CHARS: usize = 5;
const LONG_DUPLICATE_CHARS: usize = 10;

fn is_clause_break(ch: char) -> bool {
    matches!(ch, '。' | '！' | '？' | '，' | '；' | '：') || ch.is_whitespace()
}

/// Digit groups split by whitespace ("2023 年", "1 000").
pub fn number_format_issues(text: &str) -> Vec<RawIssue> {
    SPACED_NUMBER_RE
        .find_iter(text)
        .map(|m| {
            let matched = m.as_str();
            RawIssue {
                issue_type: NUMBER_FORMAT.to_string(),
                description: "number formatting should not contain spaces".to_string(),
                original_span: matched.to_string(),
                translated_span: matched.to_string(),
                suggestion: WHITESPACE_RE.replace_all(matched, "").into_owned(),
                reason: "digits and date units are written without separating spaces".to_string(),
                hint_offset: Some(text[..m.start()].chars().count()),
            }
        })
        .collect()
}

/// Clause-sized pieces of `text` with their character offsets.
fn clauses(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start = 0usize;
    for (i, ch) in text.chars().enumerate() {
        if is_clause_break(ch) {
            if !current.is_empty() {
                out.push((start, std::mem::take(&mut current)));
            }
            start = i + 1;
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        out.push((start, current));
    }
    out
}

/// A clause of at least five characters that occurs again later in the text. Short Latin-only
/// clauses are ignored since they repeat naturally.
pub fn duplication_issues(text: &str) -> Vec<RawIssue> {
    let mut out: Vec<RawIssue> = Vec::new();
    let mut flagged: Vec<usize> = Vec::new();
    for (start, clause) in clauses(text) {
        let len = char_len(&clause);
        if len < MIN_DUPLICATE_CHARS {
            continue;
        }
        if len <= LONG_DUPLICATE_CHARS && !clause.chars().any(is_han) {
            continue;
        }
        let after = start + len;
        let Some(repeat) = find_char_occurrences(text, &clause)
            .into_iter()
            .find(|pos| *pos >= after)
        else {
            continue;
        };
        if flagged.contains(&repeat) {
            continue;
        }
        flagged.push(repeat);
        out.push(RawIssue {
            issue_type: DUPLICATION.to_string(),
            description: "repeated content".to_string(),
            original_span: clause.clone(),
            translated_span: clause,
            suggestion: String::new(),
            reason: "the same clause appears earlier in the segment".to_string(),
            hint_offset: Some(repeat),
        });
    }
    out
}

/// All structural issues for one translated segment, in priority order.
pub fn structural_issues(text: &str) -> Vec<RawIssue> {
    let mut out = number_format_issues(text);
    out.extend(duplication_issues(text));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggest::{apply_feedback, map_suggestions, MapOptions};

    #[test]
    fn spaced_numbers_are_flagged() {
        let issues = number_format_issues("共 1 000 人，截至 2023 12月。");
        let spans: Vec<&str> = issues.iter().map(|i| i.translated_span.as_str()).collect();
        assert_eq!(spans, vec!["1 000", "2023 12月"]);
        assert_eq!(issues[0].suggestion, "1000");
        assert_eq!(issues[0].hint_offset, Some(2));
        assert_eq!(issues[1].suggestion, "202312月");
        assert!(number_format_issues("2023 年 5 月").is_empty());
    }

    #[test]
    fn repeated_clause_is_flagged_at_the_repeat() {
        let text = "欧盟发布了新战略，欧盟发布了新战略。";
        let issues = duplication_issues(text);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].translated_span, "欧盟发布了新战略");
        assert_eq!(issues[0].hint_offset, Some(9));

        let fb = map_suggestions(0, text, issues, MapOptions::default());
        assert_eq!(fb.issues[0].start, 9);
        assert_eq!(apply_feedback(text, &fb), "欧盟发布了新战略，。");
    }

    #[test]
    fn short_latin_repeats_are_ignored() {
        assert!(duplication_issues("hello world hello world").is_empty());
        assert!(duplication_issues("短句，短句").is_empty());
    }

    #[test]
    fn structural_issues_put_numbers_first() {
        let text = "共计 3 000 人参加了会议，共计 3 000 人参加了会议";
        let issues = structural_issues(text);
        assert_eq!(issues[0].issue_type, NUMBER_FORMAT);
        assert!(issues.iter().any(|i| i.issue_type == DUPLICATION));
    }
}
