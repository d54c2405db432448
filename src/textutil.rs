use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

static SEGMENT_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[(\d+)\]\s*").expect("segment label regex"));

pub fn is_han(ch: char) -> bool {
    let u = ch as u32;
    (0x3400..=0x4DBF).contains(&u)
        || (0x4E00..=0x9FFF).contains(&u)
        || (0xF900..=0xFAFF).contains(&u)
        || (0x20000..=0x2A6DF).contains(&u)
        || (0x2A700..=0x2B73F).contains(&u)
        || (0x2B740..=0x2B81F).contains(&u)
        || (0x2B820..=0x2CEAF).contains(&u)
        || (0x2CEB0..=0x2EBEF).contains(&u)
}

/// Letters and digits that group into one "word" token: ASCII plus the Latin-1 and
/// Latin Extended-A/B letter blocks.
pub fn is_latin_word_char(ch: char) -> bool {
    if ch.is_ascii_alphanumeric() {
        return true;
    }
    let u = ch as u32;
    ch.is_alphabetic() && ((0x00C0..=0x024F).contains(&u) && u != 0x00D7 && u != 0x00F7)
}

#[must_use]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset of the `char_idx`-th character (or `text.len()` past the end).
#[must_use]
pub fn byte_offset(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

/// Substring by character range; out-of-range bounds are clamped.
#[must_use]
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let b0 = byte_offset(text, start);
    let b1 = byte_offset(text, end.max(start));
    &text[b0..b1]
}

/// Character index of every occurrence of `needle` in `haystack`.
#[must_use]
pub fn find_char_occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut from = 0usize;
    while let Some(pos) = haystack[from..].find(needle) {
        let abs = from + pos;
        out.push(haystack[..abs].chars().count());
        let step = haystack[abs..].chars().next().map(char::len_utf8).unwrap_or(1);
        from = abs + step;
    }
    out
}

/// Removes a Markdown code fence that wraps the whole of the model output. Text with a fence
/// somewhere in the middle is returned unchanged apart from trimming.
#[must_use]
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() < 6 || !trimmed.starts_with("```") || !trimmed.ends_with("```") {
        return trimmed.to_string();
    }
    let Some(first_newline) = trimmed.find('\n') else {
        return trimmed.to_string();
    };
    let info = trimmed[3..first_newline].trim();
    if info.contains(char::is_whitespace) || info.contains('`') {
        return trimmed.to_string();
    }
    let body = trimmed.get(first_newline + 1..trimmed.len() - 3).unwrap_or_default();
    if body.contains("\n```") {
        // a second fence inside: several blocks, not one wrapper
        return trimmed.to_string();
    }
    body.trim().to_string()
}

pub fn cleanup_model_text(text: &str) -> String {
    strip_code_fence(text)
}

/// `[n] ` label used when a segment is sent to the model.
#[must_use]
pub fn segment_label(index: usize) -> String {
    format!("[{}]", index + 1)
}

/// Strips a leading `[n]` label echoed back by the model.
#[must_use]
pub fn strip_segment_label(text: &str) -> &str {
    match SEGMENT_LABEL_RE.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    if char_len(text) <= max_chars {
        return (text.to_string(), false);
    }
    (text.chars().take(max_chars).collect(), true)
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_stripping_handles_json_and_bare_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\nhello\n```"), "hello");
        assert_eq!(strip_code_fence("  plain  "), "plain");
        assert_eq!(strip_code_fence("```json\n```"), "");
    }

    #[test]
    fn fence_inside_prose_is_left_alone() {
        let text = "Run the following:\n```\ncargo build\n```\nthen start the service.";
        assert_eq!(strip_code_fence(text), text);
        let leading = "```\ncargo build\n```\nthen start the service.";
        assert_eq!(strip_code_fence(leading), leading);
        let trailing = "Run:\n```\ncargo build\n```";
        assert_eq!(strip_code_fence(trailing), trailing);
        let two = "```\na\n```\nmiddle\n```\nb\n```";
        assert_eq!(strip_code_fence(two), two);
    }

    #[test]
    fn label_is_stripped_only_at_start() {
        assert_eq!(strip_segment_label("[3] 你好 [4]"), "你好 [4]");
        assert_eq!(strip_segment_label("no label"), "no label");
        assert_eq!(segment_label(0), "[1]");
    }

    #[test]
    fn char_helpers_use_character_offsets() {
        let s = "欧盟abc";
        assert_eq!(char_len(s), 5);
        assert_eq!(char_slice(s, 1, 3), "盟a");
        assert_eq!(find_char_occurrences("猫和猫", "猫"), vec![0, 2]);
        assert!(find_char_occurrences("abc", "").is_empty());
    }

    #[test]
    fn script_classes() {
        assert!(is_han('猫'));
        assert!(!is_han('a'));
        assert!(is_latin_word_char('é'));
        assert!(!is_latin_word_char('×'));
        assert!(!is_latin_word_char('，'));
    }
}
