//! Tolerant JSON parsing for model output that arrives in pieces.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::textutil::strip_code_fence;

#[derive(Debug, Error)]
pub enum JsonParseError {
    #[error("empty response")]
    Empty,
    #[error("no JSON object in response")]
    NoObject,
    #[error("invalid JSON: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Drops `//` comments that sit outside string literals.
#[must_use]
pub fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                for rest in chars.by_ref() {
                    if rest == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

static FENCED_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```").expect("fence regex"));

fn clean(raw: &str) -> String {
    strip_line_comments(&strip_code_fence(raw)).trim().to_string()
}

/// Contents of the first fenced block in a response that also carries prose around it.
fn embedded_block(raw: &str) -> Option<String> {
    let inner = FENCED_BLOCK_RE.captures(raw)?.get(1)?;
    let cleaned = strip_line_comments(inner.as_str()).trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Strict parse after fence and comment cleanup. Never panics.
pub fn try_parse<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return None;
    }
    serde_json::from_str(&cleaned).ok()
}

/// Parse a complete response: strict first, then a fenced block embedded in prose, then the
/// first `{...}` value with any trailing text ignored.
pub fn parse_final<T: DeserializeOwned>(raw: &str) -> Result<T, JsonParseError> {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return Err(JsonParseError::Empty);
    }
    if let Ok(v) = serde_json::from_str(&cleaned) {
        return Ok(v);
    }
    if let Some(block) = embedded_block(&cleaned) {
        if let Ok(v) = serde_json::from_str(&block) {
            return Ok(v);
        }
    }
    let start = cleaned.find('{').ok_or(JsonParseError::NoObject)?;
    let mut de = serde_json::Deserializer::from_str(&cleaned[start..]);
    Ok(T::deserialize(&mut de)?)
}

/// Best-effort parse of a truncated object. Unterminated containers are closed; a dangling key,
/// colon or half-written string is cut back to the last complete member.
pub fn parse_partial<T: DeserializeOwned>(raw: &str) -> Option<T> {
    if let Some(v) = try_parse(raw) {
        return Some(v);
    }
    let cleaned = clean(raw);
    let start = cleaned.find('{')?;
    let body = &cleaned[start..];
    for candidate in close_candidates(body) {
        if let Ok(v) = serde_json::from_str(&candidate) {
            return Some(v);
        }
    }
    None
}

fn closers(stack: &[char]) -> String {
    stack
        .iter()
        .rev()
        .map(|open| if *open == '{' { '}' } else { ']' })
        .collect()
}

fn close_candidates(body: &str) -> Vec<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_comma: Option<(usize, Vec<char>)> = None;

    for (i, ch) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => stack.push(ch),
            '}' | ']' => {
                stack.pop();
            }
            ',' => last_comma = Some((i, stack.clone())),
            _ => {}
        }
    }

    let mut out = Vec::with_capacity(2);
    let tail = body.trim_end();
    if !in_string && !stack.is_empty() && !tail.ends_with(',') && !tail.ends_with(':') {
        out.push(format!("{tail}{}", closers(&stack)));
    }
    if let Some((pos, snapshot)) = last_comma {
        if !snapshot.is_empty() {
            out.push(format!("{}{}", &body[..pos], closers(&snapshot)));
        }
    }
    out
}

/// Accumulates a streamed response and keeps the newest successful partial parse.
#[derive(Debug)]
pub struct StreamingJson<T> {
    buf: String,
    latest: Option<T>,
}

impl<T> Default for StreamingJson<T> {
    fn default() -> Self {
        Self {
            buf: String::new(),
            latest: None,
        }
    }
}

impl<T: DeserializeOwned> StreamingJson<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk; returns the partial value if this chunk produced a new parse.
    pub fn push(&mut self, chunk: &str) -> Option<&T> {
        self.buf.push_str(chunk);
        let parsed = parse_partial::<T>(&self.buf)?;
        self.latest = Some(parsed);
        self.latest.as_ref()
    }

    pub fn latest(&self) -> Option<&T> {
        self.latest.as_ref()
    }

    pub fn text(&self) -> &str {
        &self.buf
    }

    pub fn finish(self) -> Result<T, JsonParseError> {
        parse_final(&self.buf)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default, rename_all = "camelCase")]
    struct Sample {
        content_type: Option<String>,
        style: Option<String>,
        key_terms: Option<BTreeMap<String, String>>,
    }

    #[test]
    fn fences_and_comments_are_ignored() {
        let raw = "```json\n{\n  // kind of text\n  \"contentType\": \"news\", \"style\": \"http://x\"\n}\n```";
        let p: Sample = try_parse(raw).unwrap();
        assert_eq!(p.content_type.as_deref(), Some("news"));
        assert_eq!(p.style.as_deref(), Some("http://x"));
    }

    #[test]
    fn try_parse_fails_closed() {
        assert!(try_parse::<Sample>("").is_none());
        assert!(try_parse::<Sample>("not json at all").is_none());
        assert!(try_parse::<Sample>("{\"contentType\": ").is_none());
    }

    #[test]
    fn final_parse_ignores_trailing_prose() {
        let p: Sample = parse_final("Here you go: {\"style\":\"formal\"} hope it helps").unwrap();
        assert_eq!(p.style.as_deref(), Some("formal"));
        assert!(matches!(parse_final::<Sample>("   "), Err(JsonParseError::Empty)));
        assert!(matches!(parse_final::<Sample>("no braces"), Err(JsonParseError::NoObject)));
        assert!(matches!(parse_final::<Sample>("{\"style\": }"), Err(JsonParseError::Invalid(_))));
    }

    #[test]
    fn final_parse_finds_fenced_block_inside_prose() {
        let raw = "Fields use {camelCase} keys:\n```json\n{\"style\":\"formal\"}\n```\nLet me know.";
        let p: Sample = parse_final(raw).unwrap();
        assert_eq!(p.style.as_deref(), Some("formal"));
    }

    #[test]
    fn partial_objects_are_closed() {
        let p: Sample = parse_partial("{\"contentType\":\"news\"").unwrap();
        assert_eq!(p.content_type.as_deref(), Some("news"));

        let p: Sample = parse_partial("{\"contentType\":\"news\",\"style\":\"for").unwrap();
        assert_eq!(p.content_type.as_deref(), Some("news"));
        assert_eq!(p.style, None);

        let p: Sample = parse_partial("{\"keyTerms\":{\"EU\":\"欧盟\",").unwrap();
        assert_eq!(p.key_terms.unwrap().get("EU").map(String::as_str), Some("欧盟"));

        assert!(parse_partial::<Sample>("{\"contentType\":").is_none());
    }

    #[test]
    fn streaming_keeps_latest_partial() {
        let mut s: StreamingJson<Sample> = StreamingJson::new();
        assert!(s.push("```json\n{\"conte").is_none());
        assert!(s.latest().is_none());
        let first = s.push("ntType\":\"news\"").unwrap();
        assert_eq!(first.content_type.as_deref(), Some("news"));
        assert!(s.push(", \"sty").is_some());
        s.push("le\":\"formal\"}\n```");
        assert_eq!(s.latest().unwrap().style.as_deref(), Some("formal"));
        let done = s.finish().unwrap();
        assert_eq!(done.content_type.as_deref(), Some("news"));
    }
}
