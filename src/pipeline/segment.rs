use once_cell::sync::Lazy;
use regex::Regex;

use crate::pipeline::state::Segment;
use crate::textutil::char_len;

static BLANK_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("blank line regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentenceSegment {
    pub text: String,
    /// Terminating whitespace/newlines that followed the sentence.
    pub suffix: String,
}

fn is_sentence_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | ';' | '。' | '！' | '？' | '；')
}

fn is_fullwidth_terminator(ch: char) -> bool {
    matches!(ch, '。' | '！' | '？' | '；')
}

/// Splits text into sentences. ASCII terminators only count when followed by whitespace or
/// the end of text; full-width ones always do.
pub fn split_sentences(text: &str) -> Vec<SentenceSegment> {
    let mut out: Vec<SentenceSegment> = Vec::new();
    let mut start = 0usize;
    let mut iter = text.char_indices().peekable();
    while let Some((i, ch)) = iter.next() {
        let next = iter.peek().map(|(_, c)| *c);
        let (sentence_end, boundary) = if ch == '\n' {
            (i, true)
        } else if is_sentence_terminator(ch) {
            let after = i + ch.len_utf8();
            let ok = is_fullwidth_terminator(ch) || next.map_or(true, char::is_whitespace);
            (after, ok)
        } else {
            (i, false)
        };
        if !boundary {
            continue;
        }

        let mut suffix_end = if ch == '\n' { i + 1 } else { sentence_end };
        while let Some((j, c)) = iter.peek().copied() {
            if !c.is_whitespace() {
                break;
            }
            suffix_end = j + c.len_utf8();
            iter.next();
        }
        let body = text[start..sentence_end].trim_end_matches('\r');
        out.push(SentenceSegment {
            text: body.to_string(),
            suffix: text[start + body.len()..suffix_end].to_string(),
        });
        start = suffix_end;
    }
    if start < text.len() {
        out.push(SentenceSegment {
            text: text[start..].to_string(),
            suffix: String::new(),
        });
    }
    out
}

/// Blank-line delimited paragraphs, trimmed, empty ones dropped.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    BLANK_LINE_RE
        .split(&normalized)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Greedily packs sentences into chunks of at most `max_chars` characters. A single sentence
/// longer than the limit becomes its own chunk.
fn pack_sentences(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for sentence in split_sentences(paragraph) {
        let piece = format!("{}{}", sentence.text, sentence.suffix);
        if !current.is_empty() && char_len(current.trim_end()) + char_len(piece.trim_end()) > max_chars {
            out.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(&piece);
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

/// Segments a source document for translation.
pub fn segment_source(text: &str, max_segment_chars: usize) -> Vec<Segment> {
    let mut paragraphs = split_paragraphs(text);
    if paragraphs.len() == 1 && max_segment_chars > 0 && char_len(&paragraphs[0]) > max_segment_chars {
        paragraphs = pack_sentences(&paragraphs[0], max_segment_chars);
    }
    paragraphs
        .into_iter()
        .enumerate()
        .map(|(index, content)| Segment { index, content })
        .collect()
}
