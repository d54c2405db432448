//! Minimal edit scripts between two strings.
//!
//! All offsets are character (not byte) offsets. Operations come out in source order and their
//! ranges partition `[0, len(source)]` and `[0, len(target)]` without gaps.

use serde::{Deserialize, Serialize};

use crate::textutil::{char_slice, is_han, is_latin_word_char};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Keep,
    Delete,
    Insert,
    Replace,
}

/// Half-open character range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn at(pos: usize) -> Self {
        Self::new(pos, pos)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn shifted(&self, by: usize) -> Self {
        Self::new(self.start + by, self.end + by)
    }

    #[must_use]
    pub fn union(&self, other: &Span) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }

    #[must_use]
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True when the ranges share at least one character or one contains the other
    /// (the latter also covers zero-width ranges).
    #[must_use]
    pub fn overlaps(&self, other: &Span) -> bool {
        (self.start < other.end && other.start < self.end)
            || self.contains_span(other)
            || other.contains_span(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    pub kind: EditKind,
    pub source_range: Span,
    pub target_range: Span,
    /// Literal inserted text; only set for `Insert` and `Replace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl EditOperation {
    fn keep(source_range: Span, target_range: Span) -> Self {
        Self {
            kind: EditKind::Keep,
            source_range,
            target_range,
            content: None,
        }
    }

    fn delete(source_range: Span, target_pos: usize) -> Self {
        Self {
            kind: EditKind::Delete,
            source_range,
            target_range: Span::at(target_pos),
            content: None,
        }
    }

    fn insert(source_pos: usize, target_range: Span, content: &str) -> Self {
        Self {
            kind: EditKind::Insert,
            source_range: Span::at(source_pos),
            target_range,
            content: Some(content.to_string()),
        }
    }

    fn replace(source_range: Span, target_range: Span, content: &str) -> Self {
        Self {
            kind: EditKind::Replace,
            source_range,
            target_range,
            content: Some(content.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tokenization {
    /// One token per character; for short exact-term comparisons.
    Chars,
    /// Latin letter/digit runs and CJK ideograph runs grouped; everything else per character.
    Words,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenClass {
    Latin,
    Cjk,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub start: usize,
    pub len: usize,
    pub class: TokenClass,
}

impl Token<'_> {
    #[must_use]
    pub fn span(&self) -> Span {
        Span::new(self.start, self.start + self.len)
    }
}

fn classify(ch: char) -> TokenClass {
    if is_han(ch) {
        TokenClass::Cjk
    } else if is_latin_word_char(ch) {
        TokenClass::Latin
    } else {
        TokenClass::Other
    }
}

#[must_use]
pub fn tokenize<'a>(text: &'a str, mode: Tokenization) -> Vec<Token<'a>> {
    let mut out: Vec<Token<'a>> = Vec::new();
    // (byte_start, char_start, char_len, class) of the run being built
    let mut run: Option<(usize, usize, usize, TokenClass)> = None;

    let flush = |run: &mut Option<(usize, usize, usize, TokenClass)>,
                 end_byte: usize,
                 out: &mut Vec<Token<'a>>| {
        if let Some((b0, c0, n, class)) = run.take() {
            out.push(Token {
                text: &text[b0..end_byte],
                start: c0,
                len: n,
                class,
            });
        }
    };

    for (char_idx, (byte_idx, ch)) in text.char_indices().enumerate() {
        let class = classify(ch);
        let groups = mode == Tokenization::Words && class != TokenClass::Other;
        match run.as_mut() {
            Some((_, _, n, run_class)) if groups && *run_class == class => {
                *n += 1;
                continue;
            }
            _ => flush(&mut run, byte_idx, &mut out),
        }
        if groups {
            run = Some((byte_idx, char_idx, 1, class));
        } else {
            out.push(Token {
                text: &text[byte_idx..byte_idx + ch.len_utf8()],
                start: char_idx,
                len: 1,
                class,
            });
        }
    }
    flush(&mut run, text.len(), &mut out);
    out
}

fn pos_after(tokens: &[Token<'_>], consumed: usize) -> usize {
    if consumed == 0 {
        0
    } else {
        tokens[consumed - 1].start + tokens[consumed - 1].len
    }
}

fn levenshtein_table(src: &[Token<'_>], tgt: &[Token<'_>]) -> Vec<Vec<usize>> {
    let (m, n) = (src.len(), tgt.len());
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=n {
        dp[0][j] = j;
    }
    for i in 1..=m {
        for j in 1..=n {
            let sub = if src[i - 1].text == tgt[j - 1].text { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j - 1] + sub)
                .min(dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1);
        }
    }
    dp
}

/// Levenshtein edit script. Ties resolve as match > substitute > delete > insert.
#[must_use]
pub fn diff(source: &str, target: &str, mode: Tokenization) -> Vec<EditOperation> {
    let src = tokenize(source, mode);
    let tgt = tokenize(target, mode);
    let dp = levenshtein_table(&src, &tgt);

    let mut rev: Vec<EditOperation> = Vec::with_capacity(src.len().max(tgt.len()));
    let (mut i, mut j) = (src.len(), tgt.len());
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && src[i - 1].text == tgt[j - 1].text && dp[i][j] == dp[i - 1][j - 1] {
            rev.push(EditOperation::keep(src[i - 1].span(), tgt[j - 1].span()));
            i -= 1;
            j -= 1;
        } else if i > 0 && j > 0 && dp[i][j] == dp[i - 1][j - 1] + 1 {
            let refined = substitute(&src[i - 1], &tgt[j - 1]);
            rev.extend(refined.into_iter().rev());
            i -= 1;
            j -= 1;
        } else if i > 0 && dp[i][j] == dp[i - 1][j] + 1 {
            rev.push(EditOperation::delete(src[i - 1].span(), pos_after(&tgt, j)));
            i -= 1;
        } else {
            let t = &tgt[j - 1];
            rev.push(EditOperation::insert(pos_after(&src, i), t.span(), t.text));
            j -= 1;
        }
    }
    rev.reverse();
    rev
}

/// A substitution of one CJK run by another is narrowed to the differing characters, since a
/// CJK run is a phrase rather than a word.
fn substitute(a: &Token<'_>, b: &Token<'_>) -> Vec<EditOperation> {
    if a.class != TokenClass::Cjk || b.class != TokenClass::Cjk {
        return vec![EditOperation::replace(a.span(), b.span(), b.text)];
    }
    let ac: Vec<char> = a.text.chars().collect();
    let bc: Vec<char> = b.text.chars().collect();
    let max_common = ac.len().min(bc.len());
    let prefix = ac.iter().zip(bc.iter()).take_while(|(x, y)| x == y).count();
    let suffix = ac
        .iter()
        .rev()
        .zip(bc.iter().rev())
        .take(max_common - prefix)
        .take_while(|(x, y)| x == y)
        .count();

    let mut out = Vec::with_capacity(3);
    if prefix > 0 {
        out.push(EditOperation::keep(
            Span::new(a.start, a.start + prefix),
            Span::new(b.start, b.start + prefix),
        ));
    }
    let a_mid = Span::new(a.start + prefix, a.start + ac.len() - suffix);
    let b_mid = Span::new(b.start + prefix, b.start + bc.len() - suffix);
    let b_mid_text: String = bc[prefix..bc.len() - suffix].iter().collect();
    if a_mid.is_empty() {
        out.push(EditOperation::insert(a_mid.start, b_mid, &b_mid_text));
    } else if b_mid.is_empty() {
        out.push(EditOperation::delete(a_mid, b_mid.start));
    } else {
        out.push(EditOperation::replace(a_mid, b_mid, &b_mid_text));
    }
    if suffix > 0 {
        out.push(EditOperation::keep(
            Span::new(a_mid.end, a_mid.end + suffix),
            Span::new(b_mid.end, b_mid.end + suffix),
        ));
    }
    out
}

/// LCS-based classification into keep / insert / delete (never replace).
#[must_use]
pub fn lcs_diff(source: &str, target: &str, mode: Tokenization) -> Vec<EditOperation> {
    let src = tokenize(source, mode);
    let tgt = tokenize(target, mode);
    let (m, n) = (src.len(), tgt.len());
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if src[i - 1].text == tgt[j - 1].text {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    let mut rev: Vec<EditOperation> = Vec::with_capacity(m.max(n));
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && src[i - 1].text == tgt[j - 1].text {
            rev.push(EditOperation::keep(src[i - 1].span(), tgt[j - 1].span()));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || dp[i][j - 1] >= dp[i - 1][j]) {
            let t = &tgt[j - 1];
            rev.push(EditOperation::insert(pos_after(&src, i), t.span(), t.text));
            j -= 1;
        } else {
            rev.push(EditOperation::delete(src[i - 1].span(), pos_after(&tgt, j)));
            i -= 1;
        }
    }
    rev.reverse();
    rev
}

/// Merges consecutive operations of the same kind whose ranges are contiguous.
#[must_use]
pub fn merge_runs(ops: &[EditOperation]) -> Vec<EditOperation> {
    let mut out: Vec<EditOperation> = Vec::with_capacity(ops.len());
    for op in ops {
        if let Some(last) = out.last_mut() {
            if last.kind == op.kind
                && last.source_range.end == op.source_range.start
                && last.target_range.end == op.target_range.start
            {
                last.source_range.end = op.source_range.end;
                last.target_range.end = op.target_range.end;
                if let Some(extra) = op.content.as_deref() {
                    last.content.get_or_insert_with(String::new).push_str(extra);
                }
                continue;
            }
        }
        out.push(op.clone());
    }
    out
}

/// Replays `ops` against `source`, producing the target string.
#[must_use]
pub fn apply_target(source: &str, ops: &[EditOperation]) -> String {
    let mut out = String::with_capacity(source.len());
    for op in ops {
        match op.kind {
            EditKind::Keep => {
                out.push_str(char_slice(source, op.source_range.start, op.source_range.end));
            }
            EditKind::Insert | EditKind::Replace => {
                out.push_str(op.content.as_deref().unwrap_or_default());
            }
            EditKind::Delete => {}
        }
    }
    out
}

/// Rebuilds the source from the ranges the script consumes.
#[must_use]
pub fn apply_source(source: &str, ops: &[EditOperation]) -> String {
    let mut out = String::with_capacity(source.len());
    for op in ops.iter().filter(|op| op.kind != EditKind::Insert) {
        out.push_str(char_slice(source, op.source_range.start, op.source_range.end));
    }
    out
}

/// Turns a source→target script into the equivalent target→source script.
#[must_use]
pub fn invert(source: &str, ops: &[EditOperation]) -> Vec<EditOperation> {
    ops.iter()
        .map(|op| {
            let removed = char_slice(source, op.source_range.start, op.source_range.end);
            match op.kind {
                EditKind::Keep => EditOperation::keep(op.target_range, op.source_range),
                EditKind::Delete => {
                    EditOperation::insert(op.target_range.start, op.source_range, removed)
                }
                EditKind::Insert => EditOperation::delete(op.target_range, op.source_range.start),
                EditKind::Replace => {
                    EditOperation::replace(op.target_range, op.source_range, removed)
                }
            }
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Delete,
    Replace,
}

/// The part of a source/target pair covered by non-keep operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeRegion {
    pub kind: ChangeKind,
    pub source: Span,
    pub target: Span,
}

#[must_use]
pub fn change_region(ops: &[EditOperation]) -> Option<ChangeRegion> {
    let mut changed = ops.iter().filter(|op| op.kind != EditKind::Keep);
    let first = changed.next()?;
    let mut source = first.source_range;
    let mut target = first.target_range;
    let mut all_insert = first.kind == EditKind::Insert;
    let mut all_delete = first.kind == EditKind::Delete;
    for op in changed {
        source = source.union(&op.source_range);
        target = target.union(&op.target_range);
        all_insert &= op.kind == EditKind::Insert;
        all_delete &= op.kind == EditKind::Delete;
    }
    let kind = if all_insert {
        ChangeKind::Insert
    } else if all_delete {
        ChangeKind::Delete
    } else {
        ChangeKind::Replace
    };
    Some(ChangeRegion {
        kind,
        source,
        target,
    })
}

/// One-line summary of what changes between `source` and `target`, or `None` if nothing does.
#[must_use]
pub fn describe_change(source: &str, target: &str) -> Option<String> {
    let ops = merge_runs(&diff(source, target, Tokenization::Words));
    let region = change_region(&ops)?;
    let removed = char_slice(source, region.source.start, region.source.end);
    let added = char_slice(target, region.target.start, region.target.end);
    Some(match region.kind {
        ChangeKind::Delete => format!("delete: \"{removed}\""),
        ChangeKind::Insert => format!("insert: \"{added}\""),
        ChangeKind::Replace => format!("replace: \"{removed}\" -> \"{added}\""),
    })
}
