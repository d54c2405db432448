//! Source-document text extraction.

use std::path::Path;

use anyhow::Context;
use encoding_rs::{GB18030, UTF_8};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document looks like binary data, not text")]
    Binary,
}

/// Turns raw document bytes into plain text.
pub trait DocumentSource {
    fn extract(&self, bytes: &[u8]) -> Result<String, DocumentError>;
}

/// Plain text files: UTF-8 (with or without BOM), falling back to GB18030.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextSource;

impl DocumentSource for PlainTextSource {
    fn extract(&self, bytes: &[u8]) -> Result<String, DocumentError> {
        if bytes.contains(&0) {
            return Err(DocumentError::Binary);
        }
        let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
        if !had_errors {
            return Ok(text.replace("\r\n", "\n"));
        }
        let (text, _, _) = GB18030.decode(bytes);
        debug!("input is not UTF-8, decoded as GB18030");
        Ok(text.replace("\r\n", "\n"))
    }
}

pub fn read_document(path: &Path, source: &dyn DocumentSource) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read input: {}", path.display()))?;
    source
        .extract(&bytes)
        .with_context(|| format!("extract text: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_bom_is_removed() {
        let bytes = b"\xEF\xBB\xBFHello\r\n\r\nWorld";
        assert_eq!(PlainTextSource.extract(bytes).unwrap(), "Hello\n\nWorld");
    }

    #[test]
    fn legacy_chinese_falls_back_to_gb18030() {
        let (encoded, _, _) = GB18030.encode("欧盟战略");
        assert_eq!(PlainTextSource.extract(&encoded).unwrap(), "欧盟战略");
    }

    #[test]
    fn nul_bytes_are_rejected() {
        assert_eq!(PlainTextSource.extract(b"PK\x03\x04\x00\x00"), Err(DocumentError::Binary));
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "段落一\n\n段落二").unwrap();
        assert_eq!(read_document(&path, &PlainTextSource).unwrap(), "段落一\n\n段落二");
        assert!(read_document(&dir.path().join("missing.txt"), &PlainTextSource).is_err());
    }
}
