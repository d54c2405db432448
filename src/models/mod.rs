//! Chat-completion backends.

pub mod http;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::{HttpChatModel, HttpModelConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Network failure, closed client or malformed response.
    Transport,
    Timeout,
    /// Non-2xx HTTP status.
    Status,
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Status => "status",
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct StageError {
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Timeout, message)
    }
}

/// Lazily produced response chunks. Finite and not restartable.
pub type TextStream<'a> = Box<dyn Iterator<Item = Result<String, StageError>> + Send + 'a>;

/// A stream that yields `text` as its only chunk.
pub fn once_stream<'a>(text: String) -> TextStream<'a> {
    Box::new(std::iter::once(Ok(text)))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(system_prompt: Option<&str>, user_prompt: &str) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(s) = system_prompt {
            if !s.trim().is_empty() {
                messages.push(ChatMessage::system(s));
            }
        }
        messages.push(ChatMessage::user(user_prompt));
        Self {
            messages,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// An opaque text-in/text-out oracle. Implementations hold no per-job state.
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    fn complete(&self, request: &ChatRequest) -> Result<String, StageError>;

    fn stream(&self, request: &ChatRequest) -> Result<TextStream<'_>, StageError> {
        Ok(once_stream(self.complete(request)?))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Interprets one line of an OpenAI-style event stream. Comments, keep-alives, empty deltas
/// and unparseable payloads yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    let content = chunk.choices.into_iter().next()?.delta.content?;
    if content.is_empty() {
        return None;
    }
    Some(SseEvent::Delta(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"你好"}}]}"#),
            Some(SseEvent::Delta("你好".to_string()))
        );
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("data: {broken"), None);
        assert_eq!(parse_sse_line(""), None);
    }

    struct Echo;

    impl ChatBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn complete(&self, request: &ChatRequest) -> Result<String, StageError> {
            Ok(request.messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    #[test]
    fn default_stream_is_single_chunk() {
        let req = ChatRequest::new(Some("  "), "hello");
        assert_eq!(req.messages.len(), 1);
        let chunks: Vec<String> = Echo.stream(&req).unwrap().map(Result::unwrap).collect();
        assert_eq!(chunks, vec!["hello".to_string()]);
    }
}
