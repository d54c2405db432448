use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{parse_sse_line, ChatBackend, ChatMessage, ChatRequest, SseEvent, StageError, StageErrorKind, TextStream};
use crate::textutil::truncate_chars;

const ERROR_BODY_MAX_CHARS: usize = 400;

#[derive(Clone, Debug)]
pub struct HttpModelConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    /// Applies to each request, body included.
    pub timeout: Duration,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpChatModel {
    cfg: HttpModelConfig,
    client: Option<Client>,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpChatModel {
    pub fn connect(cfg: HttpModelConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !cfg.base_url.trim().is_empty(),
            "API base URL is not configured (set TRANSLATION_BASE_URL or [api].base_url)"
        );
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("build http client")?;
        debug!(base_url = %cfg.base_url, model = %cfg.model, "chat client ready");
        Ok(Self {
            cfg,
            client: Some(client),
        })
    }

    /// Drops the connection pool. Later calls fail with a transport error.
    pub fn close(&mut self) {
        self.client = None;
    }

    pub fn config(&self) -> &HttpModelConfig {
        &self.cfg
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }

    fn send(&self, request: &ChatRequest, stream: bool) -> Result<Response, StageError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| StageError::transport("chat client is closed"))?;
        let body = CompletionBody {
            model: &self.cfg.model,
            messages: &request.messages,
            temperature: request.temperature.or(self.cfg.temperature),
            stream,
        };
        debug!(model = %self.cfg.model, stream, messages = request.messages.len(), "chat request");

        let mut builder = client.post(self.endpoint()).json(&body);
        if let Some(key) = self.cfg.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().map_err(map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            let (snippet, _) = truncate_chars(text.trim(), ERROR_BODY_MAX_CHARS);
            return Err(StageError::new(
                StageErrorKind::Status,
                format!("HTTP {}: {snippet}", status.as_u16()),
            ));
        }
        Ok(resp)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> StageError {
    if e.is_timeout() {
        StageError::timeout(e.to_string())
    } else {
        StageError::transport(e.to_string())
    }
}

fn map_io_error(e: std::io::Error) -> StageError {
    if e.kind() == std::io::ErrorKind::TimedOut || e.to_string().contains("timed out") {
        StageError::timeout(e.to_string())
    } else {
        StageError::transport(e.to_string())
    }
}

impl ChatBackend for HttpChatModel {
    fn name(&self) -> &str {
        &self.cfg.model
    }

    fn complete(&self, request: &ChatRequest) -> Result<String, StageError> {
        let resp = self.send(request, false)?;
        let parsed: CompletionResponse = resp.json().map_err(map_reqwest_error)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(content)
    }

    fn stream(&self, request: &ChatRequest) -> Result<TextStream<'_>, StageError> {
        let resp = self.send(request, true)?;
        Ok(Box::new(SseStream::new(BufReader::new(resp))))
    }
}

/// Content deltas read line by line from an event stream.
pub(crate) struct SseStream<R> {
    reader: R,
    line: String,
    done: bool,
}

impl<R: BufRead> SseStream<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for SseStream<R> {
    type Item = Result<String, StageError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => self.done = true,
                Ok(_) => match parse_sse_line(&self.line) {
                    Some(SseEvent::Delta(text)) => return Some(Ok(text)),
                    Some(SseEvent::Done) => self.done = true,
                    None => {}
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(map_io_error(e)));
                }
            }
        }
        None
    }
}
