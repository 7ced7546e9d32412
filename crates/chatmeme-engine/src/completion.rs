use std::io::{BufRead, BufReader, Read};

use anyhow::{Context, Result};
use chatmeme_contracts::config::CompletionConfig;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::error::StageError;
use crate::http::ensure_success;

#[derive(Debug, Clone, PartialEq, Eq)]
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

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_completion_tokens: u32,
    pub top_p: f32,
}

impl CompletionRequest {
    pub fn payload(&self) -> Value {
        let messages: Vec<Value> = self
            .messages
            .iter()
            .map(|message| json!({ "role": message.role, "content": message.content }))
            .collect();
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_completion_tokens": self.max_completion_tokens,
            "top_p": self.top_p,
            "stream": true,
            "stop": Value::Null,
        })
    }
}

/// Finite sequence of text fragments produced by one completion call.
pub type FragmentStream<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

pub trait CompletionProvider {
    fn name(&self) -> &str;
    fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream<'_>>;
}

/// Drains a fragment stream into one string. The first fragment error wins.
pub fn collect_fragments(stream: FragmentStream<'_>) -> Result<String> {
    let mut text = String::new();
    for fragment in stream {
        text.push_str(&fragment?);
    }
    Ok(text)
}

/// OpenAI-compatible `/chat/completions` client consuming server-sent events.
pub struct ChatCompletionsProvider {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl ChatCompletionsProvider {
    pub fn new(config: &CompletionConfig) -> Self {
        Self::with_client(config, HttpClient::new())
    }

    pub fn with_client(config: &CompletionConfig, http: HttpClient) -> Self {
        Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            http,
        }
    }
}

impl CompletionProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "chat_completions"
    }

    fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream<'_>> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(&request.payload())
            .send()
            .with_context(|| format!("completion request failed ({endpoint})"))?;
        let response = ensure_success("completion", response)?;
        Ok(Box::new(SseFragments::new(response)))
    }
}

/// Iterator over `data:` events of a chat-completions stream.
pub struct SseFragments<R> {
    reader: BufReader<R>,
    done: bool,
}

impl<R: Read> SseFragments<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
            done: false,
        }
    }

    fn next_event(&mut self) -> Result<Option<String>> {
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .context("completion stream read failed")?;
            if read == 0 {
                return Ok(None);
            }
            let line = line.trim();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(None);
            }
            let event: Value = serde_json::from_str(data)
                .context("completion stream carried invalid JSON event")?;
            if let Some(error) = event.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(StageError::Rejected {
                    service: "completion",
                    message,
                }
                .into());
            }
            if let Some(content) = delta_content(&event) {
                if !content.is_empty() {
                    return Ok(Some(content.to_string()));
                }
            }
        }
    }
}

impl<R: Read> Iterator for SseFragments<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_event() {
            Ok(Some(fragment)) => Some(Ok(fragment)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn delta_content(event: &Value) -> Option<&str> {
    event
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
}
