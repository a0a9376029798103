use std::time::Duration;

use serde::Deserialize;

use crate::parsers::{OutputParser, decode_lines};
use crate::response::{Metadata, Response};

/// Parses Codex CLI `exec --json` JSONL event stream.
/// Text comes from `item.completed` events whose item is an `agent_message`;
/// `turn.completed` carries usage, `thread.started` the session id.
pub struct CodexParser;

#[derive(Deserialize)]
struct CodexEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    thread_id: Option<String>,
    item: Option<CodexItem>,
    usage: Option<CodexUsage>,
}

#[derive(Deserialize)]
struct CodexItem {
    #[serde(rename = "type")]
    item_type: Option<String>,
    text: Option<String>,
    content: Option<Vec<CodexContent>>,
}

/// Pre-0.40 `message` items carry `output_text` blocks instead of `text`.
#[derive(Deserialize)]
struct CodexContent {
    #[serde(rename = "type")]
    content_type: Option<String>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct CodexUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl CodexItem {
    fn text(&self) -> Option<String> {
        match self.item_type.as_deref() {
            Some("agent_message") => self.text.clone(),
            Some("message") => Some(
                self.content
                    .iter()
                    .flatten()
                    .filter(|c| c.content_type.as_deref() == Some("output_text"))
                    .filter_map(|c| c.text.as_deref())
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl OutputParser for CodexParser {
    fn parse(&self, raw: &str, elapsed: Duration) -> Response {
        let events: Vec<CodexEvent> = decode_lines(raw);

        let mut parts: Vec<String> = Vec::new();
        let mut session_id = String::new();
        let (mut input, mut output) = (0u64, 0u64);

        for event in &events {
            match event.event_type.as_deref() {
                Some("thread.started") => {
                    if let Some(id) = &event.thread_id {
                        session_id = id.clone();
                    }
                }
                Some("item.completed" | "response.completed") => {
                    if let Some(text) = event.item.as_ref().and_then(CodexItem::text)
                        && !text.is_empty()
                    {
                        parts.push(text);
                    }
                }
                Some("turn.completed") => {
                    if let Some(usage) = &event.usage {
                        input = input.saturating_add(usage.input_tokens.unwrap_or(0));
                        output = output.saturating_add(usage.output_tokens.unwrap_or(0));
                    }
                }
                _ => {}
            }
        }

        if parts.is_empty() {
            return Response::plain(raw);
        }

        let metadata = Metadata {
            duration: elapsed,
            session_id,
            ..Default::default()
        }
        .with_tokens(input, output, None);

        Response {
            content: parts.join("\n"),
            metadata: Some(metadata),
            raw: raw.to_string(),
            ..Default::default()
        }
    }
}
