use std::time::Duration;

use serde::Deserialize;

use crate::parsers::OutputParser;
use crate::response::{Metadata, Response};

/// Parses Claude CLI `--output-format json` output.
///
/// Newer CLI versions print a JSON array of events
/// (`[{"type":"system",..},{"type":"assistant",..},{"type":"result",..}]`);
/// older ones print a single object with either `content` blocks or a
/// `result` string. Both are accepted.
pub struct ClaudeParser;

#[derive(Deserialize)]
struct ClaudeEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    result: Option<String>,
    message: Option<ClaudeMessage>,
    content: Option<Content>,
    usage: Option<ClaudeUsage>,
    stop_reason: Option<String>,
    session_id: Option<String>,
    model: Option<String>,
    duration_ms: Option<f64>,
}

#[derive(Deserialize)]
struct ClaudeMessage {
    content: Option<Content>,
    usage: Option<ClaudeUsage>,
    stop_reason: Option<String>,
    model: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl Content {
    fn text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.block_type.as_deref() == Some("text"))
                .filter_map(|b| b.text.as_deref())
                .collect(),
        }
    }
}

impl ClaudeEvent {
    fn is(&self, kind: &str) -> bool {
        self.event_type.as_deref() == Some(kind)
    }

    fn text(&self) -> String {
        self.message
            .as_ref()
            .and_then(|m| m.content.as_ref())
            .or(self.content.as_ref())
            .map(Content::text)
            .unwrap_or_default()
    }

    fn usage(&self) -> Option<&ClaudeUsage> {
        self.usage
            .as_ref()
            .or_else(|| self.message.as_ref().and_then(|m| m.usage.as_ref()))
    }

    fn stop_reason(&self) -> Option<&str> {
        self.stop_reason
            .as_deref()
            .or_else(|| self.message.as_ref().and_then(|m| m.stop_reason.as_deref()))
    }

    fn model(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.model.as_deref())
            .or(self.model.as_deref())
    }

    fn metadata(&self, session_fallback: Option<&str>) -> Option<Metadata> {
        let usage = self.usage()?;
        let metadata = Metadata {
            stop_reason: self.stop_reason().unwrap_or_default().to_string(),
            session_id: self
                .session_id
                .as_deref()
                .or(session_fallback)
                .unwrap_or_default()
                .to_string(),
            duration: self
                .duration_ms
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .map(|ms| Duration::from_secs_f64(ms / 1000.0))
                .unwrap_or_default(),
            ..Default::default()
        };
        Some(metadata.with_tokens(
            usage.input_tokens.unwrap_or(0),
            usage.output_tokens.unwrap_or(0),
            usage.total_tokens,
        ))
    }
}

impl OutputParser for ClaudeParser {
    fn parse(&self, raw: &str, _elapsed: Duration) -> Response {
        parse_events(raw)
            .or_else(|| parse_object(raw))
            .unwrap_or_else(|| Response::plain(raw))
    }
}

/// Array-of-events shape. A non-empty `result` event wins over assistant text.
/// Events that do not decode are skipped, like bad lines in a JSONL stream.
fn parse_events(raw: &str) -> Option<Response> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw).ok()?;
    let events: Vec<ClaudeEvent> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();

    let result_text = events
        .iter()
        .rev()
        .filter(|e| e.is("result"))
        .find_map(|e| e.result.as_deref().filter(|r| !r.is_empty()));

    let content = match result_text {
        Some(text) => text.to_string(),
        None => events
            .iter()
            .filter(|e| e.is("assistant"))
            .map(ClaudeEvent::text)
            .collect(),
    };
    if content.is_empty() {
        return None;
    }

    let usage_event = events
        .iter()
        .rev()
        .find(|e| e.is("result") && e.usage().is_some())
        .or_else(|| {
            events
                .iter()
                .rev()
                .find(|e| e.is("assistant") && e.usage().is_some())
        });
    let session = events.iter().find_map(|e| e.session_id.as_deref());

    Some(Response {
        content,
        model: events
            .iter()
            .find_map(ClaudeEvent::model)
            .unwrap_or_default()
            .to_string(),
        metadata: usage_event.and_then(|e| e.metadata(session)),
        raw: raw.to_string(),
        ..Default::default()
    })
}

/// Single-object shape: `content` blocks, else the `result` string.
fn parse_object(raw: &str) -> Option<Response> {
    let object: ClaudeEvent = serde_json::from_str(raw).ok()?;

    let content = Some(object.text())
        .filter(|t| !t.is_empty())
        .or_else(|| object.result.clone().filter(|r| !r.is_empty()))?;

    Some(Response {
        content,
        model: object.model().unwrap_or_default().to_string(),
        metadata: object.metadata(None),
        raw: raw.to_string(),
        ..Default::default()
    })
}
