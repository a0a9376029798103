use std::time::Duration;

use serde::Deserialize;

use crate::parsers::{OutputParser, decode_lines};
use crate::response::{Metadata, Response};

/// Parses OpenCode `run --format json` newline-delimited events.
///
/// ```text
/// {"type":"text","sessionID":"ses_1","part":{"type":"text","text":"A "}}
/// {"type":"step_finish","sessionID":"ses_1","part":{"type":"step-finish","reason":"stop","tokens":{"input":10,"output":5}}}
/// ```
///
/// Malformed lines are dropped so a partially corrupt log still yields its
/// readable events. Tokens are summed over every finish event (one per
/// step); the last finish reason wins.
pub struct OpenCodeParser;

#[derive(Deserialize)]
struct OpenCodeEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[serde(rename = "sessionID", alias = "session_id")]
    session_id: Option<String>,
    part: Option<EventPart>,
}

#[derive(Deserialize)]
struct EventPart {
    #[serde(rename = "type")]
    part_type: Option<String>,
    text: Option<String>,
    reason: Option<String>,
    tokens: Option<PartTokens>,
    #[serde(rename = "sessionID")]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct PartTokens {
    input: Option<u64>,
    output: Option<u64>,
}

impl OpenCodeEvent {
    fn is_text(&self) -> bool {
        self.event_type.as_deref() == Some("text")
    }

    fn is_finish(&self) -> bool {
        matches!(self.event_type.as_deref(), Some("step_finish" | "finish"))
            || matches!(
                self.part.as_ref().and_then(|p| p.part_type.as_deref()),
                Some("finish" | "step-finish")
            )
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .or_else(|| self.part.as_ref().and_then(|p| p.session_id.as_deref()))
            .filter(|s| !s.is_empty())
    }
}

impl OutputParser for OpenCodeParser {
    fn parse(&self, raw: &str, elapsed: Duration) -> Response {
        let events: Vec<OpenCodeEvent> = decode_lines(raw);

        let content: String = events
            .iter()
            .filter(|e| e.is_text())
            .filter_map(|e| e.part.as_ref().and_then(|p| p.text.as_deref()))
            .collect();
        if content.is_empty() {
            return Response::plain(raw);
        }

        let mut metadata = Metadata {
            duration: elapsed,
            ..Default::default()
        };
        let (mut input, mut output) = (0u64, 0u64);
        for event in events.iter().filter(|e| e.is_finish()) {
            if let Some(part) = &event.part {
                if let Some(reason) = &part.reason {
                    metadata.stop_reason = reason.clone();
                }
                if let Some(tokens) = &part.tokens {
                    input = input.saturating_add(tokens.input.unwrap_or(0));
                    output = output.saturating_add(tokens.output.unwrap_or(0));
                }
            }
            if let Some(id) = event.session_id() {
                metadata.session_id = id.to_string();
            }
        }
        if metadata.session_id.is_empty()
            && let Some(id) = events.iter().find_map(OpenCodeEvent::session_id)
        {
            metadata.session_id = id.to_string();
        }

        Response {
            content,
            metadata: Some(metadata.with_tokens(input, output, None)),
            raw: raw.to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_token_counts_saturate() {
        let raw = concat!(
            r#"{"type":"text","part":{"type":"text","text":"x"}}"#, "\n",
            r#"{"type":"step_finish","part":{"type":"finish","tokens":{"input":18446744073709551615,"output":1}}}"#, "\n",
            r#"{"type":"step_finish","part":{"type":"finish","tokens":{"input":1,"output":18446744073709551615}}}"#,
        );
        let meta = OpenCodeParser.parse(raw, Duration::ZERO).metadata.unwrap();
        assert_eq!(meta.input_tokens, u64::MAX);
        assert_eq!(meta.output_tokens, u64::MAX);
        assert_eq!(meta.total_tokens, u64::MAX);
    }

    #[test]
    fn tokens_summed_across_steps() {
        let raw = concat!(
            r#"{"type":"text","part":{"type":"text","text":"x"}}"#, "\n",
            r#"{"type":"step_finish","part":{"type":"step-finish","reason":"tool-calls","tokens":{"input":10,"output":1}}}"#, "\n",
            r#"{"type":"text","part":{"type":"text","text":"y"}}"#, "\n",
            r#"{"type":"step_finish","sessionID":"ses_9","part":{"type":"step-finish","reason":"stop","tokens":{"input":20,"output":2,"reasoning":0,"cache":{"read":0,"write":0}}}}"#,
        );
        let resp = OpenCodeParser.parse(raw, Duration::from_millis(900));
        assert_eq!(resp.content, "xy");
        let meta = resp.metadata.unwrap();
        assert_eq!(meta.stop_reason, "stop");
        assert_eq!(meta.session_id, "ses_9");
        assert_eq!(meta.input_tokens, 30);
        assert_eq!(meta.output_tokens, 3);
        assert_eq!(meta.total_tokens, 33);
        assert_eq!(meta.duration, Duration::from_millis(900));
    }

    #[test]
    fn session_from_text_event_when_finish_lacks_it() {
        let raw = concat!(
            r#"{"type":"text","sessionID":"ses_a","part":{"type":"text","text":"hi"}}"#, "\n",
            r#"{"type":"step_finish","part":{"type":"finish","reason":"stop"}}"#,
        );
        let meta = OpenCodeParser.parse(raw, Duration::ZERO).metadata.unwrap();
        assert_eq!(meta.session_id, "ses_a");
        assert_eq!(meta.total_tokens, 0);
    }

    #[test]
    fn tool_events_ignored() {
        let raw = concat!(
            r#"{"type":"tool_use","part":{"type":"tool","tool":"bash","text":"not an answer"}}"#, "\n",
            r#"{"type":"text","part":{"type":"text","text":"answer"}}"#,
        );
        assert_eq!(OpenCodeParser.parse(raw, Duration::ZERO).content, "answer");
    }
}
