pub mod claude;
pub mod codex;
pub mod gemini;
pub mod opencode;
pub mod text;

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::OutputFormat;
use crate::response::Response;

/// Converts captured CLI output into a `Response`.
///
/// Parsing never fails: output that does not match the expected shape is
/// returned verbatim as content with no metadata. `Response::raw` always
/// equals the input.
pub trait OutputParser: Send + Sync {
    /// `elapsed` is the wall time measured by the executor, for formats that
    /// do not report their own duration.
    fn parse(&self, raw: &str, elapsed: Duration) -> Response;
}

/// Resolve the parser bound to an output format.
pub fn parser_for(format: OutputFormat) -> Box<dyn OutputParser> {
    match format {
        OutputFormat::Claude => Box::new(claude::ClaudeParser),
        OutputFormat::Gemini => Box::new(gemini::GeminiParser),
        OutputFormat::Codex => Box::new(codex::CodexParser),
        OutputFormat::OpenCode => Box::new(opencode::OpenCodeParser),
        OutputFormat::Text | OutputFormat::Simulated => Box::new(text::TextParser),
    }
}

/// Decode each non-blank line as `T`, skipping lines that fail to decode.
pub(crate) fn decode_lines<T: DeserializeOwned>(raw: &str) -> Vec<T> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
