use std::time::Duration;

use crate::parsers::OutputParser;
use crate::response::Response;

/// Pass-through parser for tools without structured output.
pub struct TextParser;

impl OutputParser for TextParser {
    fn parse(&self, raw: &str, _elapsed: Duration) -> Response {
        Response::plain(raw)
    }
}
