use std::time::Duration;

use serde::Serialize;

/// Normalized answer from any provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Response {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub metadata: Option<Metadata>,
    /// Exact text handed to the parser, kept for diagnostics.
    pub raw: String,
}

impl Response {
    /// Plain-text fallback: the whole payload is the answer.
    pub fn plain(raw: &str) -> Self {
        Self {
            content: raw.to_string(),
            raw: raw.to_string(),
            ..Default::default()
        }
    }
}

/// Usage and run information reported by a provider. Zero means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub stop_reason: String,
    pub session_id: String,
}

impl Metadata {
    /// Sets token counts, deriving the total when the provider did not report one.
    pub fn with_tokens(mut self, input: u64, output: u64, total: Option<u64>) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self.total_tokens = total
            .filter(|t| *t > 0)
            .unwrap_or_else(|| input.saturating_add(output));
        self
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_derived_from_parts() {
        let m = Metadata::default().with_tokens(10, 5, None);
        assert_eq!(m.total_tokens, 15);
    }

    #[test]
    fn explicit_total_wins() {
        let m = Metadata::default().with_tokens(10, 5, Some(40));
        assert_eq!(m.total_tokens, 40);
    }

    #[test]
    fn metadata_serializes_duration_as_millis() {
        let m = Metadata {
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["duration_ms"], 1500);
    }
}
