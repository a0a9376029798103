use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::parsers::OutputParser;
use crate::response::{Metadata, Response};

/// Parses Gemini CLI `--output-format json` output.
///
/// Answer lookup order: top-level `response`, then the first candidate's
/// `content.parts[].text`, then a bare `text` field.
///
/// Usage lookup order: `usageMetadata` (API field names), then `stats`
/// (CLI per-model counters, summed across models).
pub struct GeminiParser;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiOutput {
    response: Option<String>,
    candidates: Option<Vec<Candidate>>,
    text: Option<String>,
    usage_metadata: Option<UsageMetadata>,
    stats: Option<Stats>,
    model_version: Option<String>,
    #[serde(alias = "session_id")]
    session_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

#[derive(Deserialize)]
struct Stats {
    #[serde(default)]
    models: BTreeMap<String, ModelStats>,
}

#[derive(Deserialize)]
struct ModelStats {
    tokens: Option<StatsTokens>,
}

#[derive(Deserialize)]
struct StatsTokens {
    prompt: Option<u64>,
    candidates: Option<u64>,
    total: Option<u64>,
}

/// Token counts before they are folded into `Metadata`.
struct Usage {
    input: u64,
    output: u64,
    total: Option<u64>,
}

impl GeminiOutput {
    fn answer(&self) -> Option<String> {
        if let Some(response) = self.response.as_deref().filter(|r| !r.is_empty()) {
            return Some(response.to_string());
        }

        let from_parts: String = self
            .candidates
            .iter()
            .flatten()
            .next()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();
        if !from_parts.is_empty() {
            return Some(from_parts);
        }

        self.text.clone().filter(|t| !t.is_empty())
    }

    fn usage(&self) -> Option<Usage> {
        if let Some(u) = &self.usage_metadata {
            return Some(Usage {
                input: u.prompt_token_count.unwrap_or(0),
                output: u.candidates_token_count.unwrap_or(0),
                total: u.total_token_count,
            });
        }

        let tokens: Vec<&StatsTokens> = self
            .stats
            .as_ref()?
            .models
            .values()
            .filter_map(|m| m.tokens.as_ref())
            .collect();
        if tokens.is_empty() {
            return None;
        }
        let sum = |f: fn(&StatsTokens) -> Option<u64>| -> Option<u64> {
            tokens.iter().copied().filter_map(f).reduce(u64::saturating_add)
        };
        Some(Usage {
            input: sum(|t| t.prompt).unwrap_or(0),
            output: sum(|t| t.candidates).unwrap_or(0),
            total: sum(|t| t.total),
        })
    }

    fn model(&self) -> String {
        if let Some(version) = &self.model_version {
            return version.clone();
        }
        // Only unambiguous when a single model did the work.
        match self.stats.as_ref().map(|s| &s.models) {
            Some(models) if models.len() == 1 => models.keys().next().cloned().unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn stop_reason(&self) -> String {
        self.candidates
            .iter()
            .flatten()
            .next()
            .and_then(|c| c.finish_reason.clone())
            .unwrap_or_default()
    }
}

impl OutputParser for GeminiParser {
    fn parse(&self, raw: &str, _elapsed: Duration) -> Response {
        let Ok(output) = serde_json::from_str::<GeminiOutput>(raw) else {
            return Response::plain(raw);
        };
        let Some(content) = output.answer() else {
            return Response::plain(raw);
        };

        let metadata = output.usage().map(|usage| {
            Metadata {
                stop_reason: output.stop_reason(),
                session_id: output.session_id.clone().unwrap_or_default(),
                ..Default::default()
            }
            .with_tokens(usage.input, usage.output, usage.total)
        });

        Response {
            content,
            model: output.model(),
            metadata,
            raw: raw.to_string(),
            ..Default::default()
        }
    }
}
