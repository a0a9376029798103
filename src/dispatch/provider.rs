use std::time::Duration;

use async_trait::async_trait;

use crate::config::{OutputFormat, ProviderConfig};
use crate::dispatch::cli::ProcessExecutor;
use crate::dispatch::{Provider, Request};
use crate::error::CliError;
use crate::parsers::{OutputParser, parser_for};
use crate::response::Response;

/// Flags that switch a CLI into its machine-readable output mode.
fn format_flags(format: OutputFormat) -> &'static [&'static str] {
    match format {
        OutputFormat::Claude | OutputFormat::Gemini => &["--output-format", "json"],
        OutputFormat::Codex => &["--json"],
        OutputFormat::OpenCode => &["--format", "json"],
        OutputFormat::Text | OutputFormat::Simulated => &[],
    }
}

fn default_model_flag(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Gemini | OutputFormat::Codex => "-m",
        _ => "--model",
    }
}

/// Adapter binding a provider identity to a `ProcessExecutor` and the
/// parser for its output format.
pub struct CliProvider {
    name: String,
    display_name: String,
    default_model: String,
    models: Vec<String>,
    args: Vec<String>,
    format: OutputFormat,
    model_flag: String,
    executor: ProcessExecutor,
    parser: Box<dyn OutputParser>,
}

impl CliProvider {
    /// An empty `command` falls back to the provider name.
    pub fn new(name: &str, config: &ProviderConfig) -> Self {
        let command = if config.command.is_empty() {
            name
        } else {
            config.command.as_str()
        };
        Self {
            name: name.to_string(),
            display_name: config.display_name.clone().unwrap_or_else(|| name.to_string()),
            default_model: config.default_model.clone(),
            models: config.models.clone(),
            args: config.args.clone(),
            format: config.format,
            model_flag: config
                .model_flag
                .clone()
                .unwrap_or_else(|| default_model_flag(config.format).to_string()),
            executor: ProcessExecutor::new(name, command, config.timeout()),
            parser: parser_for(config.format),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn command(&self) -> &str {
        self.executor.command()
    }

    /// Requested model, else the provider default. May be empty.
    pub fn effective_model<'a>(&'a self, req: &'a Request) -> &'a str {
        if req.model.trim().is_empty() {
            &self.default_model
        } else {
            &req.model
        }
    }

    /// `[config args] [format flags] [extra args] [model flag model] prompt`
    pub fn build_args(&self, req: &Request) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(format_flags(self.format).iter().map(|f| f.to_string()));
        args.extend(req.extra_args.iter().cloned());

        let model = self.effective_model(req);
        if !model.is_empty() {
            args.push(self.model_flag.clone());
            args.push(model.to_string());
        }

        args.push(req.prompt.clone());
        args
    }
}

#[async_trait]
impl Provider for CliProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_available(&self) -> bool {
        self.executor.is_available()
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn timeout(&self) -> Duration {
        self.executor.timeout()
    }

    async fn execute(&self, req: &Request) -> Result<Response, CliError> {
        let args = self.build_args(req);
        let output = self
            .executor
            .run(&args, req.working_dir.as_deref(), req.cancellation.as_ref())
            .await?;

        let mut response = self.parser.parse(&output.stdout, output.elapsed);
        response.provider = self.name.clone();
        if response.model.is_empty() {
            response.model = self.effective_model(req).to_string();
        }

        tracing::debug!(
            provider = %self.name,
            model = %response.model,
            structured = response.metadata.is_some(),
            content_len = response.content.len(),
            "provider response normalized"
        );

        Ok(response)
    }
}
