use std::process::ExitStatus;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a provider invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorKind {
    /// Executable did not resolve on PATH. Nothing was spawned.
    NotFound,
    /// Deadline exceeded; the process was killed.
    Timeout,
    /// Caller cancelled the invocation; the process was killed.
    Cancelled,
    /// Non-zero exit, spawn failure, or pipe failure.
    ProcessFailed,
}

/// Structured error returned by every provider invocation.
#[derive(Debug, Error)]
#[error("{provider}: {message}")]
pub struct CliError {
    pub provider: String,
    pub kind: CliErrorKind,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

/// Non-zero exit status, kept as the wrapped cause of a process failure.
#[derive(Debug, Error)]
#[error("process exited with {0}")]
pub struct ExitError(pub ExitStatus);

impl CliError {
    pub fn new(provider: &str, kind: CliErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn not_found(provider: &str, command: &str, source: which::Error) -> Self {
        Self::new(
            provider,
            CliErrorKind::NotFound,
            format!("command not found: {command}"),
        )
        .with_source(source)
    }

    pub fn timeout(
        provider: &str,
        timeout: std::time::Duration,
        source: tokio::time::error::Elapsed,
    ) -> Self {
        Self::new(
            provider,
            CliErrorKind::Timeout,
            format!("command timed out after {}ms", timeout.as_millis()),
        )
        .with_source(source)
    }

    pub fn cancelled(provider: &str) -> Self {
        Self::new(provider, CliErrorKind::Cancelled, "command cancelled")
    }

    pub fn process_failed(provider: &str, message: impl Into<String>) -> Self {
        Self::new(provider, CliErrorKind::ProcessFailed, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == CliErrorKind::Timeout
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == CliErrorKind::NotFound
    }

    /// Short message for presentation layers. Process failures keep only the
    /// tail of stderr: CLI tools dump banners first, the real error is last.
    pub fn user_message(&self) -> String {
        match self.kind {
            CliErrorKind::ProcessFailed => {
                let preview: String = self
                    .message
                    .chars()
                    .rev()
                    .take(200)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                let prefix = if preview.len() < self.message.len() {
                    "..."
                } else {
                    ""
                };
                format!("{} failed: {prefix}{preview}", self.provider)
            }
            _ => self.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ColloquyError {
    #[error("provider not found: {name}")]
    ProviderNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    #[error(transparent)]
    Cli(#[from] CliError),

    #[error("config error: {0}")]
    Config(String),
}

impl ColloquyError {
    /// Provider name carried by the error, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::ProviderNotFound { name, .. } => Some(name),
            Self::Cli(e) => Some(&e.provider),
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderNotFound { name, suggestions } => {
                if suggestions.is_empty() {
                    format!("provider not found: {name}")
                } else {
                    format!(
                        "provider not found: {name}. Did you mean: {}?",
                        suggestions.join(", ")
                    )
                }
            }
            Self::Cli(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}
