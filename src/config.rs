use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::cli::DEFAULT_TIMEOUT;
use crate::error::ColloquyError;

/// Env var naming an explicit config file.
pub const CONFIG_ENV: &str = "COLLOQUY_CONFIG";

/// Looked up in the working directory when `COLLOQUY_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "colloquy.toml";

/// Output shape a provider emits; selects the parser and CLI flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Claude,
    Gemini,
    Codex,
    OpenCode,
    /// Raw stdout is the answer.
    #[default]
    Text,
    /// In-process canned replies, no subprocess.
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub command: String,
    /// Leading arguments, placed before the format flags.
    pub args: Vec<String>,
    pub default_model: String,
    pub models: Vec<String>,
    /// Seconds; 0 selects the 5 minute default.
    pub timeout: u64,
    pub enabled: bool,
    pub display_name: Option<String>,
    pub format: OutputFormat,
    /// Overrides the format's model flag (e.g. `-m`).
    pub model_flag: Option<String>,
    /// Simulated providers only: RNG seed, entropy when unset.
    pub seed: Option<u64>,
    /// Simulated providers only.
    pub replies: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            default_model: String::new(),
            models: Vec::new(),
            timeout: 0,
            enabled: true,
            display_name: None,
            format: OutputFormat::default(),
            model_flag: None,
            seed: None,
            replies: Vec::new(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        match self.timeout {
            0 => DEFAULT_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Config {
    /// Known provider CLIs with their usual invocation.
    pub fn builtin() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut providers = BTreeMap::new();

        providers.insert(
            "claude".to_string(),
            ProviderConfig {
                command: "claude".to_string(),
                args: strings(&["--print"]),
                default_model: "sonnet".to_string(),
                models: strings(&["sonnet", "opus", "haiku"]),
                display_name: Some("Claude".to_string()),
                format: OutputFormat::Claude,
                ..Default::default()
            },
        );
        providers.insert(
            "gemini".to_string(),
            ProviderConfig {
                command: "gemini".to_string(),
                default_model: "gemini-2.5-pro".to_string(),
                models: strings(&["gemini-2.5-pro", "gemini-2.5-flash"]),
                display_name: Some("Gemini".to_string()),
                format: OutputFormat::Gemini,
                ..Default::default()
            },
        );
        providers.insert(
            "codex".to_string(),
            ProviderConfig {
                command: "codex".to_string(),
                args: strings(&["exec", "--skip-git-repo-check"]),
                default_model: String::new(),
                display_name: Some("Codex".to_string()),
                format: OutputFormat::Codex,
                ..Default::default()
            },
        );
        providers.insert(
            "opencode".to_string(),
            ProviderConfig {
                command: "opencode".to_string(),
                args: strings(&["run"]),
                display_name: Some("OpenCode".to_string()),
                format: OutputFormat::OpenCode,
                ..Default::default()
            },
        );

        Self { providers }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ColloquyError> {
        toml::from_str(text).map_err(|e| ColloquyError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ColloquyError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ColloquyError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Replace or add providers from `other`, keyed by name.
    pub fn merge(&mut self, other: Config) {
        self.providers.extend(other.providers);
    }

    /// Built-in providers overlaid with `$COLLOQUY_CONFIG` or
    /// `./colloquy.toml`. A broken file is logged and skipped.
    pub fn load() -> Self {
        let mut config = Self::builtin();

        let path = match env::var(CONFIG_ENV) {
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };

        if let Some(path) = path {
            match Self::from_file(&path) {
                Ok(file) => {
                    tracing::info!(
                        path = %path.display(),
                        providers = file.providers.len(),
                        "loaded provider config"
                    );
                    config.merge(file);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "ignoring config file: {e}");
                }
            }
        }

        config
    }

    pub fn enabled(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.providers.iter().filter(|(_, p)| p.enabled)
    }
}
