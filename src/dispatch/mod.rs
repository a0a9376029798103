pub mod cli;
pub mod provider;
pub mod registry;
pub mod simulated;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CliError;
use crate::response::Response;

/// One invocation of a provider. Built once, then passed by reference.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub prompt: String,
    /// Empty means "use the provider's default model".
    pub model: String,
    /// Working directory for the subprocess.
    pub working_dir: Option<PathBuf>,
    /// Extra CLI arguments, placed after the provider's own flags.
    pub extra_args: Vec<String>,
    /// Cooperative cancellation. Cancelling kills the subprocess.
    pub cancellation: Option<CancellationToken>,
}

impl Request {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// A named AI tool behind the uniform execute contract.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Live check; may touch the filesystem.
    fn is_available(&self) -> bool;

    fn models(&self) -> &[String];

    fn default_model(&self) -> &str;

    fn timeout(&self) -> Duration;

    async fn execute(&self, req: &Request) -> Result<Response, CliError>;

    /// Prompt/model/directory call shape, returning only the content.
    async fn execute_prompt(
        &self,
        prompt: &str,
        model: &str,
        working_dir: Option<&Path>,
    ) -> Result<String, CliError> {
        let mut req = Request::new(prompt).with_model(model);
        if let Some(dir) = working_dir {
            req = req.with_working_dir(dir);
        }
        Ok(self.execute(&req).await?.content)
    }
}
