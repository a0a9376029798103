use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use colloquy::config::Config;
use colloquy::dispatch::Request;
use colloquy::dispatch::registry::Registry;
use colloquy::health::{HealthChecker, HealthStatus};

/// Run AI command-line tools and print their normalized responses as JSON.
#[derive(Parser, Debug)]
#[command(name = "colloquy", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured providers.
    List {
        /// Only providers whose executable is on PATH.
        #[arg(long)]
        available: bool,
    },

    /// Send one prompt to a provider.
    Run {
        provider: String,
        prompt: String,
        /// Model override (defaults to the provider's default model).
        #[arg(short, long, default_value = "")]
        model: String,
        /// Working directory for the provider CLI.
        #[arg(short = 'C', long)]
        dir: Option<PathBuf>,
    },

    /// Probe providers with the health check prompt (all when none given).
    Health { providers: Vec<String> },
}

#[derive(Serialize)]
struct ProviderInfo {
    name: String,
    display_name: String,
    default_model: String,
    models: Vec<String>,
    timeout_secs: u64,
    available: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load();
    let registry = Registry::from_config(&config);

    match cli.command {
        Command::List { available } => {
            let providers = if available {
                registry.list_available()
            } else {
                registry.list()
            };
            let infos: Vec<ProviderInfo> = providers
                .iter()
                .map(|p| ProviderInfo {
                    name: p.name().to_string(),
                    display_name: p.display_name().to_string(),
                    default_model: p.default_model().to_string(),
                    models: p.models().to_vec(),
                    timeout_secs: p.timeout().as_secs(),
                    available: p.is_available(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }

        Command::Run {
            provider,
            prompt,
            model,
            dir,
        } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let mut req = Request::new(prompt)
                .with_model(model)
                .with_cancellation(cancel);
            if let Some(dir) = dir {
                req = req.with_working_dir(dir);
            }

            let response = registry
                .execute(&provider, &req)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Command::Health { providers } => {
            let checker = HealthChecker::new();
            let results: BTreeMap<String, HealthStatus> = if providers.is_empty() {
                checker.check_all(&registry).await.into_iter().collect()
            } else {
                let mut results = BTreeMap::new();
                for name in providers {
                    let provider = registry
                        .get(&name)
                        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
                    let status = checker
                        .check(provider.as_ref(), provider.default_model())
                        .await;
                    results.insert(name, status);
                }
                results
            };
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}
