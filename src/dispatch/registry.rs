use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{Config, OutputFormat, ProviderConfig};
use crate::dispatch::provider::CliProvider;
use crate::dispatch::simulated::SimulatedProvider;
use crate::dispatch::{Provider, Request};
use crate::error::ColloquyError;
use crate::response::Response;

/// Named providers, shared across concurrent callers.
///
/// Reads never block each other; registration takes the write lock. The
/// lock only guards the map: lookups hand out `Arc`s, so no lock is held
/// while a provider runs.
#[derive(Default)]
pub struct Registry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every enabled provider in `config`.
    pub fn from_config(config: &Config) -> Self {
        let registry = Self::new();
        for (name, provider_config) in config.enabled() {
            registry.register(build_provider(name, provider_config));
        }
        tracing::info!(providers = registry.len(), "provider registry populated");
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Provider>>> {
        // Writers never panic mid-insert, so a poisoned map is still consistent.
        self.providers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Provider>>> {
        self.providers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert, replacing any provider with the same name.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        if self.write().insert(name.clone(), provider).is_some() {
            tracing::debug!(provider = %name, "replaced registered provider");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ColloquyError> {
        // Bind first: the read guard must drop before suggestions re-lock.
        let found = self.read().get(name).cloned();
        found.ok_or_else(|| ColloquyError::ProviderNotFound {
            name: name.to_string(),
            suggestions: self.suggest_providers(name),
        })
    }

    /// All providers, sorted by name.
    pub fn list(&self) -> Vec<Arc<dyn Provider>> {
        let mut providers: Vec<_> = self.read().values().cloned().collect();
        providers.sort_by(|a, b| a.name().cmp(b.name()));
        providers
    }

    /// Providers whose executable resolves right now. Not cached: every call
    /// searches PATH once per provider.
    pub fn list_available(&self) -> Vec<Arc<dyn Provider>> {
        self.list()
            .into_iter()
            .filter(|p| p.is_available())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Suggest similar provider names for a failed lookup (substring match).
    /// Sorted alphabetically, capped at 5 to keep error messages readable.
    pub fn suggest_providers(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return vec![];
        }
        let mut suggestions: Vec<String> = self
            .read()
            .keys()
            .filter(|k| {
                let k_lower = k.to_lowercase();
                k_lower.contains(&q) || q.contains(&k_lower)
            })
            .cloned()
            .collect();
        suggestions.sort();
        suggestions.truncate(5);
        suggestions
    }

    /// Look up `name` and execute. The lock is released before the call.
    pub async fn execute(&self, name: &str, req: &Request) -> Result<Response, ColloquyError> {
        let provider = self.get(name)?;
        provider.execute(req).await.map_err(ColloquyError::from)
    }
}

fn build_provider(name: &str, config: &ProviderConfig) -> Arc<dyn Provider> {
    match config.format {
        OutputFormat::Simulated => {
            let rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut provider = SimulatedProvider::new(name, config.replies.clone(), rng)
                .with_models(config.models.clone())
                .with_default_model(config.default_model.clone());
            if config.timeout > 0 {
                provider = provider.with_timeout(config.timeout());
            }
            if let Some(display_name) = &config.display_name {
                provider = provider.with_display_name(display_name.clone());
            }
            Arc::new(provider)
        }
        _ => Arc::new(CliProvider::new(name, config)),
    }
}
