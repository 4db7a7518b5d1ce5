//! Provider router: resolves a model identifier to a configured provider.
//!
//! `"<provider>/<model>"` selects the named provider (prefix stripped) when
//! one is registered under that name; anything else goes, unchanged, to the
//! default provider. `"anthropic/claude-sonnet-4"` therefore reaches the
//! Anthropic adapter when an `anthropic` provider exists, and is passed
//! through verbatim to a gateway such as OpenRouter otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;

use switchboard_core::{ProtocolError, ProviderConfig, RequiredCapabilities};
use tracing::debug;

use crate::adapter::{ProviderAdapter, adapter_for};

/// Where one request goes.
#[derive(Clone)]
pub struct Route {
    pub provider: Arc<ProviderConfig>,
    pub adapter: Arc<dyn ProviderAdapter>,
    /// Model name as the provider expects it
    pub model: String,
}

impl Route {
    /// Fail when the provider lacks something the request needs.
    pub fn check(&self, requires: &RequiredCapabilities) -> Result<(), ProtocolError> {
        match requires.unmet_by(&self.provider.capabilities) {
            Some(capability) => Err(ProtocolError::Unsupported {
                provider: self.provider.name.clone(),
                capability: capability.into(),
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("provider", &self.provider.name)
            .field("kind", &self.adapter.kind())
            .field("model", &self.model)
            .finish()
    }
}

struct RegisteredProvider {
    config: Arc<ProviderConfig>,
    adapter: Arc<dyn ProviderAdapter>,
}

/// Routes LLM requests to the correct provider.
#[derive(Default)]
pub struct ProviderRouter {
    providers: BTreeMap<String, RegisteredProvider>,
    default_provider: Option<String>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; the adapter is chosen by its kind. The first
    /// provider registered becomes the default.
    pub fn register(&mut self, config: ProviderConfig) {
        let name = config.name.clone();
        debug!(provider = %name, kind = %config.kind, endpoint = %config.endpoint, "Registering provider");
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        let adapter = adapter_for(config.kind);
        self.providers.insert(
            name,
            RegisteredProvider {
                config: Arc::new(config),
                adapter,
            },
        );
    }

    pub fn set_default(&mut self, name: &str) -> Result<(), ProtocolError> {
        if !self.providers.contains_key(name) {
            return Err(ProtocolError::UnknownProvider(name.into()));
        }
        self.default_provider = Some(name.into());
        Ok(())
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name).map(|p| p.config.as_ref())
    }

    /// All registered providers, in name order.
    pub fn list(&self) -> Vec<&ProviderConfig> {
        self.providers.values().map(|p| p.config.as_ref()).collect()
    }

    /// Resolve a model identifier to a route.
    pub fn resolve(&self, model: &str) -> Result<Route, ProtocolError> {
        if let Some((prefix, rest)) = model.split_once('/') {
            if let Some(provider) = self.providers.get(prefix).filter(|_| !rest.is_empty()) {
                return Ok(Self::route(provider, rest));
            }
        }

        let default = self
            .default_provider
            .as_deref()
            .and_then(|name| self.providers.get(name))
            .ok_or_else(|| ProtocolError::UnknownProvider(model.into()))?;
        Ok(Self::route(default, model))
    }

    fn route(provider: &RegisteredProvider, model: &str) -> Route {
        Route {
            provider: Arc::clone(&provider.config),
            adapter: Arc::clone(&provider.adapter),
            model: model.into(),
        }
    }
}
