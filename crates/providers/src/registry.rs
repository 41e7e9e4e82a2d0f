//! Provider registry.
//!
//! Holds all wired provider instances and resolves `"provider/model"` specs
//! to a provider plus the bare model name. A spec without a prefix falls
//! back to the default provider.

use std::collections::HashMap;
use std::sync::Arc;

use sb_domain::error::{Error, Result};

use crate::traits::Provider;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_id: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_id: None,
        }
    }

    /// Register a provider under its id. The first registration becomes the
    /// default.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let id = provider.provider_id().to_owned();
        if self.default_id.is_none() {
            self.default_id = Some(id.clone());
        }
        self.providers.insert(id, provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Resolve a model spec to `(provider, model_name)`.
    ///
    /// `"anthropic/claude-sonnet"` selects the `anthropic` provider with
    /// model `claude-sonnet`; a bare `"claude-sonnet"` goes to the default
    /// provider.
    pub fn resolve(&self, model_spec: &str) -> Result<(Arc<dyn Provider>, String)> {
        if let Some((provider_id, model)) = model_spec.split_once('/') {
            let provider = self.get(provider_id).ok_or_else(|| Error::Provider {
                provider: provider_id.to_owned(),
                message: "no such provider configured".into(),
                retryable: false,
            })?;
            return Ok((provider, model.to_owned()));
        }

        let default_id = self.default_id.as_deref().ok_or_else(|| Error::Provider {
            provider: "default".into(),
            message: "no providers configured".into(),
            retryable: false,
        })?;
        // Unwrap is safe: default_id always names a registered provider.
        let provider = self.get(default_id).expect("default provider registered");
        Ok((provider, model_spec.to_owned()))
    }

    /// Context window for a model spec, with a configured fallback for
    /// models the binding cannot size.
    pub fn context_window(&self, model_spec: &str, fallback: u64) -> u64 {
        match self.resolve(model_spec) {
            Ok((provider, model)) => provider.context_window(&model).unwrap_or(fallback),
            Err(_) => fallback,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;
    use sb_domain::token::ProviderKind;

    #[test]
    fn resolve_with_prefix() {
        let mut reg = ProviderRegistry::new();
        reg.register(Arc::new(ScriptedProvider::new(
            "anthropic",
            ProviderKind::Anthropic,
        )));
        let (provider, model) = reg.resolve("anthropic/claude-sonnet").unwrap();
        assert_eq!(provider.provider_id(), "anthropic");
        assert_eq!(model, "claude-sonnet");
    }

    #[test]
    fn bare_spec_uses_default_provider() {
        let mut reg = ProviderRegistry::new();
        reg.register(Arc::new(ScriptedProvider::new(
            "openai",
            ProviderKind::Openai,
        )));
        reg.register(Arc::new(ScriptedProvider::new(
            "google",
            ProviderKind::Google,
        )));
        let (provider, model) = reg.resolve("gpt-4o").unwrap();
        assert_eq!(provider.provider_id(), "openai");
        assert_eq!(model, "gpt-4o");
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let reg = ProviderRegistry::new();
        assert!(reg.resolve("missing/model").is_err());
        assert!(reg.resolve("bare-model").is_err());
    }

    #[test]
    fn context_window_fallback() {
        let mut reg = ProviderRegistry::new();
        reg.register(Arc::new(ScriptedProvider::new(
            "openai",
            ProviderKind::Openai,
        )));
        assert_eq!(reg.context_window("openai/gpt", 128_000), 128_000);
    }
}
