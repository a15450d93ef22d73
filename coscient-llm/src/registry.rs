//! Registry for named provider instances

use crate::providers::Provider;
use coscient_core::GatewayError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry for managing gateway providers.
///
/// Allows registration, discovery and default selection of multiple
/// provider instances (mock or real).
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    default_provider: RwLock<Option<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_provider: RwLock::new(None),
        }
    }

    /// Register a new provider. Names must be unique.
    pub async fn register_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Result<(), GatewayError> {
        let name = name.into();
        let mut providers = self.providers.write().await;
        if providers.contains_key(&name) {
            return Err(GatewayError::ProviderAlreadyRegistered { name });
        }
        providers.insert(name, provider);
        Ok(())
    }

    /// Unregister a provider, clearing the default if it pointed here.
    pub async fn unregister_provider(&self, name: &str) {
        self.providers.write().await.remove(name);
        let mut default = self.default_provider.write().await;
        if default.as_deref() == Some(name) {
            *default = None;
        }
    }

    pub async fn get_provider(&self, name: &str) -> Result<Arc<dyn Provider>, GatewayError> {
        self.providers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::ProviderNotFound {
                name: name.to_string(),
            })
    }

    pub async fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Capability and model metadata for every registered provider.
    pub async fn provider_info(&self) -> HashMap<String, Map<String, Value>> {
        let providers = self.providers.read().await;
        providers
            .iter()
            .map(|(name, provider)| {
                let mut info = Map::new();
                info.insert("capabilities".to_string(), Value::Object(provider.capabilities()));
                info.insert("model_info".to_string(), Value::Object(provider.model_info()));
                (name.clone(), info)
            })
            .collect()
    }

    /// Providers whose capability map has `capability` set to true.
    pub async fn find_providers_by_capability(&self, capability: &str) -> Vec<String> {
        let providers = self.providers.read().await;
        let mut matching: Vec<String> = providers
            .iter()
            .filter(|(_, provider)| {
                provider
                    .capabilities()
                    .get(capability)
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .collect();
        matching.sort();
        matching
    }

    pub async fn set_default_provider(&self, name: &str) -> Result<(), GatewayError> {
        if !self.providers.read().await.contains_key(name) {
            return Err(GatewayError::ProviderNotFound {
                name: name.to_string(),
            });
        }
        *self.default_provider.write().await = Some(name.to_string());
        Ok(())
    }

    pub async fn get_default_provider(&self) -> Option<Arc<dyn Provider>> {
        let default = self.default_provider.read().await.clone()?;
        self.providers.read().await.get(&default).cloned()
    }

    pub async fn clear(&self) {
        self.providers.write().await.clear();
        *self.default_provider.write().await = None;
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").finish()
    }
}
