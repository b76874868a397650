use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ProviderStore, RoutingRuleStore, SecretStore};
use crate::error::{EgressError, Result};
use crate::models::{ProxyProvider, RoutingRule};

/// Process-local store; state is lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    providers: RwLock<BTreeMap<String, ProxyProvider>>,
    rules: RwLock<Vec<RoutingRule>>,
    secrets: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn list_providers(&self) -> Result<Vec<ProxyProvider>> {
        Ok(self.providers.read().values().cloned().collect())
    }

    async fn insert_provider(&self, provider: &ProxyProvider) -> Result<()> {
        let mut providers = self.providers.write();
        if providers.contains_key(&provider.name) {
            return Err(EgressError::DuplicateName(provider.name.clone()));
        }
        let mut record = provider.clone();
        record.credentials = None;
        providers.insert(record.name.clone(), record);
        Ok(())
    }

    async fn update_provider(&self, provider: &ProxyProvider) -> Result<()> {
        let mut providers = self.providers.write();
        match providers.get_mut(&provider.name) {
            Some(existing) => {
                *existing = provider.clone();
                existing.credentials = None;
                Ok(())
            }
            None => Err(EgressError::NotFound(format!(
                "provider '{}'",
                provider.name
            ))),
        }
    }

    async fn delete_provider(&self, name: &str) -> Result<bool> {
        Ok(self.providers.write().remove(name).is_some())
    }
}

#[async_trait]
impl RoutingRuleStore for MemoryStore {
    async fn list_routing_rules(&self) -> Result<Vec<RoutingRule>> {
        Ok(self.rules.read().clone())
    }

    async fn insert_routing_rule(&self, rule: &RoutingRule) -> Result<()> {
        self.rules.write().push(rule.clone());
        Ok(())
    }

    async fn delete_routing_rule(&self, id: Uuid) -> Result<bool> {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        Ok(rules.len() != before)
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.secrets.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.secrets
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.secrets.write().remove(key);
        Ok(())
    }
}
