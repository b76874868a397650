//! Provider registry
//!
//! Read-mostly cache of provider records in front of the durable stores.
//! Credentials are hydrated from the secret store into the cached copy only;
//! they never travel back through `ProviderStore`.
//!
//! Mutations hold `writes` across their store round-trips, so each one
//! starts from the cache state the previous one left behind.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{EgressError, Result};
use crate::models::{
    CreateProviderRequest, Credentials, ProxyProvider, UpdateProviderRequest,
};
use crate::repository::{password_key, username_key, ProviderStore, SecretStore};

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<ProxyProvider>>>,
    writes: Mutex<()>,
    store: Arc<dyn ProviderStore>,
    secrets: Arc<dyn SecretStore>,
}

impl ProviderRegistry {
    pub fn new(store: Arc<dyn ProviderStore>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            writes: Mutex::new(()),
            store,
            secrets,
        }
    }

    /// Replace the cache with the persisted providers and their credentials
    pub async fn load(&self) -> Result<usize> {
        let _writes = self.writes.lock().await;
        let records = self.store.list_providers().await?;
        let mut loaded = HashMap::with_capacity(records.len());

        for mut provider in records {
            provider.credentials = self.fetch_credentials(&provider.name).await?;
            if provider.credentials.is_none() {
                warn!(provider = %provider.name, "Provider has no stored credentials");
            }
            loaded.insert(provider.name.clone(), Arc::new(provider));
        }

        let count = loaded.len();
        *self.providers.write() = loaded;
        info!(count, "Loaded providers");
        Ok(count)
    }

    async fn fetch_credentials(&self, name: &str) -> Result<Option<Credentials>> {
        let username = self.secrets.get(&username_key(name)).await?;
        let password = self.secrets.get(&password_key(name)).await?;

        Ok(username.map(|u| Credentials::new(u, password.unwrap_or_default())))
    }

    /// All providers sorted by name
    pub fn list(&self) -> Vec<Arc<ProxyProvider>> {
        let mut providers: Vec<_> = self.providers.read().values().cloned().collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        providers
    }

    /// Enabled providers sorted by name
    pub fn enabled(&self) -> Vec<Arc<ProxyProvider>> {
        let mut providers: Vec<_> = self
            .providers
            .read()
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        providers
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProxyProvider>> {
        self.providers.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn add(&self, req: CreateProviderRequest) -> Result<Arc<ProxyProvider>> {
        let provider = ProxyProvider::from_request(req)?;
        let _writes = self.writes.lock().await;

        if self.providers.read().contains_key(&provider.name) {
            return Err(EgressError::DuplicateName(provider.name));
        }

        self.store.insert_provider(&provider).await?;

        let provider = Arc::new(provider);
        self.providers
            .write()
            .insert(provider.name.clone(), provider.clone());

        info!(
            gateway = %provider.gateway_addr(),
            priority = provider.priority,
            "Added provider"
        );
        Ok(provider)
    }

    #[instrument(skip(self, req))]
    pub async fn update(
        &self,
        name: &str,
        req: UpdateProviderRequest,
    ) -> Result<Arc<ProxyProvider>> {
        let _writes = self.writes.lock().await;
        let current = self
            .get(name)
            .ok_or_else(|| EgressError::NotFound(format!("provider '{}'", name)))?;

        let updated = current.apply_update(req)?;
        self.store.update_provider(&updated).await?;

        let updated = Arc::new(updated);
        self.providers
            .write()
            .insert(updated.name.clone(), updated.clone());

        info!(enabled = updated.enabled, "Updated provider");
        Ok(updated)
    }

    /// Remove a provider and its credentials; returns whether it existed.
    ///
    /// Calls that already hold the provider's `Arc` finish normally.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let _writes = self.writes.lock().await;
        let deleted = self.store.delete_provider(name).await?;
        self.secrets.delete(&username_key(name)).await?;
        self.secrets.delete(&password_key(name)).await?;

        let cached = self.providers.write().remove(name).is_some();
        if deleted || cached {
            info!("Removed provider");
        } else {
            debug!("Provider already absent");
        }
        Ok(deleted || cached)
    }

    #[instrument(skip(self, credentials))]
    pub async fn set_credentials(&self, name: &str, credentials: Credentials) -> Result<()> {
        if credentials.username.trim().is_empty() {
            return Err(EgressError::InvalidRequest("username is required".into()));
        }

        let _writes = self.writes.lock().await;
        let current = self
            .get(name)
            .ok_or_else(|| EgressError::NotFound(format!("provider '{}'", name)))?;

        self.secrets
            .set(&username_key(name), &credentials.username)
            .await?;
        self.secrets
            .set(&password_key(name), &credentials.password)
            .await?;

        let mut updated = (*current).clone();
        updated.credentials = Some(credentials);
        self.providers
            .write()
            .insert(name.to_string(), Arc::new(updated));

        info!("Stored provider credentials");
        Ok(())
    }
}
