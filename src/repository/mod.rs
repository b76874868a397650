//! Durable storage seams
//!
//! Provider records, routing rules and credentials must survive restarts.
//! The router only talks to these traits; PostgreSQL and in-memory
//! implementations are provided.

pub mod memory;
pub mod provider;
pub mod routing_rule;
pub mod secret;

pub use memory::MemoryStore;
pub use provider::ProviderRepository;
pub use routing_rule::RoutingRuleRepository;
pub use secret::SecretRepository;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ProxyProvider, RoutingRule};

/// Persistent provider records (credentials excluded)
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn list_providers(&self) -> Result<Vec<ProxyProvider>>;

    /// Fails with `DuplicateName` if the name is taken
    async fn insert_provider(&self, provider: &ProxyProvider) -> Result<()>;

    /// Fails with `NotFound` if the name is unknown
    async fn update_provider(&self, provider: &ProxyProvider) -> Result<()>;

    /// Returns whether a record was deleted
    async fn delete_provider(&self, name: &str) -> Result<bool>;
}

/// Persistent routing rules
#[async_trait]
pub trait RoutingRuleStore: Send + Sync {
    async fn list_routing_rules(&self) -> Result<Vec<RoutingRule>>;

    async fn insert_routing_rule(&self, rule: &RoutingRule) -> Result<()>;

    async fn delete_routing_rule(&self, id: Uuid) -> Result<bool>;
}

/// Key-value secret storage
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Secret key holding a provider's gateway username
pub fn username_key(provider: &str) -> String {
    format!("provider/{}/username", provider)
}

/// Secret key holding a provider's gateway password
pub fn password_key(provider: &str) -> String {
    format!("provider/{}/password", provider)
}
