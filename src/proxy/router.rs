//! Router facade
//!
//! Owns the registry, routing table, session and health state and exposes
//! the operator and caller operations on top of them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, instrument};
use url::Url;
use uuid::Uuid;

use super::routing_table::validate_pattern;
use super::{
    ExecuteRequest, ExecutorConfig, HealthTracker, ProviderRegistry, RequestExecutor,
    RoutingTable, Selector, SessionManager, Transport,
};
use crate::config::RouterConfig;
use crate::error::{EgressError, Result};
use crate::models::{
    CreateProviderRequest, CreateRoutingRuleRequest, Credentials, ProviderStats,
    ProviderSummary, ProxyRequest, ProxyResponse, RouterStats, RoutingRule, TestProviderResult,
    UpdateProviderRequest,
};
use crate::repository::{ProviderStore, RoutingRuleStore, SecretStore};

/// Durable stores the router persists through
#[derive(Clone)]
pub struct RouterStores {
    pub providers: Arc<dyn ProviderStore>,
    pub rules: Arc<dyn RoutingRuleStore>,
    pub secrets: Arc<dyn SecretStore>,
}

impl RouterStores {
    /// Use one store for all three concerns
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ProviderStore + RoutingRuleStore + SecretStore + 'static,
    {
        Self {
            providers: store.clone(),
            rules: store.clone(),
            secrets: store,
        }
    }
}

#[derive(Debug, Default)]
struct RequestCounters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

pub struct ProxyRouter {
    registry: Arc<ProviderRegistry>,
    routing: Arc<RoutingTable>,
    sessions: Arc<SessionManager>,
    health: Arc<HealthTracker>,
    executor: RequestExecutor,
    rule_store: Arc<dyn RoutingRuleStore>,
    echo_url: Url,
    counters: RequestCounters,
}

impl ProxyRouter {
    pub fn new(
        stores: RouterStores,
        transport: Arc<dyn Transport>,
        config: &RouterConfig,
    ) -> Result<Self> {
        let echo_url = Url::parse(&config.echo_url).map_err(|e| {
            EgressError::Configuration(format!("invalid echo URL '{}': {}", config.echo_url, e))
        })?;

        let registry = Arc::new(ProviderRegistry::new(stores.providers, stores.secrets));
        let routing = Arc::new(RoutingTable::new());
        let sessions = Arc::new(SessionManager::new());
        let health = Arc::new(HealthTracker::new(config.cooldown_policy()));

        let selector = Arc::new(Selector::new(
            registry.clone(),
            routing.clone(),
            health.clone(),
        ));
        let executor = RequestExecutor::new(
            selector,
            sessions.clone(),
            health.clone(),
            transport,
            config.executor_config(),
        );

        Ok(Self {
            registry,
            routing,
            sessions,
            health,
            executor,
            rule_store: stores.rules,
            echo_url,
            counters: RequestCounters::default(),
        })
    }

    /// Hydrate providers, credentials and rules from the stores
    pub async fn load(&self) -> Result<()> {
        let providers = self.registry.load().await?;
        let rules = self.rule_store.list_routing_rules().await?;
        let rule_count = rules.len();
        self.routing.replace(rules);

        info!(providers, rules = rule_count, "Router state loaded");
        Ok(())
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn executor_config(&self) -> &ExecutorConfig {
        self.executor.config()
    }

    // ---- providers ----

    pub fn list_providers(&self) -> Vec<ProviderSummary> {
        self.registry
            .list()
            .iter()
            .map(|p| ProviderSummary::from(p.as_ref()))
            .collect()
    }

    pub fn get_provider(&self, name: &str) -> Result<ProviderSummary> {
        self.registry
            .get(name)
            .map(|p| ProviderSummary::from(p.as_ref()))
            .ok_or_else(|| EgressError::NotFound(format!("provider '{}'", name)))
    }

    pub async fn add_provider(&self, req: CreateProviderRequest) -> Result<ProviderSummary> {
        let provider = self.registry.add(req).await?;
        Ok(ProviderSummary::from(provider.as_ref()))
    }

    pub async fn update_provider(
        &self,
        name: &str,
        req: UpdateProviderRequest,
    ) -> Result<ProviderSummary> {
        let provider = self.registry.update(name, req).await?;
        Ok(ProviderSummary::from(provider.as_ref()))
    }

    /// Idempotent; drops the provider's sessions and health data too
    pub async fn remove_provider(&self, name: &str) -> Result<bool> {
        let removed = self.registry.remove(name).await?;
        let sessions = self.sessions.remove_provider(name);
        self.health.reset(name);
        if sessions > 0 {
            info!(provider = %name, sessions, "Dropped sticky sessions of removed provider");
        }
        Ok(removed)
    }

    pub async fn set_credentials(&self, name: &str, username: String, password: String) -> Result<()> {
        self.registry
            .set_credentials(name, Credentials::new(username, password))
            .await
    }

    /// Validate template, credentials and reachability through the echo endpoint
    pub async fn test_provider(&self, name: &str) -> Result<TestProviderResult> {
        let provider = self
            .registry
            .get(name)
            .ok_or_else(|| EgressError::NotFound(format!("provider '{}'", name)))?;

        let timeout = self.executor.config().request_timeout;
        Ok(self.executor.probe(&provider, &self.echo_url, timeout).await)
    }

    // ---- routing rules ----

    pub fn list_routing_rules(&self) -> Vec<RoutingRule> {
        self.routing.list().iter().map(|r| (**r).clone()).collect()
    }

    pub async fn add_routing_rule(&self, req: CreateRoutingRuleRequest) -> Result<RoutingRule> {
        let rule = RoutingRule::from_request(req);
        validate_pattern(&rule.domain_pattern)?;
        if let Some(country) = &rule.required_country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(EgressError::InvalidRequest(format!(
                    "required_country '{}' is not an ISO country code",
                    country
                )));
            }
        }

        self.rule_store.insert_routing_rule(&rule).await?;
        self.routing.insert(rule.clone());

        info!(id = %rule.id, pattern = %rule.domain_pattern, "Added routing rule");
        Ok(rule)
    }

    pub async fn remove_routing_rule(&self, id: Uuid) -> Result<()> {
        let deleted = self.rule_store.delete_routing_rule(id).await?;
        let cached = self.routing.remove(id);
        if !deleted && !cached {
            return Err(EgressError::NotFound(format!("routing rule {}", id)));
        }

        info!(id = %id, "Removed routing rule");
        Ok(())
    }

    // ---- stats ----

    pub fn get_stats(&self) -> RouterStats {
        let now = Utc::now();
        let providers: Vec<ProviderStats> = self
            .registry
            .list()
            .iter()
            .map(|p| {
                let health = self.health.snapshot(&p.name);
                ProviderStats {
                    name: p.name.clone(),
                    enabled: p.enabled,
                    priority: p.priority,
                    cost_per_gb: p.cost_per_gb,
                    score: health.score(),
                    health,
                    cooling_down: self.health.is_cooling_down_at(&p.name, now),
                    active_sessions: self.sessions.active_for(&p.name, now),
                }
            })
            .collect();

        let total = self.counters.total.load(Ordering::Relaxed);
        let succeeded = self.counters.succeeded.load(Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed);

        RouterStats {
            total_providers: providers.len(),
            enabled_providers: providers.iter().filter(|p| p.enabled).count(),
            routing_rules: self.routing.len(),
            active_sessions: self.sessions.active_count(now),
            total_requests: total,
            successful_requests: succeeded,
            failed_requests: failed,
            success_rate: if total > 0 {
                succeeded as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            providers,
        }
    }

    // ---- caller ----

    /// Proxy one caller request, failing over between providers
    #[instrument(skip(self, req, cancel), fields(url = %req.url, method = %req.method))]
    pub async fn proxy_request(
        &self,
        req: ProxyRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ProxyResponse> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let result = match build_execute_request(&req) {
            Ok(request) => self.executor.execute(request, cancel).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(executed) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                Ok(ProxyResponse {
                    status: executed.response.status.as_u16(),
                    data: response_data(&executed.response.body),
                    headers: flatten_headers(&executed.response.headers),
                    proxy_provider: executed.provider.name.clone(),
                    proxy_country: executed.constraints.country.clone(),
                    session_id: executed.session_id,
                    attempts: executed.attempts,
                })
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

fn build_execute_request(req: &ProxyRequest) -> Result<ExecuteRequest> {
    let url = Url::parse(req.url.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EgressError::InvalidRequest(format!(
            "unsupported URL scheme '{}'",
            url.scheme()
        )));
    }

    let method = Method::from_bytes(req.method.trim().to_uppercase().as_bytes())
        .map_err(|_| EgressError::InvalidRequest(format!("invalid method '{}'", req.method)))?;

    let mut headers = HeaderMap::new();
    for (name, value) in req.headers.iter().flatten() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| EgressError::InvalidRequest(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            EgressError::InvalidRequest(format!("invalid value for header '{}'", name))
        })?;
        headers.insert(name, value);
    }

    let body = match &req.body {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(Bytes::from(text.clone())),
        Some(json) => {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            let encoded = serde_json::to_vec(json)
                .map_err(|e| EgressError::InvalidRequest(format!("invalid body: {}", e)))?;
            Some(Bytes::from(encoded))
        }
    };

    let timeout = match req.timeout {
        Some(0) => {
            return Err(EgressError::InvalidRequest(
                "timeout must be at least one second".into(),
            ))
        }
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };

    Ok(ExecuteRequest {
        method,
        url,
        headers,
        body,
        constraints: req.constraints(),
        provider_override: req.proxy_provider.clone(),
        max_retries: req.max_retries,
        timeout,
    })
}

/// JSON when the body parses as JSON, text otherwise
fn response_data(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}
