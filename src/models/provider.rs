use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TemplateConfig;
use crate::error::{EgressError, Result};

/// Default priority for providers created without one
pub const DEFAULT_PRIORITY: i32 = 100;

/// Gateway login pair
///
/// Held outside the provider record in the secret store; `Debug` never
/// prints the password.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Upstream proxy vendor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyProvider {
    pub name: String,
    pub gateway_host: String,
    pub gateway_port: u16,
    pub url_template: TemplateConfig,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    pub cost_per_gb: f64,
    pub priority: i32,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_coverage: Option<BTreeSet<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProxyProvider {
    /// Build a provider from an operator request, applying defaults
    pub fn from_request(req: CreateProviderRequest) -> Result<Self> {
        let now = Utc::now();
        let provider = ProxyProvider {
            name: req.name.trim().to_string(),
            gateway_host: req.gateway_host.trim().to_string(),
            gateway_port: req.gateway_port,
            url_template: req.url_template,
            credentials: None,
            cost_per_gb: req.cost_per_gb.unwrap_or(0.0),
            priority: req.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: req.enabled.unwrap_or(true),
            geo_coverage: req.geo_coverage.and_then(normalize_coverage),
            created_at: now,
            updated_at: now,
        };
        provider.validate()?;
        Ok(provider)
    }

    /// Apply a partial update, returning the updated copy
    pub fn apply_update(&self, req: UpdateProviderRequest) -> Result<Self> {
        let mut updated = self.clone();
        if let Some(host) = req.gateway_host {
            updated.gateway_host = host.trim().to_string();
        }
        if let Some(port) = req.gateway_port {
            updated.gateway_port = port;
        }
        if let Some(template) = req.url_template {
            updated.url_template = template;
        }
        if let Some(cost) = req.cost_per_gb {
            updated.cost_per_gb = cost;
        }
        if let Some(priority) = req.priority {
            updated.priority = priority;
        }
        if let Some(enabled) = req.enabled {
            updated.enabled = enabled;
        }
        if let Some(coverage) = req.geo_coverage {
            updated.geo_coverage = normalize_coverage(coverage);
        }
        updated.updated_at = Utc::now();
        updated.validate()?;
        Ok(updated)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EgressError::InvalidRequest("name is required".into()));
        }
        if self.gateway_host.is_empty() {
            return Err(EgressError::InvalidRequest(
                "gateway_host is required".into(),
            ));
        }
        if self.gateway_port == 0 {
            return Err(EgressError::InvalidRequest(
                "gateway_port must be non-zero".into(),
            ));
        }
        if !self.cost_per_gb.is_finite() || self.cost_per_gb < 0.0 {
            return Err(EgressError::InvalidRequest(
                "cost_per_gb must be a non-negative number".into(),
            ));
        }
        if let Some(coverage) = &self.geo_coverage {
            if let Some(bad) = coverage
                .iter()
                .find(|c| c.len() != 2 || !c.chars().all(|ch| ch.is_ascii_alphabetic()))
            {
                return Err(EgressError::InvalidRequest(format!(
                    "geo_coverage entry '{}' is not an ISO country code",
                    bad
                )));
            }
        }
        self.url_template.validate()
    }

    /// Whether the provider can serve traffic for the given country.
    /// Providers without declared coverage serve everywhere.
    pub fn covers(&self, country: &str) -> bool {
        match &self.geo_coverage {
            Some(coverage) => coverage.contains(&country.to_uppercase()),
            None => true,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials
            .as_ref()
            .map(|c| c.is_complete())
            .unwrap_or(false)
    }

    /// Gateway address as `host:port`
    pub fn gateway_addr(&self) -> String {
        if self.gateway_host.contains(':') {
            format!("[{}]:{}", self.gateway_host, self.gateway_port)
        } else {
            format!("{}:{}", self.gateway_host, self.gateway_port)
        }
    }
}

/// Upper-case and dedupe country codes. An empty list means no declared
/// coverage, so the provider serves every country.
pub fn normalize_coverage(codes: Vec<String>) -> Option<BTreeSet<String>> {
    let codes: BTreeSet<String> = codes
        .into_iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();
    (!codes.is_empty()).then_some(codes)
}

/// Provider as shown to operators
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    #[serde(flatten)]
    pub provider: ProxyProvider,
    pub has_credentials: bool,
}

impl From<&ProxyProvider> for ProviderSummary {
    fn from(provider: &ProxyProvider) -> Self {
        ProviderSummary {
            has_credentials: provider.has_credentials(),
            provider: provider.clone(),
        }
    }
}

/// Request to create a new provider
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProviderRequest {
    pub name: String,
    pub gateway_host: String,
    pub gateway_port: u16,
    #[serde(default)]
    pub url_template: TemplateConfig,
    pub cost_per_gb: Option<f64>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub geo_coverage: Option<Vec<String>>,
}

/// Request to update an existing provider
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProviderRequest {
    pub gateway_host: Option<String>,
    pub gateway_port: Option<u16>,
    pub url_template: Option<TemplateConfig>,
    pub cost_per_gb: Option<f64>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub geo_coverage: Option<Vec<String>>,
}

/// Request to store gateway credentials for a provider
#[derive(Clone, Deserialize)]
pub struct SetCredentialsRequest {
    pub username: String,
    pub password: String,
}
