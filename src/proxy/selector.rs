//! Candidate ranking
//!
//! Turns (host, caller constraints, optional override) into the ordered list
//! of providers the executor will walk through.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{HealthTracker, ProviderRegistry, RoutingTable};
use crate::error::{EgressError, Result};
use crate::models::{ProxyProvider, RequestConstraints, RoutingRule};

/// Outcome of ranking for one request
#[derive(Debug, Clone)]
pub struct Selection {
    /// Best candidate first; never empty
    pub candidates: Vec<Arc<ProxyProvider>>,
    /// Caller constraints with routing-rule defaults filled in
    pub constraints: RequestConstraints,
    pub rule: Option<Arc<RoutingRule>>,
}

struct Ranked {
    provider: Arc<ProxyProvider>,
    score: f64,
    preferred_index: usize,
}

pub struct Selector {
    registry: Arc<ProviderRegistry>,
    routing: Arc<RoutingTable>,
    health: Arc<HealthTracker>,
}

impl Selector {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        routing: Arc<RoutingTable>,
        health: Arc<HealthTracker>,
    ) -> Self {
        Self {
            registry,
            routing,
            health,
        }
    }

    pub fn rank(
        &self,
        host: &str,
        constraints: &RequestConstraints,
        explicit_override: Option<&str>,
    ) -> Result<Selection> {
        let rule = self.routing.lookup(host);
        let constraints = effective_constraints(constraints, rule.as_deref());

        if let Some(name) = explicit_override.map(str::trim).filter(|n| !n.is_empty()) {
            return match self.registry.get(name) {
                Some(provider) if provider.enabled => {
                    debug!(host = %host, provider = %name, "Using explicit provider override");
                    Ok(Selection {
                        candidates: vec![provider],
                        constraints,
                        rule,
                    })
                }
                Some(_) => Err(EgressError::NoEligibleProvider(format!(
                    "provider '{}' is disabled",
                    name
                ))),
                None => Err(EgressError::NoEligibleProvider(format!(
                    "provider '{}' does not exist",
                    name
                ))),
            };
        }

        let preferred: &[String] = rule
            .as_ref()
            .map(|r| r.preferred_providers.as_slice())
            .unwrap_or(&[]);
        let country = constraints.effective_country().map(str::to_uppercase);

        let mut pool: Vec<Ranked> = self
            .registry
            .enabled()
            .into_iter()
            .filter_map(|provider| {
                let preferred_index = if preferred.is_empty() {
                    0
                } else {
                    preferred.iter().position(|name| *name == provider.name)?
                };
                if let Some(country) = &country {
                    if !provider.covers(country) {
                        return None;
                    }
                }
                Some(Ranked {
                    score: self.health.score(&provider.name),
                    provider,
                    preferred_index,
                })
            })
            .collect();

        if pool.is_empty() {
            return Err(EgressError::NoEligibleProvider(describe(
                host,
                country.as_deref(),
                preferred,
            )));
        }

        // Soft exclusion: cooling providers only serve when nothing else can
        let (warm, cooling): (Vec<Ranked>, Vec<Ranked>) = pool
            .drain(..)
            .partition(|r| !self.health.is_cooling_down(&r.provider.name));
        let mut pool = if warm.is_empty() {
            warn!(host = %host, "Every candidate is cooling down, using them anyway");
            cooling
        } else {
            if !cooling.is_empty() {
                debug!(host = %host, skipped = cooling.len(), "Skipping providers in cooldown");
            }
            warm
        };

        pool.sort_by(compare);

        let candidates: Vec<Arc<ProxyProvider>> = pool.into_iter().map(|r| r.provider).collect();
        debug!(
            host = %host,
            candidates = ?candidates.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "Ranked providers"
        );

        Ok(Selection {
            candidates,
            constraints,
            rule,
        })
    }
}

/// Caller values win; the rule fills only what the caller left out
pub fn effective_constraints(
    constraints: &RequestConstraints,
    rule: Option<&RoutingRule>,
) -> RequestConstraints {
    let mut effective = constraints.clone();
    if effective.effective_country().is_none() {
        effective.country = None;
    }

    if let Some(rule) = rule {
        if effective.country.is_none() {
            effective.country = rule.required_country.clone();
        }
        if effective.session_type.is_none() {
            effective.session_type = Some(rule.session_type);
        }
    }
    effective
}

fn compare(a: &Ranked, b: &Ranked) -> Ordering {
    a.provider
        .priority
        .cmp(&b.provider.priority)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.provider.cost_per_gb.total_cmp(&b.provider.cost_per_gb))
        .then_with(|| a.preferred_index.cmp(&b.preferred_index))
        .then_with(|| a.provider.name.cmp(&b.provider.name))
}

fn describe(host: &str, country: Option<&str>, preferred: &[String]) -> String {
    let mut reason = format!("no enabled provider for host '{}'", host);
    if let Some(country) = country {
        reason.push_str(&format!(" covering country {}", country));
    }
    if !preferred.is_empty() {
        reason.push_str(&format!(" among preferred [{}]", preferred.join(", ")));
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CreateProviderRequest, CreateRoutingRuleRequest, SessionType, TemplateConfig,
        UpdateProviderRequest,
    };
    use crate::proxy::{CooldownPolicy, Outcome};
    use crate::repository::MemoryStore;

    struct Fixture {
        registry: Arc<ProviderRegistry>,
        routing: Arc<RoutingTable>,
        health: Arc<HealthTracker>,
        selector: Selector,
    }

    fn fixture(policy: CooldownPolicy) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ProviderRegistry::new(store.clone(), store));
        let routing = Arc::new(RoutingTable::new());
        let health = Arc::new(HealthTracker::new(policy));
        let selector = Selector::new(registry.clone(), routing.clone(), health.clone());
        Fixture {
            registry,
            routing,
            health,
            selector,
        }
    }

    async fn add(
        registry: &ProviderRegistry,
        name: &str,
        priority: i32,
        cost: f64,
        coverage: Option<&[&str]>,
    ) {
        registry
            .add(CreateProviderRequest {
                name: name.to_string(),
                gateway_host: format!("{}.gw.example.net", name),
                gateway_port: 8000,
                url_template: TemplateConfig::default(),
                cost_per_gb: Some(cost),
                priority: Some(priority),
                enabled: None,
                geo_coverage: coverage.map(|c| c.iter().map(|s| s.to_string()).collect()),
            })
            .await
            .unwrap();
    }

    fn names(selection: &Selection) -> Vec<&str> {
        selection
            .candidates
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }

    fn rule(pattern: &str, preferred: &[&str], country: Option<&str>) -> RoutingRule {
        RoutingRule::from_request(CreateRoutingRuleRequest {
            domain_pattern: pattern.to_string(),
            preferred_providers: Some(preferred.iter().map(|s| s.to_string()).collect()),
            required_country: country.map(str::to_string),
            session_type: None,
        })
    }

    #[tokio::test]
    async fn test_disabled_provider_is_never_ranked() {
        let f = fixture(CooldownPolicy::default());
        add(&f.registry, "p1", 10, 1.0, None).await;
        add(&f.registry, "p2", 20, 1.0, None).await;
        f.registry
            .update(
                "p1",
                UpdateProviderRequest {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let selection = f
            .selector
            .rank("example.com", &RequestConstraints::default(), None)
            .unwrap();
        assert_eq!(names(&selection), vec!["p2"]);
    }

    #[tokio::test]
    async fn test_rule_defaults_country_and_prefers_provider() {
        let f = fixture(CooldownPolicy::default());
        add(&f.registry, "p1", 50, 1.0, None).await;
        add(&f.registry, "p2", 10, 1.0, None).await;
        f.routing.insert(rule("*.linkedin.com", &["p1"], Some("US")));

        let selection = f
            .selector
            .rank("www.linkedin.com", &RequestConstraints::default(), None)
            .unwrap();

        assert_eq!(names(&selection), vec!["p1"]);
        assert_eq!(selection.constraints.country.as_deref(), Some("US"));
        assert_eq!(
            selection.constraints.session_type,
            Some(SessionType::Rotating)
        );
    }

    #[tokio::test]
    async fn test_caller_country_beats_rule_default() {
        let f = fixture(CooldownPolicy::default());
        add(&f.registry, "p1", 10, 1.0, None).await;
        f.routing.insert(rule("*", &[], Some("US")));

        let selection = f
            .selector
            .rank(
                "example.com",
                &RequestConstraints::default().with_country("DE"),
                None,
            )
            .unwrap();
        assert_eq!(selection.constraints.country.as_deref(), Some("DE"));
    }

    #[tokio::test]
    async fn test_geo_coverage_excludes_only_declared_providers() {
        let f = fixture(CooldownPolicy::default());
        add(&f.registry, "eu", 10, 1.0, Some(&["DE", "FR"])).await;
        add(&f.registry, "us", 20, 1.0, Some(&["US"])).await;
        add(&f.registry, "global", 30, 1.0, None).await;

        let selection = f
            .selector
            .rank(
                "example.com",
                &RequestConstraints::default().with_country("us"),
                None,
            )
            .unwrap();
        assert_eq!(names(&selection), vec!["us", "global"]);
    }

    #[tokio::test]
    async fn test_sort_order() {
        let f = fixture(CooldownPolicy::disabled());
        add(&f.registry, "cheap", 10, 0.5, None).await;
        add(&f.registry, "pricey", 10, 3.0, None).await;
        add(&f.registry, "flaky", 10, 0.1, None).await;
        add(&f.registry, "backup", 90, 0.1, None).await;
        add(&f.registry, "also-cheap", 10, 0.5, None).await;

        f.health.record("flaky", Outcome::Success, 100);
        f.health.record("flaky", Outcome::Failure, 100);

        let selection = f
            .selector
            .rank("example.com", &RequestConstraints::default(), None)
            .unwrap();
        assert_eq!(
            names(&selection),
            vec!["also-cheap", "cheap", "pricey", "flaky", "backup"]
        );
    }

    #[tokio::test]
    async fn test_preferred_order_breaks_ties() {
        let f = fixture(CooldownPolicy::default());
        add(&f.registry, "a", 10, 1.0, None).await;
        add(&f.registry, "b", 10, 1.0, None).await;
        add(&f.registry, "c", 10, 1.0, None).await;
        f.routing.insert(rule("example.com", &["c", "a"], None));

        let selection = f
            .selector
            .rank("example.com", &RequestConstraints::default(), None)
            .unwrap();
        assert_eq!(names(&selection), vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_override() {
        let f = fixture(CooldownPolicy::default());
        add(&f.registry, "p1", 10, 1.0, None).await;
        add(&f.registry, "p2", 20, 1.0, Some(&["FR"])).await;

        let selection = f
            .selector
            .rank(
                "example.com",
                &RequestConstraints::default().with_country("US"),
                Some("p2"),
            )
            .unwrap();
        assert_eq!(names(&selection), vec!["p2"]);

        let err = f
            .selector
            .rank("example.com", &RequestConstraints::default(), Some("ghost"))
            .unwrap_err();
        assert!(matches!(err, EgressError::NoEligibleProvider(_)));
    }

    #[tokio::test]
    async fn test_empty_pool_is_no_eligible_provider() {
        let f = fixture(CooldownPolicy::default());
        let err = f
            .selector
            .rank("example.com", &RequestConstraints::default(), None)
            .unwrap_err();
        assert!(matches!(err, EgressError::NoEligibleProvider(_)));

        add(&f.registry, "fr", 10, 1.0, Some(&["FR"])).await;
        let err = f
            .selector
            .rank(
                "example.com",
                &RequestConstraints::default().with_country("US"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, EgressError::NoEligibleProvider(_)));
    }

    #[tokio::test]
    async fn test_cooldown_soft_excludes() {
        let f = fixture(CooldownPolicy {
            failure_threshold: 2,
            cooldown: std::time::Duration::from_secs(300),
        });
        add(&f.registry, "p1", 10, 1.0, None).await;
        add(&f.registry, "p2", 20, 1.0, None).await;

        f.health.record("p1", Outcome::Failure, 10);
        f.health.record("p1", Outcome::Failure, 10);

        let selection = f
            .selector
            .rank("example.com", &RequestConstraints::default(), None)
            .unwrap();
        assert_eq!(names(&selection), vec!["p2"]);

        f.health.record("p2", Outcome::Failure, 10);
        f.health.record("p2", Outcome::Failure, 10);

        let selection = f
            .selector
            .rank("example.com", &RequestConstraints::default(), None)
            .unwrap();
        assert_eq!(names(&selection), vec!["p1", "p2"]);
    }
}
