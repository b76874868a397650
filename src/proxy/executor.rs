//! Retry/failover request executor
//!
//! One `execute()` call walks the ranked candidates strictly in sequence:
//!
//! ```text
//! SELECT -> BUILD -> SEND -> Success
//!                         -> Retriable -> next candidate (or Exhausted)
//!                         -> Fatal
//! ```
//!
//! At most `max_retries + 1` candidates are tried, each at most once.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{
    HealthTracker, Outcome, Selector, SessionManager, TemplateEncoder, Transport, TransportRequest,
    TransportResponse,
};
use crate::error::{EgressError, ProviderFailure, Result, TransportError};
use crate::models::{ProxyProvider, RequestConstraints, SessionType, TestProviderResult};

/// Defaults applied when a call leaves a knob unset
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub sticky_duration: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            request_timeout: Duration::from_secs(30),
            sticky_duration: Duration::from_secs(10 * 60),
        }
    }
}

/// One proxied call
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub constraints: RequestConstraints,
    pub provider_override: Option<String>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

impl ExecuteRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            constraints: RequestConstraints::default(),
            provider_override: None,
            max_retries: None,
            timeout: None,
        }
    }
}

/// Successful call, with the target's response untouched
#[derive(Debug, Clone)]
pub struct Executed {
    pub response: TransportResponse,
    pub provider: Arc<ProxyProvider>,
    /// Constraints actually encoded, rule defaults included
    pub constraints: RequestConstraints,
    pub session_id: Option<String>,
    pub attempts: u32,
}

/// Typed result of a single attempt
enum Attempt {
    Success(TransportResponse),
    Retriable(TransportError),
    Fatal(EgressError),
}

pub struct RequestExecutor {
    selector: Arc<Selector>,
    sessions: Arc<SessionManager>,
    health: Arc<HealthTracker>,
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
}

impl RequestExecutor {
    pub fn new(
        selector: Arc<Selector>,
        sessions: Arc<SessionManager>,
        health: Arc<HealthTracker>,
        transport: Arc<dyn Transport>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            selector,
            sessions,
            health,
            transport,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a request through the best available providers.
    ///
    /// When `cancel` flips to `true` the in-flight attempt is dropped and no
    /// further attempts are made.
    #[instrument(skip_all, fields(method = %request.method, host = request.url.host_str().unwrap_or("")))]
    pub async fn execute(
        &self,
        request: ExecuteRequest,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Executed> {
        let host = request
            .url
            .host_str()
            .ok_or_else(|| EgressError::InvalidRequest("target URL has no host".into()))?
            .to_lowercase();

        // SELECT
        let selection = self.selector.rank(
            &host,
            &request.constraints,
            request.provider_override.as_deref(),
        )?;

        let max_retries = request.max_retries.unwrap_or(self.config.max_retries);
        let max_attempts = selection
            .candidates
            .len()
            .min(max_retries.saturating_add(1) as usize);
        let timeout = request.timeout.unwrap_or(self.config.request_timeout);

        let transport_request = TransportRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            timeout,
        };

        let mut failures = Vec::new();
        let mut attempts = 0u32;

        for candidate in selection.candidates.iter().take(max_attempts) {
            if is_cancelled(&cancel) {
                return Err(EgressError::Cancelled);
            }
            attempts += 1;

            // BUILD
            let (constraints, minted_session) =
                self.session_constraints(candidate, &host, &selection.constraints);
            let endpoint = match TemplateEncoder::build(candidate, &constraints) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!(provider = %candidate.name, error = %e, "Cannot build gateway endpoint");
                    return Err(e);
                }
            };

            debug!(
                provider = %candidate.name,
                gateway = %endpoint.gateway_url(),
                "Attempt {}/{}",
                attempts,
                max_attempts
            );

            // SEND
            let started = Instant::now();
            let outcome = tokio::select! {
                result = tokio::time::timeout(timeout, self.transport.perform(&endpoint, &transport_request)) => {
                    match result {
                        Ok(Ok(response)) => Attempt::Success(response),
                        Ok(Err(e)) => Attempt::Retriable(e),
                        Err(_) => Attempt::Retriable(TransportError::timeout()),
                    }
                }
                _ = wait_cancelled(&mut cancel) => Attempt::Fatal(EgressError::Cancelled),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Attempt::Success(response) => {
                    self.health
                        .record(&candidate.name, Outcome::Success, latency_ms);
                    info!(
                        provider = %candidate.name,
                        status = response.status.as_u16(),
                        latency_ms,
                        attempts,
                        "Proxied request completed"
                    );
                    return Ok(Executed {
                        response,
                        provider: candidate.clone(),
                        constraints,
                        session_id: endpoint.used_session_id.clone(),
                        attempts,
                    });
                }
                Attempt::Retriable(e) => {
                    self.health
                        .record(&candidate.name, Outcome::Failure, latency_ms);
                    if minted_session.is_some() {
                        self.sessions.invalidate(&candidate.name, &host);
                    }
                    warn!(
                        provider = %candidate.name,
                        kind = %e.kind,
                        error = %e.message,
                        "Attempt {}/{} failed",
                        attempts,
                        max_attempts
                    );
                    failures.push(ProviderFailure {
                        provider: candidate.name.clone(),
                        kind: e.kind,
                        message: e.message,
                    });
                }
                Attempt::Fatal(e) => {
                    info!(provider = %candidate.name, "Request cancelled");
                    return Err(e);
                }
            }
        }

        warn!(attempts, "All proxy providers exhausted");
        Err(EgressError::ProxyExhausted { attempts, failures })
    }

    /// Constraints for one candidate, with a sticky session id when needed
    fn session_constraints(
        &self,
        provider: &ProxyProvider,
        host: &str,
        constraints: &RequestConstraints,
    ) -> (RequestConstraints, Option<String>) {
        let mut constraints = constraints.clone();
        if constraints.session_type != Some(SessionType::Sticky) || constraints.session_id.is_some()
        {
            return (constraints, None);
        }

        let minutes = constraints
            .session_duration
            .unwrap_or((self.config.sticky_duration.as_secs() / 60) as u32);
        let duration = Duration::from_secs(u64::from(minutes) * 60);

        let session_id =
            self.sessions
                .get_or_create(&provider.name, host, SessionType::Sticky, duration);
        constraints.session_id = session_id.clone();
        constraints.session_duration = Some(minutes);
        (constraints, session_id)
    }

    /// Single attempt against an echo endpoint, bypassing ranking.
    ///
    /// Works for disabled providers so they can be validated before rotation.
    #[instrument(skip(self, provider, echo_url), fields(provider = %provider.name))]
    pub async fn probe(
        &self,
        provider: &ProxyProvider,
        echo_url: &Url,
        timeout: Duration,
    ) -> TestProviderResult {
        let endpoint = match TemplateEncoder::build(provider, &RequestConstraints::default()) {
            Ok(endpoint) => endpoint,
            Err(e) => return TestProviderResult::failed("configuration", e.to_string()),
        };

        let request = TransportRequest::new(Method::GET, echo_url.clone(), timeout);
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.transport.perform(&endpoint, &request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout()),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                self.health
                    .record(&provider.name, Outcome::Success, latency_ms);
                let success = response.status.is_success();
                info!(status = response.status.as_u16(), latency_ms, "Provider probe finished");
                TestProviderResult {
                    success,
                    ip: extract_ip(&response.body),
                    latency_ms: Some(latency_ms),
                    status_code: Some(response.status.as_u16()),
                    error: (!success).then(|| format!("echo endpoint returned {}", response.status)),
                    error_kind: (!success).then(|| "target".to_string()),
                }
            }
            Err(e) => {
                self.health
                    .record(&provider.name, Outcome::Failure, latency_ms);
                warn!(kind = %e.kind, error = %e.message, "Provider probe failed");
                let mut result = TestProviderResult::failed(e.kind.as_str(), e.message);
                result.latency_ms = Some(latency_ms);
                result
            }
        }
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

/// Resolves once the cancel flag is set; never resolves without a receiver
/// or after the sender is gone
async fn wait_cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
    std::future::pending::<()>().await
}

/// Public IP reported by an echo service, as JSON (`ip`/`origin`) or plain text
pub fn extract_ip(body: &[u8]) -> Option<String> {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        return ["ip", "origin"]
            .iter()
            .find_map(|key| json.get(*key).and_then(Value::as_str))
            .map(|ip| ip.trim().to_string());
    }

    let text = std::str::from_utf8(body).ok()?.trim();
    text.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use crate::models::{
        CreateProviderRequest, CreateRoutingRuleRequest, Credentials, ParamField, ParamKind,
        RoutingRule, TemplateConfig,
    };
    use crate::proxy::transport::testing::{StubReply, StubTransport};
    use crate::proxy::{CooldownPolicy, ProviderRegistry, RoutingTable};
    use crate::repository::MemoryStore;

    struct Fixture {
        registry: Arc<ProviderRegistry>,
        routing: Arc<RoutingTable>,
        sessions: Arc<SessionManager>,
        health: Arc<HealthTracker>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            Self {
                registry: Arc::new(ProviderRegistry::new(store.clone(), store)),
                routing: Arc::new(RoutingTable::new()),
                sessions: Arc::new(SessionManager::new()),
                health: Arc::new(HealthTracker::new(CooldownPolicy::disabled())),
            }
        }

        async fn provider(&self, name: &str, priority: i32) {
            let mut template = TemplateConfig::default();
            template.param_field = ParamField::Username;
            template
                .param_keys
                .insert(ParamKind::Country, "country-{v}".to_string());
            template
                .param_keys
                .insert(ParamKind::SessionId, "session-{v}".to_string());

            self.registry
                .add(CreateProviderRequest {
                    name: name.to_string(),
                    gateway_host: gateway(name),
                    gateway_port: 8000,
                    url_template: template,
                    cost_per_gb: None,
                    priority: Some(priority),
                    enabled: None,
                    geo_coverage: None,
                })
                .await
                .unwrap();
            self.registry
                .set_credentials(name, Credentials::new("u", "pw"))
                .await
                .unwrap();
        }

        fn executor(&self, transport: Arc<StubTransport>) -> RequestExecutor {
            let selector = Arc::new(Selector::new(
                self.registry.clone(),
                self.routing.clone(),
                self.health.clone(),
            ));
            RequestExecutor::new(
                selector,
                self.sessions.clone(),
                self.health.clone(),
                transport,
                ExecutorConfig {
                    request_timeout: Duration::from_millis(200),
                    ..Default::default()
                },
            )
        }
    }

    fn gateway(name: &str) -> String {
        format!("{}.gw.example.net", name)
    }

    fn get(url: &str) -> ExecuteRequest {
        ExecuteRequest::new(Method::GET, Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_fails_over_until_kth_candidate() {
        let f = Fixture::new();
        f.provider("p1", 10).await;
        f.provider("p2", 20).await;
        f.provider("p3", 30).await;

        let transport = Arc::new(
            StubTransport::new(StubReply::Respond(200, "ok"))
                .script(&gateway("p1"), vec![StubReply::Fail(TransportErrorKind::Connect)])
                .script(&gateway("p2"), vec![StubReply::Fail(TransportErrorKind::ProxyAuth)]),
        );
        let executor = f.executor(transport.clone());

        let executed = executor
            .execute(get("https://example.com/"), None)
            .await
            .unwrap();

        assert_eq!(executed.attempts, 3);
        assert_eq!(executed.provider.name, "p3");
        assert_eq!(transport.call_count(), 3);
        assert_eq!(f.health.snapshot("p1").failure_count, 1);
        assert_eq!(f.health.snapshot("p2").failure_count, 1);
        assert_eq!(f.health.snapshot("p3").success_count, 1);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_retries_plus_one() {
        let f = Fixture::new();
        for (i, name) in ["p1", "p2", "p3", "p4", "p5"].iter().enumerate() {
            f.provider(name, i as i32).await;
        }

        let transport = Arc::new(StubTransport::new(StubReply::Fail(
            TransportErrorKind::Connect,
        )));
        let executor = f.executor(transport.clone());

        let mut request = get("https://example.com/");
        request.max_retries = Some(2);
        let err = executor.execute(request, None).await.unwrap_err();

        match err {
            EgressError::ProxyExhausted { attempts, failures } => {
                assert_eq!(attempts, 3);
                let tried: Vec<_> = failures.iter().map(|f| f.provider.as_str()).collect();
                assert_eq!(tried, vec!["p1", "p2", "p3"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_candidates() {
        let f = Fixture::new();
        f.provider("p1", 10).await;

        let transport = Arc::new(StubTransport::new(StubReply::Fail(
            TransportErrorKind::Timeout,
        )));
        let executor = f.executor(transport.clone());

        let mut request = get("https://example.com/");
        request.max_retries = Some(5);
        let err = executor.execute(request, None).await.unwrap_err();

        assert!(matches!(err, EgressError::ProxyExhausted { attempts: 1, .. }));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_target_error_status_is_not_retried() {
        let f = Fixture::new();
        f.provider("p1", 10).await;
        f.provider("p2", 20).await;

        let transport = Arc::new(StubTransport::new(StubReply::Respond(404, "missing")));
        let executor = f.executor(transport.clone());

        let executed = executor
            .execute(get("https://example.com/nope"), None)
            .await
            .unwrap();
        assert_eq!(executed.response.status.as_u16(), 404);
        assert_eq!(executed.attempts, 1);
        assert_eq!(f.health.snapshot("p1").success_count, 1);
    }

    #[tokio::test]
    async fn test_no_eligible_provider_is_fatal() {
        let f = Fixture::new();
        let transport = Arc::new(StubTransport::new(StubReply::Respond(200, "ok")));
        let executor = f.executor(transport.clone());

        let err = executor
            .execute(get("https://example.com/"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EgressError::NoEligibleProvider(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_fatal() {
        let f = Fixture::new();
        f.registry
            .add(CreateProviderRequest {
                name: "bare".to_string(),
                gateway_host: gateway("bare"),
                gateway_port: 8000,
                url_template: TemplateConfig::default(),
                cost_per_gb: None,
                priority: Some(1),
                enabled: None,
                geo_coverage: None,
            })
            .await
            .unwrap();
        f.provider("p1", 10).await;

        let transport = Arc::new(StubTransport::new(StubReply::Respond(200, "ok")));
        let executor = f.executor(transport.clone());

        let err = executor
            .execute(get("https://example.com/"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EgressError::Configuration(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rule_country_is_encoded() {
        let f = Fixture::new();
        f.provider("p1", 10).await;
        f.provider("p2", 5).await;
        f.routing.insert(RoutingRule::from_request(CreateRoutingRuleRequest {
            domain_pattern: "*.linkedin.com".to_string(),
            preferred_providers: Some(vec!["p1".to_string()]),
            required_country: Some("US".to_string()),
            session_type: None,
        }));

        let transport = Arc::new(StubTransport::new(StubReply::Respond(200, "ok")));
        let executor = f.executor(transport.clone());

        let executed = executor
            .execute(get("https://www.linkedin.com/in/someone"), None)
            .await
            .unwrap();

        assert_eq!(executed.provider.name, "p1");
        assert_eq!(executed.constraints.country.as_deref(), Some("US"));
        assert_eq!(transport.calls()[0].username, "u-country-us");
        assert_eq!(transport.calls()[0].password, "pw");
    }

    #[tokio::test]
    async fn test_sticky_session_reused_and_invalidated_on_failure() {
        let f = Fixture::new();
        f.provider("p1", 10).await;

        let transport = Arc::new(
            StubTransport::new(StubReply::Respond(200, "ok")).script(
                &gateway("p1"),
                vec![
                    StubReply::Respond(200, "ok"),
                    StubReply::Respond(200, "ok"),
                    StubReply::Fail(TransportErrorKind::Connect),
                ],
            ),
        );
        let executor = f.executor(transport.clone());

        let sticky = || {
            let mut request = get("https://shop.example.com/");
            request.constraints.session_type = Some(SessionType::Sticky);
            request
        };

        let first = executor.execute(sticky(), None).await.unwrap();
        let second = executor.execute(sticky(), None).await.unwrap();
        assert!(first.session_id.is_some());
        assert_eq!(first.session_id, second.session_id);
        assert!(transport.calls()[0]
            .username
            .ends_with(&format!("session-{}", first.session_id.clone().unwrap())));

        assert!(executor.execute(sticky(), None).await.is_err());
        assert!(f.sessions.get("p1", "shop.example.com").is_none());

        let fourth = executor.execute(sticky(), None).await.unwrap();
        assert_ne!(fourth.session_id, first.session_id);
    }

    #[tokio::test]
    async fn test_timeout_is_retriable() {
        let f = Fixture::new();
        f.provider("slow", 1).await;
        f.provider("fast", 2).await;

        let transport = Arc::new(
            StubTransport::new(StubReply::Respond(200, "ok"))
                .script(&gateway("slow"), vec![StubReply::Hang]),
        );
        let executor = f.executor(transport.clone());

        let executed = executor
            .execute(get("https://example.com/"), None)
            .await
            .unwrap();
        assert_eq!(executed.provider.name, "fast");
        assert_eq!(executed.attempts, 2);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_in_flight_attempt() {
        let f = Fixture::new();
        f.provider("p1", 1).await;
        f.provider("p2", 2).await;

        let transport = Arc::new(StubTransport::new(StubReply::Hang));
        let executor = f.executor(transport.clone());
        let (tx, rx) = watch::channel(false);

        let mut request = get("https://example.com/");
        request.timeout = Some(Duration::from_secs(60));

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        let (result, _) = tokio::join!(executor.execute(request, Some(rx)), cancel);

        assert!(matches!(result, Err(EgressError::Cancelled)));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_probe_reports_ip_and_failure_class() {
        let f = Fixture::new();
        f.provider("p1", 1).await;
        f.provider("p2", 2).await;

        let transport = Arc::new(
            StubTransport::new(StubReply::Respond(200, r#"{"ip":"203.0.113.7"}"#))
                .script(&gateway("p2"), vec![StubReply::Fail(TransportErrorKind::Dns)]),
        );
        let executor = f.executor(transport);
        let echo = Url::parse("https://api.ipify.org?format=json").unwrap();

        let p1 = f.registry.get("p1").unwrap();
        let ok = executor.probe(&p1, &echo, Duration::from_secs(1)).await;
        assert!(ok.success);
        assert_eq!(ok.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(ok.status_code, Some(200));

        let p2 = f.registry.get("p2").unwrap();
        let failed = executor.probe(&p2, &echo, Duration::from_secs(1)).await;
        assert!(!failed.success);
        assert_eq!(failed.error_kind.as_deref(), Some("dns"));
    }

    #[test]
    fn test_extract_ip() {
        assert_eq!(extract_ip(br#"{"ip":"1.2.3.4"}"#).as_deref(), Some("1.2.3.4"));
        assert_eq!(
            extract_ip(br#"{"origin":"5.6.7.8"}"#).as_deref(),
            Some("5.6.7.8")
        );
        assert_eq!(extract_ip(b"9.9.9.9\n").as_deref(), Some("9.9.9.9"));
        assert_eq!(extract_ip(b"<html>").as_deref(), None);
    }
}
