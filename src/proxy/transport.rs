//! Outbound transport through a gateway
//!
//! The executor only depends on the `Transport` trait; `HttpTransport` is
//! the reqwest-backed default. A response whose failure belongs to the
//! proxy layer (407, or a 5xx the gateway marks as its own) is reported as
//! a `TransportError`; every other response belongs to the target and is
//! returned as-is.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use reqwest::{ClientBuilder, Proxy};
use tracing::{debug, instrument};
use url::Url;

use super::ProxyEndpoint;
use crate::error::{TransportError, TransportErrorKind};

/// Headers gateways set when a 5xx originates from the proxy itself
const PROXY_ERROR_HEADERS: [&str; 2] = ["proxy-status", "x-proxy-error"];

/// Request handed to a transport for one attempt
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url, timeout: Duration) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout,
        }
    }
}

/// Target response, fully buffered
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Pluggable "perform(request) -> response" capability
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(
        &self,
        endpoint: &ProxyEndpoint,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError>;
}

/// reqwest client dialing the gateway as an HTTP proxy
#[derive(Debug, Clone)]
pub struct HttpTransport {
    user_agent: String,
    connect_timeout: Duration,
}

impl HttpTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn client(
        &self,
        endpoint: &ProxyEndpoint,
        timeout: Duration,
    ) -> Result<reqwest::Client, TransportError> {
        let proxy = Proxy::all(endpoint.gateway_url())
            .map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Other,
                    format!("invalid gateway address {}: {}", endpoint.gateway_url(), e),
                )
            })?
            .basic_auth(&endpoint.username, &endpoint.password);

        ClientBuilder::new()
            .proxy(proxy)
            .timeout(timeout)
            .connect_timeout(self.connect_timeout.min(timeout))
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Other,
                    format!("failed to build HTTP client: {}", e),
                )
            })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(concat!("egress-router/", env!("CARGO_PKG_VERSION")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(gateway = %endpoint.gateway_url(), method = %request.method))]
    async fn perform(
        &self,
        endpoint: &ProxyEndpoint,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let client = self.client(endpoint, request.timeout)?;

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();

        if let Some(err) = classify_status(status, &headers) {
            debug!(status = status.as_u16(), "Gateway rejected the request");
            return Err(err);
        }

        let body = response.bytes().await.map_err(classify_reqwest_error)?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Proxy-layer failures hidden inside an HTTP response
pub fn classify_status(status: StatusCode, headers: &HeaderMap) -> Option<TransportError> {
    if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
        return Some(TransportError::new(
            TransportErrorKind::ProxyAuth,
            "gateway rejected the proxy credentials (407)",
        ));
    }

    if status.is_server_error() && PROXY_ERROR_HEADERS.iter().any(|h| headers.contains_key(*h)) {
        return Some(TransportError::new(
            TransportErrorKind::Gateway,
            format!("gateway reported {}", status),
        ));
    }

    None
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    let message = error_chain(&err);
    let lower = message.to_lowercase();

    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if lower.contains("407") || lower.contains("proxy authentication") {
        TransportErrorKind::ProxyAuth
    } else if lower.contains("dns error") || lower.contains("failed to lookup address") {
        TransportErrorKind::Dns
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };

    TransportError::new(kind, message)
}

/// Flatten an error and its sources into one line
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Scripted transports for tests
#[cfg(test)]
pub mod testing {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// One scripted reply
    #[derive(Debug, Clone)]
    pub enum StubReply {
        Respond(u16, &'static str),
        Fail(TransportErrorKind),
        /// Never completes; used for timeout and cancellation tests
        Hang,
    }

    /// Replies scripted per gateway host, falling back to a default
    pub struct StubTransport {
        scripts: Mutex<HashMap<String, VecDeque<StubReply>>>,
        fallback: StubReply,
        calls: Mutex<Vec<ProxyEndpoint>>,
        in_flight: AtomicUsize,
    }

    impl StubTransport {
        pub fn new(fallback: StubReply) -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                fallback,
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
            }
        }

        pub fn script(self, gateway_host: &str, replies: Vec<StubReply>) -> Self {
            self.scripts
                .lock()
                .insert(gateway_host.to_string(), replies.into());
            self
        }

        pub fn calls(&self) -> Vec<ProxyEndpoint> {
            self.calls.lock().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn perform(
            &self,
            endpoint: &ProxyEndpoint,
            _request: &TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.calls.lock().push(endpoint.clone());
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            let reply = self
                .scripts
                .lock()
                .get_mut(&endpoint.gateway_host)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| self.fallback.clone());

            match reply {
                StubReply::Respond(status, body) => Ok(TransportResponse {
                    status: StatusCode::from_u16(status).unwrap(),
                    headers: HeaderMap::new(),
                    body: Bytes::from_static(body.as_bytes()),
                }),
                StubReply::Fail(kind) => Err(TransportError::new(kind, "scripted failure")),
                StubReply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(TransportError::timeout())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_407_is_proxy_auth() {
        let err = classify_status(StatusCode::PROXY_AUTHENTICATION_REQUIRED, &HeaderMap::new())
            .unwrap();
        assert_eq!(err.kind, TransportErrorKind::ProxyAuth);
    }

    #[test]
    fn test_target_5xx_is_not_a_transport_error() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, &HeaderMap::new()).is_none());
        assert!(classify_status(StatusCode::NOT_FOUND, &HeaderMap::new()).is_none());
    }

    #[test]
    fn test_gateway_marked_5xx_is_transport_error() {
        let mut headers = HeaderMap::new();
        headers.insert("proxy-status", HeaderValue::from_static("error=connection_refused"));

        let err = classify_status(StatusCode::BAD_GATEWAY, &headers).unwrap();
        assert_eq!(err.kind, TransportErrorKind::Gateway);

        assert!(classify_status(StatusCode::OK, &headers).is_none());
    }

    #[test]
    fn test_client_builds_for_endpoint() {
        let transport = HttpTransport::default();
        let endpoint = ProxyEndpoint {
            gateway_host: "gw.example.net".to_string(),
            gateway_port: 8000,
            username: "u-country-us".to_string(),
            password: "pw".to_string(),
            used_session_id: None,
        };
        assert!(transport
            .client(&endpoint, Duration::from_secs(5))
            .is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_connect_failure() {
        let transport = HttpTransport::default().with_connect_timeout(Duration::from_secs(2));
        let endpoint = ProxyEndpoint {
            gateway_host: "127.0.0.1".to_string(),
            gateway_port: 9,
            username: "u".to_string(),
            password: "pw".to_string(),
            used_session_id: None,
        };
        let request = TransportRequest::new(
            Method::GET,
            Url::parse("http://example.com/").unwrap(),
            Duration::from_secs(5),
        );

        let err = transport.perform(&endpoint, &request).await.unwrap_err();
        assert!(matches!(
            err.kind,
            TransportErrorKind::Connect | TransportErrorKind::Timeout
        ));
    }
}
