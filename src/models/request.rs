use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SessionType;
use crate::error::{EgressError, Result};

/// Parameters a caller (or a routing rule) asks the gateway to honour
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Sticky session lifetime in minutes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_type: Option<SessionType>,
}

impl RequestConstraints {
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_session_type(mut self, session_type: SessionType) -> Self {
        self.session_type = Some(session_type);
        self
    }

    /// Country with blank values treated as absent
    pub fn effective_country(&self) -> Option<&str> {
        self.country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Caller-facing proxied request
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    /// String bodies are sent verbatim, anything else as JSON
    #[serde(default)]
    pub body: Option<Value>,
    pub proxy_provider: Option<String>,
    pub proxy_country: Option<String>,
    pub proxy_state: Option<String>,
    pub proxy_city: Option<String>,
    pub session_type: Option<SessionType>,
    /// Sticky session lifetime in minutes
    pub sticky_duration: Option<u32>,
    pub max_retries: Option<u32>,
    /// Per-attempt timeout in seconds
    pub timeout: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl ProxyRequest {
    pub fn get(url: impl Into<String>) -> Self {
        ProxyRequest {
            url: url.into(),
            method: default_method(),
            headers: None,
            body: None,
            proxy_provider: None,
            proxy_country: None,
            proxy_state: None,
            proxy_city: None,
            session_type: None,
            sticky_duration: None,
            max_retries: None,
            timeout: None,
        }
    }

    pub fn constraints(&self) -> RequestConstraints {
        RequestConstraints {
            country: self.proxy_country.clone(),
            state: self.proxy_state.clone(),
            city: self.proxy_city.clone(),
            session_id: None,
            session_duration: self.sticky_duration,
            session_type: self.session_type,
        }
    }
}

/// Caller-facing proxied response
#[derive(Debug, Clone, Serialize)]
pub struct ProxyResponse {
    pub status: u16,
    pub data: Value,
    pub headers: BTreeMap<String, String>,
    pub proxy_provider: String,
    pub proxy_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub attempts: u32,
}

impl ProxyResponse {
    /// Turn a destination 4xx/5xx into a `TargetError`
    pub fn error_for_status(self) -> Result<Self> {
        if self.status >= 400 {
            return Err(EgressError::Target {
                provider: self.proxy_provider,
                status: self.status,
            });
        }
        Ok(self)
    }
}

/// Result of validating a provider against the echo endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TestProviderResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl TestProviderResult {
    pub fn failed(kind: &str, error: impl Into<String>) -> Self {
        TestProviderResult {
            success: false,
            ip: None,
            latency_ms: None,
            status_code: None,
            error: Some(error.into()),
            error_kind: Some(kind.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_request_defaults() {
        let req: ProxyRequest =
            serde_json::from_value(serde_json::json!({ "url": "https://example.com" })).unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.headers.is_none());
        assert_eq!(req.constraints(), RequestConstraints::default());
    }

    #[test]
    fn test_constraints_from_request() {
        let mut req = ProxyRequest::get("https://example.com");
        req.proxy_country = Some("US".to_string());
        req.session_type = Some(SessionType::Sticky);
        req.sticky_duration = Some(15);

        let constraints = req.constraints();
        assert_eq!(constraints.effective_country(), Some("US"));
        assert_eq!(constraints.session_type, Some(SessionType::Sticky));
        assert_eq!(constraints.session_duration, Some(15));
        assert!(constraints.session_id.is_none());
    }

    #[test]
    fn test_blank_country_is_absent() {
        let constraints = RequestConstraints::default().with_country("  ");
        assert_eq!(constraints.effective_country(), None);
    }

    #[test]
    fn test_error_for_status() {
        let response = ProxyResponse {
            status: 404,
            data: Value::Null,
            headers: BTreeMap::new(),
            proxy_provider: "p1".to_string(),
            proxy_country: None,
            session_id: None,
            attempts: 1,
        };

        assert!(matches!(
            response.clone().error_for_status(),
            Err(EgressError::Target { status: 404, .. })
        ));

        let ok = ProxyResponse {
            status: 200,
            ..response
        };
        assert!(ok.error_for_status().is_ok());
    }
}
