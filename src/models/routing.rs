use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether requests keep the same upstream IP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Rotating,
    Sticky,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Rotating => "rotating",
            SessionType::Sticky => "sticky",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rotating" | "rotate" => Some(SessionType::Rotating),
            "sticky" => Some(SessionType::Sticky),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declarative mapping from destination domains to provider preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: Uuid,
    pub domain_pattern: String,
    #[serde(default)]
    pub preferred_providers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_country: Option<String>,
    #[serde(default)]
    pub session_type: SessionType,
    pub created_at: DateTime<Utc>,
}

impl RoutingRule {
    pub fn from_request(req: CreateRoutingRuleRequest) -> Self {
        RoutingRule {
            id: Uuid::new_v4(),
            domain_pattern: req.domain_pattern.trim().to_lowercase(),
            preferred_providers: req
                .preferred_providers
                .unwrap_or_default()
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            required_country: req
                .required_country
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty()),
            session_type: req.session_type.unwrap_or_default(),
            created_at: Utc::now(),
        }
    }

    pub fn is_catch_all(&self) -> bool {
        self.domain_pattern == "*"
    }
}

/// Request to create a routing rule
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoutingRuleRequest {
    pub domain_pattern: String,
    pub preferred_providers: Option<Vec<String>>,
    pub required_country: Option<String>,
    pub session_type: Option<SessionType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_type_parsing() {
        assert_eq!(SessionType::from_str("Sticky"), Some(SessionType::Sticky));
        assert_eq!(SessionType::from_str("rotating"), Some(SessionType::Rotating));
        assert_eq!(SessionType::from_str("pinned"), None);
        assert_eq!(SessionType::default(), SessionType::Rotating);
    }

    #[test]
    fn test_rule_from_request_normalizes() {
        let rule = RoutingRule::from_request(CreateRoutingRuleRequest {
            domain_pattern: " *.LinkedIn.com ".to_string(),
            preferred_providers: Some(vec!["p1".to_string(), " ".to_string()]),
            required_country: Some("us".to_string()),
            session_type: None,
        });

        assert_eq!(rule.domain_pattern, "*.linkedin.com");
        assert_eq!(rule.preferred_providers, vec!["p1".to_string()]);
        assert_eq!(rule.required_country.as_deref(), Some("US"));
        assert_eq!(rule.session_type, SessionType::Rotating);
        assert!(!rule.is_catch_all());
    }
}
