//! Declarative description of how a vendor expects geo/session parameters
//! to be embedded into proxy credentials.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EgressError, Result};

/// Placeholder substituted by the stored username in `username_prefix`
pub const USERNAME_PLACEHOLDER: &str = "{username}";

/// Placeholder substituted by the parameter value in `param_keys` formats
pub const VALUE_PLACEHOLDER: &str = "{v}";

/// Which credential field carries the encoded parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamField {
    Username,
    Password,
    #[default]
    None,
}

impl ParamField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamField::Username => "username",
            ParamField::Password => "password",
            ParamField::None => "none",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "username" => Some(ParamField::Username),
            "password" => Some(ParamField::Password),
            "none" => Some(ParamField::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of request parameter a template can encode
///
/// The declaration order is the encoding order; gateways that parse
/// parameters positionally depend on it staying fixed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Country,
    State,
    City,
    SessionId,
    SessionDuration,
}

impl ParamKind {
    /// All kinds in encoding order
    pub const ORDERED: [ParamKind; 5] = [
        ParamKind::Country,
        ParamKind::State,
        ParamKind::City,
        ParamKind::SessionId,
        ParamKind::SessionDuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Country => "country",
            ParamKind::State => "state",
            ParamKind::City => "city",
            ParamKind::SessionId => "session_id",
            ParamKind::SessionDuration => "session_duration",
        }
    }
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Case applied to country codes before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CountryCase {
    #[default]
    Lower,
    Upper,
}

impl CountryCase {
    pub fn apply(&self, value: &str) -> String {
        match self {
            CountryCase::Lower => value.to_lowercase(),
            CountryCase::Upper => value.to_uppercase(),
        }
    }
}

/// Per-provider credential encoding rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub param_field: ParamField,
    #[serde(default = "default_username_prefix")]
    pub username_prefix: String,
    #[serde(default = "default_separator")]
    pub username_param_separator: String,
    #[serde(default = "default_separator")]
    pub param_separator: String,
    #[serde(default)]
    pub param_keys: BTreeMap<ParamKind, String>,
    #[serde(default)]
    pub country_case: CountryCase,
    #[serde(default = "default_city_separator")]
    pub city_separator: String,
}

fn default_username_prefix() -> String {
    USERNAME_PLACEHOLDER.to_string()
}

fn default_separator() -> String {
    "-".to_string()
}

fn default_city_separator() -> String {
    "_".to_string()
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            param_field: ParamField::None,
            username_prefix: default_username_prefix(),
            username_param_separator: default_separator(),
            param_separator: default_separator(),
            param_keys: BTreeMap::new(),
            country_case: CountryCase::default(),
            city_separator: default_city_separator(),
        }
    }
}

impl TemplateConfig {
    /// Template that sends credentials untouched
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Whether the template can encode the given kind at all
    pub fn supports(&self, kind: ParamKind) -> bool {
        self.param_field != ParamField::None && self.param_keys.contains_key(&kind)
    }

    /// Check the template for mistakes that would only surface at request time
    pub fn validate(&self) -> Result<()> {
        if self.param_field == ParamField::None {
            return Ok(());
        }

        for (kind, format) in &self.param_keys {
            if !format.contains(VALUE_PLACEHOLDER) {
                return Err(EgressError::Configuration(format!(
                    "param_keys.{} must contain the {} placeholder",
                    kind, VALUE_PLACEHOLDER
                )));
            }
        }

        if self.param_keys.len() > 1 && self.param_separator.is_empty() {
            return Err(EgressError::Configuration(
                "param_separator must not be empty when several param_keys are set".into(),
            ));
        }

        if self.param_field == ParamField::Username && self.username_prefix.is_empty() {
            return Err(EgressError::Configuration(
                "username_prefix must not be empty".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_field_parsing() {
        assert_eq!(ParamField::from_str("USERNAME"), Some(ParamField::Username));
        assert_eq!(ParamField::from_str("password"), Some(ParamField::Password));
        assert_eq!(ParamField::from_str("none"), Some(ParamField::None));
        assert_eq!(ParamField::from_str("header"), None);
        assert_eq!(ParamField::Password.to_string(), "password");
    }

    #[test]
    fn test_param_kind_order_is_fixed() {
        let mut sorted = ParamKind::ORDERED.to_vec();
        sorted.sort();
        assert_eq!(sorted, ParamKind::ORDERED.to_vec());
    }

    #[test]
    fn test_template_deserializes_with_defaults() {
        let template: TemplateConfig = serde_json::from_value(serde_json::json!({
            "param_field": "username",
            "param_keys": { "country": "country-{v}", "session_id": "session-{v}" }
        }))
        .unwrap();

        assert_eq!(template.param_field, ParamField::Username);
        assert_eq!(template.username_prefix, "{username}");
        assert_eq!(template.username_param_separator, "-");
        assert_eq!(template.param_separator, "-");
        assert_eq!(template.city_separator, "_");
        assert_eq!(template.country_case, CountryCase::Lower);
        assert!(template.supports(ParamKind::Country));
        assert!(!template.supports(ParamKind::City));
    }

    #[test]
    fn test_validate_rejects_format_without_placeholder() {
        let mut template = TemplateConfig {
            param_field: ParamField::Username,
            ..TemplateConfig::default()
        };
        template
            .param_keys
            .insert(ParamKind::Country, "country-us".to_string());

        assert!(matches!(
            template.validate(),
            Err(EgressError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_ignores_keys_when_field_is_none() {
        let mut template = TemplateConfig::passthrough();
        template
            .param_keys
            .insert(ParamKind::Country, "no-placeholder".to_string());

        assert!(template.validate().is_ok());
        assert!(!template.supports(ParamKind::Country));
    }

    #[test]
    fn test_empty_param_keys_is_valid() {
        let template = TemplateConfig {
            param_field: ParamField::Password,
            ..TemplateConfig::default()
        };
        assert!(template.validate().is_ok());
    }
}
