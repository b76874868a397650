//! Domain-glob routing rules
//!
//! Rules live in a copy-on-write snapshot so request-path lookups never wait
//! on operator edits. The snapshot is kept sorted by precedence and `lookup`
//! returns the first rule whose pattern matches:
//!
//! 1. literal patterns (`www.example.com`) before wildcard patterns;
//! 2. more domain labels before fewer (`*.api.example.com` before `*.example.com`);
//! 3. older rules before newer ones, then by id;
//! 4. the catch-all `*` last.

use std::cmp::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{EgressError, Result};
use crate::models::RoutingRule;

/// Ordered, read-mostly set of routing rules
pub struct RoutingTable {
    rules: ArcSwap<Vec<Arc<RoutingRule>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Replace every rule (used when hydrating from the store)
    pub fn replace(&self, rules: Vec<RoutingRule>) {
        let mut rules: Vec<Arc<RoutingRule>> = rules.into_iter().map(Arc::new).collect();
        rules.sort_by(|a, b| precedence(a, b));
        self.rules.store(Arc::new(rules));
    }

    /// Add a rule, keeping precedence order
    pub fn insert(&self, rule: RoutingRule) {
        let rule = Arc::new(rule);
        self.rules.rcu(|current| {
            let mut next: Vec<Arc<RoutingRule>> = current.iter().cloned().collect();
            next.push(rule.clone());
            next.sort_by(|a, b| precedence(a, b));
            next
        });
    }

    /// Remove a rule by id, returning whether it existed
    pub fn remove(&self, id: Uuid) -> bool {
        let mut removed = false;
        self.rules.rcu(|current| {
            let next: Vec<Arc<RoutingRule>> =
                current.iter().filter(|r| r.id != id).cloned().collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    /// Rules in precedence order
    pub fn list(&self) -> Vec<Arc<RoutingRule>> {
        self.rules.load().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.load().is_empty()
    }

    /// Best rule for `host`, or `None` when nothing matches and there is no catch-all
    pub fn lookup(&self, host: &str) -> Option<Arc<RoutingRule>> {
        let host = normalize_host(host);
        let rules = self.rules.load();
        let matched = rules
            .iter()
            .find(|rule| pattern_matches(&rule.domain_pattern, &host))
            .cloned();

        if let Some(rule) = &matched {
            debug!(host = %host, pattern = %rule.domain_pattern, "Routing rule matched");
        }

        matched
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept `*`, `*.suffix` or a literal host name
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err(EgressError::Configuration(
            "domain_pattern must not be empty".into(),
        ));
    }
    if pattern == "*" {
        return Ok(());
    }

    let suffix = pattern.strip_prefix("*.").unwrap_or(pattern);
    if suffix.contains('*') {
        return Err(EgressError::Configuration(format!(
            "domain_pattern '{}' may only use '*' as a leading label",
            pattern
        )));
    }
    if suffix.split('.').any(|label| label.is_empty()) {
        return Err(EgressError::Configuration(format!(
            "domain_pattern '{}' contains an empty label",
            pattern
        )));
    }

    Ok(())
}

/// `*` matches everything; `*.example.com` matches one or more labels in
/// front of `example.com` but not `example.com` itself; anything else must
/// equal the host.
pub fn pattern_matches(pattern: &str, host: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .strip_suffix(suffix)
            .and_then(|front| front.strip_suffix('.'))
            .map(|front| !front.is_empty())
            .unwrap_or(false),
        None => pattern == host,
    }
}

/// Lower-case, drop a port and a trailing dot
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = if host.starts_with('[') {
        // Bracketed IPv6 literal, optionally followed by a port
        host.split(']').next().unwrap_or(host).trim_start_matches('[')
    } else if host.matches(':').count() == 1 {
        host.split(':').next().unwrap_or(host)
    } else {
        host
    };
    host.trim_end_matches('.').to_lowercase()
}

fn precedence(a: &RoutingRule, b: &RoutingRule) -> Ordering {
    specificity(b)
        .cmp(&specificity(a))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// (not catch-all, literal, label count); larger is more specific
fn specificity(rule: &RoutingRule) -> (bool, bool, usize) {
    let pattern = rule.domain_pattern.as_str();
    if pattern == "*" {
        return (false, false, 0);
    }
    let literal = !pattern.starts_with("*.");
    let labels = pattern.trim_start_matches("*.").split('.').count();
    (true, literal, labels)
}
