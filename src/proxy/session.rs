//! Sticky-session allocation
//!
//! Sessions are keyed by (provider, domain). Expiry is checked lazily on
//! access; `sweep_expired` only reclaims memory.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::models::SessionType;

/// Length of minted session ids
const SESSION_ID_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    provider: String,
    domain: String,
}

/// A pinned upstream session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub provider: String,
    pub domain: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Sticky session store
///
/// `get_or_create` runs under the map's shard lock for the key, so
/// concurrent first accesses to the same key observe one id.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<SessionKey, Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Session id for (provider, domain); `None` for rotating traffic
    pub fn get_or_create(
        &self,
        provider: &str,
        domain: &str,
        session_type: SessionType,
        duration: Duration,
    ) -> Option<String> {
        self.get_or_create_at(provider, domain, session_type, duration, Utc::now())
    }

    pub fn get_or_create_at(
        &self,
        provider: &str,
        domain: &str,
        session_type: SessionType,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if session_type == SessionType::Rotating {
            return None;
        }

        let key = SessionKey {
            provider: provider.to_string(),
            domain: domain.to_lowercase(),
        };

        let mut entry = self
            .sessions
            .entry(key)
            .or_insert_with(|| mint(provider, domain, duration, now));

        if entry.is_expired(now) {
            debug!(provider = %provider, domain = %domain, "Sticky session expired, minting a new one");
            *entry = mint(provider, domain, duration, now);
        }

        Some(entry.session_id.clone())
    }

    /// Drop the session for (provider, domain), e.g. after a failed attempt
    pub fn invalidate(&self, provider: &str, domain: &str) -> bool {
        let key = SessionKey {
            provider: provider.to_string(),
            domain: domain.to_lowercase(),
        };
        self.sessions.remove(&key).is_some()
    }

    /// Drop every session bound to a provider
    pub fn remove_provider(&self, provider: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|key, _| key.provider != provider);
        before.saturating_sub(self.sessions.len())
    }

    /// Remove expired sessions, returning how many were dropped
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        before.saturating_sub(self.sessions.len())
    }

    /// Unexpired sessions held for a provider
    pub fn active_for(&self, provider: &str, now: DateTime<Utc>) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.key().provider == provider && !entry.is_expired(now))
            .count()
    }

    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn get(&self, provider: &str, domain: &str) -> Option<Session> {
        let key = SessionKey {
            provider: provider.to_string(),
            domain: domain.to_lowercase(),
        };
        self.sessions.get(&key).map(|s| s.clone())
    }
}

fn mint(provider: &str, domain: &str, duration: Duration, now: DateTime<Utc>) -> Session {
    let session_id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect();
    let lifetime = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());

    Session {
        provider: provider.to_string(),
        domain: domain.to_lowercase(),
        session_id,
        created_at: now,
        duration_secs: duration.as_secs(),
        expires_at: now + lifetime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    #[test]
    fn test_rotating_has_no_session() {
        let manager = SessionManager::new();
        assert!(manager
            .get_or_create("p1", "example.com", SessionType::Rotating, TEN_MINUTES)
            .is_none());
        assert_eq!(manager.active_count(Utc::now()), 0);
    }

    #[test]
    fn test_sticky_session_reused_until_expiry() {
        let manager = SessionManager::new();
        let now = Utc::now();

        let first = manager
            .get_or_create_at("p1", "example.com", SessionType::Sticky, TEN_MINUTES, now)
            .unwrap();
        assert_eq!(first.len(), SESSION_ID_LEN);

        let later = now + chrono::Duration::minutes(5);
        let again = manager
            .get_or_create_at("p1", "Example.com", SessionType::Sticky, TEN_MINUTES, later)
            .unwrap();
        assert_eq!(first, again);

        let expired = now + chrono::Duration::minutes(11);
        let fresh = manager
            .get_or_create_at("p1", "example.com", SessionType::Sticky, TEN_MINUTES, expired)
            .unwrap();
        assert_ne!(first, fresh);

        let session = manager.get("p1", "example.com").unwrap();
        assert_eq!(session.created_at, expired);
    }

    #[test]
    fn test_sessions_keyed_by_provider_and_domain() {
        let manager = SessionManager::new();
        let a = manager
            .get_or_create("p1", "a.com", SessionType::Sticky, TEN_MINUTES)
            .unwrap();
        let b = manager
            .get_or_create("p2", "a.com", SessionType::Sticky, TEN_MINUTES)
            .unwrap();
        let c = manager
            .get_or_create("p1", "b.com", SessionType::Sticky, TEN_MINUTES)
            .unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(manager.active_for("p1", Utc::now()), 2);
    }

    #[test]
    fn test_invalidate_and_remove_provider() {
        let manager = SessionManager::new();
        let first = manager
            .get_or_create("p1", "a.com", SessionType::Sticky, TEN_MINUTES)
            .unwrap();
        manager.get_or_create("p1", "b.com", SessionType::Sticky, TEN_MINUTES);
        manager.get_or_create("p2", "a.com", SessionType::Sticky, TEN_MINUTES);

        assert!(manager.invalidate("p1", "a.com"));
        let replacement = manager
            .get_or_create("p1", "a.com", SessionType::Sticky, TEN_MINUTES)
            .unwrap();
        assert_ne!(first, replacement);

        assert_eq!(manager.remove_provider("p1"), 2);
        assert_eq!(manager.active_count(Utc::now()), 1);
    }

    #[test]
    fn test_sweep_expired() {
        let manager = SessionManager::new();
        let now = Utc::now();
        manager.get_or_create_at("p1", "a.com", SessionType::Sticky, Duration::from_secs(60), now);
        manager.get_or_create_at("p1", "b.com", SessionType::Sticky, TEN_MINUTES, now);

        let removed = manager.sweep_expired(now + chrono::Duration::minutes(2));
        assert_eq!(removed, 1);
        assert!(manager.get("p1", "a.com").is_none());
        assert!(manager.get("p1", "b.com").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_yields_one_id() {
        let manager = Arc::new(SessionManager::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .get_or_create("p1", "example.com", SessionType::Sticky, TEN_MINUTES)
                        .unwrap()
                })
            })
            .collect();

        let ids: Vec<String> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(ids.iter().all(|id| id == &ids[0]));
    }
}
