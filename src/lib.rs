//! Egress Router - template-driven outbound proxy routing
//!
//! Sends HTTP requests out through third-party proxy gateways that read
//! targeting parameters (country, session id, ...) from the gateway
//! credentials, in either the username or the password field.
//!
//! ## Features
//!
//! - Per-provider credential templates (prefix, separators, `{v}` key formats, country case)
//! - Hostname routing rules (literal and `*.` wildcard) with default constraints
//! - Candidate ranking by priority, health score and cost
//! - Bounded failover across providers with per-attempt timeouts
//! - Sticky sessions pinned per provider and target domain
//! - Operator REST API with JWT auth, PostgreSQL or in-memory storage

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod services;

pub use config::Config;
pub use database::Database;
pub use error::{EgressError, Result};
pub use proxy::ProxyRouter;
