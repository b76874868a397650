//! Outbound proxy routing core
//!
//! This module provides:
//! - Template-driven credential encoding for any gateway vendor
//! - Provider registry, domain routing rules and candidate ranking
//! - Sticky sessions and per-provider health tracking
//! - The retry/failover executor and the router facade over all of it

pub mod executor;
pub mod health;
pub mod registry;
pub mod router;
pub mod routing_table;
pub mod selector;
pub mod session;
pub mod template;
pub mod transport;

pub use executor::{ExecuteRequest, Executed, ExecutorConfig, RequestExecutor};
pub use health::{CooldownPolicy, HealthTracker, Outcome};
pub use registry::ProviderRegistry;
pub use router::{ProxyRouter, RouterStores};
pub use routing_table::RoutingTable;
pub use selector::{Selection, Selector};
pub use session::{Session, SessionManager};
pub use template::{ProxyEndpoint, TemplateEncoder};
pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
