//! API server implementation
//!
//! REST endpoints for operators configuring providers and routing rules,
//! and for callers sending proxied requests.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
