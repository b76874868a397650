//! API request handlers

pub mod auth;
pub mod health;
pub mod provider;
pub mod request;
pub mod routing;
pub mod stats;
