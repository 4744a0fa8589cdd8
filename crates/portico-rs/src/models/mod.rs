//! Data models and domain types for the portico gateway.
//!
//! - [`job`] - The persisted `HttpJob` record, its status machine, and the
//!   HTTP method enum shared across components
//! - [`route`] - Route advertisements and the selection strategy kind
//! - [`error`] - The gate-boundary error taxonomy and its HTTP mapping
//! - [`settings`] - Environment-driven runtime configuration

pub mod error;
pub mod job;
pub mod route;
pub mod settings;
