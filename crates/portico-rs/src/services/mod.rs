//! Business logic for the split gateway.
//!
//! Components compose explicitly: the store client is constructed once at
//! startup and handed to everything above it. There are no module-level
//! singletons.
//!
//! - [`store`] - shared-store capability layer (queues, KV, sets, pub/sub)
//! - [`repository`] - HttpJob persistence, claims, guarded transitions
//! - [`registry`] - durable route registry with per-route locking
//! - [`strategy`] - worker selection (round-robin / random / pinned)
//! - [`dispatcher`] - gate-side dispatch and completion wait
//! - [`worker`] - worker-side consumption loop and handler runtime

pub mod dispatcher;
pub mod registry;
pub mod repository;
pub mod store;
pub mod strategy;
pub mod worker;
