//! # Portico
//!
//! A split HTTP gateway. A stateless public-facing **gate** accepts inbound
//! requests; private **workers**, running anywhere with outbound
//! connectivity to a shared data store, execute the handlers. Gate and
//! workers never talk directly — requests travel as persisted jobs through
//! durable queues in the store, and responses travel back the same way.
//! The origin therefore never needs to be publicly reachable: the gate can
//! sit on an ephemeral serverless runtime while workers run on a laptop or
//! an on-prem host.
//!
//! ## Request lifecycle
//!
//! ```text
//! Client ──▶ Gate ──▶ Route Registry ──▶ Strategy ──▶ queue:<worker>
//!              │            (store)        (store)        (store)
//!              │                                             │
//!              ◀── response ◀── HttpJob record ◀── Worker ◀──┘
//! ```
//!
//! 1. The gate matches the request against routes workers advertised at
//!    runtime and picks a worker version (round-robin by default).
//! 2. The request is persisted as an [`models::job::HttpJob`] and its id
//!    pushed onto the chosen worker's queue.
//! 3. The worker pops the id, runs the registered handler, writes the
//!    response back into the job, and signals completion.
//! 4. The gate returns the worker's response verbatim, plus `X-Request-ID`.
//!
//! ## Module Organization
//!
//! - [`models`] - data models, the job status machine, errors, settings
//! - [`services`] - store client, repository, registry, strategy,
//!   dispatcher, and the worker runtime
//! - [`routes`] - the gate's HTTP endpoints
//! - [`logs`] - logging configuration
//! - [`utils`] - store key schema helpers

pub mod logs;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
