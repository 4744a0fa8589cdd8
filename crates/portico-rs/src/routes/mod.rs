//! HTTP route handlers for the gate.
//!
//! The gate serves a small allow-list of local endpoints — health probes,
//! route introspection, job control-plane — and forwards everything else
//! through [`dispatch`]. Registration order matters: local routes are
//! configured before the catch-all so they are matched first.
//!
//! - [`health`] - `/health` and `/ready`
//! - [`registry`] - `/routes` introspection
//! - [`jobs`] - `/api/jobs/*` and `/api/queue/size`
//! - [`dispatch`] - the catch-all store-mediated dispatch entry

pub mod dispatch;
pub mod health;
pub mod jobs;
pub mod registry;
