//! Durable route registry.
//!
//! Workers advertise `(method, path, worker_version)` triples here; the gate
//! matches incoming requests against them. Everything is persisted in the
//! shared store so a freshly cold-started gate sees the current routes:
//!
//! - `routes:index` — set of all `method|path` entries
//! - `routes:<method>|<path>` — set of worker versions offering the route
//! - `routes:worker:<version>` — reverse index for deregistration
//! - `route:meta:<method>|<path>` — hash of version → registration time
//! - `heartbeat:<version>` — liveness timestamp with a 30 s TTL
//!
//! Writes for one route are serialized through a short-lived store-level
//! lock (`route:lock:<method>|<path>`, set-if-absent with a 2 s TTL). Reads
//! are lock-free and may briefly observe a route mid-registration; callers
//! treat an empty candidate set as "no worker available".

use crate::models::job::HttpMethod;
use crate::models::route::Route;
use crate::services::store::{StoreClient, StoreError};
use crate::utils::keys;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const LOCK_TTL_SECONDS: u64 = 2;
const LOCK_ATTEMPTS: u32 = 10;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Heartbeat key TTL; a worker silent for this long reads as dead.
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Could not acquire registration lock for {entry}")]
    LockContended { entry: String },
}

/// Store-backed multimap from `(method, path)` to candidate worker versions.
#[derive(Clone)]
pub struct RouteRegistry {
    store: Arc<StoreClient>,
}

impl RouteRegistry {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    /// Registers one route for a worker version. Idempotent per triple:
    /// repeating the call leaves exactly one entry. Different versions
    /// advertising the same `(method, path)` accumulate as candidates.
    pub async fn register(
        &self,
        worker_version: &str,
        method: HttpMethod,
        path: &str,
    ) -> Result<(), RegistryError> {
        let route = Route {
            method,
            path: path.to_string(),
            worker_version: worker_version.to_string(),
            registered_at: None,
            last_heartbeat_at: None,
        };
        route.validate().map_err(RegistryError::InvalidRoute)?;

        let entry = keys::route_entry(method, path);
        let _lock = self.acquire_lock(method, path).await?;

        self.store.set_add(&keys::routes_index(), &entry).await?;
        self.store
            .set_add(&keys::route_candidates(method, path), worker_version)
            .await?;
        self.store
            .set_add(&keys::worker_routes(worker_version), &entry)
            .await?;
        self.store
            .hash_set_field(
                &keys::route_meta(method, path),
                worker_version,
                &Utc::now().to_rfc3339(),
            )
            .await?;

        info!("Registered route {} for worker {}", entry, worker_version);
        Ok(())
    }

    /// Removes every route the worker registered, dropping it from each
    /// candidate set and clearing routes where it was the sole candidate.
    pub async fn deregister(&self, worker_version: &str) -> Result<(), RegistryError> {
        let entries = self
            .store
            .set_members(&keys::worker_routes(worker_version))
            .await?;

        for entry in &entries {
            let Some((method, path)) = keys::parse_route_entry(entry) else {
                warn!("Skipping malformed route entry '{}' during deregistration", entry);
                continue;
            };

            let _lock = self.acquire_lock(method, &path).await?;

            let candidates_key = keys::route_candidates(method, &path);
            self.store.set_remove(&candidates_key, worker_version).await?;
            self.store
                .hash_delete_field(&keys::route_meta(method, &path), worker_version)
                .await?;

            if self.store.set_members(&candidates_key).await?.is_empty() {
                self.store.set_remove(&keys::routes_index(), entry).await?;
                self.store.kv_delete(&keys::route_meta(method, &path)).await?;
            }
        }

        self.store
            .kv_delete(&keys::worker_routes(worker_version))
            .await?;
        self.store
            .kv_delete(&keys::heartbeat(worker_version))
            .await?;

        info!(
            "Deregistered worker {} ({} routes)",
            worker_version,
            entries.len()
        );
        Ok(())
    }

    /// Exact-path match. Candidates come back sorted lexicographically so
    /// selection downstream is deterministic; an empty vec means no route.
    pub async fn match_route(
        &self,
        method: HttpMethod,
        path: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let mut candidates = self
            .store
            .set_members(&keys::route_candidates(method, path))
            .await?;
        candidates.sort();
        Ok(candidates)
    }

    /// Every registered route with its metadata, for the `/routes` endpoint.
    pub async fn list_all(&self) -> Result<Vec<Route>, RegistryError> {
        let mut entries = self.store.set_members(&keys::routes_index()).await?;
        entries.sort();

        let mut routes = Vec::new();
        for entry in entries {
            let Some((method, path)) = keys::parse_route_entry(&entry) else {
                debug!("Ignoring malformed route entry '{}'", entry);
                continue;
            };

            let meta = self.store.hash_get_all(&keys::route_meta(method, &path)).await?;
            let mut versions = self
                .store
                .set_members(&keys::route_candidates(method, &path))
                .await?;
            versions.sort();

            for version in versions {
                let registered_at = meta.get(&version).and_then(|raw| parse_timestamp(raw));
                let last_heartbeat_at = self.last_heartbeat(&version).await?;
                routes.push(Route {
                    method,
                    path: path.clone(),
                    worker_version: version,
                    registered_at,
                    last_heartbeat_at,
                });
            }
        }
        Ok(routes)
    }

    /// Refreshes the worker's liveness timestamp.
    pub async fn heartbeat(&self, worker_version: &str) -> Result<(), RegistryError> {
        self.store
            .kv_set(
                &keys::heartbeat(worker_version),
                &Utc::now().to_rfc3339(),
                HEARTBEAT_TTL.as_secs(),
            )
            .await?;
        Ok(())
    }

    /// Last observed heartbeat, `None` once the key has lapsed.
    pub async fn last_heartbeat(
        &self,
        worker_version: &str,
    ) -> Result<Option<DateTime<Utc>>, RegistryError> {
        let raw = self.store.kv_get(&keys::heartbeat(worker_version)).await?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }

    /// Drops one worker version from a route's candidate set without
    /// touching its other routes. Used when the dispatcher decides the
    /// worker is dead.
    pub async fn evict_candidate(
        &self,
        worker_version: &str,
        method: HttpMethod,
        path: &str,
    ) -> Result<(), RegistryError> {
        let _lock = self.acquire_lock(method, path).await?;
        self.store
            .set_remove(&keys::route_candidates(method, path), worker_version)
            .await?;
        self.store
            .set_remove(
                &keys::worker_routes(worker_version),
                &keys::route_entry(method, path),
            )
            .await?;
        warn!(
            "Evicted worker {} from route {}",
            worker_version,
            keys::route_entry(method, path)
        );
        Ok(())
    }

    async fn acquire_lock(
        &self,
        method: HttpMethod,
        path: &str,
    ) -> Result<LockGuard, RegistryError> {
        let key = keys::route_lock(method, path);
        for _ in 0..LOCK_ATTEMPTS {
            let acquired = self
                .store
                .kv_set_nx(&key, "locked", LOCK_TTL_SECONDS)
                .await?;
            if acquired {
                return Ok(LockGuard {
                    store: Arc::clone(&self.store),
                    key,
                });
            }
            tokio::time::sleep(LOCK_RETRY_DELAY).await;
        }
        Err(RegistryError::LockContended {
            entry: keys::route_entry(method, path),
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::<chrono::FixedOffset>::from_str(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Releases the registration lock when dropped.
///
/// Release is best-effort: if the delete never lands, the lock's TTL frees
/// it within two seconds.
struct LockGuard {
    store: Arc<StoreClient>,
    key: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            if let Err(err) = store.kv_delete(&key).await {
                debug!("Failed to release lock {}: {}", key, err);
            }
        });
    }
}
