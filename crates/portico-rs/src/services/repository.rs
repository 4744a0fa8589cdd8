//! Persistence for [`HttpJob`] records.
//!
//! Jobs live in the shared store as one JSON document per request id with a
//! default five-minute TTL. The repository also owns the two coordination
//! primitives layered on top of plain persistence: the set-if-absent claim a
//! worker must win before executing a job, and guarded status transitions
//! that refuse to overwrite a terminal state.

use crate::models::job::{HttpJob, JobStatus};
use crate::services::store::{StoreClient, StoreError};
use crate::utils::keys;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Default job TTL.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to encode or decode job {request_id}: {source}")]
    Codec {
        request_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of a guarded status transition.
#[derive(Debug)]
pub enum Transition {
    /// The transition was applied and persisted; carries the updated job.
    Applied(HttpJob),
    /// The job's current status does not permit the transition.
    Refused(JobStatus),
    /// No job exists under the request id (deleted or TTL-expired).
    Missing,
}

/// Stores, loads, and transitions jobs keyed by request id.
#[derive(Clone)]
pub struct JobRepository {
    store: Arc<StoreClient>,
    ttl: Duration,
}

impl JobRepository {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self::with_ttl(store, DEFAULT_JOB_TTL)
    }

    pub fn with_ttl(store: Arc<StoreClient>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Persists the job under its request id, refreshing the TTL.
    pub async fn save(&self, job: &HttpJob) -> Result<(), RepositoryError> {
        let encoded = serde_json::to_string(job).map_err(|source| RepositoryError::Codec {
            request_id: job.request_id.clone(),
            source,
        })?;
        self.store
            .kv_set(&keys::job(&job.request_id), &encoded, self.ttl.as_secs())
            .await?;
        Ok(())
    }

    pub async fn load(&self, request_id: &str) -> Result<Option<HttpJob>, RepositoryError> {
        let encoded = self.store.kv_get(&keys::job(request_id)).await?;
        match encoded {
            Some(encoded) => {
                let job =
                    serde_json::from_str(&encoded).map_err(|source| RepositoryError::Codec {
                        request_id: request_id.to_string(),
                        source,
                    })?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Removes the job and its claim unconditionally.
    pub async fn delete(&self, request_id: &str) -> Result<(), RepositoryError> {
        self.store.kv_delete(&keys::job(request_id)).await?;
        self.store.kv_delete(&keys::job_claim(request_id)).await?;
        Ok(())
    }

    /// Attempts to claim a job for execution.
    ///
    /// Exactly one caller wins per request id. Required because stuck-job
    /// re-dispatch can leave the same id on two queues; the claim keeps the
    /// handler single-execution.
    pub async fn claim(&self, request_id: &str, owner: &str) -> Result<bool, RepositoryError> {
        let claimed = self
            .store
            .kv_set_nx(&keys::job_claim(request_id), owner, self.ttl.as_secs())
            .await?;
        Ok(claimed)
    }

    /// Applies a guarded status transition.
    ///
    /// Loads the job, checks the status machine, then lets `mutate` fill in
    /// response fields before the updated record is written back. The write
    /// is read-modify-write, not compare-and-swap: the claim in
    /// [`JobRepository::claim`] is what serializes competing executors, and
    /// the guard here keeps late writers from clobbering terminal states.
    pub async fn transition<F>(
        &self,
        request_id: &str,
        next: JobStatus,
        mutate: F,
    ) -> Result<Transition, RepositoryError>
    where
        F: FnOnce(&mut HttpJob),
    {
        let mut job = match self.load(request_id).await? {
            Some(job) => job,
            None => return Ok(Transition::Missing),
        };

        if !job.status.can_transition_to(next) {
            return Ok(Transition::Refused(job.status));
        }

        job.status = next;
        job.updated_at = Utc::now();
        mutate(&mut job);
        self.save(&job).await?;
        Ok(Transition::Applied(job))
    }

    /// Depth of a worker version's queue.
    pub async fn queue_depth(&self, worker_version: &str) -> Result<i64, RepositoryError> {
        let depth = self.store.queue_len(&keys::queue(worker_version)).await?;
        Ok(depth)
    }
}
