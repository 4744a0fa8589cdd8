//! Gate-side job dispatch.
//!
//! One dispatch turns an inbound request into a persisted [`HttpJob`],
//! queues its id for the chosen worker version, and waits for the worker to
//! write the response back. The wait subscribes to the job's completion
//! channel *before* the queue push so a fast worker cannot signal into the
//! void, and polls the repository with exponential backoff as a fallback for
//! lost pub/sub messages.

use crate::models::error::GatewayError;
use crate::models::job::{HttpJob, HttpMethod, JobStatus};
use crate::services::repository::{JobRepository, RepositoryError, Transition};
use crate::services::registry::{RegistryError, RouteRegistry};
use crate::services::store::{StoreClient, Subscription};
use crate::services::strategy::{RouteStrategy, PIN_HEADER};
use crate::utils::keys;
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Header carrying the job deadline (epoch milliseconds) to the worker.
pub const DEADLINE_HEADER: &str = "X-Job-Deadline";

/// Header echoing the request id back to the client.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Tuning for the dispatch wait loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Overall wall-clock deadline for one dispatch.
    pub timeout: Duration,

    /// How long a job may stay PENDING before its target worker is presumed
    /// dead, evicted from the candidate set, and the job re-queued once.
    pub stuck_after: Duration,

    /// First polling interval; doubles up to `poll_max`.
    pub poll_initial: Duration,
    pub poll_max: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            stuck_after: Duration::from_secs(5),
            poll_initial: Duration::from_millis(20),
            poll_max: Duration::from_millis(200),
        }
    }
}

impl DispatchConfig {
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            ..Self::default()
        }
    }
}

/// An inbound request as handed over by the ingress layer.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl DispatchRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The worker-produced response handed back to the ingress layer.
#[derive(Debug, Clone)]
pub struct DispatchReply {
    pub request_id: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Creates jobs, queues them, and awaits their completion.
#[derive(Clone)]
pub struct JobDispatcher {
    store: Arc<StoreClient>,
    repository: Arc<JobRepository>,
    registry: Arc<RouteRegistry>,
    strategy: RouteStrategy,
    config: DispatchConfig,
}

impl JobDispatcher {
    pub fn new(
        store: Arc<StoreClient>,
        repository: Arc<JobRepository>,
        registry: Arc<RouteRegistry>,
        strategy: RouteStrategy,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            repository,
            registry,
            strategy,
            config,
        }
    }

    /// Dispatches one request and waits for its response.
    ///
    /// Never retries transparently: a failed dispatch surfaces as an error
    /// and the caller decides whether to try again under a fresh request id.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReply, GatewayError> {
        let request_id = uuid::Uuid::new_v4().to_string();

        let candidates = self
            .registry
            .match_route(request.method, &request.path)
            .await
            .map_err(|err| self.registry_failure(err, &request_id))?;
        if candidates.is_empty() {
            return Err(GatewayError::NoRoute { request_id });
        }

        let pinned = request.header(PIN_HEADER).map(str::to_string);
        let target = self
            .strategy
            .select(
                request.method,
                &request.path,
                &candidates,
                pinned.as_deref(),
            )
            .await
            .map_err(|_| GatewayError::StoreUnavailable {
                request_id: Some(request_id.clone()),
            })?;
        let Some(target) = target else {
            return Err(GatewayError::NoCandidate { request_id });
        };

        let deadline_ms = Utc::now().timestamp_millis() + self.config.timeout.as_millis() as i64;
        let mut job = HttpJob::new(
            request_id.clone(),
            request.method,
            request.path.clone(),
            request.query,
            request.headers,
            request.body,
            target.clone(),
        );
        job.headers
            .insert(DEADLINE_HEADER.to_string(), deadline_ms.to_string());

        self.repository
            .save(&job)
            .await
            .map_err(|err| self.repository_failure(err, &request_id))?;

        // Subscribe before the push; a completion signal published between
        // push and subscribe would otherwise be lost and leave us polling.
        let subscription = match self
            .store
            .subscribe(&keys::job_done_channel(&request_id))
            .await
        {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(
                    "Completion subscription unavailable for {} ({}); falling back to polling",
                    request_id, err
                );
                None
            }
        };

        self.store
            .queue_push(&keys::queue(&target), &request_id)
            .await
            .map_err(|_| GatewayError::StoreUnavailable {
                request_id: Some(request_id.clone()),
            })?;

        debug!(
            "Dispatched {} {} as job {} to worker {}",
            request.method, request.path, request_id, target
        );

        self.await_completion(request_id, &job, candidates, target, pinned, subscription)
            .await
    }

    async fn await_completion(
        &self,
        request_id: String,
        job: &HttpJob,
        candidates: Vec<String>,
        target: String,
        pinned: Option<String>,
        mut subscription: Option<Subscription>,
    ) -> Result<DispatchReply, GatewayError> {
        let started = Instant::now();
        let mut poll = self.config.poll_initial;
        let mut redispatched = false;

        loop {
            let remaining = self.config.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(self.expire(&request_id).await);
            }

            let wait = poll.min(remaining);
            match subscription.as_mut() {
                // Any message on the channel means "check the job now"; the
                // payload itself carries nothing we do not already know.
                Some(sub) => {
                    sub.next_message(wait).await;
                }
                None => tokio::time::sleep(wait).await,
            }

            let loaded = self
                .repository
                .load(&request_id)
                .await
                .map_err(|err| self.repository_failure(err, &request_id))?;
            let Some(current) = loaded else {
                // The document vanished under us (TTL or explicit delete);
                // nothing left to wait for.
                return Err(GatewayError::DispatchTimeout { request_id });
            };

            match current.status {
                JobStatus::Completed | JobStatus::Failed => {
                    return Ok(reply_from(current));
                }
                JobStatus::Expired => {
                    return Err(GatewayError::DispatchTimeout { request_id });
                }
                JobStatus::Pending
                    if !redispatched && started.elapsed() >= self.config.stuck_after =>
                {
                    redispatched = true;
                    if self
                        .redispatch(job, &candidates, &target, pinned.as_deref())
                        .await
                        .is_some()
                    {
                        poll = self.config.poll_initial;
                    }
                }
                _ => {
                    poll = (poll * 2).min(self.config.poll_max);
                }
            }
        }
    }

    /// Evicts the unresponsive target from the route's candidates and queues
    /// the job id for another candidate. Runs at most once per dispatch; the
    /// job document is left untouched so a merely-slow original worker still
    /// races fairly for the execution claim.
    async fn redispatch(
        &self,
        job: &HttpJob,
        candidates: &[String],
        dead_target: &str,
        pinned: Option<&str>,
    ) -> Option<String> {
        if let Err(err) = self
            .registry
            .evict_candidate(dead_target, job.method, &job.path)
            .await
        {
            warn!("Failed to evict unresponsive worker {}: {}", dead_target, err);
        }

        let remaining: Vec<String> = candidates
            .iter()
            .filter(|c| c.as_str() != dead_target)
            .cloned()
            .collect();
        let selected = self
            .strategy
            .select(job.method, &job.path, &remaining, pinned)
            .await
            .ok()
            .flatten()?;

        if let Err(err) = self
            .store
            .queue_push(&keys::queue(&selected), &job.request_id)
            .await
        {
            warn!(
                "Failed to re-queue stuck job {} for {}: {}",
                job.request_id, selected, err
            );
            return None;
        }

        info!(
            "Job {} stuck on {}; re-dispatched to {}",
            job.request_id, dead_target, selected
        );
        Some(selected)
    }

    /// Marks the job EXPIRED on deadline. The queue entry is left in place;
    /// the worker observes the terminal status on pop and skips it.
    async fn expire(&self, request_id: &str) -> GatewayError {
        match self
            .repository
            .transition(request_id, JobStatus::Expired, |_| {})
            .await
        {
            Ok(Transition::Applied(_)) => {
                info!("Job {} expired at the dispatch deadline", request_id);
            }
            Ok(Transition::Refused(current)) => {
                // The worker finished in the same instant the deadline hit.
                // The deadline still governs the client-facing outcome.
                debug!(
                    "Job {} reached {} as the deadline hit; returning timeout",
                    request_id, current
                );
            }
            Ok(Transition::Missing) => {}
            Err(err) => {
                warn!("Failed to expire job {}: {}", request_id, err);
            }
        }
        GatewayError::DispatchTimeout {
            request_id: request_id.to_string(),
        }
    }

    fn registry_failure(&self, err: RegistryError, request_id: &str) -> GatewayError {
        warn!("Registry lookup failed for {}: {}", request_id, err);
        GatewayError::StoreUnavailable {
            request_id: Some(request_id.to_string()),
        }
    }

    fn repository_failure(&self, err: RepositoryError, request_id: &str) -> GatewayError {
        warn!("Repository access failed for {}: {}", request_id, err);
        GatewayError::StoreUnavailable {
            request_id: Some(request_id.to_string()),
        }
    }
}

fn reply_from(job: HttpJob) -> DispatchReply {
    let status = job.response_status.unwrap_or(500);
    DispatchReply {
        request_id: job.request_id,
        status,
        headers: job.response_headers,
        body: job.response_body,
    }
}
