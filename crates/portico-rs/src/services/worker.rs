//! Worker-side runtime: route advertisement and the job consumption loop.
//!
//! A worker owns one queue (`queue:<version>`) and drains it sequentially:
//! pop a request id, load the job, claim it, run the matching handler, write
//! the response back, signal completion. Handler failures are recorded on
//! the job and never break the loop; only the store staying unreachable past
//! the retry budget is fatal.

use crate::models::job::{HttpJob, HttpMethod, JobStatus};
use crate::services::dispatcher::DEADLINE_HEADER;
use crate::services::registry::{RegistryError, RouteRegistry};
use crate::services::repository::{JobRepository, RepositoryError, Transition};
use crate::services::store::StoreClient;
use crate::utils::keys;
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Response header naming the worker version that served the request.
pub const SERVED_BY_HEADER: &str = "X-Served-By";

/// Consecutive store failures tolerated before the loop gives up.
const MAX_STORE_FAILURES: u32 = 5;

/// Backoff cap between store failure retries.
const FAILURE_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// What a handler produces on success. Any status is allowed, including
/// 4xx/5xx for application-level failures.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HandlerResponse {
    /// Convenience constructor for JSON replies.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]),
            body: value.to_string().into_bytes(),
        }
    }
}

/// A handler-level failure; recorded on the job as FAILED with a 500.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Uniform handler signature: the job in, a response (or failure) out.
pub type HandlerFn =
    Arc<dyn Fn(HttpJob) -> BoxFuture<'static, Result<HandlerResponse, HandlerError>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Shared store unavailable after {failures} consecutive failures")]
    StoreUnavailable { failures: u32 },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A long-running worker consuming jobs for one version.
pub struct Worker {
    version: String,
    store: Arc<StoreClient>,
    repository: Arc<JobRepository>,
    registry: Arc<RouteRegistry>,
    handlers: AHashMap<(HttpMethod, String), HandlerFn>,
    pop_timeout: Duration,
}

impl Worker {
    pub fn new(
        version: impl Into<String>,
        store: Arc<StoreClient>,
        repository: Arc<JobRepository>,
        registry: Arc<RouteRegistry>,
    ) -> Self {
        Self {
            version: version.into(),
            store,
            repository,
            registry,
            handlers: AHashMap::new(),
            pop_timeout: Duration::from_secs(1),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Registers a handler for one `(method, path)`. Later registrations for
    /// the same pair replace earlier ones; advertisement happens at `run`.
    pub fn register_handler(&mut self, method: HttpMethod, path: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert((method, path.into()), handler);
    }

    /// Advertises all handlers, then consumes the queue until shutdown.
    ///
    /// On shutdown the worker finishes the in-flight job, deregisters its
    /// routes, and returns. The caller maps the error case to a non-zero
    /// exit code.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        for (method, path) in self.handlers.keys() {
            self.registry.register(&self.version, *method, path).await?;
        }
        if let Err(err) = self.registry.heartbeat(&self.version).await {
            warn!("Initial heartbeat failed: {}", err);
        }

        info!(
            "Worker {} consuming queue with {} registered route(s)",
            self.version,
            self.handlers.len()
        );

        let queue = keys::queue(&self.version);
        let mut consecutive_failures: u32 = 0;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            match self.store.queue_pop_blocking(&queue, self.pop_timeout).await {
                Ok(Some(request_id)) => {
                    consecutive_failures = 0;
                    if let Err(err) = self.process(&request_id).await {
                        error!("Failed to process job {}: {}", request_id, err);
                    }
                }
                Ok(None) => {
                    consecutive_failures = 0;
                    if let Err(err) = self.registry.heartbeat(&self.version).await {
                        warn!("Heartbeat failed: {}", err);
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_STORE_FAILURES {
                        error!(
                            "Store unreachable after {} attempts, giving up: {}",
                            consecutive_failures, err
                        );
                        return Err(WorkerError::StoreUnavailable {
                            failures: consecutive_failures,
                        });
                    }
                    let backoff = Duration::from_secs(1 << consecutive_failures.min(5))
                        .min(FAILURE_BACKOFF_MAX);
                    warn!(
                        "Queue pop failed ({} consecutive): {}; backing off {:?}",
                        consecutive_failures, err, backoff
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!("Worker {} shutting down, deregistering routes", self.version);
        self.registry.deregister(&self.version).await?;
        Ok(())
    }

    /// Executes one popped request id end to end.
    async fn process(&self, request_id: &str) -> Result<(), RepositoryError> {
        let Some(job) = self.repository.load(request_id).await? else {
            debug!("Job {} already gone, skipping", request_id);
            return Ok(());
        };

        // A job expired by the dispatcher (or any non-PENDING state) is
        // dropped silently; the queue entry was never retractable.
        if job.status != JobStatus::Pending {
            debug!(
                "Job {} popped with status {}, skipping",
                request_id, job.status
            );
            return Ok(());
        }

        // Re-dispatch can put one id on two queues; the claim decides which
        // worker executes.
        if !self.repository.claim(request_id, &self.version).await? {
            debug!("Job {} claimed by another worker, skipping", request_id);
            return Ok(());
        }

        let version = self.version.clone();
        let claimed = self
            .repository
            .transition(request_id, JobStatus::InProgress, |job| {
                job.target_worker = version;
            })
            .await?;
        let job = match claimed {
            Transition::Applied(job) => job,
            Transition::Refused(status) => {
                debug!(
                    "Job {} moved to {} before execution, skipping",
                    request_id, status
                );
                return Ok(());
            }
            Transition::Missing => return Ok(()),
        };

        let outcome = self.execute(job).await;
        self.finish(request_id, outcome).await
    }

    /// Runs the handler under the propagated deadline, catching panics.
    async fn execute(&self, job: HttpJob) -> ExecutionOutcome {
        let Some(handler) = self.handlers.get(&(job.method, job.path.clone())) else {
            // Candidate sets only contain advertising versions, so this is a
            // registry/queue mismatch rather than a routine miss.
            warn!(
                "No handler for {} {} on worker {}",
                job.method, job.path, self.version
            );
            return ExecutionOutcome::Failed {
                error: "no_handler".to_string(),
                message: "worker has no handler for the route".to_string(),
            };
        };

        let budget = match deadline_budget(&job) {
            Some(budget) => budget,
            None => {
                debug!("Job {} deadline already passed, abandoning", job.request_id);
                return ExecutionOutcome::DeadlineExceeded;
            }
        };

        let invocation = AssertUnwindSafe((handler)(job)).catch_unwind();
        match tokio::time::timeout(budget, invocation).await {
            Ok(Ok(Ok(response))) => ExecutionOutcome::Completed(response),
            Ok(Ok(Err(err))) => ExecutionOutcome::Failed {
                error: "handler_error".to_string(),
                message: err.message,
            },
            Ok(Err(_panic)) => ExecutionOutcome::Failed {
                error: "handler_panic".to_string(),
                message: "handler panicked".to_string(),
            },
            Err(_elapsed) => ExecutionOutcome::DeadlineExceeded,
        }
    }

    /// Persists the terminal state and signals the dispatcher.
    async fn finish(
        &self,
        request_id: &str,
        outcome: ExecutionOutcome,
    ) -> Result<(), RepositoryError> {
        let version = self.version.clone();
        let transition = match outcome {
            ExecutionOutcome::Completed(response) => {
                self.repository
                    .transition(request_id, JobStatus::Completed, move |job| {
                        job.response_status = Some(response.status);
                        job.response_headers = response.headers;
                        job.response_headers
                            .insert(SERVED_BY_HEADER.to_string(), version);
                        job.response_body = response.body;
                    })
                    .await?
            }
            ExecutionOutcome::Failed { error, message } => {
                warn!("Job {} failed: {} ({})", request_id, error, message);
                let body = serde_json::json!({ "error": error, "message": message });
                self.repository
                    .transition(request_id, JobStatus::Failed, move |job| {
                        job.error = Some(error);
                        job.response_status = Some(500);
                        job.response_headers = HashMap::from([
                            ("Content-Type".to_string(), "application/json".to_string()),
                            (SERVED_BY_HEADER.to_string(), version),
                        ]);
                        job.response_body = body.to_string().into_bytes();
                    })
                    .await?
            }
            ExecutionOutcome::DeadlineExceeded => {
                self.repository
                    .transition(request_id, JobStatus::Expired, |_| {})
                    .await?
            }
        };

        match transition {
            Transition::Applied(job) => {
                debug!("Job {} finished as {}", request_id, job.status);
                if let Err(err) = self
                    .store
                    .publish(&keys::job_done_channel(request_id), request_id)
                    .await
                {
                    // The dispatcher's polling fallback picks the result up.
                    debug!("Completion publish for {} failed: {}", request_id, err);
                }
            }
            Transition::Refused(status) => {
                debug!(
                    "Result for job {} discarded; job already {}",
                    request_id, status
                );
            }
            Transition::Missing => {
                debug!("Job {} vanished before its result was written", request_id);
            }
        }
        Ok(())
    }
}

enum ExecutionOutcome {
    Completed(HandlerResponse),
    Failed { error: String, message: String },
    DeadlineExceeded,
}

/// Remaining execution budget from the job's deadline header.
///
/// Jobs without the header get a generous default rather than unlimited
/// time, so a stray handler cannot wedge the loop. `None` means the deadline
/// has already passed.
fn deadline_budget(job: &HttpJob) -> Option<Duration> {
    const FALLBACK: Duration = Duration::from_secs(60);

    let Some(deadline_ms) = job.header(DEADLINE_HEADER).and_then(|v| v.parse::<i64>().ok())
    else {
        return Some(FALLBACK);
    };

    let remaining_ms = deadline_ms - Utc::now().timestamp_millis();
    if remaining_ms <= 0 {
        None
    } else {
        Some(Duration::from_millis(remaining_ms as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn job_with_deadline(deadline_ms: i64) -> HttpJob {
        let mut headers = HashMap::new();
        headers.insert(DEADLINE_HEADER.to_string(), deadline_ms.to_string());
        HttpJob::new(
            "req".to_string(),
            HttpMethod::Get,
            "/echo".to_string(),
            HashMap::new(),
            headers,
            Vec::new(),
            "v1".to_string(),
        )
    }

    #[test]
    fn expired_deadline_yields_no_budget() {
        let job = job_with_deadline(Utc::now().timestamp_millis() - 1_000);
        assert!(deadline_budget(&job).is_none());
    }

    #[test]
    fn future_deadline_yields_remaining_budget() {
        let job = job_with_deadline(Utc::now().timestamp_millis() + 10_000);
        let budget = deadline_budget(&job).unwrap();
        assert!(budget <= Duration::from_secs(10));
        assert!(budget > Duration::from_secs(8));
    }

    #[test]
    fn missing_deadline_falls_back_to_default() {
        let job = HttpJob::new(
            "req".to_string(),
            HttpMethod::Get,
            "/echo".to_string(),
            HashMap::new(),
            HashMap::new(),
            Vec::new(),
            "v1".to_string(),
        );
        assert_eq!(deadline_budget(&job), Some(Duration::from_secs(60)));
    }

    #[test]
    fn json_response_sets_content_type() {
        let response = HandlerResponse::json(200, &serde_json::json!({"ok": true}));
        assert_eq!(response.status, 200);
        assert_eq!(
            response.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(response.body, br#"{"ok":true}"#);
    }
}
