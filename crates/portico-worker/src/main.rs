//! Portico Worker
//!
//! Long-running worker process for the portico split gateway. On startup it
//! advertises its handlers' routes in the shared store, then consumes its
//! own queue until shut down. Workers need only outbound connectivity to
//! the store — they can run behind NAT, on a laptop, anywhere.
//!
//! The handlers below are working examples: a store-backed counter, an
//! echo endpoint, and a deliberately slow endpoint for exercising dispatch
//! timeouts.

use portico_rs::logs::logger::configure_logger;
use portico_rs::models::job::{HttpJob, HttpMethod};
use portico_rs::models::settings::Settings;
use portico_rs::services::registry::RouteRegistry;
use portico_rs::services::repository::JobRepository;
use portico_rs::services::store::StoreClient;
use portico_rs::services::worker::{HandlerError, HandlerFn, HandlerResponse, Worker};

use clap::Parser;
use futures::FutureExt;
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "portico-worker", disable_version_flag = true)]
#[command(about = "Worker process advertising routes and executing handlers")]
struct Cli {
    /// Worker version identifier used for route advertisement and queue
    /// addressing (default: hostname).
    #[arg(long = "version", env = "WORKER_VERSION", default_value_t = default_version())]
    version: String,
}

fn default_version() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string())
}

#[derive(Deserialize)]
struct CounterRequest {
    name: String,
    #[serde(default = "default_amount")]
    amount: i64,
}

fn default_amount() -> i64 {
    1
}

#[derive(Deserialize)]
struct SlowRequest {
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
}

fn default_delay_ms() -> u64 {
    10_000
}

/// `POST /api/counter/increment` — atomically bumps a named counter in the
/// shared store, so the count survives worker restarts and is consistent
/// across worker versions.
fn counter_handler(store: Arc<StoreClient>) -> HandlerFn {
    Arc::new(move |job: HttpJob| {
        let store = Arc::clone(&store);
        async move {
            let request: CounterRequest = match serde_json::from_slice(&job.body) {
                Ok(request) => request,
                Err(err) => {
                    return Ok(HandlerResponse::json(
                        400,
                        &json!({ "error": "bad_request", "message": err.to_string() }),
                    ));
                }
            };

            let key = format!("counter:{}", request.name);
            let value = store
                .atomic_increment(&key, request.amount)
                .await
                .map_err(|err| HandlerError::new(format!("counter increment failed: {}", err)))?;

            Ok(HandlerResponse::json(
                200,
                &json!({ "name": request.name, "value": value }),
            ))
        }
        .boxed()
    })
}

/// `GET /echo` — reflects the request back; handy for checking which worker
/// version served it via the `X-Served-By` response header.
fn echo_handler() -> HandlerFn {
    Arc::new(|job: HttpJob| {
        async move {
            Ok(HandlerResponse::json(
                200,
                &json!({
                    "method": job.method.as_str(),
                    "path": job.path,
                    "query": job.query,
                    "body": String::from_utf8_lossy(&job.body),
                }),
            ))
        }
        .boxed()
    })
}

/// `POST /slow` — sleeps before answering, for timeout testing. The worker
/// runtime abandons it once the propagated dispatch deadline passes.
fn slow_handler() -> HandlerFn {
    Arc::new(|job: HttpJob| {
        async move {
            let request: SlowRequest =
                serde_json::from_slice(&job.body).unwrap_or(SlowRequest {
                    delay_ms: default_delay_ms(),
                });
            tokio::time::sleep(std::time::Duration::from_millis(request.delay_ms)).await;
            Ok(HandlerResponse::json(
                200,
                &json!({ "slept_ms": request.delay_ms }),
            ))
        }
        .boxed()
    })
}

#[tokio::main]
async fn main() {
    configure_logger();
    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!("Failed to load settings: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = settings.validate() {
        error!("Configuration validation failed: {}", err);
        std::process::exit(1);
    }

    info!(
        "Starting portico-worker v{} as version '{}'",
        env!("CARGO_PKG_VERSION"),
        cli.version
    );

    let store = match StoreClient::connect(&settings.store.url()).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!("Failed to connect to the shared store: {}", err);
            std::process::exit(1);
        }
    };

    let repository = Arc::new(JobRepository::new(Arc::clone(&store)));
    let registry = Arc::new(RouteRegistry::new(Arc::clone(&store)));

    let mut worker = Worker::new(
        cli.version,
        Arc::clone(&store),
        repository,
        registry,
    );
    worker.register_handler(
        HttpMethod::Post,
        "/api/counter/increment",
        counter_handler(Arc::clone(&store)),
    );
    worker.register_handler(HttpMethod::Get, "/echo", echo_handler());
    worker.register_handler(HttpMethod::Post, "/slow", slow_handler());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, draining worker...");
        let _ = shutdown_tx.send(true);
    });

    match worker.run(shutdown_rx).await {
        Ok(()) => info!("Worker stopped gracefully"),
        Err(err) => {
            error!("Worker terminated: {}", err);
            std::process::exit(1);
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
