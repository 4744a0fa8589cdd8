//! Portico Gate Server
//!
//! Public-facing ingress for the portico split gateway. The gate owns no
//! handler logic: it matches requests against routes the workers advertised
//! in the shared store, queues a job for the chosen worker, and relays the
//! worker's response.

use portico_rs::logs::logger::configure_logger;
use portico_rs::models::settings::Settings;
use portico_rs::routes::{dispatch, health, jobs, registry};
use portico_rs::services::dispatcher::{DispatchConfig, JobDispatcher};
use portico_rs::services::registry::RouteRegistry;
use portico_rs::services::repository::JobRepository;
use portico_rs::services::store::StoreClient;
use portico_rs::services::strategy::RouteStrategy;

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};
use std::sync::Arc;
use tokio::signal;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

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

    info!("Starting portico-gate v{}", env!("CARGO_PKG_VERSION"));

    // The store connection is the only process-wide resource; every
    // component below borrows it.
    let store = match StoreClient::connect(&settings.store.url()).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!("Failed to connect to the shared store: {}", err);
            std::process::exit(1);
        }
    };

    let repository = JobRepository::new(Arc::clone(&store));
    let route_registry = RouteRegistry::new(Arc::clone(&store));
    let strategy = RouteStrategy::new(settings.strategy, Arc::clone(&store));
    let dispatcher = JobDispatcher::new(
        Arc::clone(&store),
        Arc::new(repository.clone()),
        Arc::new(route_registry.clone()),
        strategy,
        DispatchConfig::with_timeout_ms(settings.dispatch_timeout_ms),
    );

    let port = settings.gate_port;
    info!("Gate listening on 0.0.0.0:{}", port);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(Arc::clone(&store)))
            .app_data(web::Data::new(repository.clone()))
            .app_data(web::Data::new(route_registry.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .wrap(Logger::new(r#"%a "%r" %s %b %T"#))
            // Locally served endpoints must register before the catch-all.
            .configure(health::configure_health)
            .configure(registry::configure_registry)
            .configure(jobs::configure_jobs)
            .configure(dispatch::configure_dispatch)
    })
    .bind(("0.0.0.0", port))?
    .run();

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("Server stopped gracefully"),
                Err(e) => error!("Server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, stopping gate...");
        }
    }

    Ok(())
}
