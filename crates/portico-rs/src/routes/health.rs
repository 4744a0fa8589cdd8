use crate::services::store::StoreClient;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;

/// Liveness endpoint.
///
/// Returns `200 OK` with `{"status":"ok"}`. Never touches the store, so it
/// stays truthful about the process itself even while the store is down.
pub async fn health_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({ "status": "ok" })))
}

/// Readiness endpoint.
///
/// Verifies store connectivity with a round trip; a gate that cannot reach
/// the store cannot dispatch anything and should not receive traffic.
pub async fn readiness_check(store: web::Data<StoreClient>) -> Result<HttpResponse> {
    match store.ping().await {
        Ok(()) => Ok(HttpResponse::Ok().json(json!({ "status": "ready" }))),
        Err(err) => {
            log::warn!("Readiness probe failed: {}", err);
            Ok(HttpResponse::ServiceUnavailable().json(json!({ "status": "unavailable" })))
        }
    }
}

/// Registers the health endpoints.
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check));
}
