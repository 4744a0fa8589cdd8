use crate::models::error::GatewayError;
use crate::services::registry::RouteRegistry;
use actix_web::{web, HttpResponse};
use log::warn;

/// `GET /routes` — every registered route with its worker version and
/// heartbeat, straight from the store so any gate replica sees the same
/// list.
pub async fn list_routes(
    registry: web::Data<RouteRegistry>,
) -> Result<HttpResponse, GatewayError> {
    let routes = registry.list_all().await.map_err(|err| {
        warn!("Failed to list routes: {}", err);
        GatewayError::StoreUnavailable { request_id: None }
    })?;
    Ok(HttpResponse::Ok().json(routes))
}

/// Registers the route introspection endpoint.
pub fn configure_registry(cfg: &mut web::ServiceConfig) {
    cfg.route("/routes", web::get().to(list_routes));
}
