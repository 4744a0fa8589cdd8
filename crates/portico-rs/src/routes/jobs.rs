use crate::models::error::GatewayError;
use crate::services::repository::JobRepository;
use actix_web::{web, HttpResponse};
use log::warn;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub struct QueueSizeParams {
    worker: Option<String>,
}

/// `GET /api/jobs/{request_id}` — the persisted job, 404 when unknown.
pub async fn get_job(
    path: web::Path<String>,
    repository: web::Data<JobRepository>,
) -> Result<HttpResponse, GatewayError> {
    let request_id = path.into_inner();
    let job = repository.load(&request_id).await.map_err(|err| {
        warn!("Failed to load job {}: {}", request_id, err);
        GatewayError::StoreUnavailable {
            request_id: Some(request_id.clone()),
        }
    })?;

    match job {
        Some(job) => Ok(HttpResponse::Ok().json(job)),
        None => Ok(HttpResponse::NotFound().json(json!({
            "error": "job_not_found",
            "request_id": request_id,
        }))),
    }
}

/// `DELETE /api/jobs/{request_id}` — unconditional removal, 204 either way.
pub async fn delete_job(
    path: web::Path<String>,
    repository: web::Data<JobRepository>,
) -> Result<HttpResponse, GatewayError> {
    let request_id = path.into_inner();
    repository.delete(&request_id).await.map_err(|err| {
        warn!("Failed to delete job {}: {}", request_id, err);
        GatewayError::StoreUnavailable {
            request_id: Some(request_id),
        }
    })?;
    Ok(HttpResponse::NoContent().finish())
}

/// `GET /api/queue/size?worker=<version>` — current queue depth.
pub async fn queue_size(
    params: web::Query<QueueSizeParams>,
    repository: web::Data<JobRepository>,
) -> Result<HttpResponse, GatewayError> {
    let worker = params
        .into_inner()
        .worker
        .filter(|w| !w.is_empty())
        .ok_or_else(|| GatewayError::BadRequest {
            reason: "missing 'worker' query parameter".to_string(),
        })?;

    let size = repository.queue_depth(&worker).await.map_err(|err| {
        warn!("Failed to read queue depth for {}: {}", worker, err);
        GatewayError::StoreUnavailable { request_id: None }
    })?;
    Ok(HttpResponse::Ok().json(json!({ "size": size })))
}

/// Registers the job control-plane endpoints.
pub fn configure_jobs(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/jobs/{request_id}", web::get().to(get_job))
        .route("/api/jobs/{request_id}", web::delete().to(delete_job))
        .route("/api/queue/size", web::get().to(queue_size));
}
