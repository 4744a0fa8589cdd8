use crate::models::error::GatewayError;
use crate::models::job::HttpMethod;
use crate::services::dispatcher::{DispatchRequest, JobDispatcher, REQUEST_ID_HEADER};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use std::collections::HashMap;
use std::str::FromStr;

/// Headers that must not be copied from the worker response verbatim; the
/// HTTP layer computes them itself.
const SKIPPED_RESPONSE_HEADERS: [&str; 3] = ["content-length", "connection", "transfer-encoding"];

/// The catch-all dispatch entry.
///
/// Every path not claimed by a locally served endpoint lands here and is
/// forwarded through the store to a worker.
pub async fn dispatch_entry(
    req: HttpRequest,
    body: web::Bytes,
    dispatcher: web::Data<JobDispatcher>,
) -> Result<HttpResponse, GatewayError> {
    let request = build_request(&req, body)?;

    // The dispatch runs detached so an abandoned client connection cannot
    // cancel the deadline bookkeeping; the task still marks the job expired
    // and the worker tolerates the terminal status on pop.
    let dispatcher = dispatcher.get_ref().clone();
    let reply = tokio::spawn(async move { dispatcher.dispatch(request).await })
        .await
        .map_err(|_| GatewayError::StoreUnavailable { request_id: None })??;

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = HttpResponse::build(status);
    for (name, value) in &reply.headers {
        if SKIPPED_RESPONSE_HEADERS
            .iter()
            .any(|skip| name.eq_ignore_ascii_case(skip))
        {
            continue;
        }
        builder.insert_header((name.as_str(), value.as_str()));
    }
    builder.insert_header((REQUEST_ID_HEADER, reply.request_id.as_str()));
    Ok(builder.body(reply.body))
}

fn build_request(req: &HttpRequest, body: web::Bytes) -> Result<DispatchRequest, GatewayError> {
    let method =
        HttpMethod::from_str(req.method().as_str()).map_err(|reason| GatewayError::BadRequest {
            reason,
        })?;

    let query = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .map_err(|_| GatewayError::BadRequest {
            reason: "malformed query string".to_string(),
        })?
        .into_inner();

    let mut headers = HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    Ok(DispatchRequest {
        method,
        path: req.path().to_string(),
        query,
        headers,
        body: body.to_vec(),
    })
}

/// Registers the dispatch catch-all with the same payload limits the rest of
/// the gate enforces.
pub fn configure_dispatch(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(1024 * 1024)) // 1MB payload limit
        .app_data(web::JsonConfig::default().limit(1024 * 1024))
        .service(web::resource("/{tail:.*}").to(dispatch_entry));
}
