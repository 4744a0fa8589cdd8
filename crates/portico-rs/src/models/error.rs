use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

/// Errors surfaced at the gate's HTTP boundary.
///
/// Internal store failures are mapped into this taxonomy before leaving the
/// process; clients never see raw store errors. Each variant carries the
/// request id (when one exists) so the failing dispatch can be correlated
/// with the persisted job.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No handler registered for the requested `(method, path)`.
    #[error("No route registered for the requested path")]
    NoRoute { request_id: String },

    /// The route exists but every advertising worker is unavailable, or the
    /// pinned version filter emptied the candidate set.
    #[error("No worker available for the requested route")]
    NoCandidate { request_id: String },

    /// The handler did not complete before the dispatch deadline.
    #[error("Dispatch deadline exceeded")]
    DispatchTimeout { request_id: String },

    /// The shared store stayed unreachable past the retry budget.
    #[error("Shared store unavailable")]
    StoreUnavailable { request_id: Option<String> },

    /// Malformed control-plane or dispatch input.
    #[error("Bad request: {reason}")]
    BadRequest { reason: String },
}

impl GatewayError {
    /// Short machine-readable tag emitted in the JSON error body.
    pub fn tag(&self) -> &'static str {
        match self {
            GatewayError::NoRoute { .. } => "no_route",
            GatewayError::NoCandidate { .. } => "no_candidate",
            GatewayError::DispatchTimeout { .. } => "dispatch_timeout",
            GatewayError::StoreUnavailable { .. } => "store_unavailable",
            GatewayError::BadRequest { .. } => "bad_request",
        }
    }

    fn request_id(&self) -> Option<&str> {
        match self {
            GatewayError::NoRoute { request_id }
            | GatewayError::NoCandidate { request_id }
            | GatewayError::DispatchTimeout { request_id } => Some(request_id),
            GatewayError::StoreUnavailable { request_id } => request_id.as_deref(),
            GatewayError::BadRequest { .. } => None,
        }
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute { .. } => StatusCode::NOT_FOUND,
            GatewayError::NoCandidate { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::DispatchTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::StoreUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self.request_id() {
            Some(id) => json!({ "error": self.tag(), "request_id": id }),
            None => json!({ "error": self.tag() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::error::ResponseError;

    #[test]
    fn variants_map_to_the_documented_status_codes() {
        let id = "req".to_string();
        assert_eq!(
            GatewayError::NoRoute { request_id: id.clone() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::NoCandidate { request_id: id.clone() }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::DispatchTimeout { request_id: id }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::StoreUnavailable { request_id: None }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::BadRequest { reason: "x".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn tags_match_the_error_taxonomy() {
        assert_eq!(
            GatewayError::NoRoute { request_id: "r".into() }.tag(),
            "no_route"
        );
        assert_eq!(
            GatewayError::DispatchTimeout { request_id: "r".into() }.tag(),
            "dispatch_timeout"
        );
    }
}
