//! Wire-format tests for the persisted job document.

use portico_rs::models::job::{HttpJob, HttpMethod, JobStatus};
use serde_json::json;

#[test]
fn job_documents_from_the_store_deserialize_with_missing_optionals() {
    // A freshly dispatched job has no response fields yet; the document in
    // the store simply omits them.
    let document = json!({
        "request_id": "3f2c9a",
        "method": "GET",
        "path": "/echo",
        "query": {"a": "1"},
        "headers": {"X-Worker-Version": "v2"},
        "body": "",
        "target_worker": "v2",
        "status": "PENDING",
        "response_headers": {},
        "response_body": "",
        "created_at": "2026-03-01T10:00:00Z",
        "updated_at": "2026-03-01T10:00:00Z"
    });

    let job: HttpJob = serde_json::from_value(document).unwrap();
    assert_eq!(job.method, HttpMethod::Get);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.response_status, None);
    assert_eq!(job.error, None);
    assert!(job.body.is_empty());
    assert_eq!(job.header("x-worker-version"), Some("v2"));
}

#[test]
fn completed_jobs_carry_response_fields() {
    let document = json!({
        "request_id": "3f2c9a",
        "method": "POST",
        "path": "/api/counter/increment",
        "query": {},
        "headers": {},
        "body": "eyJuYW1lIjoidmlzaXRvcnMifQ==",
        "target_worker": "v1",
        "status": "COMPLETED",
        "response_status": 200,
        "response_headers": {"X-Served-By": "v1"},
        "response_body": "eyJ2YWx1ZSI6MX0=",
        "created_at": "2026-03-01T10:00:00Z",
        "updated_at": "2026-03-01T10:00:01Z"
    });

    let job: HttpJob = serde_json::from_value(document).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.response_status, Some(200));
    assert_eq!(job.body, br#"{"name":"visitors"}"#);
    assert_eq!(job.response_body, br#"{"value":1}"#);
    assert_eq!(
        job.response_headers.get("X-Served-By").map(String::as_str),
        Some("v1")
    );
}

#[test]
fn unknown_status_values_are_rejected() {
    let document = json!({
        "request_id": "x",
        "method": "GET",
        "path": "/echo",
        "body": "",
        "target_worker": "v1",
        "status": "RUNNING",
        "response_body": "",
        "created_at": "2026-03-01T10:00:00Z",
        "updated_at": "2026-03-01T10:00:00Z"
    });
    assert!(serde_json::from_value::<HttpJob>(document).is_err());
}

#[test]
fn invalid_base64_bodies_are_rejected() {
    let document = json!({
        "request_id": "x",
        "method": "GET",
        "path": "/echo",
        "body": "not base64!!!",
        "target_worker": "v1",
        "status": "PENDING",
        "response_body": "",
        "created_at": "2026-03-01T10:00:00Z",
        "updated_at": "2026-03-01T10:00:00Z"
    });
    assert!(serde_json::from_value::<HttpJob>(document).is_err());
}

#[test]
fn serialized_jobs_omit_absent_response_status() {
    let job = HttpJob::new(
        "id".to_string(),
        HttpMethod::Get,
        "/echo".to_string(),
        Default::default(),
        Default::default(),
        Vec::new(),
        "v1".to_string(),
    );
    let value = serde_json::to_value(&job).unwrap();
    assert!(value.get("response_status").is_none());
    assert!(value.get("error").is_none());
    assert_eq!(value["status"], json!("PENDING"));
}
