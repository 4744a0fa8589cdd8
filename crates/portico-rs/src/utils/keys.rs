//! Store key and channel naming.
//!
//! Every key the system touches is assembled here so the schema lives in one
//! place. `|` separates method from path inside a route entry; worker
//! versions and paths are validated against containing the separator before
//! registration.

use crate::models::job::HttpMethod;
use std::str::FromStr;

/// `httpjob:<request_id>` — the persisted job document.
pub fn job(request_id: &str) -> String {
    format!("httpjob:{}", request_id)
}

/// `jobclaim:<request_id>` — set-if-absent claim taken before a worker moves
/// a job to IN_PROGRESS. Keeps a re-dispatched job single-execution.
pub fn job_claim(request_id: &str) -> String {
    format!("jobclaim:{}", request_id)
}

/// `queue:<worker_version>` — per-worker-version FIFO of request ids.
pub fn queue(worker_version: &str) -> String {
    format!("queue:{}", worker_version)
}

/// `jobdone:<request_id>` — pub/sub channel signalling completion.
pub fn job_done_channel(request_id: &str) -> String {
    format!("jobdone:{}", request_id)
}

/// `routes:index` — set of all registered `method|path` entries.
pub fn routes_index() -> String {
    "routes:index".to_string()
}

/// `routes:<method>|<path>` — set of worker versions offering the route.
pub fn route_candidates(method: HttpMethod, path: &str) -> String {
    format!("routes:{}", route_entry(method, path))
}

/// `routes:worker:<version>` — reverse index of `method|path` entries one
/// worker registered, used for deregistration.
pub fn worker_routes(worker_version: &str) -> String {
    format!("routes:worker:{}", worker_version)
}

/// `route:meta:<method>|<path>` — hash of worker version → registration time.
pub fn route_meta(method: HttpMethod, path: &str) -> String {
    format!("route:meta:{}", route_entry(method, path))
}

/// `route:cursor:<method>|<path>` — round-robin cursor.
pub fn route_cursor(method: HttpMethod, path: &str) -> String {
    format!("route:cursor:{}", route_entry(method, path))
}

/// `route:lock:<method>|<path>` — short-lived registration mutex.
pub fn route_lock(method: HttpMethod, path: &str) -> String {
    format!("route:lock:{}", route_entry(method, path))
}

/// `heartbeat:<worker_version>` — liveness timestamp with a short TTL.
pub fn heartbeat(worker_version: &str) -> String {
    format!("heartbeat:{}", worker_version)
}

/// `<method>|<path>` — the route entry stored in index sets.
pub fn route_entry(method: HttpMethod, path: &str) -> String {
    format!("{}|{}", method, path)
}

/// Splits a `method|path` entry back into its parts.
pub fn parse_route_entry(entry: &str) -> Option<(HttpMethod, String)> {
    let (method, path) = entry.split_once('|')?;
    let method = HttpMethod::from_str(method).ok()?;
    if path.is_empty() {
        return None;
    }
    Some((method, path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_store_schema() {
        assert_eq!(job("abc"), "httpjob:abc");
        assert_eq!(queue("v1"), "queue:v1");
        assert_eq!(job_done_channel("abc"), "jobdone:abc");
        assert_eq!(routes_index(), "routes:index");
        assert_eq!(route_candidates(HttpMethod::Get, "/echo"), "routes:GET|/echo");
        assert_eq!(worker_routes("v1"), "routes:worker:v1");
        assert_eq!(route_cursor(HttpMethod::Get, "/echo"), "route:cursor:GET|/echo");
        assert_eq!(route_lock(HttpMethod::Get, "/echo"), "route:lock:GET|/echo");
        assert_eq!(heartbeat("v1"), "heartbeat:v1");
    }

    #[test]
    fn route_entries_round_trip() {
        let entry = route_entry(HttpMethod::Post, "/api/counter/increment");
        assert_eq!(entry, "POST|/api/counter/increment");

        let (method, path) = parse_route_entry(&entry).unwrap();
        assert_eq!(method, HttpMethod::Post);
        assert_eq!(path, "/api/counter/increment");
    }

    #[test]
    fn malformed_entries_are_rejected() {
        assert!(parse_route_entry("GET").is_none());
        assert!(parse_route_entry("BREW|/coffee").is_none());
        assert!(parse_route_entry("GET|").is_none());
    }
}
