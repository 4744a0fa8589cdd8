use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// HTTP method accepted by the gateway.
///
/// Only the methods a worker can advertise are representable; anything else
/// is rejected at the ingress with a 400 before a job is ever created.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "PATCH")]
    Patch,
    #[serde(rename = "HEAD")]
    Head,
    #[serde(rename = "OPTIONS")]
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(format!("Unsupported HTTP method: {}", other)),
        }
    }
}

/// Lifecycle state of a dispatched job.
///
/// Transitions are monotonic: PENDING → IN_PROGRESS → (COMPLETED | FAILED),
/// with EXPIRED reachable from any non-terminal state. Terminal states are
/// never overwritten.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl JobStatus {
    /// Whether the job has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired
        )
    }

    /// Whether moving from `self` to `next` respects the status machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(
                next,
                JobStatus::InProgress | JobStatus::Expired
            ),
            JobStatus::InProgress => matches!(
                next,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Expired
            ),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// The unit of work exchanged between the gate and a worker.
///
/// One `HttpJob` carries a single inbound request and, once a worker has run
/// the matching handler, its response. Jobs are persisted in the shared store
/// as a single JSON document; request and response bodies are base64-encoded
/// so binary payloads survive the textual encoding.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HttpJob {
    /// Globally unique id assigned at the ingress; echoed back to the client
    /// in the `X-Request-ID` header.
    pub request_id: String,

    pub method: HttpMethod,

    /// Request URI path, e.g. `/api/counter/increment`.
    pub path: String,

    /// Query parameters, multi-valued keys collapsed to the last occurrence.
    #[serde(default)]
    pub query: HashMap<String, String>,

    /// Request headers keyed by their original casing. Lookups go through
    /// [`HttpJob::header`], which compares case-insensitively.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(with = "base64_bytes", default)]
    pub body: Vec<u8>,

    /// Worker version chosen by the route strategy.
    pub target_worker: String,

    pub status: JobStatus,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_status: Option<u16>,

    #[serde(default)]
    pub response_headers: HashMap<String, String>,

    #[serde(with = "base64_bytes", default)]
    pub response_body: Vec<u8>,

    /// Short error tag, set only when `status` is FAILED.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HttpJob {
    /// Creates a fresh PENDING job for an inbound request.
    pub fn new(
        request_id: String,
        method: HttpMethod,
        path: String,
        query: HashMap<String, String>,
        headers: HashMap<String, String>,
        body: Vec<u8>,
        target_worker: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            method,
            path,
            query,
            headers,
            body,
            target_worker,
            status: JobStatus::Pending,
            response_status: None,
            response_headers: HashMap::new(),
            response_body: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Serde adapter encoding byte bodies as standard base64 strings.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
