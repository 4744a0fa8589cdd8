use crate::models::job::HttpMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Strategy for choosing a worker version out of a route's candidate set.
///
/// # Strategies
///
/// - **RoundRobin**: walks the candidate set in circular order via a cursor
///   persisted in the shared store, so concurrent gate replicas share one
///   rotation.
/// - **Random**: uniform pick over the candidate set, no shared state.
///
/// Version pinning through the `X-Worker-Version` request header is applied
/// as a filter before either strategy runs, not as a strategy of its own.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Round-robin selection (default).
    RoundRobin,
    /// Uniform random selection.
    Random,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl StrategyKind {
    /// Parses the `ROUTE_STRATEGY` environment value.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            other => Err(format!("Unknown route strategy: {}", other)),
        }
    }
}

/// A registered handler advertisement.
///
/// One route means one worker version offering one `(method, path)`. Several
/// worker versions advertising the same pair form the candidate set the
/// strategy picks from.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Route {
    pub method: HttpMethod,

    /// Exact request path this route serves. No parameter placeholders.
    pub path: String,

    /// Worker instance class offering the route, e.g. `v1`.
    pub worker_version: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub registered_at: Option<DateTime<Utc>>,

    /// Last observed heartbeat for the advertising worker. `None` when the
    /// heartbeat key has lapsed, which callers may read as "possibly dead".
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl Route {
    /// Validates a registration request before it touches the store.
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err("Route path must start with '/'".to_string());
        }
        if self.path.contains('|') {
            return Err("Route path must not contain '|'".to_string());
        }
        if self.worker_version.is_empty() {
            return Err("Worker version must not be empty".to_string());
        }
        if self.worker_version.contains(':') || self.worker_version.contains('|') {
            return Err("Worker version must not contain ':' or '|'".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str, version: &str) -> Route {
        Route {
            method: HttpMethod::Get,
            path: path.to_string(),
            worker_version: version.to_string(),
            registered_at: None,
            last_heartbeat_at: None,
        }
    }

    #[test]
    fn valid_route_passes() {
        assert!(route("/echo", "v1").validate().is_ok());
    }

    #[test]
    fn path_must_be_absolute() {
        assert!(route("echo", "v1").validate().is_err());
    }

    #[test]
    fn separator_characters_are_rejected() {
        assert!(route("/a|b", "v1").validate().is_err());
        assert!(route("/echo", "v|1").validate().is_err());
        assert!(route("/echo", "v:1").validate().is_err());
        assert!(route("/echo", "").validate().is_err());
    }

    #[test]
    fn strategy_parses_from_env_values() {
        assert_eq!(StrategyKind::parse("round_robin").unwrap(), StrategyKind::RoundRobin);
        assert_eq!(StrategyKind::parse("RANDOM").unwrap(), StrategyKind::Random);
        assert!(StrategyKind::parse("sticky").is_err());
    }

    #[test]
    fn default_strategy_is_round_robin() {
        assert_eq!(StrategyKind::default(), StrategyKind::RoundRobin);
    }
}
