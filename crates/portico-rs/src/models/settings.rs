use crate::models::route::StrategyKind;
use serde::{Deserialize, Serialize};

fn default_store_host() -> String {
    "127.0.0.1".to_string()
}

fn default_store_port() -> u16 {
    6379
}

fn default_gate_port() -> u16 {
    9000
}

fn default_dispatch_timeout_ms() -> u64 {
    30_000
}

/// Connection settings for the shared data store.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreSettings {
    #[serde(default = "default_store_host")]
    pub host: String,

    #[serde(default = "default_store_port")]
    pub port: u16,

    /// Logical database index.
    #[serde(default)]
    pub db: u32,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub use_tls: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            host: default_store_host(),
            port: default_store_port(),
            db: 0,
            password: None,
            use_tls: false,
        }
    }
}

impl StoreSettings {
    /// Builds the connection URL the store client dials.
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "rediss" } else { "redis" };
        let auth = match &self.password {
            Some(password) => format!(":{}@", password),
            None => String::new(),
        };
        format!("{}://{}{}:{}/{}", scheme, auth, self.host, self.port, self.db)
    }
}

/// Runtime configuration shared by the gate and worker binaries.
///
/// Everything is environment-driven; there is no configuration file. Missing
/// variables fall back to the documented defaults, malformed values are a
/// startup error.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default = "default_gate_port")]
    pub gate_port: u16,

    /// Overall dispatch deadline in milliseconds.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    #[serde(default)]
    pub strategy: StrategyKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            gate_port: default_gate_port(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            strategy: StrategyKind::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

impl Settings {
    /// Loads settings from process environment variables.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads settings through an arbitrary variable lookup.
    ///
    /// The indirection keeps parsing testable without mutating process-wide
    /// environment state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(host) = lookup("STORE_HOST") {
            settings.store.host = host;
        }
        if let Some(port) = lookup("STORE_PORT") {
            settings.store.port = port.parse().map_err(|_| SettingsError::InvalidValue {
                var: "STORE_PORT",
                value: port,
            })?;
        }
        if let Some(db) = lookup("STORE_DB") {
            settings.store.db = db.parse().map_err(|_| SettingsError::InvalidValue {
                var: "STORE_DB",
                value: db,
            })?;
        }
        if let Some(password) = lookup("STORE_PASSWORD") {
            if !password.is_empty() {
                settings.store.password = Some(password);
            }
        }
        if let Some(tls) = lookup("STORE_USE_TLS") {
            settings.store.use_tls = parse_bool(&tls).ok_or(SettingsError::InvalidValue {
                var: "STORE_USE_TLS",
                value: tls,
            })?;
        }
        if let Some(port) = lookup("GATE_PORT") {
            settings.gate_port = port.parse().map_err(|_| SettingsError::InvalidValue {
                var: "GATE_PORT",
                value: port,
            })?;
        }
        if let Some(timeout) = lookup("DISPATCH_TIMEOUT_MS") {
            settings.dispatch_timeout_ms =
                timeout.parse().map_err(|_| SettingsError::InvalidValue {
                    var: "DISPATCH_TIMEOUT_MS",
                    value: timeout,
                })?;
        }
        if let Some(strategy) = lookup("ROUTE_STRATEGY") {
            settings.strategy =
                StrategyKind::parse(&strategy).map_err(|_| SettingsError::InvalidValue {
                    var: "ROUTE_STRATEGY",
                    value: strategy,
                })?;
        }

        Ok(settings)
    }

    /// Validates the loaded configuration for correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.store.host.is_empty() {
            return Err("STORE_HOST must not be empty".to_string());
        }
        if self.store.port == 0 {
            return Err("STORE_PORT must be between 1 and 65535".to_string());
        }
        if self.gate_port == 0 {
            return Err("GATE_PORT must be between 1 and 65535".to_string());
        }
        if self.dispatch_timeout_ms == 0 {
            return Err("DISPATCH_TIMEOUT_MS must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.store.host, "127.0.0.1");
        assert_eq!(settings.store.port, 6379);
        assert_eq!(settings.gate_port, 9000);
        assert_eq!(settings.dispatch_timeout_ms, 30_000);
        assert_eq!(settings.strategy, StrategyKind::RoundRobin);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn environment_overrides_are_honored() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("STORE_HOST", "store.internal"),
            ("STORE_PORT", "6380"),
            ("STORE_DB", "2"),
            ("STORE_PASSWORD", "hunter2"),
            ("STORE_USE_TLS", "true"),
            ("GATE_PORT", "8080"),
            ("DISPATCH_TIMEOUT_MS", "1000"),
            ("ROUTE_STRATEGY", "random"),
        ]))
        .unwrap();

        assert_eq!(settings.store.host, "store.internal");
        assert_eq!(settings.store.port, 6380);
        assert_eq!(settings.store.db, 2);
        assert_eq!(settings.store.password.as_deref(), Some("hunter2"));
        assert!(settings.store.use_tls);
        assert_eq!(settings.gate_port, 8080);
        assert_eq!(settings.dispatch_timeout_ms, 1000);
        assert_eq!(settings.strategy, StrategyKind::Random);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let result = Settings::from_lookup(lookup_from(&[("STORE_PORT", "not-a-port")]));
        assert!(matches!(
            result,
            Err(SettingsError::InvalidValue { var: "STORE_PORT", .. })
        ));
    }

    #[test]
    fn url_includes_auth_and_tls_scheme() {
        let mut settings = Settings::default();
        assert_eq!(settings.store.url(), "redis://127.0.0.1:6379/0");

        settings.store.password = Some("secret".to_string());
        settings.store.use_tls = true;
        settings.store.db = 3;
        assert_eq!(settings.store.url(), "rediss://:secret@127.0.0.1:6379/3");
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let settings = Settings::from_lookup(lookup_from(&[("DISPATCH_TIMEOUT_MS", "0")])).unwrap();
        assert!(settings.validate().is_err());
    }
}
