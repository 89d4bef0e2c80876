//! Process configuration from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use branchledger_inventory::PolicyConfig;

pub const ENV_BIND_ADDR: &str = "BRANCHLEDGER_BIND_ADDR";
pub const ENV_LOG_FORMAT: &str = "BRANCHLEDGER_LOG_FORMAT";
pub const ENV_ALLOW_NEGATIVE_STOCK: &str = "BRANCHLEDGER_ALLOW_NEGATIVE_STOCK";
pub const ENV_WEBHOOK_TIMEOUT_MS: &str = "BRANCHLEDGER_WEBHOOK_TIMEOUT_MS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DB_MAX_CONNECTIONS: &str = "BRANCHLEDGER_DB_MAX_CONNECTIONS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
    /// Default policy for tenants without an override.
    pub policy: PolicyConfig,
    pub webhook_timeout: Duration,
    /// Postgres connection string. Unset runs on the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_format: LogFormat::Json,
            policy: PolicyConfig::default(),
            webhook_timeout: Duration::from_millis(10_000),
            database_url: None,
            db_max_connections: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults;
    /// set but unparsable keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(ENV_BIND_ADDR) {
            cfg.bind_addr = raw
                .trim()
                .parse()
                .map_err(|e: std::net::AddrParseError| invalid(ENV_BIND_ADDR, &raw, e.to_string()))?;
        }

        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            cfg.log_format = match raw.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => return Err(invalid(ENV_LOG_FORMAT, &raw, "expected json or pretty")),
            };
        }

        if let Some(raw) = lookup(ENV_ALLOW_NEGATIVE_STOCK) {
            cfg.policy.allow_negative_stock = parse_bool(&raw)
                .ok_or_else(|| invalid(ENV_ALLOW_NEGATIVE_STOCK, &raw, "expected a boolean"))?;
        }

        if let Some(raw) = lookup(ENV_WEBHOOK_TIMEOUT_MS) {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(ENV_WEBHOOK_TIMEOUT_MS, &raw, e.to_string()))?;
            if ms == 0 {
                return Err(invalid(ENV_WEBHOOK_TIMEOUT_MS, &raw, "must be positive"));
            }
            cfg.webhook_timeout = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup(ENV_DATABASE_URL) {
            let url = raw.trim();
            if url.is_empty() {
                return Err(invalid(ENV_DATABASE_URL, &raw, "must not be empty"));
            }
            cfg.database_url = Some(url.to_string());
        }

        if let Some(raw) = lookup(ENV_DB_MAX_CONNECTIONS) {
            let max: u32 = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(ENV_DB_MAX_CONNECTIONS, &raw, e.to_string()))?;
            if max == 0 {
                return Err(invalid(ENV_DB_MAX_CONNECTIONS, &raw, "must be positive"));
            }
            cfg.db_max_connections = max;
        }

        Ok(cfg)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert!(!cfg.policy.allow_negative_stock);
    }

    #[test]
    fn reads_every_key() {
        let cfg = AppConfig::from_lookup(lookup(&[
            (ENV_BIND_ADDR, "127.0.0.1:9000"),
            (ENV_LOG_FORMAT, "Pretty"),
            (ENV_ALLOW_NEGATIVE_STOCK, "true"),
            (ENV_WEBHOOK_TIMEOUT_MS, "250"),
            (ENV_DATABASE_URL, "postgres://ledger@localhost/branchledger"),
            (ENV_DB_MAX_CONNECTIONS, "4"),
        ]))
        .unwrap();

        assert_eq!(cfg.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert!(cfg.policy.allow_negative_stock);
        assert_eq!(cfg.webhook_timeout, Duration::from_millis(250));
        assert_eq!(
            cfg.database_url.as_deref(),
            Some("postgres://ledger@localhost/branchledger")
        );
        assert_eq!(cfg.db_max_connections, 4);
    }

    #[test]
    fn invalid_values_are_reported_not_defaulted() {
        for (key, value) in [
            (ENV_BIND_ADDR, "nowhere"),
            (ENV_LOG_FORMAT, "xml"),
            (ENV_ALLOW_NEGATIVE_STOCK, "maybe"),
            (ENV_WEBHOOK_TIMEOUT_MS, "0"),
            (ENV_DATABASE_URL, "  "),
            (ENV_DB_MAX_CONNECTIONS, "0"),
        ] {
            let err = AppConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: k, .. } if k == key));
        }
    }
}
