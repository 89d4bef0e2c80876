//! Tracing/logging initialization.
//!
//! `RUST_LOG` wins over the configured filter; both fall back to `info`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// JSON lines when set, human-readable output otherwise.
    pub json: bool,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: true,
            filter: None,
        }
    }
}

impl LogConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let directives = self.filter.as_deref().unwrap_or(DEFAULT_FILTER);
            EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        })
    }
}

/// Install the global subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops). Returns whether
/// this call installed it.
pub fn init(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let installed = if config.json {
        builder.json().with_target(false).try_init()
    } else {
        builder.pretty().try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let config = LogConfig {
            json: false,
            filter: Some("debug".into()),
        };
        init(&config);
        assert!(!init(&LogConfig::default()));
    }

    #[test]
    fn bad_directives_fall_back() {
        let config = LogConfig {
            json: true,
            filter: Some("=[".into()),
        };
        // Must not panic whatever RUST_LOG holds.
        let _ = config.env_filter();
    }
}
