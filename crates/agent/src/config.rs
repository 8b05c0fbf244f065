//! Agent configuration file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use jobrun_core::model::ModelKey;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pool::{ConcurrencyLimits, DEFAULT_CONCURRENCY};

/// Agent settings, usually read from `jobrun.toml`.
///
/// ```toml
/// base_url = "https://jobs.example.com"
/// poll_interval_ms = 4000
/// default_concurrency = 8
///
/// [model_concurrency]
/// "openai/gpt-4o" = 16
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Remote job service root.
    pub base_url: String,
    /// Bearer token for the remote service.
    pub api_key: Option<String>,
    /// Delay between status polls.
    pub poll_interval_ms: u64,
    /// In-flight limit for models without an override.
    pub default_concurrency: usize,
    /// `service/model` -> in-flight limit.
    pub model_concurrency: BTreeMap<String, usize>,
    /// Count cache hits in cost totals.
    pub include_cached_costs: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_key: None,
            poll_interval_ms: 4_000,
            default_concurrency: DEFAULT_CONCURRENCY,
            model_concurrency: BTreeMap::new(),
            include_cached_costs: false,
        }
    }
}

impl AgentConfig {
    /// Reads and validates a TOML file; missing keys take their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: AgentConfig = toml::from_str(&s)?;
        cfg.concurrency_limits()?;
        Ok(cfg)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load_from(p),
            None => Ok(Self::default()),
        }
    }

    /// [`AgentConfig::poll_interval_ms`] as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Limits for building a run's resource pool.
    pub fn concurrency_limits(&self) -> Result<ConcurrencyLimits, ConfigError> {
        if self.default_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency("default".to_string()));
        }
        let mut limits = ConcurrencyLimits::new(self.default_concurrency);
        for (raw, limit) in &self.model_concurrency {
            let (service, model) = raw
                .split_once('/')
                .filter(|(s, m)| !s.is_empty() && !m.is_empty())
                .ok_or_else(|| ConfigError::InvalidModelKey(raw.clone()))?;
            if *limit == 0 {
                return Err(ConfigError::ZeroConcurrency(raw.clone()));
            }
            limits = limits.with_override(ModelKey::new(service, model), *limit);
        }
        Ok(limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_partial_file_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
base_url = "https://jobs.example.com"
poll_interval_ms = 250

[model_concurrency]
"openai/gpt-4o" = 2
"#
        )
        .unwrap();

        let cfg = AgentConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.base_url, "https://jobs.example.com");
        assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.default_concurrency, DEFAULT_CONCURRENCY);

        let limits = cfg.concurrency_limits().unwrap();
        assert_eq!(limits.limit_for(&ModelKey::new("openai", "gpt-4o")), 2);
        assert_eq!(
            limits.limit_for(&ModelKey::new("openai", "gpt-4o-mini")),
            DEFAULT_CONCURRENCY
        );
    }

    #[test]
    fn rejects_bad_model_keys() {
        let mut cfg = AgentConfig::default();
        cfg.model_concurrency.insert("gpt-4o".into(), 2);
        assert!(matches!(
            cfg.concurrency_limits(),
            Err(ConfigError::InvalidModelKey(_))
        ));

        let mut cfg = AgentConfig::default();
        cfg.model_concurrency.insert("openai/gpt-4o".into(), 0);
        assert!(matches!(
            cfg.concurrency_limits(),
            Err(ConfigError::ZeroConcurrency(_))
        ));
    }

    #[test]
    fn missing_path_means_defaults() {
        assert_eq!(
            AgentConfig::load_or_default(None).unwrap(),
            AgentConfig::default()
        );
    }
}
