// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience configuration file parser
//!
//! The file (typically `~/.storefront/resilience.yaml`) overrides the built-in
//! retry policies, circuit breakers, alert thresholds and sweep intervals.
//! Every section is optional.
//!
//! ```yaml
//! retry:
//!   database:
//!     max_attempts: 5
//!     base_delay: 250ms
//!   external_service:
//!     ignored: [validation, not_found, conflict]
//! circuits:
//!   - name: payment
//!     failure_rate_threshold: 40
//!     wait_duration_in_open: 2m
//! alerts:
//!   open_grace: 10m
//! schedule:
//!   flush_interval: 5m
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ErrorKind, ResilienceError, Result};
use crate::monitor::{AlertThresholds, ScheduleConfig};
use crate::runtime::{
    CircuitBreakerConfig, CircuitBreakerRegistry, DependencyCategory, LoggingConfig,
    MetricsConfig, PolicyTable, RetryPolicy,
};

/// Environment variable naming the configuration file.
pub const ENV_RESILIENCE_CONFIG: &str = "STOREFRONT_RESILIENCE_CONFIG";
/// Environment variable that, when `1` or `true`, zeroes every jitter fraction.
pub const ENV_DISABLE_JITTER: &str = "STOREFRONT_RESILIENCE_DISABLE_JITTER";

/// Overrides for one category's retry policy; unset fields keep the built-in value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub base_delay: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_fraction: Option<f64>,

    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,

    /// Kinds to retry; replaces the transient-error default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_on: Option<Vec<ErrorKind>>,

    /// Kinds to hand straight back; replaces the built-in list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<Vec<ErrorKind>>,
}

impl RetryPolicyConfig {
    /// Apply the overrides on top of `base`.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` if the resulting policy is invalid.
    pub fn apply(&self, base: &RetryPolicy) -> Result<RetryPolicy> {
        let mut builder = base.to_builder();
        if let Some(max) = self.max_attempts {
            builder = builder.max_attempts(max);
        }
        if let Some(delay) = self.base_delay {
            builder = builder.base_delay(delay);
        }
        if let Some(multiplier) = self.multiplier {
            builder = builder.multiplier(multiplier);
        }
        if let Some(fraction) = self.jitter_fraction {
            builder = builder.jitter_fraction(fraction);
        }
        if let Some(cap) = self.max_delay {
            builder = builder.max_delay(cap);
        }
        if let Some(kinds) = &self.retry_on {
            builder = builder.retry_on_kinds(kinds.iter().copied());
        }
        if let Some(kinds) = &self.ignored {
            builder = builder.ignored(kinds.iter().copied());
        }
        builder.build()
    }
}

/// One named circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub name: String,

    #[serde(flatten)]
    pub breaker: CircuitBreakerConfig,
}

/// The whole resilience configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Per-category retry overrides
    pub retry: BTreeMap<DependencyCategory, RetryPolicyConfig>,

    /// Circuit breakers; when non-empty, replaces the built-in set
    pub circuits: Vec<CircuitConfig>,

    pub alerts: AlertThresholds,

    pub schedule: ScheduleConfig,

    pub metrics: MetricsConfig,

    pub logging: LoggingConfig,

    /// Zero every jitter fraction (deterministic backoff)
    pub disable_jitter: bool,
}

impl ResilienceConfig {
    /// Load configuration from the default location (~/.storefront/resilience.yaml)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The home directory cannot be determined
    /// - The config file cannot be read
    /// - The config file is malformed or invalid
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The file is malformed YAML
    /// - A value fails validation
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ResilienceError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or a value fails validation
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ResilienceError::Config(format!("Failed to parse config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration the way a process does at startup
    ///
    /// Reads the file named by `STOREFRONT_RESILIENCE_CONFIG`, else the
    /// default path if it exists, else uses the built-in defaults. Then
    /// applies `STOREFRONT_RESILIENCE_DISABLE_JITTER`.
    ///
    /// # Errors
    ///
    /// Returns an error if a named or existing file cannot be loaded
    pub fn load_with_env() -> Result<Self> {
        let mut config = match std::env::var(ENV_RESILIENCE_CONFIG) {
            Ok(path) => Self::load_from_path(path)?,
            Err(_) => match Self::default_path() {
                Ok(path) if path.exists() => Self::load_from_path(&path)?,
                _ => Self::default(),
            },
        };

        if let Ok(value) = std::env::var(ENV_DISABLE_JITTER) {
            if matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes") {
                config.disable_jitter = true;
            }
        }

        Ok(config)
    }

    /// Get the default config file path (~/.storefront/resilience.yaml)
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            ResilienceError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(".storefront").join("resilience.yaml"))
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` naming the first invalid value
    pub fn validate(&self) -> Result<()> {
        self.policy_table()?;
        let mut seen = std::collections::BTreeSet::new();
        for circuit in &self.circuits {
            CircuitBreakerRegistry::check_name(&circuit.name)?;
            if !seen.insert(circuit.name.as_str()) {
                return Err(ResilienceError::Config(format!(
                    "circuit `{}` is listed twice",
                    circuit.name
                )));
            }
            circuit.breaker.validate().map_err(|e| {
                ResilienceError::Config(format!("circuit `{}`: {}", circuit.name, e))
            })?;
        }
        self.alerts.validate()?;
        self.metrics.validate()?;
        Ok(())
    }

    /// Build the policy table: built-in policies with the overrides applied.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` if an override produces an invalid policy
    pub fn policy_table(&self) -> Result<PolicyTable> {
        let mut table = PolicyTable::new();
        for category in DependencyCategory::ALL {
            let mut policy = RetryPolicy::for_category(category);
            if let Some(overrides) = self.retry.get(&category) {
                policy = overrides
                    .apply(&policy)
                    .map_err(|e| ResilienceError::Config(format!("retry.{category}: {e}")))?;
            }
            if self.disable_jitter {
                policy = policy.to_builder().jitter_fraction(0.0).build()?;
            }
            table.set(policy);
        }
        Ok(table)
    }

    /// Build the breaker registry.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Config` for duplicate names or invalid breakers
    pub fn circuit_registry(&self) -> Result<CircuitBreakerRegistry> {
        if self.circuits.is_empty() {
            return Ok(CircuitBreakerRegistry::with_defaults());
        }
        let mut registry = CircuitBreakerRegistry::new();
        for circuit in &self.circuits {
            registry.register(circuit.name.clone(), circuit.breaker.clone())?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::LogLevel;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = r#"
retry:
  database:
    max_attempts: 5
    base_delay: 250ms
    multiplier: 3
  cache:
    ignored: [not_found, validation]
circuits:
  - name: payment
    failure_rate_threshold: 40
    wait_duration_in_open: 2m
  - name: search
    sliding_window_size: 50
    minimum_calls: 20
alerts:
  open_grace: 10m
  exhausted_threshold: 25
schedule:
  flush_interval: 1m
metrics:
  namespace: shop
logging:
  retry_level: debug
"#;

    #[test]
    fn test_parse_full_config() {
        let config = ResilienceConfig::from_yaml(SAMPLE_CONFIG).unwrap();

        assert_eq!(config.retry.len(), 2);
        assert_eq!(config.circuits.len(), 2);
        assert_eq!(config.alerts.open_grace, Duration::from_secs(600));
        assert_eq!(config.alerts.exhausted_threshold, 25);
        assert_eq!(config.alerts.healthy_success_rate, 0.8);
        assert_eq!(config.schedule.flush_interval, Duration::from_secs(60));
        assert_eq!(config.metrics.namespace, "shop");
        assert_eq!(config.logging.retry_level, LogLevel::Debug);
        assert!(!config.disable_jitter);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = ResilienceConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ResilienceConfig::default());
    }

    #[test]
    fn test_policy_table_overrides() {
        let config = ResilienceConfig::from_yaml(SAMPLE_CONFIG).unwrap();
        let table = config.policy_table().unwrap();

        let database = table.get(DependencyCategory::Database);
        assert_eq!(database.max_attempts(), 5);
        assert_eq!(database.backoff().base_delay(), Duration::from_millis(250));
        assert_eq!(database.backoff().multiplier(), 3.0);
        // untouched fields keep the built-in value
        assert!(database.is_ignored(ErrorKind::Conflict));

        let cache = table.get(DependencyCategory::Cache);
        assert_eq!(cache.max_attempts(), 2);
        assert!(cache.is_ignored(ErrorKind::Validation));

        let auth = table.get(DependencyCategory::AuthProvider);
        assert_eq!(auth.max_attempts(), 3);
        assert_eq!(auth.backoff().jitter_fraction(), 0.2);
    }

    #[test]
    fn test_disable_jitter() {
        let config = ResilienceConfig {
            disable_jitter: true,
            ..ResilienceConfig::default()
        };
        let table = config.policy_table().unwrap();
        for policy in table.iter() {
            assert_eq!(policy.backoff().jitter_fraction(), 0.0);
        }
    }

    #[test]
    fn test_circuit_registry() {
        let config = ResilienceConfig::from_yaml(SAMPLE_CONFIG).unwrap();
        let registry = config.circuit_registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("auth-provider").is_none());

        let payment = registry.require("payment").unwrap();
        assert_eq!(payment.config().failure_rate_threshold, 40.0);
        assert_eq!(payment.config().wait_duration_in_open, Duration::from_secs(120));
        assert_eq!(payment.config().sliding_window_size, 10);

        let defaults = ResilienceConfig::default().circuit_registry().unwrap();
        assert_eq!(defaults.len(), 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero_attempts = "retry:\n  cache:\n    max_attempts: 0\n";
        assert!(matches!(
            ResilienceConfig::from_yaml(zero_attempts),
            Err(ResilienceError::Config(_))
        ));

        let jitter = "retry:\n  database:\n    jitter_fraction: 1.0\n";
        assert!(ResilienceConfig::from_yaml(jitter).is_err());

        let duplicate = "circuits:\n  - name: payment\n  - name: payment\n";
        assert!(ResilienceConfig::from_yaml(duplicate).is_err());

        let threshold = "circuits:\n  - name: payment\n    failure_rate_threshold: 0\n";
        assert!(ResilienceConfig::from_yaml(threshold).is_err());

        let unknown_kind = "retry:\n  cache:\n    ignored: [gone]\n";
        assert!(ResilienceConfig::from_yaml(unknown_kind).is_err());

        let category_name = "circuits:\n  - name: database\n";
        assert!(ResilienceConfig::from_yaml(category_name).is_err());
    }

    #[test]
    fn test_histogram_buckets_are_validated() {
        let inf_bucket = "metrics:\n  histogram_buckets: [0.1, .inf]\n";
        assert!(matches!(
            ResilienceConfig::from_yaml(inf_bucket),
            Err(ResilienceError::Config(_))
        ));

        let unsorted = "metrics:\n  histogram_buckets: [1.0, 0.1]\n";
        assert!(ResilienceConfig::from_yaml(unsorted).is_err());

        let sorted = "metrics:\n  histogram_buckets: [0.1, 1.0, 30.0]\n";
        let config = ResilienceConfig::from_yaml(sorted).unwrap();
        assert_eq!(config.metrics.histogram_buckets, vec![0.1, 1.0, 30.0]);
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

        let config = ResilienceConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.metrics.namespace, "shop");

        let missing = ResilienceConfig::load_from_path("/nonexistent/resilience.yaml");
        assert!(missing.is_err());
    }

    #[test]
    fn test_load_with_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"schedule:\n  fast_check_interval: 30s\n")
            .unwrap();

        std::env::set_var(ENV_RESILIENCE_CONFIG, file.path());
        std::env::set_var(ENV_DISABLE_JITTER, "true");
        let config = ResilienceConfig::load_with_env();
        std::env::remove_var(ENV_RESILIENCE_CONFIG);
        std::env::remove_var(ENV_DISABLE_JITTER);

        let config = config.unwrap();
        assert_eq!(config.schedule.fast_check_interval, Duration::from_secs(30));
        assert!(config.disable_jitter);
    }

    #[test]
    fn test_default_path() {
        if let Ok(path) = ResilienceConfig::default_path() {
            assert!(path.ends_with(".storefront/resilience.yaml"));
        }
    }
}
