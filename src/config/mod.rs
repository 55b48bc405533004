// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration management for the resilience layer
//!
//! Everything has a built-in default; a YAML file only needs the values it
//! changes.
//!
//! # Environment Variables
//!
//! The following environment variables are supported:
//!
//! - `STOREFRONT_RESILIENCE_CONFIG` - Path to the config file
//!   (default: `~/.storefront/resilience.yaml`)
//! - `STOREFRONT_RESILIENCE_DISABLE_JITTER` - Set to `1` or `true` for deterministic backoff
//!
//! # Example
//!
//! ```no_run
//! use storefront_resilience::config::ResilienceConfig;
//! use storefront_resilience::runtime::DependencyCategory;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResilienceConfig::load_with_env()?;
//! let policies = config.policy_table()?;
//!
//! let database = policies.get(DependencyCategory::Database);
//! println!("database calls get {} attempts", database.max_attempts());
//! # Ok(())
//! # }
//! ```

mod resilience_config;

pub use resilience_config::{
    CircuitConfig, ResilienceConfig, RetryPolicyConfig, ENV_DISABLE_JITTER, ENV_RESILIENCE_CONFIG,
};
