//! Configuration management for the load balancer and rate limiter binaries.
//!
//! This module handles loading and parsing configuration from YAML files,
//! with support for environment variable expansion.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;

/// Balancing strategy names accepted in the `algorithm` config field.
pub const ALGORITHM_ROUND_ROBIN: &str = "round_robin";

/// Configuration for the load balancer binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    /// Port to bind the proxy listener to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Balancing strategy; only round_robin is supported
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Seconds between health probe cycles
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Upstream server addresses, in rotation order
    pub servers: Vec<String>,
}

/// Configuration for the rate limiter binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Port to bind the rate-limited application listener to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port to bind the capacity-management listener to
    #[serde(default = "default_token_port")]
    pub token_port: u16,

    /// Seconds between bucket refill ticks
    #[serde(default = "default_refill_interval")]
    pub refill_interval_secs: u64,

    /// Capacity used for keys without a stored override
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,
}

fn default_port() -> u16 {
    8080
}

fn default_token_port() -> u16 {
    8081
}

fn default_algorithm() -> String {
    ALGORITHM_ROUND_ROBIN.to_string()
}

fn default_health_check_interval() -> u64 {
    10
}

fn default_refill_interval() -> u64 {
    60
}

fn default_capacity() -> u32 {
    100
}

impl LoadBalancerConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use turnpike::core::config::LoadBalancerConfig;
    ///
    /// let config = LoadBalancerConfig::load("config/loadbalancer.yaml").expect("Failed to load config");
    /// ```
    pub fn load(path: &str) -> Result<Self> {
        let mut config: LoadBalancerConfig = load_yaml(path)?;

        // Server port override
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                config.port = port;
            }
        }

        if config.algorithm != ALGORITHM_ROUND_ROBIN {
            bail!("unsupported balancing algorithm: {}", config.algorithm);
        }
        if config.servers.is_empty() {
            bail!("config file {} lists no upstream servers", path);
        }

        Ok(config)
    }
}

impl RateLimiterConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> Result<Self> {
        let mut config: RateLimiterConfig = load_yaml(path)?;

        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                config.port = port;
            }
        }
        if let Ok(port_str) = std::env::var("TOKEN_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                config.token_port = port;
            }
        }

        Ok(config)
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path))?;

    // Expand environment variables
    let expanded = expand_env_vars(&content);

    serde_yaml::from_str(&expanded).with_context(|| format!("Failed to parse config file: {}", path))
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
///
/// Surrounding quotes are stripped so that numeric expansions parse as
/// YAML numbers rather than strings.
fn expand_env_vars(content: &str) -> String {
    let re = Regex::new(r#"["']?\$\{([^}:]+)(?::?-?([^}]*))?\}["']?"#).unwrap();

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
    })
    .to_string()
}
