// Configuration Management
//
// This crate handles all configuration loading and management for the
// Perplexity MCP server. It provides:
// - Typed settings for the search provider, proxy and server binding
// - Layered resolution: defaults < config file < environment
// - Non-fatal validation reported as warnings
// - Persisting a resolved configuration and emitting an annotated sample
//
// This keeps configuration concerns separate from the search pipeline.

use thiserror::Error;

pub mod proxy;
pub mod resolver;
pub mod types;

// Re-export all configuration types
pub use proxy::{describe_proxy, validate_proxy_url, ProxyInfo};
pub use resolver::{emit_sample, persist, ConfigResolver, Resolution};
pub use types::*;

/// Errors raised by operations that write configuration to disk.
///
/// Resolution itself never fails; see [`ConfigWarning`] for the diagnostics it
/// collects instead.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to write configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize configuration: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
}

/// Non-fatal problems found while resolving configuration.
///
/// A resolved configuration is always produced; callers decide whether to log,
/// display or act on these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    #[error("Failed to read configuration file {path}: {reason}")]
    FileUnreadable { path: String, reason: String },

    #[error("Configuration file {path} is not a valid JSON object: {reason}")]
    FileMalformed { path: String, reason: String },

    #[error("Ignored `{section}` in configuration file {path}: {reason}")]
    SectionMalformed {
        path: String,
        section: &'static str,
        reason: String,
    },

    #[error("Ignored environment variable {name}: invalid value {value:?}")]
    InvalidEnvValue { name: &'static str, value: String },

    #[error("Perplexity API key is not set (config file or PERPLEXITY_API_KEY)")]
    MissingApiKey,

    #[error("Timeout must be greater than 0 (got {0})")]
    NonPositiveTimeout(f64),

    #[error("Max retries must not be negative (got {0})")]
    NegativeRetries(i64),

    #[error("Retry delay must not be negative (got {0})")]
    NegativeRetryDelay(f64),

    #[error("Port must be within 1-65535 (got {0})")]
    PortOutOfRange(i64),

    #[error("Max request size must be greater than 0 (got {0})")]
    NonPositiveRequestSize(i64),
}
