//! Layered configuration resolution
//!
//! Precedence, per field: environment > config file > defaults. Nothing in
//! here fails; problems are collected as [`ConfigWarning`]s next to the
//! resolved value.

use crate::types::*;
use crate::{ConfigError, ConfigWarning};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Result of a resolution: always a config, plus whatever went wrong
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: ResolvedConfig,
    pub warnings: Vec<ConfigWarning>,
}

/// Builds a [`ResolvedConfig`] from defaults, a JSON file and the environment
#[derive(Clone)]
pub struct ConfigResolver {
    path: PathBuf,
    env: EnvLookup,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigResolver {
    /// Resolver reading `config.json` and the process environment
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CONFIG_FILE),
            env: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Replace the environment with a fixed set of variables
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Arc::new(move |name| vars.get(name).cloned());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resolve(&self) -> Resolution {
        let mut warnings = Vec::new();

        let file = self.load_file(&mut warnings);
        let env = self.load_env(&mut warnings);

        let mut config = ResolvedConfig::default();
        config.apply(file);
        config.apply(env);

        validate(&config, &mut warnings);

        debug!(
            path = %self.path.display(),
            warnings = warnings.len(),
            "Configuration resolved"
        );

        Resolution { config, warnings }
    }

    fn load_file(&self, warnings: &mut Vec<ConfigWarning>) -> ConfigOverrides {
        let path = self.path.display().to_string();

        if !self.path.exists() {
            debug!(path = %path, "Configuration file not found, using defaults");
            return ConfigOverrides::default();
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warnings.push(ConfigWarning::FileUnreadable {
                    path,
                    reason: e.to_string(),
                });
                return ConfigOverrides::default();
            }
        };

        let root = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(root)) => root,
            Ok(other) => {
                warnings.push(ConfigWarning::FileMalformed {
                    path,
                    reason: format!("expected an object, found {}", json_type(&other)),
                });
                return ConfigOverrides::default();
            }
            Err(e) => {
                warnings.push(ConfigWarning::FileMalformed {
                    path,
                    reason: e.to_string(),
                });
                return ConfigOverrides::default();
            }
        };

        // Sections are decoded independently so a bad one does not discard the rest
        let section = |name: &'static str| root.get(name).cloned();

        ConfigOverrides {
            perplexity: decode_section(&path, "perplexity", section("perplexity"), warnings),
            server: decode_section(&path, "server", section("server"), warnings),
            proxy: decode_section(&path, "proxy", section("proxy"), warnings),
            debug: decode_section(&path, "debug", section("debug"), warnings),
            config_version: decode_section(
                &path,
                "config_version",
                section("config_version"),
                warnings,
            ),
        }
    }

    fn load_env(&self, warnings: &mut Vec<ConfigWarning>) -> ConfigOverrides {
        let mut env = EnvReader {
            lookup: &self.env,
            warnings,
        };

        ConfigOverrides {
            perplexity: SearchProviderOverrides {
                api_key: env.string("PERPLEXITY_API_KEY"),
                api_url: env.string("PERPLEXITY_API_URL"),
                model: env.string("PERPLEXITY_MODEL"),
                model_prefix: env.string("PERPLEXITY_MODEL_PREFIX"),
                system_message: env.string("PERPLEXITY_SYSTEM_MESSAGE"),
                timeout: env.parse("PERPLEXITY_TIMEOUT"),
                max_retries: env.parse("PERPLEXITY_MAX_RETRIES"),
                retry_delay: env.parse("PERPLEXITY_RETRY_DELAY"),
            },
            server: ServerOverrides {
                host: env.string("MCP_HOST"),
                port: env.parse("MCP_PORT"),
                path: env.string("MCP_PATH"),
                log_level: env.string("LOG_LEVEL"),
                enable_cors: env.flag("ENABLE_CORS"),
                max_request_size: env.parse("MAX_REQUEST_SIZE"),
            },
            proxy: ProxyOverrides {
                http_proxy: env.first_of(&["HTTP_PROXY", "http_proxy"]),
                https_proxy: env.first_of(&["HTTPS_PROXY", "https_proxy"]),
                all_proxy: env.first_of(&["ALL_PROXY", "all_proxy"]),
                no_proxy: env.first_of(&["NO_PROXY", "no_proxy"]),
            },
            debug: env.flag("DEBUG"),
            config_version: None,
        }
    }
}

fn decode_section<T: DeserializeOwned + Default>(
    path: &str,
    section: &'static str,
    value: Option<Value>,
    warnings: &mut Vec<ConfigWarning>,
) -> T {
    let Some(value) = value else {
        return T::default();
    };

    match serde_json::from_value(value) {
        Ok(decoded) => decoded,
        Err(e) => {
            warnings.push(ConfigWarning::SectionMalformed {
                path: path.to_string(),
                section,
                reason: e.to_string(),
            });
            T::default()
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Reads environment variables, treating empty values as absent
struct EnvReader<'a> {
    lookup: &'a EnvLookup,
    warnings: &'a mut Vec<ConfigWarning>,
}

impl EnvReader<'_> {
    fn string(&mut self, name: &'static str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn first_of(&mut self, names: &[&'static str]) -> Option<String> {
        names.iter().find_map(|name| self.string(*name))
    }

    fn parse<T: FromStr>(&mut self, name: &'static str) -> Option<T> {
        let raw = self.string(name)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.warnings
                    .push(ConfigWarning::InvalidEnvValue { name, value: raw });
                None
            }
        }
    }

    fn flag(&mut self, name: &'static str) -> Option<bool> {
        self.string(name).map(|v| parse_flag(&v))
    }
}

pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn validate(config: &ResolvedConfig, warnings: &mut Vec<ConfigWarning>) {
    let p = &config.perplexity;
    let s = &config.server;

    if !p.has_api_key() {
        warnings.push(ConfigWarning::MissingApiKey);
    }
    // Written to also catch NaN
    if !(p.timeout > 0.0) {
        warnings.push(ConfigWarning::NonPositiveTimeout(p.timeout));
    }
    if p.max_retries < 0 {
        warnings.push(ConfigWarning::NegativeRetries(p.max_retries));
    }
    if !(p.retry_delay >= 0.0) {
        warnings.push(ConfigWarning::NegativeRetryDelay(p.retry_delay));
    }
    if !(1..=65535).contains(&s.port) {
        warnings.push(ConfigWarning::PortOutOfRange(s.port));
    }
    if s.max_request_size <= 0 {
        warnings.push(ConfigWarning::NonPositiveRequestSize(s.max_request_size));
    }
}

fn config_document(config: &ResolvedConfig) -> Result<Map<String, Value>, ConfigError> {
    let mut document = Map::new();
    document.insert("perplexity".into(), serde_json::to_value(&config.perplexity)?);
    document.insert("server".into(), serde_json::to_value(&config.server)?);
    document.insert("proxy".into(), serde_json::to_value(&config.proxy)?);
    document.insert("debug".into(), Value::Bool(config.debug));
    document.insert(
        "config_version".into(),
        Value::String(config.config_version.clone()),
    );
    Ok(document)
}

fn write_json<P: AsRef<Path>>(path: P, document: &Value) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let io_error = |source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }

    let mut content = serde_json::to_string_pretty(document)?;
    content.push('\n');
    std::fs::write(path, content).map_err(io_error)
}

/// Write `config` to `path` as JSON, creating parent directories
pub fn persist<P: AsRef<Path>>(config: &ResolvedConfig, path: P) -> Result<(), ConfigError> {
    let document = config_document(config)?;
    write_json(&path, &Value::Object(document))?;
    debug!(path = %path.as_ref().display(), "Configuration saved");
    Ok(())
}

/// Write an annotated sample configuration with placeholder secrets
pub fn emit_sample<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
    let mut sample = ResolvedConfig::default();
    sample.perplexity.api_key = "your-perplexity-api-key-here".to_string();
    sample.perplexity.system_message =
        "Be precise and concise. Provide accurate information.".to_string();

    let mut document = Map::new();
    document.insert(
        "_comment".into(),
        json!("Perplexity MCP server configuration file"),
    );
    document.insert(
        "_description".into(),
        json!({
            "perplexity.api_key": "Perplexity API key (required)",
            "perplexity.api_url": "Perplexity chat completions endpoint",
            "perplexity.model": "Default model name",
            "perplexity.model_prefix": "Prefix prepended to model names that lack it",
            "perplexity.system_message": "Default system message",
            "perplexity.timeout": "Request timeout in seconds",
            "perplexity.max_retries": "Retries after a timed out request",
            "perplexity.retry_delay": "Delay between retries in seconds",
            "server.host": "Bind address",
            "server.port": "Bind port",
            "server.path": "MCP endpoint path",
            "proxy.https_proxy": "Outbound proxy; HTTP(S)_PROXY / ALL_PROXY env vars also apply"
        }),
    );
    document.extend(config_document(&sample)?);

    write_json(&path, &Value::Object(document))?;
    debug!(path = %path.as_ref().display(), "Sample configuration written");
    Ok(())
}

/// Main configuration loading interface
impl ResolvedConfig {
    /// Resolve from `path` (or `config.json`) and the process environment
    pub fn load(path: Option<&Path>) -> Resolution {
        let resolver = ConfigResolver::new();
        match path {
            Some(path) => resolver.with_path(path).resolve(),
            None => resolver.resolve(),
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        persist(self, path)
    }
}
