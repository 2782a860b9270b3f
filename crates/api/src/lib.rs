//! HTTP surface of the Perplexity MCP server
//!
//! Builds the axum application: the MCP streamable-HTTP service at the
//! configured path, a health route, and the CORS and body-size layers.

pub mod routes;
pub mod tools;

use axum::{routing::get, Router};
use config::{ResolvedConfig, ServerConfig, DEFAULT_MAX_REQUEST_SIZE};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, tower::StreamableHttpService,
};
use rmcp::transport::StreamableHttpServerConfig;
use search_providers::SearchGateway;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{debug, warn};

pub use tools::{McpProgress, SearchParams, SearchServer};

/// Mount point for the MCP service, or `None` when it should take every path
pub fn mount_path(path: &str) -> Option<String> {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('/') {
        Some(trimmed.to_string())
    } else {
        Some(format!("/{trimmed}"))
    }
}

/// Request body limit in bytes. Non-positive values fall back to the default.
pub fn body_limit(config: &ResolvedConfig) -> usize {
    usize::try_from(config.server.max_request_size)
        .ok()
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_MAX_REQUEST_SIZE as usize)
}

/// Address to bind. An out-of-range port falls back to the default port.
pub fn listen_address(config: &ResolvedConfig) -> String {
    let server = &config.server;
    if (1..=65535).contains(&server.port) {
        return server.bind_address();
    }

    let fallback = ServerConfig::default().port;
    warn!(
        port = server.port,
        fallback, "Configured port is out of range, using default"
    );
    format!("{}:{}", server.host, fallback)
}

/// Resolve the `tracing` filter directive.
///
/// `RUST_LOG` wins when set. Otherwise `debug = true` forces `debug`, and
/// `server.log_level` is used with common aliases mapped onto tracing levels.
pub fn tracing_filter(config: &ResolvedConfig, rust_log: Option<&str>) -> String {
    if let Some(directive) = rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        return directive.to_string();
    }

    if config.debug {
        return "debug".to_string();
    }

    match config.server.log_level.trim().to_ascii_lowercase().as_str() {
        "" => "info".to_string(),
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

/// Build the complete application router
pub fn build_app(config: &ResolvedConfig, gateway: Arc<SearchGateway>) -> Router {
    let server = SearchServer::new(gateway);
    let mcp_service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let mut app = Router::new()
        .route("/health", get(routes::health_check))
        .with_state(Arc::new(routes::HealthState::from_config(config)));

    app = match mount_path(&config.server.path) {
        Some(path) if path == "/health" => {
            warn!("MCP path collides with the health route, serving MCP at /");
            app.fallback_service(mcp_service)
        }
        Some(path) => {
            debug!(path = %path, "Mounting MCP service");
            app.nest_service(&path, mcp_service)
        }
        None => {
            debug!("Mounting MCP service at the root");
            app.fallback_service(mcp_service)
        }
    };

    if config.server.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app.layer(RequestBodyLimitLayer::new(body_limit(config)))
}
