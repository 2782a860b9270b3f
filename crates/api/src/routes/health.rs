use axum::{extract::State, http::StatusCode, response::Json as ResponseJson};
use config::ResolvedConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SERVICE_NAME: &str = "perplexity-mcp";

/// What `/health` reports, captured once when the router is built
#[derive(Debug, Clone)]
pub struct HealthState {
    mcp_path: String,
    api_key_configured: bool,
}

impl HealthState {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            mcp_path: config.server.path.clone(),
            api_key_configured: config.perplexity.has_api_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// Where MCP clients should connect
    pub mcp_path: String,
    /// `false` means every `search` call will fail until a key is set
    pub api_key_configured: bool,
}

/// Liveness plus search readiness. Never calls Perplexity, so a missing key
/// shows up as `api_key_configured: false` rather than a failing status.
pub async fn health_check(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, ResponseJson<HealthResponse>) {
    (
        StatusCode::OK,
        ResponseJson(HealthResponse {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mcp_path: state.mcp_path.clone(),
            api_key_configured: state.api_key_configured,
        }),
    )
}
