//! MCP tool surface
//!
//! Exposes a single `search` tool backed by [`SearchGateway`]. Gateway
//! progress is forwarded to the calling client as MCP logging notifications.

use async_trait::async_trait;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, Implementation, LoggingLevel, LoggingMessageNotificationParam,
        ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, Peer, RoleServer, ServerHandler,
};
use schemars::JsonSchema;
use search_providers::{ProgressLevel, ProgressSink, SearchGateway, SearchRequest};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const LOGGER_NAME: &str = "perplexity";
const SEARCH_CANCELLED: &str = "Search cancelled";

/// Arguments of the `search` tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// The search query or question to send to Perplexity
    pub keyword: String,
    /// Model to use. Known values: sonar, sonar-pro, sonar-reasoning,
    /// sonar-reasoning-pro, sonar-deep-research. Defaults to the configured model.
    #[serde(default)]
    pub model: Option<String>,
    /// System prompt for this call. Defaults to the configured system message.
    #[serde(default)]
    pub system_message: Option<String>,
}

impl From<SearchParams> for SearchRequest {
    fn from(params: SearchParams) -> Self {
        SearchRequest {
            keyword: params.keyword,
            model: params.model,
            system_message: params.system_message,
        }
    }
}

/// Forwards gateway progress to the client that made the call
pub struct McpProgress {
    peer: Peer<RoleServer>,
}

impl McpProgress {
    pub fn new(peer: Peer<RoleServer>) -> Self {
        Self { peer }
    }
}

fn logging_level(level: ProgressLevel) -> LoggingLevel {
    match level {
        ProgressLevel::Debug => LoggingLevel::Debug,
        ProgressLevel::Info => LoggingLevel::Info,
        ProgressLevel::Warn => LoggingLevel::Warning,
        ProgressLevel::Error => LoggingLevel::Error,
    }
}

#[async_trait]
impl ProgressSink for McpProgress {
    async fn emit(&self, level: ProgressLevel, message: &str) {
        let notification = LoggingMessageNotificationParam {
            level: logging_level(level),
            logger: Some(LOGGER_NAME.to_string()),
            data: serde_json::Value::String(message.to_string()),
        };

        // Client may have gone away; progress is best effort
        if let Err(e) = self.peer.notify_logging_message(notification).await {
            debug!(error = %e, "Failed to deliver progress notification");
        }
    }
}

#[derive(Clone)]
pub struct SearchServer {
    gateway: Arc<SearchGateway>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SearchServer {
    pub fn new(gateway: Arc<SearchGateway>) -> Self {
        Self {
            gateway,
            tool_router: Self::tool_router(),
        }
    }

    /// Run one search and shape the outcome as a tool result. Gateway errors
    /// become tool errors carrying the error's display text.
    pub async fn run_search(
        &self,
        params: SearchParams,
        progress: &dyn ProgressSink,
    ) -> CallToolResult {
        match self.gateway.search(params.into(), progress).await {
            Ok(outcome) => CallToolResult::success(vec![Content::text(outcome.into_text())]),
            Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
        }
    }

    /// Like [`Self::run_search`], but gives up as soon as `cancel` fires. The
    /// in-flight request is dropped along with its HTTP client.
    pub async fn run_search_until_cancelled(
        &self,
        params: SearchParams,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        tokio::select! {
            result = self.run_search(params, progress) => result,
            _ = cancel.cancelled() => {
                info!("Search cancelled by client");
                CallToolResult::error(vec![Content::text(SEARCH_CANCELLED)])
            }
        }
    }

    #[tool(
        description = "Search the web with Perplexity and return an answer with numbered citations"
    )]
    async fn search(
        &self,
        Parameters(params): Parameters<SearchParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let progress = McpProgress::new(context.peer.clone());
        Ok(self
            .run_search_until_cancelled(params, &progress, &context.ct)
            .await)
    }
}

#[tool_handler]
impl ServerHandler for SearchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Perplexity search server. Call `search` with a keyword to get an answer \
                 with numbered citations."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_logging()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "perplexity-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
