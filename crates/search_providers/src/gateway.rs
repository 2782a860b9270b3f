//! Outbound search pipeline
//!
//! ```text
//! SearchRequest ──► SearchGateway ──► SearchTransport (fresh client per attempt)
//!                        │                     │
//!                   ProgressSink        TransportResponse
//!                        │                     │
//!                        └──── classify ◄──────┘ ──► formatter ──► SearchOutcome
//! ```

use crate::{
    formatter,
    models::{
        ChatCompletionRequest, ChatMessage, CompletionPayload, MessageRole, SearchError,
        SearchOutcome, SearchRequest,
    },
    progress::ProgressSink,
    transport::{
        ProxyRoute, ReqwestTransport, SearchTransport, TransportError, TransportRequest,
        TransportResponse,
    },
};
use config::{describe_proxy, validate_proxy_url, ResolvedConfig, DEFAULT_TIMEOUT_SECONDS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct SearchGateway {
    config: Arc<ResolvedConfig>,
    transport: Arc<dyn SearchTransport>,
}

impl SearchGateway {
    pub fn new(config: Arc<ResolvedConfig>) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(config: Arc<ResolvedConfig>, transport: Arc<dyn SearchTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Requested model (or the configured default) with the model prefix applied
    pub fn effective_model(&self, requested: Option<&str>) -> String {
        let settings = &self.config.perplexity;
        let model = requested
            .filter(|m| !m.is_empty())
            .unwrap_or(&settings.model);
        settings.prefixed_model(model)
    }

    pub fn effective_system_message(&self, requested: Option<&str>) -> String {
        requested
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.config.perplexity.system_message)
            .to_string()
    }

    pub fn build_payload(&self, request: &SearchRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.effective_model(request.model.as_deref()),
            messages: vec![
                ChatMessage {
                    role: MessageRole::System,
                    content: self.effective_system_message(request.system_message.as_deref()),
                },
                ChatMessage {
                    role: MessageRole::User,
                    content: request.keyword.clone(),
                },
            ],
        }
    }

    /// Proxy for outbound calls. An invalid proxy URL is skipped with a
    /// warning and the call goes direct.
    pub async fn resolve_proxy(&self, progress: &dyn ProgressSink) -> Option<ProxyRoute> {
        let proxy = &self.config.proxy;
        let url = proxy.single_effective_proxy()?;

        if !validate_proxy_url(&url) {
            warn!(proxy = %describe_proxy(&url), "Invalid proxy URL, connecting directly");
            progress
                .warn("Invalid proxy URL in configuration, connecting directly")
                .await;
            return None;
        }

        debug!(proxy = %describe_proxy(&url), "Using outbound proxy");
        Some(ProxyRoute {
            url,
            no_proxy: proxy.no_proxy_list().map(str::to_string),
        })
    }

    fn timeout(&self) -> Duration {
        let seconds = self.config.perplexity.timeout;
        match Duration::try_from_secs_f64(seconds) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => {
                warn!(
                    timeout = seconds,
                    fallback = DEFAULT_TIMEOUT_SECONDS,
                    "Configured timeout is not usable, using default"
                );
                Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS)
            }
        }
    }

    fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.perplexity.retry_delay).unwrap_or(Duration::ZERO)
    }

    /// Run one search.
    ///
    /// Each classification is reported to `progress` before this returns.
    /// Timeouts are retried up to `max_retries` times with a fixed delay;
    /// every other failure is returned immediately.
    pub async fn search(
        &self,
        request: SearchRequest,
        progress: &dyn ProgressSink,
    ) -> Result<SearchOutcome, SearchError> {
        progress
            .info(&format!("Searching Perplexity: {}", request.keyword))
            .await;

        if !self.config.perplexity.has_api_key() {
            let err = SearchError::MissingCredential;
            warn!(kind = err.kind(), "Search rejected");
            progress.error(&err.to_string()).await;
            return Err(err);
        }

        if request.keyword.trim().is_empty() {
            let err = SearchError::InvalidRequest("keyword must not be empty".to_string());
            warn!(kind = err.kind(), "Search rejected");
            progress.error(&err.to_string()).await;
            return Err(err);
        }

        let payload = self.build_payload(&request);
        progress
            .info(&format!("Using model: {}", payload.model))
            .await;
        progress
            .debug(&format!(
                "System message: {}",
                self.effective_system_message(request.system_message.as_deref())
            ))
            .await;

        let transport_request = TransportRequest {
            url: self.config.perplexity.api_url.clone(),
            api_key: self.config.perplexity.api_key.clone(),
            body: payload,
            timeout: self.timeout(),
            proxy: self.resolve_proxy(progress).await,
        };

        progress.info("Calling Perplexity API...").await;
        let result = self.send_with_retry(transport_request, progress).await;

        self.classify(result, progress).await
    }

    async fn send_with_retry(
        &self,
        request: TransportRequest,
        progress: &dyn ProgressSink,
    ) -> Result<TransportResponse, TransportError> {
        let max_retries = self.config.perplexity.max_retries.max(0) as u64;
        let delay = self.retry_delay();
        let mut attempt: u64 = 0;

        loop {
            let started = std::time::Instant::now();
            let result = self.transport.send(request.clone()).await;
            debug!(
                attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "Perplexity API attempt finished"
            );

            match result {
                Err(TransportError::Timeout) if attempt < max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries, "Perplexity API timed out, retrying");
                    progress
                        .warn(&format!(
                            "Request timed out, retrying ({attempt}/{max_retries}) in {:.1}s",
                            delay.as_secs_f64()
                        ))
                        .await;
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn classify(
        &self,
        result: Result<TransportResponse, TransportError>,
        progress: &dyn ProgressSink,
    ) -> Result<SearchOutcome, SearchError> {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let err = match e {
                    TransportError::Timeout => SearchError::Timeout {
                        seconds: self.timeout().as_secs_f64(),
                    },
                    TransportError::Proxy(message) => SearchError::ProxyFailure(message),
                    TransportError::Connect(message) | TransportError::Other(message) => {
                        SearchError::Unexpected(message)
                    }
                };
                return Err(self.fail(err, progress).await);
            }
        };

        if response.status != 200 {
            let err = SearchError::UpstreamStatus {
                status: response.status,
                body: response.body,
            };
            return Err(self.fail(err, progress).await);
        }

        progress
            .debug(&format!("API response status: {}", response.status))
            .await;

        let payload = match CompletionPayload::parse(&response.body) {
            Ok(payload) => payload,
            Err(reason) => {
                return Err(self.fail(SearchError::MalformedResponse(reason), progress).await)
            }
        };

        if payload.choices.is_empty() {
            info!("Perplexity API returned no choices");
            progress.warn("API returned no choices").await;
            return Ok(SearchOutcome::Empty);
        }

        if !payload.citations.is_empty() {
            progress
                .info(&format!("Found {} citations", payload.citations.len()))
                .await;
        }

        let text = formatter::format(&payload.choices, &payload.citations);
        info!(
            choices = payload.choices.len(),
            citations = payload.citations.len(),
            chars = text.len(),
            "Search completed"
        );
        progress
            .info(&format!("Search completed, returning {} characters", text.len()))
            .await;

        Ok(SearchOutcome::Success {
            text,
            citations: payload.citations,
        })
    }

    /// Report a failure on the sink and in the logs, then hand it back
    async fn fail(&self, err: SearchError, progress: &dyn ProgressSink) -> SearchError {
        warn!(kind = err.kind(), error = %err, "Search failed");
        progress.error(&err.to_string()).await;

        match &err {
            SearchError::Timeout { .. }
                if !self.config.proxy.effective_proxy_map().is_empty() =>
            {
                progress
                    .error("If a proxy is in use, check the proxy configuration and network")
                    .await;
            }
            SearchError::ProxyFailure(_) => {
                progress
                    .error("Check the proxy configuration or try disabling the proxy")
                    .await;
            }
            _ => {}
        }

        err
    }
}
