//! Search providers crate for the Perplexity chat completions API
//!
//! The [`SearchGateway`] turns a [`SearchRequest`] into one outbound chat
//! completions call, classifies the result and formats the answer text.
//! Progress is reported through a [`ProgressSink`] so callers can forward it
//! to whatever channel they own.
//!
//! # Usage
//!
//! ```rust,ignore
//! use search_providers::{NoopProgress, SearchGateway, SearchRequest};
//! use std::sync::Arc;
//!
//! async fn example(config: config::ResolvedConfig) {
//!     let gateway = SearchGateway::new(Arc::new(config));
//!     match gateway.search(SearchRequest::new("rust async"), &NoopProgress).await {
//!         Ok(outcome) => println!("{}", outcome.into_text()),
//!         Err(e) => eprintln!("search failed: {e}"),
//!     }
//! }
//! ```

pub mod formatter;
pub mod gateway;
pub mod mock;
pub mod models;
pub mod progress;
pub mod transport;

pub use gateway::SearchGateway;
pub use mock::{MockTransport, RecordingProgress};
pub use models::{
    ChatCompletionRequest, ChatMessage, Choice, CompletionPayload, MessageRole, SearchError,
    SearchOutcome, SearchRequest, KNOWN_MODELS,
};
pub use progress::{NoopProgress, ProgressLevel, ProgressSink};
pub use transport::{
    ProxyRoute, ReqwestTransport, SearchTransport, TransportError, TransportRequest,
    TransportResponse,
};
