//! Test doubles for the search gateway
//!
//! [`MockTransport`] replays a scripted queue of responses and records every
//! request it sees. [`RecordingProgress`] captures progress events in order.

use crate::progress::{ProgressLevel, ProgressSink};
use crate::transport::{SearchTransport, TransportError, TransportRequest, TransportResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

type Scripted = Result<TransportResponse, TransportError>;

/// Scripted transport. When the queue runs dry every further call answers
/// with an empty successful completion.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, status: u16, body: impl Into<String>) -> Self {
        self.push(Ok(TransportResponse {
            status,
            body: body.into(),
        }));
        self
    }

    pub fn with_error(self, error: TransportError) -> Self {
        self.push(Err(error));
        self
    }

    fn push(&self, entry: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(entry);
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SearchTransport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        next.unwrap_or_else(|| {
            Ok(TransportResponse {
                status: 200,
                body: completion_body(&[], &[]),
            })
        })
    }
}

/// Progress sink that keeps every event
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(ProgressLevel, String)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(ProgressLevel, String)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<(ProgressLevel, String)> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn emit(&self, level: ProgressLevel, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}

/// Chat completions response body in the upstream shape
pub fn completion_body(contents: &[&str], citations: &[&str]) -> String {
    let choices: Vec<serde_json::Value> = contents
        .iter()
        .enumerate()
        .map(|(index, content)| {
            serde_json::json!({
                "index": index,
                "finish_reason": "stop",
                "message": {"role": "assistant", "content": content}
            })
        })
        .collect();

    serde_json::json!({
        "id": "mock-completion",
        "object": "chat.completion",
        "model": "sonar",
        "choices": choices,
        "citations": citations,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompletionPayload;

    #[test]
    fn test_completion_body_parses() {
        let payload = CompletionPayload::parse(&completion_body(&["A", "B"], &["http://x"])).unwrap();

        assert_eq!(payload.choices.len(), 2);
        assert_eq!(payload.choices[1].content(), Some("B"));
        assert_eq!(payload.citations, vec!["http://x"]);
    }

    #[tokio::test]
    async fn test_recording_progress_keeps_order() {
        let progress = RecordingProgress::new();
        progress.info("first").await;
        progress.error("second").await;

        assert_eq!(
            progress.events(),
            vec![
                (ProgressLevel::Info, "first".to_string()),
                (ProgressLevel::Error, "second".to_string()),
            ]
        );
    }
}
