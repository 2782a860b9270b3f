use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Model identifiers documented for the `search` tool. Not enforced; any
/// string is forwarded upstream.
pub const KNOWN_MODELS: &[&str] = &[
    "sonar",
    "sonar-pro",
    "sonar-reasoning",
    "sonar-reasoning-pro",
    "sonar-deep-research",
];

/// One search call as received from a tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub keyword: String,
    /// Overrides the configured model
    pub model: Option<String>,
    /// Overrides the configured system message
    pub system_message: Option<String>,
}

impl SearchRequest {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            model: None,
            system_message: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Outbound chat completions payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// One candidate answer from the upstream API.
///
/// Decoded leniently: a choice without a string `message.content` is kept
/// but contributes no text.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
}

impl Choice {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message: Some(ChoiceMessage {
                role: Some("assistant".to_string()),
                content: Some(Value::String(content.into())),
            }),
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.message.as_ref()?.content.as_ref()?.as_str()
    }
}

/// The parts of a 200 response the gateway cares about
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPayload {
    pub choices: Vec<Choice>,
    pub citations: Vec<String>,
}

impl CompletionPayload {
    /// Parse a response body. Fails when the body is not JSON or has no
    /// `choices` array.
    pub fn parse(body: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| format!("response is not valid JSON: {e}"))?;

        let choices = match value.get("choices") {
            Some(Value::Array(choices)) => choices
                .iter()
                .map(|c| serde_json::from_value(c.clone()).unwrap_or_default())
                .collect(),
            Some(_) => return Err("`choices` is not an array".to_string()),
            None => return Err("missing `choices` field".to_string()),
        };

        let citations = match value.get("citations") {
            Some(Value::Array(citations)) => citations
                .iter()
                .map(|c| match c {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self { choices, citations })
    }
}

/// Successful result of a search call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Formatted answer text (citations appended) and the raw citation list
    Success { text: String, citations: Vec<String> },
    /// The API answered with zero choices
    Empty,
}

impl SearchOutcome {
    /// Caller-visible text for this outcome
    pub fn into_text(self) -> String {
        match self {
            SearchOutcome::Success { text, .. } => text,
            SearchOutcome::Empty => crate::formatter::NO_RESULTS.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error(
        "Perplexity API key is not configured; set it in the config file or PERPLEXITY_API_KEY"
    )]
    MissingCredential,
    #[error("Invalid search request: {0}")]
    InvalidRequest(String),
    #[error("Perplexity API request timed out after {seconds}s")]
    Timeout { seconds: f64 },
    #[error("Proxy connection failed: {0}")]
    ProxyFailure(String),
    #[error("Perplexity API request failed: {status} - {body}")]
    UpstreamStatus { status: u16, body: String },
    #[error("Invalid Perplexity API response: {0}")]
    MalformedResponse(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl SearchError {
    /// Stable identifier for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::MissingCredential => "missing_credential",
            SearchError::InvalidRequest(_) => "invalid_request",
            SearchError::Timeout { .. } => "timeout",
            SearchError::ProxyFailure(_) => "proxy_failure",
            SearchError::UpstreamStatus { .. } => "upstream_status",
            SearchError::MalformedResponse(_) => "malformed_response",
            SearchError::Unexpected(_) => "unexpected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "sonar".to_string(),
            messages: vec![
                ChatMessage {
                    role: MessageRole::System,
                    content: "Be precise and concise.".to_string(),
                },
                ChatMessage {
                    role: MessageRole::User,
                    content: "rust async".to_string(),
                },
            ],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "sonar",
                "messages": [
                    {"role": "system", "content": "Be precise and concise."},
                    {"role": "user", "content": "rust async"}
                ]
            })
        );
    }

    #[test]
    fn test_parse_payload_with_citations() {
        let body = r#"{
            "id": "abc",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Answer"}}],
            "citations": ["https://a.example", "https://b.example"]
        }"#;

        let payload = CompletionPayload::parse(body).unwrap();
        assert_eq!(payload.choices.len(), 1);
        assert_eq!(payload.choices[0].content(), Some("Answer"));
        assert_eq!(
            payload.citations,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_parse_payload_lenient_choices() {
        let body = r#"{"choices": [{"message": {"content": 42}}, "junk", {"delta": {}}]}"#;

        let payload = CompletionPayload::parse(body).unwrap();
        assert_eq!(payload.choices.len(), 3);
        assert!(payload.choices.iter().all(|c| c.content().is_none()));
        assert!(payload.citations.is_empty());
    }

    #[test]
    fn test_parse_payload_missing_choices() {
        let err = CompletionPayload::parse(r#"{"error": "nope"}"#).unwrap_err();
        assert!(err.contains("choices"));
    }

    #[test]
    fn test_parse_payload_choices_not_array() {
        assert!(CompletionPayload::parse(r#"{"choices": {}}"#).is_err());
    }

    #[test]
    fn test_parse_payload_not_json() {
        let err = CompletionPayload::parse("<html>bad gateway</html>").unwrap_err();
        assert!(err.contains("not valid JSON"));
    }

    #[test]
    fn test_error_display() {
        let err = SearchError::UpstreamStatus {
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Perplexity API request failed: 401 - unauthorized"
        );
        assert_eq!(err.kind(), "upstream_status");
    }

    #[test]
    fn test_empty_outcome_text() {
        assert_eq!(SearchOutcome::Empty.into_text(), "no results");
    }
}
