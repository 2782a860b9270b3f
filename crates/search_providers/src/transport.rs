//! HTTP transport seam for the search gateway
//!
//! The gateway decides *what* to send; a [`SearchTransport`] only moves bytes.
//! [`ReqwestTransport`] is the production implementation; tests plug in
//! [`crate::mock::MockTransport`].

use crate::models::ChatCompletionRequest;
use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, NoProxy, Proxy, Url};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// A validated proxy to route one request through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub url: String,
    /// Comma separated hosts that bypass the proxy
    pub no_proxy: Option<String>,
}

impl ProxyRoute {
    /// Whether a request to `url` goes through this proxy, as opposed to
    /// connecting directly because its host is on the `no_proxy` list.
    ///
    /// Entries follow the usual `NO_PROXY` rules: `*` bypasses everything, a
    /// domain matches itself and its subdomains (a leading `.` or `*.` is
    /// ignored), and IP addresses match exactly or by CIDR block.
    pub fn applies_to(&self, url: &str) -> bool {
        let Some(list) = self.no_proxy.as_deref() else {
            return true;
        };
        let Ok(url) = Url::parse(url) else {
            return true;
        };
        let Some(host) = url.host_str() else {
            return true;
        };
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();

        !list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .any(|entry| bypasses(entry, &host))
    }
}

fn bypasses(entry: &str, host: &str) -> bool {
    if entry == "*" {
        return true;
    }

    if let Ok(addr) = host.parse::<IpAddr>() {
        return match entry.split_once('/') {
            Some((network, prefix)) => in_cidr(addr, network, prefix),
            None => entry
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip == addr),
        };
    }

    let domain = entry
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .to_ascii_lowercase();
    !domain.is_empty()
        && (host == domain
            || host
                .strip_suffix(domain.as_str())
                .is_some_and(|rest| rest.ends_with('.')))
}

fn in_cidr(addr: IpAddr, network: &str, prefix: &str) -> bool {
    let (Ok(network), Ok(prefix)) = (network.parse::<IpAddr>(), prefix.parse::<u32>()) else {
        return false;
    };

    match (addr, network) {
        (IpAddr::V4(addr), IpAddr::V4(network)) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            u32::from(addr) & mask == u32::from(network) & mask
        }
        (IpAddr::V6(addr), IpAddr::V6(network)) if prefix <= 128 => {
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            u128::from(addr) & mask == u128::from(network) & mask
        }
        _ => false,
    }
}

/// Everything a transport needs for one POST
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub url: String,
    pub api_key: String,
    pub body: ChatCompletionRequest,
    pub timeout: Duration,
    /// `None` means connect directly, ignoring any system proxy
    pub proxy: Option<ProxyRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("proxy error: {0}")]
    Proxy(String),
    #[error("connection error: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport.
///
/// A fresh client is built for every request and dropped when the request
/// finishes, so timeout and proxy settings never leak between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestTransport;

impl ReqwestTransport {
    pub fn new() -> Self {
        Self
    }

    fn build_client(&self, request: &TransportRequest) -> Result<Client, TransportError> {
        let mut builder = Client::builder().timeout(request.timeout);

        builder = match &request.proxy {
            Some(route) => {
                let proxy = Proxy::all(&route.url)
                    .map_err(|e| TransportError::Proxy(format!("invalid proxy {}: {e}", route.url)))?
                    .no_proxy(route.no_proxy.as_deref().and_then(NoProxy::from_string));
                builder.proxy(proxy)
            }
            // Do not fall back to HTTP(S)_PROXY picked up by reqwest itself
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to create HTTP client: {e}")))
    }
}

fn build_headers(api_key: &str) -> Result<reqwest::header::HeaderMap, TransportError> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("Content-Type", HeaderValue::from_static("application/json"));
    headers.insert("Accept", HeaderValue::from_static("application/json"));

    let auth_value = format!("Bearer {api_key}");
    let header_value = HeaderValue::from_str(&auth_value)
        .map_err(|e| TransportError::Other(format!("Invalid API key format: {e}")))?;
    headers.insert("Authorization", header_value);

    Ok(headers)
}

fn classify(error: reqwest::Error, proxied: bool) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() && proxied {
        TransportError::Proxy(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl SearchTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.build_client(&request)?;
        let headers = build_headers(&request.api_key)?;
        let proxied = request
            .proxy
            .as_ref()
            .is_some_and(|route| route.applies_to(&request.url));

        let response = client
            .post(&request.url)
            .headers(headers)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| classify(e, proxied))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| classify(e, proxied))?;

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_headers() {
        let headers = build_headers("pplx-test-key").unwrap();

        assert_eq!(
            headers.get("Authorization").unwrap().to_str().unwrap(),
            "Bearer pplx-test-key"
        );
        assert_eq!(
            headers.get("Content-Type").unwrap().to_str().unwrap(),
            "application/json"
        );
        assert_eq!(
            headers.get("Accept").unwrap().to_str().unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_build_headers_rejects_control_characters() {
        let err = build_headers("bad\nkey").unwrap_err();
        assert!(matches!(err, TransportError::Other(msg) if msg.contains("Invalid API key")));
    }

    fn request_with_proxy(proxy: Option<ProxyRoute>) -> TransportRequest {
        TransportRequest {
            url: "https://api.perplexity.ai/chat/completions".to_string(),
            api_key: "k".to_string(),
            body: ChatCompletionRequest {
                model: "sonar".to_string(),
                messages: vec![],
            },
            timeout: Duration::from_secs(5),
            proxy,
        }
    }

    fn route(no_proxy: Option<&str>) -> ProxyRoute {
        ProxyRoute {
            url: "http://proxy.local:3128".to_string(),
            no_proxy: no_proxy.map(str::to_string),
        }
    }

    #[test]
    fn test_proxy_applies_without_no_proxy_list() {
        assert!(route(None).applies_to("https://api.perplexity.ai/chat/completions"));
    }

    #[test]
    fn test_no_proxy_domain_matching() {
        let route = route(Some("localhost, .internal,*.corp.example"));

        assert!(!route.applies_to("http://localhost:8080/x"));
        assert!(!route.applies_to("http://api.internal/x"));
        assert!(!route.applies_to("http://internal/x"));
        assert!(!route.applies_to("https://deep.corp.example/x"));
        assert!(route.applies_to("https://notinternal/x"));
        assert!(route.applies_to("https://api.perplexity.ai/chat/completions"));
    }

    #[test]
    fn test_no_proxy_ip_and_cidr_matching() {
        let route = route(Some("127.0.0.1,10.0.0.0/8,::1"));

        assert!(!route.applies_to("http://127.0.0.1:9/chat/completions"));
        assert!(!route.applies_to("http://10.20.30.40/x"));
        assert!(!route.applies_to("http://[::1]:8000/x"));
        assert!(route.applies_to("http://127.0.0.2/x"));
        assert!(route.applies_to("http://192.168.1.1/x"));
    }

    #[test]
    fn test_no_proxy_wildcard_bypasses_everything() {
        assert!(!route(Some("*")).applies_to("https://api.perplexity.ai/"));
    }

    #[test]
    fn test_build_client_direct_and_proxied() {
        let transport = ReqwestTransport::new();

        assert!(transport.build_client(&request_with_proxy(None)).is_ok());
        assert!(transport
            .build_client(&request_with_proxy(Some(ProxyRoute {
                url: "http://proxy.local:3128".to_string(),
                no_proxy: Some("localhost,.internal".to_string()),
            })))
            .is_ok());
    }
}
