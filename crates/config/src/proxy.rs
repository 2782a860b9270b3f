//! Outbound proxy resolution
//!
//! Protocol-specific proxies win over `all_proxy`, which is only a fallback for
//! an empty protocol-specific field.

use crate::types::ProxyConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

pub const INVALID_PROXY_URL: &str = "invalid_proxy_url";

impl ProxyConfig {
    /// Effective proxy per scheme (`"http"`, `"https"`). Schemes without any
    /// configured proxy are omitted.
    pub fn effective_proxy_map(&self) -> BTreeMap<&'static str, String> {
        let mut proxies = BTreeMap::new();

        for (scheme, specific) in [("http", &self.http_proxy), ("https", &self.https_proxy)] {
            if !specific.is_empty() {
                proxies.insert(scheme, specific.clone());
            } else if !self.all_proxy.is_empty() {
                proxies.insert(scheme, self.all_proxy.clone());
            }
        }

        proxies
    }

    /// Collapse the proxy map to one URL for clients that take a single proxy.
    /// Prefers the `https` entry, then `http`.
    pub fn single_effective_proxy(&self) -> Option<String> {
        let mut proxies = self.effective_proxy_map();
        proxies.remove("https").or_else(|| proxies.remove("http"))
    }

    pub fn no_proxy_list(&self) -> Option<&str> {
        let trimmed = self.no_proxy.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// A proxy URL is usable when it has both a scheme and a host
pub fn validate_proxy_url(proxy_url: &str) -> bool {
    match Url::parse(proxy_url) {
        Ok(url) => !url.scheme().is_empty() && url.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// Redacted description of a proxy URL, safe to log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProxyInfo {
    Parsed {
        scheme: String,
        host: String,
        /// Explicit port, or `"default"`
        port: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth: Option<String>,
    },
    Invalid { error: &'static str },
}

impl fmt::Display for ProxyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyInfo::Parsed {
                scheme,
                host,
                port,
                auth,
            } => {
                write!(f, "{scheme}://{host}:{port}")?;
                if let Some(auth) = auth {
                    write!(f, " (auth {auth})")?;
                }
                Ok(())
            }
            ProxyInfo::Invalid { error } => f.write_str(error),
        }
    }
}

/// Parse a proxy URL for display. Credentials become `"<user>:***"`; parse
/// failures yield [`ProxyInfo::Invalid`].
pub fn describe_proxy(proxy_url: &str) -> ProxyInfo {
    let Ok(url) = Url::parse(proxy_url) else {
        return ProxyInfo::Invalid {
            error: INVALID_PROXY_URL,
        };
    };

    let auth = (!url.username().is_empty()).then(|| format!("{}:***", url.username()));

    ProxyInfo::Parsed {
        scheme: url.scheme().to_string(),
        host: url.host_str().unwrap_or("unknown").to_string(),
        port: url
            .port()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "default".to_string()),
        auth,
    }
}
