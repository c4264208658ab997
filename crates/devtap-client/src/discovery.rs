//! Target discovery over the DevTools HTTP endpoint.
//!
//! A browser started with `--remote-debugging-port` lists its debuggable
//! targets at `http://{host}:{port}/json/list`; each entry carries the
//! WebSocket URL a [`Connection`](crate::Connection) attaches to.

use std::time::Duration;

use reqwest::Client;

use crate::config::ClientConfig;
use crate::error::CdpError;
use crate::types::TargetInfo;

/// Host and port of a browser's remote debugging endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserEndpoint {
    pub host: String,
    pub port: u16,
    timeout: Duration,
}

impl Default for BrowserEndpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", 9222)
    }
}

impl BrowserEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_millis(ClientConfig::default().discovery_timeout_ms),
        }
    }

    /// Use the discovery timeout from `config`.
    pub fn with_config(mut self, config: &ClientConfig) -> Self {
        self.timeout = Duration::from_millis(config.discovery_timeout_ms);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn list_url(&self) -> String {
        format!("http://{}:{}/json/list", self.host, self.port)
    }

    /// Fetch the current target list, in the order the browser reports it.
    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>, CdpError> {
        let url = self.list_url();
        tracing::debug!(url = %url, "listing DevTools targets");

        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| CdpError::Discovery {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| CdpError::Discovery {
                reason: format!("failed to reach {url}: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CdpError::Discovery {
                reason: format!("{url} answered with HTTP {status}"),
            });
        }

        let body = response.text().await.map_err(|e| CdpError::Discovery {
            reason: format!("failed to read response from {url}: {e}"),
        })?;
        let targets = parse_targets(&body)?;
        tracing::debug!(count = targets.len(), "found DevTools targets");
        Ok(targets)
    }
}

/// Decode a `/json/list` response body.
pub fn parse_targets(body: &str) -> Result<Vec<TargetInfo>, CdpError> {
    if body.trim().is_empty() {
        return Err(CdpError::Discovery {
            reason: "target list response was empty".into(),
        });
    }
    serde_json::from_str(body).map_err(|e| CdpError::Discovery {
        reason: format!("target list is not valid JSON: {e}"),
    })
}

/// First page target whose URL contains `needle`.
pub fn find_target<'a>(targets: &'a [TargetInfo], needle: &str) -> Option<&'a TargetInfo> {
    targets
        .iter()
        .filter(|t| t.target_type == "page")
        .find(|t| t.url.contains(needle))
}
