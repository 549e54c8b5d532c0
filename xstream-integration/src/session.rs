use crate::error::DataError;
use crate::protocol::websocket::{WebSocket, self as ws};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::debug;
use url::Url;

/// Default total timeout applied to every REST request issued through a
/// [`Session`], matching the transport-level default every adapter inherits
/// unless it asks for something tighter.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// A lazily-configured HTTP/WebSocket transport shared by a `WSHandler` and,
/// optionally, the one-off REST calls an order book merger needs to fetch a
/// snapshot.
///
/// Proxy configuration is read from the environment the first time a
/// [`Session`] is built: `HTTP_PROXY`/`HTTPS_PROXY` govern REST calls as
/// usual, and `WS_PROXY`/`WSS_PROXY` (falling back to the HTTP/HTTPS
/// variants) govern WebSocket connects, since `ws://`/`wss://` targets are
/// tunnelled over the same CONNECT-capable proxy as `http://`/`https://`.
#[derive(Debug, Clone)]
pub struct Session {
    http: reqwest::Client,
}

impl Session {
    /// Build a `Session` with the default 20 second total request timeout,
    /// trusting environment proxy variables.
    pub fn new() -> Result<Self, DataError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DataError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DataError::from)?;
        Ok(Self { http })
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Issue a REST request against `url`, returning the raw response body.
    pub async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: Option<reqwest::header::HeaderMap>,
        query: Option<&[(&str, String)]>,
        body: Option<serde_json::Value>,
    ) -> Result<bytes::Bytes, DataError> {
        let mut builder = self.http.request(method, url);
        if let Some(headers) = headers {
            builder = builder.headers(headers);
        }
        if let Some(query) = query {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(DataError::from)?;
        let status = response.status();
        let payload = response.bytes().await.map_err(DataError::from)?;
        if !status.is_success() {
            return Err(DataError::Transport(format!(
                "http {status}: {}",
                String::from_utf8_lossy(&payload)
            )));
        }
        Ok(payload)
    }

    /// Open a WebSocket connection to `url`, tunnelling through
    /// `WS_PROXY`/`WSS_PROXY`/`HTTP_PROXY`/`HTTPS_PROXY` when set.
    pub async fn ws_connect(&self, url: &str) -> Result<WebSocket, DataError> {
        let parsed = Url::parse(url).map_err(DataError::from)?;

        if let Some(proxy_url) = resolve_ws_proxy(&parsed) {
            debug!(%url, %proxy_url, "connecting through proxy");
            return ws::connect_via_proxy(&parsed, &proxy_url).await;
        }

        let request = url
            .into_client_request()
            .map_err(|e| DataError::InvalidUrl(e.to_string()))?;
        ws::connect(request).await
    }
}

/// Resolve the proxy URL a `ws://`/`wss://` connect should tunnel through,
/// mapping the scheme to its `http`/`https` equivalent the way a plain
/// browser or `curl` would when consulting environment proxy variables.
fn resolve_ws_proxy(target: &Url) -> Option<Url> {
    let is_secure = matches!(target.scheme(), "wss");
    let candidates: &[&str] = if is_secure {
        &["WSS_PROXY", "WS_PROXY", "HTTPS_PROXY", "https_proxy"]
    } else {
        &["WS_PROXY", "HTTP_PROXY", "http_proxy"]
    };

    candidates
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .and_then(|value| Url::parse(&value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ws_proxy_prefers_specific_over_generic() {
        // SAFETY net for the test: scoped env vars, cleared afterwards.
        std::env::set_var("WSS_PROXY", "http://proxy.local:8080");
        std::env::set_var("HTTPS_PROXY", "http://other.local:9090");

        let target = Url::parse("wss://stream.example.com/ws").unwrap();
        let resolved = resolve_ws_proxy(&target).unwrap();
        assert_eq!(resolved.host_str(), Some("proxy.local"));

        std::env::remove_var("WSS_PROXY");
        std::env::remove_var("HTTPS_PROXY");
    }

    #[test]
    fn test_resolve_ws_proxy_absent_when_unset() {
        std::env::remove_var("WS_PROXY");
        std::env::remove_var("HTTP_PROXY");
        std::env::remove_var("http_proxy");

        let target = Url::parse("ws://stream.example.com/ws").unwrap();
        assert!(resolve_ws_proxy(&target).is_none());
    }
}
