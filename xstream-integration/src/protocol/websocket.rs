use crate::error::DataError;
use std::fmt::Debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, connect_async,
    tungstenite::{Message as WsMessage, client::IntoClientRequest},
};
use tracing::debug;
use url::Url;

/// Convenient alias for a tungstenite `WebSocketStream` over a possibly-TLS
/// stream, matching what every `WSHandler` in this crate ultimately reads
/// and writes frames through.
pub type WebSocket = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sink half of a split [`WebSocket`].
pub type WsSink = futures::stream::SplitSink<WebSocket, WsMessage>;

/// Stream half of a split [`WebSocket`].
pub type WsStream = futures::stream::SplitStream<WebSocket>;

/// Connect directly (no proxy) to a WebSocket server.
pub async fn connect<R>(request: R) -> Result<WebSocket, DataError>
where
    R: IntoClientRequest + Unpin + Debug,
{
    debug!(?request, "attempting to establish WebSocket connection");
    connect_async(request)
        .await
        .map(|(socket, _response)| socket)
        .map_err(DataError::from)
}

/// Connect to `target` by first tunnelling a plain TCP connection through
/// an HTTP `CONNECT` capable `proxy`, then performing the usual WebSocket
/// (and, for `wss://`, TLS) handshake over that tunnel.
pub async fn connect_via_proxy(target: &Url, proxy: &Url) -> Result<WebSocket, DataError> {
    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| DataError::InvalidUrl("proxy URL has no host".into()))?;
    let proxy_port = proxy
        .port_or_known_default()
        .ok_or_else(|| DataError::InvalidUrl("proxy URL has no port".into()))?;

    let target_host = target
        .host_str()
        .ok_or_else(|| DataError::InvalidUrl("target URL has no host".into()))?;
    let target_port = target.port_or_known_default().unwrap_or(match target.scheme() {
        "wss" => 443,
        _ => 80,
    });

    let mut tcp = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(|e| DataError::Transport(format!("proxy connect failed: {e}")))?;

    let connect_req = format!(
        "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n\r\n"
    );
    tcp.write_all(connect_req.as_bytes())
        .await
        .map_err(|e| DataError::Transport(format!("proxy CONNECT write failed: {e}")))?;

    let mut buf = [0u8; 512];
    let n = tcp
        .read(&mut buf)
        .await
        .map_err(|e| DataError::Transport(format!("proxy CONNECT read failed: {e}")))?;
    let response = String::from_utf8_lossy(&buf[..n]);
    if !response.starts_with("HTTP/1.1 200") && !response.starts_with("HTTP/1.0 200") {
        return Err(DataError::Transport(format!(
            "proxy CONNECT rejected: {response}"
        )));
    }

    let request = target
        .as_str()
        .into_client_request()
        .map_err(|e| DataError::InvalidUrl(e.to_string()))?;

    let (socket, _response) = tokio_tungstenite::client_async_tls(request, tcp)
        .await
        .map_err(DataError::from)?;
    Ok(socket)
}

/// Determine whether a tungstenite error indicates the connection is
/// already gone (vs. a transient protocol hiccup worth surfacing).
pub fn is_disconnected(error: &tokio_tungstenite::tungstenite::Error) -> bool {
    use tokio_tungstenite::tungstenite::Error as WsError;
    matches!(error, WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_))
}
