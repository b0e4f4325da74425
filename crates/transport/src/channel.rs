//! Service channel
//!
//! One authenticated, full-duplex framed connection to the synthesis
//! service, used for exactly one chunk. Each open derives a fresh token
//! and connection id; closing is idempotent.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use readaloud_core::{Error, Result};

use crate::drm;

/// Default synthesis endpoint.
pub const DEFAULT_ENDPOINT: &str =
    "wss://speech.platform.bing.com/consumer/speech/synthesize/readaloud/edge/v1";

/// Version tag sent alongside the generated token.
pub const SEC_MS_GEC_VERSION: &str = "1-130.0.2849.68";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0";

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Service endpoint (tests and self-hosted gateways may override it)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Channel open timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Optional HTTP CONNECT proxy, e.g. `http://127.0.0.1:8888`
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_ms: default_connect_timeout_ms(),
            proxy: None,
        }
    }
}

/// A 32-character lowercase hex connection id (UUID v4 without hyphens).
pub fn connection_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn endpoint_url(config: &ChannelConfig) -> String {
    format!(
        "{}?TrustedClientToken={}&Sec-MS-GEC={}&Sec-MS-GEC-Version={}&ConnectionId={}",
        config.endpoint,
        drm::TRUSTED_CLIENT_TOKEN,
        drm::generate_token(),
        SEC_MS_GEC_VERSION,
        connection_id()
    )
}

/// One open connection to the service
#[derive(Debug)]
pub struct ServiceChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    receive_timeout: Duration,
}

impl ServiceChannel {
    /// Open a channel with a fresh token and connection id.
    pub async fn open(config: &ChannelConfig, receive_timeout: Duration) -> Result<Self> {
        let url = endpoint_url(config);
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::WebSocket(format!("invalid endpoint: {e}")))?;

        let headers = request.headers_mut();
        headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
        headers.insert("Accept", HeaderValue::from_static("*/*"));
        headers.insert("Accept-Encoding", HeaderValue::from_static("gzip, deflate, br"));
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("Pragma", HeaderValue::from_static("no-cache"));
        headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
        headers.insert(
            "Origin",
            HeaderValue::from_static("chrome-extension://jdiccldimpdaibmpdkjnbmckianbfold"),
        );
        // No Sec-WebSocket-Extensions offer: this transport has no
        // permessage-deflate support, and offering the extension would
        // invite the service to send compressed frames the codec cannot
        // decode.
        headers.insert("Sec-WebSocket-Protocol", HeaderValue::from_static("synthesize"));

        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let connect = async {
            match &config.proxy {
                Some(proxy) => connect_via_proxy(proxy, request).await,
                None => connect_async(request).await.map_err(map_ws_error),
            }
        };
        let ws = match timeout(connect_timeout, connect).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(Error::WebSocket(format!(
                    "channel open timed out after {} ms",
                    config.connect_timeout_ms
                )))
            }
        };

        tracing::debug!("channel open");
        Ok(Self { ws, receive_timeout })
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, frame: String) -> Result<()> {
        self.ws.send(Message::Text(frame)).await.map_err(map_ws_error)
    }

    /// Receive the next raw message, enforcing the receive timeout.
    pub async fn recv(&mut self) -> Result<Message> {
        match timeout(self.receive_timeout, self.ws.next()).await {
            Ok(Some(Ok(message))) => Ok(message),
            Ok(Some(Err(err))) => Err(map_ws_error(err)),
            Ok(None) => Err(Error::WebSocket(
                "connection closed before the turn ended".to_string(),
            )),
            Err(_) => Err(Error::WebSocket(format!(
                "no frame received within {} ms",
                self.receive_timeout.as_millis()
            ))),
        }
    }

    /// Close the channel. Repeated closes are no-ops.
    pub async fn close(&mut self) {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {}
            Err(err) => tracing::debug!(error = %err, "error while closing channel"),
        }
    }
}

type Connected = (
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    tokio_tungstenite::tungstenite::handshake::client::Response,
);

/// Tunnel through an HTTP CONNECT proxy, then run the TLS and WebSocket
/// handshakes over the tunneled stream.
async fn connect_via_proxy(
    proxy: &str,
    request: tokio_tungstenite::tungstenite::handshake::client::Request,
) -> Result<Connected> {
    let authority = proxy
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let host = request
        .uri()
        .host()
        .ok_or_else(|| Error::WebSocket("endpoint has no host".to_string()))?
        .to_string();
    let port = request
        .uri()
        .port_u16()
        .unwrap_or(if request.uri().scheme_str() == Some("wss") { 443 } else { 80 });

    let mut stream = TcpStream::connect(authority)
        .await
        .map_err(|e| Error::WebSocket(format!("proxy connect failed: {e}")))?;

    let connect = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: keep-alive\r\n\r\n"
    );
    stream
        .write_all(connect.as_bytes())
        .await
        .map_err(|e| Error::WebSocket(format!("proxy write failed: {e}")))?;

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() > 8192 {
            return Err(Error::WebSocket("proxy response too large".to_string()));
        }
        let read = stream
            .read(&mut byte)
            .await
            .map_err(|e| Error::WebSocket(format!("proxy read failed: {e}")))?;
        if read == 0 {
            return Err(Error::WebSocket(
                "proxy closed the connection during CONNECT".to_string(),
            ));
        }
        response.push(byte[0]);
    }

    let status_line = String::from_utf8_lossy(&response);
    let status_line = status_line.lines().next().unwrap_or_default();
    if !status_line.contains(" 200") {
        return Err(Error::WebSocket(format!(
            "proxy refused CONNECT: {status_line}"
        )));
    }

    tokio_tungstenite::client_async_tls(request, stream)
        .await
        .map_err(map_ws_error)
}

/// Map a transport error into the client taxonomy.
///
/// A rejected handshake with status 403 is an authentication failure; the
/// server date travels with it for clock-skew recovery.
fn map_ws_error(err: WsError) -> Error {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status == StatusCode::FORBIDDEN {
                Error::Drm {
                    reason: format!("service rejected the handshake with status {status}"),
                    server_date: response
                        .headers()
                        .get("date")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string),
                }
            } else {
                Error::WebSocket(format!("handshake rejected with status {status}"))
            }
        }
        other => Error::WebSocket(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_shape() {
        let id = connection_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
        assert_ne!(id, connection_id());
    }

    #[test]
    fn test_endpoint_url_query() {
        let config = ChannelConfig::default();
        let url = endpoint_url(&config);
        assert!(url.starts_with(DEFAULT_ENDPOINT));
        assert!(url.contains(&format!("TrustedClientToken={}", drm::TRUSTED_CLIENT_TOKEN)));
        assert!(url.contains("Sec-MS-GEC="));
        assert!(url.contains(&format!("Sec-MS-GEC-Version={SEC_MS_GEC_VERSION}")));
        assert!(url.contains("ConnectionId="));
    }

    #[test]
    fn test_config_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert!(config.proxy.is_none());
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[tokio::test]
    async fn test_open_times_out_against_unresponsive_listener() {
        // A bound listener that never accepts: the open must fail within
        // the configured timeout rather than hang.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ChannelConfig {
            endpoint: format!("ws://{addr}"),
            connect_timeout_ms: 200,
            proxy: None,
        };
        let err = ServiceChannel::open(&config, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "expected a transient error, got {err:?}");
    }
}
