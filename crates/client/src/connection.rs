//! WebSocket endpoint of the push channel.
//!
//! [`StreamEndpoint`] holds the address of the push channel. Call
//! [`StreamEndpoint::connect`] to open a live [`WsStream`]. The address is
//! normally derived from the REST base URL with [`stream_url`].

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// A live WebSocket stream to the backend.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Path of the push channel on the backend.
pub const STREAM_PATH: &str = "/ws";

/// Derive the push-channel URL from the REST base URL by swapping the
/// scheme for its streaming equivalent (`http -> ws`, `https -> wss`).
pub fn stream_url(api_url: &str) -> Result<String, StreamError> {
    let base = Url::parse(api_url.trim())
        .map_err(|e| StreamError::InvalidUrl(format!("'{api_url}': {e}")))?;

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(StreamError::InvalidUrl(format!(
                "unsupported scheme '{other}'; expected http(s) or ws(s)"
            )));
        }
    };

    let mut ws_url = base.clone();
    ws_url
        .set_scheme(ws_scheme)
        .map_err(|_| StreamError::InvalidUrl(format!("cannot use scheme {ws_scheme} for '{api_url}'")))?;
    ws_url.set_fragment(None);
    ws_url.set_query(None);
    ws_url.set_path(STREAM_PATH);

    Ok(ws_url.to_string())
}

/// Address of the push channel.
#[derive(Debug, Clone)]
pub struct StreamEndpoint {
    ws_url: String,
}

impl StreamEndpoint {
    /// * `ws_url` - full WebSocket URL, e.g. `ws://host:8000/ws`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    /// Endpoint derived from the REST base URL.
    pub fn from_api_url(api_url: &str) -> Result<Self, StreamError> {
        Ok(Self::new(stream_url(api_url)?))
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open a WebSocket connection.
    pub async fn connect(&self) -> Result<WsStream, StreamError> {
        let (ws_stream, _response) = connect_async(self.ws_url.as_str()).await.map_err(|e| {
            StreamError::Connection(format!("Failed to connect to {}: {e}", self.ws_url))
        })?;

        tracing::info!(ws_url = %self.ws_url, "Push channel connected");
        Ok(ws_stream)
    }
}

/// Errors raised while establishing the push channel.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The configured address cannot be used as a WebSocket URL.
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
