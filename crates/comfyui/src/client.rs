//! WebSocket client for the ComfyUI event stream.
//!
//! [`ComfyUIClient`] holds the addressing for a single ComfyUI instance.
//! Call [`ComfyUIClient::connect`] with the same `client_id` that was sent
//! along with the workflow so that ComfyUI routes that job's execution
//! events to this connection.

use std::time::Duration;

use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::endpoint::EngineEndpoint;

/// Upper bound on the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw WebSocket stream type used throughout the crate.
pub type EventStream =
    tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI event stream.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    endpoint: EngineEndpoint,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: EventStream,
}

impl ComfyUIClient {
    pub fn new(endpoint: EngineEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &EngineEndpoint {
        &self.endpoint
    }

    /// Connect to `/ws?clientId={client_id}`.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.endpoint.ws_url(client_id);

        let handshake = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                ComfyUIClientError::Connection(format!(
                    "Timed out connecting to ComfyUI at {}",
                    self.endpoint.ws_base()
                ))
            })?;
        let (ws_stream, _response) = handshake.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.endpoint.ws_base()
            ))
        })?;

        tracing::debug!(
            client_id = %client_id,
            "Connected to ComfyUI event stream at {}",
            self.endpoint.ws_base(),
        );

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
