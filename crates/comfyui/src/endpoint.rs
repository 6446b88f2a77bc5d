//! ComfyUI endpoint addressing.
//!
//! One configured base URL yields both the HTTP API base and the WebSocket
//! event-stream URL. The WebSocket side keeps only scheme, host and port of
//! the base URL.

use url::Url;

/// Default ComfyUI port.
pub const DEFAULT_COMFYUI_PORT: u16 = 8188;

/// Default host when the URL has none.
pub const DEFAULT_COMFYUI_HOST: &str = "127.0.0.1";

const HTTPS_PORT: u16 = 443;

/// Resolved addresses for one ComfyUI instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEndpoint {
    api_url: String,
    host: String,
    port: u16,
    secure: bool,
}

/// Errors raised while parsing an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("ComfyUI endpoint URL cannot be empty")]
    Empty,

    #[error("Invalid ComfyUI endpoint URL '{url}': {reason}")]
    Invalid { url: String, reason: String },
}

impl EngineEndpoint {
    /// Parse a full base URL such as `https://gpu.example.com` or
    /// `http://10.0.0.5:8188/`.
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        let normalized = url.trim().trim_end_matches('/');
        if normalized.is_empty() {
            return Err(EndpointError::Empty);
        }

        let parsed = Url::parse(normalized).map_err(|e| EndpointError::Invalid {
            url: normalized.to_string(),
            reason: e.to_string(),
        })?;
        let secure = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(EndpointError::Invalid {
                    url: normalized.to_string(),
                    reason: format!("unsupported scheme '{other}' (expected http/https)"),
                })
            }
        };

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_COMFYUI_HOST)
            .to_string();
        // `Url::port` is `None` for the scheme's default port, so an explicit
        // `https://host:443` and a bare `https://host` end up equal.
        let port = parsed
            .port()
            .unwrap_or(if secure { HTTPS_PORT } else { DEFAULT_COMFYUI_PORT });

        Ok(Self {
            api_url: normalized.to_string(),
            host,
            port,
            secure,
        })
    }

    /// Build from a host and port; port 443 selects HTTPS.
    pub fn from_host_port(host: &str, port: u16) -> Result<Self, EndpointError> {
        let host = match host.trim() {
            "" => DEFAULT_COMFYUI_HOST,
            h => h,
        };
        if port == HTTPS_PORT {
            Self::parse(&format!("https://{host}"))
        } else {
            Self::parse(&format!("http://{host}:{port}"))
        }
    }

    /// HTTP API base without trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `wss` for HTTPS endpoints, `ws` otherwise.
    pub fn ws_scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// WebSocket base, e.g. `ws://host:8188` (port omitted for `wss` on 443).
    pub fn ws_base(&self) -> String {
        if self.secure && self.port == HTTPS_PORT {
            format!("{}://{}", self.ws_scheme(), self.host)
        } else {
            format!("{}://{}:{}", self.ws_scheme(), self.host, self.port)
        }
    }

    /// Event-stream URL for a client correlation id.
    pub fn ws_url(&self, client_id: &str) -> String {
        format!("{}/ws?clientId={client_id}", self.ws_base())
    }
}

impl std::fmt::Display for EngineEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.api_url)
    }
}
