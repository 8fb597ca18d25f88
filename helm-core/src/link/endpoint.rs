use url::Url;

use crate::error::LinkError;

/// Address of a remote duplex socket.
///
/// Validated once at construction and immutable afterwards; a channel
/// keeps the same endpoint for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parse a `ws://` or `wss://` URI.
    pub fn parse(uri: &str) -> Result<Self, LinkError> {
        let url = Url::parse(uri).map_err(|e| LinkError::InvalidEndpoint {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(LinkError::InvalidEndpoint {
                uri: uri.to_string(),
                reason: format!("unsupported scheme {other:?}"),
            }),
        }
    }

    /// Parse an optional URI, treating an empty string as absent.
    pub fn parse_optional(uri: &str) -> Result<Option<Self>, LinkError> {
        if uri.trim().is_empty() {
            Ok(None)
        } else {
            Self::parse(uri).map(Some)
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Whether the transport is TLS-protected.
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}
