//! Endpoint types for the CSI gRPC listener.

use std::path::PathBuf;

/// Endpoint the node agent listens on.
///
/// Orchestrators normally hand the plugin a unix socket inside a shared
/// plugin directory; TCP is accepted for local debugging.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Transport {
    /// TCP transport
    Tcp { host: String, port: u16 },

    /// Unix socket transport
    Unix { socket_path: PathBuf },
}

impl Transport {
    /// Create a TCP transport.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Create a Unix socket transport.
    pub fn unix(socket_path: PathBuf) -> Self {
        Self::Unix { socket_path }
    }

    /// Get the URI representation of this transport.
    pub fn to_uri(&self) -> String {
        match self {
            Transport::Tcp { host, port } => format!("tcp://{}:{}", host, port),
            Transport::Unix { socket_path } => format!("unix://{}", socket_path.display()),
        }
    }

    /// Parse a transport from a URI string.
    ///
    /// A bare absolute path is treated as a unix socket, matching how some
    /// orchestrators pass `CSI_ENDPOINT`.
    pub fn from_uri(uri: &str) -> Result<Self, String> {
        if let Some(rest) = uri.strip_prefix("tcp://") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| format!("invalid TCP URI '{}': missing port", uri))?;
            let port = port
                .parse::<u16>()
                .map_err(|e| format!("invalid TCP port in '{}': {}", uri, e))?;
            let host = if host.is_empty() { "127.0.0.1" } else { host };
            Ok(Self::tcp(host, port))
        } else if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(format!("invalid unix URI '{}': missing socket path", uri));
            }
            Ok(Self::unix(PathBuf::from(path)))
        } else if uri.starts_with('/') {
            Ok(Self::unix(PathBuf::from(uri)))
        } else {
            Err(format!(
                "invalid transport URI '{}': expected tcp:// or unix://",
                uri
            ))
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_uri(s)
    }
}
