use std::path::PathBuf;

use thiserror::Error;

/// Transport-level failure classes observed while talking through a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Timeout,
    ConnectionRefused,
    Proxy,
    Tls,
    Other,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Timeout => "timeout",
            TransportKind::ConnectionRefused => "connection-refused",
            TransportKind::Proxy => "proxy-error",
            TransportKind::Tls => "tls-error",
            TransportKind::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for proxyrank
#[derive(Error, Debug)]
pub enum RankError {
    // Input errors
    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Input file not found: {}", .0.display())]
    InputFileMissing(PathBuf),

    // Transport errors
    #[error("Transport failure ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    // Resolution errors
    #[error("Failed to resolve local IP: {0}")]
    IpResolution(String),

    // Persistence errors
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Pool errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for proxyrank operations
pub type Result<T> = std::result::Result<T, RankError>;

impl RankError {
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        RankError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Whether this error must end the whole run rather than a single unit.
    ///
    /// Input and transport errors stay scoped to the proxy they concern.
    pub fn is_fatal_for_batch(&self) -> bool {
        match self {
            RankError::InvalidProxyAddress(_)
            | RankError::InputFileMissing(_)
            | RankError::Transport { .. }
            | RankError::NoProxiesAvailable => false,

            RankError::IpResolution(_)
            | RankError::Persistence { .. }
            | RankError::Serialization(_)
            | RankError::InvalidConfig(_)
            | RankError::Io(_)
            | RankError::Internal(_) => true,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, RankError::Transport { .. })
    }
}
