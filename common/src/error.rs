use thiserror::Error;

/// Failure taxonomy of one wake cycle. The `Display` text of every non-fatal
/// variant is exactly what ends up on the panel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("no wifi connection")]
    LinkTimeout,
    #[error("http {code} {reason}")]
    TransportFailure { code: i32, reason: String },
    #[error("bad response '{raw}'")]
    MalformedPayload { raw: String },
    #[error("cannot allocate render surface ({bytes} bytes)")]
    ResourceExhaustion { bytes: usize },
}

impl CycleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ResourceExhaustion { .. })
    }
}

/// Failure below the HTTP layer: no status line was ever received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection lost")]
    ConnectionLost,
    #[error("read timeout")]
    ReadTimeout,
}

impl TransportError {
    /// Codes follow the ESP32 HTTP client convention so the panel text stays
    /// comparable with field reports.
    pub fn code(&self) -> i32 {
        match self {
            Self::ConnectionRefused => -1,
            Self::ConnectionLost => -5,
            Self::ReadTimeout => -11,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PowerError {
    #[error("adc read failed: {0}")]
    Adc(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored state is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("cannot allocate render surface ({bytes} bytes)")]
    ResourceExhaustion { bytes: usize },
    #[error("panel driver error: {0}")]
    Driver(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Parse(#[from] serde_json::Error),
}
