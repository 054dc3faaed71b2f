use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("connection to broker failed: {0}")]
    Connect(String),
    #[error("not connected to broker")]
    NotConnected,
    #[error("subscribe to `{topic}` failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("publish to `{topic}` failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("time query network error: {0}")]
    Network(String),
    #[error("time query timed out")]
    Timeout,
    #[error("invalid time response: {0}")]
    InvalidResponse(&'static str),
    #[error("time server stratum {0} is not usable")]
    InvalidStratum(u8),
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Network(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
#[error("{device}: {reason}")]
pub struct HardwareError {
    pub device: &'static str,
    pub reason: String,
}

impl HardwareError {
    pub fn new(device: &'static str, reason: impl Into<String>) -> Self {
        Self {
            device,
            reason: reason.into(),
        }
    }
}
