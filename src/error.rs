//! Error types and result definitions for the tuya-doorbell crate.
//! Covers the connectivity, authentication and discovery failure modes the
//! hub has to route into its reconnect machinery.

use thiserror::Error;

/// Represents all possible errors that can occur while driving a doorbell.
#[derive(Error, Debug, Clone)]
pub enum DoorbellError {
    /// Standard IO error (network, socket reset, etc.)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// Request timed out
    #[error("Timeout waiting for device")]
    Timeout,

    /// TCP connection could not be established
    #[error("Socket connection failed")]
    ConnectionFailed,

    /// Device is currently unreachable or disconnected
    #[error("Device offline")]
    Offline,

    /// Local key or protocol version rejected by the device
    #[error("Authentication failed, check local key or protocol version")]
    Authentication,

    /// Subnet scan completed without locating the device
    #[error("Device not found on the local network")]
    NotFound,

    /// The payload received from the device was malformed or unexpected
    #[error("Invalid payload")]
    InvalidPayload,

    /// Hub entry id already exists in the registry
    #[error("Hub '{0}' already exists")]
    DuplicateHub(String),

    /// Hub entry id not found in the registry
    #[error("Hub '{0}' not found")]
    HubNotFound(String),
}

/// A specialized Result type for doorbell operations.
pub type Result<T> = std::result::Result<T, DoorbellError>;

impl From<std::io::Error> for DoorbellError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => DoorbellError::Timeout,
            std::io::ErrorKind::ConnectionRefused => DoorbellError::ConnectionFailed,
            _ => DoorbellError::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DoorbellError {
    fn from(err: serde_json::Error) -> Self {
        DoorbellError::Json(err.to_string())
    }
}

impl DoorbellError {
    /// Whether this error indicates the session itself is gone, so the hub
    /// should tear down and schedule a reconnect rather than retry in place.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            DoorbellError::Timeout
            | DoorbellError::ConnectionFailed
            | DoorbellError::Offline
            | DoorbellError::Authentication => true,
            DoorbellError::Io(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("connection") || msg.contains("timeout") || msg.contains("reset")
            }
            _ => false,
        }
    }
}
