use thiserror::Error;

/// Unified error type for wifijoin.
///
/// Every OS-call failure is converted to one of these at the point of
/// call; raw platform errors never cross the session boundary.
#[derive(Error, Debug)]
pub enum JoinError {
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("D-Bus fdo error: {0}")]
    DbusFdo(#[from] zbus::fdo::Error),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Invalid network configuration: {0}")]
    InvalidNetworkConfiguration(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Not supported on this platform: {0}")]
    PlatformUnsupported(String),

    #[error("Session cancelled before completion")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type JoinResult<T> = Result<T, JoinError>;
