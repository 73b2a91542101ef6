//! Driver error types

use protocol::ProtocolError;
use thiserror::Error;

/// USB transport failure, one variant per libusb error code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Input/output error")]
    Io,
    #[error("Invalid parameter")]
    InvalidParam,
    #[error("Access denied (insufficient permissions)")]
    Access,
    #[error("No such device (it may have been disconnected)")]
    NoDevice,
    #[error("Entity not found")]
    NotFound,
    #[error("Resource busy")]
    Busy,
    #[error("Operation timed out")]
    Timeout,
    #[error("Overflow")]
    Overflow,
    #[error("Pipe error")]
    Pipe,
    #[error("System call interrupted")]
    Interrupted,
    #[error("Insufficient memory")]
    NoMem,
    #[error("Operation not supported or unimplemented on this platform")]
    NotSupported,
    #[error("Malformed descriptor")]
    BadDescriptor,
    #[error("{0}")]
    Other(String),
}

impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Io => TransportError::Io,
            rusb::Error::InvalidParam => TransportError::InvalidParam,
            rusb::Error::Access => TransportError::Access,
            rusb::Error::NoDevice => TransportError::NoDevice,
            rusb::Error::NotFound => TransportError::NotFound,
            rusb::Error::Busy => TransportError::Busy,
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::Overflow => TransportError::Overflow,
            rusb::Error::Pipe => TransportError::Pipe,
            rusb::Error::Interrupted => TransportError::Interrupted,
            rusb::Error::NoMem => TransportError::NoMem,
            rusb::Error::NotSupported => TransportError::NotSupported,
            rusb::Error::BadDescriptor => TransportError::BadDescriptor,
            _ => TransportError::Other(err.to_string()),
        }
    }
}

/// Errors surfaced by connect and send
#[derive(Debug, Error)]
pub enum DriverError {
    /// The USB library could not be initialized
    #[error("Failed to open USB context: {0}")]
    Context(#[source] TransportError),

    /// Fewer matching devices than the requested index
    #[error(
        "No fan controller {vendor_id:04x}:{product_id:04x} at index {index} ({found} connected)"
    )]
    NotFound {
        vendor_id: u16,
        product_id: u16,
        index: usize,
        found: usize,
    },

    /// The selected device exists but could not be opened
    #[error("Cannot open fan controller at index {index}: {source}")]
    Access {
        index: usize,
        #[source]
        source: TransportError,
    },

    /// The default interface could not be selected or claimed
    #[error("Failed to select default interface: {0}")]
    NoInterface(String),

    /// The default interface has no IN endpoint
    #[error("Found no suitable communication endpoint on interface {interface}")]
    NoEndpoint { interface: u8 },

    /// The read stream on the IN endpoint could not be opened
    #[error("Failed to open the endpoint for reading: {0}")]
    StreamOpen(#[source] TransportError),

    #[error("USB transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, DriverError>;
