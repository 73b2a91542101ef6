//! Protocol error types

use thiserror::Error;

/// Malformed-packet and value errors
///
/// Every variant describes input the device (or caller) got wrong. None of
/// them is fatal to a connection: the read loop logs them and keeps going.
/// Decoding only ever yields the framing variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer too short to hold the length and opcode header
    #[error("Packet too short: {actual} bytes, header needs 2")]
    MissingHeader { actual: usize },

    /// Declared payload length reaches past the end of the buffer
    #[error("Declared payload length {declared} exceeds buffer ({available} bytes after header)")]
    LengthOutOfBounds { declared: usize, available: usize },

    /// Settings byte carries a channel index outside 0..=4
    #[error("Invalid settings byte {byte:#04x}")]
    InvalidSettings { byte: u8 },

    /// Channel index outside 0..=4
    #[error("Invalid channel index {index}")]
    InvalidChannel { index: u8 },

    /// Outgoing payload does not fit the one-byte length field
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::LengthOutOfBounds {
            declared: 10,
            available: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("10"));
        assert!(msg.contains("4 bytes"));
    }

    #[test]
    fn test_invalid_settings_display() {
        let err = ProtocolError::InvalidSettings { byte: 0x1C };
        assert!(format!("{}", err).contains("0x1c"));
    }
}
