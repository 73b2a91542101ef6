//! Wire protocol of the five-channel USB fan controller
//!
//! This crate frames and interprets the controller's proprietary packets.
//! It is pure: decoding takes a byte buffer and returns a typed [`Report`],
//! encoding takes a typed [`Command`] and returns the control-transfer body.
//!
//! # Example
//!
//! ```
//! use protocol::{Channel, Command, Report, decode, encode};
//!
//! // Outgoing: ask for channel 2's temperature and speed
//! let body = encode(&Command::GetTemperatureAndSpeed(Channel::TWO));
//! assert_eq!(body, vec![0x31]);
//!
//! // Incoming: the device answers on the interrupt endpoint
//! let report = decode(&[2, 0x41, 22, 30, 0, 0, 0, 0]).unwrap();
//! assert_eq!(report.channel(), Some(Channel::TWO));
//! ```
//!
//! # Round trip
//!
//! Command bodies and endpoint reads share the opcode/payload layout, so a
//! body prefixed with its length byte parses back into the same packet:
//!
//! ```
//! use protocol::{Channel, Command, Packet, encode, frame};
//!
//! let body = encode(&Command::SetDisplayChannel(Channel::FIVE));
//! let framed = frame(&body).unwrap();
//! let packet = Packet::parse(&framed).unwrap();
//! assert_eq!(packet.opcode, 0x24);
//! assert!(packet.payload.is_empty());
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod opcodes;
pub mod types;

pub use codec::{
    HEADER_SIZE, MAX_PAYLOAD_SIZE, Packet, decode, encode, encode_raw, frame, interpret,
};
pub use error::{ProtocolError, Result};
pub use messages::{Command, Report};
pub use opcodes::{CONTROL_REQUEST, PRODUCT_ID, VENDOR_ID};
pub use types::{
    AlarmAndSpeed, CHANNEL_COUNT, Channel, DisplayState, Mode, Settings, Sound, Speed,
};
