//! Packet framing, report decoding and command encoding
//!
//! # Frame Format
//!
//! Reads from the interrupt endpoint arrive as fixed-size buffers (the
//! endpoint's max packet size):
//! ```text
//! [Length: u8 = N][Opcode: u8][Payload: N bytes][ignored padding...]
//! ```
//!
//! Outgoing commands are sent as control-transfer bodies without the length
//! byte:
//! ```text
//! [Opcode: u8][Payload...]
//! ```
//!
//! Nothing in this module performs I/O or keeps state, and no input makes it
//! panic. The only decode failure is a buffer that cannot be framed.

use crate::error::{ProtocolError, Result};
use crate::messages::{Command, Report};
use crate::opcodes::*;
use crate::types::{CHANNEL_COUNT, Channel, Settings};

/// Size of the length + opcode header
pub const HEADER_SIZE: usize = 2;

/// Largest payload the one-byte length field can declare
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// One framed packet: opcode plus exactly `length` payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    pub opcode: u8,
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Split a raw buffer into opcode and payload
    ///
    /// Bytes past `2 + length` are padding and are not looked at.
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(ProtocolError::MissingHeader {
                actual: buffer.len(),
            });
        }

        let declared = buffer[0] as usize;
        let available = buffer.len() - HEADER_SIZE;
        if declared > available {
            return Err(ProtocolError::LengthOutOfBounds {
                declared,
                available,
            });
        }

        Ok(Self {
            opcode: buffer[1],
            payload: &buffer[HEADER_SIZE..HEADER_SIZE + declared],
        })
    }

    /// Declared payload length
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Report family an opcode range maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    CurrentChannel,
    TemperatureAndSpeed,
    DeviceSettings,
    AlarmAndSpeed,
    Ack,
    Nack,
}

impl Family {
    /// Exact payload length the family carries
    fn payload_size(self) -> usize {
        match self {
            Family::CurrentChannel | Family::Ack | Family::Nack => 0,
            Family::DeviceSettings => 1,
            Family::TemperatureAndSpeed | Family::AlarmAndSpeed => 2,
        }
    }
}

/// Inbound opcode table: (base opcode, number of opcodes, family)
const REPORT_TABLE: &[(u8, u8, Family)] = &[
    (RX_CURRENT_CHANNEL, CHANNEL_COUNT, Family::CurrentChannel),
    (RX_TEMPERATURE_AND_SPEED, CHANNEL_COUNT, Family::TemperatureAndSpeed),
    (RX_DEVICE_SETTINGS, 1, Family::DeviceSettings),
    (RX_ALARM_AND_SPEED, CHANNEL_COUNT, Family::AlarmAndSpeed),
    (RX_ACK, 1, Family::Ack),
    (RX_NACK, 1, Family::Nack),
];

/// Find the family and in-family offset of an inbound opcode
fn lookup(opcode: u8) -> Option<(Family, u8)> {
    REPORT_TABLE.iter().find_map(|&(base, span, family)| {
        let offset = opcode.checked_sub(base)?;
        (offset < span).then_some((family, offset))
    })
}

/// Decode a raw endpoint buffer into a report
///
/// Fails only when the buffer cannot be framed. Any framed packet decodes,
/// and the report's [`Report::payload`] is exactly the framed payload.
///
/// # Example
/// ```
/// use protocol::{Channel, Report, decode};
///
/// let report = decode(&[2, 0x41, 22, 30]).unwrap();
/// assert_eq!(
///     report,
///     Report::TemperatureAndSpeed {
///         channel: Channel::TWO,
///         temperature_raw: 22,
///         speed_raw: 30,
///     }
/// );
/// ```
pub fn decode(buffer: &[u8]) -> Result<Report> {
    let packet = Packet::parse(buffer)?;
    Ok(interpret(&packet))
}

/// Turn a framed packet into a report
///
/// Packets whose opcode is unknown, or whose payload does not have the exact
/// shape of its family, come back as [`Report::Unrecognized`] with the bytes
/// kept verbatim.
pub fn interpret(packet: &Packet<'_>) -> Report {
    typed_report(packet).unwrap_or_else(|| Report::Unrecognized {
        opcode: packet.opcode,
        payload: packet.payload.to_vec(),
    })
}

fn typed_report(packet: &Packet<'_>) -> Option<Report> {
    let (family, offset) = lookup(packet.opcode)?;
    let payload = packet.payload;
    if payload.len() != family.payload_size() {
        return None;
    }

    // Table spans never exceed CHANNEL_COUNT, so the offset is a valid index.
    let channel = || Channel::from_index(offset).ok();

    let report = match family {
        Family::CurrentChannel => Report::CurrentChannel {
            channel: channel()?,
        },
        Family::TemperatureAndSpeed => Report::TemperatureAndSpeed {
            channel: channel()?,
            temperature_raw: payload[0],
            speed_raw: payload[1],
        },
        Family::DeviceSettings => {
            // Reserved bits set would be lost on re-encode
            let settings = Settings::from_byte(payload[0]).ok()?;
            if settings.to_byte() != payload[0] {
                return None;
            }
            Report::DeviceSettings(settings)
        }
        Family::AlarmAndSpeed => Report::AlarmAndSpeed {
            channel: channel()?,
            alarm_raw: payload[0],
            speed_raw: payload[1],
        },
        Family::Ack => Report::Ack,
        Family::Nack => Report::Nack,
    };

    Some(report)
}

/// Encode a command into its control-transfer body
///
/// # Example
/// ```
/// use protocol::{Channel, Command, encode};
///
/// assert_eq!(encode(&Command::SetDisplayChannel(Channel::THREE)), vec![0x22]);
/// ```
pub fn encode(command: &Command) -> Vec<u8> {
    let payload = command.payload();
    let mut body = Vec::with_capacity(1 + payload.len());
    body.push(command.opcode());
    body.extend_from_slice(&payload);
    body
}

/// Encode an arbitrary opcode and payload into a control-transfer body
pub fn encode_raw(opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut body = Vec::with_capacity(1 + payload.len());
    body.push(opcode);
    body.extend_from_slice(payload);
    Ok(body)
}

/// Prefix a control-transfer body with its length byte
///
/// The result has the same layout as an endpoint read, so it can be fed back
/// through [`Packet::parse`].
pub fn frame(body: &[u8]) -> Result<Vec<u8>> {
    let Some((&opcode, payload)) = body.split_first() else {
        return Err(ProtocolError::MissingHeader { actual: 0 });
    };
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut framed = Vec::with_capacity(HEADER_SIZE + payload.len());
    framed.push(payload.len() as u8);
    framed.push(opcode);
    framed.extend_from_slice(payload);
    Ok(framed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlarmAndSpeed, DisplayState, Mode, Sound};

    #[test]
    fn test_parse_ignores_padding() {
        let buffer = [1, 0x60, 0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE];
        let packet = Packet::parse(&buffer).unwrap();
        assert_eq!(packet.opcode, 0x60);
        assert_eq!(packet.payload, &[0x02]);
    }

    #[test]
    fn test_parse_rejects_short_buffers() {
        assert_eq!(
            Packet::parse(&[]),
            Err(ProtocolError::MissingHeader { actual: 0 })
        );
        assert_eq!(
            Packet::parse(&[0]),
            Err(ProtocolError::MissingHeader { actual: 1 })
        );
    }

    #[test]
    fn test_parse_rejects_overlong_length() {
        assert_eq!(
            Packet::parse(&[3, 0x41, 22, 30]),
            Err(ProtocolError::LengthOutOfBounds {
                declared: 3,
                available: 2
            })
        );
    }

    #[test]
    fn test_parse_exact_fit() {
        let packet = Packet::parse(&[2, 0x41, 22, 30]).unwrap();
        assert_eq!(packet.len(), 2);
        assert!(!packet.is_empty());
    }

    #[test]
    fn test_lookup_table_edges() {
        assert_eq!(lookup(0x20), Some((Family::CurrentChannel, 0)));
        assert_eq!(lookup(0x24), Some((Family::CurrentChannel, 4)));
        assert_eq!(lookup(0x25), None);
        assert_eq!(lookup(0x44), Some((Family::TemperatureAndSpeed, 4)));
        assert_eq!(lookup(0x60), Some((Family::DeviceSettings, 0)));
        assert_eq!(lookup(0x61), None);
        assert_eq!(lookup(0x84), Some((Family::AlarmAndSpeed, 4)));
        assert_eq!(lookup(0xF0), Some((Family::Ack, 0)));
        assert_eq!(lookup(0xFA), Some((Family::Nack, 0)));
        assert_eq!(lookup(0x00), None);
        assert_eq!(lookup(0xFF), None);
    }

    #[test]
    fn test_decode_temperature_and_speed() {
        let report = decode(&[2, 0x41, 22, 30]).unwrap();
        assert_eq!(
            report,
            Report::TemperatureAndSpeed {
                channel: Channel::TWO,
                temperature_raw: 22,
                speed_raw: 30,
            }
        );
    }

    #[test]
    fn test_decode_settings() {
        let report = decode(&[1, 0x60, 0b0010_0011, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(
            report,
            Report::DeviceSettings(Settings {
                sound: Sound::On,
                display: DisplayState::On,
                channel: Channel::ONE,
                mode: Mode::Automatic,
            })
        );
    }

    #[test]
    fn test_decode_current_channel_and_acks() {
        assert_eq!(
            decode(&[0, 0x23]).unwrap(),
            Report::CurrentChannel {
                channel: Channel::FOUR
            }
        );
        assert_eq!(decode(&[0, 0xF0]).unwrap(), Report::Ack);
        assert_eq!(decode(&[0, 0xFA]).unwrap(), Report::Nack);
    }

    #[test]
    fn test_decode_alarm_and_speed() {
        assert_eq!(
            decode(&[2, 0x84, 55, 12]).unwrap(),
            Report::AlarmAndSpeed {
                channel: Channel::FIVE,
                alarm_raw: 55,
                speed_raw: 12,
            }
        );
    }

    #[test]
    fn test_decode_unknown_opcode() {
        assert_eq!(
            decode(&[3, 0x99, 1, 2, 3]).unwrap(),
            Report::Unrecognized {
                opcode: 0x99,
                payload: vec![1, 2, 3],
            }
        );
    }

    #[test]
    fn test_decode_short_payload_is_unrecognized() {
        assert_eq!(
            decode(&[1, 0x40, 22, 0]).unwrap(),
            Report::Unrecognized {
                opcode: 0x40,
                payload: vec![22],
            }
        );
        assert_eq!(
            decode(&[0, 0x60]).unwrap(),
            Report::Unrecognized {
                opcode: 0x60,
                payload: vec![],
            }
        );
        assert_eq!(
            decode(&[0, 0x41]).unwrap(),
            Report::Unrecognized {
                opcode: 0x41,
                payload: vec![],
            }
        );
    }

    #[test]
    fn test_decode_oversized_payload_is_unrecognized() {
        assert_eq!(
            decode(&[3, 0x81, 60, 25, 9]).unwrap(),
            Report::Unrecognized {
                opcode: 0x81,
                payload: vec![60, 25, 9],
            }
        );
        assert!(matches!(
            decode(&[1, 0xF0, 1]).unwrap(),
            Report::Unrecognized { opcode: 0xF0, .. }
        ));
    }

    #[test]
    fn test_decode_settings_outside_layout_is_unrecognized() {
        // channel index 7
        assert_eq!(
            decode(&[1, 0x60, 0b0001_1100]).unwrap(),
            Report::Unrecognized {
                opcode: 0x60,
                payload: vec![0x1C],
            }
        );
        // reserved bit 7
        assert_eq!(
            decode(&[1, 0x60, 0b1000_0010]).unwrap().payload(),
            vec![0x82]
        );
    }

    #[test]
    fn test_encode_commands() {
        assert_eq!(encode(&Command::GetDeviceSettings), vec![0x50]);
        let value = AlarmAndSpeed {
            alarm_raw: 70,
            speed_raw: 20,
        };
        assert_eq!(
            encode(&Command::SetAlarmAndSpeed(Channel::TWO, value)),
            vec![0x81, 70, 20]
        );
    }

    #[test]
    fn test_encode_raw_limits() {
        assert_eq!(encode_raw(0x42, &[1, 2]).unwrap(), vec![0x42, 1, 2]);
        assert!(matches!(
            encode_raw(0x42, &[0u8; 256]),
            Err(ProtocolError::PayloadTooLarge { size: 256, .. })
        ));
    }

    #[test]
    fn test_frame_body() {
        assert_eq!(frame(&[0x81, 70, 20]).unwrap(), vec![2, 0x81, 70, 20]);
        assert_eq!(frame(&[0x50]).unwrap(), vec![0, 0x50]);
        assert!(frame(&[]).is_err());
    }
}
