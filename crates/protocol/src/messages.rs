//! Command and report definitions
//!
//! Commands travel host -> device inside control transfers. Reports travel
//! device -> host on the interrupt IN endpoint and are produced by
//! [`crate::codec::decode`].

use crate::opcodes::*;
use crate::types::{AlarmAndSpeed, Channel, Settings, Speed};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outgoing command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Ask which channel the LCD currently shows
    GetCurrentChannel,
    /// Switch the LCD to a channel
    SetDisplayChannel(Channel),
    /// Ask for the temperature and fan speed of a channel
    GetTemperatureAndSpeed(Channel),
    /// Ask for the device settings byte
    GetDeviceSettings,
    /// Replace the device settings
    SetDeviceSettings(Settings),
    /// Ask for the alarm threshold and fan speed of a channel
    GetAlarmAndSpeed(Channel),
    /// Set the alarm threshold and fan speed of a channel
    SetAlarmAndSpeed(Channel, AlarmAndSpeed),
}

impl Command {
    /// Opcode byte for this command
    pub fn opcode(&self) -> u8 {
        match self {
            Command::GetCurrentChannel => TX_GET_CURRENT_CHANNEL,
            Command::SetDisplayChannel(channel) => TX_SET_DISPLAY_CHANNEL + channel.index(),
            Command::GetTemperatureAndSpeed(channel) => {
                TX_TEMPERATURE_AND_SPEED + channel.index()
            }
            Command::GetDeviceSettings => TX_GET_DEVICE_SETTINGS,
            Command::SetDeviceSettings(_) => TX_SET_DEVICE_SETTINGS,
            Command::GetAlarmAndSpeed(channel) => TX_GET_ALARM_AND_SPEED + channel.index(),
            Command::SetAlarmAndSpeed(channel, _) => TX_SET_ALARM_AND_SPEED + channel.index(),
        }
    }

    /// Payload bytes following the opcode
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Command::SetDeviceSettings(settings) => vec![settings.to_byte()],
            Command::SetAlarmAndSpeed(_, value) => vec![value.alarm_raw, value.speed_raw],
            _ => Vec::new(),
        }
    }
}

/// Decoded inbound report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Report {
    /// Channel currently shown on the LCD
    CurrentChannel { channel: Channel },
    /// Temperature and fan speed samples of a channel
    TemperatureAndSpeed {
        channel: Channel,
        temperature_raw: u8,
        speed_raw: u8,
    },
    /// Current device settings
    DeviceSettings(Settings),
    /// Alarm threshold and fan speed samples of a channel
    AlarmAndSpeed {
        channel: Channel,
        alarm_raw: u8,
        speed_raw: u8,
    },
    /// Generic acknowledgement of the last command
    Ack,
    /// Generic rejection of the last command
    Nack,
    /// Opcode outside the known table, or a payload that does not fit its
    /// family, kept verbatim
    Unrecognized { opcode: u8, payload: Vec<u8> },
}

impl Report {
    /// Opcode the report was received with
    pub fn opcode(&self) -> u8 {
        match self {
            Report::CurrentChannel { channel } => RX_CURRENT_CHANNEL + channel.index(),
            Report::TemperatureAndSpeed { channel, .. } => {
                RX_TEMPERATURE_AND_SPEED + channel.index()
            }
            Report::DeviceSettings(_) => RX_DEVICE_SETTINGS,
            Report::AlarmAndSpeed { channel, .. } => RX_ALARM_AND_SPEED + channel.index(),
            Report::Ack => RX_ACK,
            Report::Nack => RX_NACK,
            Report::Unrecognized { opcode, .. } => *opcode,
        }
    }

    /// Payload bytes the report was received with
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Report::TemperatureAndSpeed {
                temperature_raw,
                speed_raw,
                ..
            } => vec![*temperature_raw, *speed_raw],
            Report::DeviceSettings(settings) => vec![settings.to_byte()],
            Report::AlarmAndSpeed {
                alarm_raw,
                speed_raw,
                ..
            } => vec![*alarm_raw, *speed_raw],
            Report::Unrecognized { payload, .. } => payload.clone(),
            Report::CurrentChannel { .. } | Report::Ack | Report::Nack => Vec::new(),
        }
    }

    /// Channel the report refers to, if any
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Report::CurrentChannel { channel }
            | Report::TemperatureAndSpeed { channel, .. }
            | Report::AlarmAndSpeed { channel, .. } => Some(*channel),
            Report::DeviceSettings(settings) => Some(settings.channel),
            _ => None,
        }
    }

    /// Fan speed carried by the report, if any
    pub fn speed(&self) -> Option<Speed> {
        match self {
            Report::TemperatureAndSpeed { speed_raw, .. }
            | Report::AlarmAndSpeed { speed_raw, .. } => Some(Speed::from(*speed_raw)),
            _ => None,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::CurrentChannel { channel } => write!(f, "Current {}", channel),
            Report::TemperatureAndSpeed {
                channel,
                temperature_raw,
                speed_raw,
            } => write!(
                f,
                "{}: temperature sample {}, speed sample {}",
                channel, temperature_raw, speed_raw
            ),
            Report::DeviceSettings(settings) => write!(f, "{}", settings),
            Report::AlarmAndSpeed {
                channel,
                alarm_raw,
                speed_raw,
            } => write!(
                f,
                "{}: alarm sample {}, speed sample {}",
                channel, alarm_raw, speed_raw
            ),
            Report::Ack => write!(f, "Ack"),
            Report::Nack => write!(f, "Nack"),
            Report::Unrecognized { opcode, payload } => {
                write!(f, "Unrecognized opcode {:#04x} ({} bytes)", opcode, payload.len())
            }
        }
    }
}
