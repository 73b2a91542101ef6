//! Controller value types
//!
//! Channels, speed readings, and the device settings word.
//! Everything here is a plain value: no I/O and no interior state.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fan/temperature channels on the controller
pub const CHANNEL_COUNT: u8 = 5;

/// Fan channel of the controller
///
/// Users see channels numbered 1 to 5; internally the 0-based index is stored
/// because opcode families are addressed as `base + index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel(u8);

impl Channel {
    pub const ONE: Channel = Channel(0);
    pub const TWO: Channel = Channel(1);
    pub const THREE: Channel = Channel(2);
    pub const FOUR: Channel = Channel(3);
    pub const FIVE: Channel = Channel(4);

    /// Build a channel from its 0-based index
    pub fn from_index(index: u8) -> Result<Self> {
        if index < CHANNEL_COUNT {
            Ok(Channel(index))
        } else {
            Err(ProtocolError::InvalidChannel { index })
        }
    }

    /// Build a channel from its user-facing number (1..=5)
    pub fn from_number(number: u8) -> Result<Self> {
        match number.checked_sub(1) {
            Some(index) => Self::from_index(index),
            None => Err(ProtocolError::InvalidChannel { index: u8::MAX }),
        }
    }

    /// 0-based index, used for opcode arithmetic
    pub fn index(self) -> u8 {
        self.0
    }

    /// 1-based number as printed on the device
    pub fn number(self) -> u8 {
        self.0 + 1
    }

    /// All channels in order
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..CHANNEL_COUNT).map(Channel)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel {}", self.number())
    }
}

/// Fan speed in rounds per minute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Speed(pub u16);

impl From<u8> for Speed {
    fn from(raw: u8) -> Self {
        Speed(u16::from(raw))
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} RPM", self.0)
    }
}

/// Control mode of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Fan speeds are set by the user
    #[default]
    Manual,
    /// The controller follows its own temperature curve
    Automatic,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Manual => write!(f, "Manual Mode"),
            Mode::Automatic => write!(f, "Automatic Mode"),
        }
    }
}

/// LCD display state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayState {
    #[default]
    Off,
    On,
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayState::Off => write!(f, "Display Off"),
            DisplayState::On => write!(f, "Display On"),
        }
    }
}

/// Touch beep setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Sound {
    #[default]
    Off,
    On,
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sound::Off => write!(f, "Sound Off"),
            Sound::On => write!(f, "Sound On"),
        }
    }
}

const SOUND_BIT: u8 = 0b0000_0001;
const DISPLAY_BIT: u8 = 0b0000_0010;
const CHANNEL_SHIFT: u8 = 2;
const CHANNEL_MASK: u8 = 0b0001_1100;
const MODE_BIT: u8 = 0b0010_0000;

/// Device settings, carried on the wire as a single bit-packed byte
///
/// ```text
/// bit  7 6 | 5    | 4 3 2         | 1       | 0
///      0 0 | mode | channel index | display | sound
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub sound: Sound,
    pub display: DisplayState,
    /// Channel shown on the LCD
    pub channel: Channel,
    pub mode: Mode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sound: Sound::Off,
            display: DisplayState::On,
            channel: Channel::ONE,
            mode: Mode::Manual,
        }
    }
}

impl Settings {
    /// Unpack a settings byte; bits 6 and 7 are ignored
    pub fn from_byte(byte: u8) -> Result<Self> {
        let channel = Channel::from_index((byte & CHANNEL_MASK) >> CHANNEL_SHIFT)
            .map_err(|_| ProtocolError::InvalidSettings { byte })?;

        Ok(Self {
            sound: if byte & SOUND_BIT != 0 {
                Sound::On
            } else {
                Sound::Off
            },
            display: if byte & DISPLAY_BIT != 0 {
                DisplayState::On
            } else {
                DisplayState::Off
            },
            channel,
            mode: if byte & MODE_BIT != 0 {
                Mode::Automatic
            } else {
                Mode::Manual
            },
        })
    }

    /// Pack into the wire byte
    pub fn to_byte(self) -> u8 {
        let mut byte = self.channel.index() << CHANNEL_SHIFT;
        if self.sound == Sound::On {
            byte |= SOUND_BIT;
        }
        if self.display == DisplayState::On {
            byte |= DISPLAY_BIT;
        }
        if self.mode == Mode::Automatic {
            byte |= MODE_BIT;
        }
        byte
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings: {}, {}, {}, Active {}",
            self.sound, self.display, self.mode, self.channel
        )
    }
}

/// Alarm threshold and fan speed pair for one channel
///
/// Both fields are the raw samples exchanged with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlarmAndSpeed {
    pub alarm_raw: u8,
    pub speed_raw: u8,
}

impl AlarmAndSpeed {
    pub fn speed(self) -> Speed {
        Speed::from(self.speed_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_number_and_index() {
        let channel = Channel::from_number(3).unwrap();
        assert_eq!(channel.index(), 2);
        assert_eq!(channel.number(), 3);
        assert_eq!(channel, Channel::THREE);
        assert_eq!(channel.to_string(), "Channel 3");
    }

    #[test]
    fn test_channel_bounds() {
        assert!(Channel::from_index(4).is_ok());
        assert!(Channel::from_index(5).is_err());
        assert!(Channel::from_number(0).is_err());
        assert!(Channel::from_number(6).is_err());
        assert_eq!(Channel::all().count(), CHANNEL_COUNT as usize);
    }

    #[test]
    fn test_settings_byte_layout() {
        let settings = Settings {
            sound: Sound::On,
            display: DisplayState::Off,
            channel: Channel::FOUR,
            mode: Mode::Automatic,
        };
        assert_eq!(settings.to_byte(), 0b0010_1101);
        assert_eq!(Settings::from_byte(0b0010_1101).unwrap(), settings);
    }

    #[test]
    fn test_settings_ignores_high_bits() {
        let plain = Settings::from_byte(0b0000_0010).unwrap();
        let noisy = Settings::from_byte(0b1100_0010).unwrap();
        assert_eq!(plain, noisy);
        assert_eq!(plain.display, DisplayState::On);
        assert_eq!(plain.channel, Channel::ONE);
    }

    #[test]
    fn test_settings_rejects_channel_out_of_range() {
        // channel index 5
        let err = Settings::from_byte(0b0001_0100).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSettings { byte: 0x14 }));
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(Speed(1200).to_string(), "1200 RPM");
        assert_eq!(Speed::from(30u8), Speed(30));
        assert_eq!(
            Settings::default().to_string(),
            "Settings: Sound Off, Display On, Manual Mode, Active Channel 1"
        );
    }
}
