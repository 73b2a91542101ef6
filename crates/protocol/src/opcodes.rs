//! Opcode table
//!
//! Channel-addressed families occupy `base..base + CHANNEL_COUNT`; the opcode
//! for a channel is the family base plus the channel's 0-based index.
//! Outgoing and incoming opcodes share byte values (0x20, 0x60, 0x80) but
//! never travel in the same direction, so the two tables are kept apart.

/// USB vendor ID of the controller
pub const VENDOR_ID: u16 = 0x0C45;

/// USB product ID of the controller
pub const PRODUCT_ID: u16 = 0x7100;

/// HID SET_REPORT, the control request that carries outgoing commands
pub const CONTROL_REQUEST: u8 = 0x09;

// Outgoing (host -> device)

pub const TX_GET_CURRENT_CHANNEL: u8 = 0x10;
pub const TX_SET_DISPLAY_CHANNEL: u8 = 0x20;
pub const TX_TEMPERATURE_AND_SPEED: u8 = 0x30;
pub const TX_GET_DEVICE_SETTINGS: u8 = 0x50;
pub const TX_SET_DEVICE_SETTINGS: u8 = 0x60;
pub const TX_GET_ALARM_AND_SPEED: u8 = 0x70;
pub const TX_SET_ALARM_AND_SPEED: u8 = 0x80;

// Incoming (device -> host)

pub const RX_CURRENT_CHANNEL: u8 = 0x20;
pub const RX_TEMPERATURE_AND_SPEED: u8 = 0x40;
pub const RX_DEVICE_SETTINGS: u8 = 0x60;
pub const RX_ALARM_AND_SPEED: u8 = 0x80;
pub const RX_ACK: u8 = 0xF0;
pub const RX_NACK: u8 = 0xFA;
