//! Host-side driver for the five-channel USB fan controller
//!
//! [`Controller::connect`] runs the acquisition chain (context, device,
//! interface, endpoint, read stream) and starts a background read loop that
//! decodes inbound packets into [`protocol::Report`]s. Commands go out as
//! HID SET_REPORT control transfers. Closing or dropping the controller
//! stops the loop and releases everything in reverse order.
//!
//! The USB library sits behind the traits in [`transport`]; [`usb`] is the
//! libusb implementation and [`testing`] a scriptable in-memory one.

pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod locator;
pub mod lookahead;
pub mod read_loop;
pub mod rollback;
pub mod stats;
pub mod testing;
pub mod transport;
pub mod usb;

pub use config::DriverConfig;
pub use connection::{ConnectOptions, STREAM_DEPTH};
pub use controller::{COMMAND_TIMEOUT, Controller, OUTPUT_REPORT_VALUE, SET_REPORT_REQUEST_TYPE};
pub use error::{DriverError, Result, TransportError};
pub use locator::{Selection, list_matching, select};
pub use lookahead::LookaheadStream;
pub use read_loop::{DEFAULT_READ_SLICE, ErrorPolicy, LoopState, StopReason};
pub use rollback::RollbackStack;
pub use stats::{ReadStats, StatsSnapshot};
pub use usb::{RusbBackend, RusbContext};
