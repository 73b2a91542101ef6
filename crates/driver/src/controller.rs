//! Public controller handle
//!
//! A [`Controller`] exists only after the whole acquisition chain succeeded,
//! and owns everything it acquired. Dropping or closing it releases those
//! resources in reverse acquisition order: read stream, interface, device
//! handle, context.
//!
//! # Example
//!
//! ```no_run
//! use common::{DebugFlags, TracingSink};
//! use driver::Controller;
//! use protocol::Channel;
//!
//! # fn main() -> driver::Result<()> {
//! let controller = Controller::connect(TracingSink::shared(DebugFlags::default()), 0)?;
//! controller.request_temperature_and_speed(Channel::ONE)?;
//!
//! if let Ok(report) = controller.reports().recv_blocking() {
//!     println!("{}", report);
//! }
//! controller.close();
//! # Ok(())
//! # }
//! ```

use crate::connection::{ConnectOptions, establish};
use crate::error::{DriverError, Result};
use crate::read_loop::{LoopState, ReaderStatus};
use crate::rollback::RollbackStack;
use crate::stats::{ReadStats, StatsSnapshot};
use crate::transport::{
    ControlSetup, DeviceSession, EndpointInfo, HostContext, InterfaceInfo, UsbBackend,
};
use crate::usb::{RusbBackend, RusbContext};
use common::{CancellationToken, ReportReceiver, SharedSink};
use protocol::{
    AlarmAndSpeed, CONTROL_REQUEST, Channel, Command, Settings, encode, encode_raw,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// bmRequestType of a class request to an interface, host to device
pub const SET_REPORT_REQUEST_TYPE: u8 = 0x21;

/// wValue of SET_REPORT: output report (type 2), report id 0
pub const OUTPUT_REPORT_VALUE: u16 = 0x0200;

/// Timeout of one command transfer
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Connected fan controller
pub struct Controller<C: HostContext = RusbContext> {
    session: Arc<C::Session>,
    interface: InterfaceInfo,
    endpoint: EndpointInfo,
    sink: SharedSink,
    token: CancellationToken,
    reports: ReportReceiver,
    stats: Arc<ReadStats>,
    reader: Option<ReaderStatus>,
    teardown: RollbackStack,
}

impl Controller<RusbContext> {
    /// Connect to the `index`-th fan controller over libusb
    pub fn connect(sink: SharedSink, index: usize) -> Result<Self> {
        Self::connect_with(&RusbBackend, sink, ConnectOptions::with_index(index))
    }
}

impl<C: HostContext> Controller<C> {
    /// Connect through any backend
    pub fn connect_with<B>(backend: &B, sink: SharedSink, options: ConnectOptions) -> Result<Self>
    where
        B: UsbBackend<Context = C>,
    {
        let connection = establish(backend, &sink, &options)?;
        info!(
            "Connected to fan controller at index {} (interface {}, {})",
            options.index, connection.interface.number, connection.endpoint
        );

        Ok(Self {
            session: connection.session,
            interface: connection.interface,
            endpoint: connection.endpoint,
            sink,
            token: connection.token,
            reports: connection.reports,
            stats: connection.stats,
            reader: connection.reader,
            teardown: connection.teardown,
        })
    }

    /// Stop the read loop and release every resource
    ///
    /// Blocks until the reader thread has finished, which takes at most one
    /// read slice. Safe to call (or to drop the controller) on a thread that
    /// drives an async runtime.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.teardown.is_empty() {
            return;
        }

        self.token.cancel();
        if self.reader.is_some() {
            self.sink
                .protocol(|| "shutdown: waiting for the read operation to finish".to_string());
        }

        let failures = self.teardown.unwind();
        self.sink.protocol(|| {
            format!("shutdown: complete ({} release failures)", failures)
        });
        info!("Fan controller closed");
    }

    /// Send a command
    pub fn send(&self, command: Command) -> Result<()> {
        self.sink.protocol(|| format!("sending command {:?}", command));
        self.write_body(&encode(&command))
    }

    /// Send an arbitrary opcode and payload
    pub fn send_raw(&self, opcode: u8, payload: &[u8]) -> Result<()> {
        let body = encode_raw(opcode, payload)?;
        self.write_body(&body)
    }

    fn write_body(&self, body: &[u8]) -> Result<()> {
        let setup = ControlSetup {
            request_type: SET_REPORT_REQUEST_TYPE,
            request: CONTROL_REQUEST,
            value: OUTPUT_REPORT_VALUE,
            index: u16::from(self.interface.number),
        };

        self.sink.protocol(|| format!("control transfer body: {:02x?}", body));
        self.session
            .write_control(setup, body, COMMAND_TIMEOUT)
            .map_err(|e| {
                self.sink.protocol(|| format!("control transfer failed: {}", e));
                DriverError::Transport(e)
            })?;
        Ok(())
    }

    pub fn request_current_channel(&self) -> Result<()> {
        self.send(Command::GetCurrentChannel)
    }

    pub fn set_display_channel(&self, channel: Channel) -> Result<()> {
        self.send(Command::SetDisplayChannel(channel))
    }

    pub fn request_temperature_and_speed(&self, channel: Channel) -> Result<()> {
        self.send(Command::GetTemperatureAndSpeed(channel))
    }

    pub fn request_device_settings(&self) -> Result<()> {
        self.send(Command::GetDeviceSettings)
    }

    pub fn set_device_settings(&self, settings: Settings) -> Result<()> {
        self.send(Command::SetDeviceSettings(settings))
    }

    pub fn request_alarm_and_speed(&self, channel: Channel) -> Result<()> {
        self.send(Command::GetAlarmAndSpeed(channel))
    }

    pub fn set_alarm_and_speed(&self, channel: Channel, value: AlarmAndSpeed) -> Result<()> {
        self.send(Command::SetAlarmAndSpeed(channel, value))
    }

    /// Subscribe to decoded reports
    ///
    /// Receivers share one queue. The stream ends once the read loop stops.
    pub fn reports(&self) -> ReportReceiver {
        self.reports.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// State of the read loop; a controller without one reports Stopped
    pub fn reader_state(&self) -> LoopState {
        self.reader
            .as_ref()
            .map_or(LoopState::Stopped, ReaderStatus::state)
    }

    pub fn interface_number(&self) -> u8 {
        self.interface.number
    }

    pub fn endpoint(&self) -> EndpointInfo {
        self.endpoint
    }
}

impl<C: HostContext> Drop for Controller<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C: HostContext> std::fmt::Debug for Controller<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("interface", &self.interface.number)
            .field("endpoint", &self.endpoint)
            .field("reader", &self.reader_state())
            .field("teardown", &self.teardown)
            .finish()
    }
}
