//! Acquisition chain
//!
//! Connecting is six strictly sequential steps:
//!
//! 1. open the USB context
//! 2. locate and open the device
//! 3. enable automatic kernel driver detach
//! 4. claim the default interface
//! 5. select its first IN endpoint
//! 6. open a read stream on that endpoint and start the read loop
//!
//! Every step that acquires something pushes its release action onto a
//! [`RollbackStack`]. A failing step returns early and the stack unwinds on
//! drop, releasing exactly what was acquired so far. On success the stack is
//! handed to the controller as its teardown sequence.

use crate::error::{DriverError, Result, TransportError};
use crate::locator::locate;
use crate::read_loop::{DEFAULT_READ_SLICE, ErrorPolicy, ReadLoop, ReaderHandle, ReaderStatus};
use crate::rollback::RollbackStack;
use crate::stats::ReadStats;
use crate::transport::{
    DeviceSession, EndpointInfo, HostContext, InterfaceInfo, ReadStream, UsbBackend,
};
use common::{
    CancellationToken, DebugCategory, ReportReceiver, SharedSink, create_report_channel,
};
use protocol::{PRODUCT_ID, VENDOR_ID};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Look-ahead transfers requested for the read stream
pub const STREAM_DEPTH: usize = 2;

/// Which device to connect to and how to read from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub vendor_id: u16,
    pub product_id: u16,
    /// 0-based position among matching devices
    pub index: usize,
    pub error_policy: ErrorPolicy,
    /// Upper bound on one blocking read, and so on cancellation latency
    pub read_slice: Duration,
    /// Start the read loop once connected
    pub start_reader: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            index: 0,
            error_policy: ErrorPolicy::default(),
            read_slice: DEFAULT_READ_SLICE,
            start_reader: true,
        }
    }
}

impl ConnectOptions {
    pub fn with_index(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }
}

/// Resources of an established connection
pub(crate) struct Connection<C: HostContext> {
    pub session: Arc<C::Session>,
    pub interface: InterfaceInfo,
    pub endpoint: EndpointInfo,
    pub token: CancellationToken,
    pub reports: ReportReceiver,
    pub stats: Arc<ReadStats>,
    pub reader: Option<ReaderStatus>,
    pub teardown: RollbackStack,
}

/// Run the acquisition chain
pub(crate) fn establish<B: UsbBackend>(
    backend: &B,
    sink: &SharedSink,
    options: &ConnectOptions,
) -> Result<Connection<B::Context>> {
    let mut rollback = RollbackStack::new();

    // 1. Context
    let context = backend
        .open_context(sink.enabled(DebugCategory::Usb))
        .map_err(|e| {
            sink.protocol(|| format!("failed to open USB context: {}", e));
            DriverError::Context(e)
        })?;
    let context = Arc::new(context);
    {
        let context = context.clone();
        rollback.push("context", move || {
            context.close();
            Ok(())
        });
    }

    // 2. Device
    let session = Arc::new(locate(
        context.as_ref(),
        options.vendor_id,
        options.product_id,
        options.index,
        sink.as_ref(),
    )?);
    {
        let session = session.clone();
        rollback.push("device handle", move || {
            session.close();
            Ok(())
        });
    }
    dump_device_info(session.as_ref(), sink);

    // 3. Kernel driver auto-detach
    match session.set_auto_detach_kernel_driver(true) {
        Ok(()) => sink.protocol(|| "enabled automatic kernel driver detach".to_string()),
        Err(TransportError::NotSupported) => {
            debug!("Kernel driver auto-detach not supported on this platform");
            sink.protocol(|| "automatic kernel driver detach not supported".to_string());
        }
        Err(e) => {
            sink.protocol(|| format!("failed to enable kernel driver auto-detach: {}", e));
            return Err(DriverError::Transport(e));
        }
    }

    // 4. Default interface
    let interface = session.default_interface().map_err(|e| {
        sink.protocol(|| format!("failed to select default interface: {}", e));
        DriverError::NoInterface(e.to_string())
    })?;
    session.claim_interface(interface.number).map_err(|e| {
        sink.protocol(|| format!("failed to claim interface {}: {}", interface.number, e));
        DriverError::NoInterface(format!("claim of interface {} failed: {}", interface.number, e))
    })?;
    {
        let session = session.clone();
        let number = interface.number;
        rollback.push("interface", move || session.release_interface(number));
    }
    sink.protocol(|| {
        format!(
            "claimed interface {} (alternate setting {}, {} endpoints)",
            interface.number,
            interface.alt_setting,
            interface.endpoints.len()
        )
    });

    // 5. IN endpoint
    let Some(endpoint) = interface.in_endpoint() else {
        sink.protocol(|| "found no suitable communication endpoint".to_string());
        return Err(DriverError::NoEndpoint {
            interface: interface.number,
        });
    };
    sink.protocol(|| format!("selected endpoint for direction in: {}", endpoint));

    // 6. Read stream and read loop
    let stream = session
        .clone()
        .open_stream(endpoint, STREAM_DEPTH)
        .map_err(|e| {
            sink.protocol(|| format!("failed to open the endpoint for reading: {}", e));
            DriverError::StreamOpen(e)
        })?;

    let token = CancellationToken::new();
    let stats = ReadStats::shared();
    let (sender, reports) = create_report_channel();

    let reader = if options.start_reader {
        let read_loop = ReadLoop::new(stream, sink.clone(), token.clone(), sender, stats.clone())
            .with_policy(options.error_policy)
            .with_read_slice(options.read_slice);
        let handle = ReaderHandle::spawn(read_loop).map_err(|e| {
            DriverError::StreamOpen(TransportError::Other(format!(
                "failed to spawn read loop: {}",
                e
            )))
        })?;
        let status = handle.status();
        rollback.push("read stream", move || match handle.stop() {
            Some((mut stream, _)) => stream.close(),
            None => Ok(()),
        });
        Some(status)
    } else {
        sender.close();
        let mut stream = stream;
        rollback.push("read stream", move || stream.close());
        None
    };

    sink.protocol(|| "successfully connected to fan controller".to_string());

    Ok(Connection {
        session,
        interface,
        endpoint,
        token,
        reports,
        stats,
        reader,
        teardown: rollback,
    })
}

fn dump_device_info<S: DeviceSession>(session: &S, sink: &SharedSink) {
    if !sink.enabled(DebugCategory::Protocol) {
        return;
    }
    match session.details() {
        Ok(details) => {
            sink.emit(DebugCategory::Protocol, "connected to device, device info:");
            for line in details.lines() {
                sink.emit(DebugCategory::Protocol, &line);
            }
        }
        Err(e) => sink.emit(
            DebugCategory::Protocol,
            &format!("could not read device details: {}", e),
        ),
    }
}
