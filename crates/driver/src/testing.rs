//! Scriptable in-memory USB backend
//!
//! Drives the acquisition chain, the read loop and teardown without
//! hardware. Every acquire and release is appended to a shared journal, any
//! step can be made to fail, and inbound packets are fed from a queue the
//! test controls while the reader thread is running.
//!
//! # Example
//!
//! ```
//! use common::NullSink;
//! use driver::testing::{Event, MockBackend, MockDevice};
//! use driver::{ConnectOptions, Controller};
//! use std::sync::Arc;
//!
//! let backend = MockBackend::new(vec![MockDevice::controller(3)]);
//! let controller = Controller::connect_with(&backend, Arc::new(NullSink), ConnectOptions::default())
//!     .unwrap();
//! controller.close();
//!
//! assert_eq!(backend.events().last(), Some(&Event::ContextClosed));
//! ```

use crate::error::TransportError;
use crate::lookahead::LookaheadStream;
use crate::transport::{
    Candidate, ControlSetup, DeviceDetails, DeviceEntry, DeviceSession, Direction, EndpointInfo,
    HostContext, InTransfer, InterfaceInfo, ReadStream, TransferKind, UsbBackend,
};
use protocol::{PRODUCT_ID, VENDOR_ID};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default for how long a mock read waits when no packet is queued
const IDLE_READ: Duration = Duration::from_millis(2);

/// Journal entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ContextOpened { usb_debug: bool },
    ContextClosed,
    DeviceOpened { address: u8 },
    DeviceClosed { address: u8 },
    AutoDetachEnabled,
    InterfaceClaimed(u8),
    InterfaceReleased(u8),
    StreamOpened { endpoint: u8, depth: usize },
    StreamClosed { endpoint: u8 },
    ControlWrite { setup: ControlSetup, data: Vec<u8> },
}

impl Event {
    /// Whether the event releases a resource
    pub fn is_release(&self) -> bool {
        matches!(
            self,
            Event::ContextClosed
                | Event::DeviceClosed { .. }
                | Event::InterfaceReleased(_)
                | Event::StreamClosed { .. }
        )
    }
}

/// Acquisition step that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailAt {
    Context,
    Enumerate,
    AutoDetach,
    Claim,
    StreamOpen,
    ControlWrite,
    Release,
}

/// One scripted read result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRead {
    Packet(Vec<u8>),
    Error(TransportError),
}

/// A device on the simulated bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    pub entry: DeviceEntry,
    pub interface: Option<InterfaceInfo>,
    pub openable: bool,
}

impl MockDevice {
    /// A fan controller with an 8-byte interrupt IN endpoint
    pub fn controller(address: u8) -> Self {
        Self {
            entry: DeviceEntry {
                vendor_id: VENDOR_ID,
                product_id: PRODUCT_ID,
                bus_number: 1,
                address,
            },
            interface: Some(InterfaceInfo {
                number: 0,
                alt_setting: 0,
                endpoints: vec![
                    EndpointInfo {
                        address: 0x02,
                        direction: Direction::Out,
                        transfer_type: TransferKind::Interrupt,
                        max_packet_size: 8,
                    },
                    EndpointInfo {
                        address: 0x81,
                        direction: Direction::In,
                        transfer_type: TransferKind::Interrupt,
                        max_packet_size: 8,
                    },
                ],
            }),
            openable: true,
        }
    }

    /// Any other device
    pub fn other(vendor_id: u16, product_id: u16, address: u8) -> Self {
        Self {
            entry: DeviceEntry {
                vendor_id,
                product_id,
                bus_number: 1,
                address,
            },
            ..Self::controller(address)
        }
    }

    pub fn without_in_endpoint(mut self) -> Self {
        if let Some(interface) = self.interface.as_mut() {
            interface.endpoints.retain(|e| !e.is_in());
        }
        self
    }

    pub fn without_interface(mut self) -> Self {
        self.interface = None;
        self
    }

    /// Opening fails with `Access`
    pub fn unopenable(mut self) -> Self {
        self.openable = false;
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    journal: Mutex<Vec<Event>>,
    failures: Mutex<HashMap<FailAt, TransportError>>,
    feed: Mutex<VecDeque<ScriptedRead>>,
    idle_error: Mutex<Option<TransportError>>,
    idle_read: Mutex<Option<Duration>>,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockState {
    fn record(&self, event: Event) {
        lock(&self.journal).push(event);
    }

    fn failure(&self, step: FailAt) -> Result<(), TransportError> {
        match lock(&self.failures).get(&step) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Simulated USB library; clones share one bus, journal and feed
#[derive(Debug, Clone)]
pub struct MockBackend {
    devices: Vec<MockDevice>,
    state: Arc<MockState>,
}

impl MockBackend {
    /// Devices in enumeration order
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            state: Arc::new(MockState::default()),
        }
    }

    /// Make `step` fail with `error`
    pub fn fail_at(&self, step: FailAt, error: TransportError) {
        lock(&self.state.failures).insert(step, error);
    }

    /// Queue a packet for the read stream
    pub fn push_packet(&self, packet: &[u8]) {
        lock(&self.state.feed).push_back(ScriptedRead::Packet(packet.to_vec()));
    }

    /// Queue a failed read
    pub fn push_error(&self, error: TransportError) {
        lock(&self.state.feed).push_back(ScriptedRead::Error(error));
    }

    /// Fail every read once the queue is empty, instead of timing out
    pub fn fail_when_idle(&self, error: TransportError) {
        *lock(&self.state.idle_error) = Some(error);
    }

    /// Hold idle reads for up to `duration` (capped by the read timeout)
    pub fn idle_read(&self, duration: Duration) {
        *lock(&self.state.idle_read) = Some(duration);
    }

    /// Packets and errors not yet read
    pub fn pending_reads(&self) -> usize {
        lock(&self.state.feed).len()
    }

    /// Read calls made so far, timeouts included
    pub fn reads_attempted(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// Reads submitted and not yet completed
    pub fn reads_in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Most reads ever in flight at once
    pub fn max_reads_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.state.journal).clone()
    }

    /// Release events, in the order they happened
    pub fn releases(&self) -> Vec<Event> {
        self.events().into_iter().filter(Event::is_release).collect()
    }

    /// Number of devices opened so far
    pub fn opened_devices(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::DeviceOpened { address } => Some(address),
                _ => None,
            })
            .collect()
    }

    /// Control transfers sent so far
    pub fn control_writes(&self) -> Vec<(ControlSetup, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::ControlWrite { setup, data } => Some((setup, data)),
                _ => None,
            })
            .collect()
    }
}

impl UsbBackend for MockBackend {
    type Context = MockContext;

    fn open_context(&self, usb_debug: bool) -> Result<MockContext, TransportError> {
        self.state.failure(FailAt::Context)?;
        self.state.record(Event::ContextOpened { usb_debug });
        Ok(MockContext {
            devices: self.devices.clone(),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct MockContext {
    devices: Vec<MockDevice>,
    state: Arc<MockState>,
    closed: AtomicBool,
}

impl HostContext for MockContext {
    type Device = MockCandidate;
    type Session = MockSession;

    fn devices(&self) -> Result<Vec<MockCandidate>, TransportError> {
        self.state.failure(FailAt::Enumerate)?;
        Ok(self
            .devices
            .iter()
            .map(|device| MockCandidate {
                device: device.clone(),
                state: self.state.clone(),
            })
            .collect())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.record(Event::ContextClosed);
        }
    }
}

pub struct MockCandidate {
    device: MockDevice,
    state: Arc<MockState>,
}

impl Candidate for MockCandidate {
    type Session = MockSession;

    fn entry(&self) -> Result<DeviceEntry, TransportError> {
        Ok(self.device.entry)
    }

    fn open(&self) -> Result<MockSession, TransportError> {
        if !self.device.openable {
            return Err(TransportError::Access);
        }
        self.state.record(Event::DeviceOpened {
            address: self.device.entry.address,
        });
        Ok(MockSession {
            device: self.device.clone(),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct MockSession {
    device: MockDevice,
    state: Arc<MockState>,
    closed: AtomicBool,
}

impl MockSession {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::NoDevice)
        } else {
            Ok(())
        }
    }
}

impl DeviceSession for MockSession {
    type Stream = MockStream;

    fn details(&self) -> Result<DeviceDetails, TransportError> {
        let entry = self.device.entry;
        Ok(DeviceDetails {
            vendor_id: entry.vendor_id,
            product_id: entry.product_id,
            bus_number: entry.bus_number,
            address: entry.address,
            port_number: 1,
            usb_version: "1.1.0".to_string(),
            device_version: "1.0.0".to_string(),
            speed: "Full".to_string(),
            class_code: 0,
            sub_class_code: 0,
            protocol_code: 0,
            max_packet_size: 8,
        })
    }

    fn set_auto_detach_kernel_driver(&self, _enable: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state.failure(FailAt::AutoDetach)?;
        self.state.record(Event::AutoDetachEnabled);
        Ok(())
    }

    fn default_interface(&self) -> Result<InterfaceInfo, TransportError> {
        self.ensure_open()?;
        self.device.interface.clone().ok_or(TransportError::NotFound)
    }

    fn claim_interface(&self, number: u8) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state.failure(FailAt::Claim)?;
        self.state.record(Event::InterfaceClaimed(number));
        Ok(())
    }

    fn release_interface(&self, number: u8) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state.record(Event::InterfaceReleased(number));
        self.state.failure(FailAt::Release)
    }

    fn open_stream(
        self: Arc<Self>,
        endpoint: EndpointInfo,
        depth: usize,
    ) -> Result<MockStream, TransportError> {
        self.ensure_open()?;
        self.state.failure(FailAt::StreamOpen)?;
        self.state.record(Event::StreamOpened {
            endpoint: endpoint.address,
            depth,
        });
        let transfer = MockEndpoint {
            endpoint,
            state: self.state.clone(),
        };
        Ok(MockStream {
            inner: LookaheadStream::new(transfer, depth),
            endpoint,
            state: self.state.clone(),
            closed: false,
        })
    }

    fn write_control(
        &self,
        setup: ControlSetup,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.ensure_open()?;
        self.state.failure(FailAt::ControlWrite)?;
        self.state.record(Event::ControlWrite {
            setup,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.record(Event::DeviceClosed {
                address: self.device.entry.address,
            });
        }
    }
}

/// Endpoint fed from the backend's scripted queue
pub struct MockEndpoint {
    endpoint: EndpointInfo,
    state: Arc<MockState>,
}

impl InTransfer for MockEndpoint {
    fn endpoint(&self) -> EndpointInfo {
        self.endpoint
    }

    fn transfer(
        &self,
        buffer: &mut [u8],
        timeout: Duration,
        submitted: &mut dyn FnMut(),
    ) -> Result<usize, TransportError> {
        let state = &self.state;
        state.reads.fetch_add(1, Ordering::SeqCst);
        let in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let next = lock(&state.feed).pop_front();
        submitted();

        let result = match next {
            Some(ScriptedRead::Packet(packet)) => {
                // Real endpoint reads always fill the whole buffer
                let len = packet.len().min(buffer.len());
                buffer[..len].copy_from_slice(&packet[..len]);
                buffer[len..].fill(0);
                Ok(buffer.len())
            }
            Some(ScriptedRead::Error(e)) => Err(e),
            None => match lock(&state.idle_error).clone() {
                Some(e) => Err(e),
                None => {
                    let idle = lock(&state.idle_read).unwrap_or(IDLE_READ);
                    std::thread::sleep(timeout.min(idle));
                    Err(TransportError::Timeout)
                }
            },
        };

        state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Look-ahead stream over [`MockEndpoint`] that journals its close
pub struct MockStream {
    inner: LookaheadStream<MockEndpoint>,
    endpoint: EndpointInfo,
    state: Arc<MockState>,
    closed: bool,
}

impl ReadStream for MockStream {
    fn buffer_size(&self) -> usize {
        self.inner.buffer_size()
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.inner.read(buffer, timeout)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close()?;
        if !self.closed {
            self.closed = true;
            self.state.record(Event::StreamClosed {
                endpoint: self.endpoint.address,
            });
        }
        Ok(())
    }
}
