//! USB transport seam
//!
//! The connection chain and the read loop only talk to these traits. The
//! production implementation wraps `rusb` ([`crate::usb`]); the scriptable
//! in-memory implementation in [`crate::testing`] drives the same code paths
//! without hardware.
//!
//! Every release operation takes `&self`, so a resource can be shared
//! (`Arc`) between the controller, the reader thread and the teardown steps
//! that eventually close it.

use crate::error::TransportError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identity of an enumerated device, read without opening it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
}

impl DeviceEntry {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {} address {})",
            self.vendor_id, self.product_id, self.bus_number, self.address
        )
    }
}

/// Descriptor information dumped after a device is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDetails {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
    pub port_number: u8,
    pub usb_version: String,
    pub device_version: String,
    pub speed: String,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    pub max_packet_size: u8,
}

impl DeviceDetails {
    /// One line per fact, in dump order
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("  device {:04x}:{:04x}", self.vendor_id, self.product_id),
            format!(
                "  address {}:{}:{}",
                self.bus_number, self.address, self.port_number
            ),
            format!(
                "  USB version: {}, device version: {}",
                self.usb_version, self.device_version
            ),
            format!("  device speed: {}", self.speed),
            format!(
                "  device class: {:#04x}:{:#04x}:{:#04x}",
                self.class_code, self.sub_class_code, self.protocol_code
            ),
            format!("  max control packet size: {}", self.max_packet_size),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint of the claimed interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferKind,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    pub fn is_in(&self) -> bool {
        self.direction == Direction::In
    }
}

impl fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ep {:#04x} {:?} {:?} ({} bytes)",
            self.address, self.direction, self.transfer_type, self.max_packet_size
        )
    }
}

/// First interface of the active configuration, alternate setting 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub alt_setting: u8,
    pub endpoints: Vec<EndpointInfo>,
}

impl InterfaceInfo {
    /// First endpoint whose direction is IN
    pub fn in_endpoint(&self) -> Option<EndpointInfo> {
        self.endpoints.iter().copied().find(EndpointInfo::is_in)
    }
}

/// Setup fields of an outgoing control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// Entry point of a USB implementation
pub trait UsbBackend {
    type Context: HostContext;

    /// Initialize the library; `usb_debug` raises its own log verbosity
    fn open_context(&self, usb_debug: bool) -> Result<Self::Context, TransportError>;
}

/// An open USB library context
pub trait HostContext: Send + Sync + 'static {
    type Device: Candidate<Session = Self::Session>;
    type Session: DeviceSession;

    /// Devices in platform enumeration order; none of them is opened
    fn devices(&self) -> Result<Vec<Self::Device>, TransportError>;

    /// Release the context
    fn close(&self);
}

/// An enumerated, unopened device
pub trait Candidate {
    type Session;

    fn entry(&self) -> Result<DeviceEntry, TransportError>;

    fn open(&self) -> Result<Self::Session, TransportError>;
}

/// An opened device
pub trait DeviceSession: Send + Sync + 'static {
    type Stream: ReadStream;

    fn details(&self) -> Result<DeviceDetails, TransportError>;

    fn set_auto_detach_kernel_driver(&self, enable: bool) -> Result<(), TransportError>;

    /// Describe the default interface without claiming it
    fn default_interface(&self) -> Result<InterfaceInfo, TransportError>;

    fn claim_interface(&self, number: u8) -> Result<(), TransportError>;

    fn release_interface(&self, number: u8) -> Result<(), TransportError>;

    /// Open a read stream on an IN endpoint with `depth` look-ahead transfers
    fn open_stream(
        self: Arc<Self>,
        endpoint: EndpointInfo,
        depth: usize,
    ) -> Result<Self::Stream, TransportError>;

    fn write_control(
        &self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Close the device handle; later operations fail with `NoDevice`
    fn close(&self);
}

/// One blocking IN transfer on an endpoint
///
/// Implementations are shared by the look-ahead workers of
/// [`crate::lookahead::LookaheadStream`], which run several transfers on the
/// same endpoint at once.
pub trait InTransfer: Send + Sync + 'static {
    fn endpoint(&self) -> EndpointInfo;

    /// Transfer one packet into `buffer`, waiting at most `timeout`
    ///
    /// `submitted` must be called once the request is queued with the host
    /// controller, before waiting for its completion. The next transfer does
    /// not start until then.
    fn transfer(
        &self,
        buffer: &mut [u8],
        timeout: Duration,
        submitted: &mut dyn FnMut(),
    ) -> Result<usize, TransportError>;
}

/// Inbound stream on the selected endpoint
pub trait ReadStream: Send + 'static {
    /// Size of one read (the endpoint's max packet size)
    fn buffer_size(&self) -> usize;

    /// Read one packet, waiting at most `timeout`
    ///
    /// An expired timeout is [`TransportError::Timeout`], which the read loop
    /// treats as "nothing yet" rather than a failure.
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(address: u8, direction: Direction) -> EndpointInfo {
        EndpointInfo {
            address,
            direction,
            transfer_type: TransferKind::Interrupt,
            max_packet_size: 8,
        }
    }

    #[test]
    fn test_in_endpoint_picks_first_in() {
        let interface = InterfaceInfo {
            number: 0,
            alt_setting: 0,
            endpoints: vec![
                endpoint(0x01, Direction::Out),
                endpoint(0x81, Direction::In),
                endpoint(0x82, Direction::In),
            ],
        };
        assert_eq!(interface.in_endpoint().map(|e| e.address), Some(0x81));
    }

    #[test]
    fn test_no_in_endpoint() {
        let interface = InterfaceInfo {
            number: 0,
            alt_setting: 0,
            endpoints: vec![endpoint(0x01, Direction::Out)],
        };
        assert_eq!(interface.in_endpoint(), None);
    }

    #[test]
    fn test_entry_matches() {
        let entry = DeviceEntry {
            vendor_id: 0x0C45,
            product_id: 0x7100,
            bus_number: 1,
            address: 4,
        };
        assert!(entry.matches(0x0C45, 0x7100));
        assert!(!entry.matches(0x0C45, 0x7101));
        assert_eq!(entry.to_string(), "0c45:7100 (bus 1 address 4)");
    }
}
