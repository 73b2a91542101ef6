//! Opened USB device
//!
//! Wraps a `rusb::DeviceHandle` shared between the controller (control
//! writes), the read stream (endpoint reads) and the teardown steps. Reads
//! and writes take `&DeviceHandle`, so they share a read lock; claim, release
//! and close need exclusive access and take the write lock.

use crate::error::TransportError;
use crate::transport::{
    ControlSetup, DeviceDetails, DeviceSession, Direction, EndpointInfo, InterfaceInfo,
    TransferKind,
};
use crate::usb::transfers::{self, RusbStream};
use rusb::{Context, Device, DeviceHandle, Version};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Open device handle; `None` once closed
pub struct RusbSession {
    device: Device<Context>,
    handle: RwLock<Option<DeviceHandle<Context>>>,
}

impl RusbSession {
    pub(crate) fn new(device: Device<Context>, handle: DeviceHandle<Context>) -> Self {
        Self {
            device,
            handle: RwLock::new(Some(handle)),
        }
    }

    /// Run `f` with shared access to the handle
    pub(crate) fn with_handle<R>(
        &self,
        f: impl FnOnce(&DeviceHandle<Context>) -> rusb::Result<R>,
    ) -> Result<R, TransportError> {
        let guard = self
            .handle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = guard.as_ref().ok_or(TransportError::NoDevice)?;
        Ok(f(handle)?)
    }

    /// Run `f` with exclusive access to the handle
    fn with_handle_mut<R>(
        &self,
        f: impl FnOnce(&mut DeviceHandle<Context>) -> rusb::Result<R>,
    ) -> Result<R, TransportError> {
        let mut guard = self
            .handle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = guard.as_mut().ok_or(TransportError::NoDevice)?;
        Ok(f(handle)?)
    }
}

impl DeviceSession for RusbSession {
    type Stream = RusbStream;

    fn details(&self) -> Result<DeviceDetails, TransportError> {
        let descriptor = self.device.device_descriptor()?;
        Ok(DeviceDetails {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            bus_number: self.device.bus_number(),
            address: self.device.address(),
            port_number: self.device.port_number(),
            usb_version: format_version(descriptor.usb_version()),
            device_version: format_version(descriptor.device_version()),
            speed: format!("{:?}", self.device.speed()),
            class_code: descriptor.class_code(),
            sub_class_code: descriptor.sub_class_code(),
            protocol_code: descriptor.protocol_code(),
            max_packet_size: descriptor.max_packet_size(),
        })
    }

    fn set_auto_detach_kernel_driver(&self, enable: bool) -> Result<(), TransportError> {
        self.with_handle_mut(|handle| handle.set_auto_detach_kernel_driver(enable))
    }

    fn default_interface(&self) -> Result<InterfaceInfo, TransportError> {
        let config = self.device.active_config_descriptor()?;
        let interface = config.interfaces().next().ok_or(TransportError::NotFound)?;
        let setting = interface
            .descriptors()
            .find(|d| d.setting_number() == 0)
            .ok_or(TransportError::NotFound)?;

        let endpoints = setting
            .endpoint_descriptors()
            .map(|endpoint| EndpointInfo {
                address: endpoint.address(),
                direction: map_direction(endpoint.direction()),
                transfer_type: map_transfer_type(endpoint.transfer_type()),
                max_packet_size: endpoint.max_packet_size(),
            })
            .collect();

        Ok(InterfaceInfo {
            number: interface.number(),
            alt_setting: setting.setting_number(),
            endpoints,
        })
    }

    fn claim_interface(&self, number: u8) -> Result<(), TransportError> {
        self.with_handle_mut(|handle| handle.claim_interface(number))?;
        debug!("Claimed interface {}", number);
        Ok(())
    }

    fn release_interface(&self, number: u8) -> Result<(), TransportError> {
        self.with_handle_mut(|handle| handle.release_interface(number))?;
        debug!("Released interface {}", number);
        Ok(())
    }

    fn open_stream(
        self: Arc<Self>,
        endpoint: EndpointInfo,
        depth: usize,
    ) -> Result<RusbStream, TransportError> {
        transfers::open_stream(self, endpoint, depth)
    }

    fn write_control(
        &self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.with_handle(|handle| {
            handle.write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            )
        })
    }

    fn close(&self) {
        let mut guard = self
            .handle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.take().is_some() {
            debug!(
                "Closed device on bus {} address {}",
                self.device.bus_number(),
                self.device.address()
            );
        }
    }
}

fn format_version(version: Version) -> String {
    format!(
        "{}.{}.{}",
        version.major(),
        version.minor(),
        version.sub_minor()
    )
}

fn map_direction(direction: rusb::Direction) -> Direction {
    match direction {
        rusb::Direction::In => Direction::In,
        rusb::Direction::Out => Direction::Out,
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferKind {
    match transfer_type {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}
