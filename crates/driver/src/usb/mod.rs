//! rusb-backed USB transport
//!
//! This module implements the [`crate::transport`] traits on top of libusb:
//! - Context creation and device enumeration
//! - Device opening, kernel driver auto-detach and interface claiming
//! - Interrupt/bulk reads in short timeout slices and HID control writes
//!
//! All calls are synchronous; the read loop and its look-ahead workers run
//! them on their own threads so the Tokio runtime is never blocked.

pub mod device;
pub mod transfers;

pub use device::RusbSession;
pub use transfers::{RusbEndpoint, RusbStream};

use crate::error::TransportError;
use crate::transport::{Candidate, DeviceEntry, HostContext, UsbBackend};
use rusb::{Context, Device, LogLevel, UsbContext};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Production backend
#[derive(Debug, Clone, Copy, Default)]
pub struct RusbBackend;

impl UsbBackend for RusbBackend {
    type Context = RusbContext;

    fn open_context(&self, usb_debug: bool) -> Result<RusbContext, TransportError> {
        let mut context = Context::new()?;
        context.set_log_level(if usb_debug {
            LogLevel::Debug
        } else {
            LogLevel::None
        });
        debug!("Opened USB context (libusb debug: {})", usb_debug);

        Ok(RusbContext {
            context: Mutex::new(Some(context)),
        })
    }
}

/// Open libusb context; `None` once closed
#[derive(Debug)]
pub struct RusbContext {
    context: Mutex<Option<Context>>,
}

impl RusbContext {
    fn lock(&self) -> MutexGuard<'_, Option<Context>> {
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HostContext for RusbContext {
    type Device = RusbDevice;
    type Session = RusbSession;

    fn devices(&self) -> Result<Vec<RusbDevice>, TransportError> {
        let guard = self.lock();
        let context = guard.as_ref().ok_or(TransportError::NoDevice)?;

        let devices = context.devices()?;
        Ok(devices.iter().map(|device| RusbDevice { device }).collect())
    }

    fn close(&self) {
        // Devices and handles keep their own reference to the context, so
        // libusb is only torn down once they are gone too.
        if self.lock().take().is_some() {
            debug!("Released USB context");
        }
    }
}

/// Enumerated device, not yet opened
pub struct RusbDevice {
    device: Device<Context>,
}

impl Candidate for RusbDevice {
    type Session = RusbSession;

    fn entry(&self) -> Result<DeviceEntry, TransportError> {
        let descriptor = self.device.device_descriptor()?;
        Ok(DeviceEntry {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            bus_number: self.device.bus_number(),
            address: self.device.address(),
        })
    }

    fn open(&self) -> Result<RusbSession, TransportError> {
        let handle = self.device.open()?;
        debug!(
            "Opened device on bus {} address {}",
            self.device.bus_number(),
            self.device.address()
        );
        Ok(RusbSession::new(self.device.clone(), handle))
    }
}
