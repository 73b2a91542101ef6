//! Endpoint reads
//!
//! libusb's synchronous API submits one transfer per call and blocks the
//! calling thread until it completes, so look-ahead comes from
//! [`LookaheadStream`] running `depth` of these calls on worker threads.
//! Each call is bounded by the read slice.

use crate::error::TransportError;
use crate::lookahead::LookaheadStream;
use crate::transport::{EndpointInfo, InTransfer, TransferKind};
use crate::usb::device::RusbSession;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Read stream on an interrupt or bulk IN endpoint
pub type RusbStream = LookaheadStream<RusbEndpoint>;

/// Interrupt or bulk IN endpoint of an open device
pub struct RusbEndpoint {
    session: Arc<RusbSession>,
    endpoint: EndpointInfo,
}

impl RusbEndpoint {
    pub(crate) fn new(
        session: Arc<RusbSession>,
        endpoint: EndpointInfo,
    ) -> Result<Self, TransportError> {
        if !endpoint.is_in() {
            return Err(TransportError::InvalidParam);
        }
        match endpoint.transfer_type {
            TransferKind::Interrupt | TransferKind::Bulk => {}
            TransferKind::Control | TransferKind::Isochronous => {
                return Err(TransportError::NotSupported);
            }
        }
        Ok(Self { session, endpoint })
    }
}

impl InTransfer for RusbEndpoint {
    fn endpoint(&self) -> EndpointInfo {
        self.endpoint
    }

    fn transfer(
        &self,
        buffer: &mut [u8],
        timeout: Duration,
        submitted: &mut dyn FnMut(),
    ) -> Result<usize, TransportError> {
        let address = self.endpoint.address;
        let kind = self.endpoint.transfer_type;
        self.session.with_handle(|handle| {
            // libusb queues the transfer at the start of the call
            submitted();
            match kind {
                TransferKind::Bulk => handle.read_bulk(address, buffer, timeout),
                _ => handle.read_interrupt(address, buffer, timeout),
            }
        })
    }
}

/// Open a look-ahead stream of `depth` transfers on `endpoint`
pub(crate) fn open_stream(
    session: Arc<RusbSession>,
    endpoint: EndpointInfo,
    depth: usize,
) -> Result<RusbStream, TransportError> {
    let stream = LookaheadStream::new(RusbEndpoint::new(session, endpoint)?, depth);
    debug!(
        "Opened read stream on {} ({} transfers in flight)",
        endpoint,
        stream.depth()
    );
    Ok(stream)
}
