//! Report channel between the reader thread and consumers
//!
//! The reader thread is a plain OS thread and must never block on a slow
//! consumer, so it uses `try_send`. Consumers may be async (Tokio) or
//! blocking; `async_channel` serves both sides.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use protocol::Report;
use tracing::warn;

/// Reports buffered before the reader starts dropping new ones
pub const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Reader-thread side
#[derive(Debug, Clone)]
pub struct ReportSender {
    tx: Sender<Report>,
}

impl ReportSender {
    /// Offer a report without blocking
    ///
    /// Returns false when the report was dropped (channel full or closed).
    pub fn deliver(&self, report: Report) -> bool {
        match self.tx.try_send(report) {
            Ok(()) => true,
            Err(TrySendError::Full(report)) => {
                warn!(
                    "Report channel full ({} queued), dropping: {}",
                    self.tx.len(),
                    report
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Close the channel; receivers drain what is queued, then see the end
    pub fn close(&self) {
        self.tx.close();
    }
}

/// Consumer side; clones share one queue, each report goes to one receiver
#[derive(Debug, Clone)]
pub struct ReportReceiver {
    rx: Receiver<Report>,
}

impl ReportReceiver {
    /// Receive the next report; errors once the channel is closed and empty
    pub async fn recv(&self) -> crate::Result<Report> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next report, blocking the calling thread
    pub fn recv_blocking(&self) -> crate::Result<Report> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take a queued report, if any
    pub fn try_recv(&self) -> Option<Report> {
        match self.rx.try_recv() {
            Ok(report) => Some(report),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Drain every queued report
    pub fn drain(&self) -> Vec<Report> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

/// Create the report channel
///
/// Returns (ReportSender for the reader thread, ReportReceiver for consumers)
pub fn create_report_channel() -> (ReportSender, ReportReceiver) {
    let (tx, rx) = bounded(REPORT_CHANNEL_CAPACITY);
    (ReportSender { tx }, ReportReceiver { rx })
}
