//! Background read loop
//!
//! One dedicated OS thread per connected controller pulls buffers from the
//! read stream, decodes them and forwards the reports. The loop has two
//! states, Running and Stopped; Stopped is terminal.
//!
//! ```text
//!   Running ──(token cancelled)──────────► Stopped ──► completion fired
//!      │                                      ▲
//!      └──(ErrorPolicy threshold reached)─────┘
//! ```
//!
//! Blocking reads are cut into short timeout slices, and the cancellation
//! token is checked between slices, so cancellation latency is bounded by
//! one slice.

use crate::error::TransportError;
use crate::stats::ReadStats;
use crate::transport::ReadStream;
use common::{
    CancellationToken, Completion, CompletionWaiter, ReportSender, SharedSink, completion_signal,
};
use protocol::decode;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default upper bound on one blocking read
pub const DEFAULT_READ_SLICE: Duration = Duration::from_millis(100);

/// When consecutive transport errors mean the device is gone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// Stop after this many consecutive failed reads; `None` never stops
    pub max_consecutive_errors: Option<u32>,
}

impl ErrorPolicy {
    /// Log every transport error and keep reading
    pub fn never() -> Self {
        Self::default()
    }

    /// Stop after `errors` consecutive failed reads
    pub fn escalate_after(errors: u32) -> Self {
        Self {
            max_consecutive_errors: Some(errors),
        }
    }

    fn escalates(&self, consecutive: u32) -> bool {
        self.max_consecutive_errors
            .is_some_and(|limit| consecutive >= limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Why the loop entered Stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    /// The error policy gave up on the device
    DeviceGone {
        consecutive_errors: u32,
        last_error: TransportError,
    },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::DeviceGone {
                consecutive_errors,
                last_error,
            } => write!(
                f,
                "device gone after {} consecutive errors (last: {})",
                consecutive_errors, last_error
            ),
        }
    }
}

/// Everything the reader thread owns
pub struct ReadLoop<S: ReadStream> {
    stream: S,
    sink: SharedSink,
    token: CancellationToken,
    reports: ReportSender,
    stats: Arc<ReadStats>,
    policy: ErrorPolicy,
    read_slice: Duration,
}

impl<S: ReadStream> ReadLoop<S> {
    pub fn new(
        stream: S,
        sink: SharedSink,
        token: CancellationToken,
        reports: ReportSender,
        stats: Arc<ReadStats>,
    ) -> Self {
        Self {
            stream,
            sink,
            token,
            reports,
            stats,
            policy: ErrorPolicy::default(),
            read_slice: DEFAULT_READ_SLICE,
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_read_slice(mut self, read_slice: Duration) -> Self {
        self.read_slice = read_slice;
        self
    }

    /// Run until cancelled or the policy escalates
    ///
    /// Fires `completion` exactly once on the way out and hands the stream
    /// back so its owner can close it.
    pub fn run(mut self, completion: Completion, stopped: &AtomicBool) -> (S, StopReason) {
        self.stats.mark_started();
        let reason = self.pump();

        self.reports.close();
        stopped.store(true, Ordering::Release);
        self.sink
            .protocol(|| format!("read loop stopped: {}", reason));
        completion.complete();

        (self.stream, reason)
    }

    fn pump(&mut self) -> StopReason {
        let mut buffer = vec![0u8; self.stream.buffer_size()];
        let mut consecutive_errors = 0u32;

        loop {
            if self.token.is_cancelled() {
                return StopReason::Cancelled;
            }

            match self.stream.read(&mut buffer, self.read_slice) {
                Ok(len) => {
                    consecutive_errors = 0;
                    if self.token.is_cancelled() {
                        // Completed after cancellation; nothing is delivered past close.
                        return StopReason::Cancelled;
                    }
                    self.stats.record_read(len);
                    self.handle_packet(&buffer[..len]);
                }
                Err(TransportError::Timeout) => {}
                Err(e) => {
                    consecutive_errors += 1;
                    self.stats.record_transport_error();
                    self.sink.protocol(|| format!("error during read: {}", e));

                    if self.policy.escalates(consecutive_errors) {
                        warn!(
                            "Giving up on device after {} consecutive read errors: {}",
                            consecutive_errors, e
                        );
                        return StopReason::DeviceGone {
                            consecutive_errors,
                            last_error: e,
                        };
                    }

                    // Back off one slice so a persistent error does not spin.
                    self.token.wait_timeout(self.read_slice);
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: &[u8]) {
        self.sink
            .protocol(|| format!("read {} bytes: {:02x?}", packet.len(), packet));

        match decode(packet) {
            Ok(report) => {
                self.stats.record_report();
                self.sink.protocol(|| format!("parsed packet: {}", report));
                if !self.reports.deliver(report) {
                    self.stats.record_dropped_report();
                }
            }
            Err(e) => {
                self.stats.record_malformed();
                self.sink.protocol(|| format!("malformed packet: {}", e));
            }
        }
    }
}

/// Observer of the reader thread's state
#[derive(Debug, Clone)]
pub struct ReaderStatus(Arc<AtomicBool>);

impl ReaderStatus {
    pub fn state(&self) -> LoopState {
        if self.0.load(Ordering::Acquire) {
            LoopState::Stopped
        } else {
            LoopState::Running
        }
    }
}

/// Controller-side handle on a running reader thread
pub struct ReaderHandle<S: ReadStream> {
    token: CancellationToken,
    waiter: CompletionWaiter,
    thread: JoinHandle<(S, StopReason)>,
    stopped: Arc<AtomicBool>,
}

impl<S: ReadStream> ReaderHandle<S> {
    /// Spawn the reader thread
    pub fn spawn(read_loop: ReadLoop<S>) -> std::io::Result<Self> {
        let token = read_loop.token.clone();
        let (completion, waiter) = completion_signal();
        let stopped = Arc::new(AtomicBool::new(false));
        let thread_stopped = stopped.clone();

        let thread = std::thread::Builder::new()
            .name("recon-reader".to_string())
            .spawn(move || read_loop.run(completion, &thread_stopped))?;

        info!("Read loop started");
        Ok(Self {
            token,
            waiter,
            thread,
            stopped,
        })
    }

    pub fn status(&self) -> ReaderStatus {
        ReaderStatus(self.stopped.clone())
    }

    /// Cancel, wait for completion, join, and return the stream
    ///
    /// Returns `None` if the thread panicked; the stream died with it.
    pub fn stop(self) -> Option<(S, StopReason)> {
        self.token.cancel();
        debug!("Waiting for the read loop to finish");

        if !self.waiter.wait() {
            warn!("Read loop exited without signalling completion");
        }

        match self.thread.join() {
            Ok(result) => {
                debug!("Read loop finished: {}", result.1);
                Some(result)
            }
            Err(_) => {
                error!("Read loop thread panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_policy() {
        assert!(!ErrorPolicy::never().escalates(u32::MAX));
        let policy = ErrorPolicy::escalate_after(3);
        assert!(!policy.escalates(2));
        assert!(policy.escalates(3));
        assert!(policy.escalates(4));
    }

    #[test]
    fn test_stop_reason_display() {
        let reason = StopReason::DeviceGone {
            consecutive_errors: 3,
            last_error: TransportError::NoDevice,
        };
        assert!(reason.to_string().contains("3 consecutive"));
        assert_eq!(StopReason::Cancelled.to_string(), "cancelled");
    }
}
