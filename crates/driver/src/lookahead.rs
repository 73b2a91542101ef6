//! Look-ahead read stream
//!
//! Keeps `depth` IN transfers outstanding on one endpoint so the device
//! never waits for the host to re-arm a read after each completion.
//!
//! # Pipeline
//!
//! ```text
//!   worker 0 ──transfer(ticket 0)──┐
//!   worker 1 ──transfer(ticket 1)──┼──► completed (by ticket) ──► read()
//!   worker 0 ──transfer(ticket 2)──┘         │
//!        ▲                                   │
//!        └──────────── credit ◄──────────────┘
//! ```
//!
//! - Each transfer takes a ticket; ticket `n + 1` is only submitted after
//!   ticket `n` reports itself queued, so tickets follow submission order.
//! - `read` hands out completions strictly by ticket, whatever order the
//!   workers finish in.
//! - A transfer starts only against a credit. There are `depth` credits and
//!   `read` returns one per consumed completion, so at most `depth`
//!   transfers are in flight or waiting to be read, and nothing new is
//!   submitted once the consumer stops reading.
//!
//! Workers start on the first `read`, so a stream that is never read never
//! touches the endpoint. `close` stops handing out tickets and joins the
//! workers, which takes at most one transfer timeout.

use crate::error::TransportError;
use crate::transport::{InTransfer, ReadStream};
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

type Completed = Result<Vec<u8>, TransportError>;

#[derive(Debug, Default)]
struct PipelineState {
    /// Transfers that may still be started
    credits: usize,
    /// Next ticket to hand to a worker
    next_ticket: u64,
    /// Every ticket below this one has been queued with the host
    submitted: u64,
    in_flight: usize,
    completed: BTreeMap<u64, Completed>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Pipeline {
    state: Mutex<PipelineState>,
    changed: Condvar,
}

impl Pipeline {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until a transfer may start; `None` once closed
    fn take_ticket(&self) -> Option<u64> {
        let guard = self.lock();
        let mut state = self
            .changed
            .wait_while(guard, |state| {
                !state.closed && (state.credits == 0 || state.submitted != state.next_ticket)
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.closed {
            return None;
        }

        state.credits -= 1;
        state.in_flight += 1;
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        Some(ticket)
    }

    fn mark_submitted(&self, ticket: u64) {
        let mut state = self.lock();
        if state.submitted <= ticket {
            state.submitted = ticket + 1;
            self.changed.notify_all();
        }
    }

    fn complete(&self, ticket: u64, result: Completed) {
        let mut state = self.lock();
        state.in_flight -= 1;
        state.completed.insert(ticket, result);
        self.changed.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }
}

fn run_worker<T: InTransfer>(
    transfer: Arc<T>,
    pipeline: Arc<Pipeline>,
    buffer_size: usize,
    timeout: Duration,
) {
    let mut buffer = vec![0u8; buffer_size];

    while let Some(ticket) = pipeline.take_ticket() {
        trace!("Submitting transfer {}", ticket);
        let result = transfer.transfer(&mut buffer, timeout, &mut || {
            pipeline.mark_submitted(ticket)
        });
        // A transfer that failed before queueing must not hold up the next one.
        pipeline.mark_submitted(ticket);
        pipeline.complete(ticket, result.map(|len| buffer[..len].to_vec()));
    }
}

/// Read stream with `depth` transfers kept in flight
pub struct LookaheadStream<T: InTransfer> {
    transfer: Arc<T>,
    depth: usize,
    pipeline: Arc<Pipeline>,
    workers: Vec<JoinHandle<()>>,
    next_delivery: u64,
    closed: bool,
}

impl<T: InTransfer> LookaheadStream<T> {
    /// Wrap `transfer`; a depth of 0 is treated as 1
    pub fn new(transfer: T, depth: usize) -> Self {
        Self {
            transfer: Arc::new(transfer),
            depth: depth.max(1),
            pipeline: Arc::new(Pipeline::default()),
            workers: Vec::new(),
            next_delivery: 0,
            closed: false,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Transfers currently submitted and not yet completed
    pub fn in_flight(&self) -> usize {
        self.pipeline.lock().in_flight
    }

    fn start(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.pipeline.lock().credits = self.depth;
        let buffer_size = self.buffer_size();

        for index in 0..self.depth {
            let transfer = self.transfer.clone();
            let pipeline = self.pipeline.clone();
            let worker = std::thread::Builder::new()
                .name(format!("recon-xfer-{}", index))
                .spawn(move || run_worker(transfer, pipeline, buffer_size, timeout))
                .map_err(|e| {
                    TransportError::Other(format!("failed to spawn transfer worker: {}", e))
                })?;
            self.workers.push(worker);
        }

        debug!(
            "Started {} look-ahead transfers on {} ({:?} per transfer)",
            self.depth,
            self.transfer.endpoint(),
            timeout
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.pipeline.close();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Transfer worker panicked");
            }
        }
    }
}

impl<T: InTransfer> ReadStream for LookaheadStream<T> {
    fn buffer_size(&self) -> usize {
        usize::from(self.transfer.endpoint().max_packet_size)
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::NoDevice);
        }
        if self.workers.is_empty() {
            self.start(timeout)?;
        }

        let ticket = self.next_delivery;
        let deadline = Instant::now() + timeout;
        let mut state = self.pipeline.lock();
        while !state.closed && !state.completed.contains_key(&ticket) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            state = self
                .pipeline
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }

        let Some(result) = state.completed.remove(&ticket) else {
            return Err(TransportError::NoDevice);
        };
        // Resubmit in place of the consumed transfer
        self.next_delivery += 1;
        state.credits += 1;
        self.pipeline.changed.notify_all();
        drop(state);

        let data = result?;
        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.shutdown();
            let discarded = self.pipeline.lock().completed.len();
            debug!(
                "Closed read stream on {} ({} completed transfers discarded)",
                self.transfer.endpoint(),
                discarded
            );
        }
        Ok(())
    }
}

impl<T: InTransfer> Drop for LookaheadStream<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Direction, EndpointInfo, TransferKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transfer returning its call number; the first one completes late
    struct Numbered {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        first_delay: Duration,
    }

    impl Numbered {
        fn new(first_delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                first_delay,
            }
        }
    }

    impl InTransfer for Arc<Numbered> {
        fn endpoint(&self) -> EndpointInfo {
            EndpointInfo {
                address: 0x81,
                direction: Direction::In,
                transfer_type: TransferKind::Interrupt,
                max_packet_size: 8,
            }
        }

        fn transfer(
            &self,
            buffer: &mut [u8],
            _timeout: Duration,
            submitted: &mut dyn FnMut(),
        ) -> Result<usize, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            submitted();

            if call == 0 {
                std::thread::sleep(self.first_delay);
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            buffer[0] = call as u8;
            Ok(1)
        }
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_delivers_in_submission_order() {
        let transfer = Arc::new(Numbered::new(Duration::from_millis(50)));
        let mut stream = LookaheadStream::new(transfer.clone(), 2);
        let mut buffer = [0u8; 8];

        let mut seen = Vec::new();
        while seen.len() < 4 {
            match stream.read(&mut buffer, Duration::from_millis(20)) {
                Ok(len) => seen.push(buffer[..len].to_vec()),
                Err(TransportError::Timeout) => {}
                Err(e) => panic!("unexpected read error: {}", e),
            }
        }

        assert_eq!(seen, vec![vec![0], vec![1], vec![2], vec![3]]);
        stream.close().unwrap();
    }

    #[test]
    fn test_keeps_depth_transfers_in_flight() {
        let transfer = Arc::new(Numbered::new(Duration::from_millis(200)));
        let mut stream = LookaheadStream::new(transfer.clone(), 2);
        let mut buffer = [0u8; 8];

        // Ticket 0 is still running; ticket 1 was submitted alongside it.
        assert_eq!(
            stream.read(&mut buffer, Duration::from_millis(20)),
            Err(TransportError::Timeout)
        );
        assert!(wait_for(|| transfer.calls.load(Ordering::SeqCst) == 2));
        assert_eq!(transfer.max_in_flight.load(Ordering::SeqCst), 2);
        stream.close().unwrap();
    }

    #[test]
    fn test_submits_nothing_past_depth_without_reads() {
        let transfer = Arc::new(Numbered::new(Duration::from_millis(1)));
        let mut stream = LookaheadStream::new(transfer.clone(), 2);
        let mut buffer = [0u8; 8];

        assert_eq!(stream.read(&mut buffer, Duration::from_secs(1)), Ok(1));
        std::thread::sleep(Duration::from_millis(50));

        // One consumed completion released exactly one more transfer
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stream.in_flight(), 0);
        stream.close().unwrap();
    }

    #[test]
    fn test_unread_stream_never_transfers() {
        let transfer = Arc::new(Numbered::new(Duration::from_millis(1)));
        let mut stream = LookaheadStream::new(transfer.clone(), 2);

        stream.close().unwrap();

        assert_eq!(transfer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_read_after_close_is_no_device() {
        let transfer = Arc::new(Numbered::new(Duration::from_millis(1)));
        let mut stream = LookaheadStream::new(transfer, 2);
        let mut buffer = [0u8; 8];

        assert!(stream.read(&mut buffer, Duration::from_secs(1)).is_ok());
        stream.close().unwrap();

        assert_eq!(
            stream.read(&mut buffer, Duration::from_millis(5)),
            Err(TransportError::NoDevice)
        );
    }

    #[test]
    fn test_zero_depth_is_one() {
        let stream = LookaheadStream::new(Arc::new(Numbered::new(Duration::ZERO)), 0);
        assert_eq!(stream.depth(), 1);
    }
}
