//! Test utilities shared across crates
//!
//! Provides a recording debug sink and helpers for waiting on background
//! threads without hanging a test run.
//!
//! # Example
//!
//! ```
//! use common::debug::{DebugCategory, DebugFlags, DebugSink};
//! use common::test_utils::RecordingSink;
//!
//! let sink = RecordingSink::new(DebugFlags { protocol: true, usb: false });
//! let dyn_sink: &dyn DebugSink = &sink;
//! dyn_sink.protocol(|| "Interface claimed".to_string());
//! assert!(sink.contains("claimed"));
//! assert_eq!(sink.count(DebugCategory::Usb), 0);
//! ```

use crate::debug::{DebugCategory, DebugFlags, DebugSink};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Debug sink that keeps every emitted message
#[derive(Debug, Default)]
pub struct RecordingSink {
    flags: DebugFlags,
    messages: Mutex<Vec<(DebugCategory, String)>>,
}

impl RecordingSink {
    pub fn new(flags: DebugFlags) -> Self {
        Self {
            flags,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Sink with both categories enabled
    pub fn all() -> Arc<Self> {
        Arc::new(Self::new(DebugFlags {
            protocol: true,
            usb: true,
        }))
    }

    /// Snapshot of recorded messages, in emission order
    pub fn messages(&self) -> Vec<(DebugCategory, String)> {
        self.lock().clone()
    }

    /// Whether any recorded message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lock().iter().any(|(_, m)| m.contains(needle))
    }

    /// Number of messages recorded for a category
    pub fn count(&self, category: DebugCategory) -> usize {
        self.lock().iter().filter(|(c, _)| *c == category).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(DebugCategory, String)>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DebugSink for RecordingSink {
    fn enabled(&self, category: DebugCategory) -> bool {
        self.flags.enabled(category)
    }

    fn emit(&self, category: DebugCategory, message: &str) {
        self.lock().push((category, message.to_string()));
    }
}

/// Timeout wrapper for async tests
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Poll `condition` until it holds or `timeout` elapses
///
/// Returns whether the condition was met.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Pad a framed packet out to a full endpoint buffer
///
/// Real reads always return the endpoint's max packet size; bytes past the
/// declared payload are junk.
pub fn endpoint_buffer(packet: &[u8], size: usize) -> Vec<u8> {
    let mut buffer = packet.to_vec();
    if buffer.len() < size {
        buffer.resize(size, 0xCC);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_respects_flags() {
        let sink = RecordingSink::new(DebugFlags {
            protocol: false,
            usb: true,
        });
        let dyn_sink: &dyn DebugSink = &sink;

        dyn_sink.protocol(|| "skipped".to_string());
        dyn_sink.message(DebugCategory::Usb, || "kept".to_string());

        assert_eq!(sink.messages(), vec![(DebugCategory::Usb, "kept".to_string())]);
        assert!(!sink.contains("skipped"));
        assert_eq!(sink.count(DebugCategory::Protocol), 0);
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_wait_until() {
        let mut calls = 0;
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
            calls += 1;
            calls >= 3
        }));
        assert!(!wait_until(Duration::from_millis(10), || false));
    }

    #[test]
    fn test_endpoint_buffer() {
        let buffer = endpoint_buffer(&[2, 0x41, 22, 30], 8);
        assert_eq!(buffer.len(), 8);
        assert_eq!(&buffer[..4], &[2, 0x41, 22, 30]);
        assert_eq!(endpoint_buffer(&[0, 0xF0], 1), vec![0, 0xF0]);
    }
}
