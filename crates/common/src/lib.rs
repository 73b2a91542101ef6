//! Shared plumbing for the recon driver
//!
//! This crate holds the pieces the driver and its binary share but that do
//! not touch USB: the debug sink abstraction, logging setup, cancellation and
//! completion primitives, and the report channel between the reader thread
//! and consumers.

pub mod cancel;
pub mod channel;
pub mod debug;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use cancel::{CancellationToken, Completion, CompletionWaiter, completion_signal};
pub use channel::{REPORT_CHANNEL_CAPACITY, ReportReceiver, ReportSender, create_report_channel};
pub use debug::{DebugCategory, DebugFlags, DebugSink, NullSink, SharedSink, TracingSink};
pub use error::{Error, Result};
pub use logging::setup_logging;
