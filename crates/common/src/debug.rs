//! Debug output sink
//!
//! The driver never decides where debug text goes. It is handed a
//! [`DebugSink`] at construction and asks it, per category, whether output is
//! wanted before formatting anything.

use crate::logging::{PROTOCOL_TARGET, USB_TARGET};
use std::fmt;
use std::sync::Arc;

/// Independent debug output toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugCategory {
    /// Connection steps, packets and decoded reports
    Protocol,
    /// The USB library's own diagnostics
    Usb,
}

impl fmt::Display for DebugCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugCategory::Protocol => write!(f, "debug"),
            DebugCategory::Usb => write!(f, "usb"),
        }
    }
}

/// Receiver of debug messages
pub trait DebugSink: Send + Sync {
    /// Whether messages of this category are wanted
    fn enabled(&self, category: DebugCategory) -> bool;

    /// Deliver one message; only called when `enabled` returned true
    fn emit(&self, category: DebugCategory, message: &str);
}

impl<'a> dyn DebugSink + 'a {
    /// Format and emit a message if its category is enabled
    pub fn message<F>(&self, category: DebugCategory, message: F)
    where
        F: FnOnce() -> String,
    {
        if self.enabled(category) {
            self.emit(category, &message());
        }
    }

    /// Shorthand for a [`DebugCategory::Protocol`] message
    pub fn protocol<F>(&self, message: F)
    where
        F: FnOnce() -> String,
    {
        self.message(DebugCategory::Protocol, message);
    }
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn DebugSink>;

/// The two toggles, as set by `--debug` and `--debugusb`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub protocol: bool,
    pub usb: bool,
}

impl DebugFlags {
    pub fn enabled(&self, category: DebugCategory) -> bool {
        match category {
            DebugCategory::Protocol => self.protocol,
            DebugCategory::Usb => self.usb,
        }
    }
}

/// Sink that forwards enabled categories to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    flags: DebugFlags,
}

impl TracingSink {
    pub fn new(flags: DebugFlags) -> Self {
        Self { flags }
    }

    pub fn shared(flags: DebugFlags) -> SharedSink {
        Arc::new(Self::new(flags))
    }
}

impl DebugSink for TracingSink {
    fn enabled(&self, category: DebugCategory) -> bool {
        self.flags.enabled(category)
    }

    fn emit(&self, category: DebugCategory, message: &str) {
        match category {
            DebugCategory::Protocol => tracing::debug!(target: PROTOCOL_TARGET, "{}", message),
            DebugCategory::Usb => tracing::debug!(target: USB_TARGET, "{}", message),
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DebugSink for NullSink {
    fn enabled(&self, _category: DebugCategory) -> bool {
        false
    }

    fn emit(&self, _category: DebugCategory, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect(Mutex<Vec<String>>, DebugFlags);

    impl DebugSink for Collect {
        fn enabled(&self, category: DebugCategory) -> bool {
            self.1.enabled(category)
        }

        fn emit(&self, category: DebugCategory, message: &str) {
            self.0.lock().unwrap().push(format!("[{}] {}", category, message));
        }
    }

    #[test]
    fn test_disabled_category_is_not_formatted() {
        let sink = Collect(
            Mutex::new(Vec::new()),
            DebugFlags {
                protocol: false,
                usb: true,
            },
        );
        let dyn_sink: &dyn DebugSink = &sink;

        dyn_sink.protocol(|| panic!("formatted a disabled message"));
        dyn_sink.message(DebugCategory::Usb, || "context opened".to_string());

        assert_eq!(*sink.0.lock().unwrap(), vec!["[usb] context opened"]);
    }

    #[test]
    fn test_flags() {
        let flags = DebugFlags {
            protocol: true,
            usb: false,
        };
        assert!(flags.enabled(DebugCategory::Protocol));
        assert!(!flags.enabled(DebugCategory::Usb));
        assert!(!NullSink.enabled(DebugCategory::Protocol));
        assert!(TracingSink::new(flags).enabled(DebugCategory::Protocol));
    }
}
