//! Logging setup and configuration

use crate::debug::DebugFlags;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Tracing target for protocol-level debug output
pub const PROTOCOL_TARGET: &str = "recon::protocol";

/// Tracing target for USB transport debug output
pub const USB_TARGET: &str = "recon::usb";

/// Build filter directives for a base level plus the enabled debug categories
///
/// Enabling a category lifts its target to `debug` even when the base level
/// is quieter, so `--debug` works without touching `RUST_LOG`.
pub fn filter_directives(default_level: &str, flags: DebugFlags) -> String {
    let mut directives = default_level.to_string();
    if flags.protocol {
        directives.push_str(&format!(",{}=debug", PROTOCOL_TARGET));
    }
    if flags.usb {
        directives.push_str(&format!(",{}=debug", USB_TARGET));
    }
    directives
}

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over the directives built from the arguments.
pub fn setup_logging(default_level: &str, flags: DebugFlags) -> crate::Result<()> {
    let directives = filter_directives(default_level, flags);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert_eq!(filter_directives("info", DebugFlags::default()), "info");
        assert_eq!(
            filter_directives(
                "warn",
                DebugFlags {
                    protocol: true,
                    usb: false
                }
            ),
            "warn,recon::protocol=debug"
        );
        assert_eq!(
            filter_directives(
                "info",
                DebugFlags {
                    protocol: true,
                    usb: true
                }
            ),
            "info,recon::protocol=debug,recon::usb=debug"
        );
    }

    #[test]
    fn test_directives_parse_as_filter() {
        let directives = filter_directives(
            "info",
            DebugFlags {
                protocol: true,
                usb: true,
            },
        );
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
