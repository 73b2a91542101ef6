//! Device selection by vendor/product identity and index
//!
//! Several identical controllers can be plugged in at once. They are told
//! apart only by their position among the matching devices in the
//! platform's enumeration order, so index 1 means "the second match".

use crate::error::{DriverError, Result};
use crate::transport::{Candidate, DeviceEntry, HostContext};
use common::DebugSink;

/// Outcome of scanning an enumeration for the `index`-th match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Position of the selected entry in the enumeration, if any
    pub position: Option<usize>,
    /// Number of matching entries seen
    pub matches: usize,
}

/// Pick the `index`-th (0-based) entry matching `vendor_id:product_id`
///
/// # Example
/// ```
/// use driver::locator::select;
/// use driver::transport::DeviceEntry;
///
/// let entry = |vendor_id, product_id| DeviceEntry {
///     vendor_id,
///     product_id,
///     bus_number: 1,
///     address: 1,
/// };
/// let entries = [entry(0x0C45, 0x7100), entry(0x1234, 0x0001), entry(0x0C45, 0x7100)];
///
/// assert_eq!(select(&entries, 0x0C45, 0x7100, 1).position, Some(2));
/// assert_eq!(select(&entries, 0x0C45, 0x7100, 2).position, None);
/// ```
pub fn select(entries: &[DeviceEntry], vendor_id: u16, product_id: u16, index: usize) -> Selection {
    let mut matches = 0;
    let mut position = None;

    for (i, entry) in entries.iter().enumerate() {
        if entry.matches(vendor_id, product_id) {
            if matches == index {
                position = Some(i);
            }
            matches += 1;
        }
    }

    Selection { position, matches }
}

/// Enumerate, select and open the `index`-th matching device
///
/// Only the selected candidate is ever opened; every other enumerated device
/// is dropped unopened.
pub fn locate<C: HostContext>(
    context: &C,
    vendor_id: u16,
    product_id: u16,
    index: usize,
    sink: &dyn DebugSink,
) -> Result<C::Session> {
    sink.protocol(|| {
        format!(
            "trying to connect to {:04x}:{:04x} at index {}",
            vendor_id, product_id, index
        )
    });

    let candidates = context.devices().map_err(DriverError::Context)?;

    // Candidates whose descriptor cannot be read are skipped; keep a map back
    // from entry position to candidate position.
    let mut entries = Vec::with_capacity(candidates.len());
    let mut positions = Vec::with_capacity(candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        match candidate.entry() {
            Ok(entry) => {
                entries.push(entry);
                positions.push(i);
            }
            Err(e) => sink.protocol(|| format!("skipping device without descriptor: {}", e)),
        }
    }

    let selection = select(&entries, vendor_id, product_id, index);
    report_candidates(&entries, vendor_id, product_id, index, sink);

    let Some(position) = selection.position else {
        sink.protocol(|| {
            format!(
                "no fan controller found at index {} ({} connected)",
                index, selection.matches
            )
        });
        return Err(DriverError::NotFound {
            vendor_id,
            product_id,
            index,
            found: selection.matches,
        });
    };

    candidates[positions[position]].open().map_err(|source| {
        sink.protocol(|| format!("failed to open fan controller at index {}: {}", index, source));
        DriverError::Access { index, source }
    })
}

/// List every matching device in enumeration order
pub fn list_matching<C: HostContext>(
    context: &C,
    vendor_id: u16,
    product_id: u16,
) -> Result<Vec<DeviceEntry>> {
    let candidates = context.devices().map_err(DriverError::Context)?;
    Ok(candidates
        .iter()
        .filter_map(|candidate| candidate.entry().ok())
        .filter(|entry| entry.matches(vendor_id, product_id))
        .collect())
}

fn report_candidates(
    entries: &[DeviceEntry],
    vendor_id: u16,
    product_id: u16,
    index: usize,
    sink: &dyn DebugSink,
) {
    let mut seen = 0;
    for entry in entries {
        if entry.matches(vendor_id, product_id) {
            if seen == index {
                sink.protocol(|| format!("found and selected usb device {} at index {}", entry, seen));
            } else {
                sink.protocol(|| format!("found usb device {} at wrong index {}", entry, seen));
            }
            seen += 1;
        } else {
            sink.protocol(|| format!("found other usb device {}", entry));
        }
    }
}
