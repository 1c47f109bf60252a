//! Fixed-capacity identifiers and short text fields.
//!
//! Ids and status strings live in `heapless::String`s with explicit caps so
//! record sizes stay bounded no matter what the API layer hands us.  Input
//! longer than the cap is truncated on a char boundary.

use core::fmt::Write;

/// Process line number (1-based).
pub type LineId = u8;

pub type SensorId = heapless::String<20>;
pub type ActuatorId = heapless::String<20>;
pub type InterlockId = heapless::String<20>;
pub type AlarmId = heapless::String<16>;
pub type IncidentId = heapless::String<16>;

/// Command result / status string.
pub type ShortText = heapless::String<48>;
/// Alarm message.
pub type Message = heapless::String<64>;
/// Incident description.
pub type Description = heapless::String<96>;

/// Copy `s` into a bounded string, truncating at the last whole char that fits.
pub fn bounded<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in s.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Format into a bounded string; overflow truncates silently.
pub fn bounded_fmt<const N: usize>(args: core::fmt::Arguments<'_>) -> heapless::String<N> {
    let mut tmp = String::new();
    let _ = tmp.write_fmt(args);
    bounded(&tmp)
}

/// `PREFIX-0001` style sequential id.
pub fn sequenced<const N: usize>(prefix: &str, seq: u32) -> heapless::String<N> {
    bounded_fmt(format_args!("{prefix}-{seq:04}"))
}

/// Monotonic sequence counter for record ids.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    next: u32,
}

impl Sequence {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Resume after the highest sequence already in use.
    pub fn resume_after(highest: u32) -> Self {
        Self { next: highest.saturating_add(1) }
    }

    pub fn next(&mut self) -> u32 {
        let n = self.next.max(1);
        self.next = n.wrapping_add(1);
        n
    }
}

/// Parse the numeric suffix of a `PREFIX-0042` id.
pub fn sequence_of(id: &str) -> Option<u32> {
    id.rsplit('-').next()?.parse().ok()
}
