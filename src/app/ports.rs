//! Port traits: the hexagonal boundary between the plant core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Plant (domain)
//! ```
//!
//! Driven adapters (clock, event sinks, storage) implement these traits.
//! The [`Plant`](super::service::Plant) consumes them via generics, so the
//! simulation core never touches wall time or I/O directly.

// ───────────────────────────────────────────────────────────────
// Clock port (driven adapter: time source → domain)
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
///
/// Every timestamp in the core (sensor updates, alarm and incident
/// lifetimes, fault expiry) comes from here.
pub trait ClockPort {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`PlantEvent`](super::events::PlantEvent)s
/// through this port.  Adapters decide where they go (log, dashboard feed,
/// scoring collector).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::PlantEvent);
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ durable store)
// ───────────────────────────────────────────────────────────────

/// Namespaced key-value blob storage for plant snapshots.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic per key.
pub trait StoragePort {
    /// Read a whole value.
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the plant)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the scheduler invokes when a duty fires.
///
/// The tick thread implements this to emit telemetry or write a
/// snapshot; the [`Scheduler`](crate::scheduler::Scheduler) itself knows
/// nothing about either.
pub trait SchedulerDelegate {
    /// `label` is the human-readable label of the schedule that fired.
    fn on_schedule_fired(&mut self, label: &str);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from loading or validating a [`PlantConfig`](crate::config::PlantConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Config text failed deserialization.
    Corrupted,
    /// A config field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Store is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored blob failed to encode or decode.
    Codec,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Codec => write!(f, "snapshot codec error"),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
