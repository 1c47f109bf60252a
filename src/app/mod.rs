//! Application core: plant orchestration behind port traits.
//!
//! The business rules live in the component modules (physics, sensors,
//! actuators, alarms, safety, incidents).  This layer wires them into one
//! [`service::Plant`] and talks to the outside world only through the
//! **port traits** in [`ports`], keeping it testable with mock adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
