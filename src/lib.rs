//! ScadaSim library.
//!
//! A simulated multi-line process plant for ICS security training:
//! stochastic sensor physics, kind-scoped actuator state machines, alarms
//! with hysteresis, latching safety interlocks, and cascading incidents
//! with forensic tokens.  Everything is in-process; the network API,
//! authentication and scoring live outside this crate.

#![deny(unused_must_use)]

pub mod actuators;
pub mod adapters;
pub mod alarms;
pub mod app;
pub mod config;
pub mod driver;
pub mod error;
pub mod forensics;
pub mod ident;
pub mod incidents;
pub mod persist;
pub mod physics;
pub mod safety;
pub mod scheduler;
pub mod sensors;

pub use app::commands::{PlantCommand, Role};
pub use app::service::Plant;
pub use config::PlantConfig;
pub use error::{CoreError, Result};
