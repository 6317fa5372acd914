//! Agent wiring for the cairn sensor.
//!
//! Pulls the pieces together: configuration, logging, the management
//! channel, the process cache, and the selected event source. The binary
//! in `main.rs` is a thin shell over [`runtime::SensorRuntime`].

pub mod config;
pub mod runtime;

pub use config::SensorConfig;
pub use runtime::SensorRuntime;
