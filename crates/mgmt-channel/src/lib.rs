//! Event transport between the sensor and its management process.
//!
//! The sensor hosts a local-socket listener; the management UI connects in.
//! Outbound traffic is NDJSON-framed [`SensorMessage`] lines, inbound is
//! [`ControlMessage`] lines. At most one manager is served at a time; a new
//! connection replaces the previous one.

pub mod messages;
pub mod server;

pub use messages::{ControlMessage, SensorMessage};
pub use server::{ChannelHandle, ChannelServer, ControlHandler};
