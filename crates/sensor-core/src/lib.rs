//! Sensor-core crate: the event-capture-and-decision pipeline.
//!
//! Holds the canonical event model, the process metadata cache, the
//! allow/deny identity lists, the authorization decision engine, and the
//! dispatcher that routes normalized events to either the authorization
//! path or the notify path. Platform backends and the management channel
//! plug in through the traits defined here ([`EventIntake`],
//! [`EventOutbound`], [`ProcessIntrospect`], [`AuthAnswer`]).

pub mod authorizer;
pub mod dispatch;
pub mod event;
pub mod identity;
pub mod introspect;
pub mod process_cache;
pub mod source;

pub use authorizer::{AuthAnswer, AuthDecision, AuthToken, Authorizer};
pub use dispatch::{Dispatcher, EventOutbound};
pub use event::{props, EventType, MuteType, SensorEvent};
pub use identity::{ExecVerdict, FileIdentity, IdentityLists};
pub use introspect::{ProcessIntrospect, UserCache};
pub use process_cache::{ProcessCache, ProcessCacheEntry};
pub use source::{CapturedEvent, DnsPayload, EventIntake, SecuritySource, SourceError, SourceState};
