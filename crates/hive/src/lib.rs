//! Hive, a multi-tenant script runtime host.
//!
//! One process runs many small user-authored JavaScript mini-services
//! ("projects"). Each project executes in an isolated Cell: one QuickJS
//! interpreter, one task queue, one worker. Routing, scheduling,
//! document collections, file storage, logging, environment access, and
//! interactive UI dialogs are injected as capability objects. Every
//! external event (HTTP routes, timer fires, action triggers, dialog
//! answers) is serialized through the Cell's queue because the
//! interpreter is not safe for concurrent invocation.

pub mod broker;
pub mod cell;
pub mod config;
pub mod error;
pub mod events;
mod host;
pub mod project;
pub mod registry;
pub mod script;
pub mod server;

pub use broker::{
    DialogBroker, DialogKind, DialogRequestFrame, DialogResponseFrame, NullTransport, SessionHub,
    SessionTransport,
};
pub use cell::{
    ActionState, Caller, CellState, ProjectSource, RouteRequest, RouteResponse, StatsSnapshot,
};
pub use config::{HostConfig, RuntimeOptions};
pub use error::{HostError, HostResult};
pub use events::{Event, EventPublisher};
pub use registry::{Registry, RuntimeInfo};
pub use script::ScriptError;
