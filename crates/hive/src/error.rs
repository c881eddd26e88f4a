//! Error taxonomy for the runtime host.
//!
//! Task-level failures stay inside the owning Cell's dispatch loop; only
//! lifecycle-level errors (compile failures, shutdown timeouts) reach the
//! callers of the registry.

use std::time::Duration;

use crate::cell::ActionState;
use crate::script::ScriptError;
use hive_store::StoreError;

/// Errors surfaced by the registry and its Cells.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("project '{0}' is already running")]
    AlreadyRunning(String),

    #[error("project '{0}' is not running")]
    NotRunning(String),

    #[error("failed to load project script: {0}")]
    Compile(String),

    #[error("no route matches {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{slug}' is {state}")]
    ActionConflict { slug: String, state: ActionState },

    #[error("task did not complete within {0:?}")]
    DispatchTimeout(Duration),

    #[error("project did not shut down within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("dispatch channel closed")]
    ChannelClosed,
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
