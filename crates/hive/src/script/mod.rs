//! Embedded Script Engine
//!
//! Wraps QuickJS for one Cell: evaluates the capability prelude and the
//! project's files, and funnels every later interpreter entry through
//! the single `__hive_dispatch` function installed by the prelude.

pub(crate) mod convert;
mod engine;

pub(crate) use engine::ScriptEngine;

/// Errors that can occur in the script engine.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("{0}")]
    Js(String),

    #[error("failed to create runtime: {0}")]
    RuntimeCreation(String),

    #[error("failed to evaluate script: {0}")]
    Eval(String),

    #[error("function not found: {0}")]
    FunctionNotFound(String),

    #[error("type conversion error: {0}")]
    Conversion(String),

    #[error("task exceeded its interpreter budget")]
    Interrupted,
}

/// Result type for engine operations.
pub type ScriptResult<T> = Result<T, ScriptError>;
