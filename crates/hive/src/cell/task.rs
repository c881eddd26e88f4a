//! Dispatch Tasks
//!
//! Everything that reaches a Cell's interpreter arrives as one of these,
//! serialized through the Cell's single task queue.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

/// The identity on whose behalf a task runs. Captured as data when the
/// task (or the job/dialog that produced it) was created, since no
/// ambient request context to read it from later.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Caller {
    pub user: Option<String>,
    pub session: Option<String>,
}

impl Caller {
    pub fn new(user: Option<String>, session: Option<String>) -> Self {
        Self { user, session }
    }
}

/// The caller identity of the task currently executing on a Cell's
/// worker, visible to the capability bindings.
pub(crate) type CurrentCaller = Arc<Mutex<Option<Caller>>>;

/// An inbound HTTP request, reduced to what the script sees.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub caller: Caller,
}

impl RouteRequest {
    /// A bare request, convenient for tests and internal callers.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Value::Null,
            caller: Caller::default(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_caller(mut self, caller: Caller) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }
}

/// The handler's reply: status plus JSON body.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResponse {
    pub status: u16,
    pub body: Value,
}

impl RouteResponse {
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message.into() }),
        }
    }
}

/// A unit of work for a Cell's dispatch loop.
pub enum CellTask {
    /// An inbound HTTP request matched to a registered route.
    Route {
        request: RouteRequest,
        handler_id: String,
        params: HashMap<String, String>,
        reply: oneshot::Sender<RouteResponse>,
    },

    /// A scheduled job fired.
    TimerFire { job_id: String },

    /// A user triggered an action.
    Action { slug: String, caller: Caller },

    /// A dialog was answered (or torn down with its sentinel).
    DialogAnswer {
        correlation_id: String,
        answer: Value,
        caller: Caller,
    },

    /// The administrative collaborator mutated a model document.
    ModelHook { hook: String, document: Value },

    /// Run the shutdown phase and exit the loop.
    Shutdown { reply: oneshot::Sender<()> },
}
