//! Execution Context ("Cell")
//!
//! One Cell per running project: one interpreter, one task queue, one
//! worker. Capability callbacks never call into the interpreter from
//! outside; they submit tasks to the queue instead, and the worker
//! drains them in FIFO order, each to completion.

mod actions;
mod jobs;
mod routes;
mod task;
pub(crate) mod worker;

pub use actions::{ActionState, ActionTable};
pub use jobs::{JobKind, JobTable};
pub use routes::{RouteEntry, RoutePattern, RouteTable};
pub use task::{Caller, CellTask, RouteRequest, RouteResponse};

pub(crate) use task::CurrentCaller;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ─────────────────────────────────────────────────────────────────────────────
// Cell State
// ─────────────────────────────────────────────────────────────────────────────

/// Current state of a Cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellState {
    /// Boot and start phases are executing
    Starting = 0,
    /// The dispatch loop is draining tasks
    Running = 1,
    /// Stop was requested
    Stopping = 2,
    /// The Cell shut down cleanly
    Stopped = 3,
    /// The Cell was aborted
    Failed = 4,
}

impl CellState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    pub fn is_running(&self) -> bool {
        *self == CellState::Running
    }
}

impl std::fmt::Display for CellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellState::Starting => write!(f, "starting"),
            CellState::Running => write!(f, "running"),
            CellState::Stopping => write!(f, "stopping"),
            CellState::Stopped => write!(f, "stopped"),
            CellState::Failed => write!(f, "failed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Project Source
// ─────────────────────────────────────────────────────────────────────────────

/// The source files of one project plus its environment values.
///
/// Modules resolve by file name without the `.js` extension,
/// case-sensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSource {
    /// Entry file name (e.g. "index.js")
    pub entry: String,

    /// File name -> source text
    pub files: HashMap<String, String>,

    /// Values exposed through `app.env.get`
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ProjectSource {
    /// A single-file project with the conventional entry name.
    pub fn from_script(source: impl Into<String>) -> Self {
        let mut files = HashMap::new();
        files.insert("index.js".to_string(), source.into());
        Self {
            entry: "index.js".to_string(),
            files,
            env: HashMap::new(),
        }
    }

    pub fn new(entry: impl Into<String>, files: HashMap<String, String>) -> Self {
        Self {
            entry: entry.into(),
            files,
            env: HashMap::new(),
        }
    }

    pub fn with_file(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.insert(name.into(), source.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub(crate) fn entry_module(&self) -> &str {
        module_name(&self.entry)
    }

    /// The module map handed to the engine: extension-less name -> source.
    pub(crate) fn module_map(&self) -> HashMap<String, String> {
        self.files
            .iter()
            .map(|(name, source)| (module_name(name).to_string(), source.clone()))
            .collect()
    }
}

fn module_name(file: &str) -> &str {
    file.strip_suffix(".js").unwrap_or(file)
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

/// Running counters, updated by the worker.
#[derive(Debug, Default)]
pub struct CellStats {
    pub requests: AtomicU64,
    pub jobs_run: AtomicU64,
}

/// A point-in-time view of a Cell, for the stats query.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub project_id: String,
    pub state: String,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
    pub requests: u64,
    pub jobs_run: u64,
    pub routes: usize,
    pub scheduled_jobs: usize,
    pub actions: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Cell Handle
// ─────────────────────────────────────────────────────────────────────────────

/// The registry's view of a running Cell. The interpreter itself lives
/// inside the worker task; everything here is shared bookkeeping.
pub struct CellHandle {
    pub project_id: String,
    state: Arc<AtomicU8>,
    pub(crate) source: Arc<ProjectSource>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) stats: Arc<CellStats>,
    pub(crate) routes: Arc<RwLock<RouteTable>>,
    pub(crate) jobs: Arc<JobTable>,
    pub(crate) actions: Arc<ActionTable>,
    pub(crate) current: CurrentCaller,
    pub(crate) task_tx: mpsc::Sender<CellTask>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CellHandle {
    pub(crate) fn new(
        project_id: &str,
        source: ProjectSource,
        task_tx: mpsc::Sender<CellTask>,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            state: Arc::new(AtomicU8::new(CellState::Starting as u8)),
            source: Arc::new(source),
            started_at: Utc::now(),
            stats: Arc::new(CellStats::default()),
            routes: Arc::new(RwLock::new(RouteTable::default())),
            jobs: Arc::new(JobTable::default()),
            actions: Arc::new(ActionTable::default()),
            current: Arc::new(Mutex::new(None)),
            task_tx,
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CellState {
        CellState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: CellState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn state_arc(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub(crate) fn set_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock() = Some(handle);
    }

    pub(crate) fn abort_worker(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Utc::now();
        StatsSnapshot {
            project_id: self.project_id.clone(),
            state: self.state().to_string(),
            started_at: self.started_at,
            uptime_ms: (now - self.started_at).num_milliseconds().max(0) as u64,
            requests: self.stats.requests.load(Ordering::Relaxed),
            jobs_run: self.stats.jobs_run.load(Ordering::Relaxed),
            routes: self.routes.read().len(),
            scheduled_jobs: self.jobs.len(),
            actions: self.actions.len(),
        }
    }
}

impl std::fmt::Debug for CellHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellHandle")
            .field("project_id", &self.project_id)
            .field("state", &self.state())
            .finish()
    }
}
