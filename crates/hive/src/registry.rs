//! Runtime Registry & Lifecycle Controller
//!
//! The top-level map from project id to running Cell. Constructed once
//! at process start and passed by reference to whatever needs to look
//! up Cells. There are no global registries.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use hive_store::{BlobStore, DocStore, MemoryBlobStore, MemoryStore};

use crate::broker::{DialogBroker, NullTransport, SessionTransport};
use crate::cell::worker::run_cell_loop;
use crate::cell::{
    ActionState, Caller, CellHandle, CellState, CellTask, ProjectSource, RouteRequest,
    RouteResponse, StatsSnapshot,
};
use crate::config::RuntimeOptions;
use crate::error::{HostError, HostResult};
use crate::events::{Event, EventPublisher};
use crate::host::CellContext;
use crate::script::ScriptEngine;

/// A lightweight view of a running Cell.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInfo {
    pub project_id: String,
    pub state: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// The registry owning every running Cell.
pub struct Registry {
    cells: DashMap<String, Arc<CellHandle>>,
    store: Arc<dyn DocStore>,
    blobs: Arc<dyn BlobStore>,
    broker: DialogBroker,
    events: EventPublisher,
    event_tx: broadcast::Sender<Event>,
    options: RuntimeOptions,
}

impl Registry {
    pub fn new(
        store: Arc<dyn DocStore>,
        blobs: Arc<dyn BlobStore>,
        transport: Arc<dyn SessionTransport>,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            cells: DashMap::new(),
            store,
            blobs,
            broker: DialogBroker::new(transport),
            events: EventPublisher::new(event_tx.clone()),
            event_tx,
            options,
        })
    }

    /// A registry over in-memory collaborators (tests, ephemeral runs).
    pub fn in_memory() -> Arc<Self> {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(NullTransport),
            RuntimeOptions::default(),
        )
    }

    /// In-memory stores with a custom transport and options.
    pub fn in_memory_with(
        transport: Arc<dyn SessionTransport>,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            transport,
            options,
        )
    }

    pub fn broker(&self) -> &DialogBroker {
        &self.broker
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────

    /// Start a project: reserve its slot, run the boot phase (the entry
    /// file, registrations only) and the start phase (`onStart`), then hand
    /// the engine to the Cell's worker. A failure in either phase leaves
    /// nothing registered.
    pub async fn start(&self, project_id: &str, source: ProjectSource) -> HostResult<()> {
        let (task_tx, task_rx) = mpsc::channel(self.options.queue_capacity);
        let handle = Arc::new(CellHandle::new(project_id, source, task_tx.clone()));

        // Reserve the slot before booting so two concurrent starts
        // cannot both win.
        match self.cells.entry(project_id.to_string()) {
            Entry::Occupied(_) => return Err(HostError::AlreadyRunning(project_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&handle));
            }
        }

        let cell = CellContext {
            project_id: project_id.to_string(),
            files: Arc::new(handle.source.module_map()),
            env: Arc::new(handle.source.env.clone()),
            routes: Arc::clone(&handle.routes),
            jobs: Arc::clone(&handle.jobs),
            actions: Arc::clone(&handle.actions),
            stats: Arc::clone(&handle.stats),
            store: Arc::clone(&self.store),
            blobs: Arc::clone(&self.blobs),
            broker: self.broker.clone(),
            events: self.events.clone(),
            current: Arc::clone(&handle.current),
            task_tx,
        };

        tracing::info!(project_id, "booting project");
        let engine = match ScriptEngine::new(cell.clone(), self.options.task_timeout()) {
            Ok(engine) => engine,
            Err(err) => {
                self.unregister_failed(project_id, &handle);
                return Err(HostError::Compile(err.to_string()));
            }
        };

        if let Err(err) = engine.load_entry(handle.source.entry_module()) {
            self.unregister_failed(project_id, &handle);
            return Err(HostError::Compile(err.to_string()));
        }

        if engine.has_function("onStart") {
            if let Err(err) = engine.call_function("onStart") {
                self.unregister_failed(project_id, &handle);
                return Err(HostError::Script(err));
            }
        }

        let worker = tokio::spawn(run_cell_loop(engine, cell, handle.state_arc(), task_rx));
        handle.set_worker(worker);
        handle.set_state(CellState::Running);
        self.events.emit("ProjectStarted", project_id, Value::Null);
        tracing::info!(
            project_id,
            routes = handle.routes.read().len(),
            actions = handle.actions.len(),
            "project started"
        );
        Ok(())
    }

    fn unregister_failed(&self, project_id: &str, handle: &CellHandle) {
        handle.jobs.cancel_all();
        handle.set_state(CellState::Failed);
        self.cells.remove(project_id);
    }

    /// Stop a project. Idempotent: stopping an absent project is a
    /// no-op. Cancels jobs, answers pending dialogs with their
    /// sentinels, runs the shutdown phase inside the dispatch loop
    /// (bounded), then tears the Cell down.
    pub async fn stop(&self, project_id: &str) -> HostResult<()> {
        let Some((_, handle)) = self.cells.remove(project_id) else {
            return Ok(());
        };

        tracing::info!(project_id, "stopping project");
        handle.set_state(CellState::Stopping);
        handle.jobs.cancel_all();

        // Sentinel answers enqueue ahead of the shutdown task (FIFO),
        // so continuations still run inside the loop before onStop.
        self.broker.teardown_project(project_id).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = handle
            .task_tx
            .send(CellTask::Shutdown { reply: reply_tx })
            .await
            .is_ok();

        let mut result = Ok(());
        if sent {
            let timeout = self.options.shutdown_timeout();
            if tokio::time::timeout(timeout, reply_rx).await.is_err() {
                tracing::warn!(project_id, "shutdown timed out, aborting worker");
                handle.abort_worker();
                handle.set_state(CellState::Failed);
                result = Err(HostError::ShutdownTimeout(timeout));
            }
        }

        if result.is_ok() {
            handle.set_state(CellState::Stopped);
        }
        self.events.emit("ProjectStopped", project_id, Value::Null);
        result
    }

    /// Stop, then start again with the same source. Either error
    /// surfaces on its own.
    pub async fn restart(&self, project_id: &str) -> HostResult<()> {
        let source = self
            .cells
            .get(project_id)
            .map(|entry| Arc::clone(&entry.value().source))
            .ok_or_else(|| HostError::NotRunning(project_id.to_string()))?;

        self.stop(project_id).await?;
        self.start(project_id, (*source).clone()).await
    }

    /// Stop every running project (process shutdown).
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.cells.iter().map(|e| e.key().clone()).collect();
        for project_id in ids {
            if let Err(err) = self.stop(&project_id).await {
                tracing::error!(project_id = %project_id, error = %err, "failed to stop project");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────

    pub fn is_running(&self, project_id: &str) -> bool {
        self.cells
            .get(project_id)
            .map(|entry| entry.value().is_running())
            .unwrap_or(false)
    }

    pub fn info(&self, project_id: &str) -> Option<RuntimeInfo> {
        self.cells.get(project_id).map(|entry| {
            let handle = entry.value();
            RuntimeInfo {
                project_id: handle.project_id.clone(),
                state: handle.state().to_string(),
                started_at: handle.started_at,
            }
        })
    }

    pub fn list(&self) -> Vec<RuntimeInfo> {
        self.cells
            .iter()
            .map(|entry| {
                let handle = entry.value();
                RuntimeInfo {
                    project_id: handle.project_id.clone(),
                    state: handle.state().to_string(),
                    started_at: handle.started_at,
                }
            })
            .collect()
    }

    pub fn stats(&self, project_id: &str) -> HostResult<StatsSnapshot> {
        self.cells
            .get(project_id)
            .map(|entry| entry.value().snapshot())
            .ok_or_else(|| HostError::NotRunning(project_id.to_string()))
    }

    pub fn action_states(&self, project_id: &str) -> HostResult<Vec<(String, ActionState)>> {
        self.cells
            .get(project_id)
            .map(|entry| entry.value().actions.states())
            .ok_or_else(|| HostError::NotRunning(project_id.to_string()))
    }

    pub fn action_state(&self, project_id: &str, slug: &str) -> Option<ActionState> {
        self.cells
            .get(project_id)
            .and_then(|entry| entry.value().actions.get(slug))
    }

    /// Administrative enable/disable of an action.
    pub fn set_action_enabled(
        &self,
        project_id: &str,
        slug: &str,
        enabled: bool,
    ) -> HostResult<ActionState> {
        let handle = self
            .cells
            .get(project_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HostError::NotRunning(project_id.to_string()))?;

        let state = handle
            .actions
            .set_enabled(slug, enabled)
            .ok_or_else(|| HostError::UnknownAction(slug.to_string()))?;
        self.events.emit(
            "ActionStateChanged",
            project_id,
            serde_json::json!({"slug": slug, "state": state}),
        );
        Ok(state)
    }

    // ─────────────────────────────────────────────────────────────────
    // Dispatch entry points
    // ─────────────────────────────────────────────────────────────────

    /// Route an inbound request to the project's matching handler and
    /// wait (bounded) for the response. A miss enqueues nothing.
    pub async fn handle_route(
        &self,
        project_id: &str,
        request: RouteRequest,
    ) -> HostResult<RouteResponse> {
        let handle = self
            .cells
            .get(project_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HostError::NotRunning(project_id.to_string()))?;
        if !handle.is_running() {
            return Err(HostError::NotRunning(project_id.to_string()));
        }

        let matched = handle.routes.read().find(&request.method, &request.path);
        let Some((handler_id, params)) = matched else {
            return Err(HostError::RouteNotFound {
                method: request.method,
                path: request.path,
            });
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .task_tx
            .send(CellTask::Route {
                request,
                handler_id,
                params,
                reply: reply_tx,
            })
            .await
            .map_err(|_| HostError::NotRunning(project_id.to_string()))?;

        let timeout = self.options.request_timeout();
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(HostError::ChannelClosed),
            Err(_) => Err(HostError::DispatchTimeout(timeout)),
        }
    }

    /// Trigger an action on behalf of a user/session. Conflicts are
    /// reported without invoking the handler, naming the actual state.
    pub async fn trigger_action(
        &self,
        project_id: &str,
        slug: &str,
        user: Option<String>,
        session: Option<String>,
    ) -> HostResult<()> {
        let handle = self
            .cells
            .get(project_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HostError::NotRunning(project_id.to_string()))?;
        if !handle.is_running() {
            return Err(HostError::NotRunning(project_id.to_string()));
        }

        let state = handle
            .actions
            .get(slug)
            .ok_or_else(|| HostError::UnknownAction(slug.to_string()))?;
        if state != ActionState::Enabled {
            return Err(HostError::ActionConflict {
                slug: slug.to_string(),
                state,
            });
        }

        handle
            .task_tx
            .send(CellTask::Action {
                slug: slug.to_string(),
                caller: Caller::new(user, session),
            })
            .await
            .map_err(|_| HostError::ChannelClosed)
    }

    /// The administrative collaborator inserted a model document.
    pub async fn notify_model_insert(
        &self,
        project_id: &str,
        model: &str,
        document: Value,
    ) -> HostResult<()> {
        self.notify_model(project_id, "insert", model, document).await
    }

    /// The administrative collaborator updated a model document.
    pub async fn notify_model_update(
        &self,
        project_id: &str,
        model: &str,
        document: Value,
    ) -> HostResult<()> {
        self.notify_model(project_id, "update", model, document).await
    }

    /// The administrative collaborator deleted a model document.
    pub async fn notify_model_delete(
        &self,
        project_id: &str,
        model: &str,
        document: Value,
    ) -> HostResult<()> {
        self.notify_model(project_id, "delete", model, document).await
    }

    async fn notify_model(
        &self,
        project_id: &str,
        kind: &str,
        model: &str,
        document: Value,
    ) -> HostResult<()> {
        let handle = self
            .cells
            .get(project_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HostError::NotRunning(project_id.to_string()))?;

        handle
            .task_tx
            .send(CellTask::ModelHook {
                hook: format!("{kind}:{model}"),
                document,
            })
            .await
            .map_err(|_| HostError::ChannelClosed)
    }
}
