//! Cell Dispatch Loop
//!
//! The single worker that owns a Cell's interpreter. Pops tasks in FIFO
//! order and runs each to completion; an uncaught script error is caught
//! here, logged with the project's log stream, and converted to an error
//! response (routes) or a no-op (fire-and-forget tasks). One failing
//! task never crashes the Cell.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::host::CellContext;
use crate::script::ScriptEngine;

use super::task::{CellTask, RouteRequest, RouteResponse};
use super::{CellState, JobKind};

pub(crate) async fn run_cell_loop(
    engine: ScriptEngine,
    cell: CellContext,
    state: Arc<AtomicU8>,
    mut task_rx: mpsc::Receiver<CellTask>,
) {
    while let Some(task) = task_rx.recv().await {
        match task {
            CellTask::Route {
                request,
                handler_id,
                params,
                reply,
            } => {
                cell.stats.requests.fetch_add(1, Ordering::Relaxed);
                *cell.current.lock() = Some(request.caller.clone());

                let payload = route_payload(&request, &params);
                let response = match engine.dispatch("route", &handler_id, &payload) {
                    Ok(value) => parse_route_result(value),
                    Err(err) => {
                        tracing::error!(
                            project_id = %cell.project_id,
                            method = %request.method,
                            path = %request.path,
                            error = %err,
                            "route handler failed"
                        );
                        RouteResponse::error(500, err.to_string())
                    }
                };

                cell.current.lock().take();
                let _ = reply.send(response);
            }

            CellTask::TimerFire { job_id } => {
                let Some((kind, caller)) = cell.jobs.fire_target(&job_id) else {
                    continue;
                };
                cell.stats.jobs_run.fetch_add(1, Ordering::Relaxed);
                *cell.current.lock() = Some(caller);

                let payload = match kind {
                    JobKind::Delay => json!({"final": true}),
                    JobKind::Interval => Value::Null,
                };
                if let Err(err) = engine.dispatch("timer", &job_id, &payload) {
                    tracing::warn!(
                        project_id = %cell.project_id,
                        job_id = %job_id,
                        error = %err,
                        "scheduled job failed"
                    );
                }

                cell.current.lock().take();
                if kind == JobKind::Delay {
                    cell.jobs.remove(&job_id);
                }
            }

            CellTask::Action { slug, caller } => {
                *cell.current.lock() = Some(caller.clone());

                let payload = json!({"user": caller.user, "session": caller.session});
                if let Err(err) = engine.dispatch("action", &slug, &payload) {
                    tracing::error!(
                        project_id = %cell.project_id,
                        slug = %slug,
                        error = %err,
                        "action handler failed"
                    );
                }

                cell.current.lock().take();
            }

            CellTask::DialogAnswer {
                correlation_id,
                answer,
                caller,
            } => {
                // Restore the identity captured when the dialog opened,
                // so continuations can open follow-up dialogs against
                // the same session.
                *cell.current.lock() = Some(caller);

                if let Err(err) = engine.dispatch("dialog", &correlation_id, &answer) {
                    tracing::warn!(
                        project_id = %cell.project_id,
                        correlation_id = %correlation_id,
                        error = %err,
                        "dialog continuation failed"
                    );
                }

                cell.current.lock().take();
            }

            CellTask::ModelHook { hook, document } => {
                if let Err(err) = engine.dispatch("hook", &hook, &document) {
                    tracing::warn!(
                        project_id = %cell.project_id,
                        hook = %hook,
                        error = %err,
                        "model hook failed"
                    );
                }
            }

            CellTask::Shutdown { reply } => {
                if engine.has_function("onStop") {
                    if let Err(err) = engine.call_function("onStop") {
                        tracing::warn!(
                            project_id = %cell.project_id,
                            error = %err,
                            "onStop failed"
                        );
                    }
                }
                engine.gc();
                state.store(CellState::Stopped as u8, Ordering::SeqCst);
                let _ = reply.send(());
                break;
            }
        }
    }

    tracing::debug!(project_id = %cell.project_id, "cell dispatch loop exited");
}

fn route_payload(request: &RouteRequest, params: &HashMap<String, String>) -> Value {
    json!({
        "method": request.method,
        "path": request.path,
        "params": params,
        "query": request.query,
        "headers": request.headers,
        "body": request.body,
        "user": request.caller.user,
        "session": request.caller.session,
    })
}

/// The prelude returns `{status, body}`; anything else (a handler
/// bypassing the prelude would be a bug, but don't crash on it) becomes
/// a 200 with the value as body.
fn parse_route_result(value: Value) -> RouteResponse {
    match value {
        Value::Object(ref map) if map.contains_key("status") && map.contains_key("body") => {
            let status = map
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(200);
            RouteResponse {
                status,
                body: map.get("body").cloned().unwrap_or(Value::Null),
            }
        }
        other => RouteResponse {
            status: 200,
            body: other,
        },
    }
}
