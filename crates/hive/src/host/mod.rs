//! Capability Bindings
//!
//! The native half of the Module Host: `__hive_*` functions registered
//! on the global object. The JS prelude wraps these into the `app`
//! surface and owns the handler tables; every boundary type here is
//! plain data (strings, numbers, JSON), never an interpreter reference.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rquickjs::function::{Func, Opt, Rest};
use rquickjs::{Coerced, Ctx, IntoJs, Object, Value as JsValue};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use hive_query::{Document, FindOptions, apply_options, apply_update, matches};
use hive_store::{BlobStore, DocStore};

use crate::broker::{DialogBroker, DialogKind};
use crate::cell::{
    ActionTable, Caller, CellStats, CellTask, CurrentCaller, JobKind, JobTable, RouteTable,
};
use crate::events::EventPublisher;
use crate::script::convert::js_to_json;

// ─────────────────────────────────────────────────────────────────────────────
// Cell Context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the capability bindings (and the dispatch loop) share for
/// one Cell.
#[derive(Clone)]
pub(crate) struct CellContext {
    pub project_id: String,
    pub files: Arc<HashMap<String, String>>,
    pub env: Arc<HashMap<String, String>>,
    pub routes: Arc<RwLock<RouteTable>>,
    pub jobs: Arc<JobTable>,
    pub actions: Arc<ActionTable>,
    pub stats: Arc<CellStats>,
    pub store: Arc<dyn DocStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub broker: DialogBroker,
    pub events: EventPublisher,
    pub current: CurrentCaller,
    pub task_tx: mpsc::Sender<CellTask>,
}

impl CellContext {
    fn caller(&self) -> Caller {
        self.current.lock().clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Installation
// ─────────────────────────────────────────────────────────────────────────────

/// Register the native capability functions on the global object.
pub(crate) fn install(ctx: &Ctx<'_>, cell: &CellContext) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set("__hive_project", cell.project_id.clone())?;

    register_console(ctx, &cell.project_id)?;

    // __hive_log(level, message)
    {
        let project_id = cell.project_id.clone();
        globals.set(
            "__hive_log",
            Func::from(move |level: String, message: String| {
                log_line(&project_id, &level, &message);
            }),
        )?;
    }

    // __hive_module_source(name) -> source text
    {
        let files = Arc::clone(&cell.files);
        globals.set(
            "__hive_module_source",
            Func::from(
                move |ctx: Ctx<'_>, name: String| -> rquickjs::Result<String> {
                    match files.get(&name) {
                        Some(source) => Ok(source.clone()),
                        None => Err(throw(&ctx, &format!("unknown module '{name}'"))),
                    }
                },
            ),
        )?;
    }

    // __hive_register_route(method, path, handlerId)
    {
        let routes = Arc::clone(&cell.routes);
        let project_id = cell.project_id.clone();
        globals.set(
            "__hive_register_route",
            Func::from(move |method: String, path: String, handler_id: String| {
                tracing::debug!(project_id = %project_id, %method, %path, "route registered");
                routes.write().insert(&method, &path, &handler_id);
            }),
        )?;
    }

    // __hive_schedule(kind, ms) -> job id
    {
        let jobs = Arc::clone(&cell.jobs);
        let task_tx = cell.task_tx.clone();
        let current = Arc::clone(&cell.current);
        globals.set(
            "__hive_schedule",
            Func::from(
                move |ctx: Ctx<'_>, kind: String, ms: f64| -> rquickjs::Result<String> {
                    let kind = match kind.as_str() {
                        "interval" => JobKind::Interval,
                        "delay" => JobKind::Delay,
                        other => {
                            return Err(throw(&ctx, &format!("unknown schedule kind '{other}'")));
                        }
                    };
                    if !ms.is_finite() || ms < 0.0 {
                        return Err(throw(&ctx, "schedule period must be a non-negative number"));
                    }

                    let period = Duration::from_millis(ms as u64);
                    let caller = current.lock().clone().unwrap_or_default();
                    let id = jobs.register(kind, period, caller);
                    let timer = spawn_timer(kind, period, id.clone(), task_tx.clone());
                    jobs.attach_timer(&id, timer);
                    Ok(id)
                },
            ),
        )?;
    }

    // __hive_cancel_job(id)
    {
        let jobs = Arc::clone(&cell.jobs);
        globals.set(
            "__hive_cancel_job",
            Func::from(move |id: String| {
                jobs.cancel(&id);
            }),
        )?;
    }

    // __hive_register_action(slug)
    {
        let actions = Arc::clone(&cell.actions);
        let events = cell.events.clone();
        let project_id = cell.project_id.clone();
        globals.set(
            "__hive_register_action",
            Func::from(move |slug: String| {
                actions.register(&slug);
                events.emit(
                    "ActionStateChanged",
                    project_id.as_str(),
                    json!({"slug": slug, "state": "enabled"}),
                );
            }),
        )?;
    }

    // __hive_action_state(slug, field, flag)
    {
        let actions = Arc::clone(&cell.actions);
        let events = cell.events.clone();
        let project_id = cell.project_id.clone();
        globals.set(
            "__hive_action_state",
            Func::from(
                move |ctx: Ctx<'_>, slug: String, field: String, flag: bool| -> rquickjs::Result<()> {
                    let state = match field.as_str() {
                        "loading" => actions.set_loading(&slug, flag),
                        "active" => actions.set_active(&slug, flag),
                        other => {
                            return Err(throw(&ctx, &format!("unknown action state field '{other}'")));
                        }
                    };
                    match state {
                        Some(state) => {
                            events.emit(
                                "ActionStateChanged",
                                project_id.as_str(),
                                json!({"slug": slug, "state": state}),
                            );
                            Ok(())
                        }
                        None => Err(throw(&ctx, &format!("unknown action '{slug}'"))),
                    }
                },
            ),
        )?;
    }

    // __hive_dialog(kind, payload) -> correlation id
    {
        let broker = cell.broker.clone();
        let task_tx = cell.task_tx.clone();
        let context = cell.clone();
        globals.set(
            "__hive_dialog",
            Func::from(
                move |ctx: Ctx<'_>, kind: String, payload: JsValue<'_>| -> rquickjs::Result<String> {
                    let Some(kind) = DialogKind::parse(&kind) else {
                        return Err(throw(&ctx, &format!("unknown dialog kind '{kind}'")));
                    };
                    let payload = js_to_json(&payload)?;
                    Ok(broker.open(
                        &context.project_id,
                        context.caller(),
                        kind,
                        payload,
                        task_tx.clone(),
                    ))
                },
            ),
        )?;
    }

    // __hive_notify(kind, payload) -- fire and forget
    {
        let broker = cell.broker.clone();
        let context = cell.clone();
        globals.set(
            "__hive_notify",
            Func::from(
                move |ctx: Ctx<'_>, kind: String, payload: JsValue<'_>| -> rquickjs::Result<()> {
                    let Some(kind) = DialogKind::parse(&kind) else {
                        return Err(throw(&ctx, &format!("unknown notification kind '{kind}'")));
                    };
                    let payload = js_to_json(&payload)?;
                    let caller = context.caller();
                    broker.notify(caller.session.as_deref(), kind, payload);
                    Ok(())
                },
            ),
        )?;
    }

    // __hive_db(op, collection, args) -> JSON string
    {
        let store = Arc::clone(&cell.store);
        let project_id = cell.project_id.clone();
        globals.set(
            "__hive_db",
            Func::from(
                move |ctx: Ctx<'_>,
                      op: String,
                      collection: String,
                      args: JsValue<'_>|
                      -> rquickjs::Result<String> {
                    let args = js_to_json(&args)?;
                    match db_call(store.as_ref(), &project_id, &op, &collection, &args) {
                        Ok(value) => serde_json::to_string(&value)
                            .map_err(|e| throw(&ctx, &e.to_string())),
                        Err(message) => Err(throw(&ctx, &message)),
                    }
                },
            ),
        )?;
    }

    // __hive_files(op, name, content) -> JSON string
    {
        let blobs = Arc::clone(&cell.blobs);
        let project_id = cell.project_id.clone();
        globals.set(
            "__hive_files",
            Func::from(
                move |ctx: Ctx<'_>,
                      op: String,
                      name: Opt<String>,
                      content: Opt<String>|
                      -> rquickjs::Result<String> {
                    let result = files_call(
                        blobs.as_ref(),
                        &project_id,
                        &op,
                        name.0.as_deref(),
                        content.0.as_deref(),
                    );
                    match result {
                        Ok(value) => serde_json::to_string(&value)
                            .map_err(|e| throw(&ctx, &e.to_string())),
                        Err(message) => Err(throw(&ctx, &message)),
                    }
                },
            ),
        )?;
    }

    // __hive_env(name) -> value or undefined
    {
        let env = Arc::clone(&cell.env);
        globals.set(
            "__hive_env",
            Func::from(move |name: String| -> Option<String> { env.get(&name).cloned() }),
        )?;
    }

    Ok(())
}

/// Raise a catchable JS exception from a native function.
fn throw(ctx: &Ctx<'_>, message: &str) -> rquickjs::Error {
    match message.into_js(ctx) {
        Ok(value) => ctx.throw(value),
        Err(err) => err,
    }
}

fn log_line(project_id: &str, level: &str, message: &str) {
    match level {
        "debug" => tracing::debug!(target: "hive.script", project_id = %project_id, "{message}"),
        "warn" => tracing::warn!(target: "hive.script", project_id = %project_id, "{message}"),
        "error" => tracing::error!(target: "hive.script", project_id = %project_id, "{message}"),
        _ => tracing::info!(target: "hive.script", project_id = %project_id, "{message}"),
    }
}

/// Register the console object, forwarding to the project's log stream.
fn register_console(ctx: &Ctx<'_>, project_id: &str) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let console = Object::new(ctx.clone())?;

    for (name, level) in [
        ("log", "info"),
        ("info", "info"),
        ("debug", "debug"),
        ("warn", "warn"),
        ("error", "error"),
    ] {
        let project_id = project_id.to_string();
        console.set(
            name,
            Func::from(move |args: Rest<Coerced<String>>| {
                let message = args
                    .0
                    .iter()
                    .map(|part| part.0.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                log_line(&project_id, level, &message);
            }),
        )?;
    }

    globals.set("console", console)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Timers
// ─────────────────────────────────────────────────────────────────────────────

/// Spawn the timer task feeding a job's fires into the Cell's queue.
/// When the Cell stops, the queue closes and the task exits; pending
/// fires are dropped, never queued for a future restart.
fn spawn_timer(
    kind: JobKind,
    period: Duration,
    job_id: String,
    task_tx: mpsc::Sender<CellTask>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match kind {
            JobKind::Interval => {
                let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let fire = CellTask::TimerFire {
                        job_id: job_id.clone(),
                    };
                    if task_tx.send(fire).await.is_err() {
                        break;
                    }
                }
            }
            JobKind::Delay => {
                tokio::time::sleep(period).await;
                let _ = task_tx.send(CellTask::TimerFire { job_id }).await;
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Document operations
// ─────────────────────────────────────────────────────────────────────────────

fn arg_object(args: &Value, key: &str) -> Document {
    args.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn db_call(
    store: &dyn DocStore,
    scope: &str,
    op: &str,
    collection: &str,
    args: &Value,
) -> Result<Value, String> {
    match op {
        "find" => {
            let filter = arg_object(args, "filter");
            let options: FindOptions = match args.get("options") {
                Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?,
                None => FindOptions::default(),
            };
            let docs = store.list(scope, collection).map_err(|e| e.to_string())?;
            let matched: Vec<Document> = docs.into_iter().filter(|d| matches(d, &filter)).collect();
            Ok(Value::Array(
                apply_options(matched, &options)
                    .into_iter()
                    .map(Value::Object)
                    .collect(),
            ))
        }
        "findOne" => {
            let filter = arg_object(args, "filter");
            let docs = store.list(scope, collection).map_err(|e| e.to_string())?;
            Ok(docs
                .into_iter()
                .find(|d| matches(d, &filter))
                .map_or(Value::Null, Value::Object))
        }
        "insert" => {
            let document = arg_object(args, "document");
            match store.insert(scope, collection, document) {
                Ok(stored) => Ok(Value::Object(stored)),
                Err(err) => {
                    tracing::warn!(project_id = %scope, %collection, error = %err, "insert failed");
                    Ok(Value::Null)
                }
            }
        }
        "update" => {
            let id = args
                .get("id")
                .and_then(Value::as_str)
                .ok_or("update requires a document id")?;
            let update = arg_object(args, "update");
            let current = store.get(scope, collection, id).map_err(|e| e.to_string())?;
            match current {
                None => Ok(Value::Bool(false)),
                Some(doc) => {
                    let updated = apply_update(&doc, &update);
                    let replaced = store
                        .replace(scope, collection, id, updated)
                        .map_err(|e| e.to_string())?;
                    Ok(Value::Bool(replaced))
                }
            }
        }
        "remove" => {
            let id = args
                .get("id")
                .and_then(Value::as_str)
                .ok_or("remove requires a document id")?;
            let removed = store.remove(scope, collection, id).map_err(|e| e.to_string())?;
            Ok(Value::Bool(removed))
        }
        "count" => {
            let filter = arg_object(args, "filter");
            let docs = store.list(scope, collection).map_err(|e| e.to_string())?;
            let count = docs.iter().filter(|d| matches(d, &filter)).count();
            Ok(json!(count))
        }
        "upsert" => {
            let filter = arg_object(args, "filter");
            let document = arg_object(args, "document");
            let docs = store.list(scope, collection).map_err(|e| e.to_string())?;
            match docs.into_iter().find(|d| matches(d, &filter)) {
                Some(existing) => {
                    let id = hive_store::document_id(&existing)
                        .ok_or("matched document has no id")?
                        .to_string();
                    let merged = apply_update(&existing, &document);
                    store
                        .replace(scope, collection, &id, merged.clone())
                        .map_err(|e| e.to_string())?;
                    Ok(Value::Object(merged))
                }
                None => {
                    let stored = store
                        .insert(scope, collection, document)
                        .map_err(|e| e.to_string())?;
                    Ok(Value::Object(stored))
                }
            }
        }
        "findOneAndUpdate" => {
            let filter = arg_object(args, "filter");
            let update = arg_object(args, "update");
            let options: FindOptions = match args.get("options") {
                Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?,
                None => FindOptions::default(),
            };
            let result = store
                .find_one_and_update(
                    scope,
                    collection,
                    &filter,
                    &update,
                    options.return_new.unwrap_or(false),
                )
                .map_err(|e| e.to_string())?;
            Ok(result.map_or(Value::Null, Value::Object))
        }
        "clear" => {
            store.clear(scope, collection).map_err(|e| e.to_string())?;
            Ok(Value::Null)
        }
        other => Err(format!("unknown collection operation '{other}'")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File operations
// ─────────────────────────────────────────────────────────────────────────────

fn files_call(
    blobs: &dyn BlobStore,
    scope: &str,
    op: &str,
    name: Option<&str>,
    content: Option<&str>,
) -> Result<Value, String> {
    match op {
        "read" => {
            let name = name.ok_or("read requires a file name")?;
            let content = blobs.read(scope, name).map_err(|e| e.to_string())?;
            Ok(content.map_or(Value::Null, Value::String))
        }
        "write" => {
            let name = name.ok_or("write requires a file name")?;
            let content = content.ok_or("write requires file content")?;
            blobs.write(scope, name, content).map_err(|e| e.to_string())?;
            Ok(Value::Null)
        }
        "remove" => {
            let name = name.ok_or("remove requires a file name")?;
            let removed = blobs.remove(scope, name).map_err(|e| e.to_string())?;
            Ok(Value::Bool(removed))
        }
        "list" => {
            let names = blobs.list(scope).map_err(|e| e.to_string())?;
            Ok(Value::Array(names.into_iter().map(Value::String).collect()))
        }
        other => Err(format!("unknown file operation '{other}'")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test support
// ─────────────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::*;
    use hive_store::MemoryStore;
    use serde_json::json;

    fn obj(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn db_find_applies_filter_and_options() {
        let store = MemoryStore::new();
        store.insert("p", "nums", obj(json!({"n": 3}))).unwrap();
        store.insert("p", "nums", obj(json!({"n": 1}))).unwrap();
        store.insert("p", "nums", obj(json!({"n": 2}))).unwrap();

        let result = db_call(
            &store,
            "p",
            "find",
            "nums",
            &json!({"filter": {"n": {"$gte": 2}}, "options": {"sort": "n"}}),
        )
        .unwrap();

        let items = result.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["n"], json!(2));
        assert_eq!(items[1]["n"], json!(3));
    }

    #[test]
    fn db_update_by_id_applies_expression() {
        let store = MemoryStore::new();
        let stored = store.insert("p", "nums", obj(json!({"n": 1}))).unwrap();
        let id = hive_store::document_id(&stored).unwrap().to_string();

        let updated = db_call(
            &store,
            "p",
            "update",
            "nums",
            &json!({"id": id, "update": {"$inc": {"n": 4}}}),
        )
        .unwrap();
        assert_eq!(updated, json!(true));
        assert_eq!(store.get("p", "nums", &id).unwrap().unwrap()["n"], json!(5));
    }

    #[test]
    fn db_upsert_inserts_then_updates() {
        let store = MemoryStore::new();

        let first = db_call(
            &store,
            "p",
            "upsert",
            "settings",
            &json!({"filter": {"key": "theme"}, "document": {"key": "theme", "value": "dark"}}),
        )
        .unwrap();
        assert_eq!(first["value"], json!("dark"));

        let second = db_call(
            &store,
            "p",
            "upsert",
            "settings",
            &json!({"filter": {"key": "theme"}, "document": {"key": "theme", "value": "light"}}),
        )
        .unwrap();
        assert_eq!(second["value"], json!("light"));
        assert_eq!(store.list("p", "settings").unwrap().len(), 1);
    }

    #[test]
    fn db_unknown_operation_is_an_error() {
        let store = MemoryStore::new();
        assert!(db_call(&store, "p", "explode", "c", &json!({})).is_err());
    }

    #[test]
    fn files_roundtrip() {
        let blobs = hive_store::MemoryBlobStore::new();
        files_call(&blobs, "p", "write", Some("a.txt"), Some("hello")).unwrap();
        assert_eq!(
            files_call(&blobs, "p", "read", Some("a.txt"), None).unwrap(),
            json!("hello")
        );
        assert_eq!(
            files_call(&blobs, "p", "list", None, None).unwrap(),
            json!(["a.txt"])
        );
        assert_eq!(
            files_call(&blobs, "p", "remove", Some("a.txt"), None).unwrap(),
            json!(true)
        );
        assert_eq!(
            files_call(&blobs, "p", "read", Some("a.txt"), None).unwrap(),
            json!(null)
        );
    }
}
