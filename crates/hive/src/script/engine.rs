//! QuickJS Engine Wrapper
//!
//! One engine per Cell. The engine moves from the starting task into the
//! Cell's worker, but is only ever driven by one of them at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rquickjs::{Coerced, Context, Ctx, Exception, FromJs, Function, Runtime, Value as JsValue};

use super::convert::{js_to_json, json_to_js};
use super::{ScriptError, ScriptResult};
use crate::host::{self, CellContext};

const PRELUDE: &str = include_str!("prelude.js");

// ─────────────────────────────────────────────────────────────────────────────
// Watchdog
// ─────────────────────────────────────────────────────────────────────────────

/// Deadline checked by the interrupt handler. Armed around every
/// interpreter entry so a hung script cannot wedge the worker forever.
#[derive(Clone)]
pub(crate) struct Watchdog {
    deadline_ms: Arc<AtomicU64>,
}

impl Watchdog {
    fn new() -> Self {
        Self {
            deadline_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn arm(&self, budget: Duration) {
        self.deadline_ms
            .store(now_ms() + budget.as_millis() as u64, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.deadline_ms.store(0, Ordering::SeqCst);
    }

    fn expired(&self) -> bool {
        let deadline = self.deadline_ms.load(Ordering::SeqCst);
        deadline != 0 && now_ms() > deadline
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Engine
// ─────────────────────────────────────────────────────────────────────────────

/// A QuickJS runtime with the capability bindings and prelude installed.
pub(crate) struct ScriptEngine {
    runtime: Runtime,
    context: Context,
    watchdog: Watchdog,
    task_timeout: Duration,
}

// QuickJS is single-threaded; the engine is handed from the starting
// task to the cell worker and only one of them drives it at a time.
unsafe impl Send for ScriptEngine {}

impl ScriptEngine {
    /// Create an engine for one Cell: runtime, interrupt handler,
    /// capability bindings, prelude.
    pub fn new(cell: CellContext, task_timeout: Duration) -> ScriptResult<Self> {
        let runtime = Runtime::new().map_err(|e| ScriptError::RuntimeCreation(e.to_string()))?;
        let context =
            Context::full(&runtime).map_err(|e| ScriptError::RuntimeCreation(e.to_string()))?;

        let watchdog = Watchdog::new();
        {
            let watchdog = watchdog.clone();
            runtime.set_interrupt_handler(Some(Box::new(move || watchdog.expired())));
        }

        let engine = Self {
            runtime,
            context,
            watchdog,
            task_timeout,
        };
        engine.install(cell)?;
        Ok(engine)
    }

    fn install(&self, cell: CellContext) -> ScriptResult<()> {
        let watchdog = self.watchdog.clone();
        self.context.with(|ctx| {
            host::install(&ctx, &cell).map_err(|e| describe_error(&watchdog, &ctx, e))?;
            ctx.eval::<(), _>(PRELUDE)
                .map_err(|e| describe_error(&watchdog, &ctx, e))
        })
    }

    /// Run the project's entry file (the boot phase). Modules resolve
    /// and cache through the prelude's require machinery.
    pub fn load_entry(&self, entry: &str) -> ScriptResult<()> {
        self.watchdog.arm(self.task_timeout);
        let watchdog = self.watchdog.clone();
        let result = self.context.with(|ctx| {
            let loader: Function<'_> = ctx
                .globals()
                .get("__hive_load_entry")
                .map_err(|_| ScriptError::FunctionNotFound("__hive_load_entry".to_string()))?;
            loader
                .call::<_, ()>((entry,))
                .map_err(|e| describe_error(&watchdog, &ctx, e))
        });
        self.watchdog.disarm();
        result
    }

    /// Check if a function exists in the global scope.
    pub fn has_function(&self, name: &str) -> bool {
        self.context
            .with(|ctx| ctx.globals().get::<_, Function>(name).is_ok())
    }

    /// Call a global function with no arguments (lifecycle hooks).
    pub fn call_function(&self, name: &str) -> ScriptResult<()> {
        self.watchdog.arm(self.task_timeout);
        let watchdog = self.watchdog.clone();
        let result = self.context.with(|ctx| {
            let func: Function<'_> = ctx
                .globals()
                .get(name)
                .map_err(|_| ScriptError::FunctionNotFound(name.to_string()))?;
            func.call::<_, ()>(())
                .map_err(|e| describe_error(&watchdog, &ctx, e))
        });
        self.watchdog.disarm();
        result
    }

    /// Invoke a registered handler through the prelude's dispatch
    /// function, converting the payload and result through JSON.
    pub fn dispatch(
        &self,
        kind: &str,
        id: &str,
        payload: &serde_json::Value,
    ) -> ScriptResult<serde_json::Value> {
        self.watchdog.arm(self.task_timeout);
        let watchdog = self.watchdog.clone();
        let result = self.context.with(|ctx| {
            let dispatch: Function<'_> = ctx
                .globals()
                .get("__hive_dispatch")
                .map_err(|_| ScriptError::FunctionNotFound("__hive_dispatch".to_string()))?;
            let js_payload =
                json_to_js(&ctx, payload).map_err(|e| describe_error(&watchdog, &ctx, e))?;
            let result: JsValue<'_> = dispatch
                .call((kind, id, js_payload))
                .map_err(|e| describe_error(&watchdog, &ctx, e))?;
            js_to_json(&result).map_err(|e| describe_error(&watchdog, &ctx, e))
        });
        self.watchdog.disarm();
        result
    }

    /// Evaluate a script and return its result as JSON.
    #[cfg(test)]
    pub fn eval(&self, source: &str) -> ScriptResult<serde_json::Value> {
        self.watchdog.arm(self.task_timeout);
        let watchdog = self.watchdog.clone();
        let result = self.context.with(|ctx| {
            let value: JsValue<'_> = ctx
                .eval(source)
                .map_err(|e| describe_error(&watchdog, &ctx, e))?;
            js_to_json(&value).map_err(|e| describe_error(&watchdog, &ctx, e))
        });
        self.watchdog.disarm();
        result
    }

    /// Run garbage collection.
    pub fn gc(&self) {
        self.runtime.run_gc();
    }
}

fn describe_error(watchdog: &Watchdog, ctx: &Ctx<'_>, err: rquickjs::Error) -> ScriptError {
    if watchdog.expired() {
        return ScriptError::Interrupted;
    }
    match err {
        rquickjs::Error::Exception => ScriptError::Eval(format_exception(ctx, ctx.catch())),
        other => ScriptError::Js(other.to_string()),
    }
}

fn format_exception<'js>(ctx: &Ctx<'js>, caught: JsValue<'js>) -> String {
    if let Ok(obj) = caught.clone().try_into_object() {
        if let Some(exception) = Exception::from_object(obj) {
            if let Some(message) = exception.message() {
                return message;
            }
            if let Some(stack) = exception.stack() {
                return stack;
            }
        }
    }

    match Coerced::<String>::from_js(ctx, caught) {
        Ok(value) => value.0,
        Err(_) => "uncaught exception".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::test_cell;
    use serde_json::json;

    fn engine() -> ScriptEngine {
        let (cell, _rx) = test_cell("test-project");
        ScriptEngine::new(cell, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn eval_primitives() {
        let engine = engine();
        assert_eq!(engine.eval("42").unwrap(), json!(42));
        assert_eq!(engine.eval("'hello'").unwrap(), json!("hello"));
        assert_eq!(engine.eval("true").unwrap(), json!(true));
        assert_eq!(engine.eval("({a: [1, 2]})").unwrap(), json!({"a": [1, 2]}));
    }

    #[tokio::test]
    async fn prelude_installs_the_surface() {
        let engine = engine();
        assert!(engine.has_function("__hive_dispatch"));
        assert!(engine.has_function("require"));
        assert_eq!(engine.eval("typeof app.get").unwrap(), json!("function"));
        assert_eq!(engine.eval("app.project").unwrap(), json!("test-project"));
    }

    #[tokio::test]
    async fn route_dispatch_roundtrip() {
        let engine = engine();
        engine
            .eval("app.get('/ping', (req) => ({ok: true, path: req.path}))")
            .unwrap();

        let result = engine
            .dispatch("route", "h-1", &json!({"path": "/ping"}))
            .unwrap();
        assert_eq!(result["status"], json!(200));
        assert_eq!(result["body"]["ok"], json!(true));
        assert_eq!(result["body"]["path"], json!("/ping"));
    }

    #[tokio::test]
    async fn handler_can_override_the_status() {
        let engine = engine();
        engine
            .eval("app.post('/make', (req, res) => { res.status(201); return {made: true}; })")
            .unwrap();

        let result = engine.dispatch("route", "h-1", &json!({})).unwrap();
        assert_eq!(result["status"], json!(201));
    }

    #[tokio::test]
    async fn script_errors_surface_with_their_message() {
        let engine = engine();
        engine.eval("app.get('/boom', () => { throw new Error('kaboom'); })").unwrap();

        let err = engine.dispatch("route", "h-1", &json!({})).unwrap_err();
        assert!(err.to_string().contains("kaboom"), "got: {err}");
    }

    #[tokio::test]
    async fn collection_surface_reaches_the_store() {
        let engine = engine();
        let count = engine
            .eval("const c = app.db.collection('things'); c.insert({n: 1}); c.insert({n: 2}); c.count({})")
            .unwrap();
        assert_eq!(count, json!(2));

        let matched = engine
            .eval("app.db.collection('things').find({n: {$gte: 2}}).length")
            .unwrap();
        assert_eq!(matched, json!(1));
    }

    #[tokio::test]
    async fn env_values_are_visible() {
        let engine = engine();
        assert_eq!(engine.eval("app.env.get('MODE')").unwrap(), json!("test"));
        assert_eq!(engine.eval("app.env.get('MISSING')").unwrap(), json!(null));
    }
}
