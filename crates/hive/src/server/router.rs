//! HTTP Router
//!
//! Project route dispatch under `/run/:project/*path`, the per-project
//! action trigger endpoint, stats, health, and the WebSocket upgrade.
//! Caller identity for dispatched routes comes from the
//! `x-hive-session` / `x-hive-user` headers set by the (external)
//! authentication layer.

use std::collections::HashMap;

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::cell::{Caller, RouteRequest};
use crate::error::HostError;

use super::handler::handle_socket;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Dialog frames and runtime events go through here
        .route("/ws", get(ws_upgrade))
        // Health check for monitoring/load balancers
        .route("/health", get(health_check))
        // Project route dispatch
        .route("/run/:project_id", any(dispatch_root))
        .route("/run/:project_id/*path", any(dispatch_route))
        // Action trigger contract
        .route("/projects/:project_id/actions/:slug", post(trigger_action))
        // Stats snapshot
        .route("/projects/:project_id/stats", get(project_stats))
        .layer(TraceLayer::new_for_http())
        // CORS for development
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// WebSocket upgrade handler. Sessions may bring their own id
/// (`?session=`) so reconnects keep their pending dialogs addressable.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let session_id = params
        .get("session")
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    projects: usize,
    sessions: usize,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        projects: state.registry().list().len(),
        sessions: state.hub().count(),
    })
}

async fn dispatch_root(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    dispatch(&state, &project_id, "/".to_string(), query, method, headers, body).await
}

async fn dispatch_route(
    State(state): State<AppState>,
    Path((project_id, path)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = format!("/{path}");
    dispatch(&state, &project_id, path, query, method, headers, body).await
}

async fn dispatch(
    state: &AppState,
    project_id: &str,
    path: String,
    query: HashMap<String, String>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    let caller = Caller::new(
        header_value(&headers, "x-hive-user"),
        header_value(&headers, "x-hive-session"),
    );

    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();

    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    };

    let request = RouteRequest {
        method: method.as_str().to_string(),
        path,
        query,
        headers: header_map,
        body,
        caller,
    };

    match state.registry().handle_route(project_id, request).await {
        Ok(response) => {
            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(response.body)).into_response()
        }
        Err(err) => host_error_response(err).into_response(),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}

/// Optional JSON body of the action trigger endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TriggerBody {
    session_id: Option<String>,
    user_id: Option<String>,
}

/// POST /projects/:project/actions/:slug
///
/// 404 unknown action, 503 project not running, 409 with the current
/// state name when not enabled, 200 on successful trigger.
async fn trigger_action(
    State(state): State<AppState>,
    Path((project_id, slug)): Path<(String, String)>,
    body: Option<Json<TriggerBody>>,
) -> Response {
    let Json(body) = body.unwrap_or_default();

    let result = state
        .registry()
        .trigger_action(&project_id, &slug, body.user_id, body.session_id)
        .await;

    match result {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "triggered"}))).into_response(),
        Err(HostError::NotRunning(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "project not running"})),
        )
            .into_response(),
        Err(HostError::UnknownAction(slug)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown action '{slug}'")})),
        )
            .into_response(),
        Err(HostError::ActionConflict { slug, state }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": format!("action '{slug}' is {state}"),
                "state": state,
            })),
        )
            .into_response(),
        Err(err) => host_error_response(err).into_response(),
    }
}

async fn project_stats(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Response {
    match state.registry().stats(&project_id) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => host_error_response(err).into_response(),
    }
}

fn host_error_response(err: HostError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        HostError::NotRunning(_) | HostError::RouteNotFound { .. } | HostError::UnknownAction(_) => {
            StatusCode::NOT_FOUND
        }
        HostError::AlreadyRunning(_) | HostError::ActionConflict { .. } => StatusCode::CONFLICT,
        HostError::DispatchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        HostError::Compile(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()})))
}
