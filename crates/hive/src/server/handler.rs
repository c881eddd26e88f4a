//! WebSocket Connection Handler
//!
//! One socket per UI session. Outbound: dialog request frames from the
//! broker plus runtime events. Inbound: dialog response frames
//! (`{correlationId, answer}`). On disconnect the session's pending
//! dialogs are torn down so no continuation is left dangling.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use crate::broker::DialogResponseFrame;

use super::state::AppState;

/// Handle a WebSocket connection for one session.
pub async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for frames addressed to this session.
    let (tx, mut rx) = mpsc::channel::<serde_json::Value>(64);
    state.hub().register(&session_id, tx.clone());

    // Greet the client with its session id.
    let connected = json!({"kind": "connected", "sessionId": session_id});
    if let Ok(text) = serde_json::to_string(&connected) {
        let _ = ws_sender.send(Message::Text(text.into())).await;
    }

    // Forward frames from the channel to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&frame) {
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Forward runtime events to this session.
    let mut events = state.registry().subscribe_events();
    let event_tx = tx;
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let frame = json!({
                "kind": "event",
                "eventType": event.event_type,
                "projectId": event.project_id,
                "data": event.data,
                "timestamp": event.timestamp,
            });
            if event_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Process inbound response frames.
    let registry = state.registry().clone();
    let recv_session = session_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<DialogResponseFrame>(&text) {
                    Ok(frame) => {
                        if !registry.broker().resolve(&frame.correlation_id, frame.answer).await {
                            tracing::debug!(
                                session_id = %recv_session,
                                correlation_id = %frame.correlation_id,
                                "response for unknown dialog"
                            );
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            session_id = %recv_session,
                            error = %err,
                            "unparseable response frame"
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
        _ = event_task => {},
    }

    // Cleanup: drop the session and answer its pending dialogs.
    state.hub().unregister(&session_id);
    state.registry().broker().teardown_session(&session_id).await;
    tracing::info!(session_id = %session_id, "session disconnected");
}
