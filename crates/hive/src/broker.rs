//! UI Session Broker
//!
//! Pairs a dialog request issued inside a Cell with the response that
//! arrives later on a specific session, possibly minutes later. A
//! continuation is invoked exactly once, and always via the owning
//! Cell's dispatch queue, never on the resolver's thread.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cell::{Caller, CellTask};

// ─────────────────────────────────────────────────────────────────────────────
// Dialog Kinds & Wire Frames
// ─────────────────────────────────────────────────────────────────────────────

/// The interactive UI primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    Toast,
    Alert,
    Confirm,
    Prompt,
    Form,
}

impl DialogKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "toast" => Some(Self::Toast),
            "alert" => Some(Self::Alert),
            "confirm" => Some(Self::Confirm),
            "prompt" => Some(Self::Prompt),
            "form" => Some(Self::Form),
            _ => None,
        }
    }

    /// The "no answer" value used when a dialog is torn down instead of
    /// answered: false for confirm, null for prompt/form.
    pub fn sentinel(&self) -> Value {
        match self {
            DialogKind::Confirm => Value::Bool(false),
            _ => Value::Null,
        }
    }
}

/// Outbound frame to the transport collaborator. Fire-and-forget kinds
/// (toast, alert) carry no correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogRequestFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub session_id: String,
    pub kind: DialogKind,
    pub payload: Value,
}

/// Inbound response frame. `answer` is a bool for confirm,
/// string-or-null for prompt, `{action, data}` for form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogResponseFrame {
    pub correlation_id: String,
    pub answer: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Delivery seam towards the WebSocket collaborator.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Deliver a frame to a session. Returns false when the session is
    /// unknown or gone.
    async fn deliver(&self, session_id: &str, frame: DialogRequestFrame) -> bool;
}

/// Transport for headless deployments: logs and drops every frame.
pub struct NullTransport;

#[async_trait]
impl SessionTransport for NullTransport {
    async fn deliver(&self, session_id: &str, frame: DialogRequestFrame) -> bool {
        tracing::debug!(%session_id, kind = ?frame.kind, "no transport attached, dropping frame");
        false
    }
}

/// The live session map: session id -> frame sender. The WebSocket
/// handler registers a session on connect and removes it on disconnect.
#[derive(Default)]
pub struct SessionHub {
    sessions: DashMap<String, mpsc::Sender<Value>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: &str, tx: mpsc::Sender<Value>) {
        self.sessions.insert(session_id.to_string(), tx);
        tracing::info!(%session_id, "session connected");
    }

    pub fn unregister(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Push an already-serialized frame (e.g. a runtime event) to one
    /// session.
    pub async fn push(&self, session_id: &str, frame: Value) -> bool {
        let Some(tx) = self.sessions.get(session_id).map(|s| s.value().clone()) else {
            return false;
        };
        tx.send(frame).await.is_ok()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl SessionTransport for SessionHub {
    async fn deliver(&self, session_id: &str, frame: DialogRequestFrame) -> bool {
        match serde_json::to_value(&frame) {
            Ok(value) => self.push(session_id, value).await,
            Err(_) => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dialog Broker
// ─────────────────────────────────────────────────────────────────────────────

struct PendingDialog {
    project_id: String,
    caller: Caller,
    kind: DialogKind,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    task_tx: mpsc::Sender<CellTask>,
}

struct BrokerInner {
    pending: DashMap<String, PendingDialog>,
    transport: Arc<dyn SessionTransport>,
}

/// Correlates dialog requests with their eventual answers.
#[derive(Clone)]
pub struct DialogBroker {
    inner: Arc<BrokerInner>,
}

impl DialogBroker {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                pending: DashMap::new(),
                transport,
            }),
        }
    }

    /// Open a dialog on behalf of `caller` and forward the request frame
    /// to their session. Returns the correlation id immediately; the
    /// continuation runs later, inside the owning Cell's dispatch loop.
    ///
    /// With no session in scope (e.g. a timer-originated task with no
    /// interactive caller), the continuation is answered straight away
    /// with the kind's sentinel.
    pub fn open(
        &self,
        project_id: &str,
        caller: Caller,
        kind: DialogKind,
        payload: Value,
        task_tx: mpsc::Sender<CellTask>,
    ) -> String {
        let correlation_id = Uuid::new_v4().to_string();

        match caller.session.clone() {
            Some(session_id) => {
                self.inner.pending.insert(
                    correlation_id.clone(),
                    PendingDialog {
                        project_id: project_id.to_string(),
                        caller,
                        kind,
                        created_at: Utc::now(),
                        task_tx,
                    },
                );

                let broker = self.clone();
                let frame = DialogRequestFrame {
                    correlation_id: Some(correlation_id.clone()),
                    session_id: session_id.clone(),
                    kind,
                    payload,
                };
                let correlation = correlation_id.clone();
                tokio::spawn(async move {
                    if !broker.inner.transport.deliver(&session_id, frame).await {
                        tracing::debug!(
                            %session_id,
                            "dialog frame undeliverable, answering with sentinel"
                        );
                        broker.resolve(&correlation, kind.sentinel()).await;
                    }
                });
            }
            None => {
                let sentinel = kind.sentinel();
                let correlation = correlation_id.clone();
                tokio::spawn(async move {
                    let answer = CellTask::DialogAnswer {
                        correlation_id: correlation,
                        answer: sentinel,
                        caller,
                    };
                    let _ = task_tx.send(answer).await;
                });
            }
        }

        correlation_id
    }

    /// Forward a fire-and-forget notification (toast/alert). No record
    /// is kept; without a session the frame is dropped.
    pub fn notify(&self, session: Option<&str>, kind: DialogKind, payload: Value) {
        let Some(session_id) = session else {
            tracing::debug!(kind = ?kind, "notification dropped, no session in scope");
            return;
        };

        let frame = DialogRequestFrame {
            correlation_id: None,
            session_id: session_id.to_string(),
            kind,
            payload,
        };
        let transport = Arc::clone(&self.inner.transport);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            transport.deliver(&session_id, frame).await;
        });
    }

    /// Resolve a pending dialog with its answer. The record is removed
    /// first, so a continuation can never be invoked twice. Returns
    /// false for an unknown (or already resolved) correlation id.
    pub async fn resolve(&self, correlation_id: &str, answer: Value) -> bool {
        let Some((_, dialog)) = self.inner.pending.remove(correlation_id) else {
            return false;
        };

        let task = CellTask::DialogAnswer {
            correlation_id: correlation_id.to_string(),
            answer,
            caller: dialog.caller,
        };
        if dialog.task_tx.send(task).await.is_err() {
            tracing::debug!(
                project_id = %dialog.project_id,
                "dialog answered after its cell stopped"
            );
        }
        true
    }

    /// Answer every pending dialog of a disconnected session with its
    /// sentinel.
    pub async fn teardown_session(&self, session_id: &str) {
        self.teardown(|dialog| dialog.caller.session.as_deref() == Some(session_id))
            .await;
    }

    /// Answer every pending dialog of a stopping project with its
    /// sentinel.
    pub async fn teardown_project(&self, project_id: &str) {
        self.teardown(|dialog| dialog.project_id == project_id).await;
    }

    async fn teardown(&self, doomed: impl Fn(&PendingDialog) -> bool) {
        let matches: Vec<(String, Value)> = self
            .inner
            .pending
            .iter()
            .filter(|entry| doomed(entry.value()))
            .map(|entry| (entry.key().clone(), entry.value().kind.sentinel()))
            .collect();

        for (correlation_id, sentinel) in matches {
            self.resolve(&correlation_id, sentinel).await;
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caller_with_session(session: &str) -> Caller {
        Caller::new(Some("user-1".to_string()), Some(session.to_string()))
    }

    #[tokio::test]
    async fn open_forwards_the_frame_and_resolve_enqueues_the_answer() {
        let hub = Arc::new(SessionHub::new());
        let broker = DialogBroker::new(hub.clone());

        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        hub.register("s1", frame_tx);

        let (task_tx, mut task_rx) = mpsc::channel(8);
        let correlation = broker.open(
            "p1",
            caller_with_session("s1"),
            DialogKind::Confirm,
            json!({"message": "sure?"}),
            task_tx,
        );

        let frame = frame_rx.recv().await.unwrap();
        assert_eq!(frame["correlationId"], json!(correlation));
        assert_eq!(frame["kind"], json!("confirm"));
        assert_eq!(frame["sessionId"], json!("s1"));

        assert!(broker.resolve(&correlation, json!(true)).await);
        match task_rx.recv().await.unwrap() {
            CellTask::DialogAnswer {
                correlation_id,
                answer,
                caller,
            } => {
                assert_eq!(correlation_id, correlation);
                assert_eq!(answer, json!(true));
                assert_eq!(caller.session.as_deref(), Some("s1"));
            }
            _ => panic!("expected a dialog answer"),
        }
    }

    #[tokio::test]
    async fn resolve_is_exactly_once() {
        let hub = Arc::new(SessionHub::new());
        let broker = DialogBroker::new(hub.clone());
        let (frame_tx, _frame_rx) = mpsc::channel(8);
        hub.register("s1", frame_tx);

        let (task_tx, _task_rx) = mpsc::channel(8);

        let correlation = broker.open(
            "p1",
            caller_with_session("s1"),
            DialogKind::Prompt,
            json!({}),
            task_tx,
        );

        assert!(broker.resolve(&correlation, json!("answer")).await);
        assert!(!broker.resolve(&correlation, json!("again")).await);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn open_without_session_answers_with_the_sentinel() {
        let broker = DialogBroker::new(Arc::new(NullTransport));
        let (task_tx, mut task_rx) = mpsc::channel(8);

        broker.open(
            "p1",
            Caller::default(),
            DialogKind::Confirm,
            json!({}),
            task_tx,
        );

        match task_rx.recv().await.unwrap() {
            CellTask::DialogAnswer { answer, .. } => assert_eq!(answer, json!(false)),
            _ => panic!("expected a dialog answer"),
        }
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn teardown_session_answers_everything_once() {
        let hub = Arc::new(SessionHub::new());
        let broker = DialogBroker::new(hub.clone());
        let (frame_tx, _frame_rx) = mpsc::channel(8);
        hub.register("s1", frame_tx);

        let (task_tx, mut task_rx) = mpsc::channel(8);
        broker.open(
            "p1",
            caller_with_session("s1"),
            DialogKind::Confirm,
            json!({}),
            task_tx.clone(),
        );
        broker.open(
            "p1",
            caller_with_session("s1"),
            DialogKind::Prompt,
            json!({}),
            task_tx,
        );

        broker.teardown_session("s1").await;
        assert_eq!(broker.pending_count(), 0);

        let mut answers = Vec::new();
        for _ in 0..2 {
            match task_rx.recv().await.unwrap() {
                CellTask::DialogAnswer { answer, .. } => answers.push(answer),
                _ => panic!("expected a dialog answer"),
            }
        }
        assert!(answers.contains(&json!(false)));
        assert!(answers.contains(&json!(null)));
    }

    #[tokio::test]
    async fn undeliverable_dialog_resolves_with_the_sentinel() {
        // A hub with no such session registered.
        let hub = Arc::new(SessionHub::new());
        let broker = DialogBroker::new(hub);
        let (task_tx, mut task_rx) = mpsc::channel(8);

        broker.open(
            "p1",
            caller_with_session("ghost"),
            DialogKind::Confirm,
            json!({}),
            task_tx,
        );

        match task_rx.recv().await.unwrap() {
            CellTask::DialogAnswer { answer, .. } => assert_eq!(answer, json!(false)),
            _ => panic!("expected a dialog answer"),
        }
    }
}
