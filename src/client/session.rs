//! Client-side session driver: posts the conversation to the loop host,
//! pipes the response stream through the reducer, and publishes snapshots.

use std::sync::Arc;

use futures_util::future::{AbortHandle, Abortable};
use futures_util::StreamExt;
use tokio::sync::{watch, Mutex};

use crate::client::reducer::{SessionReducer, SessionSnapshot, SessionStatus};
use crate::errors::{PilotError, PilotResult};
use crate::llm::types::ChatMessage;

pub struct RealtimeSession {
    api: String,
    backend_session_id: String,
    client: reqwest::Client,
    reducer: Arc<Mutex<SessionReducer>>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    abort_handle: Option<AbortHandle>,
}

impl RealtimeSession {
    pub fn new(api: impl Into<String>, backend_session_id: impl Into<String>) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            api: api.into(),
            backend_session_id: backend_session_id.into(),
            client: reqwest::Client::new(),
            reducer: Arc::new(Mutex::new(SessionReducer::new())),
            snapshot_tx: Arc::new(snapshot_tx),
            abort_handle: None,
        }
    }

    /// Observers watch snapshots; a new one is published after every
    /// timeline mutation.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn set_initializing(&self, flag: bool) {
        let mut reducer = self.reducer.lock().await;
        reducer.set_initializing(flag);
        let _ = self.snapshot_tx.send(reducer.snapshot());
    }

    pub async fn drain_errors(&self) -> Vec<String> {
        self.reducer.lock().await.drain_errors()
    }

    /// Sends one user message and starts consuming the response stream in
    /// the background. A send while a previous exchange is still running
    /// aborts that exchange first (latest wins). Sends are ignored while
    /// a just-started exchange is being submitted or the desktop is still
    /// initializing.
    pub async fn send_message(&mut self, text: &str) -> PilotResult<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        let messages = {
            let mut reducer = self.reducer.lock().await;
            let snap = reducer.snapshot();
            if snap.initializing || snap.status != SessionStatus::Ready {
                tracing::debug!(status = ?snap.status, "send ignored");
                return Ok(());
            }
            reducer.push_user_message(trimmed);
            reducer.set_status(SessionStatus::Submitted);
            let snap = reducer.snapshot();
            let _ = self.snapshot_tx.send(snap.clone());
            snap.messages
        };

        let payload = serde_json::json!({
            "messages": messages
                .iter()
                .map(|m| ChatMessage::text(m.role.clone(), m.content.clone()))
                .collect::<Vec<_>>(),
            "backend_session_id": self.backend_session_id,
        });

        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
        let (abort_handle, abort_reg) = AbortHandle::new_pair();
        self.abort_handle = Some(abort_handle);

        let client = self.client.clone();
        let api = self.api.clone();
        let reducer = self.reducer.clone();
        let snapshot_tx = self.snapshot_tx.clone();

        tokio::spawn(async move {
            let exchange = stream_exchange(client, api, payload, reducer.clone(), snapshot_tx.clone());
            match Abortable::new(exchange, abort_reg).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "stream exchange failed");
                    let mut reducer = reducer.lock().await;
                    reducer.record_failure(&e.to_string());
                    let _ = snapshot_tx.send(reducer.snapshot());
                }
                // Aborted by a newer send or stop(); not a reportable error.
                Err(_aborted) => {
                    let mut reducer = reducer.lock().await;
                    reducer.set_status(SessionStatus::Ready);
                    let _ = snapshot_tx.send(reducer.snapshot());
                }
            }
        });

        Ok(())
    }

    /// Cancels the in-flight exchange, if any, and returns to ready.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
        let mut reducer = self.reducer.lock().await;
        reducer.set_status(SessionStatus::Ready);
        let _ = self.snapshot_tx.send(reducer.snapshot());
    }
}

async fn stream_exchange(
    client: reqwest::Client,
    api: String,
    payload: serde_json::Value,
    reducer: Arc<Mutex<SessionReducer>>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
) -> PilotResult<()> {
    let response = client.post(&api).json(&payload).send().await?;
    if !response.status().is_success() {
        return Err(PilotError::Provider(format!(
            "loop host returned {}",
            response.status()
        )));
    }

    {
        let mut reducer = reducer.lock().await;
        reducer.set_status(SessionStatus::Streaming);
        let _ = snapshot_tx.send(reducer.snapshot());
    }

    let mut bytes = response.bytes_stream();
    while let Some(chunk) = bytes.next().await {
        let chunk = chunk?;
        let mut reducer = reducer.lock().await;
        reducer.feed(&chunk);
        let _ = snapshot_tx.send(reducer.snapshot());
    }

    let mut reducer = reducer.lock().await;
    reducer.finish_input();
    let _ = snapshot_tx.send(reducer.snapshot());
    Ok(())
}
