//! Session entry point: wires a request to a running loop and hands the
//! caller the receiving end of the event stream.

use tokio::sync::mpsc;

use crate::agent::engine::{ChatRequest, SessionDeps, TurnEngine};
use crate::agent::events::EventSink;
use crate::errors::PilotError;

/// Buffered lines between the loop and however the caller ships them out.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Spawns the session loop and returns its event stream. Dropping the
/// receiver cancels the loop at the next turn boundary.
pub fn run_session(request: ChatRequest, deps: SessionDeps) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let sink = EventSink::new(tx);
    let backend = deps.backend.clone();
    let backend_session_id = request.backend_session_id.clone();

    tokio::spawn(async move {
        let engine = match TurnEngine::new(request, deps, sink.clone()) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!(error = %e, "session setup failed");
                let _ = sink.error(&e.to_string()).await;
                return;
            }
        };

        match engine.run().await {
            Ok(()) => {
                tracing::info!(session = %backend_session_id, "session loop finished");
            }
            Err(PilotError::Cancelled) => {
                tracing::debug!(session = %backend_session_id, "client disconnected");
            }
            Err(e) => {
                tracing::error!(session = %backend_session_id, error = %e, "session loop failed");
                if let Err(teardown) = backend.delete_session(&backend_session_id).await {
                    tracing::warn!(error = %teardown, "backend teardown failed");
                }
                let _ = sink.error(&e.to_string()).await;
            }
        }
    });

    rx
}
