//! Line-delimited JSON event stream emitted toward the client.
//!
//! Every event is one JSON object on one line. Unknown fields are the
//! client's problem; the writer here only guarantees well-formed lines
//! and stable `type` tags.

use serde_json::json;
use tokio::sync::mpsc;

use crate::errors::{PilotError, PilotResult};

/// Maps a tool's wire name to the short name clients display.
pub fn client_tool_name(tool: &str) -> &'static str {
    match tool {
        "computer_use" => "computer",
        "update_workflow" => "workflow",
        _ => "unknown",
    }
}

/// Writer half of the session event stream.
///
/// Send failure means the client went away; callers treat that as
/// cancellation, not as an error to report anywhere.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<String>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, event: serde_json::Value) -> PilotResult<()> {
        let mut line = event.to_string();
        line.push('\n');
        self.tx
            .send(line)
            .await
            .map_err(|_| PilotError::Cancelled)
    }

    /// One fragment of filtered assistant narration.
    pub async fn text_delta(&self, delta: &str) -> PilotResult<()> {
        self.send(json!({ "type": "text-delta", "delta": delta })).await
    }

    /// A complete standalone assistant message.
    pub async fn text_message(&self, text: &str) -> PilotResult<()> {
        self.send(json!({ "type": "text-message", "text": text })).await
    }

    /// A validated tool invocation, announced before it executes.
    pub async fn tool_input(
        &self,
        call_id: &str,
        tool: &str,
        input: &serde_json::Value,
    ) -> PilotResult<()> {
        self.send(json!({
            "type": "tool-input-available",
            "toolCallId": call_id,
            "toolName": client_tool_name(tool),
            "input": input,
        }))
        .await
    }

    /// Execution outcome for a previously announced invocation.
    pub async fn tool_output(&self, call_id: &str, output: &serde_json::Value) -> PilotResult<()> {
        self.send(json!({
            "type": "tool-output-available",
            "toolCallId": call_id,
            "output": output,
        }))
        .await
    }

    /// Fresh screen capture, base64-encoded PNG.
    pub async fn screenshot(&self, image_b64: &str) -> PilotResult<()> {
        self.send(json!({ "type": "screenshot-update", "screenshot": image_b64 }))
            .await
    }

    /// Current plan state as maintained by the model.
    pub async fn workflow(&self, workflow: &serde_json::Value) -> PilotResult<()> {
        self.send(json!({ "type": "workflow-update", "workflow": workflow }))
            .await
    }

    /// Non-fatal or fatal problem, as narration for the client.
    pub async fn error(&self, message: &str) -> PilotResult<()> {
        self.send(json!({ "type": "error", "errorText": message })).await
    }

    /// Terminal event; nothing follows it.
    pub async fn finish(&self) -> PilotResult<()> {
        self.send(json!({ "type": "finish" })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(sink_use: impl std::future::Future<Output = PilotResult<()>>, rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        sink_use.await.unwrap();
        let line = rx.recv().await.unwrap();
        assert!(line.ends_with('\n'));
        serde_json::from_str(line.trim_end()).unwrap()
    }

    #[tokio::test]
    async fn events_are_single_json_lines() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = EventSink::new(tx);

        let v = collect(sink.text_delta("hej"), &mut rx).await;
        assert_eq!(v, serde_json::json!({"type": "text-delta", "delta": "hej"}));

        let v = collect(
            sink.tool_input("call_1", "computer_use", &json!({"action": "screenshot"})),
            &mut rx,
        )
        .await;
        assert_eq!(v["toolName"], "computer");
        assert_eq!(v["toolCallId"], "call_1");

        let v = collect(sink.finish(), &mut rx).await;
        assert_eq!(v["type"], "finish");
    }

    #[tokio::test]
    async fn send_after_receiver_drop_is_cancellation() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = EventSink::new(tx);
        assert!(sink.is_closed());
        assert!(matches!(
            sink.text_delta("x").await,
            Err(PilotError::Cancelled)
        ));
    }

    #[test]
    fn tool_names_map_to_client_names() {
        assert_eq!(client_tool_name("computer_use"), "computer");
        assert_eq!(client_tool_name("update_workflow"), "workflow");
        assert_eq!(client_tool_name("other"), "unknown");
    }
}
