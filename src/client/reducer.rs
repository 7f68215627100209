//! Reconstruction of the message timeline from the line-delimited event
//! stream.
//!
//! The reducer is fed raw bytes with arbitrary chunk boundaries and must
//! produce the same timeline no matter how the stream was fragmented. A
//! line that is not a structured event is assistant text by definition,
//! never an error.

use std::collections::HashMap;

use serde_json::Value;

/// Where a tool invocation is in its observable lifecycle. Only ever
/// advances, never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InvocationState {
    Streaming,
    Call,
    Result,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: Option<String>,
    pub state: InvocationState,
    pub args: Option<Value>,
    pub result: Option<Value>,
}

/// One UI-facing timeline entry. Identifier is stable across updates;
/// content only grows.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub invocations: Vec<ToolInvocation>,
}

impl TimelineMessage {
    fn text(id: String, role: &str, content: &str) -> Self {
        Self {
            id,
            role: role.into(),
            content: content.into(),
            invocations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ready,
    Submitted,
    Streaming,
}

/// Immutable view published to observers after every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub messages: Vec<TimelineMessage>,
    pub status: SessionStatus,
    pub initializing: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            status: SessionStatus::Ready,
            initializing: true,
        }
    }
}

pub struct SessionReducer {
    buffer: Vec<u8>,
    messages: Vec<TimelineMessage>,
    status: SessionStatus,
    initializing: bool,
    errors: Vec<String>,
    current_text_id: Option<String>,
    tool_message_ids: HashMap<String, String>,
    pending_image_target: Option<String>,
    message_seq: u64,
}

impl Default for SessionReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionReducer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            messages: Vec::new(),
            status: SessionStatus::Ready,
            initializing: true,
            errors: Vec::new(),
            current_text_id: None,
            tool_message_ids: HashMap::new(),
            pending_image_target: None,
            message_seq: 0,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.messages.clone(),
            status: self.status,
            initializing: self.initializing,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn set_initializing(&mut self, flag: bool) {
        self.initializing = flag;
    }

    /// Errors surfaced so far; draining resets the list.
    pub fn drain_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    /// Appends the caller's own message and resets per-exchange state.
    pub fn push_user_message(&mut self, text: &str) {
        let id = self.next_id("user");
        self.messages.push(TimelineMessage::text(id, "user", text));
        self.current_text_id = None;
        self.pending_image_target = None;
    }

    /// Absorbs one chunk of stream bytes. Chunk boundaries are arbitrary;
    /// only complete lines are interpreted.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.process_line(&line);
        }
    }

    /// Flushes a trailing unterminated line and returns to ready.
    pub fn finish_input(&mut self) {
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            if !rest.trim().is_empty() {
                self.process_line(&rest);
            }
        }
        self.status = SessionStatus::Ready;
    }

    /// Records a client-side failure (transport, decode of the exchange
    /// itself) and returns to ready.
    pub fn record_failure(&mut self, message: &str) {
        self.errors.push(message.to_string());
        self.status = SessionStatus::Ready;
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.message_seq += 1;
        format!("{prefix}-{}", self.message_seq)
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        let event: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            // Raw text without envelope framing; spacing is significant.
            Err(_) => {
                self.append_text(line);
                return;
            }
        };
        if !event.is_object() {
            self.append_text(line);
            return;
        }
        let Some(kind) = event["type"].as_str() else {
            tracing::trace!(line = line, "object event without type, dropped");
            return;
        };

        match kind {
            "text-delta" => {
                // Older emitters used "textDelta" for the same field.
                let delta = event["delta"]
                    .as_str()
                    .or_else(|| event["textDelta"].as_str())
                    .unwrap_or("");
                if !delta.is_empty() {
                    self.append_text(delta);
                }
            }
            "text-message" => {
                let text = event["text"]
                    .as_str()
                    .or_else(|| event["content"].as_str())
                    .unwrap_or("");
                if !text.is_empty() {
                    let id = self.next_id("assistant");
                    self.messages.push(TimelineMessage::text(id, "assistant", text));
                    self.current_text_id = None;
                }
            }
            "tool-input-available" => {
                let Some(call_id) = event["toolCallId"].as_str().map(String::from) else {
                    return;
                };
                let name = event["toolName"].as_str().map(String::from);
                let input = event.get("input").cloned().filter(|v| !v.is_null());
                if input.as_ref().map(|i| i["action"] == "screenshot") == Some(true) {
                    self.pending_image_target = Some(call_id.clone());
                }
                self.upsert_invocation(&call_id, InvocationState::Call, name, input, None);
            }
            "tool-output-available" => {
                let Some(call_id) = event["toolCallId"].as_str().map(String::from) else {
                    return;
                };
                let output = event.get("output").cloned().filter(|v| !v.is_null());
                if output.as_ref().map(|o| o["type"] == "image") == Some(true) {
                    self.pending_image_target = Some(call_id.clone());
                }
                self.upsert_invocation(&call_id, InvocationState::Result, None, None, output);
            }
            "screenshot-update" => {
                // No pending target means nothing to attach to; not an error.
                let Some(target) = self.pending_image_target.take() else {
                    return;
                };
                let Some(image) = event["screenshot"].as_str() else {
                    self.pending_image_target = Some(target);
                    return;
                };
                let result = serde_json::json!({ "type": "image", "data": image });
                self.upsert_invocation(&target, InvocationState::Result, None, None, Some(result));
            }
            "workflow-update" => {
                // Plan state is rendered elsewhere; the timeline ignores it.
            }
            "finish" => {
                self.current_text_id = None;
                self.status = SessionStatus::Ready;
            }
            "error" => {
                let text = event["errorText"].as_str().unwrap_or("Streaming error");
                self.errors.push(text.to_string());
                self.status = SessionStatus::Ready;
            }
            other => {
                tracing::trace!(kind = other, "unknown event type, dropped");
            }
        }
    }

    fn append_text(&mut self, delta: &str) {
        if let Some(id) = &self.current_text_id {
            if let Some(msg) = self.messages.iter_mut().find(|m| &m.id == id) {
                msg.content.push_str(delta);
                return;
            }
        }
        let id = self.next_id("assistant");
        self.current_text_id = Some(id.clone());
        self.messages.push(TimelineMessage::text(id, "assistant", delta));
    }

    /// Creates the invocation's message slot on first sight, updates it in
    /// place thereafter. State only moves forward; a later result payload
    /// replaces an earlier one.
    fn upsert_invocation(
        &mut self,
        call_id: &str,
        state: InvocationState,
        tool_name: Option<String>,
        args: Option<Value>,
        result: Option<Value>,
    ) {
        if let Some(message_id) = self.tool_message_ids.get(call_id).cloned() {
            let Some(msg) = self.messages.iter_mut().find(|m| m.id == message_id) else {
                return;
            };
            let Some(inv) = msg
                .invocations
                .iter_mut()
                .find(|i| i.tool_call_id == call_id)
            else {
                return;
            };
            if state > inv.state {
                inv.state = state;
            }
            if tool_name.is_some() {
                inv.tool_name = tool_name;
            }
            if args.is_some() {
                inv.args = args;
            }
            if result.is_some() {
                inv.result = result;
            }
            return;
        }

        let message_id = format!("tool-{call_id}");
        self.tool_message_ids
            .insert(call_id.to_string(), message_id.clone());
        self.current_text_id = None;
        self.messages.push(TimelineMessage {
            id: message_id,
            role: "assistant".into(),
            content: String::new(),
            invocations: vec![ToolInvocation {
                tool_call_id: call_id.to_string(),
                tool_name,
                state,
                args,
                result,
            }],
        });
    }
}
