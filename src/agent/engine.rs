//! The autonomous action loop: stream one model turn, apply at most one
//! validated action, feed the outcome back, repeat until the model signals
//! completion or a guard trips.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::agent::action::{parse_action, Action, WorkflowUpdate};
use crate::agent::events::EventSink;
use crate::agent::extract::extract_tool_call;
use crate::agent::history::ChatHistory;
use crate::agent::loop_control::LoopController;
use crate::agent::repair::repair_arguments;
use crate::agent::text_filter::{remove_technical_syntax, StreamTextFilter};
use crate::config::LimitsConfig;
use crate::desktop::backend::{DesktopBackend, MouseButton};
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::CompletionProvider;
use crate::llm::types::{CallConfig, ChatMessage, FunctionCall, StreamChunkKind, ToolCall, ToolDef};

/// Marker the model appends to its final text message when the task is done.
pub const FINISH_SENTINEL: &str = "!isfinish";

/// Everything one session needs injected.
pub struct SessionDeps {
    pub provider: Arc<dyn CompletionProvider>,
    pub backend: Arc<dyn DesktopBackend>,
    pub call_cfg: CallConfig,
    pub limits: LimitsConfig,
    /// Sandbox screen size, echoed into screenshot analysis prompts.
    pub resolution: (u32, u32),
}

/// Client request that starts one session loop.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub backend_session_id: String,
}

/// Partially assembled tool call, keyed by the provider's delta index.
#[derive(Debug, Default, Clone)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Folds one raw tool-call delta array into the per-index builders.
fn merge_tool_call_deltas(builders: &mut BTreeMap<u64, ToolCallBuilder>, raw: &str) {
    let Ok(Value::Array(deltas)) = serde_json::from_str::<Value>(raw) else {
        tracing::warn!(raw = raw, "unparseable tool-call delta, dropped");
        return;
    };
    for delta in deltas {
        let index = delta["index"].as_u64().unwrap_or(0);
        let builder = builders.entry(index).or_default();
        if builder.id.is_empty() {
            builder.id = match delta["id"].as_str() {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => format!("call_{}_{}", chrono::Utc::now().timestamp_millis(), index),
            };
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            if !name.is_empty() {
                builder.name = name.to_string();
            }
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            builder.arguments.push_str(args);
        }
    }
}

/// Builders in index order, minus any that never received a name.
fn build_tool_calls(builders: BTreeMap<u64, ToolCallBuilder>) -> Vec<ToolCallBuilder> {
    builders
        .into_values()
        .filter(|b| !b.name.is_empty())
        .collect()
}

/// Maps a backend failure message to a recovery suggestion for the model.
fn remediation_hint(message: &str) -> Option<&'static str> {
    if message.contains("type_text") {
        Some("The text field might not be active. Try clicking on the text field first before typing.")
    } else if message.contains("click_mouse") {
        Some("The click action failed. Take a screenshot to see what happened, then try clicking again.")
    } else if message.contains("screenshot") {
        Some("Screenshot failed. The desktop might be loading. Wait a moment and try again.")
    } else if message.contains("press_key") {
        Some("Key press failed. Make sure the correct window is focused.")
    } else if message.contains("move_mouse") {
        Some("Mouse movement failed. Try again.")
    } else if message.contains("drag_mouse") {
        Some("Drag operation failed. Try again with different coordinates.")
    } else if message.contains("scroll") {
        Some("Scroll failed. Make sure a scrollable window is active.")
    } else {
        None
    }
}

/// The backend speaks X11 keysyms; translate the aliases models emit.
fn normalize_key(key: &str) -> &str {
    match key {
        "Enter" | "enter" => "Return",
        other => other,
    }
}

struct StreamedTurn {
    filter: StreamTextFilter,
    tool_calls: Vec<ToolCallBuilder>,
}

struct ActionOutcome {
    result_text: String,
    screenshot_b64: Option<String>,
}

pub struct TurnEngine {
    deps: SessionDeps,
    sink: EventSink,
    history: ChatHistory,
    tools: Vec<ToolDef>,
    loop_ctrl: LoopController,
    backend_session_id: String,
}

impl TurnEngine {
    pub fn new(request: ChatRequest, deps: SessionDeps, sink: EventSink) -> PilotResult<Self> {
        let tools = crate::llm::tools::load_builtin_tools()?;
        let loop_ctrl = LoopController::new(deps.limits.clone());
        Ok(Self {
            history: ChatHistory::new(request.messages),
            backend_session_id: request.backend_session_id,
            deps,
            sink,
            tools,
            loop_ctrl,
        })
    }

    /// Runs the loop to completion. `Cancelled` means the client went away;
    /// other errors are fatal and the caller reports them.
    pub async fn run(mut self) -> PilotResult<()> {
        loop {
            if self.sink.is_closed() {
                return Err(PilotError::Cancelled);
            }
            if let Some(reason) = self.loop_ctrl.should_stop() {
                tracing::warn!(reason = ?reason, "session loop stopped by guard");
                self.sink.error(reason.message()).await?;
                self.sink.finish().await?;
                return Ok(());
            }

            let turn = self.stream_turn().await?;
            let full_text = turn.filter.raw().to_string();
            let wants_finish = full_text.contains(FINISH_SENTINEL);

            // Providers that ignore the tool channel narrate the action in
            // text instead; fall back to extracting it from there.
            let (calls, text_before) = if turn.tool_calls.is_empty() && !full_text.is_empty() {
                match extract_tool_call(&full_text) {
                    Some(extracted) => (
                        vec![ToolCallBuilder {
                            id: extracted.call.id,
                            name: extracted.call.function.name,
                            arguments: extracted.call.function.arguments,
                        }],
                        Some(extracted.before),
                    ),
                    None => (Vec::new(), None),
                }
            } else {
                (turn.tool_calls, None)
            };

            if let Some(first) = calls.into_iter().next() {
                self.apply_tool_call(first, text_before, &full_text).await?;
                continue;
            }

            if !full_text.trim().is_empty() {
                self.history.push_assistant_text(&full_text);
                if wants_finish {
                    tracing::info!("model signalled completion");
                    return Ok(());
                }
            } else {
                // A turn with neither text nor an action makes no progress.
                tracing::warn!("empty model turn");
                self.loop_ctrl.record_failure();
            }
        }
    }

    /// Streams one completion, forwarding filtered text deltas as they
    /// arrive and accumulating tool-call fragments.
    async fn stream_turn(&mut self) -> PilotResult<StreamedTurn> {
        let mut stream = self
            .deps
            .provider
            .stream_chat(self.history.messages(), &self.tools, &self.deps.call_cfg)
            .await?;

        let mut filter = StreamTextFilter::new();
        let mut builders: BTreeMap<u64, ToolCallBuilder> = BTreeMap::new();

        while let Some(chunk) = stream.next_chunk().await {
            let chunk = chunk?;
            match chunk.kind {
                StreamChunkKind::Content => {
                    if let Some(fragment) = filter.push(&chunk.content) {
                        self.sink.text_delta(&fragment).await?;
                    }
                }
                StreamChunkKind::ToolCall => {
                    merge_tool_call_deltas(&mut builders, &chunk.content);
                }
                StreamChunkKind::Reasoning => {
                    tracing::trace!(len = chunk.content.len(), "reasoning delta");
                }
                StreamChunkKind::Done => break,
            }
        }

        Ok(StreamedTurn {
            filter,
            tool_calls: build_tool_calls(builders),
        })
    }

    /// Validates and executes one tool call, recording events and history.
    async fn apply_tool_call(
        &mut self,
        call: ToolCallBuilder,
        text_before: Option<String>,
        full_text: &str,
    ) -> PilotResult<()> {
        // Close the streamed text message before the action is announced.
        self.sink.finish().await?;

        match text_before {
            Some(before) if !before.trim().is_empty() => {
                self.history.push_assistant_text(&before);
            }
            _ => {
                let filtered = remove_technical_syntax(full_text);
                if !filtered.is_empty() {
                    self.history.push_assistant_text(&filtered);
                }
            }
        }

        let Some(args) = repair_arguments(&call.arguments) else {
            self.sink
                .error("Could not parse the action arguments; asking the model to retry")
                .await?;
            self.loop_ctrl.record_failure();
            return Ok(());
        };

        let wire_call = ToolCall {
            id: call.id.clone(),
            call_type: "function".into(),
            function: FunctionCall {
                name: call.name.clone(),
                arguments: args.to_string(),
            },
        };
        self.history.push_assistant_tool_call(wire_call);
        self.sink.tool_input(&call.id, &call.name, &args).await?;

        match call.name.as_str() {
            "update_workflow" => match serde_json::from_value::<WorkflowUpdate>(args.clone()) {
                Ok(_) => {
                    self.sink.workflow(&args).await?;
                    self.sink
                        .tool_output(&call.id, &json!({ "type": "text", "text": "Workflow updated" }))
                        .await?;
                    self.history.push_tool_result(
                        &call.id,
                        "Workflow updated successfully. Continue with the next action.",
                    );
                    self.loop_ctrl.record_success();
                }
                Err(e) => {
                    let reason = format!("Invalid workflow payload: {e}");
                    tracing::warn!(reason = %reason, "workflow update rejected");
                    self.sink
                        .tool_output(&call.id, &json!({ "type": "text", "text": reason }))
                        .await?;
                    self.history.push_tool_result(&call.id, &reason);
                    self.loop_ctrl.record_failure();
                }
            },
            "computer_use" => match parse_action(&args) {
                Ok(action) => self.execute_computer_action(&call.id, action).await?,
                Err(reason) => {
                    tracing::warn!(reason = %reason, "invalid computer_use arguments");
                    self.sink
                        .tool_output(&call.id, &json!({ "type": "text", "text": reason }))
                        .await?;
                    self.history.push_tool_result(&call.id, &reason);
                    self.loop_ctrl.record_failure();
                }
            },
            other => {
                let reason = format!("Unknown tool: {other}");
                tracing::warn!(tool = other, "model called unknown tool");
                self.sink
                    .tool_output(&call.id, &json!({ "type": "text", "text": reason }))
                    .await?;
                self.history.push_tool_result(&call.id, &reason);
                self.loop_ctrl.record_failure();
            }
        }
        Ok(())
    }

    async fn execute_computer_action(&mut self, call_id: &str, action: Action) -> PilotResult<()> {
        tracing::info!(action = action.kind(), session = %self.backend_session_id, "executing action");
        match self.run_action(&action).await {
            Ok(outcome) => {
                if let Some(image_b64) = outcome.screenshot_b64 {
                    self.sink.screenshot(&image_b64).await?;
                    self.sink
                        .tool_output(call_id, &json!({ "type": "image", "data": image_b64 }))
                        .await?;
                    let (width, height) = self.deps.resolution;
                    let timestamp = chrono::Utc::now().to_rfc3339();
                    self.history
                        .push_screenshot(call_id, &image_b64, &timestamp, width, height);
                } else {
                    self.sink
                        .tool_output(
                            call_id,
                            &json!({ "type": "text", "text": outcome.result_text }),
                        )
                        .await?;
                    self.history.push_tool_result(call_id, &outcome.result_text);
                }
                self.loop_ctrl.record_success();
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(error = %message, "recoverable action failure");
                self.sink.error(&message).await?;
                let mut detailed = format!("Error: {message}");
                if let Some(hint) = remediation_hint(&message) {
                    detailed.push_str("\n\nSuggestion: ");
                    detailed.push_str(hint);
                }
                self.history.push_tool_result(call_id, &detailed);
                self.loop_ctrl.record_failure();
                Ok(())
            }
        }
    }

    async fn run_action(&self, action: &Action) -> PilotResult<ActionOutcome> {
        let backend = &self.deps.backend;
        let session = &self.backend_session_id;

        let text_outcome = |text: String| ActionOutcome {
            result_text: text,
            screenshot_b64: None,
        };

        match action {
            Action::Screenshot => {
                let bytes = backend.capture_screenshot(session).await?;
                Ok(ActionOutcome {
                    result_text: String::new(),
                    screenshot_b64: Some(BASE64.encode(bytes)),
                })
            }
            Action::Wait { seconds } => {
                tokio::time::sleep(std::time::Duration::from_secs_f64(*seconds)).await;
                Ok(text_outcome(format!("Waited for {seconds} seconds")))
            }
            Action::LeftClick { x, y } => {
                backend
                    .click_mouse(session, *x, *y, MouseButton::Left, 1)
                    .await?;
                Ok(text_outcome(format!("Left clicked at coordinates ({x}, {y})")))
            }
            Action::DoubleClick { x, y } => {
                backend
                    .click_mouse(session, *x, *y, MouseButton::Left, 2)
                    .await?;
                Ok(text_outcome(format!("Double clicked at coordinates ({x}, {y})")))
            }
            Action::RightClick { x, y } => {
                backend
                    .click_mouse(session, *x, *y, MouseButton::Right, 1)
                    .await?;
                Ok(text_outcome(format!("Right clicked at coordinates ({x}, {y})")))
            }
            Action::MouseMove { x, y } => {
                backend.move_mouse(session, *x, *y).await?;
                Ok(text_outcome(format!("Moved mouse to {x}, {y}")))
            }
            Action::Type { text } => {
                backend.type_text(session, text).await?;
                Ok(text_outcome(format!("Typed: {text}")))
            }
            Action::Key { text } => {
                let key = normalize_key(text).to_string();
                backend.press_key(session, &[key]).await?;
                Ok(text_outcome(format!("Pressed key: {text}")))
            }
            Action::Scroll { x, y, delta_x, delta_y } => {
                backend.scroll(session, *x, *y, *delta_x, *delta_y).await?;
                Ok(text_outcome(format!(
                    "Scrolled at ({x}, {y}) with delta_x: {delta_x}, delta_y: {delta_y}"
                )))
            }
            Action::LeftClickDrag { start_x, start_y, x, y } => {
                backend
                    .drag_mouse(session, &[(*start_x, *start_y), (*x, *y)], MouseButton::Left)
                    .await?;
                Ok(text_outcome(format!(
                    "Dragged from ({start_x}, {start_y}) to ({x}, {y})"
                )))
            }
        }
    }
}
