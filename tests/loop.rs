//! End-to-end session loop tests with a scripted provider and a recording
//! desktop backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use deskpilot::agent::engine::{ChatRequest, SessionDeps};
use deskpilot::agent::session::run_session;
use deskpilot::config::LimitsConfig;
use deskpilot::desktop::backend::{DesktopBackend, MouseButton};
use deskpilot::errors::{PilotError, PilotResult};
use deskpilot::llm::provider::{CompletionProvider, CompletionStream};
use deskpilot::llm::types::{
    CallConfig, ChatMessage, MessageContent, StreamChunk, StreamChunkKind, ToolDef,
};

fn content(text: &str) -> PilotResult<StreamChunk> {
    Ok(StreamChunk {
        kind: StreamChunkKind::Content,
        content: text.into(),
    })
}

fn tool_delta(index: u64, id: &str, name: &str, args: &str) -> PilotResult<StreamChunk> {
    Ok(StreamChunk {
        kind: StreamChunkKind::ToolCall,
        content: json!([{
            "index": index,
            "id": id,
            "function": { "name": name, "arguments": args }
        }])
        .to_string(),
    })
}

fn done() -> PilotResult<StreamChunk> {
    Ok(StreamChunk {
        kind: StreamChunkKind::Done,
        content: String::new(),
    })
}

/// Pops one scripted turn per stream_chat call and records the history it
/// was called with.
struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<PilotResult<StreamChunk>>>>,
    seen_histories: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    fn new(turns: Vec<Vec<PilotResult<StreamChunk>>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            seen_histories: Mutex::new(Vec::new()),
        })
    }

    fn history_at_call(&self, n: usize) -> Vec<ChatMessage> {
        self.seen_histories.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDef],
        _cfg: &CallConfig,
    ) -> PilotResult<CompletionStream> {
        self.seen_histories.lock().unwrap().push(messages.to_vec());
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![done()]);
        Ok(CompletionStream::new(futures_util::stream::iter(turn)))
    }
}

#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<String>>,
    fail_clicks: bool,
    deleted: AtomicBool,
}

impl RecordingBackend {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DesktopBackend for RecordingBackend {
    async fn capture_screenshot(&self, _session_id: &str) -> PilotResult<Vec<u8>> {
        self.calls.lock().unwrap().push("screenshot".into());
        Ok(vec![1, 2, 3])
    }

    async fn click_mouse(
        &self,
        _session_id: &str,
        x: i32,
        y: i32,
        button: MouseButton,
        num_clicks: u32,
    ) -> PilotResult<()> {
        if self.fail_clicks {
            return Err(PilotError::Backend(
                "Failed to click_mouse: 500: boom".into(),
            ));
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("click {x},{y} {} x{num_clicks}", button.as_str()));
        Ok(())
    }

    async fn move_mouse(&self, _session_id: &str, x: i32, y: i32) -> PilotResult<()> {
        self.calls.lock().unwrap().push(format!("move {x},{y}"));
        Ok(())
    }

    async fn type_text(&self, _session_id: &str, text: &str) -> PilotResult<()> {
        self.calls.lock().unwrap().push(format!("type {text}"));
        Ok(())
    }

    async fn press_key(&self, _session_id: &str, keys: &[String]) -> PilotResult<()> {
        self.calls.lock().unwrap().push(format!("key {}", keys.join("+")));
        Ok(())
    }

    async fn scroll(
        &self,
        _session_id: &str,
        x: i32,
        y: i32,
        delta_x: i32,
        delta_y: i32,
    ) -> PilotResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("scroll {x},{y} {delta_x},{delta_y}"));
        Ok(())
    }

    async fn drag_mouse(
        &self,
        _session_id: &str,
        path: &[(i32, i32)],
        _button: MouseButton,
    ) -> PilotResult<()> {
        self.calls.lock().unwrap().push(format!("drag {path:?}"));
        Ok(())
    }

    async fn delete_session(&self, _session_id: &str) -> PilotResult<()> {
        self.deleted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn deps(provider: Arc<ScriptedProvider>, backend: Arc<RecordingBackend>) -> SessionDeps {
    SessionDeps {
        provider,
        backend,
        call_cfg: CallConfig {
            model: "test-model".into(),
            temperature: 0.7,
        },
        limits: LimitsConfig {
            max_loop_duration_secs: 30,
            max_consecutive_failures: 3,
        },
        resolution: (1024, 768),
    }
}

fn request(text: &str) -> ChatRequest {
    ChatRequest {
        messages: vec![ChatMessage::text("user", text)],
        backend_session_id: "sandbox-1".into(),
    }
}

/// Runs a session to completion and returns every emitted event line,
/// parsed when possible.
async fn collect_events(request: ChatRequest, deps: SessionDeps) -> Vec<Value> {
    let mut rx = run_session(request, deps);
    let mut events = Vec::new();
    while let Some(line) = rx.recv().await {
        assert!(line.ends_with('\n'), "every event is one full line");
        events.push(serde_json::from_str(line.trim_end()).unwrap_or(Value::String(line)));
    }
    events
}

fn types_of(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| e["type"].as_str().map(String::from))
        .collect()
}

#[tokio::test]
async fn screenshot_turn_then_finish() {
    let provider = ScriptedProvider::new(vec![
        vec![
            tool_delta(0, "call_1", "computer_use", r#"{"action": "#),
            tool_delta(0, "call_1", "", r#""screenshot"}"#),
            done(),
        ],
        vec![
            content("Gotowe! Pogoda "),
            content("sprawdzona. !isfinish"),
            done(),
        ],
    ]);
    let backend = Arc::new(RecordingBackend::default());
    let events = collect_events(request("pogoda w Warszawie"), deps(provider.clone(), backend.clone())).await;

    assert_eq!(backend.calls(), vec!["screenshot"]);

    let types = types_of(&events);
    assert_eq!(
        types,
        vec![
            "finish",
            "tool-input-available",
            "screenshot-update",
            "tool-output-available",
            "text-delta",
            "text-delta",
        ]
    );

    let input = events.iter().find(|e| e["type"] == "tool-input-available").unwrap();
    assert_eq!(input["toolName"], "computer");
    assert_eq!(input["input"]["action"], "screenshot");
    assert_eq!(input["toolCallId"], "call_1");

    // vec![1, 2, 3] base64-encoded
    let shot = events.iter().find(|e| e["type"] == "screenshot-update").unwrap();
    assert_eq!(shot["screenshot"], "AQID");
    let output = events.iter().find(|e| e["type"] == "tool-output-available").unwrap();
    assert_eq!(output["output"]["type"], "image");
    assert_eq!(output["output"]["data"], "AQID");

    // The sentinel never reaches the client.
    let streamed: String = events
        .iter()
        .filter(|e| e["type"] == "text-delta")
        .map(|e| e["delta"].as_str().unwrap())
        .collect();
    assert_eq!(streamed, "Gotowe! Pogoda sprawdzona.");

    // Second turn's history carries the screenshot as a tool ack plus a
    // separate user-role image message.
    let history = provider.history_at_call(1);
    let n = history.len();
    let ack = &history[n - 2];
    assert_eq!(ack.role, "tool");
    assert_eq!(ack.tool_call_id.as_deref(), Some("call_1"));
    let image = &history[n - 1];
    assert_eq!(image.role, "user");
    assert!(matches!(image.content, MessageContent::Parts(_)));

    assert!(!backend.deleted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn action_extracted_from_text_when_tool_channel_is_silent() {
    let provider = ScriptedProvider::new(vec![
        vec![
            content("Klikam w wynik wyszukiwania.\n"),
            content(r#"computer_use("left_click", [512, 384])"#),
            done(),
        ],
        vec![content("Zrobione. !isfinish"), done()],
    ]);
    let backend = Arc::new(RecordingBackend::default());
    let events = collect_events(request("kliknij wynik"), deps(provider.clone(), backend.clone())).await;

    assert_eq!(backend.calls(), vec!["click 512,384 left x1"]);

    let input = events.iter().find(|e| e["type"] == "tool-input-available").unwrap();
    assert_eq!(input["input"]["action"], "left_click");
    assert_eq!(input["input"]["coordinate"], json!([512, 384]));

    // Only the narration before the action lands in history.
    let history = provider.history_at_call(1);
    let narration = history
        .iter()
        .find(|m| m.role == "assistant" && m.tool_calls.is_none())
        .unwrap();
    assert_eq!(
        narration.content.as_text(),
        Some("Klikam w wynik wyszukiwania.")
    );
}

#[tokio::test]
async fn truncated_arguments_are_repaired_before_dispatch() {
    let provider = ScriptedProvider::new(vec![
        vec![
            tool_delta(0, "call_1", "computer_use", r#"{"action": "screenshot""#),
            done(),
        ],
        vec![content("Koniec. !isfinish"), done()],
    ]);
    let backend = Arc::new(RecordingBackend::default());
    let events = collect_events(request("zrzut"), deps(provider, backend.clone())).await;

    assert_eq!(backend.calls(), vec!["screenshot"]);
    let input = events.iter().find(|e| e["type"] == "tool-input-available").unwrap();
    assert_eq!(input["input"], json!({"action": "screenshot"}));
}

#[tokio::test]
async fn backend_failure_is_recoverable_with_hint() {
    let provider = ScriptedProvider::new(vec![
        vec![
            tool_delta(
                0,
                "call_1",
                "computer_use",
                r#"{"action": "left_click", "coordinate": [10, 20]}"#,
            ),
            done(),
        ],
        vec![content("Spróbuję inaczej. !isfinish"), done()],
    ]);
    let backend = Arc::new(RecordingBackend {
        fail_clicks: true,
        ..Default::default()
    });
    let events = collect_events(request("kliknij"), deps(provider.clone(), backend.clone())).await;

    let error = events.iter().find(|e| e["type"] == "error").unwrap();
    assert!(error["errorText"].as_str().unwrap().contains("click_mouse"));

    // Loop survived the failure: the second turn ran and saw a diagnostic
    // tool result with a remediation hint.
    let history = provider.history_at_call(1);
    let diagnostic = history
        .iter()
        .find(|m| m.role == "tool")
        .and_then(|m| m.content.as_text())
        .unwrap();
    assert!(diagnostic.starts_with("Error:"));
    assert!(diagnostic.contains("Suggestion: The click action failed"));

    assert!(!backend.deleted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn provider_failure_is_fatal_and_tears_down() {
    let provider = ScriptedProvider::new(vec![vec![Err(PilotError::Provider(
        "stream broken".into(),
    ))]]);
    let backend = Arc::new(RecordingBackend::default());
    let events = collect_events(request("halo"), deps(provider, backend.clone())).await;

    let types = types_of(&events);
    assert_eq!(types, vec!["error"]);
    assert!(events[0]["errorText"].as_str().unwrap().contains("stream broken"));
    assert!(backend.deleted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn workflow_update_never_reaches_the_backend() {
    let workflow_args = json!({
        "steps": [{"id": 1, "title": "Otworzyć przeglądarkę", "status": "in_progress"}],
        "current_step": 1
    })
    .to_string();
    let provider = ScriptedProvider::new(vec![
        vec![
            tool_delta(0, "call_wf", "update_workflow", &workflow_args),
            done(),
        ],
        vec![content("Plan gotowy. !isfinish"), done()],
    ]);
    let backend = Arc::new(RecordingBackend::default());
    let events = collect_events(request("zaplanuj"), deps(provider.clone(), backend.clone())).await;

    assert!(backend.calls().is_empty());

    let types = types_of(&events);
    assert!(types.contains(&"workflow-update".to_string()));
    let wf = events.iter().find(|e| e["type"] == "workflow-update").unwrap();
    assert_eq!(wf["workflow"]["steps"][0]["status"], "in_progress");
    let input = events.iter().find(|e| e["type"] == "tool-input-available").unwrap();
    assert_eq!(input["toolName"], "workflow");

    let history = provider.history_at_call(1);
    let result = history
        .iter()
        .find(|m| m.role == "tool")
        .and_then(|m| m.content.as_text())
        .unwrap();
    assert!(result.contains("Workflow updated successfully"));
}

#[tokio::test]
async fn consecutive_failures_stop_the_loop() {
    let click = || {
        vec![
            tool_delta(
                0,
                "call_x",
                "computer_use",
                r#"{"action": "left_click", "coordinate": [10, 20]}"#,
            ),
            done(),
        ]
    };
    let provider = ScriptedProvider::new(vec![click(), click(), click(), click(), click()]);
    let backend = Arc::new(RecordingBackend {
        fail_clicks: true,
        ..Default::default()
    });
    let events = collect_events(request("kliknij"), deps(provider, backend)).await;

    let errors: Vec<&str> = events
        .iter()
        .filter(|e| e["type"] == "error")
        .map(|e| e["errorText"].as_str().unwrap())
        .collect();
    // Three action failures, then the guard's own stop message.
    assert_eq!(errors.len(), 4);
    assert!(errors[3].contains("consecutive"));
    assert_eq!(events.last().unwrap()["type"], "finish");
}
