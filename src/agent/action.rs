use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on a single wait action, in seconds.
pub const MAX_WAIT_SECS: f64 = 10.0;

/// Plan state carried by the update_workflow tool. Never dispatched to the
/// automation backend; it only feeds progress narration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    pub steps: Vec<WorkflowStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: u32,
    pub title: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

/// One primitive desktop-automation capability with validated arguments.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Screenshot,
    LeftClick { x: i32, y: i32 },
    RightClick { x: i32, y: i32 },
    DoubleClick { x: i32, y: i32 },
    MouseMove { x: i32, y: i32 },
    Type { text: String },
    Key { text: String },
    Scroll { x: i32, y: i32, delta_x: i32, delta_y: i32 },
    LeftClickDrag { start_x: i32, start_y: i32, x: i32, y: i32 },
    Wait { seconds: f64 },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Screenshot => "screenshot",
            Action::LeftClick { .. } => "left_click",
            Action::RightClick { .. } => "right_click",
            Action::DoubleClick { .. } => "double_click",
            Action::MouseMove { .. } => "mouse_move",
            Action::Type { .. } => "type",
            Action::Key { .. } => "key",
            Action::Scroll { .. } => "scroll",
            Action::LeftClickDrag { .. } => "left_click_drag",
            Action::Wait { .. } => "wait",
        }
    }
}

/// Parses repaired computer_use arguments into a typed action.
/// Errors name what was missing; the executor reports them as tool results.
pub fn parse_action(args: &Value) -> Result<Action, String> {
    let kind = args["action"]
        .as_str()
        .ok_or_else(|| "missing action field".to_string())?;

    match kind {
        "screenshot" => Ok(Action::Screenshot),
        "left_click" => {
            let (x, y) = coordinate(args, "coordinate")?;
            Ok(Action::LeftClick { x, y })
        }
        "right_click" => {
            let (x, y) = coordinate(args, "coordinate")?;
            Ok(Action::RightClick { x, y })
        }
        "double_click" => {
            let (x, y) = coordinate(args, "coordinate")?;
            Ok(Action::DoubleClick { x, y })
        }
        "mouse_move" => {
            let (x, y) = coordinate(args, "coordinate")?;
            Ok(Action::MouseMove { x, y })
        }
        "type" => Ok(Action::Type {
            text: args["text"]
                .as_str()
                .ok_or_else(|| "type requires text".to_string())?
                .to_string(),
        }),
        "key" => Ok(Action::Key {
            text: args["text"]
                .as_str()
                .ok_or_else(|| "key requires text".to_string())?
                .to_string(),
        }),
        "scroll" => {
            // Scroll defaults to the screen center when no anchor is given.
            let (x, y) = coordinate(args, "coordinate").unwrap_or((512, 384));
            Ok(Action::Scroll {
                x,
                y,
                delta_x: args["delta_x"].as_f64().unwrap_or(0.0).round() as i32,
                delta_y: args["delta_y"].as_f64().unwrap_or(0.0).round() as i32,
            })
        }
        "left_click_drag" => {
            let (start_x, start_y) = coordinate(args, "start_coordinate")?;
            let (x, y) = coordinate(args, "coordinate")?;
            Ok(Action::LeftClickDrag { start_x, start_y, x, y })
        }
        "wait" => {
            let seconds = args["duration"].as_f64().unwrap_or(1.0);
            Ok(Action::Wait {
                seconds: seconds.clamp(0.0, MAX_WAIT_SECS),
            })
        }
        other => Err(format!("Unknown action: {other}")),
    }
}

fn coordinate(args: &Value, field: &str) -> Result<(i32, i32), String> {
    let arr = args[field]
        .as_array()
        .ok_or_else(|| format!("missing {field}"))?;
    if arr.len() < 2 {
        return Err(format!("{field} needs [x, y]"));
    }
    let x = arr[0]
        .as_f64()
        .ok_or_else(|| format!("{field}[0] not a number"))?;
    let y = arr[1]
        .as_f64()
        .ok_or_else(|| format!("{field}[1] not a number"))?;
    Ok((x.round() as i32, y.round() as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn click_rounds_fractional_coordinates() {
        let action = parse_action(&json!({"action": "left_click", "coordinate": [512.6, 383.4]}))
            .unwrap();
        assert_eq!(action, Action::LeftClick { x: 513, y: 383 });
    }

    #[test]
    fn scroll_defaults_to_screen_center() {
        let action = parse_action(&json!({"action": "scroll", "delta_y": 300})).unwrap();
        assert_eq!(
            action,
            Action::Scroll { x: 512, y: 384, delta_x: 0, delta_y: 300 }
        );
    }

    #[test]
    fn wait_is_bounded() {
        let action = parse_action(&json!({"action": "wait", "duration": 9999})).unwrap();
        assert_eq!(action, Action::Wait { seconds: MAX_WAIT_SECS });
        let action = parse_action(&json!({"action": "wait"})).unwrap();
        assert_eq!(action, Action::Wait { seconds: 1.0 });
    }

    #[test]
    fn drag_needs_both_endpoints() {
        assert!(parse_action(&json!({"action": "left_click_drag", "coordinate": [5, 5]})).is_err());
        let action = parse_action(&json!({
            "action": "left_click_drag",
            "start_coordinate": [1, 2],
            "coordinate": [3, 4]
        }))
        .unwrap();
        assert_eq!(
            action,
            Action::LeftClickDrag { start_x: 1, start_y: 2, x: 3, y: 4 }
        );
    }

    #[test]
    fn unknown_action_is_reported() {
        let err = parse_action(&json!({"action": "fly"})).unwrap_err();
        assert!(err.contains("fly"));
    }

    #[test]
    fn workflow_payload_round_trips() {
        let wf: WorkflowUpdate = serde_json::from_value(json!({
            "steps": [
                {"id": 1, "title": "Otworzyć przeglądarkę", "status": "completed"},
                {"id": 2, "title": "Wyszukać pogodę", "status": "in_progress"}
            ],
            "current_step": 2
        }))
        .unwrap();
        assert_eq!(wf.steps[1].status, StepStatus::InProgress);
        assert_eq!(wf.current_step, Some(2));
        assert!(wf.notes.is_none());

        assert!(serde_json::from_value::<WorkflowUpdate>(
            json!({"steps": [{"id": 1, "title": "x", "status": "paused"}]})
        )
        .is_err());
    }
}
