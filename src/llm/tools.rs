use crate::errors::{PilotError, PilotResult};
use crate::llm::types::ToolDef;

/// Loads the built-in tool definitions (computer_use, update_workflow).
/// The JSON is embedded at compile time via include_str!.
pub fn load_builtin_tools() -> PilotResult<Vec<ToolDef>> {
    let json = include_str!("../../prompts/tools/builtin.json");
    serde_json::from_str(json)
        .map_err(|e| PilotError::Config(format!("Failed to parse builtin tools: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tools_parse() {
        let tools = load_builtin_tools().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(names, vec!["computer_use", "update_workflow"]);
        let actions = &tools[0].function.parameters["properties"]["action"]["enum"];
        assert!(actions
            .as_array()
            .unwrap()
            .iter()
            .any(|a| a == "left_click_drag"));
    }
}
