//! Best-effort repair of tool-call argument JSON mangled by streaming.
//!
//! Providers that are not fully tool-call-compliant truncate argument
//! payloads mid-stream or swallow tokens. The ladder here applies
//! increasingly aggressive fixes, validating with a parse attempt after
//! each step, and finally salvages a minimum viable payload by regex.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

/// Repairs raw argument text into a parseable payload. Returns None only
/// when nothing usable can be recovered; never panics.
pub fn repair_arguments(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(json!({}));
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    // Step 1: balance structural braces (handles truncation mid-stream).
    // Known false positive: counts braces inside string literals too.
    let balanced = balance_braces(trimmed);
    if let Ok(v) = serde_json::from_str::<Value>(&balanced) {
        tracing::debug!(original = raw, "arguments repaired by brace balancing");
        return Some(v);
    }

    // Step 2: fixed table of known streaming corruption patterns.
    let patched = apply_corruption_fixes(&balanced);
    if let Ok(v) = serde_json::from_str::<Value>(&patched) {
        tracing::debug!(original = raw, fixed = %patched, "arguments repaired by pattern table");
        return Some(v);
    }

    // Step 3: salvage a minimum viable action.
    match salvage(raw) {
        Some(v) => {
            tracing::warn!(original = raw, salvaged = %v, "arguments salvaged");
            Some(v)
        }
        None => {
            tracing::warn!(original = raw, "arguments unrecoverable");
            None
        }
    }
}

fn balance_braces(input: &str) -> String {
    let open = input.matches('{').count();
    let close = input.matches('}').count();
    let mut fixed = input.to_string();
    if open > close {
        fixed.push_str(&"}".repeat(open - close));
    }
    fixed
}

static SWALLOWED_QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#": "([^",\}\]]*), ""#).unwrap());
static EMPTY_ARRAY_FUSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#": \[\](\d)"#).unwrap());
static PAIR_MISSING_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[(\d+)\s*,\s*(\d+)\s*([^\]\d,])"#).unwrap());
static PAIR_MISSING_CLOSE_EOS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[(\d+)\s*,\s*(\d+)\s*$"#).unwrap());
static UNCLOSED_ARRAY_EOS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[([^\]]*\d[^\]]*)$"#).unwrap());

fn apply_corruption_fixes(input: &str) -> String {
    // "action": "left_click, "coordinate": → closing quote swallowed
    let mut fixed = SWALLOWED_QUOTE
        .replace_all(input, r#": "${1}", ""#)
        .into_owned();
    // "coordinate": []512 → empty-array token fused with a digit
    fixed = EMPTY_ARRAY_FUSED.replace_all(&fixed, r#": [${1}"#).into_owned();
    // [512, 384} or [512, 384 … → numeric pair missing its closing bracket
    fixed = PAIR_MISSING_CLOSE
        .replace_all(&fixed, r#"[${1}, ${2}]${3}"#)
        .into_owned();
    fixed = PAIR_MISSING_CLOSE_EOS
        .replace_all(&fixed, r#"[${1}, ${2}]"#)
        .into_owned();
    // Any remaining array that opened, holds digits, and never closed.
    if fixed.contains('[') && !fixed.contains(']') {
        fixed = UNCLOSED_ARRAY_EOS
            .replace(&fixed, r#"[${1}]"#)
            .into_owned();
    }
    fixed
}

static ACTION_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""action"\s*:\s*"([^"]+)""#).unwrap());
static COORD_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*,\s*(\d+)").unwrap());
static TEXT_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""text"\s*:\s*"([^"]+)""#).unwrap());

/// Extracts the action kind alone, plus a coordinate pair or text literal
/// when one is recoverable and consistent with that kind.
fn salvage(raw: &str) -> Option<Value> {
    let action = ACTION_FIELD.captures(raw)?.get(1)?.as_str().to_string();

    if action.contains("click") || action.contains("move") {
        if let Some(c) = COORD_PAIR.captures(raw) {
            let x: i64 = c[1].parse().ok()?;
            let y: i64 = c[2].parse().ok()?;
            return Some(json!({ "action": action, "coordinate": [x, y] }));
        }
    } else if action != "screenshot" && action != "wait" {
        if let Some(t) = TEXT_FIELD.captures(raw) {
            return Some(json!({ "action": action, "text": &t[1] }));
        }
    }

    Some(json!({ "action": action }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_passes_through() {
        let v = repair_arguments(r#"{"action": "type", "text": "hello"}"#).unwrap();
        assert_eq!(v["text"], "hello");
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        assert_eq!(repair_arguments("  ").unwrap(), json!({}));
    }

    #[test]
    fn truncated_screenshot_payload_is_closed() {
        let v = repair_arguments(r#"{"action": "screenshot""#).unwrap();
        assert_eq!(v, json!({"action": "screenshot"}));
    }

    #[test]
    fn brace_balancing_appends_exactly_the_missing_closers() {
        let raw = r#"{"a": {"b": {"c": 1"#;
        assert_eq!(balance_braces(raw).matches('}').count(), 3);
        let v = repair_arguments(raw).unwrap();
        assert_eq!(v["a"]["b"]["c"], 1);
    }

    #[test]
    fn swallowed_closing_quote_is_restored() {
        let v = repair_arguments(r#"{"action": "left_click, "coordinate": [512, 384]}"#).unwrap();
        assert_eq!(v["action"], "left_click");
        assert_eq!(v["coordinate"], json!([512, 384]));
    }

    #[test]
    fn empty_array_fused_with_digit() {
        let v = repair_arguments(r#"{"action": "left_click", "coordinate": []512, 384]}"#);
        let v = v.unwrap();
        assert_eq!(v["coordinate"], json!([512, 384]));
    }

    #[test]
    fn pair_missing_closing_bracket() {
        let v = repair_arguments(r#"{"action": "mouse_move", "coordinate": [512, 384}"#).unwrap();
        assert_eq!(v["coordinate"], json!([512, 384]));
    }

    #[test]
    fn salvage_extracts_action_and_coordinates() {
        // Hopelessly garbled apart from the recognizable fields.
        let v = repair_arguments(r#"{{"action": "left_click" ::: 512, 384 {{"#).unwrap();
        assert_eq!(v["action"], "left_click");
        assert_eq!(v["coordinate"], json!([512, 384]));
    }

    #[test]
    fn salvage_keeps_text_for_type_actions() {
        let v = repair_arguments(r#"{{"action": "type" junk "text": "warsaw weather" {{"#).unwrap();
        assert_eq!(v, json!({"action": "type", "text": "warsaw weather"}));
    }

    #[test]
    fn salvage_yields_action_only_when_nothing_else_fits() {
        let v = repair_arguments(r#"{{"action": "screenshot" 999,,,"#).unwrap();
        assert_eq!(v, json!({"action": "screenshot"}));
    }

    #[test]
    fn unrecoverable_is_none_not_panic() {
        assert!(repair_arguments("total garbage without structure").is_none());
    }
}
