//! Fallback extraction of a tool call from free-form assistant text.
//!
//! Providers that ignore the tool-call channel narrate actions in prose or
//! pseudo-syntax instead. The cascade below tries each known surface syntax
//! in fixed priority order; the first successful match wins, and the rest
//! of the text is never scanned for a second action.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{json, Value};

use crate::llm::types::{FunctionCall, ToolCall};

/// One extracted action plus the text surrounding it.
#[derive(Debug, Clone)]
pub struct ExtractedCall {
    pub call: ToolCall,
    pub before: String,
    pub after: String,
}

pub fn extract_tool_call(text: &str) -> Option<ExtractedCall> {
    extract_json_object(text)
        .or_else(|| extract_workflow(text))
        .or_else(|| run_patterns(text, &COMPUTER_USE_PATTERNS, "computer"))
        .or_else(|| run_patterns(text, &SIMPLE_PATTERNS, "simple"))
        .or_else(|| run_patterns(text, &NATURAL_PATTERNS, "natural"))
}

fn make_call(name: &str, args: &Value, origin: &str) -> ToolCall {
    ToolCall {
        id: format!("call_{origin}_{}", uuid::Uuid::new_v4().simple()),
        call_type: "function".into(),
        function: FunctionCall {
            name: name.into(),
            arguments: args.to_string(),
        },
    }
}

fn split_around(text: &str, start: usize, end: usize) -> (String, String) {
    (
        text[..start].trim().to_string(),
        text[end..].trim().to_string(),
    )
}

// ── Tier 1: embedded JSON object naming the tool explicitly ──────────────────

static JSON_OBJECT_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:assistant\s+)?\{\s*["']name["']\s*:\s*["'](computer_use|update_workflow)["']\s*,\s*["']parameters["']\s*:\s*\{"#,
    )
    .unwrap()
});

fn extract_json_object(text: &str) -> Option<ExtractedCall> {
    let head = JSON_OBJECT_HEAD.find(text)?;
    let obj_start = head.start() + text[head.start()..].find('{')?;
    let (value, end) = extract_balanced_json(text, obj_start)?;
    let name = value["name"].as_str()?.to_string();
    let params = value.get("parameters")?.clone();
    let (before, after) = split_around(text, head.start(), end);
    Some(ExtractedCall {
        call: make_call(&name, &params, "json"),
        before,
        after,
    })
}

/// Scans a balanced JSON object starting at `start` (a `{`), tracking string
/// literals and escapes so braces inside strings don't end the object.
fn extract_balanced_json(text: &str, start: usize) -> Option<(Value, usize)> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    let value = serde_json::from_str(&text[start..end]).ok()?;
                    return Some((value, end));
                }
            }
            _ => {}
        }
    }
    None
}

// ── Tier 2: workflow update — structurally the most complex, checked early ───

static WORKFLOW_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:update_)?workflow\s*\(\s*\{").unwrap());

fn extract_workflow(text: &str) -> Option<ExtractedCall> {
    let head = WORKFLOW_HEAD.find(text)?;
    let obj_start = head.start() + text[head.start()..].find('{')?;
    let (value, mut end) = extract_balanced_json(text, obj_start)?;
    // Consume the call's closing paren when it directly follows.
    let rest = text[end..].trim_start();
    if rest.starts_with(')') {
        end = text.len() - rest.len() + 1;
    }
    let (before, after) = split_around(text, head.start(), end);
    Some(ExtractedCall {
        call: make_call("update_workflow", &value, "workflow"),
        before,
        after,
    })
}

// ── Tiers 3-5: regex strategy tables, first match wins ───────────────────────

type ArgExtractor = fn(&Captures) -> Option<Value>;

struct SyntaxRule {
    pattern: Regex,
    extract: ArgExtractor,
}

impl SyntaxRule {
    fn new(pattern: &str, extract: ArgExtractor) -> Self {
        Self {
            pattern: Regex::new(pattern).unwrap(),
            extract,
        }
    }
}

fn run_patterns(text: &str, rules: &[SyntaxRule], origin: &str) -> Option<ExtractedCall> {
    for rule in rules {
        let Some(caps) = rule.pattern.captures(text) else {
            continue;
        };
        let Some(args) = (rule.extract)(&caps) else {
            continue;
        };
        let m = caps.get(0).unwrap();
        let (before, after) = split_around(text, m.start(), m.end());
        return Some(ExtractedCall {
            call: make_call("computer_use", &args, origin),
            before,
            after,
        });
    }
    None
}

/// Canonical `computer_use(...)` function syntax, one grammar per action kind.
static COMPUTER_USE_PATTERNS: LazyLock<Vec<SyntaxRule>> = LazyLock::new(|| {
    vec![
        SyntaxRule::new(
            r#"(?i)computer_use\s*\(\s*["'`]screenshot["'`]\s*\)"#,
            |_| Some(json!({"action": "screenshot"})),
        ),
        SyntaxRule::new(
            r#"(?i)computer_use\s*\(\s*["'`]wait["'`]\s*(?:,\s*(\d+))?\s*\)"#,
            extract_wait,
        ),
        SyntaxRule::new(
            r#"(?i)computer_use\s*\(\s*["'`](left_click|double_click|right_click|mouse_move)["'`]\s*,\s*(.+?)\s*\)"#,
            |caps| {
                let action = caps[1].to_lowercase();
                let (x, y) = extract_coordinates(&caps[2])?;
                Some(json!({"action": action, "coordinate": [x, y]}))
            },
        ),
        SyntaxRule::new(
            r#"(?i)computer_use\s*\(\s*["'`]type["'`]\s*,\s*(.+?)\s*\)"#,
            |caps| {
                let text = extract_quoted(&caps[1])?;
                Some(json!({"action": "type", "text": text}))
            },
        ),
        SyntaxRule::new(
            r#"(?i)computer_use\s*\(\s*["'`]key["'`]\s*,\s*(.+?)\s*\)"#,
            |caps| {
                let text = extract_quoted(&caps[1])?;
                Some(json!({"action": "key", "text": text}))
            },
        ),
        SyntaxRule::new(
            r#"(?i)computer_use\s*\(\s*["'`]scroll["'`]\s*,\s*["'`](up|down)["'`]\s*(?:,\s*(\d+))?\s*\)"#,
            extract_scroll,
        ),
    ]
});

/// The same action vocabulary without the `computer_use` wrapper.
static SIMPLE_PATTERNS: LazyLock<Vec<SyntaxRule>> = LazyLock::new(|| {
    vec![
        SyntaxRule::new(r"(?i)\bscreenshot\s*\(\s*\)", |_| {
            Some(json!({"action": "screenshot"}))
        }),
        SyntaxRule::new(
            r"(?i)\b(left_click|click|double_click|right_click|mouse_move)\s*\(\s*(.+?)\s*\)",
            |caps| {
                let action = match caps[1].to_lowercase().as_str() {
                    "click" => "left_click".to_string(),
                    other => other.to_string(),
                };
                let (x, y) = extract_coordinates(&caps[2])?;
                Some(json!({"action": action, "coordinate": [x, y]}))
            },
        ),
        SyntaxRule::new(r"(?i)\btype\s*\(\s*(.+?)\s*\)", |caps| {
            let text = extract_quoted(&caps[1])?;
            Some(json!({"action": "type", "text": text}))
        }),
        SyntaxRule::new(r"(?i)\bkey\s*\(\s*(.+?)\s*\)", |caps| {
            let text = extract_quoted(&caps[1])?;
            Some(json!({"action": "key", "text": text}))
        }),
        SyntaxRule::new(r"(?i)\bwait\s*\(\s*(\d*)\s*\)", extract_wait),
        SyntaxRule::new(
            r#"(?i)\bscroll\s*\(\s*["'`](up|down)["'`]\s*(?:,\s*(\d+))?\s*\)"#,
            extract_scroll,
        ),
    ]
});

/// Natural-language phrasings in the operator's working language (Polish,
/// with English aliases). A multi-locale build would swap this table out.
static NATURAL_PATTERNS: LazyLock<Vec<SyntaxRule>> = LazyLock::new(|| {
    vec![
        SyntaxRule::new(
            r"(?i)(?:zrób|zrobie|zrobię|rob|make|take)\s+(?:a\s+)?screenshot",
            |_| Some(json!({"action": "screenshot"})),
        ),
        SyntaxRule::new(
            r"(?i)(?:kliknij|klikam|klikne|kliknę|click)\s+(?:w\s+|na\s+|at\s+)*(?:współrzędne\s+)?[\[\(]?\s*(\d+)\s*,?\s*(\d+)",
            |caps| {
                let x: i64 = caps[1].parse().ok()?;
                let y: i64 = caps[2].parse().ok()?;
                Some(json!({"action": "left_click", "coordinate": [x, y]}))
            },
        ),
        SyntaxRule::new(
            r#"(?i)(?:wpisz|wpiszę|wpisze|type)\s+["“”](.+?)["“”]"#,
            |caps| Some(json!({"action": "type", "text": &caps[1]})),
        ),
        SyntaxRule::new(
            r#"(?i)(?:naciśnij|nacisnij|press)\s+(?:klawisz\s+)?["“”]?(\w+)["“”]?"#,
            |caps| Some(json!({"action": "key", "text": &caps[1]})),
        ),
        SyntaxRule::new(
            r"(?i)(?:czekaj|poczekaj|wait)\s+(\d+)\s*(?:sekund\w*|seconds?|s)?\b",
            |caps| {
                let seconds: u64 = caps[1].parse().ok()?;
                Some(json!({"action": "wait", "duration": seconds}))
            },
        ),
    ]
});

fn extract_wait(caps: &Captures) -> Option<Value> {
    let duration = caps
        .get(1)
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(1);
    Some(json!({"action": "wait", "duration": duration}))
}

fn extract_scroll(caps: &Captures) -> Option<Value> {
    let direction = caps[1].to_lowercase();
    let amount: i64 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(3);
    let delta_y = if direction == "down" {
        amount * 100
    } else {
        -amount * 100
    };
    Some(json!({"action": "scroll", "delta_y": delta_y}))
}

static COORD_BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\s*(\d+)\s*,\s*(\d+)\s*\]").unwrap());
static COORD_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*,\s*(\d+)").unwrap());
static COORD_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*(\d+)\s*,\s*(\d+)\s*\)").unwrap());

fn extract_coordinates(text: &str) -> Option<(i64, i64)> {
    for re in [&*COORD_BRACKETED, &*COORD_BARE, &*COORD_PAREN] {
        if let Some(caps) = re.captures(text) {
            return Some((caps[1].parse().ok()?, caps[2].parse().ok()?));
        }
    }
    None
}

static QUOTED_DOUBLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\\]*(?:\\.[^"\\]*)*)""#).unwrap());
static QUOTED_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^'\\]*(?:\\.[^'\\]*)*)'").unwrap());
static QUOTED_BACKTICK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\\]*(?:\\.[^`\\]*)*)`").unwrap());

fn extract_quoted(text: &str) -> Option<String> {
    for re in [&*QUOTED_DOUBLE, &*QUOTED_SINGLE, &*QUOTED_BACKTICK] {
        if let Some(caps) = re.captures(text) {
            return Some(caps[1].to_string());
        }
    }
    None
}
