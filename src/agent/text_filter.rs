//! Removal of machine syntax from user-facing narration.
//!
//! Whatever the system prompt says, models still leak JSON payloads,
//! pseudo-function calls, and the finish sentinel into their prose. The
//! filter here scrubs all of that before text reaches the client, and the
//! streaming wrapper re-runs it over the whole accumulated text on every
//! delta so fragments split across chunk boundaries are still caught.

use std::sync::LazyLock;

use regex::Regex;

struct ScrubRule {
    pattern: Regex,
    replacement: &'static str,
}

impl ScrubRule {
    fn new(pattern: &str, replacement: &'static str) -> Self {
        Self {
            pattern: Regex::new(pattern).unwrap(),
            replacement,
        }
    }
}

/// Applied in order; order matters (brace payloads go first so later
/// keyword rules see less noise).
static SCRUB_RULES: LazyLock<Vec<ScrubRule>> = LazyLock::new(|| {
    vec![
        // Brace-delimited payloads, closed or cut off at end of line.
        ScrubRule::new(r"(?m)\{[^\}]*$", " "),
        ScrubRule::new(r"\{[^\}]*\}", " "),
        ScrubRule::new(r"(?m)\{.*$", " "),
        // Complete pseudo-function calls.
        ScrubRule::new(r"(?i)computer_use\s*\([^)]*\)", " "),
        ScrubRule::new(r"(?i)bash\s*\([^)]*\)", " "),
        ScrubRule::new(r"(?i)update_workflow\s*\([^)]*\)", " "),
        ScrubRule::new(r"(?i)screenshot\s*\([^)]*\)", " "),
        // Partial calls cut off before the closing paren.
        ScrubRule::new(r"(?im)computer_use\s*\(.*$", " "),
        ScrubRule::new(r"(?im)bash\s*\(.*$", " "),
        ScrubRule::new(r"(?im)update_workflow\s*\(.*$", " "),
        // Standalone tool keywords.
        ScrubRule::new(r"(?i)\bcomputer_use\b", " "),
        ScrubRule::new(r"(?i)\bupdate_workflow\b", " "),
        ScrubRule::new(r"(?im)\bcomputer\s*$", " "),
        // Quoted key/value fragments typical of leaked JSON.
        ScrubRule::new(r#"["'][a-zA-Z_]+["']\s*:\s*["'][^"']*["']"#, " "),
        ScrubRule::new(r#"["'][a-zA-Z_]+["']\s*:"#, " "),
        // Coordinate pairs and cut-off arrays.
        ScrubRule::new(r"\[\s*\d+\s*,\s*\d+\s*\]", " "),
        ScrubRule::new(r"\[\s*\d+[^\]]*$", " "),
        // Bare JSON field names that survived the brace rules.
        ScrubRule::new(r#"(?i)["']?name["']?\s*:"#, " "),
        ScrubRule::new(r#"(?i)["']?parameters["']?\s*:"#, " "),
        ScrubRule::new(r#"(?i)["']?action["']?\s*:"#, " "),
        ScrubRule::new(r#"(?i)["']?coordinate["']?\s*:"#, " "),
        // The finish sentinel and any streamed prefix of it.
        ScrubRule::new(r"(?i)!isfinish", " "),
        ScrubRule::new(r"(?i)!isf[a-z]*", " "),
        ScrubRule::new(r"(?i)!is[a-z]*", " "),
        // Lines that open with structural syntax are machine output.
        ScrubRule::new(r#"(?m)^[\{\["'].*"#, " "),
        // Role markers and stray braces.
        ScrubRule::new(r"(?i)\{assistant", " "),
        ScrubRule::new(r"(?i)\{user", " "),
        ScrubRule::new(r"(?m)\{\s*$", " "),
        ScrubRule::new(r"(?m)^\s*\{", " "),
        ScrubRule::new(r"\s+\{\s+", " "),
        // Whitespace normalization.
        ScrubRule::new(r"[ \t]{2,}", " "),
        ScrubRule::new(r"\n\s*\n\s*\n", "\n\n"),
    ]
});

/// Strips tool syntax, leaked JSON, and the finish sentinel from text.
pub fn remove_technical_syntax(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut cleaned = text.to_string();
    for rule in SCRUB_RULES.iter() {
        cleaned = rule.pattern.replace_all(&cleaned, rule.replacement).into_owned();
    }
    cleaned.trim().to_string()
}

/// Incremental wrapper around [`remove_technical_syntax`] for streamed
/// content. Re-filters the full accumulated text on every delta and emits
/// only the suffix not yet sent, so syntax that arrives split across
/// deltas never reaches the client even partially.
#[derive(Debug, Default)]
pub struct StreamTextFilter {
    raw: String,
    sent_len: usize,
}

impl StreamTextFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete unfiltered text accumulated so far.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Absorbs one content delta; returns the newly emittable filtered
    /// suffix, if any. The filtered text only ever grows or stays put
    /// between calls, never both shrinks and re-grows within one.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.raw.push_str(delta);
        let filtered = remove_technical_syntax(&self.raw);
        if filtered.len() <= self.sent_len {
            return None;
        }
        // A later delta can rewrite earlier filtered output (a brace opens
        // retroactively swallowing text). Back off to a char boundary and
        // emit from there; slight over-emission beats corrupt UTF-8.
        let mut start = self.sent_len;
        while start > 0 && !filtered.is_char_boundary(start) {
            start -= 1;
        }
        let fragment = filtered[start..].to_string();
        self.sent_len = filtered.len();
        if fragment.is_empty() {
            None
        } else {
            Some(fragment)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_prose_is_untouched() {
        assert_eq!(
            remove_technical_syntax("Sprawdzam pogodę w Warszawie."),
            "Sprawdzam pogodę w Warszawie."
        );
    }

    #[test]
    fn json_payload_is_scrubbed() {
        let out = remove_technical_syntax(
            r#"Klikam w pasek adresu. {"action": "left_click", "coordinate": [512, 50]}"#,
        );
        assert_eq!(out, "Klikam w pasek adresu.");
    }

    #[test]
    fn unterminated_json_is_scrubbed_to_end_of_line() {
        let out = remove_technical_syntax("Robię zrzut {\"action\": \"scre");
        assert_eq!(out, "Robię zrzut");
    }

    #[test]
    fn function_call_syntax_is_scrubbed() {
        let out = remove_technical_syntax(
            "Teraz computer_use(\"left_click\", [512, 384]) i czekam.",
        );
        assert_eq!(out, "Teraz i czekam.");
    }

    #[test]
    fn finish_sentinel_and_prefixes_are_scrubbed() {
        assert_eq!(remove_technical_syntax("Gotowe! !isfinish"), "Gotowe!");
        assert_eq!(remove_technical_syntax("Gotowe! !isf"), "Gotowe!");
        assert_eq!(remove_technical_syntax("Gotowe! !isfini"), "Gotowe!");
    }

    #[test]
    fn fully_technical_text_filters_to_empty() {
        assert_eq!(
            remove_technical_syntax(r#"{"name": "computer_use", "parameters": {"#),
            ""
        );
    }

    #[test]
    fn streaming_filter_emits_only_new_suffix() {
        let mut f = StreamTextFilter::new();
        assert_eq!(f.push("Sprawdzam ").as_deref(), Some("Sprawdzam"));
        assert_eq!(f.push("pogodę.").as_deref(), Some(" pogodę."));
        assert_eq!(f.raw(), "Sprawdzam pogodę.");
    }

    #[test]
    fn streaming_filter_suppresses_json_split_across_deltas() {
        let mut f = StreamTextFilter::new();
        let mut out = String::new();
        for delta in ["Klikam. ", "{\"action\"", ": \"left_click\"", "}"] {
            if let Some(s) = f.push(delta) {
                out.push_str(&s);
            }
        }
        assert_eq!(out, "Klikam.");
        assert!(f.raw().contains("left_click"));
    }

    #[test]
    fn streaming_filter_suppresses_sentinel_split_across_deltas() {
        let mut f = StreamTextFilter::new();
        let mut out = String::new();
        for delta in ["Gotowe! ", "!is", "fin", "ish"] {
            if let Some(s) = f.push(delta) {
                out.push_str(&s);
            }
        }
        assert_eq!(out, "Gotowe!");
    }
}
