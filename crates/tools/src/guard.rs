//! Placeholder guard for communication tools.
//!
//! Text a human will read must not go out with template holes in it:
//! `[TODO]`, `[NAME]`, `[insert date here]`, `{{first_name}}`, `<RECIPIENT>`.

use regex_lite::Regex;
use serde_json::Value;
use switchyard_core::SignalClassifier;

const PATTERNS: &[&str] = &[
    r"(?i)\[\s*(todo|tbd|tk|name|date|time|company|recipient|email|phone|address|placeholder|insert[^\]]*|your [^\]]*)\s*\]",
    // Multi-word caps only; single tags like [OK] or [PDF] are ordinary text.
    r"\[[A-Z][A-Z0-9]*(?:[_ ][A-Z0-9]+){1,6}\]",
    r"\{\{[^{}]*\}\}",
    r"<[A-Z][A-Z0-9_ ]{1,40}>",
];

/// An unfilled placeholder found in outgoing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub token: String,
}

pub struct PlaceholderGuard {
    patterns: Vec<Regex>,
}

impl PlaceholderGuard {
    pub fn new() -> Self {
        Self {
            patterns: PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect(),
        }
    }

    /// First placeholder in any string value of `args`, searched depth-first.
    pub fn check_args(&self, args: &Value) -> Option<Placeholder> {
        match args {
            Value::String(s) => self.classify(s),
            Value::Array(items) => items.iter().find_map(|v| self.check_args(v)),
            Value::Object(map) => map.values().find_map(|v| self.check_args(v)),
            _ => None,
        }
    }
}

impl Default for PlaceholderGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalClassifier<Placeholder> for PlaceholderGuard {
    fn classify(&self, text: &str) -> Option<Placeholder> {
        self.patterns
            .iter()
            .filter_map(|re| re.find(text))
            .min_by_key(|m| m.start())
            .map(|m| Placeholder {
                token: m.as_str().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_bracket_placeholders() {
        let g = PlaceholderGuard::new();
        assert_eq!(g.classify("Hi [NAME], see you").unwrap().token, "[NAME]");
        assert!(g.classify("Meeting on [insert date here]").is_some());
        assert!(g.classify("Status: [todo]").is_some());
        assert!(g.classify("Regards, [Your Name]").is_some());
        assert!(g.classify("Dear [COMPANY NAME] team").is_some());
    }

    #[test]
    fn detects_template_and_angle_tokens() {
        let g = PlaceholderGuard::new();
        assert_eq!(
            g.classify("Hello {{first_name}}!").unwrap().token,
            "{{first_name}}"
        );
        assert_eq!(g.classify("Send to <RECIPIENT>").unwrap().token, "<RECIPIENT>");
    }

    #[test]
    fn ordinary_text_passes() {
        let g = PlaceholderGuard::new();
        assert!(g.classify("The build is green [1/3 done].").is_none());
        assert!(g.classify("Use <b>bold</b> for emphasis").is_none());
        assert!(g.classify("Array index [i] is fine").is_none());
        assert!(g.classify("All set, talk soon.").is_none());
    }

    #[test]
    fn short_caps_tags_are_not_placeholders() {
        let g = PlaceholderGuard::new();
        assert!(g.classify("[OK] deploy finished").is_none());
        assert!(g.classify("Attached the report [PDF]").is_none());
        assert!(g.classify("Shipping to [US] and [EU] only").is_none());
        assert!(g.classify("[WARN] disk at 91%").is_none());

        assert_eq!(g.classify("Hi [NAME]").unwrap().token, "[NAME]");
        assert_eq!(
            g.classify("Dear [RECIPIENT_NAME],").unwrap().token,
            "[RECIPIENT_NAME]"
        );
        assert!(g.classify("See you on [DATE]").is_some());
    }

    #[test]
    fn scans_nested_args() {
        let g = PlaceholderGuard::new();
        let args = json!({"recipient": "ops", "parts": ["ok", "ping [NAME]"]});
        assert_eq!(g.check_args(&args).unwrap().token, "[NAME]");
        assert!(g.check_args(&json!({"message": "done"})).is_none());
    }

    #[test]
    fn earliest_match_reported() {
        let g = PlaceholderGuard::new();
        let hit = g.classify("{{greeting}} [NAME]").unwrap();
        assert_eq!(hit.token, "{{greeting}}");
    }
}
