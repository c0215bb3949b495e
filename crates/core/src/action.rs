use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The closed set of browser operations the model may choose per step.
///
/// The wire shape is one flat JSON object tagged by `action`, e.g.
/// `{"action":"click","selector":"#save","description":"...","reasoning":"..."}`.
/// Sibling fields the enum does not know (description, reasoning) are
/// ignored here and picked up by [`Decision::parse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    /// Bypasses overlays by invoking the element's click handler directly.
    /// The documented recovery path after a "blocked by overlay" click error.
    ForceClick {
        selector: String,
    },
    Fill {
        selector: String,
        value: String,
    },
    SelectOption {
        selector: String,
        value: String,
    },
    /// MUI-style dropdowns open on pointerdown, not click.
    SelectDropdown {
        selector: String,
        #[serde(rename = "optionText")]
        option_text: String,
    },
    VerifyText {
        value: String,
    },
    VerifyNoError,
    Wait {
        value: WaitValue,
    },
    PressKey {
        key: String,
    },
    Scroll {
        #[serde(default)]
        direction: Option<ScrollTarget>,
        #[serde(default)]
        selector: Option<String>,
    },
    Hover {
        selector: String,
    },
    JsEval {
        code: String,
    },
    Screenshot,
    Done {
        summary: String,
    },
    Fail {
        reason: String,
    },
}

/// Shape-discriminated wait target: a number means milliseconds, the string
/// "network_idle" means wait for network quiescence, any other string means
/// wait for that text to become visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitValue {
    Millis(u64),
    Label(String),
}

impl WaitValue {
    pub fn is_network_idle(&self) -> bool {
        matches!(self, WaitValue::Label(s) if matches!(s.as_str(), "network_idle" | "networkidle" | "network-idle"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollTarget {
    Up,
    Down,
}

impl ActionKind {
    /// Terminal actions stop the loop; they are handled by the orchestrator,
    /// never by the executor.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionKind::Done { .. } | ActionKind::Fail { .. })
    }

    /// Tag name as it appears on the wire, for logs and events.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Navigate { .. } => "navigate",
            ActionKind::Click { .. } => "click",
            ActionKind::ForceClick { .. } => "force_click",
            ActionKind::Fill { .. } => "fill",
            ActionKind::SelectOption { .. } => "select_option",
            ActionKind::SelectDropdown { .. } => "select_dropdown",
            ActionKind::VerifyText { .. } => "verify_text",
            ActionKind::VerifyNoError => "verify_no_error",
            ActionKind::Wait { .. } => "wait",
            ActionKind::PressKey { .. } => "press_key",
            ActionKind::Scroll { .. } => "scroll",
            ActionKind::Hover { .. } => "hover",
            ActionKind::JsEval { .. } => "js_eval",
            ActionKind::Screenshot => "screenshot",
            ActionKind::Done { .. } => "done",
            ActionKind::Fail { .. } => "fail",
        }
    }
}

/// One decided action plus the model's own framing of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Decision {
    /// Parse raw model output into a Decision.
    ///
    /// Strips markdown code fences if present, extracts the first balanced
    /// `{...}` block, and deserializes it. Anything that does not yield
    /// exactly one known action is a decision failure — the caller halts the
    /// session rather than guessing.
    pub fn parse(raw: &str) -> Result<Decision> {
        let stripped = strip_code_fences(raw);
        let block = extract_json_block(stripped).ok_or_else(|| {
            Error::Decision(format!(
                "no JSON object in model output: {}",
                crate::safe_truncate(raw, 200)
            ))
        })?;

        let mut decision: Decision = serde_json::from_str(block)
            .map_err(|e| Error::Decision(format!("malformed action JSON ({e}): {block}")))?;

        if decision.description.is_empty() {
            decision.description = decision.kind.name().to_string();
        }
        Ok(decision)
    }
}

/// Drop a leading/trailing markdown fence (```/```json) if the output is
/// wrapped in one; otherwise return the input unchanged.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return raw;
    };
    // Skip the language tag on the opening fence line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    match body.rfind("```") {
        Some(idx) => &body[..idx],
        None => body,
    }
}

/// Find the first balanced `{...}` block, respecting JSON string literals
/// and escapes.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_action_object() {
        let d = Decision::parse(
            r##"{"action":"click","selector":"#save","description":"Save the form"}"##,
        )
        .unwrap();
        assert_eq!(
            d.kind,
            ActionKind::Click {
                selector: "#save".into()
            }
        );
        assert_eq!(d.description, "Save the form");
        assert!(d.reasoning.is_none());
    }

    #[test]
    fn parses_fenced_output_with_language_tag() {
        let raw = "```json\n{\"action\":\"navigate\",\"url\":\"https://example.com\"}\n```";
        let d = Decision::parse(raw).unwrap();
        assert_eq!(
            d.kind,
            ActionKind::Navigate {
                url: "https://example.com".into()
            }
        );
        // Missing description falls back to the tag name.
        assert_eq!(d.description, "navigate");
    }

    #[test]
    fn extracts_first_balanced_block_from_prose() {
        let raw = "I will click the button now. {\"action\":\"done\",\"summary\":\"All tabs verified\"} Hope that helps!";
        let d = Decision::parse(raw).unwrap();
        assert!(d.kind.is_terminal());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let raw = r#"{"action":"js_eval","code":"JSON.parse('{\"a\":1}')"}"#;
        let d = Decision::parse(raw).unwrap();
        assert!(matches!(d.kind, ActionKind::JsEval { .. }));
    }

    #[test]
    fn unknown_action_tag_is_a_decision_failure() {
        let err = Decision::parse(r##"{"action":"explode","selector":"#x"}"##).unwrap_err();
        assert!(matches!(err, Error::Decision(_)));
    }

    #[test]
    fn prose_without_json_is_a_decision_failure() {
        let err = Decision::parse("Sure! Let me think about what to do next.").unwrap_err();
        assert!(matches!(err, Error::Decision(_)));
    }

    #[test]
    fn wait_value_shapes() {
        let d = Decision::parse(r#"{"action":"wait","value":2500}"#).unwrap();
        assert_eq!(
            d.kind,
            ActionKind::Wait {
                value: WaitValue::Millis(2500)
            }
        );

        let d = Decision::parse(r#"{"action":"wait","value":"network_idle"}"#).unwrap();
        match d.kind {
            ActionKind::Wait { value } => assert!(value.is_network_idle()),
            other => panic!("unexpected kind: {other:?}"),
        }

        let d = Decision::parse(r#"{"action":"wait","value":"Welcome back"}"#).unwrap();
        match d.kind {
            ActionKind::Wait { value } => assert!(!value.is_network_idle()),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn select_dropdown_uses_camel_option_text() {
        let d = Decision::parse(
            r#"{"action":"select_dropdown","selector":".MuiSelect-root","optionText":"Europe"}"#,
        )
        .unwrap();
        assert_eq!(
            d.kind,
            ActionKind::SelectDropdown {
                selector: ".MuiSelect-root".into(),
                option_text: "Europe".into()
            }
        );
    }

    #[test]
    fn terminal_detection() {
        assert!(ActionKind::Done { summary: "s".into() }.is_terminal());
        assert!(ActionKind::Fail { reason: "r".into() }.is_terminal());
        assert!(!ActionKind::Screenshot.is_terminal());
    }
}
