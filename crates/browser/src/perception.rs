//! Page perception: one JS round trip distills the live DOM into a bounded
//! text snapshot the decision model can read, plus a best-effort screenshot.

use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use webprobe_core::{safe_truncate, Result};

use crate::session::Browser;

/// Element budget for the generic walk; pages beyond this are truncated.
const MAX_ELEMENTS: usize = 1200;
/// Hard cap on the formatted snapshot, in characters.
const MAX_SNAPSHOT_CHARS: usize = 24_000;
/// Labels listed per interactive category before "(+N more)".
const MAX_SUMMARY_LABELS: usize = 25;

/// What the model sees for one step.
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    /// Formatted, bounded snapshot text.
    pub text: String,
    /// Base64 PNG, when capture succeeded.
    pub screenshot_b64: Option<String>,
    /// Where the PNG was persisted, when capture succeeded.
    pub screenshot_path: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    dialogs: Vec<String>,
    #[serde(default)]
    summary: RawSummary,
    #[serde(default)]
    elements: Vec<RawElement>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize, Default)]
struct RawSummary {
    #[serde(default)]
    tabs: Vec<String>,
    #[serde(default)]
    buttons: Vec<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    dropdowns: Vec<String>,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    pagination: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    #[serde(default)]
    tag: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    test_id: String,
    #[serde(default)]
    aria_label: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    input_type: String,
    #[serde(default)]
    placeholder: String,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    selected: bool,
    #[serde(default)]
    expanded: bool,
}

/// Walker injected via Runtime.evaluate. Dialogs are extracted separately
/// since an open modal blocks everything else on the page.
const SNAPSHOT_JS: &str = r#"
(() => {
  const MAX_ELEMENTS = 1200;
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','META','LINK','HEAD','TEMPLATE',
    'SVG','PATH','G','CIRCLE','RECT','LINE','POLYGON','POLYLINE','ELLIPSE','DEFS','USE']);
  const clip = (s, n) => { s = (s || '').replace(/\s+/g, ' ').trim(); return s.length > n ? s.slice(0, n) + '…' : s; };
  const visible = (el) => {
    const r = el.getBoundingClientRect();
    if (r.width === 0 && r.height === 0) return false;
    const st = getComputedStyle(el);
    return st.display !== 'none' && st.visibility !== 'hidden';
  };
  const label = (el) => clip(el.getAttribute('aria-label') || el.innerText || el.value || el.placeholder || '', 60);

  const dialogs = [];
  for (const d of document.querySelectorAll('[role=dialog], [role=alertdialog], dialog[open], .MuiDialog-root, .MuiDrawer-root')) {
    if (visible(d)) dialogs.push(clip(d.innerText, 600));
  }

  const dedup = (arr) => [...new Set(arr.filter(Boolean))];
  const summary = {
    tabs: dedup([...document.querySelectorAll('[role=tab]')].filter(visible).map(label)),
    buttons: dedup([...document.querySelectorAll('button, [role=button], input[type=submit]')].filter(visible).map(label)),
    links: dedup([...document.querySelectorAll('a[href]')].filter(visible).map(label)),
    dropdowns: dedup([...document.querySelectorAll('select, [role=combobox], [role=listbox]')].filter(visible).map(label)),
    inputs: dedup([...document.querySelectorAll('input:not([type=hidden]), textarea')].filter(visible)
      .map(el => clip(el.getAttribute('aria-label') || el.placeholder || el.name || el.id || '', 60))),
    pagination: dedup([...document.querySelectorAll('[aria-label*=page i], .MuiPagination-root button, [class*=pagination] button')].filter(visible).map(label)),
  };

  const elements = [];
  let truncated = false;
  const walker = document.createTreeWalker(document.body || document.documentElement, NodeFilter.SHOW_ELEMENT);
  let node = walker.currentNode;
  while (node) {
    if (elements.length >= MAX_ELEMENTS) { truncated = true; break; }
    const tag = node.tagName;
    if (!SKIP.has(tag) && node.matches &&
        node.matches('a, button, input, textarea, select, option, label, h1, h2, h3, h4, th, td, li, [role], [data-testid], [onclick], [tabindex]') &&
        visible(node)) {
      elements.push({
        tag: tag.toLowerCase(),
        text: clip(node.innerText || node.value || '', 120),
        id: node.id || '',
        testId: node.getAttribute('data-testid') || '',
        ariaLabel: node.getAttribute('aria-label') || '',
        role: node.getAttribute('role') || '',
        inputType: node.getAttribute('type') || '',
        placeholder: node.getAttribute('placeholder') || '',
        disabled: node.disabled === true || node.getAttribute('aria-disabled') === 'true',
        selected: node.getAttribute('aria-selected') === 'true' || node.selected === true,
        expanded: node.getAttribute('aria-expanded') === 'true',
      });
    }
    node = walker.nextNode();
  }

  return JSON.stringify({ url: location.href, title: document.title, dialogs, summary, elements, truncated });
})()
"#;

/// Distill the current page into a bounded observation, persisting the
/// screenshot as `step-<n>.png` when capture succeeds.
pub async fn perceive(browser: &Browser, step: u32, results_dir: &Path) -> Result<PageSnapshot> {
    let result = browser.cdp.evaluate_js(SNAPSHOT_JS).await?;
    let raw = parse_walker_value(&result["result"]["value"]);

    let text = format_snapshot(&raw);
    debug!(
        url = %raw.url,
        elements = raw.elements.len(),
        dialogs = raw.dialogs.len(),
        chars = text.len(),
        "Page snapshot captured"
    );

    // Screenshot is best-effort and never fails the step.
    let (screenshot_b64, screenshot_path) = match browser.cdp.screenshot().await {
        Ok(b64) => {
            let path = results_dir.join(format!("step-{step}.png"));
            match base64::engine::general_purpose::STANDARD.decode(&b64) {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::write(&path, bytes).await {
                        warn!("failed to persist screenshot: {}", e);
                        (Some(b64), None)
                    } else {
                        (Some(b64), Some(path))
                    }
                }
                Err(e) => {
                    warn!("screenshot base64 decode failed: {}", e);
                    (None, None)
                }
            }
        }
        Err(e) => {
            warn!("screenshot capture failed: {}", e);
            (None, None)
        }
    };

    Ok(PageSnapshot {
        url: raw.url.clone(),
        title: raw.title.clone(),
        text,
        screenshot_b64,
        screenshot_path,
    })
}

/// A walker failure degrades the observation to an empty snapshot instead
/// of failing the step, but never silently.
fn parse_walker_value(value: &serde_json::Value) -> RawSnapshot {
    match value.as_str() {
        Some(s) => match serde_json::from_str(s) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("page walker returned unparseable JSON: {}", e);
                RawSnapshot::default()
            }
        },
        None => {
            warn!("page walker returned no string result");
            RawSnapshot::default()
        }
    }
}

fn format_snapshot(raw: &RawSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!("URL: {}\nTITLE: {}\n", raw.url, raw.title));

    // Open dialogs come first: they block everything else on the page.
    if !raw.dialogs.is_empty() {
        out.push_str("\n!!! OPEN DIALOG/MODAL (must be addressed before other interaction) !!!\n");
        for d in &raw.dialogs {
            out.push_str(&format!("  [dialog] {}\n", safe_truncate(d, 600)));
        }
    }

    out.push_str("\n== INTERACTIVE SUMMARY ==\n");
    push_summary_line(&mut out, "tabs", &raw.summary.tabs);
    push_summary_line(&mut out, "buttons", &raw.summary.buttons);
    push_summary_line(&mut out, "links", &raw.summary.links);
    push_summary_line(&mut out, "dropdowns", &raw.summary.dropdowns);
    push_summary_line(&mut out, "inputs", &raw.summary.inputs);
    push_summary_line(&mut out, "pagination", &raw.summary.pagination);

    out.push_str("\n== ELEMENTS ==\n");
    for el in raw.elements.iter().take(MAX_ELEMENTS) {
        out.push_str(&format_element(el));
        if out.len() >= MAX_SNAPSHOT_CHARS {
            break;
        }
    }
    if raw.truncated {
        out.push_str("… (element walk truncated)\n");
    }

    // Truncation beats completeness.
    if out.chars().count() > MAX_SNAPSHOT_CHARS {
        let mut clipped = safe_truncate(&out, MAX_SNAPSHOT_CHARS).to_string();
        clipped.push_str("\n… (snapshot truncated)");
        return clipped;
    }
    out
}

fn push_summary_line(out: &mut String, name: &str, labels: &[String]) {
    if labels.is_empty() {
        return;
    }
    let shown: Vec<&str> = labels
        .iter()
        .take(MAX_SUMMARY_LABELS)
        .map(|s| s.as_str())
        .collect();
    let suffix = if labels.len() > MAX_SUMMARY_LABELS {
        format!(" (+{} more)", labels.len() - MAX_SUMMARY_LABELS)
    } else {
        String::new()
    };
    out.push_str(&format!(
        "{} ({}): {}{}\n",
        name,
        labels.len(),
        shown.join(" | "),
        suffix
    ));
}

fn format_element(el: &RawElement) -> String {
    let mut line = format!("<{}>", el.tag);
    if !el.text.is_empty() {
        line.push_str(&format!(" \"{}\"", safe_truncate(&el.text, 120)));
    }
    if !el.id.is_empty() {
        line.push_str(&format!(" id={}", el.id));
    }
    if !el.test_id.is_empty() {
        line.push_str(&format!(" testid={}", el.test_id));
    }
    if !el.aria_label.is_empty() {
        line.push_str(&format!(" aria-label=\"{}\"", safe_truncate(&el.aria_label, 60)));
    }
    if !el.role.is_empty() {
        line.push_str(&format!(" role={}", el.role));
    }
    if !el.input_type.is_empty() {
        line.push_str(&format!(" type={}", el.input_type));
    }
    if !el.placeholder.is_empty() {
        line.push_str(&format!(" placeholder=\"{}\"", safe_truncate(&el.placeholder, 60)));
    }
    if el.disabled {
        line.push_str(" [disabled]");
    }
    if el.selected {
        line.push_str(" [selected]");
    }
    if el.expanded {
        line.push_str(" [expanded]");
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, text: &str) -> RawElement {
        RawElement {
            tag: tag.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unparseable_walker_output_degrades_to_an_empty_snapshot() {
        for value in [
            serde_json::json!("not json at all"),
            serde_json::json!({"unexpected": "object"}),
            serde_json::Value::Null,
        ] {
            let raw = parse_walker_value(&value);
            assert!(raw.url.is_empty());
            assert!(raw.elements.is_empty());
            let text = format_snapshot(&raw);
            assert!(text.contains("URL:"));
            assert!(text.contains("== ELEMENTS =="));
        }
    }

    #[test]
    fn walker_json_string_parses_into_a_snapshot() {
        let value = serde_json::json!(
            r#"{"url":"https://app.test/","title":"App","dialogs":[],"summary":{},"elements":[{"tag":"button","text":"Save"}],"truncated":false}"#
        );
        let raw = parse_walker_value(&value);
        assert_eq!(raw.url, "https://app.test/");
        assert_eq!(raw.elements.len(), 1);
        assert_eq!(raw.elements[0].text, "Save");
    }

    #[test]
    fn dialogs_are_listed_before_elements() {
        let raw = RawSnapshot {
            url: "https://app.test/".to_string(),
            title: "App".to_string(),
            dialogs: vec!["Confirm publish?".to_string()],
            elements: vec![element("button", "Publish")],
            ..Default::default()
        };
        let text = format_snapshot(&raw);
        let dialog_pos = text.find("OPEN DIALOG").unwrap();
        let elements_pos = text.find("== ELEMENTS ==").unwrap();
        assert!(dialog_pos < elements_pos);
        assert!(text.contains("Confirm publish?"));
    }

    #[test]
    fn snapshot_is_bounded_regardless_of_page_size() {
        let raw = RawSnapshot {
            elements: (0..5_000)
                .map(|i| element("td", &format!("cell {} {}", i, "x".repeat(110))))
                .collect(),
            truncated: true,
            ..Default::default()
        };
        let text = format_snapshot(&raw);
        assert!(text.chars().count() <= MAX_SNAPSHOT_CHARS + 40);
        assert!(text.contains("truncated"));
    }

    #[test]
    fn summary_caps_label_list() {
        let raw = RawSnapshot {
            summary: RawSummary {
                buttons: (0..40).map(|i| format!("btn{i}")).collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        let text = format_snapshot(&raw);
        assert!(text.contains("buttons (40)"));
        assert!(text.contains("(+15 more)"));
    }

    #[test]
    fn element_line_records_state_flags() {
        let el = RawElement {
            tag: "button".to_string(),
            text: "Save".to_string(),
            test_id: "save-btn".to_string(),
            disabled: true,
            ..Default::default()
        };
        let line = format_element(&el);
        assert!(line.contains("<button>"));
        assert!(line.contains("testid=save-btn"));
        assert!(line.contains("[disabled]"));
    }
}
