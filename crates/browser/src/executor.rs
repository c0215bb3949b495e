//! Maps decided actions onto concrete CDP operations.
//!
//! Target resolution tries an ordered strategy list: CSS selector first,
//! then data-testid, then exact visible text. Mutating actions pass through
//! the destructive-action deny-list before anything touches the page.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use webprobe_core::{safe_truncate, ActionKind, Error, Result, ScrollTarget, WaitValue};

use crate::safety;
use crate::session::Browser;

const NAVIGATE_TIMEOUT: Duration = Duration::from_secs(15);
const TEXT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_EXPLICIT_WAIT_MS: u64 = 30_000;

/// Selectors that indicate a page-visible error state.
const ERROR_SELECTORS: &str = ".MuiAlert-standardError, .MuiAlert-filledError, \
     .MuiAlert-outlinedError, [role=alert], .Mui-error, .error-message, \
     [class*=errorBanner], [class*=error-text]";

/// Execution result. `Skipped` is a soft outcome: the step completes
/// without error even though nothing ran.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Completed(String),
    Skipped(String),
}

/// JS prelude defining the ordered target-resolution strategies.
const LOCATOR_JS: &str = r#"
const __visible = (el) => {
  const r = el.getBoundingClientRect();
  return r.width > 0 || r.height > 0;
};
const __find = (target) => {
  try { const el = document.querySelector(target); if (el) return el; } catch (e) {}
  try {
    const el = document.querySelector('[data-testid=' + JSON.stringify(target) + ']');
    if (el) return el;
  } catch (e) {}
  const candidates = document.querySelectorAll(
    'button, a, [role=button], [role=tab], [role=menuitem], [role=option], label, th, td, li, span, p, h1, h2, h3, div');
  for (const el of candidates) {
    if (__visible(el) && el.innerText && el.innerText.trim() === target) return el;
  }
  return null;
};
"#;

/// Execute one non-terminal action against the page.
pub async fn execute(browser: &Browser, kind: &ActionKind) -> Result<ExecOutcome> {
    if let Some(term) = deny_check(kind) {
        warn!(
            action = kind.name(),
            matched = term,
            "Skipping destructive action (deny-list match)"
        );
        return Ok(ExecOutcome::Skipped(format!(
            "action skipped: target matches destructive-action deny-list term '{term}'"
        )));
    }

    debug!(action = kind.name(), "Executing action");
    match kind {
        ActionKind::Navigate { url } => navigate(browser, url).await,
        ActionKind::Click { selector } => click(browser, selector).await,
        ActionKind::ForceClick { selector } => force_click(browser, selector).await,
        ActionKind::Fill { selector, value } => fill(browser, selector, value).await,
        ActionKind::SelectOption { selector, value } => {
            select_option(browser, selector, value).await
        }
        ActionKind::SelectDropdown {
            selector,
            option_text,
        } => select_dropdown(browser, selector, option_text).await,
        ActionKind::VerifyText { value } => verify_text(browser, value).await,
        ActionKind::VerifyNoError => verify_no_error(browser).await,
        ActionKind::Wait { value } => wait(browser, value).await,
        ActionKind::PressKey { key } => press_key(browser, key).await,
        ActionKind::Scroll {
            direction,
            selector,
        } => scroll(browser, *direction, selector.as_deref()).await,
        ActionKind::Hover { selector } => hover(browser, selector).await,
        ActionKind::JsEval { code } => js_eval(browser, code).await,
        ActionKind::Screenshot => Ok(ExecOutcome::Completed(
            "fresh screenshot will be attached to the next observation".to_string(),
        )),
        ActionKind::Done { .. } | ActionKind::Fail { .. } => Err(Error::Action(
            "terminal actions are handled by the session loop, not the executor".to_string(),
        )),
    }
}

/// Deny-list check over the fields a destructive action would travel in.
/// Read-only actions (verifications, waits, key presses) are exempt.
pub fn deny_check(kind: &ActionKind) -> Option<&'static str> {
    match kind {
        ActionKind::Navigate { url } => safety::deny_listed(url),
        ActionKind::Click { selector }
        | ActionKind::ForceClick { selector }
        | ActionKind::Hover { selector } => safety::deny_listed(selector),
        ActionKind::Fill { selector, value } => {
            safety::deny_listed(selector).or_else(|| safety::deny_listed(value))
        }
        ActionKind::SelectOption { selector, value } => {
            safety::deny_listed(selector).or_else(|| safety::deny_listed(value))
        }
        ActionKind::SelectDropdown {
            selector,
            option_text,
        } => safety::deny_listed(selector).or_else(|| safety::deny_listed(option_text)),
        ActionKind::JsEval { code } => safety::deny_listed(code),
        _ => None,
    }
}

async fn navigate(browser: &Browser, url: &str) -> Result<ExecOutcome> {
    info!(url = %url, "Navigating");
    browser.cdp.navigate(url).await?;
    wait_for_document_ready(browser, NAVIGATE_TIMEOUT).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(ExecOutcome::Completed(format!("navigated to {url}")))
}

async fn click(browser: &Browser, selector: &str) -> Result<ExecOutcome> {
    let expr = format!(
        r#"(() => {{
{LOCATOR_JS}
  const el = __find({target});
  if (!el) return JSON.stringify({{error: 'not_found'}});
  el.scrollIntoView({{block: 'center', inline: 'center'}});
  const r = el.getBoundingClientRect();
  const cx = r.x + r.width / 2, cy = r.y + r.height / 2;
  const hit = document.elementFromPoint(cx, cy);
  const clear = hit && (hit === el || el.contains(hit) || hit.contains(el));
  if (!clear) {{
    const blocker = hit ? (hit.tagName.toLowerCase() + (hit.className ? '.' + String(hit.className).split(' ')[0] : '')) : 'unknown';
    return JSON.stringify({{error: 'intercepted', blocker}});
  }}
  return JSON.stringify({{x: cx, y: cy}});
}})()"#,
        target = js_str(selector)
    );
    let val = eval_json(browser, &expr).await?;

    match val["error"].as_str() {
        Some("not_found") => Err(not_found(selector)),
        Some("intercepted") => {
            let blocker = val["blocker"].as_str().unwrap_or("unknown");
            // Fed back to the model verbatim; force_click is the recovery path.
            Err(Error::Action(format!(
                "click on '{selector}' is blocked by an overlay or dialog ({blocker}); \
                 address the dialog first or use force_click"
            )))
        }
        _ => {
            let x = val["x"].as_f64().unwrap_or(0.0);
            let y = val["y"].as_f64().unwrap_or(0.0);
            browser
                .cdp
                .dispatch_mouse_event("mousePressed", x, y, "left", 1)
                .await?;
            browser
                .cdp
                .dispatch_mouse_event("mouseReleased", x, y, "left", 1)
                .await?;
            Ok(ExecOutcome::Completed(format!("clicked {selector}")))
        }
    }
}

async fn force_click(browser: &Browser, selector: &str) -> Result<ExecOutcome> {
    let expr = format!(
        r#"(() => {{
{LOCATOR_JS}
  const el = __find({target});
  if (!el) return JSON.stringify({{error: 'not_found'}});
  el.click();
  return JSON.stringify({{ok: true}});
}})()"#,
        target = js_str(selector)
    );
    let val = eval_json(browser, &expr).await?;
    if val["error"].as_str() == Some("not_found") {
        return Err(not_found(selector));
    }
    Ok(ExecOutcome::Completed(format!(
        "force-clicked {selector} (handler invoked directly)"
    )))
}

async fn fill(browser: &Browser, selector: &str, value: &str) -> Result<ExecOutcome> {
    let probe = format!(
        r#"(() => {{
{LOCATOR_JS}
  const el = __find({target});
  if (!el) return JSON.stringify({{error: 'not_found'}});
  el.scrollIntoView({{block: 'center'}});
  return JSON.stringify({{tag: el.tagName.toLowerCase()}});
}})()"#,
        target = js_str(selector)
    );
    let val = eval_json(browser, &probe).await?;
    if val["error"].as_str() == Some("not_found") {
        return Err(not_found(selector));
    }

    if val["tag"].as_str() == Some("textarea") {
        // Select-all then retype through Input.insertText so the framework
        // sees a real editing sequence.
        let select_all = format!(
            r#"(() => {{
{LOCATOR_JS}
  const el = __find({target});
  if (!el) return JSON.stringify({{error: 'not_found'}});
  el.focus();
  el.select();
  return JSON.stringify({{ok: true}});
}})()"#,
            target = js_str(selector)
        );
        eval_json(browser, &select_all).await?;
        browser.cdp.insert_text(value).await?;
    } else {
        // React-style inputs ignore plain assignment; go through the native
        // value setter and dispatch input/change.
        let set_value = format!(
            r#"(() => {{
{LOCATOR_JS}
  const el = __find({target});
  if (!el) return JSON.stringify({{error: 'not_found'}});
  const proto = el.tagName === 'TEXTAREA' ? window.HTMLTextAreaElement.prototype : window.HTMLInputElement.prototype;
  const desc = Object.getOwnPropertyDescriptor(proto, 'value');
  if (desc && desc.set) {{ desc.set.call(el, {value}); }} else {{ el.value = {value}; }}
  el.dispatchEvent(new Event('input', {{bubbles: true}}));
  el.dispatchEvent(new Event('change', {{bubbles: true}}));
  return JSON.stringify({{ok: true}});
}})()"#,
            target = js_str(selector),
            value = js_str(value)
        );
        eval_json(browser, &set_value).await?;
    }

    Ok(ExecOutcome::Completed(format!(
        "filled {selector} with \"{}\"",
        safe_truncate(value, 60)
    )))
}

async fn select_option(browser: &Browser, selector: &str, value: &str) -> Result<ExecOutcome> {
    let expr = format!(
        r#"(async () => {{
{LOCATOR_JS}
  const el = __find({target});
  if (!el) return JSON.stringify({{error: 'not_found'}});
  const wanted = {value};
  if (el.tagName === 'SELECT') {{
    for (const opt of el.options) {{
      if (opt.value === wanted || opt.text.trim() === wanted) {{
        el.value = opt.value;
        el.dispatchEvent(new Event('change', {{bubbles: true}}));
        return JSON.stringify({{ok: true, note: 'native select'}});
      }}
    }}
    return JSON.stringify({{error: 'option_missing'}});
  }}
  el.click();
  await new Promise(r => setTimeout(r, 400));
  for (const opt of document.querySelectorAll('[role=option], li')) {{
    if (__visible(opt) && opt.innerText && opt.innerText.trim() === wanted) {{
      opt.click();
      return JSON.stringify({{ok: true, note: 'custom dropdown'}});
    }}
  }}
  return JSON.stringify({{error: 'option_missing'}});
}})()"#,
        target = js_str(selector),
        value = js_str(value)
    );
    let val = eval_json(browser, &expr).await?;
    match val["error"].as_str() {
        Some("not_found") => Err(not_found(selector)),
        Some("option_missing") => Err(Error::Action(format!(
            "option '{value}' not found in {selector}"
        ))),
        _ => Ok(ExecOutcome::Completed(format!(
            "selected '{value}' in {selector} ({})",
            val["note"].as_str().unwrap_or("select")
        ))),
    }
}

/// MUI selects open on pointerdown, not click; options render into a
/// portal with `[role=option]`.
async fn select_dropdown(
    browser: &Browser,
    selector: &str,
    option_text: &str,
) -> Result<ExecOutcome> {
    let expr = format!(
        r#"(async () => {{
{LOCATOR_JS}
  const el = __find({target});
  if (!el) return JSON.stringify({{error: 'not_found'}});
  const init = {{bubbles: true, cancelable: true}};
  el.dispatchEvent(new PointerEvent('pointerdown', init));
  el.dispatchEvent(new MouseEvent('mousedown', init));
  await new Promise(r => setTimeout(r, 400));
  const wanted = {option};
  for (const opt of document.querySelectorAll('[role=option]')) {{
    if (opt.innerText && opt.innerText.trim() === wanted) {{
      opt.click();
      return JSON.stringify({{ok: true}});
    }}
  }}
  return JSON.stringify({{error: 'option_missing'}});
}})()"#,
        target = js_str(selector),
        option = js_str(option_text)
    );
    let val = eval_json(browser, &expr).await?;
    match val["error"].as_str() {
        Some("not_found") => Err(not_found(selector)),
        Some("option_missing") => {
            // Close the stuck-open widget before reporting failure.
            browser.cdp.dispatch_key_event("keyDown", "Escape", "Escape").await?;
            browser.cdp.dispatch_key_event("keyUp", "Escape", "Escape").await?;
            Err(Error::Action(format!(
                "dropdown option '{option_text}' not found in {selector}; widget closed with Escape"
            )))
        }
        _ => Ok(ExecOutcome::Completed(format!(
            "selected '{option_text}' from dropdown {selector}"
        ))),
    }
}

async fn verify_text(browser: &Browser, value: &str) -> Result<ExecOutcome> {
    let expr = format!(
        r#"(() => {{
  const body = (document.body && document.body.innerText) || '';
  return JSON.stringify({{found: body.toLowerCase().includes({value}.toLowerCase())}});
}})()"#,
        value = js_str(value)
    );
    let val = eval_json(browser, &expr).await?;
    if val["found"].as_bool() == Some(true) {
        Ok(ExecOutcome::Completed(format!("text \"{value}\" is visible")))
    } else {
        Err(Error::Action(format!(
            "expected text \"{value}\" is not visible on the page"
        )))
    }
}

async fn verify_no_error(browser: &Browser) -> Result<ExecOutcome> {
    let expr = format!(
        r#"(() => {{
  const found = [];
  for (const el of document.querySelectorAll({selectors})) {{
    const r = el.getBoundingClientRect();
    if ((r.width > 0 || r.height > 0) && el.innerText && el.innerText.trim()) {{
      found.push(el.innerText.trim().slice(0, 200));
    }}
    if (found.length >= 5) break;
  }}
  return JSON.stringify({{errors: found}});
}})()"#,
        selectors = js_str(ERROR_SELECTORS)
    );
    let val = eval_json(browser, &expr).await?;
    let errors: Vec<String> = val["errors"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    if errors.is_empty() {
        Ok(ExecOutcome::Completed(
            "no visible error indicators on the page".to_string(),
        ))
    } else {
        Err(Error::Action(format!(
            "error indicators visible on the page: {}",
            errors.join(" | ")
        )))
    }
}

async fn wait(browser: &Browser, value: &WaitValue) -> Result<ExecOutcome> {
    match value {
        WaitValue::Millis(ms) => {
            let ms = (*ms).min(MAX_EXPLICIT_WAIT_MS);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ExecOutcome::Completed(format!("waited {ms}ms")))
        }
        WaitValue::Label(_) if value.is_network_idle() => {
            wait_for_document_ready(browser, NAVIGATE_TIMEOUT).await?;
            tokio::time::sleep(Duration::from_millis(1000)).await;
            Ok(ExecOutcome::Completed("waited for network idle".to_string()))
        }
        WaitValue::Label(text) => {
            let deadline = tokio::time::Instant::now() + TEXT_WAIT_TIMEOUT;
            let expr = format!(
                r#"(() => {{
  const body = (document.body && document.body.innerText) || '';
  return JSON.stringify({{found: body.includes({text})}});
}})()"#,
                text = js_str(text)
            );
            loop {
                let val = eval_json(browser, &expr).await?;
                if val["found"].as_bool() == Some(true) {
                    return Ok(ExecOutcome::Completed(format!(
                        "text \"{text}\" appeared"
                    )));
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::Timeout(format!(
                        "timed out waiting for text \"{text}\""
                    )));
                }
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
        }
    }
}

async fn press_key(browser: &Browser, key: &str) -> Result<ExecOutcome> {
    let (key_name, code) = key_code(key);
    browser.cdp.dispatch_key_event("keyDown", &key_name, &code).await?;
    browser.cdp.dispatch_key_event("keyUp", &key_name, &code).await?;
    Ok(ExecOutcome::Completed(format!("pressed {key_name}")))
}

async fn scroll(
    browser: &Browser,
    direction: Option<ScrollTarget>,
    selector: Option<&str>,
) -> Result<ExecOutcome> {
    if let Some(sel) = selector {
        let expr = format!(
            r#"(() => {{
{LOCATOR_JS}
  const el = __find({target});
  if (!el) return JSON.stringify({{error: 'not_found'}});
  el.scrollIntoView({{block: 'center', behavior: 'instant'}});
  return JSON.stringify({{ok: true}});
}})()"#,
            target = js_str(sel)
        );
        let val = eval_json(browser, &expr).await?;
        if val["error"].as_str() == Some("not_found") {
            return Err(not_found(sel));
        }
        return Ok(ExecOutcome::Completed(format!("scrolled {sel} into view")));
    }

    let delta = match direction.unwrap_or(ScrollTarget::Down) {
        ScrollTarget::Down => 600,
        ScrollTarget::Up => -600,
    };
    let expr = format!("(() => {{ window.scrollBy(0, {delta}); return JSON.stringify({{ok: true}}); }})()");
    eval_json(browser, &expr).await?;
    Ok(ExecOutcome::Completed(format!(
        "scrolled {}",
        if delta > 0 { "down" } else { "up" }
    )))
}

async fn hover(browser: &Browser, selector: &str) -> Result<ExecOutcome> {
    let expr = format!(
        r#"(() => {{
{LOCATOR_JS}
  const el = __find({target});
  if (!el) return JSON.stringify({{error: 'not_found'}});
  el.scrollIntoView({{block: 'center'}});
  const r = el.getBoundingClientRect();
  return JSON.stringify({{x: r.x + r.width / 2, y: r.y + r.height / 2}});
}})()"#,
        target = js_str(selector)
    );
    let val = eval_json(browser, &expr).await?;
    if val["error"].as_str() == Some("not_found") {
        return Err(not_found(selector));
    }
    let x = val["x"].as_f64().unwrap_or(0.0);
    let y = val["y"].as_f64().unwrap_or(0.0);
    browser
        .cdp
        .dispatch_mouse_event("mouseMoved", x, y, "none", 0)
        .await?;
    Ok(ExecOutcome::Completed(format!("hovering over {selector}")))
}

async fn js_eval(browser: &Browser, code: &str) -> Result<ExecOutcome> {
    let result = browser.cdp.evaluate_js(code).await?;
    if let Some(exc) = result.get("exceptionDetails") {
        let text = exc["exception"]["description"]
            .as_str()
            .or_else(|| exc["text"].as_str())
            .unwrap_or("evaluation failed");
        return Err(Error::Action(format!("js_eval error: {text}")));
    }
    let preview = result["result"]["value"]
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| result["result"]["value"].to_string());
    Ok(ExecOutcome::Completed(format!(
        "js_eval result: {}",
        safe_truncate(&preview, 200)
    )))
}

/// Poll document.readyState until the page settles.
async fn wait_for_document_ready(browser: &Browser, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let result = browser
            .cdp
            .evaluate_js("document.readyState")
            .await?;
        if matches!(
            result["result"]["value"].as_str(),
            Some("interactive") | Some("complete")
        ) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout(
                "page did not reach DOM-content-loaded in time".to_string(),
            ));
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Quote a Rust string as a JS string literal.
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn not_found(selector: &str) -> Error {
    Error::Action(format!(
        "no element matched '{selector}' by CSS selector, data-testid, or exact visible text; \
         re-check the page snapshot for the correct target"
    ))
}

/// Map an action key name to CDP key/code pair.
fn key_code(key: &str) -> (String, String) {
    match key.to_lowercase().as_str() {
        "enter" | "return" => ("Enter".into(), "Enter".into()),
        "escape" | "esc" => ("Escape".into(), "Escape".into()),
        "tab" => ("Tab".into(), "Tab".into()),
        "backspace" => ("Backspace".into(), "Backspace".into()),
        "delete" => ("Delete".into(), "Delete".into()),
        "space" | " " => (" ".into(), "Space".into()),
        "arrowup" | "up" => ("ArrowUp".into(), "ArrowUp".into()),
        "arrowdown" | "down" => ("ArrowDown".into(), "ArrowDown".into()),
        "arrowleft" | "left" => ("ArrowLeft".into(), "ArrowLeft".into()),
        "arrowright" | "right" => ("ArrowRight".into(), "ArrowRight".into()),
        "pageup" => ("PageUp".into(), "PageUp".into()),
        "pagedown" => ("PageDown".into(), "PageDown".into()),
        "home" => ("Home".into(), "Home".into()),
        "end" => ("End".into(), "End".into()),
        other if other.chars().count() == 1 => {
            let c = key.to_string();
            let code = format!("Key{}", other.to_uppercase());
            (c, code)
        }
        _ => (key.to_string(), key.to_string()),
    }
}

/// Evaluate a JSON-returning expression and parse its string result.
async fn eval_json(browser: &Browser, expr: &str) -> Result<Value> {
    let result = browser.cdp.evaluate_js(expr).await?;
    if let Some(exc) = result.get("exceptionDetails") {
        let text = exc["exception"]["description"]
            .as_str()
            .or_else(|| exc["text"].as_str())
            .unwrap_or("evaluation failed");
        return Err(Error::Browser(format!("page evaluation failed: {text}")));
    }
    match result["result"]["value"].as_str() {
        Some(s) => serde_json::from_str(s)
            .map_err(|e| Error::Browser(format!("unexpected evaluation result ({e}): {s}"))),
        None => Ok(result["result"]["value"].clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_check_covers_mutating_fields() {
        let click = ActionKind::Click {
            selector: "button:has-text('Logout')".into(),
        };
        assert_eq!(deny_check(&click), Some("logout"));

        let fill = ActionKind::Fill {
            selector: "#name".into(),
            value: "please delete everything".into(),
        };
        assert_eq!(deny_check(&fill), Some("delete"));

        let js = ActionKind::JsEval {
            code: "fetch('/api/account/deactivate', {method: 'POST'})".into(),
        };
        assert_eq!(deny_check(&js), Some("deactivate"));
    }

    #[test]
    fn deny_check_exempts_read_only_actions() {
        // Verifications only read the page; asserting on error text that
        // mentions "delete" must not trip the filter.
        let verify = ActionKind::VerifyText {
            value: "Delete failed".into(),
        };
        assert_eq!(deny_check(&verify), None);

        let wait = ActionKind::Wait {
            value: webprobe_core::WaitValue::Label("Deleted successfully".into()),
        };
        assert_eq!(deny_check(&wait), None);
    }

    #[test]
    fn deny_check_blocks_destructive_navigation() {
        // Loading a logout (or delete) endpoint destroys state just as a
        // click would; navigation goes through the same filter.
        let nav = ActionKind::Navigate {
            url: "https://app.test/logout".into(),
        };
        assert_eq!(deny_check(&nav), Some("logout"));

        let nav = ActionKind::Navigate {
            url: "https://app.test/dashboard".into(),
        };
        assert_eq!(deny_check(&nav), None);
    }

    #[test]
    fn deny_check_passes_benign_targets() {
        let click = ActionKind::Click {
            selector: "#submit".into(),
        };
        assert_eq!(deny_check(&click), None);
    }

    #[test]
    fn key_codes_for_named_and_printable_keys() {
        assert_eq!(key_code("Enter"), ("Enter".into(), "Enter".into()));
        assert_eq!(key_code("esc"), ("Escape".into(), "Escape".into()));
        assert_eq!(key_code("a"), ("a".into(), "KeyA".into()));
        assert_eq!(key_code("ArrowDown"), ("ArrowDown".into(), "ArrowDown".into()));
    }

    #[test]
    fn js_str_escapes_quotes_and_newlines() {
        assert_eq!(js_str(r#"a"b"#), r#""a\"b""#);
        assert_eq!(js_str("line1\nline2"), r#""line1\nline2""#);
    }
}
