//! The session orchestrator: `Initializing -> Looping -> Terminated`.
//!
//! One cooperative task owns the browser, the conversation, and the cost
//! tracker for the whole run. Budget guards run at the top of each
//! iteration; terminal actions and decision failures leave the loop; every
//! exit path releases the browser.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;
use webprobe_core::{
    ActionKind, AgentEvent, Decision, EventSink, Report, Result, SessionOutcome, SessionSpec,
    StepResult, StepStatus,
};
use webprobe_browser::{executor, perception, Browser, ExecOutcome, LaunchOptions, PageSnapshot};

use crate::context::Conversation;
use crate::decision::DecisionEngine;

/// What the loop needs from the page: execute one action, describe the
/// result, and hand over any console errors. The real implementation wraps
/// a launched Chrome; the seam exists so loop semantics are testable.
#[async_trait]
pub trait PageDriver: Send {
    async fn execute(&mut self, kind: &ActionKind) -> Result<ExecOutcome>;
    async fn perceive(&mut self, step: u32) -> Result<PageSnapshot>;
    async fn drain_console_errors(&mut self) -> Vec<String>;
}

struct ChromeDriver {
    browser: Browser,
    results_dir: PathBuf,
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn execute(&mut self, kind: &ActionKind) -> Result<ExecOutcome> {
        executor::execute(&self.browser, kind).await
    }

    async fn perceive(&mut self, step: u32) -> Result<PageSnapshot> {
        perception::perceive(&self.browser, step, &self.results_dir).await
    }

    async fn drain_console_errors(&mut self) -> Vec<String> {
        self.browser.drain_console_errors().await
    }
}

pub struct SessionRunner {
    session_id: String,
    spec: SessionSpec,
    engine: DecisionEngine,
    results_dir: PathBuf,
    events: Option<EventSink>,
}

impl SessionRunner {
    pub fn new(
        spec: SessionSpec,
        engine: DecisionEngine,
        results_dir: PathBuf,
        events: Option<EventSink>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            spec,
            engine,
            results_dir,
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run the session to completion. Always returns a report; engine-level
    /// failures surface as a `fatal_error` outcome, not an `Err`.
    pub async fn run(mut self) -> Result<Report> {
        let started = Instant::now();
        info!(
            session_id = %self.session_id,
            goal = %self.spec.goal,
            model = self.engine.model(),
            "Session starting"
        );
        self.emit(AgentEvent::SessionStart {
            session_id: self.session_id.clone(),
            goal: self.spec.goal.clone(),
        });

        if let Err(e) = std::fs::create_dir_all(&self.results_dir) {
            error!("results dir creation failed: {}", e);
            self.emit(AgentEvent::Error {
                message: e.to_string(),
            });
            let report = self.build_report(
                SessionOutcome::FatalError,
                Vec::new(),
                format!(
                    "could not create results dir {}: {e}",
                    self.results_dir.display()
                ),
                started,
                None,
            );
            self.emit_complete(&report);
            return Ok(report);
        }
        let video_dir = self
            .spec
            .record_video
            .then(|| self.results_dir.join("video"));

        let launch = LaunchOptions {
            headless: self.spec.headless,
            viewport_width: self.spec.viewport_width,
            viewport_height: self.spec.viewport_height,
            user_data_dir: self.results_dir.join("profile"),
            video_dir: video_dir.clone(),
        };

        let browser = match Browser::launch(&launch).await {
            Ok(b) => b,
            Err(e) => {
                error!("browser launch failed: {}", e);
                self.emit(AgentEvent::Error {
                    message: e.to_string(),
                });
                let report = self.build_report(
                    SessionOutcome::FatalError,
                    Vec::new(),
                    format!("browser launch failed: {e}"),
                    started,
                    video_dir,
                );
                self.emit_complete(&report);
                return Ok(report);
            }
        };
        let mut driver = ChromeDriver {
            browser,
            results_dir: self.results_dir.clone(),
        };

        let system_prompt = system_prompt(&self.spec.goal, self.spec.start_url.as_deref());
        let mut conversation = Conversation::new(&system_prompt);
        conversation.push_observation(initial_observation(self.spec.start_url.as_deref()), None);

        let (outcome, steps, summary_hint) =
            self.run_loop(&mut driver, &mut conversation, started).await;

        // Teardown is best-effort and independent of how the loop ended.
        driver.browser.close().await;

        let fallback = summary_hint;
        let summary = if outcome == SessionOutcome::Done {
            self.engine
                .summarize(&system_prompt, conversation.windowed(), &fallback)
                .await
        } else {
            fallback
        };

        let report = self.build_report(outcome, steps, summary, started, video_dir);
        info!(
            session_id = %self.session_id,
            outcome = ?report.outcome,
            passed = report.passed,
            steps = report.total_steps,
            cost = report.cost.total_cost,
            "Session finished"
        );
        self.emit_complete(&report);
        Ok(report)
    }

    /// The Looping state. Returns the terminal outcome, the recorded steps,
    /// and a fallback summary line.
    async fn run_loop<D: PageDriver>(
        &mut self,
        driver: &mut D,
        conversation: &mut Conversation,
        started: Instant,
    ) -> (SessionOutcome, Vec<StepResult>, String) {
        let system_prompt = system_prompt(&self.spec.goal, self.spec.start_url.as_deref());
        let deadline = started + Duration::from_secs(self.spec.max_duration_secs);
        let mut steps: Vec<StepResult> = Vec::new();
        let mut step: u32 = 0;
        let mut last_url = String::from("about:blank");
        let mut last_title = String::new();

        loop {
            if step >= self.spec.max_steps {
                info!(max_steps = self.spec.max_steps, "Step budget exhausted");
                return (
                    SessionOutcome::BudgetExhausted,
                    steps,
                    format!("step budget ({}) exhausted before the goal completed", self.spec.max_steps),
                );
            }
            if Instant::now() >= deadline {
                info!(
                    max_duration_secs = self.spec.max_duration_secs,
                    "Wall-clock budget exhausted"
                );
                return (
                    SessionOutcome::BudgetExhausted,
                    steps,
                    format!(
                        "wall-clock budget ({}s) exhausted before the goal completed",
                        self.spec.max_duration_secs
                    ),
                );
            }

            step += 1;
            self.emit(AgentEvent::StepStart { step });
            let step_start = Instant::now();

            let decision = match self
                .engine
                .decide(&system_prompt, conversation.windowed())
                .await
            {
                Ok(d) => d,
                Err(e) => {
                    // Decision failures are fatal and never retried.
                    error!(step, "decision failure: {}", e);
                    self.emit(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    return (
                        SessionOutcome::FatalError,
                        steps,
                        format!("decision failure at step {step}: {e}"),
                    );
                }
            };

            self.emit(AgentEvent::AgenticThinking {
                step,
                text: decision.reasoning.clone(),
            });
            info!(step, action = decision.kind.name(), description = %decision.description, "Decided");

            match &decision.kind {
                ActionKind::Done { summary } => {
                    let summary = summary.clone();
                    steps.push(final_step(
                        step,
                        decision,
                        StepStatus::Passed,
                        step_start,
                        &last_url,
                        &last_title,
                        None,
                    ));
                    self.emit(AgentEvent::AgenticDone {
                        step,
                        summary: summary.clone(),
                    });
                    return (SessionOutcome::Done, steps, summary);
                }
                ActionKind::Fail { reason } => {
                    let reason = reason.clone();
                    steps.push(final_step(
                        step,
                        decision,
                        StepStatus::Failed,
                        step_start,
                        &last_url,
                        &last_title,
                        Some(reason.clone()),
                    ));
                    self.emit(AgentEvent::AgenticFail {
                        step,
                        reason: reason.clone(),
                    });
                    return (SessionOutcome::Failed, steps, reason);
                }
                _ => {}
            }

            let exec_result = driver.execute(&decision.kind).await;
            tokio::time::sleep(Duration::from_millis(self.spec.step_delay_ms)).await;

            let snapshot = match driver.perceive(step).await {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(step, "perception failed: {}", e);
                    None
                }
            };
            let console_errors = driver.drain_console_errors().await;

            if let Some(s) = &snapshot {
                last_url = s.url.clone();
                last_title = s.title.clone();
            }

            let (status, note, error_text) = match exec_result {
                Ok(ExecOutcome::Completed(note)) => (StepStatus::Passed, note, None),
                Ok(ExecOutcome::Skipped(reason)) => {
                    (StepStatus::Passed, reason.clone(), None)
                }
                Err(e) => {
                    let text = e.to_string();
                    (StepStatus::Failed, text.clone(), Some(text))
                }
            };

            let decision_json = serde_json::to_string(&decision)
                .unwrap_or_else(|_| decision.kind.name().to_string());
            conversation.push_decision(decision_json);
            conversation.push_observation(
                observation_text(step, status, &note, &console_errors, snapshot.as_ref().map(|s| s.text.as_str())),
                snapshot.as_ref().and_then(|s| s.screenshot_b64.clone()),
            );
            conversation.trim();

            let result = StepResult {
                step,
                decision: decision.clone(),
                status,
                duration_ms: step_start.elapsed().as_millis() as u64,
                url: last_url.clone(),
                title: last_title.clone(),
                console_errors,
                screenshot_path: snapshot
                    .as_ref()
                    .and_then(|s| s.screenshot_path.as_ref())
                    .map(|p| p.display().to_string()),
                error: error_text.clone(),
                timestamp: chrono::Utc::now(),
            };
            self.emit(AgentEvent::StepComplete {
                step,
                status,
                action: decision.kind.name().to_string(),
                description: decision.description.clone(),
                error: error_text,
            });
            steps.push(result);
        }
    }

    fn build_report(
        &self,
        outcome: SessionOutcome,
        steps: Vec<StepResult>,
        summary: String,
        started: Instant,
        video_dir: Option<PathBuf>,
    ) -> Report {
        let passed = Report::derive_passed(outcome, &steps);
        let failed_steps = steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count() as u32;
        Report {
            session_id: self.session_id.clone(),
            goal: self.spec.goal.clone(),
            outcome,
            passed,
            total_steps: steps.len() as u32,
            failed_steps,
            steps,
            summary,
            duration_ms: started.elapsed().as_millis() as u64,
            cost: self.engine.cost.breakdown(),
            video_dir: video_dir.map(|p| p.display().to_string()),
        }
    }

    fn emit_complete(&self, report: &Report) {
        self.emit(AgentEvent::Complete {
            outcome: report.outcome,
            passed: report.passed,
            total_steps: report.total_steps,
            failed_steps: report.failed_steps,
        });
    }
}

fn final_step(
    step: u32,
    decision: Decision,
    status: StepStatus,
    step_start: Instant,
    url: &str,
    title: &str,
    error: Option<String>,
) -> StepResult {
    StepResult {
        step,
        decision,
        status,
        duration_ms: step_start.elapsed().as_millis() as u64,
        url: url.to_string(),
        title: title.to_string(),
        console_errors: Vec::new(),
        screenshot_path: None,
        error,
        timestamp: chrono::Utc::now(),
    }
}

/// The permanent first turn: goal, protocol, and ground rules.
fn system_prompt(goal: &str, start_url: Option<&str>) -> String {
    let start_line = match start_url {
        Some(url) => format!("Start URL: {url}\n"),
        None => String::new(),
    };
    format!(
        r#"You are an autonomous UI acceptance tester driving a real browser.

GOAL: {goal}
{start_line}
Each of my messages is a snapshot of the current page (text, plus sometimes a
screenshot). Respond with EXACTLY ONE action as a single JSON object, no prose
outside the JSON.

Actions:
  {{"action":"navigate","url":"..."}}
  {{"action":"click","selector":"..."}}
  {{"action":"force_click","selector":"..."}}            (recovery when click is blocked by an overlay)
  {{"action":"fill","selector":"...","value":"..."}}
  {{"action":"select_option","selector":"...","value":"..."}}
  {{"action":"select_dropdown","selector":"...","optionText":"..."}}  (MUI-style dropdowns)
  {{"action":"verify_text","value":"..."}}
  {{"action":"verify_no_error"}}
  {{"action":"wait","value":1500}}  or  {{"action":"wait","value":"network_idle"}}  or  {{"action":"wait","value":"text to appear"}}
  {{"action":"press_key","key":"Enter"}}
  {{"action":"scroll","direction":"down"}}  or  {{"action":"scroll","selector":"..."}}
  {{"action":"hover","selector":"..."}}
  {{"action":"js_eval","code":"..."}}
  {{"action":"screenshot"}}
  {{"action":"done","summary":"..."}}   (goal fully verified)
  {{"action":"fail","reason":"..."}}    (goal cannot be achieved)

Every action may also carry "description" (what you are doing) and
"reasoning" (why). Selectors are resolved as CSS first, then data-testid,
then exact visible text.

Rules:
- If the snapshot shows an OPEN DIALOG, deal with it before anything else.
- After a mutating action, verify the result (verify_text / verify_no_error).
- Never log out, delete, deactivate, or otherwise destroy account state.
- Use done only when every part of the goal has been verified."#
    )
}

fn initial_observation(start_url: Option<&str>) -> String {
    match start_url {
        Some(url) => format!(
            "The browser is open on a blank page. Navigate to {url} to begin."
        ),
        None => "The browser is open on a blank page. Navigate to the application under test to begin.".to_string(),
    }
}

/// Observation fed back after each executed action, with a targeted hint on
/// failure so the model can self-correct.
fn observation_text(
    step: u32,
    status: StepStatus,
    note: &str,
    console_errors: &[String],
    snapshot: Option<&str>,
) -> String {
    let mut out = match status {
        StepStatus::Passed => format!("STEP {step} OK: {note}\n"),
        StepStatus::Failed => format!("STEP {step} FAILED: {note}\n{}", failure_hint(note)),
    };
    if !console_errors.is_empty() {
        out.push_str(&format!(
            "CONSOLE ERRORS ({}): {}\n",
            console_errors.len(),
            console_errors.join(" | ")
        ));
    }
    match snapshot {
        Some(text) => {
            out.push('\n');
            out.push_str(text);
        }
        None => out.push_str("\n(page snapshot unavailable for this step)"),
    }
    out
}

fn failure_hint(error: &str) -> String {
    if error.contains("blocked by an overlay") {
        "HINT: close or address the dialog, or retry with force_click.\n".to_string()
    } else if error.contains("no element matched") {
        "HINT: re-read the snapshot and target an exact selector, data-testid, or exact visible text.\n".to_string()
    } else if error.contains("not found in") {
        "HINT: the option text must match exactly; check the snapshot for the available options.\n".to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use webprobe_core::config::SessionDefaults;
    use webprobe_core::{ConversationTurn, Error, TokenUsage};
    use webprobe_providers::{Completion, Provider};

    struct ScriptedProvider {
        responses: Mutex<VecDeque<String>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn complete(
            &self,
            _system: &str,
            _turns: &[ConversationTurn],
        ) -> Result<Completion> {
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Provider("script exhausted".to_string()))?;
            Ok(Completion {
                text,
                usage: TokenUsage {
                    input_tokens: 40,
                    output_tokens: 10,
                },
            })
        }

        fn model(&self) -> &str {
            "gpt-4o"
        }
    }

    struct MockDriver {
        exec_results: VecDeque<Result<ExecOutcome>>,
        executed: Vec<String>,
    }

    impl MockDriver {
        fn new(exec_results: Vec<Result<ExecOutcome>>) -> Self {
            Self {
                exec_results: exec_results.into(),
                executed: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl PageDriver for MockDriver {
        async fn execute(&mut self, kind: &ActionKind) -> Result<ExecOutcome> {
            self.executed.push(kind.name().to_string());
            self.exec_results
                .pop_front()
                .unwrap_or(Ok(ExecOutcome::Completed("ok".to_string())))
        }

        async fn perceive(&mut self, _step: u32) -> Result<PageSnapshot> {
            Ok(PageSnapshot {
                url: "https://app.test/page".to_string(),
                title: "Page".to_string(),
                text: "URL: https://app.test/page".to_string(),
                screenshot_b64: None,
                screenshot_path: None,
            })
        }

        async fn drain_console_errors(&mut self) -> Vec<String> {
            Vec::new()
        }
    }

    fn runner_with(max_steps: u32, responses: Vec<&str>) -> SessionRunner {
        let mut spec = SessionSpec::new("check the page", &SessionDefaults::default());
        spec.max_steps = max_steps;
        spec.step_delay_ms = 0;
        let engine = DecisionEngine::new(Box::new(ScriptedProvider {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
        }));
        SessionRunner::new(spec, engine, std::env::temp_dir(), None)
    }

    async fn drive(
        runner: &mut SessionRunner,
        driver: &mut MockDriver,
    ) -> (SessionOutcome, Vec<StepResult>, String) {
        let prompt = system_prompt(&runner.spec.goal, None);
        let mut conversation = Conversation::new(&prompt);
        conversation.push_observation(initial_observation(None), None);
        runner.run_loop(driver, &mut conversation, Instant::now()).await
    }

    #[tokio::test]
    async fn step_budget_caps_the_loop_at_exactly_max_steps() {
        let click = r##"{"action":"click","selector":"#next","description":"Next"}"##;
        let mut runner = runner_with(3, vec![click, click, click, click]);
        let mut driver = MockDriver::new(Vec::new());

        let (outcome, steps, summary) = drive(&mut runner, &mut driver).await;

        assert_eq!(outcome, SessionOutcome::BudgetExhausted);
        assert_eq!(steps.len(), 3);
        let numbers: Vec<u32> = steps.iter().map(|s| s.step).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(driver.executed.len(), 3);
        assert!(summary.contains("step budget (3)"));
        assert!(!Report::derive_passed(outcome, &steps));
    }

    #[tokio::test]
    async fn terminal_done_executes_nothing() {
        let mut runner = runner_with(
            10,
            vec![r#"{"action":"done","summary":"goal verified"}"#],
        );
        let mut driver = MockDriver::new(Vec::new());

        let (outcome, steps, summary) = drive(&mut runner, &mut driver).await;

        assert_eq!(outcome, SessionOutcome::Done);
        assert!(driver.executed.is_empty());
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step, 1);
        assert_eq!(steps[0].status, StepStatus::Passed);
        assert_eq!(summary, "goal verified");
    }

    #[tokio::test]
    async fn failed_step_before_done_fails_the_report() {
        let mut runner = runner_with(
            10,
            vec![
                r##"{"action":"click","selector":"#gone"}"##,
                r#"{"action":"done","summary":"finished anyway"}"#,
            ],
        );
        let mut driver = MockDriver::new(vec![Err(Error::Action(
            "no element matched '#gone'".to_string(),
        ))]);

        let (outcome, steps, _) = drive(&mut runner, &mut driver).await;

        assert_eq!(outcome, SessionOutcome::Done);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert!(steps[0].error.as_deref().unwrap().contains("#gone"));
        assert_eq!(steps[1].status, StepStatus::Passed);
        assert!(!Report::derive_passed(outcome, &steps));
    }

    #[tokio::test]
    async fn unwritable_results_dir_is_a_fatal_report_not_an_err() {
        let blocker = std::env::temp_dir().join(format!("wp-{}", Uuid::new_v4()));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let mut spec = SessionSpec::new("check the page", &SessionDefaults::default());
        spec.step_delay_ms = 0;
        let engine = DecisionEngine::new(Box::new(ScriptedProvider {
            responses: Mutex::new(VecDeque::new()),
        }));
        let runner = SessionRunner::new(spec, engine, blocker.join("results"), None);

        let report = runner.run().await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::FatalError);
        assert!(!report.passed);
        assert_eq!(report.total_steps, 0);
        assert!(report.summary.contains("could not create results dir"));
        let _ = std::fs::remove_file(&blocker);
    }

    #[test]
    fn system_prompt_lists_the_protocol() {
        let p = system_prompt("Verify every dashboard tab renders", Some("https://app.test"));
        assert!(p.contains("Verify every dashboard tab renders"));
        assert!(p.contains("https://app.test"));
        for tag in [
            "navigate", "force_click", "select_dropdown", "verify_no_error", "done", "fail",
        ] {
            assert!(p.contains(tag), "missing action {tag}");
        }
    }

    #[test]
    fn failure_hints_target_known_errors() {
        assert!(failure_hint("click on '#x' is blocked by an overlay or dialog")
            .contains("force_click"));
        assert!(failure_hint("no element matched '#missing'").contains("snapshot"));
        assert!(failure_hint("option 'Europe' not found in #region").contains("exactly"));
        assert!(failure_hint("something else").is_empty());
    }

    #[test]
    fn observation_surfaces_console_errors_and_skip_notes() {
        let text = observation_text(
            3,
            StepStatus::Passed,
            "action skipped: target matches destructive-action deny-list term 'logout'",
            &["TypeError: x is undefined".to_string()],
            Some("URL: https://app.test\n== ELEMENTS ==\n"),
        );
        assert!(text.contains("STEP 3 OK"));
        assert!(text.contains("deny-list"));
        assert!(text.contains("CONSOLE ERRORS (1)"));
        assert!(text.contains("== ELEMENTS =="));
    }

    #[test]
    fn failed_observation_keeps_error_verbatim() {
        let msg = "click on '#save' is blocked by an overlay or dialog (div.backdrop); \
                   address the dialog first or use force_click";
        let text = observation_text(5, StepStatus::Failed, msg, &[], None);
        assert!(text.contains(msg));
        assert!(text.contains("HINT"));
        assert!(text.contains("snapshot unavailable"));
    }
}
