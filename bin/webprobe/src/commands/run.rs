use std::path::PathBuf;
use tracing::info;
use webprobe_agent::{DecisionEngine, SessionRunner};
use webprobe_core::{AgentEvent, Config, Paths, Report, SessionSpec, StepStatus};
use webprobe_providers::create_provider;

pub struct RunArgs {
    pub goal: String,
    pub url: Option<String>,
    pub max_steps: Option<u32>,
    pub max_duration: Option<u64>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub headed: bool,
    pub record_video: bool,
    pub results_dir: Option<PathBuf>,
    pub json: bool,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = Config::load(None)?;

    let mut spec = SessionSpec::new(&args.goal, &config.session);
    spec.start_url = args.url;
    spec.provider = args.provider;
    spec.model = args.model;
    if args.headed {
        spec.headless = false;
    }
    if let Some(n) = args.max_steps {
        spec.max_steps = n;
    }
    if let Some(secs) = args.max_duration {
        spec.max_duration_secs = secs;
    }
    spec.record_video = args.record_video;

    let provider = create_provider(&config, spec.provider.as_deref(), spec.model.as_deref())?;
    let engine = DecisionEngine::new(provider);

    let results_dir = args.results_dir.unwrap_or_else(|| {
        Paths::new()
            .results_dir()
            .join(chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string())
    });

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<AgentEvent>();
    let json_mode = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if json_mode {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
            } else {
                print_event(&event);
            }
        }
    });

    let runner = SessionRunner::new(spec, engine, results_dir.clone(), Some(event_tx));
    let report = runner.run().await?;
    let _ = printer.await;

    let report_path = results_dir.join("report.json");
    std::fs::write(&report_path, serde_json::to_vec_pretty(&report)?)?;
    info!(path = %report_path.display(), "Report written");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.passed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::SessionStart { session_id, goal } => {
            println!("session {session_id}");
            println!("goal: {goal}\n");
        }
        AgentEvent::StepStart { step } => println!("step {step}:"),
        AgentEvent::AgenticThinking { text: Some(text), .. } => println!("  thinking: {text}"),
        AgentEvent::AgenticThinking { text: None, .. } => {}
        AgentEvent::StepComplete {
            status,
            action,
            description,
            error,
            ..
        } => {
            let mark = match status {
                StepStatus::Passed => "ok",
                StepStatus::Failed => "FAILED",
            };
            match error {
                Some(e) => println!("  [{mark}] {action}: {description} ({e})"),
                None => println!("  [{mark}] {action}: {description}"),
            }
        }
        AgentEvent::AgenticDone { summary, .. } => println!("  done: {summary}"),
        AgentEvent::AgenticFail { reason, .. } => println!("  fail: {reason}"),
        AgentEvent::Complete { .. } => {}
        AgentEvent::Error { message } => eprintln!("error: {message}"),
    }
}

fn print_report(report: &Report) {
    println!();
    println!(
        "{}  ({:?}, {} steps, {} failed, {:.0}s, ${:.4})",
        if report.passed { "PASSED" } else { "NOT PASSED" },
        report.outcome,
        report.total_steps,
        report.failed_steps,
        report.duration_ms as f64 / 1000.0,
        report.cost.total_cost,
    );
    println!("{}", report.summary);
    if let Some(video) = &report.video_dir {
        println!("video frames: {video}");
    }
}
