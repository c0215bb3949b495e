use webprobe_core::{Config, Paths};

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load(None)?;
    let paths = Paths::new();

    println!("webprobe status\n");
    println!("config file: {}", paths.config_file().display());
    println!("results dir: {}", paths.results_dir().display());
    println!();

    for (name, pc) in [
        ("openai", &config.providers.openai),
        ("anthropic", &config.providers.anthropic),
    ] {
        let state = if pc.is_configured() {
            "configured"
        } else {
            "no API key"
        };
        let model = pc.model.as_deref().unwrap_or("(default)");
        println!("provider {name:<10} {state:<12} model: {model}");
    }

    let s = &config.session;
    println!();
    println!(
        "session defaults: max_steps={} max_duration={}s step_delay={}ms viewport={}x{} headless={}",
        s.max_steps, s.max_duration_secs, s.step_delay_ms, s.viewport_width, s.viewport_height, s.headless
    );
    Ok(())
}
