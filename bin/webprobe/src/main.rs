mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "webprobe")]
#[command(about = "Autonomous browser-driven UI acceptance testing", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a goal-directed test session against a live application
    Run {
        /// Natural-language goal, e.g. "verify every dashboard tab renders without errors"
        goal: String,

        /// URL the session should start from
        #[arg(long)]
        url: Option<String>,

        /// Step budget for the session
        #[arg(long)]
        max_steps: Option<u32>,

        /// Wall-clock budget in seconds
        #[arg(long)]
        max_duration: Option<u64>,

        /// Model provider (openai | anthropic)
        #[arg(long)]
        provider: Option<String>,

        /// Model name, e.g. gpt-4o or claude-sonnet-4-20250514
        #[arg(long)]
        model: Option<String>,

        /// Show the browser window instead of running headless
        #[arg(long)]
        headed: bool,

        /// Record the session as screencast frames
        #[arg(long)]
        record_video: bool,

        /// Where to write screenshots, video, and the report
        #[arg(long)]
        results_dir: Option<std::path::PathBuf>,

        /// Stream events and print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show configured providers and defaults
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            goal,
            url,
            max_steps,
            max_duration,
            provider,
            model,
            headed,
            record_video,
            results_dir,
            json,
        } => {
            commands::run::run(commands::run::RunArgs {
                goal,
                url,
                max_steps,
                max_duration,
                provider,
                model,
                headed,
                record_video,
                results_dir,
                json,
            })
            .await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
    }

    Ok(())
}
