//! Command-line entry point

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use anyhow::Result;
use murmur::config::Config;
use murmur::daemon;

#[derive(Parser)]
#[command(name = "murmur", version, about = "Hands-free local voice assistant")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the assistant (default)
    Run,
    /// Capture a few seconds of microphone audio and report levels
    TestMic {
        /// How long to capture
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Play the acknowledgement cue through the speakers
    TestSpeaker,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => daemon::run(cli.config.as_deref()).await?,
        Command::TestMic { seconds } => daemon::test_microphone(seconds).await?,
        Command::TestSpeaker => daemon::test_speaker().await?,
        Command::CheckConfig => {
            let config = Config::load(cli.config.as_deref())?;
            println!("configuration OK");
            println!("  llm: {} ({})", config.llm.provider, config.llm.model);
            println!("  stt: {}", config.stt.provider);
            println!("  tts: {} ({})", config.tts.provider, config.tts.voice);
            println!(
                "  mcp: {}",
                if config.mcp.url.is_empty() { "disabled" } else { &config.mcp.url }
            );
            println!("  bus: {}", if config.bus.enabled { "enabled" } else { "disabled" });
        }
    }
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "murmur=info",
        1 => "murmur=debug",
        _ => "murmur=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
