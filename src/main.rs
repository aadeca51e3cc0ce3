use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use voxnote::analysis::Profile;
use voxnote::audio::CpalBackend;
use voxnote::provider::ProviderId;
use voxnote::session::{SessionController, SessionState};
use voxnote::Config;

#[derive(Parser)]
#[command(name = "voxnote", about = "Record, transcribe, and analyze voice notes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a session: press Enter to stop, Ctrl-C to cancel
    Record {
        /// Analysis profile file (YAML); defaults to the built-in meeting profile
        #[arg(long)]
        profile: Option<PathBuf>,
        /// AI provider: ollama, openai, groq, or anthropic
        #[arg(long)]
        provider: Option<ProviderId>,
        /// Provider model override
        #[arg(long)]
        model: Option<String>,
        /// Input device name (substring match)
        #[arg(long)]
        device: Option<String>,
        /// Transcribe only, skip analysis
        #[arg(long)]
        no_analysis: bool,
    },
    /// List available input devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::load("config/voxnote")?;

    match cli.command {
        Command::Devices => {
            for name in CpalBackend::list_input_devices().context("cannot enumerate devices")? {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Record {
            profile,
            provider,
            model,
            device,
            no_analysis,
        } => {
            if let Some(provider) = provider {
                config.analysis.provider = provider;
            }
            if let Some(model) = model {
                config.analysis.model = model;
            }
            if let Some(device) = device {
                config.audio.device = Some(device);
            }

            let profile = match profile {
                Some(path) => Profile::load(&path)
                    .with_context(|| format!("cannot load profile {:?}", path))?,
                None => Profile::default_meeting(),
            };

            record(&config, profile, no_analysis).await
        }
    }
}

async fn record(config: &Config, profile: Profile, no_analysis: bool) -> Result<()> {
    let mut controller = SessionController::from_config(config, profile, !no_analysis)?;
    controller.start().await?;

    info!("Recording (session {}), press Enter to stop", controller.id());

    let stdin_wait = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    });

    tokio::select! {
        _ = stdin_wait => {
            controller.stop_recording();
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Cancelling session");
            controller.cancel();
        }
    }

    let outcome = controller.wait().await;

    match outcome.state {
        SessionState::Complete | SessionState::Cancelled => {
            if let Some(recording) = &outcome.recording {
                println!(
                    "\nRecorded {:.1}s across {} segments ({} frames dropped)",
                    recording.duration_ms as f64 / 1000.0,
                    recording.segments.len(),
                    outcome.frames_dropped,
                );
            }

            if !outcome.transcript.is_empty() {
                println!("\n=== Transcript ===\n{}", outcome.transcript.full_text());
            }

            for entry in outcome.analysis.entries() {
                match &entry.output {
                    Some(output) => println!("\n=== {} ===\n{}", entry.name, output),
                    None => {
                        if let Some(reason) = &entry.error {
                            println!("\n=== {} ===\n(not produced: {})", entry.name, reason);
                        }
                    }
                }
            }

            if outcome.state == SessionState::Cancelled {
                info!("Session cancelled; partial results shown above");
            }
            Ok(())
        }
        _ => {
            let reason = outcome
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            error!("Session failed: {}", reason);
            anyhow::bail!("session failed: {}", reason)
        }
    }
}
