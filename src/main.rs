use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use live_voice::transport::{DEFAULT_VOICE, VOICE_OPTIONS};
use live_voice::{create_router, AppState, Config, SessionState, VoiceSession};
use tracing::{info, warn};

/// Real-time voice conversations with a remote voice model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (extension optional; missing file uses defaults)
    #[arg(short, long, default_value = "config/live-voice")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP control API
    Serve,

    /// Hold one conversation in the terminal
    Talk(TalkCommand),

    /// List prebuilt voices
    Voices,
}

#[derive(Parser, Debug)]
struct TalkCommand {
    /// WAV file replayed as the microphone (silence when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Prebuilt voice name
    #[arg(short, long)]
    voice: Option<String>,

    /// Directory for the rendered playback WAV
    #[arg(long)]
    record_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("TLS crypto provider already installed");
    }

    let cli = Cli::parse();

    if let Commands::Voices = cli.command {
        for voice in VOICE_OPTIONS {
            let marker = if voice == DEFAULT_VOICE { " (default)" } else { "" };
            println!("{}{}", voice, marker);
        }
        return Ok(());
    }

    let cfg = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Commands::Serve => serve(cfg).await,
        Commands::Talk(cmd) => talk(cfg, cmd).await,
        Commands::Voices => Ok(()),
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let state = AppState::new(cfg);
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    let sessions: Vec<_> = state.sessions.write().await.drain().map(|(_, handle)| handle).collect();
    for handle in sessions {
        if let Err(e) = handle.shutdown().await {
            warn!("Session {} did not shut down cleanly: {}", handle.session_id(), e);
        }
    }

    info!("HTTP API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("Shutdown signal received");
}

async fn talk(mut cfg: Config, cmd: TalkCommand) -> Result<()> {
    if let Some(input) = cmd.input {
        cfg.audio.capture_source = input.display().to_string();
    }
    if let Some(voice) = cmd.voice {
        cfg.voice.voice = voice;
    }
    if cmd.record_dir.is_some() {
        cfg.audio.record_dir = cmd.record_dir;
    }
    cfg.validate()?;

    let handle = VoiceSession::spawn(
        cfg.session_config(None),
        Arc::new(cfg.devices()),
        Arc::new(cfg.authorizer()),
    );
    let mut updates = handle.subscribe();

    let started = handle.start().await?;
    println!("{} (voice: {}). Press Ctrl-C to stop.", started.state.label(), started.voice);

    let mut last = started;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();

                if status.state != last.state {
                    println!("[{}]", status.state.label());
                }
                if !status.transcript.is_empty() && status.transcript != last.transcript {
                    println!("You: {}", status.transcript);
                }
                if !status.subtitle.is_empty() && status.subtitle != last.subtitle {
                    println!("AI: {}", status.subtitle);
                }
                if status.note.is_some() && status.note != last.note {
                    println!("({})", status.note.as_deref().unwrap_or_default());
                }

                let finished = matches!(status.state, SessionState::Stopped | SessionState::Error);
                last = status;
                if finished {
                    break;
                }
            }
        }
    }

    let summary = handle.status();
    if let Some(error) = &summary.error {
        eprintln!("Error: {}", error);
    }
    if summary.started_at.is_some() {
        println!("Conversation lasted {:.1}s", summary.duration_secs());
    }

    handle.stop().await?;
    handle.shutdown().await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
