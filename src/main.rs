use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kisan_voice::audio::{
    Analyser, AudioCapture, PLAYBACK_SAMPLE_RATE, PlaybackScheduler, samples_to_wav,
};
use kisan_voice::{ConfigFile, ConnectionState, Role, SessionEvent, VoiceSession};

/// Kisan - voice assistant pipeline for the Kisan Mitra farmer companion
#[derive(Parser)]
#[command(name = "kisan", version, about)]
struct Cli {
    /// Speech service WebSocket URL (overrides the config file)
    #[arg(long, env = "KISAN_SERVICE_URL")]
    url: Option<String>,

    /// Interface language code (hi, pa, en)
    #[arg(short, long, env = "KISAN_LANGUAGE")]
    language: Option<String>,

    /// Config file path (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live voice session (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Write the captured audio to a WAV file
        #[arg(long)]
        wav: Option<PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,kisan_voice=info",
        1 => "info,kisan_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        None | Some(Command::Run) => run_session(&cli).await,
        Some(Command::TestMic { duration, wav }) => test_mic(duration, wav).await,
        Some(Command::TestSpeaker) => test_speaker().await,
    }
}

/// Start a session and print its events until it settles or ctrl-c.
async fn run_session(cli: &Cli) -> anyhow::Result<()> {
    let path = cli
        .config
        .clone()
        .or_else(ConfigFile::default_path)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let overlay = ConfigFile::load(&path)?;
    let config = overlay.resolve(cli.url.as_deref(), cli.language.as_deref())?;

    let (session, handle, mut events) = VoiceSession::new(config);

    // Ctrl-C requests a stop; the session funnels through its teardown
    let stop_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested");
            stop_handle.stop();
        }
        // Keep a handle alive for the session's lifetime
        drop(stop_handle);
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged(state) => {
                    println!("state: {state}");
                    if state == ConnectionState::Connected {
                        println!("listening - speak now");
                    }
                }
                SessionEvent::Transcript(entry) => {
                    let who = match entry.role {
                        Role::User => "you",
                        Role::Model => "assistant",
                    };
                    println!("{who}: {}", entry.text);
                }
                SessionEvent::Error {
                    message,
                    details,
                    hint,
                } => {
                    eprintln!("error: {message}");
                    if let Some(details) = details {
                        eprintln!("  details: {details}");
                    }
                    if let Some(hint) = hint {
                        eprintln!("  hint: {hint}");
                    }
                }
                SessionEvent::Level(_) => {
                    // Rendered by the app UI; too chatty for a terminal
                }
            }
        }
    });

    session.run().await?;
    drop(handle);
    let _ = printer.await;
    Ok(())
}

/// Capture for `duration` seconds and report what arrived.
async fn test_mic(duration: u64, wav: Option<PathBuf>) -> anyhow::Result<()> {
    println!("recording for {duration}s...");

    let analyser = Arc::new(Analyser::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut capture = AudioCapture::new()?;
    let sample_rate = capture.sample_rate();
    capture.start(tx, analyser)?;

    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);

    let mut blocks = 0usize;
    let mut samples: Vec<f32> = Vec::new();
    loop {
        tokio::select! {
            () = &mut deadline => break,
            block = rx.recv() => {
                let Some(block) = block else { break };
                blocks += 1;
                samples.extend_from_slice(&block);
            }
        }
    }
    capture.stop();

    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    println!("captured {blocks} blocks ({} samples) at {sample_rate}Hz, peak {peak:.3}", samples.len());
    if peak < 0.01 {
        println!("peak is very low - check microphone permissions and input level");
    }

    if let Some(path) = wav {
        std::fs::write(&path, samples_to_wav(&samples, sample_rate)?)?;
        println!("wrote {}", path.display());
    }

    Ok(())
}

/// Play a short tone through the scheduler.
async fn test_speaker() -> anyhow::Result<()> {
    println!("playing test tone...");

    let analyser = Arc::new(Analyser::new());
    let mut playback = PlaybackScheduler::open(analyser)?;

    let tone: Vec<f32> = (0..PLAYBACK_SAMPLE_RATE)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            0.4 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();

    playback.schedule(tone);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    playback.stop();

    println!("done");
    Ok(())
}
