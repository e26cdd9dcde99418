//! ttv-demo - end-to-end walk through the audio core
//!
//! Synthesizes a clip, previews it, records a sample from the (simulated)
//! microphone and clones a voice from it, logging every bus event on the way.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ttv_audio::{AudioContext, PlaybackOptions, RecordingCallbacks, SessionSource};
use ttv_common::config::{resolve_config_path, TomlConfig};
use ttv_common::events::{TaskKind, TaskPriority};
use ttv_common::{QualityTier, VoiceProfile};

mod mock_synth;

/// Command-line arguments for ttv-demo
#[derive(Parser, Debug)]
#[command(name = "ttv-demo")]
#[command(about = "Text-to-voice audio core demo")]
#[command(version)]
struct Args {
    /// Config file (overrides TTV_CONFIG and the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text to synthesize
    #[arg(short, long, default_value = "Hello from the text to voice demo")]
    text: String,

    /// Voice id to synthesize with
    #[arg(short, long, default_value = "aria")]
    voice: String,

    /// Seconds of microphone audio to record for cloning
    #[arg(short, long, default_value = "2")]
    record_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = TomlConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ttv_audio={0},ttv_demo={0},ttv_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let context = Arc::new(AudioContext::simulated(&config));
    let event_logger = spawn_event_logger(&context);

    let outcome = tokio::select! {
        result = run_scenario(&context, &args) => result,
        _ = shutdown_signal() => {
            info!("Interrupted, stopping scenario");
            Ok(())
        }
    };

    context.shutdown().await;
    event_logger.abort();

    if let Err(e) = &outcome {
        warn!("Scenario failed: {:#}", e);
    } else {
        info!("Demo complete");
    }
    outcome
}

async fn run_scenario(context: &AudioContext, args: &Args) -> Result<()> {
    let voice = VoiceProfile::new(args.voice.clone(), args.voice.clone(), "narration", QualityTier::Standard);

    // 1. Synthesize under the limiter, landing in the registry
    let text = args.text.clone();
    let synth_voice = voice.clone();
    let clip = context
        .generate(TaskKind::Synthesis, TaskPriority::Normal, None, |ctx| {
            mock_synth::synthesize(ctx, text, synth_voice)
        })
        .await
        .map_err(|e| anyhow!("{} ({})", e.user_message(), e))?;
    info!(resource_id = %clip.id, locator = %clip.locator, size_bytes = clip.size_bytes, "Clip ready");

    // 2. Preview it, releasing the clip once it finishes
    let (ended_tx, ended_rx) = oneshot::channel();
    let (error_tx, error_rx) = oneshot::channel();
    context
        .playback()
        .play(
            &voice.preview_session_id(),
            SessionSource::Resource(clip.id.clone()),
            PlaybackOptions::new()
                .release_source_on_finish()
                .on_ended(move || {
                    let _ = ended_tx.send(());
                })
                .on_error(move |e| {
                    let _ = error_tx.send(e);
                }),
        )
        .await
        .context("Preview failed to start")?;

    tokio::select! {
        _ = ended_rx => info!("Preview finished"),
        Ok(e) = error_rx => return Err(anyhow!(e).context("Preview failed")),
    }

    // 3. Record a sample
    context
        .recording()
        .start(RecordingCallbacks::new().on_error(|e| warn!("Recording failed: {}", e)))
        .await
        .context("Could not start recording")?;
    info!(seconds = args.record_seconds, "Recording sample");
    tokio::time::sleep(Duration::from_secs(args.record_seconds)).await;

    let sample = context
        .recording()
        .stop_and_register(context.registry(), Some("clone-sample".to_string()))
        .await
        .context("Could not finish recording")?
        .ok_or_else(|| anyhow!("Recording captured no audio"))?;
    info!(size_bytes = sample.size_bytes, "Sample captured");

    // 4. Clone a voice from it
    let locator = context.registry().access(&sample.id).await?;
    let sample_bytes = context.registry().read(&locator).await?;
    let cloned = context
        .limiter()
        .run(TaskKind::Cloning, TaskPriority::High, |ctx| {
            mock_synth::clone_voice(ctx, format!("{} (clone)", voice.name), sample_bytes)
        })
        .await
        .map_err(|e| anyhow!(e).context("Cloning failed"))?;
    context.registry().release(&sample.id).await;

    info!(voice = %serde_json::to_string(&cloned)?, "Voice cloned");
    Ok(())
}

/// Log every bus event as JSON
fn spawn_event_logger(context: &AudioContext) -> tokio::task::JoinHandle<()> {
    let mut rx = context.events().subscribe();
    debug!(
        capacity = context.events().capacity(),
        subscribers = context.events().subscriber_count(),
        "Event logger attached"
    );
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!(event_type = event.event_type(), "{}", json),
                    Err(e) => warn!("Unserializable event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
