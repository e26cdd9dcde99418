//! Stand-in synthesis and cloning
//!
//! No speech engine here. Synthesis renders a tone whose length follows the
//! text and whose pitch follows the voice; cloning checks that the sample is
//! usable WAV audio and mints a new voice.

use bytes::Bytes;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;
use ttv_audio::error::TaskError;
use ttv_audio::tone::render_tone_wav;
use ttv_audio::TaskContext;
use ttv_common::{QualityTier, VoiceProfile};

const SAMPLE_RATE: u32 = 22050;
const MILLIS_PER_CHAR: u64 = 60;
const MIN_CLIP: Duration = Duration::from_millis(500);
const MAX_CLIP: Duration = Duration::from_secs(10);
const WORK_STEPS: u64 = 10;
const STEP_DELAY: Duration = Duration::from_millis(30);

/// Shortest sample accepted for cloning
pub const MIN_CLONE_SAMPLE: Duration = Duration::from_secs(1);

fn clip_length(text: &str) -> Duration {
    let chars = text.chars().filter(|c| !c.is_whitespace()).count() as u64;
    Duration::from_millis(chars * MILLIS_PER_CHAR).clamp(MIN_CLIP, MAX_CLIP)
}

/// 180-420 Hz, stable per voice id
fn voice_pitch(voice: &VoiceProfile) -> f32 {
    let hash = voice
        .id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    180.0 + (hash % 241) as f32
}

/// Pretend work in cancellable steps, reporting progress up to `ceiling`
async fn work(ctx: &TaskContext, ceiling: u8, message: &str) -> Result<(), TaskError> {
    for step in 1..=WORK_STEPS {
        ctx.check_cancelled()?;
        tokio::time::sleep(STEP_DELAY).await;
        let percent = (step * ceiling as u64 / WORK_STEPS) as u8;
        ctx.progress().report(percent, Some(message));
    }
    ctx.check_cancelled()
}

pub async fn synthesize(ctx: TaskContext, text: String, voice: VoiceProfile) -> Result<Bytes, TaskError> {
    if text.trim().is_empty() {
        return Err(ctx.failed("nothing to synthesize"));
    }

    work(&ctx, 90, "synthesizing").await?;

    let length = clip_length(&text);
    let pitch = voice_pitch(&voice);
    let wav = render_tone_wav(pitch, length, SAMPLE_RATE, 0.4).map_err(|e| ctx.failed(e.to_string()))?;
    ctx.progress().report(100, Some("done"));

    debug!(task_id = ctx.id(), voice = %voice.id, ?length, pitch, "Synthesized placeholder clip");
    Ok(wav)
}

pub async fn clone_voice(ctx: TaskContext, name: String, sample: Bytes) -> Result<VoiceProfile, TaskError> {
    let reader = hound::WavReader::new(Cursor::new(sample.as_ref()))
        .map_err(|e| ctx.failed(format!("sample is not WAV audio: {}", e)))?;
    let spec = reader.spec();
    let length = Duration::from_secs_f64(reader.duration() as f64 / spec.sample_rate.max(1) as f64);
    if length < MIN_CLONE_SAMPLE {
        return Err(ctx.failed(format!(
            "sample too short: {:?} (need at least {:?})",
            length, MIN_CLONE_SAMPLE
        )));
    }

    work(&ctx, 100, "cloning").await?;

    Ok(VoiceProfile::new(
        format!("cloned-{}", ttv_common::uuid_utils::generate_string()),
        name,
        "custom",
        QualityTier::Cloned,
    ))
}
