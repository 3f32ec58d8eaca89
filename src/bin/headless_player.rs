//! Headless Player
//!
//! Plays a short phrase on the built-in tone backend into a counting sink
//! and reports render statistics.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use synth_bridge::{
    audio::Transfer,
    backend::{EngineBackend, ToneEngine},
    config::PlayerConfig,
    protocol::{ConfigBase, SequencerEvent},
    render::PlayStream,
    FinishReason, PlayerProxy,
};

/// Sink that only counts what it receives
#[derive(Clone, Default)]
struct CountingSink {
    frames: Arc<AtomicU64>,
    peak_bits: Arc<AtomicU64>,
}

impl PlayStream for CountingSink {
    fn start(&mut self, sample_rate: f32) {
        tracing::info!("Sink started at {} Hz", sample_rate);
    }

    fn write(&mut self, left: &[f32], right: &[f32]) -> bool {
        let peak = left
            .iter()
            .chain(right)
            .fold(0.0f64, |acc, s| acc.max(f64::from(s.abs())));
        self.peak_bits.fetch_max(peak.to_bits(), Ordering::Relaxed);
        self.frames.fetch_add(left.len() as u64, Ordering::Relaxed);
        true
    }

    fn stop(&mut self) {
        tracing::info!("Sink stopped");
    }
}

/// Minimal RIFF/sfbk header accepted by the tone engine
fn placeholder_soundfont() -> Transfer<u8> {
    let mut bytes = b"RIFF".to_vec();
    bytes.extend_from_slice(&4u32.to_le_bytes());
    bytes.extend_from_slice(b"sfbk");
    Transfer::new(bytes)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting headless player");

    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => PlayerConfig::default_path()?,
    };
    let config = PlayerConfig::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    let launcher = EngineBackend::new(config.backend.locator.clone(), ToneEngine::new);
    let player = PlayerProxy::from_config(&config, &launcher)
        .await
        .context("starting player")?;

    let mut soundfont = placeholder_soundfont();
    let sfont_id = player.load_soundfont(&mut soundfont, true).await?;
    tracing::info!("Loaded soundfont #{}", sfont_id);

    player
        .configure(ConfigBase {
            gain: Some(0.8),
            ..Default::default()
        })
        .await?;

    let statuses = Arc::new(AtomicU64::new(0));
    let counter = statuses.clone();
    player.set_on_status(move |status| {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Status: {} frames, queue empty: {}",
            status.out_frames,
            status.is_queue_empty
        );
    });
    player.set_on_stop(|| tracing::info!("Playback finished"));

    let sink = CountingSink::default();
    let stream = player.start_for_stream(sink.clone(), &config.render.options())?;

    // C major arpeggio, 250ms apart
    for (i, key) in [60u8, 64, 67, 72].into_iter().enumerate() {
        player.send_event(
            SequencerEvent::Note {
                channel: 0,
                key,
                vel: 100,
                duration: 400,
            },
            Some(i as f64 * 250.0),
        );
    }
    player.send_finish_marker(Some(1250.0));

    let timeout = config.finish_timeout_or_default();
    match player.wait_for_finish(Some(timeout)).await? {
        FinishReason::Stopped => tracing::info!("Backend reported stop"),
        FinishReason::TimedOut => tracing::warn!("No stop within {:?}, forced", timeout),
    }
    stream.join().await;

    player.unload_soundfont(sfont_id).await?;
    player.close();

    let frames = sink.frames.load(Ordering::Relaxed);
    let peak = f64::from_bits(sink.peak_bits.load(Ordering::Relaxed));
    tracing::info!(
        "Rendered {} frames ({:.2}s), peak {:.3}, {} status updates",
        frames,
        frames as f64 / f64::from(player.sample_rate()),
        peak,
        statuses.load(Ordering::Relaxed)
    );

    Ok(())
}
