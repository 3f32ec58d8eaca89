//! Synthesis engine interface consumed by backend sessions

use crate::audio::Transfer;
use crate::error::EngineError;
use crate::protocol::{ConfigBase, SequencerEvent};

/// A synthesizer driven by one backend session
///
/// Event times are milliseconds on the engine's render timeline, which
/// restarts at zero on [`SynthEngine::start`]. `None` means now.
pub trait SynthEngine: Send + 'static {
    /// Load helper modules named by the controlling side
    fn load_dependencies(&mut self, deps: &[String]) -> Result<(), EngineError> {
        if !deps.is_empty() {
            tracing::debug!("Engine ignores {} dependencies", deps.len());
        }
        Ok(())
    }

    fn initialize(&mut self, sample_rate: f32, channel_count: u16) -> Result<(), EngineError>;

    fn configure(&mut self, options: &ConfigBase) -> Result<(), EngineError>;

    /// Returns the id assigned to the soundfont
    fn load_soundfont(&mut self, data: Transfer<u8>) -> Result<i32, EngineError>;

    fn unload_soundfont(&mut self, id: i32) -> Result<(), EngineError>;

    fn send_event(&mut self, event: SequencerEvent, time_ms: Option<f64>);

    fn send_sysex(&mut self, data: Transfer<u8>, time_ms: Option<f64>);

    /// Restart the render timeline
    fn start(&mut self) {}

    /// Fill both planes; returns frames rendered
    fn render(&mut self, left: &mut [f32], right: &mut [f32]) -> usize;

    /// Whether no scheduled events remain
    fn is_queue_empty(&self) -> bool;

    /// Silence all voices and drop scheduled events
    fn reset(&mut self);
}
