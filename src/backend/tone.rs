//! Built-in sine synthesizer
//!
//! Small enough to run anywhere, complete enough to exercise the protocol:
//! timed note events, per-channel volume and pitch bend, soundfont
//! bookkeeping and reset.

use std::collections::HashMap;
use std::f32::consts::TAU;

use crate::audio::Transfer;
use crate::backend::engine::SynthEngine;
use crate::error::EngineError;
use crate::protocol::{ConfigBase, SequencerEvent};

const CHANNELS: usize = 16;
const VOICE_LEVEL: f32 = 0.2;
const DRUM_DECAY: f32 = 0.9995;

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    program: u8,
    volume: f32,
    /// Pitch bend in semitones
    bend: f32,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            program: 0,
            volume: 1.0,
            bend: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct Voice {
    channel: u8,
    key: u8,
    phase: f32,
    amp: f32,
    decay: f32,
}

#[derive(Debug, Clone)]
struct Scheduled {
    frame: u64,
    event: SequencerEvent,
}

pub struct ToneEngine {
    sample_rate: f32,
    gain: f32,
    channel16_is_drums: bool,
    position: u64,
    channels: [ChannelState; CHANNELS],
    voices: Vec<Voice>,
    /// Sorted by frame; equal frames keep arrival order
    scheduled: Vec<Scheduled>,
    soundfonts: HashMap<i32, usize>,
    next_sfont_id: i32,
    sysex_received: usize,
}

impl Default for ToneEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneEngine {
    pub fn new() -> Self {
        Self {
            sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
            gain: 1.0,
            channel16_is_drums: false,
            position: 0,
            channels: [ChannelState::default(); CHANNELS],
            voices: Vec::new(),
            scheduled: Vec::new(),
            soundfonts: HashMap::new(),
            next_sfont_id: 1,
            sysex_received: 0,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn loaded_soundfonts(&self) -> usize {
        self.soundfonts.len()
    }

    pub fn sysex_received(&self) -> usize {
        self.sysex_received
    }

    fn ms_to_frame(&self, ms: f64) -> u64 {
        (ms.max(0.0) * f64::from(self.sample_rate) / 1000.0) as u64
    }

    fn schedule(&mut self, frame: u64, event: SequencerEvent) {
        let index = self.scheduled.partition_point(|s| s.frame <= frame);
        self.scheduled.insert(index, Scheduled { frame, event });
    }

    fn is_drum_channel(&self, channel: u8) -> bool {
        channel == 9 || (self.channel16_is_drums && channel == 15)
    }

    fn apply(&mut self, event: SequencerEvent) {
        match event {
            SequencerEvent::NoteOn { channel, key, vel } if vel == 0 => {
                self.release(channel, key);
            }
            SequencerEvent::NoteOn { channel, key, vel } => self.note_on(channel, key, vel),
            SequencerEvent::NoteOff { channel, key } => self.release(channel, key),
            SequencerEvent::Note {
                channel,
                key,
                vel,
                duration,
            } => {
                self.note_on(channel, key, vel);
                let off = self.position + self.ms_to_frame(f64::from(duration));
                self.schedule(off, SequencerEvent::NoteOff { channel, key });
            }
            SequencerEvent::AllNotesOff { channel } | SequencerEvent::AllSoundsOff { channel } => {
                self.voices.retain(|v| v.channel != channel);
            }
            SequencerEvent::ProgramChange { channel, preset } => {
                if let Some(state) = self.channels.get_mut(channel as usize) {
                    state.program = preset;
                }
            }
            SequencerEvent::ControlChange {
                channel,
                control,
                value,
            } => match control {
                7 => {
                    if let Some(state) = self.channels.get_mut(channel as usize) {
                        state.volume = f32::from(value) / 127.0;
                    }
                }
                120 | 123 => self.voices.retain(|v| v.channel != channel),
                _ => {}
            },
            SequencerEvent::PitchBend { channel, value } => {
                if let Some(state) = self.channels.get_mut(channel as usize) {
                    state.bend = (f32::from(value) - 8192.0) / 8192.0 * 2.0;
                }
            }
            SequencerEvent::SystemReset => {
                self.voices.clear();
                self.channels = [ChannelState::default(); CHANNELS];
            }
            SequencerEvent::BankSelect { .. }
            | SequencerEvent::ChannelPressure { .. }
            | SequencerEvent::KeyPressure { .. }
            | SequencerEvent::Unknown => {}
        }
    }

    fn note_on(&mut self, channel: u8, key: u8, vel: u8) {
        if channel as usize >= CHANNELS {
            return;
        }
        let decay = if self.is_drum_channel(channel) {
            DRUM_DECAY
        } else {
            1.0
        };
        self.voices.push(Voice {
            channel,
            key,
            phase: 0.0,
            amp: f32::from(vel) / 127.0,
            decay,
        });
    }

    fn release(&mut self, channel: u8, key: u8) {
        self.voices.retain(|v| !(v.channel == channel && v.key == key));
    }

    fn apply_due(&mut self) {
        while self
            .scheduled
            .first()
            .is_some_and(|s| s.frame <= self.position)
        {
            let due = self.scheduled.remove(0);
            self.apply(due.event);
        }
    }

    fn next_sample(&mut self) -> f32 {
        let mut sum = 0.0;
        for voice in &mut self.voices {
            let state = self.channels[voice.channel as usize];
            let note = f32::from(voice.key) + state.bend;
            let freq = 440.0 * 2f32.powf((note - 69.0) / 12.0);
            let mut sample = voice.phase.sin();
            if state.program % 2 == 1 {
                sample = 0.7 * sample + 0.3 * (2.0 * voice.phase).sin();
            }
            sum += sample * voice.amp * state.volume * VOICE_LEVEL;
            voice.phase = (voice.phase + TAU * freq / self.sample_rate) % TAU;
            voice.amp *= voice.decay;
        }
        self.voices.retain(|v| v.amp > 1e-4);
        sum * self.gain
    }
}

impl SynthEngine for ToneEngine {
    fn initialize(&mut self, sample_rate: f32, _channel_count: u16) -> Result<(), EngineError> {
        if sample_rate <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn configure(&mut self, options: &ConfigBase) -> Result<(), EngineError> {
        if let Some(gain) = options.gain {
            if !(gain >= 0.0) {
                return Err(EngineError::InvalidConfig(format!("gain {}", gain)));
            }
            self.gain = gain;
        }
        if let Some(drums) = options.channel16_is_drums {
            self.channel16_is_drums = drums;
        }
        Ok(())
    }

    fn load_soundfont(&mut self, data: Transfer<u8>) -> Result<i32, EngineError> {
        let bytes = data.as_slice();
        if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"sfbk" {
            return Err(EngineError::InvalidSoundfont(format!(
                "missing RIFF/sfbk header ({} bytes)",
                bytes.len()
            )));
        }
        let id = self.next_sfont_id;
        self.next_sfont_id += 1;
        self.soundfonts.insert(id, bytes.len());
        Ok(id)
    }

    fn unload_soundfont(&mut self, id: i32) -> Result<(), EngineError> {
        self.soundfonts
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::SoundfontNotFound(id))
    }

    fn send_event(&mut self, event: SequencerEvent, time_ms: Option<f64>) {
        match time_ms {
            Some(ms) if self.ms_to_frame(ms) > self.position => {
                let frame = self.ms_to_frame(ms);
                self.schedule(frame, event);
            }
            _ => self.apply(event),
        }
    }

    fn send_sysex(&mut self, data: Transfer<u8>, _time_ms: Option<f64>) {
        // GM system on
        if data.as_slice() == [0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7] {
            self.apply(SequencerEvent::SystemReset);
        }
        self.sysex_received += 1;
    }

    fn start(&mut self) {
        self.position = 0;
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        let frames = left.len().min(right.len());
        for i in 0..frames {
            self.apply_due();
            let sample = self.next_sample();
            left[i] = sample;
            right[i] = sample;
            self.position += 1;
        }
        frames
    }

    fn is_queue_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    fn reset(&mut self) {
        self.voices.clear();
        self.scheduled.clear();
        self.channels = [ChannelState::default(); CHANNELS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ToneEngine {
        let mut engine = ToneEngine::new();
        engine.initialize(1000.0, 2).unwrap();
        engine
    }

    #[test]
    fn test_note_produces_sound_until_released() {
        let mut engine = engine();
        engine.send_event(
            SequencerEvent::NoteOn {
                channel: 0,
                key: 69,
                vel: 127,
            },
            None,
        );
        let mut left = vec![0.0; 16];
        let mut right = vec![0.0; 16];
        assert_eq!(engine.render(&mut left, &mut right), 16);
        assert!(left.iter().any(|s| s.abs() > 0.01));
        assert_eq!(left, right);

        engine.send_event(SequencerEvent::NoteOff { channel: 0, key: 69 }, None);
        engine.render(&mut left, &mut right);
        assert!(left.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_timed_events_wait_for_position() {
        let mut engine = engine();
        // 10ms at 1kHz is frame 10
        engine.send_event(
            SequencerEvent::NoteOn {
                channel: 0,
                key: 60,
                vel: 100,
            },
            Some(10.0),
        );
        assert!(!engine.is_queue_empty());

        let mut left = vec![0.0; 8];
        let mut right = vec![0.0; 8];
        engine.render(&mut left, &mut right);
        assert_eq!(engine.active_voices(), 0);

        engine.render(&mut left, &mut right);
        assert_eq!(engine.active_voices(), 1);
        assert!(engine.is_queue_empty());
    }

    #[test]
    fn test_note_with_duration_schedules_release() {
        let mut engine = engine();
        engine.send_event(
            SequencerEvent::Note {
                channel: 1,
                key: 64,
                vel: 90,
                duration: 4,
            },
            None,
        );
        assert_eq!(engine.active_voices(), 1);
        let mut left = vec![0.0; 8];
        let mut right = vec![0.0; 8];
        engine.render(&mut left, &mut right);
        assert_eq!(engine.active_voices(), 0);
    }

    #[test]
    fn test_soundfont_bookkeeping() {
        let mut engine = engine();
        let sf = b"RIFF\x04\x00\x00\x00sfbk".to_vec();
        let first = engine.load_soundfont(Transfer::new(sf.clone())).unwrap();
        let second = engine.load_soundfont(Transfer::new(sf)).unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.loaded_soundfonts(), 2);

        engine.unload_soundfont(first).unwrap();
        assert_eq!(
            engine.unload_soundfont(first),
            Err(EngineError::SoundfontNotFound(first))
        );
        assert!(matches!(
            engine.load_soundfont(Transfer::new(vec![0; 4])),
            Err(EngineError::InvalidSoundfont(_))
        ));
    }

    #[test]
    fn test_configure_validates_gain() {
        let mut engine = engine();
        let bad = ConfigBase {
            gain: Some(-1.0),
            ..Default::default()
        };
        assert!(engine.configure(&bad).is_err());
        let good = ConfigBase {
            gain: Some(0.5),
            channel16_is_drums: Some(true),
            ..Default::default()
        };
        assert!(engine.configure(&good).is_ok());
        assert!(engine.is_drum_channel(15));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut engine = engine();
        engine.send_event(
            SequencerEvent::NoteOn {
                channel: 0,
                key: 60,
                vel: 100,
            },
            None,
        );
        engine.send_event(SequencerEvent::AllNotesOff { channel: 0 }, Some(500.0));
        engine.reset();
        assert_eq!(engine.active_voices(), 0);
        assert!(engine.is_queue_empty());
    }
}
