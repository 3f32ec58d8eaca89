//! # Synth Bridge
//!
//! Drive a synthesizer running in an isolated execution context without
//! blocking either side.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              CONTROLLING CONTEXT             │
//! │  ┌────────────────────────────────────────┐  │
//! │  │          PlayerProxy (proxy)           │  │
//! │  │  ids ──▶ CorrelationTable ◀── replies  │  │
//! │  │  hooks: queued / status / stop / reset │  │
//! │  └───────────┬────────────────────────────┘  │
//! │              │                  ▲            │
//! │  ┌───────────┴────────┐         │            │
//! │  │ Render node        │         │            │
//! │  │ pull / push /      │         │            │
//! │  │ stream adapter     │         │            │
//! │  └──────┬─────────────┘         │            │
//! └─────────┼───────────────────────┼────────────┘
//!           │ render channel        │ control channel
//!           │ render[L,R] / status  │ requests / replies / push
//!           ▼                       ▼
//! ┌──────────────────────────────────────────────┐
//! │              BACKEND THREAD (backend)        │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ Session: select! { control, render }   │  │
//! │  │   └──▶ SynthEngine::render(L, R)       │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod render;

pub use error::{Error, Result};
pub use proxy::{FinishReason, PlayerProxy, PlayerState};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for rendering
    pub const DEFAULT_SAMPLE_RATE: f32 = 48000.0;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default frames per pull-node render block
    pub const DEFAULT_FRAMES_COUNT: usize = 4096;

    /// Default status interval in milliseconds
    pub const DEFAULT_INTERVAL_MS: f64 = 40.0;

    /// Blocks circulating between a node and the backend
    pub const DEFAULT_IN_FLIGHT_BLOCKS: usize = 2;

    /// Default block size for push nodes
    pub const DEFAULT_PUSH_BLOCK_FRAMES: usize = 512;

    /// Default `wait_for_finish` deadline in milliseconds
    pub const DEFAULT_FINISH_TIMEOUT_MS: u64 = 5000;
}
