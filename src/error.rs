//! Error types for the synthesizer bridge

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ReplyKind;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Control channel closed")]
    ChannelClosed,

    #[error("Player proxy is closed")]
    Closed,

    #[error("Remote failed {kind:?}: {message}")]
    Remote { kind: ReplyKind, message: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire codec errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Buffer is detached")]
    Detached,
}

/// Render channel and node errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Render channel closed")]
    ChannelClosed,

    #[error("Invalid frame count: {0}")]
    InvalidFrameCount(usize),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    #[error("Output stream error: {0}")]
    Stream(String),
}

/// Errors reported by a synthesis engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid soundfont: {0}")]
    InvalidSoundfont(String),

    #[error("Soundfont not loaded: {0}")]
    SoundfontNotFound(i32),

    #[error("Dependency failed to load: {0}")]
    Dependency(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("No config directory available")]
    NoConfigDir,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
