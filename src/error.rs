//! Error types for the audio pipelines and the conversation stream.

use std::time::Duration;

/// A PCM buffer that cannot be interpreted as 16-bit samples.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("PCM buffer of {0} bytes is not a whole number of 16-bit samples")]
    OddLength(usize),
}

/// Failure reported by an audio device adapter.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to open device: {0}")]
    Open(String),

    #[error("failed to start device: {0}")]
    Start(String),

    #[error("device read failed: {0}")]
    Read(String),

    #[error("device write failed: {0}")]
    Write(String),

    #[error("failed to stop device: {0}")]
    Stop(String),
}

/// Lifecycle errors of the capture and playback pipelines.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("{0} is not running")]
    NotRunning(&'static str),

    /// The pipeline lost its device after a start/stop failure.
    #[error("{0} has no usable device")]
    DeviceUnavailable(&'static str),

    #[error("{0} did not stop within the allotted time")]
    StopTimeout(&'static str),

    #[error("audio thread error: {0}")]
    Thread(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Why a conversation turn failed.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// Connect, send or receive failure on the duplex stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The session deadline expired before the remote closed the stream.
    #[error("conversation exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("conversation turn cancelled")]
    Cancelled,

    #[error("audio pipeline error: {0}")]
    Audio(#[from] AudioError),

    /// An outbound message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TurnError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        TurnError::Transport(err.to_string())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TurnError::Timeout(_))
    }
}

impl From<serde_json::Error> for TurnError {
    fn from(err: serde_json::Error) -> Self {
        TurnError::Protocol(err.to_string())
    }
}
