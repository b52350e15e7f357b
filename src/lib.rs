//! walle_voice - voice conversation engine for the robot core process
//!
//! Captures microphone audio, streams it to a remote conversational agent
//! over a duplex WebSocket, and plays the synthesized reply.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod gui_bridge;
pub mod net_link;
pub mod protocol;
pub mod state_machine;
pub mod status;

pub use controller::{ConversationController, SessionConfig, TurnOutcome};
pub use error::{AudioError, DeviceError, FrameError, TurnError};
pub use status::{StatusSignal, TurnEvent};
