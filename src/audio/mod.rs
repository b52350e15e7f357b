//! audio - Microphone capture and speaker playback pipelines
//!
//! Uses ALSA for device I/O. Audio travels as mono 16-bit little-endian PCM
//! in both directions; no codec sits between the devices and the wire.

pub mod alsa_device;
mod audio_system;
pub mod capture;
pub mod device;
pub mod frame;
pub mod playback;

pub use audio_system::{AudioConfig, AudioSystem};
pub use device::{InputDevice, OutputDevice};
pub use frame::AudioFrame;
pub use playback::PlaybackQueue;
