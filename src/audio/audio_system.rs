//! The AudioSystem that owns the capture and playback pipelines.
//!
//! Both pipelines run their device I/O on dedicated std threads (NOT tokio
//! tasks) so blocking ALSA calls never contend with the network tasks.

use std::time::Duration;

use super::alsa_device;
use super::capture::CapturePipeline;
use super::device::{InputDevice, OutputDevice};
use super::playback::{PlaybackPipeline, PlaybackQueue};
use crate::error::{AudioError, DeviceError};
use crate::status::StatusSignal;

/// Audio system configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Sample rate shared by both directions and the wire format
    pub sample_rate: u32,
    /// Samples per captured frame (8000 = 0.5 s at 16 kHz)
    pub capture_frame_samples: usize,
    /// Playback period hint handed to ALSA
    pub playback_frame_samples: usize,
    pub capture_queue_capacity: usize,
    pub playback_queue_capacity: usize,
    /// Silence after the last played frame before PLAYBACK_DONE fires
    pub playback_idle_timeout: Duration,
    /// Pause between stop and start in `reset_playback`
    pub playback_settle: Duration,
    /// Upper bound on waiting for a pipeline thread to exit
    pub stop_timeout: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            sample_rate: 16000,
            capture_frame_samples: 8000,
            playback_frame_samples: 800,
            capture_queue_capacity: 10,
            playback_queue_capacity: 1000,
            playback_idle_timeout: Duration::from_millis(900),
            playback_settle: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

/// Capture and playback pipelines with their devices.
///
/// - Capture thread: device → `AudioFrame` → capture queue
/// - Playback thread: playback queue → device, PLAYBACK_DONE on silence
pub struct AudioSystem {
    pub(crate) capture: CapturePipeline,
    pub(crate) playback: PlaybackPipeline,
}

impl AudioSystem {
    /// Build the system around already opened devices.
    pub fn new(
        config: &AudioConfig,
        input: Box<dyn InputDevice>,
        output: Box<dyn OutputDevice>,
        status: StatusSignal,
    ) -> Self {
        let capture = CapturePipeline::new(
            input,
            config.capture_frame_samples,
            config.capture_queue_capacity,
            config.stop_timeout,
        );
        let playback = PlaybackPipeline::new(
            output,
            config.playback_queue_capacity,
            status,
            config.playback_idle_timeout,
            config.playback_settle,
            config.stop_timeout,
        );
        Self { capture, playback }
    }

    /// Open the configured ALSA devices. Failure here is fatal for the caller.
    pub fn open_alsa(config: &AudioConfig, status: StatusSignal) -> Result<Self, DeviceError> {
        log::info!(
            "AudioSystem opening - capture: \"{}\", playback: \"{}\", rate: {}Hz",
            config.capture_device,
            config.playback_device,
            config.sample_rate,
        );

        let input = alsa_device::open_input(
            &config.capture_device,
            config.sample_rate,
            config.capture_frame_samples,
        )?;
        let output = alsa_device::open_output(
            &config.playback_device,
            config.sample_rate,
            config.playback_frame_samples,
        )?;
        if input.params().sample_rate != config.sample_rate
            || output.params().sample_rate != config.sample_rate
        {
            log::warn!(
                "Hardware negotiated {}/{} Hz instead of {} Hz",
                input.params().sample_rate,
                output.params().sample_rate,
                config.sample_rate
            );
        }

        Ok(Self::new(config, Box::new(input), Box::new(output), status))
    }

    pub fn start_capture(&mut self) -> Result<(), AudioError> {
        self.capture.start()
    }

    pub async fn stop_capture(&mut self) -> Result<(), AudioError> {
        self.capture.stop().await
    }

    pub fn start_playback(&mut self) -> Result<(), AudioError> {
        self.playback.start()
    }

    pub async fn stop_playback(&mut self) -> Result<(), AudioError> {
        self.playback.stop().await
    }

    pub async fn reset_playback(&mut self) -> Result<(), AudioError> {
        self.playback.reset().await
    }

    pub fn playback_queue(&self) -> PlaybackQueue {
        self.playback.queue()
    }

    pub fn capture_running(&self) -> bool {
        self.capture.is_running()
    }

    pub fn playback_running(&self) -> bool {
        self.playback.is_running()
    }

    /// Stop whatever is running. Both pipelines are attempted; the first
    /// error is returned.
    pub async fn shutdown(&mut self) -> Result<(), AudioError> {
        let mut first_err = None;
        if self.capture.is_running() || self.capture.is_stopping() {
            if let Err(e) = self.capture.stop().await {
                log::error!("Failed to stop capture on shutdown: {}", e);
                first_err.get_or_insert(e);
            }
        }
        if self.playback.is_running() {
            if let Err(e) = self.playback.stop().await {
                log::error!("Failed to stop playback on shutdown: {}", e);
                first_err.get_or_insert(e);
            }
        }
        log::info!("AudioSystem shut down");
        first_err.map_or(Ok(()), Err)
    }
}
