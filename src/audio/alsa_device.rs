//! ALSA PCM devices implementing the blocking device traits.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::device::{InputDevice, OutputDevice};
use crate::error::DeviceError;

/// Consecutive failed writes tolerated before the rest of a frame is dropped.
const MAX_WRITE_RETRIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Microphone opened for mono S16LE capture.
pub struct AlsaInput {
    pcm: PCM,
    params: AlsaParams,
}

/// Speaker opened for mono S16LE playback.
pub struct AlsaOutput {
    pcm: PCM,
    params: AlsaParams,
}

/// Open a capture device. `frame_samples` is used as the period size hint.
pub fn open_input(device: &str, sample_rate: u32, frame_samples: usize) -> Result<AlsaInput, DeviceError> {
    let (pcm, params) = open_pcm(device, Direction::Capture, sample_rate, frame_samples, "Capture")?;
    Ok(AlsaInput { pcm, params })
}

/// Open a playback device. `frame_samples` is used as the period size hint.
pub fn open_output(device: &str, sample_rate: u32, frame_samples: usize) -> Result<AlsaOutput, DeviceError> {
    let (pcm, params) = open_pcm(device, Direction::Playback, sample_rate, frame_samples, "Playback")?;
    Ok(AlsaOutput { pcm, params })
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    period_size: usize,
    dir_name: &str,
) -> Result<(PCM, AlsaParams), DeviceError> {
    let open_err = |e: alsa::Error| DeviceError::Open(format!("{} '{}': {}", dir_name, device, e));

    let pcm = PCM::new(device, direction, false).map_err(open_err)?;

    {
        let hwp = HwParams::any(&pcm).map_err(open_err)?;
        hwp.set_access(Access::RWInterleaved).map_err(open_err)?;
        hwp.set_format(Format::S16LE).map_err(open_err)?;
        hwp.set_channels(1).map_err(open_err)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest).map_err(open_err)?;
        if period_size > 0 {
            hwp.set_period_size_near(period_size as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(open_err)?;
        }
        pcm.hw_params(&hwp).map_err(open_err)?;
    }

    let params = {
        let hwp = pcm.hw_params_current().map_err(open_err)?;
        AlsaParams {
            sample_rate: hwp.get_rate().map_err(open_err)?,
            channels: hwp.get_channels().map_err(open_err)?,
            period_size: hwp.get_period_size().map_err(open_err)? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}

impl AlsaInput {
    pub fn params(&self) -> &AlsaParams {
        &self.params
    }
}

impl InputDevice for AlsaInput {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.pcm.prepare().map_err(|e| DeviceError::Start(e.to_string()))?;
        self.pcm.start().map_err(|e| DeviceError::Start(e.to_string()))
    }

    fn read_frame(&mut self, buf: &mut [i16]) -> Result<(), DeviceError> {
        let io = self.pcm.io_i16().map_err(|e| DeviceError::Read(e.to_string()))?;
        let mut filled = 0;
        while filled < buf.len() {
            match io.readi(&mut buf[filled..]) {
                Ok(frames) => filled += frames,
                Err(e) => {
                    let reason = e.to_string();
                    // Overrun: put the stream back into a running state for the next read.
                    if let Err(e2) = self.pcm.try_recover(e, true) {
                        log::error!("Failed to recover PCM capture: {}", e2);
                    }
                    return Err(DeviceError::Read(reason));
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.pcm.drop().map_err(|e| DeviceError::Stop(e.to_string()))
    }
}

impl AlsaOutput {
    pub fn params(&self) -> &AlsaParams {
        &self.params
    }
}

impl OutputDevice for AlsaOutput {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.pcm.prepare().map_err(|e| DeviceError::Start(e.to_string()))
    }

    fn write_frame(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
        let io = self.pcm.io_i16().map_err(|e| DeviceError::Write(e.to_string()))?;
        let mut written = 0;
        let mut retry_count = 0u32;

        while written < samples.len() {
            match io.writei(&samples[written..]) {
                Ok(frames) => {
                    written += frames;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = self.pcm.prepare() {
                        return Err(DeviceError::Write(format!("recovery failed: {}", e2)));
                    }
                    if retry_count >= MAX_WRITE_RETRIES {
                        return Err(DeviceError::Write(format!(
                            "dropped {} unwritten samples after {} retries",
                            samples.len() - written,
                            retry_count
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.pcm.drop().map_err(|e| DeviceError::Stop(e.to_string()))
    }
}
