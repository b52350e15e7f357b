//! Blocking device traits consumed by the capture and playback threads.
//!
//! Devices are opened once at startup and handed to the pipelines by value;
//! closing a device is dropping it.

use crate::error::DeviceError;

/// A mono 16-bit input device (microphone).
pub trait InputDevice: Send {
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Block until `buf` is filled with the next frame of samples.
    fn read_frame(&mut self, buf: &mut [i16]) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;
}

/// A mono 16-bit output device (speaker).
pub trait OutputDevice: Send {
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Block until every sample in `samples` has been handed to the device.
    fn write_frame(&mut self, samples: &[i16]) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;
}
