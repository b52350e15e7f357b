//! Microphone capture thread feeding the bounded capture queue.
//!
//! The device is moved into the `audio-capture` thread on `start()` and comes
//! back through the thread's join handle on `stop()`. Stop requests travel on
//! the control channel the loop listens on, and the loop prefers that channel
//! over a full queue, so a stalled consumer can never hold capture open.
//!
//! The join is kept on the pipeline until its result is collected. A `stop()`
//! that is cancelled or times out leaves the pipeline stopping, and the next
//! `stop()` (or a `start()` once the thread has exited) reclaims the device.

use futures_util::FutureExt;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use super::device::InputDevice;
use super::frame::AudioFrame;
use crate::error::{AudioError, DeviceError};

const NAME: &str = "capture";

/// Pause after a failed device read so a dead device doesn't spin the thread.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(20);

enum CaptureControl {
    Stop,
}

type CaptureExit = Result<Box<dyn InputDevice>, DeviceError>;

struct RunningCapture {
    control_tx: mpsc::Sender<CaptureControl>,
    thread: JoinHandle<CaptureExit>,
}

/// Join of an exiting capture thread, run on the blocking pool.
type ExitJoin = tokio::task::JoinHandle<thread::Result<CaptureExit>>;

pub struct CapturePipeline {
    device: Option<Box<dyn InputDevice>>,
    frame_samples: usize,
    stop_timeout: Duration,
    queue_tx: mpsc::Sender<AudioFrame>,
    queue_rx: mpsc::Receiver<AudioFrame>,
    running: Option<RunningCapture>,
    exiting: Option<ExitJoin>,
}

impl CapturePipeline {
    pub fn new(
        device: Box<dyn InputDevice>,
        frame_samples: usize,
        queue_capacity: usize,
        stop_timeout: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            device: Some(device),
            frame_samples,
            stop_timeout,
            queue_tx,
            queue_rx,
            running: None,
            exiting: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// A stop was requested but the device has not been handed back yet.
    pub fn is_stopping(&self) -> bool {
        self.exiting.is_some()
    }

    /// Frames currently waiting in the capture queue.
    pub fn queued(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.is_some() {
            return Err(AudioError::AlreadyRunning(NAME));
        }
        if let Some(exiting) = self.exiting.as_mut() {
            match exiting.now_or_never() {
                Some(joined) => {
                    self.exiting = None;
                    self.reclaim(joined)?;
                }
                None => return Err(AudioError::StopTimeout(NAME)),
            }
        }

        let residue = self.queued();
        if residue > 0 {
            log::warn!("Capture queue still holds {} frames from a previous turn", residue);
        }

        let mut device = self.device.take().ok_or(AudioError::DeviceUnavailable(NAME))?;
        if let Err(e) = device.start() {
            log::error!("Failed to start audio in: {}", e);
            self.device = Some(device);
            return Err(e.into());
        }

        let (control_tx, control_rx) = mpsc::channel(1);
        let queue_tx = self.queue_tx.clone();
        let frame_samples = self.frame_samples;

        let spawned = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture_thread(device, frame_samples, queue_tx, control_rx));

        match spawned {
            Ok(thread) => {
                self.running = Some(RunningCapture { control_tx, thread });
                log::info!("Capture started ({} samples per frame)", self.frame_samples);
                Ok(())
            }
            Err(e) => Err(AudioError::Thread(format!("failed to spawn capture thread: {}", e))),
        }
    }

    /// Stop capture and wait for the thread to hand the device back.
    ///
    /// Also finishes a stop that an earlier call gave up on.
    pub async fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(running) = self.running.take() {
            // A closed channel means the loop already exited; joining still reclaims the device.
            if running.control_tx.try_send(CaptureControl::Stop).is_err() {
                log::debug!("Capture loop already exited before stop");
            }
            let thread = running.thread;
            self.exiting = Some(tokio::task::spawn_blocking(move || thread.join()));
        }

        let exiting = self.exiting.as_mut().ok_or(AudioError::NotRunning(NAME))?;
        let joined = match tokio::time::timeout(self.stop_timeout, exiting).await {
            Ok(joined) => joined,
            Err(_) => {
                log::warn!("Capture thread still busy after {:?}", self.stop_timeout);
                return Err(AudioError::StopTimeout(NAME));
            }
        };
        self.exiting = None;
        self.reclaim(joined)
    }

    fn reclaim(&mut self, joined: Result<thread::Result<CaptureExit>, tokio::task::JoinError>) -> Result<(), AudioError> {
        let exit = match joined {
            Err(e) => return Err(AudioError::Thread(e.to_string())),
            Ok(Err(_)) => return Err(AudioError::Thread("capture thread panicked".into())),
            Ok(Ok(exit)) => exit,
        };

        match exit {
            Ok(device) => {
                self.device = Some(device);
                log::info!("Capture stopped");
                Ok(())
            }
            Err(e) => {
                log::error!("Capture device failed to stop, pipeline disabled: {}", e);
                Err(e.into())
            }
        }
    }

    /// Next captured frame, in capture order.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.queue_rx.recv().await
    }

    /// Discard whatever is left in the queue, returning how many frames were dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.queue_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.control_tx.try_send(CaptureControl::Stop);
        }
    }
}

fn capture_thread(
    mut device: Box<dyn InputDevice>,
    frame_samples: usize,
    queue_tx: mpsc::Sender<AudioFrame>,
    mut control_rx: mpsc::Receiver<CaptureControl>,
) -> CaptureExit {
    match tokio::runtime::Builder::new_current_thread().build() {
        Ok(rt) => rt.block_on(capture_loop(&mut *device, frame_samples, &queue_tx, &mut control_rx)),
        Err(e) => log::error!("Failed to build capture runtime: {}", e),
    }

    device.stop()?;
    Ok(device)
}

async fn capture_loop(
    device: &mut dyn InputDevice,
    frame_samples: usize,
    queue_tx: &mpsc::Sender<AudioFrame>,
    control_rx: &mut mpsc::Receiver<CaptureControl>,
) {
    let mut buf = vec![0i16; frame_samples];

    loop {
        match control_rx.try_recv() {
            Ok(CaptureControl::Stop) | Err(mpsc::error::TryRecvError::Disconnected) => return,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        if let Err(e) = device.read_frame(&mut buf) {
            log::error!("Failed to read input stream: {}", e);
            thread::sleep(READ_ERROR_BACKOFF);
            continue;
        }
        let frame = AudioFrame::from_samples(&buf);

        tokio::select! {
            biased;
            _ = control_rx.recv() => {
                log::warn!("Capture stopped with a frame pending; frame discarded");
                return;
            }
            permit = queue_tx.reserve() => match permit {
                Ok(permit) => permit.send(frame),
                Err(_) => {
                    log::warn!("Capture queue closed, stopping capture");
                    return;
                }
            }
        }
    }
}
