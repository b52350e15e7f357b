//! Speaker playback thread draining the bounded playback queue.
//!
//! End of speech is detected heuristically: when no frame arrives for the
//! idle timeout the thread emits `TurnEvent::PlaybackDone` and disarms the
//! timer until audio resumes. A response with a long pause in it therefore
//! produces more than one `PlaybackDone`.

use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::device::OutputDevice;
use super::frame::AudioFrame;
use crate::error::AudioError;
use crate::status::{StatusSignal, TurnEvent};

const NAME: &str = "playback";

/// Resources owned by the playback thread while it runs.
struct PlaybackResources {
    device: Box<dyn OutputDevice>,
    queue_rx: mpsc::Receiver<AudioFrame>,
}

struct RunningPlayback {
    control_tx: mpsc::Sender<()>,
    thread: JoinHandle<PlaybackResources>,
}

/// Producer handle for the playback queue.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    tx: mpsc::Sender<AudioFrame>,
}

impl PlaybackQueue {
    /// Wait for room in the queue, then enqueue `frame`.
    pub async fn enqueue(&self, frame: AudioFrame) -> Result<(), AudioError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| AudioError::DeviceUnavailable(NAME))
    }
}

pub struct PlaybackPipeline {
    idle: Option<PlaybackResources>,
    queue_tx: mpsc::Sender<AudioFrame>,
    running: Option<RunningPlayback>,
    status: StatusSignal,
    idle_timeout: Duration,
    settle_delay: Duration,
    stop_timeout: Duration,
}

impl PlaybackPipeline {
    pub fn new(
        device: Box<dyn OutputDevice>,
        queue_capacity: usize,
        status: StatusSignal,
        idle_timeout: Duration,
        settle_delay: Duration,
        stop_timeout: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            idle: Some(PlaybackResources { device, queue_rx }),
            queue_tx,
            running: None,
            status,
            idle_timeout,
            settle_delay,
            stop_timeout,
        }
    }

    pub fn queue(&self) -> PlaybackQueue {
        PlaybackQueue {
            tx: self.queue_tx.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Frames waiting to be played.
    pub fn queued(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.is_some() {
            return Err(AudioError::AlreadyRunning(NAME));
        }

        let mut resources = self.idle.take().ok_or(AudioError::DeviceUnavailable(NAME))?;
        if let Err(e) = resources.device.start() {
            log::error!("Failed to start audio out: {}", e);
            self.idle = Some(resources);
            return Err(e.into());
        }

        let (control_tx, control_rx) = mpsc::channel(1);
        let status = self.status.clone();
        let idle_timeout = self.idle_timeout;

        let spawned = thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || playback_thread(resources, control_rx, status, idle_timeout));

        match spawned {
            Ok(thread) => {
                self.running = Some(RunningPlayback { control_tx, thread });
                log::info!("Playback started (idle timeout {:?})", self.idle_timeout);
                Ok(())
            }
            Err(e) => Err(AudioError::Thread(format!("failed to spawn playback thread: {}", e))),
        }
    }

    pub async fn stop(&mut self) -> Result<(), AudioError> {
        let running = self.running.take().ok_or(AudioError::NotRunning(NAME))?;

        if running.control_tx.try_send(()).is_err() {
            log::debug!("Playback loop already exited before stop");
        }

        let thread = running.thread;
        let joined = tokio::time::timeout(
            self.stop_timeout,
            tokio::task::spawn_blocking(move || thread.join()),
        )
        .await;

        match joined {
            Err(_) => Err(AudioError::StopTimeout(NAME)),
            Ok(Err(e)) => Err(AudioError::Thread(e.to_string())),
            Ok(Ok(Err(_))) => Err(AudioError::Thread("playback thread panicked".into())),
            Ok(Ok(Ok(resources))) => {
                self.idle = Some(resources);
                log::info!("Playback stopped");
                Ok(())
            }
        }
    }

    /// Stop, let the device settle, start again. Some backends misbehave when
    /// the output is restarted immediately.
    pub async fn reset(&mut self) -> Result<(), AudioError> {
        self.stop().await?;
        tokio::time::sleep(self.settle_delay).await;
        self.start()
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.control_tx.try_send(());
        }
    }
}

fn playback_thread(
    mut resources: PlaybackResources,
    mut control_rx: mpsc::Receiver<()>,
    status: StatusSignal,
    idle_timeout: Duration,
) -> PlaybackResources {
    let rt = tokio::runtime::Builder::new_current_thread().enable_time().build();
    match rt {
        Ok(rt) => rt.block_on(playback_loop(&mut resources, &mut control_rx, &status, idle_timeout)),
        Err(e) => log::error!("Failed to build playback runtime: {}", e),
    }

    if let Err(e) = resources.device.stop() {
        log::error!("Failed to stop output audio stream: {}", e);
    }
    resources
}

async fn playback_loop(
    resources: &mut PlaybackResources,
    control_rx: &mut mpsc::Receiver<()>,
    status: &StatusSignal,
    idle_timeout: Duration,
) {
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);
    let mut armed = false;

    loop {
        tokio::select! {
            biased;
            _ = control_rx.recv() => return,
            frame = resources.queue_rx.recv() => {
                let Some(frame) = frame else {
                    log::info!("Playback queue closed");
                    return;
                };
                idle.as_mut().reset(Instant::now() + idle_timeout);
                armed = true;

                log::trace!("Audio chunk size: {}", frame.len_bytes());
                let samples = match frame.samples() {
                    Ok(samples) => samples,
                    Err(e) => {
                        log::warn!("Failed to convert audio chunk: {}", e);
                        continue;
                    }
                };
                if let Err(e) = resources.device.write_frame(&samples) {
                    log::warn!("Failed to write to audio out: {}", e);
                }
            }
            () = &mut idle, if armed => {
                armed = false;
                log::debug!("Finished audio playback session");
                status.emit(TurnEvent::PlaybackDone);
            }
        }
    }
}
