//! Shared test utilities: scripted audio devices and an in-memory duplex link.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use walle_voice::audio::{AudioConfig, AudioSystem, InputDevice, OutputDevice};
use walle_voice::net_link::{Connector, InboundHalf, OutboundHalf, StaticToken};
use walle_voice::protocol::{ClientMessage, ServerMessage};
use walle_voice::{ConversationController, DeviceError, SessionConfig, StatusSignal, TurnError};

pub const FRAME_SAMPLES: usize = 160;

/// Start/stop/read counters shared with the test body.
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub reads: AtomicUsize,
}

impl DeviceStats {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

pub enum ReadStep {
    /// Fill the frame with this sample value
    Fill(i16),
    Fail(&'static str),
}

/// Microphone that plays back a script, then either keeps producing frames
/// (`endless`) or reports itself exhausted on every read.
pub struct ScriptedInput {
    script: VecDeque<ReadStep>,
    endless: Option<i16>,
    read_delay: Duration,
    first_read_delay: Option<Duration>,
    stats: Arc<DeviceStats>,
}

impl ScriptedInput {
    pub fn new(script: Vec<ReadStep>) -> (Self, Arc<DeviceStats>) {
        let stats = Arc::new(DeviceStats::default());
        let input = Self {
            script: script.into(),
            endless: None,
            read_delay: Duration::from_millis(5),
            first_read_delay: None,
            stats: stats.clone(),
        };
        (input, stats)
    }

    pub fn silent_frames(count: usize) -> (Self, Arc<DeviceStats>) {
        Self::new((0..count).map(|_| ReadStep::Fill(0)).collect())
    }

    pub fn endless(value: i16) -> (Self, Arc<DeviceStats>) {
        let (mut input, stats) = Self::new(Vec::new());
        input.endless = Some(value);
        input.read_delay = Duration::from_millis(1);
        (input, stats)
    }

    /// Make the first read block for `delay`, like a device still filling
    /// its first period.
    pub fn with_slow_first_read(mut self, delay: Duration) -> Self {
        self.first_read_delay = Some(delay);
        self
    }
}

impl InputDevice for ScriptedInput {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [i16]) -> Result<(), DeviceError> {
        std::thread::sleep(self.first_read_delay.take().unwrap_or(self.read_delay));
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(ReadStep::Fill(value)) => {
                buf.fill(value);
                Ok(())
            }
            Some(ReadStep::Fail(reason)) => Err(DeviceError::Read(reason.to_string())),
            None => match self.endless {
                Some(value) => {
                    buf.fill(value);
                    Ok(())
                }
                None => {
                    std::thread::sleep(Duration::from_millis(10));
                    Err(DeviceError::Read("script exhausted".into()))
                }
            },
        }
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Speaker that records every frame written to it.
pub struct RecordingOutput {
    written: Arc<Mutex<Vec<Vec<i16>>>>,
    stats: Arc<DeviceStats>,
}

#[derive(Clone)]
pub struct Recorded {
    written: Arc<Mutex<Vec<Vec<i16>>>>,
    pub stats: Arc<DeviceStats>,
}

impl Recorded {
    pub fn frames(&self) -> Vec<Vec<i16>> {
        self.written.lock().unwrap().clone()
    }

    /// Poll until `count` frames were written or `limit` elapses.
    pub async fn wait_for_frames(&self, count: usize, limit: Duration) -> Vec<Vec<i16>> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let frames = self.frames();
            if frames.len() >= count || tokio::time::Instant::now() >= deadline {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl RecordingOutput {
    pub fn new() -> (Self, Recorded) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(DeviceStats::default());
        let output = Self {
            written: written.clone(),
            stats: stats.clone(),
        };
        (output, Recorded { written, stats })
    }
}

impl OutputDevice for RecordingOutput {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_frame(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
        self.written.lock().unwrap().push(samples.to_vec());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The agent's side of one scripted stream.
pub struct RemoteEnd {
    pub from_client: mpsc::UnboundedReceiver<ClientMessage>,
    /// Dropping this closes the stream as seen by the client.
    pub to_client: mpsc::UnboundedSender<Result<ServerMessage, TurnError>>,
    pub shutdowns: Arc<AtomicUsize>,
}

impl RemoteEnd {
    pub fn reply(&self, msg: ServerMessage) {
        self.to_client.send(Ok(msg)).unwrap();
    }

    pub fn fail(&self, err: TurnError) {
        self.to_client.send(Err(err)).unwrap();
    }

    pub async fn next(&mut self) -> ClientMessage {
        tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .expect("client went quiet")
            .expect("client hung up")
    }
}

struct ClientEnd {
    outbound: ChannelOutbound,
    inbound: ChannelInbound,
}

/// In-memory connector. Every `expect_session` call scripts one `connect`.
#[derive(Clone, Default)]
pub struct ChannelConnector {
    pending: Arc<Mutex<VecDeque<ClientEnd>>>,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl ChannelConnector {
    pub fn expect_session(&self) -> RemoteEnd {
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let shutdowns = Arc::new(AtomicUsize::new(0));

        self.pending.lock().unwrap().push_back(ClientEnd {
            outbound: ChannelOutbound {
                tx: client_tx,
                shutdowns: shutdowns.clone(),
            },
            inbound: ChannelInbound { rx: client_rx },
        });
        RemoteEnd {
            from_client,
            to_client,
            shutdowns,
        }
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    type Outbound = ChannelOutbound;
    type Inbound = ChannelInbound;

    async fn connect(&self, token: &str) -> Result<(ChannelOutbound, ChannelInbound), TurnError> {
        self.tokens.lock().unwrap().push(token.to_string());
        let end = self.pending.lock().unwrap().pop_front();
        match end {
            Some(end) => Ok((end.outbound, end.inbound)),
            None => Err(TurnError::Transport("connection refused".into())),
        }
    }
}

pub struct ChannelOutbound {
    tx: mpsc::UnboundedSender<ClientMessage>,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl OutboundHalf for ChannelOutbound {
    async fn send(&mut self, msg: ClientMessage) -> Result<(), TurnError> {
        self.tx
            .send(msg)
            .map_err(|_| TurnError::Transport("broken pipe".into()))
    }

    async fn shutdown(&mut self) -> Result<(), TurnError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ChannelInbound {
    rx: mpsc::UnboundedReceiver<Result<ServerMessage, TurnError>>,
}

#[async_trait]
impl InboundHalf for ChannelInbound {
    async fn recv(&mut self) -> Result<Option<ServerMessage>, TurnError> {
        match self.rx.recv().await {
            None => Ok(None),
            Some(msg) => msg.map(Some),
        }
    }
}

pub fn fast_audio_config() -> AudioConfig {
    AudioConfig {
        capture_frame_samples: FRAME_SAMPLES,
        playback_frame_samples: FRAME_SAMPLES,
        playback_idle_timeout: Duration::from_millis(100),
        playback_settle: Duration::from_millis(10),
        stop_timeout: Duration::from_secs(1),
        ..AudioConfig::default()
    }
}

pub fn session_config(max_runtime: Duration) -> SessionConfig {
    SessionConfig {
        max_runtime,
        teardown_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

/// Controller over scripted devices with playback already running.
pub fn controller(
    connector: ChannelConnector,
    input: ScriptedInput,
    output: RecordingOutput,
    status: StatusSignal,
    config: SessionConfig,
) -> ConversationController<ChannelConnector> {
    let mut audio = AudioSystem::new(&fast_audio_config(), Box::new(input), Box::new(output), status.clone());
    audio.start_playback().unwrap();
    ConversationController::new(
        connector,
        Arc::new(StaticToken("test-token".into())),
        audio,
        status,
        config,
    )
}
