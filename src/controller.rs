//! Conversation stream controller: one duplex exchange per turn.
//!
//! A turn opens the stream, sends the config, then polls two loops on the
//! caller's task:
//!
//! - outbound: capture queue → agent, until end of utterance or the agent
//!   closes; then stops capture, waits for it, and half-closes the send side
//! - inbound: agent → accumulation buffer + playback queue, events → status
//!
//! The whole exchange runs under the session deadline. Teardown (capture stop
//! and connection shutdown) runs whatever way the exchange ended.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::capture::CapturePipeline;
use crate::audio::{AudioFrame, AudioSystem, PlaybackQueue};
use crate::error::TurnError;
use crate::net_link::{Connector, InboundHalf, OutboundHalf, TokenSource};
use crate::protocol::{ClientMessage, ContinuationToken, ConverseConfig, ConverseResult, MicrophoneMode, ServerMessage};
use crate::state_machine::TurnState;
use crate::status::{StatusSignal, TurnEvent};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hard ceiling on a single turn, connect included
    pub max_runtime: Duration,
    pub sample_rate: u32,
    /// Initial output volume; the agent may change it
    pub volume_percentage: u8,
    /// Bound on connection shutdown during teardown
    pub teardown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_runtime: Duration::from_secs(240),
            sample_rate: 16000,
            volume_percentage: 70,
            teardown_timeout: Duration::from_secs(2),
        }
    }
}

/// State of one request/response exchange. Never reused across turns.
#[derive(Debug)]
pub struct ConversationSession {
    pub id: Uuid,
    pub deadline: Instant,
    pub continuation: Option<ContinuationToken>,
    pub outbound_open: bool,
    state: TurnState,
}

impl ConversationSession {
    fn new(max_runtime: Duration, continuation: Option<ContinuationToken>) -> Self {
        Self {
            id: Uuid::new_v4(),
            deadline: Instant::now() + max_runtime,
            continuation,
            outbound_open: false,
            state: TurnState::Init,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    fn transition(&mut self, next: TurnState) {
        if !self.state.can_transition_to(next) {
            log::warn!("Turn {}: unexpected transition {:?} -> {:?}", self.id, self.state, next);
        }
        log::debug!("Turn {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// What the agent said during a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub request: String,
    pub response: String,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Every inbound audio chunk, concatenated in receipt order
    pub audio: Bytes,
    pub transcript: Transcript,
    /// Token the agent returned this turn, if any
    pub continuation: Option<ContinuationToken>,
    /// The agent expects the user to keep talking
    pub follow_on: bool,
    pub frames_sent: usize,
}

#[derive(Default)]
struct TurnAccumulator {
    audio: BytesMut,
    transcript: Transcript,
    continuation: Option<ContinuationToken>,
    follow_on: bool,
    volume: Option<u8>,
    frames_sent: usize,
}

impl TurnAccumulator {
    fn apply_result(&mut self, result: ConverseResult) {
        if !result.spoken_request_text.is_empty() {
            log::info!("Heard: {}", result.spoken_request_text);
            self.transcript.request = result.spoken_request_text;
        }
        if !result.spoken_response_text.is_empty() {
            log::info!("Reply: {}", result.spoken_response_text);
            self.transcript.response = result.spoken_response_text;
        }
        if let Some(token) = result.conversation_state.filter(|t| !t.is_empty()) {
            self.continuation = Some(token);
        }
        match result.microphone_mode {
            MicrophoneMode::DialogFollowOn => self.follow_on = true,
            MicrophoneMode::CloseMicrophone => self.follow_on = false,
            MicrophoneMode::Unspecified => {}
        }
        if let Some(volume) = result.volume_percentage.filter(|v| *v > 0) {
            self.volume = Some(volume.min(100));
        }
    }

    fn into_outcome(self) -> TurnOutcome {
        TurnOutcome {
            audio: self.audio.freeze(),
            transcript: self.transcript,
            continuation: self.continuation,
            follow_on: self.follow_on,
            frames_sent: self.frames_sent,
        }
    }
}

pub struct ConversationController<C: Connector> {
    connector: C,
    tokens: Arc<dyn TokenSource>,
    audio: AudioSystem,
    status: StatusSignal,
    config: SessionConfig,
    continuation: Option<ContinuationToken>,
    volume: u8,
    cancel: CancellationToken,
}

impl<C: Connector> ConversationController<C> {
    pub fn new(
        connector: C,
        tokens: Arc<dyn TokenSource>,
        audio: AudioSystem,
        status: StatusSignal,
        config: SessionConfig,
    ) -> Self {
        let volume = config.volume_percentage;
        Self {
            connector,
            tokens,
            audio,
            status,
            config,
            continuation: None,
            volume,
            cancel: CancellationToken::new(),
        }
    }

    pub fn audio(&self) -> &AudioSystem {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioSystem {
        &mut self.audio
    }

    pub fn status(&self) -> &StatusSignal {
        &self.status
    }

    /// Token that will be sent with the next turn's config.
    pub fn continuation(&self) -> Option<&ContinuationToken> {
        self.continuation.as_ref()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Cancelling this token ends the current turn (and every later one) with
    /// `TurnError::Cancelled`. Teardown still runs, so the stream is closed.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one complete turn.
    pub async fn converse_turn(&mut self) -> Result<TurnOutcome, TurnError> {
        let mut session = ConversationSession::new(self.config.max_runtime, self.continuation.clone());
        log::info!("Turn {} started (deadline in {:?})", session.id, self.config.max_runtime);

        let mut link = None;
        let cancel = self.cancel.clone();
        let max_runtime = self.config.max_runtime;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TurnError::Cancelled),
            exchange = tokio::time::timeout_at(session.deadline, self.run_turn(&mut session, &mut link)) => match exchange {
                Ok(result) => result,
                Err(_) => Err(TurnError::Timeout(max_runtime)),
            },
        };

        self.teardown(&mut session, link.as_mut().map(|(outbound, _)| outbound)).await;

        match result {
            Ok(acc) => {
                session.transition(TurnState::Done);
                if let Some(token) = &acc.continuation {
                    self.continuation = Some(token.clone());
                }
                if let Some(volume) = acc.volume {
                    log::info!("Volume set to {}%", volume);
                    self.volume = volume;
                }
                let outcome = acc.into_outcome();
                log::info!(
                    "Turn {} done: {} frames sent, {} bytes received",
                    session.id,
                    outcome.frames_sent,
                    outcome.audio.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                session.transition(TurnState::Error);
                log::error!("Turn {} failed: {}", session.id, e);
                self.status.emit(TurnEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop both pipelines. The controller is not usable for turns afterwards
    /// unless the pipelines are started again.
    pub async fn shutdown(&mut self) -> Result<(), TurnError> {
        self.audio.shutdown().await.map_err(TurnError::from)
    }

    async fn run_turn(
        &mut self,
        session: &mut ConversationSession,
        link: &mut Option<(C::Outbound, C::Inbound)>,
    ) -> Result<TurnAccumulator, TurnError> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| TurnError::Transport(format!("credential unavailable: {}", e)))?;
        let (outbound, inbound) = link.insert(self.connector.connect(&token).await?);
        session.outbound_open = true;
        session.transition(TurnState::Streaming);

        let config = ConverseConfig::linear16(self.config.sample_rate, self.volume, session.continuation.clone());
        outbound.send(ClientMessage::Config(config)).await?;
        self.audio.capture.start()?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let abort = CancellationToken::new();
        let playback = self.audio.playback_queue();
        let mut acc = TurnAccumulator::default();

        let (sent, received) = tokio::join!(
            outbound_loop(&mut self.audio.capture, outbound, stop_rx, &abort),
            inbound_loop(inbound, stop_tx, &abort, &playback, &self.status, session, &mut acc),
        );
        session.outbound_open = false;

        received?;
        acc.frames_sent = sent?;
        Ok(acc)
    }

    async fn teardown(&mut self, session: &mut ConversationSession, outbound: Option<&mut C::Outbound>) {
        session.transition(TurnState::Closing);

        // Also collects a capture stop that the deadline cut short.
        if self.audio.capture.is_running() || self.audio.capture.is_stopping() {
            if let Err(e) = self.audio.capture.stop().await {
                log::error!("Failed to stop capture during teardown: {}", e);
            }
        }
        let residue = self.audio.capture.drain();
        if residue > 0 {
            log::warn!("Discarded {} captured frames at teardown", residue);
        }

        if let Some(outbound) = outbound {
            if session.outbound_open {
                log::debug!("Turn {}: closing with send side still open", session.id);
            }
            match tokio::time::timeout(self.config.teardown_timeout, outbound.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Connection shutdown failed: {}", e),
                Err(_) => log::warn!("Connection shutdown timed out"),
            }
        }
    }
}

async fn outbound_loop<O: OutboundHalf>(
    capture: &mut CapturePipeline,
    outbound: &mut O,
    stop_rx: oneshot::Receiver<()>,
    abort: &CancellationToken,
) -> Result<usize, TurnError> {
    let result = forward_capture(capture, outbound, stop_rx).await;
    if result.is_err() {
        abort.cancel();
    }
    result
}

async fn forward_capture<O: OutboundHalf>(
    capture: &mut CapturePipeline,
    outbound: &mut O,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<usize, TurnError> {
    let mut frames_sent = 0;

    let forwarded = loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break Ok(()),
            frame = capture.next_frame() => {
                let Some(frame) = frame else { break Ok(()) };
                if let Err(e) = outbound.send(ClientMessage::Audio(frame)).await {
                    break Err(e);
                }
                frames_sent += 1;
                log::trace!("Forwarded audio frame {}", frames_sent);
            }
        }
    };

    // Capture must be fully stopped before the send side closes, so no frame
    // can follow the half-close.
    capture.stop().await?;
    let residue = capture.drain();
    if residue > 0 {
        log::warn!("Discarded {} captured frames after stop", residue);
    }

    forwarded?;
    outbound.close_send().await?;
    log::info!("Sent audio_end after {} frames", frames_sent);
    Ok(frames_sent)
}

async fn inbound_loop<I: InboundHalf>(
    inbound: &mut I,
    stop_tx: oneshot::Sender<()>,
    abort: &CancellationToken,
    playback: &PlaybackQueue,
    status: &StatusSignal,
    session: &mut ConversationSession,
    acc: &mut TurnAccumulator,
) -> Result<(), TurnError> {
    let mut stop_tx = Some(stop_tx);

    loop {
        let msg = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                log::debug!("Inbound loop aborted");
                return Ok(());
            }
            msg = inbound.recv() => msg?,
        };
        let Some(msg) = msg else {
            log::info!("Agent closed the stream");
            return Ok(());
        };
        handle_message(msg, &mut stop_tx, playback, status, session, acc).await;
    }
}

async fn handle_message(
    mut msg: ServerMessage,
    stop_tx: &mut Option<oneshot::Sender<()>>,
    playback: &PlaybackQueue,
    status: &StatusSignal,
    session: &mut ConversationSession,
    acc: &mut TurnAccumulator,
) {
    if let Some(error) = msg.error.take() {
        log::warn!("Agent reported an error: {}", error);
        status.emit(TurnEvent::Error(error.to_string()));
    }

    if let Some(result) = msg.result.take() {
        acc.apply_result(result);
    }

    if msg.is_end_of_utterance() {
        status.emit(TurnEvent::EndOfUtterance);
        match stop_tx.take() {
            Some(tx) => {
                log::info!("End of utterance");
                let _ = tx.send(());
                session.transition(TurnState::AwaitingEnd);
            }
            None => log::debug!("Repeated end of utterance"),
        }
    }

    if let Some(chunk) = msg.take_audio() {
        log::trace!("Received audio chunk: {} bytes", chunk.len());
        acc.audio.extend_from_slice(&chunk);
        if let Err(e) = playback.enqueue(AudioFrame::from(chunk)).await {
            log::warn!("Dropping audio chunk for playback: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_updates_accumulator() {
        let mut acc = TurnAccumulator::default();
        acc.apply_result(ConverseResult {
            spoken_request_text: "lights on".into(),
            spoken_response_text: "done".into(),
            conversation_state: Some(ContinuationToken::new(vec![9])),
            microphone_mode: MicrophoneMode::DialogFollowOn,
            volume_percentage: Some(150),
        });
        // Fields left empty by a later result keep the earlier values.
        acc.apply_result(ConverseResult {
            conversation_state: Some(ContinuationToken::new(Vec::new())),
            volume_percentage: Some(0),
            ..Default::default()
        });

        assert_eq!(acc.volume, Some(100));
        let outcome = acc.into_outcome();
        assert_eq!(outcome.transcript.request, "lights on");
        assert_eq!(outcome.transcript.response, "done");
        assert_eq!(outcome.continuation, Some(ContinuationToken::new(vec![9])));
        assert!(outcome.follow_on);
    }

    #[test]
    fn close_microphone_clears_follow_on() {
        let mut acc = TurnAccumulator::default();
        acc.follow_on = true;
        acc.apply_result(ConverseResult {
            microphone_mode: MicrophoneMode::CloseMicrophone,
            ..Default::default()
        });
        assert!(!acc.follow_on);
    }

    #[test]
    fn session_starts_in_init() {
        let session = ConversationSession::new(Duration::from_secs(1), None);
        assert_eq!(session.state(), TurnState::Init);
        assert!(!session.outbound_open);
        assert!(session.deadline > Instant::now());
    }
}
