//! Messages exchanged with the remote conversational agent.
//!
//! Control traffic is JSON text; audio travels as raw LINEAR16 binary
//! messages. The agent may also deliver audio inside a JSON message as a
//! base64 `audio_out.audio_data` field.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::AudioFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioEncoding {
    Linear16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioInConfig {
    pub encoding: AudioEncoding,
    pub sample_rate_hertz: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioOutConfig {
    pub encoding: AudioEncoding,
    pub sample_rate_hertz: u32,
    pub volume_percentage: u8,
}

/// Opaque dialog state returned by the agent and handed back on the next
/// turn. Never interpreted locally.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContinuationToken(#[serde(with = "base64_bytes")] Vec<u8>);

impl ContinuationToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContinuationToken({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConverseState {
    pub conversation_state: ContinuationToken,
}

/// First message of every stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConverseConfig {
    pub audio_in: AudioInConfig,
    pub audio_out: AudioOutConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converse_state: Option<ConverseState>,
}

impl ConverseConfig {
    pub fn linear16(sample_rate: u32, volume_percentage: u8, continuation: Option<ContinuationToken>) -> Self {
        Self {
            audio_in: AudioInConfig {
                encoding: AudioEncoding::Linear16,
                sample_rate_hertz: sample_rate,
            },
            audio_out: AudioOutConfig {
                encoding: AudioEncoding::Linear16,
                sample_rate_hertz: sample_rate,
                volume_percentage,
            },
            converse_state: continuation.map(|conversation_state| ConverseState { conversation_state }),
        }
    }
}

/// Outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Config(ConverseConfig),
    Audio(AudioFrame),
    /// Half-close: no audio follows.
    AudioEnd,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage<'a> {
    Config(&'a ConverseConfig),
    AudioEnd,
}

/// An outbound message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl ClientMessage {
    pub fn encode(&self) -> Result<WireMessage, serde_json::Error> {
        let control = match self {
            ClientMessage::Audio(frame) => return Ok(WireMessage::Binary(frame.as_bytes().clone())),
            ClientMessage::Config(config) => ControlMessage::Config(config),
            ClientMessage::AudioEnd => ControlMessage::AudioEnd,
        };
        serde_json::to_string(&control).map(WireMessage::Text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Config(_) => "config",
            ClientMessage::Audio(_) => "audio",
            ClientMessage::AudioEnd => "audio_end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    EndOfUtterance,
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MicrophoneMode {
    CloseMicrophone,
    /// The agent expects the user to keep talking without a new trigger.
    DialogFollowOn,
    #[default]
    #[serde(other, rename = "MICROPHONE_MODE_UNSPECIFIED")]
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ConverseResult {
    #[serde(default)]
    pub spoken_request_text: String,
    #[serde(default)]
    pub spoken_response_text: String,
    pub conversation_state: Option<ContinuationToken>,
    #[serde(default)]
    pub microphone_mode: MicrophoneMode,
    /// 0 or absent leaves the volume unchanged.
    pub volume_percentage: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AudioOut {
    #[serde(with = "base64_bytes")]
    pub audio_data: Vec<u8>,
}

/// Inbound message. Any combination of fields may be present.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ServerMessage {
    pub error: Option<ServerError>,
    pub result: Option<ConverseResult>,
    pub event_type: Option<EventType>,
    pub audio_out: Option<AudioOut>,
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// A message carrying only an audio chunk, as delivered by binary frames.
    pub fn audio(data: impl Into<Vec<u8>>) -> Self {
        Self {
            audio_out: Some(AudioOut {
                audio_data: data.into(),
            }),
            ..Default::default()
        }
    }

    pub fn end_of_utterance() -> Self {
        Self {
            event_type: Some(EventType::EndOfUtterance),
            ..Default::default()
        }
    }

    pub fn is_end_of_utterance(&self) -> bool {
        self.event_type == Some(EventType::EndOfUtterance)
    }

    /// Take the audio chunk out of the message, if it carries a non-empty one.
    pub fn take_audio(&mut self) -> Option<Bytes> {
        self.audio_out
            .take()
            .map(|out| Bytes::from(out.audio_data))
            .filter(|chunk| !chunk.is_empty())
    }
}

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
