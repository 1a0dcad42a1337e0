//! Wire envelopes for the realtime transcription session.
//!
//! Outbound messages are three fixed shapes: session configuration,
//! base64 audio append, and audio commit. Inbound frames carry a `type`
//! discriminator; anything unrecognized decodes to
//! [`ServerEvent::Unknown`] rather than failing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Audio format accepted by the transcription service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    #[default]
    Pcm16,
}

/// Eagerness of the semantic VAD in deciding an utterance has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Eagerness {
    Low,
    #[default]
    Medium,
    High,
    Auto,
}

impl Eagerness {
    fn as_str(self) -> &'static str {
        match self {
            Eagerness::Low => "low",
            Eagerness::Medium => "medium",
            Eagerness::High => "high",
            Eagerness::Auto => "auto",
        }
    }
}

/// Server-side voice-activity-detection setting.
///
/// `Disabled` encodes as an explicit JSON `null` (the server treats a
/// missing field as "keep current"); the tuning fields of `ServerVad`
/// are omitted entirely when unset rather than serialized as nulls.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VadMode {
    /// Manual commit: the client decides utterance boundaries.
    #[default]
    Disabled,
    ServerVad {
        threshold: Option<f32>,
        prefix_padding_ms: Option<u32>,
        silence_duration_ms: Option<u32>,
        idle_timeout_ms: Option<u32>,
    },
    SemanticVad {
        eagerness: Eagerness,
    },
}

impl Serialize for VadMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VadMode::Disabled => serializer.serialize_none(),
            VadMode::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
                idle_timeout_ms,
            } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("type", "server_vad")?;
                if let Some(v) = threshold {
                    map.serialize_entry("threshold", v)?;
                }
                if let Some(v) = prefix_padding_ms {
                    map.serialize_entry("prefix_padding_ms", v)?;
                }
                if let Some(v) = silence_duration_ms {
                    map.serialize_entry("silence_duration_ms", v)?;
                }
                if let Some(v) = idle_timeout_ms {
                    map.serialize_entry("idle_timeout_ms", v)?;
                }
                map.end()
            }
            VadMode::SemanticVad { eagerness } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("type", "semantic_vad")?;
                map.serialize_entry("eagerness", eagerness.as_str())?;
                map.end()
            }
        }
    }
}

// Settings round-trip: `null` is Disabled, otherwise the tagged form.
impl<'de> Deserialize<'de> for VadMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(tag = "type", rename_all = "snake_case")]
        enum Tagged {
            ServerVad {
                #[serde(default)]
                threshold: Option<f32>,
                #[serde(default)]
                prefix_padding_ms: Option<u32>,
                #[serde(default)]
                silence_duration_ms: Option<u32>,
                #[serde(default)]
                idle_timeout_ms: Option<u32>,
            },
            SemanticVad {
                #[serde(default)]
                eagerness: Eagerness,
            },
        }

        Ok(match Option::<Tagged>::deserialize(deserializer)? {
            None => VadMode::Disabled,
            Some(Tagged::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
                idle_timeout_ms,
            }) => VadMode::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
                idle_timeout_ms,
            },
            Some(Tagged::SemanticVad { eagerness }) => VadMode::SemanticVad { eagerness },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionModel {
    pub model: String,
}

/// Session configuration sent on connect (and whenever settings change
/// mid-session).
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub input_audio_format: AudioFormat,
    pub input_audio_transcription: TranscriptionModel,
    pub turn_detection: VadMode,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>, vad: VadMode) -> Self {
        Self {
            input_audio_format: AudioFormat::Pcm16,
            input_audio_transcription: TranscriptionModel {
                model: model.into(),
            },
            turn_detection: vad,
        }
    }
}

/// Outbound client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "transcription_session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,
}

impl ClientEvent {
    /// Wrap a raw PCM16 chunk as a base64 append event.
    pub fn append_pcm16(bytes: &[u8]) -> Self {
        ClientEvent::AudioAppend {
            audio: BASE64.encode(bytes),
        }
    }

    pub fn to_json(&self) -> String {
        // The envelope types serialize infallibly.
        serde_json::to_string(self).expect("client event serialization")
    }
}

/// Inbound server events, decoded from the `type` discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Incremental transcript text for one item.
    TranscriptionDelta {
        item_id: String,
        content_index: u32,
        delta: String,
    },
    /// Authoritative full text for one item; replaces accumulated
    /// deltas.
    TranscriptionCompleted {
        item_id: String,
        content_index: u32,
        transcript: String,
    },
    /// The server accepted an audio buffer as a new item, with a
    /// causal ordering hint.
    InputAudioCommitted {
        item_id: String,
        previous_item_id: Option<String>,
    },
    /// Terminal transport or service error.
    Error { message: String },
    /// Any unrecognized discriminator. Never a decode failure.
    Unknown { event_type: String },
}

const TYPE_DELTA: &str = "conversation.item.input_audio_transcription.delta";
const TYPE_COMPLETED: &str = "conversation.item.input_audio_transcription.completed";
const TYPE_COMMITTED: &str = "input_audio_buffer.committed";
const TYPE_ERROR: &str = "error";

impl ServerEvent {
    /// Decode one frame. Returns `None` only when the payload is not a
    /// JSON object with a `type` field at all; such frames are dropped
    /// upstream.
    pub fn decode(raw: &str) -> Option<ServerEvent> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        let event_type = value.get("type")?.as_str()?.to_string();

        let event = match event_type.as_str() {
            TYPE_DELTA => ServerEvent::TranscriptionDelta {
                item_id: string_field(&value, "item_id"),
                content_index: u32_field(&value, "content_index"),
                delta: string_field(&value, "delta"),
            },
            TYPE_COMPLETED => ServerEvent::TranscriptionCompleted {
                item_id: string_field(&value, "item_id"),
                content_index: u32_field(&value, "content_index"),
                transcript: string_field(&value, "transcript"),
            },
            TYPE_COMMITTED => ServerEvent::InputAudioCommitted {
                item_id: string_field(&value, "item_id"),
                previous_item_id: value
                    .get("previous_item_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            },
            TYPE_ERROR => ServerEvent::Error {
                // The service nests the message under an `error`
                // object; tolerate a flat one too.
                message: value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .or_else(|| value.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
            },
            _ => ServerEvent::Unknown { event_type },
        };
        Some(event)
    }
}

fn string_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn u32_field(value: &serde_json::Value, key: &str) -> u32 {
    value.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32
}
