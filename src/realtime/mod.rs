//! Realtime transcription: wire protocol, websocket session, and the
//! transcript assembler that reconciles out-of-order streaming events.

pub mod assembler;
pub mod protocol;
pub mod session;

use thiserror::Error;

pub use assembler::{TranscriptAssembler, TranscriptSegment};
pub use protocol::{
    AudioFormat, ClientEvent, Eagerness, ServerEvent, SessionConfig, VadMode,
};
pub use session::{RealtimeConfig, RealtimeSession, DEFAULT_REALTIME_URL};

/// Errors raised while establishing or driving a realtime session.
///
/// Once the session is up, transport failures surface as a terminal
/// [`ServerEvent::Error`] on the event stream instead.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("no API key configured for the transcription service")]
    MissingApiKey,
    #[error("failed to connect to the realtime endpoint: {0}")]
    ConnectionFailed(String),
    #[error("failed to send on the realtime session: {0}")]
    SendFailed(String),
}
