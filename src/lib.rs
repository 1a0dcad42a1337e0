//! Push-to-talk live dictation.
//!
//! Hold a shortcut, speak, release: audio streams to a realtime
//! transcription service, partial transcripts are typed into the
//! focused application as they arrive, and the final text (optionally
//! cleaned up by a rewrite model) replaces them on release.
//!
//! The crate is host-agnostic. Everything that touches the platform —
//! keyboard capture, audio capture, accessibility writes, synthetic key
//! events, clipboard pastes — sits behind small traits the embedding
//! application implements.

pub mod credentials;
pub mod formatting;
pub mod injection;
pub mod pipeline;
pub mod realtime;
pub mod recorder;
pub mod settings;
pub mod shortcut;

pub use pipeline::{DictationPipeline, PipelineError, SessionOutcome};
pub use settings::DictationSettings;
