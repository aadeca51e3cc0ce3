//! Transcription stage: segment audio in, time-ordered transcript out.

pub mod engine;
pub mod pool;
pub mod transcript;

pub use engine::{ModelSelector, TranscriptionEngine, WhisperCliEngine};
pub use pool::{TranscriptionPool, TranscriptionReport};
pub use transcript::{
    SegmentOutcome, Transcript, TranscriptChunk, UNINTELLIGIBLE_MARKER,
};
