//! Voxnote: local voice capture, transcription, and AI analysis.
//!
//! A session records from the microphone, cuts the stream into bounded
//! segments, transcribes them through a local whisper executable, and runs a
//! profile of analysis prompts against the assembled transcript.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod provider;
pub mod session;
pub mod transcription;

pub use config::Config;
pub use error::{
    CaptureError, ProfileError, ProviderError, SessionError, TranscriptionError,
};
pub use session::{SessionController, SessionOptions, SessionOutcome, SessionState};
