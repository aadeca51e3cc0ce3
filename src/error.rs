//! Failure taxonomy for the recording pipeline.
//!
//! The pipeline branches on error kind (retry vs. mark vs. abort), so these
//! are concrete enums rather than `anyhow` blobs. `anyhow` is still used at
//! the application edge in `main`.

use thiserror::Error;

/// Errors from the audio capture stage.
#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    /// The requested input device does not exist or cannot be opened.
    /// Fatal before recording starts; fatal to the session if it happens
    /// mid-recording (device unplugged).
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The input stream failed after it was opened.
    #[error("audio stream error: {0}")]
    Stream(String),
}

impl From<cpal::DevicesError> for CaptureError {
    fn from(err: cpal::DevicesError) -> Self {
        CaptureError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for CaptureError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        CaptureError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(err: cpal::BuildStreamError) -> Self {
        CaptureError::Stream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(err: cpal::PlayStreamError) -> Self {
        CaptureError::Stream(err.to_string())
    }
}

/// A single segment failed to transcribe. Recoverable per-segment: the pool
/// retries once, then marks the segment unintelligible instead of aborting.
#[derive(Error, Debug, Clone)]
#[error("transcription failed for segment {segment}: {reason}")]
pub struct TranscriptionError {
    pub segment: usize,
    pub reason: String,
}

impl TranscriptionError {
    pub fn new(segment: usize, reason: impl Into<String>) -> Self {
        Self {
            segment,
            reason: reason.into(),
        }
    }
}

/// Typed failures from an AI provider call. Retry policy lives with the
/// gateway, but retryability is a property of the kind, so it is exposed here.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Credential rejected. Never retried.
    #[error("provider rejected credentials: {0}")]
    AuthFailure(String),

    /// Provider-side throttling. Retried with exponential backoff up to the
    /// configured attempt ceiling.
    #[error("provider rate limit hit: {0}")]
    RateLimited(String),

    /// Network down, local process not running, or a server-side error.
    /// Retried once after a short delay.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider answered but the body was not in the expected shape.
    /// Never retried.
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while loading or validating an analysis profile.
#[derive(Error, Debug, Clone)]
pub enum ProfileError {
    #[error("failed to load profile: {0}")]
    Load(String),

    #[error("profile has no tasks")]
    Empty,

    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle involving task '{0}'")]
    DependencyCycle(String),
}

/// Session-fatal errors. Everything else in the taxonomy is absorbed as a
/// partial-failure marker in the session outcome.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("no credential for provider '{provider}': set {var}")]
    MissingCredential { provider: String, var: String },

    #[error("invalid session configuration: {0}")]
    Config(String),
}
