use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::AnalysisResult;
use crate::audio::Recording;
use crate::error::SessionError;
use crate::transcription::{SegmentOutcome, Transcript};

/// Session lifecycle. Failed and Cancelled are reachable from any
/// non-terminal state; Complete, Failed, and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Recording,
    Transcribing,
    Analyzing,
    Complete,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Complete | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Point-in-time view of a running session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub segments_emitted: usize,
    pub chunks_transcribed: usize,
}

/// Terminal result of a session. Per-segment and per-task outcomes are
/// reported distinctly from the session-level state, so a Complete session
/// can still carry marked failures at finer granularity.
#[derive(Debug)]
pub struct SessionOutcome {
    pub id: String,
    pub state: SessionState,
    /// The session-fatal error, when state is Failed
    pub error: Option<SessionError>,
    /// None when the session was cancelled during recording (discarded)
    pub recording: Option<Recording>,
    pub transcript: Transcript,
    pub segment_outcomes: Vec<SegmentOutcome>,
    pub analysis: AnalysisResult,
    /// Frames dropped by the capture queue (recording gaps)
    pub frames_dropped: u64,
}
