use serde::Serialize;

/// Placeholder text for a segment that failed transcription twice.
pub const UNINTELLIGIBLE_MARKER: &str = "[unintelligible]";

/// The transcribed text for one audio segment.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptChunk {
    pub segment_index: usize,
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    /// Confidence score (0.0 to 1.0), if the engine reports one
    pub confidence: Option<f32>,
    /// True when both transcription attempts failed and this chunk only
    /// marks the segment's time range
    pub unintelligible: bool,
}

impl TranscriptChunk {
    pub fn unintelligible(segment_index: usize, start_ms: u64, end_ms: u64) -> Self {
        Self {
            segment_index,
            text: UNINTELLIGIBLE_MARKER.to_string(),
            start_ms,
            end_ms,
            confidence: None,
            unintelligible: true,
        }
    }
}

/// Ordered, non-overlapping sequence of chunks covering the recording.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    chunks: Vec<TranscriptChunk>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Chunks must arrive in time order; the reassembly
    /// buffer upstream guarantees this, and it is checked here.
    pub fn push(&mut self, chunk: TranscriptChunk) {
        debug_assert!(
            self.chunks
                .last()
                .map(|last| chunk.start_ms >= last.end_ms && chunk.segment_index > last.segment_index)
                .unwrap_or(true),
            "chunks must be time-ordered and non-overlapping"
        );
        self.chunks.push(chunk);
    }

    pub fn chunks(&self) -> &[TranscriptChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Full transcript text, one chunk per line, unintelligible markers
    /// included so gaps stay visible.
    pub fn full_text(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Per-segment outcome, reported distinctly from the session-level outcome.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentOutcome {
    pub segment_index: usize,
    pub attempts: u32,
    pub unintelligible: bool,
}
