//! Segmentation: turns the frame stream into bounded audio segments.
//!
//! A segment closes when it reaches the configured maximum duration, or when
//! a configured stretch of sub-threshold amplitude follows at least the
//! minimum duration of audio. The trailing partial segment is always flushed
//! when capture stops, even if it is shorter than the minimum.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::backend::{AudioFormat, AudioFrame};
use super::capture::{FrameEvent, FrameReceiver};
use crate::config::SegmenterSettings;

/// A bounded span of captured audio handed to transcription as one unit.
/// Owned by the segmenter until handed off; the resulting transcript chunk
/// takes over its time range.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Position in the session's segment sequence (0-based, contiguous)
    pub index: usize,
    /// Start offset from the beginning of the recording
    pub start_ms: u64,
    pub duration_ms: u64,
    pub samples: Vec<i16>,
    pub format: AudioFormat,
}

impl AudioSegment {
    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }

    pub fn meta(&self) -> SegmentMeta {
        SegmentMeta {
            index: self.index,
            start_ms: self.start_ms,
            duration_ms: self.duration_ms,
            sample_count: self.samples.len(),
        }
    }
}

/// Boundary record kept by the `Recording` after segment bytes move on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentMeta {
    pub index: usize,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub sample_count: usize,
}

/// What the segmenter saw, returned once the frame stream ends.
#[derive(Debug, Clone, Default)]
pub struct SegmentReport {
    pub segments: Vec<SegmentMeta>,
    /// Frames dropped by the capture queue while this consumer lagged
    pub frames_dropped: u64,
}

pub struct SegmentBuffer {
    settings: SegmenterSettings,
    format: AudioFormat,
    pending: Vec<i16>,
    segment_start_ms: u64,
    pending_ms: u64,
    silence_run_ms: u64,
    next_index: usize,
}

impl SegmentBuffer {
    pub fn new(settings: SegmenterSettings, format: AudioFormat) -> Self {
        Self {
            settings,
            format,
            pending: Vec::new(),
            segment_start_ms: 0,
            pending_ms: 0,
            silence_run_ms: 0,
            next_index: 0,
        }
    }

    /// Consume the frame stream, emitting complete segments in strictly
    /// increasing time order. Returns once capture has stopped and the
    /// trailing partial segment (if any) is flushed.
    pub async fn run(
        mut self,
        mut frames: FrameReceiver,
        segment_tx: mpsc::Sender<AudioSegment>,
    ) -> SegmentReport {
        let mut report = SegmentReport::default();

        while let Some(event) = frames.recv().await {
            match event {
                FrameEvent::Frame(frame) => {
                    if let Some(segment) = self.push_frame(&frame) {
                        report.segments.push(segment.meta());
                        if segment_tx.send(segment).await.is_err() {
                            warn!("Segment consumer gone, stopping segmentation");
                            return report;
                        }
                    }
                }
                FrameEvent::Overrun { dropped } => {
                    // Recording continues with a gap; the silence run no
                    // longer describes contiguous audio, so reset it.
                    report.frames_dropped += dropped;
                    self.silence_run_ms = 0;
                }
            }
        }

        if let Some(segment) = self.flush() {
            report.segments.push(segment.meta());
            let _ = segment_tx.send(segment).await;
        }

        info!(
            "Segmentation complete: {} segments, {} frames dropped",
            report.segments.len(),
            report.frames_dropped
        );

        report
    }

    /// Append one frame; returns a segment when a boundary condition fires.
    fn push_frame(&mut self, frame: &AudioFrame) -> Option<AudioSegment> {
        let frame_ms = frame.duration_ms();

        // Anchor each segment to the capture timeline rather than to the
        // sum of consumed durations, so time lost to a queue overrun shows
        // up as a gap between segments instead of being compressed out.
        if self.pending.is_empty() {
            self.segment_start_ms = frame.timestamp_ms;
        }

        if rms_amplitude(&frame.samples) < self.settings.silence_threshold {
            self.silence_run_ms += frame_ms;
        } else {
            self.silence_run_ms = 0;
        }

        self.pending.extend_from_slice(&frame.samples);
        self.pending_ms += frame_ms;

        let hit_max = self.pending_ms >= self.settings.max_segment_secs * 1000;
        let hit_silence = self.pending_ms >= self.settings.min_segment_secs * 1000
            && self.silence_run_ms >= self.settings.silence_duration_ms;

        if hit_max || hit_silence {
            self.cut()
        } else {
            None
        }
    }

    /// Flush whatever is pending as a final (possibly short) segment.
    fn flush(&mut self) -> Option<AudioSegment> {
        self.cut()
    }

    fn cut(&mut self) -> Option<AudioSegment> {
        if self.pending.is_empty() {
            return None;
        }

        let segment = AudioSegment {
            index: self.next_index,
            start_ms: self.segment_start_ms,
            duration_ms: self.pending_ms,
            samples: std::mem::take(&mut self.pending),
            format: self.format,
        };

        self.next_index += 1;
        self.pending_ms = 0;
        self.silence_run_ms = 0;

        Some(segment)
    }
}

/// RMS amplitude normalized to 0.0..1.0 of full scale.
fn rms_amplitude(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}
