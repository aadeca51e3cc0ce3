// Integration tests for the transcription pool
//
// These tests script the engine boundary to exercise out-of-order
// completion, the retry-then-mark policy, and cancellation with a grace
// window, without touching a real whisper executable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use voxnote::audio::{AudioFormat, AudioSegment};
use voxnote::error::TranscriptionError;
use voxnote::transcription::{
    ModelSelector, TranscriptChunk, TranscriptionEngine, TranscriptionPool, UNINTELLIGIBLE_MARKER,
};

fn segment(index: usize, start_ms: u64, duration_ms: u64) -> AudioSegment {
    AudioSegment {
        index,
        start_ms,
        duration_ms,
        samples: vec![0i16; (duration_ms * 16) as usize],
        format: AudioFormat::new(16000, 1),
    }
}

fn chunk_for(segment: &AudioSegment, text: &str) -> TranscriptChunk {
    TranscriptChunk {
        segment_index: segment.index,
        text: text.to_string(),
        start_ms: segment.start_ms,
        end_ms: segment.end_ms(),
        confidence: None,
        unintelligible: false,
    }
}

/// Engine whose per-segment latency is scripted, so later segments can
/// finish before earlier ones.
struct StaggeredEngine {
    delays_ms: Vec<u64>,
}

#[async_trait::async_trait]
impl TranscriptionEngine for StaggeredEngine {
    async fn transcribe(
        &self,
        segment: &AudioSegment,
        _model: &ModelSelector,
    ) -> Result<TranscriptChunk, TranscriptionError> {
        let delay = self.delays_ms.get(segment.index).copied().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(chunk_for(segment, &format!("segment {}", segment.index)))
    }
}

/// Engine that fails every attempt for one segment and succeeds elsewhere.
struct FlakyEngine {
    failing_index: usize,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl TranscriptionEngine for FlakyEngine {
    async fn transcribe(
        &self,
        segment: &AudioSegment,
        _model: &ModelSelector,
    ) -> Result<TranscriptChunk, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if segment.index == self.failing_index {
            Err(TranscriptionError::new(segment.index, "decode failed"))
        } else {
            Ok(chunk_for(segment, &format!("segment {}", segment.index)))
        }
    }
}

/// Engine that never finishes, for cancellation tests.
struct StalledEngine;

#[async_trait::async_trait]
impl TranscriptionEngine for StalledEngine {
    async fn transcribe(
        &self,
        _segment: &AudioSegment,
        _model: &ModelSelector,
    ) -> Result<TranscriptChunk, TranscriptionError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_out_of_order_completion_yields_ordered_chunks() {
    // Segment 0 is the slowest; 1 and 2 finish first but must wait
    let engine = Arc::new(StaggeredEngine {
        delays_ms: vec![120, 10, 40],
    });
    let pool = TranscriptionPool::new(
        engine,
        ModelSelector::new("small"),
        3,
        Duration::from_secs(1),
    );

    let (segment_tx, segment_rx) = mpsc::channel(8);
    let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    for i in 0..3 {
        segment_tx.send(segment(i, i as u64 * 1000, 1000)).await.unwrap();
    }
    drop(segment_tx);

    let report = pool.run(segment_rx, chunk_tx, cancel_rx).await;

    let mut indices = Vec::new();
    while let Some(chunk) = chunk_rx.recv().await {
        indices.push(chunk.segment_index);
    }
    assert_eq!(indices, vec![0, 1, 2], "chunks must arrive in segment order");
    assert_eq!(report.outcomes.len(), 3);
    assert!(report.outcomes.iter().all(|o| !o.unintelligible));
}

#[tokio::test]
async fn test_failing_segment_is_marked_unintelligible_after_retry() {
    let engine = Arc::new(FlakyEngine {
        failing_index: 1,
        calls: AtomicUsize::new(0),
    });
    let pool = TranscriptionPool::new(
        Arc::clone(&engine) as Arc<dyn TranscriptionEngine>,
        ModelSelector::new("small"),
        1,
        Duration::from_secs(1),
    );

    let (segment_tx, segment_rx) = mpsc::channel(8);
    let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    for i in 0..3 {
        segment_tx.send(segment(i, i as u64 * 1000, 1000)).await.unwrap();
    }
    drop(segment_tx);

    let report = pool.run(segment_rx, chunk_tx, cancel_rx).await;

    let mut chunks = Vec::new();
    while let Some(chunk) = chunk_rx.recv().await {
        chunks.push(chunk);
    }

    assert_eq!(chunks.len(), 3, "surrounding segments are unaffected");
    assert_eq!(chunks[1].text, UNINTELLIGIBLE_MARKER);
    assert!(chunks[1].unintelligible);
    assert_eq!(chunks[1].start_ms, 1000, "marker keeps the time range");
    assert_eq!(chunks[1].end_ms, 2000);
    assert_eq!(chunks[0].text, "segment 0");
    assert_eq!(chunks[2].text, "segment 2");

    // One call each for segments 0 and 2, two attempts for segment 1
    assert_eq!(engine.calls.load(Ordering::SeqCst), 4);

    let failed = &report.outcomes[1];
    assert_eq!(failed.attempts, 2);
    assert!(failed.unintelligible);
}

#[tokio::test]
async fn test_already_cancelled_pool_returns_empty_report() {
    // The cancel signal can be set before the pool is first polled; it must
    // return cleanly instead of panicking with nothing in flight.
    let pool = TranscriptionPool::new(
        Arc::new(StalledEngine),
        ModelSelector::new("small"),
        2,
        Duration::from_millis(50),
    );

    let (segment_tx, segment_rx) = mpsc::channel(8);
    let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
    let (_cancel_tx, cancel_rx) = watch::channel(true);

    segment_tx.send(segment(0, 0, 1000)).await.unwrap();

    let report = pool.run(segment_rx, chunk_tx, cancel_rx).await;

    assert!(report.outcomes.is_empty());
    assert!(chunk_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_cancel_aborts_stalled_work_after_grace() {
    let pool = TranscriptionPool::new(
        Arc::new(StalledEngine),
        ModelSelector::new("small"),
        2,
        Duration::from_millis(50),
    );

    let (segment_tx, segment_rx) = mpsc::channel(8);
    let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    segment_tx.send(segment(0, 0, 1000)).await.unwrap();
    segment_tx.send(segment(1, 1000, 1000)).await.unwrap();

    let run = tokio::spawn(async move { pool.run(segment_rx, chunk_tx, cancel_rx).await });

    // Give the pool time to dispatch, then cancel
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel_tx.send(true).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("pool must return shortly after the grace window")
        .unwrap();

    assert!(report.outcomes.is_empty(), "stalled segments produce nothing");
    assert!(chunk_rx.recv().await.is_none());
}
