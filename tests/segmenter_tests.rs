// Integration tests for the capture queue -> segmenter flow
//
// These tests drive the segmenter through the same broadcast-backed frame
// queue the live capture path uses, covering boundary cuts, the trailing
// flush, and the drop-oldest overrun accounting.

use tokio::sync::{broadcast, mpsc};
use voxnote::audio::{AudioFormat, AudioFrame, FrameReceiver, SegmentBuffer};
use voxnote::config::SegmenterSettings;

const FORMAT: AudioFormat = AudioFormat {
    sample_rate: 16000,
    channels: 1,
    bits_per_sample: 16,
};

/// 100ms mono frame at 16kHz with a constant amplitude.
fn frame(timestamp_ms: u64, amplitude: i16) -> AudioFrame {
    AudioFrame {
        samples: vec![amplitude; 1600],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms,
    }
}

fn settings(max_secs: u64, min_secs: u64) -> SegmenterSettings {
    SegmenterSettings {
        max_segment_secs: max_secs,
        min_segment_secs: min_secs,
        silence_threshold: 0.01,
        silence_duration_ms: 300,
    }
}

#[tokio::test]
async fn test_max_duration_cut_produces_contiguous_segments() {
    let (frame_tx, frame_rx) = broadcast::channel(256);
    let (segment_tx, mut segment_rx) = mpsc::channel(16);

    // 2s max, loud audio throughout: only the hard cutoff can cut
    let segmenter = SegmentBuffer::new(settings(2, 1), FORMAT);
    let run = tokio::spawn(segmenter.run(FrameReceiver::new(frame_rx), segment_tx));

    // 5 seconds of loud audio in 100ms frames
    for i in 0..50u64 {
        frame_tx.send(frame(i * 100, 8000)).unwrap();
    }
    drop(frame_tx);

    let report = run.await.unwrap();

    // Expect 2s + 2s + 1s trailing flush
    assert_eq!(report.segments.len(), 3, "expected 3 segments");
    assert_eq!(report.frames_dropped, 0);

    let mut expected_start = 0u64;
    for (i, meta) in report.segments.iter().enumerate() {
        assert_eq!(meta.index, i, "segment indices must be contiguous");
        assert_eq!(meta.start_ms, expected_start, "segments must not overlap");
        expected_start += meta.duration_ms;
    }
    assert_eq!(expected_start, 5000, "segments must cover the recording");

    // The channel carries the same segments, bytes attached
    let mut received = 0;
    while let Some(segment) = segment_rx.recv().await {
        assert_eq!(segment.meta(), report.segments[received]);
        assert!(!segment.samples.is_empty());
        received += 1;
    }
    assert_eq!(received, 3);
}

#[tokio::test]
async fn test_silence_cut_after_minimum_duration() {
    let (frame_tx, frame_rx) = broadcast::channel(256);
    let (segment_tx, mut segment_rx) = mpsc::channel(16);

    let segmenter = SegmentBuffer::new(settings(60, 1), FORMAT);
    let run = tokio::spawn(segmenter.run(FrameReceiver::new(frame_rx), segment_tx));

    // 1.5s loud, then 0.5s silence, then 1s loud again
    let mut t = 0u64;
    for _ in 0..15 {
        frame_tx.send(frame(t, 8000)).unwrap();
        t += 100;
    }
    for _ in 0..5 {
        frame_tx.send(frame(t, 0)).unwrap();
        t += 100;
    }
    for _ in 0..10 {
        frame_tx.send(frame(t, 8000)).unwrap();
        t += 100;
    }
    drop(frame_tx);

    let report = run.await.unwrap();
    assert_eq!(report.segments.len(), 2, "silence should cut one boundary");

    let first = segment_rx.recv().await.unwrap();
    assert_eq!(first.start_ms, 0);
    assert!(
        first.duration_ms >= 1500 && first.duration_ms < 3000,
        "first segment should close during the silent stretch, got {}ms",
        first.duration_ms
    );

    let second = segment_rx.recv().await.unwrap();
    assert_eq!(second.start_ms, first.duration_ms);
    assert!(segment_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_short_trailing_segment_is_flushed() {
    let (frame_tx, frame_rx) = broadcast::channel(64);
    let (segment_tx, mut segment_rx) = mpsc::channel(16);

    // Minimum 5s, but only 0.3s of audio arrives before capture stops
    let segmenter = SegmentBuffer::new(settings(60, 5), FORMAT);
    let run = tokio::spawn(segmenter.run(FrameReceiver::new(frame_rx), segment_tx));

    for i in 0..3u64 {
        frame_tx.send(frame(i * 100, 8000)).unwrap();
    }
    drop(frame_tx);

    let report = run.await.unwrap();
    assert_eq!(report.segments.len(), 1, "trailing partial must be flushed");
    assert_eq!(report.segments[0].duration_ms, 300);

    let segment = segment_rx.recv().await.unwrap();
    assert_eq!(segment.index, 0);
    assert_eq!(segment.samples.len(), 3 * 1600);
}

#[tokio::test]
async fn test_overrun_is_counted_and_recording_continues() {
    // Queue capacity 4, but 12 frames are sent before the segmenter starts
    // consuming: the oldest 8 are dropped.
    let (frame_tx, frame_rx) = broadcast::channel(4);
    let (segment_tx, mut segment_rx) = mpsc::channel(16);

    for i in 0..12u64 {
        frame_tx.send(frame(i * 100, 8000)).unwrap();
    }
    drop(frame_tx);

    let segmenter = SegmentBuffer::new(settings(60, 1), FORMAT);
    let report = segmenter
        .run(FrameReceiver::new(frame_rx), segment_tx)
        .await;

    assert_eq!(report.frames_dropped, 8, "oldest frames are dropped");
    assert_eq!(report.segments.len(), 1, "surviving audio still segments");

    let segment = segment_rx.recv().await.unwrap();
    assert_eq!(segment.samples.len(), 4 * 1600, "only surviving frames kept");
    // The surviving frames carry timestamps 800-1100ms; the segment must
    // start where they do instead of compressing the dropped stretch out.
    assert_eq!(segment.start_ms, 800);
    assert_eq!(segment.end_ms(), 1200);
}
