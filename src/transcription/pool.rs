//! Transcription worker pool.
//!
//! Segments are transcribed with bounded concurrency, so completion order is
//! not arrival order. A reorder buffer keyed by segment index holds finished
//! chunks until everything before them has been delivered, keeping the
//! transcript strictly time-ordered.
//!
//! Per-segment policy: one retry with the same model, then an unintelligible
//! marker covering the segment's time range. A single bad segment never
//! invalidates the rest of the transcript.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::warn;

use super::engine::{ModelSelector, TranscriptionEngine};
use super::transcript::{SegmentOutcome, TranscriptChunk};
use crate::audio::AudioSegment;

struct SegmentResult {
    chunk: TranscriptChunk,
    attempts: u32,
}

/// Per-segment outcomes, in segment order.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionReport {
    pub outcomes: Vec<SegmentOutcome>,
}

pub struct TranscriptionPool {
    engine: Arc<dyn TranscriptionEngine>,
    model: ModelSelector,
    workers: usize,
    grace: Duration,
}

impl TranscriptionPool {
    pub fn new(
        engine: Arc<dyn TranscriptionEngine>,
        model: ModelSelector,
        workers: usize,
        grace: Duration,
    ) -> Self {
        Self {
            engine,
            model,
            workers: workers.max(1),
            grace,
        }
    }

    /// Drive transcription until the segment stream ends or cancellation is
    /// observed. Ordered chunks go out on `chunk_tx` as soon as they are
    /// contiguous with everything already delivered.
    pub async fn run(
        &self,
        mut segment_rx: mpsc::Receiver<AudioSegment>,
        chunk_tx: mpsc::Sender<TranscriptChunk>,
        mut cancel: watch::Receiver<bool>,
    ) -> TranscriptionReport {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<SegmentResult> = JoinSet::new();
        let mut ready: BTreeMap<usize, SegmentResult> = BTreeMap::new();
        let mut next_expected = 0usize;
        let mut outcomes = Vec::new();
        let mut cancelled = *cancel.borrow();
        let mut cancel_open = true;
        let mut rx_open = true;

        loop {
            // A session can be cancelled before the pool ever runs; with
            // nothing dispatched yet every select branch below would be
            // disabled, so check first.
            if cancelled {
                break;
            }

            tokio::select! {
                biased;
                changed = cancel.changed(), if !cancelled && cancel_open => {
                    match changed {
                        Ok(()) if *cancel.borrow() => cancelled = true,
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
                segment = segment_rx.recv(), if rx_open && !cancelled => {
                    match segment {
                        Some(segment) => {
                            self.dispatch(&mut join_set, Arc::clone(&semaphore), segment);
                        }
                        None => rx_open = false,
                    }
                }
                joined = join_set.join_next(), if !join_set.is_empty() => {
                    if let Some(Ok(result)) = joined {
                        release_ready(result, &mut ready, &mut next_expected, &mut outcomes, &chunk_tx)
                            .await;
                    }
                }
            }

            if cancelled {
                break;
            }
            if !rx_open && join_set.is_empty() {
                break;
            }
        }

        if cancelled && !join_set.is_empty() {
            // Let in-flight calls finish within the grace window, then cut
            // them loose.
            let drain = async {
                while let Some(joined) = join_set.join_next().await {
                    if let Ok(result) = joined {
                        release_ready(result, &mut ready, &mut next_expected, &mut outcomes, &chunk_tx)
                            .await;
                    }
                }
            };
            if timeout(self.grace, drain).await.is_err() {
                warn!("Grace timeout elapsed with transcription calls in flight");
                join_set.abort_all();
            }
        }

        // Anything still parked in the reorder buffer (possible after a
        // cancellation gap) goes out in index order.
        for (_, result) in std::mem::take(&mut ready) {
            outcomes.push(SegmentOutcome {
                segment_index: result.chunk.segment_index,
                attempts: result.attempts,
                unintelligible: result.chunk.unintelligible,
            });
            let _ = chunk_tx.send(result.chunk).await;
        }

        outcomes.sort_by_key(|o| o.segment_index);
        TranscriptionReport { outcomes }
    }

    fn dispatch(
        &self,
        join_set: &mut JoinSet<SegmentResult>,
        semaphore: Arc<Semaphore>,
        segment: AudioSegment,
    ) {
        let engine = Arc::clone(&self.engine);
        let model = self.model.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();

            match engine.transcribe(&segment, &model).await {
                Ok(chunk) => SegmentResult { chunk, attempts: 1 },
                Err(first) => {
                    warn!("{} (attempt 1), retrying", first);
                    match engine.transcribe(&segment, &model).await {
                        Ok(chunk) => SegmentResult { chunk, attempts: 2 },
                        Err(second) => {
                            warn!("{} (attempt 2), marking segment unintelligible", second);
                            SegmentResult {
                                chunk: TranscriptChunk::unintelligible(
                                    segment.index,
                                    segment.start_ms,
                                    segment.end_ms(),
                                ),
                                attempts: 2,
                            }
                        }
                    }
                }
            }
        });
    }
}

/// Park the finished chunk, then deliver the contiguous run starting at
/// `next_expected`.
async fn release_ready(
    result: SegmentResult,
    ready: &mut BTreeMap<usize, SegmentResult>,
    next_expected: &mut usize,
    outcomes: &mut Vec<SegmentOutcome>,
    chunk_tx: &mpsc::Sender<TranscriptChunk>,
) {
    ready.insert(result.chunk.segment_index, result);

    while let Some(result) = ready.remove(next_expected) {
        outcomes.push(SegmentOutcome {
            segment_index: result.chunk.segment_index,
            attempts: result.attempts,
            unintelligible: result.chunk.unintelligible,
        });
        let _ = chunk_tx.send(result.chunk).await;
        *next_expected += 1;
    }
}
