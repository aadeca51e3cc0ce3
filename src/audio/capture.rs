//! Capture controller: bounded frame queue and recording finalization.
//!
//! Frames flow backend -> forward task -> broadcast queue. The broadcast
//! channel gives the drop-oldest-on-overflow policy the capture path needs: a
//! slow consumer lags and observes how many frames it lost, while the
//! producer side never blocks.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioFormat, AudioFrame};
use super::segment::SegmentMeta;
use crate::error::CaptureError;

/// A finalized recording. Mutated only while capture is active; immutable
/// afterward. Segment boundaries are attached by the session once the
/// segmenter drains, since segment bytes flow through the pipeline exactly
/// once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recording {
    pub format: AudioFormat,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub frames_captured: u64,
    /// Frames lost to queue overrun; gaps in the recording
    pub frames_dropped: u64,
    pub segments: Vec<SegmentMeta>,
}

/// Event delivered to the capture queue consumer.
#[derive(Debug, Clone)]
pub enum FrameEvent {
    Frame(AudioFrame),
    /// The consumer fell behind and `dropped` frames were discarded. The
    /// recording continues with a gap.
    Overrun { dropped: u64 },
}

/// Consumer end of the bounded capture queue.
pub struct FrameReceiver {
    rx: broadcast::Receiver<AudioFrame>,
}

impl FrameReceiver {
    pub fn new(rx: broadcast::Receiver<AudioFrame>) -> Self {
        Self { rx }
    }

    /// Receive the next event; None once capture has stopped and the queue
    /// is drained.
    pub async fn recv(&mut self) -> Option<FrameEvent> {
        match self.rx.recv().await {
            Ok(frame) => Some(FrameEvent::Frame(frame)),
            Err(broadcast::error::RecvError::Lagged(dropped)) => {
                warn!("Frame overrun: dropped {} frames", dropped);
                Some(FrameEvent::Overrun { dropped })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[derive(Default)]
struct CaptureTotals {
    frames: u64,
    duration_ms: u64,
}

/// Owns the backend for one session. `stop` is idempotent: the first call
/// finalizes the `Recording`, later calls return the same value.
pub struct AudioCapture {
    backend: Box<dyn AudioBackend>,
    format: AudioFormat,
    queue_capacity: usize,
    archive_path: Option<PathBuf>,
    started_at: DateTime<Utc>,
    totals: Arc<Mutex<CaptureTotals>>,
    forward_task: Option<JoinHandle<()>>,
    finalized: Option<Recording>,
}

impl AudioCapture {
    pub fn new(
        backend: Box<dyn AudioBackend>,
        format: AudioFormat,
        queue_capacity: usize,
        archive_path: Option<PathBuf>,
    ) -> Self {
        Self {
            backend,
            format,
            queue_capacity,
            archive_path,
            started_at: Utc::now(),
            totals: Arc::new(Mutex::new(CaptureTotals::default())),
            forward_task: None,
            finalized: None,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Start the backend and the forwarding task; returns the consumer end
    /// of the bounded queue.
    pub async fn start(&mut self) -> Result<FrameReceiver, CaptureError> {
        let mut backend_rx = self.backend.start().await?;
        self.started_at = Utc::now();

        info!("Audio capture started ({})", self.backend.name());

        let (queue_tx, queue_rx) = broadcast::channel(self.queue_capacity);
        let totals = Arc::clone(&self.totals);
        let mut archive = self.open_archive()?;

        let forward = tokio::spawn(async move {
            while let Some(frame) = backend_rx.recv().await {
                {
                    let mut t = totals.lock().await;
                    t.frames += 1;
                    t.duration_ms = frame.timestamp_ms + frame.duration_ms();
                }

                let mut archive_failed = false;
                if let Some(writer) = archive.as_mut() {
                    for &sample in &frame.samples {
                        if let Err(e) = writer.write_sample(sample) {
                            warn!("Failed to write archive sample: {}", e);
                            archive_failed = true;
                            break;
                        }
                    }
                }
                if archive_failed {
                    archive = None;
                }

                // A send error only means no subscriber yet; frames are
                // still counted toward the recording.
                let _ = queue_tx.send(frame);
            }

            if let Some(writer) = archive.take() {
                if let Err(e) = writer.finalize() {
                    warn!("Failed to finalize WAV archive: {}", e);
                }
            }
        });
        self.forward_task = Some(forward);

        Ok(FrameReceiver::new(queue_rx))
    }

    /// Stop capture and finalize the recording. Idempotent.
    pub async fn stop(&mut self) -> Result<Recording, CaptureError> {
        if let Some(recording) = &self.finalized {
            return Ok(recording.clone());
        }

        self.backend.stop().await?;

        if let Some(task) = self.forward_task.take() {
            if let Err(e) = task.await {
                warn!("Capture forward task panicked: {}", e);
            }
        }

        let totals = self.totals.lock().await;
        let recording = Recording {
            format: self.format,
            started_at: self.started_at,
            duration_ms: totals.duration_ms,
            frames_captured: totals.frames,
            frames_dropped: 0,
            segments: Vec::new(),
        };
        drop(totals);

        info!(
            "Capture stopped: {:.1}s, {} frames",
            recording.duration_ms as f64 / 1000.0,
            recording.frames_captured
        );

        self.finalized = Some(recording.clone());
        Ok(recording)
    }

    fn open_archive(
        &self,
    ) -> Result<Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>, CaptureError> {
        let Some(path) = &self.archive_path else {
            return Ok(None);
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CaptureError::Stream(format!("cannot create archive dir: {}", e)))?;
        }

        let spec = hound::WavSpec {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| CaptureError::Stream(format!("cannot create WAV archive: {}", e)))?;

        info!("Archiving session audio to {:?}", path);
        Ok(Some(writer))
    }
}
