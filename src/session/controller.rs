use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::state::{SessionOutcome, SessionSnapshot, SessionState};
use crate::analysis::{AnalysisOrchestrator, AnalysisResult, Profile};
use crate::audio::{
    AudioBackend, AudioCapture, CpalBackend, DeviceConfig, FrameReceiver, SegmentBuffer,
    SegmentReport,
};
use crate::config::Config;
use crate::error::{CaptureError, SessionError};
use crate::provider::{
    build_provider, GenerationOptions, Provider, ProviderCredential, ProviderGateway, RetryPolicy,
};
use crate::transcription::{
    ModelSelector, Transcript, TranscriptionEngine, TranscriptionPool, TranscriptionReport,
    WhisperCliEngine,
};

/// Everything a session needs beyond its external collaborators.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub profile: Profile,
    pub model: ModelSelector,
    pub device: DeviceConfig,
    pub segmenter: crate::config::SegmenterSettings,
    pub queue_capacity: usize,
    pub transcription_workers: usize,
    pub retry: RetryPolicy,
    pub generation: GenerationOptions,
    pub analysis_concurrency: usize,
    /// How long in-flight work may finish after cancellation
    pub grace: Duration,
    /// When set, the captured audio is archived under this directory
    pub archive_dir: Option<PathBuf>,
    pub run_analysis: bool,
}

impl SessionOptions {
    pub fn from_config(config: &Config, profile: Profile) -> Self {
        Self {
            profile,
            model: ModelSelector::new(&config.transcription.model),
            device: DeviceConfig::from(&config.audio),
            segmenter: config.segmenter.clone(),
            queue_capacity: config.audio.queue_capacity,
            transcription_workers: config.transcription.workers,
            retry: RetryPolicy::from_settings(&config.analysis),
            generation: GenerationOptions {
                temperature: config.analysis.temperature,
                max_tokens: config.analysis.max_tokens,
            },
            analysis_concurrency: config.analysis.concurrency,
            grace: Duration::from_secs(10),
            archive_dir: config
                .output
                .save_audio
                .then(|| config.output.output_dir.clone()),
            run_analysis: true,
        }
    }
}

/// External collaborators, injected so tests can script them.
pub struct SessionDeps {
    pub backend: Box<dyn AudioBackend>,
    pub engine: Arc<dyn TranscriptionEngine>,
    pub provider: Arc<dyn Provider>,
}

struct Shared {
    state: Mutex<SessionState>,
    started_at: DateTime<Utc>,
    segments_emitted: AtomicUsize,
    chunks_transcribed: AtomicUsize,
}

impl Shared {
    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().await;
        info!("Session state: {:?} -> {:?}", *state, next);
        *state = next;
    }
}

/// Top-level state machine tying capture to transcription and analysis.
///
/// The lifecycle surface is `start`, `stop_recording`, `cancel`, `status`,
/// and `wait` for the terminal outcome.
pub struct SessionController {
    id: String,
    options: SessionOptions,
    deps: Option<SessionDeps>,
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
    cancel_tx: watch::Sender<bool>,
    driver: Option<JoinHandle<SessionOutcome>>,
}

impl SessionController {
    pub fn new(options: SessionOptions, deps: SessionDeps) -> Self {
        let id = format!("session-{}", uuid::Uuid::new_v4());
        let (stop_tx, _) = watch::channel(false);
        let (cancel_tx, _) = watch::channel(false);

        Self {
            id,
            options,
            deps: Some(deps),
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                started_at: Utc::now(),
                segments_emitted: AtomicUsize::new(0),
                chunks_transcribed: AtomicUsize::new(0),
            }),
            stop_tx,
            cancel_tx,
            driver: None,
        }
    }

    /// Build a controller over the real collaborators: cpal input device,
    /// whisper CLI engine, and the configured AI provider.
    pub fn from_config(
        config: &Config,
        profile: Profile,
        run_analysis: bool,
    ) -> Result<Self, SessionError> {
        let backend = CpalBackend::new(DeviceConfig::from(&config.audio))?;
        let engine = Arc::new(WhisperCliEngine::new(&config.transcription));

        let credential =
            ProviderCredential::resolve(config.analysis.provider, &config.analysis.ollama_endpoint)?;
        let provider: Arc<dyn Provider> = Arc::from(build_provider(
            config.analysis.provider,
            &credential,
            &config.analysis.model,
        )?);

        let mut options = SessionOptions::from_config(config, profile);
        options.run_analysis = run_analysis;

        Ok(Self::new(
            options,
            SessionDeps {
                backend: Box::new(backend),
                engine,
                provider,
            },
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start recording. Device errors surface here, before any pipeline
    /// work is spawned.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let deps = self
            .deps
            .take()
            .ok_or_else(|| SessionError::Config("session already started".to_string()))?;

        let archive_path = self
            .options
            .archive_dir
            .as_ref()
            .map(|dir| dir.join(&self.id).join("recording.wav"));

        let mut capture = AudioCapture::new(
            deps.backend,
            self.options.device.format(),
            self.options.queue_capacity,
            archive_path,
        );
        let frames = capture.start().await.map_err(SessionError::Capture)?;

        self.shared.set_state(SessionState::Recording).await;
        info!("Session {} recording", self.id);

        let driver = tokio::spawn(drive(DriverParts {
            id: self.id.clone(),
            shared: Arc::clone(&self.shared),
            capture,
            frames,
            engine: deps.engine,
            provider: deps.provider,
            options: self.options.clone(),
            stop_rx: self.stop_tx.subscribe(),
            cancel_rx: self.cancel_tx.subscribe(),
        }));
        self.driver = Some(driver);

        Ok(())
    }

    /// Stop capturing; transcription and analysis proceed to completion.
    pub fn stop_recording(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop-and-discard during recording; after recording, lets in-flight
    /// work finish within the grace timeout and preserves partial results.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub async fn status(&self) -> SessionSnapshot {
        let state = *self.shared.state.lock().await;
        let duration = Utc::now().signed_duration_since(self.shared.started_at);

        SessionSnapshot {
            id: self.id.clone(),
            state,
            started_at: self.shared.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            segments_emitted: self.shared.segments_emitted.load(Ordering::SeqCst),
            chunks_transcribed: self.shared.chunks_transcribed.load(Ordering::SeqCst),
        }
    }

    /// Wait for the terminal outcome.
    pub async fn wait(mut self) -> SessionOutcome {
        match self.driver.take() {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => SessionOutcome {
                    id: self.id.clone(),
                    state: SessionState::Failed,
                    error: Some(SessionError::Config(format!(
                        "session driver panicked: {}",
                        e
                    ))),
                    recording: None,
                    transcript: Transcript::new(),
                    segment_outcomes: Vec::new(),
                    analysis: AnalysisResult::default(),
                    frames_dropped: 0,
                },
            },
            None => SessionOutcome {
                id: self.id.clone(),
                state: SessionState::Idle,
                error: None,
                recording: None,
                transcript: Transcript::new(),
                segment_outcomes: Vec::new(),
                analysis: AnalysisResult::default(),
                frames_dropped: 0,
            },
        }
    }
}

struct DriverParts {
    id: String,
    shared: Arc<Shared>,
    capture: AudioCapture,
    frames: FrameReceiver,
    engine: Arc<dyn TranscriptionEngine>,
    provider: Arc<dyn Provider>,
    options: SessionOptions,
    stop_rx: watch::Receiver<bool>,
    cancel_rx: watch::Receiver<bool>,
}

enum RecordingEnd {
    Stopped,
    Cancelled,
    /// The frame stream ended without a stop or cancel: device loss.
    StreamEnded,
}

/// Wait until the signal is set; pends forever if the sender is gone so a
/// dropped controller never looks like a user command.
async fn wait_for_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn drive(parts: DriverParts) -> SessionOutcome {
    let DriverParts {
        id,
        shared,
        mut capture,
        frames,
        engine,
        provider,
        options,
        mut stop_rx,
        mut cancel_rx,
    } = parts;

    // Segmenter: frames in, bounded segments out
    let (segment_tx, segment_rx) = mpsc::channel(16);
    let segmenter = SegmentBuffer::new(options.segmenter.clone(), capture.format());
    let mut seg_task = tokio::spawn(segmenter.run(frames, segment_tx));

    // Relay segments to the pool, counting them for status snapshots
    let (pool_tx, pool_rx) = mpsc::channel(16);
    let relay_shared = Arc::clone(&shared);
    let relay_task = tokio::spawn(async move {
        let mut segment_rx = segment_rx;
        while let Some(segment) = segment_rx.recv().await {
            relay_shared
                .segments_emitted
                .fetch_add(1, Ordering::SeqCst);
            if pool_tx.send(segment).await.is_err() {
                break;
            }
        }
    });

    // Transcription pool: segments in, time-ordered chunks out
    let (chunk_tx, mut chunk_rx) = mpsc::channel(16);
    let pool = TranscriptionPool::new(
        Arc::clone(&engine),
        options.model.clone(),
        options.transcription_workers,
        options.grace,
    );
    let pool_cancel = cancel_rx.clone();
    let pool_task = tokio::spawn(async move { pool.run(pool_rx, chunk_tx, pool_cancel).await });

    // Collector: assemble the transcript as ordered chunks arrive
    let collector_shared = Arc::clone(&shared);
    let collector_task = tokio::spawn(async move {
        let mut transcript = Transcript::new();
        while let Some(chunk) = chunk_rx.recv().await {
            collector_shared
                .chunks_transcribed
                .fetch_add(1, Ordering::SeqCst);
            transcript.push(chunk);
        }
        transcript
    });

    // --- Recording phase ---
    let mut early_seg_report: Option<SegmentReport> = None;
    let end = tokio::select! {
        _ = wait_for_signal(&mut stop_rx) => RecordingEnd::Stopped,
        _ = wait_for_signal(&mut cancel_rx) => RecordingEnd::Cancelled,
        joined = &mut seg_task => {
            early_seg_report = Some(joined.unwrap_or_default());
            RecordingEnd::StreamEnded
        }
    };

    if matches!(end, RecordingEnd::Cancelled) {
        // Discard the recording entirely
        info!("Session {} cancelled during recording, discarding", id);
        let _ = capture.stop().await;
        let _ = seg_task.await;
        let _ = relay_task.await;
        let _ = pool_task.await;
        let _ = collector_task.await;

        shared.set_state(SessionState::Cancelled).await;
        return SessionOutcome {
            id,
            state: SessionState::Cancelled,
            error: None,
            recording: None,
            transcript: Transcript::new(),
            segment_outcomes: Vec::new(),
            analysis: AnalysisResult::default(),
            frames_dropped: 0,
        };
    }

    let device_lost = matches!(end, RecordingEnd::StreamEnded);
    if device_lost {
        warn!("Session {} input stream ended unexpectedly", id);
    }

    let recording = match capture.stop().await {
        Ok(recording) => recording,
        Err(e) => {
            shared.set_state(SessionState::Failed).await;
            return SessionOutcome {
                id,
                state: SessionState::Failed,
                error: Some(SessionError::Capture(e)),
                recording: None,
                transcript: Transcript::new(),
                segment_outcomes: Vec::new(),
                analysis: AnalysisResult::default(),
                frames_dropped: 0,
            };
        }
    };

    // --- Transcribing phase ---
    shared.set_state(SessionState::Transcribing).await;

    let seg_report = match early_seg_report {
        Some(report) => report,
        None => match seg_task.await {
            Ok(report) => report,
            Err(e) => {
                warn!("Segmenter task panicked: {}", e);
                SegmentReport::default()
            }
        },
    };
    let _ = relay_task.await;

    let tx_report = match pool_task.await {
        Ok(report) => report,
        Err(e) => {
            warn!("Transcription pool task panicked: {}", e);
            TranscriptionReport::default()
        }
    };
    let transcript = match collector_task.await {
        Ok(transcript) => transcript,
        Err(e) => {
            warn!("Transcript collector task panicked: {}", e);
            Transcript::new()
        }
    };

    let mut recording = recording;
    recording.segments = seg_report.segments.clone();
    recording.frames_dropped = seg_report.frames_dropped;

    if device_lost {
        shared.set_state(SessionState::Failed).await;
        return SessionOutcome {
            id,
            state: SessionState::Failed,
            error: Some(SessionError::Capture(CaptureError::Stream(
                "input stream ended unexpectedly".to_string(),
            ))),
            recording: Some(recording),
            transcript,
            segment_outcomes: tx_report.outcomes,
            analysis: AnalysisResult::default(),
            frames_dropped: seg_report.frames_dropped,
        };
    }

    if *cancel_rx.borrow() {
        shared.set_state(SessionState::Cancelled).await;
        return SessionOutcome {
            id,
            state: SessionState::Cancelled,
            error: None,
            recording: Some(recording),
            transcript,
            segment_outcomes: tx_report.outcomes,
            analysis: AnalysisResult::default(),
            frames_dropped: seg_report.frames_dropped,
        };
    }

    // --- Analyzing phase ---
    let analysis = if options.run_analysis && !transcript.is_empty() {
        shared.set_state(SessionState::Analyzing).await;

        let gateway = Arc::new(ProviderGateway::new(provider, options.retry.clone()));
        let orchestrator = AnalysisOrchestrator::new(
            gateway,
            options.generation.clone(),
            options.analysis_concurrency,
            options.grace,
        );
        orchestrator
            .run(&options.profile, &transcript.full_text(), cancel_rx.clone())
            .await
    } else {
        AnalysisResult::default()
    };

    let final_state = if *cancel_rx.borrow() {
        SessionState::Cancelled
    } else {
        SessionState::Complete
    };
    shared.set_state(final_state).await;

    SessionOutcome {
        id,
        state: final_state,
        error: None,
        recording: Some(recording),
        transcript,
        segment_outcomes: tx_report.outcomes,
        analysis,
        frames_dropped: seg_report.frames_dropped,
    }
}
