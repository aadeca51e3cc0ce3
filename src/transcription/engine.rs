//! Speech-to-text engine boundary.
//!
//! The concrete engine shells out to a self-contained whisper executable
//! (one `whisper-<model>.llamafile` per model tier): segment audio goes out
//! as a temporary WAV file, timestamped text comes back on stdout. Each call
//! is independent and touches no shared state, so calls for distinct
//! segments may run concurrently.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::audio::AudioSegment;
use crate::config::TranscriptionSettings;
use crate::error::TranscriptionError;
use crate::transcription::TranscriptChunk;

/// Model tier selector, fixed for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelector {
    pub model: String,
}

impl ModelSelector {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe one segment. Stateless per call; side-effect-free on
    /// shared state.
    async fn transcribe(
        &self,
        segment: &AudioSegment,
        model: &ModelSelector,
    ) -> Result<TranscriptChunk, TranscriptionError>;
}

/// Engine driving a whisper llamafile as a subprocess.
pub struct WhisperCliEngine {
    models_dir: PathBuf,
    gpu_enabled: bool,
}

impl WhisperCliEngine {
    pub fn new(settings: &TranscriptionSettings) -> Self {
        Self {
            models_dir: settings.models_dir.clone(),
            gpu_enabled: settings.gpu_enabled,
        }
    }

    fn model_path(&self, model: &ModelSelector) -> PathBuf {
        self.models_dir
            .join(format!("whisper-{}.llamafile", model.model))
    }

    fn scratch_wav_path(&self, segment: &AudioSegment) -> PathBuf {
        std::env::temp_dir().join(format!(
            "voxnote-seg-{}-{}.wav",
            uuid::Uuid::new_v4(),
            segment.index
        ))
    }

    fn write_wav(
        &self,
        path: &PathBuf,
        segment: &AudioSegment,
    ) -> Result<(), TranscriptionError> {
        let spec = hound::WavSpec {
            channels: segment.format.channels,
            sample_rate: segment.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)
            .map_err(|e| TranscriptionError::new(segment.index, e.to_string()))?;
        for &sample in &segment.samples {
            writer
                .write_sample(sample)
                .map_err(|e| TranscriptionError::new(segment.index, e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| TranscriptionError::new(segment.index, e.to_string()))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl TranscriptionEngine for WhisperCliEngine {
    async fn transcribe(
        &self,
        segment: &AudioSegment,
        model: &ModelSelector,
    ) -> Result<TranscriptChunk, TranscriptionError> {
        let model_path = self.model_path(model);
        if !model_path.exists() {
            return Err(TranscriptionError::new(
                segment.index,
                format!("whisper model not found at {:?}", model_path),
            ));
        }

        let wav_path = self.scratch_wav_path(segment);
        self.write_wav(&wav_path, segment)?;

        let mut command = Command::new(&model_path);
        command.arg("-f").arg(&wav_path);
        if self.gpu_enabled {
            command.args(["--gpu", "auto"]);
        }

        debug!(
            "Transcribing segment {} ({:.1}s) with {:?}",
            segment.index,
            segment.duration_ms as f64 / 1000.0,
            model_path
        );

        let output = command.output().await;

        if let Err(e) = tokio::fs::remove_file(&wav_path).await {
            warn!("Failed to remove scratch WAV {:?}: {}", wav_path, e);
        }

        let output = output.map_err(|e| {
            TranscriptionError::new(segment.index, format!("failed to spawn whisper: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptionError::new(
                segment.index,
                format!("whisper exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let text = parse_whisper_output(&String::from_utf8_lossy(&output.stdout));
        if text.is_empty() {
            return Err(TranscriptionError::new(
                segment.index,
                "transcription produced no text",
            ));
        }

        Ok(TranscriptChunk {
            segment_index: segment.index,
            text,
            start_ms: segment.start_ms,
            end_ms: segment.end_ms(),
            confidence: None,
            unintelligible: false,
        })
    }
}

/// Strip the `[hh:mm:ss.mmm --> hh:mm:ss.mmm]` prefixes whisper prints per
/// line and join the remaining text.
fn parse_whisper_output(stdout: &str) -> String {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let text = if line.starts_with('[') {
                match line.split_once(']') {
                    Some((_, rest)) => rest.trim(),
                    None => line,
                }
            } else {
                line
            };
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
