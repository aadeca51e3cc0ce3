use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;

use crate::provider::ProviderId;

/// Application configuration. Built once at startup and passed by reference
/// into each component; nothing reads ambient global state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub segmenter: SegmenterSettings,
    #[serde(default)]
    pub transcription: TranscriptionSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Capture sample rate in Hz (Whisper expects 16kHz)
    pub sample_rate: u32,
    /// Channel count (1 = mono)
    pub channels: u16,
    /// Substring match against input device names; None = default input
    pub device: Option<String>,
    /// Frame size in milliseconds delivered by the backend
    pub buffer_duration_ms: u64,
    /// Capacity (in frames) of the capture queue; oldest frames are dropped
    /// on overflow so the hardware path never blocks
    pub queue_capacity: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            device: None,
            buffer_duration_ms: 100,
            queue_capacity: 256,
        }
    }
}

/// Segment boundary policy. The silence values are uncalibrated starting
/// points; tune against real audio.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmenterSettings {
    /// Hard cutoff: a segment never exceeds this duration
    pub max_segment_secs: u64,
    /// Silence is only honored as a boundary after this much audio
    pub min_segment_secs: u64,
    /// RMS amplitude (0.0 to 1.0 of full scale) below which a frame counts
    /// as silent
    pub silence_threshold: f32,
    /// Consecutive silence required to cut a segment, in milliseconds
    pub silence_duration_ms: u64,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            max_segment_secs: 300,
            min_segment_secs: 5,
            silence_threshold: 0.01,
            silence_duration_ms: 700,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Whisper model tier (tiny, small, medium, ...)
    pub model: String,
    /// Directory holding whisper-<model>.llamafile executables
    pub models_dir: PathBuf,
    /// Concurrent transcription calls
    pub workers: usize,
    pub gpu_enabled: bool,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "small".to_string(),
            models_dir: default_models_dir(),
            workers: 2,
            gpu_enabled: true,
        }
    }
}

fn default_models_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".whisperfiles"),
        None => PathBuf::from("models"),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub provider: ProviderId,
    pub model: String,
    /// Endpoint for the local Ollama provider; ignored by remote providers
    pub ollama_endpoint: String,
    /// Attempt ceiling for rate-limited provider calls
    pub max_attempts: u32,
    /// Concurrent analysis tasks against the provider
    pub concurrency: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            provider: ProviderId::Ollama,
            model: "llama3.2".to_string(),
            ollama_endpoint: "http://localhost:11434".to_string(),
            max_attempts: 4,
            concurrency: 2,
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Archive the captured audio as <output_dir>/<session-id>/recording.wav
    pub save_audio: bool,
    pub output_dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            save_audio: false,
            output_dir: PathBuf::from("recordings"),
        }
    }
}

impl Config {
    /// Load configuration from a file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
