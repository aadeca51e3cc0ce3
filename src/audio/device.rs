//! Microphone capture backend built on cpal.
//!
//! The cpal stream is not `Send`, so it lives on a dedicated capture thread.
//! The thread converts f32 device samples to i16 PCM frames of the configured
//! duration and hands them off with `try_send`, dropping frames instead of
//! ever blocking the audio callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioFrame, DeviceConfig};
use crate::error::CaptureError;

/// Channel size between the capture thread and the async side. Overflow here
/// is handled upstream of the session's bounded queue and is logged the same
/// way.
const THREAD_CHANNEL_CAPACITY: usize = 64;

pub struct CpalBackend {
    config: DeviceConfig,
    device_name: String,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalBackend {
    /// Resolve the input device eagerly so a bad selector fails before the
    /// session starts recording.
    pub fn new(config: DeviceConfig) -> Result<Self, CaptureError> {
        let device = resolve_input_device(config.device.as_deref())?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input".to_string());

        info!(
            "Using input device '{}' ({}Hz, {} channels)",
            device_name, config.sample_rate, config.channels
        );

        Ok(Self {
            config,
            device_name,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    /// List the names of available input devices.
    pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let mut names = Vec::new();
        for device in host.input_devices()? {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        let (frame_tx, frame_rx) = mpsc::channel(THREAD_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let config = self.config.clone();

        let handle = thread::spawn(move || {
            capture_thread(config, running, frame_tx, ready_tx);
        });
        self.thread = Some(handle);

        // Wait for the thread to report the stream is up (or why it isn't).
        match ready_rx.await {
            Ok(Ok(())) => Ok(frame_rx),
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(CaptureError::Stream(
                    "capture thread exited before starting".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

fn resolve_input_device(selector: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();

    match selector {
        Some(needle) => {
            let needle = needle.to_lowercase();
            host.input_devices()?
                .find(|d| {
                    d.name()
                        .map(|n| n.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    CaptureError::DeviceUnavailable(format!(
                        "no input device matching '{}'",
                        needle
                    ))
                })
        }
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string())),
    }
}

/// Owns the cpal stream for its whole lifetime; tears it down when `running`
/// clears or the device reports an error.
fn capture_thread(
    config: DeviceConfig,
    running: Arc<AtomicBool>,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<(), CaptureError>>,
) {
    let device = match resolve_input_device(config.device.as_deref()) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let frame_samples = (config.sample_rate as u64 * config.channels as u64
        * config.buffer_duration_ms
        / 1000) as usize;
    let sample_rate = config.sample_rate;
    let channels = config.channels;

    let mut pending: Vec<i16> = Vec::with_capacity(frame_samples);
    let mut samples_emitted: u64 = 0;

    let err_running = Arc::clone(&running);
    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                let clamped = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32);
                pending.push(clamped as i16);

                if pending.len() >= frame_samples {
                    let timestamp_ms =
                        samples_emitted / channels as u64 * 1000 / sample_rate as u64;
                    samples_emitted += pending.len() as u64;

                    let frame = AudioFrame {
                        samples: std::mem::replace(
                            &mut pending,
                            Vec::with_capacity(frame_samples),
                        ),
                        sample_rate,
                        channels,
                        timestamp_ms,
                    };

                    // try_send keeps the audio callback non-blocking
                    if frame_tx.try_send(frame).is_err() {
                        warn!("capture thread channel full, dropping frame");
                    }
                }
            }
        },
        move |err| {
            warn!("Input stream error: {}", err);
            // Closing the channel signals device loss to the session
            err_running.store(false, Ordering::SeqCst);
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.into()));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    info!("Capture thread stopped");
}
