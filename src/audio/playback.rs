//! Audio playback to speakers
//!
//! Owns the busy/idle state the capture side consults for self-trigger
//! suppression, and a cancel flag that makes barge-in interruption safe at
//! any time.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// What is currently being played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackKind {
    /// Synthesized assistant speech; interruptible by barge-in
    Speech,
    /// Short acknowledgement cue; always suppresses wake detection
    Cue,
    /// Nothing in flight
    Idle,
}

/// Plays synthesized speech and cues, with cancellation
pub struct PlaybackController {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    kind: Arc<Mutex<PlaybackKind>>,
}

impl PlaybackController {
    /// Create a new playback controller
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports the playback rate
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device,
            config,
            busy: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            kind: Arc::new(Mutex::new(PlaybackKind::Idle)),
        })
    }

    /// Play synthesized speech from MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub async fn play_speech(&self, mp3_data: &[u8]) -> Result<()> {
        let samples = decode_mp3(mp3_data)?;
        self.play_samples(samples, PlaybackKind::Speech).await
    }

    /// Play the short acknowledgement cue
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_cue(&self) -> Result<()> {
        self.play_samples(acknowledgement_cue(), PlaybackKind::Cue)
            .await
    }

    /// Play raw samples at the playback rate
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_raw(&self, samples: Vec<f32>) -> Result<()> {
        self.play_samples(samples, PlaybackKind::Speech).await
    }

    /// Stop in-flight playback immediately; safe to call at any time
    pub fn interrupt(&self) {
        if self.busy.load(Ordering::SeqCst) {
            tracing::debug!("playback interrupted");
            self.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Whether playback is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// What is currently playing
    #[must_use]
    pub fn kind(&self) -> PlaybackKind {
        self.kind
            .lock()
            .map_or(PlaybackKind::Idle, |k| *k)
    }

    #[allow(clippy::future_not_send, clippy::significant_drop_tightening)]
    async fn play_samples(&self, samples: Vec<f32>, kind: PlaybackKind) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        self.cancel.store(false, Ordering::SeqCst);
        self.busy.store(true, Ordering::SeqCst);
        if let Ok(mut k) = self.kind.lock() {
            *k = kind;
        }

        let result = self.run_stream(samples).await;

        if let Ok(mut k) = self.kind.lock() {
            *k = PlaybackKind::Idle;
        }
        self.busy.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);

        result
    }

    #[allow(clippy::future_not_send, clippy::cast_precision_loss)]
    async fn run_stream(&self, samples: Vec<f32>) -> Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let config = self.config.clone();
        let channels = config.channels as usize;

        let sample_count = samples.len();
        let position = Arc::new(Mutex::new(0usize));
        let finished = Arc::new(AtomicBool::new(false));
        let cancel = Arc::clone(&self.cancel);

        let position_cb = Arc::clone(&position);
        let finished_cb = Arc::clone(&finished);
        let cancel_cb = Arc::clone(&cancel);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if cancel_cb.load(Ordering::SeqCst) {
                        data.fill(0.0);
                        finished_cb.store(true, Ordering::SeqCst);
                        return;
                    }

                    let Ok(mut pos) = position_cb.lock() else {
                        data.fill(0.0);
                        return;
                    };

                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples.len() {
                            samples[*pos]
                        } else {
                            finished_cb.store(true, Ordering::SeqCst);
                            0.0
                        };

                        for out in &mut *frame {
                            *out = sample;
                        }

                        if *pos < samples.len() {
                            *pos += 1;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let deadline = std::time::Instant::now()
            + std::time::Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::SeqCst) {
            if std::time::Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        // Let the device drain its last buffer unless we were cancelled
        if !self.cancel.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        drop(stream);
        tracing::debug!(
            samples = sample_count,
            cancelled = self.cancel.load(Ordering::SeqCst),
            "playback complete"
        );

        Ok(())
    }
}

/// Short two-tone acknowledgement cue
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn acknowledgement_cue() -> Vec<f32> {
    static CUE: OnceLock<Vec<f32>> = OnceLock::new();

    CUE.get_or_init(|| {
        let rate = PLAYBACK_SAMPLE_RATE as f32;
        let tone = |freq: f32, secs: f32| {
            let count = (rate * secs) as usize;
            (0..count).map(move |i| {
                let t = i as f32 / rate;
                (2.0 * std::f32::consts::PI * freq * t).sin() * 0.25
            })
        };

        tone(880.0, 0.08).chain(tone(1320.0, 0.10)).collect()
    })
    .clone()
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                // Convert i16 samples to f32 and handle stereo to mono
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    // Stereo: average channels
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    // Mono
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}
