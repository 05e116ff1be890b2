//! Audio capture from microphone
//!
//! Delivers fixed-size frames to the pipeline. The cpal callback only
//! appends to a shared buffer; framing happens on the caller's side of the
//! lock so the device callback stays cheap.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::{FRAME_SIZE, SAMPLE_RATE};
use crate::{Error, Result};

/// Shared sample sink with caller-side framing
///
/// The device callback appends into `shared`; the caller drains into
/// `pending` and slices off whole frames from there.
struct Framer {
    shared: Arc<Mutex<Vec<f32>>>,
    pending: Vec<f32>,
}

impl Framer {
    fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Vec::new())),
            pending: Vec::new(),
        }
    }

    /// Handle for the device callback to append into
    fn sink(&self) -> Arc<Mutex<Vec<f32>>> {
        Arc::clone(&self.shared)
    }

    /// Drain captured audio as complete fixed-size frames; partial tail
    /// samples stay pending until the next call
    fn drain_frames(&mut self) -> Vec<Box<[f32]>> {
        if let Ok(mut buf) = self.shared.lock() {
            self.pending.append(&mut buf);
        }

        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_SIZE {
            let rest = self.pending.split_off(FRAME_SIZE);
            let frame = std::mem::replace(&mut self.pending, rest);
            frames.push(frame.into_boxed_slice());
        }

        frames
    }

    /// Drop all captured-but-unframed audio, framed or not
    fn discard(&mut self) {
        if let Ok(mut buf) = self.shared.lock() {
            buf.clear();
        }
        self.pending.clear();
    }
}

/// Captures audio from the default input device and slices it into frames
pub struct AudioCapture {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    framer: Framer,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports 16kHz mono
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            framer: Framer::new(),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let shared = self.framer.sink();
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let config = self.config.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = shared.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
        self.framer.discard();
    }

    /// Drain captured audio as complete fixed-size frames
    ///
    /// Partial tail samples stay pending until the next call, so frames
    /// are always exactly [`FRAME_SIZE`] samples.
    pub fn drain_frames(&mut self) -> Vec<Box<[f32]>> {
        self.framer.drain_frames()
    }

    /// Discard all captured-but-unframed audio
    pub fn discard(&mut self) {
        self.framer.discard();
    }

    /// Snapshot the raw shared buffer without draining (diagnostics)
    #[must_use]
    pub fn peek_raw(&self) -> Vec<f32> {
        self.framer
            .shared
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_is_exact() {
        // 2.5 frames in, 2 out, tail pending
        let mut framer = Framer::new();
        framer
            .sink()
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(0.1f32, FRAME_SIZE * 2 + FRAME_SIZE / 2));

        let frames = framer.drain_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == FRAME_SIZE));
        assert_eq!(framer.pending.len(), FRAME_SIZE / 2);
    }

    #[test]
    fn discard_drops_captured_and_pending_audio() {
        // Anything captured while the acknowledgement cue plays must be
        // droppable wholesale so the cue echo never enters a recording
        let mut framer = Framer::new();
        framer
            .sink()
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(0.3f32, FRAME_SIZE + FRAME_SIZE / 2));
        framer.drain_frames();

        framer
            .sink()
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(0.3f32, FRAME_SIZE));
        framer.discard();

        assert!(framer.drain_frames().is_empty());
        assert!(framer.pending.is_empty());
    }
}
