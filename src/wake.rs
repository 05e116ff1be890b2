//! Wake word gate
//!
//! Consumes capture frames, maintains the acoustic model's rolling feature
//! buffers, and emits a detection once warm-up has elapsed. Feature buffer
//! dimensions follow the openWakeWord layout: a 2-D mel buffer feeding a
//! strided embedding ring that the scorer classifies.
//!
//! A scorer failure is logged and treated as "no detection" — the frame
//! loop must never die on a bad frame.

use crate::audio::{FRAME_SIZE, ms_to_samples, rms};
use crate::config::WakeConfig;
use crate::{Error, Result};

/// Mel feature bins per frame
pub const MEL_BINS: usize = 32;

/// Mel frames in the rolling window
pub const MEL_WINDOW: usize = 76;

/// Dimensionality of one pooled embedding
pub const EMBEDDING_DIM: usize = 96;

/// New embedding every this many frames once the mel buffer is full
pub const EMBEDDING_STEP: usize = 8;

/// Embeddings kept for classification
pub const EMBEDDING_RING: usize = 16;

/// Result of feeding one frame to the gate
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Whether the wake word fired this frame
    pub detected: bool,
    /// Scorer confidence in [0, 1]
    pub score: f32,
    /// Configured label, present only on detection
    pub label: Option<String>,
}

impl Detection {
    const fn none() -> Self {
        Self {
            detected: false,
            score: 0.0,
            label: None,
        }
    }
}

/// Scores the embedding window for wake word presence
///
/// Implementations wrap the actual keyword-spotting model. Errors are
/// swallowed by the gate and logged, never propagated to the frame loop.
pub trait WakeScorer: Send {
    /// Score the (oldest-first) embedding window, returning confidence in [0, 1]
    ///
    /// # Errors
    ///
    /// Returns error if the underlying model call fails
    fn score(&mut self, embeddings: &[[f32; EMBEDDING_DIM]]) -> Result<f32>;

    /// Reset internal state between sessions
    fn reset(&mut self);
}

/// Rolling feature state owned by the gate
///
/// Buffer dimensions are fixed at construction and never resized; the
/// state resets on every detection and on session restart.
struct DetectorState {
    mel: Vec<[f32; MEL_BINS]>,
    mel_write: usize,
    mel_filled: bool,
    embeddings: Vec<[f32; EMBEDDING_DIM]>,
    emb_write: usize,
    emb_filled: bool,
    frames_since_prediction: usize,
    frames_since_mel_full: usize,
}

impl DetectorState {
    fn new() -> Self {
        Self {
            mel: vec![[0.0; MEL_BINS]; MEL_WINDOW],
            mel_write: 0,
            mel_filled: false,
            embeddings: vec![[0.0; EMBEDDING_DIM]; EMBEDDING_RING],
            emb_write: 0,
            emb_filled: false,
            frames_since_prediction: 0,
            frames_since_mel_full: 0,
        }
    }

    fn reset(&mut self) {
        for row in &mut self.mel {
            *row = [0.0; MEL_BINS];
        }
        for row in &mut self.embeddings {
            *row = [0.0; EMBEDDING_DIM];
        }
        self.mel_write = 0;
        self.mel_filled = false;
        self.emb_write = 0;
        self.emb_filled = false;
        self.frames_since_prediction = 0;
        self.frames_since_mel_full = 0;
    }

    fn push_mel(&mut self, row: [f32; MEL_BINS]) {
        self.mel[self.mel_write] = row;
        self.mel_write = (self.mel_write + 1) % MEL_WINDOW;
        if self.mel_write == 0 {
            self.mel_filled = true;
        }
        if self.mel_filled {
            self.frames_since_mel_full += 1;
        }
    }

    fn push_embedding(&mut self, emb: [f32; EMBEDDING_DIM]) {
        self.embeddings[self.emb_write] = emb;
        self.emb_write = (self.emb_write + 1) % EMBEDDING_RING;
        if self.emb_write == 0 {
            self.emb_filled = true;
        }
    }

    /// Filled portion of the embedding ring, oldest first
    fn embedding_window(&self) -> Vec<[f32; EMBEDDING_DIM]> {
        if self.emb_filled {
            let mut out = Vec::with_capacity(EMBEDDING_RING);
            for i in 0..EMBEDDING_RING {
                out.push(self.embeddings[(self.emb_write + i) % EMBEDDING_RING]);
            }
            out
        } else {
            self.embeddings[..self.emb_write].to_vec()
        }
    }
}

/// Wake word gate: frames in, detections out
pub struct WakeWordGate {
    threshold: f32,
    margin: f32,
    warmup_frames: usize,
    label: String,
    state: DetectorState,
    scorer: Box<dyn WakeScorer>,
}

impl WakeWordGate {
    /// Create a gate with the default energy-pattern scorer
    #[must_use]
    pub fn new(config: &WakeConfig) -> Self {
        Self::with_scorer(config, Box::new(EnergyPatternScorer::new()))
    }

    /// Create a gate with an explicit scorer (model adapter)
    #[must_use]
    pub fn with_scorer(config: &WakeConfig, scorer: Box<dyn WakeScorer>) -> Self {
        let warmup_frames = ms_to_samples(config.warmup_ms).div_ceil(FRAME_SIZE);

        tracing::debug!(
            threshold = config.threshold,
            warmup_frames,
            label = %config.label,
            "wake word gate initialized"
        );

        Self {
            threshold: config.threshold,
            margin: 0.0,
            warmup_frames,
            label: config.label.clone(),
            state: DetectorState::new(),
            scorer,
        }
    }

    /// Raise the detection threshold (self-trigger suppression during
    /// speech playback); pass 0.0 to restore the configured threshold
    pub const fn set_margin(&mut self, margin: f32) {
        self.margin = margin;
    }

    /// Whether the feature buffer has filled and the warm-up period elapsed
    #[must_use]
    pub const fn is_warmed_up(&self) -> bool {
        self.state.mel_filled && self.state.frames_since_mel_full >= self.warmup_frames
    }

    /// Feed one capture frame
    ///
    /// Returns a detection only when the scorer crosses the effective
    /// threshold after warm-up. Scorer errors produce `Detection::none()`.
    pub fn feed(&mut self, frame: &[f32]) -> Detection {
        self.state.push_mel(mel_row(frame));
        self.state.frames_since_prediction += 1;

        if !self.state.mel_filled || self.state.frames_since_prediction < EMBEDDING_STEP {
            return Detection::none();
        }

        self.state.frames_since_prediction = 0;
        let embedding = pool_embedding(&self.state.mel);
        self.state.push_embedding(embedding);

        let window = self.state.embedding_window();
        let score = match self.scorer.score(&window) {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!(error = %e, "wake scorer failed, treating as no detection");
                return Detection::none();
            }
        };

        if !self.is_warmed_up() {
            if score >= self.threshold {
                tracing::debug!(score, "detection ignored during warm-up");
            }
            return Detection { detected: false, score, label: None };
        }

        if score >= self.threshold + self.margin {
            tracing::info!(score, label = %self.label, "wake word detected");
            let label = self.label.clone();
            self.reset();
            return Detection {
                detected: true,
                score,
                label: Some(label),
            };
        }

        Detection { detected: false, score, label: None }
    }

    /// Reset feature buffers and the scorer (on detection, session restart)
    pub fn reset(&mut self) {
        self.state.reset();
        self.scorer.reset();
    }
}

/// Band log-energies for one frame: a cheap stand-in for a mel filterbank
/// with the same buffer shape
#[allow(clippy::cast_precision_loss)]
fn mel_row(frame: &[f32]) -> [f32; MEL_BINS] {
    let mut row = [0.0f32; MEL_BINS];
    if frame.is_empty() {
        return row;
    }

    let band = (frame.len() / MEL_BINS).max(1);
    for (i, slot) in row.iter_mut().enumerate() {
        let start = (i * band).min(frame.len());
        let end = ((i + 1) * band).min(frame.len());
        let energy = rms(&frame[start..end]);
        *slot = (energy + 1e-6).log10();
    }
    row
}

/// Pool the mel window into one embedding: per-bin mean, deviation, and max
#[allow(clippy::cast_precision_loss)]
fn pool_embedding(mel: &[[f32; MEL_BINS]]) -> [f32; EMBEDDING_DIM] {
    let mut emb = [0.0f32; EMBEDDING_DIM];
    let frames = mel.len() as f32;

    for bin in 0..MEL_BINS {
        let mut sum = 0.0f32;
        let mut max = f32::MIN;
        for row in mel {
            sum += row[bin];
            max = max.max(row[bin]);
        }
        let mean = sum / frames;

        let mut var = 0.0f32;
        for row in mel {
            let d = row[bin] - mean;
            var += d * d;
        }

        emb[bin] = mean;
        emb[MEL_BINS + bin] = (var / frames).sqrt();
        emb[2 * MEL_BINS + bin] = max;
    }
    emb
}

/// Default scorer: energy-spike pattern over the embedding window
///
/// A placeholder for a real keyword-spotting model; scores a sudden rise
/// of the newest embedding's activation over its smoothed history.
pub struct EnergyPatternScorer {
    smoothed: f32,
    spike_ratio: f32,
}

impl EnergyPatternScorer {
    /// Create a scorer with the default spike ratio
    #[must_use]
    pub const fn new() -> Self {
        Self {
            smoothed: 0.0,
            spike_ratio: 3.0,
        }
    }
}

impl Default for EnergyPatternScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeScorer for EnergyPatternScorer {
    #[allow(clippy::cast_precision_loss)]
    fn score(&mut self, embeddings: &[[f32; EMBEDDING_DIM]]) -> Result<f32> {
        let Some(latest) = embeddings.last() else {
            return Err(Error::WakeWord("empty embedding window".to_string()));
        };

        // Activation: mean max-band energy, shifted out of log space
        let activation = latest[2 * MEL_BINS..]
            .iter()
            .map(|v| 10.0f32.powf(*v))
            .sum::<f32>()
            / MEL_BINS as f32;

        let score = if self.smoothed > 1e-4 && activation > self.smoothed * self.spike_ratio {
            let ratio = activation / self.smoothed;
            ((ratio - self.spike_ratio) / self.spike_ratio).clamp(0.0, 1.0)
        } else {
            0.0
        };

        // Exponential moving average tracks the noise floor
        self.smoothed = self.smoothed.mul_add(0.9, activation * 0.1);
        Ok(score)
    }

    fn reset(&mut self) {
        self.smoothed = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scorer that always reports the given score
    struct ConstScorer(f32);

    impl WakeScorer for ConstScorer {
        fn score(&mut self, _: &[[f32; EMBEDDING_DIM]]) -> Result<f32> {
            Ok(self.0)
        }
        fn reset(&mut self) {}
    }

    /// Scorer that always fails
    struct FailingScorer;

    impl WakeScorer for FailingScorer {
        fn score(&mut self, _: &[[f32; EMBEDDING_DIM]]) -> Result<f32> {
            Err(Error::WakeWord("model exploded".to_string()))
        }
        fn reset(&mut self) {}
    }

    fn test_config() -> WakeConfig {
        WakeConfig {
            threshold: 0.5,
            warmup_ms: 2500,
            barge_in: true,
            barge_in_margin: 0.2,
            label: "wake".to_string(),
        }
    }

    fn quiet_frame() -> Vec<f32> {
        vec![0.001; FRAME_SIZE]
    }

    /// Frames needed for the mel buffer to fill plus the warm-up window
    fn warmup_total(config: &WakeConfig) -> usize {
        MEL_WINDOW + ms_to_samples(config.warmup_ms).div_ceil(FRAME_SIZE)
    }

    #[test]
    fn detections_before_warmup_are_ignored() {
        let config = test_config();
        let mut gate = WakeWordGate::with_scorer(&config, Box::new(ConstScorer(0.99)));

        // Feed right up to (but not past) the warm-up boundary
        for _ in 0..warmup_total(&config) - EMBEDDING_STEP {
            let detection = gate.feed(&quiet_frame());
            assert!(!detection.detected, "fired before warm-up completed");
        }
    }

    #[test]
    fn detection_fires_after_warmup() {
        let config = test_config();
        let mut gate = WakeWordGate::with_scorer(&config, Box::new(ConstScorer(0.99)));

        let mut fired = false;
        for _ in 0..warmup_total(&config) + EMBEDDING_STEP * 2 {
            let detection = gate.feed(&quiet_frame());
            if detection.detected {
                assert!(detection.score >= 0.5);
                assert_eq!(detection.label.as_deref(), Some("wake"));
                fired = true;
                break;
            }
        }
        assert!(fired, "never fired after warm-up");
    }

    #[test]
    fn detection_resets_state() {
        let config = test_config();
        let mut gate = WakeWordGate::with_scorer(&config, Box::new(ConstScorer(0.99)));

        for _ in 0..warmup_total(&config) + EMBEDDING_STEP * 2 {
            if gate.feed(&quiet_frame()).detected {
                break;
            }
        }

        // Buffers were reset: warm-up must elapse again before re-firing
        assert!(!gate.is_warmed_up());
        for _ in 0..warmup_total(&config) - 1 {
            assert!(!gate.feed(&quiet_frame()).detected);
        }
    }

    #[test]
    fn scorer_errors_never_propagate() {
        let config = test_config();
        let mut gate = WakeWordGate::with_scorer(&config, Box::new(FailingScorer));

        for _ in 0..warmup_total(&config) + EMBEDDING_STEP * 2 {
            let detection = gate.feed(&quiet_frame());
            assert!(!detection.detected);
            assert!(detection.score.abs() < f32::EPSILON);
        }
    }

    #[test]
    fn margin_raises_effective_threshold() {
        let config = test_config();
        let mut gate = WakeWordGate::with_scorer(&config, Box::new(ConstScorer(0.6)));
        gate.set_margin(0.5);

        for _ in 0..warmup_total(&config) + EMBEDDING_STEP * 4 {
            assert!(!gate.feed(&quiet_frame()).detected);
        }

        gate.set_margin(0.0);
        let mut fired = false;
        for _ in 0..EMBEDDING_STEP * 2 {
            if gate.feed(&quiet_frame()).detected {
                fired = true;
                break;
            }
        }
        assert!(fired, "should fire once margin removed");
    }

    #[test]
    fn energy_scorer_flags_spike_over_noise_floor() {
        let mut scorer = EnergyPatternScorer::new();

        let quiet = [[-3.0f32; EMBEDDING_DIM]];
        for _ in 0..20 {
            let s = scorer.score(&quiet).unwrap();
            assert!(s.abs() < f32::EPSILON);
        }

        let loud = [[0.0f32; EMBEDDING_DIM]];
        let s = scorer.score(&loud).unwrap();
        assert!(s > 0.5, "spike should score high, got {s}");
    }
}
